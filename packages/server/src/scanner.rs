//! Background extraction of package metadata.
//!
//! Each batch picks up `pending` records, opens the stored binary (unwrapping
//! UPK containers first), and writes the manifest fields back. The write is
//! conditional on the record still being `pending` with the same stored path,
//! so a file replaced while a batch is running is never stamped with stale
//! metadata.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use common::ParseStatus;
use common::apk::{ApkError, ApkParser};
use common::config::ScannerConfig;
use common::storage::PackageStore;
use common::upk::PackageTranslator;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};
use tracing::{debug, error, info, warn};

use crate::entity::package;
use crate::utils::filename::PackageKind;

/// Status code handed back to the cron host after every batch.
pub const CRON_STATUS_OK: i32 = 1;

/// Running counters shared with the cron host.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanProgress {
    /// Records parsed so far.
    pub volume: u64,
}

/// Fields pulled out of a package manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageMetadata {
    pub package_name: String,
    pub version: Option<String>,
    pub version_code: Option<String>,
    /// Base64 of the first icon the manifest resolves to.
    pub icon: Option<String>,
    /// First value of the application label.
    pub label: Option<String>,
}

/// What happened to a single record.
#[derive(Debug)]
pub enum ScanOutcome {
    Parsed(PackageMetadata),
    /// The APK itself could not be read. The record stays `pending`.
    Malformed(ApkError),
    /// The container could not be translated into an APK. Terminal.
    Untranslatable(String),
}

/// Run the scanner as a background task.
pub async fn run_scanner(
    db: DatabaseConnection,
    store: Arc<dyn PackageStore>,
    translator: Arc<dyn PackageTranslator>,
    config: ScannerConfig,
) {
    info!(
        interval_secs = config.interval_secs,
        batch_size = config.batch_size,
        "Starting package scanner"
    );

    let mut interval = tokio::time::interval(Duration::from_secs(config.interval_secs.max(1)));
    let mut progress = ScanProgress::default();

    loop {
        interval.tick().await;

        match scan_pending_packages(
            &db,
            store.as_ref(),
            &translator,
            config.batch_size,
            &mut progress,
        )
        .await
        {
            Ok(_) => debug!(volume = progress.volume, "Scan batch finished"),
            Err(e) => error!(error = %e, "Scan batch failed"),
        }
    }
}

/// Process one batch of pending records.
///
/// Adds one to `progress.volume` per record parsed and returns the cron status,
/// which is always [`CRON_STATUS_OK`]; per-record problems are logged, not returned.
pub async fn scan_pending_packages(
    db: &DatabaseConnection,
    store: &dyn PackageStore,
    translator: &Arc<dyn PackageTranslator>,
    batch_size: u64,
    progress: &mut ScanProgress,
) -> Result<i32, DbErr> {
    let pending = package::Entity::find()
        .filter(package::Column::ParseStatus.eq(ParseStatus::Pending))
        .filter(package::Column::IsDeleted.eq(false))
        .order_by_asc(package::Column::Id)
        .limit(batch_size)
        .all(db)
        .await?;

    for record in pending {
        if scan_record(db, store, translator, &record).await? {
            progress.volume += 1;
        }
    }

    Ok(CRON_STATUS_OK)
}

/// Returns whether the record was marked parsed.
async fn scan_record(
    db: &DatabaseConnection,
    store: &dyn PackageStore,
    translator: &Arc<dyn PackageTranslator>,
    record: &package::Model,
) -> Result<bool, DbErr> {
    let Some(kind) = PackageKind::from_path(&record.filename) else {
        debug!(id = record.id, filename = %record.filename, "Skipping non-package file");
        return Ok(false);
    };

    let path = match store.local_path(&record.filename) {
        Ok(path) => path,
        Err(e) => {
            warn!(id = record.id, error = %e, "Stored path is unusable");
            return Ok(false);
        }
    };

    let translator = Arc::clone(translator);
    let outcome =
        match tokio::task::spawn_blocking(move || inspect_package(kind, &path, &*translator))
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(id = record.id, error = %e, "Package inspection panicked");
                return Ok(false);
            }
        };

    match outcome {
        ScanOutcome::Parsed(meta) => mark_parsed(db, record, meta).await,
        ScanOutcome::Malformed(e) => {
            warn!(id = record.id, error = %e, "Malformed package, leaving pending");
            Ok(false)
        }
        ScanOutcome::Untranslatable(reason) => {
            warn!(id = record.id, reason = %reason, "Container translation failed");
            mark_failed(db, record).await?;
            Ok(false)
        }
    }
}

/// Open and read a stored package. Blocking.
pub fn inspect_package(
    kind: PackageKind,
    path: &Path,
    translator: &dyn PackageTranslator,
) -> ScanOutcome {
    let apk = match kind {
        PackageKind::Apk => match ApkParser::open(path) {
            Ok(apk) => apk,
            Err(e) => return ScanOutcome::Malformed(e),
        },
        PackageKind::Upk => match translator.translate(path) {
            Ok(apk) => apk,
            Err(e) => return ScanOutcome::Untranslatable(e.to_string()),
        },
    };

    match read_metadata(apk) {
        Ok(meta) => ScanOutcome::Parsed(meta),
        Err(e) => ScanOutcome::Malformed(e),
    }
}

/// Pull identity, icon and label out of an opened APK.
pub fn read_metadata(mut apk: ApkParser) -> Result<PackageMetadata, ApkError> {
    let application = apk.manifest().application.clone();

    let icon = match &application.icon {
        Some(value) => match apk.resources(value)?.first() {
            Some(entry) => Some(STANDARD.encode(apk.read_entry(entry)?)),
            None => None,
        },
        None => None,
    };

    let label = match &application.label {
        Some(value) => apk.resources(value)?.into_iter().next(),
        None => None,
    };

    Ok(PackageMetadata {
        package_name: apk.manifest().package_name.clone(),
        version: apk.version_name()?,
        version_code: apk.version_code(),
        icon,
        label,
    })
}

async fn mark_parsed(
    db: &DatabaseConnection,
    record: &package::Model,
    meta: PackageMetadata,
) -> Result<bool, DbErr> {
    let mut update = package::Entity::update_many()
        .col_expr(
            package::Column::PackageName,
            Expr::value(Some(meta.package_name)),
        )
        .col_expr(package::Column::Version, Expr::value(meta.version))
        .col_expr(package::Column::VersionCode, Expr::value(meta.version_code))
        .col_expr(package::Column::Icon, Expr::value(meta.icon))
        .col_expr(package::Column::ParseStatus, Expr::value(ParseStatus::Parsed))
        .col_expr(package::Column::UpdatedAt, Expr::value(Utc::now()));

    if record.alias.is_empty()
        && let Some(label) = meta.label
    {
        update = update.col_expr(package::Column::Alias, Expr::value(label));
    }

    let result = update
        .filter(package::Column::Id.eq(record.id))
        .filter(package::Column::Filename.eq(record.filename.as_str()))
        .filter(package::Column::ParseStatus.eq(ParseStatus::Pending))
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        info!(id = record.id, "Package changed during scan, result discarded");
        return Ok(false);
    }

    info!(id = record.id, "Package metadata extracted");
    Ok(true)
}

async fn mark_failed(db: &DatabaseConnection, record: &package::Model) -> Result<(), DbErr> {
    package::Entity::update_many()
        .col_expr(package::Column::ParseStatus, Expr::value(ParseStatus::Failed))
        .col_expr(package::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(package::Column::Id.eq(record.id))
        .filter(package::Column::Filename.eq(record.filename.as_str()))
        .filter(package::Column::ParseStatus.eq(ParseStatus::Pending))
        .exec(db)
        .await?;
    Ok(())
}
