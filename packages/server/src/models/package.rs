use chrono::{DateTime, Utc};
use common::ParseStatus;
use common::storage::PackageStore;
use serde::{Deserialize, Serialize};

use crate::entity::package;

/// Response DTO for a package record.
///
/// `filesize` and `mime_type` are read from the stored file on every request
/// and are zero/empty when the file is gone.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct PackageResponse {
    #[schema(example = 12)]
    pub id: i32,
    #[schema(example = 3)]
    pub entity_id: i32,
    #[schema(example = "Field Notes")]
    pub name: String,
    #[schema(example = "Notes")]
    pub alias: String,
    #[schema(example = "org.example.notes")]
    pub package_name: Option<String>,
    #[schema(example = "2.4.1")]
    pub version: Option<String>,
    #[schema(example = "241")]
    pub version_code: Option<String>,
    /// Application icon, base64 encoded.
    pub icon: Option<String>,
    /// Stored path relative to the document root.
    #[schema(example = "package/3/6f1c0c3be0b94d4f9d1a0f6f0d8a1e2b_notes.apk")]
    pub filename: String,
    #[schema(example = "notes.apk")]
    pub dl_filename: String,
    pub parse_status: ParseStatus,
    #[schema(example = 5242880)]
    pub filesize: u64,
    #[schema(example = "application/vnd.android.package-archive")]
    pub mime_type: String,
    /// Public URL of the stored file, when a deploy base URL is configured.
    pub file_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PackageResponse {
    pub async fn build(
        model: package::Model,
        store: &dyn PackageStore,
        base_url: Option<&str>,
    ) -> Self {
        let (filesize, mime_type) = match store.stat(&model.filename).await {
            Ok(info) => (
                info.size,
                mime_guess::from_path(&model.filename)
                    .first_or_octet_stream()
                    .to_string(),
            ),
            Err(_) => (0, String::new()),
        };

        // Stored paths already start with `package/`.
        let file_url =
            base_url.map(|base| format!("{}/{}", base.trim_end_matches('/'), model.filename));

        Self {
            id: model.id,
            entity_id: model.entity_id,
            name: model.name,
            alias: model.alias,
            package_name: model.package_name,
            version: model.version,
            version_code: model.version_code,
            icon: model.icon,
            filename: model.filename,
            dl_filename: model.dl_filename,
            parse_status: model.parse_status,
            filesize,
            mime_type,
            file_url,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// Response DTO for listing an entity's packages.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct PackageListResponse {
    pub data: Vec<PackageResponse>,
    pub total: u64,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct PackageGetQuery {
    /// `media` streams the stored binary instead of the JSON record.
    pub alt: Option<String>,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct PackageDeleteQuery {
    /// Remove the record and its file instead of flagging it deleted.
    #[serde(default)]
    pub force: bool,
}

/// Fields collected from a create/update multipart body.
#[derive(Debug, Default)]
pub struct PackageForm {
    pub name: Option<String>,
    pub alias: Option<String>,
    pub file: Option<UploadedFile>,
}

/// A package file received with the request, already written to storage.
#[derive(Debug)]
pub struct UploadedFile {
    pub path: String,
    pub original_name: String,
}

/// Response DTO for the entity purge hook.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct EntityPurgeResponse {
    /// Number of package records removed.
    #[schema(example = 4)]
    pub purged: u64,
}
