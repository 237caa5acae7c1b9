use common::ParseStatus;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// An uploaded APK/UPK and the metadata extracted from it.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "package")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Owning entity.
    #[sea_orm(indexed)]
    pub entity_id: i32,

    pub name: String,
    /// Display alias. Filled from the application label on scan when empty.
    pub alias: String,

    /// Manifest `package` attribute.
    pub package_name: Option<String>,
    /// Manifest `versionName`.
    pub version: Option<String>,
    /// Manifest `versionCode`, as a decimal string.
    pub version_code: Option<String>,
    /// Application icon, base64.
    #[sea_orm(column_type = "Text", nullable)]
    pub icon: Option<String>,

    /// Stored path relative to the document root.
    #[sea_orm(unique)]
    pub filename: String,
    /// Filename offered to downloaders.
    pub dl_filename: String,

    #[sea_orm(indexed)]
    pub parse_status: ParseStatus,

    #[sea_orm(default_value = false, indexed)]
    pub is_deleted: bool,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
