use std::sync::Arc;

use common::storage::PackageStore;
use common::upk::PackageTranslator;
use sea_orm::DatabaseConnection;

use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub store: Arc<dyn PackageStore>,
    pub translator: Arc<dyn PackageTranslator>,
    pub config: AppConfig,
}
