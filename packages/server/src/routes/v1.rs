use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;

use crate::config::AppConfig;
use crate::handlers;
use crate::state::AppState;

pub fn routes(config: &AppConfig) -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .merge(package_routes(config))
        .merge(scanner_routes())
}

fn package_routes(config: &AppConfig) -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(
            handlers::package::list_packages,
            handlers::package::create_package
        ))
        .routes(routes!(
            handlers::package::get_package,
            handlers::package::update_package,
            handlers::package::delete_package
        ))
        .routes(routes!(handlers::package::download_package))
        .routes(routes!(handlers::package::purge_entity_packages))
        .layer(handlers::package::package_body_limit(
            config.storage.max_upload_size,
        ))
}

fn scanner_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(routes!(handlers::scanner::run_scanner))
}
