use axum::Json;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::header::{ACCEPT, RANGE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use common::ParseStatus;
use common::storage::{BoxReader, PackageStore, StorageError, StoredFile};
use sea_orm::*;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::download::serve_file;
use crate::entity::package;
use crate::error::{AppError, ErrorBody};
use crate::extractors::entity::EntityContext;
use crate::extractors::query::AppQuery;
use crate::models::package::*;
use crate::models::shared::validate_label;
use crate::state::AppState;
use crate::utils::filename::{FilenameError, validate_package_filename};

/// Body limit for package uploads: the file itself plus room for the text fields.
pub fn package_body_limit(max_upload_size: u64) -> DefaultBodyLimit {
    DefaultBodyLimit::max(usize::try_from(max_upload_size).unwrap_or(usize::MAX) + 64 * 1024)
}

#[utoipa::path(
    post,
    path = "/packages",
    tag = "Packages",
    operation_id = "createPackage",
    summary = "Upload a package",
    description = "Stores an APK or UPK for the caller's entity and queues it for metadata \
        extraction. Send the binary in the `file` field, or name a file already staged in the \
        upload directory with `_file`. `name` defaults to the uploaded basename, `alias` to empty.",
    params(("X-Entity-Id" = i32, Header, description = "Owning entity")),
    request_body(content_type = "multipart/form-data", description = "`file` or `_file`, with optional `name` and `alias`"),
    responses(
        (status = 201, description = "Package stored", body = PackageResponse),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 500, description = "File could not be saved (INTERNAL_ERROR)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, multipart), fields(entity_id = ctx.entity_id))]
pub async fn create_package(
    ctx: EntityContext,
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let form = read_package_form(&state, ctx.entity_id, multipart).await?;
    let Some(file) = form.file else {
        return Err(AppError::Validation("No file uploaded".into()));
    };

    let now = Utc::now();
    let new_package = package::ActiveModel {
        entity_id: Set(ctx.entity_id),
        name: Set(form.name.unwrap_or_else(|| file.original_name.clone())),
        alias: Set(form.alias.unwrap_or_default()),
        filename: Set(file.path.clone()),
        dl_filename: Set(file.original_name.clone()),
        parse_status: Set(ParseStatus::Pending),
        is_deleted: Set(false),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };

    let model = match new_package.insert(&state.db).await {
        Ok(model) => model,
        Err(e) => {
            discard_stored(state.store.as_ref(), &file.path).await;
            return Err(e.into());
        }
    };

    info!(id = model.id, filename = %model.filename, "Package stored");

    Ok((
        StatusCode::CREATED,
        Json(PackageResponse::build(model, state.store.as_ref(), base_url(&state)).await),
    ))
}

#[utoipa::path(
    get,
    path = "/packages",
    tag = "Packages",
    operation_id = "listPackages",
    summary = "List the caller's packages",
    description = "Returns every package of the caller's entity that has not been deleted, oldest first.",
    params(("X-Entity-Id" = i32, Header, description = "Owning entity")),
    responses(
        (status = 200, description = "Packages of the entity", body = PackageListResponse),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
    ),
)]
#[instrument(skip(state), fields(entity_id = ctx.entity_id))]
pub async fn list_packages(
    ctx: EntityContext,
    State(state): State<AppState>,
) -> Result<Json<PackageListResponse>, AppError> {
    let models = package::Entity::find()
        .filter(package::Column::EntityId.eq(ctx.entity_id))
        .filter(package::Column::IsDeleted.eq(false))
        .order_by_asc(package::Column::Id)
        .all(&state.db)
        .await?;

    let mut data = Vec::with_capacity(models.len());
    for model in models {
        data.push(PackageResponse::build(model, state.store.as_ref(), base_url(&state)).await);
    }

    Ok(Json(PackageListResponse {
        total: data.len() as u64,
        data,
    }))
}

#[utoipa::path(
    get,
    path = "/packages/{id}",
    tag = "Packages",
    operation_id = "getPackage",
    summary = "Get a package",
    description = "Returns the package record. With `?alt=media`, or an `Accept` header naming \
        `application/octet-stream`, streams the stored binary instead, honouring `Range`.",
    params(
        ("id" = i32, Path, description = "Package ID"),
        ("X-Entity-Id" = i32, Header, description = "Owning entity"),
        PackageGetQuery,
    ),
    responses(
        (status = 200, description = "Package record, or the full binary", body = PackageResponse),
        (status = 206, description = "Partial binary content"),
        (status = 404, description = "Package not found (NOT_FOUND)", body = ErrorBody),
        (status = 416, description = "Range not satisfiable (RANGE_NOT_SATISFIABLE)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, headers, query), fields(entity_id = ctx.entity_id))]
pub async fn get_package(
    ctx: EntityContext,
    State(state): State<AppState>,
    Path(id): Path<i32>,
    AppQuery(query): AppQuery<PackageGetQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let model = find_package(&state.db, ctx.entity_id, id).await?;

    if wants_media(&query, &headers) {
        return Ok(stream_package(&state, &model, &headers).await);
    }

    let response = PackageResponse::build(model, state.store.as_ref(), base_url(&state)).await;
    Ok(Json(response).into_response())
}

#[utoipa::path(
    get,
    path = "/packages/{id}/download",
    tag = "Packages",
    operation_id = "downloadPackage",
    summary = "Download a package binary",
    description = "Streams the stored binary as an attachment. A single `Range: bytes=a-b` is \
        honoured; the response is 206 unless the range covers the whole file.",
    params(
        ("id" = i32, Path, description = "Package ID"),
        ("X-Entity-Id" = i32, Header, description = "Owning entity"),
    ),
    responses(
        (status = 200, description = "Full binary"),
        (status = 206, description = "Partial binary"),
        (status = 404, description = "Package or stored file not found"),
        (status = 416, description = "Range not satisfiable (RANGE_NOT_SATISFIABLE)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, headers), fields(entity_id = ctx.entity_id))]
pub async fn download_package(
    ctx: EntityContext,
    State(state): State<AppState>,
    Path(id): Path<i32>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let model = find_package(&state.db, ctx.entity_id, id).await?;
    Ok(stream_package(&state, &model, &headers).await)
}

#[utoipa::path(
    patch,
    path = "/packages/{id}",
    tag = "Packages",
    operation_id = "updatePackage",
    summary = "Update a package",
    description = "Updates `name` and `alias`, and optionally replaces the stored binary via \
        `file` or `_file`. A replaced binary gets a new stored path, the previous file is \
        removed and the record goes back to `pending`.",
    params(
        ("id" = i32, Path, description = "Package ID"),
        ("X-Entity-Id" = i32, Header, description = "Owning entity"),
    ),
    request_body(content_type = "multipart/form-data", description = "Optional `file`/`_file`, `name` and `alias`"),
    responses(
        (status = 200, description = "Package updated", body = PackageResponse),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 404, description = "Package not found (NOT_FOUND)", body = ErrorBody),
        (status = 500, description = "File could not be saved (INTERNAL_ERROR)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, multipart), fields(entity_id = ctx.entity_id))]
pub async fn update_package(
    ctx: EntityContext,
    State(state): State<AppState>,
    Path(id): Path<i32>,
    multipart: Multipart,
) -> Result<Json<PackageResponse>, AppError> {
    let existing = find_package(&state.db, ctx.entity_id, id).await?;
    let form = read_package_form(&state, ctx.entity_id, multipart).await?;

    let old_filename = existing.filename.clone();
    let mut active: package::ActiveModel = existing.into();

    if let Some(name) = form.name {
        active.name = Set(name);
    }
    if let Some(alias) = form.alias {
        active.alias = Set(alias);
    }
    if let Some(file) = &form.file {
        active.filename = Set(file.path.clone());
        active.dl_filename = Set(file.original_name.clone());
        active.parse_status = Set(ParseStatus::Pending);
    }
    active.updated_at = Set(Utc::now());

    let model = match active.update(&state.db).await {
        Ok(model) => model,
        Err(e) => {
            if let Some(file) = &form.file {
                discard_stored(state.store.as_ref(), &file.path).await;
            }
            return Err(e.into());
        }
    };

    if form.file.is_some() {
        discard_stored(state.store.as_ref(), &old_filename).await;
        info!(id = model.id, old = %old_filename, new = %model.filename, "Package file replaced");
    }

    Ok(Json(
        PackageResponse::build(model, state.store.as_ref(), base_url(&state)).await,
    ))
}

#[utoipa::path(
    delete,
    path = "/packages/{id}",
    tag = "Packages",
    operation_id = "deletePackage",
    summary = "Delete a package",
    description = "Flags the package deleted and keeps its file. With `?force=true` the record \
        and its stored file are removed for good; this also applies to already deleted records.",
    params(
        ("id" = i32, Path, description = "Package ID"),
        ("X-Entity-Id" = i32, Header, description = "Owning entity"),
        PackageDeleteQuery,
    ),
    responses(
        (status = 204, description = "Package deleted"),
        (status = 404, description = "Package not found (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, query), fields(entity_id = ctx.entity_id, force = query.force))]
pub async fn delete_package(
    ctx: EntityContext,
    State(state): State<AppState>,
    Path(id): Path<i32>,
    AppQuery(query): AppQuery<PackageDeleteQuery>,
) -> Result<StatusCode, AppError> {
    let mut select =
        package::Entity::find_by_id(id).filter(package::Column::EntityId.eq(ctx.entity_id));
    if !query.force {
        select = select.filter(package::Column::IsDeleted.eq(false));
    }
    let model = select
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Package not found".into()))?;

    if query.force {
        purge_package(&state, &model).await?;
        return Ok(StatusCode::NO_CONTENT);
    }

    let mut active: package::ActiveModel = model.into();
    active.is_deleted = Set(true);
    active.updated_at = Set(Utc::now());
    active.update(&state.db).await?;

    info!(id, "Package soft-deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/entities/{entity_id}/packages",
    tag = "Packages",
    operation_id = "purgeEntityPackages",
    summary = "Purge every package of an entity",
    description = "Called by the host when an entity is removed. Deletes all of the entity's \
        package records, soft-deleted ones included, together with their stored files.",
    params(("entity_id" = i32, Path, description = "Entity ID")),
    responses(
        (status = 200, description = "Packages purged", body = EntityPurgeResponse),
    ),
)]
#[instrument(skip(state))]
pub async fn purge_entity_packages(
    State(state): State<AppState>,
    Path(entity_id): Path<i32>,
) -> Result<Json<EntityPurgeResponse>, AppError> {
    let models = package::Entity::find()
        .filter(package::Column::EntityId.eq(entity_id))
        .all(&state.db)
        .await?;

    let mut purged = 0;
    for model in &models {
        purge_package(&state, model).await?;
        purged += 1;
    }

    info!(entity_id, purged, "Entity packages purged");
    Ok(Json(EntityPurgeResponse { purged }))
}

async fn find_package(
    db: &DatabaseConnection,
    entity_id: i32,
    id: i32,
) -> Result<package::Model, AppError> {
    package::Entity::find_by_id(id)
        .filter(package::Column::EntityId.eq(entity_id))
        .filter(package::Column::IsDeleted.eq(false))
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound("Package not found".into()))
}

async fn purge_package(state: &AppState, model: &package::Model) -> Result<(), AppError> {
    package::Entity::delete_by_id(model.id).exec(&state.db).await?;
    discard_stored(state.store.as_ref(), &model.filename).await;
    info!(
        id = model.id,
        "Package purged, dependent tasks and notifications are left to the host"
    );
    Ok(())
}

fn wants_media(query: &PackageGetQuery, headers: &HeaderMap) -> bool {
    query.alt.as_deref() == Some("media")
        || headers
            .get(ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("application/octet-stream"))
}

async fn stream_package(
    state: &AppState,
    model: &package::Model,
    headers: &HeaderMap,
) -> Response {
    let range = headers.get(RANGE).and_then(|v| v.to_str().ok());
    serve_file(
        state.store.as_ref(),
        &model.filename,
        &model.dl_filename,
        range,
        &state.config.download,
    )
    .await
}

fn base_url(state: &AppState) -> Option<&str> {
    state.config.deploy.base_url.as_deref()
}

async fn discard_stored(store: &dyn PackageStore, path: &str) {
    match store.delete(path).await {
        Ok(true) => {}
        Ok(false) => warn!(path, "Stored file was already gone"),
        Err(e) => warn!(path, error = %e, "Failed to remove stored file"),
    }
}

/// Read a create/update body. Any file already stored is removed again if a
/// later field is rejected.
async fn read_package_form(
    state: &AppState,
    entity_id: i32,
    mut multipart: Multipart,
) -> Result<PackageForm, AppError> {
    let mut form = PackageForm::default();

    if let Err(e) = collect_fields(state, entity_id, &mut multipart, &mut form).await {
        if let Some(file) = form.file.take() {
            discard_stored(state.store.as_ref(), &file.path).await;
        }
        return Err(e);
    }

    Ok(form)
}

async fn collect_fields(
    state: &AppState,
    entity_id: i32,
    multipart: &mut Multipart,
    form: &mut PackageForm,
) -> Result<(), AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Multipart error: {e}")))?
    {
        match field.name() {
            Some("file") => {
                let raw_name = field.file_name().unwrap_or_default().to_string();
                let (original_name, _) =
                    validate_package_filename(&raw_name).map_err(filename_error)?;
                ensure_no_file(form)?;
                let stored = stream_field_to_store(
                    field,
                    state.store.as_ref(),
                    entity_id,
                    original_name,
                    state.config.storage.max_upload_size,
                )
                .await?;
                form.file = Some(uploaded(stored));
            }
            Some("_file") => {
                let staged = read_text(field, "_file").await?;
                let (staged, _) = validate_package_filename(&staged).map_err(filename_error)?;
                ensure_no_file(form)?;
                let stored = import_staged(state, entity_id, staged).await?;
                form.file = Some(uploaded(stored));
            }
            Some("name") => {
                let text = read_text(field, "name").await?;
                let name = validate_label("name", &text)?;
                if !name.is_empty() {
                    form.name = Some(name.to_string());
                }
            }
            Some("alias") => {
                let text = read_text(field, "alias").await?;
                form.alias = Some(validate_label("alias", &text)?.to_string());
            }
            _ => {} // Ignore unknown fields.
        }
    }

    Ok(())
}

fn ensure_no_file(form: &PackageForm) -> Result<(), AppError> {
    if form.file.is_some() {
        return Err(AppError::Validation("Only one file may be uploaded".into()));
    }
    Ok(())
}

fn filename_error(e: FilenameError) -> AppError {
    AppError::Validation(e.message().into())
}

fn uploaded(stored: StoredFile) -> UploadedFile {
    UploadedFile {
        path: stored.path,
        original_name: stored.original_name,
    }
}

fn save_error(err: StorageError) -> AppError {
    match err {
        StorageError::SizeLimitExceeded { .. } => err.into(),
        other => AppError::SaveFailed(other.to_string()),
    }
}

async fn read_text(
    field: axum::extract::multipart::Field<'_>,
    name: &str,
) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|e| AppError::Validation(format!("Failed to read {name}: {e}")))
}

/// Move a file the UI staged in the upload directory into the entity's directory.
async fn import_staged(
    state: &AppState,
    entity_id: i32,
    staged: &str,
) -> Result<StoredFile, AppError> {
    let source = state.config.storage.upload_dir.join(staged);
    let is_file = tokio::fs::metadata(&source)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false);
    if !is_file {
        return Err(AppError::Validation("No file uploaded".into()));
    }

    state.store.import(entity_id, &source).await.map_err(save_error)
}

async fn stream_field_to_store(
    mut field: axum::extract::multipart::Field<'_>,
    store: &dyn PackageStore,
    entity_id: i32,
    original_name: &str,
    max_size: u64,
) -> Result<StoredFile, AppError> {
    let temp_path = std::env::temp_dir().join(format!("apkvault-upload-{}", Uuid::new_v4()));

    let result = async {
        let mut temp_file = tokio::fs::File::create(&temp_path)
            .await
            .map_err(|e| AppError::SaveFailed(format!("Failed to create temp file: {e}")))?;

        let mut total_size: u64 = 0;

        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| AppError::Validation(format!("Upload read error: {e}")))?
        {
            total_size += chunk.len() as u64;
            if total_size > max_size {
                return Err(AppError::Validation(format!(
                    "File exceeds maximum size of {max_size} bytes"
                )));
            }
            temp_file
                .write_all(&chunk)
                .await
                .map_err(|e| AppError::SaveFailed(format!("Temp file write failed: {e}")))?;
        }

        temp_file
            .flush()
            .await
            .map_err(|e| AppError::SaveFailed(format!("Temp file flush failed: {e}")))?;
        drop(temp_file);

        let file = tokio::fs::File::open(&temp_path)
            .await
            .map_err(|e| AppError::SaveFailed(format!("Failed to reopen temp file: {e}")))?;
        let reader: BoxReader = Box::new(file);
        store
            .put_stream(entity_id, original_name, reader)
            .await
            .map_err(save_error)
    }
    .await;

    // Best effort.
    let _ = tokio::fs::remove_file(&temp_path).await;

    result
}
