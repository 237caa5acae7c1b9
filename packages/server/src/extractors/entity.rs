use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::AppError;

/// Header carrying the caller's active entity, set by the fronting host after
/// it has authorized the request.
pub const ENTITY_HEADER: &str = "X-Entity-Id";

/// The entity on whose behalf the request runs.
///
/// Every package operation is scoped to this entity; records owned by another
/// entity behave as if they did not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityContext {
    pub entity_id: i32,
}

impl<S> FromRequestParts<S> for EntityContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(ENTITY_HEADER)
            .ok_or_else(|| AppError::Validation(format!("Missing {ENTITY_HEADER} header")))?;

        let entity_id = raw
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<i32>().ok())
            .filter(|id| *id > 0)
            .ok_or_else(|| AppError::Validation(format!("Invalid {ENTITY_HEADER} header")))?;

        Ok(EntityContext { entity_id })
    }
}
