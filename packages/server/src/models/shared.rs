use crate::error::AppError;

/// Longest accepted `name` / `alias`, in characters.
pub const MAX_LABEL_CHARS: usize = 256;

/// Validate a display label (`name` or `alias`). Returns the trimmed value.
pub fn validate_label<'a>(field: &str, value: &'a str) -> Result<&'a str, AppError> {
    let value = value.trim();
    if value.chars().count() > MAX_LABEL_CHARS {
        return Err(AppError::Validation(format!(
            "{field} must be at most {MAX_LABEL_CHARS} characters"
        )));
    }
    Ok(value)
}
