use std::path::{Component, Path};

use crate::StoreError;

/// Longest accepted session id.
const MAX_ID_LEN: usize = 128;

/// Validates that a session id can safely name a file inside a store directory.
///
/// Rejects:
/// - Empty or overlong ids
/// - Anything with a path separator, `.`/`..`, or a leading dot
/// - Characters outside `[A-Za-z0-9_-.]`
pub fn validate_session_id(id: &str) -> Result<(), StoreError> {
    if id.is_empty() {
        return Err(StoreError::InvalidId("empty id".into()));
    }
    if id.len() > MAX_ID_LEN {
        return Err(StoreError::InvalidId(format!(
            "id longer than {MAX_ID_LEN} bytes"
        )));
    }
    if id.starts_with('.') {
        return Err(StoreError::InvalidId(format!(
            "leading dot not allowed: {id}"
        )));
    }
    if let Some(bad) = id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(StoreError::InvalidId(format!(
            "character {bad:?} not allowed: {id}"
        )));
    }

    let mut components = Path::new(id).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(StoreError::InvalidId(format!(
            "id must be a single path component: {id}"
        ))),
    }
}
