// ============================
// crates/backend-lib/src/handlers/mod.rs
// ============================
//! HTTP handlers for recordings and meeting history.
pub mod history;
pub mod recordings;

use crate::error::AppError;

/// Parse a list position taken from the request path
pub(crate) fn parse_index(raw: &str) -> Result<usize, AppError> {
    raw.parse()
        .map_err(|_| AppError::InvalidInput(format!("index must be a non-negative integer, got {raw:?}")))
}
