// ============================
// crates/backend-lib/src/validation/mod.rs
// ============================
//! Message validation module.

use meetmesh_common::{ClientToServer, ConnectionId};
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

// Common validation constants
const MAX_ROOM_KEY_LENGTH: usize = 64;
const MAX_DISPLAY_NAME_LENGTH: usize = 100;
const MAX_FILE_NAME_LENGTH: usize = 100;

// Regex patterns for validation
static ROOM_KEY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("room key pattern"));
static DISPLAY_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^<>/\\{}\[\];]*$").expect("display name pattern"));
static FILE_IDENTIFIER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-][A-Za-z0-9._-]*$").expect("file id pattern"));

/// Possible validation errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid room key: {0}")]
    InvalidRoomKey(String),

    #[error("Invalid display name: {0}")]
    InvalidDisplayName(String),

    #[error("Invalid file identifier: {0}")]
    InvalidFileIdentifier(String),

    #[error("Invalid signal: {0}")]
    InvalidSignal(String),
}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validate a room key
pub fn validate_room_key(room_key: &str) -> ValidationResult<&str> {
    if room_key.is_empty() {
        return Err(ValidationError::InvalidRoomKey(
            "Room key must not be empty".to_string(),
        ));
    }

    if room_key.len() > MAX_ROOM_KEY_LENGTH {
        return Err(ValidationError::InvalidRoomKey(format!(
            "Room key must be at most {MAX_ROOM_KEY_LENGTH} characters"
        )));
    }

    if !ROOM_KEY_REGEX.is_match(room_key) {
        return Err(ValidationError::InvalidRoomKey(
            "Room key must contain only alphanumeric characters, hyphens and underscores"
                .to_string(),
        ));
    }

    Ok(room_key)
}

/// Validate a display name; surrounding whitespace is trimmed
pub fn validate_display_name(display_name: &str) -> ValidationResult<&str> {
    let trimmed = display_name.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::InvalidDisplayName(
            "Display name must not be empty".to_string(),
        ));
    }

    if trimmed.chars().count() > MAX_DISPLAY_NAME_LENGTH {
        return Err(ValidationError::InvalidDisplayName(format!(
            "Display name must be between 1 and {MAX_DISPLAY_NAME_LENGTH} characters"
        )));
    }

    if !DISPLAY_NAME_REGEX.is_match(trimmed) || trimmed.chars().any(char::is_control) {
        return Err(ValidationError::InvalidDisplayName(
            "Display name contains invalid characters".to_string(),
        ));
    }

    Ok(trimmed)
}

/// Validate a stored file identifier before it touches the filesystem
pub fn validate_file_identifier(file_id: &str) -> ValidationResult<&str> {
    if file_id.is_empty() || file_id.len() > MAX_FILE_NAME_LENGTH + 32 {
        return Err(ValidationError::InvalidFileIdentifier(
            "File identifier has an invalid length".to_string(),
        ));
    }

    if !FILE_IDENTIFIER_REGEX.is_match(file_id) || file_id.contains("..") {
        return Err(ValidationError::InvalidFileIdentifier(
            "File identifier contains invalid characters".to_string(),
        ));
    }

    Ok(file_id)
}

/// Reduce an uploaded file name to a single safe path component
pub fn sanitize_file_name(original: &str) -> String {
    // browsers may send a full client-side path
    let base = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_FILE_NAME_LENGTH)
        .collect();

    let cleaned = cleaned.trim_start_matches('.').replace("..", "_");
    if cleaned.is_empty() {
        "recording.webm".to_string()
    } else {
        cleaned
    }
}

/// Validates a client message in the context of the sending connection
pub fn validate_client_message(
    message: &ClientToServer,
    sender: ConnectionId,
) -> ValidationResult<()> {
    match message {
        ClientToServer::JoinRoom {
            room_key,
            display_name,
        } => {
            validate_room_key(room_key)?;
            validate_display_name(display_name)?;
        },
        ClientToServer::LeaveRoom => {},
        ClientToServer::Signal { to, from, .. } => {
            if let Some(from) = from {
                if *from != sender {
                    return Err(ValidationError::InvalidSignal(
                        "Signal source does not match the sending connection".to_string(),
                    ));
                }
            }
            if *to == sender {
                return Err(ValidationError::InvalidSignal(
                    "Signal cannot be addressed to its sender".to_string(),
                ));
            }
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use meetmesh_common::SignalPayload;

    #[test]
    fn test_validate_room_key() {
        assert!(validate_room_key("demo").is_ok());
        assert!(validate_room_key("team_42-sync").is_ok());
        assert!(validate_room_key("").is_err());
        assert!(validate_room_key("has space").is_err());
        assert!(validate_room_key("../etc").is_err());
        assert!(validate_room_key(&"a".repeat(MAX_ROOM_KEY_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_validate_display_name() {
        assert_eq!(validate_display_name("  Ada Lovelace ").unwrap(), "Ada Lovelace");
        assert!(validate_display_name("José").is_ok());
        assert!(validate_display_name("   ").is_err());
        assert!(validate_display_name("<script>").is_err());
        assert!(validate_display_name("tab\there").is_err());
        assert!(validate_display_name(&"x".repeat(MAX_DISPLAY_NAME_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_validate_file_identifier() {
        assert!(validate_file_identifier("1700000000000-demo.webm").is_ok());
        assert!(validate_file_identifier("../secret").is_err());
        assert!(validate_file_identifier(".hidden").is_err());
        assert!(validate_file_identifier("a/b").is_err());
        assert!(validate_file_identifier("").is_err());
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("demo-123.webm"), "demo-123.webm");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\clip one.webm"), "clip_one.webm");
        assert_eq!(sanitize_file_name("/tmp/../x.webm"), "x.webm");
        assert_eq!(sanitize_file_name("..."), "recording.webm");
        assert_eq!(sanitize_file_name(""), "recording.webm");
        assert_eq!(sanitize_file_name("a..b"), "a_b");
    }

    #[test]
    fn test_validate_signal_source() {
        let sender = ConnectionId::new_v4();
        let other = ConnectionId::new_v4();
        let payload = SignalPayload(serde_json::json!({}));

        let ok = ClientToServer::Signal { to: other, from: Some(sender), payload: payload.clone() };
        assert!(validate_client_message(&ok, sender).is_ok());

        let implicit = ClientToServer::Signal { to: other, from: None, payload: payload.clone() };
        assert!(validate_client_message(&implicit, sender).is_ok());

        let spoofed = ClientToServer::Signal { to: other, from: Some(other), payload: payload.clone() };
        assert!(matches!(
            validate_client_message(&spoofed, sender),
            Err(ValidationError::InvalidSignal(_))
        ));

        let to_self = ClientToServer::Signal { to: sender, from: None, payload };
        assert!(validate_client_message(&to_self, sender).is_err());
    }
}
