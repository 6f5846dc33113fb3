//! File name validation for received Transfer Units.
//!
//! A received name must resolve to an entry directly inside the
//! materialization directory. Anything that could climb out of it,
//! address another volume, or land in a subdirectory is rejected.

use thiserror::Error;

/// Longest name accepted, in bytes (common filesystem limit).
pub const MAX_NAME_LEN: usize = 255;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("File name is empty")]
    Empty,

    #[error("File name is too long ({0} bytes)")]
    TooLong(usize),

    #[error("File name refers to a directory: {0:?}")]
    DotEntry(String),

    #[error("File name contains a path separator: {0:?}")]
    Separator(String),

    #[error("File name contains a NUL or control character: {0:?}")]
    ControlCharacter(String),

    #[error("File name has a drive prefix: {0:?}")]
    DrivePrefix(String),
}

/// Validate a received file name, returning it unchanged when it is safe.
pub fn sanitize_name(raw: &str) -> Result<String, NameError> {
    if raw.is_empty() {
        return Err(NameError::Empty);
    }
    if raw.len() > MAX_NAME_LEN {
        return Err(NameError::TooLong(raw.len()));
    }
    if raw == "." || raw == ".." {
        return Err(NameError::DotEntry(raw.to_string()));
    }
    if raw.contains('/') || raw.contains('\\') {
        return Err(NameError::Separator(raw.to_string()));
    }
    if raw.chars().any(char::is_control) {
        return Err(NameError::ControlCharacter(raw.to_string()));
    }

    // "C:evil" is relative to the current directory of drive C on Windows
    let bytes = raw.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        return Err(NameError::DrivePrefix(raw.to_string()));
    }

    Ok(raw.to_string())
}
