use std::path::PathBuf;
use thiserror::Error;

pub type PrivageResult<T> = Result<T, PrivageError>;

#[derive(Debug, Error)]
pub enum PrivageError {
    #[error("config error: {0}")]
    Config(String),

    #[error("identity error: {0}")]
    Identity(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("label already exists: {0}")]
    LabelExists(String),

    #[error("header corrupted: {0}")]
    HeaderCorruption(String),

    #[error("{field} is {len} bytes, limit is {max}")]
    FieldOverflow {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("decrypt error: {0}")]
    Decrypt(String),

    /// The file was encrypted to a recipient the identity does not hold.
    #[error("no matching identity")]
    NoMatchingIdentity,

    /// Every error seen while writing through a temp file, in order.
    #[error("writing {}: {}", .path.display(), join_errors(.errors))]
    Write {
        path: PathBuf,
        errors: Vec<PrivageError>,
    },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("{} already holds a different header ({existing})", .path.display())]
    Collision { path: PathBuf, existing: String },

    #[error("token support disabled")]
    TokenDisabled,

    #[error("token error: {0}")]
    Token(String),

    #[error("rotation error: {0}")]
    Rotation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PrivageError {
    /// True for the category-overflow case of header padding.
    pub fn is_overflow_of(&self, name: &str) -> bool {
        matches!(self, PrivageError::FieldOverflow { field, .. } if *field == name)
    }
}

fn join_errors(errors: &[PrivageError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_error_keeps_every_cause() {
        let err = PrivageError::Write {
            path: PathBuf::from("/repo/abc.age"),
            errors: vec![
                PrivageError::Decrypt("stream closed".into()),
                PrivageError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "unlink denied",
                )),
            ],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("writing /repo/abc.age: "));
        assert!(msg.contains("stream closed"));
        assert!(msg.contains("unlink denied"));
    }

    #[test]
    fn overflow_names_the_field() {
        let err = PrivageError::FieldOverflow {
            field: "category",
            len: 42,
            max: 40,
        };
        assert!(err.is_overflow_of("category"));
        assert!(!err.is_overflow_of("label"));
        assert_eq!(err.to_string(), "category is 42 bytes, limit is 40");
    }
}
