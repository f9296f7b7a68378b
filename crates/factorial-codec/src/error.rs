//! Error type shared by every layer of the codec.
//!
//! Contract violations (bad arguments, use-after-free of pooled storage,
//! unsupported formats or member kinds) and data failures (truncated
//! streams, mistyped entries, dangling references) all surface as a
//! [`CodecError`] at the call that hit them. Nothing is retried internally.

use crate::data::EntryType;
use crate::header::{BLOB_MAGIC, BLOB_VERSION};
use crate::member::MemberKind;

/// Errors produced by the codec.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    // -- Contract violations ------------------------------------------------
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
    #[error("member '{member}' of kind {kind:?} holds no serializable value")]
    UnsupportedMemberKind { member: String, kind: MemberKind },
    #[error("type '{type_name}' declares no member '{member}'")]
    UnknownMember {
        type_name: &'static str,
        member: String,
    },
    #[error("type '{type_name}' is not serializable under policy '{policy}'")]
    TypeNotAllowed {
        type_name: &'static str,
        policy: String,
    },

    // -- Data failures -------------------------------------------------------
    #[error("expected {expected}, found {found:?}")]
    UnexpectedEntry {
        expected: &'static str,
        found: EntryType,
    },
    #[error("malformed data: {0}")]
    InvalidData(String),
    #[error("nodes and arrays nested deeper than {limit} levels")]
    NestingTooDeep { limit: usize },
    #[error("value {value} does not fit in {target}")]
    OutOfRange { value: String, target: &'static str },
    #[error("unknown internal reference id {0}")]
    UnknownReference(u32),
    #[error("internal reference {id} does not point to a {expected}")]
    ReferenceTypeMismatch { id: u32, expected: &'static str },
    #[error("warning escalated to error: {0}")]
    Warning(String),

    // -- Blobs, policies and settings -----------------------------------------
    #[error("invalid blob magic: expected 0x{:08X}, got 0x{:08X}", BLOB_MAGIC, .0)]
    InvalidMagic(u32),
    #[error("blob from future version {0} (this build supports up to {BLOB_VERSION})")]
    FutureVersion(u32),
    #[error("blob header encoding failed: {0}")]
    HeaderEncode(String),
    #[error("blob header decoding failed: {0}")]
    HeaderDecode(String),
    #[error("no policy registered with id '{0}'")]
    UnknownPolicy(String),
    #[error("a policy with id '{0}' is already registered")]
    DuplicatePolicy(String),
    #[error("settings parse error: {0}")]
    Settings(String),

    // -- Wrapped --------------------------------------------------------------
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = CodecError::TypeNotAllowed {
            type_name: "Door",
            policy: "strict".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "type 'Door' is not serializable under policy 'strict'"
        );

        let err = CodecError::UnexpectedEntry {
            expected: "an integer",
            found: EntryType::String,
        };
        assert_eq!(err.to_string(), "expected an integer, found String");
    }

    #[test]
    fn magic_display_is_hex() {
        let err = CodecError::InvalidMagic(0xDEAD_BEEF);
        let msg = err.to_string();
        assert!(msg.contains("0xDEADBEEF"), "{msg}");
        assert!(msg.contains(&format!("0x{BLOB_MAGIC:08X}")), "{msg}");
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short");
        let err: CodecError = io.into();
        assert!(matches!(err, CodecError::Io(_)));
    }
}
