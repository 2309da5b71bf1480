use crate::attr::AttrType;

/// Errors that can occur while encoding or decoding netlink messages.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The buffer ended before a complete header or payload.
    #[error("message truncated ({needed} bytes needed, {available} available)")]
    Truncated { needed: usize, available: usize },

    /// An attribute header declared an impossible length.
    #[error("invalid attribute framing at offset {offset}")]
    BadAttribute { offset: usize },

    /// An attribute payload is too short for its declared primitive type.
    #[error("attribute payload too short for {expected:?} ({len} bytes)")]
    BadLength { expected: AttrType, len: usize },

    /// A string attribute carried bytes that are not valid UTF-8.
    #[error("attribute string is not valid UTF-8")]
    BadString(#[from] std::str::Utf8Error),

    /// A type code with no primitive mapping.
    #[error("unsupported attribute type code {0}")]
    UnknownType(u16),
}

pub type Result<T> = std::result::Result<T, CodecError>;
