/// Errors that can occur in a transcoding session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Wiring the session to its transport failed.
    #[error("netlink setup failed: {0}")]
    Setup(String),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] yamlink_transport::TransportError),

    /// A message could not be decoded.
    #[error("message framing error: {0}")]
    Codec(#[from] yamlink_codec::CodecError),

    /// A schema message violated the key-table rules.
    #[error("schema error: {0}")]
    Schema(#[from] yamlink_schema::SchemaError),

    /// A message was structurally valid netlink but not a valid transcoding
    /// payload (missing mandatory index, values before any schema, ...).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The kernel answered the session with an error.
    #[error("kernel reported: {0}")]
    Kernel(String),

    /// The outbound document names no multicast group.
    #[error("document contains no multicast group")]
    NoGroup,

    /// Quotation marks in the outbound document do not pair up.
    #[error("unbalanced quotation marks in document")]
    UnbalancedQuotes,

    /// The outbound document is not valid UTF-8 text.
    #[error("document is not valid UTF-8")]
    BadDocument(#[from] std::str::Utf8Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
