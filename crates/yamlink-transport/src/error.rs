/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The underlying socket handle is invalid or already closed.
    #[error("bad netlink socket")]
    BadSocket,

    /// A receive was interrupted by a signal; callers may retry or poll.
    #[error("receive interrupted")]
    Interrupted,

    /// An I/O error on the socket.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The named family is not registered with the kernel.
    #[error("failed to resolve family {family:?}: {source}")]
    ResolveFamily {
        family: String,
        source: std::io::Error,
    },

    /// The family exists but does not expose the named multicast group.
    #[error("family {family:?} has no multicast group {group:?}")]
    UnknownGroup { family: String, group: String },

    /// A resolution reply could not be decoded.
    #[error("malformed control reply: {0}")]
    ControlReply(#[from] yamlink_codec::CodecError),
}

pub type Result<T> = std::result::Result<T, TransportError>;
