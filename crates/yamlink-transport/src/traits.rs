use crate::error::Result;

/// The narrow seam between a transcoding session and the kernel socket.
///
/// A session owns its transport exclusively; every method takes `&mut self`
/// and nothing here is expected to be thread-safe. Implementations block in
/// [`Transport::recv`] until a datagram arrives or a signal interrupts the
/// call, and are non-blocking everywhere else.
pub trait Transport {
    /// Receive one datagram, which may pack several netlink messages.
    ///
    /// Returns [`TransportError::Interrupted`] on signal delivery so callers
    /// can surface a benign zero-length read.
    ///
    /// [`TransportError::Interrupted`]: crate::TransportError::Interrupted
    fn recv(&mut self) -> Result<Vec<u8>>;

    /// Send one assembled message.
    fn send(&mut self, msg: &[u8]) -> Result<()>;

    /// Local port id, stamped into outgoing message headers.
    fn local_port(&self) -> u32;

    /// Sequence number for the next outgoing request.
    fn next_seq(&mut self) -> u32;

    /// Resolve a generic-netlink family name to its numeric id.
    fn resolve_family(&mut self, family: &str) -> Result<u16>;

    /// Resolve a multicast group within `family` and subscribe to it.
    fn join_group(&mut self, family: &str, group: &str) -> Result<()>;

    /// Report broadcast delivery failures instead of silently dropping them.
    fn set_broadcast_error(&mut self, enable: bool) -> Result<()>;

    /// Ask the kernel to attach extended-ack diagnostics to error replies.
    fn set_ext_ack(&mut self, enable: bool) -> Result<()>;

    /// Stop pairing replies with request sequence numbers. Required for
    /// asynchronous event streams, which arrive without a matching request.
    fn disable_seq_check(&mut self);

    /// Stop expecting acknowledgments for kernel-originated events.
    fn disable_auto_ack(&mut self);
}
