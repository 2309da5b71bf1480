//! Bidirectional bridge between YAML documents and generic-netlink messages.
//!
//! Inbound, the kernel emits a self-describing key table followed by value
//! batches; [`NetlinkReader`] joins the two and surfaces the result as YAML
//! text through [`std::io::Read`]. Outbound, [`NetlinkWriter`] consumes a
//! YAML document through [`std::io::Write`], infers its structure from
//! indentation and bracket tokens, and repackages each scalar as a typed
//! attribute addressed to a named family and multicast group.
//!
//! A session is owned by exactly one thread from creation to teardown; the
//! document engine drives scheduling by calling the read or write side, and
//! the session drives the transport synchronously underneath it.

pub mod error;
pub mod reader;
pub mod writer;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Result, SessionError};
pub use reader::NetlinkReader;
pub use writer::NetlinkWriter;
