//! Generic-netlink message framing and typed attribute codec.
//!
//! Attributes are length-prefixed and padded to 4-byte alignment; nested
//! containers carry further runs of attributes. The decode side borrows from
//! the received datagram, the encode side builds messages incrementally with
//! back-patched container lengths. All integers are native-endian, matching
//! the kernel's netlink byte order.

pub mod attr;
pub mod error;
pub mod message;

pub use attr::{align, iter_attrs, parse_attrs, AttrIter, AttrType, RawAttr, NESTED_FLAG};
pub use error::{CodecError, Result};
pub use message::{
    ext_ack, flags, msg_type, split_messages, ErrorReply, GenlHeader, MessageBuilder, NestHandle,
    NlMessage, NlMsgHeader, GENL_HDR_LEN, NL_HDR_LEN,
};
