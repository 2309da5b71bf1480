use bytes::{BufMut, Bytes, BytesMut};

use crate::attr::{align, iter_attrs, ATTR_HDR_LEN, NESTED_FLAG};
use crate::error::{CodecError, Result};

/// Netlink header: length (4) + type (2) + flags (2) + sequence (4) + port (4).
pub const NL_HDR_LEN: usize = 16;

/// Generic-netlink header: command (1) + version (1) + reserved (2).
pub const GENL_HDR_LEN: usize = 4;

/// Netlink message flags.
pub mod flags {
    pub const REQUEST: u16 = 0x01;
    /// More messages follow in this reply.
    pub const MULTI: u16 = 0x02;
    pub const ACK: u16 = 0x04;
    /// Return the complete table instead of a single entry.
    pub const ROOT: u16 = 0x100;
    /// Return all matching entries.
    pub const MATCH: u16 = 0x200;
    pub const DUMP: u16 = ROOT | MATCH;
    /// The message carries schema rather than values.
    pub const CREATE: u16 = 0x400;

    // Reply-context overloads of the request bits above.
    /// Extended-ack TLVs follow the error payload.
    pub const ACK_TLVS: u16 = 0x200;
    /// The error payload echoes only the request header, not the whole request.
    pub const CAPPED: u16 = 0x100;
}

/// Control message types below the first protocol-defined type.
pub mod msg_type {
    pub const NOOP: u16 = 0x1;
    pub const ERROR: u16 = 0x2;
    /// Terminates a multi-part reply.
    pub const DONE: u16 = 0x3;
    /// First type available to protocol families.
    pub const MIN_TYPE: u16 = 0x10;
}

/// Extended-ack attribute tags inside an error reply.
pub mod ext_ack {
    /// Human-readable diagnostic string.
    pub const MSG: u16 = 1;
    /// Byte offset of the offending attribute in the request.
    pub const OFFS: u16 = 2;
}

/// Parsed netlink message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NlMsgHeader {
    pub len: u32,
    pub msg_type: u16,
    pub flags: u16,
    pub seq: u32,
    pub pid: u32,
}

impl NlMsgHeader {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < NL_HDR_LEN {
            return Err(CodecError::Truncated {
                needed: NL_HDR_LEN,
                available: buf.len(),
            });
        }
        Ok(Self {
            len: u32::from_ne_bytes(buf[0..4].try_into().unwrap()),
            msg_type: u16::from_ne_bytes(buf[4..6].try_into().unwrap()),
            flags: u16::from_ne_bytes(buf[6..8].try_into().unwrap()),
            seq: u32::from_ne_bytes(buf[8..12].try_into().unwrap()),
            pid: u32::from_ne_bytes(buf[12..16].try_into().unwrap()),
        })
    }

    pub fn has_flags(&self, mask: u16) -> bool {
        self.flags & mask == mask
    }
}

/// One message sliced out of a received datagram.
#[derive(Debug, Clone, Copy)]
pub struct NlMessage<'a> {
    pub header: NlMsgHeader,
    /// Bytes after the netlink header, `header.len - 16` of them.
    pub payload: &'a [u8],
}

impl<'a> NlMessage<'a> {
    /// The payload past the generic-netlink header, where attributes start.
    pub fn genl_payload(&self) -> Result<(GenlHeader, &'a [u8])> {
        let genl = GenlHeader::parse(self.payload)?;
        Ok((genl, &self.payload[GENL_HDR_LEN..]))
    }
}

/// Iterate the aligned messages packed into one received datagram.
pub fn split_messages(datagram: &[u8]) -> MessageIter<'_> {
    MessageIter { rest: datagram }
}

pub struct MessageIter<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for MessageIter<'a> {
    type Item = Result<NlMessage<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.len() < NL_HDR_LEN {
            return None;
        }
        let header = match NlMsgHeader::parse(self.rest) {
            Ok(header) => header,
            Err(err) => return Some(Err(err)),
        };
        let len = header.len as usize;
        if len < NL_HDR_LEN || len > self.rest.len() {
            let available = self.rest.len();
            self.rest = &[];
            return Some(Err(CodecError::Truncated {
                needed: len.max(NL_HDR_LEN),
                available,
            }));
        }
        let payload = &self.rest[NL_HDR_LEN..len];
        self.rest = &self.rest[align(len).min(self.rest.len())..];
        Some(Ok(NlMessage { header, payload }))
    }
}

/// Parsed generic-netlink header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenlHeader {
    pub cmd: u8,
    pub version: u8,
}

impl GenlHeader {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < GENL_HDR_LEN {
            return Err(CodecError::Truncated {
                needed: GENL_HDR_LEN,
                available: buf.len(),
            });
        }
        Ok(Self {
            cmd: buf[0],
            version: buf[1],
        })
    }
}

/// Kernel error reply, with the extended-ack diagnostic when present.
#[derive(Debug, Clone, Copy)]
pub struct ErrorReply<'a> {
    /// Negative errno, or zero for a plain acknowledgment.
    pub code: i32,
    pub ext_msg: Option<&'a str>,
}

impl<'a> ErrorReply<'a> {
    /// Parse the payload of a message whose type is [`msg_type::ERROR`].
    ///
    /// The payload carries the error code and an echo of the failed request;
    /// with [`flags::ACK_TLVS`] set, diagnostic attributes follow the echo
    /// (header-only when [`flags::CAPPED`] is set).
    pub fn parse(header: &NlMsgHeader, payload: &'a [u8]) -> Result<Self> {
        if payload.len() < 4 {
            return Err(CodecError::Truncated {
                needed: 4,
                available: payload.len(),
            });
        }
        let code = i32::from_ne_bytes(payload[0..4].try_into().unwrap());

        let mut ext_msg = None;
        if header.has_flags(flags::ACK_TLVS) {
            let echoed = NlMsgHeader::parse(&payload[4..])?;
            let echo_len = if header.has_flags(flags::CAPPED) {
                NL_HDR_LEN
            } else {
                align(echoed.len as usize).max(NL_HDR_LEN)
            };
            let tlv_start = (4 + echo_len).min(payload.len());
            for attr in iter_attrs(&payload[tlv_start..]) {
                let attr = attr?;
                if attr.atype() == ext_ack::MSG {
                    ext_msg = Some(attr.get_str()?);
                }
            }
        }

        Ok(Self { code, ext_msg })
    }
}

/// Handle returned by [`MessageBuilder::begin_nested`]; closing it patches
/// the container's length in place.
#[must_use = "an unclosed nested container leaves a zero length on the wire"]
#[derive(Debug)]
pub struct NestHandle {
    offset: usize,
}

/// Incrementally assembles one generic-netlink message.
///
/// Wire layout:
/// ```text
/// ┌────────────────┬──────────────┬──────────────────────────┐
/// │ netlink header │ genl header  │ attributes (4B aligned)  │
/// │ (16B)          │ (4B)         │                          │
/// └────────────────┴──────────────┴──────────────────────────┘
/// ```
#[derive(Debug)]
pub struct MessageBuilder {
    buf: BytesMut,
}

impl MessageBuilder {
    pub fn new(msg_type: u16, msg_flags: u16, seq: u32, pid: u32, cmd: u8, version: u8) -> Self {
        let mut buf = BytesMut::with_capacity(256);
        buf.put_u32_ne(0); // total length, patched in finish()
        buf.put_u16_ne(msg_type);
        buf.put_u16_ne(msg_flags);
        buf.put_u32_ne(seq);
        buf.put_u32_ne(pid);
        buf.put_u8(cmd);
        buf.put_u8(version);
        buf.put_u16_ne(0);
        Self { buf }
    }

    /// Whether any attribute has been appended yet.
    pub fn has_attrs(&self) -> bool {
        self.buf.len() > NL_HDR_LEN + GENL_HDR_LEN
    }

    pub fn put_u16(&mut self, tag: u16, value: u16) {
        self.put_raw(tag, &value.to_ne_bytes());
    }

    pub fn put_u32(&mut self, tag: u16, value: u32) {
        self.put_raw(tag, &value.to_ne_bytes());
    }

    pub fn put_u64(&mut self, tag: u16, value: u64) {
        self.put_raw(tag, &value.to_ne_bytes());
    }

    pub fn put_s16(&mut self, tag: u16, value: i16) {
        self.put_raw(tag, &value.to_ne_bytes());
    }

    pub fn put_s32(&mut self, tag: u16, value: i32) {
        self.put_raw(tag, &value.to_ne_bytes());
    }

    pub fn put_s64(&mut self, tag: u16, value: i64) {
        self.put_raw(tag, &value.to_ne_bytes());
    }

    /// Append a string attribute; the payload is zero-terminated on the wire.
    pub fn put_str(&mut self, tag: u16, value: &str) {
        let len = ATTR_HDR_LEN + value.len() + 1;
        self.buf.put_u16_ne(len as u16);
        self.buf.put_u16_ne(tag);
        self.buf.put_slice(value.as_bytes());
        self.buf.put_u8(0);
        self.pad(len);
    }

    /// Append a raw-payload attribute.
    pub fn put_raw(&mut self, tag: u16, payload: &[u8]) {
        let len = ATTR_HDR_LEN + payload.len();
        self.buf.put_u16_ne(len as u16);
        self.buf.put_u16_ne(tag);
        self.buf.put_slice(payload);
        self.pad(len);
    }

    /// Open a nested container; the handle records where the length lives.
    pub fn begin_nested(&mut self, tag: u16) -> NestHandle {
        let offset = self.buf.len();
        self.buf.put_u16_ne(0);
        self.buf.put_u16_ne(tag | NESTED_FLAG);
        NestHandle { offset }
    }

    /// Close a nested container, back-patching its length.
    pub fn end_nested(&mut self, handle: NestHandle) {
        let len = (self.buf.len() - handle.offset) as u16;
        self.buf[handle.offset..handle.offset + 2].copy_from_slice(&len.to_ne_bytes());
    }

    /// Patch the total length and return the finished wire bytes.
    pub fn finish(mut self) -> Bytes {
        let len = self.buf.len() as u32;
        self.buf[0..4].copy_from_slice(&len.to_ne_bytes());
        self.buf.freeze()
    }

    fn pad(&mut self, len: usize) {
        for _ in len..align(len) {
            self.buf.put_u8(0);
        }
    }
}
