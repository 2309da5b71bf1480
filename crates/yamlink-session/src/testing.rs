//! Scripted transports and wire fixtures shared by the session tests.

use std::collections::VecDeque;
use std::io;

use yamlink_codec::{flags, msg_type, MessageBuilder, NL_HDR_LEN};
use yamlink_schema::{record, KeyFormat};
use yamlink_transport::{Transport, TransportError};

#[derive(Debug)]
pub(crate) enum Event {
    Data(Vec<u8>),
    Interrupt,
    Error,
}

/// A transport driven entirely by a scripted event queue.
#[derive(Debug)]
pub(crate) struct MockTransport {
    queue: VecDeque<Event>,
    pub sent: Vec<Vec<u8>>,
    pub joined: Vec<(String, String)>,
    pub broadcast_error: bool,
    pub ext_ack: bool,
    pub seq_check: bool,
    pub auto_ack: bool,
    pub accept_groups: bool,
    pub fail_resolve: bool,
    seq: u32,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            sent: Vec::new(),
            joined: Vec::new(),
            broadcast_error: false,
            ext_ack: false,
            seq_check: true,
            auto_ack: true,
            accept_groups: true,
            fail_resolve: false,
            seq: 0,
        }
    }
}

impl MockTransport {
    pub fn push(&mut self, datagram: Vec<u8>) {
        self.queue.push_back(Event::Data(datagram));
    }

    pub fn push_interrupt(&mut self) {
        self.queue.push_back(Event::Interrupt);
    }

    pub fn push_error(&mut self) {
        self.queue.push_back(Event::Error);
    }
}

impl Transport for MockTransport {
    fn recv(&mut self) -> yamlink_transport::Result<Vec<u8>> {
        match self.queue.pop_front() {
            Some(Event::Data(datagram)) => Ok(datagram),
            Some(Event::Interrupt) => Err(TransportError::Interrupted),
            Some(Event::Error) => Err(TransportError::Io(io::Error::other("scripted failure"))),
            None => Err(TransportError::Io(io::Error::other("mock transport drained"))),
        }
    }

    fn send(&mut self, msg: &[u8]) -> yamlink_transport::Result<()> {
        self.sent.push(msg.to_vec());
        Ok(())
    }

    fn local_port(&self) -> u32 {
        99
    }

    fn next_seq(&mut self) -> u32 {
        self.seq += 1;
        self.seq
    }

    fn resolve_family(&mut self, family: &str) -> yamlink_transport::Result<u16> {
        if self.fail_resolve {
            return Err(TransportError::ResolveFamily {
                family: family.to_string(),
                source: io::Error::from_raw_os_error(2),
            });
        }
        Ok(0x21)
    }

    fn join_group(&mut self, family: &str, group: &str) -> yamlink_transport::Result<()> {
        if !self.accept_groups {
            return Err(TransportError::UnknownGroup {
                family: family.to_string(),
                group: group.to_string(),
            });
        }
        self.joined.push((family.to_string(), group.to_string()));
        Ok(())
    }

    fn set_broadcast_error(&mut self, enable: bool) -> yamlink_transport::Result<()> {
        self.broadcast_error = enable;
        Ok(())
    }

    fn set_ext_ack(&mut self, enable: bool) -> yamlink_transport::Result<()> {
        self.ext_ack = enable;
        Ok(())
    }

    fn disable_seq_check(&mut self) {
        self.seq_check = false;
    }

    fn disable_auto_ack(&mut self) {
        self.auto_ack = false;
    }
}

/// A multi-part terminator message carrying `code` as its status.
pub(crate) fn done_message(code: i32) -> Vec<u8> {
    let mut out = Vec::with_capacity(NL_HDR_LEN + 4);
    out.extend_from_slice(&((NL_HDR_LEN + 4) as u32).to_ne_bytes());
    out.extend_from_slice(&msg_type::DONE.to_ne_bytes());
    out.extend_from_slice(&flags::MULTI.to_ne_bytes());
    out.extend_from_slice(&3u32.to_ne_bytes()); // seq
    out.extend_from_slice(&0u32.to_ne_bytes()); // pid
    out.extend_from_slice(&code.to_ne_bytes());
    out
}

/// A kernel error reply, optionally with extended-ack diagnostic text.
pub(crate) fn error_message(code: i32, ext: Option<&str>) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&code.to_ne_bytes());

    // echo of the failed request, header only
    payload.extend_from_slice(&(NL_HDR_LEN as u32).to_ne_bytes());
    payload.extend_from_slice(&0x21u16.to_ne_bytes());
    payload.extend_from_slice(&flags::REQUEST.to_ne_bytes());
    payload.extend_from_slice(&2u32.to_ne_bytes());
    payload.extend_from_slice(&99u32.to_ne_bytes());

    let mut msg_flags = 0u16;
    if let Some(text) = ext {
        msg_flags |= flags::ACK_TLVS | flags::CAPPED;
        let len = (4 + text.len() + 1) as u16;
        payload.extend_from_slice(&len.to_ne_bytes());
        payload.extend_from_slice(&yamlink_codec::ext_ack::MSG.to_ne_bytes());
        payload.extend_from_slice(text.as_bytes());
        payload.push(0);
        while payload.len() % 4 != 0 {
            payload.push(0);
        }
    }

    let mut out = Vec::with_capacity(NL_HDR_LEN + payload.len());
    out.extend_from_slice(&((NL_HDR_LEN + payload.len()) as u32).to_ne_bytes());
    out.extend_from_slice(&msg_type::ERROR.to_ne_bytes());
    out.extend_from_slice(&msg_flags.to_ne_bytes());
    out.extend_from_slice(&2u32.to_ne_bytes());
    out.extend_from_slice(&99u32.to_ne_bytes());
    out.extend_from_slice(&payload);
    out
}

/// Declarative schema key record for building schema messages in tests.
pub(crate) struct Rec {
    index: u16,
    list_size: Option<u16>,
    nla_type: Option<yamlink_codec::AttrType>,
    value: Option<String>,
    key_format: KeyFormat,
    list: Option<Vec<Rec>>,
}

impl Rec {
    pub fn new(index: u16) -> Self {
        Self {
            index,
            list_size: None,
            nla_type: None,
            value: None,
            key_format: KeyFormat::empty(),
            list: None,
        }
    }

    pub fn list_size(mut self, size: u16) -> Self {
        self.list_size = Some(size);
        self
    }

    pub fn nla_type(mut self, nla_type: yamlink_codec::AttrType) -> Self {
        self.nla_type = Some(nla_type);
        self
    }

    pub fn value(mut self, value: &str) -> Self {
        self.value = Some(value.to_string());
        self
    }

    pub fn key_format(mut self, key_format: KeyFormat) -> Self {
        self.key_format = key_format;
        self
    }

    pub fn list(mut self, children: Vec<Rec>) -> Self {
        self.list = Some(children);
        self
    }

    pub fn put(&self, msg: &mut MessageBuilder) {
        let rec = msg.begin_nested(0);
        if let Some(size) = self.list_size {
            msg.put_u16(record::LIST_SIZE, size);
        }
        msg.put_u16(record::INDEX, self.index);
        if let Some(nla_type) = self.nla_type {
            msg.put_u16(record::NLA_TYPE, nla_type.code());
        }
        if let Some(value) = &self.value {
            msg.put_str(record::VALUE, value);
        }
        if !self.key_format.is_empty() {
            msg.put_u16(record::KEY_FORMAT, self.key_format.bits());
        }
        if let Some(children) = &self.list {
            let list = msg.begin_nested(record::LIST);
            for child in children {
                child.put(msg);
            }
            msg.end_nested(list);
        }
        msg.end_nested(rec);
    }
}
