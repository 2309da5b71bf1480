use std::io::{self, Read};

use tracing::warn;
use yamlink_codec::{
    flags, iter_attrs, msg_type, parse_attrs, split_messages, AttrType, ErrorReply, NlMessage,
    RawAttr,
};
use yamlink_schema::{record, KeyDescriptor, KeyFormat, NodeId, SchemaTree};
use yamlink_transport::{Transport, TransportError};

use crate::error::{Result, SessionError};

/// Parse policy for the fields of one schema key record, indexed by tag.
const RECORD_POLICY: [Option<AttrType>; 7] = [
    None,
    Some(AttrType::Nested), // LIST
    Some(AttrType::U16),    // LIST_SIZE
    Some(AttrType::U16),    // INDEX
    Some(AttrType::U16),    // NLA_TYPE
    Some(AttrType::Str),    // VALUE
    Some(AttrType::U16),    // KEY_FORMAT
];

/// Inbound transcoding session: consumes kernel messages and surfaces them
/// as YAML text through [`io::Read`].
///
/// The first messages of a session carry the key table, which is cached in a
/// schema tree; each later batch of values is joined against it to
/// materialize document lines. A document consumer (a YAML parser) simply
/// reads until end-of-stream.
pub struct NetlinkReader<T> {
    transport: T,
    tree: SchemaTree,
    cursor: Option<NodeId>,
    indent: usize,
    group_emitted: bool,
    complete: bool,
    failed: bool,
    errmsg: Option<String>,
    /// Rendered text the caller's buffer could not hold yet.
    carry: Vec<u8>,
}

impl<T: Transport> NetlinkReader<T> {
    /// Wire a reader session to `transport` and configure the socket.
    ///
    /// `stream` marks sessions fed by asynchronous event notifications,
    /// which arrive without the usual request/response pairing.
    pub fn attach(mut transport: T, stream: bool) -> Result<Self> {
        transport
            .set_broadcast_error(true)
            .map_err(|err| SessionError::Setup(format!("broadcast error reporting: {err}")))?;
        transport
            .set_ext_ack(true)
            .map_err(|err| SessionError::Setup(format!("extended ack reporting: {err}")))?;
        if stream {
            transport.disable_seq_check();
            transport.disable_auto_ack();
        }

        Ok(Self {
            transport,
            tree: SchemaTree::new(),
            cursor: None,
            indent: 0,
            group_emitted: false,
            complete: false,
            failed: false,
            errmsg: None,
            carry: Vec::new(),
        })
    }

    /// The session's cached error string, if it has failed.
    pub fn reader_error(&self) -> Option<&str> {
        self.errmsg.as_deref()
    }

    /// Whether the stream has terminated cleanly.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Pretty-print the cached reader error to `log`.
    pub fn log_error(&self, log: &mut impl io::Write, context: &str) -> io::Result<()> {
        match &self.errmsg {
            Some(msg) => writeln!(log, "Failed to {context}: reader error '{msg}'"),
            None => Ok(()),
        }
    }

    /// Borrow the underlying transport.
    pub fn get_ref(&self) -> &T {
        &self.transport
    }

    /// Mutably borrow the underlying transport, e.g. to send the request
    /// this session will read the reply of.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Consume the session and return the transport.
    pub fn into_inner(self) -> T {
        self.transport
    }

    fn fail(&mut self, msg: String) -> io::Error {
        self.failed = true;
        self.errmsg = Some(msg.clone());
        io::Error::other(msg)
    }

    /// Process one message; YAML text lands in `staged`. A fatal error tears
    /// the session down, a skippable one is logged and swallowed.
    fn dispatch(&mut self, message: &NlMessage<'_>, staged: &mut String) -> Result<()> {
        let header = message.header;

        match header.msg_type {
            msg_type::ERROR => {
                let reply = ErrorReply::parse(&header, message.payload)?;
                if reply.code == 0 {
                    self.finish_clean();
                    return Ok(());
                }
                return Err(SessionError::Kernel(Self::kernel_error(
                    reply.code,
                    reply.ext_msg,
                )));
            }
            msg_type::DONE => {
                let code = message
                    .payload
                    .get(..4)
                    .map(|b| i32::from_ne_bytes(b.try_into().unwrap()))
                    .unwrap_or(0);
                if code < 0 {
                    let mut ext = None;
                    if header.has_flags(flags::ACK_TLVS) && message.payload.len() > 4 {
                        for attr in iter_attrs(&message.payload[4..]) {
                            let attr = attr?;
                            if attr.atype() == yamlink_codec::ext_ack::MSG {
                                ext = attr.get_str().ok();
                            }
                        }
                    }
                    return Err(SessionError::Kernel(Self::kernel_error(code, ext)));
                }
                self.finish_clean();
                return Ok(());
            }
            _ => {}
        }

        let outcome = if header.has_flags(flags::CREATE) {
            self.intake_schema(message)
        } else {
            self.intake_values(message, staged)
        };
        if let Err(err) = outcome {
            // Unparseable payloads skip the message, not the session.
            warn!(msg_type = header.msg_type, %err, "skipping message");
        }

        if !header.has_flags(flags::MULTI) {
            self.finish_clean();
        }
        Ok(())
    }

    fn kernel_error(code: i32, ext_msg: Option<&str>) -> String {
        match ext_msg {
            Some(text) => text.to_string(),
            None => io::Error::from_raw_os_error(-code).to_string(),
        }
    }

    /// Terminal framing: tear the schema tree down and mark the session
    /// complete. Subsequent reads observe end-of-stream.
    fn finish_clean(&mut self) {
        self.tree.clear();
        self.cursor = None;
        self.complete = true;
    }

    fn intake_schema(&mut self, message: &NlMessage<'_>) -> Result<()> {
        if self.tree.is_sealed() {
            return Err(SessionError::Schema(yamlink_schema::SchemaError::Sealed));
        }
        let (_genl, attrs) = message.genl_payload()?;
        let slots = parse_attrs(attrs, &RECORD_POLICY)?;
        if let Some(list) = slots[record::LIST as usize] {
            self.parse_key_list(None, list)?;
            self.cursor = self.tree.root();
        }
        Ok(())
    }

    /// Build one level of the key table from a run of key records, recursing
    /// into nested levels. On error the partial tree stays rooted; teardown
    /// happens at session end.
    fn parse_key_list(&mut self, parent: Option<NodeId>, list: RawAttr<'_>) -> Result<()> {
        let mut node: Option<NodeId> = None;

        for rec in list.nested() {
            let rec = rec?;
            let fields = parse_attrs(rec.payload(), &RECORD_POLICY)?;

            if let Some(size) = fields[record::LIST_SIZE as usize] {
                if node.is_none() {
                    let max_index = size.get_u16()?.saturating_add(1);
                    node = Some(self.tree.insert_node(parent, max_index)?);
                }
            }

            let index = match fields[record::INDEX as usize] {
                Some(attr) => attr.get_u16()?,
                None => 0,
            };
            let Some(node) = node else {
                return Err(SessionError::Protocol(
                    "key record before the level's slot count".into(),
                ));
            };
            if index == 0 {
                return Err(SessionError::Protocol(
                    "key record without a mandatory index".into(),
                ));
            }

            let mut desc = KeyDescriptor::new(index);
            if let Some(fmt) = fields[record::KEY_FORMAT as usize] {
                desc.key_format = KeyFormat::from_bits_truncate(fmt.get_u16()?);
            }
            if let Some(code) = fields[record::NLA_TYPE as usize] {
                desc.data_type = AttrType::from_code(code.get_u16()?).ok();
            }
            if let Some(value) = fields[record::VALUE as usize] {
                desc.value = Some(value.get_str_owned()?);
            }
            self.tree.set_key(node, desc)?;

            if let Some(sub) = fields[record::LIST as usize] {
                self.parse_key_list(Some(node), sub)?;
            }
        }
        Ok(())
    }

    fn intake_values(&mut self, message: &NlMessage<'_>, staged: &mut String) -> Result<()> {
        let Some(cursor) = self.cursor else {
            return Err(SessionError::Protocol("value batch before any schema".into()));
        };
        let (_genl, attrs) = message.genl_payload()?;
        self.tree.seal();

        let policy = self.tree.node(cursor).value_policy();
        let slots = parse_attrs(attrs, &policy)?;
        if slots.iter().all(Option::is_none) {
            // An empty batch produces no output lines.
            return Ok(());
        }

        // Render the whole message before handing anything to the caller so
        // a failed batch leaves no partial lines behind.
        let mut out = String::new();
        self.emit_level(&mut out, cursor, (cursor, 1), &slots)?;
        staged.push_str(&out);
        Ok(())
    }

    /// Join one level of values against the schema and render document lines.
    ///
    /// `parent` addresses the key this level hangs off; its format governs
    /// the rendering of this level's entries.
    fn emit_level(
        &mut self,
        out: &mut String,
        node: NodeId,
        parent: (NodeId, u16),
        slots: &[Option<RawAttr<'_>>],
    ) -> Result<()> {
        let mut mapping = self
            .tree
            .node(parent.0)
            .key(parent.1)
            .map(|key| key.key_format)
            .unwrap_or_default();
        let max_index = self.tree.node(node).max_index();
        let mut child_ordinal = 0usize;

        for i in 1..max_index {
            let (data_type, key_format, value) = match self.tree.node(node).key(i) {
                Some(key) => (key.data_type, key.key_format, key.value.clone()),
                None => (None, KeyFormat::empty(), None),
            };
            let attr = slots.get(i as usize).copied().flatten();
            if attr.is_none() && value.is_none() {
                continue;
            }

            match data_type {
                Some(AttrType::Nested) => {
                    let next = self.tree.child_of(node, child_ordinal);
                    child_ordinal += 1;
                    let Some(attr) = attr else { continue };
                    let Some(next) = next else {
                        return Err(SessionError::Protocol(format!(
                            "nested key {i} has no child level"
                        )));
                    };
                    let name = value.unwrap_or_default();

                    if key_format.contains(KeyFormat::FLOW) {
                        for element in attr.nested() {
                            let element = element?;
                            let rendered =
                                self.render_flow_container(&name, next, key_format, element)?;
                            out.push_str(&" ".repeat(self.indent));
                            out.push_str(&rendered);
                            out.push('\n');
                        }
                    } else {
                        let mut extra = 0;
                        if key_format.contains(KeyFormat::MAPPING) {
                            extra += 2;
                        }
                        if key_format.contains(KeyFormat::SEQUENCE) {
                            extra += 2;
                        }
                        out.push_str(&" ".repeat(self.indent));
                        out.push_str(&name);
                        out.push_str(":\n");

                        self.indent += extra;
                        let policy = self.tree.node(next).value_policy();
                        for element in attr.nested() {
                            let element = element?;
                            let sub = parse_attrs(element.payload(), &policy)?;
                            self.emit_level(out, next, (node, i), &sub)?;
                        }
                        self.indent -= extra;
                    }
                }

                Some(AttrType::NulStr) => {
                    if i == 1 {
                        if Some(node) == self.tree.root() {
                            // The top-level label is the group name, emitted
                            // once per session rather than per batch.
                            if !self.group_emitted {
                                if let Some(name) = &value {
                                    if !name.is_empty() {
                                        out.push_str(name);
                                        out.push_str(":\n");
                                    }
                                }
                                self.group_emitted = true;
                            }
                            self.indent = 0;
                            if !mapping.contains(KeyFormat::FLOW)
                                && mapping.intersects(KeyFormat::SEQUENCE | KeyFormat::MAPPING)
                            {
                                self.indent += 2;
                            }
                        }
                        // A label carried in the batch renames the parent key.
                        if let Some(attr) = attr {
                            if self.tree.node(parent.0).key(parent.1).is_some_and(|k| k.value.is_some()) {
                                self.tree
                                    .replace_value(parent.0, parent.1, attr.get_str_owned()?);
                            }
                        }
                    }
                }

                _ => {
                    let Some(text) = Self::scalar_text(attr, data_type, &value, mapping)? else {
                        continue;
                    };
                    let pad = if self.indent == 0 { 2 } else { self.indent };
                    out.push_str(&" ".repeat(pad));
                    if mapping.contains(KeyFormat::SEQUENCE) {
                        let at = out.len() - 2;
                        out.replace_range(at..at + 1, "-");
                        if mapping.contains(KeyFormat::MAPPING) {
                            // Only the first line of a sequence element
                            // wears the dash.
                            mapping.remove(KeyFormat::SEQUENCE);
                        }
                    }
                    if mapping.contains(KeyFormat::MAPPING) {
                        if let Some(name) = &value {
                            out.push_str(name);
                            out.push_str(": ");
                        }
                    }
                    out.push_str(&text);
                    out.push('\n');
                }
            }
        }
        Ok(())
    }

    /// Render one element of a flow container: `name: { a, b }` or
    /// `name: [ a, b ]`, with entries joined by `, `.
    fn render_flow_container(
        &mut self,
        name: &str,
        level: NodeId,
        key_format: KeyFormat,
        element: RawAttr<'_>,
    ) -> Result<String> {
        let (open, close) = if key_format.contains(KeyFormat::SEQUENCE) {
            ('[', ']')
        } else {
            ('{', '}')
        };
        let policy = self.tree.node(level).value_policy();
        let slots = parse_attrs(element.payload(), &policy)?;
        let entries = self.flow_entries(level, key_format, &slots)?;

        Ok(if entries.is_empty() {
            format!("{name}: {open} {close}")
        } else {
            format!("{name}: {open} {} {close}", entries.join(", "))
        })
    }

    fn flow_entries(
        &mut self,
        node: NodeId,
        mapping: KeyFormat,
        slots: &[Option<RawAttr<'_>>],
    ) -> Result<Vec<String>> {
        let max_index = self.tree.node(node).max_index();
        let mut entries = Vec::new();
        let mut child_ordinal = 0usize;

        for i in 1..max_index {
            let (data_type, key_format, value) = match self.tree.node(node).key(i) {
                Some(key) => (key.data_type, key.key_format, key.value.clone()),
                None => (None, KeyFormat::empty(), None),
            };
            let attr = slots.get(i as usize).copied().flatten();
            if attr.is_none() && value.is_none() {
                continue;
            }

            match data_type {
                Some(AttrType::Nested) => {
                    let next = self.tree.child_of(node, child_ordinal);
                    child_ordinal += 1;
                    let Some(attr) = attr else { continue };
                    let Some(next) = next else {
                        return Err(SessionError::Protocol(format!(
                            "nested key {i} has no child level"
                        )));
                    };
                    let name = value.unwrap_or_default();
                    for element in attr.nested() {
                        let element = element?;
                        entries.push(self.render_flow_container(
                            &name,
                            next,
                            key_format,
                            element,
                        )?);
                    }
                }
                Some(AttrType::NulStr) => {}
                _ => {
                    let Some(text) = Self::scalar_text(attr, data_type, &value, mapping)? else {
                        continue;
                    };
                    match (&value, mapping.contains(KeyFormat::MAPPING)) {
                        (Some(name), true) => entries.push(format!("{name}: {text}")),
                        _ => entries.push(text),
                    }
                }
            }
        }
        Ok(entries)
    }

    /// Format a scalar slot, or report it as silently skipped.
    ///
    /// An absent attribute falls back to the descriptor's stored string,
    /// except when that string is already serving as the mapping key name.
    fn scalar_text(
        attr: Option<RawAttr<'_>>,
        data_type: Option<AttrType>,
        value: &Option<String>,
        mapping: KeyFormat,
    ) -> Result<Option<String>> {
        let Some(attr) = attr else {
            if mapping.contains(KeyFormat::MAPPING) {
                return Ok(None);
            }
            return Ok(value.clone());
        };
        let Some(data_type) = data_type else {
            return Ok(None);
        };
        let text = match data_type {
            AttrType::Str => attr.get_str()?.to_string(),
            AttrType::U16 => attr.get_u16()?.to_string(),
            AttrType::U32 => attr.get_u32()?.to_string(),
            AttrType::U64 => attr.get_u64()?.to_string(),
            AttrType::S16 => attr.get_s16()?.to_string(),
            AttrType::S32 => attr.get_s32()?.to_string(),
            AttrType::S64 => attr.get_s64()?.to_string(),
            AttrType::Nested | AttrType::NulStr => return Ok(None),
        };
        Ok(Some(text))
    }
}

impl<T: Transport> Read for NetlinkReader<T> {
    /// Block until at least one message produced document text, then hand as
    /// much of it over as fits; the rest is carried to the next call.
    ///
    /// A transport interruption surfaces as a benign zero-length read so
    /// callers can poll. After clean completion every read returns `Ok(0)`;
    /// after a failure every read returns the cached error.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.carry.is_empty() {
            let n = self.carry.len().min(buf.len());
            buf[..n].copy_from_slice(&self.carry[..n]);
            self.carry.drain(..n);
            return Ok(n);
        }
        if self.failed {
            let msg = self.errmsg.clone().unwrap_or_else(|| "reader failed".into());
            return Err(io::Error::other(msg));
        }
        if self.complete {
            return Ok(0);
        }

        let mut staged = String::new();
        loop {
            let datagram = match self.transport.recv() {
                Ok(datagram) => datagram,
                Err(TransportError::Interrupted) => {
                    if staged.is_empty() {
                        return Ok(0);
                    }
                    break;
                }
                Err(err) => return Err(self.fail(err.to_string())),
            };

            for message in split_messages(&datagram) {
                let message = match message {
                    Ok(message) => message,
                    Err(err) => {
                        warn!(%err, "skipping unparseable message");
                        continue;
                    }
                };
                if let Err(err) = self.dispatch(&message, &mut staged) {
                    return Err(self.fail(err.to_string()));
                }
            }

            if self.complete || !staged.is_empty() {
                break;
            }
        }

        let bytes = staged.into_bytes();
        let n = bytes.len().min(buf.len());
        buf[..n].copy_from_slice(&bytes[..n]);
        self.carry = bytes[n..].to_vec();
        Ok(n)
    }
}
