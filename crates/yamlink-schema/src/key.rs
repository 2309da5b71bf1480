use yamlink_codec::AttrType;

bitflags::bitflags! {
    /// How a container key renders in the document.
    ///
    /// FLOW and block indentation are mutually exclusive; SEQUENCE and
    /// MAPPING may co-occur (a sequence of mappings).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct KeyFormat: u16 {
        /// Explicit `{...}`/`[...]` indicators instead of indentation.
        const FLOW = 0x01;
        /// Entries introduced by `- `.
        const SEQUENCE = 0x02;
        /// Entries introduced by `key: `.
        const MAPPING = 0x04;
        /// Indentation decreased; closes the current container. Used only
        /// while shaping outbound text, never stored in a descriptor.
        const END = 0x08;
    }
}

/// Attribute tags of one key record inside a schema message.
pub mod record {
    /// Recursive schema for a nested level.
    pub const LIST: u16 = 1;
    /// Sibling slot count at this level; carried by the level's first record.
    pub const LIST_SIZE: u16 = 2;
    /// This key's 1-based slot index.
    pub const INDEX: u16 = 3;
    /// Primitive type code of values for this key.
    pub const NLA_TYPE: u16 = 4;
    /// Key name, or the default scalar for value-less slots.
    pub const VALUE: u16 = 5;
    /// FLOW/SEQUENCE/MAPPING bitset.
    pub const KEY_FORMAT: u16 = 6;
    /// Highest record tag, for policy sizing.
    pub const MAX: u16 = 6;
}

/// One key slot of a schema level. Immutable after construction, except the
/// stored string, which a label value may replace during the value phase.
#[derive(Debug, Clone)]
pub struct KeyDescriptor {
    /// 1-based position within the parent's key set.
    pub index: u16,
    /// Key name for mapping-rendered slots; default scalar otherwise.
    pub value: Option<String>,
    /// Governs how corresponding value attributes are interpreted.
    pub data_type: Option<AttrType>,
    /// Meaningful for container-typed and label keys.
    pub key_format: KeyFormat,
}

impl KeyDescriptor {
    pub fn new(index: u16) -> Self {
        Self {
            index,
            value: None,
            data_type: None,
            key_format: KeyFormat::empty(),
        }
    }
}
