use crate::error::{CodecError, Result};

/// Attribute payloads are padded to this boundary.
pub const ALIGNTO: usize = 4;

/// Attribute header: length (2) + type (2) = 4 bytes.
pub const ATTR_HDR_LEN: usize = 4;

/// Set on the type field when the payload is itself a run of attributes.
pub const NESTED_FLAG: u16 = 0x8000;

const TYPE_MASK: u16 = 0x3fff;

/// Round `len` up to the attribute alignment boundary.
pub const fn align(len: usize) -> usize {
    (len + ALIGNTO - 1) & !(ALIGNTO - 1)
}

/// Primitive attribute types, tagged with their wire codes.
///
/// Values are interpreted according to the type declared by the schema,
/// not by anything carried in the value attribute itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum AttrType {
    U16 = 2,
    U32 = 3,
    U64 = 4,
    /// Opaque string, not required to be zero-terminated in transit.
    Str = 5,
    /// A container of further attributes.
    Nested = 8,
    /// Zero-terminated string; semantically a label rather than data.
    NulStr = 10,
    S16 = 13,
    S32 = 14,
    S64 = 15,
}

impl AttrType {
    /// Map a wire code back to a primitive type.
    pub fn from_code(code: u16) -> Result<Self> {
        match code {
            2 => Ok(Self::U16),
            3 => Ok(Self::U32),
            4 => Ok(Self::U64),
            5 => Ok(Self::Str),
            8 => Ok(Self::Nested),
            10 => Ok(Self::NulStr),
            13 => Ok(Self::S16),
            14 => Ok(Self::S32),
            15 => Ok(Self::S64),
            other => Err(CodecError::UnknownType(other)),
        }
    }

    /// The wire code transmitted in schema messages.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Minimum payload length a value of this type needs.
    pub fn min_len(self) -> usize {
        match self {
            Self::U16 | Self::S16 => 2,
            Self::U32 | Self::S32 => 4,
            Self::U64 | Self::S64 => 8,
            Self::Str | Self::NulStr | Self::Nested => 0,
        }
    }
}

/// A framed attribute borrowed from a message payload.
#[derive(Debug, Clone, Copy)]
pub struct RawAttr<'a> {
    atype: u16,
    payload: &'a [u8],
}

impl<'a> RawAttr<'a> {
    /// The attribute type with framing flag bits masked off.
    pub fn atype(&self) -> u16 {
        self.atype & TYPE_MASK
    }

    /// The unpadded payload bytes.
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    pub fn get_u16(&self) -> Result<u16> {
        Ok(u16::from_ne_bytes(self.fixed::<2>(AttrType::U16)?))
    }

    pub fn get_u32(&self) -> Result<u32> {
        Ok(u32::from_ne_bytes(self.fixed::<4>(AttrType::U32)?))
    }

    pub fn get_u64(&self) -> Result<u64> {
        Ok(u64::from_ne_bytes(self.fixed::<8>(AttrType::U64)?))
    }

    pub fn get_s16(&self) -> Result<i16> {
        Ok(i16::from_ne_bytes(self.fixed::<2>(AttrType::S16)?))
    }

    pub fn get_s32(&self) -> Result<i32> {
        Ok(i32::from_ne_bytes(self.fixed::<4>(AttrType::S32)?))
    }

    /// Tolerates payloads at any byte alignment; some producers emit
    /// 64-bit values without padding the preceding attribute.
    pub fn get_s64(&self) -> Result<i64> {
        Ok(i64::from_ne_bytes(self.fixed::<8>(AttrType::S64)?))
    }

    /// Borrow the payload as a string, trimming trailing NUL bytes.
    pub fn get_str(&self) -> Result<&'a str> {
        let end = self
            .payload
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.payload.len());
        Ok(std::str::from_utf8(&self.payload[..end])?)
    }

    /// A freshly owned copy of the string payload.
    pub fn get_str_owned(&self) -> Result<String> {
        self.get_str().map(str::to_owned)
    }

    /// Iterate the attributes inside a nested container.
    pub fn nested(&self) -> AttrIter<'a> {
        iter_attrs(self.payload)
    }

    fn fixed<const N: usize>(&self, expected: AttrType) -> Result<[u8; N]> {
        let bytes = self.payload.get(..N).ok_or(CodecError::BadLength {
            expected,
            len: self.payload.len(),
        })?;
        // Length was just checked; a copy out of the slice also sidesteps
        // any alignment requirement on the source bytes.
        Ok(bytes.try_into().unwrap())
    }
}

/// Iterator over a run of framed attributes.
pub struct AttrIter<'a> {
    rest: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for AttrIter<'a> {
    type Item = Result<RawAttr<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.len() < ATTR_HDR_LEN {
            // Trailing padding shorter than a header terminates the run.
            return None;
        }

        let len = u16::from_ne_bytes(self.rest[0..2].try_into().unwrap()) as usize;
        let atype = u16::from_ne_bytes(self.rest[2..4].try_into().unwrap());

        if len < ATTR_HDR_LEN || len > self.rest.len() {
            let offset = self.offset;
            self.rest = &[];
            return Some(Err(CodecError::BadAttribute { offset }));
        }

        let payload = &self.rest[ATTR_HDR_LEN..len];
        let advance = align(len).min(self.rest.len());
        self.rest = &self.rest[advance..];
        self.offset += advance;

        Some(Ok(RawAttr { atype, payload }))
    }
}

/// Iterate the attributes in `payload`, starting at its first byte.
pub fn iter_attrs(payload: &[u8]) -> AttrIter<'_> {
    AttrIter {
        rest: payload,
        offset: 0,
    }
}

/// Scatter a run of attributes into per-index slots under a parse policy.
///
/// `policy[i]` declares the expected type of the attribute at index `i`.
/// Attributes with an out-of-range index, a `None` policy slot, or a payload
/// too short for the declared type are skipped rather than failing the whole
/// batch. The last occurrence wins when an index repeats.
pub fn parse_attrs<'a>(
    payload: &'a [u8],
    policy: &[Option<AttrType>],
) -> Result<Vec<Option<RawAttr<'a>>>> {
    let mut slots: Vec<Option<RawAttr<'a>>> = vec![None; policy.len()];

    for attr in iter_attrs(payload) {
        let attr = attr?;
        let index = attr.atype() as usize;
        let Some(expected) = policy.get(index).copied().flatten() else {
            continue;
        };
        if attr.payload().len() < expected.min_len() {
            continue;
        }
        slots[index] = Some(attr);
    }

    Ok(slots)
}
