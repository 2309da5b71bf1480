/// Errors raised while building a schema tree.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// A schema message arrived after the first value batch.
    #[error("schema is sealed; key tables cannot change after values arrive")]
    Sealed,

    /// Slot 0 is the sentinel and never holds a user key.
    #[error("key index 0 is reserved")]
    ReservedIndex,

    /// A record addressed a slot past the level's declared size.
    #[error("key index {index} out of range (max {max})")]
    IndexOutOfRange { index: u16, max: u16 },

    /// Two records addressed the same slot.
    #[error("key index {index} already populated")]
    DuplicateKey { index: u16 },
}

pub type Result<T> = std::result::Result<T, SchemaError>;
