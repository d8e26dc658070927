use thiserror::Error;

/// Decoding failures shared by every container format.
///
/// [binrw::Error] values produced while parsing are classified into these
/// variants at the top level read functions, so callers never need to
/// inspect parser internals.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("data at {pos:#x} does not begin with a recognized magic value")]
    InvalidMagic { pos: u64 },

    #[error("input ended before a declared count could be satisfied")]
    TruncatedInput,

    #[error("unsupported vertex format tag {tag:#x}")]
    UnsupportedVertexFormat { tag: u8 },

    #[error("unknown material uniform type {tag:#x}")]
    UnknownUniformType { tag: u32 },

    #[error("offset {offset:#x} read at {pos:#x} lands outside its containing section")]
    MalformedOffset { pos: u64, offset: u64 },

    #[error("structural invariant violated: {reason}")]
    CorruptFile { reason: String },

    #[error("error reading data")]
    Io(#[from] std::io::Error),
}

impl From<binrw::Error> for DecodeError {
    fn from(error: binrw::Error) -> Self {
        match error {
            binrw::Error::BadMagic { pos, .. } => DecodeError::InvalidMagic { pos },
            binrw::Error::Io(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                DecodeError::TruncatedInput
            }
            binrw::Error::Io(err) => DecodeError::Io(err),
            binrw::Error::Custom { pos, err } => match err.downcast::<DecodeError>() {
                Ok(err) => *err,
                Err(_) => DecodeError::CorruptFile {
                    reason: format!("unreadable value at {pos:#x}"),
                },
            },
            binrw::Error::Backtrace(backtrace) => Self::from(*backtrace.error),
            err => DecodeError::CorruptFile {
                reason: err.to_string(),
            },
        }
    }
}
