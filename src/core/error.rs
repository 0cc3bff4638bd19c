use thiserror::Error;

/// Recoverable failures surfaced by the metadata layer.
///
/// Broken caller contracts (double put, underflow, illegal split) are not
/// represented here: they abort via `panic!` because continuing would corrupt
/// space accounting.
#[derive(Error, Debug)]
pub enum MetaError {
    #[error("Unsupported checksum algorithm: {0}")]
    UnsupportedChecksum(u8),

    #[error("Checksum mismatch in chunk {chunk} (blob offset {offset:#x}): observed {observed:#x}")]
    ChecksumMismatch {
        chunk: usize,
        offset: u64,
        observed: u64,
    },

    #[error("Unsupported encoding version: struct_v {struct_v}, compat_v {compat_v} (supported: {supported})")]
    UnsupportedVersion {
        struct_v: u8,
        compat_v: u8,
        supported: u8,
    },

    #[error("Unexpected end of buffer: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("Invalid device label preamble")]
    InvalidPreamble,

    #[error("Invalid encoded data: {0}")]
    InvalidData(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, MetaError>;
