//! Error types for loading class files and resolving their contents.
use thiserror::Error;

/// `FormatError` is raised while loading when the input is not a
/// structurally well formed class file.
#[derive(Debug, Error)]
pub enum FormatError {
    /// The first four bytes are not `0xCAFEBABE`.
    #[error("invalid magic number 0x{0:08X}")]
    InvalidMagic(u32),

    /// The input ended before `context` could be read.
    #[error("unexpected end of input while reading {context}")]
    UnexpectedEof { context: &'static str },

    /// A declared count can't possibly fit in what is left of the input.
    #[error("{what} count {count} exceeds remaining input ({remaining} bytes)")]
    CountExceedsInput {
        what: &'static str,
        count: usize,
        remaining: usize,
    },

    #[error("unknown constant pool tag {tag} at index {index}")]
    UnknownTag { tag: u8, index: u16 },

    #[error("invalid UTF-8 in constant pool entry {index}")]
    InvalidUtf8 { index: u16 },

    #[error("unsupported opcode 0x{opcode:02x} at offset {offset}")]
    UnsupportedOpcode { opcode: u8, offset: usize },

    /// An opcode's operands run past the end of the bytecode.
    #[error("truncated operands for opcode 0x{opcode:02x} at offset {offset}")]
    TruncatedOperands { opcode: u8, offset: usize },

    #[error("invalid method descriptor \"{0}\"")]
    InvalidDescriptor(String),

    #[error("{0} unexpected trailing bytes after class attributes")]
    TrailingBytes(usize),

    #[error("read error: {0}")]
    Io(#[source] std::io::Error),
}

/// `IndexError` is raised when a constant pool index doesn't address an
/// entry.
#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("constant pool index 0 is reserved")]
    Reserved,

    #[error("constant pool index {0} is out of range")]
    OutOfRange(u16),

    /// The slot following a Long or Double entry.
    #[error("constant pool index {0} is the unusable half of a wide entry")]
    Placeholder(u16),
}

/// `NotFoundError` is raised when a lookup by name comes up empty.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotFoundError {
    #[error("main method not found")]
    Main,

    #[error("method \"{method}\" has no Code attribute")]
    Code { method: String },
}

/// Crate level error returned by the loading and execution entry points.
/// Faults raised while interpreting are not errors, they end up in the
/// run's `Outcome`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("format error: {0}")]
    Format(#[from] FormatError),

    #[error("not found: {0}")]
    NotFound(#[from] NotFoundError),
}

pub type Result<T> = std::result::Result<T, Error>;
