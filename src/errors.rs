use snafu::{IntoError, Snafu};
use std::collections::TryReserveError;
use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::compression;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error from loading an archive or locating a fragment
#[derive(Debug, Snafu)]
pub struct Error(ErrorInner);

impl Error {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        self.0.kind()
    }

    /// The loading stage which failed, if the error happened while loading
    pub fn stage(&self) -> Option<Stage> {
        match self.0 {
            ErrorInner::Load { stage, .. } => Some(stage),
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The archive file could not be opened, mapped or read
    Io,
    /// The archive contents are malformed
    Corrupted,
    /// The archive uses a feature or algorithm which is not supported
    Unsupported,
    /// An index or location lies outside the table it refers to
    OutOfBounds,
    /// Memory for a table could not be reserved
    AllocationFailure,
}

/// The steps of loading an archive, in order
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Stage {
    Open,
    Superblock,
    Compressor,
    IdTable,
    DirectoryTree,
    FragmentTable,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Open => "opening archive",
            Stage::Superblock => "reading super block",
            Stage::Compressor => "creating compressor",
            Stage::IdTable => "loading ID table",
            Stage::DirectoryTree => "loading filesystem tree",
            Stage::FragmentTable => "loading fragment table",
        })
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[snafu(context(suffix(false)))]
pub(crate) enum ErrorInner {
    #[snafu(display("{}: {}", stage, source))]
    Load {
        stage: Stage,
        #[snafu(source(from(ErrorInner, Box::new)))]
        source: Box<ErrorInner>,
    },
    #[snafu(display("Unable to open {}: {}", path.display(), source))]
    UnableToOpen { path: PathBuf, source: io::Error },
    #[snafu(display("Unable to map {}: {}", path.display(), source))]
    UnableToMap { path: PathBuf, source: io::Error },
    #[snafu(display(
        "Magic mismatch: expected {:#x}, got {:#x}",
        repr::superblock::MAGIC,
        magic
    ))]
    BadMagic { magic: u32 },
    #[snafu(display(
        "Invalid archive version {}.{}: only version 4.0 is supported",
        major,
        minor
    ))]
    BadVersion { major: u16, minor: u16 },
    #[snafu(display(
        "Invalid block size {} (block log {}): must be a power of two between 4KiB and 1MiB",
        block_size,
        block_log
    ))]
    CorruptBlockSizes { block_log: u16, block_size: u32 },
    #[snafu(display(
        "Archive claims to use {} bytes, but only {} are present",
        bytes_used,
        file_size
    ))]
    Truncated { bytes_used: u64, file_size: u64 },
    #[snafu(display("Unknown compression type: {}", compression_id.0))]
    UnknownCompression {
        compression_id: repr::compression::Id,
    },
    #[snafu(display("Built without support for {}", compression_kind))]
    DisabledCompression {
        compression_kind: compression::Kind,
    },
    #[snafu(display("Unable to create {} decompressor: {}", compression_kind, source))]
    CreateCompressor {
        compression_kind: compression::Kind,
        source: io::Error,
    },
    #[snafu(display("Unsupported option: {}", err))]
    UnsupportedOption { err: String },
    #[snafu(display(
        "Truncated {} at offset {}: need {} bytes, {} available",
        what,
        offset,
        expected,
        actual
    ))]
    ShortStructure {
        what: &'static str,
        offset: u64,
        expected: usize,
        actual: usize,
    },
    #[snafu(display("Invalid metadata: {}", err))]
    InvalidMetadata { err: String },
    #[snafu(display("Metadata block at offset {} has invalid size {}", offset, actual))]
    BadMetablockSize { offset: u64, actual: usize },
    #[snafu(display(
        "Metadata block at offset {} holds {} bytes, expected {}",
        offset,
        actual,
        expected
    ))]
    UnexpectedMetablockSize {
        offset: u64,
        actual: usize,
        expected: usize,
    },
    #[snafu(display("Unable to decompress metadata block at offset {}: {}", offset, source))]
    Decompress { offset: u64, source: io::Error },
    #[snafu(display(
        "Metadata block at offset {} lies outside its table ({}..{})",
        offset,
        start,
        limit
    ))]
    MetadataOutOfBounds { offset: u64, start: u64, limit: u64 },
    #[snafu(display("Index {} is out of bounds for the {} table ({} entries)", index, table, count))]
    IndexOutOfBounds {
        table: &'static str,
        index: u64,
        count: u64,
    },
    #[snafu(display(
        "Fragment {} spans {} bytes from offset {}, past the end of the {} byte file",
        index,
        size,
        start,
        file_size
    ))]
    FragmentOutOfRange {
        index: u32,
        start: u64,
        size: u32,
        file_size: u64,
    },
    #[snafu(display("Directory inode {} contains itself", inode_number))]
    DirectoryLoop { inode_number: u32 },
    #[snafu(display("Directory inode {} is listed more than once", inode_number))]
    DirectoryReused { inode_number: u32 },
    #[snafu(display("Unable to allocate {} entries for the {} table: {}", count, what, source))]
    Allocation {
        what: &'static str,
        count: u64,
        source: TryReserveError,
    },
    #[snafu(display("IO error: {}", source))]
    Io { source: io::Error },
}

impl ErrorInner {
    pub(crate) fn kind(&self) -> ErrorKind {
        match self {
            ErrorInner::Load { source, .. } => source.kind(),
            ErrorInner::UnableToOpen { .. } | ErrorInner::UnableToMap { .. } | ErrorInner::Io { .. } => {
                ErrorKind::Io
            }
            ErrorInner::UnknownCompression { .. }
            | ErrorInner::DisabledCompression { .. }
            | ErrorInner::CreateCompressor { .. }
            | ErrorInner::UnsupportedOption { .. } => ErrorKind::Unsupported,
            ErrorInner::MetadataOutOfBounds { .. } | ErrorInner::IndexOutOfBounds { .. } => {
                ErrorKind::OutOfBounds
            }
            ErrorInner::Allocation { .. } => ErrorKind::AllocationFailure,
            ErrorInner::BadMagic { .. }
            | ErrorInner::BadVersion { .. }
            | ErrorInner::CorruptBlockSizes { .. }
            | ErrorInner::Truncated { .. }
            | ErrorInner::ShortStructure { .. }
            | ErrorInner::InvalidMetadata { .. }
            | ErrorInner::BadMetablockSize { .. }
            | ErrorInner::UnexpectedMetablockSize { .. }
            | ErrorInner::Decompress { .. }
            | ErrorInner::FragmentOutOfRange { .. }
            | ErrorInner::DirectoryLoop { .. }
            | ErrorInner::DirectoryReused { .. } => ErrorKind::Corrupted,
        }
    }
}

impl From<io::Error> for ErrorInner {
    fn from(e: io::Error) -> Self {
        Io.into_error(e)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error(e.into())
    }
}
