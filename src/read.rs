use memmap2::Mmap;
use repr::superblock::{Flags, Superblock};
use repr::{fragment, uid_gid};
use slog::{Drain, Logger};
use snafu::{ensure, IntoError, OptionExt, ResultExt};
use std::fmt;
use std::fs::File;
use std::ops::{Deref, Range};
use std::path::Path;
use std::sync::Arc;

use crate::compression::{self, AnyCodec, CompressorConfig};
use crate::errors::*;
use crate::layout;
use crate::metadata::{MetadataReader, Table};
use crate::tree::{Node, TreeReader};

/// File data starts after the superblock and the `u32` size of the compressor options block
const DATA_START: u64 = repr::superblock::SIZE as u64 + 4;

/// A loaded archive
///
/// Everything except file contents is read and validated while loading, so queries never need to
/// decode metadata again. Clones share the same bytes.
pub struct Archive<D = Mmap> {
    pub(crate) inner: Arc<ArchiveInner<D>>,
}

pub(crate) struct ArchiveInner<D> {
    pub reader: D,
    pub superblock: Superblock,
    pub compressor: CompressorConfig,
    pub ids: Table<uid_gid::Id>,
    pub tree: Node,
    pub fragments: Table<fragment::Entry>,
    pub warnings: Vec<Warning>,
    pub logger: Logger,
}

/// A problem found while loading which did not prevent the archive from being used
#[derive(Debug)]
pub enum Warning {
    /// The compressor options block was unreadable or invalid, defaults are used instead
    CompressorOptions(Error),
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::CompressorOptions(err) => write!(f, "Ignored compressor options: {}", err),
        }
    }
}

fn default_logger() -> Logger {
    slog::Logger::root(slog_stdlog::StdLog.fuse(), slog::o!())
}

impl Archive<Mmap> {
    pub fn open<P: AsRef<Path>>(p: P) -> Result<Self> {
        Archive::open_with_logger(p, default_logger())
    }

    pub fn open_with_logger<P: AsRef<Path>>(p: P, logger: Logger) -> Result<Self> {
        Self::_open_with_logger(p.as_ref(), logger)
    }

    fn _open_with_logger(path: &Path, logger: Logger) -> Result<Self> {
        let path_str = path.display().to_string();
        let logger = logger.new(slog::o!("file" => path_str));
        let map = map_file(path).context(Load { stage: Stage::Open })?;
        Self::with_logger(map, logger)
    }
}

fn map_file(path: &Path) -> Result<Mmap, ErrorInner> {
    let file = File::open(path).context(UnableToOpen { path })?;
    // Safety: the map is read only. Archives are not expected to change while open; if one is
    // truncated underneath us, reads fault rather than return stale data.
    unsafe { Mmap::map(&file) }.context(UnableToMap { path })
}

impl<D: Deref<Target = [u8]>> Archive<D> {
    pub fn new(reader: D) -> Result<Self> {
        Self::with_logger(reader, default_logger())
    }

    pub fn with_logger(reader: D, logger: Logger) -> Result<Self> {
        let data: &[u8] = &reader;

        let (superblock, flags) =
            read_superblock(data).context(Load { stage: Stage::Superblock })?;
        log_superblock(&logger, &superblock);

        let (mut config, mut codec) =
            load_compressor(&superblock).context(Load { stage: Stage::Compressor })?;
        let mut warnings = Vec::new();
        if flags.contains(Flags::COMPRESSOR_OPTIONS) {
            if let Err(e) = config.read_options(data) {
                slog::warn!(logger, "Ignoring compressor options"; "error" => %e);
                let err = Load {
                    stage: Stage::Compressor,
                }
                .into_error(e);
                warnings.push(Warning::CompressorOptions(err.into()));
            }
        }
        slog::info!(logger, "Loaded compressor {:?}", config.options; "compression_kind" => %config.kind);

        let ids = load_ids(data, &superblock, &mut codec).context(Load {
            stage: Stage::IdTable,
        })?;

        let tree = TreeReader::new(data, &superblock, &ids, &mut codec, &logger)
            .read_root(superblock.root_inode_ref())
            .context(Load {
                stage: Stage::DirectoryTree,
            })?;

        let fragments = load_fragments(data, &superblock, flags, &mut codec).context(Load {
            stage: Stage::FragmentTable,
        })?;
        slog::debug!(logger, "Loaded tables"; "ids" => ids.len(), "fragments" => fragments.len());

        Ok(Self {
            inner: Arc::new(ArchiveInner {
                reader,
                superblock,
                compressor: config,
                ids,
                tree,
                fragments,
                warnings,
                logger,
            }),
        })
    }

    pub(crate) fn data(&self) -> &[u8] {
        &self.inner.reader
    }

    /// Length of the underlying file
    pub fn file_size(&self) -> u64 {
        self.data().len() as u64
    }
}

impl<D> Archive<D> {
    pub fn superblock(&self) -> &Superblock {
        &self.inner.superblock
    }

    pub fn compressor_config(&self) -> &CompressorConfig {
        &self.inner.compressor
    }

    pub fn ids(&self) -> &Table<uid_gid::Id> {
        &self.inner.ids
    }

    /// The root directory
    pub fn tree(&self) -> &Node {
        &self.inner.tree
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.inner.warnings
    }

    pub fn logger(&self) -> &Logger {
        &self.inner.logger
    }

    /// The byte range holding data and fragment blocks
    ///
    /// Fragment ranges are only checked against the file size; one reaching past this range is
    /// logged, not rejected. Callers that need the bound must check it themselves.
    pub fn data_region(&self) -> Range<u64> {
        DATA_START..self.inner.superblock.inode_table_start.get()
    }

    /// Release this handle. The bytes are unmapped once every clone has been closed or dropped.
    pub fn close(self) {
        slog::trace!(self.inner.logger, "Closing archive";
            "handles" => Arc::strong_count(&self.inner));
    }
}

impl<D> Clone for Archive<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D> fmt::Debug for Archive<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archive")
            .field("superblock", &self.inner.superblock)
            .field("compressor", &self.inner.compressor)
            .field("ids", &self.inner.ids)
            .field("fragments", &self.inner.fragments)
            .field("warnings", &self.inner.warnings)
            .finish()
    }
}

fn read_superblock(data: &[u8]) -> Result<(Superblock, Flags), ErrorInner> {
    let superblock: Superblock = layout::read_at(data, 0, "superblock")?;

    ensure!(
        superblock.magic.get() == repr::superblock::MAGIC,
        BadMagic {
            magic: superblock.magic.get()
        }
    );
    ensure!(
        superblock.version_major.get() == repr::superblock::VERSION_MAJOR
            && superblock.version_minor.get() == repr::superblock::VERSION_MINOR,
        BadVersion {
            major: superblock.version_major.get(),
            minor: superblock.version_minor.get(),
        }
    );
    let block_log = superblock.block_log.get();
    let block_size = superblock.block_size.get();
    ensure!(
        (repr::BLOCK_LOG_MIN..=repr::BLOCK_LOG_MAX).contains(&block_log)
            && block_size == 1 << block_log,
        CorruptBlockSizes {
            block_log,
            block_size,
        }
    );

    let compression_kind = compression::Kind::from_id(superblock.compression_id());
    ensure!(
        compression_kind != compression::Kind::Unknown,
        UnknownCompression {
            compression_id: superblock.compression_id(),
        }
    );
    let flags = superblock.flags().context(UnsupportedOption {
        err: format!("Unknown superblock flags in {:#x}", superblock.flags.get()),
    })?;
    ensure!(
        superblock.bytes_used.get() <= data.len() as u64,
        Truncated {
            bytes_used: superblock.bytes_used.get(),
            file_size: data.len() as u64,
        }
    );
    Ok((superblock, flags))
}

fn load_compressor(superblock: &Superblock) -> Result<(CompressorConfig, AnyCodec), ErrorInner> {
    let compression_kind = compression::Kind::from_id(superblock.compression_id());
    ensure!(
        compression_kind.supported(),
        DisabledCompression { compression_kind }
    );
    let codec = AnyCodec::new(compression_kind).context(CreateCompressor { compression_kind })?;
    Ok((
        CompressorConfig::new(compression_kind, superblock.block_size.get()),
        codec,
    ))
}

fn load_ids(
    data: &[u8],
    superblock: &Superblock,
    codec: &mut AnyCodec,
) -> Result<Table<uid_gid::Id>, ErrorInner> {
    let count = superblock.id_count.get();
    ensure!(
        count != 0,
        InvalidMetadata {
            err: "archive has no ids",
        }
    );
    MetadataReader::new(data, codec).read_table(
        "id",
        superblock.id_table_start.get(),
        u64::from(count),
    )
}

fn load_fragments(
    data: &[u8],
    superblock: &Superblock,
    flags: Flags,
    codec: &mut AnyCodec,
) -> Result<Table<fragment::Entry>, ErrorInner> {
    let start = superblock.fragment_table_start.get();
    let count = superblock.fragment_entry_count.get();
    if flags.contains(Flags::NO_FRAGMENTS) || start == repr::superblock::TABLE_ABSENT || count == 0
    {
        return Ok(Table::empty("fragment"));
    }
    MetadataReader::new(data, codec).read_table("fragment", start, u64::from(count))
}

fn log_superblock(logger: &Logger, superblock: &Superblock) {
    slog::debug!(logger, "Read superblock";
        "magic" => superblock.magic.get(),
        "inode_count" => superblock.inode_count.get(),
        "modification_time" => superblock.modification_time.get(),
        "block_size" => superblock.block_size.get(),
        "fragment_entry_count" => superblock.fragment_entry_count.get(),
        "compression_id" => superblock.compression_id.get(),
        "block_log" => superblock.block_log.get(),
        "flags" => superblock.flags.get(),
        "id_count" => superblock.id_count.get(),
        "version_major" => superblock.version_major.get(),
        "version_minor" => superblock.version_minor.get(),
        "root_inode_ref" => ?superblock.root_inode_ref(),
        "bytes_used" => superblock.bytes_used.get(),
        "id_table_start" => superblock.id_table_start.get(),
        "xattr_id_table_start" => superblock.xattr_id_table_start.get(),
        "inode_table_start" => superblock.inode_table_start.get(),
        "directory_table_start" => superblock.directory_table_start.get(),
        "fragment_table_start" => superblock.fragment_table_start.get(),
        "export_table_start" => superblock.export_table_start.get()
    )
}
