//! Compression Options
//!
//! If non-default compression options have been used, then these are stored here, directly after
//! the superblock, as an uncompressed metadata block holding exactly one of these structures.

use bitflags::bitflags;
use zerocopy::byteorder::{I32, U16, U32};
use zerocopy::{AsBytes, FromBytes, Unaligned};

use crate::LE;

/// Compression options for the gzip compressor
#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct Gzip {
    /// Should be in range 1…9 (inclusive). Defaults to 9.
    pub compression_level: U32<LE>,
    /// Should be in range 8…15 (inclusive) Defaults to 15.
    pub window_size: U16<LE>,
    /// A bitfield describing the enabled strategies.
    ///
    /// See `GzipStrategies`.
    /// If no flags are set, the default strategy is implicitly used.
    pub strategies: U16<LE>,
}

bitflags! {
    /// A bitfield describing the enabled strategies.
    ///
    /// If no flags are set, the default strategy is implicitly used.
    #[derive(Default)]
    pub struct GzipStrategies: u16 {
        const DEFAULT = 0x01;
        const FILTERED = 0x02;
        const HUFFMAN_ONLY = 0x04;
        const RUN_LENGTH_ENCODED = 0x08;
        const FIXED = 0x10;
    }
}

/// Compression options for the xz compressor
#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct Xz {
    /// Should be > 8KiB, and must be either the sum of a power of two,
    /// or the sum of two sequential powers of two (2^n or 2^n + 2^(n+1))
    pub dictionary_size: U32<LE>,
    /// A bitfield describing the additional enabled filters attempted to
    /// better compress executable code. See `XzFilters`.
    pub executable_filters: U32<LE>,
}

bitflags! {
    /// A bitfield describing the additional enabled filters attempted to
    /// better compress executable code.
    #[derive(Default)]
    pub struct XzFilters: u32 {
        const X86 = 0x01;
        const POWERPC = 0x02;
        const IA64 = 0x04;
        const ARM = 0x08;
        const ARM_THUMB = 0x10;
        const SPARC = 0x20;
    }
}

/// Compression options for the lz4 compressor
#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct Lz4 {
    /// The only supported value is 1 (`LZ4_LEGACY`)
    pub version: I32<LE>,
    /// A bitfield describing the enabled LZ4 flags, see `Lz4Flags`
    pub flags: U32<LE>,
}

/// The only lz4 stream version squashfs writes
pub const LZ4_LEGACY: i32 = 1;

bitflags! {
    #[derive(Default)]
    pub struct Lz4Flags: u32 {
        /// Use LZ4 High Compression(HC) mode
        const HIGH_COMPRESSION = 0x01;
    }
}

/// Compression options for the zstd compressor
#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct Zstd {
    /// Should be in range 1..22 (inclusive).
    /// The real maximum is the zstd defined `ZSTD_maxCLevel()`
    pub compression_level: U32<LE>,
}

/// Compression options for the lzo compressor
#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct Lzo {
    /// Which variant of LZO to use, see `LzoAlgorithm`
    pub algorithm: U32<LE>,
    /// Compression level
    ///
    /// For lzo1x_999, this can be a value between 0 and 9 (defaults to 8).
    /// Has to be 0 for all other algorithms.
    pub level: U32<LE>,
}

/// Which variant of LZO to use
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LzoAlgorithm(pub u32);

impl LzoAlgorithm {
    pub const X_1: LzoAlgorithm = LzoAlgorithm(0);
    pub const X_1_11: LzoAlgorithm = LzoAlgorithm(1);
    pub const X_1_12: LzoAlgorithm = LzoAlgorithm(2);
    pub const X_1_15: LzoAlgorithm = LzoAlgorithm(3);
    pub const X_999: LzoAlgorithm = LzoAlgorithm(4);
}

impl Default for LzoAlgorithm {
    fn default() -> Self {
        LzoAlgorithm::X_999
    }
}
