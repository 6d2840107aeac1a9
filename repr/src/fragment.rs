//! Fragment Table
//!
//! Fragments are combined into fragment blocks of at most block_size bytes long. This table
//! describes the location and size of these fragment blocks, not the fragments within them.
//!
//! This table is stored in two levels: The fragment block entries are stored in metadata blocks,
//! and the file offsets to these metadata blocks are stored at the offset specified by the
//! `fragment_table_start` field of the superblock.
//!
//! Each metadata block can store 512 fragment block entries (16 bytes per fragment block entry),
//! so there will be `ceil(fragment_entry_count / 512.0)` metadata blocks (and the same number of
//! `u64` offsets stored at `fragment_table_start`)

use static_assertions::const_assert_eq;
use std::mem;
use zerocopy::byteorder::{U32, U64};
use zerocopy::{AsBytes, FromBytes, Unaligned};

use crate::{datablock, metablock, LE};

/// Fragment block entry
#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct Entry {
    /// The offset within the archive where the fragment block starts
    pub start: U64<LE>,
    /// The packed on-disk size of the fragment block, see [`datablock::Size`]
    pub size: U32<LE>,
    /// This field is unused
    pub _unused: U32<LE>,
}

const_assert_eq!(mem::size_of::<Entry>(), 16);

/// Number of entries held by one full metadata block
pub const ENTRIES_PER_BLOCK: usize = metablock::SIZE / mem::size_of::<Entry>();

const_assert_eq!(ENTRIES_PER_BLOCK, 512);

impl Entry {
    pub fn start(&self) -> u64 {
        self.start.get()
    }

    pub fn size(&self) -> datablock::Size {
        datablock::Size(self.size.get())
    }
}

/// Index of an entry in the fragment table
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Idx(pub u32);

impl Idx {
    /// Stored in file inodes which do not end in a fragment
    pub const NONE: Idx = Idx(0xFFFF_FFFF);
}
