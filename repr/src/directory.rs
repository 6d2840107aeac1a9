//! Directory Table
//!
//! For each directory inode, the directory table stores a list of all entries stored inside, with
//! references back to the inodes that describe those entries. The entries of one directory are
//! grouped in runs, each introduced by a [`Header`] that names the inode metadata block shared by
//! the entries of the run.

use static_assertions::const_assert_eq;
use std::mem;
use zerocopy::byteorder::{I16, U16, U32};
use zerocopy::{AsBytes, FromBytes, Unaligned};

use crate::{inode, LE};

/// The most entries a single header may introduce
pub const MAX_ENTRIES_PER_HEADER: u32 = 256;

/// Directory names are at most 256 bytes long
pub const MAX_NAME_LEN: usize = 256;

#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct Header {
    /// One less than the number of entries following the header
    pub count: U32<LE>,
    /// The offset of the block in the Inode Table where the inodes are stored, relative to the
    /// start of the Inode Table
    pub start: U32<LE>,
    /// An arbitrary inode number.
    ///
    /// The entries that follow store their inode number as a difference to this.
    /// Typically the inode numbers are allocated in a continuous sequence for all children
    /// of a directory and the header simply stores the first one.
    pub inode_number: U32<LE>,
}

const_assert_eq!(mem::size_of::<Header>(), 12);

impl Header {
    /// Number of entries which follow this header
    pub fn entry_count(&self) -> u32 {
        self.count.get() + 1
    }
}

/// A directory entry
///
/// A directory entry is followed by a string of size `name_size + 1`
///
/// The basic and extended inode types both have a size field that stores the uncompressed size of
/// all the directory entries (including all headers) belonging to the inode.
/// This field is used to deduce if more data is following while iterating over directory entries,
/// even without knowing how many headers and partial lists there will be.
#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct Entry {
    /// An offset into the uncompressed inode metadata block
    pub offset: U16<LE>,
    /// The difference of this inode's number to the reference stored in the header
    pub inode_offset: I16<LE>,
    /// The inode kind
    ///
    /// **For extended inodes, the corresponding basic type is stored here instead**
    pub kind: U16<LE>,
    /// One less than the size of the entry name
    pub name_size: U16<LE>,
}

const_assert_eq!(mem::size_of::<Entry>(), 8);

impl Entry {
    pub fn kind(&self) -> inode::Kind {
        inode::Kind(self.kind.get())
    }

    pub fn name_len(&self) -> usize {
        usize::from(self.name_size.get()) + 1
    }

    /// The location of the entry's inode, given the header which introduced it
    pub fn inode_ref(&self, header: &Header) -> inode::Ref {
        inode::Ref::new(header.start.get(), self.offset.get())
    }
}
