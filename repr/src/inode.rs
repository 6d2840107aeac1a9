//! Inode Table
//!
//! Metadata (ownership, permissions, etc) for items in the archive. Every inode starts with a
//! [`Header`], followed by a structure selected by the header's [`Kind`].

use static_assertions::const_assert_eq;
use std::mem;
use zerocopy::byteorder::{U16, U32, U64};
use zerocopy::{AsBytes, FromBytes, Unaligned};

use crate::{uid_gid, LE};

/// Inodes are located like any other metadata: by a block offset relative to the inode table,
/// and an offset inside the uncompressed block
pub use crate::metablock::Ref;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Idx(pub u32);

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Kind(pub u16);

impl Kind {
    /// Following the header is a [`BasicDir`](struct.BasicDir.html) structure
    pub const BASIC_DIR: Kind = Kind(1);
    /// Following the header is a [`BasicFile`](struct.BasicFile.html) structure
    pub const BASIC_FILE: Kind = Kind(2);
    /// Following the header is a [`Symlink`](struct.Symlink.html) structure
    pub const BASIC_SYMLINK: Kind = Kind(3);
    /// Following the header is a [`BasicDevice`](struct.BasicDevice.html) structure
    pub const BASIC_BLOCK_DEV: Kind = Kind(4);
    /// Following the header is a [`BasicDevice`](struct.BasicDevice.html) structure
    pub const BASIC_CHAR_DEV: Kind = Kind(5);
    /// Following the header is a [`BasicIpc`](struct.BasicIpc.html) structure
    pub const BASIC_FIFO: Kind = Kind(6);
    /// Following the header is a [`BasicIpc`](struct.BasicIpc.html) structure
    pub const BASIC_SOCKET: Kind = Kind(7);

    /// Following the header is a [`ExtendedDir`](struct.ExtendedDir.html) structure
    pub const EXT_DIR: Kind = Kind(8);
    /// Following the header is a [`ExtendedFile`](struct.ExtendedFile.html) structure
    pub const EXT_FILE: Kind = Kind(9);
    /// Following the header is a [`Symlink`](struct.Symlink.html) structure
    pub const EXT_SYMLINK: Kind = Kind(10);
    /// Following the header is a [`ExtendedDevice`](struct.ExtendedDevice.html) structure
    pub const EXT_BLOCK_DEV: Kind = Kind(11);
    /// Following the header is a [`ExtendedDevice`](struct.ExtendedDevice.html) structure
    pub const EXT_CHAR_DEV: Kind = Kind(12);
    /// Following the header is a [`ExtendedIpc`](struct.ExtendedIpc.html) structure
    pub const EXT_FIFO: Kind = Kind(13);
    /// Following the header is a [`ExtendedIpc`](struct.ExtendedIpc.html) structure
    pub const EXT_SOCKET: Kind = Kind(14);

    pub const MAX: Kind = Kind::EXT_SOCKET;

    /// The basic kind matching an extended kind. Basic (and unknown) kinds map to themselves.
    pub fn basic(self) -> Kind {
        if self >= Kind::EXT_DIR && self <= Kind::MAX {
            Kind(self.0 - 7)
        } else {
            self
        }
    }

    pub fn is_extended(self) -> bool {
        self >= Kind::EXT_DIR && self <= Kind::MAX
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct Header {
    /// The type of item described by the inode which follows this header
    pub inode_type: U16<LE>,
    /// A bitmask representing the permissions for the item described by the inode.
    /// The values match with the permission values of mode_t (the mode bits, not the file type)
    pub permissions: U16<LE>,
    /// The index of the user id in the UID/GID Table
    pub uid_idx: U16<LE>,
    /// The index of the group id in the UID/GID Table
    pub gid_idx: U16<LE>,
    /// The unsigned number of seconds (not counting leap seconds) since 00:00, Jan 1 1970 UTC
    /// when the item described by the inode was last modified
    pub modified_time: U32<LE>,
    /// The position of this inode in the full list of inodes.
    /// Value should be in the range `[1, inode_count]` (inclusive)
    pub inode_number: U32<LE>,
}

const_assert_eq!(mem::size_of::<Header>(), 16);

impl Header {
    pub fn kind(&self) -> Kind {
        Kind(self.inode_type.get())
    }

    pub fn uid_idx(&self) -> uid_gid::Idx {
        uid_gid::Idx(self.uid_idx.get())
    }

    pub fn gid_idx(&self) -> uid_gid::Idx {
        uid_gid::Idx(self.gid_idx.get())
    }

    pub fn inode_number(&self) -> Idx {
        Idx(self.inode_number.get())
    }
}

/// A basic directory inode structure
#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct BasicDir {
    /// The offset of the block in the Directory Table where the directory entry information starts
    pub block_idx: U32<LE>,
    /// The number of hard links to this directory
    pub hard_link_count: U32<LE>,
    /// Total (uncompressed) size in bytes of the entries in the Directory Table, including headers.
    /// Three larger than the real size, accounting for the implicit `.` and `..` entries
    pub file_size: U16<LE>,
    /// The (uncompressed) offset within the block in the Directory Table where the directory entry
    /// information starts
    pub block_offset: U16<LE>,
    /// The inode_number of the parent of this directory. If this is the root directory, this
    /// will be one larger than the inode count
    pub parent_inode_number: U32<LE>,
}

const_assert_eq!(mem::size_of::<BasicDir>(), 16);

/// A full extended directory inode structure
///
/// This inode is followed by `index_count` directory index entries for faster
/// lookup in the directory table
#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct ExtendedDir {
    /// The number of hard links to this directory
    pub hard_link_count: U32<LE>,
    /// Total (uncompressed) size in bytes of the entries in the Directory Table, including headers
    pub file_size: U32<LE>,
    /// The offset of the block in the Directory Table where the directory entry information starts
    pub block_idx: U32<LE>,
    /// The inode_number of the parent of this directory
    pub parent_inode_number: U32<LE>,
    /// The number of directory index entries following the inode structure
    pub index_count: U16<LE>,
    /// The (uncompressed) offset within the block in the Directory Table where the directory entry
    /// information starts
    pub block_offset: U16<LE>,
    /// An index into the xattr lookup table. Set to 0xFFFFFFFF if the inode has no extended attributes
    pub xattr_idx: U32<LE>,
}

const_assert_eq!(mem::size_of::<ExtendedDir>(), 24);

/// A basic file inode structure
///
/// This inode is followed by a list of `u32` block sizes.
/// If this file ends in a fragment, the size of this list is the number of full data blocks
/// needed to store file_size bytes. If this file does not have a fragment, the size of the list is
/// the number of blocks needed to store file_size bytes, rounded up. Each item in the list
/// describes the (possibly compressed) size of a block.
#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct BasicFile {
    /// The offset from the start of the archive where the data blocks are stored
    pub blocks_start: U32<LE>,
    /// The index of a fragment entry in the fragment table which describes the data block the
    /// fragment of this file is stored in.
    ///
    /// If this file does not end with a fragment, this should be 0xFFFFFFFF
    pub fragment_block_index: U32<LE>,
    /// The (uncompressed) offset within the fragment data block where the fragment for this file.
    ///
    /// If this file does not end with a fragment, the value of this field is undefined
    pub block_offset: U32<LE>,
    /// The (uncompressed) size of this file
    pub file_size: U32<LE>,
}

const_assert_eq!(mem::size_of::<BasicFile>(), 16);

/// A full extended file inode structure
///
/// Followed by a list of `u32` block sizes, like [`BasicFile`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct ExtendedFile {
    /// The offset from the start of the archive where the data blocks are stored
    pub blocks_start: U64<LE>,
    /// The (uncompressed) size of this file
    pub file_size: U64<LE>,
    /// The number of bytes saved by omitting blocks of zero bytes.
    /// Used in the kernel for sparse file accounting
    pub sparse: U64<LE>,
    /// The number of hard links to this node
    pub hard_link_count: U32<LE>,
    /// The index of a fragment entry in the fragment table, or 0xFFFFFFFF
    pub fragment_block_index: U32<LE>,
    /// The (uncompressed) offset within the fragment data block where the fragment for this file.
    pub block_offset: U32<LE>,
    /// An index into the xattr lookup table.
    ///
    /// Set to `0xFFFFFFFF` if the inode has no extended attributes
    pub xattr_idx: U32<LE>,
}

const_assert_eq!(mem::size_of::<ExtendedFile>(), 40);

/// A symlink inode structure
///
/// This inode is followed by a path string `target_size` long.
/// If the header had a kind `EXT_SYMLINK`, the path string is followed by an xattr_idx u32.
#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct Symlink {
    /// The number of hard links to this symlink
    pub hard_link_count: U32<LE>,
    /// The size in bytes of the target path string following this inode
    pub target_size: U32<LE>,
}

/// A basic device inode structure
#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct BasicDevice {
    /// The number of hard links to this device
    pub hard_link_count: U32<LE>,
    /// The device represented, see [`DeviceNumber`]
    pub device: U32<LE>,
}

/// A full extended device inode structure
#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct ExtendedDevice {
    /// The number of hard links to this device
    pub hard_link_count: U32<LE>,
    /// The device represented, see [`DeviceNumber`]
    pub device: U32<LE>,
    /// An index into the xattr lookup table. Set to 0xFFFFFFFF if the inode has no extended attributes
    pub xattr_idx: U32<LE>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DeviceNumber(pub u32);

impl DeviceNumber {
    pub fn new(major: u32, minor: u32) -> Self {
        assert!(major <= 0x0_0FFF);
        assert!(minor <= 0xF_FFFF);
        DeviceNumber(major << 8 | minor & 0xFF | (minor & !0xFF) << 12)
    }

    pub fn major(self) -> u32 {
        (self.0 & 0xfff00) >> 8
    }

    pub fn minor(self) -> u32 {
        (self.0 & 0xff) | ((self.0 >> 12) & 0xfff00)
    }
}

/// A basic IPC (fifo/socket) inode structure
#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct BasicIpc {
    /// The number of hard links to this device
    pub hard_link_count: U32<LE>,
}

/// A full extended IPC (fifo/socket) inode structure
#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct ExtendedIpc {
    /// The number of hard links to this device
    pub hard_link_count: U32<LE>,
    /// An index into the xattr lookup table. Set to 0xFFFFFFFF if the inode has no extended attributes
    pub xattr_idx: U32<LE>,
}
