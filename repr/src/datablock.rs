//! Data blocks and fragment blocks
//!
//! Both data blocks and fragment blocks record their on-disk length in a packed `u32`: bit 24 is
//! set when the block is stored uncompressed, and the low 24 bits give the number of bytes the
//! block occupies in the archive. A length of zero marks a sparse block, a hole that has no bytes
//! stored at all.

use std::fmt;

#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Size(pub u32);

impl Size {
    pub const UNCOMPRESSED_FLAG: u32 = 1 << 24;
    pub const SIZE_MASK: u32 = Self::UNCOMPRESSED_FLAG - 1;
    pub const ZERO: Size = Size(0);

    pub fn new(size: u32, uncompressed: bool) -> Self {
        assert!(size <= Self::SIZE_MASK);
        if uncompressed {
            Self(size | Self::UNCOMPRESSED_FLAG)
        } else {
            Self(size)
        }
    }

    /// The number of bytes the block occupies on disk
    pub fn size(self) -> u32 {
        self.0 & Self::SIZE_MASK
    }

    pub fn uncompressed(self) -> bool {
        self.0 & Self::UNCOMPRESSED_FLAG != 0
    }

    /// A sparse block has no stored bytes: reading it yields a block of zeros
    pub fn is_sparse(self) -> bool {
        self.size() == 0
    }
}

impl fmt::Debug for Size {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Size")
            .field("size", &self.size())
            .field("uncompressed", &self.uncompressed())
            .finish()
    }
}
