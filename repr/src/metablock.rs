//! Metadata blocks are compressed in 8KiB blocks. A metadata block is prefixed by a u16 header.
//! The highest bit of the header is set if the block is stored uncompressed (this will happen if
//! the block grew when compressed, or e.g. the `UNCOMPRESSED_INODES` superblock flag is set).
//! The lower 15 bits specifies the size of the metadata block (not including the header) on disk.
//!
//! To read a metadata block, read a u16.
//! If the highest bit is set (size & 0x8000 == 0x8000) the following data is uncompressed.
//! Mask out the highest bit to get the size of the block data on disk
//! (this should always be <= 8KiB). Read that many bytes. If the data is compressed,
//! uncompress the data. In pseudocode:
//!
//! ```text
//! header = read_u16(offset=offset)
//! data_size = header & 0x7FFF
//! uncompressed = header & 0x8000
//! data = read(offset=offset+2, len=data_size)
//! if(!uncompressed) {
//!     data = uncompress(data)
//! }
//! return data
//! ```
//!
//! Neither the size on disk, nor the compressed size should exceed 8KiB. The uncompressed size
//! should always be equal to 8KiB, with the exception of the last metadata block of a section,
//! which may have an uncompressed size less than 8KiB.

use zerocopy::byteorder::U16;
use zerocopy::{AsBytes, FromBytes, Unaligned};

use crate::LE;

/// The maximum uncompressed size of a metadata block
pub const SIZE: usize = 8 * 1024;

/// Set in the header when the block is stored without compression
pub const UNCOMPRESSED_FLAG: u16 = 0x8000;

#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct Header(pub U16<LE>);

impl Header {
    pub fn new(size: u16, compressed: bool) -> Self {
        assert!(usize::from(size) <= SIZE);
        let flag = if compressed { 0 } else { UNCOMPRESSED_FLAG };
        Header(U16::new(size | flag))
    }

    pub fn compressed(self) -> bool {
        self.0.get() & UNCOMPRESSED_FLAG == 0
    }

    /// The number of bytes following the header on disk
    pub fn size(self) -> u16 {
        self.0.get() & !UNCOMPRESSED_FLAG
    }
}

/// The location of a byte inside a table of metadata blocks
///
/// The upper bits hold the offset of a metadata block relative to the start of the table, the
/// lower 16 bits an offset inside that block once it has been uncompressed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ref(pub u64);

impl Ref {
    pub fn new(block_start: u32, start_offset: u16) -> Self {
        Ref(u64::from(block_start) << 16 | u64::from(start_offset))
    }

    #[inline]
    pub fn block_start(self) -> u32 {
        ((self.0 >> 16) & 0xFFFF_FFFF) as u32
    }

    #[inline]
    pub fn start_offset(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_bits() {
        let header = Header(U16::new(0x8010));
        assert!(!header.compressed());
        assert_eq!(header.size(), 0x10);

        let header = Header::new(0x1FFF, true);
        assert!(header.compressed());
        assert_eq!(header.size(), 0x1FFF);
        assert_eq!(header.as_bytes(), &[0xFF, 0x1F]);
    }

    #[test]
    fn ref_parts() {
        let position = Ref::new(0xDEAD_BEEF, 0x1234);
        assert_eq!(position.0, 0xDEAD_BEEF_1234);
        assert_eq!(position.block_start(), 0xDEAD_BEEF);
        assert_eq!(position.start_offset(), 0x1234);
    }
}
