//! User/Group IDs
//!
//! Inodes store a 16 bit index into this table rather than the id itself. The table is stored in
//! two levels like the fragment table: `u32` ids packed into metadata blocks, located through an
//! array of `u64` block offsets at `id_table_start`.

use zerocopy::byteorder::U32;
use zerocopy::{AsBytes, FromBytes, Unaligned};

use crate::LE;

/// UID/GIDs are both stored as u32s. Both UIDs and GIDs are treated as IDs
#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct Id(pub U32<LE>);

impl Id {
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

/// The index of an id in the uid_gid list
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Idx(pub u16);
