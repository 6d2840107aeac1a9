//! Read squashfs 4.0 archives and fingerprint their fragment blocks
//!
//! Loading an [`Archive`] validates the superblock and reads the id table, the directory tree and
//! the fragment table. Fragment blocks can then be located and hashed over their raw stored
//! bytes, without decompressing anything.
//!
//! ```no_run
//! use sqfs_frag::{Archive, FragmentResult};
//!
//! let archive = Archive::open("image.squashfs")?;
//! for index in 0..archive.fragment_count() {
//!     if let FragmentResult::Resolved { digest, offset, size } = archive.locate_fragment(index)? {
//!         println!("{} {} {}", digest, offset, size);
//!     }
//! }
//! # Ok::<(), sqfs_frag::Error>(())
//! ```

pub mod compression;
mod errors;
pub mod fragment;
mod layout;
mod metadata;
pub mod read;
pub mod tree;

pub use errors::{Error, ErrorKind, Result, Stage};
pub use fragment::{FragmentHasher, FragmentResult};
pub use metadata::Table;
pub use read::{Archive, Warning};
pub use repr::Mode;
pub use tree::{Node, NodeKind};

pub use repr;
