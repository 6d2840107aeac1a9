//! On-disk layout of a squashfs 4.0 archive.
//!
//! A squashfs filesystem consists of a maximum of nine parts, packed together on a byte alignment:
//!
//! * [Superblock](superblock/index.html)
//! * [Compression Options](compression/options/index.html)
//! * [Datablocks & Fragments](datablock/index.html)
//! * [Inode Table](inode/index.html)
//! * [Directory Table](directory/index.html)
//! * [Fragment Table](fragment/index.html)
//! * Export Table
//! * [UID/GID Lookup Table](uid_gid/index.html)
//! * Xattr Table
//!
//! Every structure in this crate is stored little endian with no padding between fields, so each
//! one can be viewed directly over the archive bytes with [`zerocopy`].

use bitflags::bitflags;
use std::fmt;
use std::fmt::Write;

pub mod compression;
pub mod datablock;
pub mod directory;
pub mod fragment;
pub mod inode;
pub mod metablock;
pub mod superblock;
pub mod uid_gid;

/// Byte order of every integer in the archive
pub type LE = zerocopy::byteorder::LittleEndian;

pub const BLOCK_LOG_MIN: u16 = 12;
pub const BLOCK_LOG_MAX: u16 = 20;

bitflags! {
    /// Permission bits of an inode, plus the `mode_t` file type bits
    #[derive(Default)]
    pub struct Mode: u16 {
        const OTHER_EXEC =  0o000_001;
        const OTHER_WRITE = 0o000_002;
        const OTHER_READ =  0o000_004;
        const GROUP_EXEC =  0o000_010;
        const GROUP_WRITE = 0o000_020;
        const GROUP_READ =  0o000_040;
        const USER_EXEC =   0o000_100;
        const USER_WRITE =  0o000_200;
        const USER_READ =   0o000_400;
        const BIT_STICKY =  0o001_000;
        const BIT_SGID =    0o002_000;
        const BIT_SUID =    0o004_000;

        const TYPE_FIFO =   0o010_000;
        const TYPE_CHAR =   0o020_000;
        const TYPE_DIR  =   0o040_000;
        const TYPE_BLOCK =  0o060_000;
        const TYPE_FILE =   0o100_000;
        const TYPE_LINK =   0o120_000;
        const TYPE_SOCKET = 0o140_000;
    }
}

impl Mode {
    pub const PERM_MASK: Mode = Mode { bits: 0o007_777 };
    pub const TYPE_MASK: Mode = Mode { bits: 0o170_000 };
    pub const NONE: Mode = Mode { bits: 0 };

    /// Combine the permission bits stored in an inode header with the type implied by its kind
    pub fn with_kind(permissions: u16, kind: inode::Kind) -> Mode {
        let file_type = match kind.basic() {
            inode::Kind::BASIC_DIR => Mode::TYPE_DIR,
            inode::Kind::BASIC_FILE => Mode::TYPE_FILE,
            inode::Kind::BASIC_SYMLINK => Mode::TYPE_LINK,
            inode::Kind::BASIC_BLOCK_DEV => Mode::TYPE_BLOCK,
            inode::Kind::BASIC_CHAR_DEV => Mode::TYPE_CHAR,
            inode::Kind::BASIC_FIFO => Mode::TYPE_FIFO,
            inode::Kind::BASIC_SOCKET => Mode::TYPE_SOCKET,
            _ => Mode::NONE,
        };
        (Mode::from_bits_truncate(permissions) & Mode::PERM_MASK) | file_type
    }

    fn exec_char(self, exec: Mode, special: Mode, set: char) -> char {
        match (self.contains(exec), self.contains(special)) {
            (false, false) => '-',
            (true, false) => 'x',
            (false, true) => set.to_ascii_uppercase(),
            (true, true) => set,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let type_char = match *self & Mode::TYPE_MASK {
            Mode::TYPE_DIR => 'd',
            Mode::TYPE_CHAR => 'c',
            Mode::TYPE_BLOCK => 'b',
            Mode::TYPE_FILE => '-',
            Mode::TYPE_LINK => 'l',
            Mode::TYPE_SOCKET => 's',
            Mode::TYPE_FIFO => 'p',
            _ => '?',
        };
        let flag = |bit: Mode, c: char| if self.contains(bit) { c } else { '-' };
        let chars = [
            type_char,
            flag(Mode::USER_READ, 'r'),
            flag(Mode::USER_WRITE, 'w'),
            self.exec_char(Mode::USER_EXEC, Mode::BIT_SUID, 's'),
            flag(Mode::GROUP_READ, 'r'),
            flag(Mode::GROUP_WRITE, 'w'),
            self.exec_char(Mode::GROUP_EXEC, Mode::BIT_SGID, 's'),
            flag(Mode::OTHER_READ, 'r'),
            flag(Mode::OTHER_WRITE, 'w'),
            self.exec_char(Mode::OTHER_EXEC, Mode::BIT_STICKY, 't'),
        ];
        for &c in &chars {
            f.write_char(c)?;
        }
        Ok(())
    }
}

#[test]
fn mode_tests() {
    let mode = Mode { bits: 0o754 } | Mode::TYPE_FILE;
    assert_eq!(&format!("{}", mode), "-rwxr-xr--");
    let mode = mode | Mode::BIT_STICKY;
    assert_eq!(&format!("{}", mode), "-rwxr-xr-T");
    let mode = Mode::with_kind(0o4755, inode::Kind::EXT_DIR);
    assert_eq!(&format!("{}", mode), "drwsr-xr-x");
}
