//! Builds small squashfs images in memory
//!
//! Layouts are written field by field with `byteorder` rather than through the `repr` structures,
//! so the reader is checked against an independent encoding.

#![allow(dead_code)]

use byteorder::{WriteBytesExt, LE};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use sloggers::null::NullLoggerBuilder;
use sloggers::Build;
use std::io::Write;

pub const BLOCK_SIZE: u32 = 4096;
pub const BLOCK_LOG: u16 = 12;
pub const MODIFIED_TIME: u32 = 1_600_000_000;

pub const GZIP: u16 = 1;
pub const XZ: u16 = 4;

pub const FLAG_NO_FRAGMENTS: u16 = 1 << 4;
pub const FLAG_COMPRESSOR_OPTIONS: u16 = 1 << 10;

pub const METABLOCK_SIZE: usize = 8192;
pub const UNCOMPRESSED_BLOCK: u32 = 1 << 24;

// Superblock field offsets
pub const MAGIC_OFFSET: usize = 0;
pub const COMPRESSION_OFFSET: usize = 20;
pub const ID_COUNT_OFFSET: usize = 26;
pub const VERSION_MAJOR_OFFSET: usize = 28;
pub const BYTES_USED_OFFSET: usize = 40;

pub fn logger() -> slog::Logger {
    NullLoggerBuilder.build().expect("null logger")
}

#[derive(Debug, Clone)]
pub enum Node {
    File {
        name: String,
        uid_idx: u16,
        gid_idx: u16,
        file_size: u32,
        blocks_start: u32,
        blocks: Vec<u32>,
        fragment: Option<(u32, u32)>,
    },
    Dir {
        name: String,
        children: Vec<Node>,
    },
    Symlink {
        name: String,
        target: String,
    },
    Device {
        name: String,
        block: bool,
        major: u32,
        minor: u32,
    },
    Ipc {
        name: String,
        socket: bool,
    },
    /// A directory entry pointing at an arbitrary inode, which is not written
    Raw {
        name: String,
        kind: u16,
        inode_ref: u64,
        inode_number: u32,
    },
}

impl Node {
    /// A file stored entirely in a fragment
    pub fn tail_file(name: &str, file_size: u32, fragment: u32, offset: u32) -> Node {
        Node::File {
            name: name.to_string(),
            uid_idx: 0,
            gid_idx: 0,
            file_size,
            blocks_start: 0,
            blocks: Vec::new(),
            fragment: Some((fragment, offset)),
        }
    }

    pub fn dir(name: &str, children: Vec<Node>) -> Node {
        Node::Dir {
            name: name.to_string(),
            children,
        }
    }

    pub fn symlink(name: &str, target: &str) -> Node {
        Node::Symlink {
            name: name.to_string(),
            target: target.to_string(),
        }
    }

    pub fn device(name: &str, block: bool, major: u32, minor: u32) -> Node {
        Node::Device {
            name: name.to_string(),
            block,
            major,
            minor,
        }
    }

    pub fn fifo(name: &str) -> Node {
        Node::Ipc {
            name: name.to_string(),
            socket: false,
        }
    }

    pub fn socket(name: &str) -> Node {
        Node::Ipc {
            name: name.to_string(),
            socket: true,
        }
    }

    fn name(&self) -> &str {
        match self {
            Node::File { name, .. }
            | Node::Dir { name, .. }
            | Node::Symlink { name, .. }
            | Node::Device { name, .. }
            | Node::Ipc { name, .. }
            | Node::Raw { name, .. } => name,
        }
    }
}

/// Splits a byte stream into metadata blocks, like mksquashfs does
struct MetablockWriter {
    compress: bool,
    output: Vec<u8>,
    current: Vec<u8>,
}

impl MetablockWriter {
    fn new(compress: bool) -> Self {
        Self {
            compress,
            output: Vec::new(),
            current: Vec::new(),
        }
    }

    fn position(&self) -> (u32, u16) {
        (self.output.len() as u32, self.current.len() as u16)
    }

    fn write(&mut self, mut data: &[u8]) {
        while METABLOCK_SIZE - self.current.len() < data.len() {
            let (head, tail) = data.split_at(METABLOCK_SIZE - self.current.len());
            self.current.extend_from_slice(head);
            self.flush();
            data = tail;
        }
        self.current.extend_from_slice(data);
    }

    fn flush(&mut self) {
        if !self.current.is_empty() {
            write_metablock(&mut self.output, &self.current, self.compress);
            self.current.clear();
        }
    }

    fn finish(mut self) -> Vec<u8> {
        self.flush();
        self.output
    }
}

fn write_metablock(output: &mut Vec<u8>, data: &[u8], compress: bool) {
    if compress {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(data).unwrap();
        let compressed = encoder.finish().unwrap();
        if compressed.len() < data.len() {
            output.write_u16::<LE>(compressed.len() as u16).unwrap();
            output.extend_from_slice(&compressed);
            return;
        }
    }
    output.write_u16::<LE>(0x8000 | data.len() as u16).unwrap();
    output.extend_from_slice(data);
}

struct Child {
    name: String,
    block: u32,
    offset: u16,
    inode_number: u32,
    kind: u16,
}

/// Added to a basic inode type to get its extended type
const EXTENDED_KIND_OFFSET: u16 = 7;
const NO_XATTR: u32 = 0xFFFF_FFFF;

/// The kernel's `new_encode_dev` split of a device number
fn encode_device(major: u32, minor: u32) -> u32 {
    major << 8 | (minor & 0xFF) | (minor & !0xFF) << 12
}

struct TreeWriter {
    inodes: MetablockWriter,
    dirs: MetablockWriter,
    inode_count: u32,
    extended: bool,
}

impl TreeWriter {
    /// Write an inode header for basic type `kind`, returning the inode number
    fn header(&mut self, kind: u16, permissions: u16, uid_idx: u16, gid_idx: u16) -> u32 {
        self.inode_count += 1;
        let kind = if self.extended {
            kind + EXTENDED_KIND_OFFSET
        } else {
            kind
        };
        let mut buf = Vec::new();
        buf.write_u16::<LE>(kind).unwrap();
        buf.write_u16::<LE>(permissions).unwrap();
        buf.write_u16::<LE>(uid_idx).unwrap();
        buf.write_u16::<LE>(gid_idx).unwrap();
        buf.write_u32::<LE>(MODIFIED_TIME).unwrap();
        buf.write_u32::<LE>(self.inode_count).unwrap();
        self.inodes.write(&buf);
        self.inode_count
    }

    fn write_node(&mut self, node: &Node) -> Child {
        if let Node::Raw {
            name,
            kind,
            inode_ref,
            inode_number,
        } = node
        {
            return Child {
                name: name.clone(),
                block: (inode_ref >> 16) as u32,
                offset: *inode_ref as u16,
                inode_number: *inode_number,
                kind: *kind,
            };
        }

        let children: Vec<Child> = match node {
            Node::Dir { children, .. } => {
                let mut children = children.clone();
                children.sort_by(|a, b| a.name().cmp(b.name()));
                children.iter().map(|child| self.write_node(child)).collect()
            }
            _ => Vec::new(),
        };

        let (block, offset) = self.inodes.position();
        let mut buf = Vec::new();
        let (inode_number, kind) = match node {
            Node::File {
                uid_idx,
                gid_idx,
                file_size,
                blocks_start,
                blocks,
                fragment,
                ..
            } => {
                let number = self.header(2, 0o644, *uid_idx, *gid_idx);
                let (index, frag_offset) = fragment.unwrap_or((0xFFFF_FFFF, 0));
                if self.extended {
                    buf.write_u64::<LE>(u64::from(*blocks_start)).unwrap();
                    buf.write_u64::<LE>(u64::from(*file_size)).unwrap();
                    buf.write_u64::<LE>(0).unwrap();
                    buf.write_u32::<LE>(1).unwrap();
                    buf.write_u32::<LE>(index).unwrap();
                    buf.write_u32::<LE>(frag_offset).unwrap();
                    buf.write_u32::<LE>(NO_XATTR).unwrap();
                } else {
                    buf.write_u32::<LE>(*blocks_start).unwrap();
                    buf.write_u32::<LE>(index).unwrap();
                    buf.write_u32::<LE>(frag_offset).unwrap();
                    buf.write_u32::<LE>(*file_size).unwrap();
                }
                for size in blocks {
                    buf.write_u32::<LE>(*size).unwrap();
                }
                (number, 2)
            }
            Node::Symlink { target, .. } => {
                let number = self.header(3, 0o777, 0, 0);
                buf.write_u32::<LE>(1).unwrap();
                buf.write_u32::<LE>(target.len() as u32).unwrap();
                buf.extend_from_slice(target.as_bytes());
                if self.extended {
                    buf.write_u32::<LE>(NO_XATTR).unwrap();
                }
                (number, 3)
            }
            Node::Device {
                block,
                major,
                minor,
                ..
            } => {
                let kind = if *block { 4 } else { 5 };
                let number = self.header(kind, 0o600, 0, 0);
                buf.write_u32::<LE>(1).unwrap();
                buf.write_u32::<LE>(encode_device(*major, *minor)).unwrap();
                if self.extended {
                    buf.write_u32::<LE>(NO_XATTR).unwrap();
                }
                (number, kind)
            }
            Node::Ipc { socket, .. } => {
                let kind = if *socket { 7 } else { 6 };
                let number = self.header(kind, 0o644, 0, 0);
                buf.write_u32::<LE>(1).unwrap();
                if self.extended {
                    buf.write_u32::<LE>(NO_XATTR).unwrap();
                }
                (number, kind)
            }
            Node::Dir { .. } => {
                let (listing_block, listing_offset) = self.dirs.position();
                let listing_size = self.write_listing(&children);
                let number = self.header(1, 0o755, 0, 0);
                let hard_links = 2 + children.len() as u32;
                if self.extended {
                    buf.write_u32::<LE>(hard_links).unwrap();
                    buf.write_u32::<LE>(listing_size as u32 + 3).unwrap();
                    buf.write_u32::<LE>(listing_block).unwrap();
                    buf.write_u32::<LE>(0).unwrap();
                    buf.write_u16::<LE>(0).unwrap();
                    buf.write_u16::<LE>(listing_offset).unwrap();
                    buf.write_u32::<LE>(NO_XATTR).unwrap();
                } else {
                    buf.write_u32::<LE>(listing_block).unwrap();
                    buf.write_u32::<LE>(hard_links).unwrap();
                    buf.write_u16::<LE>(listing_size as u16 + 3).unwrap();
                    buf.write_u16::<LE>(listing_offset).unwrap();
                    buf.write_u32::<LE>(0).unwrap();
                }
                (number, 1)
            }
            Node::Raw { .. } => unreachable!(),
        };
        self.inodes.write(&buf);

        Child {
            name: node.name().to_string(),
            block,
            offset,
            inode_number,
            kind,
        }
    }

    /// Write directory headers and entries, returning the bytes written
    fn write_listing(&mut self, children: &[Child]) -> usize {
        let mut buf = Vec::new();
        let mut rest = children;
        while let Some(first) = rest.first() {
            let run = rest
                .iter()
                .take(256)
                .take_while(|child| {
                    child.block == first.block
                        && (i64::from(child.inode_number) - i64::from(first.inode_number)).abs()
                            < i64::from(i16::MAX)
                })
                .count();
            buf.write_u32::<LE>(run as u32 - 1).unwrap();
            buf.write_u32::<LE>(first.block).unwrap();
            buf.write_u32::<LE>(first.inode_number).unwrap();
            for child in &rest[..run] {
                buf.write_u16::<LE>(child.offset).unwrap();
                buf.write_i16::<LE>((child.inode_number as i32 - first.inode_number as i32) as i16)
                    .unwrap();
                buf.write_u16::<LE>(child.kind).unwrap();
                buf.write_u16::<LE>(child.name.len() as u16 - 1).unwrap();
                buf.extend_from_slice(child.name.as_bytes());
            }
            rest = &rest[run..];
        }
        self.dirs.write(&buf);
        buf.len()
    }
}

/// A built image, plus where its tables ended up
#[derive(Debug, Clone)]
pub struct Image {
    pub bytes: Vec<u8>,
    pub inode_table_start: u64,
    pub directory_table_start: u64,
    pub fragment_table_start: u64,
    pub id_table_start: u64,
    pub bytes_used: u64,
}

impl Image {
    pub fn set_u16(&mut self, offset: usize, value: u16) {
        self.bytes[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    pub fn set_u32(&mut self, offset: usize, value: u32) {
        self.bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn set_u64(&mut self, offset: usize, value: u64) {
        self.bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }
}

#[derive(Debug, Clone)]
pub struct Builder {
    image: Vec<u8>,
    compress_metadata: bool,
    extended_inodes: bool,
    compression_id: u16,
    flags: u16,
    ids: Vec<u32>,
    fragments: Vec<(u64, u32)>,
    root: Vec<Node>,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Self {
        Self {
            image: vec![0; 96],
            compress_metadata: false,
            extended_inodes: false,
            compression_id: GZIP,
            flags: 0,
            ids: vec![0, 1000],
            fragments: Vec::new(),
            root: Vec::new(),
        }
    }

    pub fn compress_metadata(mut self, compress: bool) -> Self {
        self.compress_metadata = compress;
        self
    }

    /// Write every inode with its extended type
    pub fn extended_inodes(mut self, extended: bool) -> Self {
        self.extended_inodes = extended;
        self
    }

    pub fn compression(mut self, id: u16) -> Self {
        self.compression_id = id;
        self
    }

    pub fn flags(mut self, flags: u16) -> Self {
        self.flags |= flags;
        self
    }

    /// Store a compressor options block with an explicit header
    pub fn options(mut self, header: u16, body: &[u8]) -> Self {
        assert_eq!(self.image.len(), 96, "options must precede all data");
        self.flags |= FLAG_COMPRESSOR_OPTIONS;
        self.image.write_u16::<LE>(header).unwrap();
        self.image.extend_from_slice(body);
        self
    }

    pub fn ids(mut self, ids: &[u32]) -> Self {
        self.ids = ids.to_vec();
        self
    }

    pub fn root(mut self, children: Vec<Node>) -> Self {
        self.root = children;
        self
    }

    /// Append bytes to the data area, returning their offset
    pub fn data(&mut self, bytes: &[u8]) -> u64 {
        let offset = self.image.len() as u64;
        self.image.extend_from_slice(bytes);
        offset
    }

    /// Add a fragment table entry, returning its index
    pub fn fragment(&mut self, start: u64, size: u32) -> u32 {
        self.fragments.push((start, size));
        self.fragments.len() as u32 - 1
    }

    /// Store `bytes` as an uncompressed fragment block, returning its index
    pub fn fragment_bytes(&mut self, bytes: &[u8]) -> u32 {
        let start = self.data(bytes);
        self.fragment(start, bytes.len() as u32 | UNCOMPRESSED_BLOCK)
    }

    fn write_table(&mut self, records: &[u8]) -> u64 {
        let locations: Vec<u64> = records
            .chunks(METABLOCK_SIZE)
            .map(|chunk| {
                let location = self.image.len() as u64;
                write_metablock(&mut self.image, chunk, self.compress_metadata);
                location
            })
            .collect();
        let index = self.image.len() as u64;
        for location in locations {
            self.image.write_u64::<LE>(location).unwrap();
        }
        index
    }

    pub fn build(mut self) -> Image {
        let compress = self.compress_metadata;
        let mut tree = TreeWriter {
            inodes: MetablockWriter::new(compress),
            dirs: MetablockWriter::new(compress),
            inode_count: 0,
            extended: self.extended_inodes,
        };
        let root = tree.write_node(&Node::dir("", self.root.clone()));
        let inode_count = tree.inode_count;
        let inodes = tree.inodes.finish();
        let dirs = tree.dirs.finish();

        let inode_table_start = self.image.len() as u64;
        self.image.extend_from_slice(&inodes);
        let directory_table_start = self.image.len() as u64;
        self.image.extend_from_slice(&dirs);

        let mut fragment_records = Vec::new();
        for &(start, size) in &self.fragments {
            fragment_records.write_u64::<LE>(start).unwrap();
            fragment_records.write_u32::<LE>(size).unwrap();
            fragment_records.write_u32::<LE>(0).unwrap();
        }
        let fragment_table_start = if self.fragments.is_empty() {
            u64::MAX
        } else {
            self.write_table(&fragment_records)
        };

        let mut id_records = Vec::new();
        for &id in &self.ids {
            id_records.write_u32::<LE>(id).unwrap();
        }
        let id_table_start = self.write_table(&id_records);
        let bytes_used = self.image.len() as u64;

        let mut superblock = Vec::new();
        superblock.write_u32::<LE>(0x7371_7368).unwrap();
        superblock.write_u32::<LE>(inode_count).unwrap();
        superblock.write_i32::<LE>(MODIFIED_TIME as i32).unwrap();
        superblock.write_u32::<LE>(BLOCK_SIZE).unwrap();
        superblock.write_u32::<LE>(self.fragments.len() as u32).unwrap();
        superblock.write_u16::<LE>(self.compression_id).unwrap();
        superblock.write_u16::<LE>(BLOCK_LOG).unwrap();
        superblock.write_u16::<LE>(self.flags).unwrap();
        superblock.write_u16::<LE>(self.ids.len() as u16).unwrap();
        superblock.write_u16::<LE>(4).unwrap();
        superblock.write_u16::<LE>(0).unwrap();
        superblock
            .write_u64::<LE>(u64::from(root.block) << 16 | u64::from(root.offset))
            .unwrap();
        superblock.write_u64::<LE>(bytes_used).unwrap();
        superblock.write_u64::<LE>(id_table_start).unwrap();
        superblock.write_u64::<LE>(u64::MAX).unwrap();
        superblock.write_u64::<LE>(inode_table_start).unwrap();
        superblock.write_u64::<LE>(directory_table_start).unwrap();
        superblock.write_u64::<LE>(fragment_table_start).unwrap();
        superblock.write_u64::<LE>(u64::MAX).unwrap();
        assert_eq!(superblock.len(), 96);
        self.image[..96].copy_from_slice(&superblock);

        // mksquashfs pads images to a multiple of 4KiB
        let padded = (self.image.len() + 4095) / 4096 * 4096;
        self.image.resize(padded, 0);

        Image {
            bytes: self.image,
            inode_table_start,
            directory_table_start,
            fragment_table_start,
            id_table_start,
            bytes_used,
        }
    }
}
