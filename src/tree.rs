//! The directory hierarchy of an archive
//!
//! The tree is read once while loading: every inode reachable from the root is decoded, and
//! directories own their children. Nothing points back up the tree.

use bstr::{BStr, BString, ByteSlice};
use chrono::{DateTime, TimeZone, Utc};
use repr::inode::{self, Kind};
use repr::{datablock, directory, fragment, uid_gid, Mode};
use slog::Logger;
use snafu::ensure;
use std::collections::HashSet;
use std::convert::TryFrom;
use std::mem;
use zerocopy::byteorder::U32;

use crate::compression::Decompressor;
use crate::errors::*;
use crate::metadata::{Cursor, MetadataReader, Region, Table};

/// Longest symlink target accepted, matching `PATH_MAX`
const MAX_TARGET_LEN: u32 = 4096;

/// Size of the `.` and `..` entries counted in a directory's size but never stored
const DIR_SIZE_BIAS: u64 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Empty for the root
    pub name: BString,
    pub inode_number: u32,
    pub mode: Mode,
    pub uid: u32,
    pub gid: u32,
    /// Seconds since the unix epoch
    pub modified_time: u32,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Directory { children: Vec<Node> },
    File(File),
    Symlink { target: BString },
    BlockDevice(inode::DeviceNumber),
    CharDevice(inode::DeviceNumber),
    Fifo,
    Socket,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    /// Archive offset of the first data block
    pub blocks_start: u64,
    pub file_size: u64,
    /// On-disk sizes of the full data blocks
    pub blocks: Vec<datablock::Size>,
    pub fragment: Option<FragmentRef>,
}

/// Where the tail of a file lives inside a fragment block
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct FragmentRef {
    /// Index into the fragment table
    pub index: u32,
    /// Offset of the tail in the uncompressed fragment block
    pub offset: u32,
    pub size: u32,
}

impl Node {
    pub fn modified(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(i64::from(self.modified_time), 0).single()
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    pub fn children(&self) -> &[Node] {
        match &self.kind {
            NodeKind::Directory { children } => children,
            _ => &[],
        }
    }

    pub fn as_file(&self) -> Option<&File> {
        match &self.kind {
            NodeKind::File(file) => Some(file),
            _ => None,
        }
    }

    /// Find a node by a `/` separated path relative to this one
    pub fn lookup<P: AsRef<[u8]>>(&self, path: P) -> Option<&Node> {
        path.as_ref()
            .split_str("/")
            .filter(|part| !part.is_empty())
            .try_fold(self, |node, part| {
                node.children()
                    .iter()
                    .find(|child| child.name.as_bytes() == part)
            })
    }

    /// Every node of the tree in depth first order, starting with this one
    pub fn iter(&self) -> Iter<'_> {
        Iter { stack: vec![self] }
    }

    /// Every file in the tree which ends in a fragment
    pub fn file_fragments(&self) -> impl Iterator<Item = (&Node, FragmentRef)> + '_ {
        self.iter().filter_map(|node| {
            node.as_file()
                .and_then(|file| file.fragment)
                .map(|fragment| (node, fragment))
        })
    }

    pub fn name(&self) -> &BStr {
        self.name.as_bstr()
    }
}

pub struct Iter<'a> {
    stack: Vec<&'a Node>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children().iter().rev());
        Some(node)
    }
}

/// Builds the tree by walking the inode and directory tables from the root inode
pub(crate) struct TreeReader<'a, 'b, D> {
    reader: MetadataReader<'a, D>,
    ids: &'b Table<uid_gid::Id>,
    inode_region: Region,
    dir_region: Region,
    block_size: u32,
    /// Inodes of the directories currently being read
    ancestors: Vec<inode::Ref>,
    /// Inodes of every directory read so far
    expanded: HashSet<inode::Ref>,
    logger: &'b Logger,
}

impl<'a, 'b, D: Decompressor> TreeReader<'a, 'b, D> {
    pub fn new(
        data: &'a [u8],
        superblock: &repr::superblock::Superblock,
        ids: &'b Table<uid_gid::Id>,
        decompressor: D,
        logger: &'b Logger,
    ) -> Self {
        let inode_region = Region {
            start: superblock.inode_table_start.get(),
            limit: superblock.directory_table_start.get(),
        };
        let dir_region = Region {
            start: superblock.directory_table_start.get(),
            limit: superblock.directory_table_limit(),
        };
        Self {
            reader: MetadataReader::new(data, decompressor),
            ids,
            inode_region,
            dir_region,
            block_size: superblock.block_size.get(),
            ancestors: Vec::new(),
            expanded: HashSet::new(),
            logger,
        }
    }

    pub fn read_root(mut self, root: inode::Ref) -> Result<Node, ErrorInner> {
        let node = self.read_node(BString::from(Vec::new()), root, None)?;
        ensure!(
            node.is_dir(),
            InvalidMetadata {
                err: format!("root inode is not a directory: {}", node.mode),
            }
        );
        slog::debug!(self.logger, "Loaded directory tree";
            "nodes" => node.iter().count(),
            "root_inode" => node.inode_number
        );
        Ok(node)
    }

    fn id(&self, idx: uid_gid::Idx) -> Result<u32, ErrorInner> {
        self.ids.lookup(u64::from(idx.0)).map(|id| id.get())
    }

    fn read_node(
        &mut self,
        name: BString,
        inode_ref: inode::Ref,
        expected_kind: Option<Kind>,
    ) -> Result<Node, ErrorInner> {
        let mut cursor = Cursor::new(self.inode_region, inode_ref)?;
        let header: inode::Header = self.reader.read_struct(&mut cursor)?;
        let kind = header.kind();
        if let Some(expected) = expected_kind {
            ensure!(
                expected == kind.basic(),
                InvalidMetadata {
                    err: format!(
                        "directory entry {} has type {}, but its inode has type {}",
                        name, expected.0, kind.0
                    ),
                }
            );
        }
        let uid = self.id(header.uid_idx())?;
        let gid = self.id(header.gid_idx())?;
        let inode_number = header.inode_number().0;

        let node_kind = match kind {
            Kind::BASIC_DIR => {
                let dir: inode::BasicDir = self.reader.read_struct(&mut cursor)?;
                let listing = inode::Ref::new(dir.block_idx.get(), dir.block_offset.get());
                self.read_dir(inode_ref, inode_number, listing, u64::from(dir.file_size.get()))?
            }
            Kind::EXT_DIR => {
                let dir: inode::ExtendedDir = self.reader.read_struct(&mut cursor)?;
                let listing = inode::Ref::new(dir.block_idx.get(), dir.block_offset.get());
                self.read_dir(inode_ref, inode_number, listing, u64::from(dir.file_size.get()))?
            }
            Kind::BASIC_FILE => {
                let file: inode::BasicFile = self.reader.read_struct(&mut cursor)?;
                NodeKind::File(self.read_file(
                    &mut cursor,
                    u64::from(file.blocks_start.get()),
                    u64::from(file.file_size.get()),
                    fragment::Idx(file.fragment_block_index.get()),
                    file.block_offset.get(),
                )?)
            }
            Kind::EXT_FILE => {
                let file: inode::ExtendedFile = self.reader.read_struct(&mut cursor)?;
                NodeKind::File(self.read_file(
                    &mut cursor,
                    file.blocks_start.get(),
                    file.file_size.get(),
                    fragment::Idx(file.fragment_block_index.get()),
                    file.block_offset.get(),
                )?)
            }
            Kind::BASIC_SYMLINK | Kind::EXT_SYMLINK => {
                let link: inode::Symlink = self.reader.read_struct(&mut cursor)?;
                let target_size = link.target_size.get();
                ensure!(
                    target_size <= MAX_TARGET_LEN,
                    InvalidMetadata {
                        err: format!("symlink target of {} bytes", target_size),
                    }
                );
                let target = self.reader.read_vec(&mut cursor, target_size as usize)?;
                NodeKind::Symlink {
                    target: BString::from(target),
                }
            }
            Kind::BASIC_BLOCK_DEV | Kind::BASIC_CHAR_DEV => {
                let dev: inode::BasicDevice = self.reader.read_struct(&mut cursor)?;
                device_kind(kind, inode::DeviceNumber(dev.device.get()))
            }
            Kind::EXT_BLOCK_DEV | Kind::EXT_CHAR_DEV => {
                let dev: inode::ExtendedDevice = self.reader.read_struct(&mut cursor)?;
                device_kind(kind, inode::DeviceNumber(dev.device.get()))
            }
            Kind::BASIC_FIFO | Kind::BASIC_SOCKET => {
                let _: inode::BasicIpc = self.reader.read_struct(&mut cursor)?;
                ipc_kind(kind)
            }
            Kind::EXT_FIFO | Kind::EXT_SOCKET => {
                let _: inode::ExtendedIpc = self.reader.read_struct(&mut cursor)?;
                ipc_kind(kind)
            }
            _ => {
                return InvalidMetadata {
                    err: format!("unknown inode type {}", kind.0),
                }
                .fail()
            }
        };

        Ok(Node {
            name,
            inode_number,
            mode: Mode::with_kind(header.permissions.get(), kind),
            uid,
            gid,
            modified_time: header.modified_time.get(),
            kind: node_kind,
        })
    }

    fn read_file(
        &mut self,
        cursor: &mut Cursor,
        blocks_start: u64,
        file_size: u64,
        fragment_idx: fragment::Idx,
        fragment_offset: u32,
    ) -> Result<File, ErrorInner> {
        let block_size = u64::from(self.block_size);
        let has_fragment = fragment_idx != fragment::Idx::NONE;
        let tail = file_size % block_size;
        let block_count = if has_fragment || tail == 0 {
            file_size / block_size
        } else {
            file_size / block_size + 1
        };

        // Read one size at a time: a corrupt file size runs into the end of the table long
        // before it could exhaust memory
        let mut blocks = Vec::new();
        for _ in 0..block_count {
            let size: U32<repr::LE> = self.reader.read_struct(cursor)?;
            blocks.push(datablock::Size(size.get()));
        }

        let fragment = if has_fragment {
            Some(FragmentRef {
                index: fragment_idx.0,
                offset: fragment_offset,
                size: tail as u32,
            })
        } else {
            None
        };
        Ok(File {
            blocks_start,
            file_size,
            blocks,
            fragment,
        })
    }

    fn read_dir(
        &mut self,
        inode_ref: inode::Ref,
        inode_number: u32,
        listing: inode::Ref,
        file_size: u64,
    ) -> Result<NodeKind, ErrorInner> {
        ensure!(
            !self.ancestors.contains(&inode_ref),
            DirectoryLoop { inode_number }
        );
        ensure!(
            self.expanded.insert(inode_ref),
            DirectoryReused { inode_number }
        );

        let entries = self.read_listing(listing, file_size)?;
        self.ancestors.push(inode_ref);
        let children = entries
            .into_iter()
            .map(|(name, child_ref, kind)| self.read_node(name, child_ref, Some(kind)))
            .collect::<Result<Vec<_>, _>>();
        self.ancestors.pop();
        Ok(NodeKind::Directory {
            children: children?,
        })
    }

    /// Read the entries of one directory: their names, inode locations and basic inode types
    fn read_listing(
        &mut self,
        listing: inode::Ref,
        file_size: u64,
    ) -> Result<Vec<(BString, inode::Ref, Kind)>, ErrorInner> {
        let mut remaining = file_size.saturating_sub(DIR_SIZE_BIAS);
        let mut entries = Vec::new();
        if remaining == 0 {
            return Ok(entries);
        }
        let mut cursor = Cursor::new(self.dir_region, listing)?;

        while remaining > 0 {
            take(&mut remaining, mem::size_of::<directory::Header>())?;
            let header: directory::Header = self.reader.read_struct(&mut cursor)?;
            let count = header.entry_count();
            ensure!(
                count <= directory::MAX_ENTRIES_PER_HEADER,
                InvalidMetadata {
                    err: format!("directory header with {} entries", count),
                }
            );
            for _ in 0..count {
                take(&mut remaining, mem::size_of::<directory::Entry>())?;
                let entry: directory::Entry = self.reader.read_struct(&mut cursor)?;
                let name_len = entry.name_len();
                ensure!(
                    name_len <= directory::MAX_NAME_LEN,
                    InvalidMetadata {
                        err: format!("directory entry name of {} bytes", name_len),
                    }
                );
                take(&mut remaining, name_len)?;
                let name = self.reader.read_vec(&mut cursor, name_len)?;
                ensure!(
                    valid_name(&name),
                    InvalidMetadata {
                        err: format!("invalid directory entry name {:?}", name.as_bstr()),
                    }
                );
                entries.push((BString::from(name), entry.inode_ref(&header), entry.kind()));
            }
        }
        Ok(entries)
    }
}

/// Consume `len` bytes of a directory's remaining size
fn take(remaining: &mut u64, len: usize) -> Result<(), ErrorInner> {
    let len = u64::try_from(len).unwrap_or(u64::MAX);
    ensure!(
        *remaining >= len,
        InvalidMetadata {
            err: format!("directory listing ends {} bytes into a {} byte record", remaining, len),
        }
    );
    *remaining -= len;
    Ok(())
}

fn valid_name(name: &[u8]) -> bool {
    !name.is_empty() && name != b"." && name != b".." && !name.contains(&b'/') && !name.contains(&0)
}

fn device_kind(kind: Kind, device: inode::DeviceNumber) -> NodeKind {
    if kind.basic() == Kind::BASIC_BLOCK_DEV {
        NodeKind::BlockDevice(device)
    } else {
        NodeKind::CharDevice(device)
    }
}

fn ipc_kind(kind: Kind) -> NodeKind {
    if kind.basic() == Kind::BASIC_FIFO {
        NodeKind::Fifo
    } else {
        NodeKind::Socket
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(name: &str, kind: NodeKind) -> Node {
        Node {
            name: BString::from(name),
            inode_number: 0,
            mode: Mode::NONE,
            uid: 0,
            gid: 0,
            modified_time: 0,
            kind,
        }
    }

    fn sample() -> Node {
        let file = File {
            blocks_start: 100,
            file_size: 10,
            blocks: Vec::new(),
            fragment: Some(FragmentRef {
                index: 1,
                offset: 0,
                size: 10,
            }),
        };
        let sub = leaf(
            "sub",
            NodeKind::Directory {
                children: vec![leaf("b", NodeKind::File(file.clone())), leaf("fifo", NodeKind::Fifo)],
            },
        );
        leaf(
            "",
            NodeKind::Directory {
                children: vec![leaf("a", NodeKind::File(file)), sub],
            },
        )
    }

    #[test]
    fn depth_first_order() {
        let root = sample();
        let names: Vec<_> = root.iter().map(|node| node.name.to_string()).collect();
        assert_eq!(names, ["", "a", "sub", "b", "fifo"]);
        assert_eq!(root.file_fragments().count(), 2);
    }

    #[test]
    fn lookup_paths() {
        let root = sample();
        assert_eq!(root.lookup("sub/b").map(|n| n.name()), Some(b"b".as_bstr()));
        assert_eq!(root.lookup("/sub//fifo/").map(|n| n.is_dir()), Some(false));
        assert!(root.lookup("").unwrap().is_dir());
        assert!(root.lookup("a/b").is_none());
        assert!(root.lookup("missing").is_none());
    }

    #[test]
    fn names() {
        assert!(valid_name(b"file.txt"));
        assert!(valid_name(b"..."));
        assert!(!valid_name(b""));
        assert!(!valid_name(b"."));
        assert!(!valid_name(b".."));
        assert!(!valid_name(b"a/b"));
        assert!(!valid_name(b"a\0b"));
    }

    #[test]
    fn directory_size_accounting() {
        let mut remaining = 20;
        take(&mut remaining, 12).unwrap();
        assert_eq!(remaining, 8);
        let err = take(&mut remaining, 9).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupted);
    }

    #[test]
    fn modification_time() {
        let mut node = sample();
        node.modified_time = 86_400;
        assert_eq!(node.modified().unwrap().to_rfc3339(), "1970-01-02T00:00:00+00:00");
    }
}
