//! Metadata blocks, and the tables stored in them
//!
//! Everything but file contents lives in metadata blocks: the inode and directory tables are read
//! as byte streams spanning consecutive blocks, while the id and fragment tables are arrays of
//! fixed size records found through an index of block offsets.

use byteorder::{ByteOrder, LittleEndian};
use snafu::{ensure, IntoError, OptionExt, ResultExt};
use std::collections::hash_map::{Entry, HashMap};
use std::convert::TryFrom;
use std::{cmp, fmt, mem, slice};
use zerocopy::{AsBytes, FromBytes};

use crate::compression::Decompressor;
use crate::errors::*;
use crate::layout;

/// A single uncompressed metadata block
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Metablock {
    pub data: Vec<u8>,
    /// Offset of the block which follows this one on disk
    pub next: u64,
}

pub(crate) fn read_metablock<D: Decompressor>(
    data: &[u8],
    offset: u64,
    decompressor: &mut D,
) -> Result<Metablock, ErrorInner> {
    let header: repr::metablock::Header = layout::read_at(data, offset, "metadata block header")?;
    let size = usize::from(header.size());
    ensure!(
        size != 0 && size <= repr::metablock::SIZE,
        BadMetablockSize {
            offset,
            actual: size,
        }
    );
    let body_offset = offset + mem::size_of::<repr::metablock::Header>() as u64;
    let raw = layout::slice_at(data, body_offset, size, "metadata block")?;

    let data = if header.compressed() {
        let mut buf = vec![0; repr::metablock::SIZE];
        let len = decompressor
            .decompress(raw, &mut buf)
            .context(Decompress { offset })?;
        buf.truncate(len);
        buf
    } else {
        raw.to_vec()
    };
    Ok(Metablock {
        data,
        next: body_offset + size as u64,
    })
}

/// A two level table of fixed size records, fully loaded
#[derive(Clone)]
pub struct Table<T> {
    name: &'static str,
    entries: Vec<T>,
}

impl<T> Table<T> {
    pub(crate) fn empty(name: &'static str) -> Self {
        Self {
            name,
            entries: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> slice::Iter<'_, T> {
        self.entries.iter()
    }

    /// Like [`get`](Self::get), but fails with an out of bounds error naming the table
    pub(crate) fn lookup(&self, index: u64) -> Result<&T, ErrorInner> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.entries.get(i))
            .ok_or(ErrorInner::IndexOutOfBounds {
                table: self.name,
                index,
                count: self.entries.len() as u64,
            })
    }
}

impl<T: fmt::Debug> fmt::Debug for Table<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("len", &self.entries.len())
            .finish()
    }
}

impl<'a, T> IntoIterator for &'a Table<T> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A byte range which metadata blocks of one table must start in
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Region {
    pub start: u64,
    pub limit: u64,
}

/// A read position inside a metadata table
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Cursor {
    region: Region,
    /// Absolute offset of the current block's header
    block: u64,
    /// Offset inside the uncompressed current block
    offset: usize,
}

impl Cursor {
    pub fn new(region: Region, position: repr::metablock::Ref) -> Result<Self, ErrorInner> {
        let block = region
            .start
            .checked_add(u64::from(position.block_start()))
            .ok_or(ErrorInner::MetadataOutOfBounds {
                offset: u64::MAX,
                start: region.start,
                limit: region.limit,
            })?;
        Ok(Self {
            region,
            block,
            offset: usize::from(position.start_offset()),
        })
    }
}

/// Reads metadata from an archive, remembering every block it has decoded
pub(crate) struct MetadataReader<'a, D> {
    data: &'a [u8],
    decompressor: D,
    blocks: HashMap<u64, Metablock>,
}

impl<'a, D: Decompressor> MetadataReader<'a, D> {
    pub fn new(data: &'a [u8], decompressor: D) -> Self {
        Self {
            data,
            decompressor,
            blocks: HashMap::new(),
        }
    }

    fn block(&mut self, offset: u64) -> Result<&Metablock, ErrorInner> {
        match self.blocks.entry(offset) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let block = read_metablock(self.data, offset, &mut self.decompressor)?;
                Ok(entry.insert(block))
            }
        }
    }

    /// Fill `buf` from the stream at `cursor`, moving on to following blocks as needed
    pub fn read(&mut self, cursor: &mut Cursor, buf: &mut [u8]) -> Result<(), ErrorInner> {
        let mut filled = 0;
        while filled < buf.len() {
            let Region { start, limit } = cursor.region;
            ensure!(
                cursor.block >= start && cursor.block < limit,
                MetadataOutOfBounds {
                    offset: cursor.block,
                    start,
                    limit,
                }
            );
            let block = self.block(cursor.block)?;
            let len = block.data.len();
            ensure!(
                cursor.offset <= len,
                InvalidMetadata {
                    err: format!(
                        "offset {} is past the end of the {} byte metadata block at {}",
                        cursor.offset, len, cursor.block
                    ),
                }
            );
            if cursor.offset == len {
                cursor.block = block.next;
                cursor.offset = 0;
                continue;
            }
            let n = cmp::min(len - cursor.offset, buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&block.data[cursor.offset..cursor.offset + n]);
            filled += n;
            cursor.offset += n;
        }
        Ok(())
    }

    pub fn read_struct<T: FromBytes + AsBytes>(
        &mut self,
        cursor: &mut Cursor,
    ) -> Result<T, ErrorInner> {
        let mut value = T::new_zeroed();
        self.read(cursor, value.as_bytes_mut())?;
        Ok(value)
    }

    pub fn read_vec(&mut self, cursor: &mut Cursor, len: usize) -> Result<Vec<u8>, ErrorInner> {
        let mut buf = vec![0; len];
        self.read(cursor, &mut buf)?;
        Ok(buf)
    }

    /// Load `count` records of a two level table whose block index starts at `index_start`
    pub fn read_table<T: FromBytes>(
        &mut self,
        name: &'static str,
        index_start: u64,
        count: u64,
    ) -> Result<Table<T>, ErrorInner> {
        if count == 0 {
            return Ok(Table::empty(name));
        }
        let record_size = mem::size_of::<T>() as u64;
        let block_size = repr::metablock::SIZE as u64;
        let total = count
            .checked_mul(record_size)
            .context(InvalidMetadata {
                err: format!("{} table with {} entries", name, count),
            })?;
        let block_count = (total + block_size - 1) / block_size;
        let index_len = usize::try_from(block_count * 8).map_err(|_| ErrorInner::InvalidMetadata {
            err: format!("{} table with {} blocks", name, block_count),
        })?;
        let index = layout::slice_at(self.data, index_start, index_len, name)?;

        let mut entries = Vec::new();
        entries
            .try_reserve_exact(usize::try_from(count).unwrap_or(usize::MAX))
            .map_err(|e| Allocation { what: name, count }.into_error(e))?;

        let mut remaining = total;
        for location in index.chunks_exact(8).map(LittleEndian::read_u64) {
            let expected = cmp::min(remaining, block_size) as usize;
            let block = read_metablock(self.data, location, &mut self.decompressor)?;
            ensure!(
                block.data.len() == expected,
                UnexpectedMetablockSize {
                    offset: location,
                    actual: block.data.len(),
                    expected,
                }
            );
            for record in block.data.chunks_exact(record_size as usize) {
                entries.push(layout::decode(record, location, name)?);
            }
            remaining -= expected as u64;
        }
        Ok(Table { name, entries })
    }
}
