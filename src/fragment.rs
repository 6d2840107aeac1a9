//! Locating fragment blocks and fingerprinting their stored bytes
//!
//! Fragment blocks are hashed exactly as they are stored, still compressed, so two archives
//! produced with the same compressor settings share digests for identical fragment blocks.

use sha2::{Digest, Sha256};
use snafu::OptionExt;
use std::convert::TryFrom;
use std::ops::Deref;
use std::{fmt, panic, thread};

use crate::errors::*;
use crate::read::Archive;

/// Bytes fed to the hash engine at a time
const HASH_CHUNK: usize = 64 * 1024;

/// Where a fragment block is stored, and what it holds
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FragmentResult {
    /// The fragment block stores no bytes
    Sparse,
    Resolved {
        /// Lowercase hex SHA-256 of the stored bytes
        digest: String,
        /// Archive offset of the first stored byte
        offset: u64,
        /// Number of bytes stored
        size: u64,
    },
}

impl FragmentResult {
    pub fn is_sparse(&self) -> bool {
        matches!(self, FragmentResult::Sparse)
    }

    pub fn digest(&self) -> Option<&str> {
        match self {
            FragmentResult::Sparse => None,
            FragmentResult::Resolved { digest, .. } => Some(digest),
        }
    }
}

/// A reusable SHA-256 engine
///
/// The engine is reset every time a digest is produced, so nothing carries over from one
/// fragment to the next.
#[derive(Clone, Default)]
pub struct FragmentHasher {
    engine: Sha256,
}

impl FragmentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lowercase hex digest of `bytes`
    pub fn hash(&mut self, bytes: &[u8]) -> String {
        for chunk in bytes.chunks(HASH_CHUNK) {
            self.engine.update(chunk);
        }
        hex::encode(self.engine.finalize_reset())
    }
}

impl fmt::Debug for FragmentHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FragmentHasher").finish()
    }
}

impl<D: Deref<Target = [u8]>> Archive<D> {
    pub fn fragment_count(&self) -> u32 {
        self.inner.fragments.len() as u32
    }

    /// The raw fragment table entry at `index`
    pub fn fragment(&self, index: u32) -> Result<repr::fragment::Entry> {
        Ok(*self.inner.fragments.lookup(u64::from(index))?)
    }

    /// Find the bytes of fragment block `index` and hash them
    pub fn locate_fragment(&self, index: u32) -> Result<FragmentResult> {
        self.locate_fragment_with(&mut FragmentHasher::new(), index)
    }

    /// Like [`locate_fragment`](Self::locate_fragment), reusing `hasher`
    pub fn locate_fragment_with(
        &self,
        hasher: &mut FragmentHasher,
        index: u32,
    ) -> Result<FragmentResult> {
        let entry = self.inner.fragments.lookup(u64::from(index))?;
        let size = entry.size();
        if size.is_sparse() {
            return Ok(FragmentResult::Sparse);
        }

        let data = self.data();
        let start = entry.start();
        let len = size.size();
        let file_size = data.len() as u64;
        let out_of_range = FragmentOutOfRange {
            index,
            start,
            size: len,
            file_size,
        };
        let end = start
            .checked_add(u64::from(len))
            .filter(|&end| end <= file_size)
            .context(out_of_range)?;
        let bytes = usize::try_from(start)
            .ok()
            .and_then(|start| data.get(start..start + len as usize))
            .context(out_of_range)?;

        let region = self.data_region();
        if end > region.end {
            slog::warn!(self.inner.logger, "Fragment block runs past the end of the data region";
                "index" => index,
                "start" => start,
                "size" => len,
                "data_end" => region.end);
        }

        Ok(FragmentResult::Resolved {
            digest: hasher.hash(bytes),
            offset: start,
            size: u64::from(len),
        })
    }
}

impl<D: Deref<Target = [u8]> + Send + Sync> Archive<D> {
    /// Locate every fragment block, using one worker per cpu
    pub fn locate_all(&self) -> Vec<Result<FragmentResult>> {
        self.locate_all_with_threads(num_cpus::get())
    }

    /// Locate every fragment block on up to `threads` workers, returning results in index order
    pub fn locate_all_with_threads(&self, threads: usize) -> Vec<Result<FragmentResult>> {
        let count = self.fragment_count();
        if count == 0 {
            return Vec::new();
        }
        let threads = threads.clamp(1, count as usize) as u32;
        let per_thread = (count + threads - 1) / threads;
        slog::debug!(self.inner.logger, "Hashing fragment blocks";
            "count" => count,
            "threads" => threads);

        thread::scope(|scope| {
            let workers: Vec<_> = (0..count)
                .step_by(per_thread as usize)
                .map(|first| {
                    let last = count.min(first + per_thread);
                    scope.spawn(move || {
                        let mut hasher = FragmentHasher::new();
                        (first..last)
                            .map(|index| self.locate_fragment_with(&mut hasher, index))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            let mut results = Vec::with_capacity(count as usize);
            for worker in workers {
                match worker.join() {
                    Ok(chunk) => results.extend(chunk),
                    Err(payload) => panic::resume_unwind(payload),
                }
            }
            results
        })
    }
}
