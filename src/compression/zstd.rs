use std::fmt;
use std::io;
use zstd::bulk as zbulk;

use super::Decompressor;

pub struct Zstd(zbulk::Decompressor<'static>);

impl Zstd {
    pub fn new() -> io::Result<Self> {
        Ok(Zstd(zbulk::Decompressor::new()?))
    }
}

impl Decompressor for Zstd {
    fn decompress(&mut self, src: &[u8], dst: &mut [u8]) -> io::Result<usize> {
        self.0.decompress_to_buffer(src, dst)
    }
}

impl fmt::Debug for Zstd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Zstd").finish()
    }
}
