use std::io;

use super::Decompressor;

/// Raw lz4 blocks, as written by the squashfs `lz4` compressor in its legacy format
#[derive(Debug, Default, Copy, Clone)]
pub struct Lz4;

impl Decompressor for Lz4 {
    fn decompress(&mut self, src: &[u8], dst: &mut [u8]) -> io::Result<usize> {
        lz4_flex::block::decompress_into(src, dst)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}
