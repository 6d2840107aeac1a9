use flate2::FlushDecompress;
use std::fmt;
use std::io;

use super::Decompressor;

/// zlib streams, as written by the squashfs `gzip` compressor
pub struct Gzip {
    decompressor: flate2::Decompress,
}

impl Default for Gzip {
    fn default() -> Self {
        Self::new()
    }
}

impl Gzip {
    pub fn new() -> Self {
        Self {
            decompressor: flate2::Decompress::new(true),
        }
    }

    fn decompressor(&mut self) -> &mut flate2::Decompress {
        let decompressor = &mut self.decompressor;
        decompressor.reset(true);
        decompressor
    }
}

impl Decompressor for Gzip {
    fn decompress(&mut self, src: &[u8], dst: &mut [u8]) -> io::Result<usize> {
        let decompressor = self.decompressor();
        loop {
            let in_offset = min_mem(decompressor.total_in(), src.len());
            let out_offset = min_mem(decompressor.total_out(), dst.len());

            let status = decompressor.decompress(
                &src[in_offset..],
                &mut dst[out_offset..],
                FlushDecompress::Finish,
            )?;
            match status {
                flate2::Status::StreamEnd => break,
                flate2::Status::Ok
                    if min_mem(decompressor.total_in(), src.len()) != in_offset
                        || min_mem(decompressor.total_out(), dst.len()) != out_offset =>
                {
                    continue
                }
                _ => return Err(io::ErrorKind::UnexpectedEof.into()),
            }
        }
        Ok(decompressor.total_out() as usize)
    }
}

impl fmt::Debug for Gzip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gzip").finish()
    }
}

fn min_mem(file_size: u64, mem_size: usize) -> usize {
    if file_size < mem_size as u64 {
        file_size as usize
    } else {
        mem_size
    }
}
