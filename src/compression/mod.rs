use repr::compression::Id as CompressionId;
use std::{fmt, io};

mod config;

pub use config::{CompressorConfig, Options};

#[cfg(feature = "gzip")]
pub mod gzip;

#[cfg(feature = "lz4")]
pub mod lz4;

#[cfg(feature = "zstd")]
pub mod zstd;

#[repr(u16)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Kind {
    ZLib = CompressionId::GZIP.0,
    Lzma = CompressionId::LZMA.0,
    Lzo = CompressionId::LZO.0,
    Xz = CompressionId::XZ.0,
    Lz4 = CompressionId::LZ4.0,
    Zstd = CompressionId::ZSTD.0,
    Unknown = 0,
}

/// Uncompress a single block into `dst`, returning the uncompressed length
///
/// Fails if `dst` is too small to hold the uncompressed block.
pub trait Decompressor {
    fn decompress(&mut self, src: &[u8], dst: &mut [u8]) -> io::Result<usize>;
}

impl<D: Decompressor + ?Sized> Decompressor for &mut D {
    fn decompress(&mut self, src: &[u8], dst: &mut [u8]) -> io::Result<usize> {
        (**self).decompress(src, dst)
    }
}

/// A decompressor for any of the compression kinds this crate was built with
#[derive(Debug)]
pub enum AnyCodec {
    #[cfg(feature = "gzip")]
    Gzip(gzip::Gzip),
    #[cfg(feature = "lz4")]
    Lz4(lz4::Lz4),
    #[cfg(feature = "zstd")]
    Zstd(zstd::Zstd),
}

impl AnyCodec {
    pub fn new(kind: Kind) -> io::Result<AnyCodec> {
        let result = match kind {
            #[cfg(feature = "gzip")]
            Kind::ZLib => AnyCodec::Gzip(gzip::Gzip::new()),
            #[cfg(feature = "lz4")]
            Kind::Lz4 => AnyCodec::Lz4(lz4::Lz4),
            #[cfg(feature = "zstd")]
            Kind::Zstd => AnyCodec::Zstd(zstd::Zstd::new()?),
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    format!("no {} decompressor available", kind),
                ))
            }
        };
        Ok(result)
    }

    pub fn kind(&self) -> Kind {
        match *self {
            #[cfg(feature = "gzip")]
            AnyCodec::Gzip(_) => Kind::ZLib,
            #[cfg(feature = "lz4")]
            AnyCodec::Lz4(_) => Kind::Lz4,
            #[cfg(feature = "zstd")]
            AnyCodec::Zstd(_) => Kind::Zstd,
        }
    }
}

impl Decompressor for AnyCodec {
    fn decompress(&mut self, src: &[u8], dst: &mut [u8]) -> io::Result<usize> {
        match self {
            #[cfg(feature = "gzip")]
            AnyCodec::Gzip(gzip) => gzip.decompress(src, dst),
            #[cfg(feature = "lz4")]
            AnyCodec::Lz4(lz4) => lz4.decompress(src, dst),
            #[cfg(feature = "zstd")]
            AnyCodec::Zstd(zstd) => zstd.decompress(src, dst),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Kind {
    pub fn from_id(id: CompressionId) -> Kind {
        match id {
            CompressionId::GZIP => Kind::ZLib,
            CompressionId::LZMA => Kind::Lzma,
            CompressionId::LZO => Kind::Lzo,
            CompressionId::XZ => Kind::Xz,
            CompressionId::LZ4 => Kind::Lz4,
            CompressionId::ZSTD => Kind::Zstd,
            _ => Kind::Unknown,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Kind::ZLib => "gzip",
            Kind::Lzma => "lzma",
            Kind::Lzo => "lzo",
            Kind::Xz => "xz",
            Kind::Lz4 => "lz4",
            Kind::Zstd => "zstd",
            Kind::Unknown => "unknown",
        }
    }

    /// Whether a decompressor for this kind was compiled in
    pub fn supported(self) -> bool {
        match self {
            Kind::ZLib => cfg!(feature = "gzip"),
            Kind::Lzma => cfg!(feature = "lzma"),
            Kind::Lzo => cfg!(feature = "lzo"),
            Kind::Xz => cfg!(feature = "xz"),
            Kind::Lz4 => cfg!(feature = "lz4"),
            Kind::Zstd => cfg!(feature = "zstd"),
            Kind::Unknown => false,
        }
    }
}
