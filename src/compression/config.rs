use repr::compression::options::{
    self, GzipStrategies, Lz4Flags, LzoAlgorithm, XzFilters, LZ4_LEGACY,
};
use snafu::{ensure, OptionExt};
use std::mem;
use zerocopy::FromBytes;

use super::Kind;
use crate::errors::*;
use crate::layout;

/// zstd's `ZSTD_maxCLevel()`
const ZSTD_MAX_LEVEL: u32 = 22;
const ZSTD_DEFAULT_LEVEL: u32 = 15;
const LZO_DEFAULT_LEVEL: u32 = 8;
const LZO_MAX_LEVEL: u32 = 9;

/// How the archive was compressed
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CompressorConfig {
    pub kind: Kind,
    pub block_size: u32,
    pub options: Options,
}

/// Algorithm specific settings, either defaults or read from the compressor options block
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Options {
    Gzip {
        level: u32,
        window_size: u16,
        strategies: GzipStrategies,
    },
    Lzma,
    Lzo {
        algorithm: LzoAlgorithm,
        level: u32,
    },
    Xz {
        dictionary_size: u32,
        filters: XzFilters,
    },
    Lz4 {
        flags: Lz4Flags,
    },
    Zstd {
        level: u32,
    },
    None,
}

impl CompressorConfig {
    /// The configuration used when the archive carries no options block
    pub fn new(kind: Kind, block_size: u32) -> Self {
        let options = match kind {
            Kind::ZLib => Options::Gzip {
                level: 9,
                window_size: 15,
                strategies: GzipStrategies::empty(),
            },
            Kind::Lzma => Options::Lzma,
            Kind::Lzo => Options::Lzo {
                algorithm: LzoAlgorithm::default(),
                level: LZO_DEFAULT_LEVEL,
            },
            Kind::Xz => Options::Xz {
                dictionary_size: block_size,
                filters: XzFilters::empty(),
            },
            Kind::Lz4 => Options::Lz4 {
                flags: Lz4Flags::empty(),
            },
            Kind::Zstd => Options::Zstd {
                level: ZSTD_DEFAULT_LEVEL,
            },
            Kind::Unknown => Options::None,
        };
        Self {
            kind,
            block_size,
            options,
        }
    }

    /// Replace the options with those stored after the superblock
    ///
    /// On failure the configuration is left untouched.
    pub(crate) fn read_options(&mut self, data: &[u8]) -> Result<(), ErrorInner> {
        let options = match self.kind {
            Kind::ZLib => {
                let raw: options::Gzip = read_block(data)?;
                let level = raw.compression_level.get();
                let window_size = raw.window_size.get();
                ensure!(
                    (1..=9).contains(&level),
                    UnsupportedOption {
                        err: format!("gzip compression level {}", level),
                    }
                );
                ensure!(
                    (8..=15).contains(&window_size),
                    UnsupportedOption {
                        err: format!("gzip window size {}", window_size),
                    }
                );
                let strategies = GzipStrategies::from_bits(raw.strategies.get()).context(
                    UnsupportedOption {
                        err: format!("gzip strategies {:#x}", raw.strategies.get()),
                    },
                )?;
                Options::Gzip {
                    level,
                    window_size,
                    strategies,
                }
            }
            Kind::Xz => {
                let raw: options::Xz = read_block(data)?;
                let filters = XzFilters::from_bits(raw.executable_filters.get()).context(
                    UnsupportedOption {
                        err: format!("xz filters {:#x}", raw.executable_filters.get()),
                    },
                )?;
                let dictionary_size = raw.dictionary_size.get();
                ensure!(
                    valid_dictionary_size(dictionary_size),
                    InvalidMetadata {
                        err: format!("xz dictionary size {}", dictionary_size),
                    }
                );
                Options::Xz {
                    dictionary_size,
                    filters,
                }
            }
            Kind::Lz4 => {
                let raw: options::Lz4 = read_block(data)?;
                ensure!(
                    raw.version.get() == LZ4_LEGACY,
                    UnsupportedOption {
                        err: format!("lz4 version {}", raw.version.get()),
                    }
                );
                let flags = Lz4Flags::from_bits(raw.flags.get()).context(UnsupportedOption {
                    err: format!("lz4 flags {:#x}", raw.flags.get()),
                })?;
                Options::Lz4 { flags }
            }
            Kind::Zstd => {
                let raw: options::Zstd = read_block(data)?;
                let level = raw.compression_level.get();
                ensure!(
                    (1..=ZSTD_MAX_LEVEL).contains(&level),
                    UnsupportedOption {
                        err: format!("zstd compression level {}", level),
                    }
                );
                Options::Zstd { level }
            }
            Kind::Lzo => {
                let raw: options::Lzo = read_block(data)?;
                let algorithm = LzoAlgorithm(raw.algorithm.get());
                let level = raw.level.get();
                ensure!(
                    algorithm.0 <= LzoAlgorithm::X_999.0,
                    UnsupportedOption {
                        err: format!("lzo algorithm {}", algorithm.0),
                    }
                );
                let max_level = if algorithm == LzoAlgorithm::X_999 {
                    LZO_MAX_LEVEL
                } else {
                    0
                };
                ensure!(
                    level <= max_level,
                    UnsupportedOption {
                        err: format!("lzo level {} for algorithm {}", level, algorithm.0),
                    }
                );
                Options::Lzo { algorithm, level }
            }
            Kind::Lzma | Kind::Unknown => {
                return UnsupportedOption {
                    err: format!("{} does not take compressor options", self.kind),
                }
                .fail()
            }
        };
        self.options = options;
        Ok(())
    }
}

/// Read the options block following the superblock, which must be stored uncompressed and hold
/// exactly one `T`
fn read_block<T: FromBytes>(data: &[u8]) -> Result<T, ErrorInner> {
    let offset = repr::superblock::SIZE as u64;
    let header: repr::metablock::Header = layout::read_at(data, offset, "compressor options")?;
    let size = mem::size_of::<T>();
    ensure!(
        !header.compressed() && usize::from(header.size()) == size,
        InvalidMetadata {
            err: format!(
                "compressor options header {:#06x} does not describe {} uncompressed bytes",
                header.0.get(),
                size
            ),
        }
    );
    layout::read_at(
        data,
        offset + mem::size_of::<repr::metablock::Header>() as u64,
        "compressor options",
    )
}

/// xz dictionaries are either a power of two, or the sum of two adjacent powers of two
fn valid_dictionary_size(size: u32) -> bool {
    let x = size & size.wrapping_sub(1);
    x == 0 || size == x | (x >> 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::AsBytes;

    fn with_options(header: u16, body: &[u8]) -> Vec<u8> {
        let mut data = vec![0; repr::superblock::SIZE];
        data.extend_from_slice(&header.to_le_bytes());
        data.extend_from_slice(body);
        data
    }

    fn options_block<T: AsBytes>(options: &T) -> Vec<u8> {
        let body = options.as_bytes();
        with_options(0x8000 | body.len() as u16, body)
    }

    #[test]
    fn defaults() {
        let config = CompressorConfig::new(Kind::Xz, 0x2_0000);
        assert_eq!(
            config.options,
            Options::Xz {
                dictionary_size: 0x2_0000,
                filters: XzFilters::empty()
            }
        );
        let config = CompressorConfig::new(Kind::ZLib, 0x2_0000);
        assert!(matches!(config.options, Options::Gzip { level: 9, .. }));
    }

    #[test]
    fn gzip_options() {
        let mut raw = options::Gzip::new_zeroed();
        raw.compression_level.set(6);
        raw.window_size.set(12);
        raw.strategies.set(GzipStrategies::FILTERED.bits());

        let mut config = CompressorConfig::new(Kind::ZLib, 4096);
        config.read_options(&options_block(&raw)).unwrap();
        assert_eq!(
            config.options,
            Options::Gzip {
                level: 6,
                window_size: 12,
                strategies: GzipStrategies::FILTERED,
            }
        );
    }

    #[test]
    fn invalid_options_leave_defaults() {
        let mut raw = options::Gzip::new_zeroed();
        raw.compression_level.set(12);
        raw.window_size.set(15);

        let mut config = CompressorConfig::new(Kind::ZLib, 4096);
        let err = config.read_options(&options_block(&raw)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert_eq!(config, CompressorConfig::new(Kind::ZLib, 4096));
    }

    #[test]
    fn options_must_be_uncompressed_and_exact() {
        let raw = options::Zstd::new_zeroed();
        let mut config = CompressorConfig::new(Kind::Zstd, 4096);

        let data = with_options(4, raw.as_bytes());
        let err = config.read_options(&data).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupted);

        let data = with_options(0x8000 | 8, &[0; 8]);
        let err = config.read_options(&data).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupted);

        let data = with_options(0x8000 | 4, &[0; 2]);
        let err = config.read_options(&data).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupted);
    }

    #[test]
    fn zstd_and_lz4_options() {
        let mut zstd = options::Zstd::new_zeroed();
        zstd.compression_level.set(19);
        let mut config = CompressorConfig::new(Kind::Zstd, 4096);
        config.read_options(&options_block(&zstd)).unwrap();
        assert_eq!(config.options, Options::Zstd { level: 19 });

        let mut lz4 = options::Lz4::new_zeroed();
        lz4.version.set(LZ4_LEGACY);
        lz4.flags.set(Lz4Flags::HIGH_COMPRESSION.bits());
        let mut config = CompressorConfig::new(Kind::Lz4, 4096);
        config.read_options(&options_block(&lz4)).unwrap();
        assert_eq!(
            config.options,
            Options::Lz4 {
                flags: Lz4Flags::HIGH_COMPRESSION
            }
        );

        lz4.version.set(2);
        let err = config.read_options(&options_block(&lz4)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn lzo_levels_depend_on_algorithm() {
        let mut lzo = options::Lzo::new_zeroed();
        lzo.algorithm.set(LzoAlgorithm::X_1.0);
        lzo.level.set(3);
        let mut config = CompressorConfig::new(Kind::Lzo, 4096);
        assert!(config.read_options(&options_block(&lzo)).is_err());

        lzo.algorithm.set(LzoAlgorithm::X_999.0);
        config.read_options(&options_block(&lzo)).unwrap();
        assert_eq!(
            config.options,
            Options::Lzo {
                algorithm: LzoAlgorithm::X_999,
                level: 3
            }
        );
    }

    #[test]
    fn xz_dictionary_sizes() {
        assert!(valid_dictionary_size(8192));
        assert!(valid_dictionary_size(3 << 13));
        assert!(!valid_dictionary_size(5 << 13));

        let mut xz = options::Xz::new_zeroed();
        xz.dictionary_size.set(5 << 13);
        let mut config = CompressorConfig::new(Kind::Xz, 4096);
        let err = config.read_options(&options_block(&xz)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupted);
    }

    #[test]
    fn lzma_has_no_options() {
        let mut config = CompressorConfig::new(Kind::Lzma, 4096);
        let err = config.read_options(&with_options(0x8000, &[])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }
}
