//! Checked decoding of the fixed layout structures in [`repr`] from archive bytes

use snafu::OptionExt;
use std::convert::TryFrom;
use std::mem;
use zerocopy::FromBytes;

use crate::errors::*;

/// The bytes of `data` from `offset` onwards, empty if `offset` is past the end
fn tail(data: &[u8], offset: u64) -> &[u8] {
    usize::try_from(offset)
        .ok()
        .and_then(|offset| data.get(offset..))
        .unwrap_or(&[])
}

/// Decode a `T` stored at `offset`
pub(crate) fn read_at<T: FromBytes>(
    data: &[u8],
    offset: u64,
    what: &'static str,
) -> Result<T, ErrorInner> {
    let available = tail(data, offset);
    T::read_from_prefix(available).context(ShortStructure {
        what,
        offset,
        expected: mem::size_of::<T>(),
        actual: available.len(),
    })
}

/// Decode a `T` from the start of `data`, which was found at `offset`
pub(crate) fn decode<T: FromBytes>(
    data: &[u8],
    offset: u64,
    what: &'static str,
) -> Result<T, ErrorInner> {
    T::read_from_prefix(data).context(ShortStructure {
        what,
        offset,
        expected: mem::size_of::<T>(),
        actual: data.len(),
    })
}

/// Borrow exactly `len` bytes stored at `offset`
pub(crate) fn slice_at<'a>(
    data: &'a [u8],
    offset: u64,
    len: usize,
    what: &'static str,
) -> Result<&'a [u8], ErrorInner> {
    let available = tail(data, offset);
    available.get(..len).context(ShortStructure {
        what,
        offset,
        expected: len,
        actual: available.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::byteorder::U32;

    #[test]
    fn short_buffers_are_corrupt() {
        let data = [0x68, 0x73, 0x71, 0x73, 0x01];
        let magic: U32<repr::LE> = read_at(&data, 0, "magic").unwrap();
        assert_eq!(magic.get(), repr::superblock::MAGIC);

        let err = read_at::<U32<repr::LE>>(&data, 2, "magic").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupted);
        assert!(matches!(
            err,
            ErrorInner::ShortStructure {
                offset: 2,
                expected: 4,
                actual: 3,
                ..
            }
        ));

        let err = read_at::<repr::superblock::Superblock>(&data, 0, "superblock").unwrap_err();
        assert!(matches!(err, ErrorInner::ShortStructure { expected: 96, .. }));
    }

    #[test]
    fn offsets_past_the_end() {
        let data = [0u8; 8];
        assert_eq!(slice_at(&data, 4, 4, "tail").unwrap().len(), 4);
        let err = slice_at(&data, u64::MAX, 1, "tail").unwrap_err();
        assert!(matches!(err, ErrorInner::ShortStructure { actual: 0, .. }));
    }
}
