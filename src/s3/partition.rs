//! Splits object bodies into the byte ranges used by multipart uploads and copies.

use bytes::Bytes;
use bytesize::MIB;
use derive_more::{AsRef, Display, Into};
use serde::{Deserialize, Serialize};
use std::num::TryFromIntError;
use thiserror::Error;

/// The smallest part S3 accepts for any part other than the last one, 5 MiB.
///
/// The partitioner does not enforce this limit. Conformance suites need to
/// build undersized uploads on purpose to check that the server rejects them
/// with `EntityTooSmall` on completion.
pub const MIN_S3_PART_SIZE: i64 = 5 * MIB as i64;

/// Part size used when a caller does not pick one.
pub const DEFAULT_PART_SIZE: i64 = 5 * MIB as i64;

/// Errors raised while partitioning, always before any request is sent.
#[derive(Debug, Error)]
pub enum PartitionError {
    #[error("part_size must be greater than 0, part_size was {0}")]
    InvalidPartSize(i64),
    #[error("total_size must not be negative, total_size was {0}")]
    NegativeTotalSize(i64),
    #[error(transparent)]
    ByteRange(#[from] ByteRangeError),
    #[error(transparent)]
    TryFromIntError(#[from] TryFromIntError),
}

/// Represents a valid part size for partitioning.
///
/// Any strictly positive size is accepted; see [MIN_S3_PART_SIZE] for the
/// limit the server applies.
#[derive(Debug, Display, Into, AsRef, Clone, Copy, PartialEq, Eq)]
#[into(owned, ref, ref_mut)]
pub struct PartSize(i64);

impl Default for PartSize {
    fn default() -> Self {
        Self(DEFAULT_PART_SIZE)
    }
}

impl TryFrom<i64> for PartSize {
    type Error = PartitionError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if value <= 0 {
            Err(PartitionError::InvalidPartSize(value))
        } else {
            Ok(PartSize(value))
        }
    }
}

impl TryFrom<usize> for PartSize {
    type Error = PartitionError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        PartSize::try_from(i64::try_from(value)?)
    }
}

/// Errors that can occur when creating a `ByteRange`.
#[derive(Debug, Error)]
pub enum ByteRangeError {
    #[error("The start byte must be less than or equal to the end byte \n start: {0}, end: {1}")]
    InvalidRange(i64, i64),
    #[error("The start byte must be non-negative: \n start {0}")]
    NegativeStart(i64),
}

/// An inclusive byte range, `start..=end`.
///
/// Used both for `x-amz-copy-source-range` on copy-part requests and for
/// ranged GETs when verifying copied content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange(i64, i64);

impl TryFrom<(i64, i64)> for ByteRange {
    type Error = ByteRangeError;

    fn try_from(value: (i64, i64)) -> Result<Self, Self::Error> {
        let (start, end) = value;

        if start < 0 {
            Err(ByteRangeError::NegativeStart(start))
        } else if start > end {
            Err(ByteRangeError::InvalidRange(start, end))
        } else {
            Ok(ByteRange(start, end))
        }
    }
}

impl ByteRange {
    pub fn start(&self) -> i64 {
        self.0
    }

    /// Offset of the last byte in the range (inclusive).
    pub fn end(&self) -> i64 {
        self.1
    }

    /// Number of bytes covered. Never zero.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> i64 {
        self.1 - self.0 + 1
    }

    /// Generates a byte range string for S3 operations.
    ///
    /// ```
    /// use s3_conformance::s3::ByteRange;
    ///
    /// let range = ByteRange::try_from((500, 999)).unwrap();
    /// assert_eq!(range.as_string(), "bytes=500-999");
    /// ```
    pub fn as_string(&self) -> String {
        let ByteRange(start, end) = self;
        format!("bytes={}-{}", start, end)
    }
}

/// One part of a multipart upload: a 1-based part number and the bytes it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartRange {
    pub part_number: i32,
    pub byte_range: ByteRange,
}

impl PartRange {
    pub fn start(&self) -> i64 {
        self.byte_range.start()
    }

    pub fn end(&self) -> i64 {
        self.byte_range.end()
    }

    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> i64 {
        self.byte_range.len()
    }

    /// The same byte range under a different part number.
    pub(crate) fn renumbered(self, part_number: i32) -> Self {
        PartRange {
            part_number,
            ..self
        }
    }
}

fn part_count(total_size: i64, part_size: &PartSize) -> i64 {
    let part_size = *part_size.as_ref();
    total_size / part_size + i64::from(total_size % part_size != 0)
}

/// Splits `total_size` bytes into contiguous part ranges of `part_size` bytes.
///
/// The last range holds the remainder. A `total_size` of zero yields no ranges;
/// a zero-length multipart upload is a distinct case for the caller to handle.
///
/// ```
/// use s3_conformance::s3::partition;
///
/// let ranges = partition(12, 5).unwrap();
/// let spans: Vec<_> = ranges.iter().map(|r| (r.part_number, r.start(), r.end())).collect();
/// assert_eq!(spans, vec![(1, 0, 4), (2, 5, 9), (3, 10, 11)]);
/// ```
pub fn partition(total_size: i64, part_size: i64) -> Result<Vec<PartRange>, PartitionError> {
    let part_size = PartSize::try_from(part_size)?;
    partition_with(total_size, &part_size)
}

/// [partition] with an already validated [PartSize].
pub fn partition_with(
    total_size: i64,
    part_size: &PartSize,
) -> Result<Vec<PartRange>, PartitionError> {
    if total_size < 0 {
        return Err(PartitionError::NegativeTotalSize(total_size));
    }
    let size = *part_size.as_ref();
    (1..=part_count(total_size, part_size))
        .map(|part_number| {
            let start = (part_number - 1) * size;
            let end = std::cmp::min(start.saturating_add(size - 1), total_size - 1);
            Ok(PartRange {
                part_number: i32::try_from(part_number)?,
                byte_range: ByteRange::try_from((start, end))?,
            })
        })
        .collect()
}

/// Partitions `body` and pairs every range with its slice of the body.
///
/// The slices share the underlying buffer.
pub fn split_body(
    body: &Bytes,
    part_size: &PartSize,
) -> Result<Vec<(PartRange, Bytes)>, PartitionError> {
    partition_with(i64::try_from(body.len())?, part_size)?
        .into_iter()
        .map(|range| {
            let start = usize::try_from(range.start())?;
            let end = usize::try_from(range.end())?;
            Ok((range, body.slice(start..=end)))
        })
        .collect()
}

#[cfg(any(test, feature = "test-utils"))]
pub mod arbitrary {
    use proptest::prelude::*;

    use super::PartSize;
    use bytesize::MIB;

    impl Arbitrary for PartSize {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
            (1..=16 * MIB as i64)
                .prop_map(|size| PartSize::try_from(size).unwrap())
                .boxed()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use bytesize::KIB;
    use proptest::{prop_assert, prop_assert_eq};
    use test_strategy::proptest;

    #[test]
    fn test_zero_size_is_empty() {
        let ranges = partition(0, 5).unwrap();
        assert!(ranges.is_empty());
    }

    #[test]
    fn test_invalid_part_size() {
        assert_matches!(partition(10, 0), Err(PartitionError::InvalidPartSize(0)));
        assert_matches!(partition(10, -3), Err(PartitionError::InvalidPartSize(-3)));
    }

    #[test]
    fn test_negative_total_size() {
        assert_matches!(partition(-1, 5), Err(PartitionError::NegativeTotalSize(-1)));
    }

    #[test]
    fn test_remainder_part() {
        let total = 5 * MIB as i64 + 100 * KIB as i64;
        let ranges = partition(total, DEFAULT_PART_SIZE).unwrap();
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].len(), DEFAULT_PART_SIZE);
        assert_eq!(ranges[1].len(), 100 * KIB as i64);
        assert_eq!(ranges[1].end(), total - 1);
    }

    #[test]
    fn test_evenly_divisible() {
        let ranges = partition(10, 5).unwrap();
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[1].len(), 5);
    }

    #[test]
    fn test_split_body_slices() {
        let body = Bytes::from_static(b"abcdefghijk");
        let parts = split_body(&body, &PartSize::try_from(4_i64).unwrap()).unwrap();
        let chunks: Vec<_> = parts.iter().map(|(_, b)| b.as_ref()).collect();
        assert_eq!(chunks, vec![&b"abcd"[..], &b"efgh"[..], &b"ijk"[..]]);
        assert_eq!(parts[2].0.part_number, 3);
    }

    #[test]
    fn test_byte_range_string() {
        let range = ByteRange::try_from((0, 499)).unwrap();
        assert_eq!(range.as_string(), "bytes=0-499");
        assert_eq!(range.len(), 500);
    }

    #[test]
    fn test_part_size_from_usize() {
        assert_eq!(*PartSize::try_from(7_usize).unwrap().as_ref(), 7);
        assert_matches!(
            PartSize::try_from(0_usize),
            Err(PartitionError::InvalidPartSize(0))
        );
    }

    #[proptest]
    fn test_partition_covers_total(
        #[strategy(1_i64..=64 * MIB as i64)] total_size: i64,
        part_size: PartSize,
    ) {
        let ranges = partition_with(total_size, &part_size)?;
        let size = *part_size.as_ref();
        let n = ranges.len() as i64;

        prop_assert_eq!(n, (total_size + size - 1) / size);
        let mut expected_start = 0;
        for (i, range) in ranges.iter().enumerate() {
            prop_assert_eq!(range.part_number as usize, i + 1);
            prop_assert_eq!(range.start(), expected_start);
            prop_assert!(range.end() >= range.start());
            expected_start = range.end() + 1;
        }
        prop_assert_eq!(expected_start, total_size);
        let last = ranges.last().unwrap();
        prop_assert_eq!(last.len(), total_size - size * (n - 1));
    }

    #[proptest]
    fn valid_byte_range(#[strategy(0..i64::MAX)] start: i64, #[strategy(0..i64::MAX)] end: i64) {
        if start <= end {
            let range = ByteRange::try_from((start, end))?;
            prop_assert_eq!(range.start(), start);
            prop_assert_eq!(range.end(), end);
        } else {
            let range = ByteRange::try_from((start, end));
            prop_assert!(
                matches!(range, Err(ByteRangeError::InvalidRange(s, e)) if s == start && e == end)
            );
        }
    }

    #[proptest]
    fn invalid_negative_start_byte_range(
        #[strategy(i64::MIN..0)] start: i64,
        #[strategy(0..i64::MAX)] end: i64,
    ) {
        let range = ByteRange::try_from((start, end));
        prop_assert!(matches!(range, Err(ByteRangeError::NegativeStart(s)) if s == start));
    }
}
