#![doc = include_str!("../README.md")]

use core::ops::{Add, Sub};
use std::io::{self, Seek, SeekFrom, Write};

use log::{debug, trace};
use num_traits::{ConstOne, ConstZero};

#[must_use]
#[doc(hidden)]
pub fn type_name_of_expr<T>(_: T) -> &'static str {
    core::any::type_name::<T>()
}

/// Converts an integer to another integer type
///
/// # Panics
///
/// If the conversion fails.
#[macro_export]
macro_rules! num_cast {
    ($t: ty, $v: expr) => {
        <$t>::try_from($v).expect(&format!(
            "Integer Overflow ({} to {})",
            core::any::type_name::<$t>(),
            $crate::type_name_of_expr($v),
        ))
    };
}

/// Returns the number of logical blocks needed to hold `bytes` bytes.
///
/// A trailing partial block counts as a full block, so the result times
/// `block_size` is always greater than or equal to `bytes`. Returns `None` if
/// `block_size` is zero.
#[must_use]
pub fn bytes_to_lba(bytes: u64, block_size: u64) -> Option<u64> {
    let full = bytes.checked_div(block_size)?;
    let rem = bytes % block_size;

    Some(if rem == 0 { full } else { full + 1 })
}

/// Returns the byte offset of a logical block, or `None` on overflow.
#[must_use]
pub fn lba_to_bytes(lba: u64, block_size: u64) -> Option<u64> {
    lba.checked_mul(block_size)
}

/// Returns the last index of a range, from its first index and its length.
/// An array of 31 LBAs starting at LBA 2 ends on LBA 32.
///
/// # Panics
///
/// If start is negative, or if the size is lower than or equal to zero.
pub fn start_size_to_end<T>(start: T, size: T) -> T
where
    T: Add<Output = T> + ConstOne + ConstZero + Ord + Sub<Output = T>,
{
    assert!(start >= T::ZERO, "Negative start offset");
    assert!(size >= T::ONE, "Size too small");

    (start + size) - T::ONE
}

/// Positioned writer over a disk image of fixed capacity.
///
/// The writer does not allocate the backing storage: the caller hands over
/// anything that is [`Write`] and [`Seek`] (a [`std::fs::File`] already sized
/// with [`std::fs::File::set_len`], a `&File`, or an in-memory
/// [`std::io::Cursor`]) along with its capacity in bytes. Every record is
/// written in full at an absolute offset or the write fails.
#[derive(Debug)]
pub struct ImageWriter<W> {
    inner: W,
    capacity: u64,
}

impl<W> ImageWriter<W>
where
    W: Seek + Write,
{
    /// Creates a new writer over `inner`, which holds `capacity` bytes
    #[must_use]
    pub fn new(inner: W, capacity: u64) -> Self {
        Self { inner, capacity }
    }

    /// Returns the image capacity in bytes
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Writes `bytes` at the absolute byte `offset` of the image.
    ///
    /// # Errors
    ///
    /// Returns an [`std::io::Error`] if the record doesn't fit in the image, if
    /// seeking or writing to the underlying storage fails, or if the storage
    /// didn't end up at the end of the record once written.
    pub fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<(), io::Error> {
        let len = num_cast!(u64, bytes.len());
        let end = offset.checked_add(len).ok_or(io::Error::new(
            io::ErrorKind::InvalidInput,
            "Record offset overflows",
        ))?;

        if end > self.capacity {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Record goes past the end of the image",
            ));
        }

        debug!("Writing {len} bytes at offset {offset:#x}");

        let pos = self.inner.seek(SeekFrom::Start(offset))?;
        if pos != offset {
            return Err(io::Error::other("Seek landed at the wrong offset"));
        }

        self.inner.write_all(bytes)?;

        let pos = self.inner.stream_position()?;
        if pos != end {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "Record was only partially written",
            ));
        }

        trace!("Record written, now at offset {pos:#x}");

        Ok(())
    }

    /// Flushes the underlying storage
    ///
    /// # Errors
    ///
    /// Returns an [`std::io::Error`] if the underlying storage can't be flushed.
    pub fn flush(&mut self) -> Result<(), io::Error> {
        self.inner.flush()
    }

    /// Returns the underlying storage
    #[must_use]
    pub fn into_inner(self) -> W {
        self.inner
    }
}
