//! Atomic operations over slices of shared memory.
//!
//! Buffers in the command-and-control file are written by one process and
//! read by another, so plain loads and stores are not enough; reads and
//! writes that synchronize between processes go through volatile or atomic
//! accesses on cells overlaid on the raw bytes.

use std::mem::size_of;
use std::ops::{Deref, DerefMut};
use std::ptr::{read_volatile, write_volatile};
use std::str;
use std::sync::atomic::{AtomicI64, Ordering};

use memmap::MmapMut;

use crate::util::{BusError, IndexT, Result};

fn bounds_check_slice(slice: &[u8], offset: IndexT, size: IndexT) -> Result<()> {
    if offset < 0 || size < 0 || (slice.len() as IndexT) - offset < size {
        Err(BusError::OutOfBounds)
    } else {
        Ok(())
    }
}

/// Atomic operations on a slice of memory shared with other processes.
///
/// Implemented for `Vec<u8>` and `&mut [u8]` (process-private, mostly for
/// tests and scratch encoding) and for [`MmapMut`] (the real thing).
pub trait AtomicBuffer: Deref<Target = [u8]> + DerefMut<Target = [u8]> {
    /// Check that `size` bytes beginning at `offset` lie within the buffer.
    ///
    /// ```rust
    /// # use mediabus::concurrent::AtomicBuffer;
    /// let buffer = &mut [0u8; 8][..];
    /// assert!(buffer.bounds_check(0, 8).is_ok());
    /// assert!(buffer.bounds_check(1, 8).is_err());
    /// assert!(buffer.bounds_check(-1, 4).is_err());
    /// ```
    fn bounds_check(&self, offset: IndexT, size: IndexT) -> Result<()> {
        bounds_check_slice(self.deref(), offset, size)
    }

    /// Overlay a shared reference to a struct on the buffer.
    ///
    /// NOTE: alignment is the caller's responsibility; misaligned overlays
    /// are undefined behavior.
    fn overlay<T>(&self, offset: IndexT) -> Result<&T>
    where
        T: Sized,
    {
        self.bounds_check(offset, size_of::<T>() as IndexT)
            .map(|_| {
                let offset_ptr = unsafe { self.as_ptr().offset(offset as isize) };
                unsafe { &*(offset_ptr as *const T) }
            })
    }

    /// Overlay a mutable reference to a struct on the buffer.
    ///
    /// NOTE: alignment is the caller's responsibility; misaligned overlays
    /// are undefined behavior.
    fn overlay_mut<T>(&mut self, offset: IndexT) -> Result<&mut T>
    where
        T: Sized,
    {
        self.bounds_check(offset, size_of::<T>() as IndexT)
            .map(|_| {
                let offset_ptr = unsafe { self.as_mut_ptr().offset(offset as isize) };
                unsafe { &mut *(offset_ptr as *mut T) }
            })
    }

    /// Copy a value out of the buffer with a volatile read.
    fn overlay_volatile<T>(&self, offset: IndexT) -> Result<T>
    where
        T: Copy,
    {
        self.bounds_check(offset, size_of::<T>() as IndexT)
            .map(|_| {
                let offset_ptr = unsafe { self.as_ptr().offset(offset as isize) };
                unsafe { read_volatile(offset_ptr as *const T) }
            })
    }

    /// Write a value into the buffer with a volatile write.
    fn write_volatile<T>(&mut self, offset: IndexT, val: T) -> Result<()>
    where
        T: Copy,
    {
        self.bounds_check(offset, size_of::<T>() as IndexT)
            .map(|_| {
                let offset_ptr = unsafe { self.as_mut_ptr().offset(offset as isize) };
                unsafe { write_volatile(offset_ptr as *mut T, val) };
            })
    }

    /// Atomic fetch-and-add on a 64-bit cell.
    ///
    /// ```rust
    /// # use mediabus::concurrent::AtomicBuffer;
    /// let buf = vec![0u8; 8];
    /// assert_eq!(buf.get_and_add_i64(0, 1), Ok(0));
    /// assert_eq!(buf.get_and_add_i64(0, 1), Ok(1));
    /// ```
    fn get_and_add_i64(&self, offset: IndexT, value: i64) -> Result<i64> {
        self.overlay::<AtomicI64>(offset)
            .map(|a| a.fetch_add(value, Ordering::SeqCst))
    }

    /// Atomic compare-and-set on a 64-bit cell. Returns `Ok(true)` if the
    /// update was applied.
    fn compare_and_set_i64(&self, offset: IndexT, expected: i64, update: i64) -> Result<bool> {
        self.overlay::<AtomicI64>(offset).map(|a| {
            a.compare_exchange(expected, update, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        })
    }

    /// Atomic store of an `i64` value with release semantics. Usable through
    /// a shared reference, unlike [`put_i64_ordered`](Self::put_i64_ordered).
    fn put_i64_atomic(&self, offset: IndexT, value: i64) -> Result<()> {
        self.overlay::<AtomicI64>(offset)
            .map(|a| a.store(value, Ordering::Release))
    }

    /// Volatile read of an `i64` value
    fn get_i64_volatile(&self, offset: IndexT) -> Result<i64> {
        self.overlay_volatile::<i64>(offset)
    }

    /// Plain read of an `i64` value
    fn get_i64(&self, offset: IndexT) -> Result<i64> {
        self.overlay::<i64>(offset).map(|i| *i)
    }

    /// Volatile write of an `i64` value
    fn put_i64_ordered(&mut self, offset: IndexT, value: i64) -> Result<()> {
        self.write_volatile::<i64>(offset, value)
    }

    /// Plain write of an `i64` value
    fn put_i64(&mut self, offset: IndexT, value: i64) -> Result<()> {
        self.overlay_mut::<i64>(offset).map(|i| *i = value)
    }

    /// Volatile read of an `i32` value
    fn get_i32_volatile(&self, offset: IndexT) -> Result<i32> {
        self.overlay_volatile::<i32>(offset)
    }

    /// Plain read of an `i32` value
    fn get_i32(&self, offset: IndexT) -> Result<i32> {
        self.overlay::<i32>(offset).map(|i| *i)
    }

    /// Volatile write of an `i32` value
    fn put_i32_ordered(&mut self, offset: IndexT, value: i32) -> Result<()> {
        self.write_volatile::<i32>(offset, value)
    }

    /// Plain write of an `i32` value
    fn put_i32(&mut self, offset: IndexT, value: i32) -> Result<()> {
        self.overlay_mut::<i32>(offset).map(|i| *i = value)
    }

    /// Copy bytes from a plain slice into this buffer. No synchronization.
    fn put_slice(
        &mut self,
        index: IndexT,
        source: &[u8],
        source_index: IndexT,
        len: IndexT,
    ) -> Result<()> {
        self.bounds_check(index, len)?;
        bounds_check_slice(source, source_index, len)?;

        let index = index as usize;
        let source_index = source_index as usize;
        let len = len as usize;

        self[index..index + len].copy_from_slice(&source[source_index..source_index + len]);
        Ok(())
    }

    /// Copy bytes from another atomic buffer into this one. No
    /// synchronization.
    fn put_bytes<B>(&mut self, index: IndexT, source: &B, source_index: IndexT, len: IndexT) -> Result<()>
    where
        B: AtomicBuffer,
    {
        self.bounds_check(index, len)?;
        source.bounds_check(source_index, len)?;

        let index = index as usize;
        let source_index = source_index as usize;
        let len = len as usize;

        self[index..index + len].copy_from_slice(&source[source_index..source_index + len]);
        Ok(())
    }

    /// Fill a region of the buffer with a single byte value.
    fn set_memory(&mut self, offset: IndexT, length: usize, value: u8) -> Result<()> {
        self.bounds_check(offset, length as IndexT).map(|_| unsafe {
            self.as_mut_ptr()
                .offset(offset as isize)
                .write_bytes(value, length)
        })
    }

    /// Read a length-prefixed UTF-8 string from the buffer. The prefix is an
    /// `i32` byte count, immediately followed by the bytes.
    fn get_string(&self, offset: IndexT) -> Result<&str> {
        let length = self.get_i32(offset)?;
        self.bounds_check(offset + size_of::<i32>() as IndexT, length)?;

        let begin = (offset as usize) + size_of::<i32>();
        let end = begin + length as usize;
        str::from_utf8(&self[begin..end]).map_err(|_| BusError::IllegalState)
    }

    /// Write a length-prefixed UTF-8 string into the buffer. Returns the
    /// number of payload bytes written (excluding the prefix).
    fn put_string(&mut self, offset: IndexT, value: &str) -> Result<i32> {
        let bytes = value.as_bytes();
        let length = bytes.len() as IndexT;
        self.bounds_check(offset, size_of::<i32>() as IndexT + length)?;

        self.put_i32(offset, length)?;
        self.put_slice(offset + size_of::<i32>() as IndexT, bytes, 0, length)?;
        Ok(length)
    }

    /// Total number of bytes in this buffer
    fn capacity(&self) -> IndexT {
        self.len() as IndexT
    }
}

impl AtomicBuffer for Vec<u8> {}

impl AtomicBuffer for &mut [u8] {}

impl AtomicBuffer for MmapMut {}

/// An owned file mapping restricted to a window. Sections of the
/// command-and-control file do not fall on page boundaries, so each section
/// view maps the whole file and exposes only its own bytes.
pub struct MappedRegion {
    map: MmapMut,
    offset: usize,
    len: usize,
}

impl MappedRegion {
    /// Wrap `map`, exposing `len` bytes beginning at `offset`.
    pub fn new(map: MmapMut, offset: usize, len: usize) -> Result<Self> {
        if offset + len > map.len() {
            return Err(BusError::OutOfBounds);
        }
        Ok(MappedRegion { map, offset, len })
    }
}

impl Deref for MappedRegion {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.map[self.offset..self.offset + self.len]
    }
}

impl DerefMut for MappedRegion {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.map[self.offset..self.offset + self.len]
    }
}

impl AtomicBuffer for MappedRegion {}

#[cfg(test)]
mod tests {
    use super::AtomicBuffer;

    #[test]
    fn string_round_trip() {
        let mut buffer = vec![0u8; 64];
        let written = buffer.put_string(8, "bus:ipc?alias=events").unwrap();
        assert_eq!(written, 20);
        assert_eq!(buffer.get_string(8), Ok("bus:ipc?alias=events"));
    }

    #[test]
    fn string_rejects_truncated_buffer() {
        let mut buffer = vec![0u8; 16];
        assert!(buffer.put_string(8, "much too long to fit").is_err());

        // A corrupt length prefix must not read past the end
        buffer.put_i32(0, 1024).unwrap();
        assert!(buffer.get_string(0).is_err());
    }

    #[test]
    fn atomic_store_visible_to_volatile_read() {
        let buffer = vec![0u8; 8];
        buffer.put_i64_atomic(0, 42).unwrap();
        assert_eq!(buffer.get_i64_volatile(0), Ok(42));
    }
}
