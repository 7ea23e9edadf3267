//! Page-aligned host buffers shared with the card.
//!
//! The DMA engine can use a host allocation in place only when it starts on a
//! page boundary; otherwise the runtime silently bounces through its own
//! copy. [`AlignedBuffer`] guarantees the alignment and a fixed length.

use std::alloc::{self, Layout};
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use crate::accel::AccelError;

/// Alignment of every host buffer handed to the device.
pub const DMA_ALIGNMENT: usize = 4096;

/// Fixed-length, zero-initialised, 4 KiB-aligned `f32` buffer.
pub struct AlignedBuffer {
    ptr: NonNull<f32>,
    len: usize,
    layout: Layout,
}

impl AlignedBuffer {
    /// Allocate `len` zeroed elements.
    pub fn zeroed(len: usize) -> Result<Self, AccelError> {
        if len == 0 {
            return Err(AccelError::Allocation("zero-length buffer".into()));
        }
        let bytes = len
            .checked_mul(std::mem::size_of::<f32>())
            .ok_or_else(|| AccelError::Allocation(format!("{} elements overflow usize", len)))?;
        let layout = Layout::from_size_align(bytes, DMA_ALIGNMENT)
            .map_err(|e| AccelError::Allocation(e.to_string()))?;

        // SAFETY: `layout` has non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) } as *mut f32;
        let ptr = NonNull::new(raw)
            .ok_or_else(|| AccelError::Allocation(format!("out of memory for {} bytes", bytes)))?;

        Ok(Self { ptr, len, layout })
    }

    /// Size of the buffer in bytes.
    pub fn size_bytes(&self) -> usize {
        self.layout.size()
    }
}

impl Deref for AlignedBuffer {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        // SAFETY: `ptr` points to `len` initialised f32s owned by `self`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for AlignedBuffer {
    fn deref_mut(&mut self) -> &mut [f32] {
        // SAFETY: as above, and `&mut self` gives exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        // SAFETY: allocated in `zeroed` with exactly this layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr() as *mut u8, self.layout) }
    }
}

// The buffer owns its allocation outright; access follows the usual borrow rules.
unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}

impl std::fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("len", &self.len)
            .field("size_bytes", &self.size_bytes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_and_zeroing() {
        let buf = AlignedBuffer::zeroed(15 * 1000).unwrap();
        assert_eq!(buf.as_ptr() as usize % DMA_ALIGNMENT, 0);
        assert_eq!(buf.len(), 15_000);
        assert_eq!(buf.size_bytes(), 60_000);
        assert!(buf.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_write_then_read() {
        let mut buf = AlignedBuffer::zeroed(4).unwrap();
        buf.copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(&buf[..], &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_zero_length_rejected() {
        assert!(matches!(
            AlignedBuffer::zeroed(0),
            Err(AccelError::Allocation(_))
        ));
    }
}
