//! DMA-coherent host memory.
//!
//! A [`CoherentBuffer`] is page-aligned, zeroed host memory that the
//! controller can address. The device address comes from an
//! [`IovaMapper`]: the IOMMU on VFIO platforms, a bump allocator with a
//! registry in the software backend. The buffer unmaps before it frees.
//!
//! Device and CPU share the memory without explicit cache maintenance, so
//! byte access goes through [`CoherentBuffer::read_at`] and
//! [`CoherentBuffer::write_at`] rather than long-lived slices.

use std::alloc::Layout;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::error::{HscError, Result};

/// Page size used for DMA buffer alignment.
pub const DMA_PAGE_SIZE: usize = 4096;

/// Assigns device addresses to host memory.
pub trait IovaMapper: fmt::Debug + Send + Sync {
    /// Make `size` bytes at `vaddr` visible to the device.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` when the address space is exhausted, or a
    /// hardware error when the platform refuses the mapping.
    fn map(&self, vaddr: NonNull<u8>, size: usize) -> Result<u64>;

    /// Remove a mapping created by [`IovaMapper::map`].
    fn unmap(&self, iova: u64, size: usize);
}

/// Allocator handing out [`CoherentBuffer`]s through one mapper.
#[derive(Debug, Clone)]
pub struct DmaAllocator {
    mapper: Arc<dyn IovaMapper>,
}

impl DmaAllocator {
    /// Create an allocator over `mapper`.
    pub fn new(mapper: Arc<dyn IovaMapper>) -> Self {
        Self { mapper }
    }

    /// Allocate `size` bytes, rounded up to whole pages.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if host memory or device address space is
    /// exhausted.
    pub fn alloc(&self, size: usize) -> Result<CoherentBuffer> {
        CoherentBuffer::new(Arc::clone(&self.mapper), size)
    }
}

/// Host memory with a device address.
pub struct CoherentBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
    len: usize,
    iova: u64,
    mapper: Arc<dyn IovaMapper>,
}

impl fmt::Debug for CoherentBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoherentBuffer")
            .field("ptr", &format_args!("{:p}", self.ptr))
            .field("len", &self.len)
            .field("iova", &format_args!("{:#x}", self.iova))
            .finish()
    }
}

// SAFETY: Send - the buffer owns its allocation; the mapping is process-wide.
unsafe impl Send for CoherentBuffer {}

// SAFETY: Sync - all byte access copies through raw pointers with explicit bounds, and callers
// partition the buffer (ring discipline) so concurrent readers and the device never overlap.
unsafe impl Sync for CoherentBuffer {}

impl CoherentBuffer {
    fn new(mapper: Arc<dyn IovaMapper>, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(HscError::invalid_argument("zero-sized DMA buffer"));
        }
        let aligned = size.div_ceil(DMA_PAGE_SIZE) * DMA_PAGE_SIZE;
        let layout = Layout::from_size_align(aligned, DMA_PAGE_SIZE)
            .map_err(|_| HscError::OutOfMemory { size })?;

        // SAFETY: layout has non-zero size and power-of-two alignment; memory is released in
        // Drop (or below on error) with the same layout.
        let raw = unsafe { std::alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(HscError::OutOfMemory { size })?;

        let iova = match mapper.map(ptr, aligned) {
            Ok(iova) => iova,
            Err(e) => {
                // SAFETY: ptr was allocated above with this layout and never handed out.
                unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
                return Err(e);
            }
        };

        tracing::debug!("DMA buffer: vaddr={ptr:p}, iova={iova:#x}, size={size:#x}");

        Ok(Self {
            ptr,
            layout,
            len: size,
            iova,
            mapper,
        })
    }

    /// Device address of the first byte.
    pub const fn phys(&self) -> u64 {
        self.iova
    }

    /// Usable length in bytes.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer is empty (never true for an allocated buffer).
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn check(&self, offset: usize, n: usize) -> Result<()> {
        match offset.checked_add(n) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(HscError::invalid_argument(format!(
                "DMA buffer access {offset:#x}+{n:#x} beyond {:#x}",
                self.len
            ))),
        }
    }

    /// Copy `buf.len()` bytes starting at `offset` out of the buffer.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the range leaves the buffer.
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        self.check(offset, buf.len())?;
        // SAFETY: range checked against len; source and destination do not overlap since buf
        // is a distinct Rust allocation.
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.ptr.as_ptr().add(offset),
                buf.as_mut_ptr(),
                buf.len(),
            );
        }
        Ok(())
    }

    /// Copy `data` into the buffer at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the range leaves the buffer.
    pub fn write_at(&self, offset: usize, data: &[u8]) -> Result<()> {
        self.check(offset, data.len())?;
        // SAFETY: range checked against len; data is a distinct allocation.
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.ptr.as_ptr().add(offset),
                data.len(),
            );
        }
        Ok(())
    }
}

impl Drop for CoherentBuffer {
    fn drop(&mut self) {
        self.mapper.unmap(self.iova, self.layout.size());
        // SAFETY: ptr came from alloc_zeroed with self.layout; the device mapping is gone.
        unsafe { std::alloc::dealloc(self.ptr.as_ptr(), self.layout) };
        tracing::debug!("Freed DMA buffer at iova={:#x}", self.iova);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::software::SoftwareMapper;

    #[test]
    fn alloc_is_zeroed_and_bounds_checked() {
        let alloc = DmaAllocator::new(Arc::new(SoftwareMapper::default()));
        let buf = alloc.alloc(100).unwrap();
        assert_eq!(buf.len(), 100);
        assert_eq!(buf.phys() % DMA_PAGE_SIZE as u64, 0);

        let mut out = [0xffu8; 100];
        buf.read_at(0, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0));

        buf.write_at(96, &[1, 2, 3, 4]).unwrap();
        assert!(buf.write_at(97, &[1, 2, 3, 4]).is_err());
        assert!(buf.read_at(usize::MAX, &mut out[..1]).is_err());
    }

    #[test]
    fn mapper_limit_reports_out_of_memory() {
        let alloc = DmaAllocator::new(Arc::new(SoftwareMapper::with_limit(8192)));
        let _a = alloc.alloc(4096).unwrap();
        let _b = alloc.alloc(4096).unwrap();
        assert!(matches!(alloc.alloc(1), Err(HscError::OutOfMemory { .. })));
    }

    #[test]
    fn drop_returns_capacity() {
        let alloc = DmaAllocator::new(Arc::new(SoftwareMapper::with_limit(4096)));
        drop(alloc.alloc(4096).unwrap());
        assert!(alloc.alloc(4096).is_ok());
    }
}
