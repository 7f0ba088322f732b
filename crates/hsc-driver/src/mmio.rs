//! Memory-mapped HSC register window.
//!
//! The controller decodes a 1 MiB window ([`WINDOW_SIZE`]). On a VFIO
//! platform device that window is region 0: its size and file offset come
//! from `VFIO_DEVICE_GET_REGION_INFO`, then the device fd is `mmap`ed.
//! Anything the region reports beyond the window is left unmapped.

#![allow(clippy::cast_possible_truncation)]

use std::fmt;
use std::fs::File;
use std::os::unix::io::{AsFd, AsRawFd};
use std::ptr::NonNull;

use hsc_chip::regs::WINDOW_SIZE;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};

use crate::error::{HscError, Result};
use crate::regmap::RegisterIo;

/// `_IO(';', 100 + 8)`
const VFIO_DEVICE_GET_REGION_INFO: libc::c_ulong = (b';' as libc::c_ulong) << 8 | (100 + 8);

const REGION_FLAG_READ: u32 = 1 << 0;
const REGION_FLAG_WRITE: u32 = 1 << 1;
const REGION_FLAG_MMAP: u32 = 1 << 2;

/// `struct vfio_region_info`
#[repr(C)]
#[derive(Debug, Default)]
struct RegionInfo {
    argsz: u32,
    flags: u32,
    index: u32,
    cap_offset: u32,
    size: u64,
    offset: u64,
}

impl RegionInfo {
    fn query(device: &File, index: u32) -> Result<Self> {
        let mut info = Self {
            argsz: std::mem::size_of::<Self>() as u32,
            index,
            ..Self::default()
        };
        // SAFETY: the kernel fills at most `argsz` bytes of a struct laid
        // out as `vfio_region_info`; `device` is an open VFIO device fd.
        let ret = unsafe {
            libc::ioctl(
                device.as_raw_fd(),
                VFIO_DEVICE_GET_REGION_INFO as _,
                &raw mut info,
            )
        };
        if ret < 0 {
            return Err(HscError::hardware_error(format!(
                "region {index} info: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(info)
    }
}

/// Bytes of a region that hold the register window.
///
/// The region must at least cover one register and must be readable,
/// writable and mappable.
fn window_len(flags: u32, region_size: u64) -> Result<usize> {
    let need = REGION_FLAG_READ | REGION_FLAG_WRITE | REGION_FLAG_MMAP;
    if flags & need != need {
        return Err(HscError::hardware_error(format!(
            "register region not mappable read/write (flags {flags:#x})"
        )));
    }
    let len = usize::try_from(region_size).unwrap_or(usize::MAX).min(WINDOW_SIZE);
    if len < 4 {
        return Err(HscError::hardware_error(format!(
            "register region too small ({region_size} bytes)"
        )));
    }
    Ok(len & !3)
}

/// The HSC register window mapped into this process.
pub struct MappedRegion {
    base: NonNull<u32>,
    words: usize,
    index: u32,
}

impl fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedRegion")
            .field("base", &self.base)
            .field("size", &self.size())
            .field("index", &self.index)
            .finish()
    }
}

// SAFETY: the mapping is owned by this value and valid in every thread.
unsafe impl Send for MappedRegion {}

// SAFETY: each access is one bounds-checked volatile word load or store;
// ordering between accesses comes from the Regmap lock.
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Map VFIO region `index` of `device`.
    ///
    /// # Errors
    ///
    /// `HardwareError` if the region cannot be queried or mapped, or does
    /// not support read/write `mmap`.
    pub fn map(device: &File, index: u32) -> Result<Self> {
        let info = RegionInfo::query(device, index)?;
        let len = window_len(info.flags, info.size)?;
        if info.size as usize > len {
            tracing::debug!(
                "region {index} is {:#x} bytes, mapping the {len:#x} byte window",
                info.size
            );
        }

        // SAFETY: offset and length come from the kernel's region info and
        // stay within the region; the result is a fresh shared mapping.
        let ptr = unsafe {
            mmap(
                std::ptr::null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                device.as_fd(),
                info.offset,
            )
        }
        .map_err(|e| HscError::hardware_error(format!("mmap region {index}: {e}")))?;

        let base = NonNull::new(ptr.cast::<u32>())
            .ok_or_else(|| HscError::hardware_error("mmap returned NULL"))?;
        tracing::info!("HSC registers at {base:p} ({len:#x} bytes)");

        Ok(Self {
            base,
            words: len / 4,
            index,
        })
    }

    /// Mapped length in bytes.
    pub const fn size(&self) -> usize {
        self.words * 4
    }

    fn word(&self, offset: u32) -> NonNull<u32> {
        let idx = offset as usize / 4;
        assert!(
            offset % 4 == 0 && idx < self.words,
            "register {offset:#x} outside the {:#x} byte window",
            self.size()
        );
        // SAFETY: idx < words, so the result stays inside the mapping.
        unsafe { self.base.add(idx) }
    }
}

impl RegisterIo for MappedRegion {
    /// # Panics
    ///
    /// If `offset` is unaligned or outside the mapping.
    fn read32(&self, offset: u32) -> u32 {
        // SAFETY: `word` returns an aligned pointer into the live mapping.
        unsafe { self.word(offset).as_ptr().read_volatile() }
    }

    /// # Panics
    ///
    /// If `offset` is unaligned or outside the mapping.
    fn write32(&self, offset: u32, value: u32) {
        // SAFETY: as for `read32`.
        unsafe { self.word(offset).as_ptr().write_volatile(value) }
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: base and size describe the mapping made in `map`.
        if let Err(e) = unsafe { munmap(self.base.as_ptr().cast(), self.size()) } {
            tracing::warn!("munmap region {}: {e}", self.index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RWM: u32 = REGION_FLAG_READ | REGION_FLAG_WRITE | REGION_FLAG_MMAP;

    #[test]
    fn window_is_capped_at_controller_size() {
        assert_eq!(window_len(RWM, 0x20_0000).unwrap(), WINDOW_SIZE);
        assert_eq!(window_len(RWM, 0x8000).unwrap(), 0x8000);
        assert_eq!(window_len(RWM, 0x1003).unwrap(), 0x1000);
    }

    #[test]
    fn unmappable_or_tiny_regions_are_rejected() {
        assert!(window_len(REGION_FLAG_READ | REGION_FLAG_WRITE, WINDOW_SIZE as u64).is_err());
        assert!(window_len(REGION_FLAG_MMAP | REGION_FLAG_READ, WINDOW_SIZE as u64).is_err());
        assert!(window_len(RWM, 2).is_err());
    }

    #[test]
    fn ioctl_number_matches_vfio_header() {
        assert_eq!(VFIO_DEVICE_GET_REGION_INFO, 0x3b6c);
    }
}
