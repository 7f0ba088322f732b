//! VFIO platform backend
//!
// FFI/ioctl casts are intentional - VFIO API requires specific types
#![allow(clippy::cast_possible_truncation)]
//! The HSC is a platform device (`socionext,uniphier-*-hsc`). Bound to
//! `vfio-platform`, it gives userspace:
//!
//! - region 0: the 1 MiB register window
//! - IOMMU mappings for ring buffers and microcode images
//! - IRQ 0 (TS input) and IRQ 1 (DMA) as eventfds
//!
//! # Setup
//!
//! ```bash
//! echo vfio-platform > /sys/bus/platform/devices/$DEV/driver_override
//! echo $DEV > /sys/bus/platform/drivers/$OLD/unbind
//! echo $DEV > /sys/bus/platform/drivers_probe
//! sudo chown $USER /dev/vfio/$IOMMU_GROUP
//! ```
//!
//! or `hsc bind-vfio $DEV`.
//!
//! ```text
//! ┌──────────┐   ioctl   ┌──────────┐        ┌──────────┐
//! │  Chip    │──────────▶│  VFIO    │───────▶│  IOMMU   │
//! └──────────┘           └──────────┘        └──────────┘
//!      │ mmap region 0        │ eventfd           │
//!      ▼                      ▼                   ▼
//! ┌──────────┐           ┌──────────┐        ┌──────────┐
//! │ Regmap   │           │ IrqThread│        │ Ring /   │
//! │          │           │          │        │ ucode    │
//! └──────────┘           └──────────┘        └──────────┘
//! ```

use std::fs::{File, OpenOptions};
use std::os::fd::{AsFd, OwnedFd};
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::path::Path;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hsc_chip::SocVariant;
use rustix::event::{eventfd, poll, EventfdFlags, PollFd, PollFlags};
use rustix::mm::{mlock, munlock};

use crate::backend::{BackendType, HscBackend};
use crate::coherent::{DmaAllocator, IovaMapper};
use crate::error::{HscError, Result};
use crate::irq::{IrqLine, IrqSource};
use crate::mmio::MappedRegion;
use crate::regmap::{RegisterIo, Regmap};

/// VFIO ioctl numbers (from Linux kernel headers)
///
/// These are calculated as: _IO(';', base + offset)
mod ioctls {
    use std::os::raw::c_ulong;

    /// Helper to create ioctl number: _IO(type, nr) = (type << 8) | nr
    const fn io(ty: u8, nr: u8) -> c_ulong {
        ((ty as c_ulong) << 8) | (nr as c_ulong)
    }

    pub const VFIO_TYPE: u8 = b';';
    pub const VFIO_BASE: u8 = 100;

    // Container
    pub const VFIO_GET_API_VERSION: c_ulong = io(VFIO_TYPE, VFIO_BASE);
    pub const VFIO_CHECK_EXTENSION: c_ulong = io(VFIO_TYPE, VFIO_BASE + 1);
    pub const VFIO_SET_IOMMU: c_ulong = io(VFIO_TYPE, VFIO_BASE + 2);

    // Group
    pub const VFIO_GROUP_GET_STATUS: c_ulong = io(VFIO_TYPE, VFIO_BASE + 3);
    pub const VFIO_GROUP_SET_CONTAINER: c_ulong = io(VFIO_TYPE, VFIO_BASE + 4);
    pub const VFIO_GROUP_GET_DEVICE_FD: c_ulong = io(VFIO_TYPE, VFIO_BASE + 6);

    // Device
    pub const VFIO_DEVICE_GET_INFO: c_ulong = io(VFIO_TYPE, VFIO_BASE + 7);
    pub const VFIO_DEVICE_SET_IRQS: c_ulong = io(VFIO_TYPE, VFIO_BASE + 10);

    // IOMMU DMA mapping
    pub const VFIO_IOMMU_MAP_DMA: c_ulong = io(VFIO_TYPE, VFIO_BASE + 13);
    pub const VFIO_IOMMU_UNMAP_DMA: c_ulong = io(VFIO_TYPE, VFIO_BASE + 14);

    pub const VFIO_API_VERSION: i32 = 0;
    pub const VFIO_TYPE1V2_IOMMU: u32 = 3;

    pub const VFIO_GROUP_FLAGS_VIABLE: u32 = 1 << 0;

    pub const VFIO_DMA_MAP_FLAG_READ: u32 = 1 << 0;
    pub const VFIO_DMA_MAP_FLAG_WRITE: u32 = 1 << 1;

    pub const VFIO_DEVICE_FLAGS_PLATFORM: u32 = 1 << 2;

    pub const VFIO_IRQ_SET_DATA_NONE: u32 = 1 << 0;
    pub const VFIO_IRQ_SET_DATA_EVENTFD: u32 = 1 << 2;
    pub const VFIO_IRQ_SET_ACTION_UNMASK: u32 = 1 << 4;
    pub const VFIO_IRQ_SET_ACTION_TRIGGER: u32 = 1 << 5;
}

#[repr(C)]
#[derive(Debug, Default)]
struct VfioDeviceInfo {
    argsz: u32,
    flags: u32,
    num_regions: u32,
    num_irqs: u32,
}

#[repr(C)]
#[derive(Debug, Default)]
struct VfioGroupStatus {
    argsz: u32,
    flags: u32,
}

#[repr(C)]
#[derive(Debug, Default)]
struct VfioDmaMap {
    argsz: u32,
    flags: u32,
    vaddr: u64,
    iova: u64,
    size: u64,
}

#[repr(C)]
#[derive(Debug, Default)]
struct VfioDmaUnmap {
    argsz: u32,
    flags: u32,
    iova: u64,
    size: u64,
}

/// `struct vfio_irq_set` with room for one eventfd.
#[repr(C)]
#[derive(Debug, Default)]
struct VfioIrqSet {
    argsz: u32,
    flags: u32,
    index: u32,
    start: u32,
    count: u32,
    data: i32,
}

/// First IOVA handed out (256 MiB).
const IOVA_BASE: u64 = 0x1000_0000;

fn last_os_error(what: &str) -> HscError {
    HscError::hardware_error(format!("{what}: {}", std::io::Error::last_os_error()))
}

/// IOMMU mapper over a VFIO container.
#[derive(Debug)]
pub struct VfioMapper {
    container: Arc<File>,
    next_iova: AtomicU64,
}

impl VfioMapper {
    fn new(container: Arc<File>) -> Self {
        Self {
            container,
            next_iova: AtomicU64::new(IOVA_BASE),
        }
    }
}

impl IovaMapper for VfioMapper {
    fn map(&self, vaddr: NonNull<u8>, size: usize) -> Result<u64> {
        // SAFETY: mlock pins the pages for DMA. Invariants: (1) vaddr from a live allocation of
        // at least size bytes (CoherentBuffer); (2) the range is unlocked again in unmap().
        unsafe { mlock(vaddr.as_ptr().cast(), size) }
            .map_err(|e| HscError::hardware_error(format!("Failed to lock DMA memory: {e}")))?;

        let iova = self.next_iova.fetch_add(size as u64, Ordering::Relaxed);
        let dma_map = VfioDmaMap {
            argsz: std::mem::size_of::<VfioDmaMap>() as u32,
            flags: ioctls::VFIO_DMA_MAP_FLAG_READ | ioctls::VFIO_DMA_MAP_FLAG_WRITE,
            vaddr: vaddr.as_ptr() as u64,
            iova,
            size: size as u64,
        };

        // SAFETY: VFIO_IOMMU_MAP_DMA reads dma_map. Invariants: (1) container fd has an IOMMU
        // set; (2) vaddr/size describe pinned memory owned by the caller; (3) layout matches
        // struct vfio_iommu_type1_dma_map.
        let ret = unsafe {
            libc::ioctl(
                self.container.as_raw_fd(),
                ioctls::VFIO_IOMMU_MAP_DMA as _,
                &raw const dma_map,
            )
        };

        if ret < 0 {
            let err = last_os_error("Failed to map DMA");
            // SAFETY: the range was locked above and is not mapped.
            unsafe {
                let _ = munlock(vaddr.as_ptr().cast(), size);
            }
            tracing::warn!("{err}");
            return Err(if std::io::Error::last_os_error().raw_os_error() == Some(libc::ENOMEM) {
                HscError::OutOfMemory { size }
            } else {
                err
            });
        }

        tracing::debug!("DMA map: vaddr={vaddr:p}, iova={iova:#x}, size={size:#x}");
        Ok(iova)
    }

    fn unmap(&self, iova: u64, size: usize) {
        let dma_unmap = VfioDmaUnmap {
            argsz: std::mem::size_of::<VfioDmaUnmap>() as u32,
            flags: 0,
            iova,
            size: size as u64,
        };

        // SAFETY: VFIO_IOMMU_UNMAP_DMA reads dma_unmap. Invariants: (1) container fd valid;
        // (2) iova/size from a successful map(); (3) runs before the memory is freed.
        let ret = unsafe {
            libc::ioctl(
                self.container.as_raw_fd(),
                ioctls::VFIO_IOMMU_UNMAP_DMA as _,
                &raw const dma_unmap,
            )
        };
        if ret < 0 {
            tracing::error!("{}", last_os_error("Failed to unmap DMA"));
        }
        // The pages are unlocked by dealloc; munlock needs the host address, which the
        // IOMMU mapping no longer tracks.
    }
}

fn set_irqs(device: &File, index: u32, flags: u32, count: u32, data: i32) -> Result<()> {
    let set = VfioIrqSet {
        argsz: std::mem::size_of::<VfioIrqSet>() as u32,
        flags,
        index,
        start: 0,
        count,
        data,
    };
    // SAFETY: VFIO_DEVICE_SET_IRQS reads set. Invariants: (1) device fd valid; (2) argsz covers
    // the header plus one i32 of data; (3) layout matches struct vfio_irq_set.
    let ret = unsafe {
        libc::ioctl(
            device.as_raw_fd(),
            ioctls::VFIO_DEVICE_SET_IRQS as _,
            &raw const set,
        )
    };
    if ret < 0 {
        return Err(last_os_error(&format!("VFIO_DEVICE_SET_IRQS index {index}")));
    }
    Ok(())
}

/// Platform interrupt delivered through an eventfd.
///
/// Platform interrupts are level triggered and auto-masked by VFIO;
/// [`IrqSource::unmask`] re-arms the line after the handler ran.
#[derive(Debug)]
pub struct VfioIrq {
    device: Arc<File>,
    index: u32,
    event: OwnedFd,
}

impl VfioIrq {
    fn new(device: Arc<File>, index: u32) -> Result<Self> {
        let event = eventfd(0, EventfdFlags::CLOEXEC)
            .map_err(|e| HscError::hardware_error(format!("eventfd: {e}")))?;
        set_irqs(
            &device,
            index,
            ioctls::VFIO_IRQ_SET_DATA_EVENTFD | ioctls::VFIO_IRQ_SET_ACTION_TRIGGER,
            1,
            event.as_fd().as_raw_fd(),
        )?;
        tracing::debug!("IRQ {index} wired to eventfd");
        Ok(Self {
            device,
            index,
            event,
        })
    }
}

impl IrqSource for VfioIrq {
    fn wait(&self, timeout: Duration) -> Result<bool> {
        let ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let mut fds = [PollFd::new(&self.event, PollFlags::IN)];
        let n = poll(&mut fds, ms).map_err(std::io::Error::from)?;
        if n == 0 {
            return Ok(false);
        }
        let mut count = [0u8; 8];
        rustix::io::read(&self.event, &mut count).map_err(std::io::Error::from)?;
        Ok(true)
    }

    fn unmask(&self) -> Result<()> {
        set_irqs(
            &self.device,
            self.index,
            ioctls::VFIO_IRQ_SET_DATA_NONE | ioctls::VFIO_IRQ_SET_ACTION_UNMASK,
            1,
            0,
        )
    }
}

impl Drop for VfioIrq {
    fn drop(&mut self) {
        let flags = ioctls::VFIO_IRQ_SET_DATA_NONE | ioctls::VFIO_IRQ_SET_ACTION_TRIGGER;
        if let Err(e) = set_irqs(&self.device, self.index, flags, 0, 0) {
            tracing::warn!("IRQ {} teardown: {e}", self.index);
        }
    }
}

/// VFIO platform backend
#[derive(Debug)]
pub struct VfioBackend {
    device_name: String,
    variant: SocVariant,
    container: Arc<File>,
    /// VFIO group file descriptor (kept open for lifetime)
    #[allow(dead_code)] // Needed for VFIO lifetime
    group: File,
    device: Arc<File>,
    regmap: Arc<Regmap>,
    mapper: Arc<VfioMapper>,
}

impl VfioBackend {
    fn open_container() -> Result<File> {
        let container = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/vfio/vfio")
            .map_err(|_| HscError::device_not_found("/dev/vfio/vfio"))?;

        // SAFETY: VFIO_GET_API_VERSION takes no argument and returns an int.
        let api = unsafe { libc::ioctl(container.as_raw_fd(), ioctls::VFIO_GET_API_VERSION as _) };
        if api != ioctls::VFIO_API_VERSION {
            return Err(HscError::hardware_error(format!(
                "Unsupported VFIO API version: {api}"
            )));
        }

        // SAFETY: VFIO_CHECK_EXTENSION takes the extension id by value.
        let has_type1 = unsafe {
            libc::ioctl(
                container.as_raw_fd(),
                ioctls::VFIO_CHECK_EXTENSION as _,
                ioctls::VFIO_TYPE1V2_IOMMU,
            )
        };
        if has_type1 != 1 {
            return Err(HscError::hardware_error("VFIO Type1v2 IOMMU not supported"));
        }
        Ok(container)
    }

    fn open_group(container: &File, iommu_group: u32) -> Result<File> {
        let group_path = format!("/dev/vfio/{iommu_group}");
        let group = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&group_path)
            .map_err(|_| HscError::device_not_found(&group_path))?;

        let mut status = VfioGroupStatus {
            argsz: std::mem::size_of::<VfioGroupStatus>() as u32,
            flags: 0,
        };
        // SAFETY: VFIO_GROUP_GET_STATUS fills status; layout matches struct vfio_group_status.
        let ret = unsafe {
            libc::ioctl(
                group.as_raw_fd(),
                ioctls::VFIO_GROUP_GET_STATUS as _,
                &raw mut status,
            )
        };
        if ret < 0 || status.flags & ioctls::VFIO_GROUP_FLAGS_VIABLE == 0 {
            return Err(HscError::hardware_error(
                "VFIO group not viable (all devices must be bound to vfio-platform)",
            ));
        }

        // SAFETY: VFIO_GROUP_SET_CONTAINER reads a pointer to the container fd.
        let ret = unsafe {
            libc::ioctl(
                group.as_raw_fd(),
                ioctls::VFIO_GROUP_SET_CONTAINER as _,
                std::ptr::from_ref(&container.as_raw_fd()),
            )
        };
        if ret < 0 {
            return Err(last_os_error("Failed to set container"));
        }

        // SAFETY: VFIO_SET_IOMMU takes the IOMMU type by value; the group is attached.
        let ret = unsafe {
            libc::ioctl(
                container.as_raw_fd(),
                ioctls::VFIO_SET_IOMMU as _,
                ioctls::VFIO_TYPE1V2_IOMMU,
            )
        };
        if ret < 0 {
            return Err(last_os_error("Failed to set IOMMU"));
        }
        Ok(group)
    }

    fn open_device(group: &File, name: &str) -> Result<File> {
        let cname = std::ffi::CString::new(name)
            .map_err(|e| HscError::invalid_argument(format!("Invalid device name: {e}")))?;

        // SAFETY: VFIO_GROUP_GET_DEVICE_FD reads a NUL-terminated name and returns a new fd.
        let fd = unsafe {
            libc::ioctl(
                group.as_raw_fd(),
                ioctls::VFIO_GROUP_GET_DEVICE_FD as _,
                cname.as_ptr(),
            )
        };
        if fd < 0 {
            return Err(last_os_error("Failed to get device fd"));
        }
        // SAFETY: fd >= 0 was just returned by the kernel and is owned by nobody else.
        let device = unsafe { File::from_raw_fd(fd) };

        let mut info = VfioDeviceInfo {
            argsz: std::mem::size_of::<VfioDeviceInfo>() as u32,
            ..Default::default()
        };
        // SAFETY: VFIO_DEVICE_GET_INFO fills info; layout matches struct vfio_device_info.
        let ret = unsafe {
            libc::ioctl(
                device.as_raw_fd(),
                ioctls::VFIO_DEVICE_GET_INFO as _,
                &raw mut info,
            )
        };
        if ret < 0 {
            return Err(last_os_error("Failed to get device info"));
        }
        if info.flags & ioctls::VFIO_DEVICE_FLAGS_PLATFORM == 0 {
            tracing::warn!("{name}: not reported as a platform device");
        }
        if info.num_irqs < 2 {
            return Err(HscError::hardware_error(format!(
                "{name}: expected 2 IRQs, device has {}",
                info.num_irqs
            )));
        }
        tracing::info!(
            "VFIO device {name}: {} regions, {} IRQs",
            info.num_regions,
            info.num_irqs
        );
        Ok(device)
    }
}

impl HscBackend for VfioBackend {
    fn init(device: &str) -> Result<Self> {
        tracing::info!("Initializing VFIO backend for {device}");

        let variant = crate::discovery::variant_of(device)?;
        let iommu_group = iommu_group(device)?;
        tracing::debug!("IOMMU group: {iommu_group}");

        let container = Self::open_container()?;
        let group = Self::open_group(&container, iommu_group)?;
        let dev = Self::open_device(&group, device)?;

        let region = MappedRegion::map(&dev, 0)?;
        let max_register = u32::try_from(region.size())
            .map_err(|_| HscError::hardware_error("register region larger than 4 GiB"))?
            .saturating_sub(4)
            .min(hsc_chip::regs::MAX_REGISTER);
        let regmap = Arc::new(Regmap::with_max_register(
            Arc::new(region) as Arc<dyn RegisterIo>,
            max_register,
        ));

        let container = Arc::new(container);
        let mapper = Arc::new(VfioMapper::new(Arc::clone(&container)));

        tracing::info!("Initialized VFIO backend for {device} ({variant})");
        Ok(Self {
            device_name: device.to_string(),
            variant,
            container,
            group,
            device: Arc::new(dev),
            regmap,
            mapper,
        })
    }

    fn regmap(&self) -> Arc<Regmap> {
        Arc::clone(&self.regmap)
    }

    fn dma_allocator(&self) -> DmaAllocator {
        DmaAllocator::new(Arc::clone(&self.mapper) as Arc<dyn IovaMapper>)
    }

    fn irq_source(&self, line: IrqLine) -> Result<Arc<dyn IrqSource>> {
        Ok(Arc::new(VfioIrq::new(Arc::clone(&self.device), line.index())?))
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Vfio
    }

    fn variant(&self) -> SocVariant {
        self.variant
    }

    fn device_name(&self) -> &str {
        &self.device_name
    }
}

// ── VFIO device binding helpers ───────────────────────────────────────────────

const PLATFORM_DEVICES: &str = "/sys/bus/platform/devices";

/// Bind a platform device to `vfio-platform`.
///
/// Steps:
/// 1. Set `driver_override` to `vfio-platform`
/// 2. Unbind from the current driver
/// 3. Re-probe, which now picks `vfio-platform`
///
/// Requires root or CAP_SYS_ADMIN.
///
/// # Errors
///
/// Returns an error if any sysfs write fails (usually permission denied).
pub fn bind_to_vfio(device: &str) -> Result<()> {
    tracing::info!("Binding {device} to vfio-platform");
    let dev = Path::new(PLATFORM_DEVICES).join(device);
    if !dev.exists() {
        return Err(HscError::device_not_found(dev));
    }

    std::fs::write(dev.join("driver_override"), "vfio-platform").map_err(|e| {
        HscError::hardware_error(format!("Cannot set driver_override for {device}: {e}"))
    })?;

    let unbind = dev.join("driver/unbind");
    if unbind.exists() {
        std::fs::write(&unbind, device)
            .map_err(|e| HscError::hardware_error(format!("Cannot unbind {device}: {e}")))?;
        tracing::info!("Unbound from existing driver");
    }

    std::fs::write("/sys/bus/platform/drivers_probe", device)
        .map_err(|e| HscError::hardware_error(format!("Cannot probe {device}: {e}")))?;

    tracing::info!("{device} bound to vfio-platform");
    Ok(())
}

/// Unbind from `vfio-platform` and let the kernel pick the native driver.
///
/// # Errors
///
/// Returns an error if sysfs writes fail.
pub fn unbind_from_vfio(device: &str) -> Result<()> {
    let dev = Path::new(PLATFORM_DEVICES).join(device);

    std::fs::write("/sys/bus/platform/drivers/vfio-platform/unbind", device)
        .map_err(|e| HscError::hardware_error(format!("Cannot unbind from vfio-platform: {e}")))?;

    std::fs::write(dev.join("driver_override"), "\n").map_err(|e| {
        HscError::hardware_error(format!("Cannot clear driver_override for {device}: {e}"))
    })?;

    std::fs::write("/sys/bus/platform/drivers_probe", device)
        .map_err(|e| HscError::hardware_error(format!("Cannot probe {device}: {e}")))?;

    tracing::info!("{device} released from vfio-platform");
    Ok(())
}

/// Find the IOMMU group number for a platform device.
///
/// Reads the `/sys/bus/platform/devices/{dev}/iommu_group` symlink.
///
/// # Errors
///
/// Returns `HardwareError` if the sysfs symlink cannot be read.
pub fn iommu_group(device: &str) -> Result<u32> {
    let link = Path::new(PLATFORM_DEVICES).join(device).join("iommu_group");
    let target = std::fs::read_link(&link).map_err(|e| {
        HscError::hardware_error(format!(
            "Cannot read IOMMU group for {device}: {e}. Is the IOMMU enabled?"
        ))
    })?;

    let group = target
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(|| {
            HscError::hardware_error(format!("Cannot parse IOMMU group from {target:?}"))
        })?;

    tracing::debug!("{device}: IOMMU group {group}");
    Ok(group)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ioctl_numbers_match_kernel_headers() {
        assert_eq!(ioctls::VFIO_GET_API_VERSION, 0x3b64);
        assert_eq!(ioctls::VFIO_DEVICE_SET_IRQS, 0x3b6e);
        assert_eq!(ioctls::VFIO_IOMMU_MAP_DMA, 0x3b71);
        assert_eq!(std::mem::size_of::<VfioIrqSet>(), 24);
        assert_eq!(std::mem::size_of::<VfioDmaMap>(), 32);
    }

    #[test]
    fn missing_device_is_reported() {
        assert!(VfioBackend::init("no-such-hsc").is_err());
        assert!(iommu_group("no-such-hsc").is_err());
    }

    #[test]
    #[ignore = "requires an HSC bound to vfio-platform"]
    fn vfio_backend_init() {
        let dev = std::env::var("HSC_DEVICE").unwrap_or_else(|_| "65000000.hsc".into());
        let backend = VfioBackend::init(&dev).unwrap();
        let rev = backend.regmap().read(hsc_chip::regs::IOB_HSCREV).unwrap();
        println!("{dev}: {} HSC, revision {rev:#010x}", backend.variant());
    }
}
