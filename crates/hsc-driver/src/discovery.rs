//! Runtime device discovery
//!
//! The HSC is a devicetree platform device. Discovery walks
//! `/sys/bus/platform/devices/*/of_node/compatible` and keeps every node
//! whose compatible list names a known HSC generation.

use std::path::{Path, PathBuf};

use hsc_chip::SocVariant;

use crate::error::{HscError, Result};

/// Platform devices directory.
pub const PLATFORM_DEVICES: &str = "/sys/bus/platform/devices";

/// Device manager for runtime discovery
#[derive(Debug)]
pub struct DeviceManager {
    devices: Vec<DeviceInfo>,
}

/// Information about a discovered device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Platform device name (`65000000.hsc`, ...)
    pub name: String,

    /// SoC generation from the compatible string
    pub variant: SocVariant,

    /// Bound driver, if any (`vfio-platform`, ...)
    pub driver: Option<String>,

    /// IOMMU group, if the device sits behind an IOMMU
    pub iommu_group: Option<u32>,
}

impl DeviceInfo {
    /// Whether the device can be opened through VFIO.
    pub fn is_vfio_bound(&self) -> bool {
        self.driver.as_deref() == Some("vfio-platform")
    }
}

impl DeviceManager {
    /// Discover all HSC instances on the system
    ///
    /// # Errors
    ///
    /// Returns `HscError::NoDevicesFound` if no devices are detected.
    pub fn discover() -> Result<Self> {
        Self::discover_in(Path::new(PLATFORM_DEVICES))
    }

    /// Discover below an explicit platform devices directory.
    ///
    /// # Errors
    ///
    /// Returns `HscError::NoDevicesFound` if no devices are detected.
    pub fn discover_in(root: &Path) -> Result<Self> {
        tracing::info!("Discovering HSC devices in {}", root.display());

        let mut devices = Vec::new();
        let entries = match std::fs::read_dir(root) {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!("Cannot read {}: {e}", root.display());
                return Err(HscError::NoDevicesFound);
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let Some(variant) = read_variant(&path) else {
                continue;
            };
            let name = entry.file_name().to_string_lossy().to_string();
            let driver = link_name(&path.join("driver"));
            let iommu_group = link_name(&path.join("iommu_group")).and_then(|g| g.parse().ok());

            tracing::info!(
                "Device {name}: {variant} HSC, driver={}, iommu_group={}",
                driver.as_deref().unwrap_or("none"),
                iommu_group.map_or_else(|| "none".to_string(), |g: u32| g.to_string())
            );
            devices.push(DeviceInfo {
                name,
                variant,
                driver,
                iommu_group,
            });
        }

        if devices.is_empty() {
            tracing::error!("No HSC devices found");
            return Err(HscError::NoDevicesFound);
        }

        // Sort to ensure consistent ordering
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        tracing::info!("Discovered {} HSC device(s)", devices.len());
        Ok(Self { devices })
    }

    /// Get number of discovered devices
    #[must_use]
    pub const fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Get slice of all devices
    #[must_use]
    pub fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    /// Find a device by platform name
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotFound` if no discovered device has that name.
    pub fn device(&self, name: &str) -> Result<&DeviceInfo> {
        self.devices
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| HscError::device_not_found(Path::new(PLATFORM_DEVICES).join(name)))
    }
}

/// SoC generation of platform device `device`.
///
/// # Errors
///
/// `DeviceNotFound` if the device does not exist or is not an HSC.
pub fn variant_of(device: &str) -> Result<SocVariant> {
    let path = Path::new(PLATFORM_DEVICES).join(device);
    read_variant(&path).ok_or_else(|| HscError::device_not_found(path))
}

// The compatible property is a list of NUL-terminated strings.
fn read_variant(dev: &Path) -> Option<SocVariant> {
    let raw = std::fs::read(dev.join("of_node/compatible")).ok()?;
    raw.split(|&b| b == 0)
        .filter_map(|s| std::str::from_utf8(s).ok())
        .find_map(SocVariant::from_compatible)
}

fn link_name(link: &Path) -> Option<String> {
    let target: PathBuf = std::fs::read_link(link).ok()?;
    Some(target.file_name()?.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    fn fake_device(root: &Path, name: &str, compatible: &[u8]) -> PathBuf {
        let dev = root.join(name);
        std::fs::create_dir_all(dev.join("of_node")).unwrap();
        std::fs::write(dev.join("of_node/compatible"), compatible).unwrap();
        dev
    }

    #[test]
    fn finds_hsc_nodes_only() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        let hsc = fake_device(root, "65000000.hsc", b"socionext,uniphier-ld20-hsc\0");
        fake_device(root, "5a000000.sd", b"socionext,uniphier-sd4hc\0");
        std::fs::create_dir_all(root.join("no-of-node")).unwrap();

        symlink("../../../drivers/vfio-platform", hsc.join("driver")).unwrap();
        symlink("../../../kernel/iommu_groups/7", hsc.join("iommu_group")).unwrap();

        let mgr = DeviceManager::discover_in(root).unwrap();
        assert_eq!(mgr.device_count(), 1);
        let d = mgr.device("65000000.hsc").unwrap();
        assert_eq!(d.variant, SocVariant::Ld20);
        assert_eq!(d.iommu_group, Some(7));
        assert!(d.is_vfio_bound());
        assert!(mgr.device("5a000000.sd").is_err());
    }

    #[test]
    fn second_compatible_entry_matches() {
        let tmp = tempfile::tempdir().unwrap();
        fake_device(
            tmp.path(),
            "hsc",
            b"vendor,board-hsc\0socionext,uniphier-ld11-hsc\0",
        );
        let mgr = DeviceManager::discover_in(tmp.path()).unwrap();
        assert_eq!(mgr.devices()[0].variant, SocVariant::Ld11);
        assert_eq!(mgr.devices()[0].driver, None);
    }

    #[test]
    fn empty_tree_reports_no_devices() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            DeviceManager::discover_in(tmp.path()),
            Err(HscError::NoDevicesFound)
        ));
        assert!(matches!(
            DeviceManager::discover_in(&tmp.path().join("missing")),
            Err(HscError::NoDevicesFound)
        ));
    }
}
