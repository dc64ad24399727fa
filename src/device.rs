//! Compute device selection
//!
//! Resolution happens once, before any training state is built. A run that
//! asks for accelerators that are not there fails with
//! [`Error::DeviceUnavailable`] instead of silently falling back.

use crate::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};

/// A single compute device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Accelerator(usize),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Accelerator(id) => write!(f, "accel:{id}"),
        }
    }
}

/// Requested placement, taken from the configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceRequest {
    /// Require accelerators
    pub accelerator: bool,
    /// Accelerator ids to use; empty means "whatever is available"
    pub ids: Vec<usize>,
    /// Replicate the model across every selected id
    pub replicate: bool,
}

/// Reports which accelerators exist on this host
pub trait AcceleratorProbe {
    fn available(&self) -> Vec<usize>;
}

/// Looks for `nvidiaN` device nodes
#[derive(Debug, Clone)]
pub struct SystemProbe {
    dev_dir: PathBuf,
}

impl SystemProbe {
    pub fn new() -> Self {
        Self::with_dev_dir("/dev")
    }

    pub fn with_dev_dir(dev_dir: impl AsRef<Path>) -> Self {
        Self {
            dev_dir: dev_dir.as_ref().to_path_buf(),
        }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl AcceleratorProbe for SystemProbe {
    fn available(&self) -> Vec<usize> {
        let Ok(entries) = std::fs::read_dir(&self.dev_dir) else {
            return Vec::new();
        };
        let mut ids: Vec<usize> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                e.file_name()
                    .to_str()
                    .and_then(|n| n.strip_prefix("nvidia"))
                    .and_then(|n| n.parse().ok())
            })
            .collect();
        ids.sort_unstable();
        ids
    }
}

/// The devices a run executes on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceGroup {
    devices: Vec<Device>,
}

impl DeviceGroup {
    pub fn cpu() -> Self {
        Self {
            devices: vec![Device::Cpu],
        }
    }

    /// Match a request against what the probe reports
    pub fn resolve(request: &DeviceRequest, probe: &dyn AcceleratorProbe) -> Result<Self> {
        if !request.accelerator {
            return Ok(Self::cpu());
        }

        let available = probe.available();
        if available.is_empty() {
            return Err(Error::DeviceUnavailable(
                "no accelerator available for usage".into(),
            ));
        }

        let wanted = if request.ids.is_empty() {
            available.clone()
        } else {
            request.ids.clone()
        };
        if let Some(missing) = wanted.iter().find(|id| !available.contains(id)) {
            return Err(Error::DeviceUnavailable(format!(
                "accelerator {missing} requested, available: {available:?}"
            )));
        }

        let take = if request.replicate { wanted.len() } else { 1 };
        Ok(Self {
            devices: wanted
                .into_iter()
                .take(take)
                .map(Device::Accelerator)
                .collect(),
        })
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn primary(&self) -> Device {
        self.devices.first().copied().unwrap_or(Device::Cpu)
    }

    /// Whether parameters are mirrored across more than one device
    pub fn is_replicated(&self) -> bool {
        self.devices.len() > 1
    }
}

impl fmt::Display for DeviceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.devices.iter().map(Device::to_string).collect();
        f.write_str(&names.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<usize>);

    impl AcceleratorProbe for Fixed {
        fn available(&self) -> Vec<usize> {
            self.0.clone()
        }
    }

    #[test]
    fn test_cpu_when_not_requested() {
        let group = DeviceGroup::resolve(&DeviceRequest::default(), &Fixed(vec![])).unwrap();
        assert_eq!(group.primary(), Device::Cpu);
        assert!(!group.is_replicated());
    }

    #[test]
    fn test_missing_accelerator_is_fatal() {
        let request = DeviceRequest {
            accelerator: true,
            ..DeviceRequest::default()
        };
        let err = DeviceGroup::resolve(&request, &Fixed(vec![])).unwrap_err();
        assert!(matches!(err, Error::DeviceUnavailable(_)));
    }

    #[test]
    fn test_unknown_id_is_fatal() {
        let request = DeviceRequest {
            accelerator: true,
            ids: vec![3],
            replicate: false,
        };
        assert!(DeviceGroup::resolve(&request, &Fixed(vec![0, 1])).is_err());
    }

    #[test]
    fn test_replication_uses_every_requested_id() {
        let request = DeviceRequest {
            accelerator: true,
            ids: vec![1, 0],
            replicate: true,
        };
        let group = DeviceGroup::resolve(&request, &Fixed(vec![0, 1])).unwrap();
        assert_eq!(group.devices(), &[Device::Accelerator(1), Device::Accelerator(0)]);
        assert!(group.is_replicated());
        assert_eq!(group.to_string(), "accel:1,accel:0");
    }

    #[test]
    fn test_system_probe_reads_device_nodes() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["nvidia1", "nvidia0", "nvidiactl", "null"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        assert_eq!(SystemProbe::with_dev_dir(dir.path()).available(), vec![0, 1]);
    }
}
