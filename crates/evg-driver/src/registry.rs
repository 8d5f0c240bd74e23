use std::fmt::Write as _;

use tracing::{info, warn};

use crate::config::{DeviceConfig, DriverConfig, MAX_DEVICES, MAX_NAME_LEN};
use crate::device::Device;
use crate::error::{EvgError, Result};
use crate::transport::{RegisterExchange, UdpGatewayLink};

/// One device that failed to come up during [`EvgDriver::init`].
#[derive(Debug)]
pub struct InitFailure {
    pub device: String,
    pub error: EvgError,
}

/// The device registry and lifecycle root.
///
/// Configuration is single-threaded (`&mut self`); once `init` has run the
/// registry is shared immutably across worker threads and each device
/// serializes its own traffic.
pub struct EvgDriver {
    config: DriverConfig,
    devices: Vec<Device>,
}

impl EvgDriver {
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config,
            devices: Vec::new(),
        }
    }

    /// Registers a device. No I/O happens until [`EvgDriver::init`].
    pub fn configure(&mut self, config: DeviceConfig) -> Result<()> {
        config.validate()?;
        if self.devices.len() >= MAX_DEVICES {
            return Err(EvgError::ConfigFull { max: MAX_DEVICES });
        }
        if self.devices.iter().any(|d| d.name() == config.name) {
            return Err(EvgError::invalid(format!(
                "device name {:?} is already registered",
                config.name
            )));
        }
        self.devices.push(Device::from_config(config));
        Ok(())
    }

    /// Connects every configured device and applies its reset policy.
    ///
    /// A device that fails keeps its link (the card may come back) and is
    /// reported in the returned list; remaining devices still come up.
    pub fn init(&mut self) -> Vec<InitFailure> {
        let mut failures = Vec::new();
        for device in &self.devices {
            let result = UdpGatewayLink::connect(device.endpoint(), &self.config)
                .map(|link| device.install_link(Box::new(link) as Box<dyn RegisterExchange>))
                .and_then(|()| device.bring_up());
            match result {
                Ok(()) => {
                    info!(device = device.name(), endpoint = %device.endpoint(), "device ready");
                }
                Err(error) => {
                    warn!(
                        device = device.name(),
                        endpoint = %device.endpoint(),
                        error = %error,
                        "device failed to initialize"
                    );
                    failures.push(InitFailure {
                        device: device.name().to_string(),
                        error,
                    });
                }
            }
        }
        failures
    }

    /// Looks up a device by name. Valid from configuration time onward;
    /// operations on the returned device additionally require `init` to
    /// have succeeded for it.
    pub fn open(&self, name: &str) -> Result<&Device> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(EvgError::UnknownDevice {
                name: name.to_string(),
            });
        }
        self.devices
            .iter()
            .find(|d| d.name() == name)
            .ok_or_else(|| EvgError::UnknownDevice {
                name: name.to_string(),
            })
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    /// One line per configured device: name, IP, port.
    pub fn report(&self) -> String {
        let mut out = String::new();
        for device in &self.devices {
            let endpoint = device.endpoint();
            let _ = writeln!(out, "{} {} {}", device.name(), endpoint.ip(), endpoint.port());
        }
        out
    }

    /// Closes every device's socket and drops the device records.
    pub fn shutdown(&mut self) {
        for device in &self.devices {
            device.drop_link();
            info!(device = device.name(), "device closed");
        }
        self.devices.clear();
    }
}

impl Default for EvgDriver {
    fn default() -> Self {
        Self::new(DriverConfig::default())
    }
}
