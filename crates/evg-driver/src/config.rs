use std::net::Ipv4Addr;
use std::time::Duration;

use crate::error::{EvgError, Result};

/// Per-attempt reply timeout when none is configured.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_millis(1000);
/// Total send attempts per exchange when none is configured.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Maximum number of registered devices.
pub const MAX_DEVICES: usize = 10;
/// Maximum device name length, in bytes.
pub const MAX_NAME_LEN: usize = 29;

const ENV_REPLY_TIMEOUT_MS: &str = "EVG_REPLY_TIMEOUT_MS";
const ENV_MAX_RETRIES: &str = "EVG_MAX_RETRIES";

/// Driver-wide transport tuning, shared by every device.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// How long each attempt waits for a reply datagram.
    pub reply_timeout: Duration,
    /// Total attempts per exchange before giving up.
    pub max_retries: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl DriverConfig {
    /// Reads tuning from `EVG_REPLY_TIMEOUT_MS` and `EVG_MAX_RETRIES`.
    ///
    /// Blank and zero values are treated as unset so deployments can pass
    /// through empty or placeholder environment variables without disabling
    /// the transport.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(ms) = env_u64(ENV_REPLY_TIMEOUT_MS)? {
            if ms > 0 {
                config.reply_timeout = Duration::from_millis(ms);
            }
        }
        if let Some(retries) = env_u64(ENV_MAX_RETRIES)? {
            if retries > 0 {
                config.max_retries = retries as u32;
            }
        }
        Ok(config)
    }
}

fn env_u64(key: &str) -> Result<Option<u64>> {
    let raw = match std::env::var(key) {
        Ok(raw) => raw,
        Err(_) => return Ok(None),
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse()
        .map(Some)
        .map_err(|_| EvgError::invalid(format!("{key}={trimmed:?} is not an unsigned integer")))
}

/// Card revision, selecting which operations a device supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardRevision {
    /// Single-sequencer revision.
    Evg200,
    /// Dual-sequencer revision.
    Evg230,
}

impl CardRevision {
    pub fn sequencer_count(self) -> u8 {
        match self {
            CardRevision::Evg200 => 1,
            CardRevision::Evg230 => 2,
        }
    }
}

/// What `init` does to the card after connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetPolicy {
    /// Leave the card as found.
    None,
    /// Master-disable the card so a stale enable cannot keep emitting events.
    MasterDisable,
}

/// Static description of one card, registered before `init`.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub name: String,
    pub ip: Ipv4Addr,
    pub port: u16,
    /// Reference clock in Hertz; used to convert timestamps to clock cycles
    /// and to derive the card's microsecond divider.
    pub frequency_hz: u32,
    pub revision: CardRevision,
    pub reset: ResetPolicy,
}

impl DeviceConfig {
    pub fn new(name: impl Into<String>, ip: Ipv4Addr, port: u16, frequency_hz: u32) -> Self {
        Self {
            name: name.into(),
            ip,
            port,
            frequency_hz,
            revision: CardRevision::Evg230,
            reset: ResetPolicy::MasterDisable,
        }
    }

    /// The four-string registration surface: name, dotted-quad IP, UDP port,
    /// reference frequency in Hz.
    pub fn parse(name: &str, ip: &str, port: &str, frequency: &str) -> Result<Self> {
        let ip: Ipv4Addr = ip
            .trim()
            .parse()
            .map_err(|_| EvgError::invalid(format!("{ip:?} is not a dotted-quad IPv4 address")))?;
        let port: u16 = port
            .trim()
            .parse()
            .map_err(|_| EvgError::invalid(format!("{port:?} is not a UDP port")))?;
        let frequency_hz: u32 = frequency.trim().parse().map_err(|_| {
            EvgError::invalid(format!("{frequency:?} is not a frequency in Hz"))
        })?;
        let config = Self::new(name.trim(), ip, port, frequency_hz);
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.len() > MAX_NAME_LEN {
            return Err(EvgError::invalid(format!(
                "device name must be 1..={MAX_NAME_LEN} bytes, got {:?}",
                self.name
            )));
        }
        if !self.name.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(EvgError::invalid(format!(
                "device name {:?} contains non-printable characters",
                self.name
            )));
        }
        if self.port == 0 {
            return Err(EvgError::invalid("UDP port must be non-zero"));
        }
        if self.frequency_hz < 1_000_000 {
            return Err(EvgError::invalid(format!(
                "reference frequency {} Hz is below 1 MHz; the card's microsecond divider \
                 cannot be derived",
                self.frequency_hz
            )));
        }
        Ok(())
    }
}
