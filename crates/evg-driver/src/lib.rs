//! Network-attached driver for the VME-EVG230/RF timing event generator.
//!
//! The card is reached over UDP through a register gateway rather than a
//! VME backplane; every interaction is a 12-octet request/reply exchange
//! (see `evg-register-protocol`). This crate layers on top of that wire
//! format:
//!
//! - a per-device transport with bounded retransmission and reply timeouts,
//! - register I/O with read-back verification for state-bearing writes,
//! - the typed operation set of the card (master enable, RF/AC/sequencer
//!   prescalers and sources, sequence RAM programming, multiplexed
//!   counters), and
//! - a registry with a configure → init → operate → shutdown lifecycle.
//!
//! Every operation serializes on its device's lock, which is what makes the
//! card's address-latch register protocol safe to use from multiple worker
//! threads. Operations on different devices run in parallel.
//!
//! ```no_run
//! use evg_driver::{DeviceConfig, DriverConfig, EvgDriver};
//!
//! # fn main() -> evg_driver::Result<()> {
//! let mut driver = EvgDriver::new(DriverConfig::from_env()?);
//! driver.configure(DeviceConfig::parse("EVG1", "10.0.7.20", "2000", "125000000")?)?;
//! let failures = driver.init();
//! assert!(failures.is_empty());
//!
//! let evg = driver.open("EVG1")?;
//! evg.set_rf_prescaler(4)?;
//! evg.set_event(0, 0, 0x01)?;
//! evg.set_timestamp(0, 0, 0.000008)?;
//! evg.enable(true)?;
//! # Ok(())
//! # }
//! ```

mod config;
mod device;
mod error;
mod registry;
pub mod regs;
pub mod testing;
mod transport;

pub use config::{
    CardRevision, DeviceConfig, DriverConfig, ResetPolicy, DEFAULT_MAX_RETRIES,
    DEFAULT_REPLY_TIMEOUT, MAX_DEVICES, MAX_NAME_LEN,
};
pub use device::{AcSyncSource, Device, RfClockSource, TriggerSource};
pub use error::{EvgError, Result};
pub use registry::{EvgDriver, InitFailure};
pub use transport::RegisterExchange;
