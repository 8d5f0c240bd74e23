use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard};

use evg_register_protocol::RegisterMessage;
use tracing::{debug, trace};

use crate::config::{CardRevision, DeviceConfig, ResetPolicy};
use crate::error::{EvgError, Result};
use crate::regs::{self, SequencerBank};
use crate::transport::RegisterExchange;

/// RF reference clock source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RfClockSource {
    Internal,
    External,
}

/// What the AC trigger synchronizes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcSyncSource {
    /// The event clock.
    Event,
    /// Multiplexed counter 7.
    Mxc7,
}

/// What starts a sequencer run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    Software,
    AcMains,
}

/// One configured card.
///
/// All operations serialize on the device's internal lock; multi-register
/// sequences (the address-latch protocol in particular) never interleave
/// with traffic from other threads. Operations on distinct devices are free
/// to run in parallel.
pub struct Device {
    name: String,
    endpoint: SocketAddr,
    frequency_hz: u32,
    revision: CardRevision,
    reset: ResetPolicy,
    io: Mutex<Option<Box<dyn RegisterExchange>>>,
}

/// Exclusive access to a device's register link for the duration of one
/// operation.
struct Io<'a> {
    name: &'a str,
    link: MutexGuard<'a, Option<Box<dyn RegisterExchange>>>,
}

impl Io<'_> {
    fn exchange(&mut self, request: &RegisterMessage) -> Result<RegisterMessage> {
        match self.link.as_mut() {
            Some(link) => link.exchange(request),
            None => Err(EvgError::not_ready(self.name)),
        }
    }

    fn read_reg(&mut self, register: u16) -> Result<u16> {
        let reply = self.exchange(&RegisterMessage::read(register))?;
        if reply.status != 0 {
            debug!(
                device = self.name,
                register,
                status = reply.status,
                "non-zero status in read reply"
            );
        }
        trace!(device = self.name, register, value = reply.data, "read");
        Ok(reply.data)
    }

    fn write_reg(&mut self, register: u16, value: u16) -> Result<()> {
        let reply = self.exchange(&RegisterMessage::write(register, value))?;
        if reply.status != 0 {
            debug!(
                device = self.name,
                register,
                status = reply.status,
                "non-zero status in write reply"
            );
        }
        trace!(device = self.name, register, value, "write");
        Ok(())
    }

    /// Write followed by read-back. The card is write-through with some
    /// sticky bits; read-back equality is the only in-band consistency
    /// check available.
    fn write_check_reg(&mut self, register: u16, value: u16) -> Result<()> {
        self.write_reg(register, value)?;
        let read_back = self.read_reg(register)?;
        if read_back != value {
            return Err(EvgError::VerifyMismatch {
                register,
                written: value,
                read_back,
            });
        }
        Ok(())
    }

    /// Read-modify-write with read-back verification.
    fn update_check_reg(
        &mut self,
        register: u16,
        f: impl FnOnce(u16) -> u16,
    ) -> Result<()> {
        let old = self.read_reg(register)?;
        self.write_check_reg(register, f(old))
    }
}

impl Device {
    pub(crate) fn from_config(config: DeviceConfig) -> Self {
        Self {
            name: config.name,
            endpoint: SocketAddr::from((config.ip, config.port)),
            frequency_hz: config.frequency_hz,
            revision: config.revision,
            reset: config.reset,
            io: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    pub fn frequency_hz(&self) -> u32 {
        self.frequency_hz
    }

    pub fn revision(&self) -> CardRevision {
        self.revision
    }

    fn lock_io(&self) -> Io<'_> {
        Io {
            name: &self.name,
            link: self.io.lock().unwrap_or_else(|poison| poison.into_inner()),
        }
    }

    pub(crate) fn install_link(&self, link: Box<dyn RegisterExchange>) {
        *self.io.lock().unwrap_or_else(|poison| poison.into_inner()) = Some(link);
    }

    pub(crate) fn drop_link(&self) {
        *self.io.lock().unwrap_or_else(|poison| poison.into_inner()) = None;
    }

    /// Post-connect setup: program the microsecond divider from the
    /// configured reference frequency, then apply the reset policy.
    pub(crate) fn bring_up(&self) -> Result<()> {
        let mut io = self.lock_io();
        io.write_check_reg(regs::USEC_DIVIDER, (self.frequency_hz / 1_000_000) as u16)?;
        if self.reset == ResetPolicy::MasterDisable {
            io.write_reg(regs::CONTROL, regs::CONTROL_DISABLE)?;
        }
        Ok(())
    }

    fn sequencer(&self, sequencer: u8) -> Result<&'static SequencerBank> {
        let count = self.revision.sequencer_count();
        if sequencer >= count {
            return Err(EvgError::invalid(format!(
                "sequencer {sequencer} out of range; {:?} has {count} sequencer(s)",
                self.revision
            )));
        }
        Ok(&regs::SEQUENCERS[usize::from(sequencer)])
    }

    fn sequencers(&self) -> &'static [SequencerBank] {
        &regs::SEQUENCERS[..usize::from(self.revision.sequencer_count())]
    }

    // Master enable.

    /// Master-enables or -disables event generation.
    pub fn enable(&self, on: bool) -> Result<()> {
        let value = if on {
            regs::CONTROL_ENABLE
        } else {
            regs::CONTROL_DISABLE
        };
        self.lock_io().write_reg(regs::CONTROL, value)
    }

    pub fn is_enabled(&self) -> Result<bool> {
        let control = self.lock_io().read_reg(regs::CONTROL)?;
        Ok(control & regs::CONTROL_DISABLE_BIT == 0)
    }

    // RF clock.

    pub fn set_rf_clock_source(&self, source: RfClockSource) -> Result<()> {
        self.lock_io().update_check_reg(regs::RF_CONTROL, |old| match source {
            RfClockSource::Internal => old & !regs::RF_CONTROL_EXTERNAL,
            RfClockSource::External => old | regs::RF_CONTROL_EXTERNAL,
        })
    }

    pub fn get_rf_clock_source(&self) -> Result<RfClockSource> {
        let control = self.lock_io().read_reg(regs::RF_CONTROL)?;
        Ok(if control & regs::RF_CONTROL_EXTERNAL != 0 {
            RfClockSource::External
        } else {
            RfClockSource::Internal
        })
    }

    /// Sets the RF prescaler. The divider field stores `prescaler - 1`.
    pub fn set_rf_prescaler(&self, prescaler: u8) -> Result<()> {
        if !(1..=31).contains(&prescaler) {
            return Err(EvgError::invalid(format!(
                "RF prescaler {prescaler} out of range 1..=31"
            )));
        }
        self.lock_io().update_check_reg(regs::RF_CONTROL, |old| {
            (old & !regs::RF_CONTROL_DIVIDER_MASK) | u16::from(prescaler - 1)
        })
    }

    /// Reads the RF prescaler, undoing the `- 1` offset applied on write so
    /// that `set_rf_prescaler(p)` reads back as `p`.
    pub fn get_rf_prescaler(&self) -> Result<u8> {
        let control = self.lock_io().read_reg(regs::RF_CONTROL)?;
        Ok((control & regs::RF_CONTROL_DIVIDER_MASK) as u8 + 1)
    }

    // AC trigger.

    pub fn set_ac_prescaler(&self, prescaler: u8) -> Result<()> {
        if prescaler == 0 {
            return Err(EvgError::invalid("AC prescaler out of range 1..=255"));
        }
        self.lock_io().update_check_reg(regs::AC_ENABLE, |old| {
            (old & !regs::AC_ENABLE_DIVIDER_MASK) | u16::from(prescaler)
        })
    }

    pub fn get_ac_prescaler(&self) -> Result<u8> {
        let ac = self.lock_io().read_reg(regs::AC_ENABLE)?;
        Ok((ac & regs::AC_ENABLE_DIVIDER_MASK) as u8)
    }

    pub fn set_ac_sync_source(&self, source: AcSyncSource) -> Result<()> {
        self.lock_io().update_check_reg(regs::AC_ENABLE, |old| match source {
            AcSyncSource::Event => old & !regs::AC_ENABLE_SYNC,
            AcSyncSource::Mxc7 => old | regs::AC_ENABLE_SYNC,
        })
    }

    pub fn get_ac_sync_source(&self) -> Result<AcSyncSource> {
        let ac = self.lock_io().read_reg(regs::AC_ENABLE)?;
        Ok(if ac & regs::AC_ENABLE_SYNC != 0 {
            AcSyncSource::Mxc7
        } else {
            AcSyncSource::Event
        })
    }

    // Sequencers.

    pub fn enable_sequencer(&self, sequencer: u8, on: bool) -> Result<()> {
        let bank = self.sequencer(sequencer)?;
        let mut io = self.lock_io();
        let enables = io.read_reg(regs::EVENT_ENABLE)?;
        let enables = if on {
            enables | bank.enable_bit
        } else {
            enables & !bank.enable_bit
        };
        io.write_reg(regs::EVENT_ENABLE, enables)
    }

    pub fn is_sequencer_enabled(&self, sequencer: u8) -> Result<bool> {
        let bank = self.sequencer(sequencer)?;
        let enables = self.lock_io().read_reg(regs::EVENT_ENABLE)?;
        Ok(enables & bank.enable_bit != 0)
    }

    /// Routes the sequencer trigger to software (VME) or the AC mains
    /// trigger. Touches both EVENT_ENABLE and AC_ENABLE; neither write is
    /// read back.
    pub fn set_sequencer_trigger_source(
        &self,
        sequencer: u8,
        source: TriggerSource,
    ) -> Result<()> {
        let bank = self.sequencer(sequencer)?;
        let mut io = self.lock_io();
        let enables = io.read_reg(regs::EVENT_ENABLE)?;
        let enables = match source {
            TriggerSource::Software => enables | regs::EVENT_ENABLE_VME,
            TriggerSource::AcMains => enables & !regs::EVENT_ENABLE_VME,
        };
        io.write_reg(regs::EVENT_ENABLE, enables)?;
        let ac = io.read_reg(regs::AC_ENABLE)?;
        let ac = match source {
            TriggerSource::Software => ac & !bank.ac_trigger_bit,
            TriggerSource::AcMains => ac | bank.ac_trigger_bit,
        };
        io.write_reg(regs::AC_ENABLE, ac)
    }

    pub fn get_sequencer_trigger_source(&self, sequencer: u8) -> Result<TriggerSource> {
        let bank = self.sequencer(sequencer)?;
        let ac = self.lock_io().read_reg(regs::AC_ENABLE)?;
        Ok(if ac & bank.ac_trigger_bit != 0 {
            TriggerSource::AcMains
        } else {
            TriggerSource::Software
        })
    }

    pub fn set_sequencer_prescaler(&self, sequencer: u8, prescaler: u16) -> Result<()> {
        let bank = self.sequencer(sequencer)?;
        self.lock_io().write_check_reg(bank.clock_select, prescaler)
    }

    pub fn get_sequencer_prescaler(&self, sequencer: u8) -> Result<u16> {
        let bank = self.sequencer(sequencer)?;
        self.lock_io().read_reg(bank.clock_select)
    }

    /// Pulses the sequencer's software trigger bit. The bit self-clears, so
    /// there is no read-back.
    pub fn trigger_sequencer(&self, sequencer: u8) -> Result<()> {
        let bank = self.sequencer(sequencer)?;
        let mut io = self.lock_io();
        let control = io.read_reg(regs::CONTROL)?;
        io.write_reg(regs::CONTROL, control | bank.trigger_bit)
    }

    // Sequence RAM. These use the address-latch protocol: the RAM address
    // goes into the bank's address register, then the data registers access
    // the latched entry. The device lock keeps the two steps adjacent.

    fn check_ram_address(address: u16) -> Result<()> {
        if address > regs::SEQ_RAM_LAST_ADDRESS {
            return Err(EvgError::invalid(format!(
                "sequence RAM address {address} out of range 0..={}",
                regs::SEQ_RAM_LAST_ADDRESS
            )));
        }
        Ok(())
    }

    fn check_event_code(code: u8) -> Result<()> {
        if code > regs::EVENT_CODE_MAX {
            return Err(EvgError::invalid(format!(
                "event code {code:#04x} out of range 0..={:#04x}",
                regs::EVENT_CODE_MAX
            )));
        }
        Ok(())
    }

    /// Programs the event code at one sequence RAM address.
    pub fn set_event(&self, sequencer: u8, address: u16, code: u8) -> Result<()> {
        let bank = self.sequencer(sequencer)?;
        Self::check_ram_address(address)?;
        Self::check_event_code(code)?;
        let mut io = self.lock_io();
        io.write_check_reg(bank.address, address)?;
        io.write_check_reg(bank.code, u16::from(code))
    }

    pub fn get_event(&self, sequencer: u8, address: u16) -> Result<u8> {
        let bank = self.sequencer(sequencer)?;
        Self::check_ram_address(address)?;
        let mut io = self.lock_io();
        io.write_check_reg(bank.address, address)?;
        Ok(io.read_reg(bank.code)? as u8)
    }

    /// Programs the timestamp at one sequence RAM address, in seconds
    /// relative to sequence start. The value is converted to reference
    /// clock cycles and must fit the card's 32-bit cycle counter.
    pub fn set_timestamp(&self, sequencer: u8, address: u16, seconds: f64) -> Result<()> {
        let bank = self.sequencer(sequencer)?;
        Self::check_ram_address(address)?;
        let cycles = (seconds * f64::from(self.frequency_hz)).round();
        if !cycles.is_finite() || cycles < 0.0 || cycles > f64::from(u32::MAX) {
            return Err(EvgError::invalid(format!(
                "timestamp {seconds} s exceeds the 32-bit cycle counter at {} Hz",
                self.frequency_hz
            )));
        }
        let cycles = cycles as u32;
        let mut io = self.lock_io();
        io.write_check_reg(bank.address, address)?;
        io.write_check_reg(bank.time, (cycles >> 16) as u16)?;
        io.write_check_reg(bank.time + 2, (cycles & 0xFFFF) as u16)
    }

    pub fn get_timestamp(&self, sequencer: u8, address: u16) -> Result<f64> {
        let bank = self.sequencer(sequencer)?;
        Self::check_ram_address(address)?;
        let mut io = self.lock_io();
        io.write_check_reg(bank.address, address)?;
        let hi = io.read_reg(bank.time)?;
        let lo = io.read_reg(bank.time + 2)?;
        let cycles = (u32::from(hi) << 16) | u32::from(lo);
        Ok(f64::from(cycles) / f64::from(self.frequency_hz))
    }

    // Multiplexed counters. MXC_PRESCALER is a window onto the selected
    // counter's 32-bit prescaler; MXC_CONTROL latches counter and half.

    fn check_counter(counter: u8) -> Result<()> {
        if counter >= regs::MXC_COUNT {
            return Err(EvgError::invalid(format!(
                "counter {counter} out of range 0..={}",
                regs::MXC_COUNT - 1
            )));
        }
        Ok(())
    }

    pub fn set_counter_prescaler(&self, counter: u8, prescaler: u32) -> Result<()> {
        Self::check_counter(counter)?;
        let select = u16::from(counter);
        let mut io = self.lock_io();
        io.write_check_reg(regs::MXC_CONTROL, regs::MXC_CONTROL_HIGH_WORD | select)?;
        io.write_check_reg(regs::MXC_PRESCALER, (prescaler >> 16) as u16)?;
        io.write_check_reg(regs::MXC_CONTROL, select)?;
        io.write_check_reg(regs::MXC_PRESCALER, (prescaler & 0xFFFF) as u16)
    }

    pub fn get_counter_prescaler(&self, counter: u8) -> Result<u32> {
        Self::check_counter(counter)?;
        let select = u16::from(counter);
        let mut io = self.lock_io();
        io.write_check_reg(regs::MXC_CONTROL, regs::MXC_CONTROL_HIGH_WORD | select)?;
        let hi = io.read_reg(regs::MXC_PRESCALER)?;
        io.write_check_reg(regs::MXC_CONTROL, select)?;
        let lo = io.read_reg(regs::MXC_PRESCALER)?;
        Ok((u32::from(hi) << 16) | u32::from(lo))
    }

    // Misc.

    pub fn get_firmware_version(&self) -> Result<u16> {
        self.lock_io().read_reg(regs::FIRMWARE)
    }

    /// Broadcasts a one-shot software event. Write-only register, no
    /// read-back.
    pub fn set_software_event(&self, code: u8) -> Result<()> {
        Self::check_event_code(code)?;
        self.lock_io().write_reg(regs::SW_EVENT, u16::from(code))
    }

    /// Card-reset sequence: master disable, all sequencers off, and an
    /// end-of-sequence code at address 0 of each present sequence RAM so a
    /// stray trigger terminates immediately.
    pub fn reset(&self) -> Result<()> {
        let mut io = self.lock_io();
        io.write_reg(regs::CONTROL, regs::CONTROL_DISABLE)?;
        let mut enables = io.read_reg(regs::EVENT_ENABLE)?;
        for bank in self.sequencers() {
            enables &= !bank.enable_bit;
        }
        io.write_reg(regs::EVENT_ENABLE, enables)?;
        for bank in self.sequencers() {
            io.write_check_reg(bank.address, 0)?;
            io.write_check_reg(bank.code, u16::from(regs::EVENT_CODE_END))?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("frequency_hz", &self.frequency_hz)
            .field("revision", &self.revision)
            .finish_non_exhaustive()
    }
}
