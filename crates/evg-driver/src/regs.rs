//! VME-EVG230 register map.
//!
//! Offsets and bitfields here are the contract with the card firmware; they
//! must not be reordered or renumbered. The map is the superset across card
//! revisions; single-sequencer revisions simply never address the second
//! bank of [`SEQUENCERS`].

pub const CONTROL: u16 = 0x00;
pub const EVENT_ENABLE: u16 = 0x02;
pub const SW_EVENT: u16 = 0x04;
pub const SEQ_CLOCK_SEL1: u16 = 0x24;
pub const SEQ_CLOCK_SEL2: u16 = 0x26;
pub const AC_ENABLE: u16 = 0x28;
pub const MXC_CONTROL: u16 = 0x2A;
pub const MXC_PRESCALER: u16 = 0x2C;
pub const FIRMWARE: u16 = 0x2E;
pub const RF_CONTROL: u16 = 0x40;
pub const SEQ_ADDRESS0: u16 = 0x44;
pub const SEQ_CODE0: u16 = 0x46;
pub const SEQ_TIME0: u16 = 0x48;
pub const SEQ_ADDRESS1: u16 = 0x50;
pub const SEQ_CODE1: u16 = 0x52;
pub const SEQ_TIME1: u16 = 0x54;
pub const USEC_DIVIDER: u16 = 0x68;

// CONTROL. The enable/disable values are full register images, not single
// bits; bit 15 reads back as the disable flag.
pub const CONTROL_ENABLE: u16 = 0x7001;
pub const CONTROL_DISABLE: u16 = 0xF001;
pub const CONTROL_DISABLE_BIT: u16 = 0x8000;
pub const CONTROL_VTRG1: u16 = 0x0100;
pub const CONTROL_VTRG2: u16 = 0x0080;

// EVENT_ENABLE.
pub const EVENT_ENABLE_VME: u16 = 0x0001;
pub const EVENT_ENABLE_SEQUENCER0: u16 = 0x0004;
pub const EVENT_ENABLE_SEQUENCER1: u16 = 0x0002;

// AC_ENABLE.
pub const AC_ENABLE_DIVIDER_MASK: u16 = 0x00FF;
pub const AC_ENABLE_SYNC: u16 = 0x1000;
pub const AC_ENABLE_SEQ0: u16 = 0x4000;
pub const AC_ENABLE_SEQ1: u16 = 0x8000;

// RF_CONTROL.
pub const RF_CONTROL_EXTERNAL: u16 = 0x01C0;
pub const RF_CONTROL_DIVIDER_MASK: u16 = 0x003F;

// MXC_CONTROL. Low bits select the counter, bit 3 selects which half of the
// 32-bit prescaler MXC_PRESCALER addresses.
pub const MXC_CONTROL_HIGH_WORD: u16 = 0x0008;

/// Event code that terminates a sequence.
pub const EVENT_CODE_END: u8 = 0x7F;
/// Event codes are 7 bits wide.
pub const EVENT_CODE_MAX: u8 = 0x7F;
/// Last valid sequence RAM address.
pub const SEQ_RAM_LAST_ADDRESS: u16 = 2047;
/// Number of multiplexed counters.
pub const MXC_COUNT: u8 = 8;

/// Per-sequencer register bank. The sequence RAM behind `address`/`code`/
/// `time` uses an address-latch protocol: write the RAM address to
/// `address`, then access the data registers.
#[derive(Debug, Clone, Copy)]
pub struct SequencerBank {
    /// RAM address latch.
    pub address: u16,
    /// Event code at the latched address.
    pub code: u16,
    /// High word of the 32-bit timestamp; the low word lives at `time + 2`.
    pub time: u16,
    /// Sequencer clock prescaler register.
    pub clock_select: u16,
    /// Enable bit in EVENT_ENABLE.
    pub enable_bit: u16,
    /// Software trigger bit in CONTROL.
    pub trigger_bit: u16,
    /// AC-mains trigger routing bit in AC_ENABLE.
    pub ac_trigger_bit: u16,
}

/// Register banks of both sequencer engines, indexed by sequencer number.
pub const SEQUENCERS: [SequencerBank; 2] = [
    SequencerBank {
        address: SEQ_ADDRESS0,
        code: SEQ_CODE0,
        time: SEQ_TIME0,
        clock_select: SEQ_CLOCK_SEL1,
        enable_bit: EVENT_ENABLE_SEQUENCER0,
        trigger_bit: CONTROL_VTRG1,
        ac_trigger_bit: AC_ENABLE_SEQ0,
    },
    SequencerBank {
        address: SEQ_ADDRESS1,
        code: SEQ_CODE1,
        time: SEQ_TIME1,
        clock_select: SEQ_CLOCK_SEL2,
        enable_bit: EVENT_ENABLE_SEQUENCER1,
        trigger_bit: CONTROL_VTRG2,
        ac_trigger_bit: AC_ENABLE_SEQ1,
    },
];
