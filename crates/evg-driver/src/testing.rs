//! Test doubles: a scripted in-process register link and a UDP card
//! emulator. Integration tests drive the public driver surface against
//! these instead of real hardware.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use evg_register_protocol::{decode_message, encode_message, Access, RegisterMessage};

use crate::config::DEFAULT_MAX_RETRIES;
use crate::error::{EvgError, Result};
use crate::registry::EvgDriver;
use crate::regs;
use crate::transport::RegisterExchange;

/// Installs `link` as the named device's register link, moving it to the
/// ready state without any socket I/O.
pub fn install_link(
    driver: &EvgDriver,
    name: &str,
    link: impl RegisterExchange + 'static,
) -> Result<()> {
    let device = driver.open(name)?;
    device.install_link(Box::new(link));
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    /// Reply to a read with this value.
    Data(u16),
    /// Acknowledge a write by echoing it.
    Ack,
    /// Fail the exchange as if every retransmission went unanswered.
    Timeout,
}

#[derive(Debug)]
struct Step {
    access: Access,
    register: u16,
    /// For writes: the exact payload the test expects.
    data: Option<u16>,
    outcome: Outcome,
}

#[derive(Debug, Default)]
struct ScriptState {
    steps: VecDeque<Step>,
    requests: Vec<RegisterMessage>,
}

/// A register link that follows a pre-programmed script and panics on any
/// deviation, so a test failure points at the first unexpected exchange.
pub struct ScriptedLink {
    state: Arc<Mutex<ScriptState>>,
}

/// Shared view of a [`ScriptedLink`]'s progress.
#[derive(Clone)]
pub struct ScriptProbe {
    state: Arc<Mutex<ScriptState>>,
}

/// Creates a scripted link and the probe observing it.
pub fn scripted() -> (ScriptedLink, ScriptProbe) {
    let state = Arc::new(Mutex::new(ScriptState::default()));
    (
        ScriptedLink {
            state: state.clone(),
        },
        ScriptProbe { state },
    )
}

impl ScriptedLink {
    fn push(self, step: Step) -> Self {
        self.state.lock().unwrap().steps.push_back(step);
        self
    }

    /// Expect a read of `register`; reply with `value`.
    pub fn expect_read(self, register: u16, value: u16) -> Self {
        self.push(Step {
            access: Access::Read,
            register,
            data: None,
            outcome: Outcome::Data(value),
        })
    }

    /// Expect a write of `value` to `register`; acknowledge it.
    pub fn expect_write(self, register: u16, value: u16) -> Self {
        self.push(Step {
            access: Access::Write,
            register,
            data: Some(value),
            outcome: Outcome::Ack,
        })
    }

    /// Expect the write/read-back pair of a verified write.
    pub fn expect_write_check(self, register: u16, value: u16) -> Self {
        self.expect_write(register, value).expect_read(register, value)
    }

    /// Expect a read of `register` and fail it with a transport timeout.
    pub fn expect_read_timeout(self, register: u16) -> Self {
        self.push(Step {
            access: Access::Read,
            register,
            data: None,
            outcome: Outcome::Timeout,
        })
    }

    /// Expect a write to `register` and fail it with a transport timeout.
    pub fn expect_write_timeout(self, register: u16, value: u16) -> Self {
        self.push(Step {
            access: Access::Write,
            register,
            data: Some(value),
            outcome: Outcome::Timeout,
        })
    }
}

impl RegisterExchange for ScriptedLink {
    fn exchange(&mut self, request: &RegisterMessage) -> Result<RegisterMessage> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(*request);
        let step = match state.steps.pop_front() {
            Some(step) => step,
            None => panic!(
                "unexpected exchange after script end: {:?} register {:#04x}",
                request.access,
                request.register()
            ),
        };
        assert_eq!(
            request.access,
            step.access,
            "scripted access mismatch at register {:#04x}",
            request.register()
        );
        assert_eq!(
            request.register(),
            step.register,
            "scripted register mismatch: expected {:#04x}, got {:#04x}",
            step.register,
            request.register()
        );
        if let Some(expected) = step.data {
            assert_eq!(
                request.data, expected,
                "scripted payload mismatch at register {:#04x}",
                step.register
            );
        }
        match step.outcome {
            Outcome::Data(value) => Ok(RegisterMessage {
                data: value,
                ..*request
            }),
            Outcome::Ack => Ok(*request),
            Outcome::Timeout => Err(EvgError::TransportTimeout {
                endpoint: SocketAddr::from(([0, 0, 0, 0], 0)),
                attempts: DEFAULT_MAX_RETRIES,
            }),
        }
    }
}

impl ScriptProbe {
    /// All requests the device issued so far, in order.
    pub fn requests(&self) -> Vec<RegisterMessage> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Number of scripted steps not yet consumed.
    pub fn outstanding(&self) -> usize {
        self.state.lock().unwrap().steps.len()
    }

    /// Asserts that the whole script was consumed.
    pub fn assert_drained(&self) {
        let state = self.state.lock().unwrap();
        assert!(
            state.steps.is_empty(),
            "{} scripted step(s) left unconsumed",
            state.steps.len()
        );
    }
}

const SEQ_RAM_SIZE: usize = 2048;

#[derive(Debug)]
struct CardState {
    raw: HashMap<u16, u16>,
    seq_code: [Vec<u8>; 2],
    seq_time: [Vec<u32>; 2],
    mxc_prescaler: [u32; 8],
}

impl CardState {
    fn new() -> Self {
        Self {
            raw: HashMap::new(),
            seq_code: [vec![0; SEQ_RAM_SIZE], vec![0; SEQ_RAM_SIZE]],
            seq_time: [vec![0; SEQ_RAM_SIZE], vec![0; SEQ_RAM_SIZE]],
            mxc_prescaler: [0; 8],
        }
    }

    fn raw(&self, register: u16) -> u16 {
        self.raw.get(&register).copied().unwrap_or(0)
    }

    fn latched_address(&self, bank: &regs::SequencerBank) -> usize {
        usize::from(self.raw(bank.address)) % SEQ_RAM_SIZE
    }

    fn store(&mut self, register: u16, value: u16) {
        for (i, bank) in regs::SEQUENCERS.iter().enumerate() {
            let latched = self.latched_address(bank);
            if register == bank.code {
                self.seq_code[i][latched] = value as u8;
            } else if register == bank.time {
                self.seq_time[i][latched] =
                    (self.seq_time[i][latched] & 0xFFFF) | (u32::from(value) << 16);
            } else if register == bank.time + 2 {
                self.seq_time[i][latched] =
                    (self.seq_time[i][latched] & 0xFFFF_0000) | u32::from(value);
            }
        }
        if register == regs::MXC_PRESCALER {
            let select = self.raw(regs::MXC_CONTROL);
            let counter = usize::from(select & 0x7);
            if select & regs::MXC_CONTROL_HIGH_WORD != 0 {
                self.mxc_prescaler[counter] =
                    (self.mxc_prescaler[counter] & 0xFFFF) | (u32::from(value) << 16);
            } else {
                self.mxc_prescaler[counter] =
                    (self.mxc_prescaler[counter] & 0xFFFF_0000) | u32::from(value);
            }
        }
        self.raw.insert(register, value);
    }

    fn load(&self, register: u16) -> u16 {
        for (i, bank) in regs::SEQUENCERS.iter().enumerate() {
            let latched = self.latched_address(bank);
            if register == bank.code {
                return u16::from(self.seq_code[i][latched]);
            } else if register == bank.time {
                return (self.seq_time[i][latched] >> 16) as u16;
            } else if register == bank.time + 2 {
                return (self.seq_time[i][latched] & 0xFFFF) as u16;
            }
        }
        if register == regs::MXC_PRESCALER {
            let select = self.raw(regs::MXC_CONTROL);
            let counter = usize::from(select & 0x7);
            return if select & regs::MXC_CONTROL_HIGH_WORD != 0 {
                (self.mxc_prescaler[counter] >> 16) as u16
            } else {
                (self.mxc_prescaler[counter] & 0xFFFF) as u16
            };
        }
        self.raw(register)
    }
}

/// A minimal EVG-230 gateway emulator on a real UDP socket.
///
/// Models the register file, the address-latched sequence RAMs, and the
/// multiplexed-counter prescaler window. Reply loss is injectable to
/// exercise the transport's retransmission path.
pub struct MockCard {
    addr: SocketAddr,
    state: Arc<Mutex<CardState>>,
    stop: Arc<AtomicBool>,
    drop_next: Arc<AtomicU32>,
    mute: Arc<AtomicBool>,
    requests_seen: Arc<AtomicU32>,
    thread: Option<JoinHandle<()>>,
}

impl MockCard {
    pub fn start() -> io::Result<Self> {
        let socket = UdpSocket::bind(("127.0.0.1", 0))?;
        socket.set_read_timeout(Some(Duration::from_millis(25)))?;
        let addr = socket.local_addr()?;

        let state = Arc::new(Mutex::new(CardState::new()));
        let stop = Arc::new(AtomicBool::new(false));
        let drop_next = Arc::new(AtomicU32::new(0));
        let mute = Arc::new(AtomicBool::new(false));
        let requests_seen = Arc::new(AtomicU32::new(0));

        let thread = {
            let state = state.clone();
            let stop = stop.clone();
            let drop_next = drop_next.clone();
            let mute = mute.clone();
            let requests_seen = requests_seen.clone();
            std::thread::spawn(move || {
                let mut buf = [0u8; 64];
                while !stop.load(Ordering::Relaxed) {
                    let (n, peer) = match socket.recv_from(&mut buf) {
                        Ok(received) => received,
                        Err(_) => continue,
                    };
                    let request = match decode_message(&buf[..n]) {
                        Ok(request) => request,
                        Err(_) => continue,
                    };
                    requests_seen.fetch_add(1, Ordering::Relaxed);
                    if mute.load(Ordering::Relaxed) {
                        continue;
                    }
                    if drop_next
                        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                            n.checked_sub(1)
                        })
                        .is_ok()
                    {
                        continue;
                    }
                    let register = request.register();
                    let reply = {
                        let mut state = state.lock().unwrap();
                        match request.access {
                            Access::Read => RegisterMessage {
                                data: state.load(register),
                                ..request
                            },
                            Access::Write => {
                                state.store(register, request.data);
                                request
                            }
                        }
                    };
                    let _ = socket.send_to(&encode_message(&reply), peer);
                }
            })
        };

        Ok(Self {
            addr,
            state,
            stop,
            drop_next,
            mute,
            requests_seen,
            thread: Some(thread),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Swallow the next `n` requests without replying.
    pub fn drop_requests(&self, n: u32) {
        self.drop_next.store(n, Ordering::Relaxed);
    }

    /// Stop replying entirely (requests are still counted).
    pub fn mute(&self, on: bool) {
        self.mute.store(on, Ordering::Relaxed);
    }

    pub fn requests_seen(&self) -> u32 {
        self.requests_seen.load(Ordering::Relaxed)
    }

    /// Raw register value, as the card would serve a read of it.
    pub fn register(&self, register: u16) -> u16 {
        self.state.lock().unwrap().load(register)
    }

    /// Preload a register value.
    pub fn set_register(&self, register: u16, value: u16) {
        self.state.lock().unwrap().store(register, value);
    }

    /// Event code stored in a sequence RAM, bypassing the address latch.
    pub fn event_code(&self, sequencer: u8, address: u16) -> u8 {
        self.state.lock().unwrap().seq_code[usize::from(sequencer)][usize::from(address)]
    }

    /// Timestamp cycles stored in a sequence RAM, bypassing the address
    /// latch.
    pub fn timestamp_cycles(&self, sequencer: u8, address: u16) -> u32 {
        self.state.lock().unwrap().seq_time[usize::from(sequencer)][usize::from(address)]
    }
}

impl Drop for MockCard {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
