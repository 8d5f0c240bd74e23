use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

use evg_register_protocol::{decode_message, encode_message, RegisterMessage, MESSAGE_LEN};
use tracing::{debug, warn};

use crate::config::DriverConfig;
use crate::error::{EvgError, Result};

/// One request/reply round trip with the register gateway.
///
/// Implementations are exclusively owned by a device and are only ever
/// driven under that device's lock, so exchanges on one device form a strict
/// sequence.
pub trait RegisterExchange: Send {
    fn exchange(&mut self, request: &RegisterMessage) -> Result<RegisterMessage>;
}

/// Connected UDP endpoint to one gateway, with bounded retransmission.
pub(crate) struct UdpGatewayLink {
    socket: UdpSocket,
    endpoint: SocketAddr,
    max_retries: u32,
}

impl UdpGatewayLink {
    pub(crate) fn connect(endpoint: SocketAddr, config: &DriverConfig) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .map_err(|err| EvgError::socket(format!("bind UDP socket for {endpoint}"), err))?;
        socket
            .connect(endpoint)
            .map_err(|err| EvgError::socket(format!("connect to {endpoint}"), err))?;
        socket
            .set_read_timeout(Some(config.reply_timeout))
            .map_err(|err| EvgError::socket(format!("set reply timeout for {endpoint}"), err))?;
        Ok(Self {
            socket,
            endpoint,
            max_retries: config.max_retries,
        })
    }
}

impl RegisterExchange for UdpGatewayLink {
    /// Sends the request and waits for one reply per attempt. Send failures,
    /// timeouts, and malformed datagrams all consume an attempt; the reply
    /// status byte does not (the card is authoritative).
    fn exchange(&mut self, request: &RegisterMessage) -> Result<RegisterMessage> {
        let frame = encode_message(request);
        for attempt in 1..=self.max_retries {
            if attempt > 1 {
                debug!(
                    endpoint = %self.endpoint,
                    attempt,
                    max = self.max_retries,
                    "retransmitting register request"
                );
            }
            match self.socket.send(&frame) {
                Ok(n) if n == frame.len() => {}
                Ok(n) => {
                    warn!(endpoint = %self.endpoint, sent = n, "partial datagram send");
                    continue;
                }
                Err(err) => {
                    warn!(endpoint = %self.endpoint, error = %err, "send failed");
                    continue;
                }
            }

            let mut buf = [0u8; 2 * MESSAGE_LEN];
            match self.socket.recv(&mut buf) {
                Ok(n) => match decode_message(&buf[..n]) {
                    Ok(reply) => return Ok(reply),
                    Err(err) => {
                        debug!(endpoint = %self.endpoint, error = %err, "malformed reply");
                        continue;
                    }
                },
                Err(err) if is_timeout(&err) => {
                    debug!(endpoint = %self.endpoint, attempt, "reply timeout");
                    continue;
                }
                Err(err) => {
                    // ICMP port-unreachable surfaces here on connected
                    // sockets; the gateway may simply not be up yet.
                    warn!(endpoint = %self.endpoint, error = %err, "receive failed");
                    continue;
                }
            }
        }
        Err(EvgError::TransportTimeout {
            endpoint: self.endpoint,
            attempts: self.max_retries,
        })
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
