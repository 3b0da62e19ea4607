use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::bail;

use crate::packet::ack_block;
use crate::packet::PacketHeader;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Local address of the single UDP socket. Port 0 lets the OS pick a port.
    pub local_addr: SocketAddr,

    /// Size of the buffer each datagram is received into. Datagrams that are bigger are
    ///  truncated by the OS and will then fail to decode, so this should be comfortably bigger
    ///  than any peer's MTU.
    pub receive_buffer_size: usize,

    /// Defaults for circuits created through the transport. Heartbeat interval and circuit
    ///  timeout can be overridden per circuit.
    pub circuit: CircuitConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            local_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            receive_buffer_size: 4096,
            circuit: CircuitConfig::default(),
        }
    }
}

impl TransportConfig {
    pub fn with_port(port: u16) -> TransportConfig {
        TransportConfig {
            local_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            ..TransportConfig::default()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.receive_buffer_size < self.circuit.mtu {
            bail!("receive buffer size {} is smaller than the MTU {}", self.receive_buffer_size, self.circuit.mtu);
        }
        self.circuit.validate()
    }
}

#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Maximum size of an outbound packet including header and appended acks. This is the UDP
    ///  payload size; IP and UDP headers are not included.
    pub mtu: usize,

    /// How often the circuit checks for peer silence
    pub heartbeat_interval: Duration,

    /// A circuit that has not received anything for this long is considered dead
    pub circuit_timeout: Duration,

    /// Owed acks are sent in a dedicated ack packet if nothing was sent for this long. Until
    ///  then, they are piggybacked on regular packets.
    pub ack_coalesce_threshold: Duration,

    /// Granularity of the check for owed acks
    pub ack_tick_interval: Duration,

    /// Time to wait for an ack after sending a packet reliably
    pub reliable_timeout: Duration,

    /// How often a reliable packet is re-sent before giving up. With 0, a reliable send waits
    ///  once for `reliable_timeout` and then fails.
    pub max_resends: u32,

    /// Each re-send waits `resend_backoff_factor_eighths / 8` times as long as the previous
    ///  attempt
    pub resend_backoff_factor_eighths: u32,

    pub max_resend_timeout: Duration,

    /// Number of recently received sequence numbers that are remembered to suppress duplicates
    pub duplicate_window: usize,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        CircuitConfig {
            mtu: 1200,
            heartbeat_interval: Duration::from_secs(5),
            circuit_timeout: Duration::from_secs(100),
            ack_coalesce_threshold: Duration::from_secs(2),
            ack_tick_interval: Duration::from_millis(10),
            reliable_timeout: Duration::from_secs(1),
            max_resends: 3,
            resend_backoff_factor_eighths: 12,
            max_resend_timeout: Duration::from_secs(5),
            duplicate_window: 1024,
        }
    }
}

impl CircuitConfig {
    /// Smallest MTU that still fits a header, a 4-byte message id and one ack
    pub const MIN_MTU: usize = PacketHeader::FIXED_LEN + 4 + ack_block::ACK_LEN + 1;

    pub fn with_timing(&self, heartbeat_interval: Duration, circuit_timeout: Duration) -> CircuitConfig {
        CircuitConfig {
            heartbeat_interval,
            circuit_timeout,
            ..self.clone()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.mtu < Self::MIN_MTU {
            bail!("MTU {} is too small, the minimum is {}", self.mtu, Self::MIN_MTU);
        }
        if self.heartbeat_interval.is_zero() {
            bail!("heartbeat interval must be positive");
        }
        if self.circuit_timeout < self.heartbeat_interval {
            bail!("circuit timeout {:?} is shorter than the heartbeat interval {:?}", self.circuit_timeout, self.heartbeat_interval);
        }
        if self.ack_tick_interval.is_zero() {
            bail!("ack tick interval must be positive");
        }
        if self.reliable_timeout.is_zero() {
            bail!("reliable timeout must be positive");
        }
        if self.resend_backoff_factor_eighths < 8 {
            bail!("resend backoff factor must be at least 8 (i.e. 1.0)");
        }
        if self.max_resend_timeout < self.reliable_timeout {
            bail!("max resend timeout {:?} is shorter than the reliable timeout {:?}", self.max_resend_timeout, self.reliable_timeout);
        }
        if self.duplicate_window == 0 {
            bail!("duplicate window must not be empty");
        }
        Ok(())
    }
}
