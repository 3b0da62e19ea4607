use std::net::SocketAddr;
use thiserror::Error;

/// Failure while parsing or producing wire data. These are scoped to a single packet: the packet
///  is dropped and no circuit state is touched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("buffer underrun: {required} bytes required, {available} available")]
    BufferUnderrun {
        required: usize,
        available: usize,
    },

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
}

pub type CodecResult<T> = Result<T, CodecError>;

#[derive(Debug, Error)]
pub enum CircuitError {
    /// The peer did not acknowledge a reliably sent packet in time. This is the only signal of
    ///  peer unreachability, and it is up to the caller to decide whether to tear down the circuit.
    #[error("packet #{sequence} to {peer} was not acknowledged in time")]
    Timeout {
        peer: SocketAddr,
        sequence: u32,
    },

    #[error("circuit to {0} is stopped")]
    Stopped(SocketAddr),

    #[error("packet of {len} bytes exceeds the MTU of {mtu} bytes")]
    MessageTooLarge {
        len: usize,
        mtu: usize,
    },

    /// A circuit was requested with timing or size parameters it cannot run with
    #[error("invalid circuit configuration: {0}")]
    InvalidConfig(String),

    #[error("transport for circuit to {0} is shut down")]
    TransportClosed(SocketAddr),

    #[error(transparent)]
    Codec(#[from] CodecError),
}
