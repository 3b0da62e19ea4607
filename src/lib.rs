//! Reliable messaging over UDP for virtual-world clients and servers.
//!
//! A [transport::Transport] owns one UDP socket and multiplexes [circuit::Circuit]s over it, one
//!  per remote endpoint. A circuit numbers outgoing packets, tracks which of its reliable packets
//!  the peer has not acked yet, and acks the peer's reliable packets, either appended to outgoing
//!  packets or in dedicated ack packets.
//!
//! ```ascii
//! +-------+----------+-----------+-------+------------+------+----------------+
//! | flags | sequence | extra len | extra | message id | body | acks, ack count|
//! | u8    | u32 BE   | u8        |       | 1-4 bytes  |      | u32 BE.., u8   |
//! +-------+----------+-----------+-------+------------+------+----------------+
//!                                        \___ zero-coded if flagged ___/
//! ```

pub mod circuit;
pub mod codec;
pub mod config;
pub mod error;
pub mod event_handler;
pub mod message_registry;
pub mod packet;
pub mod test_util;
pub mod transport;
pub mod util;
