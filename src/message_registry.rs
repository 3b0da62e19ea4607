use std::any::Any;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use bytes::{Buf, Bytes};
use tracing::debug;

use crate::error::CodecResult;
use crate::packet::MessageId;
use crate::util::atomic_map::AtomicMap;

pub type DecodedPayload = Arc<dyn Any + Send + Sync>;

/// Turns a message body into a typed value, reading it with [BufExt](crate::codec::BufExt).
///  A decoder consumes exactly its own fields; the framer has already stripped header and ack
///  block.
pub trait MessageDecoder: Send + Sync {
    fn decode(&self, buf: &mut Bytes) -> CodecResult<DecodedPayload>;
}

impl <F> MessageDecoder for F
where F: Fn(&mut Bytes) -> CodecResult<DecodedPayload> + Send + Sync
{
    fn decode(&self, buf: &mut Bytes) -> CodecResult<DecodedPayload> {
        self(buf)
    }
}

#[derive(Clone)]
pub enum MessagePayload {
    Decoded(DecodedPayload),
    /// No decoder is registered for the message id. This is not an error: the peer may be
    ///  newer than this code.
    Unrecognized(Bytes),
}
impl MessagePayload {
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            MessagePayload::Decoded(payload) => payload.downcast_ref(),
            MessagePayload::Unrecognized(_) => None,
        }
    }

    pub fn is_unrecognized(&self) -> bool {
        matches!(self, MessagePayload::Unrecognized(_))
    }
}
impl Debug for MessagePayload {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MessagePayload::Decoded(_) => write!(f, "Decoded"),
            MessagePayload::Unrecognized(body) => write!(f, "Unrecognized({} bytes)", body.len()),
        }
    }
}

/// Message id -> decoder. Registration is expected to happen at startup, lookups happen for
///  every inbound packet.
#[derive(Default)]
pub struct MessageRegistry {
    decoders: AtomicMap<MessageId, Arc<dyn MessageDecoder>>,
}

impl MessageRegistry {
    pub fn new() -> MessageRegistry {
        MessageRegistry::default()
    }

    /// Replaces a previously registered decoder for the same id
    pub fn register(&self, id: MessageId, decoder: impl MessageDecoder + 'static) {
        let decoder: Arc<dyn MessageDecoder> = Arc::new(decoder);
        if self.decoders.update(|m| m.insert(id, decoder)).is_some() {
            debug!("replaced decoder for message {}", id);
        }
    }

    pub fn is_registered(&self, id: MessageId) -> bool {
        self.decoders.load().contains_key(&id)
    }

    pub fn decode(&self, id: MessageId, body: &Bytes) -> CodecResult<MessagePayload> {
        let Some(decoder) = self.decoders.get(&id) else {
            debug!("no decoder registered for message {} - passing on {} raw bytes", id, body.len());
            return Ok(MessagePayload::Unrecognized(body.clone()));
        };

        let mut buf = body.clone();
        let decoded = decoder.decode(&mut buf)?;
        if buf.has_remaining() {
            debug!("decoder for message {} left {} trailing bytes", id, buf.remaining());
        }
        Ok(MessagePayload::Decoded(decoded))
    }
}
