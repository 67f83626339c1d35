use tracing::trace;

use super::{Envelope, Header, MAX_MESSAGE_BYTES, PresenceBits, read_frame, truncated};
use crate::registry::Registry;
use crate::serialization::Decode;
use crate::{Error, Rejection};

impl Envelope {
    /// Decodes a received packet.
    ///
    /// The presence bitfield is walked in ascending id order. Kinds this registry does not know
    /// are skipped using their length prefix. No callbacks run here: a packet is either decoded
    /// completely or rejected as a whole, see [`Envelope::dispatch_callbacks`].
    pub fn unpack(registry: &Registry, packet: &[u8]) -> Result<Self, Rejection> {
        if packet.len() > MAX_MESSAGE_BYTES {
            return Err(Rejection::Oversized { len: packet.len() });
        }

        let mut cursor = packet;

        let header = Header::decode(&mut cursor).map_err(rejection)?;
        let presence = PresenceBits::decode(&mut cursor).map_err(rejection)?;

        let mut envelope = Envelope::new(header);
        for id in presence.iter() {
            let Some(descriptor) = registry.lookup_by_id(id) else {
                let frame = read_frame(&mut cursor).map_err(rejection)?;
                trace!(kind = %id, len = frame.len(), "skipping unknown component");
                continue;
            };

            // Every descriptor in a frozen registry has an id.
            let Some(mut instance) = descriptor.instantiate() else {
                continue;
            };
            instance.deserialize(&mut cursor).map_err(rejection)?;
            envelope.insert(instance);
        }

        if !cursor.is_empty() {
            trace!(trailing = cursor.len(), sender = header.sender, "ignoring trailing bytes");
        }

        Ok(envelope)
    }
}

/// Every decode failure inside a packet rejects the packet.
fn rejection(err: Error) -> Rejection {
    match truncated(err) {
        Error::Rejected(rejection) => rejection,
        _ => Rejection::Truncated,
    }
}
