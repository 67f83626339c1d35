use tracing::{debug, trace, warn};

use super::{BITFIELD_SIZE, Envelope, HEADER_SIZE, MAX_MESSAGE_BYTES, PresenceBits};
use crate::Result;
use crate::serialization::Encode;

////////////////////////////////////////////////////////////////////////////////
// Packer implementation
////////////////////////////////////////////////////////////////////////////////

/// Packs envelopes into packets that never exceed the byte budget.
///
/// Components are considered by descending priority (ties by ascending id). A component is
/// included if it fits in what is left of the budget and skipped otherwise; there is no partial
/// inclusion and no search for a better fit, so a large high priority component can push out
/// several smaller ones that would have fit together.
#[derive(Debug, Clone, Copy)]
pub struct Packer {
    budget: usize,
}

impl Default for Packer {
    fn default() -> Self {
        Self {
            budget: MAX_MESSAGE_BYTES,
        }
    }
}

impl Packer {
    /// Creates a packer using the full [`MAX_MESSAGE_BYTES`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a packer with a smaller budget.
    ///
    /// The budget is clamped between the size of an empty message and [`MAX_MESSAGE_BYTES`].
    pub fn with_budget(budget: usize) -> Self {
        Self {
            budget: budget.clamp(HEADER_SIZE + BITFIELD_SIZE, MAX_MESSAGE_BYTES),
        }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Packs as many components of `envelope` as fit into one packet.
    ///
    /// The header and presence bitfield are always written, even if no component fits.
    pub fn pack(&self, envelope: &Envelope) -> Result<Packet> {
        let mut remaining = self.budget - HEADER_SIZE - BITFIELD_SIZE;

        let mut order: Vec<_> = envelope.components().iter().collect();
        order.sort_by_key(|instance| (std::cmp::Reverse(instance.priority()), instance.kind_id()));

        // Serialize the winners right away, they are written in id order afterwards.
        let mut frames = Vec::with_capacity(order.len());
        let mut included = PresenceBits::default();
        for instance in order {
            let size = instance.reported_size();
            if size > remaining {
                trace!(kind = %instance.kind_id(), size, remaining, "component does not fit");
                continue;
            }

            let mut frame = Vec::with_capacity(size);
            let written = instance.serialize(&mut frame)?;
            if written != size {
                warn!(
                    kind = %instance.kind_id(),
                    size,
                    written,
                    "component misreported its size, skipping"
                );
                continue;
            }

            remaining -= size;
            included.insert(instance.kind_id());
            frames.push((instance.kind_id(), frame));
        }

        frames.sort_by_key(|(id, _)| *id);

        let mut bytes = Vec::with_capacity(self.budget - remaining);
        envelope.header.encode(&mut bytes)?;
        included.encode(&mut bytes)?;
        for (_, frame) in &frames {
            bytes.extend_from_slice(frame);
        }

        debug_assert!(bytes.len() <= self.budget);
        debug!(
            len = bytes.len(),
            budget = self.budget,
            included = included.len(),
            skipped = envelope.len() - included.len(),
            "packed message"
        );

        Ok(Packet {
            bytes,
            included,
            budget: self.budget,
        })
    }
}

/// An encoded message, ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    bytes: Vec<u8>,
    included: PresenceBits,
    budget: usize,
}

impl Packet {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Kinds that made it into the packet.
    pub fn included(&self) -> PresenceBits {
        self.included
    }

    /// Share of the budget in use, in percent.
    pub fn usage(&self) -> f32 {
        100.0 * self.bytes.len() as f32 / self.budget as f32
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

////////////////////////////////////////////////////////////////////////////////
// Unit tests
////////////////////////////////////////////////////////////////////////////////
