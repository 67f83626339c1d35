//! Component kinds and the per-message instances built from them.

use std::any::Any;
use std::io::Write;
use std::rc::Rc;

use tracing::trace;

use crate::message::{Header, read_frame};
use crate::registry::KindId;
use crate::serialization::{Encode, VarInt};
use crate::subscription::{HookList, Subscription};
use crate::{Error, Rejection, Result};

/// A typed fragment of the team message.
///
/// Each kind is registered once at startup. Producers fill instances through compilers
/// ([`Registry::on_compile`](crate::Registry::on_compile)), consumers receive decoded instances
/// through callbacks ([`Registry::on_receive`](crate::Registry::on_receive)). Fields are encoded
/// with [`Encode`] and decoded with [`Decode`](crate::serialization::Decode); the transport wraps
/// them in a length prefix so receivers can skip kinds they do not know.
pub trait Component: Encode + crate::serialization::Decode + Default + 'static {
    /// Unique name of the kind.
    const NAME: &'static str;
    /// Initial priority, kinds with a higher priority are packed first.
    const PRIORITY: i32 = 0;
}

/// Object safe view of a component value.
pub(crate) trait Payload: Any {
    fn encode_payload(&self, write: &mut dyn Write) -> Result<()>;
    fn payload_len(&self) -> usize;
    fn decode_payload(&mut self, frame: &[u8]) -> Result<usize>;
}

impl<C: Component> Payload for C {
    fn encode_payload(&self, write: &mut dyn Write) -> Result<()> {
        self.encode(write)
    }

    fn payload_len(&self) -> usize {
        self.encode_len()
    }

    fn decode_payload(&mut self, mut frame: &[u8]) -> Result<usize> {
        let len = frame.len();
        *self = C::decode(&mut frame)?;
        Ok(len - frame.len())
    }
}

/// Creates a default value of `C`, stored as the factory of its kind.
pub(crate) fn create<C: Component>() -> Box<dyn Payload> {
    Box::<C>::default()
}

pub(crate) type Compiler<C> = dyn Fn(&mut C);
pub(crate) type Callback<C> = dyn Fn(&C, &Header);

/// Type erased compilers and callbacks of one kind.
pub(crate) trait Hooks: Any {
    fn compile(&self, payload: &mut dyn Payload);
    fn dispatch(&self, payload: &dyn Payload, header: &Header);
    fn compiler_count(&self) -> usize;
    fn callback_count(&self) -> usize;
}

pub(crate) struct KindHooks<C: Component> {
    compilers: HookList<Compiler<C>>,
    callbacks: HookList<Callback<C>>,
}

impl<C: Component> KindHooks<C> {
    pub(crate) fn new() -> Self {
        Self {
            compilers: HookList::new(),
            callbacks: HookList::new(),
        }
    }

    pub(crate) fn add_compiler(&self, compiler: Rc<Compiler<C>>) -> Subscription {
        self.compilers.add(compiler)
    }

    pub(crate) fn add_callback(&self, callback: Rc<Callback<C>>) -> Subscription {
        self.callbacks.add(callback)
    }
}

impl<C: Component> Hooks for KindHooks<C> {
    fn compile(&self, payload: &mut dyn Payload) {
        let Some(component) = (payload as &mut dyn Any).downcast_mut::<C>() else {
            return;
        };

        for compiler in self.compilers.snapshot() {
            compiler(component);
        }
    }

    fn dispatch(&self, payload: &dyn Payload, header: &Header) {
        let Some(component) = (payload as &dyn Any).downcast_ref::<C>() else {
            return;
        };

        for callback in self.callbacks.snapshot() {
            callback(component, header);
        }
    }

    fn compiler_count(&self) -> usize {
        self.compilers.len()
    }

    fn callback_count(&self) -> usize {
        self.callbacks.len()
    }
}

/// One value of a component kind, owned by a single [`Envelope`](crate::Envelope).
///
/// On the wire an instance is its encoded fields preceded by their length as a [`VarInt`].
pub struct ComponentInstance {
    id: KindId,
    priority: i32,
    payload: Box<dyn Payload>,
    hooks: Rc<dyn Hooks>,
}

impl ComponentInstance {
    pub(crate) fn new(
        id: KindId,
        priority: i32,
        payload: Box<dyn Payload>,
        hooks: Rc<dyn Hooks>,
    ) -> Self {
        Self {
            id,
            priority,
            payload,
            hooks,
        }
    }

    /// Id of the kind this instance belongs to.
    pub fn kind_id(&self) -> KindId {
        self.id
    }

    /// Priority of the kind at the time the registry was frozen.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Number of bytes [`ComponentInstance::serialize`] writes, length prefix included.
    pub fn reported_size(&self) -> usize {
        let len = self.payload.payload_len();
        VarInt::from(len).encode_len() + len
    }

    /// Writes the length prefix and the encoded fields, returning the number of bytes written.
    pub fn serialize(&self, mut write: impl Write) -> Result<usize> {
        let mut payload = Vec::with_capacity(self.payload.payload_len());
        self.payload.encode_payload(&mut payload)?;

        let prefix = VarInt::from(payload.len());
        prefix.encode(&mut write)?;
        write.write_all(&payload)?;

        Ok(prefix.encode_len() + payload.len())
    }

    /// Reads one length prefixed frame from `read` into this instance and advances `read` past it.
    ///
    /// Returns the number of bytes consumed. A frame that runs past the end of the buffer is
    /// [`Rejection::Truncated`], one whose fields do not decode to exactly its length is
    /// [`Rejection::Corrupt`].
    pub fn deserialize(&mut self, read: &mut &[u8]) -> Result<usize> {
        let before = read.len();
        let frame = read_frame(read)?;
        let corrupt = Rejection::Corrupt {
            kind: self.id.index(),
        };

        match self.payload.decode_payload(frame) {
            Ok(consumed) if consumed == frame.len() => Ok(before - read.len()),
            Ok(consumed) => {
                trace!(
                    kind = %self.id,
                    consumed,
                    declared = frame.len(),
                    "component length mismatch"
                );
                Err(Error::Rejected(corrupt))
            }
            Err(err) => {
                trace!(kind = %self.id, ?err, "component failed to decode");
                Err(Error::Rejected(corrupt))
            }
        }
    }

    /// Runs every compiler registered for this kind, in registration order.
    pub fn compile(&mut self) {
        self.hooks.compile(self.payload.as_mut());
    }

    /// Runs every callback registered for this kind with the sender's header.
    pub fn dispatch_callbacks(&self, header: &Header) {
        self.hooks.dispatch(self.payload.as_ref(), header);
    }

    /// Returns the value if this instance is of kind `C`.
    pub fn get<C: Component>(&self) -> Option<&C> {
        (self.payload.as_ref() as &dyn Any).downcast_ref()
    }

    /// Returns the value mutably if this instance is of kind `C`.
    pub fn get_mut<C: Component>(&mut self) -> Option<&mut C> {
        (self.payload.as_mut() as &mut dyn Any).downcast_mut()
    }
}

impl std::fmt::Debug for ComponentInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentInstance")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("size", &self.reported_size())
            .finish_non_exhaustive()
    }
}
