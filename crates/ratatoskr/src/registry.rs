//! Catalog of the component kinds a message may contain.
//!
//! Kinds are registered during startup through a [`RegistryBuilder`], which every module that
//! contributes a component calls once. [`RegistryBuilder::freeze`] assigns the numeric ids and
//! closes the set of kinds; the resulting [`Registry`] never changes shape afterwards.
//!
//! ```
//! use ratatoskr::{components::{BallEstimate, RobotPose}, RegistryBuilder};
//!
//! let mut builder = RegistryBuilder::new();
//! builder.register::<RobotPose>()?;
//! builder.register::<BallEstimate>()?.set_priority(20);
//!
//! let registry = builder.freeze()?;
//! assert_eq!(registry.len(), 2);
//! assert_eq!(registry.get("BallEstimate").map(|kind| kind.priority()), Some(20));
//! # Ok::<(), ratatoskr::Error>(())
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::component::{self, Component, ComponentInstance, Hooks, KindHooks, Payload};
use crate::message::Header;
use crate::subscription::Subscription;
use crate::{Error, Result};

/// Number of bits in the presence bitfield, and with that the maximum number of kinds.
pub const BITFIELD_CAPACITY: usize = 32;

/// Numeric id of a component kind, equal to its bit in the presence bitfield.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KindId(u8);

impl KindId {
    /// Returns the id for `index`, or `None` if it does not fit in the bitfield.
    pub fn new(index: u8) -> Option<Self> {
        (usize::from(index) < BITFIELD_CAPACITY).then_some(Self(index))
    }

    pub fn index(self) -> u8 {
        self.0
    }

    /// The mask of this kind in the presence bitfield.
    pub fn bit(self) -> u32 {
        1 << self.0
    }
}

impl fmt::Display for KindId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Everything the registry knows about one component kind.
pub struct ComponentDescriptor {
    name: &'static str,
    type_id: TypeId,
    factory: fn() -> Box<dyn Payload>,
    priority: i32,
    id: Option<KindId>,
    hooks: Rc<dyn Hooks>,
}

impl ComponentDescriptor {
    fn new<C: Component>() -> Self {
        Self {
            name: C::NAME,
            type_id: TypeId::of::<C>(),
            factory: component::create::<C>,
            priority: C::PRIORITY,
            id: None,
            hooks: Rc::new(KindHooks::<C>::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Changes the packing priority, only possible before the registry is frozen.
    pub fn set_priority(&mut self, priority: i32) -> &mut Self {
        self.priority = priority;
        self
    }

    /// The assigned id, `None` until the registry is frozen.
    pub fn id(&self) -> Option<KindId> {
        self.id
    }

    /// Assigns the id of this kind. Every kind gets exactly one id.
    pub(crate) fn assign_id(&mut self, index: usize) -> Result<KindId> {
        if let Some(id) = self.id {
            return Err(Error::IdAlreadyAssigned {
                name: self.name.to_string(),
                id: id.index(),
            });
        }

        let id = u8::try_from(index)
            .ok()
            .and_then(KindId::new)
            .ok_or_else(|| Error::RegistryFull {
                name: self.name.to_string(),
                capacity: BITFIELD_CAPACITY,
            })?;

        self.id = Some(id);
        Ok(id)
    }

    /// Creates a fresh default instance of this kind.
    ///
    /// Returns `None` if no id has been assigned yet.
    pub fn instantiate(&self) -> Option<ComponentInstance> {
        let id = self.id?;
        Some(ComponentInstance::new(
            id,
            self.priority,
            (self.factory)(),
            Rc::clone(&self.hooks),
        ))
    }

    fn hooks<C: Component>(&self) -> Option<&KindHooks<C>> {
        (self.hooks.as_ref() as &dyn Any).downcast_ref()
    }
}

impl fmt::Debug for ComponentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDescriptor")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Collects component kinds during startup.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    descriptors: Vec<ComponentDescriptor>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers kind `C` with its default priority.
    ///
    /// Fails if a kind with the same name is already registered, or if the bitfield is full.
    pub fn register<C: Component>(&mut self) -> Result<&mut ComponentDescriptor> {
        if self.descriptors.iter().any(|d| d.name == C::NAME) {
            return Err(Error::DuplicateComponent(C::NAME.to_string()));
        }

        if self.descriptors.len() >= BITFIELD_CAPACITY {
            return Err(Error::RegistryFull {
                name: C::NAME.to_string(),
                capacity: BITFIELD_CAPACITY,
            });
        }

        self.descriptors.push(ComponentDescriptor::new::<C>());
        let index = self.descriptors.len() - 1;
        Ok(&mut self.descriptors[index])
    }

    /// Changes the priority of an already registered kind by name.
    pub fn set_priority(&mut self, name: &str, priority: i32) -> Result<()> {
        let descriptor = self
            .descriptors
            .iter_mut()
            .find(|d| d.name == name)
            .ok_or_else(|| Error::UnregisteredComponent(name.to_string()))?;

        descriptor.set_priority(priority);
        Ok(())
    }

    /// Assigns ids and closes the set of kinds.
    ///
    /// Ids follow the alphabetical order of the kind names, so robots running the same binary
    /// agree on them no matter in which order modules registered their kinds.
    pub fn freeze(mut self) -> Result<Registry> {
        self.descriptors.sort_by(|a, b| a.name.cmp(b.name));

        let mut by_name = HashMap::with_capacity(self.descriptors.len());
        let mut by_type = HashMap::with_capacity(self.descriptors.len());
        for (index, descriptor) in self.descriptors.iter_mut().enumerate() {
            let id = descriptor.assign_id(index)?;
            by_name.insert(descriptor.name, id);
            by_type.insert(descriptor.type_id, id);
        }

        let mut pack_order: Vec<KindId> = by_name.values().copied().collect();
        pack_order.sort_by_key(|id| {
            let priority = self.descriptors[usize::from(id.index())].priority;
            (std::cmp::Reverse(priority), *id)
        });

        debug!(kinds = self.descriptors.len(), "component registry frozen");

        Ok(Registry {
            descriptors: self.descriptors,
            by_name,
            by_type,
            pack_order,
        })
    }
}

/// The frozen set of component kinds, indexed by id.
pub struct Registry {
    descriptors: Vec<ComponentDescriptor>,
    by_name: HashMap<&'static str, KindId>,
    by_type: HashMap<TypeId, KindId>,
    pack_order: Vec<KindId>,
}

impl Registry {
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Iterates over all kinds in id order.
    pub fn iter(&self) -> impl Iterator<Item = &ComponentDescriptor> {
        self.descriptors.iter()
    }

    /// Looks up a kind by id, `None` for ids this binary does not know.
    pub fn lookup_by_id(&self, id: KindId) -> Option<&ComponentDescriptor> {
        self.descriptors.get(usize::from(id.index()))
    }

    pub fn get(&self, name: &str) -> Option<&ComponentDescriptor> {
        let id = self.by_name.get(name)?;
        self.lookup_by_id(*id)
    }

    /// Id of kind `C`, if registered.
    pub fn id_of<C: Component>(&self) -> Option<KindId> {
        self.by_type.get(&TypeId::of::<C>()).copied()
    }

    /// Kind ids by descending priority, ties broken by ascending id.
    pub fn pack_order(&self) -> &[KindId] {
        &self.pack_order
    }

    /// Registers a compiler that fills outgoing instances of `C` from live state.
    ///
    /// Compilers run in registration order, later compilers overwrite what earlier ones wrote.
    pub fn on_compile<C, F>(&self, compiler: F) -> Result<Subscription>
    where
        C: Component,
        F: Fn(&mut C) + 'static,
    {
        Ok(self.hooks::<C>()?.add_compiler(Rc::new(compiler)))
    }

    /// Registers a callback that receives every decoded instance of `C` with its sender's header.
    pub fn on_receive<C, F>(&self, callback: F) -> Result<Subscription>
    where
        C: Component,
        F: Fn(&C, &Header) + 'static,
    {
        Ok(self.hooks::<C>()?.add_callback(Rc::new(callback)))
    }

    /// Number of compilers currently registered for `C`.
    pub fn compiler_count<C: Component>(&self) -> Option<usize> {
        self.hooks::<C>().ok().map(Hooks::compiler_count)
    }

    /// Number of callbacks currently registered for `C`.
    pub fn callback_count<C: Component>(&self) -> Option<usize> {
        self.hooks::<C>().ok().map(Hooks::callback_count)
    }

    fn hooks<C: Component>(&self) -> Result<&KindHooks<C>> {
        self.id_of::<C>()
            .and_then(|id| self.lookup_by_id(id))
            .and_then(ComponentDescriptor::hooks::<C>)
            .ok_or_else(|| Error::UnregisteredComponent(C::NAME.to_string()))
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.descriptors).finish()
    }
}
