//! Shared subscription handles for compilers and callbacks.
//!
//! Registering a closure returns a [`Subscription`]. The handle can be cloned freely, all clones
//! refer to the same registration, and the closure stays registered until the last clone is
//! dropped. There is no other way to unregister.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

type Entries<F> = RefCell<Vec<(u64, Rc<F>)>>;

/// An ordered list of registered closures of type `F`.
pub(crate) struct HookList<F: ?Sized> {
    entries: Rc<Entries<F>>,
    next_key: Cell<u64>,
}

impl<F: ?Sized + 'static> HookList<F> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Rc::new(RefCell::new(Vec::new())),
            next_key: Cell::new(0),
        }
    }

    /// Appends `hook` to the list, it runs after every hook added before it.
    pub(crate) fn add(&self, hook: Rc<F>) -> Subscription {
        let key = self.next_key.get();
        self.next_key.set(key + 1);
        self.entries.borrow_mut().push((key, hook));

        let entries = Rc::downgrade(&self.entries);
        Subscription(Rc::new(Registration {
            release: Box::new(move || remove(&entries, key)),
        }))
    }

    /// Returns the registered hooks in registration order.
    ///
    /// Hooks are run from this copy so that they may subscribe or drop subscriptions themselves.
    pub(crate) fn snapshot(&self) -> Vec<Rc<F>> {
        self.entries
            .borrow()
            .iter()
            .map(|(_, hook)| Rc::clone(hook))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.borrow().len()
    }
}

fn remove<F: ?Sized>(entries: &Weak<Entries<F>>, key: u64) {
    // The list may already be gone together with its registry.
    if let Some(entries) = entries.upgrade() {
        entries.borrow_mut().retain(|(k, _)| *k != key);
    }
}

struct Registration {
    release: Box<dyn Fn()>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        (self.release)();
    }
}

/// Handle keeping a compiler or callback registered.
///
/// Dropping the last clone of a subscription removes the registration.
///
/// ```
/// use ratatoskr::{components::RobotPose, RegistryBuilder};
///
/// let mut builder = RegistryBuilder::new();
/// builder.register::<RobotPose>().unwrap();
/// let registry = builder.freeze().unwrap();
///
/// let subscription = registry.on_receive(|pose: &RobotPose, header| {
///     println!("robot {} is at ({}, {})", header.sender, pose.x, pose.y);
/// }).unwrap();
///
/// let alias = subscription.clone();
/// drop(subscription);
/// assert_eq!(registry.callback_count::<RobotPose>(), Some(1));
/// drop(alias);
/// assert_eq!(registry.callback_count::<RobotPose>(), Some(0));
/// ```
#[derive(Clone)]
#[must_use = "the closure is unregistered as soon as its subscription is dropped"]
pub struct Subscription(Rc<Registration>);

impl Subscription {
    /// Number of handles currently sharing this registration.
    pub fn handle_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("handles", &self.handle_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_order() {
        let list: HookList<dyn Fn() -> u8> = HookList::new();
        let _a = list.add(Rc::new(|| 1));
        let _b = list.add(Rc::new(|| 2));
        let _c = list.add(Rc::new(|| 3));

        let order: Vec<u8> = list.snapshot().iter().map(|hook| hook()).collect();
        assert_eq!(order, [1, 2, 3]);
    }

    #[test]
    fn test_last_handle_removes() {
        let list: HookList<dyn Fn()> = HookList::new();
        let first = list.add(Rc::new(|| ()));
        let second = first.clone();
        assert_eq!(first.handle_count(), 2);

        drop(first);
        assert_eq!(list.len(), 1);
        assert_eq!(second.handle_count(), 1);

        drop(second);
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn test_removes_only_own_entry() {
        let list: HookList<dyn Fn() -> u8> = HookList::new();
        let a = list.add(Rc::new(|| 1));
        let _b = list.add(Rc::new(|| 2));

        drop(a);
        let left: Vec<u8> = list.snapshot().iter().map(|hook| hook()).collect();
        assert_eq!(left, [2]);
    }

    #[test]
    fn test_outlives_list() {
        let list: HookList<dyn Fn()> = HookList::new();
        let subscription = list.add(Rc::new(|| ()));

        drop(list);
        drop(subscription);
    }
}
