//! Disposable resource handles arranged in a teardown tree.
//!
//! A [`Subscription`] owns an ordered list of child resources: other
//! subscriptions or plain teardown callbacks. Closing a subscription releases
//! every child exactly once, in the order they were added, and keeps going when
//! a teardown fails. Failures are returned together as an
//! [`UnsubscriptionError`].
//!
//! Ownership flows strictly from parent to child. The only upward link is a
//! `Weak` parent reference used by a child that closes early to drop out of its
//! parent's list.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::error;

use crate::error::{StreamError, UnsubscriptionError};

type TeardownFn = Box<dyn FnOnce() -> Result<(), StreamError>>;

/// A resource that can be attached to a [`Subscription`].
pub enum Teardown {
    /// Nothing to release.
    Empty,
    /// A child subscription, closed together with its parent.
    Subscription(Subscription),
    /// A callback run once on release.
    Callback(TeardownFn),
}

impl Teardown {
    /// Wrap an infallible release callback.
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Teardown::Callback(Box::new(move || {
            f();
            Ok(())
        }))
    }

    /// Wrap a release callback that can fail.
    pub fn fallible(f: impl FnOnce() -> Result<(), StreamError> + 'static) -> Self {
        Teardown::Callback(Box::new(f))
    }

    /// A teardown that releases nothing.
    pub fn empty() -> Self {
        Teardown::Empty
    }
}

impl Default for Teardown {
    fn default() -> Self {
        Teardown::Empty
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Teardown::Empty => f.write_str("Teardown::Empty"),
            Teardown::Subscription(sub) => f.debug_tuple("Teardown::Subscription").field(sub).finish(),
            Teardown::Callback(_) => f.write_str("Teardown::Callback"),
        }
    }
}

impl From<Subscription> for Teardown {
    fn from(sub: Subscription) -> Self {
        Teardown::Subscription(sub)
    }
}

impl From<&Subscription> for Teardown {
    fn from(sub: &Subscription) -> Self {
        Teardown::Subscription(sub.clone())
    }
}

impl From<()> for Teardown {
    fn from(_: ()) -> Self {
        Teardown::Empty
    }
}

enum Entry {
    Child(Subscription),
    Callback(TeardownFn),
}

struct Inner {
    closed: Cell<bool>,
    children: RefCell<Vec<Entry>>,
    parent: RefCell<Option<Weak<Inner>>>,
}

/// A handle to one node of the teardown tree.
///
/// Cloning the handle does not create a new resource: both clones refer to the
/// same node and closing either closes it.
#[derive(Clone)]
pub struct Subscription {
    inner: Rc<Inner>,
}

impl Subscription {
    /// Create a new open subscription with no children.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(Inner {
                closed: Cell::new(false),
                children: RefCell::new(Vec::new()),
                parent: RefCell::new(None),
            }),
        }
    }

    /// Create a subscription that runs `f` when released.
    pub fn from_fn(f: impl FnOnce() + 'static) -> Self {
        let sub = Self::new();
        sub.add(Teardown::new(f));
        sub
    }

    /// Create a subscription that is already closed.
    pub fn empty() -> Self {
        let sub = Self::new();
        sub.inner.closed.set(true);
        sub
    }

    /// Whether this subscription has been released.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    /// Number of children currently held.
    pub fn len(&self) -> usize {
        self.inner.children.borrow().len()
    }

    /// Whether no children are currently held.
    pub fn is_empty(&self) -> bool {
        self.inner.children.borrow().is_empty()
    }

    /// Whether two handles refer to the same node.
    pub fn ptr_eq(&self, other: &Subscription) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Attach a resource to this subscription.
    ///
    /// When this subscription is already closed the resource is released
    /// immediately instead of being stored. A child subscription that already
    /// belongs to another parent is moved here.
    pub fn add(&self, teardown: impl Into<Teardown>) {
        match teardown.into() {
            Teardown::Empty => {}
            Teardown::Subscription(child) => self.add_child(child),
            Teardown::Callback(f) => {
                if self.is_closed() {
                    report(f().map_err(|e| UnsubscriptionError::new(vec![e])));
                } else {
                    self.inner.children.borrow_mut().push(Entry::Callback(f));
                }
            }
        }
    }

    fn add_child(&self, child: Subscription) {
        if self.ptr_eq(&child) || child.is_closed() {
            return;
        }
        if self.is_closed() {
            report(child.unsubscribe());
            return;
        }
        if let Some(previous) = child.parent() {
            if previous.ptr_eq(self) {
                return;
            }
            previous.remove(&child);
        }
        *child.inner.parent.borrow_mut() = Some(Rc::downgrade(&self.inner));
        self.inner.children.borrow_mut().push(Entry::Child(child));
    }

    /// Detach a child subscription without releasing it.
    pub fn remove(&self, child: &Subscription) {
        self.inner.children.borrow_mut().retain(|entry| match entry {
            Entry::Child(sub) => !sub.ptr_eq(child),
            Entry::Callback(_) => true,
        });
        let mut parent = child.inner.parent.borrow_mut();
        if parent
            .as_ref()
            .is_some_and(|p| std::ptr::eq(p.as_ptr(), Rc::as_ptr(&self.inner)))
        {
            *parent = None;
        }
    }

    /// Release this subscription and everything it holds.
    ///
    /// Calling it again is a no-op. Every child is released even when earlier
    /// ones fail; all failures come back in one aggregate, in child order.
    pub fn unsubscribe(&self) -> Result<(), UnsubscriptionError> {
        if self.inner.closed.replace(true) {
            return Ok(());
        }

        let children = std::mem::take(&mut *self.inner.children.borrow_mut());
        let mut errors = Vec::new();
        for entry in children {
            match entry {
                Entry::Child(child) => {
                    *child.inner.parent.borrow_mut() = None;
                    if let Err(err) = child.unsubscribe() {
                        errors.extend(err.into_errors());
                    }
                }
                Entry::Callback(f) => {
                    if let Err(err) = f() {
                        errors.push(err);
                    }
                }
            }
        }

        if let Some(parent) = self.parent() {
            parent.remove(self);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(UnsubscriptionError::new(errors))
        }
    }

    fn parent(&self) -> Option<Subscription> {
        self.inner
            .parent
            .borrow()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Subscription { inner })
    }
}

impl Default for Subscription {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.is_closed())
            .field("children", &self.len())
            .finish()
    }
}

/// Log teardown failures that have no caller to be returned to.
pub(crate) fn report(result: Result<(), UnsubscriptionError>) {
    if let Err(err) = result {
        error!(count = err.errors().len(), error = %err, "teardown failed");
    }
}
