//! Cached configuration items and their cleanup hooks.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::Value;

use crate::client::Revision;

/// Cleanup attached to an item's lifetime.
///
/// Runs once, when the item is superseded, deleted, or dropped by a reload.
pub trait Disposable: Send {
    fn dispose(self: Box<Self>, item: &Item);
}

impl<F> Disposable for F
where
    F: FnOnce(&Item) + Send,
{
    fn dispose(self: Box<Self>, item: &Item) {
        (*self)(item)
    }
}

/// One decoded value held by a resource cache.
pub struct Item {
    /// Full store key, e.g. `/apisix/routes/1`.
    pub key: String,
    /// Key relative to the resource, e.g. `1`.
    pub id: String,
    pub value: Value,
    pub create_revision: Revision,
    pub modified_revision: Revision,
    handlers: Mutex<Vec<Box<dyn Disposable>>>,
    disposed: AtomicBool,
}

impl Item {
    pub fn new(
        key: impl Into<String>,
        id: impl Into<String>,
        value: Value,
        create_revision: Revision,
        modified_revision: Revision,
    ) -> Self {
        Self {
            key: key.into(),
            id: id.into(),
            value,
            create_revision,
            modified_revision,
            handlers: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        }
    }

    /// Attach a cleanup. Runs immediately if the item is already disposed.
    pub fn on_dispose<D>(&self, handler: D)
    where
        D: Disposable + 'static,
    {
        let mut handlers = self.handlers.lock();
        if self.disposed.load(Ordering::SeqCst) {
            drop(handlers);
            Box::new(handler).dispose(self);
            return;
        }
        handlers.push(Box::new(handler));
    }

    /// Run every attached cleanup. Later calls do nothing.
    pub fn dispose(&self) {
        let handlers = {
            let mut handlers = self.handlers.lock();
            if self.disposed.swap(true, Ordering::SeqCst) {
                return;
            }
            std::mem::take(&mut *handlers)
        };
        for handler in handlers {
            handler.dispose(self);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Item")
            .field("key", &self.key)
            .field("modified_revision", &self.modified_revision)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
