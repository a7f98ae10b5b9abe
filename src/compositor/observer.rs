// src/compositor/observer.rs

use std::sync::Arc;

use crate::compositor::client::Client;

/// Receives client attach/detach notifications.
///
/// Callbacks run synchronously under the compositor's administrative lock,
/// so they must return quickly and must not call back into the compositor's
/// client or observer management.
pub trait CompositionObserver: Send + Sync {
    fn attached(&self, name: &str, client: Arc<dyn Client>);

    fn detached(&self, name: &str);
}

/// Identity comparison for observer handles.
pub(crate) fn same_observer(a: &Arc<dyn CompositionObserver>, b: &Arc<dyn CompositionObserver>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
