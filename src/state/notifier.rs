//! Change notification fan-out
//!
//! Listeners are plain closures keyed by a [`ListenerId`]. While
//! notifications are suppressed, `notify` drops events instead of
//! queueing them; the batching caller fires one event when it finishes.

use std::fmt;

/// Handle returned by [`ChangeNotifier::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<E> = Box<dyn FnMut(&E)>;

/// Fan-out of events of type `E` with a suppression window
pub struct ChangeNotifier<E> {
    listeners: Vec<(ListenerId, Listener<E>)>,
    next_id: u64,
    suppressed: bool,
}

impl<E> fmt::Debug for ChangeNotifier<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("listeners", &self.listeners.len())
            .field("suppressed", &self.suppressed)
            .finish()
    }
}

impl<E> Default for ChangeNotifier<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> ChangeNotifier<E> {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
            next_id: 0,
            suppressed: false,
        }
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&E) + 'static) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Remove a listener; returns false if it was not subscribed
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn suppress(&mut self) {
        self.suppressed = true;
    }

    pub fn resume(&mut self) {
        self.suppressed = false;
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }

    /// Deliver `event` to every listener unless suppressed.
    ///
    /// Returns whether the event was delivered.
    pub fn notify(&mut self, event: &E) -> bool {
        if self.suppressed {
            return false;
        }
        for (_, listener) in &mut self.listeners {
            listener(event);
        }
        true
    }
}
