//! Counting admission gate with RAII tickets.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

#[derive(Debug)]
struct State {
    available: usize,
    cancelled: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    released: Condvar,
    capacity: usize,
}

/// Bounds how many holders may use a scarce resource at once.
///
/// Clones share the same gate.
#[derive(Debug, Clone)]
pub struct Governor {
    shared: Arc<Shared>,
}

/// Proof of admission; dropping it gives the slot back
#[derive(Debug)]
#[must_use = "the slot is released as soon as the ticket is dropped"]
pub struct Ticket {
    shared: Option<Arc<Shared>>,
}

impl Governor {
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    available: capacity,
                    cancelled: false,
                }),
                released: Condvar::new(),
                capacity,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Tickets that could be handed out right now without blocking
    pub fn available(&self) -> usize {
        self.shared.state.lock().available
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.state.lock().cancelled
    }

    /// Block until a slot is free, or return at once after [`cancel`](Self::cancel)
    pub fn acquire(&self) -> Ticket {
        let mut state = self.shared.state.lock();
        while state.available == 0 && !state.cancelled {
            self.shared.released.wait(&mut state);
        }
        self.issue(&mut state)
    }

    pub fn try_acquire(&self) -> Option<Ticket> {
        let mut state = self.shared.state.lock();
        if state.available == 0 && !state.cancelled {
            return None;
        }
        Some(self.issue(&mut state))
    }

    /// Permanently open the gate and wake every waiter.
    pub fn cancel(&self) {
        let mut state = self.shared.state.lock();
        if !state.cancelled {
            debug!("Governor of capacity {} cancelled", self.shared.capacity);
            state.cancelled = true;
        }
        drop(state);
        self.shared.released.notify_all();
    }

    fn issue(&self, state: &mut State) -> Ticket {
        if state.cancelled {
            return Ticket { shared: None };
        }
        state.available -= 1;
        Ticket {
            shared: Some(Arc::clone(&self.shared)),
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            let mut state = shared.state.lock();
            state.available += 1;
            drop(state);
            shared.released.notify_one();
        }
    }
}
