//! A value that is produced later, possibly on another thread.

use std::fmt;

use flume::{Receiver, Sender};

use crate::error::{Error, Result};

/// Write end of a [`Deferred`]. Dropping it unfulfilled abandons the value.
pub struct Promise<T> {
    tx: Sender<T>,
}

impl<T> Promise<T> {
    pub fn fulfil(self, value: T) {
        // The reader may have lost interest; that is not an error.
        let _ = self.tx.send(value);
    }
}

/// Read end: block with [`get`](Deferred::get) or await with
/// [`get_async`](Deferred::get_async).
pub struct Deferred<T> {
    inner: Inner<T>,
}

enum Inner<T> {
    Ready(T),
    Pending(Receiver<T>),
}

impl<T> Deferred<T> {
    /// A connected promise/deferred pair
    pub fn pair() -> (Promise<T>, Deferred<T>) {
        let (tx, rx) = flume::bounded(1);
        (
            Promise { tx },
            Deferred {
                inner: Inner::Pending(rx),
            },
        )
    }

    /// Already realized
    pub fn ready(value: T) -> Self {
        Self {
            inner: Inner::Ready(value),
        }
    }

    /// Whether `get` would return without blocking
    pub fn is_ready(&self) -> bool {
        match &self.inner {
            Inner::Ready(_) => true,
            Inner::Pending(rx) => !rx.is_empty() || rx.is_disconnected(),
        }
    }

    /// Block until the value exists
    pub fn get(self) -> Result<T> {
        match self.inner {
            Inner::Ready(value) => Ok(value),
            Inner::Pending(rx) => rx.recv().map_err(|_| Error::Abandoned),
        }
    }

    pub async fn get_async(self) -> Result<T> {
        match self.inner {
            Inner::Ready(value) => Ok(value),
            Inner::Pending(rx) => rx.recv_async().await.map_err(|_| Error::Abandoned),
        }
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("ready", &self.is_ready())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn value_crosses_threads() {
        let (promise, deferred) = Deferred::pair();
        assert!(!deferred.is_ready());

        let worker = thread::spawn(move || promise.fulfil(42));
        assert_eq!(deferred.get().unwrap(), 42);
        worker.join().unwrap();
    }

    #[test]
    fn dropped_promise_abandons_the_value() {
        let (promise, deferred) = Deferred::<u32>::pair();
        drop(promise);
        assert!(deferred.is_ready());
        assert!(matches!(deferred.get(), Err(Error::Abandoned)));
    }

    #[test]
    fn ready_value_needs_no_promise() {
        let deferred = Deferred::ready("done");
        assert!(deferred.is_ready());
        assert_eq!(deferred.get().unwrap(), "done");
    }
}
