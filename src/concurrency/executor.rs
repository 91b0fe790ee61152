//! Single-threaded task confinement.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use flume::{Receiver, Sender, TrySendError};
use tracing::{debug, error, info, warn};

use super::deferred::Deferred;
use crate::error::{Error, Result};

/// Queue depth used when no capacity is configured
pub const DEFAULT_CAPACITY: usize = 512;

type Task = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Task),
    Stop,
}

/// Scheduling priority requested for the worker thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    AboveNormal,
    #[default]
    Normal,
    BelowNormal,
}

/// Runs submitted tasks one at a time, in submission order, on one
/// dedicated thread.
pub struct Executor {
    name: String,
    tx: Option<Sender<Message>>,
    rx: Receiver<Message>,
    running: AtomicBool,
    thread_id: ThreadId,
    handle: Option<JoinHandle<()>>,
    capacity: usize,
}

impl Executor {
    pub fn new(name: impl Into<String>, priority: Priority) -> Result<Self> {
        Self::with_capacity(name, priority, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(
        name: impl Into<String>,
        priority: Priority,
        capacity: usize,
    ) -> Result<Self> {
        let name = name.into();
        let capacity = capacity.max(1);
        let (tx, rx) = flume::bounded::<Message>(capacity);
        let running = AtomicBool::new(true);

        let handle = {
            let rx = rx.clone();
            let name = name.clone();
            thread::Builder::new()
                .name(name.clone())
                .spawn(move || run(&name, priority, &rx))?
        };

        debug!("executor[{}] started with capacity {}", name, capacity);

        Ok(Self {
            name,
            tx: Some(tx),
            rx,
            running,
            thread_id: handle.thread().id(),
            handle: Some(handle),
            capacity,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue `func`; its result arrives through the returned deferred.
    ///
    /// Blocks the caller while the queue is full.
    pub fn begin_invoke<F, R>(&self, func: F) -> Result<Deferred<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let tx = match &self.tx {
            Some(tx) if self.is_running() => tx,
            _ => return Err(Error::ExecutorStopped(self.name.clone())),
        };

        let (promise, deferred) = Deferred::pair();
        self.send(tx, Message::Run(Box::new(move || promise.fulfil(func()))))?;
        Ok(deferred)
    }

    fn send(&self, tx: &Sender<Message>, message: Message) -> Result<()> {
        match tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(message)) => {
                debug!("executor[{}] Overflow. Blocking caller.", self.name);
                tx.send(message)
                    .map_err(|_| Error::ExecutorStopped(self.name.clone()))
            }
            Err(TrySendError::Disconnected(_)) => Err(Error::ExecutorStopped(self.name.clone())),
        }
    }

    /// Run `func` on the worker and wait for it. Runs inline when called
    /// from the worker itself.
    pub fn invoke<F, R>(&self, func: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_current() {
            return Ok(func());
        }
        self.begin_invoke(func)?.get()
    }

    /// Block until everything queued so far has run
    pub fn wait(&self) -> Result<()> {
        self.invoke(|| ())
    }

    /// Drop queued tasks that have not started; their deferreds are abandoned.
    pub fn clear(&self) -> usize {
        self.rx
            .drain()
            .filter(|message| matches!(message, Message::Run(_)))
            .count()
    }

    /// Tasks waiting to run
    pub fn size(&self) -> usize {
        self.rx.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.size() >= self.capacity
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Whether the caller is this executor's worker thread
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Reject new work at once; tasks already queued still run.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(tx) = &self.tx {
            if self.is_current() {
                // Cannot block on our own queue; the disconnect in drop ends the loop.
                let _ = tx.try_send(Message::Stop);
            } else {
                let _ = self.send(tx, Message::Stop);
            }
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.stop();
        drop(self.tx.take());

        match self.handle.take() {
            Some(handle) if !self.is_current() => {
                if handle.join().is_err() {
                    error!("executor[{}] worker panicked", self.name);
                }
            }
            Some(_) => warn!("executor[{}] dropped from its own worker; detaching", self.name),
            None => {}
        }
    }
}

fn run(name: &str, priority: Priority, rx: &Receiver<Message>) {
    if let Err(e) = apply_priority(priority) {
        debug!("executor[{}] could not apply {:?} priority: {}", name, priority, e);
    }

    while let Ok(Message::Run(task)) = rx.recv() {
        if catch_unwind(AssertUnwindSafe(task)).is_err() {
            error!("executor[{}] task panicked", name);
        }
    }

    info!("executor[{}] stopped", name);
}

#[cfg(target_os = "linux")]
fn apply_priority(priority: Priority) -> std::io::Result<()> {
    let nice = match priority {
        Priority::AboveNormal => -5,
        Priority::Normal => return Ok(()),
        Priority::BelowNormal => 5,
    };

    // With PRIO_PROCESS and a thread id, Linux adjusts only that thread.
    // SAFETY: plain syscalls without pointer arguments.
    let rc = unsafe {
        let tid = libc::syscall(libc::SYS_gettid) as libc::id_t;
        libc::setpriority(libc::PRIO_PROCESS, tid, nice)
    };

    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(target_os = "linux"))]
fn apply_priority(_priority: Priority) -> std::io::Result<()> {
    Ok(())
}
