//! Task execution lanes and periodic timers.
//!
//! The control point runs work on two lanes:
//!
//! - the **IO lane**, a pool of worker threads for description fetches and
//!   GENA/SOAP requests;
//! - the **callback lane**, a single thread on which every listener call is
//!   made, so application code sees one total order of notifications.
//!
//! [`Ticker`] drives the expiration sweep and the renewal scheduler.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Mutex, RwLock};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Two-lane task executor.
///
/// Submission returns `false` once [`TaskExecutor::terminate`] has run; the
/// caller must then undo any provisional state tied to the task.
pub struct TaskExecutor {
    io_tx: RwLock<Option<Sender<Task>>>,
    callback_tx: RwLock<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskExecutor {
    /// Spawn `io_workers` IO threads and the callback thread
    pub fn new(io_workers: usize) -> std::io::Result<Self> {
        let (io_tx, io_rx) = channel::unbounded::<Task>();
        let (callback_tx, callback_rx) = channel::unbounded::<Task>();

        let mut workers = Vec::with_capacity(io_workers + 1);
        for index in 0..io_workers.max(1) {
            let rx = io_rx.clone();
            workers.push(
                thread::Builder::new()
                    .name(format!("upnp-io-{index}"))
                    .spawn(move || run_lane("io", rx))?,
            );
        }
        workers.push(
            thread::Builder::new()
                .name("upnp-callback".to_string())
                .spawn(move || run_lane("callback", callback_rx))?,
        );

        tracing::debug!(io_workers, "task executor started");

        Ok(Self {
            io_tx: RwLock::new(Some(io_tx)),
            callback_tx: RwLock::new(Some(callback_tx)),
            workers: Mutex::new(workers),
        })
    }

    /// Run `task` on the IO lane
    pub fn io<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        submit(&self.io_tx, Box::new(task))
    }

    /// Run `task` on the callback lane, after everything queued before it
    pub fn callback<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        submit(&self.callback_tx, Box::new(task))
    }

    pub fn is_terminated(&self) -> bool {
        self.io_tx.read().is_none()
    }

    /// Stop accepting tasks, drain both queues and join the workers.
    ///
    /// Safe to call repeatedly and from a lane thread; the calling thread is
    /// never joined.
    pub fn terminate(&self) {
        let io = self.io_tx.write().take();
        let callback = self.callback_tx.write().take();
        if io.is_none() && callback.is_none() {
            return;
        }
        drop(io);
        drop(callback);

        let current = thread::current().id();
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                tracing::warn!("executor worker exited abnormally");
            }
        }
        tracing::debug!("task executor terminated");
    }
}

impl Drop for TaskExecutor {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn submit(lane: &RwLock<Option<Sender<Task>>>, task: Task) -> bool {
    match lane.read().as_ref() {
        Some(tx) => tx.send(task).is_ok(),
        None => false,
    }
}

fn run_lane(lane: &'static str, rx: Receiver<Task>) {
    for task in rx.iter() {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
            tracing::error!(lane, "task panicked: {}", panic_message(panic.as_ref()));
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// Named thread calling a closure at a fixed interval until stopped.
pub struct Ticker {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    pub fn start<F>(name: &str, interval: Duration, mut tick: F) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let (stop_tx, stop_rx) = channel::bounded::<()>(0);
        let handle = thread::Builder::new().name(name.to_string()).spawn(move || loop {
            crossbeam::select! {
                recv(stop_rx) -> _ => break,
                default(interval) => {
                    if let Err(panic) = catch_unwind(AssertUnwindSafe(&mut tick)) {
                        tracing::error!("ticker callback panicked: {}", panic_message(panic.as_ref()));
                    }
                }
            }
        })?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // disconnecting wakes the select immediately
        drop(self.stop_tx.take());
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
