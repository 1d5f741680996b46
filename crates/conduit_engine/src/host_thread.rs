//! Marshaling work onto the host application's thread.
//!
//! Host APIs are usually single-threaded. Converters and bakers run through
//! a [`HostThread`]; network I/O never does.

use crate::error::{EngineError, EngineResult};
use std::sync::mpsc;
use std::thread::JoinHandle;
use tokio::sync::oneshot;

/// A unit of work for the host thread.
pub type HostJob = Box<dyn FnOnce() + Send + 'static>;

/// Capability to run closures on the host thread.
pub trait HostThread: Send + Sync {
    /// Queues `job`. Fails if the thread no longer accepts work.
    fn dispatch(&self, job: HostJob) -> EngineResult<()>;
}

impl dyn HostThread {
    /// Runs `work` on the host thread and waits for its result.
    pub async fn run<R, F>(&self, work: F) -> EngineResult<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.dispatch(Box::new(move || {
            let _ = tx.send(work());
        }))?;
        rx.await.map_err(|_| EngineError::HostThreadStopped)
    }
}

/// Runs jobs immediately on the calling thread.
///
/// For hosts without thread affinity, and for tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineHostThread;

impl HostThread for InlineHostThread {
    fn dispatch(&self, job: HostJob) -> EngineResult<()> {
        job();
        Ok(())
    }
}

/// One OS thread consuming jobs in order.
#[derive(Debug)]
pub struct DedicatedHostThread {
    sender: Option<mpsc::Sender<HostJob>>,
    handle: Option<JoinHandle<()>>,
}

impl DedicatedHostThread {
    /// Starts the thread.
    pub fn spawn(name: impl Into<String>) -> EngineResult<Self> {
        let (sender, receiver) = mpsc::channel::<HostJob>();
        let handle = std::thread::Builder::new().name(name.into()).spawn(move || {
            for job in receiver {
                job();
            }
        })?;
        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
        })
    }
}

impl HostThread for DedicatedHostThread {
    fn dispatch(&self, job: HostJob) -> EngineResult<()> {
        self.sender
            .as_ref()
            .ok_or(EngineError::HostThreadStopped)?
            .send(job)
            .map_err(|_| EngineError::HostThreadStopped)
    }
}

impl Drop for DedicatedHostThread {
    fn drop(&mut self) {
        // Closing the channel ends the job loop.
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("host thread panicked");
            }
        }
    }
}
