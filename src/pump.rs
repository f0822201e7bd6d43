//! Marshals read actions from the decompiler thread onto the caller thread.
//!
//! The caller blocks in [`ReadTaskQueue::pump`] while the decompiler runs in
//! the background. Whenever the decompiler needs project state it submits a
//! task and waits for its result; the caller runs the task under the host's
//! read lock. A completion marker ends the pump.

use anyhow::{Result, anyhow, bail};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use tracing::trace;

use crate::error::DecompileError;
use crate::host::{Host, read_action};

type Task = Box<dyn FnOnce() + Send>;

enum Deferred {
    Task(Task),
    Finished(Result<(), DecompileError>),
}

pub struct ReadTaskQueue {
    tx: Sender<Deferred>,
    rx: Receiver<Deferred>,
}

impl Default for ReadTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadTaskQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { tx, rx }
    }

    pub fn requester(&self) -> ReadRequester {
        ReadRequester {
            tx: self.tx.clone(),
        }
    }

    /// Runs submitted tasks in order on the current thread until a requester
    /// reports completion.
    pub fn pump(self) -> Result<(), DecompileError> {
        let Self { tx, rx } = self;
        drop(tx);

        let mut serviced = 0usize;
        loop {
            match rx.recv() {
                Ok(Deferred::Task(task)) => {
                    serviced += 1;
                    task();
                }
                Ok(Deferred::Finished(outcome)) => {
                    trace!(serviced, "read task queue finished");
                    return outcome;
                }
                Err(_) => return Err(DecompileError::Disconnected),
            }
        }
    }
}

#[derive(Clone)]
pub struct ReadRequester {
    tx: Sender<Deferred>,
}

impl ReadRequester {
    pub fn submit<R, F>(&self, task: F) -> Result<PendingRead<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (done_tx, done_rx) = mpsc::sync_channel(1);
        let task: Task = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(task)).map_err(panic_message);
            let _ = done_tx.send(outcome);
        });
        self.tx
            .send(Deferred::Task(task))
            .map_err(|_| anyhow!("read task queue is closed"))?;
        Ok(PendingRead { rx: done_rx })
    }

    /// Submits `task` and blocks until the pumping thread has run it.
    pub fn run<R, F>(&self, task: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.submit(task)?.wait()
    }

    /// Ends the pump with `outcome`; `false` when nobody is pumping.
    pub fn finish(&self, outcome: Result<(), DecompileError>) -> bool {
        self.tx.send(Deferred::Finished(outcome)).is_ok()
    }
}

pub struct PendingRead<R> {
    rx: Receiver<Result<R, String>>,
}

impl<R> PendingRead<R> {
    pub fn wait(self) -> Result<R> {
        match self.rx.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => bail!("read task panicked: {message}"),
            Err(_) => bail!("read task was dropped before it ran"),
        }
    }
}

/// Runs read actions for the decompiler thread.
///
/// Every action goes through the queue. On the caller thread it first checks
/// for cancellation, then runs directly when the caller already held read
/// access at submission time, otherwise under the host's read lock.
#[derive(Clone)]
pub struct ReadActionRunner {
    requester: ReadRequester,
    host: Arc<dyn Host>,
    can_read_on_own: bool,
}

impl ReadActionRunner {
    pub fn new(requester: ReadRequester, host: Arc<dyn Host>, can_read_on_own: bool) -> Self {
        Self {
            requester,
            host,
            can_read_on_own,
        }
    }

    pub fn run<R, F>(&self, action: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let host = Arc::clone(&self.host);
        let can_read_on_own = self.can_read_on_own;
        self.requester.run(move || -> Result<R> {
            host.check_canceled()?;
            if can_read_on_own {
                Ok(action())
            } else {
                read_action(host.as_ref(), action)
            }
        })?
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeSettings;
    use crate::host::Workspace;
    use std::thread;

    #[test]
    fn tasks_run_on_the_pumping_thread_in_order() {
        let queue = ReadTaskQueue::new();
        let requester = queue.requester();
        let pump_thread = thread::current().id();

        let worker = thread::spawn(move || {
            let mut seen = Vec::new();
            for id in 0..16 {
                let (value, thread) = requester
                    .run(move || (id, thread::current().id()))
                    .unwrap();
                seen.push(value);
                assert_eq!(thread, pump_thread);
            }
            requester.finish(Ok(()));
            seen
        });

        queue.pump().unwrap();
        assert_eq!(worker.join().unwrap(), (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn pending_reads_complete_in_submission_order() {
        let queue = ReadTaskQueue::new();
        let requester = queue.requester();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let worker = {
            let order = Arc::clone(&order);
            thread::spawn(move || {
                let pending: Vec<_> = (0..8)
                    .map(|id| {
                        let order = Arc::clone(&order);
                        requester.submit(move || order.lock().push(id)).unwrap()
                    })
                    .collect();
                for read in pending {
                    read.wait().unwrap();
                }
                requester.finish(Ok(()));
            })
        };

        queue.pump().unwrap();
        worker.join().unwrap();
        assert_eq!(*order.lock(), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn panicking_task_reports_to_the_requester() {
        let queue = ReadTaskQueue::new();
        let requester = queue.requester();
        let worker = thread::spawn(move || {
            let err = requester
                .run(|| -> u32 { panic!("index corrupted") })
                .unwrap_err();
            requester.finish(Ok(()));
            err.to_string()
        });

        queue.pump().unwrap();
        assert!(worker.join().unwrap().contains("index corrupted"));
    }

    #[test]
    fn pump_ends_when_every_requester_is_gone() {
        let queue = ReadTaskQueue::new();
        drop(queue.requester());
        assert!(matches!(queue.pump(), Err(DecompileError::Disconnected)));
    }

    #[test]
    fn runner_checks_cancellation_before_reading() {
        let workspace = Arc::new(Workspace::new(BridgeSettings::default()));
        let queue = ReadTaskQueue::new();
        let runner = ReadActionRunner::new(
            queue.requester(),
            Arc::clone(&workspace) as Arc<dyn Host>,
            false,
        );
        let finisher = queue.requester();
        let token = workspace.cancellation();

        let worker = thread::spawn(move || {
            let held = runner.run(|| true).unwrap();
            token.cancel();
            let canceled = runner.run(|| true).unwrap_err();
            finisher.finish(Ok(()));
            (held, crate::error::find_canceled(&canceled).is_some())
        });

        queue.pump().unwrap();
        assert_eq!(worker.join().unwrap(), (true, true));
    }

    #[test]
    fn runner_takes_the_read_lock_unless_already_held() {
        let workspace = Arc::new(Workspace::new(BridgeSettings::default()));
        for can_read_on_own in [false, true] {
            let queue = ReadTaskQueue::new();
            let host = Arc::clone(&workspace) as Arc<dyn Host>;
            let runner = ReadActionRunner::new(queue.requester(), Arc::clone(&host), can_read_on_own);
            let finisher = queue.requester();

            let probe = Arc::clone(&host);
            let worker = thread::spawn(move || {
                let allowed = runner.run(move || probe.is_read_access_allowed()).unwrap();
                finisher.finish(Ok(()));
                allowed
            });

            queue.pump().unwrap();
            // without the lock held on the caller, direct reads see no access
            assert_eq!(worker.join().unwrap(), !can_read_on_own);
        }
    }
}
