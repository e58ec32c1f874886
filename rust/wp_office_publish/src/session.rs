// Off-thread publish/revert with a per-page in-flight flag.

use crate::error::{PublishError, StepError};
use crate::guard::{Backup, GuardState, RevisionGuard};
use crate::publisher::{Credentials, PageId, PagePublisher};
use std::collections::HashSet;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Result of waiting on a [`PendingOp`].
#[derive(Debug)]
pub enum Outcome {
    Finished(Result<(), StepError>),
    /// Not known to have succeeded or failed: the wait timed out, or the
    /// worker died before reporting. The page must be checked before assuming
    /// either.
    Unknown,
}

/// Runs when the worker is done, even if it unwinds: copies the guard's slot
/// into the snapshot, then clears the in-flight flag.
struct InFlight<P> {
    guard: Arc<Mutex<RevisionGuard<P>>>,
    slot: Arc<Mutex<Option<Backup>>>,
    pages: Arc<Mutex<HashSet<PageId>>>,
    page: PageId,
}

impl<P> Drop for InFlight<P> {
    fn drop(&mut self) {
        let current = lock(&self.guard).backup().cloned();
        *lock(&self.slot) = current;
        lock(&self.pages).remove(&self.page);
    }
}

pub struct PendingOp {
    page: PageId,
    rx: Receiver<Result<(), StepError>>,
    worker: Option<JoinHandle<()>>,
}

impl PendingOp {
    pub fn page(&self) -> PageId {
        self.page
    }

    fn finish(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!(page = %self.page, "worker panicked; outcome unknown");
            }
        }
    }

    pub fn wait(mut self) -> Outcome {
        let received = self.rx.recv();
        self.finish();
        match received {
            Ok(result) => Outcome::Finished(result),
            Err(_) => Outcome::Unknown,
        }
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`. The operation
    /// keeps running; a later call may still see it finish.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Outcome {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => {
                self.finish();
                Outcome::Finished(result)
            }
            Err(RecvTimeoutError::Timeout) => Outcome::Unknown,
            Err(RecvTimeoutError::Disconnected) => {
                self.finish();
                Outcome::Unknown
            }
        }
    }
}

enum Job {
    Publish(String),
    Revert,
}

/// Shares one [`RevisionGuard`] between the caller and worker threads.
/// Operations run one at a time; a second operation on a page that is
/// already in flight is refused with [`PublishError::Busy`].
///
/// The guard stays locked for a worker's whole network round trip, so the
/// caller reads a snapshot of the slot instead. The snapshot is refreshed
/// when each operation ends.
pub struct Session<P> {
    guard: Arc<Mutex<RevisionGuard<P>>>,
    slot: Arc<Mutex<Option<Backup>>>,
    in_flight: Arc<Mutex<HashSet<PageId>>>,
}

impl<P> Clone for Session<P> {
    fn clone(&self) -> Self {
        Self {
            guard: Arc::clone(&self.guard),
            slot: Arc::clone(&self.slot),
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<P: PagePublisher + Send + 'static> Session<P> {
    pub fn new(guard: RevisionGuard<P>) -> Self {
        let slot = guard.backup().cloned();
        Self {
            guard: Arc::new(Mutex::new(guard)),
            slot: Arc::new(Mutex::new(slot)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn start_publish(
        &self,
        creds: &Credentials,
        page: PageId,
        html: impl Into<String>,
    ) -> Result<PendingOp, PublishError> {
        self.start(creds, page, Job::Publish(html.into()))
    }

    pub fn start_revert(&self, creds: &Credentials, page: PageId) -> Result<PendingOp, PublishError> {
        self.start(creds, page, Job::Revert)
    }

    fn start(&self, creds: &Credentials, page: PageId, job: Job) -> Result<PendingOp, PublishError> {
        if !lock(&self.in_flight).insert(page) {
            debug!(%page, "refusing re-entry");
            return Err(PublishError::Busy(page));
        }
        let release = InFlight {
            guard: Arc::clone(&self.guard),
            slot: Arc::clone(&self.slot),
            pages: Arc::clone(&self.in_flight),
            page,
        };
        let guard = Arc::clone(&self.guard);
        let creds = creds.clone();
        let (tx, rx) = mpsc::channel();

        let worker = thread::spawn(move || {
            let _release = release;
            let result = {
                let mut guard = lock(&guard);
                match job {
                    Job::Publish(html) => guard.publish(&creds, page, &html),
                    Job::Revert => guard.revert(&creds, page),
                }
            };
            // The caller may have abandoned the operation.
            let _ = tx.send(result);
        });

        Ok(PendingOp {
            page,
            rx,
            worker: Some(worker),
        })
    }

    pub fn is_in_flight(&self, page: PageId) -> bool {
        lock(&self.in_flight).contains(&page)
    }

    /// Slot state as of the last finished operation. Never waits on the network.
    pub fn state(&self) -> GuardState {
        match *lock(&self.slot) {
            Some(_) => GuardState::HasBackup,
            None => GuardState::NoBackup,
        }
    }

    pub fn backup(&self) -> Option<Backup> {
        lock(&self.slot).clone()
    }

    /// Refused with [`PublishError::Busy`] while any operation is in flight.
    pub fn clear(&self) -> Result<(), PublishError> {
        // Held throughout: no worker can start until the slot is cleared.
        let pages = lock(&self.in_flight);
        if let Some(page) = pages.iter().next() {
            return Err(PublishError::Busy(*page));
        }
        lock(&self.guard).clear()?;
        *lock(&self.slot) = None;
        Ok(())
    }
}
