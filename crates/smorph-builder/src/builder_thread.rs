//! Background worker running [`WavSetBuilder`] jobs in submission order.

use crate::error::Result;
use crate::wav_set_builder::WavSetBuilder;
use parking_lot::{Condvar, Mutex};
use smorph_core::{CancelToken, WavSet};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Completion callback; runs on the worker thread.
pub type DoneFn = Box<dyn FnOnce(WavSet) + Send>;

struct Job {
    builder: WavSetBuilder,
    object_id: u64,
    cancel: CancelToken,
    done: Mutex<Option<DoneFn>>,
}

#[derive(Default)]
struct QueueState {
    /// The running job stays at the front until it finishes.
    jobs: VecDeque<Arc<Job>>,
    quit: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<QueueState>,
    wakeup: Condvar,
    /// Held while a done callback runs and while jobs are killed.
    callback_lock: Mutex<()>,
}

/// Single worker thread with a FIFO job queue.
///
/// Killing is cooperative: queued jobs are dropped, the running one is
/// cancelled through its [`CancelToken`]. Once a kill call returns, the done
/// callback of a killed job never runs. Callbacks must not call kill
/// functions of the same `BuilderThread`.
pub struct BuilderThread {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl BuilderThread {
    pub fn new() -> Result<Self> {
        let shared = Arc::new(Shared::default());
        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("smorph-builder".into())
            .spawn(move || worker_loop(worker_shared))?;

        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    /// Queue `builder`; `done` receives the result if the build succeeds and
    /// the job isn't killed.
    ///
    /// # Arguments
    /// * `builder` - Gets a fresh cancel token owned by the job
    /// * `object_id` - Caller defined id for [`search_job`](Self::search_job) /
    ///   [`kill_jobs_by_id`](Self::kill_jobs_by_id)
    /// * `done` - Completion callback
    pub fn add_job<F>(&self, mut builder: WavSetBuilder, object_id: u64, done: F)
    where
        F: FnOnce(WavSet) + Send + 'static,
    {
        let cancel = CancelToken::new();
        builder.set_cancel_token(cancel.clone());

        let job = Arc::new(Job {
            builder,
            object_id,
            cancel,
            done: Mutex::new(Some(Box::new(done))),
        });

        let mut state = self.shared.state.lock();
        state.jobs.push_back(job);
        self.shared.wakeup.notify_one();
    }

    /// Queued jobs, including the running one.
    pub fn job_count(&self) -> usize {
        self.shared.state.lock().jobs.len()
    }

    /// True if a queued or running job has `object_id`.
    pub fn search_job(&self, object_id: u64) -> bool {
        self.shared
            .state
            .lock()
            .jobs
            .iter()
            .any(|job| job.object_id == object_id)
    }

    pub fn kill_all_jobs(&self) {
        self.kill_where(|_| true);
    }

    pub fn kill_jobs_by_id(&self, object_id: u64) {
        self.kill_where(|job| job.object_id == object_id);
    }

    fn kill_where(&self, matches: impl Fn(&Job) -> bool) {
        let _callback_guard = self.shared.callback_lock.lock();
        let mut state = self.shared.state.lock();

        let before = state.jobs.len();
        state.jobs.retain(|job| {
            if matches(job) {
                job.cancel.cancel();
                false
            } else {
                true
            }
        });
        let killed = before - state.jobs.len();
        if killed > 0 {
            debug!("builder thread: killed {} jobs", killed);
        }
    }
}

impl Drop for BuilderThread {
    fn drop(&mut self) {
        self.kill_all_jobs();
        {
            let mut state = self.shared.state.lock();
            state.quit = true;
            self.shared.wakeup.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let job = {
            let mut state = shared.state.lock();
            loop {
                if state.quit {
                    return;
                }
                if let Some(job) = state.jobs.front() {
                    break Arc::clone(job);
                }
                shared.wakeup.wait(&mut state);
            }
        };

        let result = job.builder.run();

        {
            let _callback_guard = shared.callback_lock.lock();
            match result {
                Ok(wav_set) if !job.cancel.is_cancelled() => {
                    if let Some(done) = job.done.lock().take() {
                        done(wav_set);
                    }
                }
                Ok(_) => {}
                Err(e) if e.is_cancelled() => {
                    debug!("builder thread: job {} cancelled", job.object_id);
                }
                Err(e) => warn!("builder thread: job {} failed: {}", job.object_id, e),
            }
        }

        let mut state = shared.state.lock();
        if state.jobs.front().is_some_and(|front| Arc::ptr_eq(front, &job)) {
            state.jobs.pop_front();
        }
    }
}
