//! Worker Pool
//!
//! Fixed set of threads serving one job per range per phase.
//!
//! ```text
//!   controller ──work──► [worker 0] [worker 1] ... [worker N-1] ──done──► controller
//!                              (range moved in)        (range moved out)
//! ```
//!
//! [`WorkerPool::dispatch`] is the barrier between phases: it returns only
//! after every range it sent out has come back. A job that panics still
//! hands its range back; the dispatch then fails with [`TierError::Pool`].

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::error::{TierError, TierResult};
use crate::policy::budget::RangeParameters;
use crate::range::TrackedRange;

/// Work carried by one dispatch
#[derive(Debug, Clone)]
pub enum Phase {
    /// One round over every range
    Walk,
    /// Locate pass plus histograms
    Locate,
    /// Selection and migration, one parameter pair per range
    Migrate(Vec<RangeParameters>),
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Phase::Walk => "walk",
            Phase::Locate => "locate",
            Phase::Migrate(_) => "migrate",
        }
    }
}

enum Job {
    Walk(usize, Box<TrackedRange>),
    Locate(usize, Box<TrackedRange>),
    Migrate(usize, Box<TrackedRange>, Box<RangeParameters>),
    Quit,
}

struct Done {
    slot: usize,
    range: Box<TrackedRange>,
    /// Panic message when the job did not finish
    panic: Option<String>,
}

pub struct WorkerPool {
    work_tx: Sender<Job>,
    done_rx: Receiver<Done>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `threads` workers, 0 meaning one per CPU
    pub fn new(threads: usize) -> TierResult<Self> {
        let threads = if threads == 0 { num_cpus::get() } else { threads };
        let (work_tx, work_rx) = unbounded::<Job>();
        let (done_tx, done_rx) = unbounded::<Done>();

        let mut workers = Vec::with_capacity(threads);
        for n in 0..threads {
            let work_rx = work_rx.clone();
            let done_tx = done_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("memtier-worker-{}", n))
                .spawn(move || worker_loop(work_rx, done_tx))?;
            workers.push(handle);
        }

        log::info!("[Pool] started {} workers", threads);
        Ok(Self {
            work_tx,
            done_rx,
            workers,
        })
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Run `phase` on every range and wait for all of them
    pub fn dispatch(&self, ranges: &mut Vec<Box<TrackedRange>>, phase: &Phase) -> TierResult<()> {
        if let Phase::Migrate(params) = phase {
            if params.len() != ranges.len() {
                return Err(TierError::Pool(format!(
                    "{} parameter sets for {} ranges",
                    params.len(),
                    ranges.len()
                )));
            }
        }

        let count = ranges.len();
        for (slot, range) in ranges.drain(..).enumerate() {
            let job = match phase {
                Phase::Walk => Job::Walk(slot, range),
                Phase::Locate => Job::Locate(slot, range),
                Phase::Migrate(params) => Job::Migrate(slot, range, Box::new(params[slot].clone())),
            };
            self.work_tx
                .send(job)
                .map_err(|_| TierError::Pool("work queue closed".into()))?;
        }

        let mut slots: Vec<Option<Box<TrackedRange>>> = (0..count).map(|_| None).collect();
        let mut failed: Option<String> = None;
        for _ in 0..count {
            let done = self
                .done_rx
                .recv()
                .map_err(|_| TierError::Pool(format!("workers gone during {} phase", phase.name())))?;
            if let Some(message) = done.panic {
                let reason = format!("{} job on range {} panicked: {}", phase.name(), done.range.id(), message);
                log::error!("[Pool] {}", reason);
                failed.get_or_insert(reason);
            }
            slots[done.slot] = Some(done.range);
        }
        ranges.extend(slots.into_iter().flatten());

        if let Some(reason) = failed {
            return Err(TierError::Pool(reason));
        }
        log::trace!("[Pool] {} phase done for {} ranges", phase.name(), count);
        Ok(())
    }

    /// Send one quit job per worker and join them
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        log::info!("[Pool] Shutting down...");
        for _ in 0..self.workers.len() {
            let _ = self.work_tx.send(Job::Quit);
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::error!("[Pool] worker panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(work_rx: Receiver<Job>, done_tx: Sender<Done>) {
    while let Ok(job) = work_rx.recv() {
        let done = match job {
            Job::Quit => break,
            Job::Walk(slot, range) => run_job(slot, range, |r| r.walk_once()),
            Job::Locate(slot, range) => run_job(slot, range, |r| r.locate()),
            Job::Migrate(slot, range, params) => run_job(slot, range, |r| r.migrate(&params)),
        };
        if done_tx.send(done).is_err() {
            break;
        }
    }
}

/// Run one job, keeping the range even when the job panics
fn run_job(slot: usize, mut range: Box<TrackedRange>, job: impl FnOnce(&mut TrackedRange)) -> Done {
    let result = panic::catch_unwind(AssertUnwindSafe(|| job(range.as_mut())));
    let panic = result.err().map(|payload| panic_message(payload.as_ref()));
    if let Some(message) = &panic {
        range.fail(format!("job panicked: {}", message));
    }
    Done { slot, range, panic }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
