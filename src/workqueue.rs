// CLASSIFICATION: COMMUNITY
// Filename: workqueue.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-10-15

//! Ordered single-threaded work queue.
//!
//! Components never run blocking "apply" steps from the caller's context.
//! They queue a [`Work`] instead and a dedicated worker thread runs it.
//! A work item is pending at most once: queuing it again before it starts
//! is a no-op, queuing it while it runs makes it run once more.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use log::{debug, error, warn};

use crate::error::Result;

type WorkFn = Box<dyn Fn() + Send + Sync>;

struct WorkInner {
    name: String,
    func: WorkFn,
    pending: AtomicBool,
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<Arc<WorkInner>>,
    queued: u64,
    done: u64,
    shutdown: bool,
}

struct Shared {
    name: String,
    state: Mutex<QueueState>,
    more: Condvar,
    progress: Condvar,
    worker: OnceLock<ThreadId>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn on_worker(&self) -> bool {
        self.worker.get() == Some(&thread::current().id())
    }

    fn flush(&self) {
        if self.on_worker() {
            debug!("{}: flush from worker skipped", self.name);
            return;
        }
        let st = self.lock();
        let target = st.queued;
        let _st = self
            .progress
            .wait_while(st, |st| st.done < target)
            .unwrap_or_else(|p| p.into_inner());
    }

    fn run(self: Arc<Self>) {
        let _ = self.worker.set(thread::current().id());
        loop {
            let item = {
                let mut st = self.lock();
                loop {
                    if let Some(item) = st.items.pop_front() {
                        break item;
                    }
                    if st.shutdown {
                        return;
                    }
                    st = self.more.wait(st).unwrap_or_else(|p| p.into_inner());
                }
            };
            item.pending.store(false, Ordering::Release);
            if panic::catch_unwind(AssertUnwindSafe(|| (item.func)())).is_err() {
                error!("{}: work {} panicked", self.name, item.name);
            }
            let mut st = self.lock();
            st.done += 1;
            self.progress.notify_all();
        }
    }
}

/// Owner of the worker thread. Dropping it drains queued work and joins.
pub struct WorkQueue {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl WorkQueue {
    /// Spawn a queue with its own named worker thread.
    pub fn new(name: &str) -> Result<Self> {
        let shared = Arc::new(Shared {
            name: name.to_string(),
            state: Mutex::new(QueueState::default()),
            more: Condvar::new(),
            progress: Condvar::new(),
            worker: OnceLock::new(),
        });
        let runner = shared.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || runner.run())?;
        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    /// Create a work item bound to this queue.
    pub fn work<F>(&self, name: &str, func: F) -> Work
    where
        F: Fn() + Send + Sync + 'static,
    {
        Work {
            inner: Arc::new(WorkInner {
                name: name.to_string(),
                func: Box::new(func),
                pending: AtomicBool::new(false),
            }),
            shared: self.shared.clone(),
        }
    }

    /// Wait for everything queued so far to finish.
    pub fn flush(&self) {
        self.shared.flush();
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        {
            let mut st = self.shared.lock();
            st.shutdown = true;
            self.shared.more.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            if self.shared.on_worker() {
                // Last owner went away inside a work item; the thread exits
                // by itself once the queue is drained.
                return;
            }
            if handle.join().is_err() {
                warn!("{}: worker thread exited abnormally", self.shared.name);
            }
        }
    }
}

/// Re-queueable unit of work.
#[derive(Clone)]
pub struct Work {
    inner: Arc<WorkInner>,
    shared: Arc<Shared>,
}

impl Work {
    /// Queue the work. Returns false if it was already pending.
    pub fn queue(&self) -> bool {
        if self.inner.pending.swap(true, Ordering::AcqRel) {
            return false;
        }
        let mut st = self.shared.lock();
        if st.shutdown {
            self.inner.pending.store(false, Ordering::Release);
            warn!("{}: {} queued after shutdown", self.shared.name, self.inner.name);
            return false;
        }
        st.items.push_back(self.inner.clone());
        st.queued += 1;
        self.shared.more.notify_one();
        true
    }

    pub fn is_pending(&self) -> bool {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Wait until this work, and anything queued before it, has run.
    pub fn flush(&self) {
        self.shared.flush();
    }
}

/// Work queued after a delay. Re-scheduling replaces the previous timer.
pub struct DelayedWork {
    work: Work,
    generation: Arc<AtomicU64>,
}

impl DelayedWork {
    pub fn new(work: Work) -> Self {
        Self {
            work,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Arm the timer; an earlier pending schedule is dropped.
    pub fn schedule(&self, delay: Duration) -> Result<()> {
        let armed = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let generation = self.generation.clone();
        let work = self.work.clone();
        thread::Builder::new()
            .name(format!("{}-timer", self.work.inner.name))
            .spawn(move || {
                thread::sleep(delay);
                if generation.load(Ordering::Acquire) == armed {
                    work.queue();
                }
            })?;
        Ok(())
    }

    /// Drop a pending schedule. Work already queued still runs.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    pub fn work(&self) -> &Work {
        &self.work
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    #[test]
    fn pending_work_coalesces() {
        let wq = WorkQueue::new("test-wq").expect("spawn");
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let gate_rx = Mutex::new(gate_rx);
        let blocker = wq.work("blocker", move || {
            let _ = gate_rx.lock().unwrap().recv();
        });
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let counted = wq.work("counted", move || {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert!(blocker.queue());
        assert!(counted.queue());
        assert!(!counted.queue());
        gate_tx.send(()).unwrap();
        wq.flush();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(counted.queue());
        counted.flush();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn work_runs_in_queue_order() {
        let wq = WorkQueue::new("order-wq").expect("spawn");
        let log = Arc::new(Mutex::new(Vec::new()));
        let works: Vec<Work> = (0..4)
            .map(|i| {
                let log = log.clone();
                wq.work(&format!("w{i}"), move || log.lock().unwrap().push(i))
            })
            .collect();
        for w in &works {
            w.queue();
        }
        wq.flush();
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn cancelled_delayed_work_never_runs() {
        let wq = WorkQueue::new("delay-wq").expect("spawn");
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let dw = DelayedWork::new(wq.work("delayed", move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        dw.schedule(Duration::from_millis(30)).unwrap();
        dw.cancel();
        thread::sleep(Duration::from_millis(80));
        wq.flush();
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        dw.schedule(Duration::from_millis(10)).unwrap();
        thread::sleep(Duration::from_millis(60));
        wq.flush();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_work_does_not_kill_worker() {
        let wq = WorkQueue::new("panic-wq").expect("spawn");
        let bad = wq.work("bad", || panic!("boom"));
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let good = wq.work("good", move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        bad.queue();
        good.queue();
        wq.flush();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn flush_from_worker_does_not_block() {
        let wq = WorkQueue::new("self-wq").expect("spawn");
        let me: Arc<OnceLock<Work>> = Arc::new(OnceLock::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let (m, h) = (me.clone(), hits.clone());
        let work = wq.work("self_flush", move || {
            if let Some(w) = m.get() {
                w.flush();
            }
            h.fetch_add(1, Ordering::SeqCst);
        });
        let _ = me.set(work.clone());
        work.queue();
        wq.flush();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
