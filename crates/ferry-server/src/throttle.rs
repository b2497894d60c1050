//! Bandwidth throttle for best-effort ("giant") chunk fetches.
//!
//! Priority fetches never wait here. Giant fetches are queued per
//! connection and drained by a worker task that runs only while there is
//! work:
//!
//!   drain  — if the quota is positive at tick start, serve everything queued
//!   sleep  — one tick (500 ms by default), cut short by teardown
//!   refill — quota += ceil(bandwidth * tick)
//!   retire — once idle time exceeds 60 ticks and the queue is empty
//!
//! The quota may go negative inside a tick. Later ticks pay the overdraft back.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use ferry_core::message::now_millis;
use ferry_core::{ChunkFetchRequest, FetchClass, TransferConfig};

use crate::channel::describe_remote;
use crate::fetch::ChunkFetcher;

// ── Quota ────────────────────────────────────────────────────────────────────

/// Byte budget for giant fetches on one connection.
#[derive(Debug)]
pub struct BandwidthQuota {
    remaining: AtomicI64,
    refill_per_tick: i64,
}

impl BandwidthQuota {
    /// Starts with one tick's worth of budget.
    pub fn new(refill_per_tick: i64) -> Self {
        Self {
            remaining: AtomicI64::new(refill_per_tick),
            refill_per_tick,
        }
    }

    pub fn remaining(&self) -> i64 {
        self.remaining.load(Ordering::Acquire)
    }

    pub fn refill_per_tick(&self) -> i64 {
        self.refill_per_tick
    }

    pub fn has_budget(&self) -> bool {
        self.remaining() > 0
    }

    /// May take the quota below zero.
    pub fn debit(&self, bytes: i64) {
        let _ = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| {
                Some(r.saturating_sub(bytes))
            });
    }

    pub fn credit(&self) {
        let refill = self.refill_per_tick;
        let _ = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| {
                Some(r.saturating_add(refill))
            });
    }

    /// Back to exactly one tick's refill.
    pub fn reset(&self) {
        self.remaining.store(self.refill_per_tick, Ordering::Release);
    }
}

// ── Queue ────────────────────────────────────────────────────────────────────

/// Unbounded FIFO. Producers are the delivery path; the consumer is
/// whichever worker currently holds the running flag.
struct GiantQueue {
    tx: mpsc::UnboundedSender<ChunkFetchRequest>,
    rx: Mutex<mpsc::UnboundedReceiver<ChunkFetchRequest>>,
}

impl GiantQueue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    fn receiver(&self) -> MutexGuard<'_, mpsc::UnboundedReceiver<ChunkFetchRequest>> {
        self.rx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, request: ChunkFetchRequest) {
        // The receiver lives as long as the sender, so this cannot fail.
        let _ = self.tx.send(request);
    }

    fn pop(&self) -> Option<ChunkFetchRequest> {
        self.receiver().try_recv().ok()
    }

    fn len(&self) -> usize {
        self.receiver().len()
    }
}

// ── Throttled queue ──────────────────────────────────────────────────────────

/// Point-in-time view of a connection's throttle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleStats {
    pub running: bool,
    pub queued: usize,
    pub remaining_bytes: i64,
    pub idle_millis: u64,
}

/// Giant-fetch queue plus its self-starting, self-retiring worker.
///
/// Dropping this handle stops the worker.
pub struct ThrottledFetchQueue {
    shared: Arc<Shared>,
}

struct Shared {
    fetcher: Arc<ChunkFetcher>,
    // Created on the first giant submission.
    queue: OnceLock<GiantQueue>,
    running: AtomicBool,
    submitted: AtomicBool,
    idle_millis: AtomicU64,
    stopped: AtomicBool,
    wake: Notify,
    worker: Mutex<Option<JoinHandle<()>>>,
    tick: Duration,
    tick_ms: u64,
    idle_timeout_ms: u64,
}

impl ThrottledFetchQueue {
    pub fn new(fetcher: Arc<ChunkFetcher>, config: &TransferConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                fetcher,
                queue: OnceLock::new(),
                running: AtomicBool::new(false),
                submitted: AtomicBool::new(false),
                idle_millis: AtomicU64::new(0),
                stopped: AtomicBool::new(false),
                wake: Notify::new(),
                worker: Mutex::new(None),
                tick: config.tick_interval(),
                tick_ms: config.tick_interval_ms,
                idle_timeout_ms: config.idle_timeout_ms(),
            }),
        }
    }

    /// Queue a giant fetch and make sure a worker is draining.
    pub fn submit(&self, request: ChunkFetchRequest) {
        let shared = &self.shared;
        if shared.is_stopped() {
            tracing::debug!(
                chunk = %request.stream_chunk_id,
                "connection torn down, dropping giant fetch"
            );
            return;
        }
        shared.queue.get_or_init(GiantQueue::new).push(request);
        shared.submitted.store(true, Ordering::Release);
        shared.ensure_worker();
    }

    /// Stop the worker for good. Idempotent.
    pub fn stop(&self) {
        self.shared.stop();
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> ThrottleStats {
        ThrottleStats {
            running: self.is_running(),
            queued: self.shared.queued(),
            remaining_bytes: self.shared.fetcher.quota().remaining(),
            idle_millis: self.shared.idle_millis.load(Ordering::Acquire),
        }
    }
}

impl Drop for ThrottledFetchQueue {
    fn drop(&mut self) {
        self.shared.stop();
    }
}

impl Shared {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn queued(&self) -> usize {
        self.queue.get().map(GiantQueue::len).unwrap_or(0)
    }

    fn remote(&self) -> String {
        describe_remote(self.fetcher.client().as_ref())
    }

    fn ensure_worker(self: &Arc<Self>) {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.idle_millis.store(0, Ordering::Release);
        tracing::debug!(remote = %self.remote(), "starting giant fetch worker");

        let handle = self
            .fetcher
            .responder()
            .runtime()
            .spawn(Arc::clone(self).run());
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.wake.notify_one();
        if let Some(handle) = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        let was_running = self.running.swap(false, Ordering::AcqRel);
        tracing::debug!(remote = %self.remote(), was_running, "giant fetch worker stopped");
    }

    async fn run(self: Arc<Self>) {
        while !self.is_stopped() {
            self.drain();

            tokio::select! {
                _ = tokio::time::sleep(self.tick) => {}
                _ = self.wake.notified() => {}
            }
            if self.is_stopped() {
                break;
            }

            self.fetcher.quota().credit();
            let idle = self.account_idle();
            if idle > self.idle_timeout_ms && self.queued() == 0 && self.retire() {
                return;
            }
        }
        self.running.store(false, Ordering::Release);
    }

    /// Serve everything queued right now, provided the tick starts with budget.
    fn drain(&self) {
        let Some(queue) = self.queue.get() else {
            return;
        };
        let pending = queue.len();
        if pending == 0 {
            return;
        }
        let quota = self.fetcher.quota();
        if !quota.has_budget() {
            tracing::trace!(
                remaining = quota.remaining(),
                pending,
                "quota exhausted, waiting for refill"
            );
            return;
        }

        for _ in 0..pending {
            if self.is_stopped() {
                return;
            }
            let Some(request) = queue.pop() else {
                break;
            };
            let waited_ms = now_millis().saturating_sub(request.stream_chunk_id.submitted_at_millis);
            tracing::debug!(
                chunk = %request.stream_chunk_id,
                waited_ms,
                "serving queued giant fetch"
            );
            self.fetcher.serve(request, FetchClass::Giant);
        }
    }

    /// Returns idle time after this tick.
    fn account_idle(&self) -> u64 {
        if self.submitted.swap(false, Ordering::AcqRel) {
            self.idle_millis.store(0, Ordering::Release);
            0
        } else {
            self.idle_millis.fetch_add(self.tick_ms, Ordering::AcqRel) + self.tick_ms
        }
    }

    /// Give up the running flag. Returns false if a submission slipped in
    /// and this worker took the flag back.
    fn retire(&self) -> bool {
        self.fetcher.quota().reset();
        self.running.store(false, Ordering::Release);

        if self.queued() > 0
            && self
                .running
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.idle_millis.store(0, Ordering::Release);
            return false;
        }

        tracing::info!(
            remote = %self.remote(),
            idle_ms = self.idle_millis.load(Ordering::Acquire),
            "giant fetch worker idle, retiring"
        );
        true
    }
}
