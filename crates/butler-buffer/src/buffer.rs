use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::message_ref::MessageRef;
use crate::processor::Processor;
use crate::stats::{Stats, StatsSnapshot};
use butler_db::route_inbox;

#[derive(Debug, Clone)]
pub struct BufferConfig {
    pub queue_capacity: usize,
    pub worker_count: usize,
    pub scanner_interval_s: u64,
    pub scanner_batch_size: i64,
    pub scanner_grace_s: i64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            worker_count: 4,
            scanner_interval_s: 30,
            scanner_batch_size: 100,
            scanner_grace_s: 10,
        }
    }
}

struct Running {
    workers: Vec<JoinHandle<()>>,
    scanner: Option<JoinHandle<()>>,
}

/// Switchboard ingestion buffer: a bounded queue, N worker routines, and a
/// periodic DB scanner that recovers rows whose processing was interrupted
/// (§4.E). Callers always persist the envelope to `route_inbox` before
/// calling `enqueue`; a `false` return is safe precisely because the
/// scanner will pick the row up on its next sweep.
///
/// The single `mpsc::Receiver` is shared behind a `Mutex` so `worker_count`
/// tasks can all pull from it — each task holds the lock only across
/// `recv()`, releasing it before `process_fn` runs, so concurrent
/// processing is unaffected. Per-worker FIFO holds; cross-worker FIFO does
/// not (§5 ordering guarantees).
pub struct DurableBuffer {
    config: BufferConfig,
    pool: Option<PgPool>,
    tx: mpsc::Sender<MessageRef>,
    rx: Arc<Mutex<mpsc::Receiver<MessageRef>>>,
    stats: Arc<Stats>,
    running: Mutex<Option<Running>>,
}

impl DurableBuffer {
    pub fn new(config: BufferConfig, pool: Option<PgPool>) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            config,
            pool,
            tx,
            rx: Arc::new(Mutex::new(rx)),
            stats: Arc::new(Stats::default()),
            running: Mutex::new(None),
        }
    }

    /// Synchronous, non-blocking. `true` on success, `false` on a full
    /// queue (backpressure) — never blocks the caller.
    pub fn enqueue(&self, msg: MessageRef) -> bool {
        if self.try_send(msg) {
            self.stats.enqueue_hot_total.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            self.stats.backpressure_total.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Re-enqueue from the scanner sweep: counted as `enqueue_cold_total`
    /// instead of `enqueue_hot_total`, but shares backpressure accounting
    /// through the caller (the scanner stops the sweep on a full queue
    /// rather than recording backpressure — the row simply stays accepted).
    fn try_send(&self, msg: MessageRef) -> bool {
        self.tx.try_send(msg).is_ok()
    }

    pub fn stats(&self) -> StatsSnapshot {
        let depth = self.config.queue_capacity.saturating_sub(self.tx.capacity());
        self.stats.snapshot(depth)
    }

    /// Idempotent: a second `start()` while already running is a no-op.
    pub async fn start(self: &Arc<Self>, processor: Arc<dyn Processor>) {
        let mut guard = self.running.lock().await;
        if guard.is_some() {
            return;
        }

        let mut workers = Vec::with_capacity(self.config.worker_count);
        for worker_id in 0..self.config.worker_count {
            let rx = self.rx.clone();
            let processor = processor.clone();
            let pool = self.pool.clone();
            workers.push(tokio::spawn(worker_loop(worker_id, rx, processor, pool)));
        }

        let scanner = self.pool.clone().map(|pool| {
            let buffer = self.clone();
            tokio::spawn(scanner_loop(buffer, pool))
        });

        *guard = Some(Running { workers, scanner });
        info!(worker_count = self.config.worker_count, "durable buffer started");
    }

    /// Awaits the queue draining up to `drain_timeout`, then cancels workers
    /// and the scanner. Idempotent: stopping twice is a no-op.
    pub async fn stop(self: &Arc<Self>, drain_timeout: Duration) {
        let running = self.running.lock().await.take();
        let Some(running) = running else { return };

        let deadline = tokio::time::Instant::now() + drain_timeout;
        while self.tx.capacity() != self.config.queue_capacity.max(1) {
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        for worker in running.workers {
            worker.abort();
        }
        if let Some(scanner) = running.scanner {
            scanner.abort();
        }
        info!("durable buffer stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<MessageRef>>>,
    processor: Arc<dyn Processor>,
    pool: Option<PgPool>,
) {
    loop {
        let msg = {
            let mut guard = rx.lock().await;
            guard.recv().await
        };
        let Some(msg) = msg else {
            return;
        };

        if let Some(pool) = &pool {
            if let Err(e) = route_inbox::mark_processing(pool, msg.inbox_id).await {
                error!(worker_id, inbox_id = %msg.inbox_id, error = %e, "failed to mark row processing");
                continue;
            }
        }

        match processor.process(msg.clone()).await {
            Ok(session_id) => {
                if let Some(pool) = &pool {
                    if let Err(e) = route_inbox::mark_processed(pool, msg.inbox_id, &session_id).await {
                        error!(worker_id, inbox_id = %msg.inbox_id, error = %e, "failed to mark row processed");
                    }
                }
            }
            Err(reason) => {
                warn!(worker_id, inbox_id = %msg.inbox_id, reason = %reason, "message processing failed");
                if let Some(pool) = &pool {
                    if let Err(e) = route_inbox::mark_errored(pool, msg.inbox_id, &reason).await {
                        error!(worker_id, inbox_id = %msg.inbox_id, error = %e, "failed to mark row errored");
                    }
                }
            }
        }
    }
}

async fn scanner_loop(buffer: Arc<DurableBuffer>, pool: PgPool) {
    let mut ticker = tokio::time::interval(Duration::from_secs(buffer.config.scanner_interval_s.max(1)));
    loop {
        ticker.tick().await;
        scanner_sweep(&buffer, &pool).await;
    }
}

/// One scanner sweep (§4.E "Scanner sweep"), split out so tests can drive
/// it deterministically instead of waiting on the interval ticker.
pub async fn scanner_sweep(buffer: &DurableBuffer, pool: &PgPool) -> usize {
    let rows = match route_inbox::list_stale_accepted(pool, buffer.config.scanner_grace_s, buffer.config.scanner_batch_size).await {
        Ok(rows) => rows,
        Err(e) => {
            error!(error = %e, "scanner sweep query failed");
            return 0;
        }
    };

    let mut recovered = 0usize;
    for row in rows {
        let normalized_text = row
            .envelope_json
            .get("payload")
            .and_then(|p| p.get("normalized_text"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        if normalized_text.is_empty() {
            if let Err(e) = route_inbox::mark_errored(pool, row.id, "empty normalized_text").await {
                error!(inbox_id = %row.id, error = %e, "failed to mark empty-text row errored during scan");
            }
            continue;
        }

        let msg = MessageRef {
            inbox_id: row.id,
            normalized_text,
        };

        if !buffer.try_send(msg) {
            // queue full: stop the sweep, row stays accepted for next tick
            break;
        }
        buffer.stats.enqueue_cold_total.fetch_add(1, Ordering::Relaxed);
        buffer.stats.scanner_recovered_total.fetch_add(1, Ordering::Relaxed);
        recovered += 1;
    }

    recovered
}
