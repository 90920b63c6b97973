//! Thread-safe batched HTTP transport.
//!
//! Events are enqueued by instrumentation calls, buffered in a bounded
//! deque, and shipped to `/v1/ingest` by one background worker thread.
//!
//! Critical invariant: the transport never panics and never surfaces
//! errors to the caller. All failures are logged and the affected events
//! dropped. The SDK must never interfere with the instrumented
//! application.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use loophive_core::{BatchEnvelope, IngestEvent, MAX_BATCH_EVENTS};

// Retry configuration
const MAX_RETRIES: u32 = 5;
const BACKOFF_BASE_SECS: f64 = 1.0;
const BACKOFF_CAP_SECS: f64 = 60.0;
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// An event paired with its agent envelope metadata.
#[derive(Debug)]
struct QueueItem {
    event: IngestEvent,
    envelope: BatchEnvelope,
}

#[derive(Debug)]
enum WorkerSignal {
    Flush,
    Shutdown,
}

#[derive(Debug)]
struct Shared {
    queue: Mutex<VecDeque<QueueItem>>,
    shutdown: AtomicBool,
    max_queue_size: usize,
    batch_size: usize,
    endpoint: String,
    api_key: String,
    // Built lazily on the worker thread: a blocking client must never be
    // constructed or driven from an async runtime thread.
    http: std::sync::OnceLock<reqwest::blocking::Client>,
}

impl Shared {
    fn http(&self) -> &reqwest::blocking::Client {
        self.http.get_or_init(|| {
            reqwest::blocking::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .unwrap_or_default()
        })
    }

    /// Pop up to batch_size items.
    fn drain_batch(&self) -> Vec<QueueItem> {
        let mut queue = match self.queue.lock() {
            Ok(queue) => queue,
            Err(poisoned) => poisoned.into_inner(),
        };
        let take = self.batch_size.min(queue.len());
        queue.drain(..take).collect()
    }

    /// Drain the queue completely in batch_size chunks, grouping each
    /// chunk by envelope so events from distinct agents never share a
    /// batch.
    fn drain_all(&self) {
        loop {
            let items = self.drain_batch();
            if items.is_empty() {
                break;
            }
            for (envelope, events) in group_by_envelope(items) {
                self.send_batch(&envelope, events);
            }
        }
    }

    /// POST one batch with retry and backoff. Returns true on success.
    fn send_batch(&self, envelope: &BatchEnvelope, events: Vec<IngestEvent>) -> bool {
        let url = format!("{}/v1/ingest", self.endpoint);
        let body = serde_json::json!({"envelope": envelope, "events": &events});

        let mut attempt: u32 = 0;
        while attempt <= MAX_RETRIES {
            let response = self
                .http()
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status().as_u16();
                    match status {
                        200 | 207 => {
                            if status == 207 {
                                if let Ok(data) =
                                    response.json::<serde_json::Value>()
                                {
                                    let rejected =
                                        data["rejected"].as_u64().unwrap_or(0);
                                    if rejected > 0 {
                                        tracing::warn!(
                                            accepted = data["accepted"].as_u64().unwrap_or(0),
                                            rejected,
                                            errors = %data["errors"],
                                            "Batch partially rejected"
                                        );
                                    }
                                }
                            }
                            return true;
                        }
                        429 => {
                            // Rate limited: server-provided delay, and the
                            // retry does not consume an attempt.
                            let delay = parse_retry_after(response);
                            tracing::warn!(delay_secs = delay, "Rate limited (429), retrying");
                            thread::sleep(Duration::from_secs_f64(delay));
                            continue;
                        }
                        400 => {
                            let text = response.text().unwrap_or_default();
                            tracing::error!(
                                body = %text.chars().take(500).collect::<String>(),
                                dropped = events.len(),
                                "Batch rejected (400), dropping"
                            );
                            return false;
                        }
                        500..=599 => {
                            let delay = backoff_delay(attempt);
                            tracing::warn!(
                                status,
                                attempt = attempt + 1,
                                max = MAX_RETRIES,
                                delay_secs = delay,
                                "Server error, retrying"
                            );
                            thread::sleep(Duration::from_secs_f64(delay));
                            attempt += 1;
                            continue;
                        }
                        other => {
                            tracing::error!(
                                status = other,
                                dropped = events.len(),
                                "Unexpected status, dropping batch"
                            );
                            return false;
                        }
                    }
                }
                Err(error) if error.is_connect() || error.is_timeout() => {
                    let delay = backoff_delay(attempt);
                    tracing::warn!(
                        error = %error,
                        attempt = attempt + 1,
                        max = MAX_RETRIES,
                        delay_secs = delay,
                        "Connection error, retrying"
                    );
                    thread::sleep(Duration::from_secs_f64(delay));
                    attempt += 1;
                }
                Err(error) => {
                    tracing::error!(error = %error, "Unexpected send failure, dropping batch");
                    return false;
                }
            }
        }

        tracing::error!(
            retries = MAX_RETRIES,
            dropped = events.len(),
            "Exhausted retries, dropping batch"
        );
        false
    }
}

/// Exponential backoff: 1, 2, 4, 8, 16 seconds, capped at 60.
fn backoff_delay(attempt: u32) -> f64 {
    (BACKOFF_BASE_SECS * 2f64.powi(attempt as i32)).min(BACKOFF_CAP_SECS)
}

/// Retry delay for a 429: `details.retry_after_seconds` in the body,
/// falling back to the `Retry-After` header, then 2 seconds.
fn parse_retry_after(response: reqwest::blocking::Response) -> f64 {
    let header = response
        .headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<f64>().ok());
    if let Ok(data) = response.json::<serde_json::Value>() {
        if let Some(secs) = data["details"]["retry_after_seconds"].as_f64() {
            return secs;
        }
    }
    header.unwrap_or(2.0)
}

/// Group drained items by serialized envelope.
fn group_by_envelope(items: Vec<QueueItem>) -> Vec<(BatchEnvelope, Vec<IngestEvent>)> {
    let mut groups: HashMap<String, (BatchEnvelope, Vec<IngestEvent>)> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for item in items {
        let key = serde_json::to_string(&item.envelope).unwrap_or_default();
        let entry = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            (item.envelope, Vec::new())
        });
        entry.1.push(item.event);
    }
    order
        .into_iter()
        .filter_map(|key| groups.remove(&key))
        .collect()
}

// ============================================================================
// TRANSPORT
// ============================================================================

/// The public transport handle. Cloning is cheap; all clones share one
/// worker thread and queue.
#[derive(Debug)]
pub struct Transport {
    shared: Arc<Shared>,
    signal_tx: mpsc::Sender<WorkerSignal>,
    done_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl Transport {
    pub fn new(
        endpoint: String,
        api_key: String,
        flush_interval: Duration,
        batch_size: usize,
        max_queue_size: usize,
    ) -> Arc<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            shutdown: AtomicBool::new(false),
            max_queue_size,
            batch_size: batch_size.min(MAX_BATCH_EVENTS),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
            http: std::sync::OnceLock::new(),
        });

        let (signal_tx, signal_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let worker_shared = shared.clone();
        thread::Builder::new()
            .name("loophive-flush".to_string())
            .spawn(move || {
                flush_loop(worker_shared, signal_rx, flush_interval);
                let _ = done_tx.send(());
            })
            .expect("spawn flush worker");

        Arc::new(Self {
            shared,
            signal_tx,
            done_rx: Mutex::new(Some(done_rx)),
        })
    }

    /// Add an event to the queue. Non-blocking, never fails. When the
    /// buffer is full the oldest event is dropped to admit the new one.
    pub fn enqueue(&self, event: IngestEvent, envelope: BatchEnvelope) {
        if self.shared.shutdown.load(Ordering::SeqCst) {
            return;
        }
        let trigger_flush = {
            let mut queue = match self.shared.queue.lock() {
                Ok(queue) => queue,
                Err(poisoned) => poisoned.into_inner(),
            };
            if queue.len() >= self.shared.max_queue_size {
                queue.pop_front();
                tracing::warn!(
                    capacity = self.shared.max_queue_size,
                    "Event queue full, dropping oldest events"
                );
            }
            queue.push_back(QueueItem { event, envelope });
            queue.len() >= self.shared.batch_size
        };
        if trigger_flush {
            let _ = self.signal_tx.send(WorkerSignal::Flush);
        }
    }

    /// Signal an immediate drain.
    pub fn flush(&self) {
        if self.shared.shutdown.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.signal_tx.send(WorkerSignal::Flush);
    }

    /// Graceful shutdown: stop the worker (waiting up to `timeout`), then
    /// drain whatever is still queued synchronously. Events submitted
    /// after shutdown are discarded.
    pub fn shutdown(&self, timeout: Duration) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.signal_tx.send(WorkerSignal::Shutdown);
        let done_rx = match self.done_rx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(done_rx) = done_rx {
            if done_rx.recv_timeout(timeout).is_err() {
                tracing::warn!("Flush worker did not stop within the shutdown timeout");
            }
        }
        // Final synchronous drain, on a dedicated thread so the blocking
        // HTTP client is never driven from an async runtime thread.
        let shared = self.shared.clone();
        match thread::Builder::new()
            .name("loophive-drain".to_string())
            .spawn(move || shared.drain_all())
        {
            Ok(handle) => {
                let _ = handle.join();
            }
            Err(_) => self.shared.drain_all(),
        }
    }

    /// Buffered event count (test hook).
    pub fn queued(&self) -> usize {
        match self.shared.queue.lock() {
            Ok(queue) => queue.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

/// Worker loop: wake on the periodic tick or an explicit signal, drain,
/// repeat until shutdown.
fn flush_loop(
    shared: Arc<Shared>,
    signal_rx: mpsc::Receiver<WorkerSignal>,
    flush_interval: Duration,
) {
    loop {
        let signal = signal_rx.recv_timeout(flush_interval);
        if shared.shutdown.load(Ordering::SeqCst)
            || matches!(signal, Ok(WorkerSignal::Shutdown))
            || matches!(signal, Err(mpsc::RecvTimeoutError::Disconnected))
        {
            break;
        }
        shared.drain_all();
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        // Process-exit hook equivalent: a dropped transport still drains.
        self.shutdown(Duration::from_secs(5));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str) -> IngestEvent {
        IngestEvent {
            event_id: id.to_string(),
            timestamp: "2026-02-10T14:00:00Z".to_string(),
            event_type: "heartbeat".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_backoff_sequence() {
        assert_eq!(backoff_delay(0), 1.0);
        assert_eq!(backoff_delay(1), 2.0);
        assert_eq!(backoff_delay(2), 4.0);
        assert_eq!(backoff_delay(3), 8.0);
        assert_eq!(backoff_delay(4), 16.0);
        assert_eq!(backoff_delay(6), 60.0);
        assert_eq!(backoff_delay(10), 60.0);
    }

    #[test]
    fn test_group_by_envelope_separates_agents() {
        let items = vec![
            QueueItem {
                event: event("e1"),
                envelope: BatchEnvelope::new("a1"),
            },
            QueueItem {
                event: event("e2"),
                envelope: BatchEnvelope::new("a2"),
            },
            QueueItem {
                event: event("e3"),
                envelope: BatchEnvelope::new("a1"),
            },
        ];
        let groups = group_by_envelope(items);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0.agent_id, "a1");
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0.agent_id, "a2");
        assert_eq!(groups[1].1.len(), 1);
    }

    #[test]
    fn test_queue_overflow_drops_oldest() {
        // Endpoint that will never be reached; long flush interval so the
        // worker stays asleep during the test.
        let transport = Transport::new(
            "http://127.0.0.1:9".to_string(),
            "hb_test_x".to_string(),
            Duration::from_secs(3600),
            1000,
            3,
        );
        for i in 0..5 {
            transport.enqueue(event(&format!("e{i}")), BatchEnvelope::new("a1"));
        }
        assert_eq!(transport.queued(), 3);
        {
            let queue = transport.shared.queue.lock().unwrap();
            let ids: Vec<&str> = queue.iter().map(|i| i.event.event_id.as_str()).collect();
            assert_eq!(ids, vec!["e2", "e3", "e4"]);
        }
        // Avoid the drop-time network drain for unreachable endpoints.
        transport.shared.shutdown.store(true, Ordering::SeqCst);
    }

    #[test]
    fn test_enqueue_after_shutdown_is_discarded() {
        let transport = Transport::new(
            "http://127.0.0.1:9".to_string(),
            "hb_test_x".to_string(),
            Duration::from_secs(3600),
            100,
            10,
        );
        transport.shared.shutdown.store(true, Ordering::SeqCst);
        transport.enqueue(event("late"), BatchEnvelope::new("a1"));
        assert_eq!(transport.queued(), 0);
    }
}
