//! In-memory traffic history with request/response pairing.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use lspkit_jsonrpc::{Message, RequestId};

use crate::tap::{Direction, TrafficSink};

/// Latency samples kept per method for the rolling average.
const LATENCY_WINDOW: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
    Notification,
    /// The body was not a classifiable JSON-RPC message.
    Invalid,
}

#[derive(Debug, Clone)]
pub struct TrafficEntry {
    /// Monotonic position in the store, starting at 0. Survives eviction.
    pub seq: u64,
    pub timestamp: SystemTime,
    pub direction: Direction,
    pub kind: MessageKind,
    pub method: Option<String>,
    pub rpc_id: Option<RequestId>,
    pub body: Vec<u8>,
    /// For a request, the `seq` of its response; for a response, its request.
    pub paired_with: Option<u64>,
    /// Set on responses that were paired.
    pub latency: Option<Duration>,
}

impl TrafficEntry {
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MethodStats {
    pub requests: u64,
    pub responses: u64,
    /// Mean over the most recent paired responses.
    pub average_latency: Option<Duration>,
}

/// Totals since the store was created or last cleared. Unaffected by eviction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrafficStats {
    pub requests: u64,
    pub responses: u64,
    pub notifications: u64,
    pub invalid: u64,
    pub average_latency: Option<Duration>,
    pub methods: BTreeMap<String, MethodStats>,
}

type Subscriber = Arc<dyn Fn(&TrafficEntry) + Send + Sync>;

struct Outstanding {
    seq: u64,
    method: String,
    sent: Instant,
}

#[derive(Default)]
struct MethodTotals {
    requests: u64,
    responses: u64,
    latencies: VecDeque<Duration>,
}

#[derive(Default)]
struct Inner {
    entries: VecDeque<TrafficEntry>,
    next_seq: u64,
    outstanding: HashMap<(Direction, RequestId), Outstanding>,
    requests: u64,
    responses: u64,
    notifications: u64,
    invalid: u64,
    latency_total: Duration,
    latency_samples: u32,
    methods: BTreeMap<String, MethodTotals>,
}

impl Inner {
    fn position(&self, seq: u64) -> Option<usize> {
        let first = self.entries.front()?.seq;
        let index = usize::try_from(seq.checked_sub(first)?).ok()?;
        (index < self.entries.len()).then_some(index)
    }

    fn evict(&mut self) {
        let Some(old) = self.entries.pop_front() else {
            return;
        };
        if old.kind == MessageKind::Request
            && let Some(id) = old.rpc_id
        {
            let key = (old.direction, id);
            if self.outstanding.get(&key).is_some_and(|o| o.seq == old.seq) {
                self.outstanding.remove(&key);
            }
        }
    }
}

/// Bounded ring of recorded traffic. Cheap to clone; clones share the ring.
#[derive(Clone)]
pub struct TrafficStore {
    capacity: usize,
    inner: Arc<Mutex<Inner>>,
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TrafficStore {
    /// A capacity of zero is treated as one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Arc::new(Mutex::new(Inner::default())),
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Classify and store one frame body. Returns the new entry's `seq`.
    pub fn add(&self, direction: Direction, body: &[u8]) -> u64 {
        let (kind, method, rpc_id) = match Message::decode(body) {
            Ok(Message::Request(req)) => (MessageKind::Request, Some(req.method), Some(req.id)),
            Ok(Message::Response(resp)) => (MessageKind::Response, None, Some(resp.id)),
            Ok(Message::Notification(notif)) => {
                (MessageKind::Notification, Some(notif.method), None)
            }
            Err(e) => {
                tracing::trace!("Recorded unclassifiable {direction} frame: {e}");
                (MessageKind::Invalid, None, None)
            }
        };

        let entry = {
            let mut inner = lock(&self.inner);
            let seq = inner.next_seq;
            inner.next_seq += 1;

            let mut entry = TrafficEntry {
                seq,
                timestamp: SystemTime::now(),
                direction,
                kind,
                method,
                rpc_id,
                body: body.to_vec(),
                paired_with: None,
                latency: None,
            };

            match kind {
                MessageKind::Request => {
                    inner.requests += 1;
                    if let (Some(id), Some(method)) = (&entry.rpc_id, &entry.method) {
                        inner.methods.entry(method.clone()).or_default().requests += 1;
                        inner.outstanding.insert(
                            (direction, id.clone()),
                            Outstanding {
                                seq,
                                method: method.clone(),
                                sent: Instant::now(),
                            },
                        );
                    }
                }
                MessageKind::Response => {
                    inner.responses += 1;
                    let key = entry.rpc_id.clone().map(|id| (direction.opposite(), id));
                    if let Some(request) = key.and_then(|key| inner.outstanding.remove(&key)) {
                        let latency = request.sent.elapsed();
                        entry.paired_with = Some(request.seq);
                        entry.latency = Some(latency);
                        inner.latency_total += latency;
                        inner.latency_samples += 1;

                        let totals = inner.methods.entry(request.method).or_default();
                        totals.responses += 1;
                        totals.latencies.push_back(latency);
                        if totals.latencies.len() > LATENCY_WINDOW {
                            totals.latencies.pop_front();
                        }

                        if let Some(index) = inner.position(request.seq) {
                            inner.entries[index].paired_with = Some(seq);
                        }
                    }
                }
                MessageKind::Notification => inner.notifications += 1,
                MessageKind::Invalid => inner.invalid += 1,
            }

            if inner.entries.len() >= self.capacity {
                inner.evict();
            }
            inner.entries.push_back(entry.clone());
            entry
        };

        let subscribers = lock(&self.subscribers).clone();
        for subscriber in subscribers {
            subscriber(&entry);
        }
        entry.seq
    }

    /// Register a callback run for every new entry, outside the store's lock.
    pub fn subscribe(&self, callback: impl Fn(&TrafficEntry) + Send + Sync + 'static) {
        lock(&self.subscribers).push(Arc::new(callback));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Up to `limit` entries starting `offset` entries after the oldest.
    #[must_use]
    pub fn entries(&self, offset: usize, limit: usize) -> Vec<TrafficEntry> {
        lock(&self.inner)
            .entries
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn entry(&self, seq: u64) -> Option<TrafficEntry> {
        let inner = lock(&self.inner);
        let index = inner.position(seq)?;
        Some(inner.entries[index].clone())
    }

    /// Case-insensitive substring match on method names and bodies.
    #[must_use]
    pub fn search(&self, query: &str) -> Vec<TrafficEntry> {
        let query = query.to_lowercase();
        lock(&self.inner)
            .entries
            .iter()
            .filter(|entry| {
                entry
                    .method
                    .as_deref()
                    .is_some_and(|m| m.to_lowercase().contains(&query))
                    || entry.body_text().to_lowercase().contains(&query)
            })
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn stats(&self) -> TrafficStats {
        let inner = lock(&self.inner);
        let methods = inner
            .methods
            .iter()
            .map(|(name, totals)| {
                (
                    name.clone(),
                    MethodStats {
                        requests: totals.requests,
                        responses: totals.responses,
                        average_latency: average(&totals.latencies),
                    },
                )
            })
            .collect();

        TrafficStats {
            requests: inner.requests,
            responses: inner.responses,
            notifications: inner.notifications,
            invalid: inner.invalid,
            average_latency: (inner.latency_samples > 0)
                .then(|| inner.latency_total / inner.latency_samples),
            methods,
        }
    }

    /// Drop all entries and totals. Sequence numbers keep counting.
    pub fn clear(&self) {
        let mut inner = lock(&self.inner);
        let next_seq = inner.next_seq;
        *inner = Inner {
            next_seq,
            ..Inner::default()
        };
    }
}

impl TrafficSink for TrafficStore {
    fn record(&self, direction: Direction, body: &[u8]) {
        self.add(direction, body);
    }
}

fn average(samples: &VecDeque<Duration>) -> Option<Duration> {
    let count = u32::try_from(samples.len()).ok().filter(|&n| n > 0)?;
    Some(samples.iter().sum::<Duration>() / count)
}
