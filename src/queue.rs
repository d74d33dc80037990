//! Job Queue: one instance per active job. Holds the pending/in-flight/done
//! set of URL items with atomic claim semantics — `claim_batch` is the only
//! primitive that mutates an item out of `pending`, and it does so under a
//! single mutex so concurrent claimers never see the same item twice.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tokio::sync::{Mutex, Notify};

use crate::models::{QueueItem, QueueItemState};
use crate::normalize::url_hash;

pub struct NewItem {
    pub url: String,
    pub normalized_url: String,
    pub depth: u32,
    pub parent_url: Option<String>,
}

struct Inner {
    items: HashMap<u64, QueueItem>,
    pending_by_depth: BTreeMap<u32, VecDeque<u64>>,
    seen_hashes: HashSet<String>,
    next_item_id: u64,
    in_flight: HashSet<u64>,
}

pub struct JobQueue {
    job_id: String,
    max_retries: u32,
    inner: Mutex<Inner>,
    /// Signalled whenever an item becomes pending, so idle workers can wake
    /// without busy-polling.
    pub notify: Notify,
}

impl JobQueue {
    pub fn new(job_id: impl Into<String>, max_retries: u32) -> Self {
        JobQueue {
            job_id: job_id.into(),
            max_retries,
            inner: Mutex::new(Inner {
                items: HashMap::new(),
                pending_by_depth: BTreeMap::new(),
                seen_hashes: HashSet::new(),
                next_item_id: 1,
                in_flight: HashSet::new(),
            }),
            notify: Notify::new(),
        }
    }

    /// Inserts items whose `(job_id, url_hash)` is new. Returns the count
    /// actually inserted. Enqueuing the same URL twice inserts at most once.
    pub async fn enqueue(&self, new_items: Vec<NewItem>) -> usize {
        let mut inner = self.inner.lock().await;
        let mut inserted = 0;
        for item in new_items {
            let hash = url_hash(&item.normalized_url);
            if !inner.seen_hashes.insert(hash.clone()) {
                continue;
            }
            let item_id = inner.next_item_id;
            inner.next_item_id += 1;
            let depth = item.depth;
            inner.items.insert(
                item_id,
                QueueItem {
                    item_id,
                    job_id: self.job_id.clone(),
                    url: item.url,
                    normalized_url: item.normalized_url,
                    url_hash: hash,
                    depth,
                    parent_url: item.parent_url,
                    state: QueueItemState::Pending,
                    attempts: 0,
                    enqueued_at: chrono::Utc::now(),
                    claimed_at: None,
                },
            );
            inner.pending_by_depth.entry(depth).or_default().push_back(item_id);
            inserted += 1;
        }
        drop(inner);
        if inserted > 0 {
            self.notify.notify_waiters();
        }
        inserted
    }

    /// Atomically transitions up to `n` pending items to `in_flight`,
    /// breadth-first: lowest depth first, FIFO within a depth. A pending
    /// item is visible to at most one claimer.
    pub async fn claim_batch(&self, n: usize) -> Vec<QueueItem> {
        let mut inner = self.inner.lock().await;
        let mut claimed = Vec::with_capacity(n);
        let mut exhausted_depths = Vec::new();

        'outer: for (&depth, queue) in inner.pending_by_depth.iter_mut() {
            while claimed.len() < n {
                match queue.pop_front() {
                    Some(item_id) => claimed.push(item_id),
                    None => break,
                }
            }
            if queue.is_empty() {
                exhausted_depths.push(depth);
            }
            if claimed.len() >= n {
                break 'outer;
            }
        }

        for depth in exhausted_depths {
            inner.pending_by_depth.remove(&depth);
        }

        let now = chrono::Utc::now();
        let mut out = Vec::with_capacity(claimed.len());
        for item_id in claimed {
            inner.in_flight.insert(item_id);
            if let Some(item) = inner.items.get_mut(&item_id) {
                item.state = QueueItemState::InFlight;
                item.claimed_at = Some(now);
                item.attempts += 1;
                out.push(item.clone());
            }
        }
        out
    }

    pub async fn complete(&self, item_id: u64) {
        let mut inner = self.inner.lock().await;
        inner.in_flight.remove(&item_id);
        if let Some(item) = inner.items.get_mut(&item_id) {
            item.state = QueueItemState::Completed;
        }
    }

    /// On `retryable` and `attempts < max_retries`, resets the item to
    /// pending with its incremented attempt count; otherwise terminates it
    /// as failed. Returns `true` if the item reached the terminal `Failed`
    /// state, `false` if it was requeued.
    pub async fn fail(&self, item_id: u64, retryable: bool) -> bool {
        let mut inner = self.inner.lock().await;
        inner.in_flight.remove(&item_id);
        let max_retries = self.max_retries;
        let mut requeue_depth = None;
        let mut terminal = false;
        if let Some(item) = inner.items.get_mut(&item_id) {
            if retryable && item.attempts < max_retries {
                item.state = QueueItemState::Pending;
                item.claimed_at = None;
                requeue_depth = Some(item.depth);
            } else {
                item.state = QueueItemState::Failed;
                terminal = true;
            }
        }
        if let Some(depth) = requeue_depth {
            inner.pending_by_depth.entry(depth).or_default().push_back(item_id);
        }
        drop(inner);
        if requeue_depth.is_some() {
            self.notify.notify_waiters();
        }
        terminal
    }

    pub async fn pending_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.pending_by_depth.values().map(|q| q.len()).sum()
    }

    pub async fn in_flight_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.in_flight.len()
    }

    pub async fn has_seen(&self, normalized_url: &str) -> bool {
        let inner = self.inner.lock().await;
        inner.seen_hashes.contains(&url_hash(normalized_url))
    }
}
