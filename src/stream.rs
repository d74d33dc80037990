//! Progress Stream: an append-only, resumable event log per job, fanned out
//! to zero or more live subscribers. The log is the source of truth for
//! resumption; each subscriber additionally gets a bounded live channel so a
//! slow reader is disconnected (channel full => dropped) rather than
//! blocking the publisher.

use futures::Stream;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::models::{ProgressEvent, ProgressEventPayload};

pub const SUBSCRIBER_BUFFER: usize = 256;

struct Subscriber {
    sender: mpsc::Sender<ProgressEvent>,
}

pub struct JobStream {
    job_id: String,
    events: Mutex<Vec<ProgressEvent>>,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl JobStream {
    pub fn new(job_id: impl Into<String>) -> Self {
        JobStream {
            job_id: job_id.into(),
            events: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Appends `payload` to the log, allocating its `event_id` there (never
    /// by the publisher), and fans it out to live subscribers. A full
    /// subscriber channel is treated as a slow reader and dropped; the log
    /// remains available for them to resume from via `subscribe`.
    pub async fn publish(&self, payload: ProgressEventPayload) -> u64 {
        let mut events = self.events.lock().await;
        let event_id = events.len() as u64 + 1;
        let event = ProgressEvent {
            event_id,
            job_id: self.job_id.clone(),
            payload,
            timestamp: chrono::Utc::now(),
        };
        events.push(event.clone());
        drop(events);

        let mut subs = self.subscribers.lock().await;
        subs.retain(|sub| sub.sender.try_send(event.clone()).is_ok());
        event_id
    }

    pub async fn last_event_id(&self) -> u64 {
        self.events.lock().await.len() as u64
    }

    /// Subscribes from `since_event_id` (0 for "from the start"). Replays
    /// every event with `id > since_event_id` from the log before forwarding
    /// live events, with no duplicate delivery across the replay boundary.
    /// The returned stream ends after yielding a terminal event.
    pub async fn subscribe(&self, since_event_id: u64) -> impl Stream<Item = ProgressEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);

        let replay: Vec<ProgressEvent> = {
            let events = self.events.lock().await;
            let replay = events
                .iter()
                .filter(|e| e.event_id > since_event_id)
                .cloned()
                .collect();
            let mut subs = self.subscribers.lock().await;
            subs.push(Subscriber { sender: tx });
            replay
        };

        struct State {
            replay: std::vec::IntoIter<ProgressEvent>,
            rx: mpsc::Receiver<ProgressEvent>,
            done: bool,
        }

        let state = State {
            replay: replay.into_iter(),
            rx,
            done: false,
        };

        futures::stream::unfold(state, |mut state| async move {
            if state.done {
                return None;
            }
            let event = match state.replay.next() {
                Some(e) => e,
                None => state.rx.recv().await?,
            };
            if event.payload.is_terminal() {
                state.done = true;
            }
            Some((event, state))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn publish_allocates_monotonic_event_ids() {
        let stream = JobStream::new("job-1");
        let id1 = stream
            .publish(ProgressEventPayload::UrlStarted {
                url: "https://t.com".to_string(),
                depth: 0,
            })
            .await;
        let id2 = stream
            .publish(ProgressEventPayload::UrlStarted {
                url: "https://t.com/a".to_string(),
                depth: 1,
            })
            .await;
        assert_eq!(id1, 1);
        assert_eq!(id2, 2);
    }

    #[tokio::test]
    async fn subscribe_replays_then_ends_on_terminal() {
        let stream = Arc::new(JobStream::new("job-1"));
        stream
            .publish(ProgressEventPayload::StreamConnected {
                job_id: "job-1".to_string(),
                url: "https://t.com".to_string(),
            })
            .await;
        stream
            .publish(ProgressEventPayload::JobCompleted {
                job_id: "job-1".to_string(),
                total_processed: 1,
                total_discovered: 1,
            })
            .await;

        let events: Vec<_> = stream.subscribe(0).await.collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_id, 1);
        assert_eq!(events[1].event_id, 2);
    }

    #[tokio::test]
    async fn resume_from_last_event_id_has_no_duplicates() {
        let stream = Arc::new(JobStream::new("job-1"));
        for i in 0..5 {
            stream
                .publish(ProgressEventPayload::UrlStarted {
                    url: format!("https://t.com/{i}"),
                    depth: 0,
                })
                .await;
        }
        stream
            .publish(ProgressEventPayload::JobCompleted {
                job_id: "job-1".to_string(),
                total_processed: 5,
                total_discovered: 5,
            })
            .await;

        let resumed: Vec<_> = stream.subscribe(5).await.collect().await;
        assert_eq!(resumed.len(), 1);
        assert_eq!(resumed[0].event_id, 6);
    }

    #[tokio::test]
    async fn isolation_across_jobs() {
        let stream_a = Arc::new(JobStream::new("job-a"));
        let stream_b = Arc::new(JobStream::new("job-b"));
        stream_a
            .publish(ProgressEventPayload::JobCompleted {
                job_id: "job-a".to_string(),
                total_processed: 1,
                total_discovered: 1,
            })
            .await;

        let events_b: Vec<_> = stream_b.subscribe(0).await.take(0).collect().await;
        assert!(events_b.is_empty());
        assert_eq!(stream_b.last_event_id().await, 0);
    }
}
