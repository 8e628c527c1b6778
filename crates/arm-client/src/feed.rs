//! Captured-frame history fed by the store's change feed.
//!
//! The store publishes one insert notification per captured frame over a
//! WebSocket. Each notification's `fullDocument` becomes a [`FrameRecord`] in a
//! bounded history. This path is independent of the live camera stream.

use crate::error::Result;
use crate::task::CancellableTask;
use arm_core::{FrameHistory, FrameRecord};
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};
use url::Url;

#[derive(Debug, Deserialize)]
struct ChangeEvent {
    #[serde(rename = "fullDocument")]
    full_document: Option<FrameRecord>,
}

/// Parse one change-feed message. Anything without a usable `fullDocument`
/// is logged and skipped.
#[must_use]
pub fn parse_change_event(raw: &str) -> Option<FrameRecord> {
    match serde_json::from_str::<ChangeEvent>(raw) {
        Ok(ChangeEvent {
            full_document: Some(record),
        }) => Some(record),
        Ok(_) => {
            debug!("Change event without fullDocument");
            None
        }
        Err(err) => {
            warn!(error = %err, "Dropping malformed change event");
            None
        }
    }
}

/// Bounded history shared between the feed task and readers. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SharedHistory {
    inner: Arc<Mutex<FrameHistory>>,
    updates: Arc<watch::Sender<Vec<FrameRecord>>>,
}

impl SharedHistory {
    /// Empty history holding at most `capacity` records.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = watch::channel(Vec::new());
        Self {
            inner: Arc::new(Mutex::new(FrameHistory::new(capacity))),
            updates: Arc::new(tx),
        }
    }

    /// Insert a record, evicting the oldest when full.
    pub fn push(&self, record: FrameRecord) -> Option<FrameRecord> {
        let (evicted, snapshot) = {
            let mut history = self.inner.lock();
            let evicted = history.push(record);
            (evicted, history.to_vec())
        };
        self.updates.send_replace(snapshot);
        evicted
    }

    /// Replace the contents, keeping the newest records.
    pub fn seed(&self, records: Vec<FrameRecord>) {
        let snapshot = {
            let mut history = self.inner.lock();
            history.seed(records);
            history.to_vec()
        };
        self.updates.send_replace(snapshot);
    }

    /// Records oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<FrameRecord> {
        self.inner.lock().to_vec()
    }

    /// Maximum number of records.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity()
    }

    /// Receiver of the full history after every change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Vec<FrameRecord>> {
        self.updates.subscribe()
    }
}

/// Load the newest page of captured frames into `history`, oldest first.
///
/// `GET {collection}?page=1&pagesize={capacity}`
pub async fn seed_history(
    http: &reqwest::Client,
    collection: &Url,
    history: &SharedHistory,
) -> Result<usize> {
    let mut url = collection.clone();
    url.query_pairs_mut()
        .append_pair("page", "1")
        .append_pair("pagesize", &history.capacity().to_string());
    let mut records: Vec<FrameRecord> = http
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    let count = records.len();
    records.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    history.seed(records);
    info!(count, "Seeded frame history");
    Ok(count)
}

/// Running change-feed consumer. Dropping the handle stops it.
#[derive(Debug)]
pub struct ChangeFeedHandle {
    task: CancellableTask<Result<()>>,
}

impl ChangeFeedHandle {
    /// Connect to `url` and feed `history` until stopped or closed.
    pub fn spawn(url: Url, history: SharedHistory) -> Self {
        Self {
            task: CancellableTask::spawn(move |stop| consume(url, history, stop)),
        }
    }

    /// Stop consuming. Returns `true` on the first call.
    pub fn stop(&mut self) -> bool {
        self.task.cancel()
    }

    /// Wait for the consumer to exit.
    pub async fn join(&mut self) -> Option<Result<()>> {
        self.task.join().await
    }
}

async fn consume(url: Url, history: SharedHistory, mut stop: oneshot::Receiver<()>) -> Result<()> {
    let socket = tokio::select! {
        biased;
        _ = &mut stop => return Ok(()),
        connected = tokio_tungstenite::connect_async(url.as_str()) => connected?.0,
    };
    info!(%url, "Change feed connected");
    let (_sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => return Ok(()),
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if let Some(record) = parse_change_event(text.as_str()) {
                        trace!(timestamp = record.timestamp, "New captured frame");
                        history.push(record);
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!("Change feed closed");
                    return Ok(());
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(err.into()),
            },
        }
    }
}
