//! Server side of the generation event stream.
//!
//! [`spawn_relay`] runs the upstream fragments through a [`StreamSplitter`] on
//! a background task and hands back a [`CancellableSseStream`] of typed
//! events. The stream always starts with `Metadata` and always ends with
//! exactly one `Complete` or `Error`, whether the upstream finishes, fails,
//! times out, panics or is cancelled.

use axum::{
    extract::{Query, State},
    response::sse::Event,
};
use futures::stream::{Stream, StreamExt};
use log::{debug, error, info, warn};
use std::{
    collections::HashMap,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::Duration,
};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::services::anthropic::FragmentStream;
use crate::splitter::{SplitPolicy, StreamSplitter};
use crate::types::{ReferenceSummary, StreamEvent};

pub const GENERATION_FAILED: &str = "Failed to generate content. Please try again.";
pub const GENERATION_TIMED_OUT: &str = "Generation timed out. Please try again.";
pub const GENERATION_CANCELLED: &str = "Generation was cancelled.";

const RELAY_CHANNEL_CAPACITY: usize = 100;

pub fn to_sse_event(event: &StreamEvent) -> Event {
    Event::default().data(event.to_json())
}

/// Receiving end of one relay. Dropping it (client went away) cancels the
/// relay task, which then stops pulling from the upstream.
pub struct CancellableSseStream {
    receiver: mpsc::Receiver<StreamEvent>,
    cancel_token: CancellationToken,
}

impl Stream for CancellableSseStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for CancellableSseStream {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

#[derive(Clone)]
pub struct SseState {
    cancel_tokens: Arc<dashmap::DashMap<String, CancellationToken>>,
}

impl Default for SseState {
    fn default() -> Self {
        Self {
            cancel_tokens: Arc::new(dashmap::DashMap::new()),
        }
    }
}

impl SseState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_stream(&self, id: String) -> CancellationToken {
        let token = CancellationToken::new();
        self.cancel_tokens.insert(id, token.clone());
        token
    }

    /// Returns whether a live stream with this id existed.
    pub fn cancel_stream(&self, id: &str) -> bool {
        if let Some((_, token)) = self.cancel_tokens.remove(id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    pub fn release(&self, id: &str) {
        self.cancel_tokens.remove(id);
    }

    pub fn active_streams(&self) -> usize {
        self.cancel_tokens.len()
    }
}

pub struct RelayRequest {
    pub stream_id: String,
    pub used_references: Vec<ReferenceSummary>,
    pub policy: SplitPolicy,
    pub fragments: FragmentStream,
    pub timeout: Duration,
}

/// Sender that lets at most one terminal event through.
#[derive(Clone)]
struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
    terminated: Arc<AtomicBool>,
    cancel_token: CancellationToken,
    deadline: Instant,
}

impl EventSink {
    fn new(tx: mpsc::Sender<StreamEvent>, cancel_token: CancellationToken, deadline: Instant) -> Self {
        Self {
            tx,
            terminated: Arc::new(AtomicBool::new(false)),
            cancel_token,
            deadline,
        }
    }

    /// False once the stream is closed: a terminal event went out, the
    /// receiver is gone, or the channel stayed full past cancellation or the
    /// deadline.
    async fn send(&self, event: StreamEvent) -> bool {
        if event.is_terminal() {
            if self.terminated.swap(true, Ordering::SeqCst) {
                return false;
            }
        } else if self.terminated.load(Ordering::SeqCst) {
            return false;
        }

        // Biased so an event that fits is delivered even after cancellation.
        tokio::select! {
            biased;
            sent = self.tx.send(event) => sent.is_ok(),
            _ = self.cancel_token.cancelled() => {
                debug!("Dropping event for cancelled stream with a full channel");
                false
            }
            _ = tokio::time::sleep_until(self.deadline) => {
                debug!("Dropping event past the deadline with a full channel");
                false
            }
        }
    }
}

pub fn spawn_relay(state: SseState, request: RelayRequest) -> CancellableSseStream {
    let (tx, rx) = mpsc::channel(RELAY_CHANNEL_CAPACITY);
    let stream_id = request.stream_id.clone();
    let cancel_token = state.register_stream(stream_id.clone());

    let deadline = Instant::now() + request.timeout;
    let sink = EventSink::new(tx, cancel_token.clone(), deadline);

    let task = tokio::spawn(pump(sink.clone(), request));

    tokio::spawn(async move {
        if let Err(e) = task.await {
            error!("Relay task for stream {stream_id} died: {e}");
            sink.send(StreamEvent::error(GENERATION_FAILED)).await;
        }
        state.release(&stream_id);
        debug!("Released stream {stream_id}");
    });

    CancellableSseStream {
        receiver: rx,
        cancel_token,
    }
}

async fn pump(sink: EventSink, request: RelayRequest) {
    let RelayRequest {
        stream_id,
        used_references,
        policy,
        mut fragments,
        timeout,
    } = request;

    info!("Starting relay for stream {stream_id} ({} references)", used_references.len());
    if !sink.send(StreamEvent::Metadata { used_references }).await {
        return;
    }

    let deadline = sink.deadline;
    let mut splitter = StreamSplitter::new(policy);

    loop {
        let next = tokio::select! {
            _ = sink.cancel_token.cancelled() => {
                info!("Relay for stream {stream_id} cancelled");
                sink.send(StreamEvent::error(GENERATION_CANCELLED)).await;
                return;
            }
            next = tokio::time::timeout_at(deadline, fragments.next()) => next,
        };

        match next {
            Ok(Some(Ok(fragment))) => {
                for event in splitter.push(&fragment) {
                    if !sink.send(event).await {
                        info!("Stopped relaying stream {stream_id}");
                        return;
                    }
                }
            }
            Ok(Some(Err(e))) => {
                error!("Upstream generation failed for stream {stream_id}: {e:#}");
                sink.send(StreamEvent::error(GENERATION_FAILED)).await;
                return;
            }
            Ok(None) => break,
            Err(_) => {
                warn!("Stream {stream_id} timed out after {}s", timeout.as_secs());
                sink.send(StreamEvent::error(GENERATION_TIMED_OUT)).await;
                return;
            }
        }
    }

    let finalized = splitter.finish();
    for event in finalized.trailing {
        if !sink.send(event).await {
            return;
        }
    }
    info!(
        "Stream {stream_id} complete: title {:?}, {} body chars",
        finalized.result.title,
        finalized.result.body.chars().count()
    );
    sink.send(StreamEvent::Complete).await;
}

pub async fn cancel_stream(
    State(state): State<SseState>,
    Query(params): Query<HashMap<String, String>>,
) -> &'static str {
    if let Some(stream_id) = params.get("stream_id") {
        info!("Cancelling stream: {stream_id}");
        if state.cancel_stream(stream_id) {
            "Stream cancelled"
        } else {
            "No active stream with that ID"
        }
    } else {
        "No stream ID provided"
    }
}
