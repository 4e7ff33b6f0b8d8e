// Per-connection session channel: bounded outbound queue, write pump with
// keep-alive pings, and a read pump with a refreshed read deadline.

use std::time::Duration;

use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use liveroom_common::{protocol::live::LiveMessage, types::RoomRole};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::protocol as ws_protocol;

pub(crate) const PING_INTERVAL_MS: u64 = 54_000;
pub(crate) const READ_DEADLINE_MS: u64 = 60_000;
pub(crate) const WRITE_DEADLINE_MS: u64 = 10_000;
pub(crate) const MAX_INBOUND_FRAME_BYTES: usize = 2_048;
pub(crate) const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Why a frame could not be queued for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// The peer is not draining its queue fast enough.
    QueueFull,
    /// The write pump has already stopped.
    Closed,
}

/// The room-facing half of a session. Cloning shares the same queue.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    pub role: RoomRole,
    outbound: mpsc::Sender<Utf8Bytes>,
    closed: CancellationToken,
}

impl SessionHandle {
    pub fn new(
        user_id: Uuid,
        username: String,
        role: RoomRole,
        capacity: usize,
        parent: &CancellationToken,
    ) -> (Self, mpsc::Receiver<Utf8Bytes>) {
        let (outbound, receiver) = mpsc::channel(capacity.max(1));
        let handle = Self {
            session_id: Uuid::new_v4(),
            user_id,
            username,
            role,
            outbound,
            closed: parent.child_token(),
        };
        (handle, receiver)
    }

    /// Non-blocking enqueue.
    pub fn try_deliver(&self, frame: Utf8Bytes) -> Result<(), DeliveryFailure> {
        if self.closed.is_cancelled() {
            return Err(DeliveryFailure::Closed);
        }
        self.outbound.try_send(frame).map_err(|error| match error {
            TrySendError::Full(_) => DeliveryFailure::QueueFull,
            TrySendError::Closed(_) => DeliveryFailure::Closed,
        })
    }

    pub fn try_deliver_message(&self, message: &LiveMessage) -> Result<(), DeliveryFailure> {
        match ws_protocol::encode_frame(message) {
            Ok(frame) => self.try_deliver(frame),
            Err(_) => Err(DeliveryFailure::Closed),
        }
    }

    /// Closes the outbound side; the write pump exits and the socket closes.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

pub(crate) fn split_socket(
    socket: WebSocket,
) -> (SplitSink<WebSocket, Message>, SplitStream<WebSocket>) {
    socket.split()
}

/// Drains the outbound queue into the socket and pings the peer. Returns
/// when the session is closed, a write fails, or a write exceeds its deadline.
pub(crate) async fn run_write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Utf8Bytes>,
    closed: CancellationToken,
    session_id: Uuid,
) {
    let write_deadline = Duration::from_millis(WRITE_DEADLINE_MS);
    let mut ping_interval = tokio::time::interval(Duration::from_millis(PING_INTERVAL_MS));
    ping_interval.reset(); // skip immediate first tick

    loop {
        let frame = tokio::select! {
            () = closed.cancelled() => {
                // Frames queued before close (e.g. room_closed) still go out.
                let _ = tokio::time::timeout(write_deadline, async {
                    while let Ok(frame) = outbound.try_recv() {
                        if sink.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                })
                .await;
                break;
            }
            _ = ping_interval.tick() => Message::Ping(Vec::new().into()),
            maybe_frame = outbound.recv() => match maybe_frame {
                Some(frame) => Message::Text(frame),
                None => break,
            },
        };

        match tokio::time::timeout(write_deadline, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                debug!(session_id = %session_id, error = %error, "websocket write failed");
                break;
            }
            Err(_) => {
                debug!(session_id = %session_id, "websocket write deadline exceeded");
                break;
            }
        }
    }

    closed.cancel();
    outbound.close();
    let _ = tokio::time::timeout(write_deadline, sink.send(Message::Close(None))).await;
}

/// Outcome of waiting for the next inbound frame.
pub(crate) enum ReadEvent {
    Text(Utf8Bytes),
    /// Pong or other control frame; only refreshes the deadline.
    KeepAlive,
    Closed,
    /// Read deadline passed without any frame from the peer.
    TimedOut,
    /// I/O error or unsupported frame type. Frames over
    /// `MAX_INBOUND_FRAME_BYTES` arrive here as the upgrade's capacity error.
    Violation(String),
}

pub(crate) async fn read_next(stream: &mut SplitStream<WebSocket>) -> ReadEvent {
    let read_deadline = Duration::from_millis(READ_DEADLINE_MS);
    match tokio::time::timeout(read_deadline, stream.next()).await {
        Err(_) => ReadEvent::TimedOut,
        Ok(None) => ReadEvent::Closed,
        Ok(Some(Err(error))) => ReadEvent::Violation(error.to_string()),
        Ok(Some(Ok(message))) => match message {
            Message::Text(text) => ReadEvent::Text(text),
            Message::Ping(_) | Message::Pong(_) => ReadEvent::KeepAlive,
            Message::Close(_) => ReadEvent::Closed,
            Message::Binary(_) => ReadEvent::Violation("binary frames are not supported".into()),
        },
    }
}
