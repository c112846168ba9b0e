use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vyn_types::events::{ClientFrame, ServerFrame};
use vyn_types::models::UserId;

use crate::delivery::DeliveryRouter;
use crate::registry::{ConnectionHandle, Outbound};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a closed connection's writer gets to flush the close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Drive one authenticated WebSocket until it closes. The identity was
/// verified before the upgrade; this only registers, relays and cleans up.
pub async fn handle_connection(socket: WebSocket, router: DeliveryRouter, user_id: UserId) {
    let (sender, receiver) = socket.split();

    let (handle, outbound_rx) = ConnectionHandle::new();
    let conn_id = handle.conn_id();
    let closed = handle.close_signal();

    if let Some(previous) = router.registry().register(user_id, handle.clone()).await {
        previous.close();
    }
    info!(
        "User {} connected to gateway ({}), {} online",
        user_id,
        conn_id,
        router.registry().online_count().await
    );

    if handle.send(ServerFrame::Ready { user_id }).await.is_err() {
        router.registry().unregister(user_id, conn_id).await;
        return;
    }

    let pong_received = Arc::new(AtomicBool::new(true));

    let mut send_task = tokio::spawn(write_loop(sender, outbound_rx, closed.clone(), pong_received.clone()));
    let mut recv_task = tokio::spawn(read_loop(receiver, router.clone(), handle, user_id, pong_received));

    // Wait for either task to finish, including by panic, or for a close request
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
        _ = closed.cancelled() => {
            debug!("Closing connection {} for user {}", conn_id, user_id);
            recv_task.abort();
            if tokio::time::timeout(CLOSE_GRACE, &mut send_task).await.is_err() {
                send_task.abort();
            }
        }
    }

    router.registry().unregister(user_id, conn_id).await;
    info!(
        "User {} disconnected from gateway ({}), {} online",
        user_id,
        conn_id,
        router.registry().online_count().await
    );
}

/// Sole owner of the socket sink, so frames never interleave on the wire.
async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    closed: CancellationToken,
    pong_received: Arc<AtomicBool>,
) {
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut missed_heartbeats: u8 = 0;

    loop {
        tokio::select! {
            biased;

            _ = closed.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            out = outbound_rx.recv() => {
                let Some(Outbound { frame, written }) = out else { break };

                let text = match frame.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode frame: {}", e);
                        continue;
                    }
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
                if let Some(written) = written {
                    let _ = written.send(());
                }
            }
            _ = heartbeat.tick() => {
                if pong_received.swap(false, Ordering::Acquire) {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                        break;
                    }
                }
                if sender.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn read_loop(
    mut receiver: SplitStream<WebSocket>,
    router: DeliveryRouter,
    handle: ConnectionHandle,
    user_id: UserId,
    pong_received: Arc<AtomicBool>,
) {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match ClientFrame::decode(&text) {
                Ok(frame) => {
                    debug!("User {} frame: {:?}", user_id, frame);
                    if let Some(reply) = router.handle_frame(user_id, frame).await {
                        if handle.send(reply).await.is_err() {
                            break;
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        "User {} bad frame: {} -- raw: {}",
                        user_id,
                        e,
                        text.chars().take(200).collect::<String>()
                    );
                }
            },
            Message::Binary(data) => {
                warn!("User {} sent unsupported binary frame ({} bytes)", user_id, data.len());
            }
            Message::Pong(_) => {
                pong_received.store(true, Ordering::Release);
            }
            Message::Close(_) => break,
            Message::Ping(_) => {}
        }
    }
}
