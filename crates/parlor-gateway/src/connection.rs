use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use parlor_auth::Session;
use parlor_types::events::{ClientCommand, ServerEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Drive one gateway connection until the client goes away.
///
/// `session` is whatever the upgrade request's cookie resolved to. It is not
/// trusted beyond identifying the caller: every command re-checks room access.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    session: Option<Session>,
    client: String,
) {
    let (mut sender, mut receiver) = socket.split();
    let (conn_id, mut outbox) = dispatcher.register(client.clone()).await;

    let who = session
        .as_ref()
        .map(|s| s.email.clone())
        .unwrap_or_else(|| "anonymous".to_string());
    info!("{} ({}) connected to gateway as {}", who, client, conn_id);

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Outbox -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = outbox.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to encode event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Client -> dispatcher
    let recv_dispatcher = dispatcher.clone();
    let recv_who = who.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => {
                        debug!("{} ({}) -> {}", recv_who, conn_id, cmd.room());
                        recv_dispatcher
                            .handle_command(conn_id, session.as_ref(), cmd)
                            .await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            recv_who,
                            conn_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                        recv_dispatcher
                            .notify(conn_id, ServerEvent::status("Unrecognized command."))
                            .await;
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // The reader is awaited after abort so an in-flight command settles before
    // cleanup and a late join cannot leave a departed connection in a room.
    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
            let _ = recv_task.await;
        }
        _ = &mut recv_task => send_task.abort(),
    }

    let rooms = dispatcher.disconnect(conn_id).await;
    info!("{} ({}) disconnected from gateway, left {} rooms", who, conn_id, rooms);
}
