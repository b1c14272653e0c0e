//! Listener and per-connection I/O
//!
//! Each accepted connection gets one task that owns the WebSocket: it writes
//! queued frames, reads inbound frames in arrival order and reports the close
//! reason when the socket ends. Tasks hold a `Weak` reference to the channel
//! so a dropped channel does not stay alive through its own accept loop.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

use crate::common::error::display_addr;
use crate::common::{Error, Result};
use crate::protocol::{self, Inbound};

use super::coordinator::{ConnectionId, RenderOutcome};
use super::registry::{ListenerHandle, PeerHandle, PeerTaskEnds};
use super::Shared;

/// Bind the listener and start accepting device connections
///
/// `epoch` is the registry epoch the bind was started in. If a teardown ran
/// while binding, the new socket is closed instead of registered.
pub(crate) async fn bind(
    shared: Weak<Shared>,
    host: String,
    port: u16,
    epoch: u64,
) -> Result<SocketAddr> {
    let display = display_addr(&host, port);
    let listener = TcpListener::bind((host.as_str(), port))
        .await
        .map_err(|e| Error::listener_bind(&display, e))?;
    let addr = listener.local_addr()?;

    let strong = shared
        .upgrade()
        .ok_or_else(|| Error::Internal("channel dropped while binding".to_string()))?;

    let previous = {
        let mut registry = strong.registry();
        if registry.epoch() != epoch {
            drop(registry);
            drop(listener);
            tracing::debug!(%addr, "Channel torn down while binding; released listener");
            return Err(Error::SetupCancelled);
        }
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(accept_loop(listener, shared, shutdown_rx));
        registry.set_listener(ListenerHandle::new(addr, shutdown_tx, task))
    };
    if let Some(previous) = previous {
        previous.close().await;
    }

    tracing::info!(%addr, "Listening for device connections");
    Ok(addr)
}

async fn accept_loop(
    listener: TcpListener,
    shared: Weak<Shared>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::debug!("Listener shutting down");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    if shared.strong_count() == 0 {
                        break;
                    }
                    tracing::debug!(%remote, "Accepted TCP connection");
                    tokio::spawn(serve_connection(stream, remote, shared.clone()));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Accept error");
                }
            }
        }
    }
}

async fn serve_connection(stream: TcpStream, remote: SocketAddr, shared: Weak<Shared>) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::debug!(%remote, error = %e, "WebSocket handshake failed");
            return;
        }
    };

    let Some(strong) = shared.upgrade() else {
        return;
    };
    let (handle, ends, replaced) = {
        let mut registry = strong.registry();
        let id = registry.next_connection_id();
        let (handle, ends) = PeerHandle::new(id, remote);
        let handle = Arc::new(handle);
        let replaced = registry.install_peer(handle.clone());
        (handle, ends, replaced)
    };
    drop(strong);

    if let Some(old) = replaced {
        tracing::info!(old = %old.id, new = %handle.id, "Replacing previous device connection");
        old.close();
    }
    tracing::info!(connection = %handle.id, %remote, "Device connected");

    let reason = run_connection(ws, &handle, ends, &shared).await;
    handle.mark_closed();

    if let Some(strong) = shared.upgrade() {
        connection_closed(&strong, handle.id, &reason);
    }
}

async fn run_connection(
    ws: WebSocketStream<TcpStream>,
    handle: &PeerHandle,
    ends: PeerTaskEnds,
    shared: &Weak<Shared>,
) -> String {
    let (mut sink, mut stream) = ws.split();
    let PeerTaskEnds {
        mut outbound,
        mut close,
    } = ends;

    loop {
        tokio::select! {
            _ = &mut close => {
                let _ = sink.close().await;
                return "closed by the bridge".to_string();
            }
            Some(out) = outbound.recv() => {
                tracing::trace!(connection = %handle.id, frame = %out.frame, "Sending frame");
                let result = sink
                    .send(WsMessage::Text(out.frame.into()))
                    .await
                    .map_err(|e| e.to_string());
                let failure = result.as_ref().err().cloned();
                let _ = out.ack.send(result);
                if let Some(reason) = failure {
                    return format!("send failed: {}", reason);
                }
            }
            frame = stream.next() => match frame {
                None => return "connection closed".to_string(),
                Some(Err(e)) => return format!("connection error: {}", e),
                Some(Ok(WsMessage::Text(text))) => dispatch(shared, handle.id, &text),
                Some(Ok(WsMessage::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => dispatch(shared, handle.id, text),
                    Err(_) => tracing::debug!(connection = %handle.id, "Dropping non-UTF-8 binary frame"),
                },
                Some(Ok(WsMessage::Close(_))) => return "closed by the device".to_string(),
                // Pings are answered by tungstenite
                Some(Ok(_)) => {}
            }
        }
    }
}

fn dispatch(shared: &Weak<Shared>, connection: ConnectionId, text: &str) {
    if let Some(strong) = shared.upgrade() {
        handle_frame(&strong, connection, text);
    }
}

/// Apply one inbound frame to the registry
pub(crate) fn handle_frame(shared: &Shared, connection: ConnectionId, text: &str) {
    let Some(inbound) = protocol::decode(text) else {
        return;
    };

    let mut registry = shared.registry();
    if !registry.is_current(connection) {
        tracing::debug!(%connection, ?inbound, "Ignoring frame from a replaced connection");
        return;
    }

    match inbound {
        Inbound::ChannelCreated { from } => {
            tracing::info!(%connection, peer = from.as_deref().unwrap_or("<unnamed>"), "Device channel created");
            registry.set_identifier(connection, from);
        }
        Inbound::StoryRendered { story_id } => {
            registry
                .coordinator
                .complete(&story_id, RenderOutcome::Rendered);
        }
        Inbound::StoryUnchanged { story_id } => {
            registry
                .coordinator
                .complete(&story_id, RenderOutcome::Unchanged);
        }
        Inbound::StoryThrewException { reason } => {
            tracing::warn!(%connection, %reason, "Device reported a render exception");
            registry.coordinator.fail_render(&reason);
        }
        Inbound::Ignored { kind } => {
            tracing::trace!(%connection, %kind, "Ignoring message");
        }
    }
}

/// Forget a finished connection and fail the request that was sent on it
pub(crate) fn connection_closed(shared: &Shared, connection: ConnectionId, reason: &str) {
    let mut registry = shared.registry();
    let was_current = registry.remove_peer(connection);
    let failed = registry.coordinator.connection_lost(connection, reason);
    drop(registry);

    if was_current {
        tracing::info!(%connection, reason, "Device disconnected");
    } else {
        tracing::debug!(%connection, reason, "Replaced connection finished");
    }
    if failed {
        tracing::warn!(%connection, reason, "Pending story change lost its connection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::StoryChannel;
    use crate::common::config::ChannelConfig;
    use crate::device::HostDevice;

    fn channel() -> StoryChannel {
        let config = ChannelConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..ChannelConfig::default()
        };
        StoryChannel::new(config, Arc::new(HostDevice))
    }

    #[test]
    fn test_replaced_connection_cannot_touch_pending_request() {
        let channel = channel();
        let shared = &channel.shared;

        let (old, new, mut ticket) = {
            let mut registry = shared.registry();
            let old_id = registry.next_connection_id();
            let new_id = registry.next_connection_id();
            let (old, _) = PeerHandle::new(old_id, "127.0.0.1:50000".parse().unwrap());
            let (new, _) = PeerHandle::new(new_id, "127.0.0.1:50001".parse().unwrap());
            registry.install_peer(Arc::new(old));
            registry.install_peer(Arc::new(new));
            registry.set_identifier(new_id, Some("device-2".to_string()));
            let ticket = registry.coordinator.begin("x", new_id);
            (old_id, new_id, ticket)
        };

        handle_frame(shared, old, r#"{"type":"storyRendered","args":[{"storyId":"x"}]}"#);
        handle_frame(shared, old, r#"{"type":"storyThrewException","args":["boom"]}"#);
        handle_frame(shared, old, r#"{"type":"channelCreated","from":"device-1","args":[]}"#);

        assert_eq!(channel.pending_story().as_deref(), Some("x"));
        assert_eq!(channel.peer_identifier().as_deref(), Some("device-2"));
        assert!(ticket.reply.try_recv().is_err());

        // A closing replaced connection does not fail it either
        connection_closed(shared, old, "closed by the bridge");
        assert_eq!(channel.pending_story().as_deref(), Some("x"));

        handle_frame(shared, new, r#"{"type":"storyRendered","args":["x"]}"#);
        assert_eq!(
            ticket.reply.try_recv().unwrap().unwrap(),
            RenderOutcome::Rendered
        );
    }

    #[tokio::test]
    async fn test_bind_after_teardown_releases_listener() {
        let channel = channel();
        let epoch = channel.shared.registry().epoch();
        channel.teardown().await;

        let err = bind(Arc::downgrade(&channel.shared), "127.0.0.1".to_string(), 0, epoch)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SetupCancelled));
        assert_eq!(channel.local_addr(), None);

        // A bind in the current epoch registers normally
        let epoch = channel.shared.registry().epoch();
        let addr = bind(Arc::downgrade(&channel.shared), "127.0.0.1".to_string(), 0, epoch)
            .await
            .unwrap();
        assert_eq!(channel.local_addr(), Some(addr));
        channel.teardown().await;
    }
}
