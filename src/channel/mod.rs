//! Story coordination channel
//!
//! The orchestrator-facing API. A [`StoryChannel`] owns the WebSocket
//! listener the app under test connects to, tracks the single current device
//! connection, and turns "switch to story X" into a bounded wait:
//!
//! 1. [`StoryChannel::prepare`] binds the listener (once per run)
//! 2. [`StoryChannel::establish_route`] routes the device port to the host
//! 3. [`StoryChannel::request_story_change`] sends the command and waits
//! 4. [`StoryChannel::teardown`] fails pending work and releases everything

mod coordinator;
mod guard;
mod registry;
mod server;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::time::Instant;

use crate::common::config::{ChannelConfig, Config};
use crate::common::{Error, Result};
use crate::device::{self, Device};
use crate::protocol;

pub use coordinator::{ConnectionId, Coordinator, RenderOutcome, Ticket};
pub use guard::{FailurePolicy, LifecycleGuard};

use registry::{PeerHandle, Registry};

/// State shared between the API handle and the connection tasks
pub(crate) struct Shared {
    config: ChannelConfig,
    device: Arc<dyn Device>,
    registry: Mutex<Registry>,
    listener_ready: LifecycleGuard<SocketAddr>,
    route_ready: LifecycleGuard<()>,
}

impl Shared {
    pub(crate) fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle on the coordination channel for one test run
///
/// Cloning is cheap; all clones drive the same listener and device.
#[derive(Clone)]
pub struct StoryChannel {
    shared: Arc<Shared>,
}

impl StoryChannel {
    pub fn new(config: ChannelConfig, device: Arc<dyn Device>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                device,
                registry: Mutex::new(Registry::default()),
                // A second bind on the same address fails the same way
                listener_ready: LifecycleGuard::new("listener", FailurePolicy::CacheForever),
                route_ready: LifecycleGuard::new("route", FailurePolicy::RetryOnFailure),
            }),
        }
    }

    /// Build a channel and its device collaborator from loaded configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let device = device::from_config(&config.device)?;
        Ok(Self::new(config.channel.clone(), device))
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.shared.config
    }

    /// Ensure the listener is bound; returns the bound address
    ///
    /// Concurrent and repeated calls share one bind. A bind failure is cached
    /// until [`teardown`](Self::teardown).
    pub async fn prepare(&self) -> Result<SocketAddr> {
        let shared = Arc::downgrade(&self.shared);
        let host = self.shared.config.host.clone();
        let port = self.shared.config.port;
        self.shared
            .listener_ready
            .ensure(|| {
                let epoch = self.shared.registry().epoch();
                server::bind(shared, host, port, epoch)
            })
            .await
    }

    /// Ensure the device can reach the listener port
    ///
    /// One attempt runs at most the route timeout. A failed or timed-out
    /// attempt is not cached: the next call retries.
    pub async fn establish_route(&self) -> Result<()> {
        let device = self.shared.device.clone();
        let port = self
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or(self.shared.config.port);
        let route_timeout = self.shared.config.route_timeout();
        let route_timeout_ms = self.shared.config.route_timeout_ms;
        self.shared
            .route_ready
            .ensure(|| async move {
                tracing::debug!(port, device = device.name(), "Establishing device route");
                match tokio::time::timeout(route_timeout, device.reverse_tcp_port(port)).await {
                    Ok(result) => result.map_err(|e| Error::route_failed(port, e)),
                    Err(_) => Err(Error::route_failed(
                        port,
                        format!("no answer from {} after {} ms", device.name(), route_timeout_ms),
                    )),
                }
            })
            .await
    }

    /// Switch the app to `story_id` and wait until it has rendered
    ///
    /// Waits at most the connect timeout for a device connection, then at
    /// most the change timeout for the completion signal.
    #[tracing::instrument(skip_all, fields(story_id = %story_id))]
    pub async fn request_story_change(&self, story_id: &str) -> Result<RenderOutcome> {
        self.prepare().await?;
        let frame = protocol::encode_set_current_story(story_id)?;

        // The request is pending before the command goes out, so a fast
        // reply always finds it
        let (peer, ticket) = self.begin_when_connected(story_id).await?;
        let seq = ticket.seq;
        let mut reply = ticket.reply;
        tracing::debug!(connection = %peer.id, seq, "Sending story change");

        let change_timeout = self.shared.config.change_timeout();
        let exchange = async {
            if let Err(reason) = peer.send(frame).await {
                let abandoned = self.shared.registry().coordinator.abandon(seq);
                if abandoned {
                    return Err(Error::SendFailed {
                        story_id: story_id.to_string(),
                        reason,
                    });
                }
                // Already resolved by another path; report that outcome
            }
            match (&mut reply).await {
                Ok(result) => result,
                Err(_) => Err(Error::ChannelClosed {
                    story_id: story_id.to_string(),
                }),
            }
        };

        let result = match tokio::time::timeout(change_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                let timed_out = Error::ChangeTimeout {
                    story_id: story_id.to_string(),
                    timeout_ms: self.shared.config.change_timeout_ms,
                };
                let abandoned = self.shared.registry().coordinator.abandon(seq);
                if abandoned {
                    Err(timed_out)
                } else {
                    reply.try_recv().unwrap_or(Err(timed_out))
                }
            }
        };

        match &result {
            Ok(outcome) => tracing::info!(?outcome, "Story ready"),
            Err(e) => tracing::warn!(error = %e, "Story change failed"),
        }
        result
    }

    /// Install the request on an open connection, reconnecting if needed
    async fn begin_when_connected(&self, story_id: &str) -> Result<(Arc<PeerHandle>, Ticket)> {
        if let Some(found) = self.try_begin(story_id) {
            return Ok(found);
        }

        let connect_timeout = self.shared.config.connect_timeout();
        let deadline = Instant::now() + connect_timeout;
        tracing::info!(
            timeout_ms = self.shared.config.connect_timeout_ms,
            "No open device connection; relaunching the app"
        );

        let reconnect = async {
            if let Err(e) = self.establish_route().await {
                tracing::warn!(error = %e, "Route setup failed; waiting for a connection anyway");
            }
            if let Err(e) = self.shared.device.relaunch_app().await {
                tracing::warn!(error = %e, "App relaunch failed; waiting for a connection anyway");
            }
        };
        if tokio::time::timeout_at(deadline, reconnect).await.is_err() {
            tracing::warn!(
                timeout_ms = self.shared.config.connect_timeout_ms,
                "Route setup and app relaunch ran past the connect deadline"
            );
        }

        let poll_interval = self.shared.config.poll_interval();
        loop {
            if let Some(found) = self.try_begin(story_id) {
                return Ok(found);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::NeverConnected {
                    story_id: story_id.to_string(),
                    timeout_ms: self.shared.config.connect_timeout_ms,
                });
            }
            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }
    }

    fn try_begin(&self, story_id: &str) -> Option<(Arc<PeerHandle>, Ticket)> {
        let mut registry = self.shared.registry();
        let peer = registry.open_peer()?;
        let ticket = registry.coordinator.begin(story_id, peer.id);
        Some((peer, ticket))
    }

    /// Fail pending work, close the device connection and the listener
    ///
    /// Safe to call without a prior [`prepare`](Self::prepare). Afterwards
    /// `prepare` starts from scratch.
    pub async fn teardown(&self) {
        let (peer, listener) = {
            let mut registry = self.shared.registry();
            registry.next_epoch();
            if registry.coordinator.close() {
                tracing::warn!("Failed pending story change: channel closed");
            }
            (registry.take_peer(), registry.take_listener())
        };

        if let Some(peer) = peer {
            tracing::debug!(connection = %peer.id, remote = %peer.remote, "Closing device connection");
            peer.close();
        }
        if let Some(listener) = listener {
            let addr = listener.addr;
            listener.close().await;
            tracing::info!(%addr, "Listener closed");
        }

        self.shared.listener_ready.reset();
        self.shared.route_ready.reset();
    }

    /// Address the listener is bound to, once prepared
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.registry().listener_addr()
    }

    /// Whether a device connection is currently open
    pub fn is_connected(&self) -> bool {
        self.shared.registry().open_peer().is_some()
    }

    /// Identifier the current device reported in its handshake
    pub fn peer_identifier(&self) -> Option<String> {
        self.shared.registry().identifier().map(str::to_string)
    }

    /// Story the pending request is waiting for
    pub fn pending_story(&self) -> Option<String> {
        self.shared
            .registry()
            .coordinator
            .pending_story()
            .map(str::to_string)
    }
}

impl std::fmt::Debug for StoryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoryChannel")
            .field("config", &self.shared.config)
            .field("device", &self.shared.device.name())
            .field("local_addr", &self.local_addr())
            .finish()
    }
}
