//! Story change request coordinator
//!
//! Tracks at most one pending "change story" request:
//!
//! ```text
//! NONE ──begin──▶ AWAITING(story) ──▶ RESOLVED | REJECTED ──▶ NONE
//! ```
//!
//! Every exit path takes the request out of the slot before replying, so a
//! request is resolved exactly once and any later signal for it finds an
//! empty slot (or a different request) and is ignored.

use tokio::sync::oneshot;

use crate::common::{Error, Result};

/// Identity of one physical device connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a successful story change completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderOutcome {
    /// The device rendered the story
    Rendered,
    /// The story was already current on the device
    Unchanged,
}

/// Handle returned to the caller that issued a request
#[derive(Debug)]
pub struct Ticket {
    pub seq: u64,
    pub reply: oneshot::Receiver<Result<RenderOutcome>>,
}

#[derive(Debug)]
struct PendingRequest {
    seq: u64,
    story_id: String,
    connection: ConnectionId,
    reply: oneshot::Sender<Result<RenderOutcome>>,
}

impl PendingRequest {
    fn resolve(self, result: Result<RenderOutcome>) {
        // The caller may have stopped waiting; nothing else to do then
        let _ = self.reply.send(result);
    }
}

/// Pending-request state machine
#[derive(Debug, Default)]
pub struct Coordinator {
    pending: Option<PendingRequest>,
    next_seq: u64,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Story id of the request currently awaiting completion
    pub fn pending_story(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.story_id.as_str())
    }

    /// Install a new request, superseding any outstanding one
    pub fn begin(&mut self, story_id: &str, connection: ConnectionId) -> Ticket {
        if let Some(old) = self.pending.take() {
            tracing::debug!(
                story_id = %old.story_id,
                superseded_by = %story_id,
                "Superseding pending story change"
            );
            let err = Error::Superseded {
                story_id: old.story_id.clone(),
                superseded_by: story_id.to_string(),
            };
            old.resolve(Err(err));
        }

        self.next_seq += 1;
        let seq = self.next_seq;
        let (tx, rx) = oneshot::channel();
        self.pending = Some(PendingRequest {
            seq,
            story_id: story_id.to_string(),
            connection,
            reply: tx,
        });
        tracing::trace!(seq, story_id, %connection, "Awaiting story change");

        Ticket { seq, reply: rx }
    }

    /// A completion signal arrived; resolves only a matching request
    pub fn complete(&mut self, story_id: &str, outcome: RenderOutcome) -> bool {
        match &self.pending {
            Some(pending) if pending.story_id == story_id => {}
            Some(pending) => {
                tracing::debug!(
                    received = story_id,
                    pending = %pending.story_id,
                    "Ignoring completion for a different story"
                );
                return false;
            }
            None => {
                tracing::debug!(received = story_id, "Ignoring completion with nothing pending");
                return false;
            }
        }

        match self.pending.take() {
            Some(pending) => {
                tracing::debug!(story_id, ?outcome, "Story change completed");
                pending.resolve(Ok(outcome));
                true
            }
            None => false,
        }
    }

    /// The device reported a render exception; fails whatever is pending
    pub fn fail_render(&mut self, reason: &str) -> bool {
        let Some(pending) = self.pending.take() else {
            tracing::debug!(reason, "Render exception with nothing pending");
            return false;
        };
        let err = Error::RenderFailed {
            story_id: pending.story_id.clone(),
            reason: reason.to_string(),
        };
        pending.resolve(Err(err));
        true
    }

    /// A connection closed or errored; fails the request sent on it
    pub fn connection_lost(&mut self, connection: ConnectionId, reason: &str) -> bool {
        if !matches!(&self.pending, Some(p) if p.connection == connection) {
            return false;
        }
        match self.pending.take() {
            Some(pending) => {
                let err = Error::connection_lost(&pending.story_id, reason);
                pending.resolve(Err(err));
                true
            }
            None => false,
        }
    }

    /// Drop the request with sequence `seq` if it is still pending
    ///
    /// Used by the issuing caller when it gives up (timeout, send failure);
    /// the caller reports its own error. Returns false if the request was
    /// already resolved by another path.
    pub fn abandon(&mut self, seq: u64) -> bool {
        if matches!(&self.pending, Some(p) if p.seq == seq) {
            self.pending = None;
            true
        } else {
            false
        }
    }

    /// Fail any pending request because the channel is shutting down
    pub fn close(&mut self) -> bool {
        match self.pending.take() {
            Some(pending) => {
                let err = Error::ChannelClosed {
                    story_id: pending.story_id.clone(),
                };
                pending.resolve(Err(err));
                true
            }
            None => false,
        }
    }
}
