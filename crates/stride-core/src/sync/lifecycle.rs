//! Opportunistic drain triggers from host lifecycle signals.
//!
//! The host application forwards its foreground/visibility/network signals
//! into a channel; the driver turns each into a `drain()` call. Overlapping
//! triggers are harmless thanks to the engine's drain guard.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::remote::SessionRemote;
use crate::sync::engine::SyncEngine;

/// Host signals that should kick a sync attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Application returned to the foreground
    AppResumed,
    /// The app's view became visible again
    BecameVisible,
    /// Connectivity came back
    NetworkReconnected,
    /// Connectivity dropped; flips the engine offline, no drain
    NetworkLost,
}

/// Channel pair for feeding lifecycle events to [`run`]
#[must_use]
pub fn channel() -> (
    mpsc::UnboundedSender<LifecycleEvent>,
    mpsc::UnboundedReceiver<LifecycleEvent>,
) {
    mpsc::unbounded_channel()
}

/// Drive the engine from lifecycle events until the sender side closes.
///
/// Drains once unconditionally at startup, then once per received event.
/// Spawn this on the runtime alongside the host's event forwarding.
pub async fn run<R: SessionRemote>(
    engine: Arc<SyncEngine<R>>,
    mut events: mpsc::UnboundedReceiver<LifecycleEvent>,
) {
    // Catch up on anything queued while the process was down
    if let Err(error) = engine.drain().await {
        tracing::warn!(%error, "Startup drain failed");
    }

    while let Some(event) = events.recv().await {
        tracing::debug!(?event, "Lifecycle trigger");

        match event {
            LifecycleEvent::NetworkLost => {
                engine.set_online(false);
                continue;
            }
            LifecycleEvent::NetworkReconnected => engine.set_online(true),
            LifecycleEvent::AppResumed | LifecycleEvent::BecameVisible => {}
        }

        if let Err(error) = engine.drain().await {
            tracing::warn!(?event, %error, "Lifecycle-triggered drain failed");
        }
    }
}
