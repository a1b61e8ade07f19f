//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together. This pattern provides:
//!
//! - **Clarity**: All dependency relationships are visible in one place
//! - **Testability**: Easy to swap implementations for testing
//! - **Maintainability**: Service creation logic is isolated from usage

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::coordinator::{self, CoordinatorHandle};
use crate::error::CoreResult;
use crate::events::EventEmitter;
use crate::normalizer::VibrationCoalescer;
use crate::runtime::TokioSpawner;
use crate::timebase::Timebase;

/// Container for a single bootstrapped session.
///
/// Holds everything a gateway adapter needs to feed samples in and observe
/// the session's lifecycle: the coordinator handle, the shared timebase (for
/// tick-index bookkeeping in adapters that need it), and the vibration
/// coalescer equipment frames are normalized through before reaching
/// [`CoordinatorHandle::ingest`].
pub struct BootstrappedSession {
    /// Handle used to feed samples/commands into the running session.
    pub coordinator: CoordinatorHandle,
    /// The session's tick clock, shared with the tick-forwarding task.
    pub timebase: Arc<Timebase>,
    /// Coalesces MQTT vibration edges into pulses ahead of `ingest`.
    pub vibration: Arc<VibrationCoalescer>,
    /// Cancellation token for graceful shutdown of the session's background
    /// tasks (tick producer, persistence timer, coordinator loop).
    pub cancel_token: CancellationToken,
}

impl BootstrappedSession {
    /// Ends the session, cancels its background tasks, and returns the final
    /// persisted document. Idempotent background tasks observe `cancel_token`
    /// and exit once `end_session` has already stopped the coordinator loop.
    pub async fn shutdown(&self) -> CoreResult<crate::persistence::SessionDocument> {
        log::info!("[Bootstrap] Ending session and beginning graceful shutdown...");
        let document = self.coordinator.end_session().await?;
        self.cancel_token.cancel();
        log::info!("[Bootstrap] Session shutdown complete");
        Ok(document)
    }
}

/// Bootstraps a session and wires its background tasks together.
///
/// This is the composition root where all session services are instantiated.
/// The wiring order matters - services are created in dependency order:
///
/// 1. Task spawner (from the current Tokio runtime)
/// 2. Cancellation token for graceful shutdown
/// 3. Vibration coalescer (stateless w.r.t. the session, owned by the caller)
/// 4. The session coordinator itself, which wires the timebase, roster,
///    timeline, participant table, governance engine, event bridge, and
///    periodic persistence timer internally (see [`crate::coordinator`])
///
/// # Errors
///
/// Returns an error if `config` fails validation, or if any configured zone
/// table or governance policy is malformed.
pub fn bootstrap_session(
    config: Config,
    external_emitter: Option<Arc<dyn EventEmitter>>,
) -> CoreResult<BootstrappedSession> {
    config.validate()?;

    let spawner = Arc::new(TokioSpawner::current());
    let cancel_token = CancellationToken::new();

    let (handle, timebase) =
        coordinator::start_session(config, spawner, cancel_token.clone(), external_emitter)?;

    Ok(BootstrappedSession {
        coordinator: handle,
        timebase,
        vibration: Arc::new(VibrationCoalescer::new()),
        cancel_token,
    })
}
