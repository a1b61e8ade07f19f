//! Fitness Session Core - shared library for the fitness session system.
//!
//! This crate ingests biometric and equipment telemetry for a single
//! exercise session, classifies heart rate into zones, tracks participant
//! state, evaluates governance policies, and persists a versioned session
//! document. It is designed to be driven by a gateway adapter (a standalone
//! server binary decoding ANT+ and MQTT wire frames) rather than owning any
//! transport itself.
//!
//! # Architecture
//!
//! The crate is organized into several modules, following the session's
//! component breakdown:
//!
//! - [`runtime`]: Task spawning abstraction for async runtime independence
//! - [`events`]: Event system for lifecycle/dropout/governance notifications
//! - [`config`]: Session configuration, loaded from YAML with env overrides
//! - [`model`]: Core domain types (samples, participants, sessions, zones)
//! - [`normalizer`]: Wire-frame decoding and vibration pulse coalescing
//! - [`roster`]: Device-to-user assignment and liveness tracking
//! - [`zones`]: Per-user heart-rate zone classification
//! - [`timebase`]: The fixed-interval tick clock
//! - [`timeline`]: Per-subject time series storage and RLE encoding
//! - [`participant`]: Participant presence/idle/removal state machine
//! - [`aggregator`]: Per-tick coin and zone-time accumulation
//! - [`governance`]: Policy evaluation (pause intent, challenges)
//! - [`eventlog`]: Deduplicated discrete session event log
//! - [`persistence`]: Versioned session document read/write
//! - [`coordinator`]: The single-writer session task and its command queue
//! - [`bootstrap`]: Composition root wiring a session together
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! The crate defines traits to decouple core logic from platform-specific
//! implementations:
//!
//! - [`TaskSpawner`](runtime::TaskSpawner): Spawning background tasks
//! - [`EventEmitter`](events::EventEmitter): Emitting domain events
//!
//! Each trait has a default implementation suitable for the standalone
//! server binary.

// Allow missing docs for now during migration - will be cleaned up later
#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod aggregator;
pub mod bootstrap;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod error;
pub mod eventlog;
pub mod events;
pub mod governance;
pub mod model;
pub mod normalizer;
pub mod participant;
pub mod persistence;
pub mod roster;
pub mod runtime;
pub mod timebase;
pub mod timeline;
pub mod zones;

// Re-export commonly used types at the crate root
pub use bootstrap::{bootstrap_session, BootstrappedSession};
pub use config::Config;
pub use coordinator::{CoordinatorHandle, Snapshot};
pub use error::{CoreError, CoreResult, ErrorCode};
pub use events::{BroadcastEvent, BroadcastEventBridge, EventEmitter, GovernanceEvent, LifecycleEvent};
pub use model::{Instant, Participant, Sample, SampleKind, Session, SessionStatus};
pub use runtime::{TaskSpawner, TokioSpawner};
