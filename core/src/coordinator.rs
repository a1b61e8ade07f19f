//! Session Coordinator (§4.J): the single-writer task that owns all session
//! state.
//!
//! Mutations reach it through a bounded command queue — `ingest`, `tick`,
//! lifecycle commands, event recording — exactly the discipline in §5
//! ("Concurrency & Resource Model"). The Timebase's tick stream and the
//! periodic persistence timer are independent producer tasks that post
//! commands back onto the same queue rather than touching session state
//! directly, the same composition-root discipline `bootstrap.rs` uses for
//! wiring independent producers into a single owning task.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::aggregator::{apply_tick, SessionTotals};
use crate::config::Config;
use crate::constants::{COMMAND_QUEUE_CAPACITY, EVENT_CHANNEL_CAPACITY, SESSION_DOCUMENT_VERSION};
use crate::error::{CoreError, CoreResult};
use crate::events::{BroadcastEventBridge, EventEmitter, GovernanceEvent, LifecycleEvent};
use crate::model::{
    ChallengePhase, DeviceKind, DropoutEvent, GovernanceState, Instant, Participant,
    ParticipantStatus, Sample, SampleKind, Session, SessionEvent, SessionStatus, SeriesValue,
    UserRole,
};
use crate::participant::{ParticipantTable, SampleOutcome, TickOutcome};
use crate::persistence::{
    self, AudioEventDoc, EventsDoc, ParticipantDoc, ParticipantSeriesDoc, SessionDoc,
    SessionDocument, TimelineDoc, TotalsDoc, VideoEventDoc,
};
use crate::roster::DeviceRoster;
use crate::runtime::TaskSpawner;
use crate::timebase::{tick_stream, Tick, TickEvent, Timebase};
use crate::timeline::{encode_rle, CombineRule, TimelineStore};
use crate::eventlog::EventLog;
use crate::governance::{GovernanceEngine, ParticipantZoneRank};
use crate::zones::ZoneClassifier;

/// One participant's state as of the latest broadcast tick.
#[derive(Debug, Clone, Serialize)]
pub struct ParticipantSnapshot {
    pub id: String,
    pub status: ParticipantStatus,
    pub hr: Option<f64>,
    pub zone: Option<String>,
    pub coins: u64,
    pub zone_time_seconds: HashMap<String, u64>,
}

/// One device's liveness as of the latest broadcast tick.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSnapshot {
    pub device_id: String,
    pub kind: DeviceKind,
    pub active: bool,
    pub owner_user_id: Option<String>,
}

/// Delivered to every subscriber after each tick (§6 "Subscriber interface").
/// Coalesced via `tokio::sync::watch`: a slow subscriber only ever sees the
/// latest snapshot, never a backlog.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub session_id: String,
    pub tick: u64,
    pub instant: Instant,
    pub participants: Vec<ParticipantSnapshot>,
    pub totals: SessionTotals,
    pub devices: Vec<DeviceSnapshot>,
    pub governance: GovernanceState,
}

impl Snapshot {
    fn empty(session_id: &str, instant: Instant) -> Self {
        Self {
            session_id: session_id.to_string(),
            tick: 0,
            instant,
            participants: Vec::new(),
            totals: SessionTotals::default(),
            devices: Vec::new(),
            governance: GovernanceState::default(),
        }
    }
}

enum Command {
    Ingest(Sample, oneshot::Sender<CoreResult<()>>),
    Tick(Tick),
    Degraded { resumed_at_index: u64 },
    Pause(oneshot::Sender<CoreResult<()>>),
    Resume(oneshot::Sender<CoreResult<()>>),
    RecordEvent(SessionEvent, oneshot::Sender<CoreResult<()>>),
    PersistNow,
    EndSession(oneshot::Sender<SessionDocument>),
}

/// A cheaply-cloneable handle to a running session's Coordinator task.
#[derive(Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<Snapshot>,
}

impl CoordinatorHandle {
    /// Routes a decoded sample into the session. Thread-safe: any number of
    /// producers may call this concurrently, the command queue serializes
    /// them onto the single-writer task.
    pub async fn ingest(&self, sample: Sample) -> CoreResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::Ingest(sample, reply_tx)).await?;
        Self::await_reply(reply_rx).await
    }

    /// Records a discrete session event (audio/video playback, a screenshot).
    pub async fn record_event(&self, event: SessionEvent) -> CoreResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::RecordEvent(event, reply_tx)).await?;
        Self::await_reply(reply_rx).await
    }

    /// Stops tick emission and persistence, without resetting state. Fails
    /// with [`CoreError::InvalidSessionState`] unless the session is RUNNING.
    pub async fn pause(&self) -> CoreResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::Pause(reply_tx)).await?;
        Self::await_reply(reply_rx).await
    }

    /// Resumes a PAUSED session. Fails with [`CoreError::InvalidSessionState`]
    /// unless the session is PAUSED.
    pub async fn resume(&self) -> CoreResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::Resume(reply_tx)).await?;
        Self::await_reply(reply_rx).await
    }

    /// Flushes a final tick, persists synchronously, and returns the
    /// resulting session document. The Coordinator task exits after this
    /// call returns.
    pub async fn end_session(&self) -> CoreResult<SessionDocument> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::EndSession(reply_tx)).await?;
        reply_rx
            .await
            .map_err(|_| CoreError::Internal("coordinator task stopped before replying".to_string()))
    }

    /// Subscribes to coalesced per-tick snapshots.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    async fn send(&self, command: Command) -> CoreResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| CoreError::Internal("coordinator task has stopped".to_string()))
    }

    async fn await_reply(reply_rx: oneshot::Receiver<CoreResult<()>>) -> CoreResult<()> {
        reply_rx
            .await
            .map_err(|_| CoreError::Internal("coordinator task stopped before replying".to_string()))?
    }
}

/// All state mutated exclusively by the Coordinator's own task.
struct SessionRuntime {
    session: Session,
    status: SessionStatus,
    config: Config,
    roster: DeviceRoster,
    classifier: ZoneClassifier,
    timebase: Arc<Timebase>,
    timeline: TimelineStore,
    participants_rt: ParticipantTable,
    participants: HashMap<String, Participant>,
    governance_engine: GovernanceEngine,
    governance_state: GovernanceState,
    totals: SessionTotals,
    event_log: EventLog,
    bridge: BroadcastEventBridge,
    snapshot_tx: watch::Sender<Snapshot>,
    spawner: Arc<dyn TaskSpawner>,
    primary_user_ids: HashSet<String>,
    secondary_user_ids: HashSet<String>,
    display_names: HashMap<String, String>,
    last_pause_intent: bool,
    last_challenge_phase: Option<ChallengePhase>,
}

/// Starts a new session: validates `config`, seeds the Device Roster from
/// `users.primary`/`users.secondary`/`equipment`, and spawns the Coordinator
/// task plus its two independent producers (the Timebase tick stream and the
/// periodic persistence timer). Returns a handle and the shared [`Timebase`]
/// (useful for `tick_of`/`instant_of` conversions at the call site, e.g. a
/// gateway adapter stamping incoming frames).
pub fn start_session(
    config: Config,
    spawner: Arc<dyn TaskSpawner>,
    cancel: CancellationToken,
    external_emitter: Option<Arc<dyn EventEmitter>>,
) -> CoreResult<(CoordinatorHandle, Arc<Timebase>)> {
    config.validate()?;
    let classifier = ZoneClassifier::new(&config.zones)?;

    let start_instant = Utc::now();
    let session = Session {
        id: Session::canonical_id(start_instant),
        date: start_instant.format("%Y-%m-%d").to_string(),
        start_instant,
        end_instant: None,
        duration_seconds: None,
        timezone: config.timezone.clone(),
        version: SESSION_DOCUMENT_VERSION,
    };

    let roster = DeviceRoster::new();
    let mut primary_user_ids = HashSet::new();
    let mut secondary_user_ids = HashSet::new();
    let mut display_names = HashMap::new();

    for user in &config.users.primary {
        let user_id = user.user_id();
        if let Some(hr) = &user.hr {
            roster.assign(hr, &user_id, UserRole::Primary);
            if let Some(color) = config.ant_devices.hr.get(hr) {
                roster.set_color(hr, DeviceKind::HeartRate, color.clone());
            }
        }
        if let Some(cadence) = &user.cadence {
            roster.declare(cadence, DeviceKind::Cadence);
            if let Some(color) = config.ant_devices.cadence.get(cadence) {
                roster.set_color(cadence, DeviceKind::Cadence, color.clone());
            }
        }
        display_names.insert(user_id.clone(), user.name.clone());
        primary_user_ids.insert(user_id);
    }
    for user in &config.users.secondary {
        let user_id = user.user_id();
        if let Some(hr) = &user.hr {
            roster.assign(hr, &user_id, UserRole::Secondary);
            if let Some(color) = config.ant_devices.hr.get(hr) {
                roster.set_color(hr, DeviceKind::HeartRate, color.clone());
            }
        }
        if let Some(cadence) = &user.cadence {
            roster.declare(cadence, DeviceKind::Cadence);
        }
        display_names.insert(user_id.clone(), user.name.clone());
        secondary_user_ids.insert(user_id);
    }
    for equipment in &config.equipment {
        let kind = match equipment.sensor.sensor_type.as_str() {
            "cadence" => DeviceKind::Cadence,
            "power" => DeviceKind::Power,
            _ => DeviceKind::Vibration,
        };
        roster.declare(&equipment.id, kind);
    }

    let timebase = Arc::new(Timebase::new(start_instant, config.timeline.interval_seconds));
    let bridge = BroadcastEventBridge::new(EVENT_CHANNEL_CAPACITY);
    if let Some(emitter) = external_emitter {
        bridge.set_external_emitter(emitter);
    }
    let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::empty(&session.id, start_instant));
    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    let governance_engine = GovernanceEngine::new(config.governance.policies.clone());

    let mut state = SessionRuntime {
        session,
        status: SessionStatus::Running,
        config,
        roster,
        classifier,
        timebase: timebase.clone(),
        timeline: TimelineStore::new(),
        participants_rt: ParticipantTable::new(),
        participants: HashMap::new(),
        governance_engine,
        governance_state: GovernanceState::default(),
        totals: SessionTotals::default(),
        event_log: EventLog::new(),
        bridge,
        snapshot_tx,
        spawner: spawner.clone(),
        primary_user_ids,
        secondary_user_ids,
        display_names,
        last_pause_intent: false,
        last_challenge_phase: None,
    };

    state.bridge.emit_lifecycle(LifecycleEvent::Started {
        session_id: state.session.id.clone(),
        instant: start_instant,
    });

    let tick_cancel = cancel.clone();
    let tick_tx = command_tx.clone();
    let tick_timebase = timebase.clone();
    spawner.spawn(async move {
        let mut ticks = Box::pin(tick_stream(tick_timebase, tick_cancel));
        while let Some(event) = ticks.next().await {
            let command = match event {
                TickEvent::Tick(tick) => Command::Tick(tick),
                TickEvent::Degraded { resumed_at_index } => Command::Degraded { resumed_at_index },
            };
            if tick_tx.send(command).await.is_err() {
                break;
            }
        }
    });

    let persist_cancel = cancel.clone();
    let persist_tx = command_tx.clone();
    let persist_interval_secs = state.config.persistence.interval_seconds;
    spawner.spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(persist_interval_secs));
        loop {
            tokio::select! {
                () = persist_cancel.cancelled() => break,
                _ = interval.tick() => {
                    if persist_tx.send(Command::PersistNow).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    spawner.spawn(async move {
        run_coordinator(state, command_rx, cancel).await;
    });

    Ok((
        CoordinatorHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
        },
        timebase,
    ))
}

async fn run_coordinator(
    mut state: SessionRuntime,
    mut commands: mpsc::Receiver<Command>,
    cancel: CancellationToken,
) {
    while let Some(command) = commands.recv().await {
        match command {
            Command::Ingest(sample, reply) => {
                let _ = reply.send(state.handle_ingest(sample));
            }
            Command::Tick(tick) => state.handle_tick(tick),
            Command::Degraded { resumed_at_index } => {
                state.handle_degraded(resumed_at_index, Utc::now());
            }
            Command::Pause(reply) => {
                let _ = reply.send(state.handle_pause());
            }
            Command::Resume(reply) => {
                let _ = reply.send(state.handle_resume());
            }
            Command::RecordEvent(event, reply) => {
                state.event_log.append(event);
                let _ = reply.send(Ok(()));
            }
            Command::PersistNow => state.persist_in_background(),
            Command::EndSession(reply) => {
                let document = state.handle_end_session().await;
                let _ = reply.send(document);
                cancel.cancel();
                break;
            }
        }
    }
}

impl SessionRuntime {
    fn handle_ingest(&mut self, sample: Sample) -> CoreResult<()> {
        if self.status == SessionStatus::Ended {
            return Err(CoreError::InvalidSessionState(
                "cannot ingest into an ended session".to_string(),
            ));
        }

        let tick_index = self.timebase.tick_of(sample.instant).max(0) as u64;
        self.roster.mark_seen(&sample.device_id, sample.instant);

        match sample.kind {
            SampleKind::HeartRate => {
                let user_id = self
                    .roster
                    .owner_of(&sample.device_id)
                    .ok_or_else(|| CoreError::UnknownDevice(sample.device_id.clone()))?;
                let hr = sample
                    .value
                    .as_number()
                    .ok_or_else(|| CoreError::MalformedFrame("heart rate sample missing numeric value".to_string()))?;
                self.timeline.record(
                    &user_id,
                    SampleKind::HeartRate.metric_name(),
                    tick_index,
                    SeriesValue::Number(hr),
                    CombineRule::LastWriteWins,
                );

                if self.status == SessionStatus::Running {
                    self.ensure_participant(&user_id, tick_index);
                    let outcome = self.participants_rt.ingest_sample(
                        &user_id,
                        tick_index,
                        sample.instant,
                        self.config.resurrect_removed_participants,
                    );
                    if !matches!(outcome, SampleOutcome::Ignored) {
                        if let Some(p) = self.participants.get_mut(&user_id) {
                            p.status = ParticipantStatus::Active;
                        }
                    }
                }
                Ok(())
            }
            SampleKind::Cadence | SampleKind::Power => {
                let metric = sample.kind.metric_name();
                let value = sample
                    .value
                    .as_number()
                    .ok_or_else(|| CoreError::MalformedFrame(format!("{metric} sample missing numeric value")))?;
                self.timeline.record(
                    &sample.device_id,
                    metric,
                    tick_index,
                    SeriesValue::Number(value),
                    CombineRule::LastWriteWins,
                );
                Ok(())
            }
            SampleKind::Vibration => {
                let edge = sample
                    .value
                    .as_bool()
                    .ok_or_else(|| CoreError::MalformedFrame("vibration sample missing boolean value".to_string()))?;
                self.timeline.record(
                    &sample.device_id,
                    SampleKind::Vibration.metric_name(),
                    tick_index,
                    SeriesValue::Bool(edge),
                    CombineRule::LogicalOr,
                );
                Ok(())
            }
        }
    }

    fn ensure_participant(&mut self, user_id: &str, tick_index: u64) {
        if self.participants.contains_key(user_id) {
            return;
        }
        let is_primary = self.primary_user_ids.contains(user_id);
        let is_guest = !is_primary && !self.secondary_user_ids.contains(user_id);
        let display_name = self
            .display_names
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| user_id.to_string());
        let mut participant = Participant::new(user_id, display_name, tick_index);
        participant.is_primary = is_primary;
        participant.is_guest = is_guest;
        self.participants.insert(user_id.to_string(), participant);
    }

    fn handle_tick(&mut self, tick: Tick) {
        if self.status != SessionStatus::Running {
            return;
        }
        self.timeline.finalize_tick(tick.index);

        let idle_threshold = self.config.idle_threshold_ticks;
        let removal_timeout = self.config.removal_timeout_ms;
        let known_ids: Vec<String> = self.participants.keys().cloned().collect();

        for user_id in &known_ids {
            let outcome =
                self.participants_rt
                    .advance_tick(user_id, tick.index, tick.instant, idle_threshold, removal_timeout);
            if let TickOutcome::BecameIdle { last_active_tick, dropout_id } = outcome {
                if let Some(p) = self.participants.get(user_id) {
                    let event = DropoutEvent {
                        id: dropout_id,
                        participant_id: user_id.clone(),
                        tick: last_active_tick,
                        value: p.coins_earned,
                        instant: tick.instant,
                    };
                    self.bridge.emit_dropout(event);
                }
            }
            if let Some(status) = self.participants_rt.status_of(user_id) {
                if let Some(p) = self.participants.get_mut(user_id) {
                    p.status = status;
                }
            }
        }

        let active_ids = self.participants_rt.active_participant_ids();
        let mut zone_ranks = Vec::new();
        for user_id in &active_ids {
            let hr_value = self
                .timeline
                .snapshot(user_id, "heart_rate")
                .get(tick.index as usize)
                .cloned()
                .flatten();
            let Some(SeriesValue::Number(hr)) = hr_value else {
                continue;
            };
            let hr_rounded = hr.round().clamp(0.0, f64::from(u32::MAX)) as u32;
            let Ok(zone_id) = self.classifier.classify(user_id, hr_rounded) else {
                continue;
            };
            if let Some(participant) = self.participants.get_mut(user_id) {
                apply_tick(
                    participant,
                    hr_rounded,
                    &zone_id,
                    self.config.timeline.interval_seconds,
                    &self.config.zone_bucket_map,
                    &mut self.totals,
                );
                self.timeline.record(
                    user_id,
                    "zone",
                    tick.index,
                    SeriesValue::Categorical(zone_id.clone()),
                    CombineRule::LastWriteWins,
                );
                self.timeline.record(
                    user_id,
                    "coins_total",
                    tick.index,
                    SeriesValue::Number(participant.coins_earned as f64),
                    CombineRule::LastWriteWins,
                );
                if participant.is_primary {
                    if let Some(rank) = self.classifier.rank_of(user_id, &zone_id) {
                        zone_ranks.push(ParticipantZoneRank {
                            user_id: user_id.clone(),
                            is_primary: true,
                            rank,
                        });
                    }
                }
            }
        }

        let classifier = &self.classifier;
        let target_rank_of = |uid: &str, zone_id: &str| classifier.rank_of(uid, zone_id);
        let coins_total = self.totals.coins as f64;
        let metric_progress = move |metric: &str| if metric == "coins" { coins_total } else { 0.0 };
        self.governance_engine.evaluate_tick(
            tick.instant,
            self.session.start_instant,
            &zone_ranks,
            target_rank_of,
            metric_progress,
            &mut self.governance_state,
        );

        if self.governance_state.pause_intent != self.last_pause_intent {
            self.last_pause_intent = self.governance_state.pause_intent;
            self.bridge.emit_governance(GovernanceEvent::PauseIntentChanged {
                pause_intent: self.last_pause_intent,
                instant: tick.instant,
            });
        }

        if let Some(challenge) = &self.governance_state.challenge {
            if self.last_challenge_phase != Some(challenge.phase) {
                self.last_challenge_phase = Some(challenge.phase);
                self.bridge.emit_governance(GovernanceEvent::ChallengePhaseChanged {
                    challenge_id: challenge.id.clone(),
                    phase: challenge.phase,
                    instant: tick.instant,
                });
            }
        }

        self.broadcast_snapshot(&tick);
    }

    fn broadcast_snapshot(&self, tick: &Tick) {
        let participants = self
            .participants
            .values()
            .map(|p| {
                let hr = self
                    .timeline
                    .snapshot(&p.id, "heart_rate")
                    .get(tick.index as usize)
                    .cloned()
                    .flatten()
                    .and_then(|v| match v {
                        SeriesValue::Number(n) => Some(n),
                        _ => None,
                    });
                let zone = self
                    .timeline
                    .snapshot(&p.id, "zone")
                    .get(tick.index as usize)
                    .cloned()
                    .flatten()
                    .and_then(|v| match v {
                        SeriesValue::Categorical(z) => Some(z),
                        _ => None,
                    });
                ParticipantSnapshot {
                    id: p.id.clone(),
                    status: p.status,
                    hr,
                    zone,
                    coins: p.coins_earned,
                    zone_time_seconds: p.zone_time_seconds.clone(),
                }
            })
            .collect();

        let devices = self
            .roster
            .all()
            .into_iter()
            .map(|d| DeviceSnapshot {
                active: self.roster.is_active(&d.device_id, tick.instant),
                device_id: d.device_id,
                kind: d.kind,
                owner_user_id: d.owner_user_id,
            })
            .collect();

        let snapshot = Snapshot {
            session_id: self.session.id.clone(),
            tick: tick.index,
            instant: tick.instant,
            participants,
            totals: self.totals.clone(),
            devices,
            governance: self.governance_state.clone(),
        };
        let _ = self.snapshot_tx.send(snapshot);
    }

    /// Records a Timebase catch-up-cap overrun (§4.D/§7): writes a gap
    /// marker into the `global` timeline series so persistence and
    /// reconstruction both see the skipped span, then notifies subscribers.
    fn handle_degraded(&mut self, resumed_at_index: u64, instant: Instant) {
        let drift = CoreError::TickDrift(format!(
            "catch-up cap exceeded, resumed at tick {resumed_at_index}"
        ));
        tracing::warn!(error = %drift, resumed_at_tick = resumed_at_index, "session entering degraded mode");

        self.timeline.record(
            "global",
            "gap",
            resumed_at_index,
            SeriesValue::Bool(true),
            CombineRule::LogicalOr,
        );

        self.bridge.emit_lifecycle(LifecycleEvent::Degraded {
            resumed_at_tick: resumed_at_index,
            instant,
        });
    }

    fn handle_pause(&mut self) -> CoreResult<()> {
        if self.status != SessionStatus::Running {
            return Err(CoreError::InvalidSessionState(format!(
                "cannot pause from {:?}",
                self.status
            )));
        }
        self.status = SessionStatus::Paused;
        self.bridge.emit_lifecycle(LifecycleEvent::Paused { instant: Utc::now() });
        Ok(())
    }

    fn handle_resume(&mut self) -> CoreResult<()> {
        if self.status != SessionStatus::Paused {
            return Err(CoreError::InvalidSessionState(format!(
                "cannot resume from {:?}",
                self.status
            )));
        }
        self.status = SessionStatus::Running;
        self.bridge.emit_lifecycle(LifecycleEvent::Resumed { instant: Utc::now() });
        Ok(())
    }

    /// Builds the current document and hands the write off to a detached
    /// task, so a slow disk never blocks the command queue (§5).
    fn persist_in_background(&self) {
        let document = self.build_document();
        let output_dir = self.config.persistence.output_dir.clone();
        self.spawner.spawn(async move {
            if let Err(e) = persistence::write_document(&output_dir, &document).await {
                tracing::debug!(error = %e, "periodic persistence failed");
            }
        });
    }

    async fn handle_end_session(&mut self) -> SessionDocument {
        let now = Utc::now();
        let (ticks, degraded) = self.timebase.advance(now);
        for t in ticks {
            self.handle_tick(t);
        }
        if degraded {
            self.handle_degraded(self.timebase.tick_count().saturating_sub(1), now);
        }

        self.status = SessionStatus::Ended;
        self.session.end_instant = Some(now);
        self.session.duration_seconds =
            Some((now - self.session.start_instant).num_seconds().max(0) as u64);
        self.bridge.emit_lifecycle(LifecycleEvent::Ended { instant: now });

        let document = self.build_document();
        if let Err(e) = persistence::write_document(&self.config.persistence.output_dir, &document).await {
            tracing::debug!(error = %e, "final persistence write failed");
        }
        document
    }

    /// Translates runtime state into the v3 [`SessionDocument`] shape (§6).
    fn build_document(&self) -> SessionDocument {
        let mut participants = HashMap::new();
        let mut timeline_participants = HashMap::new();
        for (id, p) in &self.participants {
            participants.insert(
                id.clone(),
                ParticipantDoc {
                    display_name: p.display_name.clone(),
                    is_primary: p.is_primary,
                    is_guest: p.is_guest,
                    coins_earned: p.coins_earned,
                    active_seconds: p.active_seconds,
                    zone_time_seconds: p.zone_time_seconds.clone(),
                    hr_stats: p.hr_stats,
                },
            );
            timeline_participants.insert(
                id.clone(),
                ParticipantSeriesDoc {
                    hr: encode_rle(&self.timeline.snapshot(id, "heart_rate")),
                    zone: encode_rle(&self.timeline.snapshot(id, "zone")),
                    coins_total: encode_rle(&self.timeline.snapshot(id, "coins_total")),
                },
            );
        }

        let mut equipment = HashMap::new();
        for device in self.roster.all() {
            if matches!(device.kind, DeviceKind::Cadence | DeviceKind::Power | DeviceKind::Vibration) {
                let mut metrics = HashMap::new();
                for metric in ["cadence", "power", "vibration"] {
                    let series = self.timeline.snapshot(&device.device_id, metric);
                    if !series.is_empty() {
                        metrics.insert(metric.to_string(), encode_rle(&series));
                    }
                }
                if !metrics.is_empty() {
                    equipment.insert(device.device_id, metrics);
                }
            }
        }

        let mut global = HashMap::new();
        let gap_series = self.timeline.snapshot("global", "gap");
        if !gap_series.is_empty() {
            global.insert("gap".to_string(), encode_rle(&gap_series));
        }

        // ScreenshotTaken/VoiceMemo are stripped from the v3 document; only
        // audio/video survive into `events` (§4.K legacy-field stripping).
        let events = self.event_log.snapshot();
        let events_doc = if events.is_empty() {
            None
        } else {
            let mut audio = Vec::new();
            let mut video = Vec::new();
            for event in events {
                match event {
                    SessionEvent::AudioPlayed { title, artist, plex_id, instant, duration_seconds } => {
                        audio.push(AudioEventDoc { at: instant, title, artist, plex_id, duration_seconds });
                    }
                    SessionEvent::VideoPlayed { title, show, season, plex_id, instant, duration_seconds } => {
                        video.push(VideoEventDoc { at: instant, title, show, season, plex_id, duration_seconds });
                    }
                    SessionEvent::ScreenshotTaken { .. } | SessionEvent::VoiceMemo { .. } => {}
                }
            }
            Some(EventsDoc { audio, video })
        };

        SessionDocument {
            version: SESSION_DOCUMENT_VERSION,
            session: SessionDoc {
                id: self.session.id.clone(),
                date: self.session.date.clone(),
                start: self.session.start_instant,
                end: self.session.end_instant,
                duration_seconds: self.session.duration_seconds,
                timezone: self.session.timezone.clone(),
            },
            totals: TotalsDoc {
                coins: self.totals.coins,
                buckets: self.totals.buckets.clone(),
            },
            participants,
            timeline: TimelineDoc {
                interval_seconds: self.config.timeline.interval_seconds,
                tick_count: self.timebase.tick_count(),
                encoding: "rle".to_string(),
                participants: timeline_participants,
                equipment,
                global,
            },
            events: events_doc,
        }
    }
}
