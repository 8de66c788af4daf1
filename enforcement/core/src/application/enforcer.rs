// Copyright (c) 2026 TwinGuard Project
// SPDX-License-Identifier: AGPL-3.0
//! # Enforcement State Machine (shared behavior)
//!
//! One [`Enforcer`] task runs per protected entity. It is the unit of
//! correctness: it owns the permission model exclusively, processes at most
//! one message at a time, and communicates with everything else via
//! asynchronous messages only.
//!
//! ## States
//!
//! ```text
//! Uninitialized → Synchronizing → Enforcing ⇄ Querying
//! ```
//!
//! `Synchronizing` and `Querying` are transient: unrelated messages received
//! there are deferred FIFO and redelivered in original order once the task is
//! back in `Enforcing`. A synchronization failure (timeout or unexpected
//! authoritative error) is fatal — the task drains its deferred queue (each
//! drop is logged, nothing vanishes silently) and terminates; the registry
//! creates a fresh instance on the next access.
//!
//! ## Timers
//!
//! Timeouts and idle checks are delivered as ordinary inbox messages, never
//! unwound as errors across the call stack. Each pending operation carries a
//! generation number; a timeout message with a stale generation is ignored,
//! and the spawned helper task is aborted the moment its outcome arrives.

use metrics::counter;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::domain::cache::CacheEntry;
use crate::domain::entity::{CorrelationId, EntityId, ResourceType, UNKNOWN_REVISION};
use crate::domain::error::{RejectionError, SyncError};
use crate::domain::events::EntityEvent;
use crate::domain::permission::{AuthorizationContext, Subject};
use crate::domain::signal::{EnforcementOutcome, Signal};
use crate::infrastructure::cache::ReplicatedCache;
use crate::infrastructure::config::EnforcementConfig;
use crate::infrastructure::entity_service::{DocumentFetch, DocumentKind, EntityService};

/// Reply type delivered to the original caller of a protected signal.
pub type EnforcementReply = Result<EnforcementOutcome, RejectionError>;

/// Authorization decision for a classified signal.
#[derive(Debug)]
pub enum Decision {
    /// Forward point-to-point; `resync` reloads the permission model after.
    Forward { resync: bool },
    /// Broadcast on the live channel.
    Publish,
    /// Forward and filter the response before answering.
    Query,
    Reject(RejectionError),
}

/// Effect of an authoritative event on the permission model.
#[derive(Debug)]
pub enum EventEffect {
    /// Model updated in place; the event's revision.
    Applied { revision: i64 },
    /// The event could not be applied incrementally; reload from scratch.
    ReloadRequired,
    /// The entity is gone; the instance terminates.
    Terminate,
    Ignored,
}

/// Variant-specific behavior of an enforcement instance (policy-backed or
/// legacy ACL-backed). The shared state machine drives these hooks.
pub trait EnforcementVariant: Send + 'static {
    /// Which permission document this variant loads.
    fn document_kind(&self) -> DocumentKind;

    /// Short label for logs ("policy" / "acl").
    fn variant_name(&self) -> &'static str;

    /// Install a freshly loaded document. Returns the document revision, or
    /// `None` when the authoritative tier confirmed absence.
    fn install(&mut self, fetch: DocumentFetch) -> Result<Option<i64>, SyncError>;

    /// Tombstone the model (cache reported the entity deleted).
    fn clear(&mut self);

    fn model_present(&self) -> bool;

    fn authorize(&self, signal: &Signal) -> Decision;

    /// Subjects allowed to read the signal's resource, attached to every
    /// outgoing signal before forward/publish.
    fn read_subjects(&self, signal: &Signal) -> HashSet<Subject>;

    fn apply_event(&mut self, event: &EntityEvent) -> EventEffect;

    /// Filtered view of a query response for the original caller.
    fn filter_response(
        &self,
        ctx: &AuthorizationContext,
        payload: &Value,
        resource_type: ResourceType,
    ) -> Value;
}

/// A protected signal plus the address to answer.
pub(crate) struct SignalEnvelope {
    pub(crate) signal: Signal,
    pub(crate) reply: oneshot::Sender<EnforcementReply>,
}

pub(crate) enum EnforcerMsg {
    Signal(SignalEnvelope),
    CacheChanged(CacheEntry),
    Event(EntityEvent),
    SyncOutcome {
        generation: u64,
        result: Result<DocumentFetch, SyncError>,
    },
    SyncTimeout {
        generation: u64,
    },
    QueryOutcome {
        generation: u64,
        result: Result<crate::domain::signal::SignalResponse, crate::domain::error::ServiceError>,
    },
    QueryTimeout {
        generation: u64,
    },
    IdleCheck {
        snapshot: u64,
    },
}

/// The instance terminated before answering; callers retry, which creates a
/// fresh instance.
#[derive(Debug, Error)]
#[error("enforcement instance terminated before answering")]
pub struct EnforcerGone;

/// Sender side of an enforcement instance's inbox.
#[derive(Clone)]
pub struct EnforcerHandle {
    tx: mpsc::Sender<EnforcerMsg>,
}

impl EnforcerHandle {
    /// Deliver a protected signal and await the enforcement outcome.
    pub async fn enforce(&self, signal: Signal) -> Result<EnforcementReply, EnforcerGone> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EnforcerMsg::Signal(SignalEnvelope {
                signal,
                reply: reply_tx,
            }))
            .await
            .map_err(|_| EnforcerGone)?;
        reply_rx.await.map_err(|_| EnforcerGone)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

struct PendingQuery {
    reply: oneshot::Sender<EnforcementReply>,
    ctx: AuthorizationContext,
    resource_type: ResourceType,
}

enum Phase {
    Synchronizing,
    Enforcing,
    Querying(PendingQuery),
}

/// Per-entity enforcement task. All fields are exclusively owned; no message
/// is processed concurrently with another for the same entity.
pub struct Enforcer<V: EnforcementVariant> {
    entity_id: EntityId,
    variant: V,
    service: Arc<dyn EntityService>,
    cache: Arc<dyn ReplicatedCache>,
    config: EnforcementConfig,
    shutdown: CancellationToken,

    inbox: mpsc::Receiver<EnforcerMsg>,
    self_tx: mpsc::Sender<EnforcerMsg>,

    phase: Phase,
    revision: i64,
    load_attempted: bool,
    access_counter: u64,
    deferred: VecDeque<EnforcerMsg>,
    /// Messages queued since entering the current transient state. Only
    /// drives log severity; never alters behavior.
    queued_while_busy: u64,

    /// Generation of the pending synchronization or query; stale timeout and
    /// outcome messages are dropped by comparing against this.
    generation: u64,
    pending_op: Option<JoinHandle<()>>,
    idle_timer: Option<JoinHandle<()>>,
    feeds: Vec<JoinHandle<()>>,
}

impl<V: EnforcementVariant> Enforcer<V> {
    /// Spawn the enforcement task for `entity_id`. The constructor issues the
    /// initial synchronization immediately; no signal is processed before the
    /// permission model is resolved one way or the other.
    pub fn spawn(
        entity_id: EntityId,
        variant: V,
        service: Arc<dyn EntityService>,
        cache: Arc<dyn ReplicatedCache>,
        config: EnforcementConfig,
        shutdown: CancellationToken,
    ) -> (EnforcerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.inbox_capacity);
        let enforcer = Self {
            entity_id,
            variant,
            service,
            cache,
            config,
            shutdown,
            inbox: rx,
            self_tx: tx.clone(),
            phase: Phase::Synchronizing,
            revision: UNKNOWN_REVISION,
            load_attempted: false,
            access_counter: 0,
            deferred: VecDeque::new(),
            queued_while_busy: 0,
            generation: 0,
            pending_op: None,
            idle_timer: None,
            feeds: Vec::new(),
        };
        let task = tokio::spawn(enforcer.run());
        (EnforcerHandle { tx }, task)
    }

    async fn run(mut self) {
        info!(
            entity_id = %self.entity_id,
            variant = self.variant.variant_name(),
            "enforcement instance starting"
        );
        self.subscribe_feeds();
        self.begin_sync();
        self.schedule_idle_check();

        loop {
            let msg = if matches!(self.phase, Phase::Enforcing) && !self.deferred.is_empty() {
                // Deferred messages predate anything still in the inbox;
                // draining them first preserves receipt order.
                self.deferred.pop_front().map(Ok)
            } else {
                None
            };
            let msg = match msg {
                Some(m) => m,
                None => tokio::select! {
                    received = self.inbox.recv() => match received {
                        Some(m) => Ok(m),
                        None => break,
                    },
                    _ = self.shutdown.cancelled() => Err(()),
                },
            };
            let Ok(msg) = msg else { break };
            if !self.handle(msg) {
                break;
            }
        }

        self.cleanup();
        info!(entity_id = %self.entity_id, "enforcement instance terminated");
    }

    fn handle(&mut self, msg: EnforcerMsg) -> bool {
        match msg {
            EnforcerMsg::IdleCheck { snapshot } => self.handle_idle_check(snapshot),
            EnforcerMsg::SyncOutcome { generation, result } => {
                self.handle_sync_outcome(generation, result)
            }
            EnforcerMsg::SyncTimeout { generation } => self.handle_sync_timeout(generation),
            EnforcerMsg::QueryOutcome { generation, result } => {
                self.handle_query_outcome(generation, result)
            }
            EnforcerMsg::QueryTimeout { generation } => self.handle_query_timeout(generation),
            msg => match self.phase {
                Phase::Enforcing => match msg {
                    EnforcerMsg::Signal(envelope) => self.handle_signal(envelope),
                    EnforcerMsg::CacheChanged(entry) => self.handle_cache_changed(entry),
                    EnforcerMsg::Event(event) => self.handle_event(event),
                    _ => unreachable!("timer messages are handled above"),
                },
                Phase::Synchronizing | Phase::Querying(_) => {
                    self.defer(msg);
                    true
                }
            },
        }
    }

    // ------------------------------------------------------------------
    // Synchronization
    // ------------------------------------------------------------------

    fn begin_sync(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        if let Some(op) = self.pending_op.take() {
            op.abort();
        }
        self.phase = Phase::Synchronizing;
        self.queued_while_busy = 0;

        let service = self.service.clone();
        let entity_id = self.entity_id.clone();
        let kind = self.variant.document_kind();
        let ask_timeout = self.config.ask_timeout;
        let tx = self.self_tx.clone();
        debug!(entity_id = %entity_id, generation, "synchronizing permission model");

        self.pending_op = Some(tokio::spawn(async move {
            let correlation_id = CorrelationId::generate();
            match tokio::time::timeout(
                ask_timeout,
                service.fetch_permission_document(&entity_id, kind, &correlation_id),
            )
            .await
            {
                Ok(result) => {
                    let _ = tx
                        .send(EnforcerMsg::SyncOutcome {
                            generation,
                            result: result.map_err(SyncError::from),
                        })
                        .await;
                }
                Err(_) => {
                    let _ = tx.send(EnforcerMsg::SyncTimeout { generation }).await;
                }
            }
        }));
    }

    fn handle_sync_outcome(
        &mut self,
        generation: u64,
        result: Result<DocumentFetch, SyncError>,
    ) -> bool {
        if generation != self.generation {
            trace!(entity_id = %self.entity_id, generation, "stale sync outcome dropped");
            return true;
        }
        if !matches!(self.phase, Phase::Synchronizing) {
            warn!(entity_id = %self.entity_id, "sync outcome received outside Synchronizing");
            return true;
        }
        self.cancel_pending_op();

        let installed = result.and_then(|fetch| self.variant.install(fetch));
        match installed {
            Ok(Some(revision)) => {
                self.revision = revision;
                self.load_attempted = true;
                debug!(entity_id = %self.entity_id, revision, "permission model synchronized");
                self.phase = Phase::Enforcing;
                true
            }
            Ok(None) => {
                // Confirmed absent: protected commands now fail fast.
                self.load_attempted = true;
                debug!(entity_id = %self.entity_id, "no permission document exists");
                self.phase = Phase::Enforcing;
                true
            }
            Err(e) => self.fail_sync(&e),
        }
    }

    fn handle_sync_timeout(&mut self, generation: u64) -> bool {
        if generation != self.generation {
            trace!(entity_id = %self.entity_id, generation, "stale sync timeout dropped");
            return true;
        }
        if !matches!(self.phase, Phase::Synchronizing) {
            return true;
        }
        self.fail_sync(&SyncError::Timeout)
    }

    /// The authorization state is unknown; the instance cannot safely
    /// continue. Drain the queue loudly, then terminate.
    fn fail_sync(&mut self, error: &SyncError) -> bool {
        error!(
            entity_id = %self.entity_id,
            error = %error,
            "permission model synchronization failed; terminating instance"
        );
        // Dropping an envelope closes its reply channel; callers observe a
        // retryable failure rather than silence.
        let flushed = self.deferred.len();
        self.deferred.clear();
        if flushed > 0 {
            warn!(
                entity_id = %self.entity_id,
                flushed,
                "flushed deferred messages on synchronization failure"
            );
        }
        false
    }

    // ------------------------------------------------------------------
    // Steady state
    // ------------------------------------------------------------------

    /// Only signals that result in a forwarded/published/queried operation
    /// count towards `access_counter`; a stream of rejections does not keep
    /// an instance alive across idle checks.
    fn handle_signal(&mut self, envelope: SignalEnvelope) -> bool {
        let SignalEnvelope { signal, reply } = envelope;

        if signal.sudo {
            // Trusted internal traffic: always forwarded, never rejected. A
            // sudo command that changes authorization still resynchronizes.
            self.access_counter += 1;
            let resync = signal.changes_authorization();
            self.forward_detached(signal, reply);
            if resync {
                self.begin_sync();
            }
            return true;
        }

        if !self.variant.model_present() && !self.load_attempted {
            // Not yet authorizable: reload and retry this signal first.
            debug!(entity_id = %self.entity_id, "signal before first load; deferring");
            self.deferred.push_front(EnforcerMsg::Signal(SignalEnvelope { signal, reply }));
            self.begin_sync();
            return true;
        }

        match self.variant.authorize(&signal) {
            Decision::Reject(rejection) => {
                counter!("twinguard_signals_rejected_total").increment(1);
                debug!(
                    entity_id = %self.entity_id,
                    correlation_id = %signal.correlation_id,
                    rejection = %rejection,
                    "signal rejected"
                );
                let _ = reply.send(Err(rejection));
                true
            }
            Decision::Forward { resync } => {
                counter!("twinguard_signals_authorized_total").increment(1);
                self.access_counter += 1;
                self.forward_detached(signal, reply);
                if resync {
                    self.begin_sync();
                }
                true
            }
            Decision::Publish => {
                counter!("twinguard_signals_authorized_total").increment(1);
                self.access_counter += 1;
                self.publish_detached(signal, reply);
                true
            }
            Decision::Query => {
                counter!("twinguard_signals_authorized_total").increment(1);
                self.access_counter += 1;
                self.begin_query(signal, reply);
                true
            }
        }
    }

    fn handle_cache_changed(&mut self, entry: CacheEntry) -> bool {
        if entry.deleted {
            info!(
                entity_id = %self.entity_id,
                revision = entry.revision,
                "cache reports entity deleted; tombstoning permission model"
            );
            self.variant.clear();
            self.load_attempted = false;
            self.revision = UNKNOWN_REVISION;
        } else if entry.revision > self.revision {
            debug!(
                entity_id = %self.entity_id,
                known = self.revision,
                notified = entry.revision,
                "cache reports newer revision; resynchronizing"
            );
            self.begin_sync();
        } else {
            trace!(
                entity_id = %self.entity_id,
                revision = entry.revision,
                "stale cache notification ignored"
            );
        }
        true
    }

    fn handle_event(&mut self, event: EntityEvent) -> bool {
        match self.variant.apply_event(&event) {
            EventEffect::Applied { revision } => {
                if revision > self.revision {
                    self.revision = revision;
                }
                debug!(entity_id = %self.entity_id, revision, "event applied to permission model");
                true
            }
            EventEffect::ReloadRequired => {
                debug!(entity_id = %self.entity_id, "event requires full reload");
                self.begin_sync();
                true
            }
            EventEffect::Terminate => {
                info!(entity_id = %self.entity_id, "entity deleted; terminating instance");
                false
            }
            EventEffect::Ignored => {
                trace!(entity_id = %self.entity_id, "unrelated event ignored");
                true
            }
        }
    }

    // ------------------------------------------------------------------
    // Forward / publish / query
    // ------------------------------------------------------------------

    fn enrich(&self, signal: &mut Signal) {
        signal.read_subjects = self.variant.read_subjects(signal);
    }

    fn forward_detached(&mut self, mut signal: Signal, reply: oneshot::Sender<EnforcementReply>) {
        self.enrich(&mut signal);
        let service = self.service.clone();
        let ask_timeout = self.config.ask_timeout;
        let entity_id = self.entity_id.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(ask_timeout, service.forward(signal)).await {
                Ok(Ok(response)) => {
                    let _ = reply.send(Ok(EnforcementOutcome::Forwarded(response)));
                }
                Ok(Err(e)) => {
                    // Infrastructure failures are never surfaced as typed
                    // outcomes; the caller times out and retries.
                    warn!(entity_id = %entity_id, error = %e, "forward to entity service failed");
                }
                Err(_) => {
                    warn!(entity_id = %entity_id, "forward to entity service timed out");
                }
            }
        });
    }

    fn publish_detached(&mut self, mut signal: Signal, reply: oneshot::Sender<EnforcementReply>) {
        self.enrich(&mut signal);
        let service = self.service.clone();
        let entity_id = self.entity_id.clone();
        tokio::spawn(async move {
            if let Err(e) = service.publish(signal).await {
                warn!(entity_id = %entity_id, error = %e, "live publish failed");
            }
        });
        let _ = reply.send(Ok(EnforcementOutcome::Published));
    }

    fn begin_query(&mut self, mut signal: Signal, reply: oneshot::Sender<EnforcementReply>) {
        self.enrich(&mut signal);
        self.generation += 1;
        let generation = self.generation;
        self.cancel_pending_op();
        self.phase = Phase::Querying(PendingQuery {
            reply,
            ctx: signal.authorization_context.clone(),
            resource_type: signal.resource_type,
        });
        self.queued_while_busy = 0;

        let service = self.service.clone();
        let ask_timeout = self.config.ask_timeout;
        let tx = self.self_tx.clone();
        self.pending_op = Some(tokio::spawn(async move {
            match tokio::time::timeout(ask_timeout, service.forward(signal)).await {
                Ok(result) => {
                    let _ = tx.send(EnforcerMsg::QueryOutcome { generation, result }).await;
                }
                Err(_) => {
                    let _ = tx.send(EnforcerMsg::QueryTimeout { generation }).await;
                }
            }
        }));
    }

    fn handle_query_outcome(
        &mut self,
        generation: u64,
        result: Result<crate::domain::signal::SignalResponse, crate::domain::error::ServiceError>,
    ) -> bool {
        if generation != self.generation {
            trace!(entity_id = %self.entity_id, generation, "stale query outcome dropped");
            return true;
        }
        let Phase::Querying(pending) = std::mem::replace(&mut self.phase, Phase::Enforcing) else {
            warn!(entity_id = %self.entity_id, "query outcome received outside Querying");
            return true;
        };
        self.cancel_pending_op();

        match result {
            Ok(response) if response.is_success() => {
                let payload = response.payload.unwrap_or(Value::Null);
                let view =
                    self.variant
                        .filter_response(&pending.ctx, &payload, pending.resource_type);
                let _ = pending.reply.send(Ok(EnforcementOutcome::QueryResult(view)));
            }
            Ok(response) => {
                // Authoritative error responses pass through verbatim.
                let _ = pending.reply.send(Ok(EnforcementOutcome::Forwarded(response)));
            }
            Err(e) => {
                warn!(entity_id = %self.entity_id, error = %e, "downstream query failed");
            }
        }
        true
    }

    fn handle_query_timeout(&mut self, generation: u64) -> bool {
        if generation != self.generation {
            trace!(entity_id = %self.entity_id, generation, "stale query timeout dropped");
            return true;
        }
        if !matches!(self.phase, Phase::Querying(_)) {
            return true;
        }
        // Known gap: the original caller receives no answer on this path.
        warn!(
            entity_id = %self.entity_id,
            "downstream query timed out; reverting to steady state without answering"
        );
        self.phase = Phase::Enforcing;
        self.cancel_pending_op();
        true
    }

    // ------------------------------------------------------------------
    // Idle eviction
    // ------------------------------------------------------------------

    fn schedule_idle_check(&mut self) {
        if let Some(timer) = self.idle_timer.take() {
            timer.abort();
        }
        let snapshot = self.access_counter;
        let interval = self.config.idle_check_interval;
        let tx = self.self_tx.clone();
        self.idle_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let _ = tx.send(EnforcerMsg::IdleCheck { snapshot }).await;
        }));
    }

    fn handle_idle_check(&mut self, snapshot: u64) -> bool {
        if matches!(self.phase, Phase::Synchronizing) {
            // Synchronizing from scratch counts as activity.
            self.schedule_idle_check();
            return true;
        }
        if self.access_counter > snapshot {
            self.schedule_idle_check();
            return true;
        }
        counter!("twinguard_enforcers_evicted_total").increment(1);
        info!(
            entity_id = %self.entity_id,
            operations = self.access_counter,
            "no operations since last check; evicting idle instance"
        );
        false
    }

    // ------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------

    fn defer(&mut self, msg: EnforcerMsg) {
        self.deferred.push_back(msg);
        self.queued_while_busy += 1;
        if self.queued_while_busy == 1 {
            debug!(entity_id = %self.entity_id, "message deferred while busy");
        } else {
            warn!(
                entity_id = %self.entity_id,
                queued = self.queued_while_busy,
                "additional messages deferred while busy"
            );
        }
    }

    fn subscribe_feeds(&mut self) {
        let entity_id = self.entity_id.clone();
        let tx = self.self_tx.clone();
        let mut cache_rx = self.cache.register();
        self.feeds.push(tokio::spawn(async move {
            loop {
                match cache_rx.recv().await {
                    Ok(entry) if entry.entity_id == entity_id => {
                        if tx.send(EnforcerMsg::CacheChanged(entry)).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(entity_id = %entity_id, missed, "cache notification feed lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));

        let entity_id = self.entity_id.clone();
        let tx = self.self_tx.clone();
        let mut event_rx = self.service.events();
        self.feeds.push(tokio::spawn(async move {
            loop {
                match event_rx.recv().await {
                    Ok(event) if event.entity_id() == &entity_id => {
                        if tx.send(EnforcerMsg::Event(event)).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(entity_id = %entity_id, missed, "entity event feed lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }

    fn cancel_pending_op(&mut self) {
        if let Some(op) = self.pending_op.take() {
            op.abort();
        }
    }

    fn cleanup(&mut self) {
        self.cancel_pending_op();
        if let Some(timer) = self.idle_timer.take() {
            timer.abort();
        }
        for feed in self.feeds.drain(..) {
            feed.abort();
        }
    }
}
