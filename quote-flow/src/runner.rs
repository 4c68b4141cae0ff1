//! ConversationRunner: async driver around the synchronous [`FlowController`].
//!
//! Every operation follows the same _lock → load → step → save → schedule_ pattern:
//!
//! 1. take the per-session lock, so two inputs for one session never interleave
//! 2. load the session from [`SessionStorage`]
//! 3. run exactly **one** controller step
//! 4. persist the session if the step was accepted
//! 5. hand the step's messages to the [`MessageScheduler`] and spawn its effect, if any
//!
//! Effects (offer requests, document uploads) run on their own task while holding the
//! session's input disabled. Their results come back through the same pattern, and are
//! dropped when the session was reset in the meantime.
//!
//! ## Sharing
//! Create one runner at startup and clone it into request handlers; clones share everything.
//! ```rust,ignore
//! struct AppState {
//!     runner: ConversationRunner,
//! }
//!
//! let transition = state.runner.submit(&session_id, "auto").await?;
//! ```

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tracing::{Instrument, debug, info, warn};
use uuid::Uuid;

use crate::{
    backend::{QuoteBackend, SimulatedBackend},
    catalog::Catalog,
    config::FlowConfig,
    controller::{Effect, FlowController, Transition},
    error::{FlowError, Result},
    leads::{InMemoryLeadStore, LeadStore},
    message::Message,
    scheduler::{HoldGuard, InputSignal, MessageScheduler},
    session::{ConversationSession, FinalizationRecord},
    storage::{InMemorySessionStorage, SessionStorage},
};

/// A session together with what its input box should look like.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session: ConversationSession,
    pub input: InputSignal,
}

struct RunnerInner {
    controller: FlowController,
    storage: Arc<dyn SessionStorage>,
    scheduler: MessageScheduler,
    backend: Arc<dyn QuoteBackend>,
    leads: Arc<dyn LeadStore>,
    config: FlowConfig,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// High-level handle that runs conversations end to end.
#[derive(Clone)]
pub struct ConversationRunner {
    inner: Arc<RunnerInner>,
}

impl ConversationRunner {
    pub fn new(
        catalog: Arc<Catalog>,
        config: FlowConfig,
        storage: Arc<dyn SessionStorage>,
        backend: Arc<dyn QuoteBackend>,
        leads: Arc<dyn LeadStore>,
    ) -> Result<Self> {
        config.validate()?;
        catalog.validate(config.offer_count)?;
        Ok(Self {
            inner: Arc::new(RunnerInner {
                controller: FlowController::new(catalog, config.offer_count),
                storage,
                scheduler: MessageScheduler::new(&config),
                backend,
                leads,
                config,
                locks: DashMap::new(),
            }),
        })
    }

    /// Runner with in-memory storage, an in-memory lead store and the
    /// simulated backend.
    pub fn in_memory(catalog: Arc<Catalog>, config: FlowConfig) -> Result<Self> {
        let backend = Arc::new(SimulatedBackend::new(catalog.clone()));
        Self::with_backend(catalog, config, backend)
    }

    /// In-memory storage and leads around the given backend.
    pub fn with_backend(
        catalog: Arc<Catalog>,
        config: FlowConfig,
        backend: Arc<dyn QuoteBackend>,
    ) -> Result<Self> {
        Self::new(
            catalog,
            config,
            Arc::new(InMemorySessionStorage::new()),
            backend,
            Arc::new(InMemoryLeadStore::new()),
        )
    }

    pub fn config(&self) -> &FlowConfig {
        &self.inner.config
    }

    pub fn catalog(&self) -> &Catalog {
        self.inner.controller.catalog()
    }

    /// Starts a conversation under a fresh id.
    pub async fn start(&self) -> Result<ConversationSession> {
        self.start_with_id(&Uuid::new_v4().to_string()).await
    }

    /// Starts a conversation under `session_id`. An existing conversation
    /// with that id is reset instead.
    pub async fn start_with_id(&self, session_id: &str) -> Result<ConversationSession> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        if let Some(existing) = self.inner.storage.get(session_id).await? {
            return self.reset_locked(existing).await;
        }

        let (session, transition) = self.inner.controller.start(session_id);
        self.inner.scheduler.open(session.id(), session.generation());
        self.inner.storage.save(session.clone()).await?;
        self.apply(&session, transition, None);
        Ok(session)
    }

    /// Handles one user input.
    ///
    /// Fails with [`FlowError::InputDisabled`] while messages are still being
    /// delivered or a backend call is outstanding. A rejected input still
    /// returns `Ok`, with `accepted == false` on the transition.
    pub async fn submit(&self, session_id: &str, input: &str) -> Result<Transition> {
        let lock = self.lock_existing(session_id).await?;
        let _guard = lock.lock().await;

        let mut session = self.load_locked(session_id, &lock).await?;
        if !self.inner.scheduler.input_enabled(session_id) {
            debug!(session_id = %session_id, stage = %session.stage(), "Input while disabled");
            return Err(FlowError::InputDisabled(session_id.to_string()));
        }

        let transition = self.inner.controller.submit(&mut session, input);
        if transition.accepted {
            self.inner.storage.save(session.clone()).await?;
        } else {
            debug!(session_id = %session_id, stage = %session.stage(), "Input rejected");
        }
        self.apply(&session, transition.clone(), Some(Message::user(input)));
        Ok(transition)
    }

    /// Abandons the conversation and starts over at the greeting. Pending
    /// messages are dropped and late backend results are ignored.
    pub async fn reset(&self, session_id: &str) -> Result<ConversationSession> {
        let lock = self.lock_existing(session_id).await?;
        let _guard = lock.lock().await;

        let session = self.load_locked(session_id, &lock).await?;
        self.reset_locked(session).await
    }

    /// Deletes the conversation and frees its queue and lock. Backend results
    /// still in flight are dropped when they come back.
    pub async fn end(&self, session_id: &str) -> Result<()> {
        let lock = self.lock_existing(session_id).await?;
        let _guard = lock.lock().await;

        self.load_locked(session_id, &lock).await?;
        self.inner.storage.delete(session_id).await?;
        self.inner.scheduler.cancel(session_id);
        self.release_lock(session_id, &lock);
        info!(session_id = %session_id, "Conversation ended");
        Ok(())
    }

    pub async fn snapshot(&self, session_id: &str) -> Result<SessionSnapshot> {
        let session = self.load(session_id).await?;
        Ok(SessionSnapshot {
            input: self.inner.scheduler.signal(session_id),
            session,
        })
    }

    /// Messages delivered so far for the current conversation.
    pub fn transcript(&self, session_id: &str) -> Vec<Message> {
        self.inner.scheduler.transcript(session_id)
    }

    pub fn input_enabled(&self, session_id: &str) -> bool {
        self.inner.scheduler.input_enabled(session_id)
    }

    pub fn subscribe_input(&self, session_id: &str) -> Option<watch::Receiver<InputSignal>> {
        self.inner.scheduler.subscribe(session_id)
    }

    /// Resolves once every queued message is delivered and no backend call
    /// is outstanding.
    pub async fn wait_idle(&self, session_id: &str) {
        self.inner.scheduler.wait_idle(session_id).await
    }

    pub async fn leads(&self) -> Result<Vec<FinalizationRecord>> {
        self.inner.leads.list().await
    }

    fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.inner
            .locks
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    /// Lock for a session that exists. Unknown ids never get an entry.
    async fn lock_existing(&self, session_id: &str) -> Result<Arc<Mutex<()>>> {
        let existing = self.inner.locks.get(session_id).map(|lock| lock.clone());
        if let Some(lock) = existing {
            return Ok(lock);
        }
        if self.inner.storage.get(session_id).await?.is_none() {
            return Err(FlowError::SessionNotFound(session_id.to_string()));
        }
        Ok(self.lock_for(session_id))
    }

    /// Drops the lock entry unless someone else is waiting on it.
    fn release_lock(&self, session_id: &str, lock: &Arc<Mutex<()>>) {
        self.inner.locks.remove_if(session_id, |_, held| {
            Arc::ptr_eq(held, lock) && Arc::strong_count(held) <= 2
        });
    }

    /// Loads under `lock`. A session that vanished while we waited takes its
    /// lock entry with it.
    async fn load_locked(
        &self,
        session_id: &str,
        lock: &Arc<Mutex<()>>,
    ) -> Result<ConversationSession> {
        let loaded = self.load(session_id).await;
        if let Err(FlowError::SessionNotFound(_)) = &loaded {
            self.release_lock(session_id, lock);
        }
        loaded
    }

    async fn load(&self, session_id: &str) -> Result<ConversationSession> {
        self.inner
            .storage
            .get(session_id)
            .await?
            .ok_or_else(|| FlowError::SessionNotFound(session_id.to_string()))
    }

    /// Caller holds the session lock.
    async fn reset_locked(&self, session: ConversationSession) -> Result<ConversationSession> {
        let (fresh, transition) = self.inner.controller.reset(&session);
        self.inner.scheduler.cancel(fresh.id());
        self.inner.scheduler.open(fresh.id(), fresh.generation());
        self.inner.storage.save(fresh.clone()).await?;
        self.apply(&fresh, transition, None);
        Ok(fresh)
    }

    /// Schedules a step's messages, then its effect and hand-off.
    fn apply(&self, session: &ConversationSession, transition: Transition, echo: Option<Message>) {
        let id = session.id();
        let generation = session.generation();

        self.inner.scheduler.ensure_open(id, generation);
        // taken before anything is queued so input never reads as enabled
        // between the last message and the backend call
        let hold = transition
            .effect
            .as_ref()
            .and_then(|_| self.inner.scheduler.hold(id));

        let messages: Vec<Message> = echo.into_iter().chain(transition.messages).collect();
        self.inner.scheduler.enqueue(id, generation, messages);

        if let Some(effect) = transition.effect {
            self.spawn_effect(id, generation, effect, hold);
        }
        if let Some(record) = transition.finalized {
            self.spawn_handoff(record);
        }
    }

    fn spawn_effect(
        &self,
        session_id: &str,
        generation: u64,
        effect: Effect,
        hold: Option<HoldGuard>,
    ) {
        let runner = self.clone();
        let session_id = session_id.to_string();
        let span = tracing::info_span!("effect", session_id = %session_id, generation);

        tokio::spawn(
            async move {
                let _hold = hold;
                if let Err(e) = runner.run_effect(&session_id, generation, effect).await {
                    warn!(error = %e, "Effect completion failed");
                }
            }
            .instrument(span),
        );
    }

    async fn run_effect(&self, session_id: &str, generation: u64, effect: Effect) -> Result<()> {
        let inner = &self.inner;
        match effect {
            Effect::RequestOffers { product, answers } => {
                info!(product = %product, "Requesting offers");
                let result = self
                    .with_timeout(inner.backend.request_offers(
                        product,
                        &answers,
                        inner.controller.offer_count(),
                    ))
                    .await;
                self.complete(session_id, generation, |controller, session| {
                    controller.offers_ready(session, result)
                })
                .await
            }
            Effect::SubmitDocument { product, slot } => {
                info!(product = %product, slot = %slot.id, "Submitting document");
                let result = self
                    .with_timeout(inner.backend.submit_document(session_id, product, &slot))
                    .await;
                self.complete(session_id, generation, |controller, session| {
                    controller.document_submitted(session, result)
                })
                .await
            }
        }
    }

    async fn with_timeout<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        let limit = self.inner.config.backend_timeout;
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(FlowError::BackendTimeout(limit)),
        }
    }

    /// Feeds an effect result back into the session it was started for.
    async fn complete<F>(&self, session_id: &str, generation: u64, step: F) -> Result<()>
    where
        F: FnOnce(&FlowController, &mut ConversationSession) -> Transition,
    {
        let lock = match self.lock_existing(session_id).await {
            Ok(lock) => lock,
            Err(FlowError::SessionNotFound(_)) => {
                debug!("Session gone before effect completed");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let _guard = lock.lock().await;

        let mut session = match self.load_locked(session_id, &lock).await {
            Ok(session) => session,
            Err(FlowError::SessionNotFound(_)) => {
                debug!("Session gone before effect completed");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if session.generation() != generation {
            info!(
                current_generation = session.generation(),
                "Dropping result for superseded conversation"
            );
            return Ok(());
        }

        let transition = step(&self.inner.controller, &mut session);
        if transition.accepted {
            self.inner.storage.save(session.clone()).await?;
        }
        self.apply(&session, transition, None);
        Ok(())
    }

    /// Fire and forget: a failed save is logged and not retried.
    fn spawn_handoff(&self, record: FinalizationRecord) {
        let leads = self.inner.leads.clone();
        let span = tracing::info_span!("handoff", session_id = %record.session_id);
        tokio::spawn(
            async move {
                let offer_id = record.selected_offer.id;
                match leads.save(record).await {
                    Ok(()) => info!(offer_id = %offer_id, "Lead handed off"),
                    Err(e) => warn!(error = %e, "Lead hand-off failed"),
                }
            }
            .instrument(span),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::Stage;
    use crate::tasks::START_OPTION;

    fn runner() -> ConversationRunner {
        ConversationRunner::in_memory(Arc::new(Catalog::default()), FlowConfig::instant()).unwrap()
    }

    #[tokio::test]
    async fn start_delivers_greeting() {
        let runner = runner();
        let session = runner.start().await.unwrap();
        runner.wait_idle(session.id()).await;

        let transcript = runner.transcript(session.id());
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].options, vec![START_OPTION.to_string()]);
        assert!(runner.input_enabled(session.id()));
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let runner = runner();
        assert!(matches!(
            runner.submit("missing", "start").await,
            Err(FlowError::SessionNotFound(_))
        ));
        assert!(matches!(
            runner.reset("missing").await,
            Err(FlowError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn rejected_input_is_echoed_but_not_saved() {
        let runner = runner();
        let session = runner.start_with_id("s1").await.unwrap();
        runner.wait_idle("s1").await;

        let t = runner.submit("s1", "hello?").await.unwrap();
        assert!(!t.accepted);
        runner.wait_idle("s1").await;

        let snapshot = runner.snapshot("s1").await.unwrap();
        assert_eq!(snapshot.session, session);
        assert_eq!(snapshot.input, InputSignal::IDLE);
        let transcript = runner.transcript("s1");
        assert_eq!(transcript[1].content, "hello?");
    }

    #[tokio::test]
    async fn starting_an_existing_id_resets_it() {
        let runner = runner();
        runner.start_with_id("s1").await.unwrap();
        runner.wait_idle("s1").await;
        runner.submit("s1", START_OPTION).await.unwrap();
        runner.wait_idle("s1").await;

        let session = runner.start_with_id("s1").await.unwrap();
        assert_eq!(session.generation(), 1);
        assert_eq!(session.stage(), Stage::Greeting);
    }

    #[tokio::test]
    async fn unknown_ids_leave_no_lock_or_queue_behind() {
        let runner = runner();
        for i in 0..500 {
            let id = format!("missing-{i}");
            assert!(runner.submit(&id, "start").await.is_err());
            assert!(runner.reset(&id).await.is_err());
            assert!(runner.end(&id).await.is_err());
        }
        assert_eq!(runner.inner.locks.len(), 0);
        assert_eq!(runner.inner.scheduler.session_count(), 0);
    }

    #[tokio::test]
    async fn ending_a_session_frees_its_lock_and_queue() {
        let runner = runner();
        runner.start_with_id("s1").await.unwrap();
        runner.start_with_id("s2").await.unwrap();
        runner.wait_idle("s1").await;
        runner.submit("s1", START_OPTION).await.unwrap();
        runner.wait_idle("s1").await;
        assert_eq!(runner.inner.locks.len(), 2);
        assert_eq!(runner.inner.scheduler.session_count(), 2);

        runner.end("s1").await.unwrap();
        assert_eq!(runner.inner.locks.len(), 1);
        assert_eq!(runner.inner.scheduler.session_count(), 1);
        assert!(runner.transcript("s1").is_empty());
        assert!(matches!(
            runner.snapshot("s1").await,
            Err(FlowError::SessionNotFound(_))
        ));
        assert!(matches!(
            runner.end("s1").await,
            Err(FlowError::SessionNotFound(_))
        ));

        // the id can be reused
        let session = runner.start_with_id("s1").await.unwrap();
        assert_eq!(session.generation(), 0);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let config = FlowConfig {
            offer_count: 0,
            ..FlowConfig::instant()
        };
        assert!(ConversationRunner::in_memory(Arc::new(Catalog::default()), config).is_err());
    }
}
