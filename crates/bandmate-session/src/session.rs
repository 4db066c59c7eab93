//! Session authority: owns the context, directory, and tick loop.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use bandmate_core::{
    Agent, AgentId, Bus, DeliveryError, Message, MusicalContext, Outbox, OutputStore, SessionState,
};
use futures::{StreamExt, stream::BoxStream};
use tokio::{
    sync::broadcast,
    time::{Instant, MissedTickBehavior},
};
use tokio_stream::wrappers::BroadcastStream;

use crate::{
    config::{BandConfig, SessionSettings},
    cue::Cue,
    directory::Directory,
    error::SessionError,
    router::{DeliveryReport, Router},
};

/// Context updates buffered per subscriber before it starts lagging.
const CONTEXT_FEED_CAPACITY: usize = 64;

/// Summary of one tick.
#[derive(Debug, Default)]
pub struct TickReport {
    pub tick: u64,
    pub bar: u64,
    /// Handlers that completed during the tick.
    pub deliveries: usize,
    /// Failed deliveries and failed `on_context` calls.
    pub failures: Vec<DeliveryError>,
    /// Messages discarded by an exhausted settle budget.
    pub dropped: usize,
}

impl TickReport {
    fn absorb(&mut self, report: DeliveryReport) {
        self.deliveries += report.delivered;
        self.failures.extend(report.failures);
        self.dropped += report.dropped;
    }
}

/// Cloneable control handle, usable from other threads and from agents.
#[derive(Clone)]
pub struct SessionHandle {
    bus: Arc<Bus>,
    cues: Arc<Mutex<VecDeque<Cue>>>,
    contexts: broadcast::Sender<MusicalContext>,
}

impl SessionHandle {
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.bus.state()
    }

    /// Stop the session. No-op unless running.
    pub fn stop(&self) {
        if self.bus.transition(SessionState::Running, SessionState::Stopped) {
            tracing::debug!("Session stopped");
        }
    }

    /// Queue a cue for the next tick.
    pub fn cue(&self, cue: Cue) {
        self.cues
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(cue);
    }

    /// Receive the context once per tick, right after it advances.
    #[must_use]
    pub fn subscribe_context(&self) -> broadcast::Receiver<MusicalContext> {
        self.contexts.subscribe()
    }

    /// Context updates as a stream. Updates missed by a lagging reader are
    /// skipped.
    #[must_use]
    pub fn context_stream(&self) -> BoxStream<'static, MusicalContext> {
        BroadcastStream::new(self.subscribe_context())
            .filter_map(|res| async move { res.ok() })
            .boxed()
    }
}

/// Central clock and coordinator for one session.
///
/// Per tick: apply cues, advance the context, then hand the context to each
/// agent in registration order, settling every message that agent caused
/// before moving on to the next.
pub struct SessionAuthority {
    bus: Arc<Bus>,
    directory: Directory,
    context: MusicalContext,
    cues: Arc<Mutex<VecDeque<Cue>>>,
    contexts: broadcast::Sender<MusicalContext>,
    period: Duration,
    settle_limit: usize,
}

impl Default for SessionAuthority {
    fn default() -> Self {
        Self::new(
            &SessionSettings::default(),
            MusicalContext::default(),
            Arc::new(OutputStore::default()),
        )
    }
}

impl SessionAuthority {
    /// Create an idle session.
    #[must_use]
    pub fn new(settings: &SessionSettings, context: MusicalContext, outputs: Arc<OutputStore>) -> Self {
        Self {
            bus: Arc::new(Bus::new(outputs)),
            directory: Directory::new(),
            context,
            cues: Arc::new(Mutex::new(VecDeque::new())),
            contexts: broadcast::channel(CONTEXT_FEED_CAPACITY).0,
            period: settings.period(),
            settle_limit: settings.settle_limit,
        }
    }

    /// Create an idle session from a loaded configuration.
    #[must_use]
    pub fn from_config(config: &BandConfig) -> Self {
        Self::new(
            &config.session,
            config.context.to_context(),
            Arc::new(OutputStore::new(config.outputs.history_limit)),
        )
    }

    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            bus: Arc::clone(&self.bus),
            cues: Arc::clone(&self.cues),
            contexts: self.contexts.clone(),
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.bus.state()
    }

    /// Current context. Read-only outside the session.
    #[must_use]
    pub const fn context(&self) -> &MusicalContext {
        &self.context
    }

    #[must_use]
    pub fn outputs(&self) -> Arc<OutputStore> {
        Arc::clone(self.bus.outputs())
    }

    /// `Idle -> Running`. Starting a running session is a no-op.
    ///
    /// # Errors
    /// Returns [`SessionError::Terminated`] if the session was stopped.
    pub fn start(&mut self) -> Result<(), SessionError> {
        match self.bus.state() {
            SessionState::Running => Ok(()),
            SessionState::Stopped => Err(SessionError::Terminated),
            SessionState::Idle => {
                self.bus.transition(SessionState::Idle, SessionState::Running);
                tracing::debug!(agents = self.directory.len(), "Session started");
                Ok(())
            }
        }
    }

    /// `Running -> Stopped`. No-op in any other state.
    pub fn stop(&mut self) {
        self.handle().stop();
    }

    /// Register an agent and attach its outbox.
    ///
    /// # Errors
    /// Returns [`SessionError::DuplicateAgent`] if the id is already taken.
    pub fn register_agent(&mut self, mut agent: Box<dyn Agent>) -> Result<(), SessionError> {
        let id = agent.id().clone();
        if self.directory.contains(&id) {
            return Err(SessionError::DuplicateAgent(id));
        }
        agent.attach(Outbox::new(id.clone(), Arc::clone(&self.bus)));
        self.directory.register(agent)?;
        tracing::debug!(agent = %id, "Registered agent");
        Ok(())
    }

    /// Convenience for [`SessionAuthority::register_agent`].
    ///
    /// # Errors
    /// Returns [`SessionError::DuplicateAgent`] if the id is already taken.
    pub fn register<A: Agent>(&mut self, agent: A) -> Result<(), SessionError> {
        self.register_agent(Box::new(agent))
    }

    /// Remove an agent and its subscriptions. Later messages to it fail as
    /// recipient-not-found.
    pub fn unregister_agent(&mut self, id: &AgentId) -> Option<Box<dyn Agent>> {
        let removed = self.directory.unregister(id)?;
        self.bus.with_topics(|topics| topics.remove_agent(id));
        tracing::debug!(agent = %id, "Unregistered agent");
        Some(removed)
    }

    #[must_use]
    pub fn agent_ids(&self) -> Vec<AgentId> {
        self.directory.ids()
    }

    #[must_use]
    pub fn contains_agent(&self, id: &AgentId) -> bool {
        self.directory.contains(id)
    }

    /// Typed read-only view of a registered agent.
    #[must_use]
    pub fn inspect<A: Agent>(&self, id: &AgentId) -> Option<&A> {
        self.directory.get(id)?.as_any().downcast_ref::<A>()
    }

    pub fn subscribe(&self, agent: &AgentId, topic: &str) {
        self.bus.with_topics(|topics| topics.subscribe(agent, topic));
    }

    pub fn unsubscribe(&self, agent: &AgentId, topic: &str) {
        self.bus.with_topics(|topics| topics.unsubscribe(agent, topic));
    }

    fn ensure_running(&self) -> Result<(), SessionError> {
        match self.bus.state() {
            SessionState::Running => Ok(()),
            state => Err(SessionError::NotRunning(state)),
        }
    }

    fn router(&mut self) -> Router<'_> {
        Router::new(&mut self.directory, &self.bus, self.settle_limit)
    }

    /// Deliver `message` to its destination and settle any replies.
    ///
    /// # Errors
    /// Returns [`SessionError::NotRunning`] outside the running state.
    pub fn route(&mut self, message: &Message) -> Result<DeliveryReport, SessionError> {
        self.ensure_running()?;
        let mut router = self.router();
        let mut report = router.route(message);
        report.merge(router.settle());
        Ok(report)
    }

    /// Deliver `message` to the subscribers of `topic` and settle any replies.
    ///
    /// # Errors
    /// Returns [`SessionError::NotRunning`] outside the running state.
    pub fn publish(&mut self, topic: &str, message: &Message) -> Result<DeliveryReport, SessionError> {
        self.ensure_running()?;
        let mut router = self.router();
        let mut report = router.publish(topic, message);
        report.merge(router.settle());
        Ok(report)
    }

    /// Run one tick of the nominal period.
    ///
    /// # Errors
    /// Returns [`SessionError::NotRunning`] outside the running state.
    pub fn tick(&mut self) -> Result<TickReport, SessionError> {
        self.tick_elapsed(self.period)
    }

    /// Run one tick covering `elapsed` wall time.
    ///
    /// # Errors
    /// Returns [`SessionError::NotRunning`] outside the running state.
    pub fn tick_elapsed(&mut self, elapsed: Duration) -> Result<TickReport, SessionError> {
        self.ensure_running()?;

        self.apply_cues();
        self.context.advance(elapsed);
        self.bus.set_tick(self.context.tick);

        let context = self.context.clone();
        let _ = self.contexts.send(context.clone()); // no subscribers is fine

        let mut report = TickReport {
            tick: context.tick,
            bar: context.bar_position,
            ..TickReport::default()
        };

        for id in self.directory.ids() {
            if !self.bus.is_running() {
                break;
            }
            if let Some(agent) = self.directory.get_mut(&id) {
                if let Err(source) = agent.on_context(&context) {
                    tracing::warn!(agent = %id, tick = context.tick, error = %source, "Context handler failed");
                    report.failures.push(DeliveryError::Handler { agent: id.clone(), source });
                }
            }
            report.absorb(self.router().settle());
        }

        tracing::trace!(
            tick = report.tick,
            bar = report.bar,
            deliveries = report.deliveries,
            failures = report.failures.len(),
            dropped = report.dropped,
            "Tick complete"
        );
        Ok(report)
    }

    fn apply_cues(&mut self) {
        let cues: Vec<Cue> = self
            .cues
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .drain(..)
            .collect();
        for cue in cues {
            tracing::debug!(?cue, "Applying cue");
            cue.apply(&mut self.context);
        }
    }

    /// Drive ticks from a tokio interval until the session stops.
    ///
    /// Each tick advances the context by the measured elapsed time. Returns
    /// the number of ticks run.
    ///
    /// # Errors
    /// Returns [`SessionError::NotRunning`] if called before `start()`.
    pub async fn run(&mut self) -> Result<u64, SessionError> {
        self.ensure_running()?;

        let bus = Arc::clone(&self.bus);
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval.tick().await;

        let mut last = Instant::now();
        let mut ticks = 0u64;
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                () = bus.state_changed() => {}
            }
            if !bus.is_running() {
                break;
            }

            let now = Instant::now();
            match self.tick_elapsed(now - last) {
                Ok(_) => ticks += 1,
                Err(SessionError::NotRunning(_)) => break,
                Err(e) => return Err(e),
            }
            last = now;
        }

        tracing::debug!(ticks, "Clock loop finished");
        Ok(ticks)
    }
}
