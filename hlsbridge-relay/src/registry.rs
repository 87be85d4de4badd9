// Relay registry: stream id -> actor handle
//
// Exactly one live actor exists per stream id. Spawning happens inside a DashMap
// entry guard, which never spans an await, so concurrent first requests for the
// same id end up talking to the same actor.

use std::future::Future;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use hlsbridge_core::config::{Config, RelayConfig};
use hlsbridge_core::models::RelaySessionState;
use hlsbridge_core::store::SessionStore;

use crate::actor::{FinalStats, RelayActor, RelayHandle, StartOutcome, StartRequest, StatusSnapshot, TickReport};
use crate::destination::{DestinationClient, DestinationCredentials};
use crate::error::{RelayError, RelayResult};
use crate::source::SourceClient;

/// Dependencies shared by every relay actor
pub struct RelayContext {
    pub store: Arc<dyn SessionStore>,
    pub source: SourceClient,
    pub destination: DestinationClient,
    pub config: RelayConfig,
    /// Used when a start request carries no credentials
    pub default_credentials: Option<DestinationCredentials>,
}

impl RelayContext {
    /// Build clients and defaults from the application configuration.
    pub fn from_config(config: &Config, store: Arc<dyn SessionStore>) -> RelayResult<Self> {
        let timeout = config.relay.request_timeout();
        let default_credentials = match (&config.destination.token_id, &config.destination.token_secret) {
            (Some(token_id), Some(token_secret)) => Some(DestinationCredentials {
                token_id: token_id.clone(),
                token_secret: token_secret.clone(),
            }),
            _ => None,
        };

        Ok(Self {
            store,
            source: SourceClient::new(timeout)?,
            destination: DestinationClient::new(&config.destination, timeout)?,
            config: config.relay.clone(),
            default_credentials,
        })
    }
}

pub struct RelayRegistry {
    ctx: Arc<RelayContext>,
    actors: DashMap<String, RelayHandle>,
    /// Spawned actor tasks
    tasks: Mutex<JoinSet<()>>,
    cancel_token: CancellationToken,
}

impl RelayRegistry {
    #[must_use]
    pub fn new(ctx: RelayContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            actors: DashMap::new(),
            tasks: Mutex::new(JoinSet::new()),
            cancel_token: CancellationToken::new(),
        }
    }

    pub async fn start(&self, stream_id: &str, request: StartRequest) -> RelayResult<StartOutcome> {
        validate_stream_id(stream_id)?;
        let result = match self.get_or_spawn(stream_id).await?.start(request.clone()).await {
            // Reached an actor that retired after another caller's failed start
            Err(RelayError::ActorUnavailable(_)) => {
                self.get_or_spawn(stream_id).await?.start(request).await
            }
            other => other,
        };
        if result.is_err() {
            self.forget_retired(stream_id);
        }
        result
    }

    pub async fn status(&self, stream_id: &str) -> RelayResult<StatusSnapshot> {
        self.with_existing(stream_id, |actor| async move { actor.status().await })
            .await
    }

    pub async fn stop(&self, stream_id: &str) -> RelayResult<FinalStats> {
        self.with_existing(stream_id, |actor| async move { actor.stop().await })
            .await
    }

    /// Tick a stream immediately
    pub async fn tick(&self, stream_id: &str) -> RelayResult<TickReport> {
        self.with_existing(stream_id, |actor| async move { actor.tick().await })
            .await
    }

    /// Run `op` against the actor of an existing stream, looking it up again
    /// once if the actor retired between lookup and send.
    async fn with_existing<T, F, Fut>(&self, stream_id: &str, op: F) -> RelayResult<T>
    where
        F: Fn(RelayHandle) -> Fut,
        Fut: Future<Output = RelayResult<T>>,
    {
        match op(self.lookup(stream_id).await?).await {
            Err(RelayError::ActorUnavailable(_)) => op(self.lookup(stream_id).await?).await,
            other => other,
        }
    }

    /// Actor for `stream_id`, spawned (from its stored record, if any) when missing.
    pub async fn get_or_spawn(&self, stream_id: &str) -> RelayResult<RelayHandle> {
        if let Some(handle) = self.live_handle(stream_id) {
            return Ok(handle);
        }
        let state = self.ctx.store.load(stream_id).await?;
        Ok(self.insert_actor(stream_id, state))
    }

    /// Actor for an existing stream; `NotFound` if the stream was never started.
    pub async fn lookup(&self, stream_id: &str) -> RelayResult<RelayHandle> {
        if let Some(handle) = self.live_handle(stream_id) {
            return Ok(handle);
        }
        let state = self
            .ctx
            .store
            .load(stream_id)
            .await?
            .ok_or_else(|| RelayError::NotFound(stream_id.to_string()))?;
        Ok(self.insert_actor(stream_id, Some(state)))
    }

    /// Spawn actors for every stored active session. Returns how many were resumed.
    pub async fn resume_active(&self) -> RelayResult<usize> {
        let ids = self.ctx.store.list_active().await?;
        let mut resumed = 0;
        for stream_id in ids {
            match self.get_or_spawn(&stream_id).await {
                Ok(_) => resumed += 1,
                Err(e) => warn!(stream_id = %stream_id, error = %e, "Failed to resume relay session"),
            }
        }
        if resumed > 0 {
            info!(resumed, "Resumed active relay sessions");
        }
        Ok(resumed)
    }

    /// Number of actors currently held
    #[must_use]
    pub fn actor_count(&self) -> usize {
        self.actors.len()
    }

    /// Stop every actor loop and wait for them to exit.
    ///
    /// Sessions are left untouched in the store so the next process resumes them.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        info!(actors = tasks.len(), "Shutting down relay actors");
        while let Some(result) = tasks.join_next().await {
            log_task_exit(result);
        }
        self.actors.clear();
    }

    /// Drop the entry of an actor that exited without ever owning a session.
    fn forget_retired(&self, stream_id: &str) {
        if self.actors.remove_if(stream_id, |_, handle| handle.is_closed()).is_some() {
            debug!(stream_id, "Removed relay actor left by a failed start");
        }
    }

    fn live_handle(&self, stream_id: &str) -> Option<RelayHandle> {
        self.actors
            .get(stream_id)
            .map(|entry| entry.value().clone())
            .filter(|handle| !handle.is_closed())
    }

    fn insert_actor(&self, stream_id: &str, state: Option<RelaySessionState>) -> RelayHandle {
        match self.actors.entry(stream_id.to_string()) {
            Entry::Occupied(mut entry) => {
                if !entry.get().is_closed() {
                    // Another request spawned it while we were loading
                    return entry.get().clone();
                }
                let handle = self.spawn_actor(stream_id, state);
                entry.insert(handle.clone());
                handle
            }
            Entry::Vacant(entry) => {
                let handle = self.spawn_actor(stream_id, state);
                entry.insert(handle.clone());
                handle
            }
        }
    }

    fn spawn_actor(&self, stream_id: &str, state: Option<RelaySessionState>) -> RelayHandle {
        let (actor, handle) = RelayActor::new(
            stream_id.to_string(),
            Arc::clone(&self.ctx),
            state,
            self.cancel_token.child_token(),
        );
        let span = tracing::info_span!("relay_actor", stream_id = %stream_id);

        let mut tasks = self.tasks.lock();
        // Reap actors that already exited
        while let Some(result) = tasks.try_join_next() {
            log_task_exit(result);
        }
        tasks.spawn(actor.run().instrument(span));
        handle
    }
}

fn log_task_exit(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        if !e.is_cancelled() {
            error!("Relay actor task panicked: {}", e);
        }
    }
}

fn validate_stream_id(stream_id: &str) -> RelayResult<()> {
    if stream_id.trim().is_empty() {
        return Err(RelayError::InvalidRequest("Stream ID required".to_string()));
    }
    if stream_id.len() > 256 || stream_id.chars().any(char::is_control) {
        return Err(RelayError::InvalidRequest("Stream ID is malformed".to_string()));
    }
    Ok(())
}
