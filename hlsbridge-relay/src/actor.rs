// Relay actor: the single execution unit of one stream id.
//
// The actor task owns the stream's `RelaySessionState`. Control commands and the
// scheduled tick are handled from the same `select!` loop, so start, status, stop
// and tick never overlap for a stream id and no lock guards the state.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use hlsbridge_core::config::RelayConfig;
use hlsbridge_core::models::{RelaySessionState, SessionStatus};

use crate::destination::DestinationCredentials;
use crate::error::{RelayError, RelayResult};
use crate::playlist::{parse_media_playlist, MediaPlaylist, SegmentRef};
use crate::registry::RelayContext;

/// Parameters of a `start` call
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub source_manifest_url: String,
    pub destination_stream_key: String,
    pub credentials: Option<DestinationCredentials>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOutcome {
    pub started_at: DateTime<Utc>,
    pub destination_upload_id: String,
    /// The session was already running; nothing was created
    pub already_active: bool,
}

/// Read-only view of a session for `status`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub is_active: bool,
    pub state: SessionStatus,
    pub uptime_seconds: i64,
    pub segments_transferred: u64,
    pub bytes_transferred: u64,
    #[serde(rename = "sourceManifestURL")]
    pub source_manifest_url: String,
    pub destination_upload_id: String,
    pub destination_stream_key_masked: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalStats {
    pub segments_transferred: u64,
    pub bytes_transferred: u64,
    pub uptime_seconds: i64,
}

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// False when the session was not active and the tick did nothing
    pub ran: bool,
    pub manifest_failed: bool,
    /// Segments in the manifest not yet processed
    pub new_segments: usize,
    pub transferred: usize,
    pub failed: usize,
    /// New segments left for a later tick by the per-tick cap
    pub deferred: usize,
}

pub(crate) enum RelayCommand {
    Start {
        request: StartRequest,
        reply: oneshot::Sender<RelayResult<StartOutcome>>,
    },
    Status {
        reply: oneshot::Sender<RelayResult<StatusSnapshot>>,
    },
    Stop {
        reply: oneshot::Sender<RelayResult<FinalStats>>,
    },
    Tick {
        reply: oneshot::Sender<RelayResult<TickReport>>,
    },
}

/// Sending side of a relay actor's mailbox
#[derive(Clone)]
pub struct RelayHandle {
    stream_id: Arc<str>,
    sender: mpsc::Sender<RelayCommand>,
}

impl RelayHandle {
    #[must_use]
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// The actor task has exited
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub async fn start(&self, request: StartRequest) -> RelayResult<StartOutcome> {
        self.request(|reply| RelayCommand::Start { request, reply })
            .await
    }

    pub async fn status(&self) -> RelayResult<StatusSnapshot> {
        self.request(|reply| RelayCommand::Status { reply }).await
    }

    pub async fn stop(&self) -> RelayResult<FinalStats> {
        self.request(|reply| RelayCommand::Stop { reply }).await
    }

    /// Run a tick now, outside the schedule
    pub async fn tick(&self) -> RelayResult<TickReport> {
        self.request(|reply| RelayCommand::Tick { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<RelayResult<T>>) -> RelayCommand,
    ) -> RelayResult<T> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(command(reply))
            .await
            .map_err(|_| RelayError::ActorUnavailable(self.stream_id.to_string()))?;
        response
            .await
            .map_err(|_| RelayError::ActorUnavailable(self.stream_id.to_string()))?
    }
}

pub(crate) struct RelayActor {
    stream_id: String,
    ctx: Arc<RelayContext>,
    mailbox: mpsc::Receiver<RelayCommand>,
    /// `None` until the first successful start
    state: Option<RelaySessionState>,
    next_tick: Option<Instant>,
    cancel_token: CancellationToken,
    /// Set after a failed first start; the loop exits after the reply
    retired: bool,
}

impl RelayActor {
    /// Create an actor for `stream_id` with its stored record, if any.
    ///
    /// An active record resumes ticking one interval after the actor starts running.
    pub(crate) fn new(
        stream_id: String,
        ctx: Arc<RelayContext>,
        state: Option<RelaySessionState>,
        cancel_token: CancellationToken,
    ) -> (Self, RelayHandle) {
        let (sender, mailbox) = mpsc::channel(ctx.config.mailbox_capacity.max(1));
        let handle = RelayHandle {
            stream_id: Arc::from(stream_id.as_str()),
            sender,
        };
        let next_tick = state
            .as_ref()
            .filter(|s| s.is_active())
            .map(|_| Instant::now() + ctx.config.tick_interval());
        let actor = Self {
            stream_id,
            ctx,
            mailbox,
            state,
            next_tick,
            cancel_token,
            retired: false,
        };
        (actor, handle)
    }

    pub(crate) async fn run(mut self) {
        debug!(stream_id = %self.stream_id, "Relay actor started");

        loop {
            let tick_at = self.next_tick;

            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => {
                    debug!(stream_id = %self.stream_id, "Relay actor cancelled");
                    break;
                }

                command = self.mailbox.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => break,
                    }
                    if self.retired {
                        break;
                    }
                }

                () = wait_until(tick_at) => {
                    self.next_tick = None;
                    if let Err(e) = self.tick().await {
                        error!(stream_id = %self.stream_id, error = %e, "Scheduled tick failed");
                    }
                }
            }
        }

        debug!(stream_id = %self.stream_id, "Relay actor exited");
    }

    async fn handle_command(&mut self, command: RelayCommand) {
        // A dropped receiver only means the caller went away
        match command {
            RelayCommand::Start { request, reply } => {
                let result = self.start(request).await;
                if result.is_err() && self.state.is_none() && self.mailbox.is_empty() {
                    // Nothing to own. Closing before the reply lets the registry
                    // see the handle as closed and drop it.
                    self.mailbox.close();
                    self.retired = true;
                }
                let _ = reply.send(result);
            }
            RelayCommand::Status { reply } => {
                let _ = reply.send(self.status());
            }
            RelayCommand::Stop { reply } => {
                let _ = reply.send(self.stop().await);
            }
            RelayCommand::Tick { reply } => {
                let _ = reply.send(self.tick().await);
            }
        }
    }

    async fn start(&mut self, request: StartRequest) -> RelayResult<StartOutcome> {
        if let Some(state) = &self.state {
            if state.is_active() {
                info!(stream_id = %self.stream_id, "Start on active session ignored");
                return Ok(StartOutcome {
                    started_at: state.started_at,
                    destination_upload_id: state.destination_upload_id.clone(),
                    already_active: true,
                });
            }
            return Err(RelayError::SessionEnded(self.stream_id.clone()));
        }

        let manifest_url = Url::parse(&request.source_manifest_url).map_err(|e| {
            RelayError::InvalidRequest(format!("sourceManifestURL is not a valid URL: {e}"))
        })?;
        if !matches!(manifest_url.scheme(), "http" | "https") {
            return Err(RelayError::InvalidRequest(
                "sourceManifestURL must be an http(s) URL".to_string(),
            ));
        }
        if request.destination_stream_key.is_empty() {
            return Err(RelayError::InvalidRequest(
                "destinationStreamKey required".to_string(),
            ));
        }
        let credentials = request
            .credentials
            .or_else(|| self.ctx.default_credentials.clone())
            .ok_or_else(|| {
                RelayError::InvalidRequest("destinationCredentials required".to_string())
            })?;

        let upload = self
            .ctx
            .destination
            .create_upload(&request.destination_stream_key, &credentials)
            .await
            .inspect_err(|e| {
                error!(stream_id = %self.stream_id, error = %e, "Failed to create destination upload");
            })?;

        let state = RelaySessionState::new(
            self.stream_id.clone(),
            manifest_url.to_string(),
            request.destination_stream_key,
            upload.id,
            upload.url,
            self.ctx.config.dedup_window,
        );
        self.ctx.store.save(&state).await?;

        info!(
            stream_id = %self.stream_id,
            upload_id = %state.destination_upload_id,
            source = %state.source_manifest_url,
            "Relay session started"
        );

        let outcome = StartOutcome {
            started_at: state.started_at,
            destination_upload_id: state.destination_upload_id.clone(),
            already_active: false,
        };
        self.state = Some(state);
        self.schedule_next_tick();
        Ok(outcome)
    }

    fn status(&self) -> RelayResult<StatusSnapshot> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| RelayError::NotFound(self.stream_id.clone()))?;

        Ok(StatusSnapshot {
            is_active: state.is_active(),
            state: state.status,
            uptime_seconds: state.uptime_seconds(Utc::now()),
            segments_transferred: state.segments_transferred(),
            bytes_transferred: state.bytes_transferred(),
            source_manifest_url: state.source_manifest_url.clone(),
            destination_upload_id: state.destination_upload_id.clone(),
            destination_stream_key_masked: state.masked_stream_key(),
            last_error: state.last_error.clone(),
        })
    }

    async fn stop(&mut self) -> RelayResult<FinalStats> {
        let ctx = Arc::clone(&self.ctx);
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| RelayError::NotFound(self.stream_id.clone()))?;

        if state.status == SessionStatus::Stopped {
            debug!(stream_id = %self.stream_id, "Stop on stopped session");
            return Ok(final_stats(state));
        }

        // The stop is persisted before finalizing, and only a persisted stop
        // changes the in-memory state: a failed save leaves the session running.
        let mut stopped = state.clone();
        stopped.mark_stopped(Utc::now());
        ctx.store.save(&stopped).await.inspect_err(|e| {
            error!(stream_id = %self.stream_id, error = %e, "Failed to persist stop");
        })?;
        *state = stopped;
        self.next_tick = None;

        if state.next_byte_offset > 0 && !state.finalized {
            match ctx
                .destination
                .finalize(&state.destination_upload_url, state.next_byte_offset)
                .await
            {
                Ok(()) => {
                    state.finalized = true;
                    if let Err(e) = ctx.store.save(state).await {
                        warn!(stream_id = %self.stream_id, error = %e, "Failed to persist finalization");
                    }
                }
                Err(e) => {
                    warn!(
                        stream_id = %self.stream_id,
                        total_bytes = state.next_byte_offset,
                        error = %e,
                        "Failed to finalize destination upload"
                    );
                }
            }
        }

        info!(
            stream_id = %self.stream_id,
            segments = state.segments_transferred(),
            bytes = state.bytes_transferred(),
            "Relay session stopped"
        );
        Ok(final_stats(state))
    }

    async fn tick(&mut self) -> RelayResult<TickReport> {
        let ctx = Arc::clone(&self.ctx);
        let Some(state) = self.state.as_mut().filter(|s| s.is_active()) else {
            return Ok(TickReport::default());
        };

        let report = run_tick(&ctx, state).await;
        let saved = ctx.store.save(state).await;

        if state.is_active() {
            self.schedule_next_tick();
        }

        saved?;
        Ok(report)
    }

    fn schedule_next_tick(&mut self) {
        self.next_tick = Some(Instant::now() + self.ctx.config.tick_interval());
    }
}

fn final_stats(state: &RelaySessionState) -> FinalStats {
    FinalStats {
        segments_transferred: state.segments_transferred(),
        bytes_transferred: state.bytes_transferred(),
        uptime_seconds: state.uptime_seconds(Utc::now()),
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// One pass: poll the manifest and forward every new segment in playlist order.
///
/// Mutates `state` in memory only; the caller persists it.
async fn run_tick(ctx: &RelayContext, state: &mut RelaySessionState) -> TickReport {
    let mut report = TickReport {
        ran: true,
        ..TickReport::default()
    };

    let playlist = match fetch_playlist(ctx, &state.source_manifest_url).await {
        Ok(playlist) => {
            state.consecutive_manifest_failures = 0;
            state.last_error = None;
            playlist
        }
        Err(e) => {
            report.manifest_failed = true;
            record_manifest_failure(&ctx.config, state, &e);
            return report;
        }
    };

    if let Some(highest) = playlist.highest_sequence() {
        if state.processed_segments.rebase_if_reset(highest) {
            warn!(
                stream_id = %state.stream_id,
                highest,
                "Source restarted its media sequence; dedup watermark reset"
            );
        }
    }

    let pending: Vec<&SegmentRef> = playlist
        .segments
        .iter()
        .filter(|s| !state.processed_segments.is_processed(s.sequence, &s.url))
        .collect();
    report.new_segments = pending.len();

    let cap = match ctx.config.max_segments_per_tick {
        0 => usize::MAX,
        n => n,
    };
    report.deferred = pending.len().saturating_sub(cap);

    // Strictly sequential: the destination expects byte-contiguous appends
    for segment in pending.into_iter().take(cap) {
        match transfer_segment(ctx, state, segment).await {
            Ok(()) => report.transferred += 1,
            Err(e) => {
                report.failed += 1;
                warn!(
                    stream_id = %state.stream_id,
                    segment = %segment.url,
                    error = %e,
                    "Segment transfer failed; will retry while the manifest lists it"
                );
            }
        }
    }

    if playlist.ended && report.new_segments == report.transferred {
        info!(stream_id = %state.stream_id, "Source playlist has ended");
    }

    if report.new_segments > 0 {
        debug!(
            stream_id = %state.stream_id,
            new = report.new_segments,
            transferred = report.transferred,
            failed = report.failed,
            deferred = report.deferred,
            next_byte_offset = state.next_byte_offset,
            "Tick finished"
        );
    }

    report
}

async fn fetch_playlist(ctx: &RelayContext, manifest_url: &str) -> RelayResult<MediaPlaylist> {
    let base = Url::parse(manifest_url)
        .map_err(|e| RelayError::Source(format!("Invalid manifest URL {manifest_url}: {e}")))?;
    let text = ctx.source.fetch_manifest(manifest_url).await?;
    parse_media_playlist(&text, &base)
}

fn record_manifest_failure(config: &RelayConfig, state: &mut RelaySessionState, err: &RelayError) {
    state.consecutive_manifest_failures += 1;
    let failures = state.consecutive_manifest_failures;
    let limit = config.max_consecutive_manifest_failures;

    if limit > 0 && failures >= limit {
        let reason = format!("Source manifest unavailable after {failures} consecutive attempts: {err}");
        error!(stream_id = %state.stream_id, failures, error = %err, "Relay session failed");
        state.mark_failed(reason, Utc::now());
    } else {
        warn!(
            stream_id = %state.stream_id,
            failures,
            error = %err,
            "Manifest fetch failed; retrying next tick"
        );
        state.last_error = Some(err.to_string());
    }
}

/// Download one segment and append it at `next_byte_offset`.
///
/// Only a destination-acknowledged append touches `state`.
async fn transfer_segment(
    ctx: &RelayContext,
    state: &mut RelaySessionState,
    segment: &SegmentRef,
) -> RelayResult<()> {
    let body = with_retry(&ctx.config, "download", &segment.url, || {
        ctx.source.fetch_segment(&segment.url)
    })
    .await?;

    let size = body.len() as u64;
    if size == 0 {
        debug!(stream_id = %state.stream_id, segment = %segment.url, "Empty segment recorded without upload");
        state.record_transfer(segment.sequence, segment.url.clone(), 0);
        return Ok(());
    }

    let byte_start = state.next_byte_offset;
    let upload_url = state.destination_upload_url.as_str();
    with_retry(&ctx.config, "upload", &segment.url, || {
        ctx.destination
            .append_chunk(upload_url, byte_start, body.clone())
    })
    .await?;

    state.record_transfer(segment.sequence, segment.url.clone(), size);
    debug!(
        stream_id = %state.stream_id,
        segment = %segment.url,
        byte_start,
        bytes = size,
        "Segment forwarded"
    );
    Ok(())
}

/// Run `op` once, then up to `segment_retry_attempts` more times with
/// exponential backoff (via `backon`).
async fn with_retry<T, F, Fut>(config: &RelayConfig, what: &str, url: &str, mut op: F) -> RelayResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RelayResult<T>>,
{
    let base = config.retry_base_delay();
    let backoff = ExponentialBuilder::default()
        .with_min_delay(base)
        .with_max_delay(base * 8)
        .with_max_times(config.segment_retry_attempts)
        .with_jitter()
        .build();

    let mut last_err = None;
    for delay in std::iter::once(Duration::ZERO).chain(backoff) {
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                debug!(url, what, error = %e, "Attempt failed");
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| RelayError::Source(format!("{what} of {url} never attempted"))))
}
