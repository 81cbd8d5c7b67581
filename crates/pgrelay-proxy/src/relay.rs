//! The relay loop: two directions of byte-faithful forwarding glued
//! together by a shared phase cell and a cancellation token.
//!
//! Each direction runs as its own task. Whichever direction ends first,
//! for whatever reason, claims the stop (a single atomic transition),
//! cancels the token so the peer unblocks, and reports back to the
//! session. Reads and writes both race the token; a peer that stops
//! draining cannot pin the other direction inside a blocked write.
//! Only the claiming direction's error survives; the peer's exit is
//! fallout from the stop and is discarded.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use pgrelay_plugin::{LoggingContext, PluginRegistry};
use pgrelay_proto::{
    ClientMessage, Message, ProtoError, ServerMessage, read_client_message, read_server_message,
    write_batch, write_message,
};

/// Responses queued toward the client before size alone forces a write.
pub const FLUSH_THRESHOLD: usize = 15;

/// Where a session is in its lifecycle. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionPhase {
    /// Startup received, handshake in progress.
    Authenticating = 0,
    /// Both relay directions are live.
    Proxying = 1,
    /// One direction has ended; the peer is being torn down.
    Stopping = 2,
    /// Both directions have reported in.
    Stopped = 3,
}

impl SessionPhase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Authenticating,
            1 => Self::Proxying,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// Forward-only phase cell shared between the session and both relay
/// tasks.
#[derive(Debug)]
pub(crate) struct PhaseCell(AtomicU8);

impl PhaseCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(SessionPhase::Authenticating as u8))
    }

    pub(crate) fn get(&self) -> SessionPhase {
        SessionPhase::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Move to `phase` unless the cell is already past it.
    pub(crate) fn advance(&self, phase: SessionPhase) {
        self.0.fetch_max(phase as u8, Ordering::SeqCst);
    }

    /// Claim the `Proxying` to `Stopping` transition. Exactly one caller
    /// per session gets `true`; its exit reason becomes the session's.
    pub(crate) fn begin_stop(&self) -> bool {
        self.0
            .compare_exchange(
                SessionPhase::Proxying as u8,
                SessionPhase::Stopping as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Read and write failures stop being reported once the session is
    /// winding down; they are fallout, not news.
    pub(crate) fn suppress_errors(&self) -> bool {
        self.get() >= SessionPhase::Stopping
    }
}

/// Identity and capabilities shared by both relay directions, and by
/// the handshake IO before them.
#[derive(Debug)]
pub(crate) struct RelayContext {
    pub(crate) session_id: Uuid,
    pub(crate) user: String,
    pub(crate) database: String,
    pub(crate) is_ssl: bool,
    pub(crate) client_addr: Option<SocketAddr>,
    pub(crate) target_addr: Option<SocketAddr>,
    pub(crate) plugins: Arc<PluginRegistry>,
    pub(crate) phase: Arc<PhaseCell>,
}

impl RelayContext {
    /// Session identity fields, always in the same order.
    pub(crate) fn logging_context(&self) -> LoggingContext {
        let mut ctx = LoggingContext::new();
        ctx.insert("session_id", self.session_id.to_string());
        ctx.insert("user", self.user.as_str());
        ctx.insert("database", self.database.as_str());
        ctx.insert("ssl", self.is_ssl);
        if let Some(addr) = self.client_addr {
            ctx.insert("client", addr.to_string());
        }
        if let Some(addr) = self.target_addr {
            ctx.insert("target", addr.to_string());
        }
        ctx
    }

    fn context_with_message(&self, message: &dyn Message) -> LoggingContext {
        let mut ctx = self.logging_context();
        ctx.insert("message", serde_json::Value::Object(message.fields()));
        ctx
    }

    pub(crate) async fn log_parse_error(&self, what: &str, error: &ProtoError) {
        if self.phase.suppress_errors() {
            return;
        }
        self.plugins
            .log_error(
                &self.logging_context(),
                &format!("Error parsing {what}: {error}"),
            )
            .await;
    }

    pub(crate) async fn log_write_error(&self, what: &str, error: &ProtoError) {
        if self.phase.suppress_errors() {
            return;
        }
        self.plugins
            .log_error(
                &self.logging_context(),
                &format!("Error writing {what}: {error}"),
            )
            .await;
    }
}

/// Read one frontend message, reporting the parse through the session's
/// logging plugins either way.
pub(crate) async fn read_client_logged<R>(
    reader: &mut R,
    ctx: &RelayContext,
) -> Result<Option<ClientMessage>, ProtoError>
where
    R: AsyncRead + Unpin,
{
    match read_client_message(reader).await {
        Ok(Some(message)) => {
            ctx.plugins
                .log_debug(&ctx.context_with_message(&message), "Client request")
                .await;
            Ok(Some(message))
        }
        Ok(None) => Ok(None),
        Err(error) => {
            ctx.log_parse_error("client request", &error).await;
            Err(error)
        }
    }
}

/// Read one backend message, reporting the parse like
/// [`read_client_logged`].
pub(crate) async fn read_server_logged<R>(
    reader: &mut R,
    ctx: &RelayContext,
) -> Result<Option<ServerMessage>, ProtoError>
where
    R: AsyncRead + Unpin,
{
    match read_server_message(reader).await {
        Ok(Some(message)) => {
            ctx.plugins
                .log_debug(&ctx.context_with_message(&message), "Target response")
                .await;
            Ok(Some(message))
        }
        Ok(None) => Ok(None),
        Err(error) => {
            ctx.log_parse_error("target response", &error).await;
            Err(error)
        }
    }
}

/// Which way traffic was flowing when a relay task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    ClientToTarget,
    TargetToClient,
}

impl Direction {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::ClientToTarget => "client->target",
            Self::TargetToClient => "target->client",
        }
    }
}

/// Terminal report from one relay direction back to the session.
#[derive(Debug)]
pub(crate) struct DirectionEnd {
    pub(crate) direction: Direction,
    pub(crate) error: Option<ProtoError>,
    /// Whether this direction claimed the stop. Only the claimant's
    /// error is the session's outcome.
    pub(crate) won: bool,
}

/// Forward client traffic to the target until EOF, a Terminate, an
/// error, or the peer direction signals the stop.
pub(crate) async fn run_request_direction<R, W>(
    mut client: R,
    mut target: W,
    ctx: Arc<RelayContext>,
    stop: CancellationToken,
    report: mpsc::Sender<DirectionEnd>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let error = request_loop(&mut client, &mut target, &ctx, &stop).await;
    finish_direction(Direction::ClientToTarget, error, &ctx, &stop, &report).await;
}

async fn request_loop<R, W>(
    client: &mut R,
    target: &mut W,
    ctx: &RelayContext,
    stop: &CancellationToken,
) -> Option<ProtoError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let message = tokio::select! {
            biased;
            _ = stop.cancelled() => return None,
            result = read_client_logged(client, ctx) => match result {
                Ok(Some(message)) => message,
                Ok(None) => return None,
                Err(error) => return Some(error),
            },
        };
        // The stop interrupts a blocked write as well; a stopped
        // session abandons its streams, tail included.
        let written = tokio::select! {
            biased;
            _ = stop.cancelled() => return None,
            result = write_message(target, &message) => result,
        };
        if let Err(error) = written {
            ctx.log_write_error("client request", &error).await;
            return Some(error);
        }
        // Terminate is forwarded so the target sees a clean goodbye,
        // then this direction is done.
        if matches!(message, ClientMessage::Terminate) {
            return None;
        }
    }
}

/// Forward target traffic to the client, batching responses between
/// flush points so a burst of row data goes out in few writes.
pub(crate) async fn run_response_direction<R, W>(
    mut target: R,
    mut client: W,
    ctx: Arc<RelayContext>,
    stop: CancellationToken,
    report: mpsc::Sender<DirectionEnd>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let error = response_loop(&mut target, &mut client, &ctx, &stop).await;
    finish_direction(Direction::TargetToClient, error, &ctx, &stop, &report).await;
}

async fn response_loop<R, W>(
    target: &mut R,
    client: &mut W,
    ctx: &RelayContext,
    stop: &CancellationToken,
) -> Option<ProtoError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut batch: Vec<ServerMessage> = Vec::with_capacity(FLUSH_THRESHOLD);
    let error = loop {
        let message = tokio::select! {
            biased;
            _ = stop.cancelled() => break None,
            result = read_server_logged(target, ctx) => match result {
                Ok(Some(message)) => message,
                Ok(None) => break None,
                Err(error) => break Some(error),
            },
        };
        // ReadyForQuery ends a protocol turn and an authentication
        // challenge expects an answer; neither may sit in the buffer.
        let boundary = match &message {
            ServerMessage::ReadyForQuery(_) => true,
            ServerMessage::Authentication(request) => !request.is_ok(),
            _ => false,
        };
        batch.push(message);
        if boundary || batch.len() >= FLUSH_THRESHOLD {
            // A client that stopped reading cannot park this direction
            // mid-flush; the stop wins over the write.
            let flushed = tokio::select! {
                biased;
                _ = stop.cancelled() => break None,
                result = write_batch(client, &batch) => result,
            };
            if let Err(error) = flushed {
                ctx.log_write_error("target response", &error).await;
                break Some(error);
            }
            batch.clear();
        }
    };
    // Responses the target produced before the stop still belong to the
    // client. Best effort: the client may be gone or no longer reading,
    // and a session past its stop does not wait for the tail.
    if !batch.is_empty() {
        tokio::select! {
            biased;
            _ = stop.cancelled() => {}
            _ = write_batch(client, &batch) => {}
        }
    }
    error
}

/// Common tail for both directions: claim the stop, wake the peer,
/// report to the session.
async fn finish_direction(
    direction: Direction,
    error: Option<ProtoError>,
    ctx: &RelayContext,
    stop: &CancellationToken,
    report: &mpsc::Sender<DirectionEnd>,
) {
    let won = ctx.phase.begin_stop();
    stop.cancel();
    if won {
        tracing::debug!(
            session_id = %ctx.session_id,
            direction = direction.as_str(),
            "Relay direction initiated session stop"
        );
    }
    let _ = report
        .send(DirectionEnd {
            direction,
            error,
            won,
        })
        .await;
}
