//! Host prober: the fixed SMBv1 diagnostic conversation with one target
//!
//! The conversation is a linear state machine. Each call to
//! [`Exchange::advance`] performs exactly one request/response round trip and
//! returns the next state; any error ends the probe while keeping whatever
//! classification was reached so far.
//!
//! ```text
//! Connected -> Negotiated -> SessionEstablished -> TreeConnected -> Probed -> Classified
//!                                  \                      \
//!                                   `-> Classified         `-> Classified
//!                                      (auth refused)         (no signal)
//! ```

use crate::config::{AuthFailurePolicy, ProbeConfig};
use crate::error::{ProbeError, ProbeResult, ProbeStep};
use crate::network::packet::{
    OsBanner, Patch, ResponseView, Template, NEGOTIATE_PROTOCOL, SESSION_SETUP, TRANS2_SESSION_SETUP,
    TRANS_NAMED_PIPE, TREE_CONNECT,
};
use crate::network::socket::{connect, SmbConnection};
use crate::scanner::{ProbeOutcome, Status, Target};
use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

pub const AUTH_FAILED_DETAIL: &str =
    "Can't authorize to SMB. Imposible to check is host vulnerable or not.";
const IMPLANT_DETAIL: &str = "Seems to be infected by DoublePulsar.";

/// Anything that can turn a target into an outcome
#[async_trait]
pub trait Prober: Send + Sync {
    /// Probe one target. Never fails: per-host errors live in the outcome.
    async fn probe(&self, target: &Target) -> ProbeOutcome;
}

/// Status and detail text accumulated during one probe
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    status: Status,
    detail: String,
}

impl Classification {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    pub fn into_detail(self) -> String {
        self.detail
    }

    /// Move one step up the status lattice and append `note`.
    ///
    /// Returns false, leaving the classification untouched, for anything
    /// other than the immediate successor of the current status.
    pub fn escalate(&mut self, status: Status, note: &str) -> bool {
        let next = match self.status {
            Status::Unknown => Status::Vulnerable,
            Status::Vulnerable => Status::Backdoored,
            Status::Backdoored => return false,
        };
        if status != next {
            return false;
        }
        self.status = status;
        self.note(note);
        true
    }

    /// Append to the detail without changing the status
    pub fn note(&mut self, note: &str) {
        if !self.detail.is_empty() {
            self.detail.push(' ');
        }
        self.detail.push_str(note);
    }
}

/// Identifiers and diagnostics learned from the server on one connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    pub user_id: Option<[u8; 2]>,
    pub tree_id: Option<[u8; 2]>,
    pub os_banner: String,
}

impl SessionContext {
    fn user_id(&self, step: ProbeStep) -> ProbeResult<[u8; 2]> {
        self.user_id
            .ok_or(ProbeError::MissingIdentifier { step, field: "user" })
    }

    fn tree_id(&self, step: ProbeStep) -> ProbeResult<[u8; 2]> {
        self.tree_id
            .ok_or(ProbeError::MissingIdentifier { step, field: "tree" })
    }

    /// Patches for a request addressed to the connected tree
    fn tree_patches(&self, step: ProbeStep) -> ProbeResult<[Patch; 2]> {
        Ok([
            Patch::tree_id(self.tree_id(step)?),
            Patch::user_id(self.user_id(step)?),
        ])
    }
}

/// Position in the probe conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeState {
    Connected,
    Negotiated,
    SessionEstablished(SessionContext),
    TreeConnected(SessionContext),
    /// The named pipe transaction produced the vulnerability signal
    Probed(SessionContext),
    Classified,
}

impl ProbeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProbeState::Classified)
    }
}

/// One running conversation over one connection
pub struct Exchange<S> {
    conn: SmbConnection<S>,
    classification: Classification,
    policy: AuthFailurePolicy,
    peer: IpAddr,
}

impl<S> Exchange<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(conn: SmbConnection<S>, policy: AuthFailurePolicy, peer: IpAddr) -> Self {
        Self {
            conn,
            classification: Classification::new(),
            policy,
            peer,
        }
    }

    pub fn classification(&self) -> &Classification {
        &self.classification
    }

    pub fn into_classification(self) -> Classification {
        self.classification
    }

    /// Run the round trip belonging to `state` and return the state after it
    pub async fn advance(&mut self, state: ProbeState) -> ProbeResult<ProbeState> {
        match state {
            ProbeState::Connected => self.negotiate().await,
            ProbeState::Negotiated => self.session_setup().await,
            ProbeState::SessionEstablished(ctx) => self.tree_connect(ctx).await,
            ProbeState::TreeConnected(ctx) => self.transact_named_pipe(ctx).await,
            ProbeState::Probed(ctx) => self.trans2_session_setup(ctx).await,
            ProbeState::Classified => Ok(ProbeState::Classified),
        }
    }

    async fn round_trip(
        &mut self,
        step: ProbeStep,
        template: &Template,
        patches: &[Patch],
    ) -> ProbeResult<Vec<u8>> {
        let packet = template.render(patches)?;
        self.conn.exchange(step, &packet).await
    }

    async fn negotiate(&mut self) -> ProbeResult<ProbeState> {
        let step = ProbeStep::Negotiate;
        let frame = self.round_trip(step, &NEGOTIATE_PROTOCOL, &[]).await?;
        let view = ResponseView::parse(step, &frame)?;

        match view.status() {
            0 => Ok(ProbeState::Negotiated),
            status => Err(ProbeError::Status { step, status }),
        }
    }

    async fn session_setup(&mut self) -> ProbeResult<ProbeState> {
        let step = ProbeStep::SessionSetup;
        let frame = self.round_trip(step, &SESSION_SETUP, &[]).await?;
        let view = ResponseView::parse(step, &frame)?;

        let status = view.status();
        if status != 0 {
            return match self.policy {
                AuthFailurePolicy::Report => {
                    self.classification.note(AUTH_FAILED_DETAIL);
                    Ok(ProbeState::Classified)
                }
                AuthFailurePolicy::Suppress => Err(ProbeError::AuthorizationFailed { status }),
            };
        }

        let os_banner = match view.native_os() {
            OsBanner::Malformed { declared, actual } => {
                log::warn!(
                    "Invalid session setup AndX response from {}: byte count {} does not fit a {} byte frame",
                    self.peer,
                    declared,
                    actual
                );
                String::new()
            }
            banner => banner.into_text(),
        };

        Ok(ProbeState::SessionEstablished(SessionContext {
            user_id: Some(view.user_id()),
            tree_id: None,
            os_banner,
        }))
    }

    async fn tree_connect(&mut self, mut ctx: SessionContext) -> ProbeResult<ProbeState> {
        let step = ProbeStep::TreeConnect;
        let patches = [Patch::user_id(ctx.user_id(step)?)];
        let frame = self.round_trip(step, &TREE_CONNECT, &patches).await?;
        let view = ResponseView::parse(step, &frame)?;

        ctx.tree_id = Some(view.tree_id());
        Ok(ProbeState::TreeConnected(ctx))
    }

    async fn transact_named_pipe(&mut self, ctx: SessionContext) -> ProbeResult<ProbeState> {
        let step = ProbeStep::TransactNamedPipe;
        let patches = ctx.tree_patches(step)?;
        let frame = self.round_trip(step, &TRANS_NAMED_PIPE, &patches).await?;
        let view = ResponseView::parse(step, &frame)?;

        if !view.has_transaction_signal() {
            return Ok(ProbeState::Classified);
        }

        let note = format!(
            "Seems vulnerable for MS17-010. Operation System: {}.",
            ctx.os_banner
        );
        self.classification.escalate(Status::Vulnerable, &note);
        Ok(ProbeState::Probed(ctx))
    }

    async fn trans2_session_setup(&mut self, ctx: SessionContext) -> ProbeResult<ProbeState> {
        let step = ProbeStep::Trans2SessionSetup;
        let patches = ctx.tree_patches(step)?;
        let frame = self.round_trip(step, &TRANS2_SESSION_SETUP, &patches).await?;
        let view = ResponseView::parse(step, &frame)?;

        if view.has_implant_signal() {
            self.classification.escalate(Status::Backdoored, IMPLANT_DETAIL);
        }
        Ok(ProbeState::Classified)
    }
}

/// Probes targets over TCP
#[derive(Debug, Clone)]
pub struct HostProber {
    config: ProbeConfig,
    cancel: CancellationToken,
}

impl HostProber {
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop between protocol steps once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run the conversation over an already connected stream
    pub async fn probe_stream<S>(&self, target: &Target, stream: S) -> ProbeOutcome
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let conn = SmbConnection::new(stream, self.config.io_timeout());
        let mut exchange = Exchange::new(conn, self.config.auth_failure_policy, target.address);
        let mut state = ProbeState::Connected;

        let failure = loop {
            if state.is_terminal() {
                break None;
            }
            if self.cancel.is_cancelled() {
                break Some(ProbeError::Cancelled);
            }
            match exchange.advance(state).await {
                Ok(next) => state = next,
                Err(e) => break Some(e),
            }
        };

        if let Some(e) = &failure {
            log::debug!("Probe of {} stopped: {}", target.address, e);
        }

        ProbeOutcome::new(target.clone(), exchange.into_classification(), failure)
    }
}

#[async_trait]
impl Prober for HostProber {
    async fn probe(&self, target: &Target) -> ProbeOutcome {
        let started = Instant::now();
        if self.cancel.is_cancelled() {
            return ProbeOutcome::new(
                target.clone(),
                Classification::new(),
                Some(ProbeError::Cancelled),
            );
        }

        let addr = SocketAddr::new(target.address, self.config.port);
        let outcome = match connect(addr, self.config.connect_timeout()).await {
            Ok(stream) => self.probe_stream(target, stream).await,
            Err(e) => {
                log::debug!("Could not connect to {}: {}", addr, e);
                ProbeOutcome::new(target.clone(), Classification::new(), Some(e))
            }
        };

        outcome.with_elapsed(started.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    fn frame(status: u32) -> Vec<u8> {
        let mut frame = vec![0x00, 0x00, 0x00, 0x20, 0xff, b'S', b'M', b'B', 0x72];
        frame.extend_from_slice(&status.to_le_bytes());
        frame.resize(36, 0);
        frame
    }

    fn peer() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    #[test]
    fn test_classification_never_skips_or_regresses() {
        let mut c = Classification::new();
        assert!(!c.escalate(Status::Backdoored, "skip"));
        assert_eq!(c.status(), Status::Unknown);
        assert_eq!(c.detail(), "");

        assert!(c.escalate(Status::Vulnerable, "first."));
        assert!(!c.escalate(Status::Unknown, "down"));
        assert!(!c.escalate(Status::Vulnerable, "again"));
        assert!(c.escalate(Status::Backdoored, "second."));
        assert!(!c.escalate(Status::Backdoored, "third."));

        assert_eq!(c.status(), Status::Backdoored);
        assert_eq!(c.detail(), "first. second.");
    }

    #[tokio::test]
    async fn test_negotiate_transition() {
        let (client, mut server) = duplex(1024);
        let conn = SmbConnection::new(client, Duration::from_secs(2));
        let mut exchange = Exchange::new(conn, AuthFailurePolicy::Report, peer());

        tokio::spawn(async move {
            let mut request = vec![0u8; NEGOTIATE_PROTOCOL.bytes().len()];
            server.read_exact(&mut request).await.unwrap();
            server.write_all(&frame(0)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let next = exchange.advance(ProbeState::Connected).await.unwrap();
        assert_eq!(next, ProbeState::Negotiated);
    }

    #[tokio::test]
    async fn test_negotiate_rejects_error_status() {
        let (client, mut server) = duplex(1024);
        let conn = SmbConnection::new(client, Duration::from_secs(2));
        let mut exchange = Exchange::new(conn, AuthFailurePolicy::Report, peer());

        tokio::spawn(async move {
            let mut request = vec![0u8; NEGOTIATE_PROTOCOL.bytes().len()];
            server.read_exact(&mut request).await.unwrap();
            server.write_all(&frame(0xc000_0002)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let err = exchange.advance(ProbeState::Connected).await.unwrap_err();
        assert!(matches!(
            err,
            ProbeError::Status {
                step: ProbeStep::Negotiate,
                status: 0xc000_0002
            }
        ));
    }

    #[tokio::test]
    async fn test_missing_tree_id_aborts_before_sending() {
        let (client, _server) = duplex(1024);
        let conn = SmbConnection::new(client, Duration::from_secs(2));
        let mut exchange = Exchange::new(conn, AuthFailurePolicy::Report, peer());

        let ctx = SessionContext {
            user_id: Some([0x00, 0x08]),
            tree_id: None,
            os_banner: String::new(),
        };
        let err = exchange.advance(ProbeState::TreeConnected(ctx)).await.unwrap_err();
        assert!(matches!(
            err,
            ProbeError::MissingIdentifier {
                step: ProbeStep::TransactNamedPipe,
                field: "tree"
            }
        ));
        assert_eq!(exchange.classification().status(), Status::Unknown);
    }

    #[tokio::test]
    async fn test_cancelled_prober_does_not_connect() {
        let token = CancellationToken::new();
        token.cancel();
        let prober = HostProber::new(ProbeConfig::default()).with_cancellation(token);

        let outcome = prober.probe(&Target::host(peer())).await;
        assert!(matches!(outcome.failure, Some(ProbeError::Cancelled)));
        assert_eq!(outcome.status, Status::Unknown);
    }
}
