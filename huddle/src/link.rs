//! Connection lifecycle: state machine, authentication handshake, and
//! reconnect backoff policy.
//!
//! The session holds a [`LinkState`] and moves it through
//! `Disconnected -> Connecting -> Connected -> Authenticating -> Ready`,
//! dropping to `Reconnecting` on transport loss. [`establish`] performs
//! one full connect-and-authenticate pass; it is called for the initial
//! connect and again after every transport loss, because the router
//! trusts nothing on a fresh connection before a new handshake.

use std::time::Duration;

use huddle_proto::frame::{ClientFrame, ServerFrame};
use huddle_proto::ident::UserId;

use crate::channel::{Channel, ChannelError, Connector};

/// State of the logical connection between the session and the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No connection; reached on logout or before the first connect.
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// Transport open, handshake not yet started.
    Connected,
    /// `Authenticate` sent, waiting for the router's confirmation.
    Authenticating,
    /// Authenticated; sends are trusted.
    Ready,
    /// Transport lost; retrying with backoff.
    Reconnecting,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Authenticating => write!(f, "authenticating"),
            Self::Ready => write!(f, "ready"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Opaque login credentials handed to the core by the external auth flow.
///
/// The core never validates these; it only forwards them in the
/// handshake.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// The local user's identity.
    pub user_id: UserId,
    /// Opaque session token.
    pub token: String,
}

/// Bounded-retry reconnection policy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Upper bound on the per-attempt delay.
    pub max_delay: Duration,
    /// Number of attempts before giving up and requiring a user retry.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl ReconnectConfig {
    /// Delay before the given attempt (1-based): doubles from
    /// `initial_delay`, capped at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // Past ~16 doublings the cap always wins; avoid overflowing the
        // multiplication for absurd attempt numbers.
        if attempt > 16 {
            return self.max_delay;
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Timeouts governing one connect-and-authenticate pass.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Timeout for opening the transport.
    pub connect_timeout: Duration,
    /// Timeout for the `Authenticated` confirmation after `Authenticate`.
    pub auth_timeout: Duration,
    /// Interval between liveness pings while `Ready`.
    pub keepalive_interval: Duration,
    /// Reconnection policy after transport loss.
    pub reconnect: ReconnectConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(30),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Errors from one connect-and-authenticate pass.
#[derive(Debug, thiserror::Error)]
pub enum EstablishError {
    /// The transport could not be opened. Recoverable: retried up to the
    /// configured bound.
    #[error("connect failed: {0}")]
    Connect(#[from] ChannelError),

    /// No `Authenticated` confirmation arrived within the deadline.
    #[error("authentication timed out")]
    AuthTimeout,

    /// The router rejected the credentials. Fatal to the session; the
    /// user must log in again.
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    /// The router confirmed a different identity than the one presented.
    #[error("authenticated as {got}, expected {expected}")]
    IdentityMismatch {
        /// The identity we presented.
        expected: UserId,
        /// The identity the router confirmed.
        got: UserId,
    },
}

impl EstablishError {
    /// Whether this failure ends the session (bad credentials) rather
    /// than being worth another attempt (transport trouble).
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::AuthRejected(_) | Self::IdentityMismatch { .. })
    }
}

/// Open a channel and run the authentication handshake on it.
///
/// One full connect-and-authenticate pass; callers that need to observe
/// the intermediate states drive [`Connector::open`] and
/// [`authenticate`] separately instead.
///
/// # Errors
///
/// Returns [`EstablishError`]; [`EstablishError::is_fatal`] separates
/// credential failures from retryable transport failures.
pub async fn establish<C: Connector>(
    connector: &C,
    creds: &Credentials,
    cfg: &LinkConfig,
) -> Result<C::Chan, EstablishError> {
    let chan = connector.open().await?;
    authenticate(&chan, creds, cfg.auth_timeout).await?;
    Ok(chan)
}

/// Run the authentication handshake on an open channel.
///
/// Sends `Authenticate{token, user_id}` and waits (bounded by
/// `auth_timeout`) for a matching `Authenticated` confirmation.
/// Unexpected frames during the wait are logged and skipped; an `Error`
/// frame is treated as a rejection.
///
/// # Errors
///
/// Returns [`EstablishError::AuthTimeout`], [`EstablishError::AuthRejected`],
/// [`EstablishError::IdentityMismatch`], or a transport error.
pub async fn authenticate<Ch: Channel>(
    chan: &Ch,
    creds: &Credentials,
    auth_timeout: Duration,
) -> Result<(), EstablishError> {
    chan.send(&ClientFrame::Authenticate {
        token: creds.token.clone(),
        user_id: creds.user_id.clone(),
    })
    .await?;

    let confirmed = tokio::time::timeout(auth_timeout, wait_for_authenticated(chan))
        .await
        .map_err(|_| {
            tracing::warn!(user = %creds.user_id, "authentication confirmation timed out");
            EstablishError::AuthTimeout
        })??;

    if confirmed != creds.user_id {
        return Err(EstablishError::IdentityMismatch {
            expected: creds.user_id.clone(),
            got: confirmed,
        });
    }

    tracing::info!(user = %creds.user_id, "authenticated with router");
    Ok(())
}

/// Keep receiving until an `Authenticated` or `Error` frame arrives.
async fn wait_for_authenticated<Ch: Channel>(chan: &Ch) -> Result<UserId, EstablishError> {
    loop {
        match chan.recv().await? {
            ServerFrame::Authenticated { user_id } => return Ok(user_id),
            ServerFrame::Error { message } => {
                tracing::warn!(reason = %message, "router rejected authentication");
                return Err(EstablishError::AuthRejected(message));
            }
            other => {
                // The router should not push anything before confirming
                // the handshake; skip rather than fail.
                tracing::warn!(?other, "unexpected frame during authentication");
            }
        }
    }
}
