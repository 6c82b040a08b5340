//! Host configuration.
//!
//! All knobs are fixed at construction — build the config, hand it to
//! [`Host::new`](crate::Host::new), done. There is no file format and no
//! reload path; the host is embedded in a surrounding process that already
//! has opinions about both.

use std::sync::Arc;

use tracing::error;

use crate::error::Error;
use crate::reservation;

/// Callback receiving every error caught at the connection-dispatch boundary.
pub type ErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;

/// The injected privileged-execution capability: run `command args…`
/// elevated, report success. How elevation happens is the caller's problem.
pub type RunPrivileged = Arc<dyn Fn(&str, &[String]) -> bool + Send + Sync>;

/// Host configuration. Immutable once the host is constructed.
#[derive(Clone)]
pub struct HostConfig {
    /// Permits on the accept-admission semaphore. Must be at least 1.
    ///
    /// This bounds the rate at which accept operations may be issued, *not*
    /// the number of requests concurrently being processed end to end — a
    /// permit is released as soon as its accept resolves.
    pub max_connections: usize,
    /// Rewrite `localhost` base URIs to a wildcard bind token so the host
    /// answers on every interface.
    pub rewrite_localhost: bool,
    /// Use `*` instead of `+` as the wildcard token.
    pub use_weak_wildcard: bool,
    /// When no base URI matches a request, fall back to a synthetic base of
    /// just the request's scheme, host and port instead of failing it.
    pub allow_authority_fallback: bool,
    /// Stream response bodies with the transport's default framing. When
    /// false, bodies are buffered and sent with an explicit content length.
    pub allow_chunked_encoding: bool,
    /// Expose the connection's client certificate on the abstract request.
    pub enable_client_certificates: bool,
    /// What to do when binding is denied for lack of a namespace reservation.
    pub reservations: ReservationPolicy,
    /// Receives every per-request error. Defaults to a `tracing::error!` log.
    pub on_unhandled_error: ErrorCallback,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            max_connections: std::thread::available_parallelism().map_or(4, usize::from),
            rewrite_localhost: true,
            use_weak_wildcard: false,
            allow_authority_fallback: false,
            allow_chunked_encoding: true,
            enable_client_certificates: false,
            reservations: ReservationPolicy::default(),
            on_unhandled_error: Arc::new(|e: &Error| error!("unhandled host error: {e}")),
        }
    }
}

/// Policy for creating namespace reservations when binding is denied.
#[derive(Clone)]
pub struct ReservationPolicy {
    /// Create the reservations automatically (via [`run_privileged`]) and
    /// retry the bind once. When false, a denied bind fails with manual
    /// remediation instructions instead.
    ///
    /// [`run_privileged`]: ReservationPolicy::run_privileged
    pub auto_create: bool,
    /// The user the reservations are created for. Defaults to the platform
    /// "everyone" account when unset.
    pub user: Option<String>,
    /// The privileged-execution capability. The default runner refuses to
    /// run anything, so automatic creation fails unless one is injected.
    pub run_privileged: RunPrivileged,
}

impl ReservationPolicy {
    /// The explicit user, or the platform "everyone" account name.
    pub(crate) fn resolved_user(&self) -> String {
        match &self.user {
            Some(user) if !user.trim().is_empty() => user.clone(),
            _ => reservation::everyone_account(),
        }
    }
}

impl Default for ReservationPolicy {
    fn default() -> Self {
        Self {
            auto_create: false,
            user: None,
            run_privileged: Arc::new(|_: &str, _: &[String]| false),
        }
    }
}
