//! Unified error type.
//!
//! Two very different lifetimes live here. Bind-time errors ([`Error::Bind`],
//! [`Error::ReservationRequired`], [`Error::ReservationFailed`]) are fatal to
//! the whole host and returned from [`Host::start`](crate::Host::start).
//! Per-request errors ([`Error::Routing`], [`Error::Translation`],
//! [`Error::Engine`], [`Error::Io`]) fail a single connection: they are
//! caught at the dispatch boundary and handed to the configured
//! [`unhandled-error callback`](crate::HostConfig::on_unhandled_error),
//! never the accept loop.

use std::fmt;

use crate::reservation;

/// A boxed, type-erased error, as surfaced by the engine.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The error type returned by berth's fallible operations.
#[derive(Debug)]
pub enum Error {
    /// The listener could not bind, for a reason a reservation cannot fix.
    Bind(std::io::Error),
    /// Binding was denied and automatic reservation creation is disabled.
    /// Carries the remediation instructions for the operator.
    ReservationRequired(ReservationAdvice),
    /// The privileged reservation command reported failure.
    ReservationFailed,
    /// No configured base URI matches the request and authority fallback is
    /// disallowed. Carries the offending request URL.
    Routing(String),
    /// Malformed headers or body encountered while converting between the
    /// transport and the abstract request/response.
    Translation(String),
    /// Opaque failure surfaced by the engine.
    Engine(BoxError),
    /// Transport I/O failure: a failed accept or a failed body write.
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bind(e) => write!(f, "unable to start listener: {e}"),
            Self::ReservationRequired(advice) => advice.fmt(f),
            Self::ReservationFailed => {
                write!(f, "unable to configure namespace reservation")
            }
            Self::Routing(url) => {
                write!(f, "unable to locate base URI for request: {url}")
            }
            Self::Translation(msg) => write!(f, "translation: {msg}"),
            Self::Engine(e) => write!(f, "engine: {e}"),
            Self::Io(e) => write!(f, "io: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bind(e) | Self::Io(e) => Some(e),
            Self::Engine(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// Remediation data for a denied bind: the prefixes that need a namespace
/// reservation and the user the reservation should be created for.
///
/// A plain value, not a stateful error subtype — the formatting below is the
/// only behavior it has.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationAdvice {
    pub prefixes: Vec<String>,
    pub user: String,
}

impl fmt::Display for ReservationAdvice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "The host was unable to start, as no namespace reservation existed for the provided url(s)."
        )?;
        writeln!(f)?;
        writeln!(
            f,
            "Please either enable automatic reservation creation on the host configuration,"
        )?;
        writeln!(f, "or create the reservations manually with the (elevated) command(s):")?;
        writeln!(f)?;
        for prefix in &self.prefixes {
            writeln!(f, "{}", reservation::add_urlacl_line(prefix, &self.user))?;
        }
        Ok(())
    }
}
