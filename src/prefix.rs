//! Listener-facing prefixes derived from the configured base URIs.
//!
//! A prefix is the `scheme://host:port/path/` string used in two places:
//! deriving the socket address the listener binds, and spelling the exact
//! namespace-reservation command an operator (or the privileged runner) must
//! execute when binding is denied. The port is always explicit and the path
//! always ends in a slash, netsh-style.

use url::Url;

use crate::config::HostConfig;

/// One bind prefix computed from one base URI.
#[derive(Debug, Clone)]
pub(crate) struct Prefix {
    /// The reservation-facing string, e.g. `http://+:8080/app/`.
    pub(crate) text: String,
    pub(crate) scheme: String,
    pub(crate) host: String,
    pub(crate) port: u16,
    /// True when the host token was rewritten to a wildcard.
    pub(crate) wildcard: bool,
}

impl Prefix {
    /// The host the listener actually binds. A rewritten prefix binds the
    /// unspecified address; anything else resolves the configured host.
    pub(crate) fn bind_host(&self) -> &str {
        if self.wildcard { "0.0.0.0" } else { &self.host }
    }
}

/// Computes one prefix per configured base URI, in declaration order.
///
/// When `rewrite_localhost` is set and the host carries no dot, the literal
/// `localhost` token is replaced with `+` (or `*` under `use_weak_wildcard`)
/// so the listener answers on every interface, not just the loopback name.
pub(crate) fn prefixes(base_uris: &[Url], config: &HostConfig) -> Vec<Prefix> {
    base_uris
        .iter()
        .map(|base| {
            let scheme = base.scheme().to_owned();
            let host = base.host_str().unwrap_or_default().to_owned();
            let port = base.port_or_known_default().unwrap_or(80);

            let mut path = base.path().to_owned();
            if !path.ends_with('/') {
                path.push('/');
            }

            let mut text = format!("{scheme}://{host}:{port}{path}");
            let rewrite = config.rewrite_localhost && !host.contains('.');
            if rewrite {
                let token = if config.use_weak_wildcard { "*" } else { "+" };
                text = text.replace("localhost", token);
            }

            Prefix {
                text,
                scheme,
                wildcard: rewrite && host.contains("localhost"),
                host,
                port,
            }
        })
        .collect()
}
