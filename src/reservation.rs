//! Namespace-reservation commands.
//!
//! Binding an HTTP prefix from a non-privileged process requires an OS-level
//! namespace reservation. This module only *spells* the commands — executing
//! them is the injected [`RunPrivileged`](crate::config::RunPrivileged)
//! capability's job, and deciding whether to run them at all is the listener
//! lifecycle's.

/// The reservation tool.
pub(crate) const COMMAND: &str = "netsh";

/// Arguments for one `netsh http add urlacl` invocation.
pub(crate) fn add_urlacl_args(prefix: &str, user: &str) -> Vec<String> {
    vec![
        "http".to_owned(),
        "add".to_owned(),
        "urlacl".to_owned(),
        format!("url={prefix}"),
        format!("user={user}"),
    ]
}

/// The one-line shell form of the reservation command, for remediation text.
pub(crate) fn add_urlacl_line(prefix: &str, user: &str) -> String {
    format!("{COMMAND} http add urlacl url=\"{prefix}\" user=\"{user}\"")
}

/// Name of the platform "everyone" account.
///
/// Localized lookup of the world SID (S-1-1-0) would need the Windows
/// security API; without that dependency the well-known English name is the
/// answer on every platform, and it is what the localized lookup falls back
/// to anyway.
pub(crate) fn everyone_account() -> String {
    "Everyone".to_owned()
}
