//! Transport-owned header policy.
//!
//! Four headers describe the framing of the response itself. The response
//! translator sets them explicitly, so copying them from the abstract
//! response would either duplicate them or contradict the framing hyper
//! actually applies. Everything else passes through untouched.

/// The headers the transport owns. Fixed at compile time; never mutated.
const TRANSPORT_OWNED: [&str; 4] = [
    "content-length",
    "content-type",
    "transfer-encoding",
    "keep-alive",
];

/// Returns true if `name` is a header the transport layer owns.
///
/// Comparison is ASCII-case-insensitive: `"Content-Length"`,
/// `"CONTENT-LENGTH"` and `"content-length"` are all transport-owned.
pub fn is_transport_owned(name: &str) -> bool {
    TRANSPORT_OWNED.iter().any(|h| name.eq_ignore_ascii_case(h))
}
