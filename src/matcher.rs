//! Base-URI matching and app-local path computation.
//!
//! A host is configured with an ordered list of base URIs. Every incoming
//! request URL is matched against that list — first match wins — and the
//! matched base determines the split between the application's base path and
//! the request's app-local path.
//!
//! Matching is deliberately loose on the host when the base URI says
//! `localhost`: those bases are rewritten to a wildcard bind token at listen
//! time, so the request may arrive under any host name the machine answers
//! to. For every other base the scheme, host and port must all line up,
//! case-insensitively and with percent-escaping normalized (the `url` crate
//! normalizes on parse).

use url::Url;

/// Returns the first configured base URI the request URL falls under.
///
/// When nothing matches and `allow_authority_fallback` is set, a synthetic
/// base of just the request's scheme + host + port (no path constraint) is
/// returned instead. `None` means the request cannot be routed at all.
pub(crate) fn find_base_uri(
    base_uris: &[Url],
    request_url: &Url,
    allow_authority_fallback: bool,
) -> Option<Url> {
    if let Some(base) = base_uris.iter().find(|base| is_base_of(base, request_url)) {
        return Some(base.clone());
    }

    if !allow_authority_fallback {
        return None;
    }

    let mut fallback = request_url.clone();
    fallback.set_path("/");
    fallback.set_query(None);
    fallback.set_fragment(None);
    Some(fallback)
}

/// Is `base` a case-insensitive base of `value`?
pub(crate) fn is_base_of(base: &Url, value: &Url) -> bool {
    if !authority_matches(base, value) {
        return false;
    }

    let base_segments = segments(base);
    let value_segments = segments(value);
    let len = base_segments.len().max(value_segments.len());

    // Lock-step walk, padding the shorter side with empty segments. An empty
    // base segment is a wildcard: the base constrains only the prefix it
    // actually spells out.
    (0..len).all(|i| {
        let b = base_segments.get(i).copied().unwrap_or("");
        let v = value_segments.get(i).copied().unwrap_or("");
        b.is_empty() || b.eq_ignore_ascii_case(v)
    })
}

fn authority_matches(base: &Url, value: &Url) -> bool {
    if !base.scheme().eq_ignore_ascii_case(value.scheme()) {
        return false;
    }

    // A `localhost` base has been rewritten to a wildcard bind address, so
    // the request may carry any host name. Only the port still matters.
    if base.host_str() == Some("localhost") {
        return base.port_or_known_default() == value.port_or_known_default();
    }

    let hosts_match = match (base.host_str(), value.host_str()) {
        (Some(b), Some(v)) => b.eq_ignore_ascii_case(v),
        (None, None) => true,
        _ => false,
    };

    hosts_match && base.port_or_known_default() == value.port_or_known_default()
}

/// Strips the matched base path from `full`, yielding the app-local path.
///
/// Segments are zipped positionally: a full-URL segment is dropped when the
/// base has an equal segment at the same position, kept otherwise. The kept
/// segments are rejoined under a leading `/`.
pub(crate) fn app_local_path(base: &Url, full: &Url) -> String {
    let base_segments = segments(base);
    let full_segments = segments(full);

    let kept: Vec<&str> = full_segments
        .iter()
        .enumerate()
        .filter_map(|(i, seg)| match base_segments.get(i) {
            Some(b) if b.eq_ignore_ascii_case(seg) => None,
            _ => Some(*seg),
        })
        .collect();

    format!("/{}", kept.join("/"))
}

fn segments(url: &Url) -> Vec<&str> {
    url.path_segments().map(|s| s.collect()).unwrap_or_default()
}
