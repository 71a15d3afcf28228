use url::Url;

use crate::types::{Target, EMPTY_SLOT_KEY, PLACEHOLDER_TOKEN, UNKNOWN_KEY};

/// Query parameters that commonly carry the search identity on listing
/// pages, checked in order.
const KEY_PARAMS: &[&str] = &["q", "keyword", "brand", "category", "query"];

/// Resolve a raw descriptor into a target.
///
/// Resolution is a pure function of the descriptor, so re-resolving after a
/// script re-invocation always yields the same canonical key. A malformed
/// descriptor resolves to the `Unknown` sentinel instead of failing: one
/// bad line must not abort the whole batch.
pub fn resolve(raw_descriptor: &str, position: u32) -> Target {
    let raw = raw_descriptor.trim();
    let canonical_key = canonical_key(raw);
    tracing::debug!(position, key = %canonical_key, "resolved target");
    Target {
        raw_descriptor: raw.to_string(),
        position,
        canonical_key,
    }
}

/// Derive the canonical identity of a descriptor: the percent-decoded
/// search term for recognized query parameters, otherwise the decoded last
/// path segment.
pub fn canonical_key(raw: &str) -> String {
    if raw == PLACEHOLDER_TOKEN {
        return EMPTY_SLOT_KEY.to_string();
    }
    let url = match Url::parse(raw) {
        Ok(url) => url,
        Err(_) => return UNKNOWN_KEY.to_string(),
    };

    for param in KEY_PARAMS {
        if let Some((_, value)) = url.query_pairs().find(|(k, _)| k == param) {
            let value = value.trim();
            if !value.is_empty() {
                return value.to_string();
            }
        }
    }

    let segment = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last());
    match segment {
        Some(segment) => match urlencoding::decode(segment) {
            Ok(decoded) => decoded.into_owned(),
            Err(_) => segment.to_string(),
        },
        None => UNKNOWN_KEY.to_string(),
    }
}

/// Parse a newline-delimited submission into an ordered target list with
/// positions `0..n-1`. Blank lines are dropped before positions are
/// assigned.
pub fn parse_target_list(input: &str) -> Vec<Target> {
    input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .enumerate()
        .map(|(position, line)| resolve(line, position as u32))
        .collect()
}
