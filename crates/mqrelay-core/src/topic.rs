//! Topic names, topic filters and wildcard matching.
//!
//! A topic name is what PUBLISH carries: no wildcards allowed. A topic
//! filter is what SUBSCRIBE carries: `+` matches exactly one level, a
//! trailing `#` matches the remaining levels including the parent, and a
//! `$share/<group>/` prefix marks a shared subscription. Matching assumes
//! the filter was validated on the way in.

use crate::error::{ProtocolError, Result};

/// UTF-8 byte limit both names and filters share on the wire.
pub const MAX_TOPIC_BYTES: usize = 65_535;

/// Whether `s` contains either wildcard character.
pub fn contains_wildcard(s: &str) -> bool {
    s.bytes().any(|b| b == b'+' || b == b'#')
}

/// Validate a PUBLISH topic name.
pub fn validate_name(topic: &str) -> Result<()> {
    if topic.is_empty() || topic.len() > MAX_TOPIC_BYTES {
        return Err(ProtocolError::TopicNameInvalid(topic.into()).into());
    }
    if topic.bytes().any(|b| b == b'+' || b == b'#' || b == 0) {
        return Err(ProtocolError::TopicNameInvalid(topic.into()).into());
    }
    Ok(())
}

/// Validate a SUBSCRIBE topic filter, including the `$share` form.
pub fn validate_filter(filter: &str) -> Result<()> {
    let (_, inner) = split_shared(filter)?;

    if inner.is_empty() || filter.len() > MAX_TOPIC_BYTES {
        return Err(ProtocolError::TopicFilterInvalid(filter.into()).into());
    }
    if inner.bytes().any(|b| b == 0) {
        return Err(ProtocolError::TopicFilterInvalid(filter.into()).into());
    }

    let mut levels = inner.split('/').peekable();
    while let Some(level) = levels.next() {
        match level {
            "+" => {}
            "#" => {
                // '#' must be the last level
                if levels.peek().is_some() {
                    return Err(ProtocolError::TopicFilterInvalid(filter.into()).into());
                }
            }
            other => {
                // Wildcards must occupy an entire level
                if other.contains('+') || other.contains('#') {
                    return Err(ProtocolError::TopicFilterInvalid(filter.into()).into());
                }
            }
        }
    }

    Ok(())
}

/// Split a `$share/<group>/<filter>` subscription into its group and inner
/// filter. Non-shared filters come back as `(None, filter)`.
///
/// A filter that starts with `$share/` but has an empty or wildcard-bearing
/// group name, or no inner filter at all, is invalid.
pub fn split_shared(filter: &str) -> Result<(Option<&str>, &str)> {
    let Some(rest) = filter.strip_prefix("$share/") else {
        return Ok((None, filter));
    };

    let Some((group, inner)) = rest.split_once('/') else {
        return Err(ProtocolError::TopicFilterInvalid(filter.into()).into());
    };

    if group.is_empty() || contains_wildcard(group) || inner.is_empty() {
        return Err(ProtocolError::TopicFilterInvalid(filter.into()).into());
    }

    Ok((Some(group), inner))
}

/// Enforce broker-configured topic limits.
pub fn check_limits(topic: &str, max_length: usize, max_levels: usize) -> Result<()> {
    if max_length > 0 && topic.len() > max_length {
        return Err(ProtocolError::TopicNameInvalid(topic.into()).into());
    }
    if max_levels > 0 && topic.split('/').count() > max_levels {
        return Err(ProtocolError::TopicNameInvalid(topic.into()).into());
    }
    Ok(())
}

/// Whether `filter` matches `topic`. `filter` must already be validated and
/// stripped of any `$share` prefix.
///
/// Topics starting with `$` are never matched by a filter whose first level
/// is a wildcard [MQTT-4.7.2-1].
pub fn matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    // Fast paths: catch-all, exact match, and the common "prefix/#" shape.
    if filter == "#" {
        return true;
    }
    if filter == topic {
        return true;
    }
    if !filter.contains('+') {
        if let Some(stem) = filter.strip_suffix("/#") {
            return topic == stem
                || (topic.len() > stem.len()
                    && topic.as_bytes()[stem.len()] == b'/'
                    && topic.starts_with(stem));
        }
        return false;
    }
    if filter == "+" {
        return !topic.contains('/');
    }

    segment_match(filter, topic)
}

fn segment_match(filter: &str, topic: &str) -> bool {
    let mut f = filter.split('/');
    let mut t = topic.split('/');

    loop {
        match (f.next(), t.next()) {
            // Trailing '#' swallows the rest, the parent level included.
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(level), Some(part)) if level == part => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
