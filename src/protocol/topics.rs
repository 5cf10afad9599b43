//! Device-side topic names and MQTT topic-filter matching
//!
//! Topics follow the ThingsBoard device API: telemetry and attributes are
//! published under `v1/devices/me/`, server-side RPC requests arrive on
//! `v1/devices/me/rpc/request/{request_id}`.

/// Inbound remote-command pattern (single-level wildcard on the request id)
pub const RPC_REQUEST_PATTERN: &str = "v1/devices/me/rpc/request/+";

/// Periodic device readings
pub const TELEMETRY_TOPIC: &str = "v1/devices/me/telemetry";

/// State-change notifications
pub const ATTRIBUTES_TOPIC: &str = "v1/devices/me/attributes";

/// Build the topic a single RPC request arrives on
pub fn rpc_request_topic(request_id: u32) -> String {
    format!("v1/devices/me/rpc/request/{request_id}")
}

/// Match a concrete topic name against an MQTT topic filter.
///
/// `+` matches exactly one level, `#` matches the remaining levels (including
/// none) and is only valid as the last level. Topics starting with `$` never
/// match a filter that starts with a wildcard.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
