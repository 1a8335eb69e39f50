//! Key and channel naming for the log-stream supervisor.
//!
//! Per zone and pod, three keys live in the key-value store:
//!
//! - `logs:<zone>:<pod>`: liveness key; its expiry drives the control
//!   role's state machine
//! - `logs:<zone>:<pod>:owner`: ownership key held by the streaming
//!   worker
//! - `logs:<zone>:<pod>:last`: resume point, an RFC 3339 timestamp
//!
//! Work is announced on the `queue:logs:<zone>` channel.

/// Liveness key for a pod.
#[must_use]
pub fn pod_key(zone: &str, pod: &str) -> String {
    format!("logs:{zone}:{pod}")
}

/// Ownership key for a pod's log stream.
#[must_use]
pub fn owner_key(zone: &str, pod: &str) -> String {
    format!("logs:{zone}:{pod}:owner")
}

/// Resume-point key for a pod's log stream.
#[must_use]
pub fn last_logged_key(zone: &str, pod: &str) -> String {
    format!("logs:{zone}:{pod}:last")
}

/// Queue channel announcing log work in a zone.
#[must_use]
pub fn queue_channel(zone: &str) -> String {
    format!("queue:logs:{zone}")
}

/// Pattern matching exactly the liveness keys of a zone. Pod names
/// contain no colons, so the `:owner` and `:last` keys never match.
#[must_use]
pub fn pod_key_pattern(zone: &str) -> String {
    format!("^logs:{}:[A-Za-z0-9-]+$", regex_escape(zone))
}

/// Extracts the pod name from a liveness key of the given zone.
#[must_use]
pub fn pod_from_key<'a>(zone: &str, key: &'a str) -> Option<&'a str> {
    let rest = key.strip_prefix("logs:")?.strip_prefix(zone)?;
    let pod = rest.strip_prefix(':')?;
    (!pod.is_empty() && !pod.contains(':')).then_some(pod)
}

// Zone names are operator-controlled, but a literal dot in a zone name
// must not widen the pattern.
fn regex_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if !c.is_alphanumeric() && c != '-' && c != '_' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
