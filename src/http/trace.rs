//! W3C Trace Context Plumbing
//!
//! The service does not run a span exporter; it participates in distributed
//! traces at the interface level by accepting, minting, and forwarding
//! `traceparent` / `tracestate` headers in the W3C trace-context format:
//! `00-<32 hex trace id>-<16 hex parent id>-<2 hex flags>`.

use rand::RngCore;

/// Mints a sampled `traceparent` with random trace and parent IDs.
pub fn mint_traceparent() -> String {
    let mut rng = rand::thread_rng();

    let mut trace_id = [0u8; 16];
    rng.fill_bytes(&mut trace_id);
    let mut parent_id = [0u8; 8];
    rng.fill_bytes(&mut parent_id);

    format!(
        "00-{}-{}-01",
        hex_encode(&trace_id),
        hex_encode(&parent_id)
    )
}

/// Structural validation of an inbound `traceparent`. All-zero trace or
/// parent IDs are invalid per the spec.
pub fn is_valid_traceparent(value: &str) -> bool {
    let mut parts = value.split('-');
    let (version, trace_id, parent_id, flags) = match (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) {
        (Some(v), Some(t), Some(p), Some(f), None) => (v, t, p, f),
        _ => return false,
    };

    version.len() == 2
        && is_lower_hex(version)
        && version != "ff"
        && trace_id.len() == 32
        && is_lower_hex(trace_id)
        && trace_id.bytes().any(|b| b != b'0')
        && parent_id.len() == 16
        && is_lower_hex(parent_id)
        && parent_id.bytes().any(|b| b != b'0')
        && flags.len() == 2
        && is_lower_hex(flags)
}

fn is_lower_hex(s: &str) -> bool {
    s.bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_traceparent_is_valid() {
        let tp = mint_traceparent();
        assert!(is_valid_traceparent(&tp), "{}", tp);
    }

    #[test]
    fn accepts_wellformed_traceparent() {
        assert!(is_valid_traceparent(
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"
        ));
    }

    #[test]
    fn rejects_malformed_traceparents() {
        assert!(!is_valid_traceparent(""));
        assert!(!is_valid_traceparent("not-a-trace"));
        // Upper-case hex
        assert!(!is_valid_traceparent(
            "00-4BF92F3577B34DA6A3CE929D0E0E4736-00F067AA0BA902B7-01"
        ));
        // All-zero trace id
        assert!(!is_valid_traceparent(
            "00-00000000000000000000000000000000-00f067aa0ba902b7-01"
        ));
        // All-zero parent id
        assert!(!is_valid_traceparent(
            "00-4bf92f3577b34da6a3ce929d0e0e4736-0000000000000000-01"
        ));
        // Trailing garbage
        assert!(!is_valid_traceparent(
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01-extra"
        ));
    }
}
