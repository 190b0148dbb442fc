//! Connect-URL derivation for relay and signal sockets.
//!
//! The scheme defaults to `wss://` except for plainly local or private
//! hosts, which get `ws://`. A host that already carries an explicit
//! scheme is used verbatim. Credentials ride in the query string, so any
//! logging of these URLs must go through
//! [`sanitize_url`](crate::logging::sanitize_url).

/// Whether a host (optionally `host:port`) is plainly local or private.
#[must_use]
pub fn is_private_host(host: &str) -> bool {
    let bare = host.split(':').next().unwrap_or(host);
    if bare == "localhost" {
        return true;
    }
    if bare.starts_with("127.")
        || bare.starts_with("10.")
        || bare.starts_with("192.168.")
        || bare.starts_with("100.")
    {
        return true;
    }
    // 172.16.0.0/12
    if let Some(rest) = bare.strip_prefix("172.") {
        if let Some(second) = rest.split('.').next() {
            if let Ok(octet) = second.parse::<u8>() {
                return (16..=31).contains(&octet);
            }
        }
    }
    false
}

/// Build a WebSocket URL for `host` with the given path and query.
///
/// `query` must already be percent-encoded by the caller where needed.
#[must_use]
pub fn derive_url(host: &str, path: &str, query: &str) -> String {
    let base = if host.starts_with("ws://") || host.starts_with("wss://") {
        host.trim_end_matches('/').to_string()
    } else {
        let scheme = if is_private_host(host) { "ws" } else { "wss" };
        format!("{scheme}://{}", host.trim_end_matches('/'))
    };
    format!("{base}{path}?{query}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_and_private_hosts() {
        assert!(is_private_host("localhost"));
        assert!(is_private_host("localhost:9100"));
        assert!(is_private_host("127.0.0.1"));
        assert!(is_private_host("10.1.2.3"));
        assert!(is_private_host("192.168.0.10"));
        assert!(is_private_host("100.64.0.1"));
        assert!(is_private_host("172.16.0.1"));
        assert!(is_private_host("172.31.255.255"));
    }

    #[test]
    fn public_hosts() {
        assert!(!is_private_host("relay.pumpamp.com"));
        assert!(!is_private_host("172.15.0.1"));
        assert!(!is_private_host("172.32.0.1"));
        assert!(!is_private_host("1270.0.0.1"));
        assert!(!is_private_host("localhost.example.com"));
    }

    #[test]
    fn derives_scheme_by_host() {
        assert_eq!(
            derive_url("relay.pumpamp.com", "/api/v1/relay", "api_key=k"),
            "wss://relay.pumpamp.com/api/v1/relay?api_key=k"
        );
        assert_eq!(
            derive_url("127.0.0.1:9100", "/api/v1/relay", "api_key=k"),
            "ws://127.0.0.1:9100/api/v1/relay?api_key=k"
        );
    }

    #[test]
    fn explicit_scheme_is_verbatim() {
        assert_eq!(
            derive_url("ws://relay.pumpamp.com", "/api/v1/relay", "api_key=k"),
            "ws://relay.pumpamp.com/api/v1/relay?api_key=k"
        );
        assert_eq!(
            derive_url("wss://relay.internal:8443", "/api/v1/relay", "api_key=k"),
            "wss://relay.internal:8443/api/v1/relay?api_key=k"
        );
    }
}
