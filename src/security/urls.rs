use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, ToSocketAddrs};

use url::Url;

use crate::core::errors::AgentError;

/// Validate a URL for outbound fetching.
///
/// Rejects non-http(s) schemes and any host that is, or resolves to, a
/// private / link-local / metadata address. For named hosts every resolved
/// address is checked; DNS failure is permitted (the fetch itself will fail).
/// Must run before any network I/O.
pub fn validate_url(raw: &str, allow_localhost: bool) -> Result<Url, AgentError> {
    let parsed = Url::parse(raw)
        .map_err(|e| AgentError::validation(format!("invalid URL '{}': {}", raw, e)))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(AgentError::security(format!(
                "URL scheme '{}' is not allowed (http/https only)",
                other
            )));
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| AgentError::validation("URL has no host"))?;

    // Literal IP hosts are checked directly.
    if let Ok(ip) = host.trim_matches(['[', ']']).parse::<IpAddr>() {
        if is_blocked_ip(ip, allow_localhost) {
            return Err(AgentError::security(format!(
                "URL host {} is in a restricted address range",
                ip
            )));
        }
        return Ok(parsed);
    }

    // Well-known metadata hostnames never need a lookup to be rejected.
    let lowered = host.to_ascii_lowercase();
    if lowered == "metadata.google.internal" || lowered == "instance-data" {
        return Err(AgentError::security(format!(
            "URL host {} is a restricted metadata endpoint",
            host
        )));
    }
    if !allow_localhost && (lowered == "localhost" || lowered.ends_with(".localhost")) {
        return Err(AgentError::security("URL host is localhost"));
    }

    // Resolve A/AAAA records and check every address. A failed lookup passes;
    // the subsequent fetch will surface the error.
    let port = parsed.port_or_known_default().unwrap_or(80);
    if let Ok(addrs) = (host, port).to_socket_addrs() {
        for addr in addrs {
            if is_blocked_ip(addr.ip(), allow_localhost) {
                return Err(AgentError::security(format!(
                    "URL host {} resolves to restricted address {}",
                    host,
                    addr.ip()
                )));
            }
        }
    }

    Ok(parsed)
}

/// True when the address falls in a range the agent must never contact:
/// current-network, RFC1918, CGNAT, loopback, link-local (cloud metadata),
/// 192.0.0.0/24, benchmarking, or IPv6 loopback / unique-local / link-local.
pub fn is_blocked_ip(ip: IpAddr, allow_localhost: bool) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_v4(v4, allow_localhost),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_blocked_v4(mapped, allow_localhost);
            }
            is_blocked_v6(v6, allow_localhost)
        }
    }
}

fn is_blocked_v4(v4: Ipv4Addr, allow_localhost: bool) -> bool {
    let [a, b, _, _] = v4.octets();
    if v4.is_loopback() {
        return !allow_localhost;
    }
    a == 0                                  // 0.0.0.0/8
        || a == 10                          // 10.0.0.0/8
        || (a == 100 && (64..=127).contains(&b)) // 100.64.0.0/10
        || (a == 169 && b == 254)           // 169.254.0.0/16 incl. metadata
        || (a == 172 && (16..=31).contains(&b)) // 172.16.0.0/12
        || (a == 192 && b == 0 && v4.octets()[2] == 0) // 192.0.0.0/24
        || (a == 192 && b == 168)           // 192.168.0.0/16
        || (a == 198 && (b == 18 || b == 19)) // 198.18.0.0/15
}

fn is_blocked_v6(v6: Ipv6Addr, allow_localhost: bool) -> bool {
    if v6.is_loopback() {
        return !allow_localhost;
    }
    let seg0 = v6.segments()[0];
    v6.is_unspecified()
        || (seg0 & 0xfe00) == 0xfc00 // unique-local fc00::/7
        || (seg0 & 0xffc0) == 0xfe80 // link-local fe80::/10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_schemes() {
        assert!(validate_url("file:///etc/passwd", false).is_err());
        assert!(validate_url("gopher://x", false).is_err());
        assert!(validate_url("ftp://example.com/a", false).is_err());
    }

    #[test]
    fn rejects_loopback_and_metadata_literals() {
        for bad in [
            "http://127.0.0.1/",
            "http://169.254.169.254/latest/meta-data",
            "http://10.0.0.1/",
            "http://172.20.1.1/",
            "http://192.168.0.1/",
            "http://[::1]/",
            "http://0.0.0.0/",
            "http://100.64.1.1/",
            "http://192.0.0.10/",
            "http://198.18.0.5/",
            "http://198.19.255.1/",
        ] {
            assert!(validate_url(bad, false).is_err(), "should reject {}", bad);
        }
    }

    #[test]
    fn localhost_literal_allowed_when_opted_in() {
        assert!(validate_url("http://127.0.0.1:18789/health", true).is_ok());
        assert!(validate_url("http://[::1]:18789/health", true).is_ok());
    }

    #[test]
    fn localhost_name_rejected_by_default() {
        assert!(validate_url("http://localhost/admin", false).is_err());
        assert!(validate_url("http://app.localhost/", false).is_err());
    }

    #[test]
    fn metadata_hostnames_rejected_without_lookup() {
        assert!(validate_url("http://metadata.google.internal/computeMetadata/v1/", false).is_err());
    }

    #[test]
    fn public_literals_pass() {
        assert!(validate_url("https://1.1.1.1/", false).is_ok());
        assert!(validate_url("https://8.8.8.8/dns", false).is_ok());
    }

    #[test]
    fn v4_mapped_v6_is_checked_as_v4() {
        assert!(is_blocked_ip("::ffff:169.254.169.254".parse().unwrap(), false));
        assert!(is_blocked_ip("::ffff:10.1.2.3".parse().unwrap(), false));
        assert!(!is_blocked_ip("::ffff:8.8.8.8".parse().unwrap(), false));
    }

    #[test]
    fn range_edges_are_exact() {
        assert!(is_blocked_ip("100.64.0.0".parse().unwrap(), false));
        assert!(is_blocked_ip("100.127.255.255".parse().unwrap(), false));
        assert!(!is_blocked_ip("100.63.255.255".parse().unwrap(), false));
        assert!(!is_blocked_ip("100.128.0.0".parse().unwrap(), false));
        assert!(is_blocked_ip("172.16.0.0".parse().unwrap(), false));
        assert!(is_blocked_ip("172.31.255.255".parse().unwrap(), false));
        assert!(!is_blocked_ip("172.32.0.0".parse().unwrap(), false));
        assert!(!is_blocked_ip("192.0.1.1".parse().unwrap(), false));
    }
}
