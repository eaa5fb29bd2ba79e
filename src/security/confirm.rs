use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Settings values that must not be applied without an explicit one-time
/// confirmation token: (key, value that requires confirmation, reason).
pub const DANGEROUS_SETTINGS: &[(&str, &str, &str)] = &[
    (
        "sandbox_enabled",
        "false",
        "Disabling the path jail lets tools read and write anywhere on the host",
    ),
    (
        "ssrf_protection",
        "false",
        "Disabling SSRF protection allows requests to internal and metadata addresses",
    ),
    (
        "injection_guard",
        "false",
        "Disabling injection framing feeds untrusted content to the model unmarked",
    ),
    (
        "gateway_auth",
        "false",
        "Disabling gateway auth exposes the control plane to anything that can reach the port",
    ),
    (
        "audit_enabled",
        "false",
        "Disabling the audit log removes the record of every tool invocation",
    ),
    (
        "allow_localhost_urls",
        "true",
        "Allowing localhost URLs lets fetches reach services bound to loopback",
    ),
    (
        "autonomy_level",
        "\"high\"",
        "High autonomy executes dangerous tools without asking for approval",
    ),
];

/// Width of one confirmation window. Tokens verify against the current and
/// previous bucket, so a token is good for 10–20 minutes.
const BUCKET_MINUTES: u64 = 10;

fn bucket_at(unix_secs: u64) -> u64 {
    unix_secs / 60 / BUCKET_MINUTES
}

fn now_bucket() -> u64 {
    bucket_at(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
    )
}

fn token_for_bucket(secret: &str, key: &str, value: &str, bucket: u64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(format!("{}={}:{}", key, value, bucket).as_bytes());
    let digest = mac.finalize().into_bytes();
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Deterministic confirmation token for setting `key` to `value` within the
/// current time bucket. `value` is the canonical JSON encoding.
pub fn confirmation_token(secret: &str, key: &str, value: &Value) -> String {
    token_for_bucket(secret, key, &value.to_string(), now_bucket())
}

/// Check a presented token against the current and previous buckets.
pub fn verify_confirmation(secret: &str, key: &str, value: &Value, presented: &str) -> bool {
    let value = value.to_string();
    let bucket = now_bucket();
    presented == token_for_bucket(secret, key, &value, bucket)
        || presented == token_for_bucket(secret, key, &value, bucket.saturating_sub(1))
}

/// If setting `key` to `value` is dangerous, return the human-readable
/// reason; otherwise `None`.
pub fn dangerous_reason(key: &str, value: &Value) -> Option<&'static str> {
    DANGEROUS_SETTINGS
        .iter()
        .find(|(k, v, _)| *k == key && value.to_string() == *v)
        .map(|(_, _, reason)| *reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dangerous_table_matches_exact_key_value_pairs() {
        assert!(dangerous_reason("sandbox_enabled", &json!(false)).is_some());
        assert!(dangerous_reason("sandbox_enabled", &json!(true)).is_none());
        assert!(dangerous_reason("autonomy_level", &json!("high")).is_some());
        assert!(dangerous_reason("autonomy_level", &json!("medium")).is_none());
        assert!(dangerous_reason("shell_timeout_secs", &json!(0)).is_none());
    }

    #[test]
    fn token_roundtrip_verifies() {
        let secret = "s3cret";
        let value = json!(false);
        let token = confirmation_token(secret, "gateway_auth", &value);
        assert_eq!(token.len(), 16);
        assert!(verify_confirmation(secret, "gateway_auth", &value, &token));
    }

    #[test]
    fn token_is_bound_to_key_value_and_secret() {
        let value = json!(false);
        let token = confirmation_token("secret-a", "gateway_auth", &value);
        assert!(!verify_confirmation("secret-b", "gateway_auth", &value, &token));
        assert!(!verify_confirmation("secret-a", "audit_enabled", &value, &token));
        assert!(!verify_confirmation("secret-a", "gateway_auth", &json!(true), &token));
        assert!(!verify_confirmation("secret-a", "gateway_auth", &value, "deadbeefdeadbeef"));
    }

    #[test]
    fn previous_bucket_token_still_verifies() {
        let secret = "s";
        let value = "false".to_string();
        let bucket = now_bucket();
        let old = token_for_bucket(secret, "gateway_auth", &value, bucket - 1);
        assert!(verify_confirmation(secret, "gateway_auth", &json!(false), &old));
        let ancient = token_for_bucket(secret, "gateway_auth", &value, bucket - 2);
        assert!(!verify_confirmation(secret, "gateway_auth", &json!(false), &ancient));
    }
}
