use std::path::Path;

use anyhow::{Context, Result};
use rand::RngCore;
use subtle::ConstantTimeEq;

const TOKEN_FILE: &str = ".gateway-token";

/// Load the gateway bearer token, generating a fresh 256-bit one on first
/// run. The file is written with owner-only permissions.
pub fn load_or_create_token(workspace: &Path) -> Result<String> {
    let path = workspace.join(TOKEN_FILE);
    if path.exists() {
        let token = std::fs::read_to_string(&path)
            .with_context(|| format!("cannot read gateway token {:?}", path))?;
        let token = token.trim().to_string();
        if !token.is_empty() {
            return Ok(token);
        }
    }

    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let token: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();

    std::fs::write(&path, &token)
        .with_context(|| format!("cannot write gateway token {:?}", path))?;
    crate::platform::restrict_file_permissions(&path);
    Ok(token)
}

/// Constant-time token comparison. Length differences short-circuit, which
/// leaks only the length; the token is fixed at 64 hex chars.
pub fn token_matches(expected: &str, presented: &str) -> bool {
    let a = expected.as_bytes();
    let b = presented.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn generates_64_hex_chars_once() {
        let tmp = tempdir().unwrap();
        let t1 = load_or_create_token(tmp.path()).unwrap();
        assert_eq!(t1.len(), 64);
        assert!(t1.chars().all(|c| c.is_ascii_hexdigit()));

        // Second load returns the persisted token, not a new one.
        let t2 = load_or_create_token(tmp.path()).unwrap();
        assert_eq!(t1, t2);
    }

    #[cfg(unix)]
    #[test]
    fn token_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tempdir().unwrap();
        load_or_create_token(tmp.path()).unwrap();
        let mode = std::fs::metadata(tmp.path().join(TOKEN_FILE))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn exact_token_matches_and_deviations_do_not() {
        let token = "ab".repeat(32);
        assert!(token_matches(&token, &token));

        // Any 1-byte deviation fails.
        let mut flipped = token.clone().into_bytes();
        flipped[17] = if flipped[17] == b'a' { b'b' } else { b'a' };
        assert!(!token_matches(&token, &String::from_utf8(flipped).unwrap()));

        assert!(!token_matches(&token, &token[..63]));
        assert!(!token_matches(&token, ""));
    }
}
