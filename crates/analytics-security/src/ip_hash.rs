//! Daily-rotating IP hashing, so stored event rows never carry a raw IP
//! address and hashes do not correlate across days.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Hash a client IP with a secret salted by the current UTC date.
pub fn hash_ip(ip: &str, secret: &str) -> String {
    let today = Utc::now().format("%Y-%m-%d").to_string();
    hash_ip_on(ip, secret, &today)
}

fn hash_ip_on(ip: &str, secret: &str, date: &str) -> String {
    let salted_key = format!("{secret}:{date}");
    let mut mac =
        HmacSha256::new_from_slice(salted_key.as_bytes()).expect("HMAC accepts a key of any length");
    mac.update(ip.as_bytes());
    let result = mac.finalize().into_bytes();
    result.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_ip_same_day_hashes_identically() {
        let a = hash_ip_on("203.0.113.7", "secret", "2026-07-30");
        let b = hash_ip_on("203.0.113.7", "secret", "2026-07-30");
        assert_eq!(a, b);
    }

    #[test]
    fn same_ip_different_day_hashes_differently() {
        let a = hash_ip_on("203.0.113.7", "secret", "2026-07-30");
        let b = hash_ip_on("203.0.113.7", "secret", "2026-07-31");
        assert_ne!(a, b);
    }

    #[test]
    fn different_ips_hash_differently() {
        let a = hash_ip_on("203.0.113.7", "secret", "2026-07-30");
        let b = hash_ip_on("203.0.113.8", "secret", "2026-07-30");
        assert_ne!(a, b);
    }

    #[test]
    fn output_is_lowercase_hex_of_sha256_length() {
        let h = hash_ip_on("127.0.0.1", "secret", "2026-07-30");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));
    }
}
