//! Slack request-signature verification.
//!
//! The signature header carries `v0=<hex>` over the basestring
//! `v0:{timestamp}:{body}`, HMAC-SHA256 keyed with the signing secret. The
//! timestamp must be within the freshness tolerance in either direction.

use {
    hmac::{Hmac, Mac},
    sha2::Sha256,
    tracing::{info, warn},
};

type HmacSha256 = Hmac<Sha256>;

/// Verify a webhook signature at the given wall-clock time.
pub fn verify(
    signing_secret: &str,
    timestamp: Option<&str>,
    signature: Option<&str>,
    body: &[u8],
    tolerance_secs: u64,
    now: i64,
) -> bool {
    if signing_secret.is_empty() {
        warn!("webhook rejected: signing secret not configured");
        return false;
    }

    let (Some(timestamp), Some(signature)) = (timestamp, signature) else {
        info!("webhook rejected: missing signature headers");
        return false;
    };

    let Ok(request_ts) = timestamp.parse::<i64>() else {
        info!("webhook rejected: invalid timestamp");
        return false;
    };

    if (now - request_ts).unsigned_abs() > tolerance_secs {
        info!(request_ts, now, tolerance_secs, "webhook rejected: stale timestamp");
        return false;
    }

    let Ok(mut mac) = HmacSha256::new_from_slice(signing_secret.as_bytes()) else {
        warn!("webhook rejected: failed to create HMAC");
        return false;
    };
    mac.update(b"v0:");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    let expected = format!("v0={}", hex::encode(mac.finalize().into_bytes()));

    constant_time_eq(&expected, signature)
}

/// Constant-time string comparison.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0, |acc, (x, y)| acc | (x ^ y))
        == 0
}
