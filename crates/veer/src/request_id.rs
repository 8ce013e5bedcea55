//! Opaque request identifiers.
//!
//! Identifiers are process-unique counters, but their raw value never
//! reaches human-readable output: `Display` and `Debug` both render an
//! opaque label built from letters that are not hex digits, and
//! [`RequestId::redact`] scrubs the raw decimal/hex forms from arbitrary
//! text (handler error payloads, rendered events).

use once_cell::sync::Lazy;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Sixteen letters, none of them valid hex or decimal digits.
const LABEL_ALPHABET: &[u8; 16] = b"ghjkmnpqrstvwxyz";

/// Seeded away from small values so a raw id never collides with ordinary
/// numbers (status codes, mapping indexes) during redaction.
static NEXT_REQUEST_ID: Lazy<AtomicU64> = Lazy::new(|| {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    AtomicU64::new((mix(nanos) >> 8) | (1 << 48))
});

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    /// Allocate the next identifier.
    pub fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value, for in-process correlation only.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Opaque label used in every rendered form.
    pub fn label(&self) -> String {
        let mut hashed = mix(self.0);
        let mut label = String::with_capacity(12);
        label.push_str("req-");
        for _ in 0..8 {
            label.push(LABEL_ALPHABET[(hashed & 0xF) as usize] as char);
            hashed >>= 4;
        }
        label
    }

    /// Replace every decimal or hexadecimal rendering of this id in `text`.
    pub fn redact(&self, text: &str) -> String {
        let label = self.label();
        let forms = [
            format!("0x{:x}", self.0),
            format!("0X{:X}", self.0),
            format!("{:x}", self.0),
            format!("{:X}", self.0),
            self.0.to_string(),
        ];
        let mut redacted = text.to_string();
        for form in forms.iter() {
            if redacted.contains(form.as_str()) {
                redacted = redacted.replace(form.as_str(), &label);
            }
        }
        redacted
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({})", self.label())
    }
}

// splitmix64 finalizer
fn mix(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}
