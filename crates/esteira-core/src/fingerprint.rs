//! Content-derived message identity.
//!
//! Two hashing schemes coexist: the current scheme hashes only the semantic
//! content (attributes stripped, stable key ordering), while the retired
//! scheme hashed the full serialized message, attributes included, which
//! made identity drift as bookkeeping changed. Both hashes travel in
//! [`Fingerprint::all`] so messages queued before the scheme change are
//! still recognized as duplicates.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::message::Message;

/// Stable identity of a message, independent of its mutable attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Hash under the current scheme; the key every new entry is stored under.
    pub latest: String,
    /// Every scheme's hash of this message, latest first, duplicate-free.
    pub all: Vec<String>,
}

/// Compute the message's fingerprint under all known schemes.
pub fn fingerprint(message: &Message) -> Fingerprint {
    let latest = hash_current(message);
    let legacy = hash_legacy(message);
    let mut all = vec![latest.clone()];
    if legacy != latest {
        all.push(legacy);
    }
    Fingerprint { latest, all }
}

/// Identity view serialized for the current scheme: semantic content only.
#[derive(Serialize)]
struct Identity<'a> {
    kind: &'a str,
    body: &'a serde_json::Value,
}

fn hash_current(message: &Message) -> String {
    // serde_json keeps object keys ordered, so serializing the identity
    // view yields a canonical byte string at every nesting level.
    let canonical = serde_json::to_string(&Identity {
        kind: &message.kind,
        body: &message.body,
    })
    .expect("JSON value serialization is infallible");
    digest128(format!("v2:{canonical}").as_bytes())
}

/// Retired scheme. Hashes the full message, attributes and all.
fn hash_legacy(message: &Message) -> String {
    let serialized =
        serde_json::to_string(message).expect("JSON value serialization is infallible");
    digest128(serialized.as_bytes())
}

/// First 128 bits of SHA-256, hex-encoded.
fn digest128(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> Message {
        Message::new(
            "run_stage",
            serde_json::json!({"execution": "exec-1", "stage": 3}),
        )
    }

    #[test]
    fn latest_ignores_attributes() {
        let clean = message();
        let mut mutated = message();
        mutated.attributes.attempts = 7;
        mutated.attributes.max_attempts = Some(3);
        mutated
            .attributes
            .extra
            .insert("tenant".to_string(), serde_json::json!("acme"));

        assert_eq!(fingerprint(&clean).latest, fingerprint(&mutated).latest);
    }

    #[test]
    fn latest_is_deterministic() {
        assert_eq!(fingerprint(&message()), fingerprint(&message()));
    }

    #[test]
    fn latest_is_independent_of_body_key_insertion_order() {
        let mut forward = serde_json::Map::new();
        forward.insert("alpha".to_string(), serde_json::json!(1));
        forward.insert("beta".to_string(), serde_json::json!(2));

        let mut reverse = serde_json::Map::new();
        reverse.insert("beta".to_string(), serde_json::json!(2));
        reverse.insert("alpha".to_string(), serde_json::json!(1));

        let a = Message::new("k", serde_json::Value::Object(forward));
        let b = Message::new("k", serde_json::Value::Object(reverse));
        assert_eq!(fingerprint(&a).latest, fingerprint(&b).latest);
    }

    #[test]
    fn different_content_hashes_differently() {
        let a = message();
        let b = Message::new(
            "run_stage",
            serde_json::json!({"execution": "exec-1", "stage": 4}),
        );
        assert_ne!(fingerprint(&a).latest, fingerprint(&b).latest);
    }

    #[test]
    fn all_carries_the_legacy_hash() {
        let fp = fingerprint(&message());
        assert_eq!(fp.all.len(), 2);
        assert_eq!(fp.all[0], fp.latest);
        assert_ne!(fp.all[1], fp.latest);
    }

    #[test]
    fn legacy_hash_shifts_with_attributes() {
        // The defect that retired the scheme: bookkeeping changes identity.
        let clean = message();
        let mut mutated = message();
        mutated.attributes.attempts = 1;
        assert_ne!(fingerprint(&clean).all[1], fingerprint(&mutated).all[1]);
    }

    #[test]
    fn hashes_are_128_bit_hex() {
        let fp = fingerprint(&message());
        for hash in &fp.all {
            assert_eq!(hash.len(), 32);
            assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }
}
