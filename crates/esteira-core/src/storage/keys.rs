//! Key encoding for the score-ordered index column families.
//!
//! Scores are 8-byte big-endian so lexicographic iteration matches numeric
//! order. Index keys are score-first (`{score}:{fingerprint}`), which makes
//! "scan from earliest" a forward iteration from the start of the column
//! family. Composite keys use `:` (0x3A) as separator.

const SEPARATOR: u8 = b':';

/// Encode a score as 8 big-endian bytes.
pub fn encode_score(score: u64) -> [u8; 8] {
    score.to_be_bytes()
}

/// Decode an 8-byte big-endian score.
pub fn decode_score(bytes: &[u8]) -> Option<u64> {
    let arr: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_be_bytes(arr))
}

/// Build an index key: `{score}:{fingerprint}`.
pub fn index_key(score: u64, fingerprint: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(9 + fingerprint.len());
    key.extend_from_slice(&encode_score(score));
    key.push(SEPARATOR);
    key.extend_from_slice(fingerprint.as_bytes());
    key
}

/// Split an index key back into `(score, fingerprint)`.
pub fn parse_index_key(key: &[u8]) -> Option<(u64, String)> {
    if key.len() < 10 || key[8] != SEPARATOR {
        return None;
    }
    let score = decode_score(&key[..8])?;
    let fingerprint = std::str::from_utf8(&key[9..]).ok()?.to_string();
    Some((score, fingerprint))
}
