//! Cache keys.

use sha2::{Digest, Sha256};

/// Key for a question: SHA-256 of its literal text, lowercase hex.
///
/// No normalization is applied, so only byte-identical questions share a
/// key. Near-duplicates are the nearest-neighbour search's job.
pub fn question_key(question: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(question.as_bytes());
    format!("{:x}", hasher.finalize())
}
