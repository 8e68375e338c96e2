//! Content-addressed memory versions.

use sha2::{Digest, Sha256};

/// `hex(SHA-256(model ‖ 0x00 ‖ doc₁ ‖ 0x00 ‖ doc₂ …))`.
///
/// Identical documents under the same model identifier always produce the
/// same version, however many times they are ingested.
pub fn content_version<S: AsRef<str>>(documents: &[S], model: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    for doc in documents {
        hasher.update([0u8]);
        hasher.update(doc.as_ref().as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_input_same_version() {
        let docs = ["x", "y"];
        assert_eq!(content_version(&docs, "bge-small-en"), content_version(&docs, "bge-small-en"));
    }

    #[test]
    fn model_and_boundaries_matter() {
        let base = content_version(&["x", "y"], "m");
        assert_ne!(base, content_version(&["x", "y"], "other"));
        assert_ne!(base, content_version(&["xy"], "m"));
        assert_eq!(base.len(), 64);
    }

    #[test]
    fn known_digest() {
        // sha256 of the bytes "m\0x"
        let expected = {
            let mut h = Sha256::new();
            h.update(b"m\x00x");
            hex::encode(h.finalize())
        };
        assert_eq!(content_version(&["x"], "m"), expected);
    }
}
