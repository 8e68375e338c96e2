//! Vector utilities: pseudo-embedding, cosine similarity, top-k selection.
//!
//! The pseudo-embedding is a deterministic stand-in for a real model. Each
//! lowercase alphanumeric token is fed byte by byte through an FNV-1a hash;
//! every intermediate hash bumps one bucket, so tokens sharing a prefix
//! ("return", "returns") share buckets. The result is L2-normalized.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

const FNV_OFFSET: u64 = 1469598103934665603;
const FNV_PRIME: u64 = 1099511628211;

/// Embed `text` into a normalized vector of `dim` buckets.
pub fn pseudo_embed(text: &str, dim: usize) -> Vec<f64> {
    let mut vec = vec![0.0f64; dim];
    if dim == 0 {
        return vec;
    }

    let lowered = text.to_lowercase();
    for token in lowered.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
        let mut h = FNV_OFFSET;
        for byte in token.bytes() {
            h ^= u64::from(byte);
            h = h.wrapping_mul(FNV_PRIME);
            vec[(h % dim as u64) as usize] += 1.0;
        }
    }

    let mut norm = vec.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm == 0.0 {
        norm = 1.0;
    }
    for v in &mut vec {
        *v /= norm;
    }
    vec
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 for mismatched lengths or a zero-norm side.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Move the `k` highest-scoring items to the front in descending order and
/// drop the rest. Partial selection sort: O(n·k), ties keep no stable order.
pub fn select_top_k<T>(items: &mut Vec<T>, k: usize, score: impl Fn(&T) -> f64) {
    let k = k.min(items.len());
    for i in 0..k {
        let mut max_idx = i;
        for j in (i + 1)..items.len() {
            if score(&items[j]) > score(&items[max_idx]) {
                max_idx = j;
            }
        }
        items.swap(i, max_idx);
    }
    items.truncate(k);
}

/// Little-endian f64 bytes, base64 encoded.
pub fn encode_vector(vec: &[f64]) -> String {
    let bytes: Vec<u8> = vec.iter().flat_map(|f| f.to_le_bytes()).collect();
    STANDARD.encode(bytes)
}

/// Inverse of [`encode_vector`]. `None` on bad base64 or a ragged length.
pub fn decode_vector(encoded: &str) -> Option<Vec<f64>> {
    let bytes = STANDARD.decode(encoded).ok()?;
    if bytes.len() % 8 != 0 {
        return None;
    }
    bytes
        .chunks_exact(8)
        .map(|chunk| chunk.try_into().ok().map(f64::from_le_bytes))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_is_normalized_and_deterministic() {
        let a = pseudo_embed("Returns are accepted within 30 days.", 384);
        let b = pseudo_embed("Returns are accepted within 30 days.", 384);
        assert_eq!(a, b);
        let norm: f64 = a.iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-9);
    }

    #[test]
    fn empty_text_embeds_to_zero_vector() {
        let v = pseudo_embed("  ...  ", 16);
        assert_eq!(v.len(), 16);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn shared_prefixes_score_higher() {
        let query = pseudo_embed("return policy", 384);
        let returns = pseudo_embed("Returns are accepted within 30 days.", 384);
        let shipping = pseudo_embed("Shipping takes 3-5 business days.", 384);
        assert!(cosine_similarity(&query, &returns) > cosine_similarity(&query, &shipping));
    }

    #[test]
    fn cosine_identical_and_orthogonal() {
        assert!((cosine_similarity(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
    }

    #[test]
    fn cosine_mismatched_or_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn top_k_is_bounded_and_descending() {
        let mut items = vec![0.2, 0.9, 0.1, 0.5, 0.7];
        select_top_k(&mut items, 3, |x| *x);
        assert_eq!(items, vec![0.9, 0.7, 0.5]);

        let mut few = vec![0.3, 0.4];
        select_top_k(&mut few, 10, |x| *x);
        assert_eq!(few, vec![0.4, 0.3]);
    }

    #[test]
    fn vector_encoding_roundtrip_and_rejects_ragged() {
        let v = vec![0.5, -1.25, 3.0];
        assert_eq!(decode_vector(&encode_vector(&v)), Some(v));
        assert_eq!(decode_vector(&STANDARD.encode([1u8, 2, 3])), None);
        assert_eq!(decode_vector("not base64!"), None);
    }
}
