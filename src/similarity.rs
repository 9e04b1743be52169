use crate::features::Embedding;

/// Cosine similarity in `[-1, 1]`. Returns 0 when either vector has zero norm.
pub fn cosine_similarity(a: &Embedding, b: &Embedding) -> f64 {
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.as_slice().iter().zip(b.as_slice()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}
