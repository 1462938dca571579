//! Catalog search capabilities consumed by the match engine.

use async_trait::async_trait;

use procura_models::CatalogOffer;
use procura_utils::ProcuraResult;

/// Part-number lookups against the supplier catalog. Inputs are already
/// normalized; only offers from active suppliers are returned.
#[async_trait]
pub trait CatalogSearch: Send + Sync {
    /// Offers whose normalized part or supplier part number equals `normalized`.
    async fn by_part_number(&self, normalized: &str) -> ProcuraResult<Vec<CatalogOffer>>;

    /// Offers whose normalized number contains `normalized` or is contained in it.
    async fn by_part_number_fragment(&self, normalized: &str) -> ProcuraResult<Vec<CatalogOffer>>;
}

/// Nearest-neighbour search over part descriptions.
#[async_trait]
pub trait EmbeddingSearch: Send + Sync {
    /// Offers for the `top_k` parts most similar to `text`, each paired with
    /// the cosine similarity of its part.
    async fn by_similarity(&self, text: &str, top_k: usize) -> ProcuraResult<Vec<(CatalogOffer, f64)>>;
}

/// Text embedding provider.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> ProcuraResult<Vec<f32>>;
}

/// Cosine similarity clamped to [0, 1]. Mismatched or zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    proptest::proptest! {
        #[test]
        fn prop_similarity_bounded_and_symmetric(
            pairs in proptest::collection::vec((-100.0f32..100.0, -100.0f32..100.0), 1..16)
        ) {
            let (a, b): (Vec<f32>, Vec<f32>) = pairs.into_iter().unzip();
            let ab = cosine_similarity(&a, &b);
            proptest::prop_assert!((0.0..=1.0).contains(&ab));
            proptest::prop_assert!((ab - cosine_similarity(&b, &a)).abs() < 1e-9);
        }
    }
}
