//! Vector normalization and similarity primitives.
//!
//! Every vector stored in or queried against the corpus index is an
//! [`EmbeddingVector`]: a dense `f64` vector with unit L2 norm. The only
//! way to obtain one from raw service output is [`normalize`], so cosine
//! similarity reduces to a dot product.
//!
//! Also provides the byte encoding used by corpus snapshots:
//! - [`vec_to_blob`]: encode `&[f64]` as little-endian bytes
//! - [`blob_to_vec`]: decode little-endian bytes back into `Vec<f64>`

use serde::Serialize;

use crate::error::{Error, Result};

/// A unit-norm embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingVector {
    values: Vec<f64>,
}

impl EmbeddingVector {
    /// Wrap values that are already known to be unit-norm (snapshot decode).
    pub(crate) fn from_normalized(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }
}

/// Euclidean length of `v`.
pub fn l2_norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Divide `v` by its L2 norm.
///
/// # Errors
///
/// [`Error::DegenerateVector`] if the norm is zero or not finite (empty
/// input, all zeros, NaN components).
///
/// # Example
///
/// ```rust
/// use compliance_harness_core::vector::normalize;
///
/// let v = normalize(vec![3.0, 4.0]).unwrap();
/// assert!((v.values()[0] - 0.6).abs() < 1e-12);
/// assert!((v.values()[1] - 0.8).abs() < 1e-12);
/// ```
pub fn normalize(mut v: Vec<f64>) -> Result<EmbeddingVector> {
    let norm = l2_norm(&v);
    if norm == 0.0 || !norm.is_finite() {
        return Err(Error::DegenerateVector);
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
    Ok(EmbeddingVector { values: v })
}

/// Cosine similarity of two unit vectors (their dot product).
///
/// # Errors
///
/// [`Error::DimensionMismatch`] when `a` and `b` differ in length; `a` is
/// treated as the reference dimension.
pub fn cosine_similarity(a: &EmbeddingVector, b: &EmbeddingVector) -> Result<f64> {
    if a.dimension() != b.dimension() {
        return Err(Error::DimensionMismatch {
            expected: a.dimension(),
            actual: b.dimension(),
        });
    }
    Ok(dot(&a.values, &b.values))
}

/// Inner product over equal-length slices. Callers check lengths.
pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Encode a float vector as little-endian `f64` bytes (`len × 8` bytes).
///
/// ```rust
/// use compliance_harness_core::vector::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f64, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 24);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f64]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 8);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode bytes produced by [`vec_to_blob`]. Trailing partial values are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f64> {
    blob.chunks_exact(8)
        .map(|chunk| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            f64::from_le_bytes(buf)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_has_unit_norm() {
        let inputs = vec![
            vec![1.0, 2.0, 3.0],
            vec![-0.5, 0.0, 12.0, 7.25],
            vec![1e-6, 1e-6],
            vec![42.0],
        ];
        for v in inputs {
            let n = normalize(v).unwrap();
            assert!((l2_norm(n.values()) - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn normalize_zero_vector_is_degenerate() {
        assert_eq!(normalize(vec![0.0, 0.0, 0.0]), Err(Error::DegenerateVector));
        assert_eq!(normalize(vec![]), Err(Error::DegenerateVector));
        assert_eq!(normalize(vec![f64::NAN, 1.0]), Err(Error::DegenerateVector));
    }

    #[test]
    fn cosine_of_self_is_one() {
        let v = normalize(vec![0.3, -1.7, 2.2]).unwrap();
        let sim = cosine_similarity(&v, &v).unwrap();
        assert!((sim - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_orthogonal_and_opposite() {
        let a = normalize(vec![1.0, 0.0]).unwrap();
        let b = normalize(vec![0.0, 5.0]).unwrap();
        let c = normalize(vec![-2.0, 0.0]).unwrap();
        assert!(cosine_similarity(&a, &b).unwrap().abs() < 1e-12);
        assert!((cosine_similarity(&a, &c).unwrap() + 1.0).abs() < 1e-12);
    }

    #[test]
    fn cosine_dimension_mismatch() {
        let a = normalize(vec![1.0, 2.0]).unwrap();
        let b = normalize(vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(
            cosine_similarity(&a, &b),
            Err(Error::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        );
    }

    #[test]
    fn blob_ignores_trailing_bytes() {
        let mut blob = vec_to_blob(&[1.5, -0.25]);
        blob.push(0xFF);
        assert_eq!(blob_to_vec(&blob), vec![1.5, -0.25]);
    }
}
