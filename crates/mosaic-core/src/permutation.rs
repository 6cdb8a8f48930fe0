//! Permutations of index positions
//!
//! A [`Permutation`] is a bijection on the positions `0..rank`. It acts on
//! ordered sequences (coordinates, extents, index labels), on ranges, tiled
//! ranges, shapes, and tiles; everything that is "n-dimensional" in this
//! crate can be reordered by one.
//!
//! The action convention is `apply(p, s)[p[i]] = s[i]`: position `i` of the
//! source lands at position `p[i]` of the result. Composition follows the
//! usual right-to-left rule, so `apply(p * q, s) == apply(p, apply(q, s))`.

use std::ops::Mul;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A bijection on index positions `0..rank`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permutation {
    image: Box<[usize]>,
}

impl Permutation {
    /// Create a permutation from the image vector `image[i] = p(i)`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidPermutation`] when `image` is not a bijection on
    /// `0..image.len()`.
    pub fn new(image: Vec<usize>) -> Result<Self> {
        let mut seen = vec![false; image.len()];
        for &target in &image {
            if target >= image.len() || seen[target] {
                return Err(Error::InvalidPermutation(image));
            }
            seen[target] = true;
        }
        Ok(Self {
            image: image.into_boxed_slice(),
        })
    }

    /// The identity permutation on `rank` positions.
    pub fn identity(rank: usize) -> Self {
        Self {
            image: (0..rank).collect(),
        }
    }

    /// Number of positions this permutation acts on.
    pub fn rank(&self) -> usize {
        self.image.len()
    }

    /// `true` when every position maps to itself.
    pub fn is_identity(&self) -> bool {
        self.image.iter().enumerate().all(|(i, &target)| i == target)
    }

    /// Where position `i` is sent.
    pub fn map(&self, i: usize) -> usize {
        self.image[i]
    }

    /// The image vector.
    pub fn as_slice(&self) -> &[usize] {
        &self.image
    }

    /// The inverse permutation: `inverse().map(map(i)) == i`.
    pub fn inverse(&self) -> Self {
        let mut image = vec![0; self.image.len()];
        for (i, &target) in self.image.iter().enumerate() {
            image[target] = i;
        }
        Self {
            image: image.into_boxed_slice(),
        }
    }

    /// Apply to an ordered sequence: `result[p[i]] = seq[i]`.
    ///
    /// # Panics
    ///
    /// Panics when `seq.len() != self.rank()`; sequence/permutation rank
    /// mismatches are a caller bug.
    pub fn apply<T: Clone>(&self, seq: &[T]) -> Vec<T> {
        assert_eq!(
            seq.len(),
            self.image.len(),
            "permutation of rank {} applied to a sequence of length {}",
            self.image.len(),
            seq.len()
        );
        let mut result = seq.to_vec();
        for (i, &target) in self.image.iter().enumerate() {
            result[target] = seq[i].clone();
        }
        result
    }

    /// Apply the inverse without materializing it: `result[i] = seq[p[i]]`.
    pub fn apply_inverse<T: Clone>(&self, seq: &[T]) -> Vec<T> {
        assert_eq!(
            seq.len(),
            self.image.len(),
            "permutation of rank {} applied to a sequence of length {}",
            self.image.len(),
            seq.len()
        );
        self.image.iter().map(|&target| seq[target].clone()).collect()
    }
}

impl Mul for &Permutation {
    type Output = Permutation;

    /// Composition: `(p * q).map(i) == p.map(q.map(i))`.
    fn mul(self, rhs: &Permutation) -> Permutation {
        assert_eq!(
            self.rank(),
            rhs.rank(),
            "cannot compose permutations of ranks {} and {}",
            self.rank(),
            rhs.rank()
        );
        Permutation {
            image: rhs.image.iter().map(|&i| self.image[i]).collect(),
        }
    }
}

impl std::fmt::Display for Permutation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.image)
    }
}
