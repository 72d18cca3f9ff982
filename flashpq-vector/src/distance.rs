/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Elementwise distance kernels and the cosine distance/similarity mapping.
//!
//! L2 throughout this library means *squared* L2; no square root is ever
//! taken. Cosine distances follow the `1 - similarity` convention, so
//! [`cosine_similarity_from_distance`] and [`distance_from_cosine_similarity`]
//! are exact inverses of one another.

use crate::VectorValue;

/// Squared L2 distance between two equal-length subvectors.
///
/// Non-negative. Panics if the lengths differ.
#[inline]
pub fn squared_l2<T: VectorValue>(x: &[T], y: &[T]) -> f32 {
    T::squared_l2(x, y)
}

/// Cosine distance between two equal-length subvectors in the library's
/// internal convention (`1 - <x, y>` on normalized inputs).
///
/// Panics if the lengths differ.
#[inline]
pub fn cosine<T: VectorValue>(x: &[T], y: &[T]) -> f32 {
    T::cosine(x, y)
}

/// Map a cosine distance produced by [`cosine`] back to a similarity.
#[inline(always)]
pub fn cosine_similarity_from_distance(distance: f32) -> f32 {
    1.0 - distance
}

/// Map a cosine similarity to the library's cosine distance convention.
#[inline(always)]
pub fn distance_from_cosine_similarity(similarity: f32) -> f32 {
    1.0 - similarity
}
