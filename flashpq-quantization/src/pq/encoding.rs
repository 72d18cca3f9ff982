/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use flashpq_vector::distance::distance_from_cosine_similarity;

/// The output of [`PQQuantizer::encode`](super::PQQuantizer::encode).
///
/// With ADC disabled a vector compresses to an `M`-byte code; with ADC
/// enabled a *query* vector expands into its per-query distance tables
/// instead. Keeping the two as distinct variants makes the asymmetric
/// distance contract (query tables on the left, codes on the right) a
/// type-level fact rather than a pointer-reinterpretation convention.
#[derive(Debug, Clone, PartialEq)]
pub enum Encoding {
    /// One byte per subvector, each in `[0, ks_per_subvector)`.
    Code(Box<[u8]>),

    /// Per-query lookup tables for asymmetric distance computation.
    QueryTable(QueryDistanceTable),
}

impl Encoding {
    /// The compact code, if this encoding was produced with ADC disabled.
    pub fn as_code(&self) -> Option<&[u8]> {
        match self {
            Encoding::Code(code) => Some(code),
            Encoding::QueryTable(_) => None,
        }
    }

    /// The query tables, if this encoding was produced with ADC enabled.
    pub fn as_query_table(&self) -> Option<&QueryDistanceTable> {
        match self {
            Encoding::Code(_) => None,
            Encoding::QueryTable(table) => Some(table),
        }
    }

    /// Size of this encoding in bytes, matching
    /// [`PQQuantizer::code_size`](super::PQQuantizer::code_size) for the mode
    /// that produced it.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            Encoding::Code(code) => code.len(),
            Encoding::QueryTable(table) => std::mem::size_of_val(table.as_slice()),
        }
    }
}

/// Precomputed distances between one query and every centroid, used for
/// asymmetric (query-to-code) distance computation.
///
/// The backing buffer holds `2 * M * K` floats: the first `M * K` entries
/// are squared-L2 partials, the next `M * K` are cosine-similarity partials.
/// Within each block the entry for subvector `s` and centroid `j` lives at
/// `s * K + j`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDistanceTable {
    tables: Box<[f32]>,
    num_subvectors: usize,
    ks_per_subvector: usize,
}

impl QueryDistanceTable {
    pub(crate) fn new(tables: Box<[f32]>, num_subvectors: usize, ks_per_subvector: usize) -> Self {
        debug_assert_eq!(tables.len(), 2 * num_subvectors * ks_per_subvector);
        Self {
            tables,
            num_subvectors,
            ks_per_subvector,
        }
    }

    /// Number of subvectors (`M`) this table was built for.
    pub fn num_subvectors(&self) -> usize {
        self.num_subvectors
    }

    /// Number of centroids per subvector (`K`) this table was built for.
    pub fn ks_per_subvector(&self) -> usize {
        self.ks_per_subvector
    }

    /// The squared-L2 half of the table.
    pub fn l2_partials(&self) -> &[f32] {
        &self.tables[..self.num_subvectors * self.ks_per_subvector]
    }

    /// The cosine-similarity half of the table.
    pub fn cosine_partials(&self) -> &[f32] {
        &self.tables[self.num_subvectors * self.ks_per_subvector..]
    }

    /// The full backing buffer in its wire layout: L2 block then cosine
    /// block, each strided `K` per subvector.
    pub fn as_slice(&self) -> &[f32] {
        &self.tables
    }

    /// Asymmetric squared-L2 distance between the query this table was built
    /// from and the compressed vector `code`.
    ///
    /// # Panics
    ///
    /// Panics if `code` does not hold exactly `M` entries or contains a byte
    /// outside `[0, K)`.
    pub fn l2_distance(&self, code: &[u8]) -> f32 {
        self.accumulate(self.l2_partials(), code)
    }

    /// Asymmetric cosine distance between the query this table was built
    /// from and the compressed vector `code`.
    ///
    /// # Panics
    ///
    /// Panics if `code` does not hold exactly `M` entries or contains a byte
    /// outside `[0, K)`.
    pub fn cosine_distance(&self, code: &[u8]) -> f32 {
        distance_from_cosine_similarity(self.accumulate(self.cosine_partials(), code))
    }

    fn accumulate(&self, partials: &[f32], code: &[u8]) -> f32 {
        assert_eq!(
            code.len(),
            self.num_subvectors,
            "PQ code must have {} entries",
            self.num_subvectors
        );
        assert!(
            code.iter().all(|&center| (center as usize) < self.ks_per_subvector),
            "PQ code byte out of range for {} centers",
            self.ks_per_subvector
        );

        code.iter()
            .enumerate()
            .map(|(subvector, &center)| partials[subvector * self.ks_per_subvector + center as usize])
            .sum()
    }
}
