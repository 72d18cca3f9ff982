/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Vectorized accumulation over the flat symmetric distance tables.
//!
//! The symmetric distance kernels reduce to summing one table entry per
//! subvector at offset `s*K*K + x[s]*K + y[s]`. On x86-64 with AVX2 the sum
//! gathers eight entries per iteration; everywhere else a scalar loop is
//! used. Both paths agree within floating-point reassociation error.

/// Sum `tables[s*K*K + x[s]*K + y[s]]` over every subvector `s`.
///
/// # Panics
///
/// Panics if `x` and `y` differ in length or contain a byte outside
/// `[0, ks_per_subvector)`.
pub(crate) fn lookup_table_sum(tables: &[f32], ks_per_subvector: usize, x: &[u8], y: &[u8]) -> f32 {
    assert_eq!(x.len(), y.len());
    assert!(
        std::iter::zip(x.iter(), y.iter()).all(|(&a, &b)| {
            (a as usize) < ks_per_subvector && (b as usize) < ks_per_subvector
        }),
        "PQ code byte out of range for {} centers",
        ks_per_subvector
    );
    debug_assert_eq!(tables.len(), x.len() * ks_per_subvector * ks_per_subvector);

    #[cfg(target_arch = "x86_64")]
    {
        // Gather offsets are built in 32-bit lanes; fall back when the table
        // cannot be addressed with them.
        if tables.len() <= i32::MAX as usize && std::arch::is_x86_feature_detected!("avx2") {
            // SAFETY: AVX2 support was just verified and every offset was
            // bounds-checked against the table length above.
            return unsafe { lookup_table_sum_avx2(tables, ks_per_subvector, x, y) };
        }
    }

    lookup_table_sum_scalar(tables, ks_per_subvector, x, y)
}

/// Scalar reference for [`lookup_table_sum`].
pub(crate) fn lookup_table_sum_scalar(
    tables: &[f32],
    ks_per_subvector: usize,
    x: &[u8],
    y: &[u8],
) -> f32 {
    let block = ks_per_subvector * ks_per_subvector;
    std::iter::zip(x.iter(), y.iter())
        .enumerate()
        .map(|(subvector, (&a, &b))| {
            tables[subvector * block + (a as usize) * ks_per_subvector + b as usize]
        })
        .sum()
}

/// Gather-based accumulation, eight subvectors per iteration.
///
/// # Safety
///
/// Requires AVX2. Every `x[s]` and `y[s]` must be less than
/// `ks_per_subvector` and `tables` must hold `x.len() * K * K` entries, so
/// each gathered offset is in bounds.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn lookup_table_sum_avx2(
    tables: &[f32],
    ks_per_subvector: usize,
    x: &[u8],
    y: &[u8],
) -> f32 {
    use std::arch::x86_64::*;

    let num_subvectors = x.len();
    let block = ks_per_subvector * ks_per_subvector;

    // SAFETY (whole body): intrinsic use is gated by the `target_feature`
    // attribute; all loads read 8 bytes at `s` with `s + 8 <= num_subvectors`
    // and all gathered offsets are bounds-checked by the caller.
    unsafe {
        let ks_lanes = _mm256_set1_epi32(ks_per_subvector as i32);
        let block_lanes = _mm256_set1_epi32(block as i32);
        let iota = _mm256_setr_epi32(0, 1, 2, 3, 4, 5, 6, 7);
        let mut accumulator = _mm256_setzero_ps();

        let mut s = 0usize;
        while s + 8 <= num_subvectors {
            // Widen 8 code bytes of each operand into 32-bit lanes.
            let x_lanes = _mm256_cvtepu8_epi32(_mm_loadl_epi64(x.as_ptr().add(s).cast()));
            let y_lanes = _mm256_cvtepu8_epi32(_mm_loadl_epi64(y.as_ptr().add(s).cast()));

            // offset = (s + lane)*K*K + x*K + y
            let bases =
                _mm256_mullo_epi32(_mm256_add_epi32(_mm256_set1_epi32(s as i32), iota), block_lanes);
            let offsets = _mm256_add_epi32(
                bases,
                _mm256_add_epi32(_mm256_mullo_epi32(x_lanes, ks_lanes), y_lanes),
            );

            let entries = _mm256_i32gather_ps::<4>(tables.as_ptr(), offsets);
            accumulator = _mm256_add_ps(accumulator, entries);
            s += 8;
        }

        let high = _mm256_extractf128_ps::<1>(accumulator);
        let low = _mm256_castps256_ps128(accumulator);
        let sum4 = _mm_add_ps(high, low);
        let sum2 = _mm_add_ps(sum4, _mm_movehl_ps(sum4, sum4));
        let sum1 = _mm_add_ss(sum2, _mm_shuffle_ps::<1>(sum2, sum2));
        let mut total = _mm_cvtss_f32(sum1);

        while s < num_subvectors {
            total += tables[s * block + (x[s] as usize) * ks_per_subvector + y[s] as usize];
            s += 1;
        }

        total
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng};

    use super::*;

    fn random_fixture(
        num_subvectors: usize,
        ks_per_subvector: usize,
        seed: u64,
    ) -> (Vec<f32>, Vec<u8>, Vec<u8>) {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let tables: Vec<f32> = (0..num_subvectors * ks_per_subvector * ks_per_subvector)
            .map(|_| rng.random_range(-10.0..10.0))
            .collect();
        let x: Vec<u8> = (0..num_subvectors)
            .map(|_| rng.random_range(0..ks_per_subvector) as u8)
            .collect();
        let y: Vec<u8> = (0..num_subvectors)
            .map(|_| rng.random_range(0..ks_per_subvector) as u8)
            .collect();
        (tables, x, y)
    }

    #[test]
    fn dispatch_matches_scalar_reference() {
        for num_subvectors in [1usize, 4, 7, 8, 9, 16, 33, 100] {
            for ks_per_subvector in [1usize, 2, 37, 256] {
                let (tables, x, y) =
                    random_fixture(num_subvectors, ks_per_subvector, 42 + num_subvectors as u64);
                let expected = lookup_table_sum_scalar(&tables, ks_per_subvector, &x, &y);
                let actual = lookup_table_sum(&tables, ks_per_subvector, &x, &y);
                let tolerance = 1e-5 * expected.abs().max(1.0);
                assert!(
                    (actual - expected).abs() <= tolerance,
                    "M={} K={}: {} vs {}",
                    num_subvectors,
                    ks_per_subvector,
                    actual,
                    expected
                );
            }
        }
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn avx2_matches_scalar_reference() {
        if !std::arch::is_x86_feature_detected!("avx2") {
            return;
        }

        for num_subvectors in [8usize, 12, 24, 64] {
            let (tables, x, y) = random_fixture(num_subvectors, 256, num_subvectors as u64);
            let expected = lookup_table_sum_scalar(&tables, 256, &x, &y);
            // SAFETY: AVX2 availability checked above; fixture codes are in
            // range by construction.
            let actual = unsafe { lookup_table_sum_avx2(&tables, 256, &x, &y) };
            let tolerance = 1e-5 * expected.abs().max(1.0);
            assert!((actual - expected).abs() <= tolerance);
        }
    }

    #[test]
    #[should_panic(expected = "PQ code byte out of range")]
    fn out_of_range_code_byte_panics() {
        let tables = vec![0.0f32; 2 * 2 * 2];
        lookup_table_sum(&tables, 2, &[0, 2], &[0, 0]);
    }
}
