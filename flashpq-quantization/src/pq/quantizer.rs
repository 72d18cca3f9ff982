/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flashpq::{AnnError, AnnErrorKind, AnnResult, DimensionType, ErrorContext, SizeType};
use flashpq_vector::{
    distance::{cosine_similarity_from_distance, distance_from_cosine_similarity},
    VectorValue, VectorValueType,
};
use tracing::info;

use super::{
    encoding::{Encoding, QueryDistanceTable},
    factory::QuantizerType,
    simd,
};

/// Upper bound on centroids per subvector so that one code byte can address
/// every centroid.
pub const MAX_KS_PER_SUBVECTOR: usize = 256;

/// A product quantizer over codebooks of element kind `T`.
///
/// The quantizer partitions a `dim()`-dimensional feature space into
/// `num_subvectors` contiguous subspaces of `dim_per_subvector` dimensions
/// and holds `ks_per_subvector` centroids for each. Construction (and load)
/// precomputes the full symmetric inter-centroid distance tables, so the
/// symmetric distance kernels are pure table lookups.
///
/// After construction the codebook and tables are immutable; only the ADC
/// mode flag can change, and toggling it must be synchronized with in-flight
/// encodes because it changes what [`PQQuantizer::encode`] produces.
#[derive(Debug, Clone)]
pub struct PQQuantizer<T: VectorValue> {
    num_subvectors: usize,
    ks_per_subvector: usize,
    dim_per_subvector: usize,
    enable_adc: bool,

    /// `num_subvectors * ks_per_subvector * dim_per_subvector` elements,
    /// row-major: centroid `c` of subspace `s` starts at
    /// `(s*ks_per_subvector + c) * dim_per_subvector`.
    codebooks: Box<[T]>,

    /// Flat `M*K*K` tables; entry `(s, j, k)` at `s*K*K + j*K + k`.
    l2_distance_tables: Box<[f32]>,
    cosine_distance_tables: Box<[f32]>,
}

impl<T: VectorValue> PQQuantizer<T> {
    /// Build a quantizer from a trained codebook, taking ownership of the
    /// buffer.
    ///
    /// Fails if any dimension is zero, `ks_per_subvector` exceeds
    /// [`MAX_KS_PER_SUBVECTOR`], or the codebook length disagrees with the
    /// dimensions.
    pub fn new(
        num_subvectors: usize,
        ks_per_subvector: usize,
        dim_per_subvector: usize,
        enable_adc: bool,
        codebooks: Box<[T]>,
    ) -> AnnResult<Self> {
        if num_subvectors == 0 || ks_per_subvector == 0 || dim_per_subvector == 0 {
            return Err(AnnError::message(
                AnnErrorKind::QuantizerError,
                format!(
                    "quantizer dimensions must be positive (subvectors: {}, centers: {}, dim per subvector: {})",
                    num_subvectors, ks_per_subvector, dim_per_subvector
                ),
            ));
        }

        if ks_per_subvector > MAX_KS_PER_SUBVECTOR {
            return Err(AnnError::message(
                AnnErrorKind::QuantizerError,
                format!(
                    "{} centers per subvector cannot be addressed by one code byte (max {})",
                    ks_per_subvector, MAX_KS_PER_SUBVECTOR
                ),
            ));
        }

        let expected = num_subvectors * ks_per_subvector * dim_per_subvector;
        if codebooks.len() != expected {
            return Err(AnnError::message(
                AnnErrorKind::QuantizerError,
                format!(
                    "codebook holds {} elements but the dimensions require {}",
                    codebooks.len(),
                    expected
                ),
            ));
        }

        let mut quantizer = Self {
            num_subvectors,
            ks_per_subvector,
            dim_per_subvector,
            enable_adc,
            codebooks,
            l2_distance_tables: Vec::new().into_boxed_slice(),
            cosine_distance_tables: Vec::new().into_boxed_slice(),
        };
        quantizer.build_distance_tables();
        Ok(quantizer)
    }

    /// Both symmetric tables, built in one pass over the unordered centroid
    /// pairs and mirrored so symmetry holds exactly.
    fn build_distance_tables(&mut self) {
        let (m, k) = (self.num_subvectors, self.ks_per_subvector);
        let block = k * k;
        let mut l2_tables = vec![0.0f32; m * block];
        let mut cosine_tables = vec![0.0f32; m * block];

        for s in 0..m {
            for j in 0..k {
                let cj = self.centroid(s, j);
                for i in 0..=j {
                    let ci = self.centroid(s, i);
                    let l2 = T::squared_l2(cj, ci);
                    let similarity = cosine_similarity_from_distance(T::cosine(cj, ci));

                    l2_tables[s * block + j * k + i] = l2;
                    l2_tables[s * block + i * k + j] = l2;
                    cosine_tables[s * block + j * k + i] = similarity;
                    cosine_tables[s * block + i * k + j] = similarity;
                }
            }
        }

        self.l2_distance_tables = l2_tables.into_boxed_slice();
        self.cosine_distance_tables = cosine_tables.into_boxed_slice();
    }

    fn centroid(&self, subvector: usize, center: usize) -> &[T] {
        let start = (subvector * self.ks_per_subvector + center) * self.dim_per_subvector;
        &self.codebooks[start..start + self.dim_per_subvector]
    }

    /// Number of subvectors (`M`).
    pub fn num_subvectors(&self) -> usize {
        self.num_subvectors
    }

    /// Number of centroids per subvector (`K`).
    pub fn ks_per_subvector(&self) -> usize {
        self.ks_per_subvector
    }

    /// Dimensions per subvector (`Dsub`).
    pub fn dim_per_subvector(&self) -> usize {
        self.dim_per_subvector
    }

    /// Full feature dimension (`M * Dsub`).
    pub fn dim(&self) -> usize {
        self.num_subvectors * self.dim_per_subvector
    }

    /// Whether encoding currently produces per-query distance tables.
    pub fn enable_adc(&self) -> bool {
        self.enable_adc
    }

    /// Switch between symmetric-code and query-table encoding.
    ///
    /// Changes the meaning of subsequent [`PQQuantizer::encode`] outputs and
    /// of [`PQQuantizer::code_size`]; callers must not toggle this while
    /// encodes are in flight.
    pub fn set_enable_adc(&mut self, enable_adc: bool) {
        self.enable_adc = enable_adc;
    }

    /// The wire tag of this quantizer variant.
    pub fn quantizer_type(&self) -> QuantizerType {
        QuantizerType::PQ
    }

    /// The element kind vectors reconstruct to.
    pub fn reconstruct_type(&self) -> VectorValueType {
        T::VALUE_TYPE
    }

    /// Size in bytes of one [`PQQuantizer::encode`] output in the current
    /// mode: `M` bytes for a code, `2*M*K` floats for a query table.
    pub fn code_size(&self) -> usize {
        if self.enable_adc {
            2 * self.num_subvectors * self.ks_per_subvector * std::mem::size_of::<f32>()
        } else {
            self.num_subvectors
        }
    }

    /// Encode `vector` according to the current ADC mode.
    pub fn encode(&self, vector: &[T]) -> AnnResult<Encoding> {
        if self.enable_adc {
            Ok(Encoding::QueryTable(self.build_query_table(vector)?))
        } else {
            let mut code = vec![0u8; self.num_subvectors];
            self.quantize_vector(vector, &mut code)?;
            Ok(Encoding::Code(code.into_boxed_slice()))
        }
    }

    /// Compress `vector` into `code`: per subvector, the index of the nearest
    /// centroid under squared L2, first minimum winning ties.
    ///
    /// Fails if the lengths disagree with the configured dimensions or if
    /// some subvector has no centroid at a finite distance.
    pub fn quantize_vector(&self, vector: &[T], code: &mut [u8]) -> AnnResult<()> {
        self.check_dim(vector.len())?;
        if code.len() != self.num_subvectors {
            return Err(AnnError::message(
                AnnErrorKind::DimensionMismatch,
                format!(
                    "output code holds {} bytes but {} subvectors are configured",
                    code.len(),
                    self.num_subvectors
                ),
            ));
        }

        for (s, out) in code.iter_mut().enumerate() {
            let subvector = &vector[s * self.dim_per_subvector..(s + 1) * self.dim_per_subvector];

            let mut best: Option<(usize, f32)> = None;
            for j in 0..self.ks_per_subvector {
                let distance = T::squared_l2(subvector, self.centroid(s, j));
                if !distance.is_finite() {
                    continue;
                }
                match best {
                    Some((_, best_distance)) if distance >= best_distance => {}
                    _ => best = Some((j, distance)),
                }
            }

            let (index, _) = best.ok_or_else(|| {
                AnnError::message(
                    AnnErrorKind::QuantizerError,
                    format!("subvector {} has no centroid at a finite distance", s),
                )
            })?;
            *out = index as u8;
        }

        Ok(())
    }

    /// Build the per-query lookup tables for asymmetric distance computation:
    /// squared L2 and cosine similarity between every query subvector and
    /// every centroid.
    pub fn build_query_table(&self, query: &[T]) -> AnnResult<QueryDistanceTable> {
        self.check_dim(query.len())?;

        let (m, k) = (self.num_subvectors, self.ks_per_subvector);
        let mut tables = vec![0.0f32; 2 * m * k];
        let (l2_half, cosine_half) = tables.split_at_mut(m * k);

        for s in 0..m {
            let subvector = &query[s * self.dim_per_subvector..(s + 1) * self.dim_per_subvector];
            for j in 0..k {
                let centroid = self.centroid(s, j);
                l2_half[s * k + j] = T::squared_l2(subvector, centroid);
                cosine_half[s * k + j] =
                    cosine_similarity_from_distance(T::cosine(subvector, centroid));
            }
        }

        Ok(QueryDistanceTable::new(tables.into_boxed_slice(), m, k))
    }

    /// Expand `code` into the concatenation of its selected centroids.
    pub fn reconstruct_vector(&self, code: &[u8], out: &mut [T]) -> AnnResult<()> {
        if code.len() != self.num_subvectors {
            return Err(AnnError::message(
                AnnErrorKind::DimensionMismatch,
                format!(
                    "code holds {} bytes but {} subvectors are configured",
                    code.len(),
                    self.num_subvectors
                ),
            ));
        }
        self.check_dim(out.len())?;

        for (s, &center) in code.iter().enumerate() {
            let center = center as usize;
            if center >= self.ks_per_subvector {
                return Err(AnnError::message(
                    AnnErrorKind::QuantizerError,
                    format!(
                        "code byte {} of subvector {} is out of range for {} centers",
                        center, s, self.ks_per_subvector
                    ),
                ));
            }

            out[s * self.dim_per_subvector..(s + 1) * self.dim_per_subvector]
                .copy_from_slice(self.centroid(s, center));
        }

        Ok(())
    }

    /// Symmetric squared-L2 distance between two `M`-byte codes.
    ///
    /// # Panics
    ///
    /// Panics if either code does not hold exactly `M` bytes or contains a
    /// byte outside `[0, K)`.
    pub fn l2_distance(&self, x: &[u8], y: &[u8]) -> f32 {
        self.check_code_len(x);
        self.check_code_len(y);
        simd::lookup_table_sum(&self.l2_distance_tables, self.ks_per_subvector, x, y)
    }

    /// Symmetric cosine distance between two `M`-byte codes, in the library's
    /// cosine-distance convention.
    ///
    /// # Panics
    ///
    /// Panics if either code does not hold exactly `M` bytes or contains a
    /// byte outside `[0, K)`.
    pub fn cosine_distance(&self, x: &[u8], y: &[u8]) -> f32 {
        self.check_code_len(x);
        self.check_code_len(y);
        distance_from_cosine_similarity(simd::lookup_table_sum(
            &self.cosine_distance_tables,
            self.ks_per_subvector,
            x,
            y,
        ))
    }

    /// Serialize dimensions and codebook in the little-endian wire layout.
    ///
    /// The element kind `T` is not written; it travels out-of-band in the
    /// surrounding index header.
    pub fn save<W: Write>(&self, writer: &mut W) -> AnnResult<()> {
        writer.write_i32::<LittleEndian>(self.wire_dimension(self.num_subvectors)?)?;
        writer.write_i32::<LittleEndian>(self.wire_dimension(self.ks_per_subvector)?)?;
        writer.write_i32::<LittleEndian>(self.wire_dimension(self.dim_per_subvector)?)?;
        T::write_to(writer, &self.codebooks).context("writing PQ codebook")?;

        info!(
            subvectors = self.num_subvectors,
            ks_per_subvector = self.ks_per_subvector,
            dim_per_subvector = self.dim_per_subvector,
            "saved PQ quantizer"
        );
        Ok(())
    }

    /// Deserialize a quantizer from the wire layout written by
    /// [`PQQuantizer::save`] and rebuild its distance tables.
    ///
    /// Any short read or implausible header is an error and no quantizer is
    /// produced. The loaded quantizer starts with ADC disabled.
    pub fn load<R: Read>(reader: &mut R) -> AnnResult<Self> {
        let num_subvectors: DimensionType = reader
            .read_i32::<LittleEndian>()
            .context("reading PQ subvector count")?;
        let ks_per_subvector: SizeType = reader
            .read_i32::<LittleEndian>()
            .context("reading PQ center count")?;
        let dim_per_subvector: DimensionType = reader
            .read_i32::<LittleEndian>()
            .context("reading PQ subvector dimension")?;

        let num_subvectors = Self::header_field(num_subvectors, "subvector count")?;
        let ks_per_subvector = Self::header_field(ks_per_subvector, "center count")?;
        let dim_per_subvector = Self::header_field(dim_per_subvector, "subvector dimension")?;

        if ks_per_subvector > MAX_KS_PER_SUBVECTOR {
            return Err(AnnError::message(
                AnnErrorKind::InvalidFileFormat,
                format!(
                    "quantizer header declares {} centers per subvector (max {})",
                    ks_per_subvector, MAX_KS_PER_SUBVECTOR
                ),
            ));
        }

        let elements = num_subvectors
            .checked_mul(ks_per_subvector)
            .and_then(|n| n.checked_mul(dim_per_subvector))
            .ok_or_else(|| {
                AnnError::message(
                    AnnErrorKind::InvalidFileFormat,
                    "quantizer header dimensions overflow the codebook size",
                )
            })?;

        let mut codebooks = vec![T::default(); elements];
        T::read_from(reader, &mut codebooks).context("reading PQ codebook")?;

        let quantizer = Self::new(
            num_subvectors,
            ks_per_subvector,
            dim_per_subvector,
            false,
            codebooks.into_boxed_slice(),
        )?;

        info!(
            subvectors = quantizer.num_subvectors,
            ks_per_subvector = quantizer.ks_per_subvector,
            dim_per_subvector = quantizer.dim_per_subvector,
            "loaded PQ quantizer"
        );
        Ok(quantizer)
    }

    fn header_field(value: i32, what: &str) -> AnnResult<usize> {
        if value < 1 {
            return Err(AnnError::message(
                AnnErrorKind::InvalidFileFormat,
                format!("quantizer header declares a non-positive {}: {}", what, value),
            ));
        }
        Ok(value as usize)
    }

    fn wire_dimension(&self, value: usize) -> AnnResult<i32> {
        i32::try_from(value).map_err(|_| {
            AnnError::message(
                AnnErrorKind::QuantizerError,
                format!("dimension {} does not fit the wire header", value),
            )
        })
    }

    fn check_dim(&self, len: usize) -> AnnResult<()> {
        if len != self.dim() {
            return Err(AnnError::message(
                AnnErrorKind::DimensionMismatch,
                format!("vector holds {} elements but the quantizer dimension is {}", len, self.dim()),
            ));
        }
        Ok(())
    }

    fn check_code_len(&self, code: &[u8]) {
        assert_eq!(
            code.len(),
            self.num_subvectors,
            "PQ code must have {} entries",
            self.num_subvectors
        );
    }
}
