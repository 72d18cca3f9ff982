/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! # flashpq-quantization
//!
//! The product-quantization engine: codebook ownership, symmetric
//! inter-centroid lookup tables, vector encoding in both symmetric (compact
//! code) and asymmetric (per-query table) modes, fast table-driven distance
//! kernels, and the little-endian persistence format shared with the rest of
//! the index.
#![cfg_attr(
    not(test),
    warn(clippy::panic, clippy::unwrap_used, clippy::expect_used)
)]

pub mod pq;
pub use pq::{
    load_quantizer, Encoding, LoadedQuantizer, PQQuantizer, QuantizerType, QueryDistanceTable,
    MAX_KS_PER_SUBVECTOR,
};
