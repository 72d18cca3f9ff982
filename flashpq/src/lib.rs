/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Shared building blocks for the flashpq vector-search core: the common
//! error type threaded through every crate in the workspace and the bounded
//! resource pool used by the asynchronous disk reader.
#![cfg_attr(
    not(test),
    warn(clippy::panic, clippy::unwrap_used, clippy::expect_used)
)]

pub mod error;
pub use error::{AnnError, AnnErrorKind, AnnResult, ErrorContext};

pub mod utils;

/// Fixed-width kind used for dimension-like fields in wire headers.
pub type DimensionType = i32;

/// Fixed-width kind used for count-like fields in wire headers.
pub type SizeType = i32;
