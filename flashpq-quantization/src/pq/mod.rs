/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

mod encoding;
pub use encoding::{Encoding, QueryDistanceTable};

mod factory;
pub use factory::{load_quantizer, LoadedQuantizer, QuantizerType, QuantizerTypeParseError};

mod quantizer;
pub use quantizer::{PQQuantizer, MAX_KS_PER_SUBVECTOR};

mod simd;
