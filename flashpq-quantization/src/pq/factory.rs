/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::{
    fmt::{self, Display},
    io::{Read, Write},
    str::FromStr,
};

use byteorder::{ReadBytesExt, WriteBytesExt};
use flashpq::{AnnError, AnnErrorKind, AnnResult, ErrorContext};
use flashpq_vector::VectorValueType;
use serde::{
    de::{self, Visitor},
    Deserializer, Serializer,
};
use thiserror::Error;

use super::quantizer::PQQuantizer;

/// Wire tag identifying the concrete quantizer variant stored in a mixed
/// container. Serialized as one byte ahead of the quantizer payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum QuantizerType {
    /// The container carries no quantizer.
    #[default]
    None = 0,

    /// A product quantizer ([`PQQuantizer`]).
    PQ = 1,
}

/// Error produced when parsing a [`QuantizerType`] from its string form.
#[derive(Debug, Error)]
#[error("invalid quantizer type: {0:?}, expected 'None' or 'PQ'")]
pub struct QuantizerTypeParseError(String);

impl Display for QuantizerType {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuantizerType::None => formatter.write_str("None"),
            QuantizerType::PQ => formatter.write_str("PQ"),
        }
    }
}

impl FromStr for QuantizerType {
    type Err = QuantizerTypeParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "None" => Ok(QuantizerType::None),
            "PQ" => Ok(QuantizerType::PQ),
            other => Err(QuantizerTypeParseError(other.to_string())),
        }
    }
}

impl TryFrom<u8> for QuantizerType {
    type Error = AnnError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(QuantizerType::None),
            1 => Ok(QuantizerType::PQ),
            other => Err(AnnError::message(
                AnnErrorKind::InvalidFileFormat,
                format!("unknown quantizer type tag: {}", other),
            )),
        }
    }
}

impl serde::Serialize for QuantizerType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for QuantizerType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct QuantizerTypeVisitor;

        impl Visitor<'_> for QuantizerTypeVisitor {
            type Value = QuantizerType;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a string like \"PQ\" or \"None\"")
            }

            fn visit_str<E>(self, value: &str) -> Result<QuantizerType, E>
            where
                E: de::Error,
            {
                QuantizerType::from_str(value).map_err(E::custom)
            }
        }

        deserializer.deserialize_str(QuantizerTypeVisitor)
    }
}

/// A quantizer loaded from a mixed container, closed over its element kind.
///
/// The element kind is not part of the quantizer payload; it comes from the
/// sibling index header and selects which variant the factory produces.
#[derive(Debug, Clone)]
pub enum LoadedQuantizer {
    Float32(PQQuantizer<f32>),
    Int8(PQQuantizer<i8>),
    UInt8(PQQuantizer<u8>),
}

impl LoadedQuantizer {
    /// The element kind vectors reconstruct to.
    pub fn reconstruct_type(&self) -> VectorValueType {
        match self {
            LoadedQuantizer::Float32(q) => q.reconstruct_type(),
            LoadedQuantizer::Int8(q) => q.reconstruct_type(),
            LoadedQuantizer::UInt8(q) => q.reconstruct_type(),
        }
    }

    /// The wire tag of the wrapped quantizer.
    pub fn quantizer_type(&self) -> QuantizerType {
        match self {
            LoadedQuantizer::Float32(q) => q.quantizer_type(),
            LoadedQuantizer::Int8(q) => q.quantizer_type(),
            LoadedQuantizer::UInt8(q) => q.quantizer_type(),
        }
    }

    /// Number of subvectors of the wrapped quantizer.
    pub fn num_subvectors(&self) -> usize {
        match self {
            LoadedQuantizer::Float32(q) => q.num_subvectors(),
            LoadedQuantizer::Int8(q) => q.num_subvectors(),
            LoadedQuantizer::UInt8(q) => q.num_subvectors(),
        }
    }

    /// The wrapped `f32` quantizer, if that is the element kind.
    pub fn as_f32(&self) -> Option<&PQQuantizer<f32>> {
        match self {
            LoadedQuantizer::Float32(q) => Some(q),
            _ => None,
        }
    }

    /// The wrapped `i8` quantizer, if that is the element kind.
    pub fn as_i8(&self) -> Option<&PQQuantizer<i8>> {
        match self {
            LoadedQuantizer::Int8(q) => Some(q),
            _ => None,
        }
    }

    /// The wrapped `u8` quantizer, if that is the element kind.
    pub fn as_u8(&self) -> Option<&PQQuantizer<u8>> {
        match self {
            LoadedQuantizer::UInt8(q) => Some(q),
            _ => None,
        }
    }

    /// Write the quantizer type tag followed by the quantizer payload.
    pub fn save<W: Write>(&self, writer: &mut W) -> AnnResult<()> {
        writer
            .write_u8(self.quantizer_type() as u8)
            .context("writing quantizer type tag")?;
        match self {
            LoadedQuantizer::Float32(q) => q.save(writer),
            LoadedQuantizer::Int8(q) => q.save(writer),
            LoadedQuantizer::UInt8(q) => q.save(writer),
        }
    }
}

/// Read the quantizer type tag from `reader` and dispatch to the matching
/// loader for the element kind named by `reconstruct_type`.
pub fn load_quantizer<R: Read>(
    reader: &mut R,
    reconstruct_type: VectorValueType,
) -> AnnResult<LoadedQuantizer> {
    let tag = reader.read_u8().context("reading quantizer type tag")?;

    match QuantizerType::try_from(tag)? {
        QuantizerType::None => Err(AnnError::message(
            AnnErrorKind::InvalidFileFormat,
            "stream does not carry a quantizer",
        )),
        QuantizerType::PQ => match reconstruct_type {
            VectorValueType::Float32 => Ok(LoadedQuantizer::Float32(PQQuantizer::load(reader)?)),
            VectorValueType::Int8 => Ok(LoadedQuantizer::Int8(PQQuantizer::load(reader)?)),
            VectorValueType::UInt8 => Ok(LoadedQuantizer::UInt8(PQQuantizer::load(reader)?)),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn sample_quantizer() -> PQQuantizer<f32> {
        let codebooks: Vec<f32> = (0..2 * 4 * 2).map(|i| i as f32 * 0.5).collect();
        PQQuantizer::new(2, 4, 2, false, codebooks.into_boxed_slice()).unwrap()
    }

    #[test]
    fn string_round_trip() {
        for quantizer_type in [QuantizerType::None, QuantizerType::PQ] {
            let text = quantizer_type.to_string();
            assert_eq!(QuantizerType::from_str(&text).unwrap(), quantizer_type);
        }
        assert!(QuantizerType::from_str("OPQ").is_err());
    }

    #[test]
    fn serde_round_trip() {
        let json = serde_json::to_string(&QuantizerType::PQ).unwrap();
        assert_eq!(json, "\"PQ\"");
        let restored: QuantizerType = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, QuantizerType::PQ);

        assert!(serde_json::from_str::<QuantizerType>("\"SQ\"").is_err());
    }

    #[test]
    fn factory_round_trip() {
        let quantizer = LoadedQuantizer::Float32(sample_quantizer());

        let mut bytes = Vec::new();
        quantizer.save(&mut bytes).unwrap();
        assert_eq!(bytes[0], QuantizerType::PQ as u8);

        let restored =
            load_quantizer(&mut Cursor::new(&bytes), VectorValueType::Float32).unwrap();
        assert_eq!(restored.quantizer_type(), QuantizerType::PQ);
        assert_eq!(restored.reconstruct_type(), VectorValueType::Float32);
        assert_eq!(restored.num_subvectors(), 2);

        let original = quantizer.as_f32().unwrap();
        let loaded = restored.as_f32().unwrap();
        assert_eq!(
            original.l2_distance(&[1, 3], &[2, 0]),
            loaded.l2_distance(&[1, 3], &[2, 0])
        );
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let bytes = [9u8, 0, 0, 0];
        let err = load_quantizer(&mut Cursor::new(&bytes[..]), VectorValueType::Float32)
            .unwrap_err();
        assert_eq!(err.kind(), AnnErrorKind::InvalidFileFormat);
    }

    #[test]
    fn none_tag_is_rejected() {
        let bytes = [QuantizerType::None as u8];
        let err = load_quantizer(&mut Cursor::new(&bytes[..]), VectorValueType::Float32)
            .unwrap_err();
        assert_eq!(err.kind(), AnnErrorKind::InvalidFileFormat);
    }

    #[test]
    fn empty_stream_is_rejected() {
        let err =
            load_quantizer(&mut Cursor::new(&[][..]), VectorValueType::Float32).unwrap_err();
        assert_eq!(err.kind(), AnnErrorKind::IOError);
    }
}
