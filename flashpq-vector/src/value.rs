/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::io;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

/// Tag identifying the scalar element kind of a codebook or feature vector.
///
/// The tag travels in index headers next to the quantizer payload, so the
/// numeric values are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VectorValueType {
    /// 32-bit IEEE-754 floating point.
    Float32 = 0,

    /// Signed 8-bit integer.
    Int8 = 1,

    /// Unsigned 8-bit integer.
    UInt8 = 2,
}

/// Error returned when a wire tag does not name a supported element kind.
#[derive(Debug, Error)]
#[error("unknown vector value type tag: {0}")]
pub struct UnknownValueType(pub u8);

impl TryFrom<u8> for VectorValueType {
    type Error = UnknownValueType;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(VectorValueType::Float32),
            1 => Ok(VectorValueType::Int8),
            2 => Ok(VectorValueType::UInt8),
            other => Err(UnknownValueType(other)),
        }
    }
}

impl VectorValueType {
    /// Size in bytes of one element of this kind.
    pub fn element_size(self) -> usize {
        match self {
            VectorValueType::Float32 => std::mem::size_of::<f32>(),
            VectorValueType::Int8 => std::mem::size_of::<i8>(),
            VectorValueType::UInt8 => std::mem::size_of::<u8>(),
        }
    }
}

mod private {
    pub trait Sealed {}
    impl Sealed for f32 {}
    impl Sealed for i8 {}
    impl Sealed for u8 {}
}

/// A scalar element kind a codebook may hold.
///
/// The trait couples each kind to its wire tag, its widened distance kernels
/// (see [`crate::distance`]), and its little-endian bulk serialization.
pub trait VectorValue:
    private::Sealed + Copy + Default + PartialEq + Send + Sync + std::fmt::Debug + 'static
{
    /// The wire tag for this element kind.
    const VALUE_TYPE: VectorValueType;

    /// Widen a single element to `f32`.
    fn to_f32(self) -> f32;

    /// Sum of squared elementwise differences. Integer kinds accumulate in
    /// `i32` before widening, so the result is exact for subvectors of any
    /// realistic length.
    fn squared_l2(x: &[Self], y: &[Self]) -> f32;

    /// Cosine distance in the library's internal convention: `1 - <x, y>`
    /// with the dot product widened for integer kinds. Inputs are assumed
    /// normalized by the caller.
    fn cosine(x: &[Self], y: &[Self]) -> f32;

    /// Fill `out` from `reader`, little-endian, one pass.
    fn read_from<R: io::Read>(reader: &mut R, out: &mut [Self]) -> io::Result<()>;

    /// Write `data` to `writer`, little-endian.
    fn write_to<W: io::Write>(writer: &mut W, data: &[Self]) -> io::Result<()>;
}

impl VectorValue for f32 {
    const VALUE_TYPE: VectorValueType = VectorValueType::Float32;

    #[inline(always)]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn squared_l2(x: &[f32], y: &[f32]) -> f32 {
        assert_eq!(x.len(), y.len());
        std::iter::zip(x.iter(), y.iter()).fold(0.0f32, |acc, (&a, &b)| {
            let diff = a - b;
            diff.mul_add(diff, acc)
        })
    }

    #[inline]
    fn cosine(x: &[f32], y: &[f32]) -> f32 {
        assert_eq!(x.len(), y.len());
        let dot = std::iter::zip(x.iter(), y.iter()).fold(0.0f32, |acc, (&a, &b)| a.mul_add(b, acc));
        1.0 - dot
    }

    fn read_from<R: io::Read>(reader: &mut R, out: &mut [f32]) -> io::Result<()> {
        reader.read_f32_into::<LittleEndian>(out)
    }

    fn write_to<W: io::Write>(writer: &mut W, data: &[f32]) -> io::Result<()> {
        for &value in data {
            writer.write_f32::<LittleEndian>(value)?;
        }
        Ok(())
    }
}

impl VectorValue for i8 {
    const VALUE_TYPE: VectorValueType = VectorValueType::Int8;

    #[inline(always)]
    fn to_f32(self) -> f32 {
        self.into()
    }

    #[inline]
    fn squared_l2(x: &[i8], y: &[i8]) -> f32 {
        assert_eq!(x.len(), y.len());
        std::iter::zip(x.iter(), y.iter())
            .map(|(&a, &b)| {
                let a: i32 = a.into();
                let b: i32 = b.into();
                let diff = a - b;
                diff * diff
            })
            .sum::<i32>() as f32
    }

    #[inline]
    fn cosine(x: &[i8], y: &[i8]) -> f32 {
        assert_eq!(x.len(), y.len());
        let dot = std::iter::zip(x.iter(), y.iter())
            .map(|(&a, &b)| {
                let a: i32 = a.into();
                let b: i32 = b.into();
                a * b
            })
            .sum::<i32>();
        1.0 - dot as f32
    }

    fn read_from<R: io::Read>(reader: &mut R, out: &mut [i8]) -> io::Result<()> {
        reader.read_i8_into(out)
    }

    fn write_to<W: io::Write>(writer: &mut W, data: &[i8]) -> io::Result<()> {
        for &value in data {
            writer.write_i8(value)?;
        }
        Ok(())
    }
}

impl VectorValue for u8 {
    const VALUE_TYPE: VectorValueType = VectorValueType::UInt8;

    #[inline(always)]
    fn to_f32(self) -> f32 {
        self.into()
    }

    #[inline]
    fn squared_l2(x: &[u8], y: &[u8]) -> f32 {
        assert_eq!(x.len(), y.len());
        std::iter::zip(x.iter(), y.iter())
            .map(|(&a, &b)| {
                let a: i32 = a.into();
                let b: i32 = b.into();
                let diff = a - b;
                diff * diff
            })
            .sum::<i32>() as f32
    }

    #[inline]
    fn cosine(x: &[u8], y: &[u8]) -> f32 {
        assert_eq!(x.len(), y.len());
        let dot = std::iter::zip(x.iter(), y.iter())
            .map(|(&a, &b)| {
                let a: i32 = a.into();
                let b: i32 = b.into();
                a * b
            })
            .sum::<i32>();
        1.0 - dot as f32
    }

    fn read_from<R: io::Read>(reader: &mut R, out: &mut [u8]) -> io::Result<()> {
        reader.read_exact(out)
    }

    fn write_to<W: io::Write>(writer: &mut W, data: &[u8]) -> io::Result<()> {
        writer.write_all(data)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn tag_round_trip() {
        for value_type in [
            VectorValueType::Float32,
            VectorValueType::Int8,
            VectorValueType::UInt8,
        ] {
            let tag = value_type as u8;
            assert_eq!(VectorValueType::try_from(tag).unwrap(), value_type);
        }
        assert!(VectorValueType::try_from(17).is_err());
    }

    #[test]
    fn element_sizes() {
        assert_eq!(VectorValueType::Float32.element_size(), 4);
        assert_eq!(VectorValueType::Int8.element_size(), 1);
        assert_eq!(VectorValueType::UInt8.element_size(), 1);
    }

    fn serialization_round_trip<T: VectorValue>(data: &[T]) {
        let mut bytes = Vec::new();
        T::write_to(&mut bytes, data).unwrap();
        assert_eq!(bytes.len(), data.len() * T::VALUE_TYPE.element_size());

        let mut restored = vec![T::default(); data.len()];
        T::read_from(&mut Cursor::new(&bytes), &mut restored).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn round_trip_f32() {
        serialization_round_trip(&[0.0f32, -1.5, 3.25, f32::MAX]);
    }

    #[test]
    fn round_trip_i8() {
        serialization_round_trip(&[-128i8, -1, 0, 1, 127]);
    }

    #[test]
    fn round_trip_u8() {
        serialization_round_trip(&[0u8, 1, 128, 255]);
    }

    #[test]
    fn short_stream_is_an_error() {
        let bytes = [0u8; 6];
        let mut out = [0.0f32; 2];
        let err = f32::read_from(&mut Cursor::new(&bytes[..]), &mut out).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }
}
