//! Distance kernel and the element types it is defined over.
//!
//! The index stores points of a fixed element type and compares them with
//! squared L2. Squared distances preserve the ordering of true L2 and skip
//! the square root, so every internal comparison and every reported
//! distance in this crate is squared L2.

use std::io::{self, Read, Write};

/// Vector element type the index can store.
///
/// Implemented for `u8` (the shipped bounded-integer-box configurations)
/// and `f32`. The trait covers exactly what the stores and the grid map
/// need: a little-endian wire codec, lossy float conversion for centroid
/// math, and the non-negative integer coordinate the grid quantizes.
pub trait Element: Copy + Send + Sync + 'static {
    /// Serialized size of one element in bytes.
    const WIDTH: usize;

    /// Decode `count` elements from a little-endian byte stream.
    fn read_from(reader: &mut dyn Read, count: usize) -> io::Result<Vec<Self>>
    where
        Self: Sized;

    /// Encode elements to a little-endian byte stream.
    fn write_to(values: &[Self], writer: &mut dyn Write) -> io::Result<()>
    where
        Self: Sized;

    /// Value as `f32`. Exact for `u8`.
    fn to_f32(self) -> f32;

    /// Nearest representable element for a float coordinate.
    fn from_f32(v: f32) -> Self;

    /// Coordinate as the non-negative integer the grid map quantizes.
    fn grid_coord(self) -> u32;
}

impl Element for u8 {
    const WIDTH: usize = 1;

    fn read_from(reader: &mut dyn Read, count: usize) -> io::Result<Vec<Self>> {
        let mut values = vec![0u8; count];
        reader.read_exact(&mut values)?;
        Ok(values)
    }

    fn write_to(values: &[Self], writer: &mut dyn Write) -> io::Result<()> {
        writer.write_all(values)
    }

    #[inline]
    fn to_f32(self) -> f32 {
        f32::from(self)
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v.round().clamp(0.0, 255.0) as u8
    }

    #[inline]
    fn grid_coord(self) -> u32 {
        u32::from(self)
    }
}

impl Element for f32 {
    const WIDTH: usize = 4;

    fn read_from(reader: &mut dyn Read, count: usize) -> io::Result<Vec<Self>> {
        let mut bytes = vec![0u8; count * 4];
        reader.read_exact(&mut bytes)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    fn write_to(values: &[Self], writer: &mut dyn Write) -> io::Result<()> {
        for v in values {
            writer.write_all(&v.to_le_bytes())?;
        }
        Ok(())
    }

    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v
    }

    #[inline]
    fn grid_coord(self) -> u32 {
        if self <= 0.0 {
            0
        } else {
            self as u32
        }
    }
}

/// Squared L2 distance between two equal-length vectors.
///
/// Deterministic for a given input: the accumulation order is the element
/// order. For `u8` elements every term is exact in `f32`.
#[inline]
#[must_use]
pub fn squared_l2<T: Element>(a: &[T], b: &[T]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x.to_f32() - y.to_f32();
            d * d
        })
        .sum()
}
