//! Immutable point storage.
//!
//! Points live in one flat allocation of `N × D` elements and are
//! addressed by dense `u32` id. The store is loaded (or built) once and
//! read-only afterwards; the builder and the search path both borrow it.

use std::io::{Read, Write};

use crate::distance::Element;
use crate::error::{Result, StratumError};

/// Immutable array of `N` points of dimension `D`.
#[derive(Debug)]
pub struct PointStore<T: Element> {
    data: Vec<T>,
    num: usize,
    dim: usize,
}

impl<T: Element> PointStore<T> {
    /// Wrap a flat element buffer of `N × D` values.
    pub fn new(data: Vec<T>, dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(StratumError::MalformedInput(
                "point dimension must be positive".to_string(),
            ));
        }
        if data.len() % dim != 0 {
            return Err(StratumError::MalformedInput(format!(
                "element count {} is not a multiple of dimension {dim}",
                data.len()
            )));
        }
        let num = data.len() / dim;
        Ok(Self { data, num, dim })
    }

    /// Build a store from per-point rows, validating that every row has
    /// the same dimension.
    pub fn from_rows(rows: &[Vec<T>]) -> Result<Self> {
        let dim = rows.first().map_or(0, Vec::len);
        for (id, row) in rows.iter().enumerate() {
            if row.len() != dim {
                return Err(StratumError::MalformedInput(format!(
                    "point {id} has dimension {} but expected {dim}",
                    row.len()
                )));
            }
        }
        let mut data = Vec::with_capacity(rows.len() * dim);
        for row in rows {
            data.extend_from_slice(row);
        }
        Self::new(data, dim)
    }

    /// Decode the binary blob layout: two little-endian `u32` header words
    /// `(N, D)` followed by `N × D` elements.
    pub fn read_from(reader: &mut dyn Read) -> Result<Self> {
        let num = read_header_word(reader)? as usize;
        let dim = read_header_word(reader)? as usize;
        if dim == 0 {
            return Err(StratumError::MalformedInput(
                "point file declares zero dimension".to_string(),
            ));
        }
        let count = num
            .checked_mul(dim)
            .ok_or_else(|| StratumError::MalformedInput("point count overflows".to_string()))?;
        let data = T::read_from(reader, count).map_err(map_eof)?;
        Ok(Self { data, num, dim })
    }

    /// Encode the store in the same layout `read_from` accepts.
    pub fn write_to(&self, writer: &mut dyn Write) -> Result<()> {
        writer.write_all(&(self.num as u32).to_le_bytes())?;
        writer.write_all(&(self.dim as u32).to_le_bytes())?;
        T::write_to(&self.data, writer)?;
        Ok(())
    }

    /// Number of points.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.num
    }

    /// True when the store holds no points.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num == 0
    }

    /// Point dimension.
    #[inline]
    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Borrow the `D` coordinates of point `id`.
    #[inline]
    #[must_use]
    pub fn get(&self, id: u32) -> &[T] {
        let start = id as usize * self.dim;
        &self.data[start..start + self.dim]
    }

    /// Per-coordinate mean of all points.
    #[must_use]
    pub fn centroid(&self) -> Vec<f32> {
        let mut sums = vec![0.0f64; self.dim];
        for point in self.data.chunks_exact(self.dim) {
            for (s, v) in sums.iter_mut().zip(point) {
                *s += f64::from(v.to_f32());
            }
        }
        let n = self.num.max(1) as f64;
        sums.into_iter().map(|s| (s / n) as f32).collect()
    }
}

fn read_header_word(reader: &mut dyn Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).map_err(map_eof)?;
    Ok(u32::from_le_bytes(buf))
}

/// A short read means the header lied about the payload size.
fn map_eof(e: std::io::Error) -> StratumError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        StratumError::MalformedInput("file shorter than its header declares".to_string())
    } else {
        StratumError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_blob_layout() {
        let store =
            PointStore::from_rows(&[vec![1u8, 2], vec![3, 4], vec![250, 251]]).unwrap();
        let mut buf = Vec::new();
        store.write_to(&mut buf).unwrap();

        let back = PointStore::<u8>::read_from(&mut buf.as_slice()).unwrap();
        assert_eq!(back.len(), 3);
        assert_eq!(back.dim(), 2);
        assert_eq!(back.get(2), &[250, 251]);
    }

    #[test]
    fn truncated_blob_is_malformed() {
        let store = PointStore::from_rows(&[vec![1u8, 2], vec![3, 4]]).unwrap();
        let mut buf = Vec::new();
        store.write_to(&mut buf).unwrap();
        buf.pop();

        match PointStore::<u8>::read_from(&mut buf.as_slice()) {
            Err(StratumError::MalformedInput(_)) => {}
            other => panic!("expected MalformedInput, got {other:?}"),
        }
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = PointStore::from_rows(&[vec![1u8, 2], vec![3]]).unwrap_err();
        assert!(matches!(err, StratumError::MalformedInput(_)));
    }

    #[test]
    fn centroid_is_coordinate_mean() {
        let store = PointStore::from_rows(&[vec![0u8, 10], vec![4, 30]]).unwrap();
        assert_eq!(store.centroid(), vec![2.0, 20.0]);
    }
}
