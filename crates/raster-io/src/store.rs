//! Pixel storage backends.
//!
//! A store holds the pixels of one dataset and moves band windows in and
//! out as native-endian bytes, row-major. Bounds are checked by the
//! dataset before a store is called.

use crate::error::Result;
use crate::types::DataType;
use geo_common::{PixelOffset, RasterSize};

/// Band-window access to the pixels of a dataset.
pub trait PixelStore: Send {
    /// Read a window of one band.
    fn read_band_window(
        &mut self,
        band: usize,
        offset: PixelOffset,
        size: RasterSize,
    ) -> Result<Vec<u8>>;

    /// Write a window of one band.
    fn write_band_window(
        &mut self,
        band: usize,
        offset: PixelOffset,
        size: RasterSize,
        bytes: &[u8],
    ) -> Result<()>;

    /// Persist buffered writes.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Pixels held in memory, one buffer per band.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    data_type: DataType,
    cols: usize,
    bands: Vec<Vec<u8>>,
}

impl MemoryStore {
    /// Zero-filled store.
    pub fn new(data_type: DataType, bands: usize, rows: usize, cols: usize) -> Self {
        Self {
            data_type,
            cols,
            bands: vec![vec![0u8; rows * cols * data_type.size()]; bands],
        }
    }

    /// Store from complete band buffers.
    pub fn from_bands(data_type: DataType, cols: usize, bands: Vec<Vec<u8>>) -> Self {
        Self {
            data_type,
            cols,
            bands,
        }
    }

    /// Complete band buffers.
    pub fn bands(&self) -> &[Vec<u8>] {
        &self.bands
    }

    fn row_range(&self, row: usize, offset: PixelOffset, width: usize) -> std::ops::Range<usize> {
        let size = self.data_type.size();
        let start = (row * self.cols + offset.x) * size;
        start..start + width * size
    }
}

impl PixelStore for MemoryStore {
    fn read_band_window(
        &mut self,
        band: usize,
        offset: PixelOffset,
        size: RasterSize,
    ) -> Result<Vec<u8>> {
        let row_bytes = size.x() * self.data_type.size();
        let mut out = Vec::with_capacity(row_bytes * size.y());
        for r in 0..size.y() {
            let range = self.row_range(offset.y + r, offset, size.x());
            out.extend_from_slice(&self.bands[band][range]);
        }
        Ok(out)
    }

    fn write_band_window(
        &mut self,
        band: usize,
        offset: PixelOffset,
        size: RasterSize,
        bytes: &[u8],
    ) -> Result<()> {
        let row_bytes = size.x() * self.data_type.size();
        for (r, chunk) in bytes.chunks_exact(row_bytes).enumerate() {
            let range = self.row_range(offset.y + r, offset, size.x());
            self.bands[band][range].copy_from_slice(chunk);
        }
        Ok(())
    }
}

/// Reverse the byte order of every element in place.
pub fn swap_bytes(bytes: &mut [u8], element_size: usize) {
    if element_size > 1 {
        for element in bytes.chunks_exact_mut(element_size) {
            element.reverse();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_window() {
        let mut store = MemoryStore::new(DataType::U16, 2, 4, 5);
        let size = RasterSize::new(2, 3).unwrap();
        let bytes: Vec<u8> = (1u16..=6).flat_map(|v| v.to_ne_bytes()).collect();
        store
            .write_band_window(1, PixelOffset::new(3, 1), size, &bytes)
            .unwrap();
        assert_eq!(
            store.read_band_window(1, PixelOffset::new(3, 1), size).unwrap(),
            bytes
        );
        // Other band untouched
        assert!(store.bands()[0].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_swap_bytes() {
        let mut b = vec![1, 2, 3, 4];
        swap_bytes(&mut b, 2);
        assert_eq!(b, vec![2, 1, 4, 3]);
    }
}
