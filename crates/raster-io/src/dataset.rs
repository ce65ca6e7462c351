//! Raster datasets: grid, bands, metadata and a pixel store.

use crate::driver::{Interleave, RasterDriver};
use crate::envi::{self, EnviHeader, EnviLayout, EnviStore};
use crate::error::{RasterIoError, Result};
use crate::gtiff;
use crate::metadata::{Color, MetadataDomain, RasterMetadata, DEFAULT_DOMAIN};
use crate::resample::{self, ResampleAlg};
use crate::store::{MemoryStore, PixelStore};
use crate::types::{cast_value, with_type, DataType, RasterArray};
use geo_common::{GeometryError, Grid, Pixel, PixelOffset, RasterSize};
use ndarray::{s, Array3, Axis};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A raster on disk or in memory.
///
/// Pixels are addressed by band and window; the grid georeferences them.
/// File-backed datasets are finalised by [`RasterDataset::close`], which
/// writes headers, sidecars and (for GeoTIFF) the encoded image.
pub struct RasterDataset {
    path: PathBuf,
    driver: RasterDriver,
    grid: Grid,
    bands: usize,
    data_type: DataType,
    metadata: RasterMetadata,
    store: Box<dyn PixelStore>,
    writable: bool,
    modified: bool,
    closed: bool,
}

impl std::fmt::Debug for RasterDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterDataset")
            .field("path", &self.path)
            .field("driver", &self.driver)
            .field("grid", &self.grid)
            .field("bands", &self.bands)
            .field("data_type", &self.data_type)
            .finish()
    }
}

impl RasterDataset {
    /// Create a zero-filled dataset.
    pub fn create(
        path: impl AsRef<Path>,
        grid: &Grid,
        bands: usize,
        data_type: DataType,
        driver: RasterDriver,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if bands == 0 {
            return Err(RasterIoError::invalid_data("a raster needs at least one band"));
        }
        driver.prepare_creation(&path)?;
        let (rows, cols) = grid.shape();
        let store: Box<dyn PixelStore> = match driver {
            RasterDriver::Envi(options) => Box::new(EnviStore::create(
                &path,
                EnviLayout {
                    grid: grid.clone(),
                    bands,
                    data_type,
                    interleave: options.interleave,
                    byte_order: envi::native_byte_order(),
                    header_offset: 0,
                },
            )?),
            RasterDriver::GTiff(_) | RasterDriver::Mem => {
                Box::new(MemoryStore::new(data_type, bands, rows, cols))
            }
        };
        debug!(
            path = %path.display(),
            driver = %driver,
            bands,
            data_type = %data_type,
            "created raster"
        );
        Ok(Self {
            path,
            driver,
            grid: grid.clone(),
            bands,
            data_type,
            metadata: RasterMetadata::with_bands(bands),
            store,
            writable: true,
            modified: true,
            closed: false,
        })
    }

    /// Create a dataset holding an array.
    pub fn from_array(
        array: &RasterArray,
        grid: &Grid,
        path: impl AsRef<Path>,
        driver: RasterDriver,
    ) -> Result<Self> {
        let mut dataset = Self::create(path, grid, array.bands(), array.data_type(), driver)?;
        dataset.write_array(array, PixelOffset::new(0, 0))?;
        Ok(dataset)
    }

    /// Open an existing GeoTIFF or ENVI raster for reading.
    ///
    /// ENVI rasters are read window by window from disk. GeoTIFFs are
    /// decoded completely into memory when opened, so every open handle
    /// holds a full copy of the image; workers that each open the same
    /// GeoTIFF input multiply that cost by the worker count.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if is_tiff(&path)? {
            return Self::open_tiff(path);
        }
        match envi::find_header(&path) {
            Some(header) => Self::open_envi(path, &header),
            None => Err(RasterIoError::UnknownFormat(path.display().to_string())),
        }
    }

    fn open_tiff(path: PathBuf) -> Result<Self> {
        let decoded = gtiff::decode(&path)?;
        let cols = decoded.grid.size().x();
        let bands = decoded.bands.len();
        Ok(Self {
            driver: RasterDriver::GTiff(Default::default()),
            grid: decoded.grid,
            bands,
            data_type: decoded.data_type,
            metadata: decoded.metadata,
            store: Box::new(MemoryStore::from_bands(decoded.data_type, cols, decoded.bands)),
            path,
            writable: false,
            modified: false,
            closed: false,
        })
    }

    fn open_envi(path: PathBuf, header: &Path) -> Result<Self> {
        let (layout, mut metadata) = envi::parse_header(&EnviHeader::read(header)?)?;
        let aux = envi::appended(&path, ".aux.json");
        if aux.is_file() {
            metadata = serde_json::from_str(&fs::read_to_string(&aux)?)?;
        }
        metadata.resize_bands(layout.bands);
        let driver = RasterDriver::Envi(crate::driver::EnviOptions {
            interleave: layout.interleave,
        });
        Ok(Self {
            grid: layout.grid.clone(),
            bands: layout.bands,
            data_type: layout.data_type,
            store: Box::new(EnviStore::open(&path, layout)?),
            path,
            driver,
            metadata,
            writable: false,
            modified: false,
            closed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn driver(&self) -> &RasterDriver {
        &self.driver
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn bands(&self) -> usize {
        self.bands
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Shape as `(bands, rows, cols)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        let (rows, cols) = self.grid.shape();
        (self.bands, rows, cols)
    }

    fn check_window(&self, offset: PixelOffset, size: RasterSize) -> Result<()> {
        let (rows, cols) = self.grid.shape();
        if offset.x + size.x() > cols || offset.y + size.y() > rows {
            return Err(RasterIoError::out_of_range(format!(
                "window {} at ({}, {}) exceeds raster of {}x{} pixels ({})",
                size,
                offset.x,
                offset.y,
                cols,
                rows,
                self.path.display()
            )));
        }
        Ok(())
    }

    fn check_band(&self, band: usize) -> Result<()> {
        if band >= self.bands {
            return Err(RasterIoError::out_of_range(format!(
                "band {} of raster with {} bands ({})",
                band,
                self.bands,
                self.path.display()
            )));
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        if !self.writable {
            return Err(RasterIoError::UnsupportedDriver(format!(
                "{} was opened read-only",
                self.path.display()
            )));
        }
        Ok(())
    }

    /// Write all bands of an array at a pixel offset.
    pub fn write_array(&mut self, array: &RasterArray, offset: PixelOffset) -> Result<()> {
        if array.bands() != self.bands {
            return Err(RasterIoError::invalid_data(format!(
                "array has {} bands, raster {} has {}",
                array.bands(),
                self.path.display(),
                self.bands
            )));
        }
        for band in 0..self.bands {
            self.write_band_of(band, array, band, offset)?;
        }
        Ok(())
    }

    /// Write a one-band array into a band at a pixel offset.
    pub fn write_band(&mut self, band: usize, array: &RasterArray, offset: PixelOffset) -> Result<()> {
        if array.bands() != 1 {
            return Err(RasterIoError::invalid_data(format!(
                "expected a single band, got {}",
                array.bands()
            )));
        }
        self.write_band_of(band, array, 0, offset)
    }

    fn write_band_of(
        &mut self,
        band: usize,
        array: &RasterArray,
        source_band: usize,
        offset: PixelOffset,
    ) -> Result<()> {
        self.check_writable()?;
        self.check_band(band)?;
        let size = RasterSize::new(array.cols(), array.rows())?;
        self.check_window(offset, size)?;
        let bytes = if array.data_type() == self.data_type {
            array.band_bytes(source_band)?
        } else {
            array.band(source_band)?.cast_to(self.data_type).band_bytes(0)?
        };
        self.store.write_band_window(band, offset, size, &bytes)?;
        self.modified = true;
        Ok(())
    }

    /// Read a window of all bands.
    pub fn read_window(&mut self, offset: PixelOffset, size: RasterSize) -> Result<RasterArray> {
        self.check_window(offset, size)?;
        let mut bytes = Vec::with_capacity(self.bands);
        for band in 0..self.bands {
            bytes.push(self.store.read_band_window(band, offset, size)?);
        }
        RasterArray::from_band_bytes(self.data_type, &bytes, size.y(), size.x())
    }

    /// Read a window of one band.
    pub fn read_band_window(
        &mut self,
        band: usize,
        offset: PixelOffset,
        size: RasterSize,
    ) -> Result<RasterArray> {
        self.check_band(band)?;
        self.check_window(offset, size)?;
        let bytes = self.store.read_band_window(band, offset, size)?;
        RasterArray::from_band_bytes(self.data_type, &[bytes], size.y(), size.x())
    }

    /// Read the whole raster.
    pub fn read_array(&mut self) -> Result<RasterArray> {
        self.read_window(PixelOffset::new(0, 0), self.grid.size())
    }

    /// Read the raster onto another grid.
    ///
    /// Target pixels outside the raster get `no_data`, else the band's
    /// no-data value, else 0.
    pub fn read_grid(
        &mut self,
        grid: &Grid,
        resample: ResampleAlg,
        no_data: Option<f64>,
    ) -> Result<RasterArray> {
        let fill: Vec<f64> = self
            .metadata
            .no_data_values()
            .into_iter()
            .map(|band| no_data.or(band).unwrap_or(0.0))
            .collect();

        if let Some((dx, dy)) = self.aligned_offset(grid) {
            return self.read_aligned(grid, dx, dy, &fill);
        }

        let extent = match self.grid.extent().intersection(grid.extent()) {
            Ok(extent) => extent,
            Err(GeometryError::EmptyIntersection { .. }) => return Ok(self.filled(grid, &fill)),
            Err(e) => return Err(e.into()),
        };
        let res = self.grid.resolution();
        let src = self.grid.extent();
        let (rows, cols) = self.grid.shape();
        let x0 = ((extent.xmin() - src.xmin()) / res.x()).floor() as i64 - 1;
        let x1 = ((extent.xmax() - src.xmin()) / res.x()).ceil() as i64 + 1;
        let y0 = ((src.ymax() - extent.ymax()) / res.y()).floor() as i64 - 1;
        let y1 = ((src.ymax() - extent.ymin()) / res.y()).ceil() as i64 + 1;
        let (x0, x1) = (x0.max(0) as usize, (x1.max(0) as usize).min(cols));
        let (y0, y1) = (y0.max(0) as usize, (y1.max(0) as usize).min(rows));
        if x1 <= x0 || y1 <= y0 {
            return Ok(self.filled(grid, &fill));
        }

        let size = RasterSize::new(x1 - x0, y1 - y0)?;
        let window = self.read_window(PixelOffset::new(x0, y0), size)?;
        let window_grid = self
            .grid
            .subset(Pixel::new(x0 as i64, y0 as i64), size, false)?;
        resample::resample(
            &window,
            &window_grid,
            &self.metadata.no_data_values(),
            grid,
            resample,
            &fill,
        )
    }

    /// Integer pixel offset of `grid` when it shares projection and
    /// resolution and its pixels line up with ours.
    fn aligned_offset(&self, grid: &Grid) -> Option<(i64, i64)> {
        if grid.projection() != self.grid.projection()
            || !grid
                .resolution()
                .equal(self.grid.resolution(), geo_common::DEFAULT_TOLERANCE)
        {
            return None;
        }
        let res = self.grid.resolution();
        let fx = (grid.extent().xmin() - self.grid.extent().xmin()) / res.x();
        let fy = (self.grid.extent().ymax() - grid.extent().ymax()) / res.y();
        let (dx, dy) = (fx.round(), fy.round());
        let tol = geo_common::DEFAULT_TOLERANCE;
        ((fx - dx).abs() < tol && (fy - dy).abs() < tol).then_some((dx as i64, dy as i64))
    }

    fn read_aligned(&mut self, grid: &Grid, dx: i64, dy: i64, fill: &[f64]) -> Result<RasterArray> {
        let (rows, cols) = self.grid.shape();
        let (t_rows, t_cols) = grid.shape();
        // Overlap in source pixel coordinates
        let sx0 = dx.max(0);
        let sy0 = dy.max(0);
        let sx1 = (dx + t_cols as i64).min(cols as i64);
        let sy1 = (dy + t_rows as i64).min(rows as i64);
        if sx1 <= sx0 || sy1 <= sy0 {
            return Ok(self.filled(grid, fill));
        }
        let size = RasterSize::new((sx1 - sx0) as usize, (sy1 - sy0) as usize)?;
        let window = self.read_window(PixelOffset::new(sx0 as usize, sy0 as usize), size)?;
        if size == grid.size() {
            return Ok(window);
        }
        let (tx0, ty0) = ((sx0 - dx) as usize, (sy0 - dy) as usize);
        let mut out = self.filled(grid, fill);
        paste(&mut out, &window, tx0, ty0);
        Ok(out)
    }

    fn filled(&self, grid: &Grid, fill: &[f64]) -> RasterArray {
        let (rows, cols) = grid.shape();
        with_type!(self.data_type, T => {
            let mut out = Array3::<T>::default((self.bands, rows, cols));
            for (b, mut band) in out.axis_iter_mut(Axis(0)).enumerate() {
                band.fill(cast_value::<T>(fill.get(b).copied().unwrap_or(0.0)));
            }
            RasterArray::from_array(out)
        })
    }

    pub fn metadata(&self) -> &RasterMetadata {
        &self.metadata
    }

    /// Replace all metadata.
    pub fn set_metadata(&mut self, mut metadata: RasterMetadata) {
        metadata.resize_bands(self.bands);
        self.metadata = metadata;
        self.modified = true;
    }

    pub fn metadata_item(&self, key: &str, domain: &str) -> Option<&str> {
        self.metadata.item(key, domain)
    }

    pub fn set_metadata_item(&mut self, key: &str, value: impl Into<String>, domain: &str) {
        self.metadata.set_item(key, value, domain);
        self.modified = true;
    }

    pub fn metadata_domain(&self, domain: &str) -> Option<&MetadataDomain> {
        self.metadata.domain(domain)
    }

    /// Set several items of a domain.
    pub fn set_metadata_dict(&mut self, items: &MetadataDomain, domain: &str) {
        for (key, value) in items {
            self.metadata.set_item(key, value.clone(), domain);
        }
        self.modified = true;
    }

    /// The no-data value shared by all bands.
    pub fn no_data_value(&self) -> Option<f64> {
        self.metadata.common_no_data()
    }

    pub fn no_data_values(&self) -> Vec<Option<f64>> {
        self.metadata.no_data_values()
    }

    /// Set the same no-data value on every band.
    pub fn set_no_data_value(&mut self, value: Option<f64>) {
        for band in &mut self.metadata.bands {
            band.no_data = value;
        }
        self.modified = true;
    }

    pub fn set_no_data_values(&mut self, values: &[Option<f64>]) -> Result<()> {
        if values.len() != self.bands {
            return Err(RasterIoError::invalid_data(format!(
                "{} no-data values for {} bands",
                values.len(),
                self.bands
            )));
        }
        for (band, value) in self.metadata.bands.iter_mut().zip(values) {
            band.no_data = *value;
        }
        self.modified = true;
        Ok(())
    }

    pub fn band_no_data_value(&self, band: usize) -> Result<Option<f64>> {
        self.check_band(band)?;
        Ok(self.metadata.bands[band].no_data)
    }

    pub fn set_band_no_data_value(&mut self, band: usize, value: Option<f64>) -> Result<()> {
        self.check_band(band)?;
        self.metadata.bands[band].no_data = value;
        self.modified = true;
        Ok(())
    }

    pub fn band_description(&self, band: usize) -> Result<Option<&str>> {
        self.check_band(band)?;
        Ok(self.metadata.bands[band].description.as_deref())
    }

    pub fn set_band_description(&mut self, band: usize, description: impl Into<String>) -> Result<()> {
        self.check_band(band)?;
        self.metadata.bands[band].description = Some(description.into());
        self.modified = true;
        Ok(())
    }

    pub fn band_metadata_item(&self, band: usize, key: &str, domain: &str) -> Result<Option<&str>> {
        self.check_band(band)?;
        Ok(self.metadata.bands[band]
            .domains
            .get(domain)
            .and_then(|d| d.get(key))
            .map(String::as_str))
    }

    pub fn set_band_metadata_item(
        &mut self,
        band: usize,
        key: &str,
        value: impl Into<String>,
        domain: &str,
    ) -> Result<()> {
        self.check_band(band)?;
        self.metadata.bands[band]
            .domains
            .entry(domain.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
        self.modified = true;
        Ok(())
    }

    pub fn category_names(&self) -> Option<&[String]> {
        self.metadata.category_names.as_deref()
    }

    pub fn set_category_names(&mut self, names: Vec<String>) {
        self.metadata.category_names = Some(names);
        self.modified = true;
    }

    pub fn category_colors(&self) -> Option<&[Color]> {
        self.metadata.category_colors.as_deref()
    }

    pub fn set_category_colors(&mut self, colors: Vec<Color>) {
        self.metadata.category_colors = Some(colors);
        self.modified = true;
    }

    /// Description of the dataset (default-domain `description` item).
    pub fn description(&self) -> Option<&str> {
        self.metadata.item("description", DEFAULT_DOMAIN)
    }

    /// Persist buffered pixel writes.
    pub fn flush(&mut self) -> Result<()> {
        self.store.flush()
    }

    /// Finalise the dataset.
    ///
    /// ENVI rasters always get their `.hdr` (and an `.aux.json` sidecar for
    /// metadata the header cannot hold). GeoTIFFs are encoded here and get
    /// an ENVI `.hdr` sidecar if `write_envi_header` is set. Pixels of MEM
    /// datasets stay readable after closing.
    pub fn close(&mut self, write_envi_header: bool) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.store.flush()?;
        if !self.writable || !self.modified {
            return Ok(());
        }
        match self.driver {
            RasterDriver::Envi(options) => self.close_envi(options.interleave)?,
            RasterDriver::GTiff(options) => {
                let mut bands = Vec::with_capacity(self.bands);
                for band in 0..self.bands {
                    bands.push(self.store.read_band_window(
                        band,
                        PixelOffset::new(0, 0),
                        self.grid.size(),
                    )?);
                }
                gtiff::encode(
                    &self.path,
                    &self.grid,
                    self.data_type,
                    &bands,
                    &self.metadata,
                    &options,
                )?;
                if write_envi_header {
                    envi::build_header(
                        &self.grid,
                        self.bands,
                        self.data_type,
                        Interleave::Bip,
                        "TIFF",
                        &self.metadata,
                    )
                    .write(&envi::appended(&self.path, ".hdr"))?;
                }
            }
            RasterDriver::Mem => {}
        }
        debug!(path = %self.path.display(), driver = %self.driver, "closed raster");
        Ok(())
    }

    /// Abandon a dataset without finalising it.
    ///
    /// No header, sidecar or encoded image is written, and the files of a
    /// writable file-backed dataset are removed. Datasets opened for
    /// reading are left untouched.
    pub fn discard(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if !self.writable || self.driver.is_memory() {
            return Ok(());
        }
        // Release the data file handle before removing it.
        self.store = Box::new(MemoryStore::new(self.data_type, 0, 0, 0));
        remove_raster_files(&self.path, &self.driver)?;
        debug!(path = %self.path.display(), driver = %self.driver, "discarded raster");
        Ok(())
    }

    fn close_envi(&mut self, interleave: Interleave) -> Result<()> {
        envi::build_header(
            &self.grid,
            self.bands,
            self.data_type,
            interleave,
            "ENVI Standard",
            &self.metadata,
        )
        .write(&envi::header_path(&self.path))?;
        let aux = envi::appended(&self.path, ".aux.json");
        if self.metadata.needs_sidecar() {
            fs::write(&aux, serde_json::to_string_pretty(&self.metadata)?)?;
        } else if aux.is_file() {
            fs::remove_file(&aux)?;
        }
        Ok(())
    }
}

impl Drop for RasterDataset {
    /// A writable dataset dropped without [`RasterDataset::close`] is
    /// discarded, never finalised.
    fn drop(&mut self) {
        if self.closed || !self.writable || self.driver.is_memory() {
            return;
        }
        warn!(path = %self.path.display(), "raster dropped without close, discarding");
        if let Err(e) = self.discard() {
            warn!(path = %self.path.display(), error = %e, "failed to discard raster");
        }
    }
}

/// Remove a raster file and the header and sidecars written next to it.
pub fn remove_raster_files(path: &Path, driver: &RasterDriver) -> Result<()> {
    let candidates = match driver {
        RasterDriver::Envi(_) => vec![
            path.to_path_buf(),
            envi::header_path(path),
            envi::appended(path, ".hdr"),
            envi::appended(path, ".aux.json"),
        ],
        RasterDriver::GTiff(_) => vec![path.to_path_buf(), envi::appended(path, ".hdr")],
        RasterDriver::Mem => Vec::new(),
    };
    for file in candidates {
        if file.is_file() {
            fs::remove_file(&file)?;
        }
    }
    Ok(())
}

/// Copy `window` into `target` with its upper left pixel at (`x`, `y`).
fn paste(target: &mut RasterArray, window: &RasterArray, x: usize, y: usize) {
    let (_, rows, cols) = window.shape();
    with_type!(target.data_type(), T => {
        let mut typed = target.cast::<T>();
        typed
            .slice_mut(s![.., y..y + rows, x..x + cols])
            .assign(&window.cast::<T>());
        *target = RasterArray::from_array(typed);
    })
}

/// TIFF files are recognised by extension or by their magic bytes.
fn is_tiff(path: &Path) -> Result<bool> {
    let by_extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_lowercase().as_str(), "tif" | "tiff"))
        .unwrap_or(false);
    if by_extension {
        return Ok(true);
    }
    if !path.is_file() {
        return Err(RasterIoError::UnknownFormat(path.display().to_string()));
    }
    let mut magic = [0u8; 4];
    let mut file = fs::File::open(path)?;
    let read = std::io::Read::read(&mut file, &mut magic)?;
    Ok(read == 4 && (magic == *b"II*\0" || magic == *b"MM\0*"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_common::{Extent, Projection, Resolution};
    use ndarray::array;

    fn grid() -> Grid {
        Grid::new(
            Extent::new(0.0, 40.0, 0.0, 30.0, Projection::utm(32, true).unwrap()).unwrap(),
            Resolution::square(10.0).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_mem_write_read_window() {
        let mut ds = RasterDataset::create("", &grid(), 2, DataType::I16, RasterDriver::Mem).unwrap();
        assert_eq!(ds.shape(), (2, 3, 4));
        let block = RasterArray::from_array(Array3::from_elem((2, 2, 2), 7i16));
        ds.write_array(&block, PixelOffset::new(2, 1)).unwrap();
        let all = ds.read_array().unwrap();
        let a = all.as_array::<i16>().unwrap();
        assert_eq!(a[[1, 1, 2]], 7);
        assert_eq!(a[[1, 2, 3]], 7);
        assert_eq!(a[[0, 0, 0]], 0);
    }

    #[test]
    fn test_window_out_of_range() {
        let mut ds = RasterDataset::create("", &grid(), 1, DataType::U8, RasterDriver::Mem).unwrap();
        let size = RasterSize::new(2, 2).unwrap();
        assert!(matches!(
            ds.read_window(PixelOffset::new(3, 0), size),
            Err(RasterIoError::OutOfRange(_))
        ));
        let block = RasterArray::from_band(array![[1u8, 2], [3, 4]]);
        assert!(matches!(
            ds.write_array(&block, PixelOffset::new(0, 2)),
            Err(RasterIoError::OutOfRange(_))
        ));
    }

    #[test]
    fn test_write_casts_to_dataset_type() {
        let mut ds = RasterDataset::create("", &grid(), 1, DataType::U8, RasterDriver::Mem).unwrap();
        let block = RasterArray::from_band(array![[1.7f32, 300.0]]);
        ds.write_band(0, &block, PixelOffset::new(0, 0)).unwrap();
        let a = ds.read_array().unwrap();
        assert_eq!(a.as_array::<u8>().unwrap()[[0, 0, 0]], 1);
        assert_eq!(a.as_array::<u8>().unwrap()[[0, 0, 1]], 255);
    }

    #[test]
    fn test_read_grid_aligned_with_fill() {
        let values = Array3::from_shape_fn((1, 3, 4), |(_, r, c)| (r * 4 + c) as f32);
        let mut ds = RasterDataset::from_array(
            &RasterArray::from_array(values),
            &grid(),
            "",
            RasterDriver::Mem,
        )
        .unwrap();
        // One pixel further right and up
        let target = grid().subset(Pixel::new(1, -1), RasterSize::new(4, 3).unwrap(), false).unwrap();
        let out = ds.read_grid(&target, ResampleAlg::Nearest, Some(-1.0)).unwrap();
        let out = out.as_array::<f32>().unwrap();
        assert_eq!(out[[0, 0, 0]], -1.0);
        assert_eq!(out[[0, 1, 0]], 1.0);
        assert_eq!(out[[0, 2, 2]], 7.0);
        assert_eq!(out[[0, 1, 3]], -1.0);
    }
}
