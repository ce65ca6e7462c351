//! What an operator sees while processing one block.
//!
//! A [`BlockContext`] gives access to the current block's position, to the
//! registered inputs (read onto the block grid, optionally with an overlap
//! margin) and to the outputs. Output writes and metadata calls are
//! collected as [`WriteCommand`]s and handed to the writer after the
//! operator returns.

use crate::error::{ApplierError, Result};
use crate::io::{InputRaster, InputRasterGroup, InputVectorGroup, OutputRaster, OutputRasterGroup};
use crate::writer::{DatasetMethod, OutputTarget, WriteCommand};
use geo_common::{Grid, PixelOffset, RasterSize, Subgrid};
use ndarray::{Array2, Array3, Axis};
use raster_io::resample::{resample, resample_band};
use raster_io::{
    AttributeFilter, Burn, Color, DataType, MetadataDomain, RasterArray, RasterDataset, RasterElement,
    RasterMetadata, RasterizeOptions, ResampleAlg, VectorDataset,
};
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// Static data of a run, shared by all workers.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RunSetup<'a> {
    pub grid: Grid,
    pub inputs: &'a InputRasterGroup,
    pub vectors: &'a InputVectorGroup,
    pub outputs: &'a OutputRasterGroup,
}

/// Datasets and per-output state owned by one worker.
///
/// Input datasets are opened by path on first use and kept for the
/// lifetime of the worker. GeoTIFF inputs are decoded whole on open, so
/// each worker holds its own in-memory copy of every GeoTIFF it reads.
#[derive(Default)]
pub struct WorkerState {
    rasters: HashMap<PathBuf, RasterDataset>,
    vectors: HashMap<PathBuf, VectorDataset>,
    band_counts: HashMap<String, usize>,
}

impl WorkerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of input datasets this worker has opened.
    pub fn open_datasets(&self) -> usize {
        self.rasters.len() + self.vectors.len()
    }
}

/// Access to inputs and outputs for the block being processed.
pub struct BlockContext<'a> {
    setup: RunSetup<'a>,
    subgrid: &'a Subgrid,
    state: &'a mut WorkerState,
    commands: Vec<WriteCommand>,
}

impl<'a> BlockContext<'a> {
    pub(crate) fn new(setup: RunSetup<'a>, subgrid: &'a Subgrid, state: &'a mut WorkerState) -> Self {
        Self {
            setup,
            subgrid,
            state,
            commands: Vec::new(),
        }
    }

    pub(crate) fn take_commands(&mut self) -> Vec<WriteCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn subgrid(&self) -> &Subgrid {
        self.subgrid
    }

    /// The output grid of the run.
    pub fn grid(&self) -> &Grid {
        &self.setup.grid
    }

    /// The grid of the current block.
    pub fn block_grid(&self) -> &Grid {
        self.subgrid.grid()
    }

    pub fn index(&self) -> usize {
        self.subgrid.index()
    }

    pub fn n(&self) -> usize {
        self.subgrid.n()
    }

    pub fn iy(&self) -> usize {
        self.subgrid.iy()
    }

    pub fn ix(&self) -> usize {
        self.subgrid.ix()
    }

    pub fn ny(&self) -> usize {
        self.subgrid.ny()
    }

    pub fn nx(&self) -> usize {
        self.subgrid.nx()
    }

    pub fn is_first_block(&self) -> bool {
        self.subgrid.is_first()
    }

    pub fn is_last_block(&self) -> bool {
        self.subgrid.is_last()
    }

    pub fn is_last_y_block(&self) -> bool {
        self.subgrid.is_last_y()
    }

    pub fn is_last_x_block(&self) -> bool {
        self.subgrid.is_last_x()
    }

    /// Size of the current block in pixels.
    pub fn block_size(&self) -> RasterSize {
        self.subgrid.grid().size()
    }

    /// Offset of the current block inside the output grid.
    pub fn block_offset(&self) -> PixelOffset {
        self.subgrid.offset()
    }

    /// An array covering the block plus `overlap` pixels on every side.
    pub fn full<T: RasterElement>(&self, value: T, bands: usize, overlap: usize) -> Array3<T> {
        let (rows, cols) = self.subgrid.grid().shape();
        Array3::from_elem((bands, rows + 2 * overlap, cols + 2 * overlap), value)
    }

    /// Like [`BlockContext::full`] with one value per band.
    pub fn full_bands<T: RasterElement>(&self, values: &[T], overlap: usize) -> Array3<T> {
        let mut array = self.full(T::default(), values.len(), overlap);
        for (mut band, value) in array.axis_iter_mut(Axis(0)).zip(values) {
            band.fill(*value);
        }
        array
    }

    /// The input raster registered as `key`, opened on first use.
    pub fn raster(&mut self, key: &str) -> Result<RasterReader<'_>> {
        let inputs = self.setup.inputs;
        let input = inputs.item(key)?;
        let dataset = match self.state.rasters.entry(input.path.clone()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(RasterDataset::open(&input.path)?),
        };
        Ok(RasterReader {
            input,
            dataset,
            block: self.subgrid.grid(),
        })
    }

    /// The input vector registered as `key`, opened on first use.
    pub fn vector(&mut self, key: &str) -> Result<VectorReader<'_>> {
        let vectors = self.setup.vectors;
        let input = vectors.item(key)?;
        let dataset = match self.state.vectors.entry(input.path.clone()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(VectorDataset::open(&input.path)?),
        };
        Ok(VectorReader {
            dataset,
            block: self.subgrid.grid(),
        })
    }

    /// The output raster registered as `key`.
    pub fn output(&mut self, key: &str) -> Result<OutputWriter<'_>> {
        let outputs = self.setup.outputs;
        let output = outputs.item(key)?;
        Ok(OutputWriter {
            key: key.to_string(),
            output,
            subgrid: self.subgrid,
            output_grid: self.setup.grid,
            commands: &mut self.commands,
            band_counts: &mut self.state.band_counts,
        })
    }
}

// ============================================================================
// Input rasters
// ============================================================================

/// Reads an input raster onto the current block.
pub struct RasterReader<'b> {
    input: &'b InputRaster,
    dataset: &'b mut RasterDataset,
    block: &'b Grid,
}

impl RasterReader<'_> {
    /// All bands on the block grid grown by `overlap` pixels.
    ///
    /// Unaligned rasters are resampled with the input's algorithm; pixels
    /// outside the raster get the no-data value.
    pub fn array(&mut self, overlap: usize) -> Result<RasterArray> {
        let grid = self.block.pixel_buffer(overlap)?;
        self.array_on(&grid)
    }

    /// All bands on an explicit grid.
    pub fn array_on(&mut self, grid: &Grid) -> Result<RasterArray> {
        Ok(self
            .dataset
            .read_grid(grid, self.input.resample, self.input.no_data)?)
    }

    /// Like [`RasterReader::array`], cast to `T`.
    pub fn array_as<T: RasterElement>(&mut self, overlap: usize) -> Result<Array3<T>> {
        Ok(self.array(overlap)?.cast::<T>())
    }

    /// One band as a one-band array.
    pub fn band_array(&mut self, band: usize, overlap: usize) -> Result<RasterArray> {
        Ok(self.array(overlap)?.band(band)?)
    }

    /// Fraction of each category inside every block pixel.
    ///
    /// The category band is read at the raster's own resolution, binarized
    /// per category and averaged onto the block grid. Returns one band per
    /// category.
    pub fn fraction_array(&mut self, categories: &[f64], overlap: usize, band: usize) -> Result<Array3<f32>> {
        let target = self.block.pixel_buffer(overlap)?;
        let source = *self.dataset.grid();
        let extent = target.extent().reproject(source.projection())?;
        let native = Grid::new(extent, *source.resolution())?
            .anchor(&source.extent().upper_left())?
            .pixel_buffer(1)?;
        let labels = self
            .dataset
            .read_grid(&native, ResampleAlg::Nearest, None)?
            .band(band)?
            .to_f64();
        let labels = labels.index_axis(Axis(0), 0);

        let (rows, cols) = native.shape();
        let mut binarized = Array3::<f32>::zeros((categories.len(), rows, cols));
        for (mut out, category) in binarized.axis_iter_mut(Axis(0)).zip(categories) {
            out.zip_mut_with(&labels, |o, &v| *o = if v == *category { 1.0 } else { 0.0 });
        }
        let n = categories.len();
        let fractions = resample(
            &RasterArray::from_array(binarized),
            &native,
            &vec![None; n],
            &target,
            ResampleAlg::Average,
            &vec![0.0; n],
        )?;
        Ok(fractions.cast::<f32>())
    }

    /// Band profiles of the block pixels where `mask` is set, as
    /// `(bands, samples)` in row-major pixel order.
    pub fn sample(&mut self, mask: &Array2<bool>) -> Result<Array2<f64>> {
        let shape = self.block.shape();
        if mask.dim() != shape {
            return Err(ApplierError::contract(format!(
                "mask of shape {:?} does not match block of shape {:?}",
                mask.dim(),
                shape
            )));
        }
        let values = self.array(0)?.to_f64();
        let pixels: Vec<(usize, usize)> = mask
            .indexed_iter()
            .filter(|(_, m)| **m)
            .map(|(idx, _)| idx)
            .collect();
        let bands = values.dim().0;
        Ok(Array2::from_shape_fn((bands, pixels.len()), |(b, i)| {
            let (r, c) = pixels[i];
            values[[b, r, c]]
        }))
    }

    /// The registration of this input.
    pub fn input(&self) -> &InputRaster {
        self.input
    }

    /// The raster's own grid.
    pub fn grid(&self) -> &Grid {
        self.dataset.grid()
    }

    pub fn bands(&self) -> usize {
        self.dataset.bands()
    }

    pub fn data_type(&self) -> DataType {
        self.dataset.data_type()
    }

    pub fn metadata(&self) -> &RasterMetadata {
        self.dataset.metadata()
    }

    pub fn metadata_item(&self, key: &str, domain: &str) -> Option<&str> {
        self.dataset.metadata_item(key, domain)
    }

    pub fn metadata_domain(&self, domain: &str) -> Option<&MetadataDomain> {
        self.dataset.metadata_domain(domain)
    }

    /// The no-data value shared by all bands, or the input's override.
    pub fn no_data_value(&self) -> Option<f64> {
        self.input.no_data.or_else(|| self.dataset.no_data_value())
    }

    pub fn no_data_values(&self) -> Vec<Option<f64>> {
        match self.input.no_data {
            Some(value) => vec![Some(value); self.dataset.bands()],
            None => self.dataset.no_data_values(),
        }
    }

    pub fn category_names(&self) -> Option<&[String]> {
        self.dataset.category_names()
    }

    pub fn category_colors(&self) -> Option<&[Color]> {
        self.dataset.category_colors()
    }

    /// Band descriptions, `None` where unset.
    pub fn descriptions(&self) -> Vec<Option<String>> {
        (0..self.dataset.bands())
            .map(|b| {
                self.dataset
                    .band_description(b)
                    .ok()
                    .flatten()
                    .map(str::to_string)
            })
            .collect()
    }
}

// ============================================================================
// Input vectors
// ============================================================================

/// Rasterizes an input vector onto the current block.
pub struct VectorReader<'b> {
    dataset: &'b VectorDataset,
    block: &'b Grid,
}

impl VectorReader<'_> {
    /// Rasterization on the block grid grown by `overlap` pixels.
    pub fn array(&self, options: &RasterizeOptions, overlap: usize) -> Result<RasterArray> {
        let grid = self.block.pixel_buffer(overlap)?;
        Ok(self.dataset.rasterize(&grid, options)?)
    }

    /// Fraction of each category of `attribute` inside every block pixel.
    ///
    /// Each category is rasterized at `oversampling` times the block
    /// resolution and averaged down. Returns one band per category.
    pub fn fraction_array(
        &self,
        categories: &[Value],
        attribute: &str,
        oversampling: usize,
        overlap: usize,
    ) -> Result<Array3<f32>> {
        let filters: Vec<Option<AttributeFilter>> = categories
            .iter()
            .map(|value| {
                Some(AttributeFilter::Equals {
                    attribute: attribute.to_string(),
                    value: value.clone(),
                })
            })
            .collect();
        self.coverage(&filters, oversampling, overlap)
    }

    /// Fraction of every block pixel covered by any feature, as one band.
    pub fn coverage_fraction_array(&self, oversampling: usize, overlap: usize) -> Result<Array3<f32>> {
        self.coverage(&[None], oversampling, overlap)
    }

    fn coverage(
        &self,
        filters: &[Option<AttributeFilter>],
        oversampling: usize,
        overlap: usize,
    ) -> Result<Array3<f32>> {
        if oversampling == 0 {
            return Err(ApplierError::contract("oversampling must be at least 1"));
        }
        let target = self.block.pixel_buffer(overlap)?;
        let fine = target.at_resolution(target.resolution().scaled(1.0 / oversampling as f64)?)?;
        let (rows, cols) = target.shape();
        let mut out = Array3::<f32>::zeros((filters.len(), rows, cols));
        for (mut band, filter) in out.axis_iter_mut(Axis(0)).zip(filters) {
            let options = RasterizeOptions {
                init_value: 0.0,
                burn: Burn::Value(1.0),
                all_touched: false,
                filter: filter.clone(),
                data_type: DataType::F32,
            };
            let burned = self.dataset.rasterize(&fine, &options)?.to_f64();
            let fractions = resample_band(
                burned.index_axis(Axis(0), 0),
                &fine,
                None,
                &target,
                ResampleAlg::Average,
                0.0,
            )?;
            band.zip_mut_with(&fractions, |o, &v| *o = v as f32);
        }
        Ok(out)
    }

    pub fn dataset(&self) -> &VectorDataset {
        self.dataset
    }
}

// ============================================================================
// Outputs
// ============================================================================

/// Collects writes and metadata calls for one output.
pub struct OutputWriter<'b> {
    key: String,
    output: &'b OutputRaster,
    subgrid: &'b Subgrid,
    output_grid: Grid,
    commands: &'b mut Vec<WriteCommand>,
    band_counts: &'b mut HashMap<String, usize>,
}

impl<'b> OutputWriter<'b> {
    fn target(&self) -> OutputTarget {
        OutputTarget {
            key: self.key.clone(),
            path: self.output.path.clone(),
            driver: self.output.driver,
        }
    }

    /// Strip the overlap margin and check the array covers the block.
    fn block_array(&self, array: RasterArray, overlap: usize) -> Result<RasterArray> {
        let array = array.slice_margin(overlap)?;
        let (rows, cols) = self.subgrid.grid().shape();
        if (array.rows(), array.cols()) != (rows, cols) {
            return Err(ApplierError::contract(format!(
                "array for output '{}' is {}x{} pixels, block is {}x{}",
                self.key,
                array.cols(),
                array.rows(),
                cols,
                rows
            )));
        }
        Ok(array)
    }

    fn call(&mut self, method: DatasetMethod) {
        let command = WriteCommand::CallMethod {
            target: self.target(),
            block: self.subgrid.index(),
            method,
        };
        self.commands.push(command);
    }

    /// Write all bands of the block. `overlap` pixels are cut from every side.
    pub fn set_array(&mut self, array: RasterArray, overlap: usize) -> Result<()> {
        let array = self.block_array(array, overlap)?;
        self.band_counts.insert(self.key.clone(), array.bands());
        let command = WriteCommand::WriteArray {
            target: self.target(),
            block: self.subgrid.index(),
            array,
            grid: *self.subgrid.grid(),
            output_grid: self.output_grid,
        };
        self.commands.push(command);
        Ok(())
    }

    /// Declare the number of bands before writing band by band.
    pub fn set_band_count(&mut self, bands: usize) {
        self.band_counts.insert(self.key.clone(), bands);
    }

    pub fn band_count(&self) -> Option<usize> {
        self.band_counts.get(&self.key).copied()
    }

    /// A single band of this output.
    pub fn band(&mut self, index: usize) -> Result<OutputBandWriter<'_, 'b>> {
        let bands = self.band_count().ok_or_else(|| {
            ApplierError::contract(format!(
                "output '{}' needs a band count before band access",
                self.key
            ))
        })?;
        if index >= bands {
            return Err(ApplierError::contract(format!(
                "band {} of output '{}' with {} bands",
                index, self.key, bands
            )));
        }
        Ok(OutputBandWriter {
            parent: self,
            index,
            bands,
        })
    }

    pub fn set_metadata_item(&mut self, key: &str, value: impl Into<String>, domain: &str) {
        self.call(DatasetMethod::SetMetadataItem {
            key: key.to_string(),
            value: value.into(),
            domain: domain.to_string(),
        });
    }

    /// Set items of several domains, given as `domain -> key -> value`.
    pub fn set_metadata_dict(&mut self, domains: &BTreeMap<String, MetadataDomain>) {
        for (domain, items) in domains {
            self.call(DatasetMethod::SetMetadataDict {
                items: items.clone(),
                domain: domain.clone(),
            });
        }
    }

    /// Set the same no-data value on every band.
    pub fn set_no_data_value(&mut self, value: f64) {
        self.call(DatasetMethod::SetNoDataValue(Some(value)));
    }

    pub fn set_no_data_values(&mut self, values: &[Option<f64>]) {
        self.call(DatasetMethod::SetNoDataValues(values.to_vec()));
    }

    pub fn set_category_names(&mut self, names: Vec<String>) {
        self.call(DatasetMethod::SetCategoryNames(names));
    }

    pub fn set_category_colors(&mut self, colors: Vec<Color>) {
        self.call(DatasetMethod::SetCategoryColors(colors));
    }
}

/// Collects writes and metadata calls for one band of an output.
pub struct OutputBandWriter<'p, 'b> {
    parent: &'p mut OutputWriter<'b>,
    index: usize,
    bands: usize,
}

impl OutputBandWriter<'_, '_> {
    /// Write this band of the block from a one-band array.
    pub fn set_array(&mut self, array: RasterArray, overlap: usize) -> Result<()> {
        if array.bands() != 1 {
            return Err(ApplierError::contract(format!(
                "band write to output '{}' got {} bands",
                self.parent.key,
                array.bands()
            )));
        }
        let array = self.parent.block_array(array, overlap)?;
        let command = WriteCommand::WriteBand {
            target: self.parent.target(),
            block: self.parent.subgrid.index(),
            band: self.index,
            bands: self.bands,
            array,
            grid: *self.parent.subgrid.grid(),
            output_grid: self.parent.output_grid,
        };
        self.parent.commands.push(command);
        Ok(())
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.parent.call(DatasetMethod::SetBandDescription {
            band: self.index,
            description: description.into(),
        });
    }

    pub fn set_no_data_value(&mut self, value: f64) {
        self.parent.call(DatasetMethod::SetBandNoDataValue {
            band: self.index,
            value: Some(value),
        });
    }

    pub fn set_metadata_item(&mut self, key: &str, value: impl Into<String>, domain: &str) {
        self.parent.call(DatasetMethod::SetBandMetadataItem {
            band: self.index,
            key: key.to_string(),
            value: value.into(),
            domain: domain.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_common::{Projection, Resolution};

    fn grid() -> Grid {
        Grid::from_upper_left(
            0.0,
            60.0,
            Resolution::square(10.0).unwrap(),
            RasterSize::new(6, 6).unwrap(),
            Projection::utm(33, true).unwrap(),
        )
        .unwrap()
    }

    fn outputs() -> OutputRasterGroup {
        let mut outputs = OutputRasterGroup::new();
        outputs.set("out", OutputRaster::memory()).unwrap();
        outputs
    }

    #[test]
    fn test_full_arrays_include_overlap() {
        let grid = grid();
        let subgrids = grid.subgrids(RasterSize::new(4, 4).unwrap()).unwrap();
        let (inputs, vectors, outputs) = (InputRasterGroup::new(), InputVectorGroup::new(), outputs());
        let setup = RunSetup {
            grid,
            inputs: &inputs,
            vectors: &vectors,
            outputs: &outputs,
        };
        let mut state = WorkerState::new();
        let ctx = BlockContext::new(setup, &subgrids[3], &mut state);

        assert!(ctx.is_last_block());
        assert_eq!(ctx.block_size(), RasterSize::new(2, 2).unwrap());
        assert_eq!(ctx.block_offset(), PixelOffset::new(4, 4));
        assert_eq!(ctx.full(1u8, 2, 1).dim(), (2, 4, 4));
        let bands = ctx.full_bands(&[1.5f32, 2.5], 0);
        assert_eq!(bands[[1, 1, 1]], 2.5);
        assert_eq!(bands[[0, 0, 0]], 1.5);
    }

    #[test]
    fn test_output_commands_are_collected() {
        let grid = grid();
        let subgrids = grid.subgrids(RasterSize::new(3, 3).unwrap()).unwrap();
        let (inputs, vectors, outputs) = (InputRasterGroup::new(), InputVectorGroup::new(), outputs());
        let setup = RunSetup {
            grid,
            inputs: &inputs,
            vectors: &vectors,
            outputs: &outputs,
        };
        let mut state = WorkerState::new();
        let mut ctx = BlockContext::new(setup, &subgrids[1], &mut state);

        let array = RasterArray::from_array(ctx.full(7i16, 3, 2));
        let mut out = ctx.output("out").unwrap();
        out.set_array(array, 2).unwrap();
        assert_eq!(out.band_count(), Some(3));
        out.band(2).unwrap().set_description("third");
        assert!(matches!(out.band(3), Err(ApplierError::OperatorContract(_))));

        let commands = ctx.take_commands();
        assert_eq!(commands.len(), 2);
        match &commands[0] {
            WriteCommand::WriteArray { array, block, grid, .. } => {
                assert_eq!(*block, 1);
                assert_eq!(array.shape(), (3, 3, 3));
                assert_eq!(grid.offset_in(&setup.grid).unwrap(), PixelOffset::new(3, 0));
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert!(ctx.take_commands().is_empty());
        assert!(matches!(ctx.output("missing"), Err(ApplierError::OperatorContract(_))));
    }
}
