//! The orchestrator: grid derivation, block dispatch and writer teardown.

use crate::config::{checked, ApplierConfig};
use crate::context::RunSetup;
use crate::derive;
use crate::error::Result;
use crate::io::{
    assign_writers, InputRaster, InputRasterGroup, InputVector, InputVectorGroup, OutputRaster,
    OutputRasterGroup,
};
use crate::operator::Operator;
use crate::worker::{first_error, run_pool, run_sync};
use crate::writer::{QueueSink, Writer, WriterThread};
use geo_common::Grid;
use raster_io::{remove_raster_files, RasterDataset};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Result of a completed run.
#[derive(Debug)]
pub struct ApplierRun<T> {
    /// Per-block operator results, ordered by block index.
    pub results: Vec<T>,
    /// The output grid of the run.
    pub grid: Grid,
    /// In-memory outputs by key.
    pub memory_outputs: BTreeMap<String, RasterDataset>,
}

/// Runs operators blockwise over registered inputs and outputs.
#[derive(Debug, Default)]
pub struct Applier {
    config: ApplierConfig,
    inputs: InputRasterGroup,
    vectors: InputVectorGroup,
    outputs: OutputRasterGroup,
    skip_existing: bool,
}

impl Applier {
    pub fn new(config: ApplierConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &ApplierConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ApplierConfig {
        &mut self.config
    }

    /// Register an input raster under a slash-separated key.
    pub fn set_input(&mut self, key: &str, input: InputRaster) -> Result<()> {
        self.inputs.set(key, input)
    }

    /// Register an input vector under a slash-separated key.
    pub fn set_vector(&mut self, key: &str, vector: InputVector) -> Result<()> {
        self.vectors.set(key, vector)
    }

    /// Register an output raster under a slash-separated key.
    pub fn set_output(&mut self, key: &str, output: OutputRaster) -> Result<()> {
        self.outputs.set(key, output)
    }

    pub fn inputs(&self) -> &InputRasterGroup {
        &self.inputs
    }

    pub fn inputs_mut(&mut self) -> &mut InputRasterGroup {
        &mut self.inputs
    }

    pub fn vectors(&self) -> &InputVectorGroup {
        &self.vectors
    }

    pub fn vectors_mut(&mut self) -> &mut InputVectorGroup {
        &mut self.vectors
    }

    pub fn outputs(&self) -> &OutputRasterGroup {
        &self.outputs
    }

    pub fn outputs_mut(&mut self) -> &mut OutputRasterGroup {
        &mut self.outputs
    }

    /// With `overwrite = false`, a run whose file outputs all exist
    /// already is skipped.
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.skip_existing = !overwrite;
        self
    }

    /// The output grid derived from the inputs and the configuration.
    pub fn derive_grid(&self) -> Result<Grid> {
        let grids = self
            .inputs
            .flat_values()
            .into_iter()
            .map(|input| Ok(*RasterDataset::open(&input.path)?.grid()))
            .collect::<Result<Vec<Grid>>>()?;
        derive::derive_grid(&self.config, &grids)
    }

    /// Remove the files of all file outputs after finalisation failed.
    fn remove_file_outputs(&self) {
        for (key, output) in self.outputs.flat() {
            if output.is_memory() {
                continue;
            }
            if let Err(e) = remove_raster_files(&output.path, &output.driver) {
                warn!(output = %key, error = %e, "failed to remove output");
            }
        }
    }

    fn outputs_exist(&self) -> bool {
        let outputs = self.outputs.flat_values();
        !outputs.is_empty()
            && outputs
                .iter()
                .all(|output| !output.is_memory() && output.path.exists())
    }

    /// Run an operator over every block.
    ///
    /// `factory` is called once per worker to build its operator. Returns
    /// `None` when the run was skipped because the outputs exist.
    ///
    /// A failed run leaves no finalised output behind: writers discard the
    /// files they created instead of closing them.
    pub fn apply<F, O>(&self, description: &str, factory: F) -> Result<Option<ApplierRun<O::Output>>>
    where
        F: Fn() -> Result<O> + Sync,
        O: Operator,
    {
        checked(&self.config)?;
        self.outputs.check_distinct_files()?;
        if self.skip_existing && self.outputs_exist() {
            info!(description, "outputs exist, skipping");
            return Ok(None);
        }

        let grid = self.derive_grid()?;
        let block_size = self.config.block_size.resolve(&grid)?;
        let subgrids = grid.subgrids(block_size)?;

        info!("start {}, {}", description, grid.size());
        debug!(
            grid = %grid,
            blocks = subgrids.len(),
            block_size = %block_size,
            workers = ?self.config.num_workers,
            writers = self.config.writer_count(),
            "run setup"
        );
        let started = Instant::now();

        let setup = RunSetup {
            grid,
            inputs: &self.inputs,
            vectors: &self.vectors,
            outputs: &self.outputs,
        };
        let write_envi_header = self.config.write_envi_header;

        let (results, memory_outputs) = if self.config.multiwriting() {
            let writers = (0..self.config.writer_count())
                .map(WriterThread::spawn)
                .collect::<Result<Vec<_>>>()?;
            let routes = assign_writers(&self.outputs.flat_keys(), writers.len());
            let sink = QueueSink::new(
                writers.iter().map(WriterThread::sender).collect(),
                Arc::new(routes),
            );

            let computed = match &self.config.num_workers {
                Some(workers) => run_pool(
                    setup,
                    &self.config,
                    &subgrids,
                    &factory,
                    &sink,
                    workers.resolve(),
                ),
                None => run_sync(setup, &self.config, &subgrids, &factory, &mut sink.clone()),
            };
            drop(sink);

            let failed = computed.is_err();
            let mut memory_outputs = BTreeMap::new();
            let mut errors = Vec::new();
            for writer in writers {
                let stopped = if failed {
                    writer.abort().map(|()| BTreeMap::new())
                } else {
                    writer.finish(write_envi_header)
                };
                match stopped {
                    Ok(memory) => memory_outputs.extend(memory),
                    Err(e) => errors.push(e),
                }
            }
            let results = match computed {
                Ok(results) => results,
                Err(e) => {
                    errors.insert(0, e);
                    Vec::new()
                }
            };
            if let Some(e) = first_error(errors) {
                if !failed {
                    // Other writers may have finalised their outputs already.
                    self.remove_file_outputs();
                }
                return Err(e);
            }
            (results, memory_outputs)
        } else {
            let mut writer = Writer::new();
            match run_sync(setup, &self.config, &subgrids, &factory, &mut writer) {
                Ok(results) => match writer.close(write_envi_header) {
                    Ok(memory) => (results, memory),
                    Err(e) => {
                        drop(writer);
                        self.remove_file_outputs();
                        return Err(e);
                    }
                },
                Err(e) => {
                    if let Err(discard) = writer.abort() {
                        warn!(error = %discard, "failed to discard outputs");
                    }
                    return Err(e);
                }
            }
        };

        self.config.report_progress(100.0);
        let seconds = started.elapsed().as_secs_f64();
        info!(
            "done {} in {:.0} sec | {:.1} min | {:.2} hours",
            description,
            seconds,
            seconds / 60.0,
            seconds / 3600.0
        );

        Ok(Some(ApplierRun {
            results,
            grid,
            memory_outputs,
        }))
    }

    /// Run an operator and reduce the per-block results.
    pub fn apply_aggregate<F, O, A, R>(&self, description: &str, factory: F, aggregate: A) -> Result<Option<R>>
    where
        F: Fn() -> Result<O> + Sync,
        O: Operator,
        A: FnOnce(Vec<O::Output>, &Grid) -> Result<R>,
    {
        match self.apply(description, factory)? {
            Some(run) => Ok(Some(aggregate(run.results, &run.grid)?)),
            None => Ok(None),
        }
    }
}
