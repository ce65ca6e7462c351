//! Write commands and the writers that apply them.
//!
//! A [`Writer`] exclusively owns the output datasets routed to it. Workers
//! never touch an output dataset; they send [`WriteCommand`]s, either
//! straight into an inline writer (synchronous runs) or over a channel to
//! a writer thread.
//!
//! ```text
//! worker ──┐                      ┌─► writer 0 ──► out_a, out_c
//! worker ──┼─► QueueSink (route) ─┤
//! worker ──┘                      └─► writer 1 ──► out_b
//! ```
//!
//! Every array command carries the block grid and the output grid; the
//! destination offset is derived from them at write time, so arrival order
//! does not matter.

use crate::error::{ApplierError, Result};
use geo_common::Grid;
use raster_io::{Color, MetadataDomain, RasterArray, RasterDataset, RasterDriver};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, warn};

/// Identity and format of an output file.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTarget {
    /// Output key in the applier's output group.
    pub key: String,
    pub path: PathBuf,
    pub driver: RasterDriver,
}

/// A deferred dataset mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum DatasetMethod {
    SetMetadataItem { key: String, value: String, domain: String },
    SetMetadataDict { items: MetadataDomain, domain: String },
    SetNoDataValue(Option<f64>),
    SetNoDataValues(Vec<Option<f64>>),
    SetCategoryNames(Vec<String>),
    SetCategoryColors(Vec<Color>),
    SetBandDescription { band: usize, description: String },
    SetBandNoDataValue { band: usize, value: Option<f64> },
    SetBandMetadataItem { band: usize, key: String, value: String, domain: String },
}

impl DatasetMethod {
    /// Apply the mutation to a dataset.
    pub fn apply(self, dataset: &mut RasterDataset) -> raster_io::Result<()> {
        match self {
            DatasetMethod::SetMetadataItem { key, value, domain } => {
                dataset.set_metadata_item(&key, value, &domain)
            }
            DatasetMethod::SetMetadataDict { items, domain } => {
                dataset.set_metadata_dict(&items, &domain)
            }
            DatasetMethod::SetNoDataValue(value) => dataset.set_no_data_value(value),
            DatasetMethod::SetNoDataValues(values) => dataset.set_no_data_values(&values)?,
            DatasetMethod::SetCategoryNames(names) => dataset.set_category_names(names),
            DatasetMethod::SetCategoryColors(colors) => dataset.set_category_colors(colors),
            DatasetMethod::SetBandDescription { band, description } => {
                dataset.set_band_description(band, description)?
            }
            DatasetMethod::SetBandNoDataValue { band, value } => {
                dataset.set_band_no_data_value(band, value)?
            }
            DatasetMethod::SetBandMetadataItem { band, key, value, domain } => {
                dataset.set_band_metadata_item(band, &key, value, &domain)?
            }
        }
        Ok(())
    }
}

/// A unit of work for a writer.
#[derive(Debug, Clone)]
pub enum WriteCommand {
    /// Write all bands of a block.
    WriteArray {
        target: OutputTarget,
        block: usize,
        array: RasterArray,
        grid: Grid,
        output_grid: Grid,
    },
    /// Write one band of a block into an output with `bands` bands.
    WriteBand {
        target: OutputTarget,
        block: usize,
        band: usize,
        bands: usize,
        array: RasterArray,
        grid: Grid,
        output_grid: Grid,
    },
    /// Mutate dataset metadata; applied only for the first block touching the file.
    CallMethod {
        target: OutputTarget,
        block: usize,
        method: DatasetMethod,
    },
    /// Close every output owned by the writer and stop.
    Close { write_envi_header: bool },
    /// Discard every output owned by the writer and stop.
    Abort,
}

impl WriteCommand {
    /// The output a command is addressed to.
    pub fn target(&self) -> Option<&OutputTarget> {
        match self {
            WriteCommand::WriteArray { target, .. }
            | WriteCommand::WriteBand { target, .. }
            | WriteCommand::CallMethod { target, .. } => Some(target),
            WriteCommand::Close { .. } | WriteCommand::Abort => None,
        }
    }
}

/// Anything that accepts write commands.
pub trait CommandSink {
    fn send(&mut self, command: WriteCommand) -> Result<()>;
}

struct ManagedOutput {
    target: OutputTarget,
    dataset: Option<RasterDataset>,
    /// Block whose metadata calls are applied.
    metadata_block: Option<usize>,
    /// Metadata calls received before the dataset existed.
    pending: Vec<DatasetMethod>,
}

/// Owner of a set of output datasets.
#[derive(Default)]
pub struct Writer {
    outputs: HashMap<String, ManagedOutput>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one command.
    pub fn handle(&mut self, command: WriteCommand) -> Result<()> {
        match command {
            WriteCommand::WriteArray {
                target,
                block,
                array,
                grid,
                output_grid,
            } => {
                let output = self.touch(target, block);
                if output.dataset.is_none() {
                    let dataset = create(&output.target, &output_grid, array.bands(), &array)?;
                    output.open(dataset)?;
                }
                let offset = grid.offset_in(&output_grid)?;
                if let Some(dataset) = output.dataset.as_mut() {
                    check_layout(&output.target, dataset, array.bands(), &array)?;
                    dataset.write_array(&array, offset)?;
                }
            }
            WriteCommand::WriteBand {
                target,
                block,
                band,
                bands,
                array,
                grid,
                output_grid,
            } => {
                let output = self.touch(target, block);
                if output.dataset.is_none() {
                    let dataset = create(&output.target, &output_grid, bands, &array)?;
                    output.open(dataset)?;
                }
                let offset = grid.offset_in(&output_grid)?;
                if let Some(dataset) = output.dataset.as_mut() {
                    check_layout(&output.target, dataset, bands, &array)?;
                    dataset.write_band(band, &array, offset)?;
                }
            }
            WriteCommand::CallMethod {
                target,
                block,
                method,
            } => {
                let output = self.touch(target, block);
                if output.metadata_block != Some(block) {
                    return Ok(());
                }
                match output.dataset.as_mut() {
                    Some(dataset) => method.apply(dataset)?,
                    None => output.pending.push(method),
                }
            }
            WriteCommand::Close { write_envi_header } => {
                self.close(write_envi_header)?;
            }
            WriteCommand::Abort => self.abort()?,
        }
        Ok(())
    }

    fn touch(&mut self, target: OutputTarget, block: usize) -> &mut ManagedOutput {
        let output = self
            .outputs
            .entry(target.key.clone())
            .or_insert_with(|| ManagedOutput {
                target,
                dataset: None,
                metadata_block: None,
                pending: Vec::new(),
            });
        output.metadata_block.get_or_insert(block);
        output
    }

    /// Close all outputs. In-memory outputs are returned by key.
    pub fn close(&mut self, write_envi_header: bool) -> Result<BTreeMap<String, RasterDataset>> {
        let mut keys: Vec<String> = self.outputs.keys().cloned().collect();
        keys.sort();
        let mut memory = BTreeMap::new();
        for key in keys {
            let Some(output) = self.outputs.remove(&key) else {
                continue;
            };
            let Some(mut dataset) = output.dataset else {
                warn!(output = %key, "output was never written");
                continue;
            };
            dataset.flush()?;
            dataset.close(write_envi_header)?;
            debug!(output = %key, path = %output.target.path.display(), "closed output");
            if output.target.driver.is_memory() {
                memory.insert(key, dataset);
            }
        }
        Ok(memory)
    }

    /// Discard all outputs. Nothing is finalised and the files created by
    /// this writer are removed.
    pub fn abort(&mut self) -> Result<()> {
        let mut first_error = None;
        for (key, output) in self.outputs.drain() {
            let Some(mut dataset) = output.dataset else {
                continue;
            };
            match dataset.discard() {
                Ok(()) => debug!(output = %key, path = %output.target.path.display(), "discarded output"),
                Err(e) => {
                    warn!(output = %key, error = %e, "failed to discard output");
                    first_error.get_or_insert(ApplierError::from(e));
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl ManagedOutput {
    fn open(&mut self, mut dataset: RasterDataset) -> Result<()> {
        for method in self.pending.drain(..) {
            method.apply(&mut dataset)?;
        }
        self.dataset = Some(dataset);
        Ok(())
    }
}

fn create(target: &OutputTarget, grid: &Grid, bands: usize, array: &RasterArray) -> Result<RasterDataset> {
    let dataset = RasterDataset::create(&target.path, grid, bands, array.data_type(), target.driver)?;
    debug!(
        output = %target.key,
        path = %target.path.display(),
        bands,
        data_type = %array.data_type(),
        "created output"
    );
    Ok(dataset)
}

/// Every block of an output must match the data type and band count it
/// was created with.
fn check_layout(target: &OutputTarget, dataset: &RasterDataset, bands: usize, array: &RasterArray) -> Result<()> {
    if array.data_type() != dataset.data_type() {
        return Err(ApplierError::contract(format!(
            "output '{}' holds {} data, got a block of {}",
            target.key,
            dataset.data_type(),
            array.data_type()
        )));
    }
    if bands != dataset.bands() {
        return Err(ApplierError::contract(format!(
            "output '{}' has {} bands, got a block with {}",
            target.key,
            dataset.bands(),
            bands
        )));
    }
    Ok(())
}

impl CommandSink for Writer {
    fn send(&mut self, command: WriteCommand) -> Result<()> {
        self.handle(command)
    }
}

// ============================================================================
// Writer threads
// ============================================================================

/// A writer running on its own thread, fed through a channel.
pub struct WriterThread {
    index: usize,
    sender: Sender<WriteCommand>,
    handle: JoinHandle<Result<BTreeMap<String, RasterDataset>>>,
}

impl WriterThread {
    /// Start a writer thread.
    pub fn spawn(index: usize) -> Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let handle = std::thread::Builder::new()
            .name(format!("applier-writer-{}", index))
            .spawn(move || run_writer(index, receiver))?;
        debug!(writer = index, "started writer thread");
        Ok(Self {
            index,
            sender,
            handle,
        })
    }

    pub fn sender(&self) -> Sender<WriteCommand> {
        self.sender.clone()
    }

    /// Ask the writer to close its outputs and wait for it.
    pub fn finish(self, write_envi_header: bool) -> Result<BTreeMap<String, RasterDataset>> {
        self.stop(WriteCommand::Close { write_envi_header })
    }

    /// Ask the writer to discard its outputs and wait for it.
    pub fn abort(self) -> Result<()> {
        self.stop(WriteCommand::Abort).map(|_| ())
    }

    fn stop(self, command: WriteCommand) -> Result<BTreeMap<String, RasterDataset>> {
        // A writer that already failed has dropped its receiver; its own
        // error is reported by join below.
        let _ = self.sender.send(command);
        drop(self.sender);
        match self.handle.join() {
            Ok(result) => result,
            Err(payload) => Err(ApplierError::from_panic(payload)),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

fn run_writer(index: usize, receiver: Receiver<WriteCommand>) -> Result<BTreeMap<String, RasterDataset>> {
    let mut writer = Writer::new();
    for command in receiver {
        match command {
            WriteCommand::Close { write_envi_header } => {
                let memory = writer.close(write_envi_header)?;
                debug!(writer = index, "writer finished");
                return Ok(memory);
            }
            WriteCommand::Abort => {
                writer.abort()?;
                debug!(writer = index, "writer aborted");
                return Ok(BTreeMap::new());
            }
            command => {
                if let Err(e) = writer.handle(command) {
                    error!(writer = index, error = %e, "writer failed");
                    if let Err(discard) = writer.abort() {
                        warn!(writer = index, error = %discard, "failed to discard outputs");
                    }
                    return Err(e);
                }
            }
        }
    }
    warn!(writer = index, "all senders dropped, discarding outputs");
    writer.abort()?;
    Ok(BTreeMap::new())
}

/// Sends commands to the writer thread owning each output.
#[derive(Clone)]
pub struct QueueSink {
    senders: Vec<Sender<WriteCommand>>,
    routes: Arc<BTreeMap<String, usize>>,
}

impl QueueSink {
    pub fn new(senders: Vec<Sender<WriteCommand>>, routes: Arc<BTreeMap<String, usize>>) -> Self {
        Self { senders, routes }
    }
}

impl CommandSink for QueueSink {
    fn send(&mut self, command: WriteCommand) -> Result<()> {
        let key = command
            .target()
            .map(|t| t.key.as_str())
            .ok_or_else(|| ApplierError::contract("close commands are not routed"))?;
        let index = *self
            .routes
            .get(key)
            .ok_or_else(|| ApplierError::contract(format!("no writer for output '{}'", key)))?;
        let sender = self
            .senders
            .get(index)
            .ok_or(ApplierError::WriterDisconnected(index))?;
        sender
            .send(command)
            .map_err(|_| ApplierError::WriterDisconnected(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_common::{Pixel, Projection, RasterSize, Resolution};
    use ndarray::Array3;

    fn grid() -> Grid {
        Grid::from_upper_left(
            0.0,
            40.0,
            Resolution::square(10.0).unwrap(),
            RasterSize::new(4, 4).unwrap(),
            Projection::utm(33, true).unwrap(),
        )
        .unwrap()
    }

    fn target(key: &str) -> OutputTarget {
        OutputTarget {
            key: key.to_string(),
            path: PathBuf::new(),
            driver: RasterDriver::Mem,
        }
    }

    fn block(x: i64, y: i64) -> Grid {
        grid()
            .subset(Pixel::new(x, y), RasterSize::new(2, 2).unwrap(), true)
            .unwrap()
    }

    fn write(block_index: usize, x: i64, y: i64, value: u8) -> WriteCommand {
        WriteCommand::WriteArray {
            target: target("out"),
            block: block_index,
            array: RasterArray::from_array(Array3::from_elem((1, 2, 2), value)),
            grid: block(x, y),
            output_grid: grid(),
        }
    }

    fn description(block_index: usize, text: &str) -> WriteCommand {
        WriteCommand::CallMethod {
            target: target("out"),
            block: block_index,
            method: DatasetMethod::SetBandDescription {
                band: 0,
                description: text.to_string(),
            },
        }
    }

    #[test]
    fn test_offsets_independent_of_arrival_order() {
        let mut writer = Writer::new();
        writer.handle(write(3, 2, 2, 4)).unwrap();
        writer.handle(write(0, 0, 0, 1)).unwrap();
        writer.handle(write(2, 0, 2, 3)).unwrap();
        writer.handle(write(1, 2, 0, 2)).unwrap();
        let mut memory = writer.close(false).unwrap();
        let mut out = memory.remove("out").unwrap();
        let array = out.read_array().unwrap();
        let a = array.as_array::<u8>().unwrap();
        assert_eq!(a[[0, 0, 0]], 1);
        assert_eq!(a[[0, 0, 3]], 2);
        assert_eq!(a[[0, 3, 0]], 3);
        assert_eq!(a[[0, 3, 3]], 4);
    }

    #[test]
    fn test_metadata_applied_once() {
        let mut writer = Writer::new();
        writer.handle(write(2, 0, 2, 1)).unwrap();
        writer.handle(description(2, "first")).unwrap();
        writer.handle(write(0, 0, 0, 1)).unwrap();
        writer.handle(description(0, "second")).unwrap();
        let memory = writer.close(false).unwrap();
        assert_eq!(
            memory["out"].band_description(0).unwrap(),
            Some("first")
        );
    }

    #[test]
    fn test_metadata_before_creation_is_kept() {
        let mut writer = Writer::new();
        writer.handle(description(0, "early")).unwrap();
        writer.handle(write(0, 0, 0, 1)).unwrap();
        let memory = writer.close(false).unwrap();
        assert_eq!(memory["out"].band_description(0).unwrap(), Some("early"));
    }

    #[test]
    fn test_band_writes() {
        let mut writer = Writer::new();
        for band in 0..3 {
            writer
                .handle(WriteCommand::WriteBand {
                    target: target("stack"),
                    block: 0,
                    band,
                    bands: 3,
                    array: RasterArray::from_array(Array3::from_elem((1, 4, 4), band as f32)),
                    grid: grid(),
                    output_grid: grid(),
                })
                .unwrap();
        }
        let memory = writer.close(false).unwrap();
        let mut out = memory.into_values().next().unwrap();
        assert_eq!(out.bands(), 3);
        let a = out.read_array().unwrap();
        assert_eq!(a.as_array::<f32>().unwrap()[[2, 3, 3]], 2.0);
    }

    #[test]
    fn test_writer_thread_roundtrip() {
        let thread = WriterThread::spawn(0).unwrap();
        let routes = Arc::new(BTreeMap::from([("out".to_string(), 0)]));
        let mut sink = QueueSink::new(vec![thread.sender()], routes);
        sink.send(write(0, 0, 0, 7)).unwrap();
        sink.send(write(1, 2, 0, 7)).unwrap();
        sink.send(write(2, 0, 2, 7)).unwrap();
        sink.send(write(3, 2, 2, 7)).unwrap();
        assert_eq!(thread.index(), 0);
        let mut memory = thread.finish(false).unwrap();
        let a = memory.get_mut("out").unwrap().read_array().unwrap();
        assert!(a.as_array::<u8>().unwrap().iter().all(|&v| v == 7));
    }

    #[test]
    fn test_unrouted_output_is_rejected() {
        let thread = WriterThread::spawn(0).unwrap();
        let mut sink = QueueSink::new(vec![thread.sender()], Arc::new(BTreeMap::new()));
        assert!(matches!(
            sink.send(write(0, 0, 0, 1)),
            Err(ApplierError::OperatorContract(_))
        ));
        thread.finish(false).unwrap();
    }

    #[test]
    fn test_block_layout_must_match_output() {
        let mut writer = Writer::new();
        writer.handle(write(0, 0, 0, 1)).unwrap();

        let wider = WriteCommand::WriteArray {
            target: target("out"),
            block: 1,
            array: RasterArray::from_array(Array3::from_elem((1, 2, 2), 1.5f32)),
            grid: block(2, 0),
            output_grid: grid(),
        };
        assert!(matches!(writer.handle(wider), Err(ApplierError::OperatorContract(_))));

        let more_bands = WriteCommand::WriteArray {
            target: target("out"),
            block: 2,
            array: RasterArray::from_array(Array3::from_elem((2, 2, 2), 1u8)),
            grid: block(0, 2),
            output_grid: grid(),
        };
        assert!(matches!(writer.handle(more_bands), Err(ApplierError::OperatorContract(_))));
    }

    #[test]
    fn test_abort_removes_created_files() {
        let dir = tempfile::tempdir().unwrap();
        let file_target = |name: &str| {
            let path = dir.path().join(name);
            OutputTarget {
                key: name.to_string(),
                driver: RasterDriver::from_filename(&path).unwrap(),
                path,
            }
        };
        let on_disk = |target: OutputTarget| WriteCommand::WriteArray {
            target,
            block: 0,
            array: RasterArray::from_array(Array3::from_elem((1, 2, 2), 3i16)),
            grid: block(0, 0),
            output_grid: grid(),
        };

        let mut writer = Writer::new();
        writer.handle(on_disk(file_target("inline.bsq"))).unwrap();
        assert!(dir.path().join("inline.bsq").is_file());
        writer.handle(WriteCommand::Abort).unwrap();
        assert!(!dir.path().join("inline.bsq").exists());
        assert!(!dir.path().join("inline.hdr").exists());

        let thread = WriterThread::spawn(1).unwrap();
        let routes = Arc::new(BTreeMap::from([("threaded.bsq".to_string(), 0)]));
        let mut sink = QueueSink::new(vec![thread.sender()], routes);
        sink.send(on_disk(file_target("threaded.bsq"))).unwrap();
        thread.abort().unwrap();
        assert!(!dir.path().join("threaded.bsq").exists());
        assert!(!dir.path().join("threaded.hdr").exists());
    }

    #[test]
    fn test_failed_writer_thread_discards_its_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.bsq");
        let target = OutputTarget {
            key: "broken".to_string(),
            path: path.clone(),
            driver: RasterDriver::default(),
        };
        let command = |array: RasterArray| WriteCommand::WriteArray {
            target: target.clone(),
            block: 0,
            array,
            grid: block(0, 0),
            output_grid: grid(),
        };

        let thread = WriterThread::spawn(0).unwrap();
        let sender = thread.sender();
        sender
            .send(command(RasterArray::from_array(Array3::from_elem((1, 2, 2), 1u8))))
            .unwrap();
        sender
            .send(command(RasterArray::from_array(Array3::from_elem((1, 2, 2), 1.0f64))))
            .unwrap();
        drop(sender);
        assert!(matches!(
            thread.finish(true),
            Err(ApplierError::OperatorContract(_))
        ));
        assert!(!path.exists());
        assert!(!path.with_extension("hdr").exists());
    }
}
