//! Blockwise raster processing.
//!
//! An [`Applier`] derives an output [`Grid`](geo_common::Grid) from its
//! registered input rasters, cuts it into blocks and runs an [`Operator`]
//! on every block. Operators read inputs and set outputs through a
//! [`BlockContext`]; writes travel as [`WriteCommand`]s to the writer that
//! owns the output file.
//!
//! # Architecture
//!
//! ```text
//!                    ┌──────────────────────────────┐
//!  inputs ──► derive │ Applier                      │
//!             grid   │   grid.subgrids(block_size)  │
//!                    └──────────────┬───────────────┘
//!                                   │ blocks (row-major)
//!              ┌────────────────────┼────────────────────┐
//!              ▼                    ▼                    ▼
//!         worker 0             worker 1             worker n     (rayon pool,
//!      Operator + state     Operator + state     Operator + state  or inline)
//!              │                    │                    │
//!              └──── WriteCommand ──┴──── WriteCommand ──┘
//!                                   │
//!                     ┌─────────────┴─────────────┐
//!                     ▼                           ▼
//!                 writer 0                    writer 1      (threads, or inline)
//!               out_a, out_c                   out_b
//! ```
//!
//! # Example
//!
//! ```ignore
//! let mut applier = Applier::new(ApplierConfig::default());
//! applier.set_input("image", InputRaster::new("image.bsq"))?;
//! applier.set_output("scaled", OutputRaster::new("scaled.bsq")?)?;
//! applier.apply("scale", || {
//!     Ok(ClosureOperator::new(|ctx: &mut BlockContext<'_>| {
//!         let image = ctx.raster("image")?.array_as::<f32>(0)?;
//!         ctx.output("scaled")?.set_array(RasterArray::from_array(image * 0.5), 0)
//!     }))
//! })?;
//! ```

pub mod applier;
pub mod config;
pub mod context;
pub mod derive;
pub mod error;
pub mod io;
pub mod operator;
pub mod worker;
pub mod writer;

pub use applier::{Applier, ApplierRun};
pub use config::{ApplierConfig, BlockSize, ExtentPolicy, NumWorkers, ProgressCallback, ResolutionPolicy};
pub use context::{BlockContext, OutputBandWriter, OutputWriter, RasterReader, VectorReader, WorkerState};
pub use error::{ApplierError, Result};
pub use io::{
    GroupEntry, InputRaster, InputRasterGroup, InputVector, InputVectorGroup, IoGroup, OutputRaster,
    OutputRasterGroup,
};
pub use operator::{ClosureOperator, Operator};
pub use writer::{CommandSink, DatasetMethod, OutputTarget, WriteCommand, Writer};
