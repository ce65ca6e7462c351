//! Configuration for an applier run.

use crate::error::{ApplierError, Result};
use geo_common::{Extent, Grid, Projection, RasterSize, Resolution};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Controls of an applier run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplierConfig {
    /// Target block size in pixels, or the full grid.
    pub block_size: BlockSize,

    /// Number of compute workers. `None` runs blocks in the calling thread.
    pub num_workers: Option<NumWorkers>,

    /// Number of writer threads. `None` writes from the workers directly
    /// unless workers are used, in which case one writer thread runs.
    pub num_writers: Option<usize>,

    /// How input extents are combined.
    pub extent_policy: ExtentPolicy,

    /// How input resolutions are combined.
    pub resolution_policy: ResolutionPolicy,

    /// Explicit output resolution.
    pub resolution: Option<Resolution>,

    /// Explicit output extent.
    pub extent: Option<Extent>,

    /// Explicit output projection.
    pub projection: Option<Projection>,

    /// Write an ENVI header next to every output when closing it.
    pub write_envi_header: bool,

    /// Receives the progress in percent.
    #[serde(skip)]
    pub progress: Option<ProgressCallback>,
}

impl Default for ApplierConfig {
    fn default() -> Self {
        Self {
            block_size: BlockSize::default(),
            num_workers: None,
            num_writers: None,
            extent_policy: ExtentPolicy::Intersection,
            resolution_policy: ResolutionPolicy::Minimum,
            resolution: None,
            extent: None,
            projection: None,
            write_envi_header: true,
            progress: None,
        }
    }
}

impl ApplierConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("APPLIER_BLOCK_SIZE") {
            if let Ok(size) = val.parse() {
                config.block_size = size;
            }
        }

        if let Ok(val) = std::env::var("APPLIER_NUM_WORKERS") {
            if val.trim().is_empty() {
                config.num_workers = None;
            } else if let Some(workers) = NumWorkers::from_str(&val) {
                config.num_workers = Some(workers);
            }
        }

        if let Ok(val) = std::env::var("APPLIER_NUM_WRITERS") {
            if val.trim().is_empty() {
                config.num_writers = None;
            } else if let Ok(writers) = val.trim().parse() {
                config.num_writers = Some(writers);
            }
        }

        if let Ok(val) = std::env::var("APPLIER_EXTENT_POLICY") {
            if let Some(policy) = ExtentPolicy::from_str(&val) {
                config.extent_policy = policy;
            }
        }

        if let Ok(val) = std::env::var("APPLIER_RESOLUTION_POLICY") {
            if let Some(policy) = ResolutionPolicy::from_str(&val) {
                config.resolution_policy = policy;
            }
        }

        if let Ok(val) = std::env::var("APPLIER_WRITE_ENVI_HEADER") {
            config.write_envi_header = val.to_lowercase() == "true" || val == "1";
        }

        config
    }

    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&text)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let BlockSize::Size { x, y } = self.block_size {
            if x == 0 || y == 0 {
                return Err(format!("block_size must be > 0, got {}x{}", x, y));
            }
        }

        if let Some(NumWorkers::Count(0)) = self.num_workers {
            return Err("num_workers must be > 0".to_string());
        }

        if self.num_writers == Some(0) {
            return Err("num_writers must be > 0".to_string());
        }

        if let (Some(extent), Some(resolution)) = (&self.extent, &self.resolution) {
            if extent.width() < resolution.x() / 2.0 || extent.height() < resolution.y() / 2.0 {
                return Err(format!(
                    "extent {} is smaller than one pixel at resolution {}",
                    extent, resolution
                ));
            }
        }

        Ok(())
    }

    /// Set extent, resolution and projection from a grid.
    pub fn set_grid(&mut self, grid: &Grid) {
        self.extent = Some(*grid.extent());
        self.resolution = Some(*grid.resolution());
        self.projection = Some(*grid.projection());
    }

    /// Process the whole grid as one block.
    pub fn set_block_full_size(&mut self) {
        self.block_size = BlockSize::Full;
    }

    /// Whether blocks are computed on worker threads.
    pub fn multiprocessing(&self) -> bool {
        self.num_workers.is_some()
    }

    /// Whether outputs are written by writer threads.
    pub fn multiwriting(&self) -> bool {
        self.multiprocessing() || self.num_writers.is_some()
    }

    /// Number of writer threads to start (0 for the inline sink).
    pub fn writer_count(&self) -> usize {
        if self.multiwriting() {
            self.num_writers.unwrap_or(1).max(1)
        } else {
            0
        }
    }

    /// Report progress to the callback, if any.
    pub fn report_progress(&self, percent: f64) {
        if let Some(progress) = &self.progress {
            progress.call(percent);
        }
    }
}

/// Validated check used by the orchestrator.
pub(crate) fn checked(config: &ApplierConfig) -> Result<()> {
    config.validate().map_err(ApplierError::Config)
}

// ============================================================================
// Block size
// ============================================================================

/// Target size of the processed blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BlockSize {
    /// The full grid as a single block.
    Full,
    /// Blocks of at most `x` by `y` pixels.
    Size { x: usize, y: usize },
}

impl Default for BlockSize {
    fn default() -> Self {
        BlockSize::Size { x: 256, y: 256 }
    }
}

impl BlockSize {
    /// Blocks of `x` by `y` pixels.
    pub fn new(x: usize, y: usize) -> Result<Self> {
        RasterSize::new(x, y)?;
        Ok(BlockSize::Size { x, y })
    }

    /// Concrete block size for a grid, clamped to the grid size.
    pub fn resolve(&self, grid: &Grid) -> Result<RasterSize> {
        match *self {
            BlockSize::Full => Ok(grid.size()),
            BlockSize::Size { x, y } => Ok(RasterSize::new(x, y)?.min(&grid.size())),
        }
    }
}

impl std::str::FromStr for BlockSize {
    type Err = String;

    /// Parse `full`, `256` or `256x128`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        if s == "full" {
            return Ok(BlockSize::Full);
        }
        let parse = |v: &str| {
            v.trim()
                .parse::<usize>()
                .map_err(|_| format!("invalid block size '{}'", s))
        };
        let (x, y) = match s.split_once('x') {
            Some((x, y)) => (parse(x)?, parse(y)?),
            None => {
                let n = parse(&s)?;
                (n, n)
            }
        };
        BlockSize::new(x, y).map_err(|e| e.to_string())
    }
}

impl TryFrom<String> for BlockSize {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BlockSize> for String {
    fn from(value: BlockSize) -> Self {
        value.to_string()
    }
}

impl fmt::Display for BlockSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockSize::Full => write!(f, "full"),
            BlockSize::Size { x, y } => write!(f, "{}x{}", x, y),
        }
    }
}

// ============================================================================
// Workers
// ============================================================================

/// Number of compute workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawWorkers", into = "String")]
pub enum NumWorkers {
    /// One worker per available CPU.
    Auto,
    /// A fixed number of workers.
    Count(usize),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawWorkers {
    Number(i64),
    Text(String),
}

impl NumWorkers {
    /// Parse `auto`, `-1` or a worker count.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" | "-1" => Some(Self::Auto),
            other => other.parse().ok().map(Self::Count),
        }
    }

    pub fn as_str(&self) -> String {
        match self {
            Self::Auto => "auto".to_string(),
            Self::Count(n) => n.to_string(),
        }
    }

    /// Number of worker threads to start.
    pub fn resolve(&self) -> usize {
        match self {
            Self::Auto => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            Self::Count(n) => (*n).max(1),
        }
    }
}

impl TryFrom<RawWorkers> for NumWorkers {
    type Error = String;

    fn try_from(value: RawWorkers) -> std::result::Result<Self, Self::Error> {
        let text = match value {
            RawWorkers::Number(n) => n.to_string(),
            RawWorkers::Text(s) => s,
        };
        NumWorkers::from_str(&text).ok_or_else(|| format!("invalid worker count '{}'", text))
    }
}

impl From<NumWorkers> for String {
    fn from(value: NumWorkers) -> Self {
        value.as_str()
    }
}

impl fmt::Display for NumWorkers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Grid derivation policies
// ============================================================================

/// How the extents of the input rasters are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtentPolicy {
    Union,
    #[default]
    Intersection,
}

impl ExtentPolicy {
    /// Parse from string (case-insensitive).
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "union" => Some(Self::Union),
            "intersection" => Some(Self::Intersection),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Union => "union",
            Self::Intersection => "intersection",
        }
    }
}

impl fmt::Display for ExtentPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the resolutions of the input rasters are combined, per axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionPolicy {
    #[default]
    #[serde(alias = "min")]
    Minimum,
    #[serde(alias = "max")]
    Maximum,
    #[serde(alias = "mean")]
    Average,
}

impl ResolutionPolicy {
    /// Parse from string (case-insensitive).
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "min" | "minimum" => Some(Self::Minimum),
            "max" | "maximum" => Some(Self::Maximum),
            "average" | "mean" => Some(Self::Average),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimum => "minimum",
            Self::Maximum => "maximum",
            Self::Average => "average",
        }
    }

    /// Combine values of one axis.
    pub fn combine(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        Some(match self {
            Self::Minimum => values.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Maximum => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Self::Average => values.iter().sum::<f64>() / values.len() as f64,
        })
    }
}

impl fmt::Display for ResolutionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Progress
// ============================================================================

/// Callback receiving the run progress in percent, from any worker thread.
#[derive(Clone)]
pub struct ProgressCallback(Arc<dyn Fn(f64) + Send + Sync>);

impl ProgressCallback {
    pub fn new(f: impl Fn(f64) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn call(&self, percent: f64) {
        (self.0)(percent)
    }
}

impl fmt::Debug for ProgressCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProgressCallback")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ApplierConfig::default();
        assert_eq!(config.block_size, BlockSize::new(256, 256).unwrap());
        assert_eq!(config.num_workers, None);
        assert_eq!(config.num_writers, None);
        assert_eq!(config.extent_policy, ExtentPolicy::Intersection);
        assert_eq!(config.resolution_policy, ResolutionPolicy::Minimum);
        assert!(config.write_envi_header);
        assert!(!config.multiprocessing());
        assert_eq!(config.writer_count(), 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_writer_count() {
        let mut config = ApplierConfig::default();
        config.num_workers = Some(NumWorkers::Count(4));
        assert_eq!(config.writer_count(), 1);
        config.num_writers = Some(3);
        assert_eq!(config.writer_count(), 3);
        config.num_workers = None;
        assert!(config.multiwriting());
        assert_eq!(config.writer_count(), 3);
    }

    #[test]
    fn test_block_size_parse() {
        assert_eq!("256".parse::<BlockSize>().unwrap(), BlockSize::new(256, 256).unwrap());
        assert_eq!("256x128".parse::<BlockSize>().unwrap(), BlockSize::new(256, 128).unwrap());
        assert_eq!("FULL".parse::<BlockSize>().unwrap(), BlockSize::Full);
        assert!("0x10".parse::<BlockSize>().is_err());
        assert!("abc".parse::<BlockSize>().is_err());
        assert_eq!(BlockSize::new(64, 32).unwrap().to_string(), "64x32");
    }

    #[test]
    fn test_num_workers_parse() {
        assert_eq!(NumWorkers::from_str("auto"), Some(NumWorkers::Auto));
        assert_eq!(NumWorkers::from_str("-1"), Some(NumWorkers::Auto));
        assert_eq!(NumWorkers::from_str("4"), Some(NumWorkers::Count(4)));
        assert_eq!(NumWorkers::from_str("many"), None);
        assert!(NumWorkers::Auto.resolve() >= 1);
    }

    #[test]
    fn test_policies_parse() {
        assert_eq!(ExtentPolicy::from_str("UNION"), Some(ExtentPolicy::Union));
        assert_eq!(ResolutionPolicy::from_str("max"), Some(ResolutionPolicy::Maximum));
        assert_eq!(ResolutionPolicy::from_str("average"), Some(ResolutionPolicy::Average));
        assert_eq!(ResolutionPolicy::Minimum.to_string(), "minimum");
        assert_eq!(ResolutionPolicy::Average.combine(&[10.0, 30.0]), Some(20.0));
        assert_eq!(ResolutionPolicy::Maximum.combine(&[]), None);
    }

    #[test]
    fn test_validate_rejects_zero_counts() {
        let mut config = ApplierConfig::default();
        config.block_size = BlockSize::Size { x: 0, y: 16 };
        assert!(config.validate().is_err());
        config.block_size = BlockSize::Full;
        config.num_workers = Some(NumWorkers::Count(0));
        assert!(config.validate().is_err());
        config.num_workers = None;
        config.num_writers = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let yaml = "block_size: 128x64\nnum_workers: 4\nresolution_policy: max\nwrite_envi_header: false\n";
        let config: ApplierConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.block_size, BlockSize::new(128, 64).unwrap());
        assert_eq!(config.num_workers, Some(NumWorkers::Count(4)));
        assert_eq!(config.resolution_policy, ResolutionPolicy::Maximum);
        assert!(!config.write_envi_header);
        assert_eq!(config.extent_policy, ExtentPolicy::Intersection);

        let text = serde_yaml::to_string(&config).unwrap();
        let back: ApplierConfig = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back.block_size, config.block_size);
        assert_eq!(back.num_workers, config.num_workers);

        let auto: ApplierConfig = serde_yaml::from_str("num_workers: auto\n").unwrap();
        assert_eq!(auto.num_workers, Some(NumWorkers::Auto));
    }

    #[test]
    fn test_progress_callback() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut config = ApplierConfig::default();
        config.progress = Some(ProgressCallback::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        config.report_progress(50.0);
        config.report_progress(100.0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
