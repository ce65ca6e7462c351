//! Inputs and outputs registered with an applier, and their groups.
//!
//! Items are addressed by slash-separated keys such as `"landsat/2020/b1"`.
//! Every path segment but the last names a nested group.

use crate::error::{ApplierError, Result};
use raster_io::{RasterDriver, ResampleAlg};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// An input raster, opened by path inside every worker.
#[derive(Debug, Clone, PartialEq)]
pub struct InputRaster {
    pub path: PathBuf,
    /// Overrides the raster's own no-data value when reading.
    pub no_data: Option<f64>,
    /// Resampling used when the raster is not aligned with the output grid.
    pub resample: ResampleAlg,
}

impl InputRaster {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            no_data: None,
            resample: ResampleAlg::default(),
        }
    }

    pub fn with_no_data(mut self, value: f64) -> Self {
        self.no_data = Some(value);
        self
    }

    pub fn with_resample(mut self, resample: ResampleAlg) -> Self {
        self.resample = resample;
        self
    }
}

/// An input vector layer, opened by path inside every worker.
#[derive(Debug, Clone, PartialEq)]
pub struct InputVector {
    pub path: PathBuf,
}

impl InputVector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// An output raster, created by its writer on the first block written.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRaster {
    pub path: PathBuf,
    pub driver: RasterDriver,
}

impl OutputRaster {
    /// Output with the driver chosen from the file name.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let driver = RasterDriver::from_filename(&path)?;
        Ok(Self { path, driver })
    }

    /// Output with an explicit driver.
    pub fn with_driver(path: impl Into<PathBuf>, driver: RasterDriver) -> Self {
        Self {
            path: path.into(),
            driver,
        }
    }

    /// In-memory output, handed back with the run result.
    pub fn memory() -> Self {
        Self::with_driver(PathBuf::new(), RasterDriver::Mem)
    }

    pub fn is_memory(&self) -> bool {
        self.driver.is_memory()
    }

    /// Files written for this output, as absolute paths.
    fn files(&self) -> Vec<PathBuf> {
        let data = absolute(&self.path);
        match self.driver {
            RasterDriver::Envi(_) => vec![raster_io::envi::header_path(&data), data],
            RasterDriver::GTiff(_) | RasterDriver::Mem => vec![data],
        }
    }
}

/// `path` made absolute, with existing parent directories resolved.
fn absolute(path: &Path) -> PathBuf {
    let joined = match std::env::current_dir() {
        Ok(dir) if path.is_relative() => dir.join(path),
        _ => path.to_path_buf(),
    };
    match (joined.parent(), joined.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map(|parent| parent.join(name))
            .unwrap_or(joined),
        _ => joined,
    }
}

/// An entry of a group: an item or a nested group.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupEntry<T> {
    Item(T),
    Group(IoGroup<T>),
}

/// A tree of items addressed by slash-separated keys.
#[derive(Debug, Clone, PartialEq)]
pub struct IoGroup<T> {
    entries: BTreeMap<String, GroupEntry<T>>,
}

impl<T> Default for IoGroup<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

pub type InputRasterGroup = IoGroup<InputRaster>;
pub type InputVectorGroup = IoGroup<InputVector>;
pub type OutputRasterGroup = IoGroup<OutputRaster>;

fn split_key(key: &str) -> Result<(Vec<&str>, &str)> {
    let parts: Vec<&str> = key.split('/').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(ApplierError::contract(format!("invalid key '{}'", key)));
    }
    let (last, groups) = parts
        .split_last()
        .ok_or_else(|| ApplierError::contract("empty key"))?;
    Ok((groups.to_vec(), last))
}

impl<T> IoGroup<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert an item, creating intermediate groups.
    pub fn set(&mut self, key: &str, value: T) -> Result<()> {
        let (groups, last) = split_key(key)?;
        let mut group = self;
        for name in groups {
            group = group.child_mut(name, key)?;
        }
        group.entries.insert(last.to_string(), GroupEntry::Item(value));
        Ok(())
    }

    /// Insert a nested group, creating intermediate groups.
    pub fn set_group(&mut self, key: &str, value: IoGroup<T>) -> Result<()> {
        let (groups, last) = split_key(key)?;
        let mut group = self;
        for name in groups {
            group = group.child_mut(name, key)?;
        }
        group.entries.insert(last.to_string(), GroupEntry::Group(value));
        Ok(())
    }

    fn child_mut(&mut self, name: &str, key: &str) -> Result<&mut IoGroup<T>> {
        let entry = self
            .entries
            .entry(name.to_string())
            .or_insert_with(|| GroupEntry::Group(IoGroup::new()));
        match entry {
            GroupEntry::Group(group) => Ok(group),
            GroupEntry::Item(_) => Err(ApplierError::contract(format!(
                "'{}' in key '{}' is an item, not a group",
                name, key
            ))),
        }
    }

    fn entry(&self, key: &str) -> Option<&GroupEntry<T>> {
        let (groups, last) = split_key(key).ok()?;
        let mut group = self;
        for name in groups {
            match group.entries.get(name)? {
                GroupEntry::Group(g) => group = g,
                GroupEntry::Item(_) => return None,
            }
        }
        group.entries.get(last)
    }

    /// The item at `key`.
    pub fn get(&self, key: &str) -> Option<&T> {
        match self.entry(key)? {
            GroupEntry::Item(item) => Some(item),
            GroupEntry::Group(_) => None,
        }
    }

    /// The item at `key`, or an error naming the key.
    pub fn item(&self, key: &str) -> Result<&T> {
        self.get(key)
            .ok_or_else(|| ApplierError::contract(format!("no item registered as '{}'", key)))
    }

    /// The nested group at `key`.
    pub fn group(&self, key: &str) -> Option<&IoGroup<T>> {
        match self.entry(key)? {
            GroupEntry::Group(group) => Some(group),
            GroupEntry::Item(_) => None,
        }
    }

    /// Direct items of this group with their keys.
    pub fn items(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().filter_map(|(k, e)| match e {
            GroupEntry::Item(item) => Some((k.as_str(), item)),
            GroupEntry::Group(_) => None,
        })
    }

    /// Direct subgroups of this group with their keys.
    pub fn groups(&self) -> impl Iterator<Item = (&str, &IoGroup<T>)> {
        self.entries.iter().filter_map(|(k, e)| match e {
            GroupEntry::Group(group) => Some((k.as_str(), group)),
            GroupEntry::Item(_) => None,
        })
    }

    /// All items of the tree with their full keys, depth first in key order.
    pub fn flat(&self) -> Vec<(String, &T)> {
        let mut out = Vec::new();
        self.collect_flat("", &mut out);
        out
    }

    fn collect_flat<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a T)>) {
        for (name, entry) in &self.entries {
            let key = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", prefix, name)
            };
            match entry {
                GroupEntry::Item(item) => out.push((key, item)),
                GroupEntry::Group(group) => group.collect_flat(&key, out),
            }
        }
    }

    pub fn flat_keys(&self) -> Vec<String> {
        self.flat().into_iter().map(|(k, _)| k).collect()
    }

    pub fn flat_values(&self) -> Vec<&T> {
        self.flat().into_iter().map(|(_, v)| v).collect()
    }

    /// First key whose item passes `predicate`.
    pub fn find_key(&self, predicate: impl Fn(&str, &T) -> bool) -> Option<String> {
        self.flat()
            .into_iter()
            .find(|(k, v)| predicate(k, v))
            .map(|(k, _)| k)
    }
}

impl IoGroup<InputRaster> {
    /// All rasters below `folder` whose extension is in `extensions`.
    ///
    /// Extensions are matched case-insensitively and include the dot
    /// (`".bsq"`); `""` matches files without extension. The optional
    /// `filter(dirname, basename, extension)` can reject files. Keys mirror
    /// the folder structure below `folder`, using basenames without
    /// extension.
    pub fn from_folder(
        folder: impl AsRef<Path>,
        extensions: &[&str],
        filter: Option<&dyn Fn(&Path, &str, &str) -> bool>,
    ) -> Result<Self> {
        let folder = folder.as_ref();
        let mut group = Self::new();
        for entry in WalkDir::new(folder).sort_by_file_name() {
            let entry = entry.map_err(|e| ApplierError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let basename = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            let extension = path
                .extension()
                .and_then(|s| s.to_str())
                .map(|e| format!(".{}", e))
                .unwrap_or_default();
            if !extensions.iter().any(|e| e.eq_ignore_ascii_case(&extension)) {
                continue;
            }
            let dirname = path.parent().unwrap_or(folder);
            if let Some(filter) = filter {
                if !filter(dirname, &basename, &extension) {
                    continue;
                }
            }
            let relative = dirname.strip_prefix(folder).unwrap_or(Path::new(""));
            let mut key: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            key.push(basename);
            group.set(&key.join("/"), InputRaster::new(path))?;
        }
        Ok(group)
    }
}

impl IoGroup<OutputRaster> {
    /// Fail if two outputs would write the same file.
    ///
    /// ENVI outputs also claim their `.hdr`, so `out.bsq` and `out.bil`
    /// collide as well.
    pub fn check_distinct_files(&self) -> Result<()> {
        let mut owners: BTreeMap<PathBuf, String> = BTreeMap::new();
        for (key, output) in self.flat() {
            if output.is_memory() {
                continue;
            }
            for file in output.files() {
                if let Some(owner) = owners.get(&file).filter(|owner| **owner != key) {
                    return Err(ApplierError::config(format!(
                        "outputs '{}' and '{}' both write {}",
                        owner,
                        key,
                        file.display()
                    )));
                }
                owners.insert(file, key.clone());
            }
        }
        Ok(())
    }
}

/// Pin each output key to the writer with the fewest outputs so far.
///
/// Ties go to the lowest writer index.
pub fn assign_writers(keys: &[String], writers: usize) -> BTreeMap<String, usize> {
    let mut load = vec![0usize; writers.max(1)];
    let mut routes = BTreeMap::new();
    for key in keys {
        let (index, _) = load
            .iter()
            .enumerate()
            .min_by_key(|(i, n)| (**n, *i))
            .unwrap_or((0, &0));
        load[index] += 1;
        routes.insert(key.clone(), index);
    }
    routes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_keys() {
        let mut group = InputRasterGroup::new();
        group.set("landsat/2020/b1", InputRaster::new("a.bsq")).unwrap();
        group.set("landsat/2020/b2", InputRaster::new("b.bsq")).unwrap();
        group.set("dem", InputRaster::new("dem.bsq")).unwrap();

        assert_eq!(group.get("landsat/2020/b2").unwrap().path, PathBuf::from("b.bsq"));
        assert!(group.get("landsat/2020").is_none());
        assert!(group.group("landsat/2020").is_some());
        assert_eq!(
            group.flat_keys(),
            vec!["dem", "landsat/2020/b1", "landsat/2020/b2"]
        );
        assert_eq!(group.items().count(), 1);
        assert_eq!(group.groups().count(), 1);
    }

    #[test]
    fn test_invalid_keys() {
        let mut group = InputVectorGroup::new();
        assert!(group.set("", InputVector::new("a.geojson")).is_err());
        assert!(group.set("a//b", InputVector::new("a.geojson")).is_err());
        group.set("a", InputVector::new("a.geojson")).unwrap();
        assert!(group.set("a/b", InputVector::new("b.geojson")).is_err());
        assert!(group.item("missing").is_err());
    }

    #[test]
    fn test_find_key() {
        let mut group = InputRasterGroup::new();
        group.set("x/y", InputRaster::new("one.tif")).unwrap();
        group.set("x/z", InputRaster::new("two.tif")).unwrap();
        let key = group.find_key(|_, r| r.path.ends_with("two.tif"));
        assert_eq!(key.as_deref(), Some("x/z"));
    }

    #[test]
    fn test_assign_writers_balances() {
        let keys: Vec<String> = ["a", "b", "c", "d", "e"].iter().map(|s| s.to_string()).collect();
        let routes = assign_writers(&keys, 2);
        assert_eq!(routes["a"], 0);
        assert_eq!(routes["b"], 1);
        assert_eq!(routes["c"], 0);
        assert_eq!(routes["d"], 1);
        assert_eq!(routes["e"], 0);
    }

    #[test]
    fn test_output_driver_from_name() {
        let out = OutputRaster::new("out/ndvi.tif").unwrap();
        assert_eq!(out.driver.name(), "GTiff");
        assert!(OutputRaster::memory().is_memory());
        assert!(OutputRaster::new("out/x.vrt").is_err());
    }

    #[test]
    fn test_outputs_sharing_a_file_are_rejected() {
        let mut outputs = OutputRasterGroup::new();
        outputs.set("a", OutputRaster::new("out/same.bsq").unwrap()).unwrap();
        outputs.set("mem/a", OutputRaster::memory()).unwrap();
        outputs.set("mem/b", OutputRaster::memory()).unwrap();
        outputs.set("tif", OutputRaster::new("out/same.tif").unwrap()).unwrap();
        outputs.check_distinct_files().unwrap();

        let mut same_path = outputs.clone();
        same_path.set("b", OutputRaster::new("out/./same.bsq").unwrap()).unwrap();
        assert!(matches!(same_path.check_distinct_files(), Err(ApplierError::Config(_))));

        let mut same_header = outputs.clone();
        same_header.set("bil", OutputRaster::new("out/same.bil").unwrap()).unwrap();
        assert!(matches!(same_header.check_distinct_files(), Err(ApplierError::Config(_))));
    }
}
