//! Dataset and band metadata.
//!
//! Metadata is organised in domains like GDAL does: the default domain is
//! the empty string, the `ENVI` domain holds items that go straight into
//! an ENVI header.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Domain whose items are written into ENVI headers.
pub const ENVI_DOMAIN: &str = "ENVI";

/// Default metadata domain.
pub const DEFAULT_DOMAIN: &str = "";

/// Items of one metadata domain.
pub type MetadataDomain = BTreeMap<String, String>;

/// An RGB color of a category.
pub type Color = [u8; 3];

/// Metadata of one band.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BandMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_data: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub domains: BTreeMap<String, MetadataDomain>,
}

/// Metadata of a raster dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RasterMetadata {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub domains: BTreeMap<String, MetadataDomain>,
    #[serde(default)]
    pub bands: Vec<BandMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_names: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_colors: Option<Vec<Color>>,
}

impl RasterMetadata {
    /// Empty metadata for a number of bands.
    pub fn with_bands(bands: usize) -> Self {
        Self {
            bands: vec![BandMetadata::default(); bands],
            ..Default::default()
        }
    }

    /// Make sure there is an entry per band.
    pub fn resize_bands(&mut self, bands: usize) {
        self.bands.resize_with(bands, BandMetadata::default);
    }

    pub fn item(&self, key: &str, domain: &str) -> Option<&str> {
        self.domains
            .get(domain)
            .and_then(|d| d.get(key))
            .map(String::as_str)
    }

    pub fn set_item(&mut self, key: &str, value: impl Into<String>, domain: &str) {
        self.domains
            .entry(domain.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    pub fn domain(&self, domain: &str) -> Option<&MetadataDomain> {
        self.domains.get(domain)
    }

    /// No-data value per band.
    pub fn no_data_values(&self) -> Vec<Option<f64>> {
        self.bands.iter().map(|b| b.no_data).collect()
    }

    /// The no-data value shared by all bands, if they agree.
    pub fn common_no_data(&self) -> Option<f64> {
        let first = self.bands.first()?.no_data?;
        self.bands
            .iter()
            .all(|b| b.no_data.map(|v| same_value(v, first)).unwrap_or(false))
            .then_some(first)
    }

    /// Whether anything beyond ENVI-domain items, band descriptions,
    /// a common no-data value and categories is set.
    pub fn needs_sidecar(&self) -> bool {
        let non_envi_domain = self
            .domains
            .iter()
            .any(|(name, items)| name != ENVI_DOMAIN && !items.is_empty());
        let band_domains = self.bands.iter().any(|b| !b.domains.is_empty());
        let mixed_no_data =
            self.bands.iter().any(|b| b.no_data.is_some()) && self.common_no_data().is_none();
        non_envi_domain || band_domains || mixed_no_data
    }
}

fn same_value(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

/// Format a list as an ENVI header value: `{a, b, c}`.
pub fn format_list<T: ToString>(values: &[T]) -> String {
    let items: Vec<String> = values.iter().map(ToString::to_string).collect();
    format!("{{{}}}", items.join(", "))
}

/// Parse an ENVI header list value `{a, b, c}` into its items.
///
/// A value without braces is returned as a single item.
pub fn parse_list(value: &str) -> Vec<String> {
    let trimmed = value.trim();
    let inner = trimmed
        .strip_prefix('{')
        .and_then(|v| v.strip_suffix('}'))
        .unwrap_or(trimmed);
    if inner.trim().is_empty() {
        return Vec::new();
    }
    inner.split(',').map(|s| s.trim().to_string()).collect()
}
