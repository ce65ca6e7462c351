//! Raster drivers and their typed creation options.

use crate::error::{RasterIoError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// ENVI band interleave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interleave {
    /// Band sequential
    #[default]
    Bsq,
    /// Band interleaved by line
    Bil,
    /// Band interleaved by pixel
    Bip,
}

impl Interleave {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interleave::Bsq => "bsq",
            Interleave::Bil => "bil",
            Interleave::Bip => "bip",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "bsq" => Some(Interleave::Bsq),
            "bil" => Some(Interleave::Bil),
            "bip" => Some(Interleave::Bip),
            _ => None,
        }
    }
}

/// Creation options of the ENVI driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnviOptions {
    pub interleave: Interleave,
}

/// GeoTIFF compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TiffCompression {
    #[default]
    None,
    Deflate,
}

impl TiffCompression {
    /// TIFF Compression tag value.
    pub fn tag(&self) -> u16 {
        match self {
            TiffCompression::None => 1,
            TiffCompression::Deflate => 8,
        }
    }
}

/// Creation options of the GeoTIFF driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GTiffOptions {
    pub compression: TiffCompression,
}

/// A raster format with validated creation options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "driver", rename_all = "lowercase")]
pub enum RasterDriver {
    Envi(EnviOptions),
    GTiff(GTiffOptions),
    Mem,
}

impl Default for RasterDriver {
    fn default() -> Self {
        RasterDriver::Envi(EnviOptions::default())
    }
}

impl RasterDriver {
    /// Select a driver from a file name.
    ///
    /// `.bsq`/`.sli`/`.esl` map to ENVI BSQ, `.bil` to ENVI BIL, `.bip` to
    /// ENVI BIP, `.tif`/`.tiff` to GeoTIFF and an empty name to MEM.
    /// `.img` and `.vrt` are rejected; any other extension is ENVI BSQ.
    pub fn from_filename(filename: &Path) -> Result<Self> {
        if filename.as_os_str().is_empty() {
            return Ok(RasterDriver::Mem);
        }
        let extension = filename
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        let envi = |interleave| RasterDriver::Envi(EnviOptions { interleave });
        match extension.as_str() {
            "bsq" | "sli" | "esl" => Ok(envi(Interleave::Bsq)),
            "bil" => Ok(envi(Interleave::Bil)),
            "bip" => Ok(envi(Interleave::Bip)),
            "tif" | "tiff" => Ok(RasterDriver::GTiff(GTiffOptions::default())),
            "img" | "vrt" => Err(RasterIoError::UnsupportedDriver(format!(
                "no driver writes .{} files ({})",
                extension,
                filename.display()
            ))),
            _ => Ok(envi(Interleave::Bsq)),
        }
    }

    /// Driver short name.
    pub fn name(&self) -> &'static str {
        match self {
            RasterDriver::Envi(_) => "ENVI",
            RasterDriver::GTiff(_) => "GTiff",
            RasterDriver::Mem => "MEM",
        }
    }

    /// Parse a driver short name with default options.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_uppercase().as_str() {
            "ENVI" => Ok(RasterDriver::Envi(EnviOptions::default())),
            "GTIFF" => Ok(RasterDriver::GTiff(GTiffOptions::default())),
            "MEM" => Ok(RasterDriver::Mem),
            _ => Err(RasterIoError::UnsupportedDriver(name.to_string())),
        }
    }

    /// Whether datasets of this driver live only in memory.
    pub fn is_memory(&self) -> bool {
        matches!(self, RasterDriver::Mem)
    }

    /// Create the parent directory of a file to be written.
    pub fn prepare_creation(&self, filename: &Path) -> Result<()> {
        if self.is_memory() {
            return Ok(());
        }
        if let Some(parent) = filename.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for RasterDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_from_filename() {
        let d = |s: &str| RasterDriver::from_filename(&PathBuf::from(s));
        assert_eq!(d("").unwrap(), RasterDriver::Mem);
        assert_eq!(
            d("out/a.bil").unwrap(),
            RasterDriver::Envi(EnviOptions { interleave: Interleave::Bil })
        );
        assert_eq!(d("a.BIP").unwrap().name(), "ENVI");
        assert_eq!(d("a.tif").unwrap().name(), "GTiff");
        assert_eq!(d("a.dat").unwrap(), RasterDriver::default());
        assert_eq!(d("noext").unwrap(), RasterDriver::default());
        assert!(matches!(d("a.img"), Err(RasterIoError::UnsupportedDriver(_))));
        assert!(matches!(d("a.vrt"), Err(RasterIoError::UnsupportedDriver(_))));
    }

    #[test]
    fn test_prepare_creation_makes_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x/y/z.bsq");
        RasterDriver::default().prepare_creation(&path).unwrap();
        assert!(dir.path().join("x/y").is_dir());
    }

    #[test]
    fn test_serde_tagged() {
        let json = serde_json::to_string(&RasterDriver::GTiff(GTiffOptions {
            compression: TiffCompression::Deflate,
        }))
        .unwrap();
        assert_eq!(json, r#"{"driver":"gtiff","compression":"deflate"}"#);
    }
}
