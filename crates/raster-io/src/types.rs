//! Raster data model: element types and band-sequential arrays.

use crate::error::{RasterIoError, Result};
use ndarray::{s, Array2, Array3, ArrayView2, Axis};
use num_traits::{Bounded, NumCast};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pixel data type of a raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl DataType {
    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            DataType::U8 => 1,
            DataType::I16 | DataType::U16 => 2,
            DataType::I32 | DataType::U32 | DataType::F32 => 4,
            DataType::F64 => 8,
        }
    }

    /// ENVI `data type` header code.
    pub fn envi_code(&self) -> u32 {
        match self {
            DataType::U8 => 1,
            DataType::I16 => 2,
            DataType::I32 => 3,
            DataType::F32 => 4,
            DataType::F64 => 5,
            DataType::U16 => 12,
            DataType::U32 => 13,
        }
    }

    /// Data type for an ENVI `data type` header code.
    pub fn from_envi_code(code: u32) -> Result<Self> {
        match code {
            1 => Ok(DataType::U8),
            2 => Ok(DataType::I16),
            3 => Ok(DataType::I32),
            4 => Ok(DataType::F32),
            5 => Ok(DataType::F64),
            12 => Ok(DataType::U16),
            13 => Ok(DataType::U32),
            _ => Err(RasterIoError::invalid_header(format!(
                "unsupported ENVI data type {}",
                code
            ))),
        }
    }

    /// TIFF SampleFormat (1 = unsigned, 2 = signed, 3 = float).
    pub fn tiff_sample_format(&self) -> u16 {
        match self {
            DataType::U8 | DataType::U16 | DataType::U32 => 1,
            DataType::I16 | DataType::I32 => 2,
            DataType::F32 | DataType::F64 => 3,
        }
    }

    /// Data type for a TIFF SampleFormat and BitsPerSample pair.
    pub fn from_tiff(sample_format: u16, bits: u16) -> Option<Self> {
        match (sample_format, bits) {
            (1, 8) => Some(DataType::U8),
            (1, 16) => Some(DataType::U16),
            (1, 32) => Some(DataType::U32),
            (2, 16) => Some(DataType::I16),
            (2, 32) => Some(DataType::I32),
            (3, 32) => Some(DataType::F32),
            (3, 64) => Some(DataType::F64),
            _ => None,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DataType::F32 | DataType::F64)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::U8 => "uint8",
            DataType::I16 => "int16",
            DataType::U16 => "uint16",
            DataType::I32 => "int32",
            DataType::U32 => "uint32",
            DataType::F32 => "float32",
            DataType::F64 => "float64",
        }
    }

    /// Parse from a type name such as "float32" or "u8".
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "uint8" | "u8" | "byte" => Some(DataType::U8),
            "int16" | "i16" => Some(DataType::I16),
            "uint16" | "u16" => Some(DataType::U16),
            "int32" | "i32" => Some(DataType::I32),
            "uint32" | "u32" => Some(DataType::U32),
            "float32" | "f32" => Some(DataType::F32),
            "float64" | "f64" => Some(DataType::F64),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Element types that can be stored in a raster band.
pub trait RasterElement:
    Copy + Default + PartialEq + PartialOrd + NumCast + Bounded + bytemuck::Pod + Send + Sync + fmt::Debug + 'static
{
    const DATA_TYPE: DataType;

    fn wrap(array: Array3<Self>) -> RasterArray;

    fn unwrap_ref(array: &RasterArray) -> Option<&Array3<Self>>;
}

macro_rules! raster_element {
    ($t:ty, $variant:ident) => {
        impl RasterElement for $t {
            const DATA_TYPE: DataType = DataType::$variant;

            fn wrap(array: Array3<Self>) -> RasterArray {
                RasterArray::$variant(array)
            }

            fn unwrap_ref(array: &RasterArray) -> Option<&Array3<Self>> {
                match array {
                    RasterArray::$variant(a) => Some(a),
                    _ => None,
                }
            }
        }
    };
}

raster_element!(u8, U8);
raster_element!(i16, I16);
raster_element!(u16, U16);
raster_element!(i32, I32);
raster_element!(u32, U32);
raster_element!(f32, F32);
raster_element!(f64, F64);

/// A multi-band raster array of shape `(bands, rows, cols)`.
#[derive(Debug, Clone, PartialEq)]
pub enum RasterArray {
    U8(Array3<u8>),
    I16(Array3<i16>),
    U16(Array3<u16>),
    I32(Array3<i32>),
    U32(Array3<u32>),
    F32(Array3<f32>),
    F64(Array3<f64>),
}

/// Apply an expression to the inner array of any variant.
macro_rules! dispatch {
    ($value:expr, $a:ident => $body:expr) => {
        match $value {
            RasterArray::U8($a) => $body,
            RasterArray::I16($a) => $body,
            RasterArray::U16($a) => $body,
            RasterArray::I32($a) => $body,
            RasterArray::U32($a) => $body,
            RasterArray::F32($a) => $body,
            RasterArray::F64($a) => $body,
        }
    };
}

/// Apply an array-to-array expression, keeping the variant.
macro_rules! map_variant {
    ($value:expr, $a:ident => $body:expr) => {
        match $value {
            RasterArray::U8($a) => RasterArray::U8($body),
            RasterArray::I16($a) => RasterArray::I16($body),
            RasterArray::U16($a) => RasterArray::U16($body),
            RasterArray::I32($a) => RasterArray::I32($body),
            RasterArray::U32($a) => RasterArray::U32($body),
            RasterArray::F32($a) => RasterArray::F32($body),
            RasterArray::F64($a) => RasterArray::F64($body),
        }
    };
}

/// Run a generic function for the element type of a `DataType`.
macro_rules! with_type {
    ($dt:expr, $t:ident => $body:expr) => {
        match $dt {
            DataType::U8 => {
                type $t = u8;
                $body
            }
            DataType::I16 => {
                type $t = i16;
                $body
            }
            DataType::U16 => {
                type $t = u16;
                $body
            }
            DataType::I32 => {
                type $t = i32;
                $body
            }
            DataType::U32 => {
                type $t = u32;
                $body
            }
            DataType::F32 => {
                type $t = f32;
                $body
            }
            DataType::F64 => {
                type $t = f64;
                $body
            }
        }
    };
}

pub(crate) use with_type;

/// Cast a value to an element type.
///
/// Fractions are truncated toward zero and values outside the range of `T`
/// saturate at its bounds. NaN becomes 0 for integer types.
pub fn cast_value<T: RasterElement>(value: f64) -> T {
    num_traits::cast(value).unwrap_or_else(|| {
        if value.is_nan() {
            T::default()
        } else if value > 0.0 {
            T::max_value()
        } else {
            T::min_value()
        }
    })
}

impl RasterArray {
    /// Wrap a typed array.
    pub fn from_array<T: RasterElement>(array: Array3<T>) -> Self {
        T::wrap(array)
    }

    /// Wrap a single band.
    pub fn from_band<T: RasterElement>(band: Array2<T>) -> Self {
        T::wrap(band.insert_axis(Axis(0)))
    }

    /// Store a boolean mask as `U8` (0/1).
    pub fn from_bool(mask: Array3<bool>) -> Self {
        RasterArray::U8(mask.mapv(<u8 as From<bool>>::from))
    }

    /// Array of a data type filled with a value.
    pub fn filled(data_type: DataType, shape: (usize, usize, usize), value: f64) -> Self {
        with_type!(data_type, T => T::wrap(Array3::from_elem(shape, cast_value::<T>(value))))
    }

    /// Array of zeros.
    pub fn zeros(data_type: DataType, shape: (usize, usize, usize)) -> Self {
        Self::filled(data_type, shape, 0.0)
    }

    pub fn data_type(&self) -> DataType {
        match self {
            RasterArray::U8(_) => DataType::U8,
            RasterArray::I16(_) => DataType::I16,
            RasterArray::U16(_) => DataType::U16,
            RasterArray::I32(_) => DataType::I32,
            RasterArray::U32(_) => DataType::U32,
            RasterArray::F32(_) => DataType::F32,
            RasterArray::F64(_) => DataType::F64,
        }
    }

    /// Shape as `(bands, rows, cols)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        dispatch!(self, a => a.dim())
    }

    pub fn bands(&self) -> usize {
        self.shape().0
    }

    pub fn rows(&self) -> usize {
        self.shape().1
    }

    pub fn cols(&self) -> usize {
        self.shape().2
    }

    /// Borrow the typed array if the element type matches.
    pub fn as_array<T: RasterElement>(&self) -> Option<&Array3<T>> {
        T::unwrap_ref(self)
    }

    /// Convert to another element type.
    ///
    /// Conversion follows [`cast_value`]: out-of-range values saturate.
    pub fn cast<T: RasterElement>(&self) -> Array3<T> {
        if let Some(a) = T::unwrap_ref(self) {
            return a.clone();
        }
        dispatch!(self, a => a.mapv(|v| cast_value::<T>(v as f64)))
    }

    /// Convert to another data type, keeping a `RasterArray`.
    pub fn cast_to(&self, data_type: DataType) -> RasterArray {
        if self.data_type() == data_type {
            return self.clone();
        }
        with_type!(data_type, T => T::wrap(self.cast::<T>()))
    }

    /// Values as `f64`.
    pub fn to_f64(&self) -> Array3<f64> {
        self.cast::<f64>()
    }

    /// A single band as a one-band array.
    pub fn band(&self, index: usize) -> Result<RasterArray> {
        let bands = self.bands();
        if index >= bands {
            return Err(RasterIoError::out_of_range(format!(
                "band {} of array with {} bands",
                index, bands
            )));
        }
        Ok(map_variant!(self, a => a.slice(s![index..index + 1, .., ..]).to_owned()))
    }

    /// Strip `overlap` pixels from every side.
    pub fn slice_margin(&self, overlap: usize) -> Result<RasterArray> {
        if overlap == 0 {
            return Ok(self.clone());
        }
        let (_, rows, cols) = self.shape();
        if 2 * overlap >= rows || 2 * overlap >= cols {
            return Err(RasterIoError::invalid_data(format!(
                "overlap {} leaves nothing of a {}x{} array",
                overlap, cols, rows
            )));
        }
        Ok(map_variant!(
            self,
            a => a
                .slice(s![.., overlap..rows - overlap, overlap..cols - overlap])
                .to_owned()
        ))
    }

    /// Stack arrays along the band axis, casting to the first array's type.
    pub fn stack(arrays: &[RasterArray]) -> Result<RasterArray> {
        let first = arrays
            .first()
            .ok_or_else(|| RasterIoError::invalid_data("nothing to stack"))?;
        let (_, rows, cols) = first.shape();
        if let Some(bad) = arrays.iter().find(|a| a.rows() != rows || a.cols() != cols) {
            return Err(RasterIoError::invalid_data(format!(
                "cannot stack {}x{} with {}x{}",
                bad.cols(),
                bad.rows(),
                cols,
                rows
            )));
        }
        with_type!(first.data_type(), T => {
            let parts: Vec<Array3<T>> = arrays.iter().map(|a| a.cast::<T>()).collect();
            let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
            let stacked = ndarray::concatenate(Axis(0), &views)
                .map_err(|e| RasterIoError::invalid_data(e.to_string()))?;
            Ok(T::wrap(stacked))
        })
    }

    /// Native-endian bytes of one band, row-major.
    pub fn band_bytes(&self, band: usize) -> Result<Vec<u8>> {
        if band >= self.bands() {
            return Err(RasterIoError::out_of_range(format!(
                "band {} of array with {} bands",
                band,
                self.bands()
            )));
        }
        Ok(dispatch!(self, a => view_to_bytes(a.index_axis(Axis(0), band))))
    }

    /// Build an array from per-band native-endian bytes.
    pub fn from_band_bytes(
        data_type: DataType,
        bands: &[Vec<u8>],
        rows: usize,
        cols: usize,
    ) -> Result<RasterArray> {
        with_type!(data_type, T => {
            let mut array = Array3::<T>::zeros((bands.len(), rows, cols));
            for (i, bytes) in bands.iter().enumerate() {
                let band = bytes_to_band::<T>(bytes, rows, cols)?;
                array.index_axis_mut(Axis(0), i).assign(&band);
            }
            Ok(T::wrap(array))
        })
    }
}

fn view_to_bytes<T: RasterElement>(view: ArrayView2<T>) -> Vec<u8> {
    let values: Vec<T> = view.iter().copied().collect();
    bytemuck::cast_slice(&values).to_vec()
}

fn bytes_to_band<T: RasterElement>(bytes: &[u8], rows: usize, cols: usize) -> Result<Array2<T>> {
    let mut values = vec![T::zeroed(); rows * cols];
    let target: &mut [u8] = bytemuck::cast_slice_mut(&mut values);
    if target.len() != bytes.len() {
        return Err(RasterIoError::invalid_data(format!(
            "expected {} bytes for a {}x{} {} band, got {}",
            target.len(),
            cols,
            rows,
            T::DATA_TYPE,
            bytes.len()
        )));
    }
    target.copy_from_slice(bytes);
    Array2::from_shape_vec((rows, cols), values)
        .map_err(|e| RasterIoError::invalid_data(e.to_string()))
}
