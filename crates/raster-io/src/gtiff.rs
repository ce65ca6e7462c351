//! GeoTIFF encoding and decoding.
//!
//! Files are written as a single pixel-interleaved strip with the usual
//! GeoTIFF tags (ModelPixelScale, ModelTiepoint, GeoKeyDirectory), the
//! GDAL no-data tag and the dataset metadata as JSON in ImageDescription.
//! Strips written this way (uncompressed or deflate) are decoded directly;
//! other layouts go through the `tiff` decoder.

use crate::driver::{GTiffOptions, TiffCompression};
use crate::error::{RasterIoError, Result};
use crate::metadata::RasterMetadata;
use crate::types::DataType;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use geo_common::{Grid, Projection, RasterSize, Resolution};
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;
const IMAGE_DESCRIPTION: u16 = 270;

const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GEOGRAPHIC_TYPE: u16 = 2048;
const PROJECTED_CS_TYPE: u16 = 3072;

/// Pixels and georeferencing decoded from a GeoTIFF.
#[derive(Debug, Clone)]
pub struct DecodedTiff {
    pub grid: Grid,
    pub data_type: DataType,
    /// One native-endian buffer per band.
    pub bands: Vec<Vec<u8>>,
    pub metadata: RasterMetadata,
}

fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

/// Write band buffers as a GeoTIFF.
pub fn encode(
    path: &Path,
    grid: &Grid,
    data_type: DataType,
    bands: &[Vec<u8>],
    metadata: &RasterMetadata,
    options: &GTiffOptions,
) -> Result<()> {
    let (rows, cols) = grid.shape();
    let band_count = bands.len();
    let element_size = data_type.size();

    // Pixel interleave
    let mut strip = vec![0u8; rows * cols * band_count * element_size];
    for (b, band) in bands.iter().enumerate() {
        for (i, value) in band.chunks_exact(element_size).enumerate() {
            let start = (i * band_count + b) * element_size;
            strip[start..start + element_size].copy_from_slice(value);
        }
    }
    if options.compression == TiffCompression::Deflate {
        let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&strip)?;
        strip = encoder.finish()?;
    }

    let writer = BufWriter::new(File::create(path)?);
    let mut encoder = TiffEncoder::new(writer)?;
    let mut dir = encoder.new_directory()?;

    let bits = vec![(element_size * 8) as u16; band_count];
    let sample_format = vec![data_type.tiff_sample_format(); band_count];

    dir.write_tag(Tag::ImageWidth, cols as u32)?;
    dir.write_tag(Tag::ImageLength, rows as u32)?;
    dir.write_tag(Tag::BitsPerSample, bits.as_slice())?;
    dir.write_tag(Tag::Compression, options.compression.tag())?;
    dir.write_tag(Tag::PhotometricInterpretation, 1u16)?;
    dir.write_tag(Tag::SamplesPerPixel, band_count as u16)?;
    dir.write_tag(Tag::SampleFormat, sample_format.as_slice())?;
    dir.write_tag(Tag::PlanarConfiguration, 1u16)?;
    dir.write_tag(Tag::RowsPerStrip, rows as u32)?;
    if band_count > 1 {
        let extra = vec![0u16; band_count - 1];
        dir.write_tag(Tag::ExtraSamples, extra.as_slice())?;
    }

    let resolution = grid.resolution();
    let extent = grid.extent();
    let scale = [resolution.x(), resolution.y(), 0.0];
    dir.write_tag(tag(MODEL_PIXEL_SCALE), scale.as_slice())?;
    let tiepoint = [0.0, 0.0, 0.0, extent.xmin(), extent.ymax(), 0.0];
    dir.write_tag(tag(MODEL_TIEPOINT), tiepoint.as_slice())?;
    let geokeys = geo_key_directory(grid.projection());
    dir.write_tag(tag(GEO_KEY_DIRECTORY), geokeys.as_slice())?;

    if let Some(no_data) = metadata.common_no_data() {
        dir.write_tag(tag(GDAL_NODATA), no_data.to_string().as_str())?;
    }
    let description = serde_json::to_string(metadata)?;
    dir.write_tag(tag(IMAGE_DESCRIPTION), description.as_str())?;

    let offset = dir.write_data(strip.as_slice())?;
    let offset = u32::try_from(offset)
        .map_err(|_| RasterIoError::Tiff("image exceeds 4 GiB".to_string()))?;
    dir.write_tag(Tag::StripOffsets, offset)?;
    dir.write_tag(Tag::StripByteCounts, strip.len() as u32)?;
    dir.finish()?;
    Ok(())
}

/// GeoKeyDirectory entries for a projection.
fn geo_key_directory(projection: &Projection) -> Vec<u16> {
    let epsg = projection.epsg() as u16;
    let (model, crs_key) = if projection.is_geographic() {
        (2, GEOGRAPHIC_TYPE)
    } else {
        (1, PROJECTED_CS_TYPE)
    };
    vec![
        1, 1, 0, 3, // version 1.1.0, three keys
        GT_MODEL_TYPE, 0, 1, model,
        GT_RASTER_TYPE, 0, 1, 1, // PixelIsArea
        crs_key, 0, 1, epsg,
    ]
}

/// Projection named by a GeoKeyDirectory.
fn projection_from_geokeys(keys: &[u16]) -> Result<Projection> {
    let mut projected = None;
    let mut geographic = None;
    for entry in keys.get(4..).unwrap_or_default().chunks_exact(4) {
        match (entry[0], entry[1]) {
            (PROJECTED_CS_TYPE, 0) => projected = Some(entry[3]),
            (GEOGRAPHIC_TYPE, 0) => geographic = Some(entry[3]),
            _ => {}
        }
    }
    let code = projected.or(geographic).ok_or_else(|| {
        RasterIoError::Tiff("GeoKeyDirectory names no EPSG code".to_string())
    })?;
    Ok(Projection::from_epsg(u32::from(code))?)
}

/// Read a GeoTIFF into band buffers.
pub fn decode(path: &Path) -> Result<DecodedTiff> {
    let mut decoder = Decoder::new(File::open(path)?)?;
    let (width, height) = decoder.dimensions()?;
    let (cols, rows) = (width as usize, height as usize);

    let samples = decoder.get_tag_u32(Tag::SamplesPerPixel).unwrap_or(1) as usize;
    let bits = decoder
        .get_tag_u16_vec(Tag::BitsPerSample)
        .ok()
        .and_then(|v| v.first().copied())
        .unwrap_or(8);
    let sample_format = decoder
        .get_tag_u16_vec(Tag::SampleFormat)
        .ok()
        .and_then(|v| v.first().copied())
        .unwrap_or(1);
    let data_type = DataType::from_tiff(sample_format, bits).ok_or_else(|| {
        RasterIoError::Tiff(format!(
            "unsupported sample format {} with {} bits",
            sample_format, bits
        ))
    })?;

    let scale = decoder.get_tag_f64_vec(tag(MODEL_PIXEL_SCALE))?;
    let tiepoint = decoder.get_tag_f64_vec(tag(MODEL_TIEPOINT))?;
    if scale.len() < 2 || tiepoint.len() < 6 {
        return Err(RasterIoError::Tiff("incomplete georeferencing tags".to_string()));
    }
    let projection = projection_from_geokeys(&decoder.get_tag_u16_vec(tag(GEO_KEY_DIRECTORY))?)?;
    let resolution = Resolution::new(scale[0], scale[1])?;
    let grid = Grid::from_upper_left(
        tiepoint[3] - tiepoint[0] * scale[0],
        tiepoint[4] + tiepoint[1] * scale[1],
        resolution,
        RasterSize::new(cols, rows)?,
        projection,
    )?;

    let mut metadata = decoder
        .get_tag_ascii_string(tag(IMAGE_DESCRIPTION))
        .ok()
        .and_then(|d| serde_json::from_str::<RasterMetadata>(&d).ok())
        .unwrap_or_default();
    metadata.resize_bands(samples);
    if let Some(no_data) = decoder
        .get_tag_ascii_string(tag(GDAL_NODATA))
        .ok()
        .and_then(|v| v.trim().trim_end_matches('\0').parse::<f64>().ok())
    {
        for band in metadata.bands.iter_mut().filter(|b| b.no_data.is_none()) {
            band.no_data = Some(no_data);
        }
    }

    let bands = match read_strips(&mut decoder, path, rows, cols, samples, data_type)? {
        Some(bands) => bands,
        None => read_with_decoder(&mut decoder, rows, cols, samples, data_type)?,
    };

    Ok(DecodedTiff {
        grid,
        data_type,
        bands,
        metadata,
    })
}

/// Decode strip-organised uncompressed or deflate data directly.
///
/// Returns `None` for layouts this reader does not handle.
fn read_strips(
    decoder: &mut Decoder<File>,
    path: &Path,
    rows: usize,
    cols: usize,
    samples: usize,
    data_type: DataType,
) -> Result<Option<Vec<Vec<u8>>>> {
    let compression = decoder.get_tag_u32(Tag::Compression).unwrap_or(1);
    let predictor = decoder.get_tag_u32(Tag::Predictor).unwrap_or(1);
    let planar = decoder.get_tag_u32(Tag::PlanarConfiguration).unwrap_or(1);
    let (offsets, counts) = match (
        decoder.get_tag_u64_vec(Tag::StripOffsets),
        decoder.get_tag_u64_vec(Tag::StripByteCounts),
    ) {
        (Ok(o), Ok(c)) if o.len() == c.len() => (o, c),
        _ => return Ok(None),
    };
    if !matches!(compression, 1 | 8) || predictor != 1 || !matches!(planar, 1 | 2) {
        return Ok(None);
    }

    let mut file = File::open(path)?;
    let mut magic = [0u8; 2];
    file.read_exact(&mut magic)?;
    let file_little_endian = &magic == b"II";

    let mut data = Vec::with_capacity(rows * cols * samples * data_type.size());
    for (&offset, &count) in offsets.iter().zip(&counts) {
        let mut raw = vec![0u8; count as usize];
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut raw)?;
        if compression == 8 {
            let mut inflated = Vec::new();
            ZlibDecoder::new(raw.as_slice()).read_to_end(&mut inflated)?;
            raw = inflated;
        }
        data.extend_from_slice(&raw);
    }

    let element_size = data_type.size();
    let band_bytes = rows * cols * element_size;
    if data.len() < band_bytes * samples {
        return Err(RasterIoError::Tiff(format!(
            "strips hold {} bytes, expected {}",
            data.len(),
            band_bytes * samples
        )));
    }
    if file_little_endian != cfg!(target_endian = "little") {
        crate::store::swap_bytes(&mut data, element_size);
    }

    let bands = if planar == 2 {
        data.chunks_exact(band_bytes)
            .take(samples)
            .map(|c| c.to_vec())
            .collect()
    } else {
        deinterleave(&data[..band_bytes * samples], samples, element_size)
    };
    Ok(Some(bands))
}

/// Fallback through the `tiff` decoder for tiled or otherwise compressed files.
fn read_with_decoder(
    decoder: &mut Decoder<File>,
    rows: usize,
    cols: usize,
    samples: usize,
    data_type: DataType,
) -> Result<Vec<Vec<u8>>> {
    let image = decoder.read_image()?;
    let data: Vec<u8> = match image {
        DecodingResult::U8(v) => v,
        DecodingResult::U16(v) => bytemuck::cast_slice(&v).to_vec(),
        DecodingResult::U32(v) => bytemuck::cast_slice(&v).to_vec(),
        DecodingResult::I16(v) => bytemuck::cast_slice(&v).to_vec(),
        DecodingResult::I32(v) => bytemuck::cast_slice(&v).to_vec(),
        DecodingResult::F32(v) => bytemuck::cast_slice(&v).to_vec(),
        DecodingResult::F64(v) => bytemuck::cast_slice(&v).to_vec(),
        _ => return Err(RasterIoError::Tiff("unsupported pixel format".to_string())),
    };
    let expected = rows * cols * samples * data_type.size();
    if data.len() != expected {
        return Err(RasterIoError::Tiff(format!(
            "decoded {} bytes, expected {}",
            data.len(),
            expected
        )));
    }
    Ok(deinterleave(&data, samples, data_type.size()))
}

/// Split pixel-interleaved data into one buffer per band.
fn deinterleave(data: &[u8], samples: usize, element_size: usize) -> Vec<Vec<u8>> {
    let mut bands = vec![Vec::with_capacity(data.len() / samples.max(1)); samples];
    for pixel in data.chunks_exact(samples * element_size) {
        for (b, value) in pixel.chunks_exact(element_size).enumerate() {
            bands[b].extend_from_slice(value);
        }
    }
    bands
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geokeys_roundtrip() {
        for p in [
            Projection::Wgs84,
            Projection::WebMercator,
            Projection::Utm { zone: 33, north: true },
            Projection::Utm { zone: 20, north: false },
        ] {
            assert_eq!(projection_from_geokeys(&geo_key_directory(&p)).unwrap(), p);
        }
        assert!(projection_from_geokeys(&[1, 1, 0, 0]).is_err());
    }

    #[test]
    fn test_deinterleave() {
        let data = [1u8, 10, 2, 20, 3, 30];
        assert_eq!(deinterleave(&data, 2, 1), vec![vec![1, 2, 3], vec![10, 20, 30]]);
    }
}
