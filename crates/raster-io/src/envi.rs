//! ENVI raw binary rasters and ENVI header files.
//!
//! An ENVI raster is a headerless binary file plus a text header:
//!
//! ```text
//! ENVI
//! samples = 1000
//! lines = 1000
//! bands = 6
//! data type = 4
//! interleave = bsq
//! byte order = 0
//! map info = {UTM, 1, 1, 400000, 5800000, 30, 30, 33, North, WGS-84}
//! band names = {blue, green, red, nir, swir1, swir2}
//! ```

use crate::error::{RasterIoError, Result};
use crate::driver::Interleave;
use crate::metadata::{format_list, parse_list, RasterMetadata, ENVI_DOMAIN};
use crate::store::{swap_bytes, PixelStore};
use crate::types::DataType;
use geo_common::{Grid, PixelOffset, Projection, RasterSize, Resolution};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Keys in the order they are written; other keys follow alphabetically.
const KEY_ORDER: &[&str] = &[
    "description",
    "samples",
    "lines",
    "bands",
    "header offset",
    "file type",
    "data type",
    "interleave",
    "data ignore value",
    "sensor type",
    "byte order",
    "map info",
    "projection info",
    "coordinate system string",
    "acquisition time",
    "wavelength units",
    "wavelength",
    "fwhm",
    "band names",
];

/// Keys derived from the dataset structure rather than from metadata items.
const STRUCTURAL_KEYS: &[&str] = &[
    "samples",
    "lines",
    "bands",
    "header offset",
    "file type",
    "data type",
    "interleave",
    "byte order",
    "map info",
    "coordinate system string",
    "band names",
    "data ignore value",
    "classes",
    "class names",
    "class lookup",
];

/// Byte order code of this machine (0 = little endian, 1 = big endian).
pub fn native_byte_order() -> u8 {
    if cfg!(target_endian = "big") {
        1
    } else {
        0
    }
}

/// Ordered `key = value` items of an ENVI header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnviHeader {
    items: Vec<(String, String)>,
}

impl EnviHeader {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set an item, replacing an existing value.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.items.iter_mut().find(|(k, _)| k == key) {
            Some(item) => item.1 = value,
            None => self.items.push((key.to_string(), value)),
        }
    }

    pub fn items(&self) -> impl Iterator<Item = (&str, &str)> {
        self.items.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parse header text. Braced values may span several lines.
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines();
        match lines.next().map(str::trim) {
            Some("ENVI") => {}
            _ => return Err(RasterIoError::invalid_header("missing ENVI signature")),
        }

        let mut header = EnviHeader::default();
        while let Some(line) = lines.next() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| RasterIoError::invalid_header(format!("bad line: {}", line)))?;
            let mut value = value.trim().to_string();
            if value.starts_with('{') {
                while !value.ends_with('}') {
                    let next = lines.next().ok_or_else(|| {
                        RasterIoError::invalid_header(format!("unterminated value for {}", key))
                    })?;
                    value.push(' ');
                    value.push_str(next.trim());
                }
            }
            header.set(&key.trim().to_lowercase(), value);
        }
        Ok(header)
    }

    pub fn read(path: &Path) -> Result<Self> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    /// Header text with known keys first, in ENVI order.
    pub fn to_text(&self) -> String {
        let mut text = String::from("ENVI\n");
        for key in KEY_ORDER {
            if let Some(value) = self.get(key) {
                text.push_str(&format!("{} = {}\n", key, value));
            }
        }
        let mut rest: Vec<&(String, String)> = self
            .items
            .iter()
            .filter(|(k, _)| !KEY_ORDER.contains(&k.as_str()))
            .collect();
        rest.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, value) in rest {
            text.push_str(&format!("{} = {}\n", key, value));
        }
        text
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_text())?;
        Ok(())
    }

    fn required_usize(&self, key: &str) -> Result<usize> {
        self.get(key)
            .ok_or_else(|| RasterIoError::invalid_header(format!("missing '{}'", key)))?
            .trim()
            .parse()
            .map_err(|_| RasterIoError::invalid_header(format!("'{}' is not an integer", key)))
    }
}

/// Everything needed to access an ENVI raster.
#[derive(Debug, Clone)]
pub struct EnviLayout {
    pub grid: Grid,
    pub bands: usize,
    pub data_type: DataType,
    pub interleave: Interleave,
    pub byte_order: u8,
    pub header_offset: u64,
}

/// Header path of an ENVI data file: the data file name with `.hdr`
/// appended if that exists, else with its extension replaced by `.hdr`.
pub fn find_header(data_path: &Path) -> Option<PathBuf> {
    [appended(data_path, ".hdr"), data_path.with_extension("hdr")]
        .into_iter()
        .find(|p| p.is_file())
}

/// Header path written next to a new ENVI data file.
pub fn header_path(data_path: &Path) -> PathBuf {
    data_path.with_extension("hdr")
}

/// `path` with a suffix appended to the full file name.
pub fn appended(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// Build a header describing a dataset.
pub fn build_header(
    grid: &Grid,
    bands: usize,
    data_type: DataType,
    interleave: Interleave,
    file_type: &str,
    metadata: &RasterMetadata,
) -> EnviHeader {
    let mut header = EnviHeader::default();

    if let Some(envi) = metadata.domain(ENVI_DOMAIN) {
        for (key, value) in envi {
            if !STRUCTURAL_KEYS.contains(&key.as_str()) {
                header.set(key, value.clone());
            }
        }
    }

    let size = grid.size();
    header.set("samples", size.x().to_string());
    header.set("lines", size.y().to_string());
    header.set("bands", bands.to_string());
    header.set("header offset", "0");
    header.set("file type", file_type);
    header.set("data type", data_type.envi_code().to_string());
    header.set("interleave", interleave.as_str());
    header.set("byte order", native_byte_order().to_string());
    header.set("map info", map_info(grid));
    header.set(
        "coordinate system string",
        format!("{{{}}}", grid.projection().wkt()),
    );

    let names: Vec<String> = (0..bands)
        .map(|i| {
            metadata
                .bands
                .get(i)
                .and_then(|b| b.description.clone())
                .unwrap_or_else(|| format!("Band {}", i + 1))
        })
        .collect();
    header.set("band names", format_list(&names));

    if let Some(no_data) = metadata.common_no_data() {
        header.set("data ignore value", no_data.to_string());
    }

    if let Some(names) = &metadata.category_names {
        header.set("classes", names.len().to_string());
        header.set("class names", format_list(names));
        if let Some(colors) = &metadata.category_colors {
            let flat: Vec<u8> = colors.iter().flat_map(|c| c.iter().copied()).collect();
            header.set("class lookup", format_list(&flat));
        }
    }

    header
}

/// ENVI `map info` value of a grid.
fn map_info(grid: &Grid) -> String {
    let e = grid.extent();
    let r = grid.resolution();
    let common = format!("1, 1, {}, {}, {}, {}", e.xmin(), e.ymax(), r.x(), r.y());
    match grid.projection() {
        Projection::Utm { zone, north } => format!(
            "{{UTM, {}, {}, {}, WGS-84, units=Meters}}",
            common,
            zone,
            if *north { "North" } else { "South" }
        ),
        Projection::Wgs84 => format!("{{Geographic Lat/Lon, {}, WGS-84, units=Degrees}}", common),
        Projection::WebMercator => format!("{{Arbitrary, {}, units=Meters}}", common),
    }
}

/// Read the layout and metadata described by a header.
pub fn parse_header(header: &EnviHeader) -> Result<(EnviLayout, RasterMetadata)> {
    let samples = header.required_usize("samples")?;
    let lines = header.required_usize("lines")?;
    let bands = header.required_usize("bands")?;
    let data_type = DataType::from_envi_code(header.required_usize("data type")? as u32)?;
    let interleave = match header.get("interleave") {
        Some(v) => Interleave::from_str(v)
            .ok_or_else(|| RasterIoError::invalid_header(format!("interleave '{}'", v)))?,
        None => Interleave::Bsq,
    };
    let byte_order = match header.get("byte order").map(str::trim) {
        Some("1") => 1,
        _ => 0,
    };
    let header_offset = header
        .get("header offset")
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0);

    let grid = parse_grid(header, RasterSize::new(samples, lines)?)?;

    let mut metadata = RasterMetadata::with_bands(bands);
    if let Some(names) = header.get("band names") {
        for (band, name) in metadata.bands.iter_mut().zip(parse_list(names)) {
            band.description = Some(name);
        }
    }
    if let Some(value) = header.get("data ignore value") {
        let no_data: f64 = value
            .trim()
            .parse()
            .map_err(|_| RasterIoError::invalid_header(format!("data ignore value '{}'", value)))?;
        for band in &mut metadata.bands {
            band.no_data = Some(no_data);
        }
    }
    if let Some(names) = header.get("class names") {
        metadata.category_names = Some(parse_list(names));
    }
    if let Some(lookup) = header.get("class lookup") {
        let values: Vec<u8> = parse_list(lookup)
            .iter()
            .filter_map(|v| v.parse().ok())
            .collect();
        metadata.category_colors = Some(
            values
                .chunks_exact(3)
                .map(|c| [c[0], c[1], c[2]])
                .collect(),
        );
    }
    for (key, value) in header.items() {
        if !STRUCTURAL_KEYS.contains(&key) {
            metadata.set_item(key, value, ENVI_DOMAIN);
        }
    }

    Ok((
        EnviLayout {
            grid,
            bands,
            data_type,
            interleave,
            byte_order,
            header_offset,
        },
        metadata,
    ))
}

fn parse_grid(header: &EnviHeader, size: RasterSize) -> Result<Grid> {
    let info = parse_list(
        header
            .get("map info")
            .ok_or_else(|| RasterIoError::invalid_header("missing 'map info'"))?,
    );
    if info.len() < 7 {
        return Err(RasterIoError::invalid_header("map info needs 7 values"));
    }
    let number = |i: usize| -> Result<f64> {
        info[i]
            .parse()
            .map_err(|_| RasterIoError::invalid_header(format!("map info value '{}'", info[i])))
    };
    let (ref_x, ref_y) = (number(1)?, number(2)?);
    let (easting, northing) = (number(3)?, number(4)?);
    let resolution = Resolution::new(number(5)?, number(6)?)?;

    let from_wkt = header
        .get("coordinate system string")
        .map(|v| v.trim().trim_start_matches('{').trim_end_matches('}').to_string())
        .and_then(|wkt| Projection::parse(&wkt).ok());
    let projection = match from_wkt {
        Some(p) => p,
        None => match info[0].to_lowercase().as_str() {
            "utm" if info.len() >= 9 => {
                let zone: u8 = info[7]
                    .parse()
                    .map_err(|_| RasterIoError::invalid_header("map info UTM zone"))?;
                Projection::utm(zone, info[8].eq_ignore_ascii_case("north"))?
            }
            "geographic lat/lon" => Projection::Wgs84,
            other => {
                return Err(RasterIoError::invalid_header(format!(
                    "cannot derive projection from map info '{}'",
                    other
                )))
            }
        },
    };

    // Reference pixel is 1-based and names the pixel's upper-left corner
    let xmin = easting - (ref_x - 1.0) * resolution.x();
    let ymax = northing + (ref_y - 1.0) * resolution.y();
    Ok(Grid::from_upper_left(xmin, ymax, resolution, size, projection)?)
}

/// Pixels of an ENVI binary file.
pub struct EnviStore {
    file: File,
    layout: EnviLayout,
    cols: usize,
    rows: usize,
    writable: bool,
}

impl EnviStore {
    /// Create a zero-filled binary file.
    pub fn create(path: &Path, layout: EnviLayout) -> Result<Self> {
        let (rows, cols) = layout.grid.shape();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len((layout.bands * rows * cols * layout.data_type.size()) as u64)?;
        Ok(Self {
            file,
            layout,
            cols,
            rows,
            writable: true,
        })
    }

    /// Open an existing binary file read-only.
    pub fn open(path: &Path, layout: EnviLayout) -> Result<Self> {
        let (rows, cols) = layout.grid.shape();
        let file = File::open(path)?;
        let expected = layout.header_offset
            + (layout.bands * rows * cols * layout.data_type.size()) as u64;
        let actual = file.metadata()?.len();
        if actual < expected {
            return Err(RasterIoError::invalid_data(format!(
                "{} has {} bytes, header describes {}",
                path.display(),
                actual,
                expected
            )));
        }
        Ok(Self {
            file,
            layout,
            cols,
            rows,
            writable: false,
        })
    }

    fn element_index(&self, band: usize, row: usize, col: usize) -> usize {
        let bands = self.layout.bands;
        match self.layout.interleave {
            Interleave::Bsq => (band * self.rows + row) * self.cols + col,
            Interleave::Bil => (row * bands + band) * self.cols + col,
            Interleave::Bip => (row * self.cols + col) * bands + band,
        }
    }

    fn position(&self, element: usize) -> u64 {
        self.layout.header_offset + (element * self.layout.data_type.size()) as u64
    }

    fn needs_swap(&self) -> bool {
        self.layout.byte_order != native_byte_order()
    }

    fn read_at(&mut self, element: usize, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.file.seek(SeekFrom::Start(self.position(element)))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_at(&mut self, element: usize, bytes: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(self.position(element)))?;
        self.file.write_all(bytes)?;
        Ok(())
    }
}

impl PixelStore for EnviStore {
    fn read_band_window(
        &mut self,
        band: usize,
        offset: PixelOffset,
        size: RasterSize,
    ) -> Result<Vec<u8>> {
        let element_size = self.layout.data_type.size();
        let bands = self.layout.bands;
        let mut out = Vec::with_capacity(size.count() * element_size);
        for r in 0..size.y() {
            let row = offset.y + r;
            match self.layout.interleave {
                Interleave::Bsq | Interleave::Bil => {
                    let start = self.element_index(band, row, offset.x);
                    out.extend(self.read_at(start, size.x() * element_size)?);
                }
                Interleave::Bip => {
                    let start = self.element_index(0, row, offset.x);
                    let span = self.read_at(start, size.x() * bands * element_size)?;
                    for pixel in span.chunks_exact(bands * element_size) {
                        out.extend_from_slice(
                            &pixel[band * element_size..(band + 1) * element_size],
                        );
                    }
                }
            }
        }
        if self.needs_swap() {
            swap_bytes(&mut out, element_size);
        }
        Ok(out)
    }

    fn write_band_window(
        &mut self,
        band: usize,
        offset: PixelOffset,
        size: RasterSize,
        bytes: &[u8],
    ) -> Result<()> {
        if !self.writable {
            return Err(RasterIoError::invalid_data("dataset is opened read-only"));
        }
        let element_size = self.layout.data_type.size();
        let bands = self.layout.bands;
        let mut bytes = bytes.to_vec();
        if self.needs_swap() {
            swap_bytes(&mut bytes, element_size);
        }
        let row_bytes = size.x() * element_size;
        for (r, chunk) in bytes.chunks_exact(row_bytes).enumerate() {
            let row = offset.y + r;
            match self.layout.interleave {
                Interleave::Bsq | Interleave::Bil => {
                    let start = self.element_index(band, row, offset.x);
                    self.write_at(start, chunk)?;
                }
                Interleave::Bip => {
                    let start = self.element_index(0, row, offset.x);
                    let mut span = self.read_at(start, size.x() * bands * element_size)?;
                    for (pixel, value) in span
                        .chunks_exact_mut(bands * element_size)
                        .zip(chunk.chunks_exact(element_size))
                    {
                        pixel[band * element_size..(band + 1) * element_size]
                            .copy_from_slice(value);
                    }
                    self.write_at(start, &span)?;
                }
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.writable {
            self.file.flush()?;
            self.file.sync_data()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Grid {
        Grid::from_upper_left(
            400_000.0,
            5_800_000.0,
            Resolution::square(30.0).unwrap(),
            RasterSize::new(4, 3).unwrap(),
            Projection::Utm { zone: 33, north: true },
        )
        .unwrap()
    }

    #[test]
    fn test_parse_multiline_values() {
        let text = "ENVI\nsamples = 4\nband names = {a,\n b,\n c}\nwavelength units = nm\n";
        let header = EnviHeader::parse(text).unwrap();
        assert_eq!(header.get("samples"), Some("4"));
        assert_eq!(parse_list(header.get("band names").unwrap()), vec!["a", "b", "c"]);
        assert!(EnviHeader::parse("samples = 4").is_err());
    }

    #[test]
    fn test_key_order() {
        let mut header = EnviHeader::default();
        header.set("zeta", "1");
        header.set("band names", "{x}");
        header.set("samples", "2");
        header.set("description", "{test}");
        assert_eq!(
            header.to_text(),
            "ENVI\ndescription = {test}\nsamples = 2\nband names = {x}\nzeta = 1\n"
        );
    }

    #[test]
    fn test_header_roundtrip_grid_and_metadata() {
        let mut metadata = RasterMetadata::with_bands(2);
        metadata.bands[0].description = Some("red".into());
        metadata.bands[0].no_data = Some(-9999.0);
        metadata.bands[1].no_data = Some(-9999.0);
        metadata.set_item("wavelength units", "nm", ENVI_DOMAIN);
        metadata.category_names = Some(vec!["none".into(), "forest".into()]);
        metadata.category_colors = Some(vec![[0, 0, 0], [0, 128, 0]]);

        let header = build_header(&grid(), 2, DataType::I16, Interleave::Bil, "ENVI Standard", &metadata);
        let parsed = EnviHeader::parse(&header.to_text()).unwrap();
        let (layout, back) = parse_header(&parsed).unwrap();

        assert_eq!(layout.grid, grid());
        assert_eq!(layout.bands, 2);
        assert_eq!(layout.data_type, DataType::I16);
        assert_eq!(layout.interleave, Interleave::Bil);
        assert_eq!(back.bands[0].description.as_deref(), Some("red"));
        assert_eq!(back.bands[1].description.as_deref(), Some("Band 2"));
        assert_eq!(back.common_no_data(), Some(-9999.0));
        assert_eq!(back.item("wavelength units", ENVI_DOMAIN), Some("nm"));
        assert_eq!(back.category_colors, metadata.category_colors);
    }

    #[test]
    fn test_map_info_without_wkt() {
        let text = "ENVI\nsamples = 2\nlines = 2\nbands = 1\ndata type = 1\n\
                    map info = {UTM, 2, 2, 100, 200, 10, 10, 32, South, WGS-84}\n";
        let (layout, _) = parse_header(&EnviHeader::parse(text).unwrap()).unwrap();
        assert_eq!(layout.grid.extent().xmin(), 90.0);
        assert_eq!(layout.grid.extent().ymax(), 210.0);
        assert_eq!(
            layout.grid.projection(),
            &Projection::Utm { zone: 32, north: false }
        );
    }

    #[test]
    fn test_store_interleaves() {
        let dir = tempfile::tempdir().unwrap();
        for interleave in [Interleave::Bsq, Interleave::Bil, Interleave::Bip] {
            let path = dir.path().join(format!("r.{}", interleave.as_str()));
            let layout = EnviLayout {
                grid: grid(),
                bands: 3,
                data_type: DataType::U16,
                interleave,
                byte_order: native_byte_order(),
                header_offset: 0,
            };
            let mut store = EnviStore::create(&path, layout).unwrap();
            let size = RasterSize::new(2, 2).unwrap();
            let offset = PixelOffset::new(1, 1);
            for band in 0..3u16 {
                let bytes: Vec<u8> = (0..4u16)
                    .flat_map(|v| (band * 10 + v).to_ne_bytes())
                    .collect();
                store.write_band_window(band as usize, offset, size, &bytes).unwrap();
            }
            store.flush().unwrap();
            let bytes = store.read_band_window(2, offset, size).unwrap();
            let values: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|c| u16::from_ne_bytes([c[0], c[1]]))
                .collect();
            assert_eq!(values, vec![20, 21, 22, 23], "{:?}", interleave);
            let corner = store
                .read_band_window(0, PixelOffset::new(0, 0), RasterSize::new(1, 1).unwrap())
                .unwrap();
            assert_eq!(corner, vec![0, 0]);
        }
    }
}
