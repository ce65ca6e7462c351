//! Built-in operators.

use applier::{ApplierError, BlockContext, Operator, Result};
use ndarray::{Axis, Zip};
use raster_io::RasterArray;

/// No-data value of normalized difference outputs.
pub const NDI_NO_DATA: f32 = -9999.0;

/// Stacks all bands of several inputs into one output.
#[derive(Debug, Clone)]
pub struct StackOperator {
    inputs: Vec<String>,
    output: String,
}

impl StackOperator {
    pub fn new(inputs: Vec<String>, output: impl Into<String>) -> Self {
        Self {
            inputs,
            output: output.into(),
        }
    }
}

impl Operator for StackOperator {
    type Output = ();

    fn apply(&mut self, ctx: &mut BlockContext<'_>) -> Result<()> {
        let mut arrays = Vec::with_capacity(self.inputs.len());
        let mut descriptions = Vec::new();
        for key in &self.inputs {
            let mut raster = ctx.raster(key)?;
            let array = raster.array(0)?;
            for (band, description) in raster.descriptions().into_iter().enumerate() {
                let description = description.unwrap_or_else(|| format!("band {}", band + 1));
                descriptions.push(format!("{}: {}", key, description));
            }
            arrays.push(array);
        }
        let stacked = RasterArray::stack(&arrays)?;

        let mut out = ctx.output(&self.output)?;
        out.set_array(stacked, 0)?;
        for (band, description) in descriptions.into_iter().enumerate() {
            out.band(band)?.set_description(description);
        }
        Ok(())
    }
}

/// Normalized difference `(a - b) / (a + b)` of the first bands of two
/// inputs. Returns the number of valid pixels per block.
#[derive(Debug, Clone)]
pub struct NdiOperator {
    a: String,
    b: String,
    output: String,
}

impl NdiOperator {
    pub fn new(a: impl Into<String>, b: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            a: a.into(),
            b: b.into(),
            output: output.into(),
        }
    }

    fn first_band(ctx: &mut BlockContext<'_>, key: &str) -> Result<(ndarray::Array2<f32>, Option<f64>)> {
        let mut raster = ctx.raster(key)?;
        let no_data = raster.no_data_value();
        let array = raster.array_as::<f32>(0)?;
        if array.dim().0 == 0 {
            return Err(ApplierError::contract(format!("input '{}' has no bands", key)));
        }
        Ok((array.index_axis_move(Axis(0), 0), no_data))
    }
}

impl Operator for NdiOperator {
    type Output = u64;

    fn apply(&mut self, ctx: &mut BlockContext<'_>) -> Result<u64> {
        let (a, a_no_data) = Self::first_band(ctx, &self.a)?;
        let (b, b_no_data) = Self::first_band(ctx, &self.b)?;
        let is_no_data = |v: f32, no_data: Option<f64>| no_data.map_or(false, |nd| v as f64 == nd);

        let ndi = Zip::from(&a).and(&b).map_collect(|&a, &b| {
            let sum = a + b;
            if is_no_data(a, a_no_data) || is_no_data(b, b_no_data) || sum == 0.0 {
                NDI_NO_DATA
            } else {
                (a - b) / sum
            }
        });
        let valid = ndi.iter().filter(|&&v| v != NDI_NO_DATA).count() as u64;

        let mut out = ctx.output(&self.output)?;
        out.set_array(RasterArray::from_band(ndi), 0)?;
        out.set_no_data_value(NDI_NO_DATA as f64);
        out.band(0)?.set_description("normalized difference");
        Ok(valid)
    }
}
