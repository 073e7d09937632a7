// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::module::Module;
use crate::plan::AxisSpan;
use rayon::prelude::*;
use st_plane::{PureResult, Tensor, TensorError, TensorShape};

/// Spatial resampler: rescales every `(n, c)` plane from `H x W` to
/// `new_height x new_width` with area-weighted interpolation.
///
/// Each output cell is the overlap-area weighted average of the input cells
/// it covers once both grids are normalized to the same physical extent: a
/// box filter when shrinking, a smooth interpolation when enlarging, with
/// one kernel parameterized purely by the two sizes.
#[derive(Clone, Debug)]
pub struct AreaResample {
    new_height: usize,
    new_width: usize,
    input_shape: Option<TensorShape>,
    area_ratio: f64,
    forward_rows: Vec<AxisSpan>,
    forward_cols: Vec<AxisSpan>,
    backward_rows: Vec<AxisSpan>,
    backward_cols: Vec<AxisSpan>,
}

/// Resamples one contiguous plane through the prebuilt span tables,
/// accumulating in f64 and casting back on write. `gain` folds the area
/// ratio into the backward pass.
fn resample_plane(
    source: &[f32],
    source_width: usize,
    rows: &[AxisSpan],
    cols: &[AxisSpan],
    gain: f64,
    dest: &mut [f32],
) {
    let dest_width = cols.len();
    for (oy, row_span) in rows.iter().enumerate() {
        let out_row = &mut dest[oy * dest_width..(oy + 1) * dest_width];
        for (ox, col_span) in cols.iter().enumerate() {
            let mut acc = 0.0f64;
            for (dy, &row_weight) in row_span.weights().iter().enumerate() {
                let line_start = (row_span.start() + dy) * source_width + col_span.start();
                let line = &source[line_start..line_start + col_span.weights().len()];
                for (&value, &col_weight) in line.iter().zip(col_span.weights()) {
                    acc += row_weight * col_weight * f64::from(value);
                }
            }
            out_row[ox] = (acc * gain) as f32;
        }
    }
}

impl AreaResample {
    /// Builds a resampler targeting `new_height x new_width` planes.
    pub fn new(new_height: usize, new_width: usize) -> PureResult<Self> {
        if new_height == 0 {
            return Err(TensorError::InvalidConfig {
                label: "new_height",
            });
        }
        if new_width == 0 {
            return Err(TensorError::InvalidConfig { label: "new_width" });
        }
        Ok(Self {
            new_height,
            new_width,
            input_shape: None,
            area_ratio: 0.0,
            forward_rows: Vec::new(),
            forward_cols: Vec::new(),
            backward_rows: Vec::new(),
            backward_cols: Vec::new(),
        })
    }

    pub fn new_height(&self) -> usize {
        self.new_height
    }

    pub fn new_width(&self) -> usize {
        self.new_width
    }

    /// Ratio between the output and input plane areas, fixed at setup.
    pub fn area_ratio(&self) -> f64 {
        self.area_ratio
    }

    fn recorded_shape(&self) -> PureResult<TensorShape> {
        self.input_shape.ok_or(TensorError::MissingSetup {
            label: "area_resample",
        })
    }
}

impl Module for AreaResample {
    fn setup(&mut self, input: TensorShape) -> PureResult<TensorShape> {
        if input.num == 0 || input.channels == 0 || input.height == 0 || input.width == 0 {
            return Err(TensorError::InvalidDimensions { shape: input });
        }
        self.area_ratio =
            (self.new_height * self.new_width) as f64 / (input.height * input.width) as f64;
        self.forward_rows = AxisSpan::table(input.height, self.new_height);
        self.forward_cols = AxisSpan::table(input.width, self.new_width);
        self.backward_rows = AxisSpan::table(self.new_height, input.height);
        self.backward_cols = AxisSpan::table(self.new_width, input.width);
        self.input_shape = Some(input);
        Ok(input.with_plane(self.new_height, self.new_width))
    }

    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        let expected = self.recorded_shape()?;
        if input.shape() != expected {
            return Err(TensorError::ShapeMismatch {
                left: input.shape(),
                right: expected,
            });
        }
        let out_shape = expected.with_plane(self.new_height, self.new_width);
        let mut out = Tensor::zeros(out_shape)?;
        let in_plane = expected.plane_len();
        let out_plane = out_shape.plane_len();
        out.data_mut()
            .par_chunks_exact_mut(out_plane)
            .zip(input.data().par_chunks_exact(in_plane))
            .for_each(|(dest, source)| {
                resample_plane(
                    source,
                    expected.width,
                    &self.forward_rows,
                    &self.forward_cols,
                    1.0,
                    dest,
                );
            });
        Ok(out)
    }

    /// The output gradient is resampled back to the input plane size with
    /// the same area kernel (source and destination sizes swapped) and every
    /// element is then scaled by the area ratio. This reproduces the
    /// reference behaviour: an approximation of the adjoint, not the exact
    /// transpose of the forward interpolation matrix.
    fn backward(&self, grad_output: &Tensor, propagate: bool) -> PureResult<Tensor> {
        let expected = self.recorded_shape()?;
        let out_shape = expected.with_plane(self.new_height, self.new_width);
        if grad_output.shape() != out_shape {
            return Err(TensorError::ShapeMismatch {
                left: grad_output.shape(),
                right: out_shape,
            });
        }
        let mut grad_input = Tensor::zeros(expected)?;
        if !propagate {
            return Ok(grad_input);
        }
        let in_plane = expected.plane_len();
        let out_plane = out_shape.plane_len();
        grad_input
            .data_mut()
            .par_chunks_exact_mut(in_plane)
            .zip(grad_output.data().par_chunks_exact(out_plane))
            .for_each(|(dest, source)| {
                resample_plane(
                    source,
                    self.new_width,
                    &self.backward_rows,
                    &self.backward_cols,
                    self.area_ratio,
                    dest,
                );
            });
        Ok(grad_input)
    }
}
