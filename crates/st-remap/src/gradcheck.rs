// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Exhaustive finite-difference gradient checking for set-up modules.
//!
//! Every analytic Jacobian row is gathered by backpropagating a unit
//! gradient per output element; the numeric side perturbs each input element
//! with a central difference. Intended for small test shapes; the cost is
//! `O(outputs + inputs)` full passes.

use crate::module::Module;
use st_plane::{PureResult, Tensor};

/// Worst absolute gap between the module's analytic input gradients and the
/// central-difference numeric gradients on `input`.
pub fn max_gradient_gap<M: Module>(module: &M, input: &Tensor, step: f32) -> PureResult<f32> {
    let output = module.forward(input)?;
    let mut jacobian = Vec::with_capacity(output.len());
    for out_index in 0..output.len() {
        let mut unit = Tensor::zeros(output.shape())?;
        unit.data_mut()[out_index] = 1.0;
        jacobian.push(module.backward(&unit, true)?);
    }

    let mut worst = 0.0f32;
    for in_index in 0..input.len() {
        let mut nudged = input.clone();
        nudged.data_mut()[in_index] += step;
        let above = module.forward(&nudged)?;
        nudged.data_mut()[in_index] = input.data()[in_index] - step;
        let below = module.forward(&nudged)?;
        for (out_index, analytic) in jacobian.iter().enumerate() {
            let numeric =
                (above.data()[out_index] - below.data()[out_index]) / (2.0 * step);
            let gap = (numeric - analytic.data()[in_index]).abs();
            if gap > worst {
                worst = gap;
            }
        }
    }
    Ok(worst)
}
