// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use st_plane::{PureResult, Tensor, TensorShape};

/// Contract the host graph drives every remap operator through.
///
/// `setup` fixes shape-dependent state (plans, ratios, cached extents) once
/// per configuration/shape pair and returns the output shape; it must not run
/// concurrently with `forward`/`backward` on the same instance, which the
/// `&mut self` receiver enforces. `forward` and `backward` are stateless per
/// call: they read the state fixed at setup and write only their own result
/// tensor.
pub trait Module {
    /// Validates the configuration against `input`, rebuilds any cached
    /// plans, and returns the output shape.
    fn setup(&mut self, input: TensorShape) -> PureResult<TensorShape>;

    /// Maps an input tensor to an output tensor.
    fn forward(&self, input: &Tensor) -> PureResult<Tensor>;

    /// Maps an output gradient back to an input gradient. When `propagate`
    /// is false the operator returns an all-zero input gradient without
    /// reading `grad_output`'s contents.
    fn backward(&self, grad_output: &Tensor, propagate: bool) -> PureResult<Tensor>;
}
