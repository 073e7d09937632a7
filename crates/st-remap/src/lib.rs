// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Channel grouping and spatial area resampling for layered computation
//! graphs.
//!
//! Two differentiable operators driven through a uniform setup/forward/
//! backward contract: [`ChannelSelect`] averages fixed groups of input
//! channels into output channels, [`AreaResample`] rescales every channel
//! plane by area-weighted interpolation. Plans are fixed per configuration
//! at setup from explicit seeded generators; per-call passes are stateless
//! and batch-parallel.

pub mod gradcheck;
pub mod layers;
pub mod module;
pub mod plan;
pub mod sequential;

pub use layers::resample::AreaResample;
pub use layers::select::ChannelSelect;
pub use module::Module;
pub use plan::{AxisSpan, GroupPlan};
pub use sequential::Sequential;

pub use st_plane::{PureResult, Tensor, TensorError, TensorShape};
