// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::module::Module;
use crate::plan::GroupPlan;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use st_plane::{PureResult, Tensor, TensorError, TensorShape};

/// Channel grouping operator: maps C input channels to `num_output` output
/// channels, each output plane being the average of a fixed group of
/// `group_size` input planes.
///
/// The grouping plan is drawn from the layer's own seeded generator at
/// setup. In distinct mode no channel is reused across groups; in
/// shared-pool mode each group is drawn independently and channels may
/// repeat across groups.
pub struct ChannelSelect {
    num_output: usize,
    group_size: usize,
    distinct: bool,
    rng: StdRng,
    plan: Option<GroupPlan>,
    input_shape: Option<TensorShape>,
}

impl core::fmt::Debug for ChannelSelect {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChannelSelect")
            .field("num_output", &self.num_output)
            .field("group_size", &self.group_size)
            .field("distinct", &self.distinct)
            .field("planned", &self.plan.is_some())
            .finish()
    }
}

impl ChannelSelect {
    /// Builds a new layer using entropy from the host.
    pub fn new(num_output: usize, group_size: usize, distinct: bool) -> PureResult<Self> {
        Self::with_seed(num_output, group_size, distinct, None)
    }

    /// Builds a new layer with a deterministic RNG seed.
    pub fn with_seed(
        num_output: usize,
        group_size: usize,
        distinct: bool,
        seed: Option<u64>,
    ) -> PureResult<Self> {
        if num_output == 0 {
            return Err(TensorError::InvalidConfig {
                label: "num_output",
            });
        }
        if group_size == 0 {
            return Err(TensorError::InvalidConfig {
                label: "group_size",
            });
        }
        let rng = match seed {
            Some(value) => StdRng::seed_from_u64(value),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            num_output,
            group_size,
            distinct,
            rng,
            plan: None,
            input_shape: None,
        })
    }

    pub fn num_output(&self) -> usize {
        self.num_output
    }

    pub fn group_size(&self) -> usize {
        self.group_size
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    /// The grouping plan built by the last `setup`, if any.
    pub fn plan(&self) -> Option<&GroupPlan> {
        self.plan.as_ref()
    }

    /// Replaces the plan with an explicit one, e.g. restored from a host
    /// checkpoint. The plan must match the layer configuration.
    pub fn install_plan(&mut self, input: TensorShape, plan: GroupPlan) -> PureResult<()> {
        if plan.channels() != input.channels
            || plan.group_size() != self.group_size
            || plan.num_groups() != self.num_output
        {
            return Err(TensorError::InvalidConfig {
                label: "group_plan_shape",
            });
        }
        self.plan = Some(plan);
        self.input_shape = Some(input);
        Ok(())
    }

    fn recorded_shape(&self) -> PureResult<TensorShape> {
        self.input_shape.ok_or(TensorError::MissingSetup {
            label: "channel_select",
        })
    }

    fn plan_ref(&self) -> PureResult<&GroupPlan> {
        self.plan.as_ref().ok_or(TensorError::MissingSetup {
            label: "channel_select",
        })
    }
}

impl Module for ChannelSelect {
    fn setup(&mut self, input: TensorShape) -> PureResult<TensorShape> {
        let plan = if self.distinct {
            GroupPlan::distinct(input.channels, self.num_output, self.group_size, &mut self.rng)?
        } else {
            GroupPlan::shared(input.channels, self.num_output, self.group_size, &mut self.rng)?
        };
        self.plan = Some(plan);
        self.input_shape = Some(input);
        Ok(input.with_channels(self.num_output))
    }

    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        let expected = self.recorded_shape()?;
        if input.shape() != expected {
            return Err(TensorError::ShapeMismatch {
                left: input.shape(),
                right: expected,
            });
        }
        let plan = self.plan_ref()?;
        let plane = expected.plane_len();
        let scale = 1.0 / self.group_size as f32;
        let num_output = self.num_output;
        let input_data = input.data();
        let mut out = Tensor::zeros(expected.with_channels(num_output))?;
        out.data_mut()
            .par_chunks_exact_mut(plane)
            .enumerate()
            .for_each(|(unit, out_plane)| {
                let n = unit / num_output;
                for &channel in plan.group(unit % num_output) {
                    let start = expected.plane_offset(n, channel);
                    let source = &input_data[start..start + plane];
                    for (dst, &value) in out_plane.iter_mut().zip(source) {
                        *dst += value * scale;
                    }
                }
            });
        Ok(out)
    }

    fn backward(&self, grad_output: &Tensor, propagate: bool) -> PureResult<Tensor> {
        let expected = self.recorded_shape()?;
        let out_shape = expected.with_channels(self.num_output);
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
        let plan = self.plan_ref()?;
        let plane = expected.plane_len();
        let scale = 1.0 / self.group_size as f32;
        // Batch rows are disjoint work units; within a row the scatter stays
        // serial because groups may alias the same input channel.
        grad_input
            .data_mut()
            .par_chunks_exact_mut(expected.channels * plane)
            .zip(grad_output.data().par_chunks_exact(self.num_output * plane))
            .for_each(|(input_row, output_row)| {
                for (group, grad_plane) in plan.groups().zip(output_row.chunks_exact(plane)) {
                    for &channel in group {
                        let target = &mut input_row[channel * plane..(channel + 1) * plane];
                        for (dst, &value) in target.iter_mut().zip(grad_plane) {
                            *dst += value * scale;
                        }
                    }
                }
            });
        Ok(grad_input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gradcheck::max_gradient_gap;

    #[test]
    fn setup_reports_grouped_output_shape() {
        let mut layer = ChannelSelect::with_seed(2, 2, true, Some(1701)).unwrap();
        let output = layer.setup(TensorShape::new(2, 4, 3, 5)).unwrap();
        assert_eq!(output, TensorShape::new(2, 2, 3, 5));

        let mut one_group = ChannelSelect::with_seed(1, 4, true, Some(1701)).unwrap();
        let output = one_group.setup(TensorShape::new(2, 4, 3, 5)).unwrap();
        assert_eq!(output, TensorShape::new(2, 1, 3, 5));
    }

    #[test]
    fn same_seed_builds_the_same_plan() {
        let shape = TensorShape::new(1, 8, 2, 2);
        let mut first = ChannelSelect::with_seed(3, 2, true, Some(42)).unwrap();
        let mut second = ChannelSelect::with_seed(3, 2, true, Some(42)).unwrap();
        first.setup(shape).unwrap();
        second.setup(shape).unwrap();
        assert_eq!(first.plan().unwrap(), second.plan().unwrap());
    }

    #[test]
    fn resetup_redraws_the_plan_for_new_shapes() {
        let mut layer = ChannelSelect::with_seed(2, 2, true, Some(3)).unwrap();
        layer.setup(TensorShape::new(1, 4, 2, 2)).unwrap();
        let narrow = layer.plan().unwrap().clone();
        layer.setup(TensorShape::new(1, 16, 2, 2)).unwrap();
        let wide = layer.plan().unwrap();
        assert_eq!(wide.channels(), 16);
        assert_ne!(&narrow, wide);
    }

    #[test]
    fn forward_averages_each_group() {
        let shape = TensorShape::new(2, 4, 3, 5);
        let mut layer = ChannelSelect::with_seed(2, 2, true, Some(1701)).unwrap();
        layer.setup(shape).unwrap();
        let input = Tensor::random_normal(shape, 0.0, 1.0, Some(1701)).unwrap();
        let output = layer.forward(&input).unwrap();
        assert_eq!(output.shape(), TensorShape::new(2, 2, 3, 5));

        let plan = layer.plan().unwrap();
        for n in 0..2 {
            for (i, group) in plan.groups().enumerate() {
                let out_plane = output.plane(n, i).unwrap();
                for j in 0..shape.plane_len() {
                    let mut expected = 0.0f32;
                    for &channel in group {
                        expected += input.plane(n, channel).unwrap()[j];
                    }
                    expected /= group.len() as f32;
                    assert!((out_plane[j] - expected).abs() < 1e-6);
                }
            }
        }
    }

    #[test]
    fn forward_matches_worked_example() {
        let shape = TensorShape::new(1, 4, 1, 1);
        let mut layer = ChannelSelect::with_seed(2, 2, true, Some(7)).unwrap();
        layer.setup(shape).unwrap();
        let values = [0.5f32, -1.25, 2.0, 4.5];
        let input = Tensor::from_vec(shape, values.to_vec()).unwrap();
        let output = layer.forward(&input).unwrap();
        let plan = layer.plan().unwrap();
        for (i, group) in plan.groups().enumerate() {
            let expected = (values[group[0]] + values[group[1]]) / 2.0;
            assert!((output.data()[i] - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn backward_distributes_half_to_each_group_member() {
        let shape = TensorShape::new(1, 4, 1, 1);
        let mut layer = ChannelSelect::with_seed(2, 2, true, Some(7)).unwrap();
        layer.setup(shape).unwrap();
        let mut grad = Tensor::zeros(TensorShape::new(1, 2, 1, 1)).unwrap();
        grad.data_mut()[0] = 1.0;
        let grad_input = layer.backward(&grad, true).unwrap();
        let plan = layer.plan().unwrap();
        let first_group = plan.group(0);
        for channel in 0..4 {
            let expected = if first_group.contains(&channel) {
                0.5
            } else {
                0.0
            };
            assert!((grad_input.data()[channel] - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn shared_pool_gradients_accumulate_across_groups() {
        // With two channels and two groups of two, every group is a
        // permutation of {0, 1}, so each input channel collects 1/2 from
        // both output channels regardless of the seed.
        let shape = TensorShape::new(1, 2, 1, 1);
        let mut layer = ChannelSelect::with_seed(2, 2, false, Some(13)).unwrap();
        layer.setup(shape).unwrap();
        let grad = Tensor::from_vec(TensorShape::new(1, 2, 1, 1), vec![1.0, 1.0]).unwrap();
        let grad_input = layer.backward(&grad, true).unwrap();
        assert!((grad_input.data()[0] - 1.0).abs() < 1e-6);
        assert!((grad_input.data()[1] - 1.0).abs() < 1e-6);

        let input = Tensor::from_vec(shape, vec![3.0, 5.0]).unwrap();
        let output = layer.forward(&input).unwrap();
        assert!((output.data()[0] - 4.0).abs() < 1e-6);
        assert!((output.data()[1] - 4.0).abs() < 1e-6);
    }

    #[test]
    fn skipping_propagation_returns_zeros() {
        let shape = TensorShape::new(2, 4, 2, 2);
        let mut layer = ChannelSelect::with_seed(2, 2, true, Some(5)).unwrap();
        layer.setup(shape).unwrap();
        let grad =
            Tensor::random_normal(TensorShape::new(2, 2, 2, 2), 0.0, 1.0, Some(5)).unwrap();
        let grad_input = layer.backward(&grad, false).unwrap();
        assert_eq!(grad_input.shape(), shape);
        assert!(grad_input.data().iter().all(|&value| value == 0.0));
    }

    #[test]
    fn infeasible_distinct_setup_fails_before_any_tensor_touch() {
        let mut layer = ChannelSelect::with_seed(3, 2, true, Some(1)).unwrap();
        let error = layer.setup(TensorShape::new(1, 4, 2, 2)).unwrap_err();
        assert_eq!(
            error,
            TensorError::GroupCapacity {
                requested: 6,
                channels: 4
            }
        );
        assert!(layer.forward(&Tensor::zeros(TensorShape::new(1, 4, 2, 2)).unwrap()).is_err());
    }

    #[test]
    fn zero_extent_configuration_is_rejected() {
        assert!(ChannelSelect::new(0, 2, true).is_err());
        assert!(ChannelSelect::new(2, 0, true).is_err());
    }

    #[test]
    fn forward_rejects_shape_drift() {
        let mut layer = ChannelSelect::with_seed(2, 2, true, Some(2)).unwrap();
        layer.setup(TensorShape::new(1, 4, 2, 2)).unwrap();
        let stray = Tensor::zeros(TensorShape::new(1, 5, 2, 2)).unwrap();
        assert!(matches!(
            layer.forward(&stray).unwrap_err(),
            TensorError::ShapeMismatch { .. }
        ));
    }

    #[test]
    fn forward_requires_setup() {
        let layer = ChannelSelect::with_seed(2, 2, true, Some(2)).unwrap();
        let input = Tensor::zeros(TensorShape::new(1, 4, 2, 2)).unwrap();
        assert!(matches!(
            layer.forward(&input).unwrap_err(),
            TensorError::MissingSetup { .. }
        ));
    }

    #[test]
    fn installed_plans_drive_the_forward_pass() {
        let shape = TensorShape::new(1, 4, 1, 2);
        let mut layer = ChannelSelect::with_seed(2, 2, true, Some(1)).unwrap();
        let plan = GroupPlan::from_groups(4, 2, vec![0, 1, 2, 3]).unwrap();
        layer.install_plan(shape, plan).unwrap();
        let input = Tensor::from_vec(
            shape,
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
        )
        .unwrap();
        let output = layer.forward(&input).unwrap();
        assert_eq!(output.data(), &[2.0, 3.0, 6.0, 7.0]);
    }

    #[test]
    fn backward_matches_numeric_gradients() {
        let shape = TensorShape::new(2, 4, 1, 2);
        let mut layer = ChannelSelect::with_seed(2, 2, true, Some(1701)).unwrap();
        layer.setup(shape).unwrap();
        let input = Tensor::random_normal(shape, 0.0, 1.0, Some(31)).unwrap();
        let gap = max_gradient_gap(&layer, &input, 1e-2).unwrap();
        assert!(gap < 1e-3, "worst analytic/numeric gap {gap}");
    }

    #[test]
    fn shared_pool_backward_matches_numeric_gradients() {
        let shape = TensorShape::new(1, 3, 2, 2);
        let mut layer = ChannelSelect::with_seed(4, 2, false, Some(23)).unwrap();
        layer.setup(shape).unwrap();
        let input = Tensor::random_normal(shape, 0.0, 1.0, Some(37)).unwrap();
        let gap = max_gradient_gap(&layer, &input, 1e-2).unwrap();
        assert!(gap < 1e-3, "worst analytic/numeric gap {gap}");
    }
}
