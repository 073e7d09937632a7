// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::module::Module;
use st_plane::{PureResult, Tensor, TensorError, TensorShape};

/// Ordered container chaining remap operators the way a host graph would.
///
/// `setup` threads shapes through the layers, `forward` composes their
/// outputs, and `backward` walks the chain in reverse. The remap operators'
/// adjoints depend only on the output gradient, so no forward activations
/// need to be replayed during the reverse walk.
#[derive(Default)]
pub struct Sequential {
    layers: Vec<Box<dyn Module>>,
    input_shape: Option<TensorShape>,
}

impl core::fmt::Debug for Sequential {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Sequential(num_layers={})", self.layers.len())
    }
}

impl Sequential {
    /// Creates an empty container.
    pub fn new() -> Self {
        Self {
            layers: Vec::new(),
            input_shape: None,
        }
    }

    /// Appends a new layer to the sequence.
    pub fn push<M>(&mut self, layer: M)
    where
        M: Module + 'static,
    {
        self.layers.push(Box::new(layer));
    }

    /// Appends a pre-boxed module to the sequence.
    pub fn push_boxed(&mut self, layer: Box<dyn Module>) {
        self.layers.push(layer);
    }

    /// Returns the number of layers registered in the container.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Returns `true` when the container does not hold any layers.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl Module for Sequential {
    fn setup(&mut self, input: TensorShape) -> PureResult<TensorShape> {
        self.input_shape = Some(input);
        let mut shape = input;
        for layer in &mut self.layers {
            shape = layer.setup(shape)?;
        }
        Ok(shape)
    }

    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        let mut activ = input.clone();
        for layer in &self.layers {
            activ = layer.forward(&activ)?;
        }
        Ok(activ)
    }

    fn backward(&self, grad_output: &Tensor, propagate: bool) -> PureResult<Tensor> {
        if !propagate {
            let shape = self.input_shape.ok_or(TensorError::MissingSetup {
                label: "sequential",
            })?;
            return Tensor::zeros(shape);
        }
        let mut grad = grad_output.clone();
        for layer in self.layers.iter().rev() {
            grad = layer.backward(&grad, true)?;
        }
        Ok(grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::resample::AreaResample;
    use crate::layers::select::ChannelSelect;

    #[test]
    fn empty_container_is_the_identity() {
        let mut stack = Sequential::new();
        assert!(stack.is_empty());
        let shape = TensorShape::new(1, 2, 2, 2);
        assert_eq!(stack.setup(shape).unwrap(), shape);
        let input = Tensor::random_normal(shape, 0.0, 1.0, Some(1)).unwrap();
        assert_eq!(stack.forward(&input).unwrap(), input);
        assert_eq!(stack.backward(&input, true).unwrap(), input);
    }

    #[test]
    fn setup_threads_shapes_through_the_chain() {
        let mut stack = Sequential::new();
        stack.push(ChannelSelect::with_seed(2, 2, true, Some(1701)).unwrap());
        stack.push(AreaResample::new(6, 10).unwrap());
        assert_eq!(stack.len(), 2);
        let output = stack.setup(TensorShape::new(2, 4, 3, 5)).unwrap();
        assert_eq!(output, TensorShape::new(2, 2, 6, 10));
    }

    #[test]
    fn skipping_propagation_yields_input_shaped_zeros() {
        let mut stack = Sequential::new();
        stack.push(ChannelSelect::with_seed(2, 2, true, Some(1701)).unwrap());
        stack.push(AreaResample::new(2, 2).unwrap());
        let input_shape = TensorShape::new(1, 4, 4, 4);
        let grad_shape = stack.setup(input_shape).unwrap();
        let grad = Tensor::from_fn(grad_shape, |_, _, _, _| 1.0).unwrap();
        let grad_input = stack.backward(&grad, false).unwrap();
        assert_eq!(grad_input.shape(), input_shape);
        assert!(grad_input.data().iter().all(|&value| value == 0.0));
    }
}
