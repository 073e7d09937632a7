// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Planar `(num, channels, height, width)` tensor container shared by the
//! remap layers.
//!
//! Everything here is safe Rust with no native bindings: a shape descriptor
//! with explicit offset arithmetic, a `Vec<f32>`-backed buffer with
//! contiguous per-channel planes, and seeded random fillers so tests stay
//! reproducible without touching process-global state.

use core::fmt;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::error::Error;

/// Result alias used throughout the remap stack.
pub type PureResult<T> = Result<T, TensorError>;

/// Errors emitted by the tensor container and the layers built on it.
#[derive(Clone, Debug, PartialEq)]
pub enum TensorError {
    /// A tensor constructor received a shape with a zero extent.
    InvalidDimensions { shape: TensorShape },
    /// Data provided to a constructor does not match the tensor shape.
    DataLength { expected: usize, got: usize },
    /// An operator received a tensor whose shape disagrees with the one
    /// recorded at setup.
    ShapeMismatch {
        left: TensorShape,
        right: TensorShape,
    },
    /// Invalid or infeasible configuration detected before any tensor touch.
    InvalidConfig { label: &'static str },
    /// A distinct grouping asked for more channel slots than the input has.
    GroupCapacity { requested: usize, channels: usize },
    /// `forward`/`backward` was called before `setup` fixed the shapes.
    MissingSetup { label: &'static str },
    /// A plane accessor was asked for a batch/channel pair out of range.
    PlaneOutOfRange {
        num: usize,
        channel: usize,
        shape: TensorShape,
    },
    /// Generic value violation for helpers such as the random fillers.
    InvalidValue { label: &'static str },
}

impl fmt::Display for TensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TensorError::InvalidDimensions { shape } => {
                write!(
                    f,
                    "invalid tensor dimensions {shape}; every extent must be non-zero"
                )
            }
            TensorError::DataLength { expected, got } => {
                write!(f, "data length mismatch: expected {expected}, got {got}")
            }
            TensorError::ShapeMismatch { left, right } => {
                write!(f, "shape mismatch: got {left}, setup recorded {right}")
            }
            TensorError::InvalidConfig { label } => {
                write!(f, "invalid configuration: {label}")
            }
            TensorError::GroupCapacity {
                requested,
                channels,
            } => {
                write!(
                    f,
                    "group_size * num_output = {requested} cannot exceed the {channels} input channels"
                )
            }
            TensorError::MissingSetup { label } => {
                write!(f, "{label} must be set up before forward/backward")
            }
            TensorError::PlaneOutOfRange {
                num,
                channel,
                shape,
            } => {
                write!(f, "plane ({num}, {channel}) lies outside tensor {shape}")
            }
            TensorError::InvalidValue { label } => {
                write!(f, "invalid value for {label}")
            }
        }
    }
}

impl Error for TensorError {}

/// Logical extents of a 4D feature-map tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorShape {
    pub num: usize,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl TensorShape {
    pub fn new(num: usize, channels: usize, height: usize, width: usize) -> Self {
        Self {
            num,
            channels,
            height,
            width,
        }
    }

    /// Total number of scalars stored by a tensor of this shape.
    pub fn volume(&self) -> usize {
        self.num * self.channels * self.height * self.width
    }

    /// Number of scalars in one `(num, channel)` plane.
    pub fn plane_len(&self) -> usize {
        self.height * self.width
    }

    /// Element offset of `(n, c, h, w)` in the contiguous row-major buffer.
    #[inline]
    pub fn offset(&self, n: usize, c: usize, h: usize, w: usize) -> usize {
        ((n * self.channels + c) * self.height + h) * self.width + w
    }

    /// Offset of the first scalar of plane `(n, c)`.
    #[inline]
    pub fn plane_offset(&self, n: usize, c: usize) -> usize {
        (n * self.channels + c) * self.plane_len()
    }

    /// Same batch and spatial extents with a different channel count.
    pub fn with_channels(&self, channels: usize) -> Self {
        Self { channels, ..*self }
    }

    /// Same batch and channel extents with a different spatial plane.
    pub fn with_plane(&self, height: usize, width: usize) -> Self {
        Self {
            height,
            width,
            ..*self
        }
    }

    fn ensure_non_zero(&self) -> PureResult<()> {
        if self.num == 0 || self.channels == 0 || self.height == 0 || self.width == 0 {
            return Err(TensorError::InvalidDimensions { shape: *self });
        }
        Ok(())
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}x{}x{}",
            self.num, self.channels, self.height, self.width
        )
    }
}

/// A dense NCHW tensor with contiguous per-channel planes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    shape: TensorShape,
    data: Vec<f32>,
}

impl Tensor {
    fn seedable_rng(seed: Option<u64>) -> StdRng {
        match seed {
            Some(value) => StdRng::seed_from_u64(value),
            None => StdRng::from_entropy(),
        }
    }

    /// Create a tensor filled with zeros.
    pub fn zeros(shape: TensorShape) -> PureResult<Self> {
        shape.ensure_non_zero()?;
        Ok(Self {
            shape,
            data: vec![0.0; shape.volume()],
        })
    }

    /// Create a tensor from raw data. The provided vector must hold exactly
    /// `shape.volume()` scalars.
    pub fn from_vec(shape: TensorShape, data: Vec<f32>) -> PureResult<Self> {
        shape.ensure_non_zero()?;
        if data.len() != shape.volume() {
            return Err(TensorError::DataLength {
                expected: shape.volume(),
                got: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// Construct a tensor by applying a generator to each coordinate.
    pub fn from_fn<F>(shape: TensorShape, mut f: F) -> PureResult<Self>
    where
        F: FnMut(usize, usize, usize, usize) -> f32,
    {
        shape.ensure_non_zero()?;
        let mut data = Vec::with_capacity(shape.volume());
        for n in 0..shape.num {
            for c in 0..shape.channels {
                for h in 0..shape.height {
                    for w in 0..shape.width {
                        data.push(f(n, c, h, w));
                    }
                }
            }
        }
        Ok(Self { shape, data })
    }

    /// Construct a tensor by sampling a uniform distribution in `[min, max)`.
    ///
    /// When `seed` is provided the RNG becomes deterministic which makes
    /// tests reproducible. Otherwise entropy from the host is used.
    pub fn random_uniform(
        shape: TensorShape,
        min: f32,
        max: f32,
        seed: Option<u64>,
    ) -> PureResult<Self> {
        shape.ensure_non_zero()?;
        if !(min < max) {
            return Err(TensorError::InvalidValue {
                label: "random_uniform_bounds",
            });
        }
        let mut rng = Self::seedable_rng(seed);
        let distribution = Uniform::new(min, max);
        let data = (0..shape.volume())
            .map(|_| distribution.sample(&mut rng))
            .collect();
        Ok(Self { shape, data })
    }

    /// Construct a tensor by sampling a normal distribution.
    pub fn random_normal(
        shape: TensorShape,
        mean: f32,
        std: f32,
        seed: Option<u64>,
    ) -> PureResult<Self> {
        shape.ensure_non_zero()?;
        if std <= 0.0 {
            return Err(TensorError::InvalidValue {
                label: "random_normal_std",
            });
        }
        let mut rng = Self::seedable_rng(seed);
        let data = (0..shape.volume())
            .map(|_| {
                let sample: f64 = StandardNormal.sample(&mut rng);
                mean + std * sample as f32
            })
            .collect();
        Ok(Self { shape, data })
    }

    /// Returns the logical extents of the tensor.
    pub fn shape(&self) -> TensorShape {
        self.shape
    }

    /// Total number of scalars stored.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Immutable view of the whole buffer in offset order.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Mutable view of the whole buffer in offset order.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    fn ensure_plane(&self, n: usize, c: usize) -> PureResult<()> {
        if n >= self.shape.num || c >= self.shape.channels {
            return Err(TensorError::PlaneOutOfRange {
                num: n,
                channel: c,
                shape: self.shape,
            });
        }
        Ok(())
    }

    /// Contiguous `height * width` slice for the plane `(n, c)`.
    pub fn plane(&self, n: usize, c: usize) -> PureResult<&[f32]> {
        self.ensure_plane(n, c)?;
        let start = self.shape.plane_offset(n, c);
        Ok(&self.data[start..start + self.shape.plane_len()])
    }

    /// Mutable plane view for `(n, c)`.
    pub fn plane_mut(&mut self, n: usize, c: usize) -> PureResult<&mut [f32]> {
        self.ensure_plane(n, c)?;
        let start = self.shape.plane_offset(n, c);
        let len = self.shape.plane_len();
        Ok(&mut self.data[start..start + len])
    }
}
