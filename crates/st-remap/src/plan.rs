// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Index-plan construction shared by the remap layers: channel grouping
//! plans drawn from seeded permutations, and per-axis overlap spans for the
//! area resampler.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use st_plane::{PureResult, TensorError};

/// Ordered channel groups backing one `ChannelSelect` configuration.
///
/// The plan stores plain integer indices. It is built once at setup from a
/// seeded generator, stays immutable until the next setup, and is never
/// touched by training.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPlan {
    channels: usize,
    group_size: usize,
    indices: Vec<usize>,
}

fn validate_grouping(channels: usize, num_output: usize, group_size: usize) -> PureResult<()> {
    if channels == 0 {
        return Err(TensorError::InvalidConfig { label: "channels" });
    }
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
    Ok(())
}

impl GroupPlan {
    /// Builds a plan whose groups never reuse a channel.
    ///
    /// One shuffled permutation of `[0, channels)` is drawn; its first
    /// `group_size * num_output` entries are partitioned into `num_output`
    /// contiguous chunks, chunk `i` becoming group `i` in permutation order.
    pub fn distinct(
        channels: usize,
        num_output: usize,
        group_size: usize,
        rng: &mut StdRng,
    ) -> PureResult<Self> {
        validate_grouping(channels, num_output, group_size)?;
        let requested = group_size
            .checked_mul(num_output)
            .ok_or(TensorError::InvalidConfig {
                label: "group_size * num_output",
            })?;
        if requested > channels {
            return Err(TensorError::GroupCapacity {
                requested,
                channels,
            });
        }
        let mut shuffle: Vec<usize> = (0..channels).collect();
        shuffle.shuffle(rng);
        shuffle.truncate(requested);
        Ok(Self {
            channels,
            group_size,
            indices: shuffle,
        })
    }

    /// Builds a plan whose groups are drawn independently from a shared
    /// pool: each group takes the first `group_size` entries of a fresh
    /// permutation, so channels may repeat across groups but never within
    /// one group.
    pub fn shared(
        channels: usize,
        num_output: usize,
        group_size: usize,
        rng: &mut StdRng,
    ) -> PureResult<Self> {
        validate_grouping(channels, num_output, group_size)?;
        if group_size > channels {
            return Err(TensorError::GroupCapacity {
                requested: group_size,
                channels,
            });
        }
        let mut shuffle: Vec<usize> = (0..channels).collect();
        let mut indices = Vec::with_capacity(group_size * num_output);
        for _ in 0..num_output {
            shuffle.shuffle(rng);
            indices.extend_from_slice(&shuffle[..group_size]);
        }
        Ok(Self {
            channels,
            group_size,
            indices,
        })
    }

    /// Wraps pre-computed groups, validating bounds and group sizing, so
    /// hosts and tests can inject an explicit plan.
    pub fn from_groups(
        channels: usize,
        group_size: usize,
        indices: Vec<usize>,
    ) -> PureResult<Self> {
        if channels == 0 || group_size == 0 {
            return Err(TensorError::InvalidConfig {
                label: "group_plan_extents",
            });
        }
        if indices.is_empty() || indices.len() % group_size != 0 {
            return Err(TensorError::InvalidConfig {
                label: "group_plan_indices",
            });
        }
        if indices.iter().any(|&index| index >= channels) {
            return Err(TensorError::InvalidValue {
                label: "group_plan_index_range",
            });
        }
        Ok(Self {
            channels,
            group_size,
            indices,
        })
    }

    /// Channel count the plan was drawn from.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Number of source channels averaged into each output channel.
    pub fn group_size(&self) -> usize {
        self.group_size
    }

    /// Number of output channels the plan describes.
    pub fn num_groups(&self) -> usize {
        self.indices.len() / self.group_size
    }

    /// Ordered source-channel indices for output channel `index`.
    pub fn group(&self, index: usize) -> &[usize] {
        let start = index * self.group_size;
        &self.indices[start..start + self.group_size]
    }

    /// Iterates the groups in output-channel order.
    pub fn groups(&self) -> impl Iterator<Item = &[usize]> {
        self.indices.chunks_exact(self.group_size)
    }
}

/// Overlap of one destination cell with the source cells it covers along a
/// single axis.
///
/// Both grids are normalized to the same physical extent, so destination
/// cell `d` spans `[d * source/dest, (d + 1) * source/dest)` in source
/// coordinates. The stored weights are the overlap lengths normalized to sum
/// to one; the 2D area weight of a source cell is the product of its row and
/// column weights.
#[derive(Clone, Debug, PartialEq)]
pub struct AxisSpan {
    start: usize,
    weights: Vec<f64>,
}

impl AxisSpan {
    /// Builds the span table mapping `dest` cells onto `source` cells.
    ///
    /// `source == dest` yields unit spans, making the resample an exact
    /// identity.
    pub fn table(source: usize, dest: usize) -> Vec<AxisSpan> {
        let scale = source as f64 / dest as f64;
        (0..dest)
            .map(|d| {
                let lo = d as f64 * scale;
                let hi = ((d + 1) as f64 * scale).min(source as f64);
                let first = lo.floor() as usize;
                let last = (hi.ceil() as usize).min(source);
                let mut weights = Vec::with_capacity(last - first);
                let mut total = 0.0f64;
                for cell in first..last {
                    let overlap = (hi.min((cell + 1) as f64) - lo.max(cell as f64)).max(0.0);
                    total += overlap;
                    weights.push(overlap);
                }
                if total > 0.0 {
                    for weight in &mut weights {
                        *weight /= total;
                    }
                }
                AxisSpan {
                    start: first,
                    weights,
                }
            })
            .collect()
    }

    /// First source cell the span covers.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Normalized overlap weights, one per covered source cell.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
}
