//! Training examples and target images

use burn::prelude::*;
use glam::Vec3;

use crate::camera::CameraPose;
use crate::error::{SceneError, SceneResult};

/// RGBA
pub const CHANNELS: usize = 4;

/// Map an 8-bit channel value to `[-1, 1]`.
pub fn normalize_channel(value: u8) -> f32 {
    value as f32 * 2.0 / 255.0 - 1.0
}

/// Map a signed channel value back to 8 bits, clamping out-of-range input.
pub fn denormalize_channel(value: f32) -> u8 {
    (((value + 1.0) / 2.0).clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Square RGBA image with channels in `[-1, 1]`
#[derive(Clone, Debug, PartialEq)]
pub struct TargetImage {
    resolution: usize,
    data: Vec<f32>,
}

impl TargetImage {
    /// Build from row-major RGBA8 pixels.
    pub fn from_rgba8(resolution: usize, pixels: &[u8]) -> SceneResult<Self> {
        let expected = resolution * resolution * CHANNELS;
        if pixels.len() != expected {
            return Err(SceneError::BufferSize {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            resolution,
            data: pixels.iter().copied().map(normalize_channel).collect(),
        })
    }

    /// Every pixel set to the same signed RGBA value.
    pub fn filled(resolution: usize, rgba: [f32; CHANNELS]) -> Self {
        let data = rgba
            .iter()
            .copied()
            .cycle()
            .take(resolution * resolution * CHANNELS)
            .collect();
        Self { resolution, data }
    }

    pub fn resolution(&self) -> usize {
        self.resolution
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// `[pixels, 4]` tensor in ray-field row order
    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        Tensor::from_data(
            TensorData::new(
                self.data.clone(),
                [self.resolution * self.resolution, CHANNELS],
            ),
            device,
        )
    }
}

/// One posed training image. Immutable once created.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainingExample {
    pose: CameraPose,
    target: TargetImage,
}

impl TrainingExample {
    pub fn new(pose: CameraPose, target: TargetImage) -> Self {
        Self { pose, target }
    }

    pub fn pose(&self) -> &CameraPose {
        &self.pose
    }

    pub fn target(&self) -> &TargetImage {
        &self.target
    }
}

/// Registered training examples sharing one field of view
#[derive(Clone, Debug)]
pub struct Dataset {
    half_fov_x: f32,
    examples: Vec<TrainingExample>,
}

impl Dataset {
    pub fn new(half_fov_x: f32) -> Self {
        Self {
            half_fov_x,
            examples: Vec::new(),
        }
    }

    /// Register an example and return its index.
    pub fn push(&mut self, example: TrainingExample) -> usize {
        self.examples.push(example);
        self.examples.len() - 1
    }

    pub fn half_fov_x(&self) -> f32 {
        self.half_fov_x
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TrainingExample> {
        self.examples.get(index)
    }

    pub fn examples(&self) -> &[TrainingExample] {
        &self.examples
    }

    /// Example indices ordered by how closely their view direction matches a
    /// camera at `position`.
    pub fn nearest_views(&self, position: Vec3) -> Vec<usize> {
        rank_views(self.examples.iter().map(|e| &e.pose), position)
    }
}

/// Rank poses by how closely they view the origin from the direction of
/// `position`, closest first.
///
/// All cameras are assumed to look at the origin, so views are compared by
/// their unit camera-to-origin directions.
pub fn rank_views<'a>(poses: impl IntoIterator<Item = &'a CameraPose>, position: Vec3) -> Vec<usize> {
    let query = (-position).normalize_or_zero();
    let mut ranked: Vec<(usize, f32)> = poses
        .into_iter()
        .enumerate()
        .map(|(i, pose)| (i, pose.direction_to_origin().distance_squared(query)))
        .collect();
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
    ranked.into_iter().map(|(i, _)| i).collect()
}
