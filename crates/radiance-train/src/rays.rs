//! Per-pixel ray fields
//!
//! A ray field is the network's input image: for every pixel of a square
//! grid it stores the localized ray origin and the unit ray direction as one
//! 6-float record, row-major with row 0 at the top of the image.

use burn::prelude::*;
use glam::Vec3;
use rand::{Rng, RngCore};
use std::f32::consts::FRAC_PI_2;

use crate::camera::CameraPose;
use crate::error::{SceneError, SceneResult};

/// Floats per pixel: origin xyz followed by direction xyz
pub const RAY_FEATURES: usize = 6;

/// Shortest camera-space direction accepted before normalization
const MIN_DIRECTION_LENGTH: f32 = 1e-6;

#[derive(Clone, Debug, PartialEq)]
pub struct RayField {
    resolution: usize,
    data: Vec<f32>,
}

impl RayField {
    /// Cast one ray per pixel of a `resolution` x `resolution` image.
    ///
    /// Pixel coordinates span `[-m, m]` with `m = (1 - 1/res) * tan(half_fov_x)`
    /// so the outermost samples stay inside the field of view. When `jitter`
    /// is given, each pixel's coordinate pair is offset by uniform noise in
    /// `[-1/res, 1/res]` drawn from it.
    ///
    /// Origins are moved along each ray to the point closest to the world
    /// origin.
    pub fn generate(
        pose: &CameraPose,
        half_fov_x: f32,
        resolution: usize,
        mut jitter: Option<&mut dyn RngCore>,
    ) -> SceneResult<Self> {
        if resolution == 0 {
            return Err(SceneError::InvalidResolution(resolution));
        }
        if !half_fov_x.is_finite() || half_fov_x <= 0.0 || half_fov_x >= FRAC_PI_2 {
            return Err(SceneError::InvalidFieldOfView(half_fov_x));
        }

        let res = resolution as f32;
        let max_coord = (1.0 - 1.0 / res) * half_fov_x.tan();
        let spacing = if resolution > 1 {
            2.0 * max_coord / (resolution - 1) as f32
        } else {
            0.0
        };
        let noise = 1.0 / res;

        let origin = pose.position();
        let rotation = pose.rotation();
        let mut data = Vec::with_capacity(resolution * resolution * RAY_FEATURES);

        for row in 0..resolution {
            for col in 0..resolution {
                let mut x = -max_coord + spacing * col as f32;
                let mut y = max_coord - spacing * row as f32;
                if let Some(rng) = jitter.as_deref_mut() {
                    x += rng.gen_range(-noise..=noise);
                    y += rng.gen_range(-noise..=noise);
                }

                let dir = rotation * Vec3::new(x, y, -1.0);
                let len = dir.length();
                if !len.is_finite() || len < MIN_DIRECTION_LENGTH {
                    return Err(SceneError::DegenerateRay { row, col });
                }
                let dir = dir / len;

                let t = -origin.dot(dir);
                let local = origin + dir * t;

                data.extend_from_slice(&[local.x, local.y, local.z, dir.x, dir.y, dir.z]);
            }
        }

        Ok(Self { resolution, data })
    }

    pub fn resolution(&self) -> usize {
        self.resolution
    }

    /// Number of rays (pixels)
    pub fn len(&self) -> usize {
        self.resolution * self.resolution
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Flat row-major records, `RAY_FEATURES` floats per pixel
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn origin(&self, pixel: usize) -> Vec3 {
        Vec3::from_slice(&self.data[pixel * RAY_FEATURES..])
    }

    pub fn direction(&self, pixel: usize) -> Vec3 {
        Vec3::from_slice(&self.data[pixel * RAY_FEATURES + 3..])
    }

    /// Upload as a `[pixels, 6]` tensor.
    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        Tensor::from_data(
            TensorData::new(self.data.clone(), [self.len(), RAY_FEATURES]),
            device,
        )
    }
}
