//! Preview cache for the interactive camera
//!
//! The cache re-renders only when marked dirty. If just the model changed,
//! the previous ray field tensor is reused and only the forward pass runs.

use burn::prelude::*;

use crate::camera::CameraPose;
use crate::dataset::CHANNELS;
use crate::error::{SceneError, SceneResult};
use crate::model::ImplicitModel;
use crate::rays::RayField;

/// Why the preview needs re-rendering
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshReason {
    CameraMoved,
    ModelAdvanced,
}

/// Square RGBA preview with channels in `[0, 1]`
#[derive(Clone, Debug, PartialEq)]
pub struct PreviewImage {
    resolution: usize,
    data: Vec<f32>,
}

impl PreviewImage {
    pub fn blank(resolution: usize) -> Self {
        Self {
            resolution,
            data: vec![0.0; resolution * resolution * CHANNELS],
        }
    }

    /// Rescale signed `[-1, 1]` predictions to `[0, 1]`.
    pub fn from_signed(resolution: usize, signed: &[f32]) -> SceneResult<Self> {
        let expected = resolution * resolution * CHANNELS;
        if signed.len() != expected {
            return Err(SceneError::BufferSize {
                expected,
                actual: signed.len(),
            });
        }
        let data = signed
            .iter()
            .map(|v| ((v + 1.0) / 2.0).clamp(0.0, 1.0))
            .collect();
        Ok(Self { resolution, data })
    }

    pub fn resolution(&self) -> usize {
        self.resolution
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn pixel(&self, row: usize, col: usize) -> [f32; CHANNELS] {
        let start = (row * self.resolution + col) * CHANNELS;
        let mut out = [0.0; CHANNELS];
        out.copy_from_slice(&self.data[start..start + CHANNELS]);
        out
    }

    /// Row-major RGBA8 bytes
    pub fn to_rgba8(&self) -> Vec<u8> {
        self.data
            .iter()
            .map(|&v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect()
    }
}

/// Counters for the work the cache has done
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ViewStats {
    pub ray_fields: usize,
    pub forward_passes: usize,
}

struct CachedInput<B: Backend> {
    pose: CameraPose,
    rays: Tensor<B, 2>,
}

pub struct ViewCache<B: Backend> {
    resolution: usize,
    half_fov_x: f32,
    input: Option<CachedInput<B>>,
    preview: PreviewImage,
    camera_dirty: bool,
    model_dirty: bool,
    stats: ViewStats,
}

impl<B: Backend> ViewCache<B> {
    pub fn new(resolution: usize, half_fov_x: f32) -> Self {
        Self {
            resolution,
            half_fov_x,
            input: None,
            preview: PreviewImage::blank(resolution),
            camera_dirty: false,
            model_dirty: false,
            stats: ViewStats::default(),
        }
    }

    pub fn mark_dirty(&mut self, reason: RefreshReason) {
        match reason {
            RefreshReason::CameraMoved => self.camera_dirty = true,
            RefreshReason::ModelAdvanced => self.model_dirty = true,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.camera_dirty || self.model_dirty
    }

    /// Re-render if dirty. Returns whether a forward pass ran.
    pub fn refresh(&mut self, model: &ImplicitModel<B>, pose: &CameraPose) -> SceneResult<bool> {
        if !self.is_dirty() {
            return Ok(false);
        }
        let same_input = !self.camera_dirty
            && self.input.as_ref().map(|c| c.pose == *pose).unwrap_or(false);
        self.update_view(model, pose, same_input)?;
        Ok(true)
    }

    /// Render the preview now.
    ///
    /// With `same_input` the cached ray field is reused and `pose` is only
    /// consulted if nothing is cached yet.
    pub fn update_view(
        &mut self,
        model: &ImplicitModel<B>,
        pose: &CameraPose,
        same_input: bool,
    ) -> SceneResult<()> {
        let rays = match &self.input {
            Some(cached) if same_input => cached.rays.clone(),
            _ => {
                let field = RayField::generate(pose, self.half_fov_x, self.resolution, None)?;
                let rays = field.to_tensor::<B>(&model.device());
                self.input = Some(CachedInput {
                    pose: *pose,
                    rays: rays.clone(),
                });
                self.stats.ray_fields += 1;
                rays
            }
        };

        let signed = model
            .forward(rays)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| SceneError::TensorData(format!("{:?}", e)))?;
        self.preview = PreviewImage::from_signed(self.resolution, &signed)?;
        self.stats.forward_passes += 1;
        self.camera_dirty = false;
        self.model_dirty = false;
        Ok(())
    }

    pub fn preview(&self) -> &PreviewImage {
        &self.preview
    }

    pub fn stats(&self) -> ViewStats {
        self.stats
    }

    pub fn cached_pose(&self) -> Option<&CameraPose> {
        self.input.as_ref().map(|c| &c.pose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ImplicitModelConfig;

    type TestBackend = burn::backend::NdArray;

    fn model(seed: u64) -> ImplicitModel<TestBackend> {
        ImplicitModelConfig::default()
            .init(seed, &Default::default())
            .unwrap()
    }

    #[test]
    fn test_clean_cache_does_nothing() {
        let mut cache = ViewCache::<TestBackend>::new(4, 0.6911);
        let pose = CameraPose::orbit(0.0, 4.0).unwrap();
        assert!(!cache.refresh(&model(0), &pose).unwrap());
        assert_eq!(cache.stats(), ViewStats::default());
        assert_eq!(cache.preview(), &PreviewImage::blank(4));
    }

    #[test]
    fn test_model_change_reuses_rays() {
        let mut cache = ViewCache::<TestBackend>::new(4, 0.6911);
        let pose = CameraPose::orbit(0.0, 4.0).unwrap();

        cache.mark_dirty(RefreshReason::CameraMoved);
        assert!(cache.refresh(&model(0), &pose).unwrap());
        let first = cache.preview().clone();
        assert_eq!(cache.stats(), ViewStats { ray_fields: 1, forward_passes: 1 });

        cache.mark_dirty(RefreshReason::ModelAdvanced);
        assert!(cache.refresh(&model(1), &pose).unwrap());
        assert_eq!(cache.stats(), ViewStats { ray_fields: 1, forward_passes: 2 });
        assert_ne!(cache.preview(), &first);

        let moved = CameraPose::orbit(1.0, 4.0).unwrap();
        cache.mark_dirty(RefreshReason::CameraMoved);
        assert!(cache.refresh(&model(1), &moved).unwrap());
        assert_eq!(cache.stats(), ViewStats { ray_fields: 2, forward_passes: 3 });
        assert_eq!(cache.cached_pose(), Some(&moved));
        assert!(!cache.is_dirty());
    }

    #[test]
    fn test_model_change_with_new_pose_regenerates() {
        let mut cache = ViewCache::<TestBackend>::new(4, 0.6911);
        let net = model(0);
        cache
            .update_view(&net, &CameraPose::orbit(0.0, 4.0).unwrap(), false)
            .unwrap();

        let other = CameraPose::orbit(2.0, 4.0).unwrap();
        cache.mark_dirty(RefreshReason::ModelAdvanced);
        cache.refresh(&net, &other).unwrap();
        assert_eq!(cache.stats().ray_fields, 2);
        assert_eq!(cache.cached_pose(), Some(&other));
    }

    #[test]
    fn test_same_input_without_cache_generates() {
        let mut cache = ViewCache::<TestBackend>::new(3, 0.6911);
        let pose = CameraPose::orbit(0.5, 4.0).unwrap();
        cache.update_view(&model(2), &pose, true).unwrap();
        assert_eq!(cache.stats().ray_fields, 1);

        let preview = cache.preview();
        assert_eq!(preview.as_slice().len(), 3 * 3 * 4);
        assert!(preview.as_slice().iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_preview_rescaling() {
        let preview = PreviewImage::from_signed(1, &[-1.0, 0.0, 1.0, 3.0]).unwrap();
        assert_eq!(preview.pixel(0, 0), [0.0, 0.5, 1.0, 1.0]);
        assert_eq!(preview.to_rgba8(), vec![0, 128, 255, 255]);
        assert!(PreviewImage::from_signed(2, &[0.0; 4]).is_err());
    }
}
