//! Frame-driven scene session
//!
//! The orchestrating viewer owns one `SceneSession` and calls [`SceneSession::tick`]
//! once per frame. A tick runs at most one training step and then at most one
//! preview refresh, always in that order on the caller's thread.

use burn::module::AutodiffModule;
use burn::tensor::backend::AutodiffBackend;

use crate::camera::CameraPose;
use crate::dataset::{Dataset, TrainingExample};
use crate::error::{SceneError, SceneResult};
use crate::trainer::{StepOutcome, TrainConfig, Trainer};
use crate::view::{PreviewImage, RefreshReason, ViewCache, ViewStats};

/// Step budget of the current training burst
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrainingBurst {
    done: usize,
    budget: usize,
}

impl TrainingBurst {
    pub fn new(budget: usize) -> Self {
        Self { done: 0, budget }
    }

    pub fn is_running(&self) -> bool {
        self.done < self.budget
    }

    /// Fraction of the burst completed, 1.0 when idle
    pub fn progress(&self) -> f32 {
        if self.budget == 0 {
            1.0
        } else {
            self.done as f32 / self.budget as f32
        }
    }

    fn advance(&mut self) {
        self.done = (self.done + 1).min(self.budget);
    }
}

/// What happened during one tick
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TickReport {
    pub step: Option<StepOutcome>,
    /// The step produced non-finite values and was discarded
    pub diverged: bool,
    pub refreshed: bool,
}

pub struct SceneSession<B: AutodiffBackend> {
    dataset: Dataset,
    expected_examples: usize,
    trainer: Trainer<B>,
    view: ViewCache<B::InnerBackend>,
    burst: TrainingBurst,
    camera: Option<CameraPose>,
}

impl<B: AutodiffBackend> SceneSession<B> {
    /// `expected_examples` is the dataset size that must be registered before
    /// any training step runs.
    pub fn new(
        config: TrainConfig,
        half_fov_x: f32,
        expected_examples: usize,
        device: B::Device,
    ) -> SceneResult<Self> {
        let view = ViewCache::new(config.resolution, half_fov_x);
        let burst = TrainingBurst::new(config.burst_steps);
        Ok(Self {
            dataset: Dataset::new(half_fov_x),
            expected_examples,
            trainer: Trainer::new(config, device)?,
            view,
            burst,
            camera: None,
        })
    }

    /// Add a loaded example. Its target must match the working resolution.
    pub fn register(&mut self, example: TrainingExample) -> SceneResult<usize> {
        let expected = self.trainer.config().resolution;
        let actual = example.target().resolution();
        if actual != expected {
            return Err(SceneError::ResolutionMismatch { expected, actual });
        }

        let index = self.dataset.push(example);
        if self.is_ready() && self.dataset.len() == self.expected_examples {
            tracing::info!("Dataset complete: {} examples", self.dataset.len());
        }
        Ok(index)
    }

    /// Training is only allowed once every expected example is registered.
    pub fn is_ready(&self) -> bool {
        self.expected_examples > 0 && self.dataset.len() >= self.expected_examples
    }

    pub fn start_burst(&mut self, steps: usize) {
        self.burst = TrainingBurst::new(steps);
    }

    /// Start a burst of the configured long length.
    pub fn start_long_burst(&mut self) {
        self.start_burst(self.trainer.config().long_burst_steps);
    }

    pub fn burst(&self) -> TrainingBurst {
        self.burst
    }

    pub fn burst_progress(&self) -> f32 {
        self.burst.progress()
    }

    /// Advance one frame with the viewer's current camera.
    pub fn tick(&mut self, camera: &CameraPose) -> SceneResult<TickReport> {
        let mut report = TickReport::default();

        if self.camera.as_ref() != Some(camera) {
            self.view.mark_dirty(RefreshReason::CameraMoved);
            self.camera = Some(*camera);
        }

        if self.is_ready() && self.burst.is_running() {
            match self.trainer.train_step(&self.dataset) {
                Ok(outcome) => {
                    if let StepOutcome::Trained { .. } = outcome {
                        self.view.mark_dirty(RefreshReason::ModelAdvanced);
                    }
                    report.step = Some(outcome);
                }
                Err(SceneError::NumericDivergence { step }) => {
                    tracing::warn!("Training step {} diverged and was discarded", step);
                    report.diverged = true;
                }
                Err(e) => return Err(e),
            }
            self.burst.advance();
        }

        if self.view.is_dirty() {
            let model = self.trainer.model().valid();
            report.refreshed = self.view.refresh(&model, camera)?;
        }

        Ok(report)
    }

    /// Force a preview render, optionally reusing the cached ray field.
    ///
    /// The session tracks the pose the preview was rendered from, so a reused
    /// ray field from another pose leaves the next `tick` to re-render.
    pub fn update_view(&mut self, camera: &CameraPose, same_input: bool) -> SceneResult<()> {
        let model = self.trainer.model().valid();
        self.view.update_view(&model, camera, same_input)?;
        self.camera = self.view.cached_pose().copied();
        Ok(())
    }

    /// Discard the model and optimizer state and start from `seed`.
    pub fn reset_model(&mut self, seed: u64) -> SceneResult<()> {
        self.trainer.reset(seed)?;
        self.view.mark_dirty(RefreshReason::ModelAdvanced);
        Ok(())
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn expected_examples(&self) -> usize {
        self.expected_examples
    }

    pub fn trainer(&self) -> &Trainer<B> {
        &self.trainer
    }

    pub fn preview(&self) -> &PreviewImage {
        self.view.preview()
    }

    pub fn view_stats(&self) -> ViewStats {
        self.view.stats()
    }
}
