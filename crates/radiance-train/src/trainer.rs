//! Online training: one randomly sampled image per step

use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::camera::DEFAULT_POSE_TOLERANCE;
use crate::dataset::{Dataset, TrainingExample};
use crate::error::{SceneError, SceneResult};
use crate::loss::mse_loss;
use crate::model::{ImplicitModel, ImplicitModelConfig};
use crate::rays::RayField;

/// Keeps the example sampler's stream apart from the weight initializer's.
const SAMPLER_STREAM: u64 = 0x5eed_5a3b_1e00_0001;

/// Training configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub learning_rate: f64,
    /// Side length of training and preview images
    pub resolution: usize,
    pub beta_1: f32,
    pub beta_2: f32,
    pub epsilon: f32,
    pub seed: u64,
    pub model: ImplicitModelConfig,
    /// Steps in a regular training burst
    pub burst_steps: usize,
    /// Steps in a long training burst
    pub long_burst_steps: usize,
    pub log_interval: usize,
    /// Orthonormality tolerance for poses read from metadata
    pub pose_tolerance: f32,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            resolution: 64,
            beta_1: 0.9,
            beta_2: 0.999,
            epsilon: 1e-7,
            seed: 0,
            model: ImplicitModelConfig::default(),
            burst_steps: 100,
            long_burst_steps: 1000,
            log_interval: 50,
            pose_tolerance: DEFAULT_POSE_TOLERANCE,
        }
    }
}

/// Result of a call to [`Trainer::train_step`]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StepOutcome {
    /// No examples registered yet
    Skipped,
    Trained {
        step: usize,
        example: usize,
        loss: f32,
    },
}

/// Object-safe view of a burn optimizer over the scene model.
trait ParamUpdate<B: AutodiffBackend> {
    /// Apply one update, remembering the optimizer state it started from.
    fn update(
        &mut self,
        learning_rate: f64,
        model: ImplicitModel<B>,
        grads: GradientsParams,
    ) -> ImplicitModel<B>;

    /// Return to the state saved by the last `update`.
    fn rollback(self: Box<Self>) -> Box<dyn ParamUpdate<B>>;
}

/// Optimizer plus its state from before the latest update
struct Checkpointed<O, R> {
    optim: O,
    saved: Option<R>,
}

impl<B, O, R> ParamUpdate<B> for Checkpointed<O, R>
where
    B: AutodiffBackend,
    O: Optimizer<ImplicitModel<B>, B, Record = R> + 'static,
    R: 'static,
{
    fn update(
        &mut self,
        learning_rate: f64,
        model: ImplicitModel<B>,
        grads: GradientsParams,
    ) -> ImplicitModel<B> {
        self.saved = Some(self.optim.to_record());
        self.optim.step(learning_rate, model, grads)
    }

    fn rollback(self: Box<Self>) -> Box<dyn ParamUpdate<B>> {
        let Checkpointed { optim, saved } = *self;
        let optim = match saved {
            Some(record) => optim.load_record(record),
            None => optim,
        };
        Box::new(Checkpointed { optim, saved: None })
    }
}

fn adam<B: AutodiffBackend>(config: &TrainConfig) -> Box<dyn ParamUpdate<B>> {
    Box::new(Checkpointed {
        optim: AdamConfig::new()
            .with_beta_1(config.beta_1)
            .with_beta_2(config.beta_2)
            .with_epsilon(config.epsilon)
            .init::<B, ImplicitModel<B>>(),
        saved: None,
    })
}

/// Owns the model and its Adam state.
pub struct Trainer<B: AutodiffBackend> {
    config: TrainConfig,
    device: B::Device,
    model: ImplicitModel<B>,
    optim: Box<dyn ParamUpdate<B>>,
    rng: StdRng,
    steps: usize,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(config: TrainConfig, device: B::Device) -> SceneResult<Self> {
        if config.resolution == 0 {
            return Err(SceneError::InvalidResolution(0));
        }
        let model = config.model.init::<B>(config.seed, &device)?;
        tracing::info!(
            "Initialized scene model: {} parameters, widths {:?}",
            model.num_params(),
            config.model.hidden_widths
        );

        Ok(Self {
            optim: adam(&config),
            rng: StdRng::seed_from_u64(config.seed ^ SAMPLER_STREAM),
            model,
            config,
            device,
            steps: 0,
        })
    }

    /// Run one Adam update on one uniformly sampled example.
    ///
    /// Does nothing when the dataset is empty. If the loss or the updated
    /// parameters are not finite, the model and the Adam moments are left as
    /// they were before the step and `NumericDivergence` is returned.
    pub fn train_step(&mut self, dataset: &Dataset) -> SceneResult<StepOutcome> {
        if dataset.is_empty() {
            return Ok(StepOutcome::Skipped);
        }

        let index = self.rng.gen_range(0..dataset.len());
        let example = &dataset.examples()[index];
        self.check_resolution(example)?;

        let field = RayField::generate(
            example.pose(),
            dataset.half_fov_x(),
            self.config.resolution,
            Some(&mut self.rng as &mut dyn RngCore),
        )?;
        let input = field.to_tensor::<B>(&self.device);
        let target = example.target().to_tensor::<B>(&self.device);

        let loss = mse_loss(self.model.forward(input), target);
        let loss_value = loss.clone().into_scalar().elem::<f32>();
        if !loss_value.is_finite() {
            tracing::warn!("Non-finite loss on example {}, skipping update", index);
            return Err(SceneError::NumericDivergence {
                step: self.steps + 1,
            });
        }

        let grads = GradientsParams::from_grads(loss.backward(), &self.model);
        let updated = self
            .optim
            .update(self.config.learning_rate, self.model.clone(), grads);

        if !updated.all_finite() {
            tracing::warn!(
                "Non-finite parameters after step {}, rolling back",
                self.steps + 1
            );
            let optim = std::mem::replace(&mut self.optim, adam(&self.config));
            self.optim = optim.rollback();
            return Err(SceneError::NumericDivergence {
                step: self.steps + 1,
            });
        }

        self.model = updated;
        self.steps += 1;

        if self.config.log_interval > 0 && self.steps % self.config.log_interval == 0 {
            tracing::debug!(
                "step {} example {} loss {:.5}",
                self.steps,
                index,
                loss_value
            );
        }

        Ok(StepOutcome::Trained {
            step: self.steps,
            example: index,
            loss: loss_value,
        })
    }

    /// Unjittered MSE of the current model on one example.
    pub fn evaluate(&self, example: &TrainingExample, half_fov_x: f32) -> SceneResult<f32> {
        self.check_resolution(example)?;
        let model = self.model.valid();
        let device = model.device();
        let field = RayField::generate(example.pose(), half_fov_x, self.config.resolution, None)?;
        let loss = mse_loss(
            model.predict(&field),
            example.target().to_tensor(&device),
        );
        Ok(loss.into_scalar().elem::<f32>())
    }

    /// Replace the model and optimizer with freshly initialized ones.
    pub fn reset(&mut self, seed: u64) -> SceneResult<()> {
        let model = self.config.model.init::<B>(seed, &self.device)?;
        self.model = model;
        self.optim = adam(&self.config);
        self.steps = 0;
        tracing::info!("Scene model reset (seed {})", seed);
        Ok(())
    }

    fn check_resolution(&self, example: &TrainingExample) -> SceneResult<()> {
        let actual = example.target().resolution();
        if actual != self.config.resolution {
            return Err(SceneError::ResolutionMismatch {
                expected: self.config.resolution,
                actual,
            });
        }
        Ok(())
    }

    pub fn model(&self) -> &ImplicitModel<B> {
        &self.model
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Successful optimizer steps since construction or the last reset
    pub fn steps(&self) -> usize {
        self.steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraPose;
    use crate::dataset::TargetImage;
    use glam::Vec3;

    type TestBackend = burn::backend::Autodiff<burn::backend::NdArray>;

    const HALF_FOV: f32 = 0.6911;

    fn small_config() -> TrainConfig {
        TrainConfig {
            resolution: 8,
            seed: 5,
            ..Default::default()
        }
    }

    fn flat_dataset(resolution: usize) -> Dataset {
        let pose = CameraPose::look_at(Vec3::new(0.0, -3.0, 2.5), Vec3::ZERO, Vec3::Z).unwrap();
        let mut dataset = Dataset::new(HALF_FOV);
        dataset.push(TrainingExample::new(
            pose,
            TargetImage::filled(resolution, [0.5, -0.25, 0.1, 0.8]),
        ));
        dataset
    }

    fn predictions(trainer: &Trainer<TestBackend>, pose: &CameraPose) -> Vec<f32> {
        let field = RayField::generate(pose, HALF_FOV, trainer.config().resolution, None).unwrap();
        trainer
            .model()
            .valid()
            .predict(&field)
            .into_data()
            .to_vec::<f32>()
            .unwrap()
    }

    #[test]
    fn test_empty_dataset_is_noop() {
        let mut trainer = Trainer::<TestBackend>::new(small_config(), Default::default()).unwrap();
        let outcome = trainer.train_step(&Dataset::new(HALF_FOV)).unwrap();
        assert_eq!(outcome, StepOutcome::Skipped);
        assert_eq!(trainer.steps(), 0);
    }

    #[test]
    fn test_flat_target_converges() {
        let dataset = flat_dataset(8);
        let example = &dataset.examples()[0];
        let mut trainer = Trainer::<TestBackend>::new(small_config(), Default::default()).unwrap();

        trainer.train_step(&dataset).unwrap();
        let after_one = trainer.evaluate(example, HALF_FOV).unwrap();
        for _ in 1..500 {
            trainer.train_step(&dataset).unwrap();
        }
        let after_many = trainer.evaluate(example, HALF_FOV).unwrap();

        assert_eq!(trainer.steps(), 500);
        assert!(
            after_many < 0.1 * after_one,
            "loss went from {} to {}",
            after_one,
            after_many
        );
    }

    #[test]
    fn test_step_reports_loss() {
        let dataset = flat_dataset(8);
        let mut trainer = Trainer::<TestBackend>::new(small_config(), Default::default()).unwrap();
        match trainer.train_step(&dataset).unwrap() {
            StepOutcome::Trained { step, example, loss } => {
                assert_eq!(step, 1);
                assert_eq!(example, 0);
                assert!(loss.is_finite() && loss > 0.0);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_samples_every_example() {
        let mut dataset = Dataset::new(HALF_FOV);
        for t in [0.0f32, 2.0] {
            dataset.push(TrainingExample::new(
                CameraPose::orbit(t, 4.0).unwrap(),
                TargetImage::filled(8, [0.0; 4]),
            ));
        }
        let mut trainer = Trainer::<TestBackend>::new(small_config(), Default::default()).unwrap();
        let mut seen = [0usize; 2];
        for _ in 0..60 {
            if let StepOutcome::Trained { example, .. } = trainer.train_step(&dataset).unwrap() {
                seen[example] += 1;
            }
        }
        assert!(seen[0] > 0 && seen[1] > 0, "{:?}", seen);
    }

    #[test]
    fn test_rejects_wrong_target_resolution() {
        let dataset = flat_dataset(4);
        let mut trainer = Trainer::<TestBackend>::new(small_config(), Default::default()).unwrap();
        assert_eq!(
            trainer.train_step(&dataset),
            Err(SceneError::ResolutionMismatch {
                expected: 8,
                actual: 4
            })
        );
    }

    #[test]
    fn test_divergent_update_is_discarded() {
        let config = TrainConfig {
            learning_rate: f64::INFINITY,
            ..small_config()
        };
        let dataset = flat_dataset(8);
        let pose = *dataset.examples()[0].pose();
        let mut trainer = Trainer::<TestBackend>::new(config, Default::default()).unwrap();
        let before = predictions(&trainer, &pose);

        let result = trainer.train_step(&dataset);
        assert_eq!(result, Err(SceneError::NumericDivergence { step: 1 }));
        assert_eq!(trainer.steps(), 0);
        assert!(trainer.model().all_finite());
        assert_eq!(predictions(&trainer, &pose), before);
    }

    #[test]
    fn test_divergent_update_keeps_optimizer_state() {
        let dataset = flat_dataset(8);
        let pose = *dataset.examples()[0].pose();
        let mut steady = Trainer::<TestBackend>::new(small_config(), Default::default()).unwrap();
        let mut bumped = Trainer::<TestBackend>::new(small_config(), Default::default()).unwrap();
        for _ in 0..5 {
            steady.train_step(&dataset).unwrap();
            bumped.train_step(&dataset).unwrap();
        }

        bumped.config.learning_rate = f64::INFINITY;
        assert_eq!(
            bumped.train_step(&dataset),
            Err(SceneError::NumericDivergence { step: 6 })
        );
        bumped.config.learning_rate = steady.config.learning_rate;
        bumped.rng = steady.rng.clone();

        // with the Adam moments intact, the next update matches the undisturbed run
        steady.train_step(&dataset).unwrap();
        bumped.train_step(&dataset).unwrap();
        assert_eq!(bumped.steps(), 6);
        for (a, b) in predictions(&steady, &pose)
            .iter()
            .zip(predictions(&bumped, &pose).iter())
        {
            assert!((a - b).abs() < 1e-6, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_non_finite_loss_skips_update() {
        let pose = CameraPose::look_at(Vec3::new(0.0, -3.0, 2.5), Vec3::ZERO, Vec3::Z).unwrap();
        let mut dataset = Dataset::new(HALF_FOV);
        dataset.push(TrainingExample::new(
            pose,
            TargetImage::filled(8, [f32::NAN; 4]),
        ));
        let mut trainer = Trainer::<TestBackend>::new(small_config(), Default::default()).unwrap();
        let before = predictions(&trainer, &pose);

        assert_eq!(
            trainer.train_step(&dataset),
            Err(SceneError::NumericDivergence { step: 1 })
        );
        assert_eq!(trainer.steps(), 0);
        assert!(trainer.model().all_finite());
        assert_eq!(predictions(&trainer, &pose), before);
    }

    #[test]
    fn test_reset_discards_learned_state() {
        let dataset = flat_dataset(8);
        let pose = *dataset.examples()[0].pose();
        let mut trainer = Trainer::<TestBackend>::new(small_config(), Default::default()).unwrap();
        for _ in 0..20 {
            trainer.train_step(&dataset).unwrap();
        }
        let before = predictions(&trainer, &pose);

        trainer.reset(99).unwrap();
        assert_eq!(trainer.steps(), 0);
        let after = predictions(&trainer, &pose);

        let max_diff = before
            .iter()
            .zip(after.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        assert!(max_diff > 1e-2, "reset model reproduced old outputs");

        // the fresh model is the seed-99 model, untouched by earlier training
        let fresh = ImplicitModelConfig::default()
            .init::<burn::backend::NdArray>(99, &Default::default())
            .unwrap();
        let field = RayField::generate(&pose, HALF_FOV, 8, None).unwrap();
        let expected = fresh.predict(&field).into_data().to_vec::<f32>().unwrap();
        for (a, b) in after.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }
}
