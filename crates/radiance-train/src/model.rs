//! Sine-activated coordinate network
//!
//! Every pixel of a ray field goes through the same dense stack, so the whole
//! field is evaluated as one `[pixels, 6]` batch.

use burn::module::{Ignored, Module, Param};
use burn::nn::{Initializer, Linear, LinearConfig};
use burn::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

use crate::error::{SceneError, SceneResult};
use crate::rays::{RayField, RAY_FEATURES};

/// Allowed range for the first layer's weight bound
const FIRST_LAYER_LIMIT_RANGE: (f32, f32) = (1.5, 2.0);

/// Nonlinearity applied after a dense layer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationKind {
    Sine,
    Tanh,
    Identity,
}

impl ActivationKind {
    pub fn apply<B: Backend, const D: usize>(self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            ActivationKind::Sine => x.sin(),
            ActivationKind::Tanh => x.tanh(),
            ActivationKind::Identity => x,
        }
    }
}

/// Network shape and initialization bounds
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImplicitModelConfig {
    pub hidden_widths: Vec<usize>,
    pub output_channels: usize,
    /// First-layer weights are drawn from `U[-limit, limit]`; this sets the
    /// frequency range the first sine layer responds to.
    pub first_layer_limit: f32,
}

impl Default for ImplicitModelConfig {
    fn default() -> Self {
        Self {
            hidden_widths: vec![32, 64, 32],
            output_channels: 4,
            first_layer_limit: 1.5,
        }
    }
}

impl ImplicitModelConfig {
    pub fn validate(&self) -> SceneResult<()> {
        let (lo, hi) = FIRST_LAYER_LIMIT_RANGE;
        if !(lo..=hi).contains(&self.first_layer_limit) {
            return Err(SceneError::InvalidConfig(format!(
                "first_layer_limit {} outside [{}, {}]",
                self.first_layer_limit, lo, hi
            )));
        }
        if self.hidden_widths.is_empty() || self.hidden_widths.contains(&0) {
            return Err(SceneError::InvalidConfig(format!(
                "hidden widths must be non-empty and positive, got {:?}",
                self.hidden_widths
            )));
        }
        if self.output_channels == 0 {
            return Err(SceneError::InvalidConfig("no output channels".to_string()));
        }
        Ok(())
    }

    /// Build a freshly initialized model.
    ///
    /// - first layer weights: `U[-first_layer_limit, first_layer_limit]`
    /// - later weights: He-uniform, `U[-sqrt(6 / fan_in), sqrt(6 / fan_in)]`
    /// - every bias: `U[-π, π]`, so the sine units start at varied phases
    ///
    /// The same `seed` always yields the same parameters.
    pub fn init<B: Backend>(&self, seed: u64, device: &B::Device) -> SceneResult<ImplicitModel<B>> {
        self.validate()?;

        let mut rng = StdRng::seed_from_u64(seed);
        let mut layers = Vec::with_capacity(self.hidden_widths.len() + 1);
        let mut activations = Vec::with_capacity(self.hidden_widths.len() + 1);

        let mut fan_in = RAY_FEATURES;
        for (i, &width) in self.hidden_widths.iter().enumerate() {
            let limit = if i == 0 {
                self.first_layer_limit
            } else {
                he_uniform_limit(fan_in)
            };
            layers.push(dense_layer(&mut rng, fan_in, width, limit, device));
            activations.push(ActivationKind::Sine);
            fan_in = width;
        }

        layers.push(dense_layer(
            &mut rng,
            fan_in,
            self.output_channels,
            he_uniform_limit(fan_in),
            device,
        ));
        activations.push(ActivationKind::Tanh);

        Ok(ImplicitModel {
            layers,
            activations: Ignored(activations),
        })
    }
}

fn he_uniform_limit(fan_in: usize) -> f32 {
    (6.0 / fan_in as f32).sqrt()
}

fn dense_layer<B: Backend>(
    rng: &mut StdRng,
    fan_in: usize,
    fan_out: usize,
    weight_limit: f32,
    device: &B::Device,
) -> Linear<B> {
    let weights: Vec<f32> = (0..fan_in * fan_out)
        .map(|_| rng.gen_range(-weight_limit..=weight_limit))
        .collect();
    let biases: Vec<f32> = (0..fan_out).map(|_| rng.gen_range(-PI..=PI)).collect();

    let mut linear = LinearConfig::new(fan_in, fan_out)
        .with_initializer(Initializer::Zeros)
        .init(device);
    linear.weight = Param::from_tensor(Tensor::from_data(
        TensorData::new(weights, [fan_in, fan_out]),
        device,
    ));
    linear.bias = Some(Param::from_tensor(Tensor::from_data(
        TensorData::new(biases, [fan_out]),
        device,
    )));
    linear
}

/// Dense layers with one explicit activation each
#[derive(Module, Debug)]
pub struct ImplicitModel<B: Backend> {
    layers: Vec<Linear<B>>,
    activations: Ignored<Vec<ActivationKind>>,
}

impl<B: Backend> ImplicitModel<B> {
    /// `[N, 6]` ray records to `[N, channels]` predictions in `[-1, 1]`.
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        self.layers
            .iter()
            .zip(self.activations.iter())
            .fold(input, |x, (layer, activation)| activation.apply(layer.forward(x)))
    }

    /// Evaluate a whole ray field; row order matches the field.
    pub fn predict(&self, field: &RayField) -> Tensor<B, 2> {
        self.forward(field.to_tensor(&self.device()))
    }

    pub fn layers(&self) -> &[Linear<B>] {
        &self.layers
    }

    pub fn activations(&self) -> &[ActivationKind] {
        &self.activations
    }

    pub fn device(&self) -> B::Device {
        self.layers[0].weight.val().device()
    }

    /// False if any weight or bias is NaN or infinite.
    pub fn all_finite(&self) -> bool {
        self.layers.iter().all(|layer| {
            let weights_ok = tensor_is_finite(layer.weight.val());
            let bias_ok = layer
                .bias
                .as_ref()
                .map(|bias| tensor_is_finite(bias.val()))
                .unwrap_or(true);
            weights_ok && bias_ok
        })
    }
}

fn tensor_is_finite<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> bool {
    let nan = tensor.clone().is_nan().any().int();
    let inf = tensor.abs().equal_elem(f32::INFINITY).any().int();
    (nan + inf).into_scalar().elem::<i64>() == 0
}
