//! Parameters of a style transfer run.
//!
//! A [`StyleConfig`] can be built in code, starting from the defaults, or read
//! from a json file where every field is optional:
//!
//! ```json
//! {
//!   "backbone": "vgg16",
//!   "style_layers": [{ "name": "conv1_1", "weight": 1.0 }, { "name": "conv3_1", "weight": 0.5 }],
//!   "steps": 500
//! }
//! ```
use std::path::Path;

use serde::{Deserialize, Serialize};
use tch::nn::{self, OptimizerConfig};

use crate::error::{Error, Result};
use crate::vision::vgg::{Backbone, Pooling};

/// How the generated image is initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitMode {
    /// Start from a copy of the content image.
    #[default]
    Content,
    /// Start from gaussian noise in the normalized space. The global
    /// libtorch generator is reseeded with [`StyleConfig::seed`] when the
    /// transfer is built.
    Noise,
    /// Start from the mean ImageNet colour.
    Blank,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    #[default]
    Adam,
    Sgd,
    RmsProp,
}

impl OptimizerKind {
    pub fn build(self, vs: &nn::VarStore, lr: f64) -> Result<nn::Optimizer> {
        let opt = match self {
            OptimizerKind::Adam => nn::Adam::default().build(vs, lr)?,
            OptimizerKind::Sgd => nn::Sgd { momentum: 0.9, ..Default::default() }.build(vs, lr)?,
            OptimizerKind::RmsProp => nn::RmsProp::default().build(vs, lr)?,
        };
        Ok(opt)
    }
}

/// A layer whose Gram matrix is matched, with its relative weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleLayer {
    pub name: String,
    pub weight: f64,
}

impl StyleLayer {
    pub fn new(name: &str, weight: f64) -> Self {
        StyleLayer { name: name.to_string(), weight }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StyleConfig {
    pub backbone: Backbone,
    pub pooling: Pooling,
    pub content_layer: String,
    pub style_layers: Vec<StyleLayer>,
    pub content_weight: f64,
    pub style_weight: f64,
    pub tv_weight: f64,
    pub learning_rate: f64,
    pub steps: usize,
    pub optimizer: OptimizerKind,
    pub init: InitMode,
    /// Seed for the noise initialization, passed to `tch::manual_seed` so it
    /// resets the random stream of the whole process.
    pub seed: i64,
    /// Report the losses and save intermediate images every n steps.
    pub checkpoint_every: Option<usize>,
    /// Longest side of the content image, larger images are downscaled.
    pub max_size: Option<u32>,
}

impl Default for StyleConfig {
    fn default() -> Self {
        StyleConfig {
            backbone: Backbone::Vgg19,
            pooling: Pooling::Max,
            content_layer: "conv4_2".to_string(),
            style_layers: vec![
                StyleLayer::new("conv1_1", 1.0),
                StyleLayer::new("conv2_1", 0.75),
                StyleLayer::new("conv3_1", 0.2),
                StyleLayer::new("conv4_1", 0.2),
                StyleLayer::new("conv5_1", 0.2),
            ],
            content_weight: 1.0,
            style_weight: 1e6,
            tv_weight: 1e-2,
            learning_rate: 5e-2,
            steps: 2000,
            optimizer: OptimizerKind::Adam,
            init: InitMode::Content,
            seed: 42,
            checkpoint_every: Some(500),
            max_size: Some(512),
        }
    }
}

fn check_weight(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0. {
        Ok(())
    } else {
        Err(Error::Config(format!("{name} should be a finite non-negative number, got {value}")))
    }
}

impl StyleConfig {
    /// Reads a json config, missing fields take their default value.
    pub fn from_file<T: AsRef<Path>>(path: T) -> Result<Self> {
        let path = path.as_ref();
        let read = || -> Result<Self> {
            let contents = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&contents)?)
        };
        let config = read().map_err(|e| e.path_context(&path.display().to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the values that do not depend on the network. Layer names are
    /// resolved when the transfer is built.
    pub fn validate(&self) -> Result<()> {
        if self.steps == 0 {
            return Err(Error::Config("steps should be positive".to_string()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.) {
            return Err(Error::Config(format!(
                "learning_rate should be positive, got {}",
                self.learning_rate
            )));
        }
        check_weight("content_weight", self.content_weight)?;
        check_weight("style_weight", self.style_weight)?;
        check_weight("tv_weight", self.tv_weight)?;
        if self.style_layers.is_empty() {
            return Err(Error::Config("at least one style layer is required".to_string()));
        }
        for layer in self.style_layers.iter() {
            check_weight(&format!("weight of {}", layer.name), layer.weight)?;
        }
        if self.checkpoint_every == Some(0) {
            return Err(Error::Config("checkpoint_every should be positive".to_string()));
        }
        if self.max_size == Some(0) {
            return Err(Error::Config("max_size should be positive".to_string()));
        }
        Ok(())
    }

    pub fn style_layer_names(&self) -> Vec<&str> {
        self.style_layers.iter().map(|l| l.name.as_str()).collect()
    }
}
