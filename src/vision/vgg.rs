//! VGG convolutional backbones used as feature extractors.
//!
//! Only the `features` part of the networks is built, the classifier head is
//! never needed to compare activations. Variable names follow the torchvision
//! layout so that the pre-trained weights can be loaded directly, extra
//! classifier weights in the file are ignored:
//! <https://github.com/LaurentMazare/tch-rs/releases/download/mw/vgg16.ot>
//! <https://github.com/LaurentMazare/tch-rs/releases/download/mw/vgg19.ot>
//!
//! Every layer has a name, `conv{block}_{i}`, `relu{block}_{i}` or
//! `pool{block}`, blocks and convolutions being counted from 1.
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tch::{nn, nn::Conv2D, nn::Module, Device, Tensor};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backbone {
    Vgg16,
    #[default]
    Vgg19,
}

impl Backbone {
    // Each list element contains multiple convolutions with some specified number
    // of features followed by a single pooling layer.
    fn blocks(self) -> Vec<Vec<i64>> {
        match self {
            Backbone::Vgg16 => vec![
                vec![64, 64],
                vec![128, 128],
                vec![256, 256, 256],
                vec![512, 512, 512],
                vec![512, 512, 512],
            ],
            Backbone::Vgg19 => vec![
                vec![64, 64],
                vec![128, 128],
                vec![256, 256, 256, 256],
                vec![512, 512, 512, 512],
                vec![512, 512, 512, 512],
            ],
        }
    }
}

impl fmt::Display for Backbone {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Backbone::Vgg16 => write!(f, "vgg16"),
            Backbone::Vgg19 => write!(f, "vgg19"),
        }
    }
}

/// Downsampling used between blocks. The pre-trained networks use max-pooling,
/// average-pooling tends to give smoother gradients to the generated image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pooling {
    #[default]
    Max,
    Avg,
}

#[derive(Debug)]
enum Layer {
    Conv(Conv2D),
    Relu,
    Pool(Pooling),
}

impl Module for Layer {
    fn forward(&self, xs: &Tensor) -> Tensor {
        match self {
            Layer::Conv(conv) => xs.apply(conv),
            Layer::Relu => xs.relu(),
            Layer::Pool(Pooling::Max) => xs.max_pool2d_default(2),
            Layer::Pool(Pooling::Avg) => xs.avg_pool2d_default(2),
        }
    }
}

fn conv2d(p: nn::Path, c_in: i64, c_out: i64) -> Conv2D {
    let conv2d_cfg = nn::ConvConfig { stride: 1, padding: 1, ..Default::default() };
    nn::conv2d(p, c_in, c_out, 3, conv2d_cfg)
}

/// The convolutional part of a VGG network with named layers.
#[derive(Debug)]
pub struct Vgg {
    backbone: Backbone,
    layers: Vec<(String, Layer)>,
}

impl Vgg {
    pub fn new(p: &nn::Path, backbone: Backbone, pooling: Pooling) -> Vgg {
        let f = p / "features";
        let mut layers = vec![];
        let mut c_in = 3;
        for (block_idx, channels) in backbone.blocks().into_iter().enumerate() {
            let block = block_idx + 1;
            for (conv_idx, &c_out) in channels.iter().enumerate() {
                let l = layers.len();
                let conv = conv2d(&f / &l.to_string(), c_in, c_out);
                layers.push((format!("conv{block}_{}", conv_idx + 1), Layer::Conv(conv)));
                layers.push((format!("relu{block}_{}", conv_idx + 1), Layer::Relu));
                c_in = c_out;
            }
            layers.push((format!("pool{block}"), Layer::Pool(pooling)));
        }
        Vgg { backbone, layers }
    }

    /// Builds the backbone and loads pre-trained weights into it. The weights
    /// are frozen, gradients only flow back to the input.
    pub fn pretrained<T: AsRef<Path>>(
        weights: T,
        backbone: Backbone,
        pooling: Pooling,
        device: Device,
    ) -> Result<Vgg> {
        let weights = weights.as_ref();
        let mut vs = nn::VarStore::new(device);
        let net = Vgg::new(&vs.root(), backbone, pooling);
        vs.load(weights)
            .map_err(|e| Error::from(e).path_context(&weights.display().to_string()))?;
        vs.freeze();
        tracing::info!(?backbone, ?pooling, weights = %weights.display(), "loaded network");
        Ok(net)
    }

    pub fn backbone(&self) -> Backbone {
        self.backbone
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Layer names in forward order.
    pub fn layer_names(&self) -> impl Iterator<Item = &str> {
        self.layers.iter().map(|(name, _)| name.as_str())
    }

    /// Resolves a layer name to its position in the forward pass.
    pub fn layer_index(&self, name: &str) -> Result<usize> {
        self.layers.iter().position(|(n, _)| n == name).ok_or_else(|| Error::UnknownLayer {
            name: name.to_string(),
            backbone: self.backbone.to_string(),
        })
    }

    /// Runs the forward pass up to the deepest requested layer and returns the
    /// activations of the requested layers, in request order.
    pub fn forward_layers(&self, xs: &Tensor, indexes: &[usize]) -> Result<Vec<Tensor>> {
        let depth = match indexes.iter().max() {
            None => return Ok(vec![]),
            Some(&max) if max >= self.layers.len() => {
                return Err(Error::Shape(format!(
                    "layer {max} requested, {} only has {} layers",
                    self.backbone,
                    self.layers.len()
                )))
            }
            Some(&max) => max + 1,
        };
        let mut outputs = Vec::with_capacity(depth);
        let mut xs = xs.shallow_clone();
        for (_, layer) in self.layers.iter().take(depth) {
            xs = layer.forward(&xs);
            outputs.push(xs.shallow_clone());
        }
        Ok(indexes.iter().map(|&i| outputs[i].shallow_clone()).collect())
    }

    /// Same as [`Vgg::forward_layers`] but with layer names.
    pub fn features<S: AsRef<str>>(&self, xs: &Tensor, names: &[S]) -> Result<Vec<Tensor>> {
        let indexes =
            names.iter().map(|n| self.layer_index(n.as_ref())).collect::<Result<Vec<_>>>()?;
        self.forward_layers(xs, &indexes)
    }
}

impl Module for Vgg {
    fn forward(&self, xs: &Tensor) -> Tensor {
        self.layers.iter().fold(xs.shallow_clone(), |xs, (_, layer)| layer.forward(&xs))
    }
}

pub fn vgg16(p: &nn::Path, pooling: Pooling) -> Vgg {
    Vgg::new(p, Backbone::Vgg16, pooling)
}

pub fn vgg19(p: &nn::Path, pooling: Pooling) -> Vgg {
    Vgg::new(p, Backbone::Vgg19, pooling)
}
