//! Neural style transfer on top of libtorch.
//!
//! A generated image is optimized so that its VGG activations match the
//! activations of a content image at one layer and the Gram matrices of a
//! style image at several layers, a total-variation penalty keeps the result
//! smooth.
//!
//! ```no_run
//! use tch_style::{vision::image, vision::vgg::Vgg, StyleConfig, StyleTransfer};
//!
//! # fn main() -> tch_style::Result<()> {
//! let config = StyleConfig::default();
//! let device = tch::Device::cuda_if_available();
//! let net = Vgg::pretrained("vgg19.ot", config.backbone, config.pooling, device)?;
//! let content = image::load("content.jpg", config.max_size)?.to_device(device);
//! let (_, _, h, w) = content.size4()?;
//! let style = image::load_resized("style.jpg", w, h)?;
//! let mut transfer = StyleTransfer::new(&net, &content, &style, config)?;
//! transfer.run(|_, _, _| Ok(()))?;
//! image::save(&transfer.image()?, "out.png")?;
//! # Ok(())
//! # }
//! ```
pub mod config;
pub use config::{InitMode, OptimizerKind, StyleConfig, StyleLayer};

mod error;
pub use error::{Error, Result};

pub mod loss;
pub use loss::LossBreakdown;

mod transfer;
pub use transfer::StyleTransfer;

pub mod vision;
