// This is inspired by the Neural Style tutorial from PyTorch.org
//   https://pytorch.org/tutorials/advanced/neural_style_tutorial.html
// The pre-trained weights for the VGG models can be downloaded from:
//   https://github.com/LaurentMazare/tch-rs/releases/download/mw/vgg16.ot
//   https://github.com/LaurentMazare/tch-rs/releases/download/mw/vgg19.ot
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tch::Device;
use tch_style::vision::image;
use tch_style::vision::vgg::{Backbone, Pooling, Vgg};
use tch_style::{InitMode, StyleConfig, StyleTransfer};

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum BackboneArg {
    Vgg16,
    Vgg19,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum PoolingArg {
    Max,
    Avg,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum InitArg {
    Content,
    Noise,
    Blank,
}

#[derive(clap::Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The image whose content is preserved.
    content: PathBuf,

    /// The image whose style is transferred.
    style: PathBuf,

    /// The pre-trained VGG weights, e.g. vgg19.ot.
    weights: PathBuf,

    /// Where to write the generated image.
    #[arg(long, short, default_value = "out.png")]
    output: PathBuf,

    /// A json file with the run parameters, flags take precedence.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for the intermediate images.
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,

    /// Run on CPU rather than on GPU.
    #[arg(long)]
    cpu: bool,

    #[arg(long, value_enum)]
    backbone: Option<BackboneArg>,

    #[arg(long, value_enum)]
    pooling: Option<PoolingArg>,

    #[arg(long, value_enum)]
    init: Option<InitArg>,

    #[arg(long)]
    steps: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f64>,

    #[arg(long)]
    content_weight: Option<f64>,

    #[arg(long)]
    style_weight: Option<f64>,

    #[arg(long)]
    tv_weight: Option<f64>,

    /// Longest side of the generated image.
    #[arg(long)]
    max_size: Option<u32>,

    #[arg(long)]
    checkpoint_every: Option<usize>,

    #[arg(long)]
    seed: Option<i64>,
}

impl Args {
    fn style_config(&self) -> Result<StyleConfig> {
        let mut config = match &self.config {
            Some(path) => StyleConfig::from_file(path)?,
            None => StyleConfig::default(),
        };
        if let Some(backbone) = self.backbone {
            config.backbone = match backbone {
                BackboneArg::Vgg16 => Backbone::Vgg16,
                BackboneArg::Vgg19 => Backbone::Vgg19,
            };
        }
        if let Some(pooling) = self.pooling {
            config.pooling = match pooling {
                PoolingArg::Max => Pooling::Max,
                PoolingArg::Avg => Pooling::Avg,
            };
        }
        if let Some(init) = self.init {
            config.init = match init {
                InitArg::Content => InitMode::Content,
                InitArg::Noise => InitMode::Noise,
                InitArg::Blank => InitMode::Blank,
            };
        }
        config.steps = self.steps.unwrap_or(config.steps);
        config.learning_rate = self.learning_rate.unwrap_or(config.learning_rate);
        config.content_weight = self.content_weight.unwrap_or(config.content_weight);
        config.style_weight = self.style_weight.unwrap_or(config.style_weight);
        config.tv_weight = self.tv_weight.unwrap_or(config.tv_weight);
        config.seed = self.seed.unwrap_or(config.seed);
        if self.max_size.is_some() {
            config.max_size = self.max_size;
        }
        if self.checkpoint_every.is_some() {
            config.checkpoint_every = self.checkpoint_every;
        }
        config.validate()?;
        Ok(config)
    }
}

pub fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    let config = args.style_config()?;
    let device = if args.cpu { Device::Cpu } else { Device::cuda_if_available() };
    tracing::info!(?device, ?config, "starting");

    let net = Vgg::pretrained(&args.weights, config.backbone, config.pooling, device)?;
    let content = image::load(&args.content, config.max_size)
        .with_context(|| format!("could not load the content file {}", args.content.display()))?
        .to_device(device);
    let (_, _, h, w) = content.size4()?;
    let style = image::load_resized(&args.style, w, h)
        .with_context(|| format!("could not load the style file {}", args.style.display()))?
        .to_device(device);

    if let Some(dir) = &args.checkpoint_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("could not create {}", dir.display()))?;
    }
    let checkpoint_every = config.checkpoint_every;
    let mut transfer = StyleTransfer::new(&net, &content, &style, config)?;
    transfer.run(|step_idx, _, transfer| {
        match (&args.checkpoint_dir, checkpoint_every) {
            (Some(dir), Some(every)) if step_idx % every == 0 => {
                image::save(&transfer.image()?, dir.join(format!("step-{step_idx}.png")))
            }
            _ => Ok(()),
        }
    })?;
    image::save(&transfer.image()?, &args.output)?;
    tracing::info!(output = %args.output.display(), "done");
    Ok(())
}
