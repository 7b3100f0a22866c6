//! The optimization loop, gradient descent runs on the pixels of the
//! generated image while the network stays frozen.
use tch::{nn, Kind, Tensor};

use crate::config::{InitMode, StyleConfig};
use crate::error::{Error, Result};
use crate::loss::{content_loss, gram_matrix, style_layer_loss, total_variation_loss, LossBreakdown};
use crate::vision::image;
use crate::vision::vgg::Vgg;

pub struct StyleTransfer<'a> {
    net: &'a Vgg,
    config: StyleConfig,
    content_index: usize,
    style_indexes: Vec<usize>,
    content_target: Tensor,
    style_grams: Vec<Tensor>,
    // Holds the generated image, the only trainable variable.
    vs: nn::VarStore,
    img: Tensor,
    opt: nn::Optimizer,
    steps_done: usize,
}

impl std::fmt::Debug for StyleTransfer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("StyleTransfer")
            .field("backbone", &self.net.backbone())
            .field("size", &self.img.size())
            .field("steps_done", &self.steps_done)
            .finish()
    }
}

impl<'a> StyleTransfer<'a> {
    /// Prepares a transfer of the style of `style` onto `content`.
    ///
    /// Both images are `[1, 3, h, w]` tensors with values in `[0, 1]`, see
    /// [`image::load`]. The style image is expected to have been resized to
    /// the content size already. The generated image lives on the device of
    /// the content image.
    ///
    /// With [`InitMode::Noise`] this reseeds the global libtorch generator with
    /// the configured seed.
    pub fn new(net: &'a Vgg, content: &Tensor, style: &Tensor, config: StyleConfig) -> Result<Self> {
        config.validate()?;
        let device = content.device();
        let content = image::normalize(content)?;
        let style = image::normalize(&style.to_device(device))?;
        if content.size() != style.size() {
            return Err(Error::Shape(format!(
                "content {:?} and style {:?} sizes differ",
                content.size(),
                style.size()
            )));
        }

        let content_index = net.layer_index(&config.content_layer)?;
        let style_indexes = config
            .style_layers
            .iter()
            .map(|l| net.layer_index(&l.name))
            .collect::<Result<Vec<_>>>()?;

        // The targets are computed once and never receive gradients.
        let (content_target, style_grams) = tch::no_grad(|| -> Result<_> {
            let content_target = net.forward_layers(&content, &[content_index])?.remove(0);
            let style_grams = net
                .forward_layers(&style, &style_indexes)?
                .iter()
                .map(gram_matrix)
                .collect::<Result<Vec<_>>>()?;
            Ok((content_target, style_grams))
        })?;

        let init = match config.init {
            InitMode::Content => content.shallow_clone(),
            InitMode::Noise => {
                tch::manual_seed(config.seed);
                Tensor::randn(content.size().as_slice(), (Kind::Float, device))
            }
            InitMode::Blank => content.zeros_like(),
        };
        let vs = nn::VarStore::new(device);
        let img = vs.root().var_copy("img", &init);
        let opt = config.optimizer.build(&vs, config.learning_rate)?;
        tracing::debug!(
            size = ?img.size(),
            init = ?config.init,
            content_layer = %config.content_layer,
            style_layers = ?config.style_layer_names(),
            "style transfer ready"
        );
        Ok(StyleTransfer {
            net,
            config,
            content_index,
            style_indexes,
            content_target,
            style_grams,
            vs,
            img,
            opt,
            steps_done: 0,
        })
    }

    pub fn config(&self) -> &StyleConfig {
        &self.config
    }

    pub fn steps_done(&self) -> usize {
        self.steps_done
    }

    /// The variables updated by the optimizer, this only contains the image.
    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    /// The raw target in the normalized space, this is the tensor being
    /// optimized.
    pub fn target(&self) -> &Tensor {
        &self.img
    }

    /// Activations of the content image at the content layer.
    pub fn content_target(&self) -> &Tensor {
        &self.content_target
    }

    /// Gram matrices of the style image, one per style layer.
    pub fn style_grams(&self) -> &[Tensor] {
        &self.style_grams
    }

    /// The current generated image with values clamped to `[0, 1]`.
    pub fn image(&self) -> Result<Tensor> {
        Ok(image::unnormalize(&self.img.detach())?.clamp(0., 1.))
    }

    fn losses(&self) -> Result<(Tensor, LossBreakdown)> {
        let mut indexes = self.style_indexes.clone();
        indexes.push(self.content_index);
        let mut layers = self.net.forward_layers(&self.img, &indexes)?;
        let content = match layers.pop() {
            Some(layer) => content_loss(&layer, &self.content_target),
            None => return Err(Error::Shape("no content activations".to_string())),
        };
        let style = layers
            .iter()
            .zip(self.style_grams.iter())
            .zip(self.config.style_layers.iter())
            .map(|((layer, gram), l)| Ok(style_layer_loss(layer, gram)? * l.weight))
            .collect::<Result<Vec<Tensor>>>()?
            .into_iter()
            .sum::<Tensor>();
        let tv = total_variation_loss(&self.img)?;
        let total = &content * self.config.content_weight
            + &style * self.config.style_weight
            + &tv * self.config.tv_weight;
        let breakdown = LossBreakdown {
            content: f64::try_from(&content)?,
            style: f64::try_from(&style)?,
            tv: f64::try_from(&tv)?,
            total: f64::try_from(&total)?,
        };
        Ok((total, breakdown))
    }

    /// Computes the losses for the current image without updating it.
    pub fn evaluate(&self) -> Result<LossBreakdown> {
        tch::no_grad(|| self.losses()).map(|(_, breakdown)| breakdown)
    }

    /// Runs a single forward pass and optimizer step, returns the losses
    /// measured before the update.
    pub fn step(&mut self) -> Result<LossBreakdown> {
        let (loss, breakdown) = self.losses()?;
        if !breakdown.total.is_finite() {
            return Err(Error::Diverged { step: self.steps_done + 1 });
        }
        self.opt.backward_step(&loss);
        self.steps_done += 1;
        tracing::debug!(step = self.steps_done, %breakdown);
        Ok(breakdown)
    }

    /// Runs the remaining steps of the configured budget. `on_step` is called
    /// after every step with the step index (starting at 1), the losses and
    /// the transfer itself, returning an error stops the loop.
    pub fn run<F>(&mut self, mut on_step: F) -> Result<Vec<LossBreakdown>>
    where
        F: FnMut(usize, &LossBreakdown, &Self) -> Result<()>,
    {
        let mut history = Vec::with_capacity(self.config.steps.saturating_sub(self.steps_done));
        while self.steps_done < self.config.steps {
            let breakdown = self.step()?;
            let step_idx = self.steps_done;
            if self.config.checkpoint_every.map_or(false, |every| step_idx % every == 0) {
                tracing::info!(step = step_idx, total = self.config.steps, %breakdown);
            }
            on_step(step_idx, &breakdown, self)?;
            history.push(breakdown);
        }
        Ok(history)
    }
}
