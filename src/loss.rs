//! Loss terms used to drive the generated image.
use tch::{Kind, Reduction, Tensor};

use crate::error::{Error, Result};

/// Feature correlations of a `[b, c, h, w]` activation map.
///
/// The map is flattened to `[b * c, h * w]` and multiplied by its transpose,
/// the result is divided by the number of elements so that layers of
/// different sizes contribute on a similar scale.
pub fn gram_matrix(m: &Tensor) -> Result<Tensor> {
    let (a, b, c, d) = m.size4()?;
    let m = m.view([a * b, c * d]);
    let g = m.matmul(&m.tr());
    Ok(g / (a * b * c * d))
}

pub fn content_loss(target: &Tensor, content: &Tensor) -> Tensor {
    target.mse_loss(content, Reduction::Mean)
}

/// Style loss for a single layer, `style_gram` is precomputed with
/// [`gram_matrix`] on the style image activations.
pub fn style_layer_loss(target: &Tensor, style_gram: &Tensor) -> Result<Tensor> {
    Ok(gram_matrix(target)?.mse_loss(style_gram, Reduction::Mean))
}

fn squared_diff(img: &Tensor, dim: i64, len: i64) -> Tensor {
    if len < 2 {
        return Tensor::from(0f32).to_device(img.device());
    }
    (img.narrow(dim, 1, len - 1) - img.narrow(dim, 0, len - 1)).square().mean(Kind::Float)
}

/// Mean squared difference between vertically adjacent pixels plus the same
/// for horizontally adjacent pixels. Zero on constant images.
pub fn total_variation_loss(img: &Tensor) -> Result<Tensor> {
    let (_, _, h, w) = img.size4()?;
    if h == 0 || w == 0 {
        return Err(Error::Shape(format!("empty image {:?}", img.size())));
    }
    Ok(squared_diff(img, 2, h) + squared_diff(img, 3, w))
}

/// Scalar values of the loss terms for one optimization step. `style` is
/// already weighted across layers, `total` carries the global weights.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LossBreakdown {
    pub content: f64,
    pub style: f64,
    pub tv: f64,
    pub total: f64,
}

impl std::fmt::Display for LossBreakdown {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "total {:.4e} content {:.4e} style {:.4e} tv {:.4e}",
            self.total, self.content, self.style, self.tv
        )
    }
}
