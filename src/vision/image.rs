//! Utility functions to move images in and out of tensors.
//!
//! Images live in tensors of shape `[1, 3, height, width]` holding floats in
//! `[0, 1]`. The VGG backbones expect ImageNet normalized inputs, see
//! [`normalize`] and [`unnormalize`].
use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use tch::{Device, Kind, Tensor};

use crate::error::{Error, Result};

/// Per-channel mean of the ImageNet training set.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// Per-channel standard deviation of the ImageNet training set.
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

fn hwc_to_chw(tensor: &Tensor) -> Tensor {
    tensor.permute([2, 0, 1])
}

fn chw_to_hwc(tensor: &Tensor) -> Tensor {
    tensor.permute([1, 2, 0])
}

fn open<T: AsRef<Path>>(path: T) -> Result<DynamicImage> {
    let path = path.as_ref();
    image::open(path).map_err(|e| Error::from(e).path_context(&path.display().to_string()))
}

/// `h * w * 3` => `1 * 3 * h * w`, scaled to `[0, 1]`.
pub fn from_rgb(rgb: &RgbImage) -> Tensor {
    let (width, height) = rgb.dimensions();
    let tensor = Tensor::from_slice(rgb.as_raw()).view([height as i64, width as i64, 3]);
    hwc_to_chw(&tensor).to_kind(Kind::Float).unsqueeze(0) / 255.
}

/// Loads an image from a file.
///
/// When `max_size` is set, the image is downscaled so that its longest side
/// fits, keeping the aspect ratio. Images that are already small enough are
/// left untouched.
///
/// On success returns a tensor of shape `[1, 3, height, width]`.
pub fn load<T: AsRef<Path>>(path: T, max_size: Option<u32>) -> Result<Tensor> {
    let image = open(path)?;
    let image = match max_size {
        Some(max_size) if image.width().max(image.height()) > max_size => {
            image.resize(max_size, max_size, FilterType::Lanczos3)
        }
        _ => image,
    };
    Ok(from_rgb(&image.to_rgb8()))
}

/// Loads an image and resizes it to exactly `out_w x out_h`.
pub fn load_resized<T: AsRef<Path>>(path: T, out_w: i64, out_h: i64) -> Result<Tensor> {
    if out_w <= 0 || out_h <= 0 {
        return Err(Error::Shape(format!("cannot resize to {out_w}x{out_h}")));
    }
    let image = open(path)?.resize_exact(out_w as u32, out_h as u32, FilterType::Lanczos3);
    Ok(from_rgb(&image.to_rgb8()))
}

fn channel_stats(t: &Tensor, values: [f32; 3]) -> Tensor {
    Tensor::from_slice(&values).view([1, 3, 1, 1]).to_device(t.device())
}

/// Returns the image as `[1, 3, h, w]`, accepting `[3, h, w]` too.
fn batched(t: &Tensor) -> Result<Tensor> {
    let size = t.size();
    match size.as_slice() {
        [1, 3, _, _] => Ok(t.shallow_clone()),
        [3, _, _] => Ok(t.unsqueeze(0)),
        _ => Err(Error::Shape(format!("expected a [1, 3, h, w] rgb image, got {size:?}"))),
    }
}

/// Applies the ImageNet mean/std normalization to a `[1, 3, h, w]` image.
pub fn normalize(t: &Tensor) -> Result<Tensor> {
    let t = batched(t)?;
    Ok((&t - channel_stats(&t, IMAGENET_MEAN)) / channel_stats(&t, IMAGENET_STD))
}

/// Reverts [`normalize`].
pub fn unnormalize(t: &Tensor) -> Result<Tensor> {
    let t = batched(t)?;
    Ok(&t * channel_stats(&t, IMAGENET_STD) + channel_stats(&t, IMAGENET_MEAN))
}

/// Converts a `[1, 3, h, w]` or `[3, h, w]` tensor with values in `[0, 1]`
/// to an 8-bit image. Values outside of the range are clamped.
pub fn to_rgb(t: &Tensor) -> Result<RgbImage> {
    let t = batched(t)?.squeeze_dim(0);
    let (_, height, width) = t.size3()?;
    let t = (t.detach().to_device(Device::Cpu).clamp(0., 1.) * 255.).round().to_kind(Kind::Uint8);
    let data = Vec::<u8>::try_from(&chw_to_hwc(&t).contiguous().flatten(0, -1))?;
    RgbImage::from_raw(width as u32, height as u32, data)
        .ok_or_else(|| Error::Shape(format!("cannot build a {width}x{height} image")))
}

/// Saves an image to a file.
///
/// This expects as input a tensor of shape `[1, 3, h, w]` with values in
/// `[0, 1]`. The image format is based on the filename suffix.
pub fn save<T: AsRef<Path>>(t: &Tensor, path: T) -> Result<()> {
    let path = path.as_ref();
    to_rgb(t)?.save(path).map_err(|e| Error::from(e).path_context(&path.display().to_string()))
}
