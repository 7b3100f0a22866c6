/// The `vision` module groups the image helpers and the pre-trained
/// networks used to extract features.
pub mod image;

pub mod vgg;
