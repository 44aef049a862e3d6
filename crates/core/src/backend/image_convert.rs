//! Image format conversion with the `image` crate.

use async_trait::async_trait;
use image::imageops::FilterType;
use image::{DynamicImage, ImageError, ImageFormat, Rgb, RgbImage};
use std::path::Path;
use tracing::debug;

use super::{
    first_input, unexpected_params, Backend, BackendError, BackendOutcome, CancelFlag,
    Invocation, ProducedFile,
};
use crate::job::{ImageTarget, JobKind, JobParams};

pub struct ImageBackend;

impl ImageBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ImageBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for ImageBackend {
    fn name(&self) -> &str {
        "image"
    }

    fn kind(&self) -> JobKind {
        JobKind::ImageConvert
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<BackendOutcome, BackendError> {
        let JobParams::ImageConvert {
            format,
            max_width,
            max_height,
        } = invocation.params
        else {
            return Err(unexpected_params(self.name(), &invocation.params));
        };
        let input = first_input(invocation)?;
        let data = tokio::fs::read(&input.path).await?;

        let output = invocation.output.clone();
        invocation
            .cancel
            .run_blocking(move |cancel| {
                convert(&data, format, max_width, max_height, cancel, &output)
            })
            .await?;

        Ok(BackendOutcome::File(ProducedFile {
            path: invocation.output.clone(),
            content_type: format.content_type().to_string(),
            download_name: format!("{}.{}", input.stem(), format.extension()),
        }))
    }
}

fn convert(
    data: &[u8],
    target: ImageTarget,
    max_width: Option<u32>,
    max_height: Option<u32>,
    cancel: &CancelFlag,
    output: &Path,
) -> Result<(), BackendError> {
    let decoded = image::load_from_memory(data)
        .map_err(|e| BackendError::failed(format!("cannot decode image: {}", e)))?;
    cancel.check()?;

    let resized = fit_within(decoded, max_width, max_height);
    cancel.check()?;

    let prepared = if !target.supports_alpha() {
        flatten_onto_white(&resized)
    } else {
        match target {
            ImageTarget::Png | ImageTarget::Tiff => resized,
            _ => DynamicImage::ImageRgba8(resized.to_rgba8()),
        }
    };
    encode(&prepared, target, output)
}

/// Composites transparent pixels over white for encoders without alpha.
fn flatten_onto_white(img: &DynamicImage) -> DynamicImage {
    if !img.color().has_alpha() {
        return DynamicImage::ImageRgb8(img.to_rgb8());
    }
    let rgba = img.to_rgba8();
    let flat = RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = u16::from(a);
        let blend = |c: u8| ((u16::from(c) * alpha + 255 * (255 - alpha)) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    });
    DynamicImage::ImageRgb8(flat)
}

/// Downscales to fit the bounds, preserving aspect ratio. Never upscales.
fn fit_within(img: DynamicImage, max_width: Option<u32>, max_height: Option<u32>) -> DynamicImage {
    if max_width.is_none() && max_height.is_none() {
        return img;
    }
    let width = max_width.unwrap_or(u32::MAX).min(img.width());
    let height = max_height.unwrap_or(u32::MAX).min(img.height());
    if width == img.width() && height == img.height() {
        return img;
    }
    debug!(from = ?(img.width(), img.height()), bound = ?(width, height), "Resizing image");
    img.resize(width, height, FilterType::Lanczos3)
}

fn encode(img: &DynamicImage, target: ImageTarget, output: &Path) -> Result<(), BackendError> {
    let format = match target {
        ImageTarget::Png => ImageFormat::Png,
        ImageTarget::Jpeg => ImageFormat::Jpeg,
        ImageTarget::Webp => ImageFormat::WebP,
        ImageTarget::Gif => ImageFormat::Gif,
        ImageTarget::Bmp => ImageFormat::Bmp,
        ImageTarget::Tiff => ImageFormat::Tiff,
    };
    img.save_with_format(output, format).map_err(|e| match e {
        ImageError::IoError(e) => BackendError::Io(e),
        other => BackendError::failed(format!("cannot encode {}: {}", target.extension(), other)),
    })
}
