use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, DynamicImage, GenericImageView};
use once_cell::sync::Lazy;
use regex::Regex;

use super::error::PipelineError;

const JPEG_QUALITY: u8 = 80;

static IMAGE_URL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\.(jpe?g|png|gif|webp|svg|bmp)").expect("valid image url regex")
});

/// Resized media ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedImage {
    /// `data:image/jpeg;base64,...`
    pub data_url: String,
    pub width: u32,
    pub height: u32,
    pub original_width: u32,
    pub original_height: u32,
    pub source_url: Option<String>,
}

/// Keeps the original size when both sides fit, otherwise scales the longer
/// side down to `cap` and rounds the other to the nearest pixel.
pub fn fit_within(width: u32, height: u32, cap: u32) -> (u32, u32) {
    if width <= cap && height <= cap {
        return (width, height);
    }
    let scaled = |short: u32, long: u32| -> u32 {
        ((cap as f64) * (short as f64) / (long as f64)).round().max(1.0) as u32
    };
    if width > height {
        (cap, scaled(height, width))
    } else {
        (scaled(width, height), cap)
    }
}

pub fn prepare(
    image: &DynamicImage,
    cap: u32,
    source_url: Option<String>,
) -> Result<PreparedImage, PipelineError> {
    let (original_width, original_height) = image.dimensions();
    if original_width == 0 || original_height == 0 {
        return Err(PipelineError::Prepare("image has no pixels".to_string()));
    }

    let (width, height) = fit_within(original_width, original_height, cap);
    let rgb = if (width, height) == (original_width, original_height) {
        image.to_rgb8()
    } else {
        image.resize_exact(width, height, FilterType::Triangle).to_rgb8()
    };

    let mut encoded = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut encoded, JPEG_QUALITY).encode_image(&rgb)?;

    Ok(PreparedImage {
        data_url: format!(
            "data:image/jpeg;base64,{}",
            STANDARD.encode(encoded.into_inner())
        ),
        width,
        height,
        original_width,
        original_height,
        source_url,
    })
}

/// True for URLs that can plausibly be decoded as an image.
pub fn is_image_source(url: &str) -> bool {
    let url = url.trim();
    !url.is_empty()
        && (url.starts_with("data:image/")
            || url.starts_with("blob:")
            || IMAGE_URL_REGEX.is_match(url))
}

/// Decodes the payload of a base64 `data:` URL.
pub fn decode_data_url(url: &str) -> Result<Vec<u8>, PipelineError> {
    let (header, payload) = url
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(','))
        .ok_or_else(|| PipelineError::Prepare("not a data url".to_string()))?;
    if !header.ends_with(";base64") {
        return Err(PipelineError::Prepare(
            "only base64 data urls are supported".to_string(),
        ));
    }
    STANDARD
        .decode(payload.trim())
        .map_err(|err| PipelineError::Prepare(err.to_string()))
}

pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, PipelineError> {
    Ok(image::load_from_memory(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_images_keep_their_size() {
        assert_eq!(fit_within(224, 100, 224), (224, 100));
        assert_eq!(fit_within(50, 50, 224), (50, 50));
    }

    #[test]
    fn longer_side_is_capped() {
        assert_eq!(fit_within(500, 500, 224), (224, 224));
        assert_eq!(fit_within(1000, 500, 224), (224, 112));
        assert_eq!(fit_within(500, 1000, 224), (112, 224));
        // 224 * 333 / 1000 = 74.59
        assert_eq!(fit_within(1000, 333, 224), (224, 75));
    }

    #[test]
    fn extreme_aspect_ratio_never_collapses() {
        assert_eq!(fit_within(10_000, 1, 224), (224, 1));
    }

    #[test]
    fn prepare_resizes_and_encodes_jpeg() {
        let image = DynamicImage::new_rgb8(500, 250);
        let prepared = prepare(&image, 224, Some("https://x/a.png".into())).unwrap();
        assert_eq!((prepared.width, prepared.height), (224, 112));
        assert_eq!((prepared.original_width, prepared.original_height), (500, 250));
        assert!(prepared.data_url.starts_with("data:image/jpeg;base64,"));

        let bytes = decode_data_url(&prepared.data_url).unwrap();
        let decoded = decode_image(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (224, 112));
    }

    #[test]
    fn empty_image_is_rejected() {
        let image = DynamicImage::new_rgb8(0, 0);
        assert!(matches!(prepare(&image, 224, None), Err(PipelineError::Prepare(_))));
    }

    #[test]
    fn recognizes_image_sources() {
        assert!(is_image_source("https://cdn.site/pic.JPG?w=200"));
        assert!(is_image_source("data:image/png;base64,AAAA"));
        assert!(is_image_source("blob:https://site/1234"));
        assert!(!is_image_source("https://site/page.html"));
        assert!(!is_image_source("   "));
    }

    #[test]
    fn rejects_non_base64_data_urls() {
        assert!(decode_data_url("data:image/svg+xml,<svg/>").is_err());
        assert!(decode_data_url("https://x/y.png").is_err());
    }
}
