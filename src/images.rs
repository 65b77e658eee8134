//! Immobiliare CDN image references.
//!
//! Image URL pattern: `https://pwm.im-cdn.it/image/{id}/{size}.jpg`.
//! Listings store the bare numeric id when the URL matches this pattern,
//! so consumers pick the size at render time.

use std::sync::LazyLock;

use regex::Regex;

static IMAGE_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/image/(\d+)/").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSize {
    Xs,
    S,
    M,
    MC,
    L,
    Xl,
    Xxl,
}

impl ImageSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageSize::Xs => "xs",
            ImageSize::S => "s",
            ImageSize::M => "m",
            ImageSize::MC => "m-c",
            ImageSize::L => "l",
            ImageSize::Xl => "xl",
            ImageSize::Xxl => "xxl",
        }
    }
}

// Mobile clients get smaller images to save bandwidth.
pub const IMAGE_SIZE_MOBILE: ImageSize = ImageSize::M;
pub const IMAGE_SIZE_DESKTOP: ImageSize = ImageSize::Xl;
pub const DEFAULT_IMAGE_SIZE: ImageSize = ImageSize::Xl;

pub fn build_image_url(image_id: &str, size: ImageSize) -> String {
    format!("https://pwm.im-cdn.it/image/{image_id}/{}.jpg", size.as_str())
}

/// Bare numeric image id from a CDN URL, when the URL matches the known
/// pattern.
pub fn extract_image_id(url: &str) -> Option<String> {
    IMAGE_ID
        .captures(url)
        .map(|caps| caps[1].to_string())
}

/// Storable reference for a scraped image URL: the CDN id when recognized,
/// the original URL otherwise.
pub fn image_ref(url: &str) -> String {
    extract_image_id(url).unwrap_or_else(|| url.to_string())
}
