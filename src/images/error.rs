//! Error type for the Image Downloader.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("image request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("image filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image decode/encode error: {0}")]
    Decode(#[from] image::ImageError),
}
