//! Image Downloader (C8): fetches a listing's image URLs to disk.
//!
//! Always writes under `{IMAGES_ROOT}/hotel_{listing_id}/en/`, regardless of
//! the locale passed in — images are a property of the listing, not of the
//! locale the page happened to be fetched in.

mod error;

pub use error::ImageError;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use image::{DynamicImage, ImageFormat, imageops::FilterType};
use md5::{Digest, Md5};
use reqwest::Client;
use reqwest::cookie::Jar;
use tokio::fs;
use tokio::sync::Semaphore;
use tracing::{instrument, warn};

/// Image dimensions below which a fetched file is assumed to be an icon,
/// avatar, or tracking pixel and discarded.
#[derive(Debug, Clone, Copy)]
pub struct ImageBounds {
    pub min_w: u32,
    pub min_h: u32,
    pub max_w: u32,
    pub max_h: u32,
}

/// Metadata about one successfully saved image.
#[derive(Debug, Clone)]
pub struct SavedImage {
    pub path: PathBuf,
    pub bytes: u64,
    pub width: u32,
    pub height: u32,
}

/// Counters updated as a batch of images downloads, for dispatcher-level stats.
#[derive(Debug, Default)]
pub struct DownloadStats {
    pub saved: AtomicUsize,
    pub skipped_duplicate: AtomicUsize,
    pub skipped_too_small: AtomicUsize,
    pub failed: AtomicUsize,
}

/// Downloads a listing's hotel-image URLs to `{images_root}/hotel_{listing_id}/en/`.
pub struct ImageDownloader {
    client: Client,
    images_root: PathBuf,
    bounds: ImageBounds,
    concurrency: usize,
    catalog_root: String,
    jpeg_quality: u8,
}

fn content_identifier(url: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(url.as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(32);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex.truncate(12);
    hex
}

async fn already_downloaded(dir: &Path, identifier: &str) -> bool {
    let Ok(mut entries) = fs::read_dir(dir).await else {
        return false;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_name().to_string_lossy().contains(identifier) {
            return true;
        }
    }
    false
}

fn guess_extension(content_type: Option<&str>, url: &str) -> &'static str {
    if let Some(ct) = content_type {
        if ct.contains("png") {
            return "png";
        }
        if ct.contains("webp") {
            return "webp";
        }
        if ct.contains("jpeg") || ct.contains("jpg") {
            return "jpg";
        }
    }
    let lower = url.to_lowercase();
    if lower.ends_with(".png") {
        "png"
    } else if lower.ends_with(".webp") {
        "webp"
    } else {
        "jpg"
    }
}

fn normalize_for_jpeg(image: DynamicImage, extension: &str) -> DynamicImage {
    if extension == "jpg" && image.color().has_alpha() {
        let rgba = image.to_rgba8();
        let mut background = image::RgbImage::from_pixel(rgba.width(), rgba.height(), image::Rgb([255, 255, 255]));
        for (x, y, pixel) in rgba.enumerate_pixels() {
            let alpha = f32::from(pixel[3]) / 255.0;
            let blended = [
                (f32::from(pixel[0]) * alpha + 255.0 * (1.0 - alpha)) as u8,
                (f32::from(pixel[1]) * alpha + 255.0 * (1.0 - alpha)) as u8,
                (f32::from(pixel[2]) * alpha + 255.0 * (1.0 - alpha)) as u8,
            ];
            background.put_pixel(x, y, image::Rgb(blended));
        }
        DynamicImage::ImageRgb8(background)
    } else {
        image
    }
}

impl ImageDownloader {
    #[must_use]
    pub fn new(
        images_root: PathBuf,
        bounds: ImageBounds,
        concurrency: usize,
        cookie_jar: Arc<Jar>,
        catalog_root: impl Into<String>,
        jpeg_quality: u8,
    ) -> Self {
        let client = Client::builder()
            .cookie_provider(cookie_jar)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            images_root,
            bounds,
            concurrency: concurrency.max(1),
            catalog_root: catalog_root.into(),
            jpeg_quality,
        }
    }

    fn listing_dir(&self, listing_id: i64) -> PathBuf {
        self.images_root.join(format!("hotel_{listing_id}")).join("en")
    }

    /// Downloads every URL for `listing_id`, returning the count of files
    /// newly written (deduplicated and size-filtered entries don't count).
    ///
    /// # Errors
    ///
    /// Returns `ImageError::Io` if the target directory cannot be created.
    #[instrument(skip(self, urls))]
    pub async fn download(&self, listing_id: i64, urls: &[String]) -> Result<usize, ImageError> {
        let dir = self.listing_dir(listing_id);
        fs::create_dir_all(&dir).await.map_err(ImageError::Io)?;

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let saved = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::with_capacity(urls.len());
        for (index, url) in urls.iter().enumerate() {
            let semaphore = semaphore.clone();
            let saved = saved.clone();
            let dir = dir.clone();
            let client = self.client.clone();
            let bounds = self.bounds;
            let catalog_root = self.catalog_root.clone();
            let jpeg_quality = self.jpeg_quality;
            let url = url.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await;
                match download_one(&client, &url, &dir, index, bounds, &catalog_root, jpeg_quality).await {
                    Ok(true) => {
                        saved.fetch_add(1, Ordering::SeqCst);
                    }
                    Ok(false) => {}
                    Err(err) => warn!(url, %err, "image download failed"),
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        Ok(saved.load(Ordering::SeqCst))
    }

    /// Re-opens every file in `hotel_{listing_id}/en/` and confirms it decodes
    /// as a valid image of at least the configured minimum dimensions.
    #[instrument(skip(self))]
    pub async fn cleanup_invalid_images(&self, listing_id: i64) -> Result<usize, ImageError> {
        let dir = self.listing_dir(listing_id);
        let Ok(mut entries) = fs::read_dir(&dir).await else {
            return Ok(0);
        };

        let mut removed = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if !verify_image(&path, self.bounds).await {
                if fs::remove_file(&path).await.is_ok() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Counts image files currently on disk for a listing.
    #[instrument(skip(self))]
    pub async fn get_hotel_images_count(&self, listing_id: i64) -> usize {
        let dir = self.listing_dir(listing_id);
        let Ok(mut entries) = fs::read_dir(&dir).await else {
            return 0;
        };
        let mut count = 0;
        while let Ok(Some(_)) = entries.next_entry().await {
            count += 1;
        }
        count
    }
}

async fn download_one(
    client: &Client,
    url: &str,
    dir: &Path,
    index: usize,
    bounds: ImageBounds,
    catalog_root: &str,
    jpeg_quality: u8,
) -> Result<bool, ImageError> {
    let identifier = content_identifier(url);
    if already_downloaded(dir, &identifier).await {
        return Ok(false);
    }

    let response = client
        .get(url)
        .header("Referer", format!("https://{catalog_root}/"))
        .header("Sec-Fetch-Dest", "image")
        .header("Sec-Fetch-Mode", "no-cors")
        .header("Sec-Fetch-Site", "cross-site")
        .send()
        .await
        .map_err(ImageError::Http)?;

    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = response.bytes().await.map_err(ImageError::Http)?;

    let decoded = image::load_from_memory(&bytes).map_err(ImageError::Decode)?;
    let (width, height) = (decoded.width(), decoded.height());
    if width < bounds.min_w || height < bounds.min_h {
        return Ok(false);
    }

    let extension = guess_extension(content_type.as_deref(), url);
    let resized = if width > bounds.max_w || height > bounds.max_h {
        decoded.resize(bounds.max_w, bounds.max_h, FilterType::Lanczos3)
    } else {
        decoded
    };
    let normalized = normalize_for_jpeg(resized, extension);

    let filename = format!("img_{index:04}_{identifier}.{extension}");
    let path = dir.join(&filename);

    let mut buffer = Vec::new();
    if extension == "jpg" {
        let rgb = normalized.to_rgb8();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, jpeg_quality)
            .encode(rgb.as_raw(), rgb.width(), rgb.height(), image::ExtendedColorType::Rgb8)
            .map_err(ImageError::Decode)?;
    } else {
        let format = if extension == "png" { ImageFormat::Png } else { ImageFormat::WebP };
        normalized
            .write_to(&mut std::io::Cursor::new(&mut buffer), format)
            .map_err(ImageError::Decode)?;
    }
    fs::write(&path, &buffer).await.map_err(ImageError::Io)?;

    Ok(true)
}

/// Re-decodes `path` and confirms it's at least `bounds.min_w x bounds.min_h`.
pub async fn verify_image(path: &Path, bounds: ImageBounds) -> bool {
    let Ok(bytes) = fs::read(path).await else {
        return false;
    };
    image::load_from_memory(&bytes)
        .map(|img| img.width() >= bounds.min_w && img.height() >= bounds.min_h)
        .unwrap_or(false)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_content_identifier_is_twelve_hex_chars() {
        let id = content_identifier("https://cf.bstatic.com/xdata/images/hotel/max1280x900/a.jpg");
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_content_identifier_is_deterministic() {
        let url = "https://cf.bstatic.com/xdata/images/hotel/max1280x900/a.jpg";
        assert_eq!(content_identifier(url), content_identifier(url));
    }

    #[test]
    fn test_guess_extension_prefers_content_type() {
        assert_eq!(guess_extension(Some("image/png"), "https://x/a.jpg"), "png");
        assert_eq!(guess_extension(None, "https://x/a.webp"), "webp");
        assert_eq!(guess_extension(None, "https://x/a.unknown"), "jpg");
    }

    #[tokio::test]
    async fn test_already_downloaded_detects_matching_filename() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("img_0000_abc123456789.jpg"), b"x").await.unwrap();
        assert!(already_downloaded(dir.path(), "abc123456789").await);
        assert!(!already_downloaded(dir.path(), "zzzzzzzzzzzz").await);
    }

    #[tokio::test]
    async fn test_download_skips_non_image_cdn_url_gracefully() {
        let downloader = ImageDownloader::new(
            tempfile::tempdir().unwrap().into_path(),
            ImageBounds { min_w: 200, min_h: 150, max_w: 1920, max_h: 1080 },
            2,
            Arc::new(Jar::default()),
            "www.example.com",
            85,
        );
        // No real network access in unit tests; an unreachable host fails the
        // request and the batch still resolves rather than hanging.
        let count = downloader.download(1, &["https://127.0.0.1:1/nope.jpg".to_string()]).await.unwrap();
        assert_eq!(count, 0);
    }
}
