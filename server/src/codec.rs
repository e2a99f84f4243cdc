//! Image codec adapter.
//!
//! The rest of the crate only talks to [`ImageCodec`]. [`ImageRsCodec`] is the
//! production implementation: decoding and resampling with `image`, lossy WebP
//! encoding with libwebp. All methods are blocking and are expected to run on
//! the blocking thread pool.

use std::collections::HashMap;
use std::io::{BufRead, Cursor, Seek};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;

use image::imageops::{self, FilterType};
use image::metadata::Orientation;
use image::{DynamicImage, GenericImageView, ImageDecoder, ImageFormat, ImageReader, RgbaImage};
use kernel::Fit;
use parking_lot::Mutex;

const FILTER: FilterType = FilterType::Lanczos3;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("cannot decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("unrecognized image format")]
    UnknownFormat,
    #[error("cannot encode WebP: {0}")]
    Encode(String),
    #[error("cannot read image: {0}")]
    Io(#[from] std::io::Error),
    #[error("image worker failed: {0}")]
    Worker(String),
}

/// Header level facts about an image, read without decoding pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    /// Lowercase format name, e.g. `jpeg`
    pub format: String,
    pub has_alpha: bool,
}

/// Decoded pixels plus the EXIF orientation that has not been applied yet.
#[derive(Clone)]
pub struct DecodedImage {
    image: DynamicImage,
    orientation: Orientation,
}

impl DecodedImage {
    #[must_use]
    pub fn new(image: DynamicImage) -> Self {
        Self {
            image,
            orientation: Orientation::NoTransforms,
        }
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    #[must_use]
    pub fn image(&self) -> &DynamicImage {
        &self.image
    }
}

/// Target box for a resize. At least one of `width` or `height` should be set,
/// otherwise the image is left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeRequest {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fit: Fit,
    pub allow_upscale: bool,
}

impl ResizeRequest {
    #[must_use]
    pub fn bounded(width: u32, height: u32, fit: Fit) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
            fit,
            allow_upscale: false,
        }
    }
}

/// Narrow interface over an image codec.
pub trait ImageCodec: Send + Sync + 'static {
    fn decode(&self, data: &[u8]) -> Result<DecodedImage, CodecError>;

    fn decode_file(&self, path: &Path) -> Result<DecodedImage, CodecError>;

    fn resize(&self, image: DecodedImage, request: &ResizeRequest) -> DecodedImage;

    /// Encodes to WebP at `quality` (1-100). Nothing but pixels is written.
    fn encode(&self, image: &DecodedImage, quality: u8) -> Result<Vec<u8>, CodecError>;

    fn probe(&self, data: &[u8]) -> Result<ImageMetadata, CodecError>;

    fn probe_file(&self, path: &Path) -> Result<ImageMetadata, CodecError>;

    /// Internal cache that must be held off while files are deleted.
    fn cache(&self) -> &CodecCache;

    /// Applies the EXIF orientation to the pixels.
    fn auto_rotate(&self, mut image: DecodedImage) -> DecodedImage {
        image.image.apply_orientation(image.orientation);
        image.orientation = Orientation::NoTransforms;
        image
    }

    /// Forgets any remaining metadata carried by the handle.
    fn strip_metadata(&self, mut image: DecodedImage) -> DecodedImage {
        image.orientation = Orientation::NoTransforms;
        image
    }
}

struct CachedProbe {
    modified: Option<SystemTime>,
    len: u64,
    metadata: ImageMetadata,
}

/// Probe cache keyed by file path.
///
/// Caching is on while no [`CacheHold`] exists. Holds are counted, so any
/// number of concurrent deletes can hold the cache and it only turns back on
/// when the last one is released. Taking a hold drops every cached entry.
#[derive(Default)]
pub struct CodecCache {
    entries: Mutex<HashMap<PathBuf, CachedProbe>>,
    holds: AtomicUsize,
}

impl CodecCache {
    /// Drops all entries and disables caching until the returned guard is dropped.
    #[must_use]
    pub fn hold(&self) -> CacheHold<'_> {
        let mut entries = self.entries.lock();
        self.holds.fetch_add(1, Ordering::AcqRel);
        entries.clear();
        CacheHold { cache: self }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.holds.load(Ordering::Acquire) == 0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, path: &Path, modified: Option<SystemTime>, len: u64) -> Option<ImageMetadata> {
        let entries = self.entries.lock();
        entries
            .get(path)
            .filter(|c| c.modified == modified && c.len == len)
            .map(|c| c.metadata.clone())
    }

    fn insert(&self, path: &Path, modified: Option<SystemTime>, len: u64, metadata: &ImageMetadata) {
        let mut entries = self.entries.lock();
        // checked under the lock so a concurrent hold() cannot be undone
        if self.holds.load(Ordering::Acquire) == 0 {
            entries.insert(
                path.to_path_buf(),
                CachedProbe {
                    modified,
                    len,
                    metadata: metadata.clone(),
                },
            );
        }
    }
}

/// Scoped suspension of a [`CodecCache`].
pub struct CacheHold<'a> {
    cache: &'a CodecCache,
}

impl Drop for CacheHold<'_> {
    fn drop(&mut self) {
        self.cache.holds.fetch_sub(1, Ordering::AcqRel);
    }
}

/// [`ImageCodec`] backed by the `image` and `webp` crates.
#[derive(Default)]
pub struct ImageRsCodec {
    cache: CodecCache,
}

impl ImageRsCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn decode_reader<R: BufRead + Seek>(reader: ImageReader<R>) -> Result<DecodedImage, CodecError> {
        let reader = reader.with_guessed_format()?;
        if reader.format().is_none() {
            return Err(CodecError::UnknownFormat);
        }
        let mut decoder = reader.into_decoder()?;
        let orientation = decoder.orientation()?;
        let image = DynamicImage::from_decoder(decoder)?;
        Ok(DecodedImage { image, orientation })
    }

    fn probe_reader<R: BufRead + Seek>(reader: ImageReader<R>) -> Result<ImageMetadata, CodecError> {
        let reader = reader.with_guessed_format()?;
        let format = reader.format().ok_or(CodecError::UnknownFormat)?;
        let decoder = reader.into_decoder()?;
        let (width, height) = decoder.dimensions();
        Ok(ImageMetadata {
            width,
            height,
            format: format_name(format),
            has_alpha: decoder.color_type().has_alpha(),
        })
    }
}

impl ImageCodec for ImageRsCodec {
    fn decode(&self, data: &[u8]) -> Result<DecodedImage, CodecError> {
        Self::decode_reader(ImageReader::new(Cursor::new(data)))
    }

    fn decode_file(&self, path: &Path) -> Result<DecodedImage, CodecError> {
        Self::decode_reader(ImageReader::open(path)?)
    }

    fn resize(&self, image: DecodedImage, request: &ResizeRequest) -> DecodedImage {
        let plan = plan_resize(image.dimensions(), request);
        DecodedImage {
            image: apply_plan(image.image, plan),
            orientation: image.orientation,
        }
    }

    fn encode(&self, image: &DecodedImage, quality: u8) -> Result<Vec<u8>, CodecError> {
        let quality = f32::from(quality.clamp(1, 100));
        let (width, height) = image.dimensions();
        let encoded = if image.image.color().has_alpha() {
            let rgba = image.image.to_rgba8();
            webp::Encoder::from_rgba(&rgba, width, height).encode_simple(false, quality)
        } else {
            let rgb = image.image.to_rgb8();
            webp::Encoder::from_rgb(&rgb, width, height).encode_simple(false, quality)
        };
        encoded
            .map(|memory| memory.to_vec())
            .map_err(|e| CodecError::Encode(format!("{e:?}")))
    }

    fn probe(&self, data: &[u8]) -> Result<ImageMetadata, CodecError> {
        Self::probe_reader(ImageReader::new(Cursor::new(data)))
    }

    fn probe_file(&self, path: &Path) -> Result<ImageMetadata, CodecError> {
        let stat = std::fs::metadata(path)?;
        let modified = stat.modified().ok();
        if let Some(hit) = self.cache.get(path, modified, stat.len()) {
            return Ok(hit);
        }
        let metadata = Self::probe_reader(ImageReader::open(path)?)?;
        self.cache.insert(path, modified, stat.len(), &metadata);
        Ok(metadata)
    }

    fn cache(&self) -> &CodecCache {
        &self.cache
    }
}

fn format_name(format: ImageFormat) -> String {
    match format {
        ImageFormat::Jpeg => "jpeg".to_owned(),
        ImageFormat::Png => "png".to_owned(),
        ImageFormat::Gif => "gif".to_owned(),
        ImageFormat::WebP => "webp".to_owned(),
        other => other
            .extensions_str()
            .first()
            .copied()
            .unwrap_or("unknown")
            .to_owned(),
    }
}

/// Geometry of a resize, computed before touching any pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResizePlan {
    Keep,
    /// Resample to exactly this size
    Scale { width: u32, height: u32 },
    /// Crop the `(x, y, width, height)` source box, then resample it to `width` x `height`
    CropScale {
        crop: (u32, u32, u32, u32),
        width: u32,
        height: u32,
    },
    /// Resample to `scaled`, then center on a transparent `width` x `height` canvas
    ScalePad {
        scaled: (u32, u32),
        width: u32,
        height: u32,
    },
}

fn scaled(value: u32, factor: f64) -> u32 {
    // pixel dimensions are far below f64 precision limits
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let result = (f64::from(value) * factor).round() as u32;
    result.max(1)
}

/// Largest centered box of the source with the aspect ratio of `target`.
///
/// Cropping before resampling keeps the intermediate image no larger than the source.
fn cover_box((src_w, src_h): (u32, u32), (width, height): (u32, u32)) -> (u32, u32, u32, u32) {
    let ratio = |a: u32, b: u32, c: u32| -> u32 {
        let v = (u64::from(a) * u64::from(b) + u64::from(c) / 2) / u64::from(c);
        u32::try_from(v).unwrap_or(u32::MAX)
    };
    let (crop_w, crop_h) = if u64::from(src_w) * u64::from(height) > u64::from(src_h) * u64::from(width) {
        (ratio(src_h, width, height).clamp(1, src_w), src_h)
    } else {
        (src_w, ratio(src_w, height, width).clamp(1, src_h))
    };
    ((src_w - crop_w) / 2, (src_h - crop_h) / 2, crop_w, crop_h)
}

pub(crate) fn plan_resize((src_w, src_h): (u32, u32), request: &ResizeRequest) -> ResizePlan {
    if src_w == 0 || src_h == 0 {
        return ResizePlan::Keep;
    }
    let up = request.allow_upscale;

    let (w, h) = match (request.width, request.height) {
        (None, None) => return ResizePlan::Keep,
        // a single dimension keeps the aspect ratio whatever the fit
        (Some(w), None) => {
            if !up && w >= src_w {
                return ResizePlan::Keep;
            }
            let factor = f64::from(w) / f64::from(src_w);
            return ResizePlan::Scale {
                width: w.max(1),
                height: scaled(src_h, factor),
            };
        }
        (None, Some(h)) => {
            if !up && h >= src_h {
                return ResizePlan::Keep;
            }
            let factor = f64::from(h) / f64::from(src_h);
            return ResizePlan::Scale {
                width: scaled(src_w, factor),
                height: h.max(1),
            };
        }
        (Some(w), Some(h)) => (w.max(1), h.max(1)),
    };

    let fx = f64::from(w) / f64::from(src_w);
    let fy = f64::from(h) / f64::from(src_h);

    match request.fit {
        Fit::Inside | Fit::Outside => {
            let mut factor = if request.fit == Fit::Inside {
                fx.min(fy)
            } else {
                fx.max(fy)
            };
            if !up {
                factor = factor.min(1.0);
            }
            let (width, height) = (scaled(src_w, factor), scaled(src_h, factor));
            if (width, height) == (src_w, src_h) {
                ResizePlan::Keep
            } else {
                ResizePlan::Scale { width, height }
            }
        }
        Fit::Fill => {
            let (width, height) = if up {
                (w, h)
            } else {
                (w.min(src_w), h.min(src_h))
            };
            if (width, height) == (src_w, src_h) {
                ResizePlan::Keep
            } else {
                ResizePlan::Scale { width, height }
            }
        }
        Fit::Cover => {
            let (width, height) = if up {
                (w, h)
            } else {
                (w.min(src_w), h.min(src_h))
            };
            let crop = cover_box((src_w, src_h), (width, height));
            if crop == (0, 0, src_w, src_h) && (width, height) == (src_w, src_h) {
                ResizePlan::Keep
            } else {
                ResizePlan::CropScale { crop, width, height }
            }
        }
        Fit::Contain => {
            let factor = fx.min(fy);
            if !up && factor >= 1.0 {
                return ResizePlan::Keep;
            }
            ResizePlan::ScalePad {
                scaled: (scaled(src_w, factor).min(w), scaled(src_h, factor).min(h)),
                width: w,
                height: h,
            }
        }
    }
}

fn apply_plan(image: DynamicImage, plan: ResizePlan) -> DynamicImage {
    match plan {
        ResizePlan::Keep => image,
        ResizePlan::Scale { width, height } => image.resize_exact(width, height, FILTER),
        ResizePlan::CropScale {
            crop: (x, y, cw, ch),
            width,
            height,
        } => {
            let cropped = image.crop_imm(x, y, cw, ch);
            if (cw, ch) == (width, height) {
                cropped
            } else {
                cropped.resize_exact(width, height, FILTER)
            }
        }
        ResizePlan::ScalePad {
            scaled: (sw, sh),
            width,
            height,
        } => {
            let resized = image.resize_exact(sw, sh, FILTER).to_rgba8();
            let mut canvas = RgbaImage::new(width, height);
            imageops::overlay(
                &mut canvas,
                &resized,
                i64::from((width - sw) / 2),
                i64::from((height - sh) / 2),
            );
            DynamicImage::ImageRgba8(canvas)
        }
    }
}
