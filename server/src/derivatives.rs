//! Turning one uploaded image into the stored derivative set and serving
//! ad-hoc variants.

use std::path::PathBuf;
use std::sync::Arc;

use kernel::Fit;

use crate::codec::{CodecError, ImageCodec, ImageMetadata, ResizeRequest};
use crate::error::{Error, Result};
use crate::naming::Variant;

/// Bounding box of the optimized original.
pub const ORIGINAL_MAX: u32 = 1200;
pub const THUMBNAIL_SIZE: u32 = 300;
pub const THUMBNAIL_QUALITY: u8 = 75;
pub const SMALL_MAX: u32 = 600;
pub const SMALL_QUALITY: u8 = 78;

const MAX_DIMENSION: u32 = 5000;

/// Fixed parameters of one stored variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivativeSpec {
    pub variant: Variant,
    pub resize: ResizeRequest,
    pub quality: u8,
}

impl DerivativeSpec {
    #[must_use]
    pub fn for_variant(variant: Variant, original_quality: u8) -> Self {
        match variant {
            Variant::Original => Self {
                variant,
                resize: ResizeRequest::bounded(ORIGINAL_MAX, ORIGINAL_MAX, Fit::Inside),
                quality: original_quality,
            },
            // thumbnails always fill the square, even from tiny sources
            Variant::Thumbnail => Self {
                variant,
                resize: ResizeRequest {
                    allow_upscale: true,
                    ..ResizeRequest::bounded(THUMBNAIL_SIZE, THUMBNAIL_SIZE, Fit::Cover)
                },
                quality: THUMBNAIL_QUALITY,
            },
            Variant::Small => Self {
                variant,
                resize: ResizeRequest::bounded(SMALL_MAX, SMALL_MAX, Fit::Inside),
                quality: SMALL_QUALITY,
            },
        }
    }
}

/// One encoded artifact ready to be written.
#[derive(Debug, Clone)]
pub struct Derivative {
    pub variant: Variant,
    pub width: u32,
    pub height: u32,
    pub quality: u8,
    pub data: Vec<u8>,
}

/// The three stored variants of one upload plus the source metadata.
#[derive(Debug, Clone)]
pub struct Derivatives {
    pub original: Derivative,
    pub thumbnail: Derivative,
    pub small: Derivative,
    /// Metadata of the uploaded source, not of the optimized original
    pub metadata: ImageMetadata,
}

impl Derivatives {
    pub fn iter(&self) -> impl Iterator<Item = &Derivative> {
        [&self.original, &self.thumbnail, &self.small].into_iter()
    }
}

/// Validated parameters of an on-the-fly request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptimizeParams {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub quality: Option<u8>,
    pub fit: Fit,
}

impl OptimizeParams {
    /// Parses raw query values. Empty values count as absent.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] when a value is not a number, out of bounds or an
    /// unknown fit mode.
    pub fn parse(
        w: Option<&str>,
        h: Option<&str>,
        q: Option<&str>,
        fit: Option<&str>,
    ) -> Result<Self> {
        let width = parse_bounded(w, "w", "width", MAX_DIMENSION)?;
        let height = parse_bounded(h, "h", "height", MAX_DIMENSION)?;
        let quality = parse_bounded(q, "q", "quality", 100)?
            .map(|q| u8::try_from(q).unwrap_or(100));
        let fit = match non_empty(fit) {
            Some(raw) => raw.parse::<Fit>().map_err(Error::Validation)?,
            None => Fit::Inside,
        };
        Ok(Self {
            width,
            height,
            quality,
            fit,
        })
    }
}

pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_bounded(value: Option<&str>, name: &str, long: &str, max: u32) -> Result<Option<u32>> {
    let Some(raw) = non_empty(value) else {
        return Ok(None);
    };
    match raw.parse::<u32>() {
        Ok(n) if (1..=max).contains(&n) => Ok(Some(n)),
        _ => Err(Error::Validation(format!(
            "parameter \"{name}\" ({long}) must be a number between 1 and {max}"
        ))),
    }
}

/// Produces derivatives through an [`ImageCodec`] on the blocking pool.
pub struct DerivativeGenerator<C> {
    codec: Arc<C>,
    original_quality: u8,
}

impl<C: ImageCodec> DerivativeGenerator<C> {
    #[must_use]
    pub fn new(codec: Arc<C>, original_quality: u8) -> Self {
        Self {
            codec,
            original_quality: original_quality.clamp(1, 100),
        }
    }

    #[must_use]
    pub fn codec(&self) -> &Arc<C> {
        &self.codec
    }

    /// Builds the original, thumbnail and small variants of `source`.
    ///
    /// # Errors
    ///
    /// [`Error::Processing`] if any variant fails; nothing is returned then.
    pub async fn generate(&self, source: Vec<u8>) -> Result<Derivatives> {
        let codec = Arc::clone(&self.codec);
        let quality = self.original_quality;
        let derivatives =
            run_blocking(move || generate_with(codec.as_ref(), &source, quality)).await?;
        Ok(derivatives)
    }

    /// Re-encodes the stored file at `path` with ad-hoc parameters.
    ///
    /// Applies EXIF orientation, resizes only when a width or height is given
    /// (never upscaling) and always encodes WebP. Nothing is written.
    ///
    /// # Errors
    ///
    /// [`Error::Processing`] when the file cannot be decoded or encoded.
    pub async fn on_the_fly(&self, path: PathBuf, params: OptimizeParams) -> Result<Vec<u8>> {
        let codec = Arc::clone(&self.codec);
        let quality = params.quality.unwrap_or(self.original_quality);
        let data = run_blocking(move || {
            let codec = codec.as_ref();
            let mut image = codec.auto_rotate(codec.decode_file(&path)?);
            if params.width.is_some() || params.height.is_some() {
                let request = ResizeRequest {
                    width: params.width,
                    height: params.height,
                    fit: params.fit,
                    allow_upscale: false,
                };
                image = codec.resize(image, &request);
            }
            let image = codec.strip_metadata(image);
            codec.encode(&image, quality)
        })
        .await?;
        Ok(data)
    }
}

fn generate_with<C: ImageCodec + ?Sized>(
    codec: &C,
    source: &[u8],
    original_quality: u8,
) -> std::result::Result<Derivatives, CodecError> {
    let metadata = codec.probe(source)?;
    let decoded = codec.strip_metadata(codec.auto_rotate(codec.decode(source)?));

    let make = |variant: Variant| -> std::result::Result<Derivative, CodecError> {
        let spec = DerivativeSpec::for_variant(variant, original_quality);
        let resized = codec.resize(decoded.clone(), &spec.resize);
        let (width, height) = resized.dimensions();
        let data = codec.encode(&resized, spec.quality)?;
        tracing::debug!(
            variant = ?variant,
            width,
            height,
            bytes = data.len(),
            "derivative encoded"
        );
        Ok(Derivative {
            variant,
            width,
            height,
            quality: spec.quality,
            data,
        })
    };

    Ok(Derivatives {
        original: make(Variant::Original)?,
        thumbnail: make(Variant::Thumbnail)?,
        small: make(Variant::Small)?,
        metadata,
    })
}

async fn run_blocking<T, F>(job: F) -> std::result::Result<T, CodecError>
where
    F: FnOnce() -> std::result::Result<T, CodecError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| CodecError::Worker(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ImageRsCodec;
    use crate::codec::tests::png_bytes;
    use rstest::rstest;

    fn generator() -> DerivativeGenerator<ImageRsCodec> {
        DerivativeGenerator::new(Arc::new(ImageRsCodec::new()), 80)
    }

    #[rstest]
    #[case((2400, 1600), (1200, 800), (300, 300), (600, 400))]
    #[case((1600, 2400), (800, 1200), (300, 300), (400, 600))]
    #[case((800, 500), (800, 500), (300, 300), (600, 375))]
    #[case((100, 40), (100, 40), (300, 300), (100, 40))]
    #[trace]
    #[tokio::test]
    async fn generate_respects_fit_policies(
        #[case] source: (u32, u32),
        #[case] original: (u32, u32),
        #[case] thumbnail: (u32, u32),
        #[case] small: (u32, u32),
    ) {
        // Arrange
        let generator = generator();

        // Act
        let derivatives = generator
            .generate(png_bytes(source.0, source.1))
            .await
            .unwrap();

        // Assert
        assert_eq!((derivatives.original.width, derivatives.original.height), original);
        assert_eq!((derivatives.thumbnail.width, derivatives.thumbnail.height), thumbnail);
        assert_eq!((derivatives.small.width, derivatives.small.height), small);
        assert_eq!((derivatives.metadata.width, derivatives.metadata.height), source);
        assert_eq!(derivatives.iter().count(), 3);
    }

    #[tokio::test]
    async fn generate_uses_fixed_qualities() {
        // Arrange
        let generator = DerivativeGenerator::new(Arc::new(ImageRsCodec::new()), 90);

        // Act
        let derivatives = generator.generate(png_bytes(20, 20)).await.unwrap();

        // Assert
        assert_eq!(derivatives.original.quality, 90);
        assert_eq!(derivatives.thumbnail.quality, THUMBNAIL_QUALITY);
        assert_eq!(derivatives.small.quality, SMALL_QUALITY);
    }

    #[tokio::test]
    async fn generate_rejects_garbage() {
        // Arrange
        let generator = generator();

        // Act
        let result = generator.generate(b"plain text, not pixels".to_vec()).await;

        // Assert
        assert!(matches!(result, Err(Error::Processing(_))));
    }

    #[rstest]
    #[case(None, None, None, None, OptimizeParams { width: None, height: None, quality: None, fit: Fit::Inside })]
    #[case(Some("100"), None, None, None, OptimizeParams { width: Some(100), height: None, quality: None, fit: Fit::Inside })]
    #[case(Some(""), Some("5000"), Some("1"), Some("cover"), OptimizeParams { width: None, height: Some(5000), quality: Some(1), fit: Fit::Cover })]
    #[case(Some("1"), Some("1"), Some("100"), Some("outside"), OptimizeParams { width: Some(1), height: Some(1), quality: Some(100), fit: Fit::Outside })]
    #[trace]
    fn parse_valid_params(
        #[case] w: Option<&str>,
        #[case] h: Option<&str>,
        #[case] q: Option<&str>,
        #[case] fit: Option<&str>,
        #[case] expected: OptimizeParams,
    ) {
        // Act
        let params = OptimizeParams::parse(w, h, q, fit).unwrap();

        // Assert
        assert_eq!(params, expected);
    }

    #[rstest]
    #[case(Some("0"), None, None, None)]
    #[case(Some("5001"), None, None, None)]
    #[case(Some("abc"), None, None, None)]
    #[case(Some("-5"), None, None, None)]
    #[case(None, Some("10.5"), None, None)]
    #[case(None, None, Some("0"), None)]
    #[case(None, None, Some("101"), None)]
    #[case(None, None, None, Some("stretch"))]
    #[trace]
    fn parse_invalid_params(
        #[case] w: Option<&str>,
        #[case] h: Option<&str>,
        #[case] q: Option<&str>,
        #[case] fit: Option<&str>,
    ) {
        // Act
        let result = OptimizeParams::parse(w, h, q, fit);

        // Assert
        assert!(matches!(result, Err(Error::Validation(_))));
    }
}
