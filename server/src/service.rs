//! Orchestration of the core: the HTTP layer hands validated input to
//! [`ImageService`] and maps its results and errors.

use std::sync::Arc;

use chrono::{Local, SecondsFormat, Utc};
use kernel::{DeleteResult, ImageItem, ImageList, Pagination, SortOrder, Stats, UploadResult};

use crate::codec::{ImageCodec, ImageRsCodec};
use crate::config::Settings;
use crate::derivatives::{DerivativeGenerator, ORIGINAL_MAX, OptimizeParams, non_empty};
use crate::error::{Error, Result};
use crate::folder::sanitize_folder;
use crate::fs_store::FsStore;
use crate::naming::{ArtifactSet, Variant};
use crate::scanner::{DirectoryScanner, ImageRecord};
use crate::stats;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 20;
pub const MAX_LIMIT: u32 = 100;

/// An upload as received from the transport.
#[derive(Debug, Clone, Default)]
pub struct Upload {
    pub data: Vec<u8>,
    /// Declared MIME type of the file part
    pub content_type: Option<String>,
    /// Unsanitized folder field
    pub folder: Option<String>,
}

/// Validated listing parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub folder: Option<String>,
    pub page: u32,
    pub limit: u32,
    pub sort: SortOrder,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            folder: None,
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
            sort: SortOrder::Date,
        }
    }
}

impl ListQuery {
    /// Parses raw query values. Empty values count as absent.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for a page below 1, a limit outside `1..=100` or
    /// an unknown sort order.
    pub fn parse(
        folder: Option<&str>,
        page: Option<&str>,
        limit: Option<&str>,
        sort: Option<&str>,
    ) -> Result<Self> {
        let page = match non_empty(page) {
            Some(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|p| *p >= 1)
                .ok_or_else(|| Error::Validation("parameter \"page\" must be a number >= 1".into()))?,
            None => DEFAULT_PAGE,
        };
        let limit = match non_empty(limit) {
            Some(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|l| (1..=MAX_LIMIT).contains(l))
                .ok_or_else(|| {
                    Error::Validation(format!(
                        "parameter \"limit\" must be a number between 1 and {MAX_LIMIT}"
                    ))
                })?,
            None => DEFAULT_LIMIT,
        };
        let sort = match non_empty(sort) {
            Some(raw) => raw.parse::<SortOrder>().map_err(Error::Validation)?,
            None => SortOrder::Date,
        };
        Ok(Self {
            folder: non_empty(folder).map(|f| sanitize_folder(Some(f))),
            page,
            limit,
            sort,
        })
    }
}

pub struct ImageService<C = ImageRsCodec> {
    settings: Settings,
    codec: Arc<C>,
    store: FsStore,
    generator: DerivativeGenerator<C>,
    scanner: DirectoryScanner<C>,
}

impl ImageService<ImageRsCodec> {
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        let store = FsStore::new(&settings.upload_dir);
        Self::with_parts(settings, Arc::new(ImageRsCodec::new()), store)
    }
}

impl<C: ImageCodec> ImageService<C> {
    #[must_use]
    pub fn with_parts(settings: Settings, codec: Arc<C>, store: FsStore) -> Self {
        Self {
            generator: DerivativeGenerator::new(Arc::clone(&codec), settings.default_quality),
            scanner: DirectoryScanner::new(Arc::clone(&codec)),
            codec,
            store,
            settings,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Validates, derives and stores an upload.
    ///
    /// All three variants are encoded before anything is written. If a write
    /// fails, variants already written are removed before the error is
    /// returned.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for an empty, oversized or disallowed file,
    /// [`Error::Processing`] when the image cannot be decoded or encoded and
    /// [`Error::Storage`] when writing fails.
    pub async fn upload(&self, upload: Upload) -> Result<UploadResult> {
        self.validate_upload(&upload)?;
        let folder = sanitize_folder(upload.folder.as_deref());
        let set = ArtifactSet::new(&folder, Local::now());
        self.store_as(upload.data, &set).await
    }

    async fn store_as(&self, source: Vec<u8>, set: &ArtifactSet) -> Result<UploadResult> {
        let source_size = source.len();
        let derivatives = self.generator.generate(source).await?;
        tracing::debug!(
            folder = set.folder(),
            stem = set.stem(),
            source_size,
            width = derivatives.metadata.width,
            height = derivatives.metadata.height,
            format = %derivatives.metadata.format,
            "derivatives generated"
        );

        let mut written: Vec<String> = Vec::with_capacity(Variant::ALL.len());
        let mut original_size = 0;
        for derivative in derivatives.iter() {
            let relative = set.relative_path(derivative.variant);
            match self.store.save(&derivative.data, &relative).await {
                Ok(size) => {
                    if derivative.variant == Variant::Original {
                        original_size = size;
                    }
                    written.push(relative);
                }
                Err(e) => {
                    self.discard(&written).await;
                    return Err(e);
                }
            }
        }

        let public_url = &self.settings.public_url;
        let result = UploadResult {
            url: set.url(public_url, Variant::Original),
            thumbnail: set.url(public_url, Variant::Thumbnail),
            small: set.url(public_url, Variant::Small),
            size: original_size,
            width: derivatives.metadata.width.min(ORIGINAL_MAX),
            height: derivatives.metadata.height,
            folder: set.folder().to_owned(),
            filename: set.file_name(Variant::Original),
            path: set.relative_path(Variant::Original),
        };
        tracing::info!(path = %result.path, size = result.size, "upload stored");
        Ok(result)
    }

    fn validate_upload(&self, upload: &Upload) -> Result<()> {
        if upload.data.is_empty() {
            return Err(Error::Validation("no image file provided".into()));
        }
        if upload.data.len() > self.settings.max_file_size {
            return Err(Error::Validation(format!(
                "file exceeds the maximum size of {} bytes",
                self.settings.max_file_size
            )));
        }
        match upload.content_type.as_deref() {
            Some(mime) if self.settings.is_allowed_mime_type(mime) => Ok(()),
            Some(mime) => Err(Error::Validation(format!(
                "file type '{mime}' is not allowed, expected one of: {}",
                self.settings.allowed_mime_types.join(", ")
            ))),
            None => Err(Error::Validation("file type is missing".into())),
        }
    }

    async fn discard(&self, written: &[String]) {
        for relative in written {
            if let Err(e) = self.store.delete(relative, self.codec.cache()).await {
                tracing::warn!(path = %relative, "cannot clean up partial upload: {e}");
            }
        }
    }

    /// Removes a stored original and both derivatives.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] when the path escapes the root or does not name an
    /// original, [`Error::NotFound`] when none of the three files existed and
    /// [`Error::Storage`] when a delete fails after retrying.
    pub async fn delete_image(&self, relative_path: &str) -> Result<DeleteResult> {
        self.store.resolve(relative_path)?;
        let set = ArtifactSet::from_original(relative_path).ok_or_else(|| {
            Error::Validation(format!("'{relative_path}' does not name a stored original"))
        })?;

        let mut deleted = Vec::with_capacity(Variant::ALL.len());
        for variant in Variant::ALL {
            let relative = set.relative_path(variant);
            if self.store.delete(&relative, self.codec.cache()).await? {
                deleted.push(relative);
            }
        }

        if deleted.is_empty() {
            return Err(Error::NotFound(relative_path.to_owned()));
        }
        tracing::info!(?deleted, "image deleted");
        Ok(DeleteResult { deleted })
    }

    /// Lists stored originals, newest first by default.
    ///
    /// # Errors
    ///
    /// [`Error::Storage`] when the tree cannot be read.
    pub async fn list(&self, query: &ListQuery) -> Result<ImageList> {
        let upload_root = self.store.root();
        let root = match &query.folder {
            Some(folder) => upload_root.join(folder),
            None => upload_root.to_path_buf(),
        };
        let page = self
            .scanner
            .list(upload_root, &root, query.sort, query.page, query.limit)
            .await?;

        Ok(ImageList {
            images: page.items.into_iter().map(|r| self.to_item(r)).collect(),
            pagination: Pagination {
                page: query.page as usize,
                limit: query.limit as usize,
                total: page.total,
                total_pages: page.total_pages,
            },
        })
    }

    fn to_item(&self, record: ImageRecord) -> ImageItem {
        let public_url = &self.settings.public_url;
        let url = |variant: Variant| match ArtifactSet::from_original(&record.relative_path) {
            Some(set) => set.url(public_url, variant),
            None => format!("{public_url}/uploads/{}", record.relative_path),
        };
        ImageItem {
            url: url(Variant::Original),
            thumbnail: url(Variant::Thumbnail),
            small: url(Variant::Small),
            size: record.size,
            created_at: record
                .created
                .with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            dimensions: record.dimensions,
            path: record.relative_path,
            folder: record.folder,
            filename: record.file_name,
        }
    }

    /// Recomputes usage figures from the live tree.
    ///
    /// # Errors
    ///
    /// [`Error::Storage`] when the tree cannot be read.
    pub async fn stats(&self) -> Result<Stats> {
        let root = self.store.root();
        let records = self.scanner.scan(root, root, false).await?;
        Ok(stats::aggregate(&records, Local::now()))
    }

    /// Re-encodes a stored file without persisting the result.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for a bad path, [`Error::NotFound`] when the file
    /// does not exist and [`Error::Processing`] when it cannot be re-encoded.
    pub async fn optimize(&self, relative_path: &str, params: OptimizeParams) -> Result<Vec<u8>> {
        if !self.store.exists(relative_path).await? {
            return Err(Error::NotFound(relative_path.to_owned()));
        }
        let path = self.store.resolve(relative_path)?;
        tracing::debug!(path = %relative_path, ?params, "optimizing on the fly");
        self.generator.on_the_fly(path, params).await
    }
}
