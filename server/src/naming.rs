//! Deterministic naming of stored artifacts.
//!
//! Every upload produces one [`ArtifactSet`]: a directory
//! `{folder}/{YYYY}/{MM}`, a stem `{unixMillis}-{id}` and an extension. The
//! three stored files differ only by the [`Variant`] suffix inserted before the
//! extension:
//!
//! ```text
//! blog/2026/10/1760880000000-a1B2c3.webp
//! blog/2026/10/1760880000000-a1B2c3-thumb.webp
//! blog/2026/10/1760880000000-a1B2c3-small.webp
//! ```
//!
//! Generation, listing and deletion all go through this module so the suffix
//! convention lives in one place.

use chrono::{DateTime, Local};
use rand::Rng;
use rand::distributions::Alphanumeric;

use crate::folder::DEFAULT_FOLDER;

/// Extension of every stored artifact.
pub const OUTPUT_EXTENSION: &str = "webp";

const ID_LEN: usize = 6;
const SEP: char = '/';

/// Kind of a stored artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    Original,
    Thumbnail,
    Small,
}

impl Variant {
    pub const ALL: [Variant; 3] = [Variant::Original, Variant::Thumbnail, Variant::Small];

    /// Suffix inserted between the stem and the extension.
    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            Variant::Original => "",
            Variant::Thumbnail => "-thumb",
            Variant::Small => "-small",
        }
    }

    /// Marker a file name contains when it is this derivative, e.g. `-thumb.`
    fn marker(self) -> Option<String> {
        match self {
            Variant::Original => None,
            other => Some(format!("{}.", other.suffix())),
        }
    }
}

/// Returns `true` when the file name belongs to a thumbnail or small derivative.
#[must_use]
pub fn is_derivative(file_name: &str) -> bool {
    Variant::ALL
        .into_iter()
        .filter_map(Variant::marker)
        .any(|marker| file_name.contains(&marker))
}

/// Inserts `suffix` right before the final extension of `path`.
///
/// Pure string transform. A path whose last segment has no extension is
/// returned unchanged.
#[must_use]
pub fn derive_variant(path: &str, suffix: &str) -> String {
    match split_extension(path) {
        Some((base, ext)) => format!("{base}{suffix}.{ext}"),
        None => path.to_owned(),
    }
}

/// Splits `path` into everything before the final `.ext` and the extension itself.
fn split_extension(path: &str) -> Option<(&str, &str)> {
    let name_start = path.rfind(SEP).map_or(0, |ix| ix + 1);
    let dot = path[name_start..].rfind('.')? + name_start;
    let ext = &path[dot + 1..];
    let word = !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    // a leading dot marks a hidden file, not an extension
    if word && dot > name_start {
        Some((&path[..dot], ext))
    } else {
        None
    }
}

/// The shared stem of one upload and the paths of all its variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSet {
    dir: String,
    stem: String,
    ext: String,
}

impl ArtifactSet {
    /// Creates the artifact set for a new upload into `folder`.
    ///
    /// Uniqueness relies on the millisecond timestamp plus a short random id,
    /// nothing on disk is checked.
    #[must_use]
    pub fn new(folder: &str, now: DateTime<Local>) -> Self {
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(ID_LEN)
            .map(char::from)
            .collect();
        Self::with_id(folder, now, &id)
    }

    #[must_use]
    pub fn with_id(folder: &str, now: DateTime<Local>, id: &str) -> Self {
        Self {
            dir: format!("{folder}/{}", now.format("%Y/%m")),
            stem: format!("{}-{id}", now.timestamp_millis()),
            ext: OUTPUT_EXTENSION.to_owned(),
        }
    }

    /// Rebuilds the set from the relative path of a stored original.
    ///
    /// Returns `None` when the path has no file name with an extension or
    /// names a derivative rather than an original.
    #[must_use]
    pub fn from_original(relative_path: &str) -> Option<Self> {
        let (base, ext) = split_extension(relative_path)?;
        let (dir, stem) = match base.rfind(SEP) {
            Some(ix) => (&base[..ix], &base[ix + 1..]),
            None => ("", base),
        };
        if stem.is_empty() || is_derivative(&relative_path[dir.len()..]) {
            return None;
        }
        Some(Self {
            dir: dir.to_owned(),
            stem: stem.to_owned(),
            ext: ext.to_owned(),
        })
    }

    /// First path segment, the logical folder.
    #[must_use]
    pub fn folder(&self) -> &str {
        self.dir
            .split(SEP)
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_FOLDER)
    }

    #[must_use]
    pub fn stem(&self) -> &str {
        &self.stem
    }

    #[must_use]
    pub fn file_name(&self, variant: Variant) -> String {
        format!("{}{}.{}", self.stem, variant.suffix(), self.ext)
    }

    /// Path of `variant` relative to the upload root, `/` separated.
    #[must_use]
    pub fn relative_path(&self, variant: Variant) -> String {
        if self.dir.is_empty() {
            self.file_name(variant)
        } else {
            format!("{}{SEP}{}", self.dir, self.file_name(variant))
        }
    }

    /// Public URL of `variant` under `{public_url}/uploads`.
    #[must_use]
    pub fn url(&self, public_url: &str, variant: Variant) -> String {
        format!(
            "{}/uploads/{}",
            public_url.trim_end_matches(SEP),
            self.relative_path(variant)
        )
    }
}
