/// Folder used when none is given or nothing survives sanitizing.
pub const DEFAULT_FOLDER: &str = "general";

const MAX_FOLDER_LEN: usize = 50;

/// Turns user input into a safe first path segment.
///
/// Keeps ASCII letters, digits, `-` and `_`, truncates to 50 characters and
/// falls back to [`DEFAULT_FOLDER`] when the result is empty.
#[must_use]
pub fn sanitize_folder(raw: Option<&str>) -> String {
    let folder: String = raw
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .take(MAX_FOLDER_LEN)
        .collect();

    if folder.is_empty() {
        DEFAULT_FOLDER.to_owned()
    } else {
        folder
    }
}
