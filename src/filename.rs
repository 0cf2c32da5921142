//! Destination file naming for house photos

use crate::types::House;

/// Extension used when the photo URL carries none
pub const DEFAULT_EXTENSION: &str = "jpg";

/// Base used to resolve relative photo URLs such as `/photo.png`
const RELATIVE_BASE: &str = "http://localhost/";

/// Name of the file a house photo is stored in: `{id}-{address}.{ext}`
///
/// Path separators and control characters in the address are replaced with `_`
/// so the result is always a single file name.
pub fn photo_filename(house: &House) -> String {
    let ext = file_extension(&house.photo_url);
    format!("{}-{}.{}", house.id, sanitize(&house.address), ext)
}

/// Lowercase extension of the last path segment of `photo_url`
///
/// Falls back to [`DEFAULT_EXTENSION`] when the URL does not parse or its final
/// segment has no (or an empty) extension.
pub fn file_extension(photo_url: &str) -> String {
    let parsed = match url::Url::parse(photo_url) {
        Ok(u) => u,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            match url::Url::parse(RELATIVE_BASE).and_then(|base| base.join(photo_url)) {
                Ok(u) => u,
                Err(_) => return DEFAULT_EXTENSION.to_string(),
            }
        }
        Err(_) => return DEFAULT_EXTENSION.to_string(),
    };

    let last_segment = parsed.path().rsplit('/').next().unwrap_or_default();
    match last_segment.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => ext.to_lowercase(),
        _ => DEFAULT_EXTENSION.to_string(),
    }
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}
