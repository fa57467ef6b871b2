//! Final file names from source URIs and `Content-Disposition`.

/// Used when neither header nor URI yields a usable name.
pub const DEFAULT_FILENAME: &str = "download.bin";

/// Linux NAME_MAX.
const NAME_MAX: usize = 255;

/// Pick a safe file name: the `Content-Disposition` filename when present,
/// else the last path segment of `uri`, sanitized; `download.bin` otherwise.
pub fn derive_final_name(uri: &str, content_disposition: Option<&str>) -> String {
    content_disposition
        .and_then(disposition_filename)
        .or_else(|| last_path_segment(uri))
        .map(|raw| sanitize(&raw))
        .filter(|s| !s.is_empty() && s != "." && s != "..")
        .unwrap_or_else(|| DEFAULT_FILENAME.to_string())
}

fn last_path_segment(uri: &str) -> Option<String> {
    let parsed = url::Url::parse(uri).ok()?;
    let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    Some(segment.to_string())
}

/// `filename="..."` or `filename=token` from a Content-Disposition value.
fn disposition_filename(value: &str) -> Option<String> {
    value.split(';').find_map(|param| {
        let (name, v) = param.trim().split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("filename") {
            return None;
        }
        let v = v.trim();
        let v = v
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(v)
            .replace("\\\"", "\"");
        (!v.is_empty()).then_some(v)
    })
}

/// Replace separators, NUL, whitespace, and control characters with `_`,
/// collapse runs, trim dots and underscores, and cap the length.
fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let bad = c == '/' || c == '\\' || c.is_control() || c.is_whitespace();
        if bad {
            if !out.ends_with('_') {
                out.push('_');
            }
        } else {
            out.push(c);
        }
    }
    let trimmed = out.trim_matches(|c| c == '.' || c == '_');
    let mut take = trimmed.len().min(NAME_MAX);
    while !trimmed.is_char_boundary(take) {
        take -= 1;
    }
    trimmed[..take].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_uri_path() {
        assert_eq!(derive_final_name("https://example.com/a/b/debian-12.iso", None), "debian-12.iso");
        assert_eq!(derive_final_name("https://example.com/file.zip?token=abc", None), "file.zip");
    }

    #[test]
    fn disposition_overrides_uri() {
        assert_eq!(
            derive_final_name(
                "https://example.com/archive.zip",
                Some("attachment; filename=\"real name.tar.gz\"")
            ),
            "real_name.tar.gz"
        );
        assert_eq!(
            derive_final_name("https://example.com/x", Some("attachment; filename=simple.bin")),
            "simple.bin"
        );
    }

    #[test]
    fn falls_back_to_default() {
        assert_eq!(derive_final_name("https://example.com/", None), DEFAULT_FILENAME);
        assert_eq!(derive_final_name("not a uri", None), DEFAULT_FILENAME);
        assert_eq!(derive_final_name("https://example.com/..", None), DEFAULT_FILENAME);
    }

    #[test]
    fn sanitizes_separators_and_control_chars() {
        assert_eq!(sanitize("a/b\\c.txt"), "a_b_c.txt");
        assert_eq!(sanitize("  ..file\x00name.txt.. "), "file_name.txt");
        assert_eq!(sanitize(&"x".repeat(300)).len(), 255);
    }
}
