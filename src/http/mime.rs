//! Content-Type lookup by file suffix.

pub const DEFAULT_TYPE: &str = "text/plain";

/// Returns the MIME type for `path`, chosen by the text from its last `.`
/// onwards. Paths without a dot, or with an unknown suffix, are served as
/// `text/plain`.
///
/// # Example
///
/// ```
/// # use lantern::http::mime::content_type;
/// assert_eq!(content_type("/index.html"), "text/html");
/// assert_eq!(content_type("/archive.tar.gz"), "application/x-gzip");
/// assert_eq!(content_type("/README"), "text/plain");
/// ```
pub fn content_type(path: &str) -> &'static str {
    match path.rfind('.') {
        Some(i) => by_suffix(&path[i..]),
        None => DEFAULT_TYPE,
    }
}

fn by_suffix(suffix: &str) -> &'static str {
    match suffix {
        ".html" => "text/html",
        ".xml" => "text/xml",
        ".xhtml" => "application/xhtml+xml",
        ".txt" => "text/plain",
        ".rtf" => "application/rtf",
        ".pdf" => "application/pdf",
        ".word" => "application/nsword",
        ".png" => "image/png",
        ".gif" => "image/gif",
        ".jpg" | ".jpeg" => "image/jpeg",
        ".au" => "audio/basic",
        ".mpeg" | ".mpg" => "video/mpeg",
        ".avi" => "video/x-msvideo",
        ".gz" => "application/x-gzip",
        ".tar" => "application/x-tar",
        ".css" => "text/css",
        ".js" => "text/javascript",
        _ => DEFAULT_TYPE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_suffixes() {
        assert_eq!(content_type("/a/b.css"), "text/css");
        assert_eq!(content_type("/photo.jpeg"), "image/jpeg");
        assert_eq!(content_type("/clip.mpg"), "video/mpeg");
    }

    #[test]
    fn suffix_is_case_sensitive() {
        assert_eq!(content_type("/INDEX.HTML"), DEFAULT_TYPE);
    }

    #[test]
    fn dot_in_directory_only() {
        assert_eq!(content_type("/v1.2/file"), DEFAULT_TYPE);
    }
}
