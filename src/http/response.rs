use std::ffi::OsString;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::buffer::Buffer;
use crate::http::mime;
use crate::http::mmap::MappedFile;

const HTTP_VERSION: &str = "HTTP/1.1";

/// Other-read permission bit.
const WORLD_READABLE: u32 = 0o004;

/// HTTP status codes supported by the server.
///
/// - `Ok` (200): File served
/// - `BadRequest` (400): Malformed request, and the fallback for any
///   status the server does not know
/// - `Forbidden` (403): File exists but is not world-readable
/// - `NotFound` (404): File missing, or the path names a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 200 OK
    Ok,
    /// 400 Bad Request
    BadRequest,
    /// 403 Forbidden
    Forbidden,
    /// 404 Not Found
    NotFound,
}

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use lantern::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// assert_eq!(StatusCode::NotFound.as_u16(), 404);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::BadRequest => 400,
            StatusCode::Forbidden => 403,
            StatusCode::NotFound => 404,
        }
    }

    /// Returns the standard HTTP reason phrase for this status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use lantern::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.reason_phrase(), "OK");
    /// assert_eq!(StatusCode::Forbidden.reason_phrase(), "Forbidden");
    /// ```
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::NotFound => "Not Found",
        }
    }

    /// Maps a numeric code to a known status, `None` for anything else.
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            200 => Some(StatusCode::Ok),
            400 => Some(StatusCode::BadRequest),
            403 => Some(StatusCode::Forbidden),
            404 => Some(StatusCode::NotFound),
            _ => None,
        }
    }

    /// Page under the document root served for an error status.
    fn error_page(&self) -> Option<&'static str> {
        match self {
            StatusCode::Ok => None,
            StatusCode::BadRequest => Some("/400.html"),
            StatusCode::Forbidden => Some("/403.html"),
            StatusCode::NotFound => Some("/404.html"),
        }
    }

    fn message(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::BadRequest => "Malformed request",
            StatusCode::Forbidden => "Permission denied",
            StatusCode::NotFound => "File Not Found",
        }
    }
}

/// Builds the response for one request: status line and headers go into the
/// connection's write buffer, and the body is either a memory-mapped file or
/// a small generated HTML error page appended after the headers.
///
/// A response is re-initialised for every request on a connection; the
/// mapping of the previous body is released at that point.
#[derive(Debug)]
pub struct Response {
    root: PathBuf,
    path: String,
    keep_alive: bool,
    requested: u16,
    status: StatusCode,
    file: Option<MappedFile>,
}

impl Response {
    pub fn new() -> Self {
        Self {
            root: PathBuf::new(),
            path: String::new(),
            keep_alive: false,
            requested: 200,
            status: StatusCode::Ok,
            file: None,
        }
    }

    /// Prepare for a new request.
    ///
    /// # Arguments
    ///
    /// * `root` - Document root
    /// * `path` - Canonical request path; empty when the request line could not be parsed
    /// * `keep_alive` - Whether the client asked to keep the connection open
    /// * `code` - Status the caller wants to send; the file checks may override it
    pub fn init(&mut self, root: &Path, path: &str, keep_alive: bool, code: u16) {
        self.unmap_file();
        self.root = root.to_path_buf();
        self.path = path.to_string();
        self.keep_alive = keep_alive;
        self.requested = code;
        self.status = StatusCode::from_u16(code).unwrap_or(StatusCode::BadRequest);
    }

    /// Write the status line and headers into `buf`, map the body file and,
    /// when no file can be served, append a generated error page.
    pub fn make_response(&mut self, buf: &mut Buffer) {
        let mut code = self.requested;
        if !self.path.is_empty() {
            match fs::metadata(self.full_path(&self.path)) {
                Err(_) => code = 404,
                Ok(meta) if meta.is_dir() => code = 404,
                Ok(meta) if meta.permissions().mode() & WORLD_READABLE == 0 => code = 403,
                Ok(_) => {}
            }
        }
        self.status = StatusCode::from_u16(code).unwrap_or(StatusCode::BadRequest);

        let mut serve_file = !self.path.is_empty();
        if let Some(page) = self.status.error_page() {
            serve_file = self.is_readable(page);
            self.path = page.to_string();
        }

        tracing::debug!(
            path = %self.path,
            code = self.status.as_u16(),
            keep_alive = self.keep_alive,
            "building response"
        );

        self.add_status_line(buf);
        self.add_headers(buf);
        if serve_file {
            self.add_content(buf);
        } else {
            self.add_error_content(buf, self.status.message());
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> u16 {
        self.status.as_u16()
    }

    /// Path actually served, after error-page substitution.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// The mapped body, empty when there is none.
    pub fn file(&self) -> &[u8] {
        self.file
            .as_ref()
            .map(MappedFile::as_slice)
            .unwrap_or_default()
    }

    pub fn file_len(&self) -> usize {
        self.file.as_ref().map_or(0, MappedFile::len)
    }

    pub fn unmap_file(&mut self) {
        self.file = None;
    }

    fn full_path(&self, path: &str) -> PathBuf {
        let mut full = OsString::from(self.root.as_os_str());
        full.push(path);
        PathBuf::from(full)
    }

    fn is_readable(&self, path: &str) -> bool {
        fs::metadata(self.full_path(path)).is_ok_and(|meta| {
            !meta.is_dir() && meta.permissions().mode() & WORLD_READABLE != 0
        })
    }

    fn add_status_line(&self, buf: &mut Buffer) {
        buf.append_str(&format!(
            "{} {} {}\r\n",
            HTTP_VERSION,
            self.status.as_u16(),
            self.status.reason_phrase()
        ));
    }

    fn add_headers(&self, buf: &mut Buffer) {
        if self.keep_alive {
            buf.append_str("Connection: keep-alive\r\n");
            buf.append_str("keep-alive: max=6, timeout=120\r\n");
        } else {
            buf.append_str("Connection: close\r\n");
        }
        buf.append_str(&format!("Content-type: {}\r\n", mime::content_type(&self.path)));
    }

    fn add_content(&mut self, buf: &mut Buffer) {
        let full = self.full_path(&self.path);
        match MappedFile::open(&full) {
            Ok(file) => {
                self.file = file;
                buf.append_str(&format!("Content-length: {}\r\n\r\n", self.file_len()));
            }
            Err(e) => {
                tracing::warn!(path = %full.display(), error = %e, "failed to map file");
                self.add_error_content(buf, "File Not Found");
            }
        }
    }

    fn add_error_content(&self, buf: &mut Buffer, message: &str) {
        let body = format!(
            "<html><title>Error</title><body bgcolor=\"ffffff\">{} : {}\n<p>{}</p><hr><em>lantern</em></body></html>",
            self.status.as_u16(),
            self.status.reason_phrase(),
            message,
        );
        buf.append_str(&format!("Content-length: {}\r\n\r\n", body.len()));
        buf.append_str(&body);
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}
