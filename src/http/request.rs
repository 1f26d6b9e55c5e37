use std::collections::HashMap;

use crate::http::parser::ParseError;

/// HTTP request methods.
///
/// Any token the client sends is accepted on the request line; methods the
/// server does not know by name are kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// PATCH - Partial modification of a resource
    PATCH,
    /// Any other method token
    Other(String),
}

/// Position of the request parser inside the current message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseState {
    #[default]
    RequestLine,
    Headers,
    Body,
    Finished,
}

/// Represents an HTTP request being parsed from, or already parsed from, a
/// connection's read buffer.
///
/// The same value is reused for every message on a keep-alive connection and
/// is reset before a new message is parsed.
#[derive(Debug, Clone, Default)]
pub struct Request {
    /// The HTTP method (GET, POST, etc.)
    pub method: Method,
    /// The canonical request path (e.g., "/index.html")
    pub path: String,
    /// HTTP version without the `HTTP/` prefix (e.g., "1.1")
    pub version: String,
    /// Request headers as key-value pairs
    pub headers: HashMap<String, String>,
    /// Request body
    pub body: Vec<u8>,
    /// Decoded `application/x-www-form-urlencoded` POST parameters
    pub post: HashMap<String, String>,
    /// Parser position
    pub state: ParseState,
}

impl Method {
    /// Parses an HTTP method from a string.
    ///
    /// # Arguments
    ///
    /// * `s` - String representation of the method (case-sensitive, typically uppercase)
    ///
    /// # Returns
    ///
    /// `Some(Method)` if the string matches a known method, `None` otherwise.
    ///
    /// # Example
    ///
    /// ```
    /// # use lantern::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("get"), None);
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            "HEAD" => Some(Method::HEAD),
            "OPTIONS" => Some(Method::OPTIONS),
            "PATCH" => Some(Method::PATCH),
            _ => None,
        }
    }

    /// Parses any method token, falling back to `Other`.
    pub fn from_token(s: &str) -> Self {
        Self::from_str(s).unwrap_or_else(|| Method::Other(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
            Method::Other(s) => s,
        }
    }
}

impl Default for Method {
    fn default() -> Self {
        Method::Other(String::new())
    }
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear every field and rewind the parser to the request line.
    pub fn reset(&mut self) {
        self.method = Method::default();
        self.path.clear();
        self.version.clear();
        self.headers.clear();
        self.body.clear();
        self.post.clear();
        self.state = ParseState::RequestLine;
    }

    pub fn is_finished(&self) -> bool {
        self.state == ParseState::Finished
    }

    /// Retrieves a header value by name, matched exactly as received.
    ///
    /// # Arguments
    ///
    /// * `key` - Header name to look up
    ///
    /// # Returns
    ///
    /// `Some(&str)` with the header value if present, `None` otherwise.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .get(key)
            .map(|v| v.as_str())
    }

    /// The declared `Content-Length`, `None` when the header is absent.
    ///
    /// A value that is not a non-negative integer is a protocol error.
    pub fn content_length(&self) -> Result<Option<usize>, ParseError> {
        self.header("Content-Length")
            .map(|v| {
                v.trim()
                    .parse::<usize>()
                    .map_err(|_| ParseError::InvalidContentLength)
            })
            .transpose()
    }

    /// Retrieves a decoded POST form parameter.
    pub fn post(&self, key: &str) -> Option<&str> {
        self.post.get(key).map(|v| v.as_str())
    }

    /// Whether the connection should stay open after the response.
    ///
    /// Only an HTTP/1.1 request carrying exactly `Connection: keep-alive`
    /// qualifies.
    pub fn is_keep_alive(&self) -> bool {
        self.header("Connection") == Some("keep-alive") && self.version == "1.1"
    }
}
