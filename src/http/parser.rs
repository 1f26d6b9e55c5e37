use crate::buffer::Buffer;
use crate::http::request::{Method, ParseState, Request};

/// Paths served by appending `.html`.
const DEFAULT_HTML: [&str; 4] = ["/index", "/welcome", "/video", "/picture"];

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    InvalidRequestLine,
    InvalidContentLength,
    /// More bytes are needed before the message can make progress.
    Incomplete,
}

/// Advance `req` through as much of `buf` as is available.
///
/// Parsing is incremental: lines are consumed from the buffer as they are
/// recognised and the parser position is kept in `req.state`, so a message
/// split across several reads resumes where it stopped. A request that
/// already reached `Finished` is reset before the next message is parsed,
/// which lets pipelined requests be taken one at a time from the same buffer.
///
/// # Returns
///
/// * `Ok(())` once the message is complete
/// * `Err(ParseError::Incomplete)` when the buffer runs dry mid-message
/// * any other `ParseError` for a malformed message
pub fn parse_request(req: &mut Request, buf: &mut Buffer) -> Result<(), ParseError> {
    if req.is_finished() {
        req.reset();
    }
    if buf.is_empty() {
        return Err(ParseError::Incomplete);
    }

    while req.state != ParseState::Finished {
        if req.state == ParseState::Body {
            parse_body(req, buf)?;
            break;
        }

        let end = buf.find_crlf().ok_or(ParseError::Incomplete)?;
        let line = String::from_utf8_lossy(&buf.peek()[..end]).into_owned();
        buf.consume(end + 2);

        match req.state {
            ParseState::RequestLine => {
                parse_request_line(req, &line)?;
                req.state = ParseState::Headers;
            }
            ParseState::Headers => {
                if parse_header(req, &line) {
                    if buf.peek() == b"\r\n" && !expects_body(req)? {
                        buf.consume(2);
                        req.state = ParseState::Finished;
                    }
                } else if line.is_empty() && !expects_body(req)? {
                    req.state = ParseState::Finished;
                } else {
                    req.state = ParseState::Body;
                }
            }
            ParseState::Body | ParseState::Finished => {}
        }
    }

    tracing::debug!(
        method = req.method.as_str(),
        path = %req.path,
        version = %req.version,
        "request parsed"
    );
    Ok(())
}

/// `METHOD SP PATH SP HTTP/VERSION`, exactly three space-separated fields.
fn parse_request_line(req: &mut Request, line: &str) -> Result<(), ParseError> {
    let mut parts = line.split(' ');
    let (Some(method), Some(path), Some(proto), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        tracing::warn!(line, "malformed request line");
        return Err(ParseError::InvalidRequestLine);
    };

    let version = proto
        .strip_prefix("HTTP/")
        .ok_or(ParseError::InvalidRequestLine)?;

    req.method = Method::from_token(method);
    req.path = canonical_path(path);
    req.version = version.to_string();
    Ok(())
}

/// `NAME: VALUE` with at most one space after the colon. Returns `false` for
/// a line that is not a header, which marks the end of the header block.
fn parse_header(req: &mut Request, line: &str) -> bool {
    let Some((key, value)) = line.split_once(':') else {
        return false;
    };
    let value = value.strip_prefix(' ').unwrap_or(value);
    req.headers.insert(key.to_string(), value.to_string());
    true
}

fn parse_body(req: &mut Request, buf: &mut Buffer) -> Result<(), ParseError> {
    let body = match req.content_length()? {
        Some(len) => {
            if buf.readable_bytes() < len {
                return Err(ParseError::Incomplete);
            }
            let body = buf.peek()[..len].to_vec();
            buf.consume(len);
            body
        }
        None => match buf.find_crlf() {
            Some(end) => {
                let body = buf.peek()[..end].to_vec();
                buf.consume(end + 2);
                body
            }
            None => {
                let body = buf.peek().to_vec();
                buf.consume_all();
                body
            }
        },
    };

    req.body = body;
    if req.method == Method::POST && is_form(req) {
        decode_form(req);
    }
    req.state = ParseState::Finished;
    Ok(())
}

/// Whether a body follows the header block: a positive Content-Length, or a
/// POST that did not declare one.
fn expects_body(req: &Request) -> Result<bool, ParseError> {
    Ok(match req.content_length()? {
        Some(len) => len > 0,
        None => req.method == Method::POST,
    })
}

fn is_form(req: &Request) -> bool {
    req.header("Content-Type")
        .and_then(|v| v.split(';').next())
        .is_some_and(|media| media.trim() == FORM_CONTENT_TYPE)
}

fn decode_form(req: &mut Request) {
    for (key, value) in url::form_urlencoded::parse(&req.body) {
        tracing::debug!(%key, %value, "form field");
        req.post.insert(key.into_owned(), value.into_owned());
    }
}

/// Map `/` to `/index.html` and the bare page names to their `.html` files.
pub fn canonical_path(path: &str) -> String {
    if path == "/" {
        return "/index.html".to_string();
    }
    if DEFAULT_HTML.contains(&path) {
        return format!("{}.html", path);
    }
    path.to_string()
}
