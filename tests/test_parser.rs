use lantern::buffer::Buffer;
use lantern::http::parser::{ParseError, parse_request};
use lantern::http::request::{Method, ParseState, Request};

fn parse(bytes: &[u8]) -> (Request, Buffer, Result<(), ParseError>) {
    let mut buf = Buffer::new();
    buf.append(bytes);
    let mut req = Request::new();
    let res = parse_request(&mut req, &mut buf);
    (req, buf, res)
}

#[test]
fn test_parse_simple_get_request() {
    let (parsed, buf, res) = parse(b"GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n");

    assert_eq!(res, Ok(()));
    assert_eq!(parsed.method, Method::GET);
    assert_eq!(parsed.path, "/index.html");
    assert_eq!(parsed.version, "1.1");
    assert_eq!(parsed.header("Host"), Some("example.com"));
    assert_eq!(parsed.state, ParseState::Finished);
    assert!(buf.is_empty());
}

#[test]
fn test_parse_canonicalizes_root_and_pages() {
    let (parsed, _, _) = parse(b"GET / HTTP/1.1\r\n\r\n");
    assert_eq!(parsed.path, "/index.html");

    let (parsed, _, _) = parse(b"GET /welcome HTTP/1.1\r\n\r\n");
    assert_eq!(parsed.path, "/welcome.html");

    let (parsed, _, _) = parse(b"GET /style.css HTTP/1.1\r\n\r\n");
    assert_eq!(parsed.path, "/style.css");
}

#[test]
fn test_parse_multiple_headers() {
    let (parsed, _, res) = parse(
        b"GET /path HTTP/1.1\r\nHost: example.com\r\nUser-Agent: test-client\r\nAccept: */*\r\n\r\n",
    );

    assert!(res.is_ok());
    assert_eq!(parsed.header("Host"), Some("example.com"));
    assert_eq!(parsed.header("User-Agent"), Some("test-client"));
    assert_eq!(parsed.header("Accept"), Some("*/*"));
}

#[test]
fn test_parse_header_value_keeps_inner_spacing() {
    let (parsed, _, _) = parse(b"GET / HTTP/1.1\r\nX-Pad:  two\r\nX-None:tight\r\n\r\n");

    assert_eq!(parsed.header("X-Pad"), Some(" two"));
    assert_eq!(parsed.header("X-None"), Some("tight"));
}

#[test]
fn test_parse_post_form_body() {
    let (parsed, buf, res) = parse(
        b"POST /login HTTP/1.1\r\n\
          Content-Type: application/x-www-form-urlencoded\r\n\
          Content-Length: 27\r\n\
          \r\n\
          user=ada+l&password=p%40ss1",
    );

    assert_eq!(res, Ok(()));
    assert_eq!(parsed.method, Method::POST);
    assert_eq!(parsed.body, b"user=ada+l&password=p%40ss1".to_vec());
    assert_eq!(parsed.post("user"), Some("ada l"));
    assert_eq!(parsed.post("password"), Some("p@ss1"));
    assert!(buf.is_empty());
}

#[test]
fn test_parse_post_waits_for_declared_body() {
    let mut buf = Buffer::new();
    buf.append(b"POST /api HTTP/1.1\r\nContent-Length: 5\r\n\r\nhe");
    let mut req = Request::new();

    assert_eq!(parse_request(&mut req, &mut buf), Err(ParseError::Incomplete));
    assert_eq!(req.state, ParseState::Body);

    buf.append(b"llo");
    assert_eq!(parse_request(&mut req, &mut buf), Ok(()));
    assert_eq!(req.body, b"hello".to_vec());
    // not a form, nothing decoded
    assert!(req.post.is_empty());
}

#[test]
fn test_parse_incomplete_request_line() {
    let (parsed, buf, res) = parse(b"GET /index.ht");

    assert_eq!(res, Err(ParseError::Incomplete));
    assert_eq!(parsed.state, ParseState::RequestLine);
    assert_eq!(buf.readable_bytes(), 13);
}

#[test]
fn test_parse_empty_buffer_is_incomplete() {
    let (_, _, res) = parse(b"");
    assert_eq!(res, Err(ParseError::Incomplete));
}

#[test]
fn test_parse_garbage_request_line() {
    let (parsed, _, res) = parse(b"GARBAGE\r\n\r\n");

    assert_eq!(res, Err(ParseError::InvalidRequestLine));
    assert!(parsed.path.is_empty());
}

#[test]
fn test_parse_rejects_non_http_protocol() {
    let (_, _, res) = parse(b"GET / FTP/1.0\r\n\r\n");
    assert_eq!(res, Err(ParseError::InvalidRequestLine));

    let (_, _, res) = parse(b"GET / HTTP/1.1 extra\r\n\r\n");
    assert_eq!(res, Err(ParseError::InvalidRequestLine));
}

#[test]
fn test_parse_unknown_method_is_kept() {
    let (parsed, _, res) = parse(b"BREW /pot HTTP/1.1\r\n\r\n");

    assert!(res.is_ok());
    assert_eq!(parsed.method, Method::Other("BREW".to_string()));
}

#[test]
fn test_parse_invalid_content_length() {
    let (_, _, res) = parse(b"POST /api HTTP/1.1\r\nContent-Length: lots\r\n\r\nabc");
    assert_eq!(res, Err(ParseError::InvalidContentLength));
}

#[test]
fn test_parse_pipelined_requests_one_at_a_time() {
    let mut buf = Buffer::new();
    buf.append(b"GET /a.html HTTP/1.1\r\nConnection: keep-alive\r\n\r\nGET /b.html HTTP/1.1\r\n\r\n");
    let mut req = Request::new();

    assert_eq!(parse_request(&mut req, &mut buf), Ok(()));
    assert_eq!(req.path, "/a.html");
    assert!(req.is_keep_alive());

    // a finished request is reset before the next one is parsed
    assert_eq!(parse_request(&mut req, &mut buf), Ok(()));
    assert_eq!(req.path, "/b.html");
    assert!(req.header("Connection").is_none());
    assert!(buf.is_empty());
}

#[test]
fn test_parse_non_header_line_ends_headers() {
    let (parsed, _, res) = parse(b"GET / HTTP/1.1\r\nHost: a\r\nnot a header\r\nrest\r\n");

    assert_eq!(res, Ok(()));
    assert_eq!(parsed.header("Host"), Some("a"));
    assert_eq!(parsed.body, b"rest".to_vec());
}

#[test]
fn test_parse_keep_alive_page_request() {
    let (parsed, buf, res) =
        parse(b"GET /index HTTP/1.1\r\nHost: a\r\nConnection: keep-alive\r\n\r\n");

    assert_eq!(res, Ok(()));
    assert_eq!(parsed.path, "/index.html");
    assert_eq!(parsed.version, "1.1");
    assert!(parsed.is_keep_alive());
    assert!(buf.is_empty());
}

#[test]
fn test_parse_post_form_without_content_length() {
    let (parsed, buf, res) = parse(
        b"POST /login HTTP/1.1\r\n\
          Content-Type: application/x-www-form-urlencoded\r\n\
          \r\n\
          a=1&b=2",
    );

    assert_eq!(res, Ok(()));
    assert_eq!(parsed.state, ParseState::Finished);
    assert_eq!(parsed.body, b"a=1&b=2".to_vec());
    assert_eq!(parsed.post("a"), Some("1"));
    assert_eq!(parsed.post("b"), Some("2"));
    assert!(buf.is_empty());
}
