use lantern::config::{ServerConfig, TriggerMode};
use lantern::server::reactor::{BUSY_MESSAGE, Reactor, ReactorHandle};
use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::fs::PermissionsExt;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tempfile::TempDir;

const INDEX: &[u8] = b"<html><body>lantern index</body></html>";
const ALL_MODES: [TriggerMode; 4] = [
    TriggerMode::Level,
    TriggerMode::ConnEdge,
    TriggerMode::ListenEdge,
    TriggerMode::Edge,
];

struct TestServer {
    addr: SocketAddr,
    handle: ReactorHandle,
    thread: Option<JoinHandle<anyhow::Result<()>>>,
    _root: TempDir,
}

impl TestServer {
    fn start(mode: TriggerMode, configure: impl FnOnce(&mut ServerConfig)) -> Self {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("index.html"), INDEX).unwrap();
        fs::write(root.path().join("big.bin"), big_body()).unwrap();
        let secret = root.path().join("secret.html");
        fs::write(&secret, b"hidden").unwrap();
        fs::set_permissions(&secret, fs::Permissions::from_mode(0o600)).unwrap();

        let mut cfg = ServerConfig {
            trigger_mode: mode,
            workers: 4,
            root: root.path().to_path_buf(),
            ..ServerConfig::default()
        };
        configure(&mut cfg);

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut reactor = Reactor::with_listener(&cfg, listener).unwrap();
        let addr = reactor.local_addr().unwrap();
        let handle = reactor.handle();
        let thread = thread::spawn(move || reactor.run());

        Self {
            addr,
            handle,
            thread: Some(thread),
            _root: root,
        }
    }

    fn connect(&self) -> TcpStream {
        let stream = TcpStream::connect(self.addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        stream
    }

    fn stop(&mut self) {
        self.handle.shutdown();
        if let Some(thread) = self.thread.take() {
            thread.join().unwrap().unwrap();
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn big_body() -> Vec<u8> {
    (0..1_500_000u32).map(|i| (i % 253) as u8).collect()
}

/// Read one response: status line and headers, then `Content-length` bytes.
fn read_response(reader: &mut BufReader<TcpStream>) -> (String, Vec<u8>) {
    let mut head = String::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).unwrap();
        assert!(n > 0, "connection closed mid-headers: {:?}", head);
        head.push_str(&line);
        if line == "\r\n" {
            break;
        }
    }

    let len: usize = head
        .lines()
        .find_map(|l| l.strip_prefix("Content-length: "))
        .expect("no Content-length header")
        .trim()
        .parse()
        .unwrap();
    let mut body = vec![0; len];
    reader.read_exact(&mut body).unwrap();
    (head, body)
}

fn request(server: &TestServer, raw: &str) -> (String, Vec<u8>) {
    let mut stream = server.connect();
    stream.write_all(raw.as_bytes()).unwrap();
    let mut reader = BufReader::new(stream);
    read_response(&mut reader)
}

#[test]
fn test_serves_index_in_every_trigger_mode() {
    for mode in ALL_MODES {
        let server = TestServer::start(mode, |_| {});

        let (head, body) = request(&server, "GET / HTTP/1.1\r\nHost: localhost\r\n\r\n");

        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "{:?}: {}", mode, head);
        assert!(head.contains("Connection: close\r\n"));
        assert!(head.contains("Content-type: text/html\r\n"));
        assert_eq!(body, INDEX);
    }
}

#[test]
fn test_large_file_survives_partial_writes() {
    for mode in ALL_MODES {
        let server = TestServer::start(mode, |_| {});
        let mut stream = server.connect();
        stream
            .write_all(b"GET /big.bin HTTP/1.1\r\n\r\n")
            .unwrap();

        // let the socket buffer fill so the server hits would-block
        thread::sleep(Duration::from_millis(50));
        let mut all = Vec::new();
        stream.read_to_end(&mut all).unwrap();

        let split = all.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
        let head = String::from_utf8_lossy(&all[..split]);
        assert!(head.contains("Content-length: 1500000\r\n"), "{:?}", mode);
        assert!(all[split..] == big_body()[..], "{:?}: body mismatch", mode);
    }
}

#[test]
fn test_keep_alive_sequential_and_pipelined() {
    let server = TestServer::start(TriggerMode::Edge, |_| {});
    let stream = server.connect();
    let mut writer = stream.try_clone().unwrap();
    let mut reader = BufReader::new(stream);
    let keep = "GET /index.html HTTP/1.1\r\nConnection: keep-alive\r\n\r\n";

    writer.write_all(keep.as_bytes()).unwrap();
    let (head, body) = read_response(&mut reader);
    assert!(head.contains("Connection: keep-alive\r\nkeep-alive: max=6, timeout=120\r\n"));
    assert_eq!(body, INDEX);

    // two requests in a single segment
    writer
        .write_all(format!("{}{}", keep, "GET /nope HTTP/1.1\r\nConnection: keep-alive\r\n\r\n").as_bytes())
        .unwrap();
    let (head, body) = read_response(&mut reader);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(body, INDEX);
    let (head, _) = read_response(&mut reader);
    assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"));

    writer
        .write_all(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n")
        .unwrap();
    let (head, _) = read_response(&mut reader);
    assert!(head.contains("Connection: close\r\n"));
    let mut rest = Vec::new();
    assert_eq!(reader.read_to_end(&mut rest).unwrap(), 0);
}

#[test]
fn test_request_split_across_segments() {
    let server = TestServer::start(TriggerMode::Level, |_| {});
    let mut stream = server.connect();

    stream.write_all(b"GET /index.html HT").unwrap();
    thread::sleep(Duration::from_millis(50));
    stream.write_all(b"TP/1.1\r\nHost: x\r\n").unwrap();
    thread::sleep(Duration::from_millis(50));
    stream.write_all(b"\r\n").unwrap();

    let (head, body) = read_response(&mut BufReader::new(stream));
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(body, INDEX);
}

#[test]
fn test_error_statuses() {
    let server = TestServer::start(TriggerMode::Edge, |_| {});

    let (head, body) = request(&server, "GET /missing.html HTTP/1.1\r\n\r\n");
    assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert!(String::from_utf8_lossy(&body).contains("404 : Not Found"));

    let (head, _) = request(&server, "GET /secret.html HTTP/1.1\r\n\r\n");
    assert!(head.starts_with("HTTP/1.1 403 Forbidden\r\n"));

    let (head, body) = request(&server, "GARBAGE\r\n\r\n");
    assert!(head.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(head.contains("Connection: close\r\n"));
    assert!(String::from_utf8_lossy(&body).contains("Bad Request"));
}

#[test]
fn test_idle_connection_is_evicted() {
    let server = TestServer::start(TriggerMode::Edge, |cfg| cfg.idle_timeout_ms = 200);
    let mut stream = server.connect();

    let mut buf = [0u8; 16];
    // the server closes without sending anything
    assert_eq!(stream.read(&mut buf).unwrap(), 0);

    let stats = server.handle.stats();
    assert_eq!(stats.timed_out, 1);
    assert_eq!(stats.live_connections, 0);
}

#[test]
fn test_activity_extends_idle_deadline() {
    let server = TestServer::start(TriggerMode::Edge, |cfg| cfg.idle_timeout_ms = 300);
    let stream = server.connect();
    let mut writer = stream.try_clone().unwrap();
    let mut reader = BufReader::new(stream);

    for _ in 0..4 {
        thread::sleep(Duration::from_millis(150));
        writer
            .write_all(b"GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n")
            .unwrap();
        let (head, _) = read_response(&mut reader);
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    }
    assert_eq!(server.handle.stats().timed_out, 0);
}

#[test]
fn test_rejects_clients_at_capacity() {
    let server = TestServer::start(TriggerMode::Edge, |cfg| cfg.max_connections = 1);

    let first = server.connect();
    let mut writer = first.try_clone().unwrap();
    let mut reader = BufReader::new(first);
    writer
        .write_all(b"GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n")
        .unwrap();
    read_response(&mut reader);

    let mut second = server.connect();
    let mut reply = Vec::new();
    second.read_to_end(&mut reply).unwrap();
    assert_eq!(reply, BUSY_MESSAGE);

    let stats = server.handle.stats();
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.live_connections, 1);
}

#[test]
fn test_concurrent_clients_never_overlap() {
    for mode in [TriggerMode::Level, TriggerMode::Edge] {
        let server = TestServer::start(mode, |_| {});
        let addr = server.addr;

        let clients: Vec<_> = (0..8)
            .map(|_| {
                thread::spawn(move || {
                    let stream = TcpStream::connect(addr).unwrap();
                    stream
                        .set_read_timeout(Some(Duration::from_secs(10)))
                        .unwrap();
                    let mut writer = stream.try_clone().unwrap();
                    let mut reader = BufReader::new(stream);
                    for _ in 0..25 {
                        writer
                            .write_all(b"GET /index.html HTTP/1.1\r\nConnection: keep-alive\r\n\r\n")
                            .unwrap();
                        let (head, body) = read_response(&mut reader);
                        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
                        assert_eq!(body, INDEX);
                    }
                })
            })
            .collect();
        for client in clients {
            client.join().unwrap();
        }

        let stats = server.handle.stats();
        assert_eq!(stats.accepted, 8, "{:?}", mode);
        assert_eq!(stats.overlapping_tasks, 0, "{:?}", mode);
    }
}

#[test]
fn test_shutdown_closes_open_connections() {
    let mut server = TestServer::start(TriggerMode::Edge, |cfg| cfg.idle_timeout_ms = 0);
    let mut idle = server.connect();
    // make sure the connection is registered before stopping
    idle.write_all(b"GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n")
        .unwrap();
    let mut reader = BufReader::new(idle.try_clone().unwrap());
    read_response(&mut reader);

    server.stop();

    assert_eq!(server.handle.stats().live_connections, 0);
    let mut rest = Vec::new();
    assert_eq!(idle.read_to_end(&mut rest).unwrap(), 0);
}
