use rompath_fetch::{FetchError, FetchOutcome, Fetcher, HttpFetcher};
use std::fs;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::Path;
use std::thread::{self, JoinHandle};
use tempfile::TempDir;

/// Serve a single canned HTTP response on a loopback port.
///
/// Returns the base URL and a handle yielding the request line received.
fn serve_once(response: Vec<u8>) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }
        stream.write_all(&response).unwrap();
        stream.flush().unwrap();

        let text = String::from_utf8_lossy(&request).to_string();
        text.lines().next().unwrap_or_default().to_string()
    });

    (format!("http://{}", addr), handle)
}

fn response_with_body(status: &str, declared: usize, body: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status, declared
    )
    .into_bytes();
    out.extend_from_slice(body);
    out
}

fn leftover_files(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .map(|rd| {
            rd.filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect()
        })
        .unwrap_or_default()
}

#[test]
fn downloads_exactly_the_declared_length() {
    let cache = TempDir::new().unwrap();
    let body = vec![0x5Au8; 12345];
    let (base, server) = serve_once(response_with_body("200 OK", body.len(), &body));

    let dest = cache.path().join("gameA.zip");
    let fetcher = HttpFetcher::new().unwrap();
    let outcome = fetcher
        .fetch(&format!("{}/split/gameA.zip", base), &dest)
        .unwrap();

    assert_eq!(outcome, FetchOutcome::Downloaded { bytes: 12345 });
    assert_eq!(fs::metadata(&dest).unwrap().len(), 12345);
    assert_eq!(server.join().unwrap(), "GET /split/gameA.zip HTTP/1.1");
    assert_eq!(leftover_files(cache.path()), vec!["gameA.zip".to_string()]);
}

#[test]
fn existing_nonempty_destination_skips_network() {
    let cache = TempDir::new().unwrap();
    let dest = cache.path().join("gameA.zip");
    fs::write(&dest, b"cached").unwrap();

    // Nothing listens here; any connection attempt would fail.
    let unused = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/split/gameA.zip", unused.local_addr().unwrap());
    drop(unused);

    let fetcher = HttpFetcher::new().unwrap();
    let outcome = fetcher.fetch(&url, &dest).unwrap();

    assert_eq!(outcome, FetchOutcome::AlreadyPresent);
    assert_eq!(fs::read(&dest).unwrap(), b"cached");
}

#[test]
fn non_success_status_creates_no_directory() {
    let cache = TempDir::new().unwrap();
    let (base, server) = serve_once(response_with_body("404 Not Found", 0, b""));

    let dest = cache.path().join("sub").join("gameA.zip");
    let fetcher = HttpFetcher::new().unwrap();
    let err = fetcher
        .fetch(&format!("{}/split/sub/gameA.zip", base), &dest)
        .unwrap_err();

    assert!(matches!(err, FetchError::Status { status: 404, .. }));
    assert!(!cache.path().join("sub").exists());
    server.join().unwrap();
}

#[test]
fn zero_declared_length_creates_no_directory() {
    let cache = TempDir::new().unwrap();
    let (base, server) = serve_once(response_with_body("200 OK", 0, b""));

    let dest = cache.path().join("sub").join("gameA.zip");
    let fetcher = HttpFetcher::new().unwrap();
    let err = fetcher
        .fetch(&format!("{}/split/sub/gameA.zip", base), &dest)
        .unwrap_err();

    assert!(matches!(err, FetchError::ZeroLength { .. }));
    assert!(!cache.path().join("sub").exists());
    server.join().unwrap();
}

#[test]
fn body_missing_after_declared_length_leaves_nothing_behind() {
    let cache = TempDir::new().unwrap();
    let (base, server) = serve_once(response_with_body("200 OK", 5, b""));

    let dest = cache.path().join("sub").join("gameA.zip");
    let fetcher = HttpFetcher::new().unwrap();
    let result = fetcher.fetch(&format!("{}/split/sub/gameA.zip", base), &dest);

    assert!(matches!(result, Err(FetchError::EmptyBody { .. })));
    assert!(!dest.exists());
    assert!(!cache.path().join("sub").exists());
    assert!(leftover_files(cache.path()).is_empty());
    server.join().unwrap();
}

#[test]
fn failed_fetch_prunes_every_directory_it_created() {
    let cache = TempDir::new().unwrap();
    let (base, server) = serve_once(response_with_body("200 OK", 5, b""));

    let dest = cache.path().join("a").join("b").join("gameA.zip");
    let fetcher = HttpFetcher::new().unwrap();
    let result = fetcher.fetch(&format!("{}/split/a/b/gameA.zip", base), &dest);

    assert!(result.is_err());
    assert!(!cache.path().join("a").exists());
    assert!(leftover_files(cache.path()).is_empty());
    server.join().unwrap();
}

#[test]
fn failed_fetch_keeps_directories_that_already_existed() {
    let cache = TempDir::new().unwrap();
    fs::create_dir(cache.path().join("a")).unwrap();
    let (base, server) = serve_once(response_with_body("200 OK", 5, b""));

    let dest = cache.path().join("a").join("b").join("gameA.zip");
    let fetcher = HttpFetcher::new().unwrap();
    let result = fetcher.fetch(&format!("{}/split/a/b/gameA.zip", base), &dest);

    assert!(result.is_err());
    assert!(cache.path().join("a").is_dir());
    assert!(leftover_files(&cache.path().join("a")).is_empty());
    server.join().unwrap();
}

#[test]
fn truncated_body_is_discarded() {
    let cache = TempDir::new().unwrap();
    let (base, server) = serve_once(response_with_body("200 OK", 10, b"abc"));

    let dest = cache.path().join("gameA.zip");
    let fetcher = HttpFetcher::new().unwrap();
    let result = fetcher.fetch(&format!("{}/split/gameA.zip", base), &dest);

    assert!(result.is_err());
    assert!(!dest.exists());
    assert!(leftover_files(cache.path()).is_empty());
    server.join().unwrap();
}

#[test]
fn refused_connection_is_connect_error() {
    let cache = TempDir::new().unwrap();
    let unused = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/split/gameA.zip", unused.local_addr().unwrap());
    drop(unused);

    let fetcher = HttpFetcher::new().unwrap();
    let err = fetcher
        .fetch(&url, &cache.path().join("gameA.zip"))
        .unwrap_err();

    assert!(matches!(err, FetchError::Connect { .. }));
    assert!(leftover_files(cache.path()).is_empty());
}
