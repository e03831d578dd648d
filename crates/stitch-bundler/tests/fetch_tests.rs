//! `RemoteFetcher` against a local HTTP responder.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use stitch_bundler::config::CdnConfig;
use stitch_bundler::{Fetch, FetchCache, FetchError, RemoteFetcher};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

/// Minimal HTTP/1.1 server with a fixed route table.
struct TestServer {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl TestServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(respond(stream));
            }
        });
        Self { addr, hits }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn respond(mut stream: TcpStream) {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }
    let request = String::from_utf8_lossy(&request);
    let path = request.split_whitespace().nth(1).unwrap_or("/");

    let (status, headers, body) = match path {
        "/npm/pkg@1.0.0/index.js" => ("200 OK", String::new(), "export default 1;"),
        "/npm/pkg@latest/index.js" => (
            "302 Found",
            "Location: /npm/pkg@1.0.0/index.js\r\n".to_string(),
            "",
        ),
        "/slow" => {
            tokio::time::sleep(Duration::from_secs(30)).await;
            ("200 OK", String::new(), "late")
        }
        _ => ("404 Not Found", String::new(), "not found"),
    };
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n{headers}\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

fn fetcher() -> RemoteFetcher {
    RemoteFetcher::new(&CdnConfig::default()).unwrap()
}

#[tokio::test]
async fn successful_responses_are_cached() {
    let server = TestServer::start().await;
    let fetcher = fetcher();
    let token = CancellationToken::new();
    let url = server.url("/npm/pkg@1.0.0/index.js");

    let body = fetcher.fetch(&url, &token).await.unwrap();
    assert_eq!(&body[..], b"export default 1;");
    let again = fetcher.fetch(&url, &token).await.unwrap();
    assert_eq!(body, again);
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn redirects_are_followed_and_both_urls_cached() {
    let server = TestServer::start().await;
    let cache = FetchCache::new();
    let fetcher = RemoteFetcher::with_cache(&CdnConfig::default(), cache.clone()).unwrap();
    let token = CancellationToken::new();

    let body = fetcher
        .fetch(&server.url("/npm/pkg@latest/index.js"), &token)
        .await
        .unwrap();
    assert_eq!(&body[..], b"export default 1;");
    assert!(cache.get(&server.url("/npm/pkg@latest/index.js")).is_some());
    assert!(cache.get(&server.url("/npm/pkg@1.0.0/index.js")).is_some());

    let hits = server.hits();
    fetcher
        .fetch(&server.url("/npm/pkg@1.0.0/index.js"), &token)
        .await
        .unwrap();
    assert_eq!(server.hits(), hits);
}

#[tokio::test]
async fn error_statuses_are_reported_and_not_cached() {
    let server = TestServer::start().await;
    let fetcher = fetcher();
    let token = CancellationToken::new();
    let url = server.url("/npm/missing@1.0.0/index.js");

    let err = fetcher.fetch(&url, &token).await.unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert!(err.is_not_found());
    assert!(fetcher.cache().is_empty());

    fetcher.fetch(&url, &token).await.unwrap_err();
    assert_eq!(server.hits(), 2);
}

#[tokio::test]
async fn cancellation_aborts_in_flight_requests() {
    let server = TestServer::start().await;
    let fetcher = fetcher();
    let token = CancellationToken::new();

    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        fetcher.fetch(&server.url("/slow"), &token),
    )
    .await
    .expect("fetch returned promptly");
    assert_eq!(result.unwrap_err(), FetchError::Canceled);
}

#[tokio::test]
async fn canceled_token_skips_the_network() {
    let server = TestServer::start().await;
    let fetcher = fetcher();
    let token = CancellationToken::new();
    token.cancel();

    let err = fetcher
        .fetch(&server.url("/npm/pkg@1.0.0/index.js"), &token)
        .await
        .unwrap_err();
    assert_eq!(err, FetchError::Canceled);
    assert_eq!(server.hits(), 0);
}

#[tokio::test]
async fn unreachable_hosts_are_network_errors() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = fetcher()
        .fetch(&format!("http://{addr}/x"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Network { .. }), "{err:?}");
}
