//! End-to-end tests: a real proxy on an ephemeral port in front of a scripted origin.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use relay10::config::ProxyConfig;
use relay10::server::Server;
use relay10::state::ProxyState;

/// An origin that answers the n-th connection with the n-th scripted reply
/// (repeating the last) and records every request head it receives.
struct Origin {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
}

impl Origin {
    async fn start(replies: Vec<&'static [u8]>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let (seen, count) = (Arc::clone(&requests), Arc::clone(&connections));
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let n = count.fetch_add(1, Ordering::SeqCst);
                let reply = replies[n.min(replies.len() - 1)];
                let seen = Arc::clone(&seen);
                tokio::spawn(async move {
                    let mut head = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !head.ends_with(b"\r\n\r\n") {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => head.extend_from_slice(&buf[..n]),
                        }
                    }
                    seen.lock().await.push(String::from_utf8(head).unwrap());
                    let _ = stream.write_all(reply).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        Self {
            addr,
            requests,
            connections,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.addr.port(), path)
    }

    async fn requests(&self) -> Vec<String> {
        self.requests.lock().await.clone()
    }

    fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

async fn start_proxy(config: ProxyConfig) -> (SocketAddr, Arc<ProxyState>) {
    let server = Server::bind(config.port(0)).await.unwrap();
    let addr = server.local_addr();
    let state = server.state();
    tokio::spawn(server.run());
    (addr, state)
}

async fn proxy() -> (SocketAddr, Arc<ProxyState>) {
    start_proxy(
        ProxyConfig::default()
            .connect_timeout(Duration::from_secs(2))
            .upstream_read_timeout(Duration::from_secs(2)),
    )
    .await
}

/// Sends `raw` to the proxy and returns everything it sends back before closing.
async fn send(proxy: SocketAddr, raw: &str) -> Vec<u8> {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    out
}

async fn get(proxy: SocketAddr, url: &str) -> Vec<u8> {
    send(proxy, &format!("GET {url} HTTP/1.0\r\n\r\n")).await
}

#[tokio::test]
async fn control_command_answers_200_without_upstream() {
    let origin = Origin::start(vec![&b"HTTP/1.0 200 OK\r\n\r\n"[..]]).await;
    let (proxy, state) = proxy().await;

    let reply = get(proxy, &origin.url("/proxy/cache/enable")).await;
    assert_eq!(reply, b"HTTP/1.0 200 OK\r\n\r\n");
    assert!(state.cache().is_enabled());

    // Blocking every host does not stop control commands.
    get(proxy, &origin.url("/proxy/blocklist/add/127.0.0.1")).await;
    get(proxy, &origin.url("/proxy/blocklist/enable")).await;
    let reply = get(proxy, &origin.url("/proxy/cache/disable")).await;
    assert_eq!(reply, b"HTTP/1.0 200 OK\r\n\r\n");
    assert!(!state.cache().is_enabled());

    assert_eq!(origin.connections(), 0);
}

#[tokio::test]
async fn validation_errors_are_bare_status_lines() {
    let (proxy, _) = proxy().await;

    assert_eq!(
        send(proxy, "POST http://x/ HTTP/1.0\r\n\r\n").await,
        b"HTTP/1.0 501 Not Implemented\r\n\r\n"
    );
    assert_eq!(
        send(proxy, "GET http://x/ HTTP/1.1\r\n\r\n").await,
        b"HTTP/1.0 400 Bad Request\r\n\r\n"
    );
    assert_eq!(
        send(proxy, "GET /relative HTTP/1.0\r\n\r\n").await,
        b"HTTP/1.0 400 Bad Request\r\n\r\n"
    );
    assert_eq!(
        send(proxy, "GET http://x/ HTTP/1.0\r\nBad Header\r\n\r\n").await,
        b"HTTP/1.0 400 Bad Request\r\n\r\n"
    );
    assert_eq!(
        send(proxy, "GET http://x/\r\n\r\n").await,
        b"HTTP/1.0 400 Bad Request\r\n\r\n"
    );
}

#[tokio::test]
async fn head_split_across_writes() {
    let origin = Origin::start(vec![&b"HTTP/1.0 200 OK\r\nContent-Length: 2\r\n\r\nok"[..]]).await;
    let (proxy, _) = proxy().await;

    let mut stream = TcpStream::connect(proxy).await.unwrap();
    let raw = format!("GET {} HTTP/1.0\r\nAccept: */*\r\n\r\n", origin.url("/split"));
    let (a, b) = raw.split_at(raw.len() - 3);
    stream.write_all(a.as_bytes()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    stream.write_all(b.as_bytes()).await.unwrap();

    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    assert!(out.ends_with(b"\r\n\r\nok"));
}

#[tokio::test]
async fn forwards_rewritten_request() {
    let origin = Origin::start(vec![&b"HTTP/1.0 200 OK\r\nContent-Length: 5\r\n\r\nhello"[..]]).await;
    let (proxy, _) = proxy().await;

    let reply = send(
        proxy,
        &format!(
            "GET {} HTTP/1.0\r\nUser-Agent: test\r\nConnection: keep-alive\r\nAccept: */*\r\n\r\n",
            origin.url("/index.html?q=1")
        ),
    )
    .await;
    assert_eq!(reply, b"HTTP/1.0 200 OK\r\nContent-Length: 5\r\n\r\nhello");

    let requests = origin.requests().await;
    assert_eq!(
        requests,
        vec![
            "GET /index.html?q=1 HTTP/1.0\r\nHost: 127.0.0.1\r\nConnection: close\r\nUser-Agent: test\r\nAccept: */*\r\n\r\n"
                .to_owned()
        ]
    );
}

#[tokio::test]
async fn blocked_host_gets_403() {
    let origin = Origin::start(vec![&b"HTTP/1.0 200 OK\r\nContent-Length: 2\r\n\r\nok"[..]]).await;
    let (proxy, _) = proxy().await;

    get(proxy, "http://admin/proxy/blocklist/add/example").await;
    get(proxy, "http://admin/proxy/blocklist/enable").await;

    for url in [
        "http://example.com/",
        "http://www.example.org:8080/x",
        "http://EXAMPLE.com/",
    ] {
        assert_eq!(get(proxy, url).await, b"HTTP/1.0 403 Forbidden\r\n\r\n", "{url}");
    }

    // Unrelated hosts still go through.
    assert!(get(proxy, &origin.url("/")).await.ends_with(b"ok"));
    assert_eq!(origin.connections(), 1);

    get(proxy, "http://admin/proxy/blocklist/add/127.0.0.1").await;
    assert_eq!(
        get(proxy, &origin.url("/")).await,
        b"HTTP/1.0 403 Forbidden\r\n\r\n"
    );
    assert_eq!(origin.connections(), 1);

    // Switching blocking off lifts the ban without forgetting the pattern.
    get(proxy, "http://admin/proxy/blocklist/disable").await;
    assert!(get(proxy, &origin.url("/")).await.ends_with(b"ok"));
    assert_eq!(origin.connections(), 2);
}

#[tokio::test]
async fn removing_absent_pattern_keeps_serving() {
    let (proxy, state) = proxy().await;
    assert_eq!(
        get(proxy, "http://admin/proxy/blocklist/remove/nothing").await,
        b"HTTP/1.0 200 OK\r\n\r\n"
    );
    assert_eq!(
        get(proxy, "http://admin/proxy/blocklist/add/next").await,
        b"HTTP/1.0 200 OK\r\n\r\n"
    );
    assert!(state.blocklist().contains("next"));
}

#[tokio::test]
async fn conditional_cache_round_trip() {
    const FIRST: &[u8] =
        b"HTTP/1.0 200 OK\r\nDate: Mon, 01 Jan 2024 00:00:00 GMT\r\nContent-Length: 7\r\n\r\ncontent";
    const NOT_MODIFIED: &[u8] = b"HTTP/1.0 304 Not Modified\r\n\r\n";
    let origin = Origin::start(vec![FIRST, NOT_MODIFIED, FIRST]).await;
    let (proxy, state) = proxy().await;
    let url = origin.url("/doc");

    get(proxy, "http://admin/proxy/cache/enable").await;

    let first = get(proxy, &url).await;
    assert_eq!(first, FIRST);
    assert!(state.cache().contains(&url));

    let second = get(proxy, &url).await;
    assert_eq!(second, first);

    get(proxy, "http://admin/proxy/cache/flush").await;
    let third = get(proxy, &url).await;
    assert_eq!(third, FIRST);

    let requests = origin.requests().await;
    assert_eq!(requests.len(), 3);
    assert!(!requests[0].contains("If-Modified-Since"));
    assert!(requests[1].ends_with("If-Modified-Since: Mon, 01 Jan 2024 00:00:00 GMT\r\n\r\n"));
    assert!(!requests[2].contains("If-Modified-Since"));
}

#[tokio::test]
async fn disabled_cache_is_neither_read_nor_written() {
    const REPLY: &[u8] = b"HTTP/1.0 200 OK\r\nDate: D1\r\nContent-Length: 1\r\n\r\nx";
    let origin = Origin::start(vec![REPLY]).await;
    let (proxy, state) = proxy().await;
    let url = origin.url("/a");

    get(proxy, "http://admin/proxy/cache/enable").await;
    get(proxy, &url).await;
    get(proxy, "http://admin/proxy/cache/disable").await;
    get(proxy, &url).await;

    // Disabling kept the entry but the second request did not revalidate it.
    assert!(state.cache().contains(&url));
    let requests = origin.requests().await;
    assert!(!requests[1].contains("If-Modified-Since"));
}

#[tokio::test]
async fn unreachable_origin_closes_quietly() {
    let (proxy, _) = proxy().await;
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = dead.local_addr().unwrap().port();
    drop(dead);

    let reply = get(proxy, &format!("http://127.0.0.1:{port}/")).await;
    assert!(reply.is_empty());

    // The proxy keeps serving other connections.
    assert_eq!(
        get(proxy, "http://admin/proxy/cache/enable").await,
        b"HTTP/1.0 200 OK\r\n\r\n"
    );
}

#[tokio::test]
async fn oversized_head_gets_413() {
    let (proxy, _) = start_proxy(ProxyConfig::default().max_request_size(64)).await;
    let raw = format!("GET http://x/ HTTP/1.0\r\nX-Pad: {}\r\n", "a".repeat(200));
    assert_eq!(send(proxy, &raw).await, b"HTTP/1.0 413 Payload Too Large\r\n\r\n");
}

#[tokio::test]
async fn client_closing_early_is_harmless() {
    let (proxy, _) = proxy().await;
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(b"GET http://x/ HTTP/1.0\r\n").await.unwrap();
    stream.shutdown().await.unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    assert!(out.is_empty());
}

#[tokio::test]
async fn silent_client_times_out() {
    let (proxy, _) = start_proxy(
        ProxyConfig::default().client_read_timeout(Duration::from_millis(100)),
    )
    .await;
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    let mut out = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut out)).await;
    assert!(read.is_ok(), "proxy kept a silent client open");
    assert!(out.is_empty());
}

#[tokio::test]
async fn trickling_client_hits_head_deadline() {
    let (proxy, _) = start_proxy(
        ProxyConfig::default().client_read_timeout(Duration::from_millis(300)),
    )
    .await;
    let (mut reader, mut writer) = TcpStream::connect(proxy).await.unwrap().into_split();

    // One byte every 50ms never lets a per-read timeout fire.
    tokio::spawn(async move {
        for byte in b"GET http://x/ HTTP/1.0\r\nX-Slow: ".iter().cycle() {
            if writer.write_all(&[*byte]).await.is_err() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    });

    let mut out = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), reader.read_to_end(&mut out)).await;
    assert!(read.is_ok(), "proxy kept a trickling client open");
    assert!(out.is_empty());
}

#[tokio::test]
async fn stalled_reader_releases_its_slot() {
    const BODY: usize = 32 << 20;
    let mut reply = format!("HTTP/1.0 200 OK\r\nContent-Length: {BODY}\r\n\r\n").into_bytes();
    reply.resize(reply.len() + BODY, b'x');
    let reply: &'static [u8] = Box::leak(reply.into_boxed_slice());
    let origin = Origin::start(vec![reply]).await;

    let (proxy, _) = start_proxy(
        ProxyConfig::default()
            .max_connections(1)
            .write_timeout(Duration::from_millis(300))
            .upstream_read_timeout(Duration::from_secs(5)),
    )
    .await;

    // Takes the only slot and never reads the response.
    let mut stalled = TcpStream::connect(proxy).await.unwrap();
    stalled
        .write_all(format!("GET {} HTTP/1.0\r\n\r\n", origin.url("/big")).as_bytes())
        .await
        .unwrap();

    let reply = tokio::time::timeout(
        Duration::from_secs(10),
        get(proxy, "http://admin/proxy/cache/enable"),
    )
    .await
    .expect("slot held by a client that stopped reading");
    assert_eq!(reply, b"HTTP/1.0 200 OK\r\n\r\n");
    drop(stalled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_control_commands_lose_nothing() {
    let (proxy, state) = proxy().await;

    let tasks: Vec<_> = (0..64)
        .map(|i| {
            tokio::spawn(async move {
                get(proxy, &format!("http://admin/proxy/blocklist/add/host{i}")).await;
                get(proxy, "http://admin/proxy/cache/enable").await;
                if i % 2 == 0 {
                    get(proxy, &format!("http://admin/proxy/blocklist/remove/host{i}")).await;
                }
                get(proxy, "http://admin/proxy/cache/flush").await
            })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap(), b"HTTP/1.0 200 OK\r\n\r\n");
    }

    assert_eq!(state.blocklist().len(), 32);
    for i in (1..64).step_by(2) {
        assert!(state.blocklist().contains(&format!("host{i}")));
    }
    assert!(state.cache().is_enabled());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cache_updates_for_one_target() {
    const REPLY: &[u8] = b"HTTP/1.0 200 OK\r\nDate: D1\r\nContent-Length: 4\r\n\r\nbody";
    let origin = Arc::new(Origin::start(vec![REPLY]).await);
    let (proxy, state) = proxy().await;
    state.cache().enable();
    let url = origin.url("/shared");

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let url = url.clone();
            tokio::spawn(async move { get(proxy, &url).await })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap(), REPLY);
    }

    assert_eq!(state.cache().len(), 1);
    assert_eq!(&state.cache().get(&url).unwrap().response()[..], REPLY);
}
