use std::sync::{Arc, Mutex};

use hintbridge_core_types::{
    Message, Notification, NotificationKind, RequestId, ResourceType, TabId,
};
use network_tap::{
    BodyCapture, HookGate, HttpRefetcher, NotificationHooks, RequestTracker, SideChannelFetch,
    TapConfig, TapError, TrackerHost,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Answers every connection with `body` as a `text/plain` response.
async fn serve(body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn refetch_reads_the_body_over_http() {
    let base = serve("body { color: red }").await;
    let refetcher = HttpRefetcher::new(&TapConfig::default()).unwrap();
    let text = refetcher
        .fetch_text(&format!("{base}/style.css"))
        .await
        .unwrap();
    assert_eq!(text, "body { color: red }");
}

#[tokio::test]
async fn unreachable_server_is_a_refetch_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let refetcher = HttpRefetcher::new(&TapConfig::default()).unwrap();
    let url = format!("http://{addr}/gone.js");
    let err = refetcher.fetch_text(&url).await.unwrap_err();
    assert!(matches!(err, TapError::Refetch { url: failed, .. } if failed == url));
}

#[tokio::test]
async fn silent_server_hits_the_refetch_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let config = TapConfig {
        refetch_timeout_ms: Some(100),
        ..TapConfig::default()
    };
    let refetcher = HttpRefetcher::new(&config).unwrap();
    let result = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        refetcher.fetch_text(&format!("http://{addr}/slow")),
    )
    .await
    .expect("client timeout fires first");
    assert!(matches!(result, Err(TapError::Refetch { .. })));
}

#[derive(Default)]
struct Host {
    emitted: Mutex<Vec<Message>>,
}

impl TrackerHost for Host {
    fn emit(&self, _tab: TabId, message: Message) {
        self.emitted.lock().unwrap().push(message);
    }

    fn is_enabled(&self, _tab: TabId) -> bool {
        true
    }

    fn has_panel(&self, _tab: TabId) -> bool {
        false
    }

    fn request_injection(&self, _tab: TabId) {}
}

#[tokio::test]
async fn tracker_without_capture_assembles_from_http() {
    let base = serve("console.log(1)").await;
    let url = format!("{base}/app.js");
    let host = Arc::new(Host::default());
    let hooks = Arc::new(HookGate::new());
    hooks.register();
    let config = TapConfig::default();
    let tracker = RequestTracker::new(
        config.clone(),
        host.clone(),
        Arc::new(BodyCapture::unavailable()),
        Arc::new(HttpRefetcher::new(&config).unwrap()),
        hooks,
    );

    let note = || Notification::new(TabId(1), RequestId::new("r1"), url.clone(), ResourceType::Script);
    tracker.record(NotificationKind::BeforeRequest, note());
    tracker.record(NotificationKind::Completed, note().with_status(200));
    tracker.settle().await;

    let emitted = host.emitted.lock().unwrap();
    assert_eq!(emitted.len(), 2);
    let Message::FetchEnd(end) = &emitted[1] else {
        panic!("expected fetch end, got {:?}", emitted[1]);
    };
    assert_eq!(end.response.body.content, "console.log(1)");
    assert_eq!(end.response.url, url);
}
