use std::time::Duration;

use petri_viewer::error::GatewayError;
use petri_viewer::gateway::{BlobClient, Gateway, TestStatus};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const PAGE_ONE: &str = r"<EnumerationResults><Blobs>
<Blob><Name>runs/1</Name><Properties><Creation-Time>Mon, 01 Jan 2024 10:00:00 GMT</Creation-Time></Properties><Metadata><petrifailed>1</petrifailed><ghbranch>main</ghbranch></Metadata></Blob>
</Blobs><NextMarker>page-two</NextMarker></EnumerationResults>";

const PAGE_TWO: &str = r"<EnumerationResults><Blobs>
<Blob><Name>runs/2</Name><Properties><Creation-Time>Tue, 02 Jan 2024 10:00:00 GMT</Creation-Time></Properties><Metadata><ghpr>8</ghpr></Metadata></Blob>
</Blobs><NextMarker/></EnumerationResults>";

const RUN_ONE: &str = r"<EnumerationResults><Blobs>
<Blob><Name>1/x86_64/boot/petri.jsonl</Name></Blob>
<Blob><Name>1/x86_64/boot/petri.passed</Name></Blob>
<Blob><Name>1/x86_64/reboot/petri.jsonl</Name></Blob>
</Blobs></EnumerationResults>";

const EMPTY: &str = "<EnumerationResults><Blobs></Blobs></EnumerationResults>";

fn route(target: &str) -> (u16, String) {
    if target.starts_with("/pulls/7") {
        return (200, r#"{"number":7,"title":"Fix virtio queue"}"#.to_string());
    }
    if target.starts_with("/pulls/8") {
        return (403, r#"{"message":"API rate limit exceeded"}"#.to_string());
    }
    if target.starts_with("/pulls/") {
        return (500, String::new());
    }
    if target.starts_with("/results/1/x86_64/boot/petri.jsonl") {
        return (200, "{\"message\":\"hello\"}\n".to_string());
    }
    if target.contains("prefix=runs") {
        if !target.contains("include=metadata") {
            return (400, String::new());
        }
        let page = if target.contains("marker=page-two") {
            PAGE_TWO
        } else {
            PAGE_ONE
        };
        return (200, page.to_string());
    }
    if target.contains("prefix=1%2F") {
        return (200, RUN_ONE.to_string());
    }
    if target.contains("prefix=broken") {
        return (200, "<EnumerationResults><Blobs><Blob>".to_string());
    }
    if target.contains("prefix=") {
        return (200, EMPTY.to_string());
    }
    (404, String::new())
}

/// Serve `route` over plain HTTP on a local port; returns the base URL.
async fn serve() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = vec![0u8; 16 * 1024];
                let mut read = 0;
                loop {
                    let n = socket.read(&mut buf[read..]).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    read += n;
                    if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let request = String::from_utf8_lossy(&buf[..read]).to_string();
                let target = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                let (status, body) = route(&target);
                let response = format!(
                    "HTTP/1.1 {status} Test\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{addr}")
}

async fn client() -> BlobClient {
    let base = serve().await;
    BlobClient::new(
        &format!("{base}/results/"),
        &format!("{base}/pulls"),
        Some(Duration::from_secs(5)),
    )
    .unwrap()
}

#[tokio::test]
async fn test_list_runs_follows_next_marker() {
    let client = client().await;
    let runs = client.list_runs().await.expect("listing should succeed");

    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].id, "2");
    assert_eq!(runs[0].pr_number, Some(8));
    assert_eq!(runs[1].id, "1");
    assert_eq!(runs[1].branch, "main");
    assert_eq!(runs[1].failed, 1);
}

#[tokio::test]
async fn test_list_run_details() {
    let client = client().await;
    let tests = client.list_run_details("1").await.unwrap();

    assert_eq!(tests.len(), 2);
    assert_eq!(tests[0].name, "x86_64/boot");
    assert_eq!(tests[0].status, TestStatus::Passed);
    assert_eq!(tests[1].name, "x86_64/reboot");
    assert_eq!(tests[1].status, TestStatus::Failed);
}

#[tokio::test]
async fn test_run_without_blobs_is_not_found() {
    let client = client().await;
    let err = client.list_run_details("42").await.unwrap_err();
    assert_eq!(
        err,
        GatewayError::NotFound {
            run_id: "42".to_string()
        }
    );
}

#[tokio::test]
async fn test_malformed_listing_is_a_decode_error() {
    let client = client().await;
    let err = client.list_run_details("broken").await.unwrap_err();
    assert!(matches!(err, GatewayError::Decode { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_pr_titles() {
    let client = client().await;

    assert_eq!(
        client.fetch_pr_title(7).await.unwrap().as_deref(),
        Some("Fix virtio queue")
    );
    // Rate limited: unavailable rather than an error
    assert_eq!(client.fetch_pr_title(8).await.unwrap(), None);

    let err = client.fetch_pr_title(9).await.unwrap_err();
    assert!(matches!(err, GatewayError::Status { status: 500, .. }));
}

#[tokio::test]
async fn test_fetch_text() {
    let client = client().await;
    let text = client.fetch_text("1/x86_64/boot/petri.jsonl").await.unwrap();
    assert_eq!(text, "{\"message\":\"hello\"}\n");

    let err = client.fetch_text("missing.txt").await.unwrap_err();
    assert!(matches!(err, GatewayError::Status { status: 404, .. }));
}

#[tokio::test]
async fn test_unreachable_container_is_a_transport_error() {
    // Port 1 on loopback refuses connections
    let client = BlobClient::new("http://127.0.0.1:1/results", "http://127.0.0.1:1/pulls", None).unwrap();
    let err = client.list_runs().await.unwrap_err();
    assert!(matches!(err, GatewayError::Transport { .. }), "got {err:?}");
    assert!(!err.is_not_found());
}

#[tokio::test]
async fn test_silent_server_is_a_timeout() {
    // Accepts connections and never answers
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let client = BlobClient::new(
        &format!("http://{addr}/results"),
        &format!("http://{addr}/pulls"),
        Some(Duration::from_millis(200)),
    )
    .unwrap();
    let err = client.list_run_details("1").await.unwrap_err();

    match err {
        GatewayError::Timeout { after, .. } => assert_eq!(after, Duration::from_millis(200)),
        other => panic!("expected a timeout, got {other:?}"),
    }
}
