//! Remote Control client against a canned local HTTP responder

use chrono::{TimeZone, Utc};
use pushto_stellarium::{StellariumError, StellariumRpc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Request as seen by the responder: `"METHOD /path?query"` and the body
type Seen = (String, String);

fn answer(target: &str) -> (u16, String) {
    let body = match target {
        "/api/main/status?propId=-2&actionId=-2" => serde_json::json!({
            "time": {"utc": "2022-11-17T16:14:58.967Z"},
            "propertyChanges": {"id": 3, "changes": {}},
            "actionChanges": {"id": 9, "changes": {}},
        }),
        "/api/main/status?propId=3&actionId=9" => serde_json::json!({
            "time": {"utc": "2022-11-17T16:15:00Z"},
        }),
        "/api/objects/info?format=json" => serde_json::json!({
            "name": "Vega",
            "ra": 279.2347,
            "dec": 38.7837,
            "altitude": 61.5,
            "azimuth": 295.25,
        }),
        "/api/stelaction/list" => serde_json::json!({
            "Date and Time": [{"id": "actionReturn_To_Current_Time", "isChecked": null}],
        }),
        "/api/main/focus" | "/api/stelaction/do" => return (200, "ok".to_string()),
        _ => return (404, "no such endpoint".to_string()),
    };
    (200, body.to_string())
}

async fn handle(mut stream: TcpStream, seen: mpsc::UnboundedSender<Seen>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .map(|(_, value)| value.trim().parse::<usize>().unwrap())
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "body cut short");
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[header_end..header_end + content_length]).to_string();

    let mut request_line = head.lines().next().unwrap().split_whitespace();
    let method = request_line.next().unwrap().to_string();
    let target = request_line.next().unwrap().to_string();

    let (status, reply) = answer(&target);
    seen.send((format!("{} {}", method, target), body)).unwrap();

    let response = format!(
        "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reply.len(),
        reply
    );
    stream.write_all(response.as_bytes()).await.unwrap();
    let _ = stream.shutdown().await;
}

async fn responder() -> (StellariumRpc, mpsc::UnboundedReceiver<Seen>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::spawn(handle(stream, tx.clone()));
        }
    });
    let rpc = StellariumRpc::new(format!("http://{}/api", addr)).unwrap();
    (rpc, rx)
}

#[tokio::test]
async fn test_utc_tracks_change_ids() {
    let (mut rpc, mut seen) = responder().await;

    let expected = Utc.with_ymd_and_hms(2022, 11, 17, 16, 14, 58).unwrap()
        + chrono::Duration::milliseconds(967);
    assert_eq!(rpc.utc().await.unwrap(), expected);
    assert_eq!(
        seen.recv().await.unwrap().0,
        "GET /api/main/status?propId=-2&actionId=-2"
    );

    // Second poll only asks for what changed since
    assert_eq!(
        rpc.utc().await.unwrap(),
        Utc.with_ymd_and_hms(2022, 11, 17, 16, 15, 0).unwrap()
    );
    assert_eq!(
        seen.recv().await.unwrap().0,
        "GET /api/main/status?propId=3&actionId=9"
    );
}

#[tokio::test]
async fn test_selected_object_coordinates() {
    let (rpc, _seen) = responder().await;

    let (ra, dec) = rpc.selected_ra_dec().await.unwrap();
    assert!((ra - 279.2347).abs() < 1e-12);
    assert!((dec - 38.7837).abs() < 1e-12);

    let (alt, az) = rpc.selected_alt_az().await.unwrap();
    assert!((alt - 61.5).abs() < 1e-12);
    assert!((az - 295.25).abs() < 1e-12);

    let info = rpc.selected_info().await.unwrap();
    assert_eq!(info["name"], "Vega");
}

#[tokio::test]
async fn test_actions() {
    let (rpc, mut seen) = responder().await;

    assert_eq!(rpc.focus("Vega").await.unwrap(), "ok");
    let (request, body) = seen.recv().await.unwrap();
    assert_eq!(request, "POST /api/main/focus");
    assert_eq!(body, "target=Vega");

    assert_eq!(rpc.set_time_to_now().await.unwrap(), "ok");
    let (request, body) = seen.recv().await.unwrap();
    assert_eq!(request, "POST /api/stelaction/do");
    assert_eq!(body, "id=actionReturn_To_Current_Time");

    let actions = rpc.list_actions().await.unwrap();
    assert!(actions["Date and Time"].is_array());
    assert_eq!(seen.recv().await.unwrap().0, "GET /api/stelaction/list");
}

#[tokio::test]
async fn test_http_errors_are_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        handle(stream, tx).await;
    });

    // Endpoint unknown to the responder
    let rpc = StellariumRpc::new(format!("http://{}/other", addr)).unwrap();
    match rpc.list_actions().await {
        Err(StellariumError::HttpError { status, message }) => {
            assert_eq!(status, 404);
            assert_eq!(message, "no such endpoint");
        }
        other => panic!("unexpected {:?}", other),
    }
}
