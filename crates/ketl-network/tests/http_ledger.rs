//! Integration tests for HttpLedger
//!
//! A minimal HTTP/1.1 responder runs on a local TcpListener, records the
//! request it received and answers with a canned status and body.

use std::time::Duration;

use ketl_core::{CardNumber, CardUid, ChallengeId};
use ketl_network::{
    DispenseRequest, HeartbeatReport, HttpLedger, Ledger, LedgerError, ValidateRequest,
    Validation,
};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// What the mock server saw.
#[derive(Debug)]
struct Captured {
    request_line: String,
    body: Value,
}

async fn read_request(stream: &mut TcpStream) -> Captured {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    let header_end = loop {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed before sending headers");
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().unwrap())
        })
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed mid-body");
        buf.extend_from_slice(&chunk[..n]);
    }

    let body = &buf[header_end..header_end + content_length];
    Captured {
        request_line: head.lines().next().unwrap_or_default().to_string(),
        body: if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(body).unwrap()
        },
    }
}

/// Serve exactly one request with `status` and `body`.
async fn serve_once(status: u16, body: Value) -> (String, JoinHandle<Captured>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let captured = read_request(&mut stream).await;

        let payload = body.to_string();
        let response = format!(
            "HTTP/1.1 {status} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{payload}",
            payload.len()
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.ok();
        captured
    });

    (format!("http://{addr}"), handle)
}

fn ledger(base: &str) -> HttpLedger {
    HttpLedger::new(base, Duration::from_millis(1000)).unwrap()
}

fn uid() -> CardUid {
    CardUid::from_hex("04A1B2C3D4E5F6").unwrap()
}

#[tokio::test]
async fn test_request_challenge() {
    let (base, server) = serve_once(
        200,
        json!({
            "success": true,
            "challengeId": "ch-42",
            "challenge": "00112233445566778899AABBCCDDEEFF",
            "timestamp": 1700000000000u64
        }),
    )
    .await;

    let reply = ledger(&base).request_challenge("UK_0001", &uid()).await.unwrap();
    let captured = server.await.unwrap();

    assert_eq!(captured.request_line, "POST /api/machine/auth/challenge HTTP/1.1");
    assert_eq!(
        captured.body,
        json!({"machineId": "UK_0001", "cardUid": "04A1B2C3D4E5F6"})
    );
    assert_eq!(reply.challenge_id.as_str(), "ch-42");
    assert!(reply.into_challenge().is_ok());
}

#[tokio::test]
async fn test_validate_rejection_body() {
    let (base, server) = serve_once(
        200,
        json!({"success": false, "errorMessage": "Insufficient balance"}),
    )
    .await;

    let request = ValidateRequest {
        challenge_id: ChallengeId::new("ch-42"),
        response: "A".repeat(32),
        card_uid: uid().to_hex(),
    };
    let reply = ledger(&base).validate_response(&request).await.unwrap();
    let captured = server.await.unwrap();

    assert_eq!(captured.request_line, "POST /api/machine/auth/validate HTTP/1.1");
    assert_eq!(captured.body["challengeId"], "ch-42");
    assert_eq!(captured.body["response"], "A".repeat(32));
    assert!(matches!(
        reply.into_validation(),
        Validation::Rejected {
            rejection: ketl_core::Rejection::LowBalance,
            ..
        }
    ));
}

#[tokio::test]
async fn test_authorize_dispense_with_string_balance() {
    let (base, server) = serve_once(
        200,
        json!({"success": true, "newBalance": "42.50", "message": "ok"}),
    )
    .await;

    let request = DispenseRequest {
        machine_id: "UK_0001".to_string(),
        card_number: CardNumber::new("CARD-0042").unwrap(),
        business_unit_id: "bu-7".to_string(),
        amount: 5.0,
        tea_type: "Regular Tea".to_string(),
    };
    let reply = ledger(&base).authorize_dispense(&request).await.unwrap();
    let captured = server.await.unwrap();

    assert_eq!(captured.request_line, "POST /api/machine/auth/dispense HTTP/1.1");
    assert_eq!(captured.body["cardNumber"], "CARD-0042");
    assert_eq!(captured.body["amount"], 5.0);
    assert!(reply.success);
    assert_eq!(reply.remaining(), Some(42.5));
}

#[tokio::test]
async fn test_heartbeat() {
    let (base, server) = serve_once(200, json!({"ok": true})).await;

    let report = HeartbeatReport::online("UK_0001", 2, 17);
    ledger(&base).heartbeat(&report).await.unwrap();
    let captured = server.await.unwrap();

    assert_eq!(captured.request_line, "POST /api/machine/heartbeat HTTP/1.1");
    assert_eq!(captured.body["machineId"], "UK_0001");
    assert_eq!(captured.body["status"], "online");
    assert_eq!(captured.body["dailyDispensed"], 2);
    assert_eq!(captured.body["totalDispensed"], 17);
}

#[tokio::test]
async fn test_non_200_is_no_result_even_with_body() {
    let (base, server) = serve_once(
        401,
        json!({"success": false, "error": "Invalid card"}),
    )
    .await;

    let request = ValidateRequest {
        challenge_id: ChallengeId::new("ch-1"),
        response: "0".repeat(32),
        card_uid: uid().to_hex(),
    };
    let err = ledger(&base).validate_response(&request).await.unwrap_err();
    server.await.unwrap();

    assert!(matches!(err, LedgerError::Status { status: 401, .. }));
    assert_eq!(err.endpoint(), Some("/api/machine/auth/validate"));
}

#[tokio::test]
async fn test_undecodable_body() {
    let (base, server) = serve_once(200, json!({"unexpected": true})).await;

    let err = ledger(&base)
        .request_challenge("UK_0001", &uid())
        .await
        .unwrap_err();
    server.await.unwrap();

    assert!(matches!(err, LedgerError::Decode { .. }));
}

#[tokio::test]
async fn test_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // Accept and hold the connection without answering.
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        drop(stream);
    });

    let ledger = HttpLedger::new(format!("http://{addr}"), Duration::from_millis(200)).unwrap();
    let err = ledger
        .heartbeat(&HeartbeatReport::online("UK_0001", 0, 0))
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::Timeout { .. }));
    server.abort();
}

#[tokio::test]
async fn test_connection_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = ledger(&format!("http://{addr}"))
        .request_challenge("UK_0001", &uid())
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::Transport { .. }));
}
