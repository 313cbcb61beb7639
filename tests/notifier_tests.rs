// Alert message rendering and the Telegram client against a local HTTP stub

use chrono::NaiveDate;
use relaymon::config::NotifierConfig;
use relaymon::notifier::{Notifier, QuotaAlert, TelegramNotifier};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

fn alert() -> QuotaAlert {
    QuotaAlert {
        server_name: "edge-hk-1".into(),
        used_gb: 850,
        limit_gb: 1000,
        percent: 85.04,
        cycle_reset_date: NaiveDate::from_ymd_opt(2026, 5, 31).unwrap(),
        days_remaining: 12,
        threshold: 80,
        checked_at: "2026-05-19 08:00 UTC".into(),
    }
}

fn notifier_config() -> NotifierConfig {
    NotifierConfig {
        telegram_bot_token: "123:abc".into(),
        telegram_chat_id: "-10042".into(),
        server_name: "edge-hk-1".into(),
        timeout_secs: 5,
    }
}

/// Accepts one request, answers with `status`, and returns the raw request text.
async fn stub_server(status: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&raw);
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|l| {
                        let (k, v) = l.split_once(':')?;
                        k.eq_ignore_ascii_case("content-length")
                            .then(|| v.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if raw.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }
        let body = r#"{"ok":false}"#;
        let response = format!(
            "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
        String::from_utf8_lossy(&raw).into_owned()
    });
    (base, handle)
}

#[test]
fn message_carries_usage_and_reset() {
    let text = alert().message();
    assert!(text.starts_with("Traffic alert [edge-hk-1]"));
    assert!(text.contains("Used: 850 GB / 1000 GB (85.0%)"));
    assert!(text.contains("Remaining: 150 GB"));
    assert!(text.contains("Reset: 2026-05-31 (in 12 days)"));
    assert!(text.contains("Threshold: 80%"));
    assert!(text.ends_with("Checked at: 2026-05-19 08:00 UTC"));
}

#[test]
fn remaining_never_goes_negative() {
    let mut over = alert();
    over.used_gb = 1200;
    over.percent = 120.0;
    assert!(over.message().contains("Remaining: 0 GB"));
}

#[test]
fn telegram_requires_token_and_chat() {
    let mut config = notifier_config();
    config.telegram_chat_id.clear();
    assert!(TelegramNotifier::new(&config).is_err());
}

#[tokio::test]
async fn posts_send_message_with_chat_and_text() {
    let (base, server) = stub_server("200 OK").await;
    let notifier = TelegramNotifier::with_api_base(&notifier_config(), &base).unwrap();

    notifier.send_quota_alert(&alert()).await.unwrap();

    let request = server.await.unwrap();
    assert!(request.starts_with("POST /bot123:abc/sendMessage HTTP/1.1"));
    let body = &request[request.find("\r\n\r\n").unwrap() + 4..];
    let json: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(json["chat_id"], "-10042");
    assert_eq!(json["text"], alert().message());
}

#[tokio::test]
async fn non_ok_status_is_an_error() {
    let (base, server) = stub_server("500 Internal Server Error").await;
    let notifier = TelegramNotifier::with_api_base(&notifier_config(), &base).unwrap();

    let err = notifier.send_quota_alert(&alert()).await.unwrap_err();
    assert!(err.to_string().contains("500"));
    server.await.unwrap();
}
