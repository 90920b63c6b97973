//! Transport delivery against a minimal in-process HTTP server.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use loophive_core::{BatchEnvelope, IngestEvent};
use loophive_sdk::Transport;

/// Accept connections and reply with the given status line, forwarding
/// each request body to the channel.
fn spawn_server(
    listener: TcpListener,
    status_line: &'static str,
    body_tx: mpsc::Sender<String>,
) {
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            // Read headers, then the declared body length.
            let mut content_length = 0usize;
            let mut header_end = 0usize;
            loop {
                let Ok(n) = stream.read(&mut buf) else { break };
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                if let Some(pos) = find_header_end(&raw) {
                    header_end = pos;
                    let headers = String::from_utf8_lossy(&raw[..pos]);
                    content_length = headers
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse().ok())?
                        })
                        .unwrap_or(0);
                    break;
                }
            }
            while raw.len() < header_end + content_length {
                let Ok(n) = stream.read(&mut buf) else { break };
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
            }
            let body =
                String::from_utf8_lossy(&raw[header_end..header_end + content_length]).to_string();
            let _ = body_tx.send(body);

            let response_body = r#"{"accepted":1,"rejected":0,"errors":[],"warnings":[]}"#;
            let response = format!(
                "{status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{response_body}",
                response_body.len()
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });
}

fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

fn event(id: &str) -> IngestEvent {
    IngestEvent {
        event_id: id.to_string(),
        timestamp: "2026-02-10T14:00:00Z".to_string(),
        event_type: "task_started".to_string(),
        task_id: Some("t1".to_string()),
        ..Default::default()
    }
}

#[test]
fn flush_delivers_batches_grouped_by_envelope() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (body_tx, body_rx) = mpsc::channel();
    spawn_server(listener, "HTTP/1.1 200 OK", body_tx);

    let transport = Transport::new(
        format!("http://{addr}"),
        "hb_test_key".to_string(),
        Duration::from_secs(3600),
        100,
        1000,
    );
    transport.enqueue(event("e1"), BatchEnvelope::new("agent-a"));
    transport.enqueue(event("e2"), BatchEnvelope::new("agent-b"));
    transport.enqueue(event("e3"), BatchEnvelope::new("agent-a"));
    transport.flush();

    // Two batches: one per distinct envelope.
    let first = body_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    let second = body_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    let bodies = [first, second];
    let parsed: Vec<serde_json::Value> = bodies
        .iter()
        .map(|b| serde_json::from_str(b).unwrap())
        .collect();

    let batch_a = parsed
        .iter()
        .find(|b| b["envelope"]["agent_id"] == "agent-a")
        .expect("agent-a batch");
    assert_eq!(batch_a["events"].as_array().unwrap().len(), 2);
    let batch_b = parsed
        .iter()
        .find(|b| b["envelope"]["agent_id"] == "agent-b")
        .expect("agent-b batch");
    assert_eq!(batch_b["events"].as_array().unwrap().len(), 1);
    assert_eq!(batch_b["events"][0]["event_id"], "e2");

    transport.shutdown(Duration::from_secs(5));
}

#[test]
fn shutdown_drains_remaining_events() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (body_tx, body_rx) = mpsc::channel();
    spawn_server(listener, "HTTP/1.1 200 OK", body_tx);

    let transport = Transport::new(
        format!("http://{addr}"),
        "hb_test_key".to_string(),
        // Worker never wakes on its own: only shutdown can deliver.
        Duration::from_secs(3600),
        100,
        1000,
    );
    transport.enqueue(event("pending"), BatchEnvelope::new("agent-a"));
    transport.shutdown(Duration::from_secs(5));

    let body = body_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert!(body.contains("\"pending\""));
    assert_eq!(transport.queued(), 0);

    // Events after shutdown are discarded.
    transport.enqueue(event("late"), BatchEnvelope::new("agent-a"));
    assert_eq!(transport.queued(), 0);
}

#[test]
fn permanent_rejection_drops_batch_without_retry() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (body_tx, body_rx) = mpsc::channel();
    spawn_server(listener, "HTTP/1.1 400 Bad Request", body_tx);

    let transport = Transport::new(
        format!("http://{addr}"),
        "hb_test_key".to_string(),
        Duration::from_secs(3600),
        100,
        1000,
    );
    transport.enqueue(event("bad"), BatchEnvelope::new("agent-a"));
    transport.flush();

    // Exactly one request: a 400 is permanent.
    let _ = body_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert!(body_rx.recv_timeout(Duration::from_millis(500)).is_err());

    transport.shutdown(Duration::from_secs(5));
}
