//! Instrumentation surface behavior: task lifecycle, action nesting,
//! convenience emitters, and envelope shape, observed through a capture
//! server.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use serde_json::Value as JsonValue;

use loophive_sdk::{AgentOptions, Client, ClientOptions, LlmCall, TaskOptions};

/// Accept requests forever, reply 200, forward each JSON body.
fn spawn_capture_server() -> (String, mpsc::Receiver<JsonValue>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = format!("http://{}", listener.local_addr().unwrap());
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            let mut raw = Vec::new();
            let mut buf = [0u8; 8192];
            let mut header_end = 0;
            let mut content_length = 0usize;
            loop {
                let Ok(n) = stream.read(&mut buf) else { break };
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
                    header_end = pos + 4;
                    let headers = String::from_utf8_lossy(&raw[..pos]);
                    content_length = headers
                        .lines()
                        .filter_map(|line| line.split_once(':'))
                        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                        .and_then(|(_, value)| value.trim().parse().ok())
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
            if let Ok(body) =
                serde_json::from_slice(&raw[header_end..header_end + content_length])
            {
                let _ = tx.send(body);
            }
            let reply = r#"{"accepted":0,"rejected":0,"errors":[],"warnings":[]}"#;
            let _ = stream.write_all(
                format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{reply}",
                    reply.len()
                )
                .as_bytes(),
            );
        }
    });
    (addr, rx)
}

/// Collect every event shipped until the channel goes quiet.
fn collect_events(rx: &mpsc::Receiver<JsonValue>) -> Vec<JsonValue> {
    let mut events = Vec::new();
    while let Ok(batch) = rx.recv_timeout(Duration::from_secs(5)) {
        if let Some(batch_events) = batch["events"].as_array() {
            events.extend(batch_events.iter().cloned());
        }
        // Drain quickly once traffic started.
        while let Ok(batch) = rx.recv_timeout(Duration::from_millis(300)) {
            if let Some(batch_events) = batch["events"].as_array() {
                events.extend(batch_events.iter().cloned());
            }
        }
        break;
    }
    events
}

fn quiet_agent_options() -> AgentOptions {
    AgentOptions {
        heartbeat_interval: Duration::ZERO,
        ..Default::default()
    }
}

fn client_for(addr: &str) -> Client {
    Client::new(
        ClientOptions::new("hb_test_0123456789abcdef0123456789abcdef")
            .endpoint(addr)
            .flush_interval(Duration::from_secs(3600)),
    )
}

#[test]
fn task_scope_emits_exactly_one_lifecycle_pair() {
    let (addr, rx) = spawn_capture_server();
    let client = client_for(&addr);
    let agent = client.agent("worker-1", quiet_agent_options());

    let result: Result<i32, String> = agent.with_task(
        "task-1",
        TaskOptions::default().project("demo").task_type("etl"),
        |_task| Ok(42),
    );
    assert_eq!(result.unwrap(), 42);
    client.shutdown(Duration::from_secs(5));

    let events = collect_events(&rx);
    let registered: Vec<_> = events
        .iter()
        .filter(|e| e["event_type"] == "agent_registered")
        .collect();
    assert_eq!(registered.len(), 1);

    let started: Vec<_> = events
        .iter()
        .filter(|e| e["event_type"] == "task_started")
        .collect();
    let completed: Vec<_> = events
        .iter()
        .filter(|e| e["event_type"] == "task_completed")
        .collect();
    assert_eq!(started.len(), 1);
    assert_eq!(completed.len(), 1);
    assert_eq!(started[0]["task_id"], "task-1");
    assert_eq!(started[0]["project_id"], "demo");
    assert_eq!(started[0]["task_type"], "etl");
    assert_eq!(completed[0]["status"], "success");
    assert!(completed[0]["duration_ms"].is_i64());
    // Run id is generated and consistent across the pair.
    assert_eq!(started[0]["task_run_id"], completed[0]["task_run_id"]);
    // Required fields are always present.
    assert!(started[0]["event_id"].is_string());
    assert!(started[0]["timestamp"].as_str().unwrap().ends_with('Z'));
}

#[test]
fn failed_closure_emits_task_failed() {
    let (addr, rx) = spawn_capture_server();
    let client = client_for(&addr);
    let agent = client.agent("worker-2", quiet_agent_options());

    let result: Result<(), String> =
        agent.with_task("task-2", TaskOptions::default(), |_task| {
            Err("boom".to_string())
        });
    assert!(result.is_err());
    client.shutdown(Duration::from_secs(5));

    let events = collect_events(&rx);
    let failed: Vec<_> = events
        .iter()
        .filter(|e| e["event_type"] == "task_failed")
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["status"], "failure");
    assert_eq!(failed[0]["severity"], "error");
    assert_eq!(failed[0]["payload"]["error_message"], "boom");
    assert!(!events.iter().any(|e| e["event_type"] == "task_completed"));
}

#[test]
fn nested_actions_link_parent_ids_and_llm_calls_inherit() {
    let (addr, rx) = spawn_capture_server();
    let client = client_for(&addr);
    let agent = client.agent("worker-3", quiet_agent_options());

    let _: Result<(), String> = agent.with_task("task-3", TaskOptions::default(), |task| {
        let _ = agent.track("outer", || -> Result<(), String> {
            let _ = agent.track("inner", || -> Result<(), String> {
                task.llm_call(LlmCall::new("reason", "gpt-4o").tokens(100, 50));
                Ok(())
            });
            Ok(())
        });
        Ok(())
    });
    client.shutdown(Duration::from_secs(5));

    let events = collect_events(&rx);
    let starts: Vec<_> = events
        .iter()
        .filter(|e| e["event_type"] == "action_started")
        .collect();
    assert_eq!(starts.len(), 2);
    let outer = starts
        .iter()
        .find(|e| e["payload"]["action_name"] == "outer")
        .unwrap();
    let inner = starts
        .iter()
        .find(|e| e["payload"]["action_name"] == "inner")
        .unwrap();
    assert!(outer["parent_action_id"].is_null() || outer.get("parent_action_id").is_none());
    assert_eq!(inner["parent_action_id"], outer["action_id"]);
    // Actions inherit the active task context.
    assert_eq!(inner["task_id"], "task-3");

    // The llm_call inherits the innermost action.
    let llm = events
        .iter()
        .find(|e| e["payload"]["kind"] == "llm_call")
        .unwrap();
    assert_eq!(llm["action_id"], inner["action_id"]);
    assert_eq!(llm["event_type"], "custom");
    assert_eq!(
        llm["payload"]["summary"],
        "reason \u{2192} gpt-4o (100 in / 50 out)"
    );

    let completions: Vec<_> = events
        .iter()
        .filter(|e| e["event_type"] == "action_completed")
        .collect();
    assert_eq!(completions.len(), 2);
    assert!(completions.iter().all(|e| e["status"] == "success"));
}

#[test]
fn convenience_emitters_build_well_known_payloads() {
    let (addr, rx) = spawn_capture_server();
    let client = client_for(&addr);
    let agent = client.agent("worker-4", quiet_agent_options());

    agent.queue_snapshot(serde_json::json!({"depth": 3, "oldest_age_seconds": 120}));
    agent.todo("td-1", "created", "Follow up", None);
    agent.scheduled(vec![
        serde_json::json!({"id": "job-1", "next_run": "2026-02-11T15:00:00Z"}),
        serde_json::json!({"id": "job-2", "next_run": "2026-02-12T09:00:00Z"}),
    ]);
    agent.report_issue("CRM API 403", "high", Some("issue-crm"), Some("permissions"), None);
    agent.resolve_issue("CRM API 403", Some("issue-crm"));
    client.shutdown(Duration::from_secs(5));

    let events = collect_events(&rx);

    let queue = events
        .iter()
        .find(|e| e["payload"]["kind"] == "queue_snapshot")
        .unwrap();
    assert_eq!(queue["payload"]["summary"], "Queue: 3 items, oldest 120s");
    assert_eq!(queue["payload"]["data"]["depth"], 3);

    let todo = events
        .iter()
        .find(|e| e["payload"]["kind"] == "todo")
        .unwrap();
    assert_eq!(todo["payload"]["data"]["todo_id"], "td-1");
    assert_eq!(todo["payload"]["data"]["action"], "created");

    let scheduled = events
        .iter()
        .find(|e| e["payload"]["kind"] == "scheduled")
        .unwrap();
    let summary = scheduled["payload"]["summary"].as_str().unwrap();
    assert!(summary.starts_with("2 scheduled items"));
    assert!(summary.contains("15:00:00Z"));

    let issues: Vec<_> = events
        .iter()
        .filter(|e| e["payload"]["kind"] == "issue")
        .collect();
    assert_eq!(issues.len(), 2);
    assert_eq!(issues[0]["payload"]["data"]["action"], "reported");
    assert_eq!(issues[1]["payload"]["data"]["action"], "resolved");

    // Envelope carries agent identity and SDK metadata.
    // (Checked through any event's batch; the capture server already
    // unwrapped events, so assert on the agent registration payload.)
    let registered = events
        .iter()
        .find(|e| e["event_type"] == "agent_registered")
        .unwrap();
    assert_eq!(registered["payload"]["data"]["type"], "general");
}
