//! Worker side of the child RPC channel
//!
//! The leader drives this process over newline-delimited JSON on the
//! standard streams: requests arrive on stdin, `response` lines and agent
//! events go out on stdout. Logging stays on stderr so the stream is never
//! polluted.

use crate::agent::AgentEvent;
use crate::runtime::WorkerRuntime;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::warn;

#[derive(Debug, Deserialize)]
struct RpcRequest {
    id: String,
    command: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// Dispatch one request line and build the response object.
pub(crate) async fn handle_command(runtime: &Arc<WorkerRuntime>, line: &str) -> Value {
    let req: RpcRequest = match serde_json::from_str(line) {
        Ok(req) => req,
        Err(e) => {
            return json!({
                "type": "response",
                "id": Value::Null,
                "command": Value::Null,
                "success": false,
                "error": format!("malformed request: {e}"),
            });
        }
    };

    let result: Result<Value, String> = match req.command.as_str() {
        "prompt" | "steer" | "follow_up" => match req.text {
            Some(text) => runtime
                .send_direct_prompt(text)
                .map(|_| Value::Null)
                .map_err(|e| e.to_string()),
            None => Err("missing text".to_string()),
        },
        "abort" => {
            runtime.request_direct_abort();
            Ok(Value::Null)
        }
        "get_state" => {
            let snap = runtime.snapshot();
            Ok(json!({
                "state": if snap.streaming { "streaming" } else { "idle" },
                "currentTaskId": snap.current_task_id,
                "sessionName": snap.session_name,
            }))
        }
        "set_session_name" => match req.name {
            Some(name) => {
                runtime.apply_session_name(&name);
                Ok(Value::Null)
            }
            None => Err("missing name".to_string()),
        },
        other => Err(format!("unknown command: {other}")),
    };

    match result {
        Ok(data) => json!({
            "type": "response",
            "id": req.id,
            "command": req.command,
            "success": true,
            "data": data,
        }),
        Err(error) => json!({
            "type": "response",
            "id": req.id,
            "command": req.command,
            "success": false,
            "error": error,
        }),
    }
}

fn event_line(event: &AgentEvent) -> Value {
    match event {
        AgentEvent::Started => json!({"type": "agent_start"}),
        AgentEvent::TextDelta(delta) => json!({
            "type": "message_update",
            "assistantMessageEvent": {"text_delta": delta},
        }),
        AgentEvent::Ended { .. } => json!({"type": "agent_end"}),
    }
}

async fn write_line<W: AsyncWriteExt + Unpin>(out: &mut W, value: &Value) -> anyhow::Result<()> {
    let mut line = value.to_string();
    line.push('\n');
    out.write_all(line.as_bytes()).await?;
    out.flush().await?;
    Ok(())
}

/// Serve the RPC channel until the peer closes stdin or the worker shuts
/// down. Agent events are mirrored onto stdout and fed into the runtime.
pub async fn run_stdio_host(
    runtime: Arc<WorkerRuntime>,
    mut events: tokio::sync::mpsc::UnboundedReceiver<AgentEvent>,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let shutdown = runtime.shutdown_token();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let response = handle_command(&runtime, &line).await;
                        write_line(&mut stdout, &response).await?;
                    }
                    // Peer closed the channel.
                    Ok(None) => break,
                    Err(e) => {
                        warn!("rpc stdin read failed: {e}");
                        break;
                    }
                }
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                write_line(&mut stdout, &event_line(&event)).await?;
                if let Err(e) = runtime.handle_agent_event(event).await {
                    warn!("agent event handling failed: {e}");
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::EchoAgent;
    use crate::env::WorkerEnv;
    use tempfile::TempDir;
    use tokio::sync::mpsc::unbounded_channel;

    fn runtime(temp: &TempDir) -> Arc<WorkerRuntime> {
        let (tx, _rx) = unbounded_channel();
        let env = WorkerEnv {
            root: temp.path().to_path_buf(),
            team_id: "T1".into(),
            agent_name: "agent1".into(),
            task_list_id: "T1".into(),
            lead_name: "team-lead".into(),
            auto_claim: false,
            plan_required: false,
            style: "normal".into(),
        };
        WorkerRuntime::new(env, Arc::new(EchoAgent::new(tx)))
    }

    #[tokio::test]
    async fn get_state_reports_idle() {
        let temp = TempDir::new().unwrap();
        let rt = runtime(&temp);
        let resp = handle_command(
            &rt,
            r#"{"id":"c1","command":"get_state"}"#,
        )
        .await;
        assert_eq!(resp["type"], "response");
        assert_eq!(resp["id"], "c1");
        assert_eq!(resp["success"], true);
        assert_eq!(resp["data"]["state"], "idle");
    }

    #[tokio::test]
    async fn unknown_command_fails() {
        let temp = TempDir::new().unwrap();
        let rt = runtime(&temp);
        let resp = handle_command(&rt, r#"{"id":"c2","command":"dance"}"#).await;
        assert_eq!(resp["success"], false);
        assert!(resp["error"].as_str().unwrap().contains("unknown command"));
    }

    #[tokio::test]
    async fn malformed_request_fails_without_panic() {
        let temp = TempDir::new().unwrap();
        let rt = runtime(&temp);
        let resp = handle_command(&rt, "{not json").await;
        assert_eq!(resp["success"], false);
    }

    #[tokio::test]
    async fn set_session_name_applies() {
        let temp = TempDir::new().unwrap();
        let rt = runtime(&temp);
        let resp = handle_command(
            &rt,
            r#"{"id":"c3","command":"set_session_name","name":"agent1 on deck"}"#,
        )
        .await;
        assert_eq!(resp["success"], true);
        assert_eq!(
            rt.snapshot().session_name.as_deref(),
            Some("agent1 on deck")
        );
    }

    #[test]
    fn event_lines_match_wire_shapes() {
        assert_eq!(
            event_line(&AgentEvent::Started),
            json!({"type": "agent_start"})
        );
        assert_eq!(
            event_line(&AgentEvent::TextDelta("hi".into())),
            json!({"type": "message_update", "assistantMessageEvent": {"text_delta": "hi"}})
        );
        assert_eq!(
            event_line(&AgentEvent::Ended { text: "done".into() }),
            json!({"type": "agent_end"})
        );
    }
}
