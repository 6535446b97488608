//! Agent backend interface
//!
//! The real agent runtime (message streaming, tool execution) is an
//! external collaborator: it embeds this crate and supplies an
//! [`AgentDriver`]. The runtime only needs to deliver a user message,
//! request an abort, and pass on a cosmetic session name, plus consume an
//! event stream reporting turn boundaries.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// Events the agent backend reports to its host.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A turn started; the agent is streaming output.
    Started,
    /// Incremental assistant text.
    TextDelta(String),
    /// The turn ended; `text` is the full assistant output of the turn
    /// (empty when the turn was aborted or produced nothing).
    Ended { text: String },
}

/// Driver interface the worker runtime uses to talk to its local agent.
pub trait AgentDriver: Send + Sync {
    /// Deliver a user message; the agent will start a turn.
    fn send_prompt(&self, text: String) -> anyhow::Result<()>;

    /// Ask the running turn to stop. Observed at the next `Ended` event.
    fn request_abort(&self);

    /// Cosmetic session-name hint; default implementations ignore it.
    fn set_session_name(&self, _name: &str) {}
}

/// Built-in backend for the standalone worker binary and for tests.
///
/// Each prompt becomes one short turn: `Started`, one `TextDelta`, then
/// `Ended` carrying a reply derived from the prompt. An abort requested
/// while the turn is in flight makes it end with empty text.
pub struct EchoAgent {
    events: UnboundedSender<AgentEvent>,
    aborted: Arc<AtomicBool>,
    turn_delay: Duration,
    reply: Arc<dyn Fn(&str) -> String + Send + Sync>,
}

impl EchoAgent {
    pub fn new(events: UnboundedSender<AgentEvent>) -> Self {
        Self {
            events,
            aborted: Arc::new(AtomicBool::new(false)),
            turn_delay: Duration::from_millis(50),
            reply: Arc::new(|prompt| {
                let first_line = prompt.lines().next().unwrap_or("").trim();
                format!("Done: {first_line}")
            }),
        }
    }

    /// Override how long a turn takes before it ends.
    pub fn with_turn_delay(mut self, delay: Duration) -> Self {
        self.turn_delay = delay;
        self
    }

    /// Override the reply derivation (used by tests to script outcomes).
    pub fn with_reply<F>(mut self, reply: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.reply = Arc::new(reply);
        self
    }
}

impl AgentDriver for EchoAgent {
    fn send_prompt(&self, text: String) -> anyhow::Result<()> {
        let events = self.events.clone();
        let aborted = Arc::clone(&self.aborted);
        let delay = self.turn_delay;
        let reply = Arc::clone(&self.reply);

        tokio::spawn(async move {
            let _ = events.send(AgentEvent::Started);
            tokio::time::sleep(delay).await;
            let text = if aborted.swap(false, Ordering::SeqCst) {
                String::new()
            } else {
                reply(&text)
            };
            if !text.is_empty() {
                let _ = events.send(AgentEvent::TextDelta(text.clone()));
            }
            let _ = events.send(AgentEvent::Ended { text });
        });
        Ok(())
    }

    fn request_abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    #[tokio::test]
    async fn echo_agent_completes_a_turn() {
        let (tx, mut rx) = unbounded_channel();
        let agent = EchoAgent::new(tx).with_turn_delay(Duration::from_millis(5));
        agent.send_prompt("Fix the parser\nmore detail".into()).unwrap();

        assert!(matches!(rx.recv().await, Some(AgentEvent::Started)));
        assert!(matches!(rx.recv().await, Some(AgentEvent::TextDelta(_))));
        match rx.recv().await {
            Some(AgentEvent::Ended { text }) => assert_eq!(text, "Done: Fix the parser"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn abort_ends_turn_with_empty_text() {
        let (tx, mut rx) = unbounded_channel();
        let agent = EchoAgent::new(tx).with_turn_delay(Duration::from_millis(50));
        agent.send_prompt("long task".into()).unwrap();

        assert!(matches!(rx.recv().await, Some(AgentEvent::Started)));
        agent.request_abort();
        match rx.recv().await {
            Some(AgentEvent::Ended { text }) => assert!(text.is_empty()),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
