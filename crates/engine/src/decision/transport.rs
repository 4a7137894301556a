//! Ways of reaching the decision service.
//!
//! A transport moves one request out and one raw text reply back. It knows nothing about
//! reply shapes; the adapter resolves the text.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow, bail};
use readmes_types::DecisionRequest;
use readmes_util::config::DecisionConfig;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::info;
use url::Url;

use super::prompt::build_prompt;

#[async_trait::async_trait]
pub trait DecisionTransport: Send + Sync {
    /// Sends `request` and returns the raw reply text.
    async fn send(&self, request: &DecisionRequest) -> anyhow::Result<String>;

    /// Short label used in logs.
    fn label(&self) -> &'static str;
}

/// Builds the transport the configuration asks for. A local command takes precedence over
/// an HTTP endpoint; `None` means no decision service is configured.
pub fn transport_from_config(config: &DecisionConfig) -> anyhow::Result<Option<Arc<dyn DecisionTransport>>> {
    if !config.is_configured() {
        return Ok(None);
    }
    let timeout = Duration::from_secs(config.timeout_secs);
    if let Some(command) = config.command.as_deref().filter(|command| !command.trim().is_empty()) {
        return Ok(Some(Arc::new(CommandTransport::new(command, timeout))));
    }
    if let Some(endpoint) = &config.endpoint {
        return Ok(Some(Arc::new(HttpTransport::new(endpoint.clone(), timeout)?)));
    }
    Ok(None)
}

/// Runs a local LM command, writing the prompt to its stdin and reading the reply from stdout.
///
/// The command line is split with shell quoting rules, so `ollama run llama3` or
/// `llm -m "gpt 4o"` both work.
#[derive(Debug, Clone)]
pub struct CommandTransport {
    command: String,
    timeout: Duration,
}

impl CommandTransport {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }
}

#[async_trait::async_trait]
impl DecisionTransport for CommandTransport {
    async fn send(&self, request: &DecisionRequest) -> anyhow::Result<String> {
        let args = shell_words::split(&self.command).with_context(|| format!("parse LM command: {}", self.command))?;
        let Some((program, rest)) = args.split_first() else {
            bail!("LM command is empty");
        };
        let prompt = build_prompt(request)?;

        let start = Instant::now();
        let mut child = Command::new(program)
            .args(rest)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawn LM command: {program}"))?;

        // The prompt write counts against the timeout too; a command that never reads stdin
        // blocks it once the pipe buffer fills.
        let exchange = async {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(prompt.as_bytes()).await.context("write prompt to LM stdin")?;
            }
            child.wait_with_output().await.context("wait for LM command")
        };
        let output = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| anyhow!("LM command timed out after {}s: {program}", self.timeout.as_secs()))??;
        let elapsed_ms = start.elapsed().as_millis();

        info!(
            kind = %request.kind,
            elapsed_ms,
            prompt_bytes = prompt.len(),
            response_bytes = output.stdout.len(),
            "lm command complete"
        );

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("LM command failed with status {}: {}", output.status, stderr.trim());
        }
        String::from_utf8(output.stdout).context("decode LM stdout as UTF-8")
    }

    fn label(&self) -> &'static str {
        "command"
    }
}

/// POSTs the request record as JSON to an endpoint and returns the response body.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: Url,
}

impl HttpTransport {
    pub fn new(endpoint: Url, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("failed to create decision service HTTP client: {e}"))?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait::async_trait]
impl DecisionTransport for HttpTransport {
    async fn send(&self, request: &DecisionRequest) -> anyhow::Result<String> {
        let start = Instant::now();
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| anyhow!("network error calling {}: {e}", self.endpoint))?;
        let status = response.status();
        let body = response.text().await.context("read decision service response body")?;

        info!(
            kind = %request.kind,
            status = status.as_u16(),
            elapsed_ms = start.elapsed().as_millis(),
            response_bytes = body.len(),
            "decision endpoint responded"
        );

        if !status.is_success() {
            bail!("decision service returned HTTP {status}: {}", body.trim());
        }
        Ok(body)
    }

    fn label(&self) -> &'static str {
        "http"
    }
}

/// Replays canned replies in order and remembers every request it saw.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<DecisionRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies.lock().expect("scripted replies lock poisoned").push_back(reply.into());
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<DecisionRequest> {
        self.requests.lock().expect("scripted requests lock poisoned").clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().expect("scripted replies lock poisoned").len()
    }
}

#[async_trait::async_trait]
impl DecisionTransport for ScriptedTransport {
    async fn send(&self, request: &DecisionRequest) -> anyhow::Result<String> {
        self.requests.lock().expect("scripted requests lock poisoned").push(request.clone());
        self.replies
            .lock()
            .expect("scripted replies lock poisoned")
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted reply queued for '{}'", request.kind))
    }

    fn label(&self) -> &'static str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use readmes_types::DecisionKind;
    use serde_json::json;

    fn request() -> DecisionRequest {
        DecisionRequest::new(DecisionKind::AnalyzeState, json!({"variables": {}}))
    }

    #[tokio::test]
    async fn scripted_transport_replays_in_order() {
        let transport = ScriptedTransport::with_replies(["first", "second"]);
        assert_eq!(transport.send(&request()).await.unwrap(), "first");
        assert_eq!(transport.send(&request()).await.unwrap(), "second");
        let error = transport.send(&request()).await.unwrap_err();
        assert!(error.to_string().contains("analyze_state"));
        assert_eq!(transport.requests().len(), 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_transport_reads_stdout() {
        let transport = CommandTransport::new("sh -c 'cat >/dev/null; echo \"{\\\"ok\\\": true}\"'", Duration::from_secs(10));
        let reply = transport.send(&request()).await.unwrap();
        assert_eq!(reply.trim(), r#"{"ok": true}"#);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_transport_reports_failures() {
        let transport = CommandTransport::new("sh -c 'cat >/dev/null; echo broken >&2; exit 3'", Duration::from_secs(10));
        let error = transport.send(&request()).await.unwrap_err();
        assert!(error.to_string().contains("broken"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_that_ignores_stdin_times_out() {
        let transport = CommandTransport::new("sleep 30", Duration::from_secs(1));
        let large = DecisionRequest::new(DecisionKind::AnalyzeState, json!({"readme_content": "x".repeat(1 << 20)}));
        let started = Instant::now();
        let error = transport.send(&large).await.unwrap_err();
        assert!(error.to_string().contains("timed out"), "error: {error:#}");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let transport = CommandTransport::new("   ", Duration::from_secs(1));
        assert!(transport.send(&request()).await.is_err());
    }

    #[test]
    fn config_prefers_command_over_endpoint() {
        let config = DecisionConfig {
            command: Some("llm".into()),
            endpoint: Some(Url::parse("http://localhost:9/decide").unwrap()),
            timeout_secs: 5,
        };
        let transport = transport_from_config(&config).unwrap().unwrap();
        assert_eq!(transport.label(), "command");
        assert!(transport_from_config(&DecisionConfig::default()).unwrap().is_none());
        let blank = DecisionConfig {
            command: Some("  ".into()),
            ..DecisionConfig::default()
        };
        assert!(transport_from_config(&blank).unwrap().is_none());
    }
}
