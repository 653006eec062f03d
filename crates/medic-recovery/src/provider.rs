//! Fix provider transports and the primary/fallback chain
//!
//! A fix provider takes a remediation prompt and returns a `PatchSet`.
//! Concrete transports (HTTP API call, local CLI invocation) are
//! interchangeable behind one trait; the orchestrator only requires
//! bounded latency and a response parseable into the patch schema.

use async_trait::async_trait;
use medic_core::{MedicError, PatchSet, ProviderConfig, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";

// Rate limit retry configuration for the HTTP transport
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_SECS: u64 = 15;
const MAX_BACKOFF_SECS: u64 = 120;

/// External service that proposes patches for a failure
#[async_trait]
pub trait FixProvider: Send + Sync {
    /// Transport name for logging
    fn name(&self) -> &str;

    /// Propose a patch set for the given remediation prompt
    async fn propose_fix(&self, prompt: &str) -> Result<PatchSet>;
}

/// Extract and strictly parse the patch schema from provider output
///
/// Providers often wrap the JSON in prose; the first balanced JSON object
/// containing a `"patches"` key is extracted and deserialized. Anything
/// that does not conform to the tagged schema is rejected here, at the
/// boundary.
pub fn parse_patch_set(text: &str) -> Result<PatchSet> {
    let candidate = extract_json_object(text, "\"patches\"").ok_or_else(|| {
        MedicError::ProviderResponse("No JSON object with a \"patches\" key found".to_string())
    })?;

    let set: PatchSet = serde_json::from_str(candidate)
        .map_err(|e| MedicError::ProviderResponse(format!("Patch schema mismatch: {}", e)))?;

    if set.is_empty() {
        return Err(MedicError::ProviderResponse(
            "Provider returned an empty patch set".to_string(),
        ));
    }
    Ok(set)
}

// Scan for a balanced top-level JSON object containing `key`, respecting
// string literals and escapes.
fn extract_json_object<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    let bytes = text.as_bytes();
    let mut start = None;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            b'}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        let candidate = &text[start?..=i];
                        if candidate.contains(key) {
                            return Some(candidate);
                        }
                        start = None;
                    }
                }
            }
            _ => {}
        }
    }
    None
}

// Anthropic-style message request/response shapes
#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: usize,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

/// HTTP fix provider speaking the Anthropic messages API
pub struct HttpFixProvider {
    endpoint: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

impl HttpFixProvider {
    /// Build from config; the API key is read once here, not ambiently
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            MedicError::Config(format!("Missing API key env var {}", config.api_key_env))
        })?;
        Ok(Self {
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

#[async_trait]
impl FixProvider for HttpFixProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn propose_fix(&self, prompt: &str) -> Result<PatchSet> {
        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens: 8192,
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| MedicError::Provider(format!("Client build failed: {}", e)))?;

        let mut retries = 0;
        let mut backoff_secs = INITIAL_BACKOFF_SECS;

        loop {
            debug!("Sending fix request (attempt {})", retries + 1);
            let response = client
                .post(&self.endpoint)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&request)
                .send()
                .await
                .map_err(|e| MedicError::Provider(format!("Request failed: {}", e)))?;

            let status = response.status();

            // 429 retries with bounded backoff; everything else is final.
            if status.as_u16() == 429 {
                retries += 1;
                if retries > MAX_RETRIES {
                    return Err(MedicError::ProviderLimit(format!(
                        "Rate limited after {} retries",
                        MAX_RETRIES
                    )));
                }
                let wait_secs = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(backoff_secs);
                warn!(
                    "Rate limited (429), waiting {}s before retry {}/{}",
                    wait_secs, retries, MAX_RETRIES
                );
                tokio::time::sleep(Duration::from_secs(wait_secs.min(MAX_BACKOFF_SECS))).await;
                backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(MedicError::Provider(format!(
                    "Provider returned {}: {}",
                    status, body
                )));
            }

            let parsed: MessagesResponse = response
                .json()
                .await
                .map_err(|e| MedicError::Provider(format!("Bad response body: {}", e)))?;
            let text: String = parsed
                .content
                .iter()
                .map(|b| b.text.as_str())
                .collect::<Vec<_>>()
                .join("\n");

            return parse_patch_set(&text);
        }
    }
}

/// CLI fix provider: prompt on stdin, patch JSON on stdout
pub struct CliFixProvider {
    command: String,
    timeout: Duration,
}

impl CliFixProvider {
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let command = config.cli_command.clone().ok_or_else(|| {
            MedicError::Config("cli provider selected but cli_command is unset".to_string())
        })?;
        Ok(Self {
            command,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    #[cfg(test)]
    fn for_test(command: &str, timeout: Duration) -> Self {
        Self {
            command: command.to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl FixProvider for CliFixProvider {
    fn name(&self) -> &str {
        "cli"
    }

    async fn propose_fix(&self, prompt: &str) -> Result<PatchSet> {
        use tokio::io::AsyncWriteExt;

        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MedicError::Provider(format!("Spawn failed: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| MedicError::Provider(format!("Stdin write failed: {}", e)))?;
            // Close stdin so the provider sees EOF.
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                MedicError::Provider(format!("CLI provider timed out after {:?}", self.timeout))
            })?
            .map_err(|e| MedicError::Provider(format!("CLI provider failed: {}", e)))?;

        if !output.status.success() {
            return Err(MedicError::Provider(format!(
                "CLI provider exited with {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        parse_patch_set(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Primary-then-fallback provider chain with a per-run fallback budget
pub struct ProviderChain {
    primary: Box<dyn FixProvider>,
    fallback: Option<Box<dyn FixProvider>>,
    fallback_budget: u32,
    fallback_used: AtomicU32,
}

impl ProviderChain {
    pub fn new(
        primary: Box<dyn FixProvider>,
        fallback: Option<Box<dyn FixProvider>>,
        fallback_budget: u32,
    ) -> Self {
        Self {
            primary,
            fallback,
            fallback_budget,
            fallback_used: AtomicU32::new(0),
        }
    }

    /// Fallback invocations so far this run
    pub fn fallback_used(&self) -> u32 {
        self.fallback_used.load(Ordering::Relaxed)
    }

    /// Try the primary provider, then the fallback while budget remains
    pub async fn propose_fix(&self, prompt: &str) -> Result<PatchSet> {
        match self.primary.propose_fix(prompt).await {
            Ok(set) => return Ok(set),
            Err(e) => {
                warn!("Primary provider {:?} failed: {}", self.primary.name(), e);
            }
        }

        let fallback = self
            .fallback
            .as_ref()
            .ok_or_else(|| MedicError::Provider("Primary failed, no fallback".to_string()))?;

        let used = self.fallback_used.load(Ordering::Relaxed);
        if used >= self.fallback_budget {
            return Err(MedicError::ProviderLimit(format!(
                "Fallback budget exhausted ({}/{})",
                used, self.fallback_budget
            )));
        }
        self.fallback_used.fetch_add(1, Ordering::Relaxed);

        info!("Falling back to provider {:?}", fallback.name());
        fallback.propose_fix(prompt).await
    }
}
