//! Generation collaborator: turns an assembled prompt into an answer via a
//! locally-hosted Ollama model.
//!
//! The primary strategy is the HTTP `/api/generate` endpoint, which supports
//! the full options bag. When it fails, the CLI strategies are attempted in
//! order — prompt as a positional argument, then prompt on stdin — before
//! the HTTP failure is surfaced. Each strategy is independent so the chain
//! stays testable.

use serde::Serialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::GenerationConfig;

/// Optional generation parameters; only set fields are forwarded.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    /// Ollama's name for the max-token budget.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirostat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirostat_tau: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirostat_eta: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
}

impl GenerateOptions {
    pub fn is_empty(&self) -> bool {
        serde_json::to_value(self)
            .map(|v| v.as_object().map(|o| o.is_empty()).unwrap_or(true))
            .unwrap_or(true)
    }
}

/// Generation failure, distinguishing how the collaborator misbehaved.
#[derive(Debug)]
pub enum GenerateError {
    /// The HTTP endpoint could not be reached or its response not decoded.
    Unreachable(String),
    /// The endpoint answered with a non-2xx status.
    Status { code: u16, body: String },
    /// The endpoint answered 2xx but produced no text.
    EmptyResponse,
    /// Every CLI fallback strategy failed too.
    Cli(String),
}

impl std::fmt::Display for GenerateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerateError::Unreachable(msg) => write!(f, "Ollama unreachable: {}", msg),
            GenerateError::Status { code, body } => {
                write!(f, "Ollama HTTP error {}: {}", code, body)
            }
            GenerateError::EmptyResponse => write!(f, "Ollama returned an empty response"),
            GenerateError::Cli(msg) => write!(f, "Ollama CLI fallback failed: {}", msg),
        }
    }
}

impl std::error::Error for GenerateError {}

/// Generate an answer for `prompt`, trying HTTP first and the CLI second.
///
/// When every strategy fails, the HTTP error is surfaced (it carries the
/// most diagnostic detail) and the CLI failure is logged.
pub async fn generate(
    config: &GenerationConfig,
    prompt: &str,
    options: &GenerateOptions,
) -> Result<String, GenerateError> {
    let http_err = match http_generate(config, prompt, options).await {
        Ok(answer) => return Ok(answer),
        Err(e) => e,
    };

    tracing::debug!("ollama http generation failed ({}), trying cli", http_err);
    match cli_generate(config, prompt).await {
        Ok(answer) => Ok(answer),
        Err(cli_err) => {
            tracing::debug!("ollama cli generation failed: {}", cli_err);
            Err(http_err)
        }
    }
}

/// `POST /api/generate` with `stream: false`.
pub async fn http_generate(
    config: &GenerationConfig,
    prompt: &str,
    options: &GenerateOptions,
) -> Result<String, GenerateError> {
    let url = format!("{}/api/generate", normalize_host(&config.url));

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| GenerateError::Unreachable(e.to_string()))?;

    let mut payload = serde_json::json!({
        "model": config.model,
        "prompt": prompt,
        "stream": false,
    });
    if !options.is_empty() {
        payload["options"] = serde_json::to_value(options)
            .map_err(|e| GenerateError::Unreachable(e.to_string()))?;
    }

    let resp = client
        .post(&url)
        .json(&payload)
        .send()
        .await
        .map_err(|e| GenerateError::Unreachable(format!("failed to reach {}: {}", url, e)))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(GenerateError::Status {
            code: status.as_u16(),
            body,
        });
    }

    let json: serde_json::Value = resp
        .json()
        .await
        .map_err(|e| GenerateError::Unreachable(format!("invalid response body: {}", e)))?;

    let answer = json
        .get("response")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim()
        .to_string();

    if answer.is_empty() {
        return Err(GenerateError::EmptyResponse);
    }
    Ok(answer)
}

/// Run the CLI strategies in order, returning the first non-empty output.
async fn cli_generate(config: &GenerationConfig, prompt: &str) -> Result<String, GenerateError> {
    let mut failures: Vec<String> = Vec::new();

    // 1) Positional prompt: `ollama run <model> <prompt>`
    match run_cli(
        &["run", &config.model, prompt],
        None,
        config.timeout_secs,
    )
    .await
    {
        Ok(out) => return Ok(out),
        Err(e) => failures.push(format!("positional: {}", e)),
    }

    // 2) Prompt on stdin: `ollama run <model>`
    match run_cli(&["run", &config.model], Some(prompt), config.timeout_secs).await {
        Ok(out) => return Ok(out),
        Err(e) => failures.push(format!("stdin: {}", e)),
    }

    Err(GenerateError::Cli(failures.join("; ")))
}

async fn run_cli(args: &[&str], stdin: Option<&str>, timeout_secs: u64) -> Result<String, String> {
    let mut cmd = Command::new("ollama");
    cmd.args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| format!("'ollama' not found on PATH: {}", e))?;

    if let Some(input) = stdin {
        if let Some(mut pipe) = child.stdin.take() {
            pipe.write_all(input.as_bytes())
                .await
                .map_err(|e| e.to_string())?;
            // Dropping the pipe closes stdin so the CLI stops reading.
        }
    }

    let output = tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        child.wait_with_output(),
    )
    .await
    .map_err(|_| format!("timed out after {}s", timeout_secs))?
    .map_err(|e| e.to_string())?;

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if output.status.success() && !stdout.is_empty() {
        Ok(stdout)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(format!(
            "exit {:?}: {}",
            output.status.code(),
            if stderr.is_empty() { &stdout } else { &stderr }
        ))
    }
}

/// Accept bare host:port or full URLs, defaulting the scheme to http.
fn normalize_host(host: &str) -> String {
    let host = host.trim();
    if host.is_empty() {
        return "http://127.0.0.1:11434".to_string();
    }
    if host.starts_with("http://") || host.starts_with("https://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", host.trim_matches('/'))
    }
}
