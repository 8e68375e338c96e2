//! Local subprocess provider.
//!
//! Spawns `program args..`, writes `{"prompt", "params"}` as JSON to stdin
//! and reads `{"output"}` or `{"error"}` as JSON from stdout. A process that
//! outlives the timeout is killed.

use async_trait::async_trait;
use cmp_core::{GenerationParams, ModelError, ModelProvider};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

pub struct LocalProcessProvider {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    timeout: Duration,
}

impl LocalProcessProvider {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Serialize)]
struct ProcessRequest<'a> {
    prompt: &'a str,
    params: &'a GenerationParams,
}

#[derive(Deserialize)]
struct ProcessReply {
    #[serde(default)]
    output: String,
    #[serde(default)]
    error: Option<String>,
}

/// Feed stdin, drain stdout and stderr concurrently, then reap the child.
async fn exchange(
    child: &mut Child,
    payload: &[u8],
) -> std::io::Result<(ExitStatus, Vec<u8>, Vec<u8>)> {
    let mut stdin = child.stdin.take();
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();

    let write = async {
        if let Some(mut stdin) = stdin.take() {
            stdin.write_all(payload).await?;
            stdin.shutdown().await?;
        }
        Ok::<_, std::io::Error>(())
    };
    let read_out = async {
        let mut buf = Vec::new();
        if let Some(out) = stdout.as_mut() {
            out.read_to_end(&mut buf).await?;
        }
        Ok::<_, std::io::Error>(buf)
    };
    let read_err = async {
        let mut buf = Vec::new();
        if let Some(err) = stderr.as_mut() {
            err.read_to_end(&mut buf).await?;
        }
        Ok::<_, std::io::Error>(buf)
    };

    let ((), out, err) = tokio::try_join!(write, read_out, read_err)?;
    let status = child.wait().await?;
    Ok((status, out, err))
}

#[async_trait]
impl ModelProvider for LocalProcessProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn generate(
        &self,
        input: &str,
        params: &GenerationParams,
    ) -> Result<String, ModelError> {
        let payload = serde_json::to_vec(&ProcessRequest {
            prompt: input,
            params,
        })
        .map_err(|e| ModelError::Process(format!("encode request: {e}")))?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        debug!(program = %self.program, "Spawning local model process");
        let mut child = command
            .spawn()
            .map_err(|e| ModelError::Process(format!("spawn '{}': {e}", self.program)))?;

        let outcome = tokio::time::timeout(self.timeout, exchange(&mut child, &payload)).await;
        let (status, stdout, stderr) = match outcome {
            Ok(result) => result.map_err(|e| ModelError::Process(e.to_string()))?,
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill timed-out model process");
                }
                return Err(ModelError::Timeout {
                    after: self.timeout,
                });
            }
        };

        if !status.success() {
            return Err(ModelError::Process(format!(
                "exited with {status}: {}",
                String::from_utf8_lossy(&stderr).trim()
            )));
        }

        let reply: ProcessReply = serde_json::from_slice(&stdout)
            .map_err(|e| ModelError::InvalidResponse(format!("decode output: {e}")))?;
        match reply.error {
            Some(error) if !error.is_empty() => Err(ModelError::Process(error)),
            _ => Ok(reply.output),
        }
    }
}
