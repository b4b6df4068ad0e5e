//! External command execution for docker and manifest-tool.
//!
//! Commands are described as `Invocation` values and executed through the
//! `CommandRunner` trait, so image builds and publishing can be checked
//! without a docker daemon.

use async_trait::async_trait;
use mauzr_types::error::{ReleaseError, ReleaseResult};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Maximum bytes of captured output kept per stream.
const MAX_OUTPUT: usize = 50_000;

/// A command line to run, with optional stdin payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
}

impl Invocation {
    /// Start an invocation of `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Feed `input` to the process on stdin.
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Shell-like rendering for logs and dry runs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(|part| {
                if part.is_empty() || part.contains(char::is_whitespace) {
                    format!("'{part}'")
                } else {
                    part.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    /// True when the process exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Last non-empty line of stderr, or of stdout when stderr is empty.
    pub fn last_error_line(&self) -> &str {
        fn pick(s: &str) -> Option<&str> {
            s.lines().rev().map(str::trim).find(|l| !l.is_empty())
        }
        pick(&self.stderr)
            .or_else(|| pick(&self.stdout))
            .unwrap_or("no output")
    }
}

/// Runs invocations. Non-zero exit codes are returned, not raised.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> ReleaseResult<CommandOutput>;
}

/// Runs invocations as child processes with a per-command timeout.
pub struct ProcessRunner {
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> ReleaseResult<CommandOutput> {
        debug!(command = %invocation.display(), "Running command");

        let mut cmd = tokio::process::Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            ReleaseError::Command(format!("Failed to run {}: {e}", invocation.program))
        })?;

        if let (Some(input), Some(mut pipe)) = (invocation.stdin.clone(), child.stdin.take()) {
            tokio::spawn(async move {
                if let Err(e) = pipe.write_all(input.as_bytes()).await {
                    warn!("Failed to write command stdin: {e}");
                }
            });
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ReleaseError::Timeout {
                operation: invocation.display(),
                secs: self.timeout.as_secs(),
            })?
            .map_err(|e| {
                ReleaseError::Command(format!("{} did not finish: {e}", invocation.program))
            })?;

        Ok(CommandOutput {
            stdout: truncate(String::from_utf8_lossy(&output.stdout).into_owned()),
            stderr: truncate(String::from_utf8_lossy(&output.stderr).into_owned()),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

/// Keep the tail of large outputs; errors are reported at the end.
fn truncate(text: String) -> String {
    if text.len() <= MAX_OUTPUT {
        return text;
    }
    let mut start = text.len() - MAX_OUTPUT;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("[truncated, {} total bytes] ...{}", text.len(), &text[start..])
}

/// Check if `program` can be executed (e.g. `docker version`).
pub async fn is_available(runner: &dyn CommandRunner, program: &str, check_args: &[&str]) -> bool {
    let invocation = Invocation::new(program).args(check_args.iter().copied());
    matches!(runner.run(&invocation).await, Ok(out) if out.success())
}

/// Validate an image reference: only registry/name/tag characters allowed.
pub fn validate_image_name(image: &str) -> ReleaseResult<()> {
    if image.is_empty() {
        return Err(ReleaseError::Config("Image name cannot be empty".into()));
    }
    if !image
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || ".:/-_@".contains(c))
    {
        return Err(ReleaseError::Config(format!("Invalid image name: {image}")));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Records invocations and answers them from a script of exit codes.
    #[derive(Default)]
    pub(crate) struct RecordingRunner {
        pub calls: Mutex<Vec<Invocation>>,
        pub script: Mutex<VecDeque<CommandOutput>>,
    }

    impl RecordingRunner {
        pub(crate) fn failing_at(index: usize, stderr: &str) -> Self {
            let runner = Self::default();
            {
                let mut script = runner.script.lock().unwrap();
                for _ in 0..index {
                    script.push_back(CommandOutput::default());
                }
                script.push_back(CommandOutput {
                    stderr: stderr.to_string(),
                    exit_code: 1,
                    ..Default::default()
                });
            }
            runner
        }

        pub(crate) fn calls(&self) -> Vec<Invocation> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(&self, invocation: &Invocation) -> ReleaseResult<CommandOutput> {
            self.calls.lock().unwrap().push(invocation.clone());
            Ok(self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default())
        }
    }

    #[test]
    fn test_invocation_builder() {
        let inv = Invocation::new("docker")
            .arg("build")
            .args(["-t", "eqrx/mauzr:base"])
            .stdin("FROM scratch\n");
        assert_eq!(inv.args, vec!["build", "-t", "eqrx/mauzr:base"]);
        assert_eq!(inv.stdin.as_deref(), Some("FROM scratch\n"));
    }

    #[test]
    fn test_invocation_display_quotes_spaces() {
        let inv = Invocation::new("sh").args(["-c", "make -C esp32"]);
        assert_eq!(inv.display(), "sh -c 'make -C esp32'");
    }

    #[test]
    fn test_last_error_line() {
        let out = CommandOutput {
            stdout: "step 1\n".into(),
            stderr: "warning\nERROR: no such extra\n\n".into(),
            exit_code: 1,
        };
        assert_eq!(out.last_error_line(), "ERROR: no such extra");
        assert_eq!(CommandOutput::default().last_error_line(), "no output");
    }

    #[test]
    fn test_last_error_line_falls_back_to_stdout() {
        let out = CommandOutput {
            stdout: "Step 3/3 : RUN pip3 install\n  returned a non-zero code: 1  \n".into(),
            stderr: "\n".into(),
            exit_code: 1,
        };
        assert_eq!(out.last_error_line(), "returned a non-zero code: 1");
    }

    #[test]
    fn test_truncate_keeps_tail() {
        let text = format!("{}END", "x".repeat(MAX_OUTPUT + 10));
        let out = truncate(text);
        assert!(out.starts_with("[truncated"));
        assert!(out.ends_with("END"));
    }

    #[test]
    fn test_validate_image_name_valid() {
        assert!(validate_image_name("python:3-slim").is_ok());
        assert!(validate_image_name("registry.example.com/eqrx/mauzr:esp-arm").is_ok());
    }

    #[test]
    fn test_validate_image_name_invalid() {
        assert!(validate_image_name("").is_err());
        assert!(validate_image_name("image;rm -rf /").is_err());
        assert!(validate_image_name("image$(id)").is_err());
    }

    #[tokio::test]
    async fn test_process_runner_captures_output() {
        let runner = ProcessRunner::new(Duration::from_secs(10));
        let out = runner
            .run(&Invocation::new("sh").args(["-c", "cat; echo oops >&2; exit 3"]).stdin("hello"))
            .await
            .unwrap();
        assert_eq!(out.stdout, "hello");
        assert_eq!(out.stderr.trim(), "oops");
        assert_eq!(out.exit_code, 3);
    }

    #[tokio::test]
    async fn test_process_runner_timeout() {
        let runner = ProcessRunner::new(Duration::from_millis(100));
        let err = runner
            .run(&Invocation::new("sleep").arg("5"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let runner = ProcessRunner::new(Duration::from_secs(1));
        assert!(!is_available(&runner, "definitely-not-a-real-binary", &["version"]).await);
    }
}
