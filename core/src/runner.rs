//! Runs one script per child process, with the child's stdin and stderr on a
//! pseudo-terminal so permission prompts can be answered, and its stdout on
//! a plain pipe so the primary output stays separate.

use std::io;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::info;
use tracing::warn;

use warden_utils_pty::MasterReader;
use warden_utils_pty::MasterWriter;
use warden_utils_pty::spawn_with_pty;

use crate::limited_writer::CapturedStream;
use crate::limited_writer::LimitedWriter;
use crate::limited_writer::STD_STREAM_LIMIT;
use crate::paths::absolutize;
use crate::permissioner::Permissioner;
use crate::prompt::PROMPT_TERMINATOR;
use crate::prompt::is_prompt_start;
use crate::prompt::parse_prompt_line;
use crate::scanner::StderrScanner;

/// The sandboxed runtime binary.
pub const DENO_PROGRAM: &str = "deno";

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to resolve path `{path}`: {source}")]
    Path { path: PathBuf, source: io::Error },
    #[error("failed to prepare run files: {0}")]
    Setup(#[source] io::Error),
    #[error("failed to spawn the runtime: {0}")]
    Spawn(#[source] io::Error),
    #[error(transparent)]
    Run(#[from] Box<RunError>),
}

/// A failure after the child was spawned. Whatever stdout/stderr was
/// captured before things went wrong rides along, truncated or not.
#[derive(Debug, Error)]
#[error("{inner}")]
pub struct RunError {
    #[source]
    pub inner: RunErrorKind,
    pub stdout: CapturedStream,
    pub stderr: CapturedStream,
}

#[derive(Debug, Error)]
pub enum RunErrorKind {
    #[error("the runtime exited with status {code}")]
    Exit { code: i32 },
    #[error("the runtime was terminated by a signal")]
    Signal,
    #[error("run timed out")]
    Timeout,
    #[error("failed to decode the output file: {0}")]
    DecodeOutput(#[source] serde_json::Error),
    #[error("i/o error during the run: {0}")]
    Io(#[source] io::Error),
}

#[derive(Debug)]
pub struct RunFileOptions {
    pub target_script: PathBuf,
    pub input: PathBuf,
    pub output: PathBuf,
    pub allow_unstable: bool,
    /// Wall-clock budget for the child; exceeding it kills the child and
    /// fails the run with [`RunErrorKind::Timeout`].
    pub timeout: Option<Duration>,
}

#[derive(Debug)]
pub struct RunValueOptions {
    pub script_source: String,
    pub input: serde_json::Value,
    pub allow_unstable: bool,
    pub timeout: Option<Duration>,
}

#[derive(Debug)]
pub struct RunFileOutcome {
    pub stdout: CapturedStream,
    pub stderr: CapturedStream,
}

#[derive(Debug)]
pub struct RunValueOutcome {
    pub output: serde_json::Value,
    pub stdout: CapturedStream,
    pub stderr: CapturedStream,
}

/// Orchestrates one run: builds the restricted invocation, owns the PTY,
/// mediates prompts, and aggregates the captured streams into the result.
pub struct Runner {
    bootstrap_script: PathBuf,
    deno_program: PathBuf,
    permissioner: Arc<dyn Permissioner>,
}

impl Runner {
    /// `bootstrap_script` is the script that imports the target and wires
    /// its input/output to files. There is no default; it is configuration.
    pub fn new(bootstrap_script: PathBuf, permissioner: Arc<dyn Permissioner>) -> Self {
        Self {
            bootstrap_script,
            deno_program: DENO_PROGRAM.into(),
            permissioner,
        }
    }

    /// Overrides the runtime binary, mainly for tests.
    pub fn with_deno_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.deno_program = program.into();
        self
    }

    /// Runs `target_script` through the bootstrap script. The child may read
    /// exactly {script, input} and write exactly {output}; every other
    /// capability has to be negotiated through the prompt mediation.
    pub async fn run_file(&self, opts: RunFileOptions) -> Result<RunFileOutcome, RunnerError> {
        let target_script = resolve(&opts.target_script)?;
        let input = resolve(&opts.input)?;
        let output = resolve(&opts.output)?;
        let bootstrap_script = resolve(&self.bootstrap_script)?;

        let mut command = Command::new(&self.deno_program);
        command
            .arg("run")
            .arg("--quiet")
            .arg(format!(
                "--allow-read={},{}",
                target_script.display(),
                input.display()
            ))
            .arg(format!("--allow-write={}", output.display()));
        if opts.allow_unstable {
            command.arg("--unstable");
        }
        command
            .arg(&bootstrap_script)
            .arg(&target_script)
            .arg(&input)
            .arg(&output);
        // ANSI escapes would corrupt the line scanning.
        command.env("NO_COLOR", "1");
        command.stdout(Stdio::piped());

        let mut session = spawn_with_pty(command).map_err(RunnerError::Spawn)?;

        let child_stdout = session
            .child
            .stdout
            .take()
            .ok_or_else(|| RunnerError::Spawn(io::Error::other("child stdout not captured")))?;
        let stdout_task = spawn_stdout_capture(child_stdout);

        let reader = session.master.reader().map_err(RunnerError::Spawn)?;
        let writer = session.master.writer().map_err(RunnerError::Spawn)?;
        let permissioner = Arc::clone(&self.permissioner);
        let mediation_task =
            tokio::task::spawn_blocking(move || mediate_prompts(reader, writer, &*permissioner));

        let mut timed_out = false;
        let status_result = match opts.timeout {
            Some(limit) => match tokio::time::timeout(limit, session.child.wait()).await {
                Ok(result) => result,
                Err(_) => {
                    timed_out = true;
                    let _ = session.child.start_kill();
                    session.child.wait().await
                }
            },
            None => session.child.wait().await,
        };

        // Both tasks end on their own: the stdout pipe closes with the
        // child, and the PTY master reads end of stream once every slave
        // handle is gone.
        let stdout = join_sink(stdout_task).await.into_captured();
        let stderr = join_sink(mediation_task).await.into_captured();

        let failure = if timed_out {
            Some(RunErrorKind::Timeout)
        } else {
            match status_result {
                Err(source) => Some(RunErrorKind::Io(source)),
                Ok(status) if status.success() => None,
                Ok(status) => Some(match status.code() {
                    Some(code) => RunErrorKind::Exit { code },
                    None => RunErrorKind::Signal,
                }),
            }
        };
        if let Some(inner) = failure {
            return Err(RunnerError::Run(Box::new(RunError {
                inner,
                stdout,
                stderr,
            })));
        }

        Ok(RunFileOutcome { stdout, stderr })
    }

    /// Materializes a script source and a JSON input into temporary files,
    /// runs them, and decodes the output file. The temporary files are
    /// removed on every exit path.
    pub async fn run_value(&self, opts: RunValueOptions) -> Result<RunValueOutcome, RunnerError> {
        let script = temp_file("warden-script.", ".ts")?;
        let input = temp_file("warden-input.", ".json")?;
        let output = temp_file("warden-output.", ".json")?;

        tokio::fs::write(script.path(), opts.script_source.as_bytes())
            .await
            .map_err(RunnerError::Setup)?;
        let encoded = serde_json::to_vec(&opts.input)
            .map_err(|err| RunnerError::Setup(io::Error::other(err)))?;
        tokio::fs::write(input.path(), encoded)
            .await
            .map_err(RunnerError::Setup)?;

        let outcome = self
            .run_file(RunFileOptions {
                target_script: script.path().to_path_buf(),
                input: input.path().to_path_buf(),
                output: output.path().to_path_buf(),
                allow_unstable: opts.allow_unstable,
                timeout: opts.timeout,
            })
            .await?;

        // A decode failure after a clean exit is still a failure, and it
        // still carries the run's captured streams.
        let fail = |inner, outcome: RunFileOutcome| {
            RunnerError::Run(Box::new(RunError {
                inner,
                stdout: outcome.stdout,
                stderr: outcome.stderr,
            }))
        };
        let raw = match tokio::fs::read(output.path()).await {
            Ok(raw) => raw,
            Err(source) => return Err(fail(RunErrorKind::Io(source), outcome)),
        };
        let value = match serde_json::from_slice(&raw) {
            Ok(value) => value,
            Err(source) => return Err(fail(RunErrorKind::DecodeOutput(source), outcome)),
        };

        Ok(RunValueOutcome {
            output: value,
            stdout: outcome.stdout,
            stderr: outcome.stderr,
        })
    }
}

fn resolve(path: &Path) -> Result<PathBuf, RunnerError> {
    absolutize(path).map_err(|source| RunnerError::Path {
        path: path.to_path_buf(),
        source,
    })
}

fn temp_file(prefix: &str, suffix: &str) -> Result<tempfile::NamedTempFile, RunnerError> {
    tempfile::Builder::new()
        .prefix(prefix)
        .suffix(suffix)
        .tempfile()
        .map_err(RunnerError::Setup)
}

fn spawn_stdout_capture(
    mut stdout: tokio::process::ChildStdout,
) -> JoinHandle<LimitedWriter> {
    tokio::spawn(async move {
        let mut sink = LimitedWriter::new(STD_STREAM_LIMIT);
        let mut buf = [0u8; 8_192];
        loop {
            match stdout.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => sink.write(&buf[..n]),
            }
        }
        sink
    })
}

async fn join_sink(task: JoinHandle<LimitedWriter>) -> LimitedWriter {
    match task.await {
        Ok(sink) => sink,
        Err(err) => {
            warn!(error = %err, "capture task failed");
            LimitedWriter::new(STD_STREAM_LIMIT)
        }
    }
}

/// Where the mediation loop is within one prompt exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PromptState {
    /// Scanning for the first line of a prompt block.
    AwaitingPromptStart,
    /// Inside a block whose first line has already decided `grant`; the
    /// remaining body still has to be drained through the terminator.
    InPromptBody { grant: bool },
    /// The terminator arrived; the decision must be written back now.
    AwaitingResponse { grant: bool },
}

impl PromptState {
    fn step(self, token: &str, permissioner: &dyn Permissioner) -> Self {
        match self {
            Self::AwaitingPromptStart => {
                if !is_prompt_start(token) {
                    return Self::AwaitingPromptStart;
                }
                let grant = decide(token, permissioner);
                if token.ends_with(PROMPT_TERMINATOR) {
                    Self::AwaitingResponse { grant }
                } else {
                    Self::InPromptBody { grant }
                }
            }
            Self::InPromptBody { grant } => {
                if token.contains(PROMPT_TERMINATOR) {
                    Self::AwaitingResponse { grant }
                } else {
                    Self::InPromptBody { grant }
                }
            }
            // The caller answers and resets before stepping again.
            Self::AwaitingResponse { .. } => Self::AwaitingPromptStart.step(token, permissioner),
        }
    }
}

fn decide(token: &str, permissioner: &dyn Permissioner) -> bool {
    // A prompt-shaped line that fails parsing is denied outright; the
    // policy engine is never consulted with a descriptor we do not trust.
    let Some(descriptor) = parse_prompt_line(token) else {
        warn!(line = token, "unparseable permission prompt, denying");
        return false;
    };
    match permissioner.request_permission(&descriptor) {
        Ok(()) => {
            info!(descriptor = ?descriptor, "granting permission request");
            true
        }
        Err(err) => {
            info!(descriptor = ?descriptor, reason = %err, "denying permission request");
            false
        }
    }
}

/// Reads the PTY master until end of stream, teeing everything into the
/// stderr sink, and answers each complete prompt block with a single
/// `y`/`n` line. This task is the only reader and the only writer of the
/// PTY for the run's whole lifetime.
fn mediate_prompts(
    mut reader: MasterReader,
    mut writer: MasterWriter,
    permissioner: &dyn Permissioner,
) -> LimitedWriter {
    let mut sink = LimitedWriter::new(STD_STREAM_LIMIT);
    let mut scanner = StderrScanner::new();
    let mut state = PromptState::AwaitingPromptStart;
    let mut buf = [0u8; 8_192];

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        sink.write(&buf[..n]);
        scanner.push(&buf[..n]);

        while let Some(token) = scanner.next_token() {
            state = state.step(&token, permissioner);
            if let PromptState::AwaitingResponse { grant } = state {
                let response: &[u8] = if grant { b"y\n" } else { b"n\n" };
                if let Err(err) = writer.write_all(response).and_then(|()| writer.flush()) {
                    warn!(error = %err, "failed to answer permission prompt");
                }
                state = PromptState::AwaitingPromptStart;
            }
        }
    }

    // Trailing bytes with no newline and no terminator cannot be a prompt
    // awaiting an answer, but they still count as diagnostics.
    let _ = scanner.finish();

    sink
}
