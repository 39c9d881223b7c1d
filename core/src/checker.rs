//! Type-checks a script without running it. Checking needs no
//! capabilities, so the child gets plain piped stdio and no prompt
//! mediation.

use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;

use crate::paths::absolutize;
use crate::runner::DENO_PROGRAM;

#[derive(Debug, Error)]
pub enum CheckerError {
    #[error("failed to resolve path `{path}`: {source}")]
    Path { path: PathBuf, source: io::Error },
    #[error("failed to prepare check files: {0}")]
    Setup(#[source] io::Error),
    #[error("failed to spawn the runtime: {0}")]
    Spawn(#[source] io::Error),
    #[error(transparent)]
    Check(#[from] CheckError),
}

/// The script failed to check. `stderr` is the diagnostic text with the
/// checked file's URL replaced, so callers never see host paths.
#[derive(Debug, Error)]
#[error("the check exited with status {code}")]
pub struct CheckError {
    pub code: i32,
    pub stderr: String,
}

pub struct Checker {
    deno_program: PathBuf,
}

impl Checker {
    pub fn new() -> Self {
        Self {
            deno_program: DENO_PROGRAM.into(),
        }
    }

    /// Overrides the runtime binary, mainly for tests.
    pub fn with_deno_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.deno_program = program.into();
        self
    }

    pub async fn check_file(
        &self,
        target_script: &Path,
        allow_unstable: bool,
    ) -> Result<(), CheckerError> {
        let target_script = absolutize(target_script).map_err(|source| CheckerError::Path {
            path: target_script.to_path_buf(),
            source,
        })?;

        let mut command = Command::new(&self.deno_program);
        command.arg("check").arg("--quiet");
        if allow_unstable {
            command.arg("--unstable");
        }
        command
            .arg(&target_script)
            .env("NO_COLOR", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = command.output().await.map_err(CheckerError::Spawn)?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr)
            .replace(&file_url(&target_script), "FILE");
        Err(CheckerError::Check(CheckError {
            code: output.status.code().unwrap_or(-1),
            stderr,
        }))
    }

    /// Materializes `source` into a temporary file and checks it. The
    /// file is removed on every exit path.
    pub async fn check_source(
        &self,
        source: &str,
        allow_unstable: bool,
    ) -> Result<(), CheckerError> {
        let script = tempfile::Builder::new()
            .prefix("warden-script.")
            .suffix(".ts")
            .tempfile()
            .map_err(CheckerError::Setup)?;
        tokio::fs::write(script.path(), source.as_bytes())
            .await
            .map_err(CheckerError::Setup)?;
        self.check_file(script.path(), allow_unstable).await
    }
}

impl Default for Checker {
    fn default() -> Self {
        Self::new()
    }
}

/// The `file://` form the runtime prints in its diagnostics.
fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}
