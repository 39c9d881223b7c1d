use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::info;
use warden_core::Checker;
use warden_core::Runner;
use warden_core::checker::CheckerError;
use warden_core::limited_writer::CapturedStream;
use warden_core::runner::RunErrorKind;
use warden_core::runner::RunValueOptions;
use warden_core::runner::RunnerError;

#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<Runner>,
    pub checker: Arc<Checker>,
    pub run_slots: Arc<Semaphore>,
    pub run_timeout: Duration,
}

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub script: String,
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default)]
    pub allow_unstable: bool,
}

#[derive(Debug, Default, Serialize)]
pub struct StreamBody {
    #[serde(rename = "string", skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

impl From<CapturedStream> for StreamBody {
    fn from(stream: CapturedStream) -> Self {
        Self {
            text: stream.text,
            truncated: stream.truncated,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    RunTimeout,
    Unknown,
}

#[derive(Debug, Default, Serialize)]
pub struct RunResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<StreamBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<StreamBody>,
}

/// Runs a script. Failures are reported in the response body, not via
/// status codes, so callers always get the captured streams when they
/// exist.
pub async fn run(
    State(state): State<AppState>,
    payload: Result<Json<RunRequest>, JsonRejection>,
) -> Json<RunResponse> {
    // A body that fails to decode still gets the structured response shape,
    // never a plain-text transport error.
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return Json(run_failure(
                rejection.body_text(),
                ErrorCode::Unknown,
                None,
                None,
            ));
        }
    };
    // Closing the semaphore is never done, so acquisition only ends by
    // getting a slot or by the client going away and dropping us.
    let Ok(_permit) = state.run_slots.acquire().await else {
        return Json(run_failure(
            "server is shutting down".into(),
            ErrorCode::Unknown,
            None,
            None,
        ));
    };

    info!(allow_unstable = request.allow_unstable, "running script");
    let result = state
        .runner
        .run_value(RunValueOptions {
            script_source: request.script,
            input: request.input,
            allow_unstable: request.allow_unstable,
            timeout: Some(state.run_timeout),
        })
        .await;

    let response = match result {
        Ok(outcome) => RunResponse {
            output: Some(outcome.output),
            stderr: Some(outcome.stderr.into()),
            stdout: Some(outcome.stdout.into()),
            ..Default::default()
        },
        Err(RunnerError::Run(run)) => {
            let code = match run.inner {
                RunErrorKind::Timeout => ErrorCode::RunTimeout,
                _ => ErrorCode::Unknown,
            };
            run_failure(
                run.to_string(),
                code,
                Some(run.stderr.into()),
                Some(run.stdout.into()),
            )
        }
        Err(err) => run_failure(err.to_string(), ErrorCode::Unknown, None, None),
    };
    Json(response)
}

fn run_failure(
    error: String,
    code: ErrorCode,
    stderr: Option<StreamBody>,
    stdout: Option<StreamBody>,
) -> RunResponse {
    RunResponse {
        error: Some(error),
        error_code: Some(code),
        stderr,
        stdout,
        ..Default::default()
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub script: String,
    #[serde(default)]
    pub allow_unstable: bool,
}

#[derive(Debug, Default, Serialize)]
pub struct CheckResponse {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
}

/// Type-checks a script. A failing check returns the masked diagnostics;
/// a passing check returns an empty object.
pub async fn check(
    State(state): State<AppState>,
    payload: Result<Json<CheckRequest>, JsonRejection>,
) -> Json<CheckResponse> {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::warn!(error = %rejection.body_text(), "rejecting malformed check request");
            return Json(CheckResponse::default());
        }
    };
    let result = state
        .checker
        .check_source(&request.script, request.allow_unstable)
        .await;
    let response = match result {
        Ok(()) => CheckResponse::default(),
        Err(CheckerError::Check(check)) => CheckResponse {
            stderr: check.stderr,
        },
        Err(err) => {
            tracing::warn!(error = %err, "check failed before the runtime produced diagnostics");
            CheckResponse::default()
        }
    };
    Json(response)
}
