#![allow(clippy::unwrap_used, clippy::expect_used)]

//! End-to-end runs against stub runtimes that speak the permission prompt
//! protocol over their controlling terminal.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use warden_core::IpPolicy;
use warden_core::IpPolicyPermissioner;
use warden_core::Runner;
use warden_core::runner::RunErrorKind;
use warden_core::runner::RunValueOptions;
use warden_core::runner::RunnerError;

/// Writes an executable `deno` stand-in whose body is `body`. The real
/// invocation is `deno run --quiet ... <bootstrap> <target> <input>
/// <output>`, so the body picks the files off the end of the argument list.
fn stub_runtime(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("deno");
    let script = format!(
        "#!/bin/sh\n\
         eval \"output=\\${{$#}}\"\n\
         eval \"input=\\${{$(($# - 1))}}\"\n\
         eval \"target=\\${{$(($# - 2))}}\"\n\
         {body}\n"
    );
    std::fs::write(&path, script).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn runner(program: PathBuf, permissioner: IpPolicyPermissioner) -> Runner {
    Runner::new(PathBuf::from("./bootstrap/runner.ts"), Arc::new(permissioner))
        .with_deno_program(program)
}

fn run_error(err: RunnerError) -> warden_core::runner::RunError {
    match err {
        RunnerError::Run(run) => *run,
        other => panic!("expected a run error, got {other:?}"),
    }
}

#[tokio::test]
async fn a_promptless_run_copies_input_to_output() {
    let dir = tempfile::tempdir().unwrap();
    let program = stub_runtime(dir.path(), "echo hello\ncp \"$input\" \"$output\"");
    let runner = runner(program, IpPolicyPermissioner::disallow(Vec::new()));

    let outcome = runner
        .run_value(RunValueOptions {
            script_source: "export default (input) => input;".into(),
            input: json!({"n": 42}),
            allow_unstable: false,
            timeout: Some(Duration::from_secs(10)),
        })
        .await
        .unwrap();

    assert_eq!(json!({"n": 42}), outcome.output);
    assert_eq!("hello\n", outcome.stdout.text);
    assert!(!outcome.stdout.truncated);
    assert!(!outcome.stderr.truncated);
}

#[tokio::test]
async fn an_allowed_prompt_is_answered_with_yes() {
    let dir = tempfile::tempdir().unwrap();
    let program = stub_runtime(
        dir.path(),
        "printf '┌ ⚠️  Deno requests net access to \"127.0.0.1\".\\n' >&2\n\
         printf '├ Run again with the --allow-net flag\\n' >&2\n\
         printf '└ Allow? [y/n] (y = yes, allow; n = no, deny) > ' >&2\n\
         read answer\n\
         printf '{\"answer\":\"%s\"}' \"$answer\" > \"$output\"",
    );
    // Loopback is not in the disallow set, so the request goes through.
    let runner = runner(program, IpPolicyPermissioner::disallow(Vec::new()));

    let outcome = runner
        .run_value(RunValueOptions {
            script_source: "export default () => fetch('http://127.0.0.1/');".into(),
            input: json!(null),
            allow_unstable: false,
            timeout: Some(Duration::from_secs(10)),
        })
        .await
        .unwrap();

    assert_eq!(json!({"answer": "y"}), outcome.output);
}

#[tokio::test]
async fn a_denied_prompt_is_answered_with_no_and_streams_survive() {
    let dir = tempfile::tempdir().unwrap();
    let program = stub_runtime(
        dir.path(),
        "echo 'before the prompt'\n\
         printf '┌ ⚠️  Deno requests net access to \"10.0.0.1\".\\n' >&2\n\
         printf '└ Allow? [y/n] (y = yes, allow; n = no, deny) > ' >&2\n\
         read answer\n\
         if [ \"$answer\" = n ]; then exit 1; fi\n\
         exit 0",
    );
    let runner = runner(program, IpPolicyPermissioner::disallow([IpPolicy::Private]));

    let err = runner
        .run_value(RunValueOptions {
            script_source: "export default () => fetch('http://10.0.0.1/');".into(),
            input: json!(null),
            allow_unstable: false,
            timeout: Some(Duration::from_secs(10)),
        })
        .await
        .unwrap_err();

    let run = run_error(err);
    assert!(matches!(run.inner, RunErrorKind::Exit { code: 1 }));
    assert_eq!("before the prompt\n", run.stdout.text);
    assert!(run.stderr.text.contains("Deno requests net access"));
}

#[tokio::test]
async fn an_unparseable_prompt_is_denied() {
    let dir = tempfile::tempdir().unwrap();
    let program = stub_runtime(
        dir.path(),
        "printf '┌ ⚠️  Deno requests something unheard of.\\n' >&2\n\
         printf '└ Allow? [y/n] (y = yes, allow; n = no, deny) > ' >&2\n\
         read answer\n\
         printf '{\"answer\":\"%s\"}' \"$answer\" > \"$output\"",
    );
    // Even an otherwise allow-everything policy set cannot grant a prompt
    // that does not parse.
    let runner = runner(program, IpPolicyPermissioner::disallow(Vec::new()));

    let outcome = runner
        .run_value(RunValueOptions {
            script_source: "export default () => {};".into(),
            input: json!(null),
            allow_unstable: false,
            timeout: Some(Duration::from_secs(10)),
        })
        .await
        .unwrap();

    assert_eq!(json!({"answer": "n"}), outcome.output);
}

#[tokio::test]
async fn undecodable_output_fails_but_keeps_the_streams() {
    let dir = tempfile::tempdir().unwrap();
    let program = stub_runtime(
        dir.path(),
        "echo doing work\nprintf 'not json' > \"$output\"",
    );
    let runner = runner(program, IpPolicyPermissioner::disallow(Vec::new()));

    let err = runner
        .run_value(RunValueOptions {
            script_source: "export default () => {};".into(),
            input: json!(null),
            allow_unstable: false,
            timeout: Some(Duration::from_secs(10)),
        })
        .await
        .unwrap_err();

    let run = run_error(err);
    assert!(matches!(run.inner, RunErrorKind::DecodeOutput(_)));
    assert_eq!("doing work\n", run.stdout.text);
}

#[tokio::test]
async fn a_run_over_budget_is_killed_and_reported_as_a_timeout() {
    let dir = tempfile::tempdir().unwrap();
    // exec so the kill reaches the sleeper itself and the terminal closes.
    let program = stub_runtime(dir.path(), "echo started\nexec sleep 30");
    let runner = runner(program, IpPolicyPermissioner::disallow(Vec::new()));

    let err = runner
        .run_value(RunValueOptions {
            script_source: "export default () => {};".into(),
            input: json!(null),
            allow_unstable: false,
            timeout: Some(Duration::from_millis(250)),
        })
        .await
        .unwrap_err();

    let run = run_error(err);
    assert!(matches!(run.inner, RunErrorKind::Timeout));
    assert_eq!("started\n", run.stdout.text);
}

#[tokio::test]
async fn a_nonzero_exit_reports_the_code() {
    let dir = tempfile::tempdir().unwrap();
    let program = stub_runtime(dir.path(), "exit 7");
    let runner = runner(program, IpPolicyPermissioner::disallow(Vec::new()));

    let err = runner
        .run_value(RunValueOptions {
            script_source: "export default () => {};".into(),
            input: json!(null),
            allow_unstable: false,
            timeout: Some(Duration::from_secs(10)),
        })
        .await
        .unwrap_err();

    assert!(matches!(run_error(err).inner, RunErrorKind::Exit { code: 7 }));
}
