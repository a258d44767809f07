use super::*;
use std::time::Duration;

fn shell(script: &str) -> ProcessCommand {
    ProcessCommandBuilder::new("sh").args(["-c", script]).build()
}

#[tokio::test]
async fn test_runner_reports_exit_code_and_streams() {
    let output = TokioProcessRunner
        .run(shell("echo out; echo err >&2; exit 3"))
        .await
        .unwrap();

    assert_eq!(output.status, ExitStatus::Error(3));
    assert_eq!(output.status.code(), Some(3));
    assert_eq!(output.stdout, "out\n");
    assert_eq!(output.stderr, "err\n");
}

#[tokio::test]
async fn test_runner_survives_flooded_stderr() {
    // Far more than a pipe buffer on stderr while stdout stays quiet
    let command = ProcessCommandBuilder::new("sh")
        .args([
            "-c",
            "i=0; while [ $i -lt 20000 ]; do echo 'noise on stderr' >&2; i=$((i+1)); done; echo done",
        ])
        .timeout(Duration::from_secs(30))
        .build();

    let output = TokioProcessRunner.run(command).await.unwrap();

    assert!(output.status.success());
    assert_eq!(output.stdout.trim(), "done");
    assert_eq!(output.stderr.lines().count(), 20000);
}

#[tokio::test]
async fn test_runner_feeds_large_stdin_to_chatty_child() {
    // The child echoes its input back while we are still writing it
    let input = "0123456789abcdef\n".repeat(16 * 1024);
    let command = ProcessCommandBuilder::new("cat").stdin(input.clone()).build();

    let output = TokioProcessRunner.run(command).await.unwrap();

    assert_eq!(output.stdout.len(), input.len());
}

#[tokio::test]
async fn test_runner_env_and_working_dir() {
    let temp = tempfile::TempDir::new().unwrap();
    let command = ProcessCommandBuilder::new("sh")
        .args(["-c", "echo \"$CMDPILOT_STAGE\"; pwd"])
        .env("CMDPILOT_STAGE", "Tagger")
        .current_dir(temp.path())
        .build();

    let output = TokioProcessRunner.run(command).await.unwrap();

    let lines: Vec<&str> = output.stdout.lines().collect();
    assert_eq!(lines[0], "Tagger");
    assert!(lines[1].ends_with(&*temp.path().file_name().unwrap().to_string_lossy()));
}

#[tokio::test]
async fn test_runner_missing_program() {
    let result = TokioProcessRunner
        .run(ProcessCommandBuilder::new("cmdpilot-no-such-program").build())
        .await;
    assert!(matches!(result, Err(ProcessError::CommandNotFound(_))));
}

#[tokio::test]
async fn test_runner_timeout_kills_child() {
    let command = ProcessCommandBuilder::new("sleep")
        .arg("5")
        .timeout(Duration::from_millis(100))
        .build();

    let started = std::time::Instant::now();
    let result = TokioProcessRunner.run(command).await;

    assert!(matches!(result, Err(ProcessError::Timeout(_))));
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn test_mock_matches_program_and_args() {
    let mock = MockProcessRunner::new();
    mock.on("su")
        .when_args(|args| args.last().is_some_and(|line| line.starts_with("chroot")))
        .stdout("inside\n")
        .install();
    mock.on("su").stdout("outside\n").install();

    let inside = mock
        .run(ProcessCommandBuilder::new("su").args(["-c", "chroot /x sh"]).build())
        .await
        .unwrap();
    let outside = mock
        .run(ProcessCommandBuilder::new("su").args(["-c", "id"]).build())
        .await
        .unwrap();

    assert_eq!(inside.stdout, "inside\n");
    assert_eq!(outside.stdout, "outside\n");
    assert_eq!(mock.call_count("su"), 2);
}

#[tokio::test]
async fn test_mock_limited_replies_form_a_queue() {
    let mock = MockProcessRunner::new();
    mock.on("su").stdout("first").once().install();
    mock.on("su").exit_code(2).stderr("second").install();

    let su = || ProcessCommandBuilder::new("su").build();
    let first = mock.run(su()).await.unwrap();
    let second = mock.run(su()).await.unwrap();
    let third = mock.run(su()).await.unwrap();

    assert_eq!(first.stdout, "first");
    assert_eq!(second.status, ExitStatus::Error(2));
    assert_eq!(third.stderr, "second");
}

#[tokio::test]
async fn test_mock_unscripted_and_missing_programs() {
    let mock = MockProcessRunner::new();
    mock.on("su").not_found().install();

    let unscripted = mock.run(ProcessCommandBuilder::new("sh").build()).await;
    let missing = mock.run(ProcessCommandBuilder::new("su").build()).await;

    assert!(matches!(
        unscripted,
        Err(ProcessError::MockExpectationNotMet(_))
    ));
    assert!(matches!(missing, Err(ProcessError::CommandNotFound(_))));
    assert_eq!(mock.calls().len(), 2);
}
