//! End-to-end pipeline scenarios with a scripted model and in-memory files.

use cmdpilot::access::MemoryFileAccessor;
use cmdpilot::config::{ExecutorSettings, StageSettingsMap};
use cmdpilot::docs::DocumentationResolver;
use cmdpilot::executor::SessionExecutor;
use cmdpilot::model::{ScriptedModelService, StageRole};
use cmdpilot::pipeline::{
    CommandSink, PipelineEvent, PipelineOrchestrator, PipelineOutcome, RetryPolicy,
};
use cmdpilot::subprocess::MockProcessRunner;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn pipeline(service: &ScriptedModelService, accessor: MemoryFileAccessor) -> PipelineOrchestrator {
    PipelineOrchestrator::new(
        Arc::new(service.clone()),
        DocumentationResolver::new("/kb", Arc::new(accessor)),
        RetryPolicy::immediate(3),
    )
}

#[tokio::test]
async fn test_generator_receives_documentation_instead_of_tags() {
    let service = ScriptedModelService::new();
    service
        .reply(StageRole::Stepper, "Sure!\n{\"steps\":[{\"step\":\"list\"}]}")
        .reply(
            StageRole::Tagger,
            "{\"steps\":[{\"tags\":[\"ls\"],\"step\":\"list\"}]}",
        );
    let mut pipeline = pipeline(&service, MemoryFileAccessor::new().with_file("/kb/ls.md", "X"));

    // Generator has nothing scripted, so the run halts right after it
    let outcome = pipeline.submit("list files").await;
    assert!(matches!(
        outcome,
        PipelineOutcome::Halted {
            stage: StageRole::Generator,
            ..
        }
    ));

    assert_eq!(
        service.last_input(StageRole::Tagger).as_deref(),
        Some("{\"steps\":[{\"step\":\"list\"}]}")
    );
    let received: Value =
        serde_json::from_str(&service.last_input(StageRole::Generator).unwrap()).unwrap();
    assert_eq!(
        received,
        json!({"steps": [{"step": "list", "documentation": ["X"]}]})
    );
    let step = received["steps"][0].as_object().unwrap();
    assert!(!step.contains_key("tag"));
    assert!(!step.contains_key("tags"));
}

#[tokio::test]
async fn test_every_failure_reason_reaches_generator() {
    let service = ScriptedModelService::new();
    service
        .reply(StageRole::Stepper, "{\"steps\":[{\"step\":\"copy\"}]}")
        .reply(StageRole::Tagger, "{\"steps\":[{\"step\":\"copy\",\"tag\":\"cp\"}]}");
    for reason in ["missing flag", "missing flag", "wrong source"] {
        service
            .reply(StageRole::Generator, "{\"steps\":[{\"command\":\"cp a b\"}]}")
            .reply(StageRole::Consolidator, "{\"steps\":[{\"command\":\"cp a b\"}]}")
            .reply(
                StageRole::Verifier,
                &json!({"verification_result": "failure", "reason": reason}).to_string(),
            );
    }
    service
        .reply(StageRole::Generator, "{\"steps\":[{\"command\":\"cp -r a b\"}]}")
        .reply(StageRole::Consolidator, "{\"steps\":[{\"command\":\"cp -r a b\"}]}")
        .reply(
            StageRole::Verifier,
            "```json\n{\"verification_result\":\"success\",\"steps\":[{\"command\":\"cp -r a b\"}]}\n```",
        );
    let mut pipeline = pipeline(&service, MemoryFileAccessor::new());
    let mut events = pipeline.subscribe();

    let outcome = pipeline.submit("copy a to b").await;

    let payload = "{\"verification_result\":\"success\",\"steps\":[{\"command\":\"cp -r a b\"}]}";
    assert_eq!(outcome, PipelineOutcome::Done(payload.to_string()));

    let generator_inputs: Vec<String> = service
        .requests_for(StageRole::Generator)
        .into_iter()
        .map(|request| request.input)
        .collect();
    assert_eq!(generator_inputs.len(), 4);
    assert!(generator_inputs[1].contains("missing flag"));
    assert!(generator_inputs[2].contains("missing flag"));
    assert!(generator_inputs[3].contains("wrong source"));
    assert!(generator_inputs[3].contains("ask_user:"));

    let mut failures = Vec::new();
    let mut verified = None;
    while let Ok(event) = events.try_recv() {
        match event {
            PipelineEvent::VerificationFailed { reason, attempt } => failures.push((attempt, reason)),
            PipelineEvent::Verified(payload) => verified = Some(payload),
            _ => {}
        }
    }
    assert_eq!(
        failures,
        vec![
            (1, "missing flag".to_string()),
            (2, "missing flag".to_string()),
            (3, "wrong source".to_string())
        ]
    );
    assert_eq!(verified.as_deref(), Some(payload));
}

#[tokio::test]
async fn test_retry_counter_resets_per_submission() {
    let service = ScriptedModelService::new();
    let failure = "{\"verification_result\":\"failure\",\"reason\":\"bad\"}";
    for _ in 0..2 {
        service
            .reply(StageRole::Stepper, "{\"steps\":[]}")
            .reply(StageRole::Tagger, "{\"steps\":[]}");
        for _ in 0..2 {
            service
                .reply(StageRole::Generator, "{\"steps\":[]}")
                .reply(StageRole::Consolidator, "{}")
                .reply(StageRole::Verifier, failure);
        }
    }
    let mut pipeline = PipelineOrchestrator::new(
        Arc::new(service.clone()),
        DocumentationResolver::new("/kb", Arc::new(MemoryFileAccessor::new())),
        RetryPolicy::immediate(1),
    );

    for _ in 0..2 {
        let outcome = pipeline.submit("anything").await;
        assert_eq!(
            outcome,
            PipelineOutcome::RetriesExhausted {
                attempts: 1,
                reason: "bad".to_string()
            }
        );
    }
    assert_eq!(service.requests_for(StageRole::Generator).len(), 4);
}

#[tokio::test]
async fn test_stage_timeout_halts_pipeline() {
    let service = ScriptedModelService::new().with_delay(Duration::from_millis(200));
    service.reply(StageRole::Stepper, "{\"steps\":[]}");
    let mut pipeline = pipeline(&service, MemoryFileAccessor::new())
        .with_stage_timeout(Duration::from_millis(20));

    let outcome = pipeline.submit("slow").await;

    assert!(matches!(
        outcome,
        PipelineOutcome::Halted {
            stage: StageRole::Stepper,
            ..
        }
    ));
}

#[tokio::test]
async fn test_stage_transcripts_survive_export() {
    let service = ScriptedModelService::new();
    service.reply(StageRole::Stepper, "not json");
    let files = MemoryFileAccessor::new()
        .with_file("/cfg/models.md", "## QueryStepper\nContext: stepper.md\n")
        .with_file("/cfg/stepper.md", "You split requests into steps.");
    let mut pipeline = pipeline(&service, files.clone());

    let settings = StageSettingsMap::load(&files, Path::new("/cfg/models.md"))
        .await
        .unwrap();
    pipeline.configure(&settings, &files).await;
    pipeline.submit("hello").await;

    let stepper = pipeline.stage(StageRole::Stepper).unwrap();
    assert_eq!(stepper.history().len(), 3);
    stepper
        .export_history(&files, Path::new("/out/stepper.txt"))
        .await
        .unwrap();
    assert_eq!(
        files.get("/out/stepper.txt").unwrap(),
        "[user] You split requests into steps.\n[user] hello\n[model] not json\n"
    );

    // The context was sent along with the query
    let request = &service.requests_for(StageRole::Stepper)[0];
    assert_eq!(request.history.len(), 1);
    assert_eq!(request.input, "hello");
}

#[tokio::test]
async fn test_verified_payload_runs_through_sink() {
    let runner = MockProcessRunner::new();
    runner.on("sh").stdout("done\n").install();
    let executor = SessionExecutor::new(Arc::new(runner.clone()), ExecutorSettings::default());

    let payload = json!({
        "verification_result": "success",
        "consolidated_commands": [{"commands": "mkdir -p out && cp a out/"}],
        "steps": [{"command": "ls out"}]
    })
    .to_string();
    let reports = CommandSink::new(executor.clone()).run(&payload).await.unwrap();

    // The consolidated form already covers the step; it must not run twice
    assert_eq!(reports.len(), 1);
    assert!(reports[0].success());
    let lines: Vec<String> = runner
        .calls()
        .into_iter()
        .map(|call| call.args[1].clone())
        .collect();
    assert_eq!(lines, vec!["mkdir -p out && cp a out/"]);
    assert_eq!(executor.history().len(), 3);
}
