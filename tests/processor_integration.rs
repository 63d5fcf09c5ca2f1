//! End-to-end tests: scripts on disk, config, processor and in-memory session

use std::path::PathBuf;
use std::sync::Arc;

use flowscript::config::Config;
use flowscript::interpreter::{FlowEngine, FlowEngineFactory};
use flowscript::processor::{Outcome, ScriptProcessor};
use flowscript::runner::StageRunner;
use flowscript::session::{MemoryRepository, Relationship};
use flowscript::{ConfigError, StartError};

/* ===================== Test Helpers ===================== */

fn script_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("scripts")
        .join(name)
}

fn start_file(name: &str, tasks: usize) -> Arc<ScriptProcessor<FlowEngine>> {
    let config = Config::builder()
        .script_file(script_path(name))
        .max_concurrent_tasks(tasks)
        .build()
        .expect("Config failed");
    Arc::new(ScriptProcessor::start(&config, &FlowEngineFactory).expect("Start failed"))
}

fn contents(repo: &MemoryRepository, relationship: Relationship) -> Vec<String> {
    repo.transferred(relationship)
        .into_iter()
        .map(|r| String::from_utf8(r.content).expect("UTF-8 content"))
        .collect()
}

/* ===================== Configuration ===================== */

#[test]
fn test_inline_arithmetic_is_valid_configuration() {
    let config = Config::builder().script_body("1 + 1").build().unwrap();
    let processor = ScriptProcessor::start(&config, &FlowEngineFactory);
    assert!(processor.is_ok());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_inline_arithmetic_executes() {
    let config = Config::builder().script_body("1 + 1").build().unwrap();
    let processor = ScriptProcessor::start(&config, &FlowEngineFactory).unwrap();
    let repo = MemoryRepository::new();

    let outcome = processor.execute(Arc::new(repo.session())).await.unwrap();
    assert_eq!(outcome, Outcome::Success);
}

#[test]
fn test_exactly_one_script_source() {
    let neither = Config::builder().build().unwrap();
    assert!(matches!(
        ScriptProcessor::start(&neither, &FlowEngineFactory),
        Err(StartError::Config(ConfigError::NoScript))
    ));

    let both = Config::builder()
        .script_body("1")
        .script_file(script_path("hello_world.flow"))
        .build()
        .unwrap();
    assert!(matches!(
        ScriptProcessor::start(&both, &FlowEngineFactory),
        Err(StartError::Config(ConfigError::ConflictingScript))
    ));

    let missing = Config::builder()
        .script_file(script_path("does_not_exist.flow"))
        .build()
        .unwrap();
    assert!(matches!(
        ScriptProcessor::start(&missing, &FlowEngineFactory),
        Err(StartError::Config(ConfigError::ScriptFile { .. }))
    ));
}

/* ===================== Record Scripts ===================== */

#[tokio::test(flavor = "multi_thread")]
async fn test_hello_world_script() {
    let processor = start_file("hello_world.flow", 1);
    let runner = StageRunner::new(processor, MemoryRepository::new());
    runner.repository().enqueue("test content");

    let report = runner.run(1).await;

    assert_eq!(report.succeeded, 1);
    assert_eq!(contents(runner.repository(), Relationship::Success), vec!["Hello world"]);
    assert!(runner.repository().transferred(Relationship::Failure).is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_input_transformation_script() {
    let processor = start_file("input_transformation.flow", 1);
    let runner = StageRunner::new(processor, MemoryRepository::new());
    runner.repository().enqueue("name=foo;value=bar");

    let report = runner.run(1).await;

    assert_eq!(report.succeeded, 1);
    let out = runner.repository().transferred(Relationship::Success);
    assert_eq!(out.len(), 1);
    assert_eq!(
        String::from_utf8(out[0].content.clone()).unwrap(),
        r#"[{"name":"foo"},{"value":"bar"}]"#
    );
    assert_eq!(out[0].attributes["mime.type"], "application/json");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_records_on_small_pool() {
    let processor = start_file("hello_world.flow", 2);
    let runner = StageRunner::new(Arc::clone(&processor), MemoryRepository::new());
    for i in 0..25 {
        runner.repository().enqueue(format!("record {}", i));
    }

    let report = runner.run_queue().await;

    assert_eq!(report.succeeded, 25);
    assert_eq!(runner.repository().transferred(Relationship::Success).len(), 25);
    assert_eq!(processor.pool().idle(), 2);
    assert_eq!(processor.pool().in_use(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_empty_queue_is_a_clean_success() {
    let processor = start_file("hello_world.flow", 1);
    let repo = MemoryRepository::new();

    let outcome = processor.execute(Arc::new(repo.session())).await.unwrap();

    assert_eq!(outcome, Outcome::Success);
    assert!(repo.transferred(Relationship::Success).is_empty());
}

/* ===================== Stream Scripts ===================== */

#[tokio::test(flavor = "multi_thread")]
async fn test_stream_passthrough_preserves_bytes() {
    let processor = start_file("passthrough.flow", 1);
    let input: Vec<u8> = (0..10_000u32).map(|i| (i * 31 % 256) as u8).collect();

    let output = processor
        .transform(std::io::Cursor::new(input.clone()), Vec::new())
        .await
        .unwrap();

    assert_eq!(output, input);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stream_passthrough_empty_input() {
    let processor = start_file("passthrough.flow", 1);

    let output = processor
        .transform(std::io::Cursor::new(Vec::new()), Vec::new())
        .await
        .unwrap();

    assert!(output.is_empty());
}

/* ===================== Shutdown ===================== */

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_refuses_new_work() {
    let processor = start_file("hello_world.flow", 1);
    processor.stop();

    let repo = MemoryRepository::new();
    repo.enqueue("late");
    assert!(processor.execute(Arc::new(repo.session())).await.is_err());
    assert_eq!(repo.queued(), 1);
}
