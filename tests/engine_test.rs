//! End-to-end engine tests: real background loops driven on a paused
//! tokio clock.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use orchestrator::{
    EngineConfig, ManagerStatus, SchedulerEngine, SchedulerError, SchedulerResult, StaticSampler,
    Task, TaskExecutor, TaskPriority, TaskResult, TaskSink, TaskSpec, TaskStatus,
};
use orchestrator_worker::{LocalProvisioner, ResourceSample};

struct EchoExecutor {
    fail_kinds: Vec<String>,
}

impl EchoExecutor {
    fn reliable() -> Self {
        Self { fail_kinds: vec![] }
    }

    fn failing(kinds: &[&str]) -> Self {
        Self {
            fail_kinds: kinds.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl TaskExecutor for EchoExecutor {
    async fn execute(&self, task: &Task) -> SchedulerResult<TaskResult> {
        if self.fail_kinds.contains(&task.kind) {
            return Err(SchedulerError::ExecutionFailed(format!(
                "no handler for {}",
                task.kind
            )));
        }
        Ok(TaskResult {
            output: task.payload.clone(),
        })
    }
}

#[derive(Default)]
struct RecordingSink {
    tasks: RwLock<Vec<Task>>,
}

impl RecordingSink {
    async fn persisted(&self) -> Vec<Task> {
        self.tasks.read().await.clone()
    }
}

#[async_trait]
impl TaskSink for RecordingSink {
    async fn persist(&self, task: &Task) -> SchedulerResult<()> {
        self.tasks.write().await.push(task.clone());
        Ok(())
    }
}

fn build_engine(
    config: EngineConfig,
    executor: EchoExecutor,
) -> (SchedulerEngine, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let engine = SchedulerEngine::with_collaborators(
        config.clone(),
        Arc::new(executor),
        sink.clone(),
        None,
        Arc::new(StaticSampler(ResourceSample {
            cpu_percent: 50.0,
            memory_percent: 50.0,
        })),
        Arc::new(LocalProvisioner::new(config.pool.worker_capacity)),
    )
    .expect("engine wiring");
    (engine, sink)
}

async fn wait_for<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..10_000 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test(start_paused = true)]
async fn submitted_tasks_complete_in_priority_order() {
    let (engine, sink) = build_engine(EngineConfig::default(), EchoExecutor::reliable());
    engine.start().await.unwrap();

    // hold dispatch until all three are queued so the drain order is
    // observable
    engine.pause().await;
    engine
        .submit(TaskSpec::new("low", TaskPriority::Low, serde_json::json!(1)))
        .await
        .unwrap();
    engine
        .submit(TaskSpec::new(
            "critical",
            TaskPriority::Critical,
            serde_json::json!(2),
        ))
        .await
        .unwrap();
    engine
        .submit(TaskSpec::new(
            "normal",
            TaskPriority::Normal,
            serde_json::json!(3),
        ))
        .await
        .unwrap();
    engine.resume().await;

    wait_for(|| async { sink.persisted().await.len() == 3 }).await;

    let persisted = sink.persisted().await;
    assert!(persisted.iter().all(|t| t.status == TaskStatus::Completed));
    let kinds: Vec<_> = persisted.iter().map(|t| t.kind.as_str()).collect();
    assert_eq!(kinds, vec!["critical", "normal", "low"]);

    let status = engine.status().await;
    assert_eq!(status.queue.total_depth, 0);
    assert_eq!(status.in_flight, 0);
    assert_eq!(status.dead_letters, 0);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn full_tier_rejects_submission() {
    let mut config = EngineConfig::default();
    config.queue.max_depth_per_tier = 2;
    let (engine, _sink) = build_engine(config, EchoExecutor::reliable());
    // not started: nothing drains the queue

    for _ in 0..2 {
        engine
            .submit(TaskSpec::new(
                "fill",
                TaskPriority::Normal,
                serde_json::Value::Null,
            ))
            .await
            .unwrap();
    }
    let rejected = engine
        .submit(TaskSpec::new(
            "overflow",
            TaskPriority::Normal,
            serde_json::Value::Null,
        ))
        .await;
    assert!(matches!(rejected, Err(SchedulerError::QueueFull { .. })));

    // other tiers are unaffected
    engine
        .submit(TaskSpec::new(
            "urgent",
            TaskPriority::Urgent,
            serde_json::Value::Null,
        ))
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_dead_letter_and_resurrect() {
    let (engine, sink) = build_engine(EngineConfig::default(), EchoExecutor::failing(&["doomed"]));
    engine.start().await.unwrap();

    let mut spec = TaskSpec::new("doomed", TaskPriority::High, serde_json::Value::Null);
    spec.max_retries = Some(0);
    let id = engine.submit(spec).await.unwrap();

    wait_for(|| async { engine.status().await.dead_letters == 1 }).await;
    let dead = engine.dead_letters().await;
    assert_eq!(dead[0].id, id);
    assert_eq!(dead[0].status, TaskStatus::DeadLettered);
    assert_eq!(dead[0].retry_count, 1);
    assert!(dead[0].failure_history[0].error.contains("no handler"));
    // the terminal state reached the sink
    let persisted = sink.persisted().await;
    assert!(persisted
        .iter()
        .any(|t| t.id == id && t.status == TaskStatus::DeadLettered));

    // resurrect re-runs the task; with a zero budget it dead-letters again
    engine.resurrect(id).await.unwrap();
    wait_for(|| async { engine.status().await.dead_letters == 1 }).await;
    assert_eq!(engine.dead_letters().await[0].id, id);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn flaky_task_retries_at_demoted_priority() {
    // "flaky" fails forever here, but the default budget of 3 retries
    // means three requeues before the dead-letter store
    let (engine, _sink) = build_engine(EngineConfig::default(), EchoExecutor::failing(&["flaky"]));
    engine.start().await.unwrap();

    let id = engine
        .submit(TaskSpec::new(
            "flaky",
            TaskPriority::Urgent,
            serde_json::Value::Null,
        ))
        .await
        .unwrap();

    wait_for(|| async { engine.status().await.dead_letters == 1 }).await;
    let dead = engine.dead_letters().await;
    assert_eq!(dead[0].id, id);
    assert_eq!(dead[0].retry_count, 4);
    assert_eq!(dead[0].failure_history.len(), 4);
    // demoted one step per failed attempt, floored at LOW
    assert_eq!(dead[0].priority, TaskPriority::Low);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn pause_and_resume_gate_dispatch() {
    let (engine, sink) = build_engine(EngineConfig::default(), EchoExecutor::reliable());
    engine.start().await.unwrap();
    engine.pause().await;

    engine
        .submit(TaskSpec::new(
            "held",
            TaskPriority::Normal,
            serde_json::Value::Null,
        ))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(sink.persisted().await.is_empty());
    assert_eq!(engine.status().await.queue.status, ManagerStatus::Paused);

    engine.resume().await;
    wait_for(|| async { sink.persisted().await.len() == 1 }).await;

    engine.shutdown().await;
}
