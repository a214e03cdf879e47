use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use teamllm::teamllm::agent::Agent;
use teamllm::teamllm::client::{ClientWrapper, Message, Role};
use teamllm::teamllm::runner::{
    RunFunc, RunResult, RunnerError, SubagentDefinition, SubagentRunner,
};

struct MockClient {
    model: String,
    response: String,
}

impl MockClient {
    fn new(response: &str) -> Arc<MockClient> {
        Arc::new(MockClient {
            model: "mock-model".to_string(),
            response: response.to_string(),
        })
    }
}

#[async_trait]
impl ClientWrapper for MockClient {
    async fn send_message(
        &self,
        _model: &str,
        _messages: &[Message],
    ) -> Result<Message, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Message::new(Role::Assistant, &self.response))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn echo_run_func() -> RunFunc {
    Arc::new(|_cancel, _agent, prompt| {
        Box::pin(async move {
            RunResult {
                output: format!("task completed: {}", prompt),
                ..Default::default()
            }
        })
    })
}

#[tokio::test]
async fn test_spawn_and_wait_returns_result() {
    let parent = Agent::new("parent", MockClient::new("unused"));
    let runner = SubagentRunner::new(&parent, vec![SubagentDefinition::new("worker")])
        .with_run_func(echo_run_func());

    let cancel = CancellationToken::new();
    let run_id = runner.spawn(&cancel, "worker", "analyze the data").unwrap();
    assert!(run_id.starts_with("run_"));
    assert_eq!(runner.active(), 1);

    let result = runner.wait(&cancel, &run_id).await.unwrap();
    assert_eq!(result.output, "task completed: analyze the data");
    assert!(result.error.is_none());
    assert_eq!(runner.active(), 0);
}

#[tokio::test]
async fn test_second_wait_fails_with_run_not_found() {
    let parent = Agent::new("parent", MockClient::new("unused"));
    let runner = SubagentRunner::new(&parent, vec![SubagentDefinition::new("worker")])
        .with_run_func(echo_run_func());

    let cancel = CancellationToken::new();
    let run_id = runner.spawn(&cancel, "worker", "x").unwrap();

    runner.wait(&cancel, &run_id).await.unwrap();
    let err = runner.wait(&cancel, &run_id).await.unwrap_err();
    assert_eq!(err, RunnerError::RunNotFound(run_id));
}

#[tokio::test]
async fn test_spawn_unknown_definition_fails() {
    let parent = Agent::new("parent", MockClient::new("unused"));
    let runner = SubagentRunner::new(&parent, vec![SubagentDefinition::new("worker")]);

    let cancel = CancellationToken::new();
    let err = runner.spawn(&cancel, "nonexistent", "x").unwrap_err();
    assert_eq!(err, RunnerError::DefinitionNotFound("nonexistent".to_string()));
    assert!(err.to_string().contains("definition not found"));
}

#[tokio::test]
async fn test_cancel_cancels_child_token() {
    let parent = Agent::new("parent", MockClient::new("unused"));
    // A child that only finishes when its token is cancelled.
    let run_func: RunFunc = Arc::new(|cancel, _agent, _prompt| {
        Box::pin(async move {
            cancel.cancelled().await;
            RunResult {
                error: Some("run cancelled".to_string()),
                ..Default::default()
            }
        })
    });
    let runner =
        SubagentRunner::new(&parent, vec![SubagentDefinition::new("worker")]).with_run_func(run_func);

    let cancel = CancellationToken::new();
    let run_id = runner.spawn(&cancel, "worker", "spin").unwrap();

    runner.cancel(&run_id);
    let result = runner.wait(&cancel, &run_id).await.unwrap();
    assert_eq!(result.error.as_deref(), Some("run cancelled"));
}

#[tokio::test]
async fn test_wait_cancellation_removes_handle() {
    let parent = Agent::new("parent", MockClient::new("unused"));
    // A child that never finishes on its own.
    let run_func: RunFunc = Arc::new(|cancel, _agent, _prompt| {
        Box::pin(async move {
            cancel.cancelled().await;
            RunResult::default()
        })
    });
    let runner =
        SubagentRunner::new(&parent, vec![SubagentDefinition::new("worker")]).with_run_func(run_func);

    let spawn_cancel = CancellationToken::new();
    let run_id = runner.spawn(&spawn_cancel, "worker", "spin").unwrap();

    let wait_cancel = CancellationToken::new();
    let waiter = {
        let cancel = wait_cancel.clone();
        let id = run_id.clone();
        async move { runner.wait(&cancel, &id).await }
    };
    wait_cancel.cancel();

    let err = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("wait did not observe cancellation")
        .unwrap_err();
    assert_eq!(err, RunnerError::RunCancelled(run_id));
}

#[tokio::test]
async fn test_child_inherits_parent_model_unless_overridden() {
    let parent = Agent::new("parent", MockClient::new("unused")).with_model("parent-model");

    let seen_models: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen_models);
    let run_func: RunFunc = Arc::new(move |_cancel, agent, _prompt| {
        recorder.lock().unwrap().push(agent.model().to_string());
        Box::pin(async { RunResult::default() })
    });

    let runner = SubagentRunner::new(
        &parent,
        vec![
            SubagentDefinition::new("inheritor"),
            SubagentDefinition::new("overrider").with_model("tiny-model"),
        ],
    )
    .with_run_func(run_func);

    let cancel = CancellationToken::new();
    let a = runner.spawn(&cancel, "inheritor", "x").unwrap();
    let b = runner.spawn(&cancel, "overrider", "x").unwrap();
    runner.wait(&cancel, &a).await.unwrap();
    runner.wait(&cancel, &b).await.unwrap();

    let models = seen_models.lock().unwrap();
    assert_eq!(
        *models,
        vec!["parent-model".to_string(), "tiny-model".to_string()]
    );
}

#[tokio::test]
async fn test_default_run_func_drains_child_stream() {
    let parent = Agent::new("parent", MockClient::new("the child says hi"));
    let runner = SubagentRunner::new(
        &parent,
        vec![SubagentDefinition::new("worker").with_instructions("Be brief.")],
    );

    let cancel = CancellationToken::new();
    let run_id = runner.spawn(&cancel, "worker", "greet").unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), runner.wait(&cancel, &run_id))
        .await
        .expect("child run did not finish")
        .unwrap();

    assert_eq!(result.output, "the child says hi");
    assert!(result.error.is_none());
}

#[tokio::test]
async fn test_definitions_are_listed_sorted() {
    let parent = Agent::new("parent", MockClient::new("unused"));
    let runner = SubagentRunner::new(
        &parent,
        vec![
            SubagentDefinition::new("zeta"),
            SubagentDefinition::new("alpha"),
        ],
    );

    let names: Vec<String> = runner.definitions().into_iter().map(|d| d.name).collect();
    assert_eq!(names, vec!["alpha", "zeta"]);
}
