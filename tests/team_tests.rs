use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;

use teamllm::teamllm::agent::Agent;
use teamllm::teamllm::bus::{Message, MessageType};
use teamllm::teamllm::client::{ClientWrapper, Message as ChatMessage, Role};
use teamllm::teamllm::event::{AgentEvent, TeamEvent, TeamStream};
use teamllm::teamllm::member::MemberStatus;
use teamllm::teamllm::task_list::TaskStatus;
use teamllm::teamllm::team::{Team, TeamError, TeamOptions};
use teamllm::teamllm::topology::{BlackboardTopology, LeaderTeammate};

const WAIT: Duration = Duration::from_secs(5);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Mock provider that records every prompt it is sent and replies with a
/// fixed line.
struct RecordingClient {
    response: String,
    seen: Arc<Mutex<Vec<String>>>,
}

impl RecordingClient {
    fn new(response: &str) -> (Arc<RecordingClient>, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let client = Arc::new(RecordingClient {
            response: response.to_string(),
            seen: Arc::clone(&seen),
        });
        (client, seen)
    }
}

#[async_trait]
impl ClientWrapper for RecordingClient {
    async fn send_message(
        &self,
        _model: &str,
        messages: &[ChatMessage],
    ) -> Result<ChatMessage, Box<dyn std::error::Error + Send + Sync>> {
        if let Some(last) = messages.last() {
            self.seen.lock().unwrap().push(last.content.to_string());
        }
        Ok(ChatMessage::new(Role::Assistant, &self.response))
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}

/// Drain the stream until a terminal result event from `member` arrives.
async fn wait_for_result(stream: &mut TeamStream, member: &str) -> TeamEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            let event = stream.next().await.expect("stream closed early");
            if event.member_name == member {
                if let AgentEvent::Result(_) = event.event {
                    return event;
                }
            }
        }
    })
    .await
    .expect("timed out waiting for result event")
}

/// Poll until the named member reaches `status`.
async fn wait_for_status(team: &Team, member: &str, status: MemberStatus) {
    tokio::time::timeout(WAIT, async {
        loop {
            let reached = team
                .members()
                .iter()
                .any(|m| m.name() == member && m.status() == status);
            if reached {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for member status");
}

#[tokio::test]
async fn test_start_runs_leader_and_labels_events() {
    init_logging();
    let (client, seen) = RecordingClient::new("lead reporting in");
    let options = TeamOptions::new(
        Arc::new(LeaderTeammate::new("lead")),
        Agent::new("lead", client),
    );
    let team = Team::new("crew", options);
    assert!(team.id().starts_with("team_"));

    let mut stream = team.start("kick off the project");

    let event = wait_for_result(&mut stream, "lead").await;
    match event.event {
        AgentEvent::Result(outcome) => {
            assert_eq!(outcome.text, "lead reporting in");
            assert!(outcome.error.is_none());
        }
        other => panic!("expected result event, got {:?}", other),
    }

    // The leader's initial run saw the kick-off prompt.
    let prompts = seen.lock().unwrap();
    assert!(prompts.iter().any(|p| p.contains("kick off the project")));
    drop(prompts);

    team.shutdown();
    let closed = tokio::time::timeout(WAIT, async {
        while stream.next().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok(), "stream did not close after shutdown");
}

#[tokio::test]
async fn test_spawn_member_duplicate_fails() {
    let (lead_client, _) = RecordingClient::new("ok");
    let (member_client, _) = RecordingClient::new("ok");
    let options = TeamOptions::new(
        Arc::new(LeaderTeammate::new("lead")),
        Agent::new("lead", lead_client),
    )
    .with_member("alice", Agent::new("alice", member_client));
    let team = Team::new("crew", options);

    let mut stream = team.start("go");
    wait_for_result(&mut stream, "lead").await;

    let (dup_client, _) = RecordingClient::new("ok");
    let err = team
        .spawn_member("alice", Agent::new("alice", dup_client))
        .unwrap_err();
    assert_eq!(err, TeamError::AlreadyExists("alice".to_string()));

    team.shutdown();
}

#[tokio::test]
async fn test_spawn_member_before_start_fails() {
    let (lead_client, _) = RecordingClient::new("ok");
    let (member_client, _) = RecordingClient::new("ok");
    let team = Team::new(
        "crew",
        TeamOptions::new(
            Arc::new(LeaderTeammate::new("lead")),
            Agent::new("lead", lead_client),
        ),
    );

    let err = team
        .spawn_member("alice", Agent::new("alice", member_client))
        .unwrap_err();
    assert_eq!(err, TeamError::NotRunning);
}

#[tokio::test]
async fn test_member_processes_message_as_prefixed_prompt() {
    let (lead_client, _) = RecordingClient::new("lead done");
    let (alice_client, alice_seen) = RecordingClient::new("alice done");
    let options = TeamOptions::new(
        Arc::new(LeaderTeammate::new("lead")),
        Agent::new("lead", lead_client),
    )
    .with_member("alice", Agent::new("alice", alice_client));
    let team = Team::new("crew", options);

    let mut stream = team.start("go");
    wait_for_result(&mut stream, "lead").await;

    team.bus()
        .send(Message::direct("lead", "alice", "ping"))
        .unwrap();

    let event = wait_for_result(&mut stream, "alice").await;
    match event.event {
        AgentEvent::Result(outcome) => assert_eq!(outcome.text, "alice done"),
        other => panic!("expected result event, got {:?}", other),
    }

    let prompts = alice_seen.lock().unwrap();
    assert!(
        prompts.iter().any(|p| p.contains("[Message from lead]: ping")),
        "prompt missing message prefix: {:?}",
        *prompts
    );
    drop(prompts);

    team.shutdown();
}

#[tokio::test]
async fn test_shutdown_request_is_acknowledged() {
    let (lead_client, _) = RecordingClient::new("lead done");
    let (alice_client, _) = RecordingClient::new("alice done");
    let options = TeamOptions::new(
        Arc::new(LeaderTeammate::new("lead")),
        Agent::new("lead", lead_client),
    )
    .with_member("alice", Agent::new("alice", alice_client));
    let team = Team::new("crew", options);

    let mut stream = team.start("go");
    wait_for_result(&mut stream, "lead").await;

    // An external observer asks alice to shut down.
    let mut observer = team.bus().subscribe("observer", 4);
    let request = Message::shutdown_request("observer", "alice", "wrapping up");
    let request_id = request.request_id.clone();
    team.bus().send(request).unwrap();

    let response = tokio::time::timeout(WAIT, observer.recv())
        .await
        .expect("timed out waiting for shutdown response")
        .unwrap();
    assert_eq!(response.message_type, MessageType::ShutdownResponse);
    assert_eq!(response.from, "alice");
    assert_eq!(response.request_id, request_id);

    wait_for_status(&team, "alice", MemberStatus::Shutdown).await;

    team.shutdown();
}

#[tokio::test]
async fn test_shutdown_transitions_members_and_closes_stream() {
    init_logging();
    let (lead_client, _) = RecordingClient::new("lead done");
    let (alice_client, _) = RecordingClient::new("alice done");
    let options = TeamOptions::new(
        Arc::new(LeaderTeammate::new("lead")),
        Agent::new("lead", lead_client),
    )
    .with_member("alice", Agent::new("alice", alice_client));
    let team = Team::new("crew", options);

    let mut stream = team.start("go");
    wait_for_result(&mut stream, "lead").await;

    team.shutdown();

    let closed = tokio::time::timeout(WAIT, async {
        while stream.next().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok(), "stream did not close after shutdown");

    wait_for_status(&team, "lead", MemberStatus::Shutdown).await;
    wait_for_status(&team, "alice", MemberStatus::Shutdown).await;
}

#[tokio::test]
async fn test_assign_pending_tasks_binds_claims() {
    let (lead_client, _) = RecordingClient::new("lead done");
    let (alice_client, _) = RecordingClient::new("alice done");
    let (bob_client, _) = RecordingClient::new("bob done");
    let options = TeamOptions::new(
        Arc::new(BlackboardTopology::new()),
        Agent::new("lead", lead_client),
    )
    .with_member("alice", Agent::new("alice", alice_client))
    .with_member("bob", Agent::new("bob", bob_client));
    let team = Team::new("crew", options);

    let mut stream = team.start("go");
    wait_for_result(&mut stream, "lead").await;
    wait_for_status(&team, "lead", MemberStatus::Idle).await;

    let first = team.task_list().create("first", "");
    let second = team.task_list().create("second", "");

    let assignments = team.assign_pending_tasks();
    assert_eq!(assignments.len(), 2);

    for id in [&first.id, &second.id] {
        let task = team.task_list().get(id).unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert!(!task.owner.is_empty());
    }

    // A second pass finds nothing left to bind.
    assert!(team.assign_pending_tasks().is_empty());

    team.shutdown();
}

#[tokio::test]
async fn test_remove_member_notifies_topology_and_closes_inbox() {
    let (lead_client, _) = RecordingClient::new("lead done");
    let (alice_client, _) = RecordingClient::new("alice done");
    let options = TeamOptions::new(
        Arc::new(LeaderTeammate::new("lead")),
        Agent::new("lead", lead_client),
    )
    .with_member("alice", Agent::new("alice", alice_client));
    let team = Team::new("crew", options);

    let mut stream = team.start("go");
    wait_for_result(&mut stream, "lead").await;

    let alice = team
        .members()
        .into_iter()
        .find(|m| m.name() == "alice")
        .unwrap();
    team.remove_member("alice").unwrap();
    assert!(team.members().iter().all(|m| m.name() != "alice"));
    assert_eq!(
        team.bus().member_names(),
        vec!["lead"],
        "alice should be unsubscribed"
    );

    // The closed inbox unwinds alice's run loop.
    tokio::time::timeout(WAIT, async {
        while alice.status() != MemberStatus::Shutdown {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("removed member never shut down");

    let err = team.remove_member("alice").unwrap_err();
    assert_eq!(err, TeamError::NotRunning);

    team.shutdown();
}
