//! End-to-end worker scenarios against real stores in a temp directory.
//!
//! The "leader" side of each scenario is played directly through the core
//! stores; the worker runs its real poll loop and a built-in agent backend.

use pi_teams_core::schema::{MemberStatus, TaskStatus};
use pi_teams_core::{
    CompletedStatus, Mailbox, MailboxMessage, NewTask, TEAM_NAMESPACE, TaskStore, TeamPaths,
    TeamStore, WireMessage,
};
use pi_teams_worker::{EchoAgent, WorkerEnv, WorkerRuntime};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio::time::Instant;

const LEAD: &str = "team-lead";
const AGENT: &str = "agent1";

struct Harness {
    _temp: TempDir,
    runtime: Arc<WorkerRuntime>,
    tasks: TaskStore,
    mailbox: Mailbox,
    team: TeamStore,
    _pump: JoinHandle<()>,
    _poll: JoinHandle<()>,
}

async fn start_worker(auto_claim: bool, turn_delay: Duration) -> Harness {
    start_worker_with(auto_claim, turn_delay, None).await
}

async fn start_worker_with(
    auto_claim: bool,
    turn_delay: Duration,
    prompts_seen: Option<Arc<Mutex<Vec<String>>>>,
) -> Harness {
    let temp = TempDir::new().unwrap();
    let paths = TeamPaths::new(temp.path(), "T1");
    let tasks = TaskStore::new(&paths, "T1");
    let mailbox = Mailbox::new(paths.clone());
    let team = TeamStore::new(&paths);

    let env = WorkerEnv {
        root: temp.path().to_path_buf(),
        team_id: "T1".into(),
        agent_name: AGENT.into(),
        task_list_id: "T1".into(),
        lead_name: LEAD.into(),
        auto_claim,
        plan_required: false,
        style: "normal".into(),
    };

    let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
    let mut agent = EchoAgent::new(events_tx).with_turn_delay(turn_delay);
    if let Some(seen) = prompts_seen {
        agent = agent.with_reply(move |prompt| {
            seen.lock().unwrap().push(prompt.to_string());
            format!("Done: {}", prompt.lines().next().unwrap_or(""))
        });
    }
    let runtime = WorkerRuntime::new(env, Arc::new(agent));

    runtime.session_start().await.unwrap();
    let pump = tokio::spawn({
        let rt = Arc::clone(&runtime);
        async move {
            while let Some(ev) = events_rx.recv().await {
                let _ = rt.handle_agent_event(ev).await;
            }
        }
    });
    let poll = tokio::spawn(Arc::clone(&runtime).run_poll_loop());

    Harness {
        _temp: temp,
        runtime,
        tasks,
        mailbox,
        team,
        _pump: pump,
        _poll: poll,
    }
}

async fn wait_for<F>(what: &str, timeout: Duration, cond: F)
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}

fn lead_inbox(h: &Harness) -> Vec<WireMessage> {
    h.mailbox
        .pop_unread(TEAM_NAMESPACE, LEAD)
        .unwrap()
        .iter()
        .filter_map(|m| WireMessage::parse(&m.text))
        .collect()
}

fn send_to_worker(h: &Harness, msg: &WireMessage) {
    h.mailbox
        .write(TEAM_NAMESPACE, AGENT, MailboxMessage::new(LEAD, msg.encode()))
        .unwrap();
}

#[tokio::test]
async fn single_worker_claims_and_completes() {
    let h = start_worker(true, Duration::from_millis(30)).await;

    h.tasks
        .create_task(NewTask {
            subject: "Write tests".into(),
            description: "Write unit tests".into(),
            owner: None,
        })
        .unwrap();

    wait_for("task 1 completion", Duration::from_secs(10), || {
        h.tasks
            .get_task("1")
            .unwrap()
            .is_some_and(|t| t.status == TaskStatus::Completed)
    })
    .await;

    let task = h.tasks.get_task("1").unwrap().unwrap();
    assert_eq!(task.owner.as_deref(), Some(AGENT));
    assert_eq!(task.status, TaskStatus::Completed);
    let result = task.metadata.get("result").unwrap().as_str().unwrap();
    assert!(!result.is_empty());

    // Give the idle notification time to land, then drain the lead inbox.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let messages = lead_inbox(&h);
    let idle = messages.iter().find_map(|m| match m {
        WireMessage::IdleNotification {
            completed_task_id: Some(id),
            completed_status,
            ..
        } if id == "1" => Some(*completed_status),
        _ => None,
    });
    assert_eq!(idle, Some(Some(CompletedStatus::Completed)));
}

#[tokio::test]
async fn dependency_gates_assigned_tasks() {
    let h = start_worker(false, Duration::from_millis(400)).await;

    h.tasks
        .create_task(NewTask {
            subject: "first".into(),
            description: "first task".into(),
            owner: Some(AGENT.into()),
        })
        .unwrap();
    h.tasks
        .create_task(NewTask {
            subject: "second".into(),
            description: "second task".into(),
            owner: Some(AGENT.into()),
        })
        .unwrap();
    h.tasks.add_task_dependency("2", "1").unwrap();

    for id in ["1", "2"] {
        send_to_worker(
            &h,
            &WireMessage::TaskAssignment {
                task_id: id.into(),
                subject: None,
                description: None,
                assigned_by: Some(LEAD.into()),
            },
        );
    }

    wait_for("task 1 in progress", Duration::from_secs(10), || {
        h.tasks
            .get_task("1")
            .unwrap()
            .is_some_and(|t| t.status == TaskStatus::InProgress)
    })
    .await;

    // While 1 is running, 2 must still be gated.
    let t2 = h.tasks.get_task("2").unwrap().unwrap();
    assert!(h.tasks.is_task_blocked(&t2).unwrap());
    assert_eq!(t2.status, TaskStatus::Pending);

    wait_for("both tasks completed", Duration::from_secs(15), || {
        ["1", "2"].iter().all(|id| {
            h.tasks
                .get_task(id)
                .unwrap()
                .is_some_and(|t| t.status == TaskStatus::Completed)
        })
    })
    .await;

    let t1 = h.tasks.get_task("1").unwrap().unwrap();
    let t2 = h.tasks.get_task("2").unwrap().unwrap();
    assert_eq!(t1.blocks, vec!["2"]);
    assert_eq!(t2.blocked_by, vec!["1"]);
}

#[tokio::test]
async fn graceful_shutdown_handshake() {
    let h = start_worker(false, Duration::from_millis(30)).await;

    send_to_worker(
        &h,
        &WireMessage::ShutdownRequest {
            request_id: "r1".into(),
            from: Some(LEAD.into()),
            reason: None,
            timestamp: None,
        },
    );
    // Duplicate delivery of the same request id: no extra transitions.
    send_to_worker(
        &h,
        &WireMessage::ShutdownRequest {
            request_id: "r1".into(),
            from: Some(LEAD.into()),
            reason: None,
            timestamp: None,
        },
    );

    let shutdown = h.runtime.shutdown_token();
    tokio::time::timeout(Duration::from_secs(10), shutdown.cancelled())
        .await
        .expect("worker should shut down");

    tokio::time::sleep(Duration::from_millis(200)).await;
    let approvals: Vec<_> = lead_inbox(&h)
        .into_iter()
        .filter(|m| {
            matches!(
                m,
                WireMessage::ShutdownApproved { request_id, .. } if request_id == "r1"
            )
        })
        .collect();
    assert_eq!(approvals.len(), 1, "exactly one ack for a duplicated request");

    let config = h.team.load().unwrap().unwrap();
    assert_eq!(
        config.member(AGENT).unwrap().status,
        MemberStatus::Offline
    );
}

#[tokio::test]
async fn shutdown_releases_owned_tasks() {
    let h = start_worker(false, Duration::from_millis(30)).await;

    // A pending task assigned to the worker but never started.
    h.tasks
        .create_task(NewTask {
            subject: "parked".into(),
            description: "parked work".into(),
            owner: Some(AGENT.into()),
        })
        .unwrap();

    send_to_worker(
        &h,
        &WireMessage::ShutdownRequest {
            request_id: "r9".into(),
            from: Some(LEAD.into()),
            reason: Some("scaling down".into()),
            timestamp: None,
        },
    );

    let shutdown = h.runtime.shutdown_token();
    tokio::time::timeout(Duration::from_secs(10), shutdown.cancelled())
        .await
        .expect("worker should shut down");
    tokio::time::sleep(Duration::from_millis(200)).await;

    let task = h.tasks.get_task("1").unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.owner.is_none());
    assert_eq!(
        task.metadata.get("unassignReason").unwrap(),
        "scaling down"
    );
}

#[tokio::test]
async fn abort_mid_task_records_failure() {
    let h = start_worker(true, Duration::from_millis(800)).await;

    h.tasks
        .create_task(NewTask {
            subject: "slow work".into(),
            description: "takes a while".into(),
            owner: None,
        })
        .unwrap();

    wait_for("task 1 claimed", Duration::from_secs(10), || {
        h.tasks
            .get_task("1")
            .unwrap()
            .is_some_and(|t| t.status == TaskStatus::InProgress)
    })
    .await;

    send_to_worker(
        &h,
        &WireMessage::AbortRequest {
            request_id: "a1".into(),
            from: Some(LEAD.into()),
            task_id: Some("1".into()),
            reason: Some("changed priorities".into()),
            timestamp: None,
        },
    );

    wait_for("task 1 back to pending", Duration::from_secs(10), || {
        h.tasks
            .get_task("1")
            .unwrap()
            .is_some_and(|t| t.status == TaskStatus::Pending && t.metadata.contains_key("abortedAt"))
    })
    .await;

    let task = h.tasks.get_task("1").unwrap().unwrap();
    assert_eq!(task.owner.as_deref(), Some(AGENT), "owner is retained");
    assert_eq!(task.metadata.get("abortedBy").unwrap(), AGENT);
    assert_eq!(task.metadata.get("abortRequestId").unwrap(), "a1");
    assert_eq!(
        task.metadata.get("abortReason").unwrap(),
        "changed priorities"
    );

    tokio::time::sleep(Duration::from_millis(500)).await;
    let failed = lead_inbox(&h).into_iter().any(|m| {
        matches!(
            m,
            WireMessage::IdleNotification {
                completed_task_id: Some(id),
                completed_status: Some(CompletedStatus::Failed),
                ..
            } if id == "1"
        )
    });
    assert!(failed, "lead should see a failed idle notification");
}

#[tokio::test]
async fn duplicate_abort_request_does_not_hit_next_task() {
    let h = start_worker(false, Duration::from_millis(800)).await;

    for subject in ["one", "two"] {
        h.tasks
            .create_task(NewTask {
                subject: subject.into(),
                description: subject.into(),
                owner: Some(AGENT.into()),
            })
            .unwrap();
    }
    for id in ["1", "2"] {
        send_to_worker(
            &h,
            &WireMessage::TaskAssignment {
                task_id: id.into(),
                subject: None,
                description: None,
                assigned_by: None,
            },
        );
    }

    wait_for("task 1 in progress", Duration::from_secs(10), || {
        h.tasks
            .get_task("1")
            .unwrap()
            .is_some_and(|t| t.status == TaskStatus::InProgress)
    })
    .await;

    // Untargeted abort delivered twice: only the first may take effect.
    for _ in 0..2 {
        send_to_worker(
            &h,
            &WireMessage::AbortRequest {
                request_id: "a7".into(),
                from: Some(LEAD.into()),
                task_id: None,
                reason: None,
                timestamp: None,
            },
        );
    }

    wait_for("task 2 completed", Duration::from_secs(15), || {
        h.tasks
            .get_task("2")
            .unwrap()
            .is_some_and(|t| t.status == TaskStatus::Completed)
    })
    .await;

    let t1 = h.tasks.get_task("1").unwrap().unwrap();
    assert_eq!(t1.status, TaskStatus::Pending);
    assert!(t1.metadata.contains_key("abortedAt"));
}

#[tokio::test]
async fn plain_dms_are_batched_into_one_prompt() {
    let prompts = Arc::new(Mutex::new(Vec::new()));
    let h = start_worker_with(false, Duration::from_millis(30), Some(Arc::clone(&prompts))).await;

    h.mailbox
        .write(TEAM_NAMESPACE, AGENT, MailboxMessage::new(LEAD, "first note"))
        .unwrap();
    h.mailbox
        .write(TEAM_NAMESPACE, AGENT, MailboxMessage::new(LEAD, "second note"))
        .unwrap();

    wait_for("dm prompt delivered", Duration::from_secs(10), || {
        !prompts.lock().unwrap().is_empty()
    })
    .await;

    let seen = prompts.lock().unwrap().clone();
    assert_eq!(seen.len(), 1, "both DMs arrive as a single user message");
    assert!(seen[0].contains("first note"));
    assert!(seen[0].contains("second note"));
    assert!(seen[0].contains("\n\n---\n\n"));
}

#[tokio::test]
async fn assignment_for_unknown_task_is_dropped() {
    let h = start_worker(true, Duration::from_millis(30)).await;

    send_to_worker(
        &h,
        &WireMessage::TaskAssignment {
            task_id: "99".into(),
            subject: None,
            description: None,
            assigned_by: None,
        },
    );
    h.tasks
        .create_task(NewTask {
            subject: "real work".into(),
            description: "exists".into(),
            owner: None,
        })
        .unwrap();

    wait_for("real task completed", Duration::from_secs(10), || {
        h.tasks
            .get_task("1")
            .unwrap()
            .is_some_and(|t| t.status == TaskStatus::Completed)
    })
    .await;
    assert!(h.tasks.get_task("99").unwrap().is_none());
}

#[tokio::test]
async fn worker_registers_online_on_start() {
    let h = start_worker(false, Duration::from_millis(30)).await;
    let config = h.team.load().unwrap().unwrap();
    let member = config.member(AGENT).unwrap();
    assert_eq!(member.status, MemberStatus::Online);
    assert_eq!(config.lead_name, LEAD);
}
