//! Engine integration tests - real processes through the full stack
//!
//! `cargo test -p deskrun-task --test engine_test`

#![cfg(unix)]

use deskrun_foundation::{
    Error, ExecutionPolicy, InMemoryThreadDirectory, RecordStore, Shell, Storage,
};
use deskrun_task::{
    LogStream, SubmitRequest, Task, TaskEvent, TaskId, TaskManager, TaskManagerConfig, TaskStatus,
    SYNTHETIC_EXIT_CODE,
};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const WAIT: Option<Duration> = Some(Duration::from_secs(20));

struct Fixture {
    manager: TaskManager,
    dir: TempDir,
}

impl Fixture {
    fn new(limit: usize) -> Self {
        Self::with_policy(limit, ExecutionPolicy::Normal)
    }

    fn with_policy(limit: usize, policy: ExecutionPolicy) -> Self {
        Self::build(limit, policy, Duration::from_millis(500))
    }

    fn with_grace_period(grace_period: Duration) -> Self {
        Self::build(2, ExecutionPolicy::Normal, grace_period)
    }

    fn build(limit: usize, policy: ExecutionPolicy, grace_period: Duration) -> Self {
        let threads = InMemoryThreadDirectory::new().with_thread("t1", policy);
        let config = TaskManagerConfig {
            max_concurrent: limit,
            default_shell: Shell::of(deskrun_foundation::ShellType::Sh),
            grace_period,
            ..Default::default()
        };
        Self {
            manager: TaskManager::new(config, Arc::new(threads)).unwrap(),
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn request(&self, command: &str) -> SubmitRequest {
        SubmitRequest::new("t1", command, self.dir.path())
    }

    async fn submit(&self, command: &str) -> Task {
        self.manager.submit_task(self.request(command)).await.unwrap()
    }

    async fn finish(&self, id: &TaskId) -> Task {
        self.manager.wait(id, WAIT).await.unwrap()
    }

    fn lines(&self, id: &TaskId, stream: LogStream) -> Vec<String> {
        self.manager
            .list_task_logs(id)
            .unwrap()
            .into_iter()
            .filter(|l| l.stream == stream)
            .map(|l| l.line)
            .collect()
    }

    fn status(&self, id: &TaskId) -> TaskStatus {
        self.manager.get_task(id).unwrap().status
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

fn is_alive(pid: i32) -> bool {
    // SAFETY: signal 0 only checks for existence
    unsafe { libc::kill(pid, 0) == 0 }
}

/// No process, or only a zombie waiting to be reaped
#[cfg(target_os = "linux")]
fn is_gone(pid: i32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Err(_) => true,
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.trim_start().chars().next())
            .map_or(true, |state| state == 'Z' || state == 'X'),
    }
}

fn persistent_manager(db: &Path, threads: Arc<InMemoryThreadDirectory>) -> TaskManager {
    TaskManager::builder(TaskManagerConfig::default(), threads)
        .with_store(Arc::new(Storage::open(db).unwrap()))
        .build()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fifo_with_limit_one() {
    let fx = Fixture::new(1);

    let first = fx.submit("sleep 1; echo A").await;
    let second = fx.submit("echo B").await;

    assert_eq!(fx.status(&first.id), TaskStatus::Running);
    assert_eq!(fx.status(&second.id), TaskStatus::Queued);

    let first = fx.finish(&first.id).await;
    let second = fx.finish(&second.id).await;

    assert_eq!(first.status, TaskStatus::Succeeded);
    assert_eq!(first.exit_code, Some(0));
    assert_eq!(fx.lines(&first.id, LogStream::Stdout), vec!["A"]);

    assert_eq!(second.status, TaskStatus::Succeeded);
    assert_eq!(fx.lines(&second.id, LogStream::Stdout), vec!["B"]);
    assert!(second.started_at.unwrap() >= first.finished_at.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_running_never_exceeds_limit() {
    let fx = Fixture::new(2);
    let mut events = fx.manager.subscribe();

    let mut ids = Vec::new();
    for _ in 0..6 {
        ids.push(fx.submit("sleep 0.2").await.id);
        assert!(fx.manager.running_count() <= 2);
    }

    let mut running = 0i32;
    let mut max_running = 0;
    let mut finished = 0;
    while finished < ids.len() {
        let event = tokio::time::timeout(Duration::from_secs(20), events.recv())
            .await
            .unwrap()
            .unwrap();
        if let TaskEvent::Status { status, .. } = event {
            match status {
                TaskStatus::Running => running += 1,
                s if s.is_terminal() => {
                    running -= 1;
                    finished += 1;
                }
                _ => {}
            }
            max_running = max_running.max(running);
        }
    }

    assert_eq!(max_running, 2);
    for id in &ids {
        assert_eq!(fx.status(id), TaskStatus::Succeeded);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exit_code_recorded() {
    let fx = Fixture::new(2);
    let task = fx.submit("exit 3").await;
    let task = fx.finish(&task.id).await;

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.exit_code, Some(3));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_spawn_failure() {
    let fx = Fixture::new(2);
    let request = fx
        .request("echo never")
        .with_shell(Shell::custom("/nonexistent/bin/deskrun-shell", vec!["-c".to_string()]));
    let task = fx.manager.submit_task(request).await.unwrap();
    let task = fx.finish(&task.id).await;

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.exit_code, Some(SYNTHETIC_EXIT_CODE));
    assert!(fx.lines(&task.id, LogStream::Stdout).is_empty());

    let stderr = fx.lines(&task.id, LogStream::Stderr);
    assert_eq!(stderr.len(), 1);
    assert!(stderr[0].contains("failed to start"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unknown_command_fails_through_shell() {
    let fx = Fixture::new(2);
    let task = fx.submit("deskrun_no_such_command_xyz").await;
    let task = fx.finish(&task.id).await;

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.exit_code, Some(127));
    assert!(!fx.lines(&task.id, LogStream::Stderr).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_running_kills_process() {
    let fx = Fixture::new(2);
    let task = fx.submit("echo $$; sleep 30").await;

    eventually(|| !fx.lines(&task.id, LogStream::Stdout).is_empty()).await;
    let pid: i32 = fx.lines(&task.id, LogStream::Stdout)[0].parse().unwrap();
    assert!(is_alive(pid));

    fx.manager.cancel_task(&task.id).unwrap();
    let task = fx.finish(&task.id).await;

    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(task.exit_code.is_none());
    assert!(!is_alive(pid));
}

#[cfg(target_os = "linux")]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_kills_tree_ignoring_term_after_grace_period() {
    let grace = Duration::from_millis(300);
    let fx = Fixture::with_grace_period(grace);
    let task = fx.submit("trap '' TERM; echo $$; sleep 30 & echo $!; wait").await;

    eventually(|| fx.lines(&task.id, LogStream::Stdout).len() >= 2).await;
    let pids: Vec<i32> = fx
        .lines(&task.id, LogStream::Stdout)
        .iter()
        .map(|l| l.parse().unwrap())
        .collect();
    assert!(pids.iter().all(|&pid| !is_gone(pid)));

    let started = Instant::now();
    fx.manager.cancel_task(&task.id).unwrap();
    let task = fx.finish(&task.id).await;

    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(task.exit_code.is_none());
    assert!(started.elapsed() >= grace);
    // The orphaned sleep is reaped by init, so give it a moment
    eventually(|| pids.iter().all(|&pid| is_gone(pid))).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_queued_never_executes() {
    let fx = Fixture::new(1);
    let blocker = fx.submit("sleep 30").await;
    let queued = fx.submit("echo should-not-run").await;

    fx.manager.cancel_task(&queued.id).unwrap();
    let cancelled = fx.manager.get_task(&queued.id).unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert!(cancelled.exit_code.is_none());
    assert!(cancelled.started_at.is_none());

    fx.manager.cancel_task(&blocker.id).unwrap();
    fx.finish(&blocker.id).await;
    assert!(fx.manager.list_task_logs(&queued.id).unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_terminal_is_idempotent() {
    let fx = Fixture::new(2);
    let task = fx.submit("echo done").await;
    let task = fx.finish(&task.id).await;

    for _ in 0..3 {
        assert!(matches!(
            fx.manager.cancel_task(&task.id),
            Err(Error::TaskNotCancellable { .. })
        ));
    }
    assert_eq!(fx.manager.get_task(&task.id), Some(task));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_logs_stable_and_stream_ordered() {
    let fx = Fixture::new(2);
    let task = fx
        .submit("for i in 1 2 3 4 5; do echo out$i; echo err$i >&2; done")
        .await;
    fx.finish(&task.id).await;

    assert_eq!(
        fx.lines(&task.id, LogStream::Stdout),
        vec!["out1", "out2", "out3", "out4", "out5"]
    );
    assert_eq!(
        fx.lines(&task.id, LogStream::Stderr),
        vec!["err1", "err2", "err3", "err4", "err5"]
    );

    let first = fx.manager.list_task_logs(&task.id).unwrap();
    let second = fx.manager.list_task_logs(&task.id).unwrap();
    assert_eq!(first, second);
    assert!(first.windows(2).all(|w| w[0].created_at <= w[1].created_at));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_output_streams_before_exit() {
    let fx = Fixture::new(2);
    let task = fx.submit("echo early; sleep 30").await;

    eventually(|| fx.lines(&task.id, LogStream::Stdout) == vec!["early"]).await;
    assert_eq!(fx.status(&task.id), TaskStatus::Running);

    fx.manager.cancel_task(&task.id).unwrap();
    fx.finish(&task.id).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_destructive_needs_confirmation() {
    let fx = Fixture::with_policy(2, ExecutionPolicy::DangerConfirm);
    std::fs::create_dir(fx.dir.path().join("scratch")).unwrap();

    let err = fx
        .manager
        .submit_task(fx.request("rm -rf scratch"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PermissionRequired { .. }));
    assert!(fx.manager.list_tasks("t1").is_empty());
    assert!(fx.dir.path().join("scratch").exists());

    let task = fx
        .manager
        .submit_task(fx.request("rm -rf scratch").confirmed(true))
        .await
        .unwrap();
    let task = fx.finish(&task.id).await;

    assert_eq!(task.status, TaskStatus::Succeeded);
    assert_eq!(fx.manager.list_tasks("t1").len(), 1);
    assert!(!fx.dir.path().join("scratch").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_safe_thread_rejects_destructive() {
    let fx = Fixture::with_policy(2, ExecutionPolicy::Safe);
    let err = fx
        .manager
        .submit_task(fx.request("git reset --hard HEAD~1").confirmed(true))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PermissionDenied { .. }));
    assert!(fx.manager.list_tasks("t1").is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_timeout_fails_without_exit_code() {
    let fx = Fixture::new(2);
    let request = fx
        .request("sleep 30")
        .with_timeout(Duration::from_millis(300));
    let task = fx.manager.submit_task(request).await.unwrap();
    let task = fx.finish(&task.id).await;

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.exit_code.is_none());
    let stderr = fx.lines(&task.id, LogStream::Stderr);
    assert!(stderr.last().unwrap().starts_with("timed out after"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_event_order_for_one_task() {
    let fx = Fixture::new(2);
    let mut events = fx.manager.subscribe();
    let task = fx.submit("echo hello").await;
    fx.finish(&task.id).await;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.task_id() != task.id {
            continue;
        }
        seen.push(match event {
            TaskEvent::Status { status, .. } => status.to_string(),
            TaskEvent::Log { line, .. } => format!("log:{}", line),
        });
    }

    assert_eq!(seen, vec!["queued", "running", "log:hello", "succeeded"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_persisted_history_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("tasks.db");
    let threads = Arc::new(InMemoryThreadDirectory::new().with_thread("t1", ExecutionPolicy::Normal));

    let id = {
        let manager = persistent_manager(&db, threads.clone());
        let task = manager
            .submit_task(SubmitRequest::new("t1", "echo persisted; exit 2", dir.path()))
            .await
            .unwrap();
        manager.wait(&task.id, WAIT).await.unwrap();
        manager.flush().await;
        task.id
    };

    let manager = persistent_manager(&db, threads);
    assert_eq!(manager.restore().unwrap(), 1);

    let task = manager.get_task(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.exit_code, Some(2));
    let lines: Vec<_> = manager
        .list_task_logs(&id)
        .unwrap()
        .into_iter()
        .map(|l| l.line)
        .collect();
    assert_eq!(lines, vec!["persisted"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_consecutive_runs_keep_all_log_lines() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("tasks.db");
    let threads = Arc::new(InMemoryThreadDirectory::new().with_thread("t1", ExecutionPolicy::Normal));

    // Each run starts its own line counter and never reloads the other's rows
    let mut ids = Vec::new();
    for command in ["echo first", "echo second; echo third"] {
        let manager = persistent_manager(&db, threads.clone());
        let task = manager
            .submit_task(SubmitRequest::new("t1", command, dir.path()))
            .await
            .unwrap();
        manager.wait(&task.id, WAIT).await.unwrap();
        manager.flush().await;
        ids.push(task.id);
    }

    let storage = Storage::open(&db).unwrap();
    let lines = |id: &TaskId| -> Vec<String> {
        storage
            .load_logs(&id.to_string())
            .unwrap()
            .into_iter()
            .map(|r| r.line)
            .collect()
    };
    assert_eq!(lines(&ids[0]), vec!["first"]);
    assert_eq!(lines(&ids[1]), vec!["second", "third"]);
}
