//! Local process executor
//!
//! Runs the executor definition's command line as a child process. Test
//! params are passed as environment variables; stdout and stderr become log
//! lines. Exit code 0 is success.
//!
//! Each run keeps a bounded replay buffer for late log readers and is
//! forgotten a retention window after it finishes.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Executor, ExecutorError, LogKind, LogLine, LogStream};
use crate::models::{ExecuteOptions, Execution, ExecutionResult};
use crate::storage::ExecutionStore;

const LIVE_BUFFER: usize = 256;
const REPLAY_LIMIT: usize = 10_000;
const RETENTION: Duration = Duration::from_secs(600);

type RunRegistry = Arc<Mutex<HashMap<String, Arc<RunHandle>>>>;

/// Tail of the log of one run plus the live feed while it is running
struct RunLog {
    lines: VecDeque<LogLine>,
    dropped: usize,
    live: Option<broadcast::Sender<LogLine>>,
}

struct RunHandle {
    cancel: CancellationToken,
    replay_limit: usize,
    log: Mutex<RunLog>,
}

impl RunHandle {
    fn new(replay_limit: usize) -> Self {
        let (live, _) = broadcast::channel(LIVE_BUFFER);
        Self {
            cancel: CancellationToken::new(),
            replay_limit,
            log: Mutex::new(RunLog {
                lines: VecDeque::new(),
                dropped: 0,
                live: Some(live),
            }),
        }
    }

    fn push(&self, line: LogLine) {
        let Ok(mut log) = self.log.lock() else {
            return;
        };
        if let Some(live) = &log.live {
            // no subscribers is fine
            let _ = live.send(line.clone());
        }
        if log.lines.len() >= self.replay_limit {
            log.lines.pop_front();
            log.dropped += 1;
        }
        log.lines.push_back(line);
    }

    /// Drop the live feed so every subscriber sees the end of the stream
    fn finish(&self) {
        if let Ok(mut log) = self.log.lock() {
            log.live = None;
        }
    }

    fn is_running(&self) -> bool {
        self.log
            .lock()
            .map(|log| log.live.is_some())
            .unwrap_or(false)
    }

    /// Lines so far plus a subscription to the rest, taken atomically
    fn snapshot(&self) -> (Vec<LogLine>, Option<broadcast::Receiver<LogLine>>) {
        match self.log.lock() {
            Ok(log) => {
                let mut replay = Vec::with_capacity(log.lines.len() + 1);
                if log.dropped > 0 {
                    replay.push(LogLine::error(format!("skipped {} log lines", log.dropped)));
                }
                replay.extend(log.lines.iter().cloned());
                (replay, log.live.as_ref().map(|live| live.subscribe()))
            }
            Err(_) => (Vec::new(), None),
        }
    }
}

/// Executor spawning local processes
pub struct ProcessExecutor {
    store: Arc<dyn ExecutionStore>,
    runs: RunRegistry,
    replay_limit: usize,
    retention: Duration,
}

impl ProcessExecutor {
    pub fn new(store: Arc<dyn ExecutionStore>) -> Self {
        Self {
            store,
            runs: Arc::new(Mutex::new(HashMap::new())),
            replay_limit: REPLAY_LIMIT,
            retention: RETENTION,
        }
    }

    /// Log lines kept per run for readers that attach late
    pub fn with_replay_limit(mut self, lines: usize) -> Self {
        self.replay_limit = lines.max(1);
        self
    }

    /// How long a finished run stays available for logs
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Forget a finished run once the retention window passes
    fn retire(&self, id: String, handle: Arc<RunHandle>) {
        retire(self.runs.clone(), id, handle, self.retention);
    }

    fn handle(&self, id: &str) -> Result<Arc<RunHandle>, ExecutorError> {
        self.runs
            .lock()
            .map_err(|_| ExecutorError::Backend("run registry poisoned".to_string()))?
            .get(id)
            .cloned()
            .ok_or_else(|| ExecutorError::NotFound(id.to_string()))
    }

    /// Spawn the child and register its run handle
    fn spawn(
        &self,
        execution: &Execution,
        options: &ExecuteOptions,
    ) -> Result<(Arc<RunHandle>, Child), ExecutorError> {
        let mut command = build_command(execution, options)?;
        let child = command.spawn().map_err(ExecutorError::Spawn)?;

        let handle = Arc::new(RunHandle::new(self.replay_limit));
        self.runs
            .lock()
            .map_err(|_| ExecutorError::Backend("run registry poisoned".to_string()))?
            .insert(execution.id.clone(), handle.clone());

        info!(
            execution = %execution.id,
            test = %execution.test_name,
            pid = child.id().unwrap_or_default(),
            "Started test process"
        );
        Ok((handle, child))
    }
}

fn build_command(execution: &Execution, options: &ExecuteOptions) -> Result<Command, ExecutorError> {
    let (program, leading) = options.executor.command.split_first().ok_or_else(|| {
        ExecutorError::InvalidDefinition(format!(
            "executor {} has no command",
            options.executor.name
        ))
    })?;

    let mut command = Command::new(program);
    command
        .args(leading)
        .args(&options.executor.args)
        .args(&options.args)
        .envs(&options.params)
        .env("EXECUTION_ID", &execution.id)
        .env("EXECUTION_NAME", &execution.name)
        .env("TEST_NAME", &options.test_name)
        .env("TEST_NAMESPACE", &options.namespace)
        .env("TEST_TYPE", &options.test_type)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(content) = &options.content {
        command.env("TEST_CONTENT", &content.data);
    }
    Ok(command)
}

fn retire(runs: RunRegistry, id: String, handle: Arc<RunHandle>, after: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        if let Ok(mut runs) = runs.lock() {
            if runs.get(&id).is_some_and(|current| Arc::ptr_eq(current, &handle)) {
                runs.remove(&id);
                debug!(execution = %id, "Forgot finished test process");
            }
        }
    });
}

/// One output line without its line ending; invalid UTF-8 is replaced
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Forward every output line until EOF. The pipe is drained to the end so
/// the child never dies on a closed pipe.
async fn pump<R>(handle: Arc<RunHandle>, reader: R, kind: LogKind) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut collected = Vec::new();
    let mut reader = BufReader::new(reader);
    let mut raw = Vec::new();
    loop {
        raw.clear();
        match reader.read_until(b'\n', &mut raw).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("Can't read test process output: {e}");
                break;
            }
        }
        let line = decode_line(&raw);
        let log_line = match kind {
            LogKind::Error => LogLine::error(line.clone()),
            _ => LogLine::line(line.clone()),
        };
        handle.push(log_line);
        collected.push(line);
    }
    collected
}

fn exit_result(status: ExitStatus, output: String) -> ExecutionResult {
    if status.success() {
        ExecutionResult::success(output)
    } else {
        ExecutionResult::error(format!("test process exited with {status}")).with_output(output)
    }
}

/// Wait for the child, honouring abort, and close the run log
async fn supervise(handle: Arc<RunHandle>, mut child: Child) -> ExecutionResult {
    let started = Instant::now();
    let stdout = child
        .stdout
        .take()
        .map(|out| tokio::spawn(pump(handle.clone(), out, LogKind::Line)));
    let stderr = child
        .stderr
        .take()
        .map(|err| tokio::spawn(pump(handle.clone(), err, LogKind::Error)));

    let waited = tokio::select! {
        status = child.wait() => Some(status),
        _ = handle.cancel.cancelled() => {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill test process: {e}");
            }
            handle.push(LogLine::event("execution aborted"));
            None
        }
    };

    // Orphaned grandchildren may keep the pipes open after an abort
    let mut output = Vec::new();
    if waited.is_some() {
        if let Some(task) = stdout {
            output = task.await.unwrap_or_default();
        }
        if let Some(task) = stderr {
            let _ = task.await;
        }
    } else {
        stdout.iter().chain(stderr.iter()).for_each(|task| task.abort());
    }
    let output = output.join("\n");

    let result = match waited {
        Some(Ok(status)) => exit_result(status, output),
        Some(Err(e)) => ExecutionResult::error(format!("can't wait for test process: {e}")),
        None => ExecutionResult::error("execution aborted").with_output(output),
    };

    debug!(
        status = %result.status,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Test process finished"
    );
    handle.push(LogLine::result(result.clone()));
    handle.finish();
    result
}

#[async_trait]
impl Executor for ProcessExecutor {
    fn name(&self) -> &str {
        "process"
    }

    async fn execute(
        &self,
        execution: &Execution,
        options: &ExecuteOptions,
    ) -> Result<ExecutionResult, ExecutorError> {
        let (handle, child) = self.spawn(execution, options)?;
        let store = self.store.clone();
        let runs = self.runs.clone();
        let retention = self.retention;
        let id = execution.id.clone();

        tokio::spawn(async move {
            let result = supervise(handle.clone(), child).await;
            if let Err(e) = store.update_result(&id, &result).await {
                warn!(execution = %id, "Failed to store test process result: {e}");
            }
            retire(runs, id, handle, retention);
        });

        Ok(ExecutionResult::running())
    }

    async fn execute_sync(
        &self,
        execution: &Execution,
        options: &ExecuteOptions,
    ) -> Result<ExecutionResult, ExecutorError> {
        let (handle, child) = self.spawn(execution, options)?;
        let result = supervise(handle.clone(), child).await;
        self.retire(execution.id.clone(), handle);
        Ok(result)
    }

    async fn abort(&self, id: &str) -> Result<(), ExecutorError> {
        let handle = self.handle(id)?;
        if !handle.is_running() {
            return Err(ExecutorError::NotRunning(id.to_string()));
        }
        info!(execution = %id, "Aborting test process");
        handle.cancel.cancel();
        Ok(())
    }

    async fn logs(&self, id: &str) -> Result<LogStream, ExecutorError> {
        let handle = self.handle(id)?;
        let (replay, live) = handle.snapshot();
        let (tx, rx) = mpsc::channel(LIVE_BUFFER);

        tokio::spawn(async move {
            for line in replay {
                if tx.send(line).await.is_err() {
                    return;
                }
            }
            let Some(mut live) = live else {
                return;
            };
            loop {
                match live.recv().await {
                    Ok(line) => {
                        if tx.send(line).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        let notice = LogLine::error(format!("skipped {skipped} log lines"));
                        if tx.send(notice).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExecutionStatus, ExecutorDefinition};
    use crate::storage::MemoryExecutionStore;
    use chrono::Utc;
    use std::time::Duration;

    fn options(script: &str) -> ExecuteOptions {
        let mut options = ExecuteOptions {
            test_name: "shell-check".to_string(),
            namespace: "testkube".to_string(),
            test_type: "shell/script".to_string(),
            executor_name: "shell".to_string(),
            executor: ExecutorDefinition {
                name: "shell".to_string(),
                types: vec!["shell/script".to_string()],
                command: vec!["sh".to_string(), "-c".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };
        options.args = vec![script.to_string()];
        options
    }

    fn setup() -> (Arc<MemoryExecutionStore>, ProcessExecutor) {
        let store = Arc::new(MemoryExecutionStore::new());
        let executor = ProcessExecutor::new(store.clone());
        (store, executor)
    }

    async fn collect(mut stream: LogStream) -> Vec<LogLine> {
        let mut lines = Vec::new();
        while let Some(line) = stream.recv().await {
            lines.push(line);
        }
        lines
    }

    async fn wait_terminal(store: &MemoryExecutionStore, id: &str) -> Execution {
        for _ in 0..200 {
            let execution = store.get(id).await.unwrap();
            if execution.is_completed() {
                return execution;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("execution {id} never finished");
    }

    #[tokio::test]
    async fn test_sync_success_with_params() {
        let (_store, executor) = setup();
        let mut options = options("echo start; echo \"greeting=$GREETING\"");
        options
            .params
            .insert("GREETING".to_string(), "hello".to_string());
        let execution = Execution::from_options("run-1", &options);

        let result = executor.execute_sync(&execution, &options).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.output, "start\ngreeting=hello");
    }

    #[tokio::test]
    async fn test_sync_nonzero_exit_is_error() {
        let (_store, executor) = setup();
        let options = options("echo boom >&2; exit 3");
        let execution = Execution::from_options("run-2", &options);

        let result = executor.execute_sync(&execution, &options).await.unwrap();
        assert!(result.is_failed());
        assert!(result.error_message.contains("exited"));

        let lines = collect(executor.logs(&execution.id).await.unwrap()).await;
        assert!(lines
            .iter()
            .any(|l| l.kind == LogKind::Error && l.content == "boom"));
        assert_eq!(lines.last().unwrap().kind, LogKind::Result);
    }

    #[tokio::test]
    async fn test_async_writes_result_to_store() {
        let (store, executor) = setup();
        let options = options("echo done");
        let execution = Execution::from_options("run-3", &options);
        store.insert(&execution).await.unwrap();
        store.start_execution(&execution.id, Utc::now()).await.unwrap();

        let result = executor.execute(&execution, &options).await.unwrap();
        assert!(result.is_running() || result.is_completed());

        let stored = wait_terminal(&store, &execution.id).await;
        assert_eq!(stored.status(), ExecutionStatus::Success);
        assert_eq!(stored.execution_result.output, "done");
    }

    #[tokio::test]
    async fn test_abort_running_process() {
        let (store, executor) = setup();
        let options = options("echo waiting; sleep 30");
        let execution = Execution::from_options("run-4", &options);
        store.insert(&execution).await.unwrap();
        store.start_execution(&execution.id, Utc::now()).await.unwrap();

        executor.execute(&execution, &options).await.unwrap();
        executor.abort(&execution.id).await.unwrap();

        let stored = wait_terminal(&store, &execution.id).await;
        assert_eq!(stored.status(), ExecutionStatus::Error);
        assert_eq!(stored.execution_result.error_message, "execution aborted");

        match executor.abort(&execution.id).await {
            Err(ExecutorError::NotRunning(id)) => assert_eq!(id, execution.id),
            other => panic!("expected NotRunning, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_live_logs_follow_running_process() {
        let (store, executor) = setup();
        let options = options("for i in 1 2 3; do echo line-$i; sleep 0.05; done");
        let execution = Execution::from_options("run-5", &options);
        store.insert(&execution).await.unwrap();
        store.start_execution(&execution.id, Utc::now()).await.unwrap();

        executor.execute(&execution, &options).await.unwrap();
        let lines = collect(executor.logs(&execution.id).await.unwrap()).await;
        let contents: Vec<&str> = lines
            .iter()
            .filter(|l| l.kind == LogKind::Line)
            .map(|l| l.content.as_str())
            .collect();
        assert_eq!(contents, vec!["line-1", "line-2", "line-3"]);
        assert_eq!(lines.last().unwrap().kind, LogKind::Result);
    }

    #[tokio::test]
    async fn test_unknown_execution() {
        let (_store, executor) = setup();
        assert!(matches!(
            executor.abort("missing").await,
            Err(ExecutorError::NotFound(_))
        ));
        assert!(matches!(
            executor.logs("missing").await,
            Err(ExecutorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_utf8_output_is_drained() {
        let (_store, executor) = setup();
        let options = options("printf 'before\\n\\377\\n'; for i in 1 2 3; do echo after-$i; done; exit 0");
        let execution = Execution::from_options("run-8", &options);

        let result = executor.execute_sync(&execution, &options).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.output, "before\n\u{FFFD}\nafter-1\nafter-2\nafter-3");
    }

    #[test]
    fn test_decode_line_strips_line_ending() {
        assert_eq!(decode_line(b"plain\n"), "plain");
        assert_eq!(decode_line(b"windows\r\n"), "windows");
        assert_eq!(decode_line(b"no newline"), "no newline");
        assert_eq!(decode_line(b"bad \xff byte\n"), "bad \u{FFFD} byte");
    }

    #[tokio::test]
    async fn test_replay_keeps_tail_of_long_output() {
        let store = Arc::new(MemoryExecutionStore::new());
        let executor = ProcessExecutor::new(store).with_replay_limit(3);
        let options = options("for i in 1 2 3 4 5 6; do echo line-$i; done");
        let execution = Execution::from_options("run-9", &options);

        let result = executor.execute_sync(&execution, &options).await.unwrap();
        assert_eq!(result.output.lines().count(), 6);

        let lines = collect(executor.logs(&execution.id).await.unwrap()).await;
        let contents: Vec<&str> = lines.iter().map(|l| l.content.as_str()).collect();
        assert_eq!(contents[0], "skipped 4 log lines");
        assert_eq!(contents[1..3], ["line-5", "line-6"]);
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[3].kind, LogKind::Result);
    }

    #[tokio::test]
    async fn test_finished_runs_are_forgotten() {
        let store = Arc::new(MemoryExecutionStore::new());
        let executor = ProcessExecutor::new(store.clone()).with_retention(Duration::ZERO);

        let options = options("echo done");
        let sync_run = Execution::from_options("run-10", &options);
        executor.execute_sync(&sync_run, &options).await.unwrap();

        let async_run = Execution::from_options("run-11", &options);
        store.insert(&async_run).await.unwrap();
        store.start_execution(&async_run.id, Utc::now()).await.unwrap();
        executor.execute(&async_run, &options).await.unwrap();
        wait_terminal(&store, &async_run.id).await;

        for id in [&sync_run.id, &async_run.id] {
            let mut forgotten = false;
            for _ in 0..200 {
                if matches!(executor.logs(id).await, Err(ExecutorError::NotFound(_))) {
                    forgotten = true;
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            assert!(forgotten, "run {id} still tracked");
        }
        assert!(executor.runs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let (_store, executor) = setup();
        let mut options = options("true");
        options.executor.command.clear();
        let execution = Execution::from_options("run-6", &options);

        assert!(matches!(
            executor.execute_sync(&execution, &options).await,
            Err(ExecutorError::InvalidDefinition(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let (_store, executor) = setup();
        let mut options = options("");
        options.executor.command = vec!["/nonexistent/test-runner".to_string()];
        let execution = Execution::from_options("run-7", &options);

        assert!(matches!(
            executor.execute(&execution, &options).await,
            Err(ExecutorError::Spawn(_))
        ));
    }
}
