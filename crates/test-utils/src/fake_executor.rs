use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::{Notify, Semaphore};
use flowdag::dag::{DataMap, TaskId};
use flowdag::exec::{ExecutorError, Outcome, TaskExecutor, TaskRequest};

/// A fake executor that simulates work from the task configuration:
///
/// - `sleep_ms`: sleep this long before answering
/// - `add_number`: output `dummy` = input `dummy` + `add_number`
/// - `fail`: report a failure (no output)
/// - `crash`: return a task error, as if the executor raised
/// - `unreachable`: return a transport error
///
/// The output is always `{"dummy": <value>}`. Every request is recorded.
#[derive(Clone, Default)]
pub struct DummyExecutor {
    calls: Arc<Mutex<Vec<TaskRequest>>>,
}

impl DummyExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<TaskRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, id: TaskId) -> usize {
        self.calls.lock().unwrap().iter().filter(|r| r.id == id).count()
    }

    /// Ids in the order their requests arrived.
    pub fn call_order(&self) -> Vec<TaskId> {
        self.calls.lock().unwrap().iter().map(|r| r.id).collect()
    }

    pub async fn run(&self, request: TaskRequest) -> Result<Outcome, ExecutorError> {
        self.calls.lock().unwrap().push(request.clone());
        let conf = &request.configuration;

        if let Some(ms) = conf.get("sleep_ms").and_then(Value::as_u64) {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        if flag(conf, "unreachable") {
            return Err(ExecutorError::Transport("connection refused".to_string()));
        }
        if flag(conf, "crash") {
            return Err(ExecutorError::Task("crashed task".to_string()));
        }
        if flag(conf, "fail") {
            return Ok(Outcome::Failure("task configured to fail".to_string()));
        }

        let dummy = match (request.input.get("dummy"), conf.get("add_number")) {
            (Some(Value::Number(n)), Some(add)) if n.is_i64() => {
                json!(n.as_i64().unwrap_or_default() + add.as_i64().unwrap_or_default())
            }
            (Some(v), _) => v.clone(),
            (None, _) => Value::Null,
        };
        let mut output = DataMap::new();
        output.insert("dummy".to_string(), dummy);
        Ok(Outcome::Success(output))
    }
}

fn flag(conf: &DataMap, key: &str) -> bool {
    conf.get(key).and_then(Value::as_bool).unwrap_or(false)
}

impl TaskExecutor for DummyExecutor {
    fn execute(
        &self,
        request: TaskRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Outcome, ExecutorError>> + Send + '_>> {
        Box::pin(self.run(request))
    }
}

/// A [`DummyExecutor`] whose requests block until the test releases them.
///
/// Used to hold tasks in `Running` while the test issues control commands.
#[derive(Clone)]
pub struct GatedExecutor {
    inner: DummyExecutor,
    gate: Arc<Semaphore>,
    started: Arc<Notify>,
    in_progress: Arc<AtomicUsize>,
}

impl Default for GatedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl GatedExecutor {
    pub fn new() -> Self {
        Self {
            inner: DummyExecutor::new(),
            gate: Arc::new(Semaphore::new(0)),
            started: Arc::new(Notify::new()),
            in_progress: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn dummy(&self) -> &DummyExecutor {
        &self.inner
    }

    /// Let `n` blocked (or future) requests proceed.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Wait until at least one request has reached the gate.
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    pub fn in_progress(&self) -> usize {
        self.in_progress.load(Ordering::SeqCst)
    }
}

impl TaskExecutor for GatedExecutor {
    fn execute(
        &self,
        request: TaskRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Outcome, ExecutorError>> + Send + '_>> {
        Box::pin(async move {
            self.in_progress.fetch_add(1, Ordering::SeqCst);
            self.started.notify_one();
            self.gate
                .acquire()
                .await
                .expect("gate semaphore closed")
                .forget();
            self.in_progress.fetch_sub(1, Ordering::SeqCst);
            self.inner.run(request).await
        })
    }
}
