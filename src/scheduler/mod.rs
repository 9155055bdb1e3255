//! Task scheduler. A single driver loop wakes on a fixed
//! tick and launches any due task; `register_task` lets callers outside
//! discovery schedule arbitrary recurring or one-shot work too.

pub mod pool;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::cancel::CancelToken;
use crate::error::{EngineError, Result};
use crate::model::{RunStatus, TaskType};
use crate::options::EngineOptions;
use crate::scanner::network::scan_network;
use crate::storage::Storage;

/// Driver tick interval.
const TICK: StdDuration = StdDuration::from_secs(10);

pub type TaskHandler =
    Arc<dyn Fn(CancelToken) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

#[derive(Clone)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub task_type: TaskType,
    pub interval: ChronoDuration,
    pub next_run: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub status: RunStatus,
    handler: TaskHandler,
}

impl Task {
    /// Recurring tasks first run one full `interval` after registration
    /// (spec S7: "a task with interval 60s registered at t0 runs first at
    /// t0+60"); one-shot tasks run on the next driver tick.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        task_type: TaskType,
        interval: ChronoDuration,
        handler: TaskHandler,
    ) -> Self {
        let now = Utc::now();
        let next_run = match task_type {
            TaskType::Recurring => now + interval,
            TaskType::Oneshot => now,
        };
        Self {
            id: id.into(),
            name: name.into(),
            task_type,
            interval,
            next_run,
            last_run: None,
            status: RunStatus::Pending,
            handler,
        }
    }
}

/// `start()`, `stop()`, `register_task(task)`. Owns no scan logic itself —
/// the discovery tasks it registers on `start` just call `scan_network`.
pub struct Scheduler {
    storage: Arc<dyn Storage>,
    options: EngineOptions,
    tasks: Arc<RwLock<HashMap<String, Task>>>,
    cancel: CancelToken,
    driver: Mutex<Option<JoinHandle<()>>>,
    in_flight: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Scheduler {
    pub fn new(storage: Arc<dyn Storage>, options: EngineOptions) -> Self {
        Self {
            storage,
            options,
            tasks: Arc::new(RwLock::new(HashMap::new())),
            cancel: CancelToken::new(),
            driver: Mutex::new(None),
            in_flight: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn register_task(&self, task: Task) -> Result<()> {
        self.tasks.write().await.insert(task.id.clone(), task);
        Ok(())
    }

    /// Loads every enabled discovery rule and registers one recurring task
    /// per rule (`discovery-<rule_id>`), then starts the driver loop.
    pub async fn start(&self) -> Result<()> {
        let rules = self.storage.list_discovery_rules("").await?;
        for rule in rules.into_iter().filter(|r| r.enabled) {
            let storage = self.storage.clone();
            let options = self.options.clone();
            let rule_for_handler = rule.clone();
            let handler: TaskHandler = Arc::new(move |cancel: CancelToken| {
                let storage = storage.clone();
                let options = options.clone();
                let rule = rule_for_handler.clone();
                Box::pin(async move {
                    scan_network(&rule.network_id, &rule, storage, &options, None, &cancel)
                        .await
                        .map(|_| ())
                })
            });

            let interval = ChronoDuration::hours(rule.scan_interval_hours as i64);
            let task = Task::new(
                format!("discovery-{}", rule.id),
                format!("discovery scan for network {}", rule.network_id),
                TaskType::Recurring,
                interval,
                handler,
            );
            self.register_task(task).await?;
        }

        let tasks = self.tasks.clone();
        let cancel = self.cancel.clone();
        let in_flight = self.in_flight.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(TICK).await;
                if cancel.is_cancelled() {
                    break;
                }
                Self::tick(&tasks, &cancel, &in_flight).await;
            }
        });
        *self.driver.lock().await = Some(handle);
        Ok(())
    }

    async fn tick(
        tasks: &Arc<RwLock<HashMap<String, Task>>>,
        cancel: &CancelToken,
        in_flight: &Arc<Mutex<Vec<JoinHandle<()>>>>,
    ) {
        let now = Utc::now();
        let due: Vec<String> = {
            let table = tasks.read().await;
            table
                .values()
                .filter(|t| t.status != RunStatus::Running && t.next_run <= now)
                .map(|t| t.id.clone())
                .collect()
        };

        for id in due {
            let handler = {
                let mut table = tasks.write().await;
                let Some(task) = table.get_mut(&id) else {
                    continue;
                };
                task.status = RunStatus::Running;
                task.last_run = Some(now);
                task.handler.clone()
            };

            let tasks = tasks.clone();
            let cancel = cancel.clone();
            let id = id.clone();
            let join = tokio::spawn(async move {
                // Run the handler in its own task so a panic inside it is
                // caught by the JoinHandle rather than unwinding this
                // bookkeeping task before status/next_run are updated.
                let result = match tokio::spawn(handler(cancel)).await {
                    Ok(result) => result,
                    Err(join_err) => {
                        tracing::error!(task_id = %id, panicked = join_err.is_panic(), "task handler did not complete normally");
                        Err(EngineError::TaskFailed(format!(
                            "handler panicked: {join_err}"
                        )))
                    }
                };
                let mut table = tasks.write().await;
                if let Some(task) = table.get_mut(&id) {
                    task.status = if result.is_ok() {
                        RunStatus::Completed
                    } else {
                        RunStatus::Failed
                    };
                    if task.task_type == TaskType::Recurring {
                        task.next_run = Utc::now() + task.interval;
                    }
                }
            });
            in_flight.lock().await.push(join);
        }

        in_flight.lock().await.retain(|h| !h.is_finished());
    }

    /// Cancels the context and waits for the driver and every in-flight
    /// task handler. Idempotent.
    pub async fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.driver.lock().await.take() {
            let _ = handle.await;
        }
        let remaining: Vec<_> = self.in_flight.lock().await.drain(..).collect();
        for handle in remaining {
            let _ = handle.await;
        }
    }
}
