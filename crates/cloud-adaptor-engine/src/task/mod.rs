// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task engine.
//!
//! A task is one long-running provisioning job. It runs in its own tokio task
//! and reports progress as a stream of [`Message`]s over a bounded channel:
//!
//! ```text
//!   Task::spawn ──► body (create / init / update)
//!                     │ StepEmitter
//!                     ▼
//!              mpsc::channel(10) ──► handler forwarder ──► EventSink
//! ```
//!
//! The stream always ends with exactly one `Close` message, whether the body
//! returned, failed, panicked or was cancelled. A body error is reported as a
//! `failure` event on the step that was open when it happened.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use cloud_adaptor_core::model::{StepStatus, TaskKind};
use cloud_adaptor_core::persistence::Persistence;
use cloud_adaptor_core::steps;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::adaptor::{AdaptorResolver, ExpansionNodeRequest, KubernetesClusterConfig};
use crate::error::{Error, Result};
use crate::operator::KubeConnector;

mod create;
mod init;
mod update;

pub use create::CreateTask;
pub use init::{INIT_DEADLINE, INIT_TICK, InitProgress, InitTask};
pub use update::UpdateTask;

/// Capacity of a task's message channel.
pub const CHANNEL_CAPACITY: usize = 10;

/// How long a cancelled body may keep running to clean up before it is dropped.
pub const CANCEL_GRACE: Duration = Duration::from_secs(10);

/// One progress report of a running task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub step_type: String,
    pub status: StepStatus,
    pub message: String,
}

impl Message {
    /// End-of-stream sentinel.
    pub fn close() -> Self {
        Self {
            step_type: steps::CLOSE.to_string(),
            status: StepStatus::Success,
            message: String::new(),
        }
    }

    pub fn is_close(&self) -> bool {
        self.step_type == steps::CLOSE
    }
}

/// Step reporter handed to task bodies and adaptors.
///
/// Remembers the last step that was started and not yet finished so a body
/// error can be reported against it.
#[derive(Clone)]
pub struct StepEmitter {
    tx: mpsc::Sender<Message>,
    open_step: Arc<Mutex<Option<String>>>,
}

impl StepEmitter {
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        Self {
            tx,
            open_step: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn emit(&self, step: &str, message: impl Into<String>, status: StepStatus) {
        {
            let mut open = self.open_step.lock().unwrap_or_else(PoisonError::into_inner);
            match status {
                StepStatus::Start => *open = Some(step.to_string()),
                _ if open.as_deref() == Some(step) => *open = None,
                _ => {}
            }
        }
        let message = Message {
            step_type: step.to_string(),
            status,
            message: message.into(),
        };
        if self.tx.send(message).await.is_err() {
            debug!(step, "Task message dropped, receiver is gone");
        }
    }

    pub async fn start(&self, step: &str, message: impl Into<String>) {
        self.emit(step, message, StepStatus::Start).await;
    }

    pub async fn success(&self, step: &str, message: impl Into<String>) {
        self.emit(step, message, StepStatus::Success).await;
    }

    pub async fn failure(&self, step: &str, message: impl Into<String>) {
        self.emit(step, message, StepStatus::Failure).await;
    }

    /// Step currently open, if any.
    pub fn open_step(&self) -> Option<String> {
        self.open_step
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Report a failure on the open step, or on `fallback` when none is open.
    pub async fn fail_open_step(&self, fallback: &str, message: impl Into<String>) {
        let step = self.open_step().unwrap_or_else(|| fallback.to_string());
        self.failure(&step, message).await;
    }

    async fn close(&self) {
        if self.tx.send(Message::close()).await.is_err() {
            debug!("Close dropped, receiver is gone");
        }
    }
}

/// Payload of a create task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateClusterPayload {
    pub provider_name: String,
    pub config: KubernetesClusterConfig,
}

/// Payload of an init task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitClusterPayload {
    pub provider_name: String,
    pub cluster_id: String,
}

/// Payload of an update task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateClusterPayload {
    pub provider_name: String,
    pub request: ExpansionNodeRequest,
}

/// A bus payload that can be turned into a runnable task.
#[async_trait]
pub trait TaskPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: TaskKind;
    /// Broker topic carrying this payload.
    const TOPIC: &'static str;

    async fn build_task(self, factory: &TaskFactory, enterprise_id: &str) -> Result<Task>;
}

#[async_trait]
impl TaskPayload for CreateClusterPayload {
    const KIND: TaskKind = TaskKind::CreateKubernetes;
    const TOPIC: &'static str = "cloud-create";

    async fn build_task(self, factory: &TaskFactory, enterprise_id: &str) -> Result<Task> {
        let adaptor = factory.resolver.resolve(enterprise_id, &self.provider_name).await?;
        Ok(Task::Create(CreateTask::new(adaptor, enterprise_id, self.config)))
    }
}

#[async_trait]
impl TaskPayload for InitClusterPayload {
    const KIND: TaskKind = TaskKind::InitRainbond;
    const TOPIC: &'static str = "cloud-init";

    async fn build_task(self, factory: &TaskFactory, enterprise_id: &str) -> Result<Task> {
        let adaptor = factory.resolver.resolve(enterprise_id, &self.provider_name).await?;
        Ok(Task::Init(
            InitTask::new(
                adaptor,
                factory.connector.clone(),
                factory.persistence.clone(),
                enterprise_id,
                &self.cluster_id,
            )
            .with_timing(factory.init_tick, factory.init_deadline),
        ))
    }
}

#[async_trait]
impl TaskPayload for UpdateClusterPayload {
    const KIND: TaskKind = TaskKind::UpdateKubernetes;
    const TOPIC: &'static str = "cloud-update";

    async fn build_task(self, factory: &TaskFactory, enterprise_id: &str) -> Result<Task> {
        let adaptor = factory.resolver.resolve(enterprise_id, &self.provider_name).await?;
        Ok(Task::Update(UpdateTask::new(adaptor, enterprise_id, self.request)))
    }
}

/// Maps payloads to tasks bound to their adaptor.
#[derive(Clone)]
pub struct TaskFactory {
    resolver: AdaptorResolver,
    connector: Arc<dyn KubeConnector>,
    persistence: Arc<dyn Persistence>,
    init_tick: Duration,
    init_deadline: Duration,
}

impl TaskFactory {
    pub fn new(
        resolver: AdaptorResolver,
        connector: Arc<dyn KubeConnector>,
        persistence: Arc<dyn Persistence>,
    ) -> Self {
        Self {
            resolver,
            connector,
            persistence,
            init_tick: INIT_TICK,
            init_deadline: INIT_DEADLINE,
        }
    }

    /// Tick and deadline of the platform readiness loop.
    pub fn with_init_timing(mut self, tick: Duration, deadline: Duration) -> Self {
        self.init_tick = tick;
        self.init_deadline = deadline;
        self
    }

    pub async fn build<P: TaskPayload>(&self, enterprise_id: &str, payload: P) -> Result<Task> {
        payload.build_task(self, enterprise_id).await
    }
}

/// The three task kinds.
pub enum Task {
    Create(CreateTask),
    Init(InitTask),
    Update(UpdateTask),
}

impl Task {
    pub fn kind(&self) -> TaskKind {
        match self {
            Task::Create(_) => TaskKind::CreateKubernetes,
            Task::Init(_) => TaskKind::InitRainbond,
            Task::Update(_) => TaskKind::UpdateKubernetes,
        }
    }

    async fn run(&self, cancel: &CancellationToken, emitter: &StepEmitter) -> Result<()> {
        match self {
            Task::Create(task) => task.run(cancel, emitter).await,
            Task::Init(task) => task.run(cancel, emitter).await,
            Task::Update(task) => task.run(cancel, emitter).await,
        }
    }

    /// Start the body on its own tokio task.
    ///
    /// Returns the message stream and the handle of the body. The stream ends
    /// with `Close` once the body is finished.
    pub fn spawn(self, cancel: CancellationToken) -> (mpsc::Receiver<Message>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let handle = tokio::spawn(async move {
            let emitter = StepEmitter::new(tx);
            let kind = self.kind();
            let body = AssertUnwindSafe(self.run(&cancel, &emitter)).catch_unwind();
            let grace = async {
                cancel.cancelled().await;
                tokio::time::sleep(CANCEL_GRACE).await;
            };

            let outcome = tokio::select! {
                outcome = body => outcome,
                _ = grace => {
                    warn!(kind = %kind, "Task did not stop within the cancel grace period");
                    Ok(Err(Error::Cancelled))
                }
            };
            match outcome {
                Ok(Ok(())) => debug!(kind = %kind, "Task finished"),
                Ok(Err(e)) => {
                    warn!(kind = %kind, error = %e, "Task failed");
                    emitter.fail_open_step(steps::INIT, e.to_string()).await;
                }
                Err(panic) => {
                    let reason = panic_message(panic.as_ref());
                    error!(kind = %kind, panic = %reason, "Task panicked");
                    emitter
                        .fail_open_step(steps::INIT, format!("task panicked: {}", reason))
                        .await;
                }
            }
            emitter.close().await;
        });
        (rx, handle)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
