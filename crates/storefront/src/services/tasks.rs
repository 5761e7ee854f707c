//! Background task queue.
//!
//! Request handlers dispatch [`Task`]s without waiting for them. A single
//! worker drains the queue until shutdown. Each task is attempted once;
//! failures are logged and go nowhere else.

use std::path::PathBuf;

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::catalog::{HomepageCache, regenerate_homepage};
use super::email::{EmailError, EmailService};
use crate::db::RepositoryError;

/// Work done outside the request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    SendActivationEmail {
        to: String,
        username: String,
        token: String,
    },
    /// Re-render the static homepage served to anonymous visitors.
    RegenerateHomepage,
}

impl Task {
    const fn name(&self) -> &'static str {
        match self {
            Self::SendActivationEmail { .. } => "send_activation_email",
            Self::RegenerateHomepage => "regenerate_homepage",
        }
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Email(#[from] EmailError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("template error: {0}")]
    Template(#[from] askama::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sending half of the queue. Cheap to clone.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<Task>,
}

impl TaskQueue {
    /// A queue and the receiver to hand to [`TaskWorker::run`].
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Task>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Fire and forget.
    pub fn dispatch(&self, task: Task) {
        let name = task.name();
        if self.tx.send(task).is_err() {
            tracing::error!(task = name, "Task worker is gone, dropping task");
        } else {
            tracing::debug!(task = name, "Task dispatched");
        }
    }
}

/// Executes one task.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: Task) -> Result<(), TaskError>;
}

/// Production handler: email and homepage regeneration.
pub struct StorefrontTasks {
    pub email: EmailService,
    pub pool: PgPool,
    pub homepage: HomepageCache,
    pub static_dir: PathBuf,
}

#[async_trait]
impl TaskHandler for StorefrontTasks {
    async fn handle(&self, task: Task) -> Result<(), TaskError> {
        match task {
            Task::SendActivationEmail {
                to,
                username,
                token,
            } => self.email.send_activation(&to, &username, &token).await?,
            Task::RegenerateHomepage => {
                regenerate_homepage(&self.pool, &self.homepage, &self.static_dir).await?;
            }
        }
        Ok(())
    }
}

/// Drains the queue one task at a time.
pub struct TaskWorker<H> {
    handler: H,
}

impl<H: TaskHandler> TaskWorker<H> {
    pub const fn new(handler: H) -> Self {
        Self { handler }
    }

    /// Run until `shutdown` is cancelled or every sender is dropped.
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<Task>, shutdown: CancellationToken) {
        tracing::info!("Task worker started");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                task = rx.recv() => {
                    let Some(task) = task else { break };
                    let name = task.name();
                    match self.handler.handle(task).await {
                        Ok(()) => tracing::debug!(task = name, "Task done"),
                        Err(e) => tracing::error!(task = name, error = %e, "Task failed"),
                    }
                }
            }
        }

        tracing::info!("Task worker stopped");
    }
}
