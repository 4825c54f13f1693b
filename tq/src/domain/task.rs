//! Task records and their lifecycle hooks

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use eyre::eyre;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::QueueError;

use super::priority::Priority;

type Action<T> = Box<dyn FnOnce(Option<Value>) -> BoxFuture<'static, eyre::Result<T>> + Send>;
type ResolveHook<T> = Box<dyn FnOnce(T) + Send>;
type RejectHook = Box<dyn FnOnce(eyre::Report) + Send>;
type DoneHook = Box<dyn FnOnce() + Send>;

/// One unit of work submitted to a scheduler
///
/// A task carries an async action plus optional hooks. Exactly one of
/// `on_resolve`/`on_reject` fires once the action settles, always followed
/// by `on_done`. The scheduler never mutates a task after it is added.
pub struct Task<T> {
    task_type: String,
    id: Option<String>,
    priority: Priority,
    metadata: Option<Value>,
    action: Action<T>,
    on_resolve: Option<ResolveHook<T>>,
    on_reject: Option<RejectHook>,
    on_done: Option<DoneHook>,
}

impl<T: Send + 'static> Task<T> {
    /// Create a task of the given category running `action`
    ///
    /// The action receives the task metadata (if any) and returns a future.
    pub fn new<S, F, Fut>(task_type: S, action: F) -> Self
    where
        S: Into<String>,
        F: FnOnce(Option<Value>) -> Fut + Send + 'static,
        Fut: Future<Output = eyre::Result<T>> + Send + 'static,
    {
        Self {
            task_type: task_type.into(),
            id: None,
            priority: Priority::default(),
            metadata: None,
            action: Box::new(move |metadata| action(metadata).boxed()),
            on_resolve: None,
            on_reject: None,
            on_done: None,
        }
    }

    /// Set an external identifier, unique among pending and running tasks
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the priority rank (lower runs earlier)
    pub fn with_priority(mut self, priority: impl Into<Priority>) -> Self {
        self.priority = priority.into();
        self
    }

    /// Attach an opaque payload handed to the action
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Hook fired with the action's value on success
    pub fn on_resolve<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.on_resolve = Some(Box::new(hook));
        self
    }

    /// Hook fired with the action's error on failure
    pub fn on_reject<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(eyre::Report) + Send + 'static,
    {
        self.on_reject = Some(Box::new(hook));
        self
    }

    /// Hook fired after the resolve/reject hook, once per task
    pub fn on_done<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_done = Some(Box::new(hook));
        self
    }

    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn metadata(&self) -> Option<&Value> {
        self.metadata.as_ref()
    }

    /// Check the task shape before it is admitted
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.task_type.trim().is_empty() {
            return Err(QueueError::EmptyTaskType);
        }
        if let Some(id) = &self.id
            && id.trim().is_empty()
        {
            return Err(QueueError::EmptyTaskId);
        }
        Ok(())
    }

    /// Erase the result type, binding the hooks into a single runnable job
    pub(crate) fn into_job(self) -> Job {
        let Task {
            task_type,
            id,
            priority,
            metadata,
            action,
            on_resolve,
            on_reject,
            on_done,
        } = self;

        let label = task_type.clone();
        let run: Box<dyn FnOnce() -> BoxFuture<'static, Settlement> + Send> = Box::new(move || {
            async move {
                let result = match AssertUnwindSafe(async move { action(metadata).await })
                    .catch_unwind()
                    .await
                {
                    Ok(result) => result,
                    Err(panic) => Err(eyre!("task action panicked: {}", panic_message(&*panic))),
                };

                let settlement = match result {
                    Ok(value) => {
                        if let Some(hook) = on_resolve {
                            guard_hook(&label, "on_resolve", || hook(value));
                        }
                        Settlement::Resolved
                    }
                    Err(err) => {
                        match on_reject {
                            Some(hook) => guard_hook(&label, "on_reject", || hook(err)),
                            None => debug!(task_type = %label, error = %err, "Task::run: rejection absorbed, no on_reject"),
                        }
                        Settlement::Rejected
                    }
                };

                if let Some(hook) = on_done {
                    guard_hook(&label, "on_done", hook);
                }
                settlement
            }
            .boxed()
        });

        Job {
            task_type,
            id,
            priority,
            run,
        }
    }
}

impl<T> std::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("task_type", &self.task_type)
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("metadata", &self.metadata)
            .field("on_resolve", &self.on_resolve.is_some())
            .field("on_reject", &self.on_reject.is_some())
            .field("on_done", &self.on_done.is_some())
            .finish()
    }
}

/// How a task's action settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Settlement {
    Resolved,
    Rejected,
}

/// A type-erased task: identity plus a one-shot runner that fires the hooks
pub(crate) struct Job {
    pub task_type: String,
    pub id: Option<String>,
    pub priority: Priority,
    run: Box<dyn FnOnce() -> BoxFuture<'static, Settlement> + Send>,
}

impl Job {
    /// Start the action; the returned future settles after `on_done`
    pub fn run(self) -> BoxFuture<'static, Settlement> {
        (self.run)()
    }
}

/// Run a lifecycle hook, containing any panic so later hooks still fire
fn guard_hook(task_type: &str, hook: &'static str, f: impl FnOnce()) {
    if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(f)) {
        warn!(task_type, hook, panic = %panic_message(&*panic), "Task hook panicked");
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
