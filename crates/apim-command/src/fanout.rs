//! In-process delivery of processed commands to tag listeners.
//!
//! Listeners are registered once at startup and invoked one after another,
//! in registration order, on the task running the dispatch tick. A listener
//! that returns an error or panics is logged and skipped; delivery to the
//! remaining listeners continues.

use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;

use crate::error::ListenerError;
use crate::model::{Command, CommandTag};

#[async_trait]
pub trait CommandListener: Send + Sync {
    fn name(&self) -> &str;

    /// Tag this listener reacts to.
    fn tag(&self) -> CommandTag;

    fn interested_in(&self, command: &Command) -> bool {
        command.has_tag(self.tag())
    }

    async fn on_command(&self, command: &Command) -> Result<(), ListenerError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Default)]
pub struct CommandFanout {
    listeners: Vec<Box<dyn CommandListener>>,
}

impl CommandFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, listener: Box<dyn CommandListener>) {
        tracing::debug!(
            listener = listener.name(),
            tag = %listener.tag(),
            "registered command listener"
        );
        self.listeners.push(listener);
    }

    pub fn with_listener(mut self, listener: Box<dyn CommandListener>) -> Self {
        self.register(listener);
        self
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub async fn publish(&self, command: &Command) -> FanoutReport {
        let mut report = FanoutReport::default();
        for listener in self.listeners.iter().filter(|l| l.interested_in(command)) {
            let outcome = AssertUnwindSafe(listener.on_command(command))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(err)) => {
                    report.failed += 1;
                    tracing::error!(
                        listener = listener.name(),
                        command_id = %command.id,
                        error = %err,
                        "command listener failed"
                    );
                }
                Err(_) => {
                    report.failed += 1;
                    tracing::error!(
                        listener = listener.name(),
                        command_id = %command.id,
                        "command listener panicked"
                    );
                }
            }
        }
        report
    }
}

impl std::fmt::Debug for CommandFanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.listeners.iter().map(|l| l.name()).collect();
        f.debug_struct("CommandFanout")
            .field("listeners", &names)
            .finish()
    }
}
