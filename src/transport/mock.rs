//! Scripted transport for driver unit tests.

use super::Transport;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Inner {
    responses: VecDeque<String>,
    sent: Vec<String>,
    open: bool,
    fail_open: bool,
}

/// Transport that replays a queue of canned responses and records every
/// command it was given.
///
/// Cloning shares the underlying script/log, so a test can hand one clone
/// to a driver and keep another to assert on the exact wire traffic.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<Inner>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Lock is never held across an await and the mock has no panicking
        // critical sections.
        #[allow(clippy::unwrap_used)]
        self.inner.lock().unwrap()
    }

    /// Queue a response line for the next `query`.
    pub fn push_response(&self, line: impl Into<String>) -> &Self {
        self.lock().responses.push_back(line.into());
        self
    }

    /// Make `open()` fail, simulating an unreachable target.
    pub fn refuse_connections(&self) -> &Self {
        self.lock().fail_open = true;
        self
    }

    /// Every command sent or queried so far, in order.
    pub fn sent(&self) -> Vec<String> {
        self.lock().sent.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn open(&mut self) -> Result<()> {
        let mut inner = self.lock();
        if inner.fail_open {
            return Err(anyhow!("mock transport refused connection"));
        }
        inner.open = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.lock().open = false;
        Ok(())
    }

    async fn send(&mut self, command: &str) -> Result<()> {
        let mut inner = self.lock();
        if !inner.open {
            return Err(anyhow!("mock transport not open"));
        }
        inner.sent.push(command.to_string());
        Ok(())
    }

    async fn query(&mut self, command: &str) -> Result<String> {
        let mut inner = self.lock();
        if !inner.open {
            return Err(anyhow!("mock transport not open"));
        }
        inner.sent.push(command.to_string());
        inner
            .responses
            .pop_front()
            .ok_or_else(|| anyhow!("mock transport script exhausted for command '{command}'"))
    }
}
