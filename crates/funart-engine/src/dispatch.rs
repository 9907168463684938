use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use funart_contracts::{GenerationTask, TaskStatus};
use tracing::{debug, info, warn};

use crate::config::ApiConfig;
use crate::error::{ApiStage, GenerationError, Result};
use crate::transport::{ApiCall, ApiResponse, Transport};
use crate::validate::{ensure_success, task_failed};

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// A clock that only moves when slept on. Sleeps are recorded.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }
}

impl ManualClock {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sleep(&self, duration: Duration) {
        *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner) += duration;
        self.sleeps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(duration);
    }
}

/// Shared flag checked before every poll.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Submitted,
    Polling { attempt: u32 },
    Succeeded,
    Failed,
}

impl PollState {
    /// Transition on an observed vendor status. Terminal states absorb.
    pub fn advance(self, status: TaskStatus) -> PollState {
        match self {
            PollState::Succeeded | PollState::Failed => self,
            PollState::Submitted | PollState::Polling { .. } => {
                if status.is_success() {
                    return PollState::Succeeded;
                }
                if status.is_terminal() {
                    return PollState::Failed;
                }
                let attempt = match self {
                    PollState::Polling { attempt } => attempt + 1,
                    _ => 0,
                };
                PollState::Polling { attempt }
            }
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PollState::Succeeded | PollState::Failed)
    }
}

/// One synchronous synthesis call.
pub fn dispatch_sync(
    transport: &dyn Transport,
    api_key: &str,
    call: &ApiCall,
) -> Result<ApiResponse> {
    let started = Instant::now();
    let response = transport.call(api_key, call)?;
    info!(
        transport = transport.name(),
        endpoint = %call.endpoint,
        status = response.status,
        request_id = response.request_id.as_deref().unwrap_or("-"),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "synthesis call returned"
    );
    Ok(response)
}

/// Drives a submitted task to a terminal status.
pub struct TaskPoller<'a> {
    transport: &'a dyn Transport,
    clock: &'a dyn Clock,
    config: &'a ApiConfig,
    api_key: &'a str,
    cancel: CancelToken,
}

/// The final reply of a task together with how it got there.
#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub task: GenerationTask,
    pub response: ApiResponse,
    pub polls: u32,
}

impl<'a> TaskPoller<'a> {
    pub fn new(transport: &'a dyn Transport, clock: &'a dyn Clock, config: &'a ApiConfig) -> Self {
        Self {
            transport,
            clock,
            config,
            api_key: config.api_key(),
            cancel: CancelToken::new(),
        }
    }

    /// Use this credential instead of the one in the config.
    pub fn with_api_key(mut self, api_key: &'a str) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Submit, then wait. A task that fails at submit is never polled.
    pub fn run(&self, call: &ApiCall) -> Result<PollOutcome> {
        let (task, response) = self.submit(call)?;
        if task.status.is_success() {
            return Ok(PollOutcome {
                task,
                response,
                polls: 0,
            });
        }
        self.wait(task)
    }

    pub fn submit(&self, call: &ApiCall) -> Result<(GenerationTask, ApiResponse)> {
        let response = self.transport.call(self.api_key, call)?;
        ensure_success(ApiStage::Submit, &response)?;
        let task_id = response
            .task_id()
            .ok_or_else(|| GenerationError::empty_result("task submit returned no task_id"))?
            .to_string();
        let status = response.task_status().unwrap_or(TaskStatus::Pending);
        info!(
            transport = self.transport.name(),
            task_id = %task_id,
            request_id = response.request_id.as_deref().unwrap_or("-"),
            %status,
            "task submitted"
        );
        if status.is_terminal() && !status.is_success() {
            return Err(task_failed(&task_id, status, &response));
        }
        Ok((GenerationTask::new(task_id, status), response))
    }

    pub fn wait(&self, mut task: GenerationTask) -> Result<PollOutcome> {
        let started = self.clock.now();
        let mut state = PollState::Submitted;
        let mut polls = 0_u32;
        loop {
            if self.cancel.is_cancelled() {
                return Err(GenerationError::Cancelled {
                    task_id: task.task_id,
                });
            }
            let waited = self.clock.now().saturating_duration_since(started);
            if waited >= self.config.poll_timeout {
                return Err(GenerationError::TimedOut {
                    task_id: task.task_id,
                    status: task.status,
                    waited_s: waited.as_secs_f64(),
                });
            }
            self.clock.sleep(self.config.poll_delay(polls));
            if self.cancel.is_cancelled() {
                return Err(GenerationError::Cancelled {
                    task_id: task.task_id,
                });
            }

            let response = self.transport.query_task(self.api_key, &task.task_id)?;
            ensure_success(ApiStage::Poll, &response)?;
            polls += 1;
            task.status = response.task_status().unwrap_or(TaskStatus::Unknown);
            if task.status == TaskStatus::Unrecognized {
                warn!(task_id = %task.task_id, polls, "unrecognized task status, still polling");
            }
            state = state.advance(task.status);
            debug!(task_id = %task.task_id, status = %task.status, polls, ?state, "task polled");

            match state {
                PollState::Succeeded => {
                    info!(
                        task_id = %task.task_id,
                        polls,
                        waited_s = self.clock.now().saturating_duration_since(started).as_secs_f64(),
                        "task succeeded"
                    );
                    return Ok(PollOutcome {
                        task,
                        response,
                        polls,
                    });
                }
                PollState::Failed => {
                    return Err(task_failed(&task.task_id, task.status, &response));
                }
                PollState::Submitted | PollState::Polling { .. } => {}
            }
        }
    }
}
