//! Fixed-interval polling of asynchronous backend tasks.
//!
//! A poll loop moves through [`PollPhase`]s:
//! `Created -> Polling -> Succeeded | Failed | TimedOut`, or `Cancelled` when
//! its [`CancellationToken`] fires. Status checks within one loop are strictly
//! sequential; the next check is scheduled only after the previous response
//! has been applied.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::ApiError;

/// Task states reported by the backends' job queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    Pending,
    Received,
    Started,
    Progress,
    Retry,
    Success,
    Failure,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Received => "RECEIVED",
            TaskState::Started => "STARTED",
            TaskState::Progress => "PROGRESS",
            TaskState::Retry => "RETRY",
            TaskState::Success => "SUCCESS",
            TaskState::Failure => "FAILURE",
        }
    }
}

/// A status payload that can drive a poll loop.
pub trait TaskStatus {
    fn state(&self) -> TaskState;
    fn error_message(&self) -> Option<&str>;
}

pub const UNKNOWN_FAILURE: &str = "Unknown error";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    /// `None` polls until a terminal state or cancellation.
    pub max_attempts: Option<u32>,
}

impl PollConfig {
    pub const UPLOAD_INTERVAL: Duration = Duration::from_secs(5);
    pub const UPLOAD_MAX_ATTEMPTS: u32 = 60;
    pub const ANALYSIS_INTERVAL: Duration = Duration::from_secs(3);
    pub const ANALYSIS_MAX_ATTEMPTS: u32 = 200;

    pub fn new(interval: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    pub fn upload() -> Self {
        Self::new(Self::UPLOAD_INTERVAL, Some(Self::UPLOAD_MAX_ATTEMPTS))
    }

    pub fn analysis() -> Self {
        Self::new(Self::ANALYSIS_INTERVAL, Some(Self::ANALYSIS_MAX_ATTEMPTS))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollPhase {
    Created,
    Polling { attempts: u32 },
    Succeeded,
    Failed(String),
    TimedOut { attempts: u32 },
    Cancelled,
}

impl PollPhase {
    pub fn start(&mut self) {
        if *self == PollPhase::Created {
            *self = PollPhase::Polling { attempts: 0 };
        }
    }

    /// Stops a loop that has not finished yet. Terminal phases stay as they are.
    pub fn cancel(&mut self) {
        if matches!(self, PollPhase::Created | PollPhase::Polling { .. }) {
            *self = PollPhase::Cancelled;
        }
    }

    /// Applies one status response. Only a loop in `Polling` moves.
    pub fn advance(&mut self, state: TaskState, error: Option<&str>, max_attempts: Option<u32>) {
        let PollPhase::Polling { attempts } = *self else {
            return;
        };

        *self = match state {
            TaskState::Success => PollPhase::Succeeded,
            TaskState::Failure => {
                PollPhase::Failed(error.unwrap_or(UNKNOWN_FAILURE).to_string())
            }
            _ => {
                let attempts = attempts + 1;
                match max_attempts {
                    Some(max) if attempts >= max => PollPhase::TimedOut { attempts },
                    _ => PollPhase::Polling { attempts },
                }
            }
        };
    }
}

#[derive(Debug)]
pub enum PollOutcome<S> {
    Succeeded(S),
    Failed { message: String },
    TimedOut { attempts: u32 },
    Cancelled,
}

pub struct TaskPoller {
    config: PollConfig,
    cancel: CancellationToken,
}

impl TaskPoller {
    pub fn new(config: PollConfig) -> Self {
        Self::with_cancellation(config, CancellationToken::new())
    }

    pub fn with_cancellation(config: PollConfig, cancel: CancellationToken) -> Self {
        Self { config, cancel }
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs the loop on the current task. `check` performs one status
    /// request; `observe` sees every applied response.
    ///
    /// A failed status request ends the loop with that error.
    pub async fn run<S, F, Fut, O>(&self, mut check: F, mut observe: O) -> Result<PollOutcome<S>, ApiError>
    where
        S: TaskStatus,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<S, ApiError>>,
        O: FnMut(&S, &PollPhase),
    {
        let mut phase = PollPhase::Created;
        phase.start();

        loop {
            if self.cancel.is_cancelled() {
                return Ok(stop(&mut phase));
            }

            let status = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(stop(&mut phase)),
                status = check() => status?,
            };

            // Responses that arrive after cancellation are dropped.
            if self.cancel.is_cancelled() {
                return Ok(stop(&mut phase));
            }

            phase.advance(status.state(), status.error_message(), self.config.max_attempts);
            observe(&status, &phase);

            match phase {
                PollPhase::Polling { attempts } => {
                    tracing::debug!(
                        "Task still {} after {} check(s)",
                        status.state().as_str(),
                        attempts
                    );
                }
                PollPhase::Succeeded => {
                    tracing::info!("Task succeeded");
                    return Ok(PollOutcome::Succeeded(status));
                }
                PollPhase::Failed(message) => {
                    tracing::info!("Task failed: {}", message);
                    return Ok(PollOutcome::Failed { message });
                }
                PollPhase::TimedOut { attempts } => {
                    tracing::warn!("Gave up after {} status checks", attempts);
                    return Ok(PollOutcome::TimedOut { attempts });
                }
                PollPhase::Created | PollPhase::Cancelled => return Ok(stop(&mut phase)),
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(stop(&mut phase)),
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }
    }

    /// Runs the loop on its own task and hands back a cancel/join handle.
    pub fn spawn<S, F, Fut, O>(self, check: F, observe: O) -> PollHandle<S>
    where
        S: TaskStatus + Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<S, ApiError>> + Send + 'static,
        O: FnMut(&S, &PollPhase) + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let guard = cancel.clone().drop_guard();
        let task = tokio::spawn(async move { self.run(check, observe).await });
        PollHandle {
            cancel,
            guard,
            task,
        }
    }
}

fn stop<S>(phase: &mut PollPhase) -> PollOutcome<S> {
    if let PollPhase::Polling { attempts } = *phase {
        tracing::info!("Polling cancelled after {} check(s)", attempts);
    }
    phase.cancel();
    PollOutcome::Cancelled
}

/// Owns a spawned poll loop. Dropping the handle cancels the loop.
pub struct PollHandle<S> {
    cancel: CancellationToken,
    guard: DropGuard,
    task: JoinHandle<Result<PollOutcome<S>, ApiError>>,
}

impl<S> PollHandle<S> {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn outcome(self) -> Result<PollOutcome<S>, ApiError> {
        let PollHandle { guard, task, .. } = self;

        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Ok(PollOutcome::Cancelled),
        };
        guard.disarm();
        outcome
    }
}

/// Holds the poll loop for one logical slot (one document's analysis, one
/// upload). Occupying the slot cancels whatever was polled there before, and
/// dropping the slot cancels the loop it holds.
pub struct TaskSlot<S> {
    active: Option<(String, PollHandle<S>)>,
}

impl<S> Default for TaskSlot<S> {
    fn default() -> Self {
        Self { active: None }
    }
}

impl<S> TaskSlot<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a new loop, returning the id of the task it displaced.
    pub fn occupy(&mut self, task_id: impl Into<String>, handle: PollHandle<S>) -> Option<String> {
        let previous = self.active.take().map(|(previous_id, previous)| {
            previous.cancel();
            tracing::info!("Stopped polling superseded task {}", previous_id);
            previous_id
        });

        self.active = Some((task_id.into(), handle));
        previous
    }

    pub fn active_task(&self) -> Option<&str> {
        self.active.as_ref().map(|(id, _)| id.as_str())
    }

    pub fn cancellation(&self) -> Option<CancellationToken> {
        self.active.as_ref().map(|(_, handle)| handle.cancellation())
    }

    pub fn take(&mut self) -> Option<(String, PollHandle<S>)> {
        self.active.take()
    }

    pub fn cancel(&mut self) {
        if let Some((_, handle)) = self.active.take() {
            handle.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    struct Status {
        state: TaskState,
        error: Option<String>,
    }

    impl TaskStatus for Status {
        fn state(&self) -> TaskState {
            self.state
        }

        fn error_message(&self) -> Option<&str> {
            self.error.as_deref()
        }
    }

    fn status(state: TaskState) -> Status {
        Status { state, error: None }
    }

    /// Replays `script`, repeating the last entry once it runs out.
    fn scripted(
        script: Vec<Status>,
    ) -> (
        Arc<AtomicU32>,
        impl FnMut() -> std::future::Ready<Result<Status, ApiError>> + Send + 'static,
    ) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let queue = Arc::new(Mutex::new(VecDeque::from(script)));

        let check = move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let mut queue = queue.lock().unwrap();
            let next = if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                queue.front().cloned().unwrap()
            };
            std::future::ready(Ok(next))
        };

        (calls, check)
    }

    fn fast(max_attempts: Option<u32>) -> PollConfig {
        PollConfig::new(Duration::from_millis(1), max_attempts)
    }

    #[test]
    fn presets_keep_call_site_intervals() {
        assert_eq!(PollConfig::upload().interval, Duration::from_secs(5));
        assert_eq!(PollConfig::upload().max_attempts, Some(60));
        assert_eq!(PollConfig::analysis().interval, Duration::from_secs(3));
    }

    #[test]
    fn phase_transitions() {
        let mut phase = PollPhase::Created;
        phase.advance(TaskState::Success, None, None);
        assert_eq!(phase, PollPhase::Created);

        phase.start();
        phase.advance(TaskState::Pending, None, Some(3));
        phase.advance(TaskState::Started, None, Some(3));
        assert_eq!(phase, PollPhase::Polling { attempts: 2 });

        phase.advance(TaskState::Progress, None, Some(3));
        assert_eq!(phase, PollPhase::TimedOut { attempts: 3 });

        // Terminal phases do not move again
        phase.advance(TaskState::Success, None, Some(3));
        phase.cancel();
        assert_eq!(phase, PollPhase::TimedOut { attempts: 3 });
    }

    #[test]
    fn cancel_stops_a_running_phase() {
        let mut phase = PollPhase::Created;
        phase.start();
        phase.advance(TaskState::Started, None, None);
        phase.cancel();
        assert_eq!(phase, PollPhase::Cancelled);

        phase.advance(TaskState::Success, None, None);
        assert_eq!(phase, PollPhase::Cancelled);
    }

    #[test]
    fn failure_without_message_uses_placeholder() {
        let mut phase = PollPhase::Created;
        phase.start();
        phase.advance(TaskState::Failure, None, None);
        assert_eq!(phase, PollPhase::Failed(UNKNOWN_FAILURE.to_string()));
    }

    #[test]
    fn task_state_rejects_unknown_values() {
        assert_eq!(
            serde_json::from_str::<TaskState>(r#""STARTED""#).unwrap(),
            TaskState::Started
        );
        assert!(serde_json::from_str::<TaskState>(r#""EXPLODED""#).is_err());
    }

    #[tokio::test]
    async fn succeeds_exactly_once_after_pending_states() {
        let (calls, check) = scripted(vec![
            status(TaskState::Pending),
            status(TaskState::Started),
            status(TaskState::Started),
            status(TaskState::Success),
        ]);
        let mut successes = 0;

        let outcome = TaskPoller::new(fast(Some(60)))
            .run(check, |_, phase| {
                if *phase == PollPhase::Succeeded {
                    successes += 1;
                }
            })
            .await
            .unwrap();

        assert!(matches!(outcome, PollOutcome::Succeeded(_)));
        assert_eq!(successes, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn failure_message_is_verbatim() {
        let (_, check) = scripted(vec![Status {
            state: TaskState::Failure,
            error: Some("OCR failed".to_string()),
        }]);

        let outcome = TaskPoller::new(fast(None)).run(check, |_, _| {}).await.unwrap();

        match outcome {
            PollOutcome::Failed { message, .. } => assert_eq!(message, "OCR failed"),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn times_out_after_max_attempts_without_extra_requests() {
        let (calls, check) = scripted(vec![status(TaskState::Started)]);

        let outcome = TaskPoller::new(fast(Some(60))).run(check, |_, _| {}).await.unwrap();

        assert!(matches!(outcome, PollOutcome::TimedOut { attempts: 60 }));
        assert_eq!(calls.load(Ordering::SeqCst), 60);
    }

    #[tokio::test]
    async fn check_error_ends_loop() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let check = move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Err::<Status, _>(ApiError::InvalidInput("boom".to_string())))
        };

        let err = TaskPoller::new(fast(None)).run(check, |_, _| {}).await.unwrap_err();

        assert_eq!(err.to_string(), "boom");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_before_start_sends_nothing() {
        let (calls, check) = scripted(vec![status(TaskState::Started)]);
        let poller = TaskPoller::new(fast(None));
        poller.cancellation().cancel();

        let outcome = poller.run(check, |_, _| {}).await.unwrap();

        assert!(matches!(outcome, PollOutcome::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancel_stops_a_spawned_loop() {
        let (calls, check) = scripted(vec![status(TaskState::Started)]);
        let poller = TaskPoller::new(PollConfig::new(Duration::from_secs(3600), None));

        let handle = poller.spawn(check, |_, _| {});
        // Let the first check go out, then cancel during the long wait.
        while calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        handle.cancel();

        let outcome = handle.outcome().await.unwrap();
        assert!(matches!(outcome, PollOutcome::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn occupying_slot_cancels_previous_loop() {
        let (_, first_check) = scripted(vec![status(TaskState::Started)]);
        let (_, second_check) = scripted(vec![status(TaskState::Success)]);
        let slow = PollConfig::new(Duration::from_secs(3600), None);

        let mut slot = TaskSlot::new();
        let first = TaskPoller::new(slow).spawn(first_check, |_, _| {});
        let first_token = first.cancellation();
        assert_eq!(slot.occupy("t1", first), None);

        let second = TaskPoller::new(slow).spawn(second_check, |_, _| {});
        assert_eq!(slot.occupy("t2", second).as_deref(), Some("t1"));
        assert!(first_token.is_cancelled());
        assert_eq!(slot.active_task(), Some("t2"));

        let (_, handle) = slot.take().unwrap();
        assert!(matches!(
            handle.outcome().await.unwrap(),
            PollOutcome::Succeeded(_)
        ));
    }

    #[tokio::test]
    async fn dropping_slot_stops_its_loop() {
        let (calls, check) = scripted(vec![status(TaskState::Started)]);

        let mut slot = TaskSlot::new();
        let handle = TaskPoller::new(fast(None)).spawn(check, |_, _| {});
        let token = handle.cancellation();
        slot.occupy("t1", handle);

        while calls.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        drop(slot);
        assert!(token.is_cancelled());

        // Let the loop observe the cancellation, then make sure it stays quiet
        tokio::time::sleep(Duration::from_millis(20)).await;
        let after_drop = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), after_drop);
    }

    #[tokio::test]
    async fn dropping_handle_cancels_loop() {
        let (_, check) = scripted(vec![status(TaskState::Started)]);
        let handle = TaskPoller::new(fast(None)).spawn(check, |_, _| {});
        let token = handle.cancellation();

        drop(handle);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn finished_handle_leaves_token_alone() {
        let (_, check) = scripted(vec![status(TaskState::Success)]);
        let handle = TaskPoller::new(fast(None)).spawn(check, |_, _| {});
        let token = handle.cancellation();

        assert!(matches!(handle.outcome().await.unwrap(), PollOutcome::Succeeded(_)));
        assert!(!token.is_cancelled());
    }
}
