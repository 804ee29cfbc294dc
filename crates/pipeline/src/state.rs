use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Status of an execution.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Status {
    #[default]
    Queued,
    Running,
    Completed,
    Warnings,
    Errors,
    Failed,
    Aborted,
}

impl Status {
    /// Numeric code reported for the status.
    pub fn code(&self) -> i32 {
        match self {
            Status::Queued => 0,
            Status::Running => 5,
            Status::Completed => 10,
            Status::Warnings => 20,
            Status::Errors => 30,
            Status::Failed => 40,
            Status::Aborted => 50,
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self, Status::Queued | Status::Running)
    }
}

/// ExecutionState is shared by every processor of one execution.
/// Its liveness flag implements cooperative cancellation: once stopped,
/// every processor sharing the state reports exhaustion on its next pull.
#[derive(Debug)]
pub struct ExecutionState {
    executable: AtomicBool,
    warnings: AtomicUsize,
    errors: AtomicUsize,
    status: Mutex<Status>,
    first_error: Mutex<Option<String>>,
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionState {
    pub fn new() -> Self {
        Self {
            executable: AtomicBool::new(true),
            warnings: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
            status: Mutex::new(Status::Queued),
            first_error: Mutex::new(None),
        }
    }

    pub fn is_executable(&self) -> bool {
        self.executable.load(Ordering::Acquire)
    }

    /// Request cooperative cancellation.
    pub fn stop(&self) {
        if self.executable.swap(false, Ordering::AcqRel) {
            tracing::info!("execution stop requested");
        }
    }

    pub fn add_warning(&self) {
        self.warnings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_error(&self, message: impl Into<String>) {
        self.errors.fetch_add(1, Ordering::Relaxed);

        let mut first = self.first_error.lock().unwrap_or_else(|e| e.into_inner());
        if first.is_none() {
            *first = Some(message.into());
        }
    }

    pub fn warnings(&self) -> usize {
        self.warnings.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn first_error(&self) -> Option<String> {
        self.first_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn status(&self) -> Status {
        *self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_status(&self, status: Status) {
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = status;
    }

    /// Derive the final status from the counters and liveness flag.
    pub fn conclude(&self) -> Status {
        let status = if self.status() == Status::Failed {
            Status::Failed
        } else if !self.is_executable() {
            Status::Aborted
        } else if self.errors() != 0 {
            Status::Errors
        } else if self.warnings() != 0 {
            Status::Warnings
        } else {
            Status::Completed
        };
        self.set_status(status);
        status
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_conclusion() {
        let state = ExecutionState::new();
        assert_eq!(state.conclude(), Status::Completed);

        state.add_warning();
        assert_eq!(state.conclude(), Status::Warnings);

        state.add_error("first");
        state.add_error("second");
        assert_eq!(state.conclude(), Status::Errors);
        assert_eq!(state.first_error().as_deref(), Some("first"));

        let state = Arc::new(ExecutionState::new());
        let remote = state.clone();
        std::thread::spawn(move || remote.stop()).join().unwrap();
        assert!(!state.is_executable());
        assert_eq!(state.conclude(), Status::Aborted);
        assert_eq!(state.status().code(), 50);
    }
}
