use crate::error::AdError;
use log::error;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const MAX_ERROR_LOG_SIZE: usize = 100;

/// One recorded failure.
#[derive(Debug, Clone)]
pub struct ErrorEntry {
    pub message: String,
    pub retryable: bool,
    pub timestamp: Instant,
    pub ad_id: Option<String>,
    pub operation: Option<String>,
}

/// Aggregate view over the recorded failures.
#[derive(Debug, Clone)]
pub struct ErrorStats {
    pub total_errors: usize,
    pub retryable_errors: usize,
    pub non_retryable_errors: usize,
    pub last_error: Option<ErrorEntry>,
}

/// Bounded FIFO of recent pipeline failures.
///
/// Oldest entries are evicted once capacity is exceeded. Purely diagnostic:
/// nothing in the pipeline blocks on this log.
#[derive(Default)]
pub struct ErrorLog {
    entries: Mutex<VecDeque<ErrorEntry>>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_error(&self, err: &AdError, ad_id: Option<&str>, operation: Option<&str>) {
        let entry = ErrorEntry {
            message: err.to_string(),
            retryable: err.is_retryable(),
            timestamp: Instant::now(),
            ad_id: ad_id.map(str::to_string),
            operation: operation.map(str::to_string),
        };
        error!(
            "VAST error - id: {:?}, operation: {:?}: {}",
            entry.ad_id, entry.operation, entry.message
        );

        let mut entries = self.entries.lock().unwrap();
        entries.push_back(entry);
        while entries.len() > MAX_ERROR_LOG_SIZE {
            entries.pop_front();
        }
    }

    pub fn stats(&self) -> ErrorStats {
        let entries = self.entries.lock().unwrap();
        let retryable = entries.iter().filter(|e| e.retryable).count();
        ErrorStats {
            total_errors: entries.len(),
            retryable_errors: retryable,
            non_retryable_errors: entries.len() - retryable,
            last_error: entries.back().cloned(),
        }
    }

    pub fn errors_for_ad(&self, ad_id: &str) -> Vec<ErrorEntry> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.ad_id.as_deref() == Some(ad_id))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn clear_for_ad(&self, ad_id: &str) {
        self.entries
            .lock()
            .unwrap()
            .retain(|e| e.ad_id.as_deref() != Some(ad_id));
    }

    pub fn clear_older_than(&self, age: Duration) {
        let now = Instant::now();
        self.entries
            .lock()
            .unwrap()
            .retain(|e| now.duration_since(e.timestamp) < age);
    }
}
