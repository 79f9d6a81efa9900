//! Progress tracking and callbacks for shooting optimizations.
//!
//! The controller reports one [`ProgressInfo`] per outer iteration, plus a
//! notification whenever safe mode backs off the learning rate.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Progress information for one outer iteration.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Current iteration number (1-based).
    pub iteration: usize,
    /// Iteration budget of the run.
    pub total_iterations: Option<usize>,
    /// Total cost after the iteration.
    pub cost: f64,
    /// Data-attachment part of the cost.
    pub data_cost: f64,
    /// Regularisation energy (before scaling by `cost_cst`).
    pub regularization: f64,
    /// Time elapsed since start.
    pub elapsed: Duration,
    /// Estimated remaining time.
    pub estimated_remaining: Option<Duration>,
    /// Current learning rate.
    pub learning_rate: f64,
}

impl ProgressInfo {
    pub fn new(
        iteration: usize,
        total_iterations: Option<usize>,
        cost: f64,
        elapsed: Duration,
        learning_rate: f64,
    ) -> Self {
        Self {
            iteration,
            total_iterations,
            cost,
            data_cost: cost,
            regularization: 0.0,
            elapsed,
            estimated_remaining: None,
            learning_rate,
        }
    }

    /// Split the cost into its data and regularisation parts.
    pub fn with_breakdown(mut self, data_cost: f64, regularization: f64) -> Self {
        self.data_cost = data_cost;
        self.regularization = regularization;
        self
    }

    /// Calculate progress percentage.
    pub fn progress_percent(&self) -> Option<f64> {
        self.total_iterations
            .filter(|&total| total > 0)
            .map(|total| (self.iteration as f64 / total as f64) * 100.0)
    }

    /// Calculate estimated remaining time.
    pub fn calculate_remaining(&mut self) {
        if let Some(total) = self.total_iterations {
            if self.iteration > 0 {
                let avg_time_per_iter = self.elapsed.as_secs_f64() / self.iteration as f64;
                let remaining_iters = total.saturating_sub(self.iteration);
                self.estimated_remaining = Some(Duration::from_secs_f64(avg_time_per_iter * remaining_iters as f64));
            }
        }
    }
}

/// Progress callback trait for monitoring an optimization.
pub trait ProgressCallback: Send + Sync {
    /// Called after every outer iteration.
    fn on_progress(&self, info: &ProgressInfo);

    /// Called when the optimization starts.
    fn on_start(&self, _initial_cost: f64) {}

    /// Called when safe mode rejects a step and lowers the learning rate.
    fn on_backoff(&self, _iteration: usize, _learning_rate: f64, _reason: &str) {}

    /// Called when the optimization terminates.
    fn on_complete(&self, _status: &str, _best_cost: f64, _elapsed: Duration) {}

    /// Called when the optimization fails.
    fn on_error(&self, _error: &str) {}
}

/// Console progress callback that logs to tracing.
#[derive(Debug, Clone)]
pub struct ConsoleProgressCallback {
    /// Log interval (iterations).
    pub log_interval: usize,
}

impl Default for ConsoleProgressCallback {
    fn default() -> Self {
        Self { log_interval: 10 }
    }
}

impl ConsoleProgressCallback {
    pub fn new(log_interval: usize) -> Self {
        Self {
            log_interval: log_interval.max(1),
        }
    }
}

impl ProgressCallback for ConsoleProgressCallback {
    fn on_progress(&self, info: &ProgressInfo) {
        if info.iteration % self.log_interval == 0 || info.total_iterations == Some(info.iteration) {
            let remaining = info
                .estimated_remaining
                .map(|d| format!("{:.2}s", d.as_secs_f64()))
                .unwrap_or_else(|| "N/A".to_string());

            tracing::info!(
                "Iter {}/{} ({:.1}%) | Cost: {:.6} (data {:.6}, reg {:.6}) | LR: {:.2e} | Elapsed: {:.2}s | ETA: {}",
                info.iteration,
                info.total_iterations.map(|n| n.to_string()).unwrap_or_else(|| "?".to_string()),
                info.progress_percent().unwrap_or(0.0),
                info.cost,
                info.data_cost,
                info.regularization,
                info.learning_rate,
                info.elapsed.as_secs_f64(),
                remaining
            );
        }
    }

    fn on_start(&self, initial_cost: f64) {
        tracing::info!("Shooting started, initial cost {:.6}", initial_cost);
    }

    fn on_backoff(&self, iteration: usize, learning_rate: f64, reason: &str) {
        tracing::warn!("Iter {}: {} | retrying with LR {:.2e}", iteration, reason, learning_rate);
    }

    fn on_complete(&self, status: &str, best_cost: f64, elapsed: Duration) {
        tracing::info!(
            "Shooting finished ({}) in {:.2}s with best cost {:.6}",
            status,
            elapsed.as_secs_f64(),
            best_cost
        );
    }

    fn on_error(&self, error: &str) {
        tracing::error!("Shooting failed: {}", error);
    }
}

/// History callback that records all progress information.
#[derive(Debug, Clone, Default)]
pub struct HistoryCallback {
    history: Arc<Mutex<Vec<ProgressInfo>>>,
    backoffs: Arc<Mutex<Vec<(usize, f64)>>>,
}

impl HistoryCallback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the recorded history.
    pub fn get_history(&self) -> Vec<ProgressInfo> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// `(iteration, new learning rate)` for every safe-mode backoff.
    pub fn get_backoffs(&self) -> Vec<(usize, f64)> {
        self.backoffs.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Clear the history.
    pub fn clear(&self) {
        self.history.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.backoffs.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl ProgressCallback for HistoryCallback {
    fn on_progress(&self, info: &ProgressInfo) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(info.clone());
    }

    fn on_backoff(&self, iteration: usize, learning_rate: f64, _reason: &str) {
        self.backoffs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((iteration, learning_rate));
    }
}

/// Progress tracker that manages multiple callbacks.
#[derive(Clone, Default)]
pub struct ProgressTracker {
    callbacks: Vec<Arc<dyn ProgressCallback>>,
    start_time: Option<Instant>,
    total_iterations: Option<usize>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a callback.
    pub fn add_callback(&mut self, callback: Arc<dyn ProgressCallback>) {
        self.callbacks.push(callback);
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Start tracking a run of `total_iterations` iterations.
    pub fn start(&mut self, total_iterations: usize, initial_cost: f64) {
        self.start_time = Some(Instant::now());
        self.total_iterations = Some(total_iterations);
        for callback in &self.callbacks {
            callback.on_start(initial_cost);
        }
    }

    fn elapsed(&self) -> Duration {
        self.start_time.map(|t| t.elapsed()).unwrap_or(Duration::ZERO)
    }

    /// Report a finished iteration.
    pub fn update(&self, iteration: usize, cost: f64, data_cost: f64, regularization: f64, learning_rate: f64) {
        let mut info = ProgressInfo::new(iteration, self.total_iterations, cost, self.elapsed(), learning_rate)
            .with_breakdown(data_cost, regularization);
        info.calculate_remaining();

        for callback in &self.callbacks {
            callback.on_progress(&info);
        }
    }

    /// Report a safe-mode backoff.
    pub fn backoff(&self, iteration: usize, learning_rate: f64, reason: &str) {
        for callback in &self.callbacks {
            callback.on_backoff(iteration, learning_rate, reason);
        }
    }

    /// Complete tracking.
    pub fn complete(&self, status: &str, best_cost: f64) {
        let elapsed = self.elapsed();
        for callback in &self.callbacks {
            callback.on_complete(status, best_cost, elapsed);
        }
    }

    /// Report error.
    pub fn error(&self, error: &str) {
        for callback in &self.callbacks {
            callback.on_error(error);
        }
    }
}
