//! Progress callbacks for long package-manager operations

/// Receives progress while packages are fetched and installed
pub trait ProgressReporter: Send + Sync {
    /// Download progress, `percent` in 0..=100
    fn fetch_progress(&self, percent: f32, detail: &str);

    /// Unpack/configure progress, `percent` in 0..=100
    fn install_progress(&self, percent: f32, detail: &str);

    /// A package transaction finished
    fn transaction_complete(&self);
}

/// Discards all progress
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn fetch_progress(&self, _percent: f32, _detail: &str) {}
    fn install_progress(&self, _percent: f32, _detail: &str) {}
    fn transaction_complete(&self) {}
}

/// Writes progress to the tracing log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn fetch_progress(&self, percent: f32, detail: &str) {
        tracing::debug!("fetch {:5.1}% {}", percent, detail);
    }

    fn install_progress(&self, percent: f32, detail: &str) {
        tracing::debug!("install {:5.1}% {}", percent, detail);
    }

    fn transaction_complete(&self) {
        tracing::info!("Package transaction complete");
    }
}
