//! Seams between the provisioning logic and the operating system

mod http;
mod progress;
mod runner;

pub use http::HttpClient;
pub use progress::{LogProgress, NoopProgress, ProgressReporter};
pub use runner::{BackgroundProcess, CommandOutput, CommandRunner, CommandSpec};
