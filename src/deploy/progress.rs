use async_trait::async_trait;

/// Receives human-readable progress while a deployment runs. Purely a side
/// channel: the orchestrator never reads anything back.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn update(&self, message: &str);
}

/// Forwards progress to the log.
pub struct TracingProgress;

#[async_trait]
impl ProgressReporter for TracingProgress {
    async fn update(&self, message: &str) {
        tracing::info!("deploy: {message}");
    }
}

/// Prints progress lines on stdout, prefixed with a label.
pub struct StdoutProgress {
    label: String,
}

impl StdoutProgress {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

#[async_trait]
impl ProgressReporter for StdoutProgress {
    async fn update(&self, message: &str) {
        println!("[{}] {message}", self.label);
    }
}
