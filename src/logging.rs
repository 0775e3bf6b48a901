//! Build logging.
//!
//! Stages never reach for a global logger. They receive a [`BuildLog`],
//! which wraps a `tracing` span, and emit their events under it. A caller
//! that wants a stage's events grouped opens a child with [`BuildLog::stage`].

use std::fmt::Display;
use tracing::Span;
use tracing_subscriber::EnvFilter;

/// Observability handle passed explicitly through the pipeline.
#[derive(Debug, Clone)]
pub struct BuildLog {
    span: Span,
}

impl BuildLog {
    /// Root handle for one image build.
    pub fn for_build(version: &str) -> Self {
        Self {
            span: tracing::info_span!("build", version = %version),
        }
    }

    /// Handle that is not attached to any span. Used by tests and by
    /// commands that are not part of an image build.
    pub fn detached() -> Self {
        Self { span: Span::none() }
    }

    /// Child handle for a named stage or tool.
    pub fn stage(&self, name: &str) -> Self {
        Self {
            span: tracing::info_span!(parent: &self.span, "stage", name = %name),
        }
    }

    pub fn info(&self, message: impl Display) {
        tracing::info!(parent: &self.span, "{message}");
    }

    pub fn debug(&self, message: impl Display) {
        tracing::debug!(parent: &self.span, "{message}");
    }

    pub fn warn(&self, message: impl Display) {
        tracing::warn!(parent: &self.span, "{message}");
    }

    pub fn error(&self, message: impl Display) {
        tracing::error!(parent: &self.span, "{message}");
    }
}

/// Install the process-wide subscriber for the CLI.
///
/// 0 = info, 1 = debug, 2+ = trace. `RUST_LOG` wins when set.
pub fn init_subscriber(verbosity: u8) {
    let default = match verbosity {
        0 => "streskit=info",
        1 => "streskit=debug",
        _ => "streskit=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}
