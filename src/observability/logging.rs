//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Suppress repeated identical error messages (`ErrorLogThrottle`)
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, pretty format for development
//! - `RUST_LOG` wins over the configured level

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogFormat;

/// Default suppression window for repeated messages.
pub const THROTTLE_WINDOW: Duration = Duration::from_secs(30);

/// Install the global subscriber. Safe to call more than once; later calls are no-ops.
pub fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("gateway_sync={level},tower_http=info")));

    let registry = tracing_subscriber::registry().with(filter);
    let result = match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Remembers when each distinct message was last emitted.
///
/// A message is let through the first time and then again only once
/// `window` has passed without it being seen.
#[derive(Debug)]
pub struct ErrorLogThrottle {
    window: Duration,
    last_seen: HashMap<String, Instant>,
}

impl Default for ErrorLogThrottle {
    fn default() -> Self {
        Self::new(THROTTLE_WINDOW)
    }
}

impl ErrorLogThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: HashMap::new(),
        }
    }

    /// Returns true when `message` should be logged now.
    pub fn should_log(&mut self, message: &str) -> bool {
        let now = Instant::now();
        let window = self.window;
        self.last_seen.retain(|_, seen| now.duration_since(*seen) < window);

        match self.last_seen.get_mut(message) {
            Some(seen) => {
                // Repeats keep the window open.
                *seen = now;
                false
            }
            None => {
                self.last_seen.insert(message.to_string(), now);
                true
            }
        }
    }
}
