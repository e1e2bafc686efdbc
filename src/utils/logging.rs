use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::EnvConfig;

const DEFAULT_FILTER: &str = "agentloom=info,warn";
const DEBUG_FILTER: &str = "agentloom=debug,info";

pub struct LoggingConfig;

impl LoggingConfig {
    /// Installs the global subscriber.
    ///
    /// `RUST_LOG` takes precedence; otherwise the filter defaults to
    /// `agentloom=info,warn`, or `agentloom=debug,info` with source locations
    /// and thread ids when `AGENTLOOM_DEBUG` is set. Calling it again after a
    /// subscriber is installed does nothing.
    ///
    /// ```no_run
    /// agentloom::utils::logging::LoggingConfig::init();
    /// tracing::info!("ready");
    /// ```
    pub fn init() {
        let is_debug = Self::is_debug();
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(Self::default_filter(is_debug)));

        let fmt_layer = fmt::layer()
            .with_target(is_debug)
            .with_file(is_debug)
            .with_line_number(is_debug)
            .with_thread_ids(is_debug);

        let installed = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .is_ok();

        if installed && is_debug {
            tracing::debug!("debug logging enabled");
        }
    }

    pub fn init_with_filter(filter: &str) {
        let _ = tracing_subscriber::registry()
            .with(EnvFilter::new(filter))
            .with(fmt::layer())
            .try_init();
    }

    pub fn is_debug() -> bool {
        EnvConfig::is_debug_mode()
    }

    fn default_filter(is_debug: bool) -> &'static str {
        if is_debug {
            DEBUG_FILTER
        } else {
            DEFAULT_FILTER
        }
    }
}
