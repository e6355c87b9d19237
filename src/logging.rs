//! Tracing subscriber setup with a filter the configuration can switch
//! between `info` and `debug` at runtime.

use tracing::warn;
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, reload, util::SubscriberInitExt};

const INFO_FILTER: &str = "chgate=info,tower_http=info";
const DEBUG_FILTER: &str = "chgate=debug,tower_http=debug";

fn filter_for(debug: bool) -> EnvFilter {
    EnvFilter::new(if debug { DEBUG_FILTER } else { INFO_FILTER })
}

/// Handle to the reloadable log filter
#[derive(Clone)]
pub struct LogHandle {
    handle: reload::Handle<EnvFilter, Registry>,
}

impl LogHandle {
    /// Switches between debug and info logging
    pub fn set_debug(&self, debug: bool) {
        if let Err(err) = self.handle.reload(filter_for(debug)) {
            warn!(error = %err, "unable to change log level");
        }
    }
}

/// Installs the global subscriber
///
/// `RUST_LOG` takes precedence over `debug` for the initial filter.
pub fn init(debug: bool) -> LogHandle {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| filter_for(debug));
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    LogHandle { handle }
}
