// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod alert;
pub mod bulletin;
pub mod classify;
pub mod config;
pub mod control;
pub mod fanout;
pub mod fetch;
pub mod metrics;
pub mod notify;
pub mod ops;
pub mod recent;
pub mod registry;
pub mod store;
pub mod stream;
pub mod testing;
pub mod visual;

pub use crate::alert::{Alert, Category, SkyPosition};
pub use crate::classify::classify;
pub use crate::config::AppConfig;
pub use crate::fanout::{Broadcaster, DispatchReport, Payload};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs the global subscriber. `RUST_LOG` wins over the default filter;
/// `LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("gcn_alert_relay=info,warn"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}
