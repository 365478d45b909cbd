// SPDX-License-Identifier: Apache-2.0

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::ENV_RAMDATA_LOG_LEVEL;

/// Installs the global subscriber. Output goes to stderr so that a
/// worker's stdout stays reserved for protocol frames. Calling this more
/// than once is harmless.
pub fn init_tracing() {
    let filter = std::env::var(ENV_RAMDATA_LOG_LEVEL)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(EnvFilter::new)
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true),
        )
        .try_init();
}
