use std::sync::Once;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INIT: Once = Once::new();

/// Installs the diagnostics subscriber on stderr.
///
/// Levels come from `UEV_LOG` (for example `UEV_LOG=uev_metrics=debug`),
/// falling back to `default_directive`. Command output stays on stdout.
pub fn init_tracing(default_directive: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("UEV_LOG")
            .unwrap_or_else(|_| EnvFilter::new(default_directive));

        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .with(filter)
            .init();
    });
}
