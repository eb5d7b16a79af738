use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Installs the global subscriber. Filter directives come from `NESTEGG_LOG`,
/// e.g. `NESTEGG_LOG=nestegg::core=debug`; defaults to `nestegg=info`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("NESTEGG_LOG")
            .unwrap_or_else(|_| EnvFilter::new("nestegg=info"));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    });
}
