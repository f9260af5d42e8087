use std::sync::OnceLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOGGER_INIT: OnceLock<()> = OnceLock::new();

/// RUST_LOG があればそれを優先。標準出力はCLI表示用に空けておく
pub fn init(verbose: bool) {
    LOGGER_INIT.get_or_init(|| {
        let default_filter = if verbose { "vault_scan=debug" } else { "vault_scan=info" };
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init();
    });
}
