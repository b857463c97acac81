use crate::{errors::Error, Result};

/// Initialize tracing for the bot.
///
/// `debug` raises the default level for our crates; `RUST_LOG` still wins.
pub fn init(service_name: &str, debug: bool) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,dozer_core={level},dozer_telegram={level},{service_name}={level}"
        ))
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(true)
        .try_init()
        .map_err(|e| Error::Config(format!("failed to install log subscriber: {e}")))
}
