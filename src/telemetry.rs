use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the JSON log formatter on stderr, keeping stdout free for command output.
/// `RUST_LOG` controls verbosity and falls back to `info`. Fails if a global subscriber
/// is already installed.
pub fn init_tracing() -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .json()
        .finish()
        .try_init()
}
