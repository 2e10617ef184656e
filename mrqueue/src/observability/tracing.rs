/// Install a global `tracing` subscriber filtered by `RUST_LOG`
///
/// Falls back to `default_filter` when `RUST_LOG` is unset. Set `json` to
/// emit one JSON object per line.
#[cfg(feature = "tracing-basic")]
pub fn init_tracing(default_filter: &str, json: bool) -> Result<(), crate::error::BoxError> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_filter))?;
    let builder = fmt().with_env_filter(filter).with_target(true);

    if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    }
}
