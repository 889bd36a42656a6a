use tracing_subscriber::{prelude::*, registry, util::TryInitError, EnvFilter};

pub struct LoggingOptions {
    pub executable_name: String,
    pub json: bool,
}

/// Install the global tracing subscriber.
///
/// The filter is read from `RUST_LOG`, defaulting to `info` and `debug` for the executable.
pub fn init(options: LoggingOptions) -> Result<(), TryInitError> {
    let LoggingOptions {
        executable_name,
        json,
    } = options;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("info,{}=debug", executable_name.replace('-', "_")))
    });

    let log_default_layer = (!json).then(tracing_subscriber::fmt::layer);
    let log_json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(false)
    });

    registry()
        .with(env_filter)
        .with(log_default_layer)
        .with(log_json_layer)
        .try_init()
}
