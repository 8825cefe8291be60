use tracing::Level;

/// Install the process-wide tracing subscriber.
///
/// The level comes from the `TOPIQ_LOG` environment variable when set,
/// otherwise from `default_level`; either holds one of the usual level
/// names (`error`, `warn`, `info`, `debug`, `trace`, any case). Values
/// that parse as nothing fall back to `info`. Safe to call more than
/// once; only the first call installs a subscriber.
pub fn init(default_level: &str) {
    let level = std::env::var("TOPIQ_LOG")
        .ok()
        .as_deref()
        .unwrap_or(default_level)
        .parse::<Level>()
        .unwrap_or(Level::INFO);

    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
}
