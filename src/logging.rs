/// Initialise `env_logger`. `RUST_LOG` wins; otherwise relayrs logs at info
/// and everything else at warn.
pub fn init_logging() {
    let mut builder = env_logger::Builder::from_default_env();
    if std::env::var("RUST_LOG").is_err() {
        builder
            .filter_level(log::LevelFilter::Warn)
            .filter_module("relayrs", log::LevelFilter::Info);
    }
    let _ = builder.try_init();
}
