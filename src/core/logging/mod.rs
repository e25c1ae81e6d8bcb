use tracing_subscriber::EnvFilter;

pub fn default_directives(level: &str) -> String {
    format!("{level},tubefeed_lib={level},sqlx=warn,reqwest=warn")
}

pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .try_init();
}
