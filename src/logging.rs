use clap_verbosity_flag::{InfoLevel, Verbosity};
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Environment variable holding `EnvFilter` directives; overrides `-v`/`-q`.
pub const LOG_ENV_VAR: &str = "SEMANTIC_CLUSTERS_LOG";

fn default_level(verbosity: &Verbosity<InfoLevel>) -> LevelFilter {
    if cfg!(debug_assertions) && !verbosity.is_present() {
        LevelFilter::DEBUG
    } else {
        verbosity.tracing_level_filter()
    }
}

pub fn setup_logger(verbosity: &Verbosity<InfoLevel>) {
    let indicatif_layer = IndicatifLayer::new();

    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level(verbosity).into())
        .with_env_var(LOG_ENV_VAR)
        .from_env_lossy();

    let fmt = fmt::layer()
        .with_ansi(true)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_writer(indicatif_layer.get_stderr_writer())
        .pretty();

    tracing_subscriber::registry()
        .with(fmt) // Direct fmt logs to stderr writer
        .with(indicatif_layer)
        .with(env_filter)
        .init();
}
