pub mod config;
pub use self::config::*;
use tracing::metadata::LevelFilter;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{Layer, Registry};

type Filtered = Layered<EnvFilter, Registry>;
type OutputLayer = Box<dyn Layer<Filtered> + Send + Sync>;

/// Install the global subscriber: a console layer on stderr and an optional
/// rolling file layer, both under one `EnvFilter`.
pub fn initialize_telemetry(config: &TelemetryConfig) -> anyhow::Result<()> {
    if !config.enable {
        return Ok(());
    }
    let console = config.console.enable.then(|| {
        let console = &config.console;
        output_layer(
            std::io::stderr,
            true,
            console.enable_debug_logging,
            console.max_level.clone(),
        )
    });
    let file = config.file.enable.then(|| {
        let file = &config.file;
        let appender =
            RollingFileAppender::new(file.rolling_time.clone().into(), &file.path, &file.prefix);
        output_layer(appender, false, file.enable_debug_logging, file.max_level.clone())
    });
    Registry::default()
        .with(env_filter(config))
        .with(vec![console, file])
        .try_init()?;
    Ok(())
}

fn env_filter(config: &TelemetryConfig) -> EnvFilter {
    let mut builder = EnvFilter::builder();
    if !config.level_filter_env.is_empty() {
        builder = builder.with_env_var(config.level_filter_env.as_str());
    }
    builder
        .with_default_directive(config.max_level.clone().into())
        .parse_lossy(config.level_filter.as_str())
}

/// Debug logging adds source location, thread and target to every event.
fn output_layer<W>(writer: W, ansi: bool, debug: bool, max_level: LoggingLevel) -> OutputLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let level: LevelFilter = max_level.into();
    tracing_subscriber::fmt::layer()
        .with_ansi(ansi)
        .with_writer(writer)
        .with_file(debug)
        .with_line_number(debug)
        .with_thread_ids(debug)
        .with_target(debug)
        .with_filter(level)
        .boxed()
}
