use std::path::PathBuf;

use api_gateway_controller::Configuration;
use clap::Parser;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, Registry, filter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_FILE_PREFIX: &str = "api-gateway-controller.log";
const DEFAULT_CONSOLE_FILTER: &str = "info,kube=warn,hyper=warn";
const DEFAULT_FILE_FILTER: &str = "debug";
const DEFAULT_TRACE_FILTER: &str = "info";

#[derive(Parser, Debug)]
#[command(version, about = "Gateway API controller for servers.com L7 load balancers", long_about = None)]
struct CommandArgs {
    /// YAML configuration file.
    #[arg(long, short = 'c', env = "API_GATEWAY_CONFIG")]
    config: PathBuf,
    /// Directory for the daily rotated debug log, console only when unset.
    #[arg(long, env = "API_GATEWAY_LOG_DIR")]
    log_dir: Option<PathBuf>,
    /// OTLP collector, used when `enable_open_telemetry` is set.
    #[arg(long, default_value = "http://127.0.0.1:4317")]
    otlp_endpoint: String,
    /// Validate the configuration and exit.
    #[arg(long)]
    check_config: bool,
}

fn env_filter(variable: &str, default: &str) -> EnvFilter {
    EnvFilter::new(std::env::var(variable).unwrap_or_else(|_| default.to_owned()))
}

fn otlp_layer(endpoint: &str, service_name: &str) -> Result<impl Layer<Registry>, String> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(std::time::Duration::from_secs(3))
        .build()
        .map_err(|e| e.to_string())?;

    let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_id_generator(RandomIdGenerator::default())
        .with_sampler(Sampler::AlwaysOn)
        .with_resource(
            opentelemetry_sdk::Resource::builder().with_attributes(vec![opentelemetry::KeyValue::new("service.name", service_name.to_owned())]).build(),
        )
        .build();
    let tracer = tracer_provider.tracer(service_name.to_owned());
    Ok(tracing_opentelemetry::layer().with_tracer(tracer).with_filter(env_filter("RUST_TRACE_LOG", DEFAULT_TRACE_FILTER)))
}

/// The returned guard flushes the file log on drop.
fn init_tracing_logging(args: &CommandArgs, configuration: &Configuration) -> Option<WorkerGuard> {
    let console_layer = fmt::layer()
        .event_format(fmt::format().compact())
        .with_target(true)
        .with_ansi(false)
        .with_filter(filter::filter_fn(|meta| !meta.is_span()))
        .with_filter(env_filter("RUST_LOG", DEFAULT_CONSOLE_FILTER));

    let (file_layer, guard) = match &args.log_dir {
        Some(log_dir) => {
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX));
            let layer = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .with_filter(filter::filter_fn(|meta| !meta.is_span()))
                .with_filter(env_filter("RUST_FILE_LOG", DEFAULT_FILE_FILTER));
            (Some(layer), Some(guard))
        },
        None => (None, None),
    };

    let telemetry = configuration.enable_open_telemetry.unwrap_or_default().then(|| otlp_layer(&args.otlp_endpoint, &configuration.controller_name));
    let (telemetry_layer, telemetry_error) = match telemetry {
        Some(Ok(layer)) => (Some(layer), None),
        Some(Err(e)) => (None, Some(e)),
        None => (None, None),
    };

    Registry::default().with(telemetry_layer).with(console_layer).with(file_layer).init();
    if let Some(e) = telemetry_error {
        warn!("open telemetry disabled, can't build exporter for {} {e}", args.otlp_endpoint);
    }
    guard
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> api_gateway_controller::Result<()> {
    let args = CommandArgs::parse();
    let configuration: Configuration = serde_yaml::from_str(&std::fs::read_to_string(&args.config)?)?;
    if args.check_config {
        return configuration.validate();
    }

    let _guard = init_tracing_logging(&args, &configuration);
    info!("configuration loaded from {}", args.config.display());
    configuration.validate()?;
    api_gateway_controller::start(configuration).await
}
