use opentelemetry::{KeyValue, trace::TracerProvider as _};
use opentelemetry_otlp::{Protocol, WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    Resource,
    trace::{RandomIdGenerator, Sampler, SdkTracerProvider},
};
use opentelemetry_semantic_conventions::{
    SCHEMA_URL,
    attribute::{SERVICE_NAME, SERVICE_VERSION},
    resource::DEPLOYMENT_ENVIRONMENT_NAME,
};
use tonic::metadata::MetadataMap;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::env::TelemetryConfig;
use crate::error::AppError;

fn resource(config: &TelemetryConfig) -> Resource {
    Resource::builder()
        .with_schema_url(
            [
                KeyValue::new(SERVICE_NAME, env!("CARGO_PKG_NAME")),
                KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
                KeyValue::new(DEPLOYMENT_ENVIRONMENT_NAME, config.environment.clone()),
            ],
            SCHEMA_URL,
        )
        .build()
}

fn init_tracer_provider(
    config: &TelemetryConfig,
    endpoint: &str,
) -> Result<SdkTracerProvider, AppError> {
    let mut metadata = MetadataMap::new();
    if let Some(api_key) = &config.api_key {
        let value = api_key.parse().map_err(|_| {
            AppError::validation("OTEL_API_KEY", "OTEL_API_KEY is not a valid header value")
        })?;
        metadata.insert("x-api-key", value);
    }

    let mut builder = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_protocol(Protocol::Grpc)
        .with_metadata(metadata);
    if endpoint.starts_with("https://") {
        builder =
            builder.with_tls_config(tonic::transport::ClientTlsConfig::new().with_native_roots());
    }

    let exporter = builder
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to build span exporter: {}", e)))?;

    Ok(SdkTracerProvider::builder()
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource(config))
        .with_batch_exporter(exporter)
        .build())
}

/// Flushes and shuts down the exporter when dropped.
pub struct OtelGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl OtelGuard {
    pub fn is_exporting(&self) -> bool {
        self.tracer_provider.is_some()
    }
}

/// Installs an env-filtered fmt subscriber, plus an OTLP span layer when an
/// endpoint is configured.
pub fn init_tracing(config: &TelemetryConfig) -> Result<OtelGuard, AppError> {
    let tracer_provider = match &config.otlp_endpoint {
        Some(endpoint) => Some(init_tracer_provider(config, endpoint)?),
        None => None,
    };

    let otel_layer = tracer_provider
        .as_ref()
        .map(|provider| OpenTelemetryLayer::new(provider.tracer("formation-engine")));

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(otel_layer)
        .try_init()
        .map_err(|e| AppError::Internal(format!("Failed to install subscriber: {}", e)))?;

    Ok(OtelGuard { tracer_provider })
}

impl Drop for OtelGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take() {
            if let Err(err) = provider.shutdown() {
                eprintln!("Failed to shut down tracer provider: {:?}", err);
            }
        }
    }
}
