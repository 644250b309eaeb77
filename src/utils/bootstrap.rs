//! Bootstrap utilities for productsync binaries.
//!
//! Shared initialization code for the HTTP and consumer processes.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{TelemetryConfig, LOG_ENV_VAR};

/// Flushes and shuts down exporters when dropped. Hold it for the life of `main`.
#[must_use = "dropping the guard shuts telemetry down"]
pub struct TelemetryGuard {
    #[cfg(feature = "otel")]
    tracer_provider: opentelemetry_sdk::trace::TracerProvider,
    #[cfg(feature = "otel")]
    meter_provider: Option<opentelemetry_sdk::metrics::SdkMeterProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        #[cfg(feature = "otel")]
        {
            if let Err(e) = self.tracer_provider.shutdown() {
                eprintln!("Error shutting down tracer provider: {:?}", e);
            }
            if let Some(provider) = &self.meter_provider {
                if let Err(e) = provider.shutdown() {
                    eprintln!("Error shutting down meter provider: {:?}", e);
                }
            }
        }
    }
}

/// Initialize tracing with PRODUCTSYNC_LOG environment variable.
///
/// Defaults to "info" level if PRODUCTSYNC_LOG is not set. With the `otel`
/// feature, spans carry OpenTelemetry context; spans and metrics are exported
/// over OTLP when `otlp_endpoint` is configured.
pub fn init_tracing(
    config: &TelemetryConfig,
) -> Result<TelemetryGuard, Box<dyn std::error::Error + Send + Sync>> {
    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer());

    #[cfg(feature = "otel")]
    {
        let (tracer_provider, meter_provider) = otel::init_providers(config)?;
        let layer = otel::layer(&tracer_provider);
        registry.with(layer).try_init()?;

        tracing::info!(
            service = %config.service_name,
            otlp_endpoint = ?config.otlp_endpoint,
            "OpenTelemetry tracing initialized"
        );

        Ok(TelemetryGuard {
            tracer_provider,
            meter_provider,
        })
    }

    #[cfg(not(feature = "otel"))]
    {
        registry.try_init()?;
        tracing::info!(service = %config.service_name, "Tracing initialized");
        Ok(TelemetryGuard {})
    }
}

#[cfg(feature = "otel")]
mod otel {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::{global, KeyValue};
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
    use opentelemetry_sdk::trace::TracerProvider;
    use opentelemetry_sdk::{runtime, Resource};
    use tracing_subscriber::registry::LookupSpan;

    use crate::config::TelemetryConfig;

    type BoxError = Box<dyn std::error::Error + Send + Sync>;

    /// Build tracer and meter providers and install them globally.
    ///
    /// Without an endpoint the tracer provider still mints span contexts (so
    /// propagation works) but exports nothing, and no meter provider is built.
    pub(super) fn init_providers(
        config: &TelemetryConfig,
    ) -> Result<(TracerProvider, Option<SdkMeterProvider>), BoxError> {
        let resource = Resource::new(vec![
            KeyValue::new("service.name", config.service_name.clone()),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ]);

        let mut tracer_builder = TracerProvider::builder().with_resource(resource.clone());
        let mut meter_provider = None;

        if let Some(endpoint) = &config.otlp_endpoint {
            let span_exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint)
                .build()?;
            tracer_builder = tracer_builder.with_batch_exporter(span_exporter, runtime::Tokio);

            let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint)
                .build()?;
            let reader = PeriodicReader::builder(metric_exporter, runtime::Tokio).build();
            let provider = SdkMeterProvider::builder()
                .with_reader(reader)
                .with_resource(resource)
                .build();
            global::set_meter_provider(provider.clone());
            meter_provider = Some(provider);
        }

        let tracer_provider = tracer_builder.build();
        global::set_tracer_provider(tracer_provider.clone());

        Ok((tracer_provider, meter_provider))
    }

    pub(super) fn layer<S>(
        provider: &TracerProvider,
    ) -> tracing_opentelemetry::OpenTelemetryLayer<S, opentelemetry_sdk::trace::Tracer>
    where
        S: tracing::Subscriber + for<'span> LookupSpan<'span>,
    {
        tracing_opentelemetry::layer().with_tracer(provider.tracer("productsync"))
    }
}
