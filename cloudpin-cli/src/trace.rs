//! Tracing/telemetry bootstrap: plain `tracing-subscriber` output by
//! default, switching to OTLP-exported structured logs + a real
//! `opentelemetry` `MeterProvider` when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
//! Mirrors `rama-cli/src/trace.rs`'s `init_tracing` split between
//! `init_default` and `init_structured`; `cloudpin-core`'s counters and
//! histograms (C7) are no-ops until this installs a provider.

use opentelemetry::{trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::{MetricExporter, SpanExporter};
use opentelemetry_sdk::{metrics::SdkMeterProvider, trace::SdkTracerProvider, Resource};
use opentelemetry_semantic_conventions::resource::SERVICE_NAME;
use std::io::IsTerminal as _;
use tracing_subscriber::{filter::Directive, fmt, layer::SubscriberExt, EnvFilter, util::SubscriberInitExt};

pub fn init_tracing(default_directive: impl Into<Directive>) {
    if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        init_structured(default_directive);
        tracing::trace!("structured (OTEL) tracing init complete");
    } else {
        init_default(default_directive);
        tracing::trace!("default tracing init complete");
    }
}

fn init_default(default_directive: impl Into<Directive>) {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(default_directive.into())
                .from_env_lossy(),
        )
        .init();
}

fn resource() -> Resource {
    Resource::builder()
        .with_attribute(KeyValue::new(SERVICE_NAME, "cloudpin"))
        .build()
}

fn init_structured(default_directive: impl Into<Directive>) {
    let span_exporter = SpanExporter::builder()
        .with_http()
        .build()
        .expect("build OTLP span exporter");

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(span_exporter)
        .with_resource(resource())
        .build();
    let tracer = tracer_provider.tracer("cloudpin-cli");

    let metric_exporter = MetricExporter::builder()
        .with_http()
        .build()
        .expect("build OTLP metric exporter");
    let meter_provider = SdkMeterProvider::builder()
        .with_periodic_exporter(metric_exporter)
        .with_resource(resource())
        .build();
    opentelemetry::global::set_meter_provider(meter_provider);

    let telemetry = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry()
        .with(telemetry)
        .with(
            fmt::Layer::new()
                .with_ansi(std::io::stderr().is_terminal())
                .with_writer(std::io::stderr)
                .json()
                .flatten_event(true),
        )
        .with(
            EnvFilter::builder()
                .with_default_directive(default_directive.into())
                .from_env_lossy(),
        )
        .init();
}
