//! Trace context propagation for outgoing RPCs.
//!
//! Only compiled with the `otel` feature. The current `tracing` span's
//! OpenTelemetry context is written into the gRPC request metadata as W3C
//! `traceparent`/`tracestate` and `baggage` headers. Without an
//! OpenTelemetry layer installed in the subscriber the span context is empty
//! and nothing is injected.

use opentelemetry::global;
use opentelemetry::propagation::{Injector, TextMapCompositePropagator};
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use std::sync::Once;
use tonic::metadata::{MetadataKey, MetadataMap, MetadataValue};
use tracing_opentelemetry::OpenTelemetrySpanExt;

static INSTALL: Once = Once::new();

/// Install the trace-context + baggage propagator as the global one.
///
/// Runs once per process; later calls are no-ops.
pub fn install_propagator() {
    INSTALL.call_once(|| {
        global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
            Box::new(TraceContextPropagator::new()),
            Box::new(BaggagePropagator::new()),
        ]));
    });
}

struct MetadataInjector<'a>(&'a mut MetadataMap);

impl Injector for MetadataInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        let Ok(key) = MetadataKey::from_bytes(key.as_bytes()) else {
            return;
        };
        let Ok(value) = MetadataValue::try_from(value.as_str()) else {
            return;
        };
        self.0.insert(key, value);
    }
}

/// Write the current span's context into `metadata`.
pub fn inject_context(metadata: &mut MetadataMap) {
    let context = tracing::Span::current().context();
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&context, &mut MetadataInjector(metadata));
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::baggage::BaggageExt;
    use opentelemetry::propagation::TextMapPropagator;
    use opentelemetry::trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState};
    use opentelemetry::{Context, KeyValue};

    #[test]
    fn test_injector_writes_trace_headers() {
        let span_context = SpanContext::new(
            TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap(),
            SpanId::from_hex("00f067aa0ba902b7").unwrap(),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        );
        let context = Context::new()
            .with_remote_span_context(span_context)
            .with_baggage(vec![KeyValue::new("tenant", "acme")]);

        let propagator = TextMapCompositePropagator::new(vec![
            Box::new(TraceContextPropagator::new()),
            Box::new(BaggagePropagator::new()),
        ]);
        let mut metadata = MetadataMap::new();
        propagator.inject_context(&context, &mut MetadataInjector(&mut metadata));

        assert_eq!(
            metadata.get("traceparent").unwrap(),
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"
        );
        assert_eq!(metadata.get("baggage").unwrap(), "tenant=acme");
    }

    #[test]
    fn test_inject_without_active_span_is_harmless() {
        install_propagator();
        install_propagator();
        let mut metadata = MetadataMap::new();
        inject_context(&mut metadata);
        assert!(metadata.get("traceparent").is_none());
    }
}
