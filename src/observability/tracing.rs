//! Distributed tracing support.
//!
//! # Responsibilities
//! - Decide per trace whether it is sampled (root spans only, children inherit)
//! - Assign trace and span ids to every span
//! - Ship finished spans to the configured exporter
//!
//! # Design Decisions
//! - Built on the same `tracing` spans used for logging; no second API
//! - The layer never blocks: finished spans go through an unbounded channel
//!   to an exporter task spawned once the runtime exists
//! - The exporter is flushed explicitly before the process exits

use std::collections::BTreeMap;
use std::io::Write;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::Subscriber;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use crate::config::{TraceExporter, TracingConfig};

/// Spans buffered before an export is forced.
const BATCH_SIZE: usize = 512;
/// Upper bound on how long a finished span waits for export.
const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const EXPORT_TIMEOUT: Duration = Duration::from_secs(10);

/// Probability sampler for root spans.
#[derive(Debug, Clone, Copy)]
pub struct Sampler {
    probability: f64,
}

impl Sampler {
    pub fn new(probability: f64) -> Self {
        let probability = if probability.is_nan() { 0.0 } else { probability.clamp(0.0, 1.0) };
        Self { probability }
    }

    pub fn sample(&self) -> bool {
        if self.probability >= 1.0 {
            true
        } else if self.probability <= 0.0 {
            false
        } else {
            fastrand::f64() < self.probability
        }
    }
}

/// Ids and sampling decision stored on every span.
#[derive(Debug, Clone, Copy)]
struct SpanContext {
    trace_id: u128,
    span_id: u64,
    sampled: bool,
}

/// Data collected for a sampled span until it closes.
struct PendingSpan {
    name: &'static str,
    target: &'static str,
    parent_span_id: Option<u64>,
    start: SystemTime,
    fields: FieldMap,
}

#[derive(Default)]
struct FieldMap(BTreeMap<String, Value>);

impl Visit for FieldMap {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.0.insert(field.name().to_string(), Value::String(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.0.insert(field.name().to_string(), json!(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.0.insert(field.name().to_string(), json!(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.0.insert(field.name().to_string(), json!(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.0.insert(field.name().to_string(), Value::Bool(value));
    }
}

/// A finished, sampled span.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanRecord {
    pub trace_id: String,
    pub span_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub name: String,
    pub target: String,
    pub start_unix_nanos: u64,
    pub end_unix_nanos: u64,
    pub attributes: BTreeMap<String, Value>,
}

enum Command {
    Export(SpanRecord),
    Flush(oneshot::Sender<()>),
}

/// `tracing_subscriber` layer that samples spans and hands finished ones to
/// the exporter task.
pub struct SpanExportLayer {
    sampler: Sampler,
    tx: mpsc::UnboundedSender<Command>,
}

impl<S> Layer<S> for SpanExportLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let parent = span.parent().and_then(|parent| {
            let extensions = parent.extensions();
            extensions.get::<SpanContext>().copied()
        });

        let context = match parent {
            Some(parent) => SpanContext {
                trace_id: parent.trace_id,
                span_id: fastrand::u64(1..),
                sampled: parent.sampled,
            },
            None => SpanContext {
                trace_id: fastrand::u128(1..),
                span_id: fastrand::u64(1..),
                sampled: self.sampler.sample(),
            },
        };

        let mut extensions = span.extensions_mut();
        if context.sampled {
            let mut fields = FieldMap::default();
            attrs.record(&mut fields);
            extensions.insert(PendingSpan {
                name: attrs.metadata().name(),
                target: attrs.metadata().target(),
                parent_span_id: parent.map(|p| p.span_id),
                start: SystemTime::now(),
                fields,
            });
        }
        extensions.insert(context);
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut extensions = span.extensions_mut();
        if let Some(pending) = extensions.get_mut::<PendingSpan>() {
            values.record(&mut pending.fields);
        }
    }

    fn on_close(&self, id: Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(&id) else {
            return;
        };
        let mut extensions = span.extensions_mut();
        let (Some(pending), Some(context)) = (
            extensions.remove::<PendingSpan>(),
            extensions.get_mut::<SpanContext>().copied(),
        ) else {
            return;
        };

        let record = SpanRecord {
            trace_id: format!("{:032x}", context.trace_id),
            span_id: format!("{:016x}", context.span_id),
            parent_span_id: pending.parent_span_id.map(|id| format!("{id:016x}")),
            name: pending.name.to_string(),
            target: pending.target.to_string(),
            start_unix_nanos: unix_nanos(pending.start),
            end_unix_nanos: unix_nanos(SystemTime::now()),
            attributes: pending.fields.0,
        };
        // Nothing to do if the exporter is gone.
        let _ = self.tx.send(Command::Export(record));
    }
}

fn unix_nanos(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Exporter side of the tracing pipeline, waiting to be started.
pub struct Tracer {
    config: TracingConfig,
    tx: mpsc::UnboundedSender<Command>,
    rx: mpsc::UnboundedReceiver<Command>,
}

impl Tracer {
    /// Build the exporter and the layer that feeds it.
    ///
    /// The layer can be installed before a runtime exists; spans queue up
    /// until [`Tracer::start`] is called.
    pub fn new(config: TracingConfig) -> (Self, SpanExportLayer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let layer = SpanExportLayer {
            sampler: Sampler::new(config.sampler_probability),
            tx: tx.clone(),
        };
        (Self { config, tx, rx }, layer)
    }

    /// Spawn the exporter task. Must be called inside a tokio runtime.
    pub fn start(self) -> TracerHandle {
        let exporter = Exporter::from_config(&self.config);
        tracing::info!(
            exporter = ?self.config.exporter,
            endpoint = %self.config.endpoint,
            sampler_probability = self.config.sampler_probability,
            "Trace exporter started"
        );
        tokio::spawn(export_loop(self.rx, exporter));
        TracerHandle { tx: self.tx }
    }
}

/// Handle to a running exporter.
pub struct TracerHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl TracerHandle {
    /// Export everything finished so far and wait for it to be sent.
    pub async fn close(self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Command::Flush(ack)).is_err() {
            return;
        }
        if tokio::time::timeout(EXPORT_TIMEOUT, done).await.is_err() {
            tracing::warn!("Timed out flushing spans");
        }
    }
}

async fn export_loop(mut rx: mpsc::UnboundedReceiver<Command>, exporter: Exporter) {
    let mut batch = Vec::new();
    let mut ticker = tokio::time::interval(FLUSH_INTERVAL);

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Export(record)) => {
                    batch.push(record);
                    if batch.len() >= BATCH_SIZE {
                        exporter.export(std::mem::take(&mut batch)).await;
                    }
                }
                Some(Command::Flush(ack)) => {
                    exporter.export(std::mem::take(&mut batch)).await;
                    let _ = ack.send(());
                }
                None => {
                    exporter.export(std::mem::take(&mut batch)).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                if !batch.is_empty() {
                    exporter.export(std::mem::take(&mut batch)).await;
                }
            }
        }
    }
}

enum Exporter {
    Stdout,
    Otlp {
        client: reqwest::Client,
        endpoint: String,
        service_name: String,
    },
}

impl Exporter {
    fn from_config(config: &TracingConfig) -> Self {
        match config.exporter {
            TraceExporter::Stdout => Exporter::Stdout,
            TraceExporter::Jaeger => Exporter::Otlp {
                client: reqwest::Client::new(),
                endpoint: config.endpoint.clone(),
                service_name: config.service_name.clone(),
            },
        }
    }

    async fn export(&self, batch: Vec<SpanRecord>) {
        if batch.is_empty() {
            return;
        }
        match self {
            Exporter::Stdout => {
                let mut out = std::io::stdout().lock();
                for record in &batch {
                    if let Ok(line) = serde_json::to_string(record) {
                        let _ = writeln!(out, "{line}");
                    }
                }
                let _ = out.flush();
            }
            Exporter::Otlp {
                client,
                endpoint,
                service_name,
            } => {
                let body = otlp_body(&batch, service_name);
                let result = client
                    .post(endpoint.as_str())
                    .timeout(EXPORT_TIMEOUT)
                    .json(&body)
                    .send()
                    .await;
                match result {
                    Ok(response) if response.status().is_success() => {
                        tracing::debug!(spans = batch.len(), "Exported spans");
                    }
                    Ok(response) => {
                        tracing::warn!(status = %response.status(), spans = batch.len(), "Span export rejected");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, spans = batch.len(), "Span export failed");
                    }
                }
            }
        }
    }
}

/// Encode spans as an OTLP/HTTP JSON `ExportTraceServiceRequest`.
fn otlp_body(batch: &[SpanRecord], service_name: &str) -> Value {
    let spans: Vec<Value> = batch
        .iter()
        .map(|record| {
            let attributes: Vec<Value> = record
                .attributes
                .iter()
                .map(|(key, value)| json!({ "key": key, "value": otlp_value(value) }))
                .collect();
            json!({
                "traceId": record.trace_id,
                "spanId": record.span_id,
                "parentSpanId": record.parent_span_id.clone().unwrap_or_default(),
                "name": record.name,
                "kind": 1,
                "startTimeUnixNano": record.start_unix_nanos.to_string(),
                "endTimeUnixNano": record.end_unix_nanos.to_string(),
                "attributes": attributes,
            })
        })
        .collect();

    json!({
        "resourceSpans": [{
            "resource": {
                "attributes": [
                    { "key": "service.name", "value": { "stringValue": service_name } }
                ]
            },
            "scopeSpans": [{
                "scope": { "name": "observatorium", "version": env!("CARGO_PKG_VERSION") },
                "spans": spans,
            }]
        }]
    })
}

fn otlp_value(value: &Value) -> Value {
    match value {
        Value::Bool(b) => json!({ "boolValue": b }),
        Value::Number(n) if n.is_i64() || n.is_u64() => json!({ "intValue": n.to_string() }),
        Value::Number(n) => json!({ "doubleValue": n.as_f64() }),
        Value::String(s) => json!({ "stringValue": s }),
        other => json!({ "stringValue": other.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn config(probability: f64) -> TracingConfig {
        TracingConfig {
            exporter: TraceExporter::Stdout,
            sampler_probability: probability,
            ..TracingConfig::default()
        }
    }

    fn drain(tracer: &mut Tracer) -> Vec<SpanRecord> {
        let mut records = Vec::new();
        while let Ok(command) = tracer.rx.try_recv() {
            if let Command::Export(record) = command {
                records.push(record);
            }
        }
        records
    }

    #[test]
    fn sampler_bounds() {
        assert!(Sampler::new(1.0).sample());
        assert!(Sampler::new(7.0).sample());
        assert!(!Sampler::new(0.0).sample());
        assert!(!Sampler::new(-1.0).sample());
        assert!(!Sampler::new(f64::NAN).sample());
    }

    #[test]
    fn children_share_the_root_trace() {
        let (mut tracer, layer) = Tracer::new(config(1.0));
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            let root = tracing::info_span!("request", method = "GET");
            let _entered = root.enter();
            let child = tracing::info_span!("upstream", status = tracing::field::Empty);
            child.record("status", 200_u64);
            drop(child);
        });

        let records = drain(&mut tracer);
        assert_eq!(records.len(), 2);
        let child = &records[0];
        let root = &records[1];
        assert_eq!(child.name, "upstream");
        assert_eq!(root.name, "request");
        assert_eq!(child.trace_id, root.trace_id);
        assert_eq!(child.parent_span_id.as_deref(), Some(root.span_id.as_str()));
        assert!(root.parent_span_id.is_none());
        assert_eq!(child.attributes.get("status"), Some(&json!(200)));
        assert_eq!(root.attributes.get("method"), Some(&json!("GET")));
    }

    #[test]
    fn unsampled_traces_are_not_exported() {
        let (mut tracer, layer) = Tracer::new(config(0.0));
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            let root = tracing::info_span!("request");
            let _entered = root.enter();
            let _child = tracing::info_span!("upstream");
        });

        assert!(drain(&mut tracer).is_empty());
    }

    #[test]
    fn otlp_body_carries_service_and_spans() {
        let record = SpanRecord {
            trace_id: format!("{:032x}", 1),
            span_id: format!("{:016x}", 2),
            parent_span_id: None,
            name: "request".to_string(),
            target: "observatorium".to_string(),
            start_unix_nanos: 10,
            end_unix_nanos: 20,
            attributes: BTreeMap::from([("status".to_string(), json!(200))]),
        };

        let body = otlp_body(&[record], "gateway");
        let resource = &body["resourceSpans"][0];
        assert_eq!(resource["resource"]["attributes"][0]["value"]["stringValue"], "gateway");
        let span = &resource["scopeSpans"][0]["spans"][0];
        assert_eq!(span["name"], "request");
        assert_eq!(span["endTimeUnixNano"], "20");
        assert_eq!(span["attributes"][0]["value"]["intValue"], "200");
    }

    #[tokio::test]
    async fn close_flushes_pending_spans() {
        let (tracer, layer) = Tracer::new(config(1.0));
        let handle = tracer.start();
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            let _span = tracing::info_span!("short");
        });

        tokio::time::timeout(Duration::from_secs(1), handle.close())
            .await
            .expect("flush should be acknowledged");
    }
}
