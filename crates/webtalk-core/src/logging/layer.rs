//! Tracing layer that writes events to JSONL files.

use std::fmt::Write as FmtWrite;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Record};
use tracing::{Event, Id, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use super::entry::JsonLogEntry;
use super::writer::InstanceLogWriter;

/// A tracing layer that appends every event to the instance's JSONL file.
///
/// Events inside a span carrying `room` / `peer` fields (as the room driver
/// task does) get those values lifted onto the entry.
pub struct JsonlLayer {
    writer: Arc<InstanceLogWriter>,
}

impl JsonlLayer {
    pub fn new(logs_dir: impl AsRef<Path>, instance: impl Into<String>) -> io::Result<Self> {
        let writer = InstanceLogWriter::new(logs_dir, instance)?;
        Ok(Self {
            writer: Arc::new(writer),
        })
    }

    pub fn log_path(&self) -> &Path {
        self.writer.path()
    }

    pub fn instance(&self) -> &str {
        self.writer.instance()
    }
}

/// Room context recorded on a span.
#[derive(Debug, Default, Clone)]
struct RoomContext {
    room: Option<String>,
    peer: Option<String>,
}

impl Visit for RoomContext {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "room" => self.room = Some(format!("{:?}", value)),
            "peer" => self.peer = Some(format!("{:?}", value)),
            _ => {}
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "room" => self.room = Some(value.to_string()),
            "peer" => self.peer = Some(value.to_string()),
            _ => {}
        }
    }
}

impl<S> Layer<S> for JsonlLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut context = RoomContext::default();
        attrs.record(&mut context);
        if context.room.is_some() || context.peer.is_some() {
            if let Some(span) = ctx.span(id) {
                span.extensions_mut().insert(context);
            }
        }
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id) {
            let mut extensions = span.extensions_mut();
            match extensions.get_mut::<RoomContext>() {
                Some(context) => values.record(context),
                None => {
                    let mut context = RoomContext::default();
                    values.record(&mut context);
                    extensions.insert(context);
                }
            }
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();

        let mut visitor = JsonVisitor::new();
        event.record(&mut visitor);

        let mut entry = JsonLogEntry::new(
            metadata.level().as_str().to_lowercase(),
            self.writer.instance(),
            metadata.target(),
            visitor.message.unwrap_or_default(),
        );

        if !visitor.fields.is_empty() {
            entry = entry.with_fields(serde_json::Value::Object(visitor.fields));
        }

        if let Some(scope) = ctx.event_scope(event) {
            let spans: Vec<_> = scope.collect();

            // Innermost span first.
            let context = spans
                .iter()
                .find_map(|span| span.extensions().get::<RoomContext>().cloned());
            if let Some(context) = context {
                entry = entry.with_room(context.room, context.peer);
            }

            let path: Vec<&str> = spans.iter().rev().map(|span| span.name()).collect();
            if !path.is_empty() {
                entry = entry.with_span(path.join(" > "));
            }
        }

        // Logging must never take the process down.
        let _ = self.writer.write(&entry);
    }
}

/// Visitor that collects an event's message and structured fields.
struct JsonVisitor {
    message: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
}

impl JsonVisitor {
    fn new() -> Self {
        Self {
            message: None,
            fields: serde_json::Map::new(),
        }
    }

    fn insert(&mut self, field: &Field, value: serde_json::Value) {
        self.fields.insert(field.name().to_string(), value);
    }
}

impl Visit for JsonVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let mut buf = String::new();
        let _ = write!(&mut buf, "{:?}", value);
        if field.name() == "message" {
            self.message = Some(buf);
        } else {
            self.insert(field, serde_json::Value::String(buf));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.insert(field, serde_json::Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.insert(field, serde_json::Value::Number(n));
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.insert(field, serde_json::Value::String(value.to_string()));
    }
}

/// Builder for the process-wide subscriber: console output, an env filter
/// and an optional JSONL layer.
pub struct LoggingBuilder {
    filter: String,
    console_output: bool,
    jsonl: Option<(PathBuf, String)>,
}

impl LoggingBuilder {
    /// Start with `filter` as the default directive (e.g. "webtalk=debug").
    ///
    /// `RUST_LOG` takes precedence when set.
    pub fn new(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            console_output: true,
            jsonl: None,
        }
    }

    /// Also append JSONL entries under `logs_dir` for `instance`.
    pub fn with_jsonl(mut self, logs_dir: impl Into<PathBuf>, instance: impl Into<String>) -> Self {
        self.jsonl = Some((logs_dir.into(), instance.into()));
        self
    }

    /// Disable console output.
    pub fn no_console(mut self) -> Self {
        self.console_output = false;
        self
    }

    /// Build the JSONL layer alone, for manual composition.
    pub fn build_layer(&self) -> io::Result<Option<JsonlLayer>> {
        self.jsonl
            .as_ref()
            .map(|(dir, instance)| JsonlLayer::new(dir, instance.clone()))
            .transpose()
    }

    /// Install the global subscriber. Returns the JSONL file path, if any.
    pub fn init(self) -> io::Result<Option<PathBuf>> {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.filter))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let jsonl = self.build_layer()?;
        let path = jsonl.as_ref().map(|layer| layer.log_path().to_path_buf());
        let console = self.console_output.then(|| {
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr)
        });

        tracing_subscriber::registry()
            .with(filter)
            .with(console)
            .with(jsonl)
            .try_init()
            .map_err(io::Error::other)?;

        Ok(path)
    }
}
