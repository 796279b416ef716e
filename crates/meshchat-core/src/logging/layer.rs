//! JSONL event sink
//!
//! One append-only file per device and day; every line is a self-contained
//! [`LogLine`], so `jq` works on the raw files.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    /// RFC 3339, millisecond precision
    pub ts: String,
    pub level: String,
    pub device: String,
    pub target: String,
    pub msg: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<String>,
}

pub struct JsonlLayer {
    device: String,
    path: PathBuf,
    out: Mutex<BufWriter<File>>,
}

impl JsonlLayer {
    pub fn new(dir: impl AsRef<Path>, device: impl Into<String>) -> std::io::Result<Self> {
        let device = device.into();
        fs::create_dir_all(dir.as_ref())?;
        let path = dir.as_ref().join(format!(
            "{}_{}.jsonl",
            chrono::Local::now().format("%Y-%m-%d"),
            device
        ));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            device,
            path,
            out: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, line: &LogLine) -> std::io::Result<()> {
        let json = serde_json::to_string(line)?;
        let mut out = self.out.lock();
        writeln!(out, "{}", json)?;
        out.flush()
    }
}

impl<S> Layer<S> for JsonlLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let meta = event.metadata();
        let mut fields = FieldCollector::default();
        event.record(&mut fields);

        let span = ctx.event_scope(event).map(|scope| {
            scope
                .from_root()
                .map(|s| s.name())
                .collect::<Vec<_>>()
                .join(" > ")
        });

        let line = LogLine {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            level: meta.level().as_str().to_lowercase(),
            device: self.device.clone(),
            target: meta.target().to_string(),
            msg: fields.message.unwrap_or_default(),
            fields: fields.values,
            span: span.filter(|s| !s.is_empty()),
        };
        // a failing log sink must not take the caller down
        let _ = self.append(&line);
    }
}

#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    values: Map<String, Value>,
}

impl FieldCollector {
    fn put(&mut self, field: &Field, value: Value) {
        match (field.name(), value) {
            ("message", Value::String(s)) => self.message = Some(s),
            (name, value) => {
                self.values.insert(name.to_string(), value);
            }
        }
    }
}

impl Visit for FieldCollector {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.put(field, Value::String(format!("{:?}", value)));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, value.into());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.put(field, Value::String(value.to_string()));
    }
}
