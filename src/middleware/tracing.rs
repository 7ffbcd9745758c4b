use axum::{extract::Request, middleware::Next, response::Response};
use std::fmt;
use std::time::Instant;
use tracing::field::Field;
use tracing::Instrument;
use tracing_subscriber::field::Visit;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Installs the global `tracing` subscriber. Safe to call more than once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .fmt_fields(ColoredFields)
        .with_env_filter(filter)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        log::debug!("tracing subscriber already installed");
    }
}

pub async fn trace_requests(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();

    let span = tracing::info_span!(
        "request",
        method = %request.method(),
        uri = %request.uri(),
        request_id = %request_id,
    );

    async move {
        let started = Instant::now();
        let response = next.run(request).await;
        // For SSE this is time to first byte, not stream length.
        let elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(status = response.status().as_u16(), elapsed_ms, "request completed");
        response
    }
    .instrument(span)
    .await
}

pub struct ColoredFields;

impl<'writer> tracing_subscriber::fmt::FormatFields<'writer> for ColoredFields {
    fn format_fields<R: tracing_subscriber::field::RecordFields>(
        &self,
        writer: Writer<'writer>,
        fields: R,
    ) -> fmt::Result {
        let mut visitor = ColoredFieldVisitor::new(writer);
        fields.record(&mut visitor);
        visitor.finish()
    }
}

struct ColoredFieldVisitor<'writer> {
    writer: Writer<'writer>,
    is_first: bool,
    error: Option<fmt::Error>,
}

impl<'writer> ColoredFieldVisitor<'writer> {
    fn new(writer: Writer<'writer>) -> Self {
        Self {
            writer,
            is_first: true,
            error: None,
        }
    }

    fn finish(self) -> fmt::Result {
        match self.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn key_colors(name: &str) -> (&'static str, &'static str) {
        match name {
            "request_id" => ("\x1b[38;2;255;105;180m", "\x1b[36m"), // hot pink / cyan
            "stream_id" => ("\x1b[34m", "\x1b[31m"),
            "mode" => ("\x1b[33m", "\x1b[32m"),
            "status" => ("\x1b[1;31m", "\x1b[1;37m"),
            "uri" => ("\x1b[35m", "\x1b[1;36m"),
            "method" => ("\x1b[1;33m", "\x1b[36m"),
            _ => ("\x1b[90m", "\x1b[37m"),
        }
    }
}

impl<'writer> Visit for ColoredFieldVisitor<'writer> {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if self.error.is_some() {
            return;
        }

        let result = (|| {
            if !self.is_first {
                write!(self.writer, " ")?;
            }
            self.is_first = false;

            if field.name() == "message" {
                return write!(self.writer, "{:?}", value);
            }

            if self.writer.has_ansi_escapes() {
                let (key, val) = Self::key_colors(field.name());
                write!(self.writer, "{key}{}={val}{:?}\x1b[0m", field.name(), value)
            } else {
                write!(self.writer, "{}={:?}", field.name(), value)
            }
        })();

        if let Err(err) = result {
            self.error = Some(err);
        }
    }
}
