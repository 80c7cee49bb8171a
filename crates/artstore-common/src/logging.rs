//! Structured console log formatter shared by all services.
//!
//! Mirrors the teacher's `[timestamp] [service] [level] message` layout so
//! logs from all four ArtStore services interleave legibly in one stream.

use std::fmt;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

const SERVICE_NAME_WIDTH: usize = 16;

/// Formatter tagging every line with the owning service name.
pub struct ArtStoreLogFormatter {
    service_name: String,
}

impl ArtStoreLogFormatter {
    /// Create a formatter for the given service name (e.g. `"storage-element"`).
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    fn format_service_name(&self) -> String {
        if self.service_name.len() > SERVICE_NAME_WIDTH {
            format!("{}…", &self.service_name[..SERVICE_NAME_WIDTH - 1])
        } else {
            format!("{:<width$}", self.service_name, width = SERVICE_NAME_WIDTH)
        }
    }
}

impl<S, N> FormatEvent<S, N> for ArtStoreLogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let now = chrono::Utc::now();
        let timestamp = now.format("%Y-%m-%dT%H:%M:%S%.3fZ");
        let level = event.metadata().level();

        write!(
            writer,
            "[{}] [{}] [{:<5}] ",
            timestamp,
            self.format_service_name(),
            level
        )?;

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Initialize the global tracing subscriber for a service.
pub fn init(service_name: &str, default_directive: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .event_format(ArtStoreLogFormatter::new(service_name.to_string()))
        .try_init();
}
