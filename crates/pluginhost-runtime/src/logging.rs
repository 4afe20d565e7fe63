//! Logging setup for the plugin runtime, built on `tracing` and
//! `tracing-subscriber`.
//!
//! ```rust,ignore
//! use pluginhost_runtime::logging::{LoggingBuilder, SpanEvents};
//!
//! LoggingBuilder::new()
//!     .directive("pluginhost_runtime=debug")
//!     .span_events(SpanEvents::LIFECYCLE)
//!     .init();
//! ```

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Controls when span lifecycle events are logged — useful for watching a
/// plugin's load/activate/deactivate/unload hooks run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpanEvents {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

impl SpanEvents {
    pub const NONE: Self = Self { new: false, enter: false, exit: false, close: false };
    pub const LIFECYCLE: Self = Self { new: true, enter: false, exit: false, close: true };
    pub const FULL: Self = Self { new: true, enter: true, exit: true, close: true };
    pub const ACTIVE: Self = Self { new: false, enter: true, exit: true, close: false };

    fn to_fmt_span(self) -> fmt::format::FmtSpan {
        let mut span = fmt::format::FmtSpan::NONE;
        if self.new {
            span |= fmt::format::FmtSpan::NEW;
        }
        if self.enter {
            span |= fmt::format::FmtSpan::ENTER;
        }
        if self.exit {
            span |= fmt::format::FmtSpan::EXIT;
        }
        if self.close {
            span |= fmt::format::FmtSpan::CLOSE;
        }
        span
    }
}

/// Initializes logging with sensible defaults for the plugin runtime
/// (`pluginhost_runtime=info`, `pluginhost_core=debug`).
///
/// # Panics
/// Panics if a subscriber has already been set.
pub fn init() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(default_filter())
        .init();
}

/// As [`init`], but returns an error instead of panicking if a subscriber
/// is already installed.
pub fn try_init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(default_filter())
        .try_init()
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
}

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info")
            .add_directive("pluginhost_runtime=info".parse().unwrap())
            .add_directive("pluginhost_core=debug".parse().unwrap())
    })
}

/// Builder for customized logging setup.
#[derive(Default)]
pub struct LoggingBuilder {
    directives: Vec<String>,
    level: Option<tracing::Level>,
    span_events: SpanEvents,
    with_target: bool,
    with_thread_ids: bool,
    with_file: bool,
    with_line_number: bool,
    #[cfg(feature = "json-logs")]
    json: bool,
}

impl LoggingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: tracing::Level) -> Self {
        self.level = Some(level);
        self
    }

    pub fn directive(mut self, directive: &str) -> Self {
        self.directives.push(directive.to_string());
        self
    }

    pub fn span_events(mut self, events: SpanEvents) -> Self {
        self.span_events = events;
        self
    }

    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    pub fn with_thread_ids(mut self, enabled: bool) -> Self {
        self.with_thread_ids = enabled;
        self
    }

    pub fn with_file(mut self, enabled: bool) -> Self {
        self.with_file = enabled;
        self
    }

    pub fn with_line_number(mut self, enabled: bool) -> Self {
        self.with_line_number = enabled;
        self
    }

    #[cfg(feature = "json-logs")]
    pub fn json(mut self) -> Self {
        self.json = true;
        self
    }

    fn build_filter(&self) -> EnvFilter {
        let base = self.level.map(|l| l.to_string().to_lowercase()).unwrap_or_else(|| "info".to_string());
        let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&base));
        for directive in &self.directives {
            if let Ok(d) = directive.parse() {
                filter = filter.add_directive(d);
            }
        }
        filter
    }

    fn build_fmt_layer<S>(&self) -> fmt::Layer<S>
    where
        S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    {
        fmt::layer()
            .with_span_events(self.span_events.to_fmt_span())
            .with_target(self.with_target)
            .with_thread_ids(self.with_thread_ids)
            .with_file(self.with_file)
            .with_line_number(self.with_line_number)
    }

    pub fn init(self) {
        let filter = self.build_filter();

        #[cfg(feature = "json-logs")]
        if self.json {
            tracing_subscriber::registry()
                .with(fmt::layer().json().with_span_events(self.span_events.to_fmt_span()))
                .with(filter)
                .init();
            return;
        }

        tracing_subscriber::registry().with(self.build_fmt_layer()).with(filter).init();
    }
}
