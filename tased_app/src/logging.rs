use once_cell::sync::OnceCell;
use std::{
    backtrace::Backtrace,
    fmt, fs, io,
    io::Write,
    panic::{self, PanicInfo},
    path::Path,
    sync::Mutex,
};
use tracing::{
    field::{Field, Visit},
    Event, Level, Subscriber,
};
use tracing_log::LogTracer;
use tracing_subscriber::{
    layer::Context, prelude::__tracing_subscriber_SubscriberExt, registry::LookupSpan, Layer,
};

static LOG_FILE: OnceCell<Mutex<fs::File>> = OnceCell::new();

/// Send log events to stderr and append them to `log_file_path`.
///
/// `verbose` includes debug events.
pub fn init(log_file_path: &Path, verbose: bool) -> io::Result<()> {
    let log_file = fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(log_file_path)?;
    if LOG_FILE.set(Mutex::new(log_file)).is_err() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "logging was already initialized",
        ));
    }

    panic::set_hook(Box::new(panic_hook));
    let max_level = if verbose { Level::DEBUG } else { Level::INFO };
    LogTracer::init().map_err(|error| io::Error::new(io::ErrorKind::Other, error))?;
    tracing::subscriber::set_global_default(
        tracing_subscriber::Registry::default().with(LogLayer { max_level }),
    )
    .map_err(|error| io::Error::new(io::ErrorKind::Other, error))
}

/// Append a line to the log file without printing it. Does nothing before [init].
pub fn print_to_log_file(line: &str) {
    let Some(log_file) = LOG_FILE.get() else {
        return;
    };
    let Ok(mut log_file) = log_file.lock() else {
        return;
    };
    // Write errors are ignored.
    let _ = writeln!(log_file, "{}", line).and_then(|_| log_file.flush());
}

fn log_callback(level: Level, message: &str) {
    let timestamp = chrono::Local::now()
        .format("%Y-%m-%d %H:%M:%S%.3f")
        .to_string();

    let line = format!("[{}] [{}] {}", timestamp, level, message);

    eprintln!("{}", line);
    print_to_log_file(&line);
}

#[allow(deprecated)]
fn panic_hook(info: &PanicInfo<'_>) {
    let location = info
        .location()
        .map_or_else(|| "<unknown>".to_string(), |location| location.to_string());
    let msg = match info.payload().downcast_ref::<&'static str>() {
        Some(s) => *s,
        None => match info.payload().downcast_ref::<String>() {
            Some(s) => &s[..],
            None => "Box<Any>",
        },
    };
    let backtrace = Backtrace::force_capture();

    tracing::error!("Panicked at {}: {}\n{}", location, msg, backtrace);
}

struct LogLayer {
    max_level: Level,
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    log_target: Option<String>,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "log.target" {
            self.log_target = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        }
    }
}

impl<S> Layer<S> for LogLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() > self.max_level {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let span = if let Some(scope) = ctx.event_scope(event) {
            format!(
                "[{}] ",
                scope
                    .from_root()
                    .map(|span| span.name())
                    .collect::<Vec<_>>()
                    .join(".")
            )
        } else {
            String::new()
        };

        let target = visitor
            .log_target
            .unwrap_or_else(|| metadata.target().to_string());

        let message = format!("{}[{}] {}", span, target, visitor.message);

        log_callback(*metadata.level(), &message);
    }
}
