//! Log output wiring for the server binary.
//!
//! Two concerns live here: the line format of the operator console, and the
//! subscriber bootstrap that decides where diagnostics go for a process
//! that runs until interrupted.

use colored::Colorize;
use std::fmt;
use std::io;
use std::path::Path;
use std::time::Instant;
use tracing::{Event, Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;

use mcp_serve::cli::Args;

/// Console line format for the server's operator output.
///
/// A long-running server is read as a timeline, so every line leads with
/// seconds since process start and a severity tag. Only the tag is colored;
/// message text stays plain so copied excerpts remain readable. Debug and
/// trace lines also name the emitting module, which is what an operator
/// filters on when chasing one subsystem (transport, session, tasks).
pub struct ConsoleFormat {
    started: Instant,
}

impl ConsoleFormat {
    fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl<S, N> FormatEvent<S, N> for ConsoleFormat
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
        let elapsed = self.started.elapsed();
        let stamp = format!("{:>5}.{:03}", elapsed.as_secs(), elapsed.subsec_millis());

        let level = *event.metadata().level();
        let tag = match level {
            Level::ERROR => "error".red().bold(),
            Level::WARN => "warn ".yellow(),
            Level::INFO => "info ".green(),
            Level::DEBUG => "debug".cyan(),
            Level::TRACE => "trace".dimmed(),
        };
        write!(writer, "{} {} ", stamp.dimmed(), tag)?;

        if level >= Level::DEBUG {
            write!(writer, "{} ", event.metadata().target().dimmed())?;
        }

        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Keeps the background file writer alive.
///
/// Dropping the guard flushes buffered lines, so it must outlive every
/// `tracing` call; `main` holds it until the process exits.
pub struct LogGuard {
    _file_writer: Option<WorkerGuard>,
}

/// Wire up the tracing subscriber.
///
/// The operator console writes to stdout through [`ConsoleFormat`] unless
/// `--quiet` suppresses it. Detailed diagnostics are opt-in via
/// `--log-file`: `stderr` for interactive debugging, or a plain file fed
/// through a non-blocking worker so a slow disk never stalls a session.
/// Repeated `-v` flags raise both layers from info to debug to trace.
pub fn init(args: &Args) -> LogGuard {
    let level = match args.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    let console = if args.quiet {
        None
    } else {
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stdout)
                .event_format(ConsoleFormat::new())
                .with_filter(level),
        )
    };

    let mut file_guard = None;
    let detail = args.log_file.as_deref().map(|destination| {
        if destination == "stderr" {
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_filter(level)
                .boxed()
        } else {
            let target = Path::new(destination);
            let directory = target
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = target
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("mcp-serve.log"));
            let (writer, guard) = tracing_appender::non_blocking(
                tracing_appender::rolling::never(directory, file_name),
            );
            file_guard = Some(guard);
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(level)
                .boxed()
        }
    });

    tracing_subscriber::registry()
        .with(console)
        .with(detail)
        .init();

    LogGuard {
        _file_writer: file_guard,
    }
}
