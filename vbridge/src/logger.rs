//! `log` facade on top of an asynchronous logfmt `slog` drain.

use std::fs::{File, OpenOptions};
use std::io::{self, Stdout, Write};

use slog::{o, Drain, Record};
use slog_logfmt::Logfmt;

use vbridge_conf::logging::Log;
use vbridge_utils::{format_timestamp_millis, timestamp_millis};

use crate::{Error, Result};

pub use slog::Logger;

/// Build the root logger described by `cfg`.
pub fn config_logger(cfg: &Log) -> Result<Logger> {
    let drain = Logfmt::new(Sink::open(cfg)?)
        .set_prefix(|io: &mut dyn Write, rec: &Record| -> slog::Result {
            write!(
                io,
                "{} {} {}:{} | {}\t",
                format_timestamp_millis(timestamp_millis()),
                rec.level().as_short_str(),
                rec.module(),
                rec.line(),
                rec.msg(),
            )?;
            Ok(())
        })
        .build()
        .fuse()
        .filter_level(cfg.level.inner())
        .fuse();

    let drain = slog_async::Async::new(drain)
        .chan_size(16 * 1024)
        .overflow_strategy(slog_async::OverflowStrategy::DropAndReport)
        .build()
        .fuse();

    Ok(Logger::root(drain, o!()))
}

/// Install `logger` as the global `log` backend at `cfg.level`.
///
/// Fails if a global logger was already installed.
pub fn logger_init(logger: Logger, cfg: &Log) -> Result<()> {
    log::set_boxed_logger(Box::new(LogBridge(logger)))
        .map_err(|e| Error::Msg(format!("logger init error, {e}")))?;
    log::set_max_level(to_log_filter(cfg.level.inner()));
    Ok(())
}

struct LogBridge(Logger);

impl log::Log for LogBridge {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, r: &log::Record) {
        let location = slog::RecordLocation {
            file: r.file_static().unwrap_or("<unknown>"),
            line: r.line().unwrap_or_default(),
            column: 0,
            function: "",
            module: r.module_path_static().unwrap_or("<unknown>"),
        };
        let rs = slog::RecordStatic { location: &location, level: to_slog_level(r.level()), tag: r.target() };
        self.0.log(&Record::new(&rs, r.args(), slog::b!()));
    }

    fn flush(&self) {}
}

fn to_slog_level(level: log::Level) -> slog::Level {
    match level {
        log::Level::Error => slog::Level::Error,
        log::Level::Warn => slog::Level::Warning,
        log::Level::Info => slog::Level::Info,
        log::Level::Debug => slog::Level::Debug,
        log::Level::Trace => slog::Level::Trace,
    }
}

fn to_log_filter(level: slog::Level) -> log::LevelFilter {
    match level {
        slog::Level::Critical | slog::Level::Error => log::LevelFilter::Error,
        slog::Level::Warning => log::LevelFilter::Warn,
        slog::Level::Info => log::LevelFilter::Info,
        slog::Level::Debug => log::LevelFilter::Debug,
        slog::Level::Trace => log::LevelFilter::Trace,
    }
}

enum Sink {
    Off,
    Console(Stdout),
    File(File),
    Both(Stdout, File),
}

impl Sink {
    fn open(cfg: &Log) -> Result<Self> {
        let file = || -> Result<File> {
            let path = cfg.path().ok_or_else(|| Error::from("log.file is empty"))?;
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| Error::Msg(format!("cannot open log file {}, {e}", path.display())))
        };
        Ok(match (cfg.to.console(), cfg.to.file()) {
            (false, false) => Sink::Off,
            (true, false) => Sink::Console(io::stdout()),
            (false, true) => Sink::File(file()?),
            (true, true) => Sink::Both(io::stdout(), file()?),
        })
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sink::Off => Ok(buf.len()),
            Sink::Console(c) => c.write(buf),
            Sink::File(f) => f.write(buf),
            Sink::Both(c, f) => {
                c.write_all(buf)?;
                f.write(buf)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::Off => Ok(()),
            Sink::Console(c) => c.flush(),
            Sink::File(f) => f.flush(),
            Sink::Both(c, f) => {
                c.flush()?;
                f.flush()
            }
        }
    }
}
