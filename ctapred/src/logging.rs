//! env_logger setup shared by the binaries.
//!
//! Log lines go to stderr and are also appended to a run log in the output directory, so
//! repeated runs against the same directory accumulate a history.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use env_logger::{Env, Target};
use log::{debug, info, log, Level};

use crate::error::Result;

/// Writes everything to stderr and, when present, to a file.
pub struct Tee {
    file: Option<File>,
}

impl Tee {

    pub fn new(file: Option<File>) -> Self {
        Self { file }
    }
}

impl Write for Tee {

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {

        io::stderr().write_all(buf)?;
        if let Some(file) = self.file.as_mut() {
            file.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {

        io::stderr().flush()?;
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

/// Initialises logging at `info` unless `RUST_LOG` says otherwise. A second call is a no-op.
pub fn init(run_log: Option<&Path>) -> Result<()> {

    let file = match run_log {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Some(OpenOptions::new().create(true).append(true).open(path)?)
        },
        None => None,
    };

    let result = env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .target(Target::Pipe(Box::new(Tee::new(file))))
        .try_init();

    if result.is_err() {
        debug!("logger already initialised");
    }

    Ok(())
}

/// Logs the command line that started this run.
pub fn log_command_line() {

    let args: Vec<String> = std::env::args().collect();
    info!("started: {}", args.join(" "));
}

/// The closing line of a run, for successful and failed runs alike.
pub fn finish_line<T, E: fmt::Display>(elapsed: Duration, result: &std::result::Result<T, E>) -> (Level, String) {

    match result {
        Ok(_) => (Level::Info, format!("finished in {:.1}s", elapsed.as_secs_f64())),
        Err(e) => (Level::Error, format!("failed after {:.1}s: {}", elapsed.as_secs_f64(), e)),
    }
}

pub fn log_finish<T, E: fmt::Display>(elapsed: Duration, result: &std::result::Result<T, E>) {

    let (level, line) = finish_line(elapsed, result);
    log!(level, "{}", line);
}
