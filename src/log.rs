// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

use std::env;
use std::fs::File;
use std::io;
use std::sync::Once;

use simplelog::{ConfigBuilder, LevelFilter, SimpleLogger, WriteLogger};

static INIT: Once = Once::new();

/* Unknown names select everything */
fn trace_level(value: Option<String>) -> LevelFilter {
    match value {
        None => LevelFilter::Error,
        Some(l) => l.parse::<LevelFilter>().unwrap_or(LevelFilter::Trace),
    }
}

/// Sets up tracing from the environment, once per process.
///
/// TOKENPSS_TRACE selects the destination: "stdout", "stderr", or any
/// other value as a file name. Without it nothing is logged, and a file
/// that can't be created silently disables tracing.
///
/// TOKENPSS_TRACE_LEVEL takes off, error, warn, info, debug or trace and
/// defaults to error. Only records from this crate are emitted.
pub fn tokenpss_log_init() {
    INIT.call_once(|| {
        let target = match env::var("TOKENPSS_TRACE") {
            Ok(t) => t,
            Err(_) => return,
        };
        let level = trace_level(env::var("TOKENPSS_TRACE_LEVEL").ok());
        let config = ConfigBuilder::new()
            .add_filter_allow_str("tokenpss")
            .build();
        let _ = match target.as_str() {
            "stdout" => SimpleLogger::init(level, config),
            "stderr" => WriteLogger::init(level, config, io::stderr()),
            file_name => match File::create(file_name) {
                Ok(file) => WriteLogger::init(level, config, file),
                Err(_) => return,
            },
        };
    });
}
