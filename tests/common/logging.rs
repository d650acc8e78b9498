// This file is Copyright its original authors, visible in version control history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. You may not use this file except in
// accordance with one or both of these licenses.

use bitkit_core::logger::{LogLevel, LogRecord, LogWriter};

use log::{Level as LogFacadeLevel, LevelFilter as LogFacadeLevelFilter, Log as LogFacadeLog};
use regex::Regex;

use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
	pub level: String,
	pub module_path: String,
	pub line: u32,
	pub message: String,
}

/// Collects records handed to a custom [`LogWriter`].
#[derive(Default)]
pub struct MockLogWriter {
	entries: Mutex<Vec<LogEntry>>,
}

impl MockLogWriter {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn retrieve_logs(&self) -> Vec<LogEntry> {
		self.entries.lock().unwrap().clone()
	}

	pub fn contains(&self, pattern: &str) -> bool {
		let re = Regex::new(pattern).unwrap();
		self.retrieve_logs().iter().any(|e| re.is_match(&e.message))
	}
}

impl LogWriter for MockLogWriter {
	fn log<'a>(&self, record: LogRecord<'a>) {
		let level = match record.level {
			LogLevel::Gossip => "GOSSIP",
			LogLevel::Trace => "TRACE",
			LogLevel::Debug => "DEBUG",
			LogLevel::Info => "INFO",
			LogLevel::Warn => "WARN",
			LogLevel::Error => "ERROR",
		};
		self.entries.lock().unwrap().push(LogEntry {
			level: level.to_string(),
			module_path: record.module_path.to_string(),
			line: record.line,
			message: record.args.to_string(),
		});
	}
}

/// Collects records forwarded to the `log` facade.
#[derive(Clone)]
pub struct MockLogFacadeLogger {
	entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl MockLogFacadeLogger {
	pub fn new() -> Self {
		Self { entries: Arc::new(Mutex::new(Vec::new())) }
	}

	pub fn retrieve_logs(&self) -> Vec<LogEntry> {
		self.entries.lock().unwrap().clone()
	}
}

impl LogFacadeLog for MockLogFacadeLogger {
	fn enabled(&self, _metadata: &log::Metadata) -> bool {
		true
	}

	fn log(&self, record: &log::Record) {
		let level = match record.level() {
			LogFacadeLevel::Error => "ERROR",
			LogFacadeLevel::Warn => "WARN",
			LogFacadeLevel::Info => "INFO",
			LogFacadeLevel::Debug => "DEBUG",
			LogFacadeLevel::Trace => "TRACE",
		};
		self.entries.lock().unwrap().push(LogEntry {
			level: level.to_string(),
			module_path: record.module_path().unwrap_or_default().to_string(),
			line: record.line().unwrap_or_default(),
			message: record.args().to_string(),
		});
	}

	fn flush(&self) {}
}

/// Installs a [`MockLogFacadeLogger`] as the global `log` logger. May only be called once per
/// test binary.
pub fn init_log_logger(level: LogFacadeLevelFilter) -> MockLogFacadeLogger {
	let logger = MockLogFacadeLogger::new();
	log::set_boxed_logger(Box::new(logger.clone())).unwrap();
	log::set_max_level(level);
	logger
}

pub fn validate_log_entry(entry: &LogEntry) {
	let level_re = Regex::new(r"^(GOSSIP|TRACE|DEBUG|INFO|WARN|ERROR)$").unwrap();
	assert!(level_re.is_match(&entry.level), "unexpected level: {}", entry.level);

	let module_re = Regex::new(r"^bitkit_core(::[a-z_]+)*$").unwrap();
	assert!(module_re.is_match(&entry.module_path), "unexpected module: {}", entry.module_path);

	assert!(entry.line > 0);
	assert!(!entry.message.is_empty());
}
