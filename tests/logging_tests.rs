// This file is Copyright its original authors, visible in version control history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. You may not use this file except in
// accordance with one or both of these licenses.

mod common;

use common::logging::{init_log_logger, validate_log_entry, MockLogWriter};
use common::{
	sent_transaction, setup_core_with_logger, txid, utxo_of, TestChainSource, TestLedger,
	TestLightningNode, TestLogWriter,
};

use bitkit_core::config::Config;
use bitkit_core::logger::LogLevel;
use bitkit_core::Builder;

use log::LevelFilter;

use std::fs;
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn log_facade_receives_core_records() {
	let facade_logger = init_log_logger(LevelFilter::Trace);
	let harness =
		setup_core_with_logger(Config::default(), TestLogWriter::LogFacade, MockLogWriter::new());

	let tx = sent_transaction(txid(1), 100_000, 50_000, 49_000, 141);
	harness.chain_source.add_transaction(tx.clone());
	harness.chain_source.add_utxo(utxo_of(&tx, 1));
	let session = harness.core.start_boost(&tx.txid).await.unwrap();
	harness.core.abandon_boost(session.handle).unwrap();

	let logs = facade_logger.retrieve_logs();
	assert!(!logs.is_empty());
	for entry in &logs {
		validate_log_entry(entry);
	}
	assert!(logs.iter().any(|e| e.level == "INFO" && e.message.starts_with("RBF analysis for")));
	assert!(logs.iter().any(|e| e.module_path == "bitkit_core::wallet::boost"));

	// Records go to the facade only.
	assert!(harness.log_writer.retrieve_logs().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn filesystem_logger_respects_max_level() {
	let dir = std::env::temp_dir().join(format!("bitkit_core_test_{}", rand::random::<u64>()));
	let path = dir.join("logs").join("bitkit_core.log");

	let mut builder = Builder::new();
	builder.set_filesystem_logger(Some(path.to_string_lossy().to_string()), Some(LogLevel::Info));
	let core = builder
		.build(
			Arc::new(TestChainSource::new()),
			Arc::new(TestLightningNode::new()),
			Arc::new(TestLedger::default()),
		)
		.unwrap();

	core.start_settlement_retry();
	core.cancel_settlement_retry();

	let contents = fs::read_to_string(&path).unwrap();
	assert!(contents.contains("INFO"));
	assert!(contents.contains("Cancelled settlement for wallet0/bitcoin"));
	assert!(!contents.contains("DEBUG"));

	drop(core);
	let _ = fs::remove_dir_all(dir);
}
