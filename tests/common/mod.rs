// This file is Copyright its original authors, visible in version control history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. You may not use this file except in
// accordance with one or both of these licenses.

#![cfg(test)]
#![allow(dead_code)]

pub(crate) mod logging;

use logging::MockLogWriter;

use bitkit_core::chain::{ActivityLedger, BroadcastRejection, ChainSource, LightningNode};
use bitkit_core::config::Config;
use bitkit_core::logger::LogWriter;
use bitkit_core::types::{
	ChannelDetails, ChannelId, ClaimableBalance, ConfirmationStatus, OnchainBalance,
	PendingPayment, PendingTransfer, TxInputDetails, TxOutputDetails, Utxo, WalletContext,
	WalletTransaction,
};
use bitkit_core::{
	BoostedTransaction, Builder, Error, FeeEstimates, SettlementEventHandler, SettlementOutcome,
	TransactionDraft, WalletCore,
};

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::transaction::Version;
use bitcoin::{OutPoint, ScriptBuf, Sequence, Transaction, TxIn, Txid, WPubkeyHash, Witness};
use tokio::sync::{Notify, Semaphore};
use tokio::time::Instant;

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub(crate) fn p2wpkh_script(byte: u8) -> ScriptBuf {
	ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([byte; 20]))
}

pub(crate) fn txid(byte: u8) -> Txid {
	Txid::from_byte_array([byte; 32])
}

pub(crate) fn channel_id(byte: u8) -> ChannelId {
	ChannelId([byte; 32])
}

pub(crate) const WALLET_SCRIPT: u8 = 1;
pub(crate) const RECIPIENT_SCRIPT: u8 = 2;
pub(crate) const CHANGE_SCRIPT: u8 = 3;

pub(crate) fn ready_channel(id: u8, value: u64, balance: u64, outbound: u64) -> ChannelDetails {
	ChannelDetails {
		channel_id: channel_id(id),
		channel_value_sats: value,
		balance_sats: balance,
		outbound_capacity_sats: outbound,
		inbound_capacity_sats: value - balance,
		unspendable_punishment_reserve_sats: Some(balance - outbound),
		is_channel_ready: true,
	}
}

/// An unconfirmed payment of `sent` sats from a single wallet input of `input` sats, returning
/// `change` sats to the wallet.
pub(crate) fn sent_transaction(
	id: Txid, input: u64, sent: u64, change: u64, vsize: u64,
) -> WalletTransaction {
	WalletTransaction {
		txid: id,
		inputs: vec![TxInputDetails {
			previous_output: OutPoint { txid: txid(0), vout: 0 },
			value_sats: input,
			script_pubkey: p2wpkh_script(WALLET_SCRIPT),
			is_mine: true,
		}],
		outputs: vec![
			TxOutputDetails {
				vout: 0,
				value_sats: sent,
				script_pubkey: p2wpkh_script(RECIPIENT_SCRIPT),
				is_mine: false,
			},
			TxOutputDetails {
				vout: 1,
				value_sats: change,
				script_pubkey: p2wpkh_script(WALLET_SCRIPT),
				is_mine: true,
			},
		],
		fee_sats: input - sent - change,
		vsize,
		confirmation_status: ConfirmationStatus::Unconfirmed,
		signals_rbf: true,
	}
}

pub(crate) fn utxo_of(tx: &WalletTransaction, vout: u32) -> Utxo {
	let output = tx.outputs.iter().find(|o| o.vout == vout).unwrap();
	Utxo {
		outpoint: OutPoint { txid: tx.txid, vout },
		value_sats: output.value_sats,
		script_pubkey: output.script_pubkey.clone(),
		is_confirmed: false,
	}
}

pub(crate) struct TestChainSource {
	pub onchain: Mutex<OnchainBalance>,
	pub claimable: Mutex<Vec<ClaimableBalance>>,
	pub transactions: Mutex<HashMap<Txid, WalletTransaction>>,
	pub utxos: Mutex<Vec<Utxo>>,
	pub fees: Mutex<FeeEstimates>,
	pub built_drafts: Mutex<Vec<TransactionDraft>>,
	pub broadcasts: Mutex<Vec<Transaction>>,
	pub broadcast_rejections: Mutex<VecDeque<BroadcastRejection>>,
	pub broadcast_gate: Mutex<Option<Arc<Semaphore>>>,
	pub broadcast_started: Notify,
	pub drop_outputs_when_building: AtomicBool,
}

impl TestChainSource {
	pub(crate) fn new() -> Self {
		Self {
			onchain: Mutex::new(OnchainBalance::default()),
			claimable: Mutex::new(Vec::new()),
			transactions: Mutex::new(HashMap::new()),
			utxos: Mutex::new(Vec::new()),
			fees: Mutex::new(FeeEstimates { minimum: 1, slow: 5, normal: 10, fast: 20 }),
			built_drafts: Mutex::new(Vec::new()),
			broadcasts: Mutex::new(Vec::new()),
			broadcast_rejections: Mutex::new(VecDeque::new()),
			broadcast_gate: Mutex::new(None),
			broadcast_started: Notify::new(),
			drop_outputs_when_building: AtomicBool::new(false),
		}
	}

	pub(crate) fn add_transaction(&self, tx: WalletTransaction) {
		self.transactions.lock().unwrap().insert(tx.txid, tx);
	}

	pub(crate) fn add_utxo(&self, utxo: Utxo) {
		let mut onchain = self.onchain.lock().unwrap();
		onchain.unconfirmed_sats += utxo.value_sats;
		self.utxos.lock().unwrap().push(utxo);
	}

	pub(crate) fn confirm(&self, id: &Txid, height: u32) {
		if let Some(tx) = self.transactions.lock().unwrap().get_mut(id) {
			tx.confirmation_status = ConfirmationStatus::Confirmed { height };
		}
	}

	pub(crate) fn reject_next_broadcast(&self, reason: &str) {
		self.broadcast_rejections.lock().unwrap().push_back(BroadcastRejection::new(reason));
	}
}

impl ChainSource for TestChainSource {
	fn onchain_balance(&self) -> OnchainBalance {
		*self.onchain.lock().unwrap()
	}

	fn claimable_balances(&self) -> Vec<ClaimableBalance> {
		self.claimable.lock().unwrap().clone()
	}

	fn get_transaction<'a>(
		&'a self, txid: &'a Txid,
	) -> Pin<Box<dyn Future<Output = Result<Option<WalletTransaction>, Error>> + Send + 'a>> {
		Box::pin(async move { Ok(self.transactions.lock().unwrap().get(txid).cloned()) })
	}

	fn list_utxos<'a>(
		&'a self,
	) -> Pin<Box<dyn Future<Output = Result<Vec<Utxo>, Error>> + Send + 'a>> {
		Box::pin(async move { Ok(self.utxos.lock().unwrap().clone()) })
	}

	fn fee_estimates<'a>(
		&'a self,
	) -> Pin<Box<dyn Future<Output = Result<FeeEstimates, Error>> + Send + 'a>> {
		Box::pin(async move { Ok(*self.fees.lock().unwrap()) })
	}

	fn change_script<'a>(
		&'a self,
	) -> Pin<Box<dyn Future<Output = Result<ScriptBuf, Error>> + Send + 'a>> {
		Box::pin(async move { Ok(p2wpkh_script(CHANGE_SCRIPT)) })
	}

	fn build_transaction<'a>(
		&'a self, draft: &'a TransactionDraft,
	) -> Pin<Box<dyn Future<Output = Result<Transaction, Error>> + Send + 'a>> {
		Box::pin(async move {
			self.built_drafts.lock().unwrap().push(draft.clone());
			let mut output = draft.outputs.clone();
			if self.drop_outputs_when_building.load(Ordering::Acquire) {
				output.truncate(1);
				output[0].value = output[0].value / 2;
			}
			Ok(Transaction {
				version: Version::TWO,
				lock_time: LockTime::ZERO,
				input: draft
					.inputs
					.iter()
					.map(|i| TxIn {
						previous_output: i.outpoint,
						script_sig: ScriptBuf::new(),
						sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
						witness: Witness::new(),
					})
					.collect(),
				output,
			})
		})
	}

	fn broadcast_transaction<'a>(
		&'a self, tx: &'a Transaction,
	) -> Pin<Box<dyn Future<Output = Result<(), BroadcastRejection>> + Send + 'a>> {
		Box::pin(async move {
			self.broadcast_started.notify_one();
			let gate = self.broadcast_gate.lock().unwrap().clone();
			if let Some(gate) = gate {
				let _permit = gate.acquire().await;
			}
			if let Some(rejection) = self.broadcast_rejections.lock().unwrap().pop_front() {
				return Err(rejection);
			}
			self.broadcasts.lock().unwrap().push(tx.clone());
			Ok(())
		})
	}
}

pub(crate) struct TestLightningNode {
	pub channels: Mutex<Vec<ChannelDetails>>,
	pub close_results: Mutex<VecDeque<Result<Vec<ChannelId>, Error>>>,
	pub remaining_after_close: Mutex<Vec<ChannelId>>,
	pub close_calls: Mutex<Vec<(bool, Instant)>>,
}

impl TestLightningNode {
	pub(crate) fn new() -> Self {
		Self {
			channels: Mutex::new(Vec::new()),
			close_results: Mutex::new(VecDeque::new()),
			remaining_after_close: Mutex::new(Vec::new()),
			close_calls: Mutex::new(Vec::new()),
		}
	}

	pub(crate) fn cooperative_close_calls(&self) -> Vec<Instant> {
		self.close_calls.lock().unwrap().iter().filter(|(f, _)| !f).map(|(_, t)| *t).collect()
	}

	pub(crate) fn force_close_calls(&self) -> usize {
		self.close_calls.lock().unwrap().iter().filter(|(f, _)| *f).count()
	}
}

impl LightningNode for TestLightningNode {
	fn list_channels(&self) -> Vec<ChannelDetails> {
		self.channels.lock().unwrap().clone()
	}

	fn close_channels<'a>(
		&'a self, force: bool,
	) -> Pin<Box<dyn Future<Output = Result<Vec<ChannelId>, Error>> + Send + 'a>> {
		Box::pin(async move {
			self.close_calls.lock().unwrap().push((force, Instant::now()));
			if let Some(res) = self.close_results.lock().unwrap().pop_front() {
				return res;
			}
			Ok(self.remaining_after_close.lock().unwrap().clone())
		})
	}
}

#[derive(Default)]
pub(crate) struct TestLedger {
	pub transfers: Mutex<Vec<PendingTransfer>>,
	pub payments: Mutex<Vec<PendingPayment>>,
	pub boosted: Mutex<Vec<BoostedTransaction>>,
}

impl ActivityLedger for TestLedger {
	fn pending_transfers(&self) -> Vec<PendingTransfer> {
		self.transfers.lock().unwrap().clone()
	}

	fn pending_payments(&self) -> Vec<PendingPayment> {
		self.payments.lock().unwrap().clone()
	}

	fn transaction_boosted(&self, boosted: &BoostedTransaction) {
		self.boosted.lock().unwrap().push(boosted.clone());
	}
}

#[derive(Default)]
pub(crate) struct TestEventHandler {
	pub outcomes: Mutex<Vec<(WalletContext, SettlementOutcome)>>,
}

impl TestEventHandler {
	pub(crate) fn outcomes(&self) -> Vec<SettlementOutcome> {
		self.outcomes.lock().unwrap().iter().map(|(_, o)| *o).collect()
	}
}

impl SettlementEventHandler for TestEventHandler {
	fn on_settlement_outcome(&self, context: &WalletContext, outcome: SettlementOutcome) {
		self.outcomes.lock().unwrap().push((context.clone(), outcome));
	}
}

pub(crate) enum TestLogWriter {
	FileWriter,
	LogFacade,
	Custom(Arc<dyn LogWriter>),
}

pub(crate) struct TestHarness {
	pub core: WalletCore,
	pub chain_source: Arc<TestChainSource>,
	pub lightning_node: Arc<TestLightningNode>,
	pub ledger: Arc<TestLedger>,
	pub event_handler: Arc<TestEventHandler>,
	pub log_writer: Arc<MockLogWriter>,
}

pub(crate) fn setup_core(config: Config) -> TestHarness {
	let log_writer = MockLogWriter::new();
	setup_core_with_logger(config, TestLogWriter::Custom(log_writer.clone()), log_writer)
}

pub(crate) fn setup_core_with_logger(
	config: Config, test_log_writer: TestLogWriter, log_writer: Arc<MockLogWriter>,
) -> TestHarness {
	let chain_source = Arc::new(TestChainSource::new());
	let lightning_node = Arc::new(TestLightningNode::new());
	let ledger = Arc::new(TestLedger::default());
	let event_handler = Arc::new(TestEventHandler::default());

	let mut builder = Builder::from_config(config);
	match test_log_writer {
		TestLogWriter::FileWriter => {
			let path = std::env::temp_dir()
				.join(format!("bitkit_core_test_{}", rand::random::<u64>()))
				.join("bitkit_core.log");
			builder.set_filesystem_logger(Some(path.to_string_lossy().to_string()), None);
		},
		TestLogWriter::LogFacade => {
			builder.set_log_facade_logger();
		},
		TestLogWriter::Custom(custom) => {
			builder.set_custom_logger(custom);
		},
	}
	builder.set_wallet_context("wallet0".to_string(), bitcoin::Network::Regtest);
	builder.set_settlement_event_handler(event_handler.clone());

	let core = builder
		.build(chain_source.clone(), lightning_node.clone(), ledger.clone())
		.unwrap();

	TestHarness { core, chain_source, lightning_node, ledger, event_handler, log_writer }
}
