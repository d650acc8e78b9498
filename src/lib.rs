// This file is Copyright its original authors, visible in version control history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. You may not use this file except in
// accordance with one or both of these licenses.

//! # Bitkit Core
//! The balance and settlement engine of a hybrid on-chain/Lightning wallet.
//!
//! The primary abstraction of the library is the [`WalletCore`], which can be retrieved by setting
//! up and configuring a [`Builder`] to your liking and calling [`build`]. [`WalletCore`] then
//! provides everything needed to:
//!
//! - derive an authoritative balance across on-chain funds and Lightning channels via
//!   [`balance_snapshot`],
//! - fee-bump stuck on-chain transactions via RBF or CPFP, starting with [`start_boost`],
//! - move funds back on-chain by cooperatively closing channels, retrying for a while before
//!   offering to force-close, via [`start_settlement_retry`].
//!
//! The core never holds keys or talks to the network itself. It relies on a [`ChainSource`], a
//! [`LightningNode`] and an [`ActivityLedger`] supplied by the application.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use bitkit_core::chain::{ActivityLedger, ChainSource, LightningNode};
//! use bitkit_core::Builder;
//!
//! # async fn example(
//! # 	chain_source: Arc<dyn ChainSource>, lightning_node: Arc<dyn LightningNode>,
//! # 	ledger: Arc<dyn ActivityLedger>,
//! # ) {
//! let core = Builder::new().build(chain_source, lightning_node, ledger).unwrap();
//!
//! let balance = core.balance_snapshot();
//! println!("Total balance: {} sats", balance.total_balance_sats);
//!
//! core.start_settlement_retry();
//! # }
//! ```
//!
//! [`build`]: Builder::build
//! [`balance_snapshot`]: WalletCore::balance_snapshot
//! [`start_boost`]: WalletCore::start_boost
//! [`start_settlement_retry`]: WalletCore::start_settlement_retry
//! [`ChainSource`]: chain::ChainSource
//! [`LightningNode`]: chain::LightningNode
//! [`ActivityLedger`]: chain::ActivityLedger

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]

pub mod balance;
mod builder;
pub mod chain;
pub mod config;
mod error;
mod fee_estimator;
pub mod logger;
mod settlement;
pub mod types;
mod wallet;

pub use bitcoin;
pub use lightning;

pub use balance::{
	BalanceDetails, BalanceSnapshot, ChannelBalance, ChannelInvariantViolation, LspChannelOptions,
	TransferLimits,
};
pub use builder::{BuildError, Builder};
pub use error::{Error, UserMessage};
pub use fee_estimator::{BoostType, FeeEstimates, FeeTier};
pub use settlement::{
	SettlementEventHandler, SettlementOutcome, SettlementState, TransferSettlementTimer,
};
pub use wallet::boost::{BoostOutcome, BoostSession, BoostSessionHandle};
pub use wallet::registry::BoostedTransaction;
pub use wallet::{BoostEligibility, DraftInput, FeeBounds, TransactionDraft};

use chain::{ActivityLedger, ChainSource, LightningNode};
use config::Config;
use logger::{log_info, log_warn, LdkLogger, Logger};
use settlement::TransferSettlementMonitor;
use types::{ChannelId, WalletContext};
use wallet::boost::BoostEngine;

use bitcoin::Txid;
use tokio::sync::watch;

use std::sync::{Arc, RwLock};

/// The main interface object of the wallet core, wrapping the necessary collaborators.
///
/// Needs to be initialized via [`Builder`].
pub struct WalletCore {
	config: Arc<Config>,
	wallet_context: RwLock<WalletContext>,
	chain_source: Arc<dyn ChainSource>,
	lightning_node: Arc<dyn LightningNode>,
	ledger: Arc<dyn ActivityLedger>,
	boost_engine: BoostEngine,
	settlement_monitor: TransferSettlementMonitor,
	logger: Arc<Logger>,
}

impl WalletCore {
	/// Returns the config the instance was built with.
	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Returns the wallet and network the core currently operates on.
	pub fn wallet_context(&self) -> WalletContext {
		self.wallet_context.read().unwrap().clone()
	}

	/// Switches to another wallet or network.
	///
	/// Cancels the settlement of the previous context, abandons all open boost sessions and
	/// forgets recorded boosts.
	pub fn switch_wallet(&self, wallet_context: WalletContext) {
		let mut current = self.wallet_context.write().unwrap();
		if *current == wallet_context {
			return;
		}
		self.settlement_monitor.cancel();
		self.boost_engine.reset();
		log_info!(self.logger, "Switched wallet context from {} to {}", current, wallet_context);
		*current = wallet_context;
	}

	/// Cancels all background work.
	pub fn stop(&self) {
		if self.settlement_monitor.cancel() {
			log_info!(self.logger, "Stopped settlement retries");
		}
		self.boost_engine.reset();
	}

	/// Computes the current balance across on-chain funds and Lightning channels.
	pub fn balance_snapshot(&self) -> BalanceSnapshot {
		let onchain = self.chain_source.onchain_balance();
		let channels = self.lightning_node.list_channels();
		let claimable = self.chain_source.claimable_balances();
		self.report_channel_invariant_violations(&channels);
		balance::compute_snapshot(&onchain, &channels, &claimable)
	}

	/// Computes the current balance including payments and transfers still in flight.
	pub fn balance_details(&self) -> BalanceDetails {
		let onchain = self.chain_source.onchain_balance();
		let channels = self.lightning_node.list_channels();
		let claimable = self.chain_source.claimable_balances();
		self.report_channel_invariant_violations(&channels);
		balance::compute_balance_details(
			&onchain,
			&channels,
			&claimable,
			&self.ledger.pending_transfers(),
			&self.ledger.pending_payments(),
		)
	}

	fn report_channel_invariant_violations(&self, channels: &[types::ChannelDetails]) {
		for violation in balance::check_channel_invariants(channels) {
			log_warn!(self.logger, "Inconsistent channel funds reported: {:?}", violation);
		}
	}

	/// Returns the fund split of the given channel, if known.
	pub fn channel_balance(&self, channel_id: &ChannelId) -> Option<ChannelBalance> {
		self.lightning_node
			.list_channels()
			.iter()
			.find(|c| c.channel_id == *channel_id)
			.map(balance::compute_channel_balance)
	}

	/// Returns the summed (local, remote) balance of all ready channels.
	pub fn local_remote_balance(&self, include_reserve: bool) -> (u64, u64) {
		balance::local_remote_balance(&self.lightning_node.list_channels(), include_reserve)
	}

	/// Returns the largest amount receivable over a single ready channel.
	pub fn max_inbound_capacity(&self) -> u64 {
		balance::max_inbound_capacity(&self.lightning_node.list_channels())
	}

	/// Returns the limits of a new transfer to spending, given the LSP's channel options.
	pub fn transfer_limits(&self, lsp: &LspChannelOptions) -> TransferLimits {
		let onchain_balance_sats = self.chain_source.onchain_balance().total_sats();
		let existing_channels_size_sats = self
			.lightning_node
			.list_channels()
			.iter()
			.fold(0u64, |acc, c| acc.saturating_add(c.channel_value_sats));
		balance::transfer_limits(lsp, onchain_balance_sats, existing_channels_size_sats)
	}

	/// Returns which boost types are available for the given transaction.
	pub async fn can_boost(&self, txid: &Txid) -> Result<BoostEligibility, Error> {
		self.boost_engine.can_boost(txid).await
	}

	/// Opens a boost session for the given unconfirmed transaction.
	///
	/// RBF is preferred where possible. The session starts out at a fee rate at or above the
	/// `fast` estimate and strictly above the original fee rate.
	pub async fn start_boost(&self, txid: &Txid) -> Result<BoostSession, Error> {
		self.boost_engine.prepare(txid).await
	}

	/// Returns the current state of a boost session.
	pub fn boost_session(&self, handle: BoostSessionHandle) -> Result<BoostSession, Error> {
		self.boost_engine.session(handle)
	}

	/// Moves the boost's fee rate by `delta` sats/vbyte, clamped to the session's bounds.
	pub fn adjust_boost_fee(
		&self, handle: BoostSessionHandle, delta: i64,
	) -> Result<BoostSession, Error> {
		self.boost_engine.adjust_fee(handle, delta)
	}

	/// Sets a custom boost fee rate.
	///
	/// Fails with [`Error::FeeOutOfBounds`] if the rate lies outside of the session's bounds.
	pub fn set_boost_fee_rate(
		&self, handle: BoostSessionHandle, rate_sat_per_vb: u64,
	) -> Result<BoostSession, Error> {
		self.boost_engine.set_fee_rate(handle, rate_sat_per_vb)
	}

	/// Uses the rate of the given estimate tier for the boost, clamped to the session's bounds.
	pub fn select_boost_fee_tier(
		&self, handle: BoostSessionHandle, tier: FeeTier,
	) -> Result<BoostSession, Error> {
		self.boost_engine.select_fee_tier(handle, tier)
	}

	/// Revalidates, builds and broadcasts the boost.
	pub async fn confirm_boost(&self, handle: BoostSessionHandle) -> Result<BoostOutcome, Error> {
		self.boost_engine.confirm(handle).await
	}

	/// Discards a boost session.
	pub fn abandon_boost(&self, handle: BoostSessionHandle) -> Result<(), Error> {
		self.boost_engine.abandon(handle)
	}

	/// Returns the record of the boost that broadcast the given transaction, if any.
	pub fn boosted_transaction(&self, txid: &Txid) -> Option<BoostedTransaction> {
		self.boost_engine.registry().get(txid)
	}

	/// Returns the transactions superseded by the given boost transaction, oldest first.
	pub fn boosted_parents(&self, txid: &Txid) -> Vec<Txid> {
		self.boost_engine.registry().boosted_parents(txid)
	}

	/// Returns the first transaction of the boost chain the given transaction belongs to.
	pub fn root_boost_parent(&self, txid: &Txid) -> Txid {
		self.boost_engine.registry().root_parent(txid)
	}

	/// Returns `true` if the given transaction was replaced or accelerated.
	pub fn is_boosted(&self, txid: &Txid) -> bool {
		self.boost_engine.registry().is_boosted(txid)
	}

	/// Starts attempting cooperative closes of all channels of the current wallet.
	///
	/// Returns the timer to persist. Does nothing if attempts are already running.
	pub fn start_settlement_retry(&self) -> TransferSettlementTimer {
		// Held across the start so a concurrent wallet switch cancels the new loop.
		let wallet_context = self.wallet_context.read().unwrap();
		self.settlement_monitor.start(wallet_context.clone())
	}

	/// Resumes cooperative close attempts from a persisted timer.
	pub fn resume_settlement_retry(&self, timer: TransferSettlementTimer) -> Result<(), Error> {
		let wallet_context = self.wallet_context.read().unwrap();
		self.settlement_monitor.resume(wallet_context.clone(), timer)
	}

	/// Stops attempting cooperative closes.
	pub fn cancel_settlement_retry(&self) {
		self.settlement_monitor.cancel();
	}

	/// Returns the state of the settlement.
	pub fn settlement_state(&self) -> SettlementState {
		self.settlement_monitor.state()
	}

	/// Returns a receiver notified about settlement state changes.
	pub fn subscribe_settlement_state(&self) -> watch::Receiver<SettlementState> {
		self.settlement_monitor.subscribe()
	}

	/// Returns the timer of the running settlement.
	pub fn settlement_timer(&self) -> TransferSettlementTimer {
		self.settlement_monitor.timer()
	}

	/// Force-closes all channels, stopping any cooperative attempts first.
	///
	/// Returns the channels that could not be closed.
	pub async fn force_transfer_to_savings(&self) -> Result<Vec<ChannelId>, Error> {
		self.settlement_monitor.force_close_all().await
	}
}

impl Drop for WalletCore {
	fn drop(&mut self) {
		self.settlement_monitor.cancel();
	}
}
