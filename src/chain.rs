// This file is Copyright its original authors, visible in version control history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. You may not use this file except in
// accordance with one or both of these licenses.

//! Interfaces of the collaborators the wallet core relies on.
//!
//! The core never mutates channel or UTXO state itself. It reads state through these traits and
//! asks them to act (build, broadcast, close) on its behalf.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use bitcoin::{ScriptBuf, Transaction, Txid};

use crate::fee_estimator::FeeEstimates;
use crate::types::{
	ChannelDetails, ChannelId, ClaimableBalance, OnchainBalance, PendingPayment, PendingTransfer,
	Utxo, WalletTransaction,
};
use crate::wallet::registry::BoostedTransaction;
use crate::wallet::TransactionDraft;
use crate::Error;

/// The reason a transaction was rejected when broadcasting it, as reported by the chain backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastRejection {
	/// The backend's error message, e.g., `min relay fee not met`.
	pub reason: String,
}

impl BroadcastRejection {
	/// Creates a new rejection with the given reason.
	pub fn new(reason: impl Into<String>) -> Self {
		Self { reason: reason.into() }
	}
}

impl fmt::Display for BroadcastRejection {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", self.reason)
	}
}

/// The on-chain wallet and chain-sync backend.
pub trait ChainSource: Send + Sync {
	/// Returns the current on-chain balance of the selected wallet.
	fn onchain_balance(&self) -> OnchainBalance;

	/// Returns funds that will become available after pending channel events complete.
	fn claimable_balances(&self) -> Vec<ClaimableBalance>;

	/// Looks up a wallet transaction.
	fn get_transaction<'a>(
		&'a self, txid: &'a Txid,
	) -> Pin<Box<dyn Future<Output = Result<Option<WalletTransaction>, Error>> + Send + 'a>>;

	/// Lists the wallet's unspent outputs.
	fn list_utxos<'a>(&'a self)
		-> Pin<Box<dyn Future<Output = Result<Vec<Utxo>, Error>> + Send + 'a>>;

	/// Returns current fee rate estimates.
	fn fee_estimates<'a>(
		&'a self,
	) -> Pin<Box<dyn Future<Output = Result<FeeEstimates, Error>> + Send + 'a>>;

	/// Returns a fresh script of the wallet's internal keychain.
	fn change_script<'a>(&'a self)
		-> Pin<Box<dyn Future<Output = Result<ScriptBuf, Error>> + Send + 'a>>;

	/// Builds and signs a transaction exactly as described by the draft.
	fn build_transaction<'a>(
		&'a self, draft: &'a TransactionDraft,
	) -> Pin<Box<dyn Future<Output = Result<Transaction, Error>> + Send + 'a>>;

	/// Hands the transaction to the network.
	fn broadcast_transaction<'a>(
		&'a self, tx: &'a Transaction,
	) -> Pin<Box<dyn Future<Output = Result<(), BroadcastRejection>> + Send + 'a>>;
}

/// The Lightning node runtime.
pub trait LightningNode: Send + Sync {
	/// Lists all open channels.
	fn list_channels(&self) -> Vec<ChannelDetails>;

	/// Attempts to close all open channels.
	///
	/// Will always attempt a cooperative close first and only force-close the remaining channels
	/// if `force` is set. Returns the channels that could not be closed.
	fn close_channels<'a>(
		&'a self, force: bool,
	) -> Pin<Box<dyn Future<Output = Result<Vec<ChannelId>, Error>> + Send + 'a>>;
}

/// The activity ledger keeping track of the user's payments and transfers.
pub trait ActivityLedger: Send + Sync {
	/// Transfers between savings and spending that did not complete yet.
	fn pending_transfers(&self) -> Vec<PendingTransfer> {
		Vec::new()
	}

	/// Incoming Lightning payments that were not claimed yet.
	fn pending_payments(&self) -> Vec<PendingPayment> {
		Vec::new()
	}

	/// Called after a boost transaction was broadcast, so the original activity entry can be
	/// superseded.
	///
	/// Must not call back into the [`WalletCore`]'s boost methods.
	///
	/// [`WalletCore`]: crate::WalletCore
	fn transaction_boosted(&self, _boosted: &BoostedTransaction) {}
}
