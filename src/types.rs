// This file is Copyright its original authors, visible in version control history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. You may not use this file except in
// accordance with one or both of these licenses.

//! Value types describing wallet and channel state as reported by the collaborators.

use std::fmt;

use bitcoin::{Network, OutPoint, ScriptBuf, Txid};
use lightning::ln::channelmanager::PaymentId;
pub use lightning::ln::types::ChannelId;

/// Identifies the wallet and network the core currently operates on.
///
/// Background work such as the settlement retry loop is bound to a context and must not outlive
/// it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WalletContext {
	/// The name of the selected wallet.
	pub wallet_name: String,
	/// The selected network.
	pub network: Network,
}

impl WalletContext {
	/// Creates a new context.
	pub fn new(wallet_name: impl Into<String>, network: Network) -> Self {
		Self { wallet_name: wallet_name.into(), network }
	}
}

impl fmt::Display for WalletContext {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}/{}", self.wallet_name, self.network)
	}
}

/// Details of a known Lightning channel, as reported by the Lightning node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDetails {
	/// The channel's ID.
	pub channel_id: ChannelId,
	/// The total capacity of the channel.
	pub channel_value_sats: u64,
	/// Our gross share of the channel's funds, including any reserve.
	pub balance_sats: u64,
	/// The amount we can currently send over the channel.
	pub outbound_capacity_sats: u64,
	/// The amount we can currently receive over the channel.
	pub inbound_capacity_sats: u64,
	/// The funds we must keep locked as collateral against cheating.
	///
	/// Will be `None` while the channel is not yet fully established.
	pub unspendable_punishment_reserve_sats: Option<u64>,
	/// Whether the channel has been confirmed and can be used for payments.
	pub is_channel_ready: bool,
}

/// Funds that become available once a pending channel open or close completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimableBalance {
	/// The channel the funds belong to.
	pub channel_id: ChannelId,
	/// The amount that will become available.
	pub amount_sats: u64,
}

/// The on-chain balance of the selected wallet and network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OnchainBalance {
	/// Funds in confirmed outputs.
	pub confirmed_sats: u64,
	/// Funds in outputs that are not yet confirmed.
	pub unconfirmed_sats: u64,
}

impl OnchainBalance {
	/// The sum of confirmed and unconfirmed funds.
	pub fn total_sats(&self) -> u64 {
		self.confirmed_sats.saturating_add(self.unconfirmed_sats)
	}
}

/// An unspent output controlled by the wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
	/// The outpoint of the output.
	pub outpoint: OutPoint,
	/// The value of the output.
	pub value_sats: u64,
	/// The output's script.
	pub script_pubkey: ScriptBuf,
	/// Whether the transaction creating the output is confirmed.
	pub is_confirmed: bool,
}

/// The confirmation status of a wallet transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationStatus {
	/// The transaction is confirmed at the given height.
	Confirmed {
		/// The height of the confirming block.
		height: u32,
	},
	/// The transaction is still in the mempool.
	Unconfirmed,
}

/// An input of a [`WalletTransaction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInputDetails {
	/// The output being spent.
	pub previous_output: OutPoint,
	/// The value of the output being spent.
	pub value_sats: u64,
	/// The script of the output being spent.
	pub script_pubkey: ScriptBuf,
	/// Whether the spent output belongs to the wallet.
	pub is_mine: bool,
}

/// An output of a [`WalletTransaction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutputDetails {
	/// The output index.
	pub vout: u32,
	/// The output value.
	pub value_sats: u64,
	/// The output script.
	pub script_pubkey: ScriptBuf,
	/// Whether the output pays to the wallet.
	pub is_mine: bool,
}

/// A transaction known to the on-chain wallet, including everything needed to bump its fee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletTransaction {
	/// The transaction ID.
	pub txid: Txid,
	/// The transaction inputs.
	pub inputs: Vec<TxInputDetails>,
	/// The transaction outputs.
	pub outputs: Vec<TxOutputDetails>,
	/// The absolute fee paid.
	pub fee_sats: u64,
	/// The virtual size in vbytes.
	pub vsize: u64,
	/// Whether the transaction is confirmed.
	pub confirmation_status: ConfirmationStatus,
	/// Whether at least one input signals replaceability (BIP 125).
	pub signals_rbf: bool,
}

impl WalletTransaction {
	/// Returns `true` if the transaction is confirmed.
	pub fn is_confirmed(&self) -> bool {
		matches!(self.confirmation_status, ConfirmationStatus::Confirmed { .. })
	}

	/// Returns `true` if every input is spent from the wallet, i.e., we sent the transaction.
	pub fn is_outgoing(&self) -> bool {
		!self.inputs.is_empty() && self.inputs.iter().all(|i| i.is_mine)
	}

	/// The total value of all inputs.
	pub fn input_total_sats(&self) -> u64 {
		self.inputs.iter().fold(0u64, |acc, i| acc.saturating_add(i.value_sats))
	}

	/// The total value of outputs paying back to the wallet.
	pub fn owned_output_total_sats(&self) -> u64 {
		self.outputs
			.iter()
			.filter(|o| o.is_mine)
			.fold(0u64, |acc, o| acc.saturating_add(o.value_sats))
	}

	/// The total value of outputs paying to third parties.
	pub fn foreign_output_total_sats(&self) -> u64 {
		self.outputs
			.iter()
			.filter(|o| !o.is_mine)
			.fold(0u64, |acc, o| acc.saturating_add(o.value_sats))
	}
}

/// The direction of a transfer between savings (on-chain) and spending (Lightning).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
	/// Funds move to spending by opening a channel.
	Open,
	/// Funds move to savings by cooperatively closing a channel.
	CoopClose,
	/// Funds move to savings by force-closing a channel.
	ForceClose,
}

/// A transfer between savings and spending that has not completed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransfer {
	/// The kind of transfer.
	pub kind: TransferKind,
	/// The amount being moved.
	pub amount_sats: u64,
	/// The channel being opened or closed, if already known.
	pub channel_id: Option<ChannelId>,
	/// The funding or closing transaction, if already broadcast.
	pub txid: Option<Txid>,
}

/// An incoming Lightning payment that has not been claimed yet, e.g., a held invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPayment {
	/// The payment's ID.
	pub payment_id: PaymentId,
	/// The amount of the payment.
	pub amount_sats: u64,
}
