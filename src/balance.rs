// This file is Copyright its original authors, visible in version control history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. You may not use this file except in
// accordance with one or both of these licenses.

//! Pure functions folding wallet and channel state into balances.
//!
//! Nothing in here performs I/O or fails. Inputs are immutable snapshots provided by the caller,
//! so the functions may be called concurrently and as often as needed.

use serde::{Deserialize, Serialize};

use crate::types::{
	ChannelDetails, ChannelId, ClaimableBalance, OnchainBalance, PendingPayment, PendingTransfer,
	TransferKind,
};

/// A derived view of all of the wallet's funds, in satoshis.
///
/// The following always holds:
///
/// - `lightning_balance_sats == spending_balance_sats + reserve_balance_sats + claimable_balance_sats`
/// - `spendable_balance_sats == onchain_balance_sats + spending_balance_sats`
/// - `total_balance_sats == onchain_balance_sats + spending_balance_sats + reserve_balance_sats + claimable_balance_sats`
///
/// The identities hold as long as the total fits into a `u64`. Beyond that, every sum saturates at
/// `u64::MAX` independently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
	/// Total on-chain funds.
	pub onchain_balance_sats: u64,
	/// Total Lightning funds: spending, reserved and claimable.
	pub lightning_balance_sats: u64,
	/// The share of Lightning funds that can be spent right away.
	pub spending_balance_sats: u64,
	/// The share of Lightning funds locked up as channel reserve.
	pub reserve_balance_sats: u64,
	/// Funds that will be available after a channel opens or closes.
	pub claimable_balance_sats: u64,
	/// Funds that can be spent right away, on-chain or over Lightning.
	pub spendable_balance_sats: u64,
	/// All funds.
	pub total_balance_sats: u64,
}

/// The split of a single channel's funds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelBalance {
	/// Our funds in the channel, including our punishment reserve.
	pub spending_total_sats: u64,
	/// The amount we can send.
	pub spending_available_sats: u64,
	/// The counterparty's funds in the channel.
	pub receiving_total_sats: u64,
	/// The amount we can receive.
	pub receiving_available_sats: u64,
	/// The channel's capacity.
	pub capacity_sats: u64,
}

/// A [`BalanceSnapshot`] extended by funds that are in flight between layers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceDetails {
	/// The balance snapshot.
	pub snapshot: BalanceSnapshot,
	/// Incoming Lightning payments not yet claimed, e.g., held invoices.
	pub pending_payments_sats: u64,
	/// Funds spent on-chain to open a channel that is not ready yet.
	pub in_transfer_to_spending_sats: u64,
	/// Funds of closing channels on their way back to savings.
	pub in_transfer_to_savings_sats: u64,
}

impl BalanceDetails {
	/// The total balance including funds on their way to spending.
	///
	/// Funds on their way to savings are already part of the snapshot's claimable balance.
	pub fn total_including_transfers_sats(&self) -> u64 {
		self.snapshot.total_balance_sats.saturating_add(self.in_transfer_to_spending_sats)
	}
}

/// A violated assumption about the funds of a ready channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelInvariantViolation {
	/// The outbound capacity exceeds our balance, which would imply a negative reserve.
	OutboundExceedsBalance {
		/// The affected channel.
		channel_id: ChannelId,
		/// Our reported balance.
		balance_sats: u64,
		/// The reported outbound capacity.
		outbound_capacity_sats: u64,
	},
	/// Our balance exceeds the channel's capacity.
	BalanceExceedsCapacity {
		/// The affected channel.
		channel_id: ChannelId,
		/// Our reported balance.
		balance_sats: u64,
		/// The channel's capacity.
		channel_value_sats: u64,
	},
}

/// Limits applying to transfers from savings to spending via the LSP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLimits {
	/// The smallest channel the LSP will open, including a safety buffer.
	pub min_channel_size_sats: u64,
	/// The largest channel we may still open, including a safety buffer.
	pub max_channel_size_sats: u64,
	/// The most we may move into a new channel.
	pub max_client_balance_sats: u64,
}

/// Channel size options announced by the LSP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LspChannelOptions {
	/// The minimum channel size.
	pub min_channel_size_sats: u64,
	/// The maximum channel size.
	pub max_channel_size_sats: u64,
}

// Returns the (spendable, reserved) split of a ready channel.
fn spendable_and_reserved(channel: &ChannelDetails) -> (u64, u64) {
	let spendable = channel.outbound_capacity_sats;
	let reserved = channel.balance_sats.saturating_sub(spendable);
	(spendable, reserved)
}

/// Folds the on-chain balance, channels and claimable balances into a [`BalanceSnapshot`].
///
/// Channels that are not ready contribute nothing to the spending or reserve balances.
pub fn compute_snapshot(
	onchain: &OnchainBalance, channels: &[ChannelDetails], claimable: &[ClaimableBalance],
) -> BalanceSnapshot {
	let onchain_balance_sats = onchain.total_sats();

	let (spending_balance_sats, reserve_balance_sats) = channels
		.iter()
		.filter(|c| c.is_channel_ready)
		.map(spendable_and_reserved)
		.fold((0u64, 0u64), |(spending, reserve), (s, r)| {
			(spending.saturating_add(s), reserve.saturating_add(r))
		});

	let claimable_balance_sats =
		claimable.iter().fold(0u64, |acc, c| acc.saturating_add(c.amount_sats));

	let lightning_balance_sats = spending_balance_sats
		.saturating_add(reserve_balance_sats)
		.saturating_add(claimable_balance_sats);

	BalanceSnapshot {
		onchain_balance_sats,
		lightning_balance_sats,
		spending_balance_sats,
		reserve_balance_sats,
		claimable_balance_sats,
		spendable_balance_sats: onchain_balance_sats.saturating_add(spending_balance_sats),
		total_balance_sats: onchain_balance_sats.saturating_add(lightning_balance_sats),
	}
}

/// Splits a single channel's funds into what we can send and receive.
pub fn compute_channel_balance(channel: &ChannelDetails) -> ChannelBalance {
	let local_reserve = channel.unspendable_punishment_reserve_sats.unwrap_or(0);
	ChannelBalance {
		spending_total_sats: channel.outbound_capacity_sats.saturating_add(local_reserve),
		spending_available_sats: channel.outbound_capacity_sats,
		receiving_total_sats: channel.channel_value_sats.saturating_sub(channel.balance_sats),
		receiving_available_sats: channel.inbound_capacity_sats,
		capacity_sats: channel.channel_value_sats,
	}
}

/// Computes the snapshot along with payments and transfers that are still in flight.
///
/// A pending transfer to spending is no longer counted once its channel shows up as ready, at
/// which point its funds are part of the spending and reserve balances.
pub fn compute_balance_details(
	onchain: &OnchainBalance, channels: &[ChannelDetails], claimable: &[ClaimableBalance],
	pending_transfers: &[PendingTransfer], pending_payments: &[PendingPayment],
) -> BalanceDetails {
	let snapshot = compute_snapshot(onchain, channels, claimable);

	let is_ready_channel = |channel_id: &ChannelId| {
		channels.iter().any(|c| c.is_channel_ready && c.channel_id == *channel_id)
	};

	let in_transfer_to_spending_sats = pending_transfers
		.iter()
		.filter(|t| t.kind == TransferKind::Open)
		.filter(|t| !t.channel_id.as_ref().map_or(false, is_ready_channel))
		.fold(0u64, |acc, t| acc.saturating_add(t.amount_sats));

	let pending_payments_sats =
		pending_payments.iter().fold(0u64, |acc, p| acc.saturating_add(p.amount_sats));

	BalanceDetails {
		snapshot,
		pending_payments_sats,
		in_transfer_to_spending_sats,
		in_transfer_to_savings_sats: snapshot.claimable_balance_sats,
	}
}

/// Returns the summed (local, remote) balance of all ready channels.
///
/// If `include_reserve` is set, our punishment reserve is counted towards the local balance.
pub fn local_remote_balance(channels: &[ChannelDetails], include_reserve: bool) -> (u64, u64) {
	channels.iter().filter(|c| c.is_channel_ready).fold((0u64, 0u64), |(local, remote), c| {
		let reserve =
			if include_reserve { c.unspendable_punishment_reserve_sats.unwrap_or(0) } else { 0 };
		(
			local.saturating_add(c.outbound_capacity_sats).saturating_add(reserve),
			remote.saturating_add(c.inbound_capacity_sats),
		)
	})
}

/// Returns the largest inbound capacity of any ready channel.
pub fn max_inbound_capacity(channels: &[ChannelDetails]) -> u64 {
	channels
		.iter()
		.filter(|c| c.is_channel_ready)
		.map(|c| c.inbound_capacity_sats)
		.max()
		.unwrap_or(0)
}

/// Reports ready channels whose reported funds contradict each other.
pub fn check_channel_invariants(channels: &[ChannelDetails]) -> Vec<ChannelInvariantViolation> {
	let mut violations = Vec::new();
	for channel in channels.iter().filter(|c| c.is_channel_ready) {
		if channel.outbound_capacity_sats > channel.balance_sats {
			violations.push(ChannelInvariantViolation::OutboundExceedsBalance {
				channel_id: channel.channel_id,
				balance_sats: channel.balance_sats,
				outbound_capacity_sats: channel.outbound_capacity_sats,
			});
		}
		if channel.balance_sats > channel.channel_value_sats {
			violations.push(ChannelInvariantViolation::BalanceExceedsCapacity {
				channel_id: channel.channel_id,
				balance_sats: channel.balance_sats,
				channel_value_sats: channel.channel_value_sats,
			});
		}
	}
	violations
}

// Returns `value * percent / 100`, rounded half up.
fn percent_of(value: u64, percent: u64) -> u64 {
	let scaled = (value as u128 * percent as u128 + 50) / 100;
	scaled.min(u64::MAX as u128) as u64
}

/// Computes the limits of a new transfer to spending.
///
/// LSP limits move with network fees, so a 5% buffer is kept on both ends. We keep 20% of the
/// on-chain funds for fees and ask the LSP to contribute at least half of the channel.
pub fn transfer_limits(
	lsp: &LspChannelOptions, onchain_balance_sats: u64, existing_channels_size_sats: u64,
) -> TransferLimits {
	let min_channel_size_sats = percent_of(lsp.min_channel_size_sats, 105);
	let max_channel_size_sats = percent_of(lsp.max_channel_size_sats, 95)
		.saturating_sub(existing_channels_size_sats);

	let local_limit = percent_of(onchain_balance_sats, 80);
	let lsp_limit = max_channel_size_sats / 2 + max_channel_size_sats % 2;

	TransferLimits {
		min_channel_size_sats,
		max_channel_size_sats,
		max_client_balance_sats: local_limit.min(lsp_limit),
	}
}
