// This file is Copyright its original authors, visible in version control history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. You may not use this file except in
// accordance with one or both of these licenses.

pub(crate) mod boost;
pub(crate) mod registry;

use crate::chain::BroadcastRejection;
use crate::config::Config;
use crate::fee_estimator::{
	estimate_vsize, fee_for_rate, fee_rate_for, to_fee_rate, BoostType, FeeEstimates, FeeTier,
};
use crate::logger::{log_debug, log_error, log_info, LdkLogger, Logger};
use crate::types::{TxInputDetails, Utxo, WalletTransaction};
use crate::Error;

use bitcoin::{Amount, OutPoint, ScriptBuf, TxOut, Txid};

use std::sync::Arc;

/// An input of a [`TransactionDraft`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftInput {
	/// The output being spent.
	pub outpoint: OutPoint,
	/// The value of the output being spent.
	pub value_sats: u64,
	/// The script of the output being spent.
	pub script_pubkey: ScriptBuf,
}

impl From<&Utxo> for DraftInput {
	fn from(utxo: &Utxo) -> Self {
		Self {
			outpoint: utxo.outpoint,
			value_sats: utxo.value_sats,
			script_pubkey: utxo.script_pubkey.clone(),
		}
	}
}

impl From<&TxInputDetails> for DraftInput {
	fn from(input: &TxInputDetails) -> Self {
		Self {
			outpoint: input.previous_output,
			value_sats: input.value_sats,
			script_pubkey: input.script_pubkey.clone(),
		}
	}
}

/// A candidate transaction, handed to the [`ChainSource`] for building and signing once the user
/// confirmed it.
///
/// [`ChainSource`]: crate::chain::ChainSource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionDraft {
	/// The outputs to spend.
	pub inputs: Vec<DraftInput>,
	/// The outputs to create, in order.
	pub outputs: Vec<TxOut>,
	/// The output absorbing fee changes, if any.
	pub change_index: Option<usize>,
	/// The absolute fee.
	pub fee_sats: u64,
	/// The fee rate in sats/vbyte.
	pub sats_per_vbyte: u64,
	/// The expected virtual size in vbytes.
	pub vsize: u64,
	/// The fee tier the rate was taken from.
	pub selected_fee_tier: FeeTier,
	/// Whether this draft replaces or accelerates a transaction.
	pub boost_type: BoostType,
	/// Whether all inputs are drained into the change output.
	pub max_spend: bool,
	/// The transaction replaced (RBF) or accelerated (CPFP) by this draft.
	pub boosted_txid: Txid,
}

impl TransactionDraft {
	/// The total value of all inputs.
	pub fn input_total_sats(&self) -> u64 {
		self.inputs.iter().fold(0u64, |acc, i| acc.saturating_add(i.value_sats))
	}

	/// The total value of all outputs.
	pub fn output_total_sats(&self) -> u64 {
		self.outputs.iter().fold(0u64, |acc, o| acc.saturating_add(o.value.to_sat()))
	}

	// The total value of all outputs but the change output.
	fn fixed_output_total_sats(&self) -> u64 {
		self.outputs
			.iter()
			.enumerate()
			.filter(|(i, _)| Some(*i) != self.change_index)
			.fold(0u64, |acc, (_, o)| acc.saturating_add(o.value.to_sat()))
	}
}

/// The range of fee rates (in sats/vbyte) a boost may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeBounds {
	/// The lowest rate that still gets the boost relayed and accepted.
	pub min_sat_per_vb: u64,
	/// The highest rate that keeps all outputs above dust and the fee within its allowed share.
	pub max_sat_per_vb: u64,
}

impl FeeBounds {
	pub(crate) fn contains(&self, rate_sat_per_vb: u64) -> bool {
		self.min_sat_per_vb <= rate_sat_per_vb && rate_sat_per_vb <= self.max_sat_per_vb
	}

	pub(crate) fn clamp(&self, rate_sat_per_vb: u64) -> u64 {
		rate_sat_per_vb.max(self.min_sat_per_vb).min(self.max_sat_per_vb)
	}
}

/// A prepared boost: the candidate transaction plus everything needed to adjust and revalidate it.
#[derive(Debug, Clone)]
pub(crate) struct BoostPlan {
	pub draft: TransactionDraft,
	pub bounds: FeeBounds,
	pub original_fee_sats: u64,
	pub original_fee_rate: u64,
	pub original_vsize: u64,
}

/// Which boost types are available for a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoostEligibility {
	/// The transaction can be replaced.
	pub rbf: bool,
	/// An output of the transaction can be spent by a child.
	pub cpfp: bool,
}

impl BoostEligibility {
	/// Returns `true` if the transaction can be boosted at all.
	pub fn can_boost(&self) -> bool {
		self.rbf || self.cpfp
	}
}

// The change output of a transaction we sent is its largest output paying back to us.
fn find_change_output(tx: &WalletTransaction) -> Option<usize> {
	tx.outputs
		.iter()
		.enumerate()
		.filter(|(_, o)| o.is_mine)
		.max_by_key(|(_, o)| o.value_sats)
		.map(|(i, _)| i)
}

// Returns the wallet's unspent outputs created by the given transaction.
fn unspent_outputs_of<'a>(tx: &WalletTransaction, utxos: &'a [Utxo]) -> Vec<&'a Utxo> {
	utxos.iter().filter(|u| u.outpoint.txid == tx.txid).collect()
}

/// Determines which boost types may be used for the given transaction.
pub(crate) fn boost_eligibility(
	tx: &WalletTransaction, utxos: &[Utxo], onchain_balance_sats: u64, config: &Config,
) -> BoostEligibility {
	if tx.is_confirmed() {
		return BoostEligibility::default();
	}

	let base_fee = config.recommended_base_fee_sats;

	let rbf = config.rbf_enabled
		&& tx.signals_rbf
		&& tx.is_outgoing()
		&& onchain_balance_sats >= base_fee
		&& find_change_output(tx).is_some()
		&& tx.foreign_output_total_sats() > 0
		&& {
			// The replacement's extra fee is taken from our own outputs.
			let owned_value = tx.owned_output_total_sats();
			owned_value > tx.fee_sats && owned_value > base_fee
		};

	let cpfp_min_value = base_fee.saturating_mul(3);
	let cpfp = unspent_outputs_of(tx, utxos).iter().any(|u| u.value_sats >= cpfp_min_value);

	BoostEligibility { rbf, cpfp }
}

/// Plans a replacement of `tx` paying a higher fee from its change output.
///
/// Returns `Ok(None)` if no fee rate satisfies both the replacement rules and the output
/// constraints, in which case the caller may fall back to CPFP.
pub(crate) fn plan_rbf(
	tx: &WalletTransaction, fees: &FeeEstimates, config: &Config, logger: &Arc<Logger>,
) -> Result<Option<BoostPlan>, Error> {
	let change_index = find_change_output(tx).ok_or_else(|| {
		log_error!(logger, "RBF rejected: transaction {} has no change output", tx.txid);
		Error::NotBoostable
	})?;

	if tx.vsize == 0 {
		log_error!(logger, "RBF rejected: transaction {} reports a size of zero", tx.txid);
		return Err(Error::InvalidInput);
	}

	let vsize = tx.vsize;
	let input_total = tx.input_total_sats();
	let original_fee_rate = fee_rate_for(tx.fee_sats, vsize);

	let mut outputs: Vec<_> = tx.outputs.iter().collect();
	outputs.sort_by_key(|o| o.vout);
	let change_index = outputs
		.iter()
		.position(|o| o.vout == tx.outputs[change_index].vout)
		.ok_or(Error::InvalidInput)?;

	let fixed_output_total = outputs
		.iter()
		.enumerate()
		.filter(|(i, _)| *i != change_index)
		.fold(0u64, |acc, (_, o)| acc.saturating_add(o.value_sats));

	// A replacement must pay for its own relay on top of the original fee (BIP 125 rule 4).
	let relay_fee = fee_for_rate(config.min_relay_fee_rate_sat_per_vb, vsize)?;
	let min_fee_increase = relay_fee.max(config.recommended_base_fee_sats);
	let min_replacement_fee =
		tx.fee_sats.checked_add(min_fee_increase).ok_or(Error::FeeCalculationOverflow)?;
	let min_sat_per_vb = (min_replacement_fee / vsize + 1)
		.max(fees.minimum)
		.max(config.min_relay_fee_rate_sat_per_vb);

	let max_sat_per_vb = match input_total
		.checked_sub(fixed_output_total)
		.and_then(|v| v.checked_sub(config.dust_limit_sats))
	{
		Some(available) => {
			let share_cap = max_fee_for_share(input_total, config)?;
			available.min(share_cap) / vsize
		},
		None => 0,
	};

	log_info!(logger, "RBF analysis for transaction {}", tx.txid);
	log_info!(logger, "  Original fee: {} sats ({} sat/vB)", tx.fee_sats, original_fee_rate);
	log_info!(logger, "  Input total: {} sats, fixed outputs: {} sats", input_total, fixed_output_total);
	log_info!(logger, "  Allowed fee rates: {}..={} sat/vB", min_sat_per_vb, max_sat_per_vb);

	if min_sat_per_vb > max_sat_per_vb {
		log_info!(
			logger,
			"RBF not possible for {}: change output cannot cover a fee of {} sat/vB",
			tx.txid,
			min_sat_per_vb
		);
		return Ok(None);
	}

	let draft = TransactionDraft {
		inputs: tx.inputs.iter().map(DraftInput::from).collect(),
		outputs: outputs
			.iter()
			.map(|o| TxOut {
				value: Amount::from_sat(o.value_sats),
				script_pubkey: o.script_pubkey.clone(),
			})
			.collect(),
		change_index: Some(change_index),
		fee_sats: tx.fee_sats,
		sats_per_vbyte: original_fee_rate,
		vsize,
		selected_fee_tier: FeeTier::None,
		boost_type: BoostType::Rbf,
		max_spend: false,
		boosted_txid: tx.txid,
	};

	let mut plan = BoostPlan {
		draft,
		bounds: FeeBounds { min_sat_per_vb, max_sat_per_vb },
		original_fee_sats: tx.fee_sats,
		original_fee_rate,
		original_vsize: vsize,
	};
	seed_fee_rate(&mut plan, fees, config)?;
	Ok(Some(plan))
}

/// Plans a child transaction spending the wallet's outputs of `tx` back to `change_script`, so
/// that the package pays a higher fee rate.
pub(crate) fn plan_cpfp(
	tx: &WalletTransaction, utxos: &[Utxo], change_script: ScriptBuf, fees: &FeeEstimates,
	config: &Config, logger: &Arc<Logger>,
) -> Result<BoostPlan, Error> {
	let parent_outputs = unspent_outputs_of(tx, utxos);
	if parent_outputs.is_empty() {
		log_error!(logger, "No spendable outputs found for transaction: {}", tx.txid);
		return Err(Error::NotBoostable);
	}

	let inputs: Vec<DraftInput> = parent_outputs.iter().map(|u| DraftInput::from(*u)).collect();
	let input_scripts: Vec<_> = inputs.iter().map(|i| i.script_pubkey.as_script()).collect();
	let vsize = estimate_vsize(&input_scripts, &[change_script.clone()]);
	let input_total = inputs.iter().fold(0u64, |acc, i| acc.saturating_add(i.value_sats));

	let parent_fee_rate = fee_rate_for(tx.fee_sats, tx.vsize);
	let min_sat_per_vb = parent_fee_rate
		.checked_add(1)
		.ok_or(Error::FeeCalculationOverflow)?
		.max(fees.minimum)
		.max(config.min_relay_fee_rate_sat_per_vb);

	let max_sat_per_vb = match input_total.checked_sub(config.dust_limit_sats) {
		Some(available) => available.min(max_fee_for_share(input_total, config)?) / vsize,
		None => 0,
	};

	log_info!(logger, "CPFP analysis for transaction {}", tx.txid);
	log_info!(logger, "  Parent fee: {} sats ({} sat/vB)", tx.fee_sats, parent_fee_rate);
	log_info!(logger, "  Spending {} output(s) worth {} sats", inputs.len(), input_total);
	log_info!(logger, "  Estimated child size: {} vB", vsize);
	log_info!(logger, "  Allowed fee rates: {}..={} sat/vB", min_sat_per_vb, max_sat_per_vb);

	if min_sat_per_vb > max_sat_per_vb {
		log_error!(
			logger,
			"CPFP rejected for {}: outputs worth {} sats cannot pay {} sat/vB",
			tx.txid,
			input_total,
			min_sat_per_vb
		);
		return Err(Error::NotBoostable);
	}

	let draft = TransactionDraft {
		inputs,
		outputs: vec![TxOut { value: Amount::from_sat(input_total), script_pubkey: change_script }],
		change_index: Some(0),
		fee_sats: 0,
		sats_per_vbyte: 0,
		vsize,
		selected_fee_tier: FeeTier::None,
		boost_type: BoostType::Cpfp,
		max_spend: true,
		boosted_txid: tx.txid,
	};

	let mut plan = BoostPlan {
		draft,
		bounds: FeeBounds { min_sat_per_vb, max_sat_per_vb },
		original_fee_sats: tx.fee_sats,
		original_fee_rate: parent_fee_rate,
		original_vsize: tx.vsize,
	};
	seed_fee_rate(&mut plan, fees, config)?;

	let child_fee = plan.draft.fee_sats;
	let package_rate =
		fee_rate_for(tx.fee_sats.saturating_add(child_fee), tx.vsize.saturating_add(vsize));
	log_info!(
		logger,
		"  Recommended child fee rate: {} sat/vB, combined package rate: ~{} sat/vB",
		plan.draft.sats_per_vbyte,
		package_rate
	);
	log_debug!(logger, "  Child fee rate as FeeRate: {:?}", to_fee_rate(plan.draft.sats_per_vbyte));

	Ok(plan)
}

/// Returns the child fee rate at which the parent+child package reaches `target_sat_per_vb`.
///
/// If the parent already pays the target, the child pays one sat/vB more than the parent.
pub(crate) fn recommended_cpfp_fee_rate(
	parent_fee_sats: u64, parent_vsize: u64, child_vsize: u64, target_sat_per_vb: u64,
) -> Result<u64, Error> {
	let parent_fee_rate = fee_rate_for(parent_fee_sats, parent_vsize);
	if parent_fee_rate >= target_sat_per_vb || child_vsize == 0 {
		return parent_fee_rate.checked_add(1).ok_or(Error::FeeCalculationOverflow);
	}

	let parent_fee_deficit = fee_for_rate(target_sat_per_vb - parent_fee_rate, parent_vsize)?;
	let base_child_fee = fee_for_rate(target_sat_per_vb, child_vsize)?;
	let total_child_fee =
		base_child_fee.checked_add(parent_fee_deficit).ok_or(Error::FeeCalculationOverflow)?;
	Ok(total_child_fee / child_vsize)
}

// The highest absolute fee allowed by the configured share of the inputs.
fn max_fee_for_share(input_total: u64, config: &Config) -> Result<u64, Error> {
	input_total
		.checked_mul(config.max_fee_share_percent)
		.map(|v| v / 100)
		.ok_or(Error::FeeCalculationOverflow)
}

// Applies the initial rate: the `fast` estimate for RBF, the package target rate for CPFP.
fn seed_fee_rate(plan: &mut BoostPlan, fees: &FeeEstimates, config: &Config) -> Result<(), Error> {
	let target = match plan.draft.boost_type {
		BoostType::Rbf => fees.fast,
		BoostType::Cpfp => recommended_cpfp_fee_rate(
			plan.original_fee_sats,
			plan.original_vsize,
			plan.draft.vsize,
			fees.fast,
		)?,
	};
	let rate = plan.bounds.clamp(target);
	let tier = match plan.draft.boost_type {
		BoostType::Rbf if rate == fees.fast => FeeTier::Fast,
		_ => FeeTier::Custom,
	};
	apply_fee_rate(&mut plan.draft, rate, config)?;
	plan.draft.selected_fee_tier = tier;
	Ok(())
}

/// Sets the draft's fee to `rate_sat_per_vb`, deducting it from the change output.
pub(crate) fn apply_fee_rate(
	draft: &mut TransactionDraft, rate_sat_per_vb: u64, config: &Config,
) -> Result<(), Error> {
	let fee_sats = fee_for_rate(rate_sat_per_vb, draft.vsize)?;
	let change_index = draft.change_index.ok_or(Error::InvalidInput)?;

	let change_value = draft
		.input_total_sats()
		.checked_sub(draft.fixed_output_total_sats())
		.and_then(|v| v.checked_sub(fee_sats))
		.ok_or(Error::InsufficientFunds)?;
	if change_value < config.dust_limit_sats {
		return Err(Error::DustOutput);
	}

	let change = draft.outputs.get_mut(change_index).ok_or(Error::InvalidInput)?;
	change.value = Amount::from_sat(change_value);
	draft.fee_sats = fee_sats;
	draft.sats_per_vbyte = rate_sat_per_vb;
	Ok(())
}

/// Revalidates a draft right before it is built and broadcast.
pub(crate) fn validate_draft(
	draft: &TransactionDraft, bounds: &FeeBounds, config: &Config,
) -> Result<(), Error> {
	if draft.inputs.is_empty() || draft.outputs.is_empty() {
		return Err(Error::InvalidInput);
	}

	if !bounds.contains(draft.sats_per_vbyte) {
		return Err(Error::FeeOutOfBounds);
	}

	if fee_for_rate(draft.sats_per_vbyte, draft.vsize)? != draft.fee_sats {
		return Err(Error::InvalidInput);
	}

	let has_dust = draft
		.outputs
		.iter()
		.any(|o| !o.script_pubkey.is_op_return() && o.value.to_sat() < config.dust_limit_sats);
	if has_dust {
		return Err(Error::DustOutput);
	}

	let input_total = draft.input_total_sats();
	let spent = draft
		.output_total_sats()
		.checked_add(draft.fee_sats)
		.ok_or(Error::FeeCalculationOverflow)?;
	if spent > input_total {
		return Err(Error::InsufficientFunds);
	}
	if spent != input_total {
		return Err(Error::InvalidInput);
	}

	if draft.fee_sats > max_fee_for_share(input_total, config)? {
		return Err(Error::FeeExceedsAmount);
	}

	Ok(())
}

/// Maps a backend's broadcast rejection onto the error the caller should act on.
pub(crate) fn classify_broadcast_rejection(rejection: &BroadcastRejection) -> Error {
	let reason = rejection.reason.to_lowercase();
	let fee_too_low = ["min relay fee not met", "mempool min fee not met", "insufficient fee"]
		.iter()
		.any(|needle| reason.contains(needle));
	if fee_too_low {
		Error::MinRelayFeeNotMet
	} else {
		Error::ConnectivityFailure
	}
}
