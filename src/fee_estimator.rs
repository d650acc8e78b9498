// This file is Copyright its original authors, visible in version control history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. You may not use this file except in
// accordance with one or both of these licenses.

use bitcoin::{FeeRate, Script, ScriptBuf, Weight};
use serde::{Deserialize, Serialize};

use crate::Error;

// Version, locktime, input and output counts, plus the segwit marker and flag.
const TX_OVERHEAD_WEIGHT_WU: u64 = 4 * (4 + 4 + 1 + 1) + 2;

/// Fee rate estimates (in sats/vbyte) for different confirmation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEstimates {
	/// The lowest rate the mempool currently accepts.
	pub minimum: u64,
	/// A rate expected to confirm within a day.
	pub slow: u64,
	/// A rate expected to confirm within an hour.
	pub normal: u64,
	/// A rate expected to confirm with the next block.
	pub fast: u64,
}

impl FeeEstimates {
	/// Returns the rate for the given tier, or `None` for tiers without an estimate.
	pub fn rate_for(&self, tier: FeeTier) -> Option<u64> {
		match tier {
			FeeTier::Minimum => Some(self.minimum),
			FeeTier::Slow => Some(self.slow),
			FeeTier::Normal => Some(self.normal),
			FeeTier::Fast => Some(self.fast),
			FeeTier::Custom | FeeTier::None => None,
		}
	}
}

/// The fee tier selected for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeeTier {
	/// The network minimum.
	Minimum,
	/// The slow estimate.
	Slow,
	/// The normal estimate.
	Normal,
	/// The fast estimate.
	Fast,
	/// A rate entered or adjusted by the user.
	Custom,
	/// No rate selected yet.
	None,
}

/// The way a stuck transaction is accelerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoostType {
	/// Replace the transaction with one paying a higher fee from the same inputs.
	Rbf,
	/// Spend an output of the transaction in a child paying for both.
	Cpfp,
}

/// Returns `rate * vsize`, failing rather than wrapping on overflow.
pub(crate) fn fee_for_rate(rate_sat_per_vb: u64, vsize: u64) -> Result<u64, Error> {
	rate_sat_per_vb.checked_mul(vsize).ok_or(Error::FeeCalculationOverflow)
}

/// Returns the fee rate implied by the fee and size, rounded down.
pub(crate) fn fee_rate_for(fee_sats: u64, vsize: u64) -> u64 {
	if vsize == 0 {
		return 0;
	}
	fee_sats / vsize
}

/// Converts a sats/vbyte rate into a [`FeeRate`], for logging alongside LDK/BDK values.
pub(crate) fn to_fee_rate(rate_sat_per_vb: u64) -> FeeRate {
	FeeRate::from_sat_per_vb(rate_sat_per_vb).unwrap_or(FeeRate::MAX)
}

/// Applies a signed delta to a rate, failing on overflow or if the result would be negative.
pub(crate) fn apply_delta(rate_sat_per_vb: u64, delta: i64) -> Option<u64> {
	if delta >= 0 {
		rate_sat_per_vb.checked_add(delta as u64)
	} else {
		rate_sat_per_vb.checked_sub(delta.unsigned_abs())
	}
}

/// The weight of an input spending an output with the given script, including its witness.
pub(crate) fn input_weight(script_pubkey: &Script) -> Weight {
	match script_pubkey.witness_version() {
		Some(bitcoin::WitnessVersion::V0) => Weight::from_wu(272), // P2WPKH
		Some(bitcoin::WitnessVersion::V1) => Weight::from_wu(230), // P2TR
		None => {
			if script_pubkey.is_p2sh() {
				Weight::from_wu(360) // P2SH-wrapped P2WPKH
			} else {
				Weight::from_wu(588) // P2PKH (legacy)
			}
		},
		_ => Weight::from_wu(272),
	}
}

/// The weight of an output paying to the given script.
pub(crate) fn output_weight(script_pubkey: &Script) -> Weight {
	let script_len = script_pubkey.len() as u64;
	let len_prefix = if script_len < 0xfd { 1 } else { 3 };
	Weight::from_wu(4 * (8 + len_prefix + script_len))
}

/// Estimates the virtual size of a transaction spending outputs with the given scripts to the
/// given output scripts.
pub(crate) fn estimate_vsize(input_scripts: &[&Script], output_scripts: &[ScriptBuf]) -> u64 {
	let weight = input_scripts
		.iter()
		.map(|s| input_weight(s))
		.chain(output_scripts.iter().map(|s| output_weight(s)))
		.fold(Weight::from_wu(TX_OVERHEAD_WEIGHT_WU), |acc, w| acc + w);
	weight.to_vbytes_ceil()
}
