// This file is Copyright its original authors, visible in version control history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. You may not use this file except in
// accordance with one or both of these licenses.

//! Objects for configuring the wallet core.

use std::time::Duration;

use crate::logger::LogLevel;

// Outputs below this value are considered uneconomical to spend.
pub(crate) const DEFAULT_DUST_LIMIT_SATS: u64 = 546;

// The minimum absolute fee increase of a replacement transaction, also used as the rough cost
// of a single average-sized transaction when checking boost eligibility.
pub(crate) const DEFAULT_RECOMMENDED_BASE_FEE_SATS: u64 = 256;

// The network's minimum relay fee rate.
pub(crate) const DEFAULT_MIN_RELAY_FEE_RATE_SAT_PER_VB: u64 = 1;

// The fee of a boost may not exceed this share of the spent inputs.
pub(crate) const DEFAULT_MAX_FEE_SHARE_PERCENT: u64 = 50;

// The time between two cooperative close attempts.
pub(crate) const DEFAULT_SETTLEMENT_RETRY_INTERVAL_SECS: u64 = 60 * 5;

// The time after which we stop attempting cooperative closes.
pub(crate) const DEFAULT_SETTLEMENT_GIVE_UP_AFTER_SECS: u64 = 60 * 30;

pub(crate) const DEFAULT_LOG_FILE_PATH: &str = "/tmp/bitkit_core/logs/bitkit_core.log";
pub(crate) const DEFAULT_LOG_LEVEL: LogLevel = LogLevel::Debug;

#[derive(Debug, Clone)]
/// Represents the configuration of a [`WalletCore`] instance.
///
/// ### Defaults
///
/// | Parameter                              | Value              |
/// |----------------------------------------|--------------------|
/// | `dust_limit_sats`                      | 546                |
/// | `recommended_base_fee_sats`            | 256                |
/// | `min_relay_fee_rate_sat_per_vb`        | 1                  |
/// | `max_fee_share_percent`                | 50                 |
/// | `rbf_enabled`                          | true               |
/// | `settlement`                           | see [`SettlementConfig`] |
///
/// [`WalletCore`]: crate::WalletCore
pub struct Config {
	/// The smallest value an output not carrying data may have.
	pub dust_limit_sats: u64,
	/// The minimum absolute fee increase of a replacement transaction.
	///
	/// Also used as the threshold when deciding whether a transaction is worth boosting.
	pub recommended_base_fee_sats: u64,
	/// The minimum fee rate (in sats/vbyte) the network relays.
	pub min_relay_fee_rate_sat_per_vb: u64,
	/// The maximum share, in percent, of the spent inputs a boost fee may take up.
	pub max_fee_share_percent: u64,
	/// Whether the user allows replacing transactions via RBF.
	///
	/// If disabled, transactions are only boosted via CPFP.
	pub rbf_enabled: bool,
	/// Configuration of the cooperative close retry loop.
	pub settlement: SettlementConfig,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			dust_limit_sats: DEFAULT_DUST_LIMIT_SATS,
			recommended_base_fee_sats: DEFAULT_RECOMMENDED_BASE_FEE_SATS,
			min_relay_fee_rate_sat_per_vb: DEFAULT_MIN_RELAY_FEE_RATE_SAT_PER_VB,
			max_fee_share_percent: DEFAULT_MAX_FEE_SHARE_PERCENT,
			rbf_enabled: true,
			settlement: SettlementConfig::default(),
		}
	}
}

/// Options related to transferring funds back to on-chain by closing channels.
///
/// ### Defaults
///
/// | Parameter        | Value      |
/// |------------------|------------|
/// | `retry_interval` | 5 minutes  |
/// | `give_up_after`  | 30 minutes |
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SettlementConfig {
	/// The interval in which a cooperative close is re-attempted.
	pub retry_interval: Duration,
	/// The time after which we give up on closing cooperatively and offer a forced close.
	pub give_up_after: Duration,
}

impl Default for SettlementConfig {
	fn default() -> Self {
		Self {
			retry_interval: Duration::from_secs(DEFAULT_SETTLEMENT_RETRY_INTERVAL_SECS),
			give_up_after: Duration::from_secs(DEFAULT_SETTLEMENT_GIVE_UP_AFTER_SECS),
		}
	}
}

impl SettlementConfig {
	/// The maximum number of cooperative close attempts made before giving up.
	pub fn max_attempts(&self) -> u64 {
		let interval = self.retry_interval.as_millis();
		if interval == 0 {
			return 0;
		}
		(self.give_up_after.as_millis() / interval) as u64
	}
}
