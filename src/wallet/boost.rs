// This file is Copyright its original authors, visible in version control history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. You may not use this file except in
// accordance with one or both of these licenses.

//! Fee-bumping of stuck on-chain transactions.
//!
//! A boost moves through `prepare` (plan RBF or CPFP, derive fee bounds), any number of fee
//! adjustments, and a single `confirm` that revalidates, builds and broadcasts the candidate.

use super::registry::BoostedTransactions;
use super::{
	apply_fee_rate, boost_eligibility, classify_broadcast_rejection, plan_cpfp, plan_rbf,
	validate_draft, BoostEligibility, BoostPlan, FeeBounds, TransactionDraft,
};
use crate::chain::{ActivityLedger, ChainSource};
use crate::config::Config;
use crate::fee_estimator::{apply_delta, BoostType, FeeEstimates, FeeTier};
use crate::logger::{log_debug, log_error, log_info, log_warn, LdkLogger, Logger};
use crate::types::{Utxo, WalletTransaction};
use crate::Error;

use bitcoin::consensus::encode::serialize_hex;
use bitcoin::{OutPoint, Transaction, Txid};

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// An opaque reference to an open boost session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoostSessionHandle(u64);

impl fmt::Display for BoostSessionHandle {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{:016x}", self.0)
	}
}

/// The current state of a boost session, as presented to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoostSession {
	/// The session's handle.
	pub handle: BoostSessionHandle,
	/// The transaction being boosted.
	pub original_txid: Txid,
	/// How the transaction is boosted.
	pub boost_type: BoostType,
	/// The fee rate (in sats/vbyte) of the transaction being boosted.
	pub original_fee_rate: u64,
	/// The fee rate of the candidate transaction.
	pub current_fee_rate: u64,
	/// The lowest selectable fee rate.
	pub min_fee_rate: u64,
	/// The highest selectable fee rate.
	pub max_fee_rate: u64,
	/// The absolute fee of the candidate transaction.
	pub fee_sats: u64,
	/// The tier the current fee rate was taken from.
	pub selected_fee_tier: FeeTier,
}

/// The result of a successful boost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoostOutcome {
	/// The ID of the broadcast transaction.
	pub txid: Txid,
	/// The broadcast transaction, hex-encoded.
	pub tx_hex: String,
	/// How the original transaction was boosted.
	pub boost_type: BoostType,
	/// The absolute fee of the broadcast transaction.
	pub fee_sats: u64,
	/// The fee rate of the broadcast transaction.
	pub fee_rate: u64,
	/// The transaction that was replaced or accelerated.
	pub boosted_txid: Txid,
}

struct SessionSlot {
	plan: BoostPlan,
	fees: FeeEstimates,
	// The wallet generation the session was opened in.
	wallet_generation: u64,
	confirming: bool,
	abandoned: bool,
}

impl SessionSlot {
	fn to_session(&self, handle: BoostSessionHandle) -> BoostSession {
		let draft = &self.plan.draft;
		BoostSession {
			handle,
			original_txid: draft.boosted_txid,
			boost_type: draft.boost_type,
			original_fee_rate: self.plan.original_fee_rate,
			current_fee_rate: draft.sats_per_vbyte,
			min_fee_rate: self.plan.bounds.min_sat_per_vb,
			max_fee_rate: self.plan.bounds.max_sat_per_vb,
			fee_sats: draft.fee_sats,
			selected_fee_tier: draft.selected_fee_tier,
		}
	}
}

pub(crate) struct BoostEngine {
	chain_source: Arc<dyn ChainSource>,
	ledger: Arc<dyn ActivityLedger>,
	registry: BoostedTransactions,
	config: Arc<Config>,
	sessions: Mutex<HashMap<BoostSessionHandle, SessionSlot>>,
	// Bumped on every reset. Only modified while holding the `sessions` lock.
	wallet_generation: AtomicU64,
	logger: Arc<Logger>,
}

impl BoostEngine {
	pub(crate) fn new(
		chain_source: Arc<dyn ChainSource>, ledger: Arc<dyn ActivityLedger>, config: Arc<Config>,
		logger: Arc<Logger>,
	) -> Self {
		let registry = BoostedTransactions::new();
		let sessions = Mutex::new(HashMap::new());
		let wallet_generation = AtomicU64::new(0);
		Self { chain_source, ledger, registry, config, sessions, wallet_generation, logger }
	}

	pub(crate) fn registry(&self) -> &BoostedTransactions {
		&self.registry
	}

	async fn fetch_transaction(&self, txid: &Txid) -> Result<WalletTransaction, Error> {
		self.chain_source
			.get_transaction(txid)
			.await
			.map_err(|e| {
				log_error!(self.logger, "Failed to look up transaction {}: {}", txid, e);
				e
			})?
			.ok_or_else(|| {
				log_error!(self.logger, "Transaction not found in wallet: {}", txid);
				Error::TransactionNotFound
			})
	}

	async fn fetch_utxos(&self) -> Result<Vec<Utxo>, Error> {
		self.chain_source.list_utxos().await.map_err(|e| {
			log_error!(self.logger, "Failed to list UTXOs: {}", e);
			e
		})
	}

	/// Returns which boost types are available for the given transaction.
	pub(crate) async fn can_boost(&self, txid: &Txid) -> Result<BoostEligibility, Error> {
		let tx = self.fetch_transaction(txid).await?;
		let utxos = self.fetch_utxos().await?;
		let balance = self.chain_source.onchain_balance().total_sats();
		Ok(boost_eligibility(&tx, &utxos, balance, &self.config))
	}

	/// Opens a boost session for the given transaction.
	pub(crate) async fn prepare(&self, txid: &Txid) -> Result<BoostSession, Error> {
		let tx = self.fetch_transaction(txid).await?;
		if tx.is_confirmed() {
			log_error!(self.logger, "Cannot boost confirmed transaction: {}", txid);
			return Err(Error::NotBoostable);
		}

		let utxos = self.fetch_utxos().await?;
		let fees = self.chain_source.fee_estimates().await.map_err(|e| {
			log_error!(self.logger, "Failed to retrieve fee estimates: {}", e);
			Error::FeeEstimationFailed
		})?;

		let balance = self.chain_source.onchain_balance().total_sats();
		let eligibility = boost_eligibility(&tx, &utxos, balance, &self.config);
		log_debug!(
			self.logger,
			"Boost eligibility of {}: rbf={}, cpfp={}",
			txid,
			eligibility.rbf,
			eligibility.cpfp
		);
		if !eligibility.can_boost() {
			log_error!(self.logger, "Transaction {} is not eligible for RBF or CPFP", txid);
			return Err(Error::NotBoostable);
		}

		let rbf_plan =
			if eligibility.rbf { plan_rbf(&tx, &fees, &self.config, &self.logger)? } else { None };

		let plan = match rbf_plan {
			Some(plan) => plan,
			None if eligibility.cpfp => {
				if eligibility.rbf {
					log_info!(self.logger, "Falling back to CPFP for transaction {}", txid);
				}
				let change_script = self.chain_source.change_script().await.map_err(|e| {
					log_error!(self.logger, "Failed to retrieve change script: {}", e);
					e
				})?;
				plan_cpfp(&tx, &utxos, change_script, &fees, &self.config, &self.logger)?
			},
			None => {
				log_error!(self.logger, "Transaction {} cannot be boosted with current funds", txid);
				return Err(Error::NotBoostable);
			},
		};

		let mut sessions = self.sessions.lock().unwrap();
		let handle = loop {
			let handle = BoostSessionHandle(rand::random());
			if !sessions.contains_key(&handle) {
				break handle;
			}
		};

		let wallet_generation = self.wallet_generation.load(Ordering::Acquire);
		let slot = SessionSlot { plan, fees, wallet_generation, confirming: false, abandoned: false };
		let session = slot.to_session(handle);
		sessions.insert(handle, slot);

		log_info!(
			self.logger,
			"Boost session {} opened for {} via {:?}: {} -> {} sat/vB (allowed {}..={})",
			handle,
			txid,
			session.boost_type,
			session.original_fee_rate,
			session.current_fee_rate,
			session.min_fee_rate,
			session.max_fee_rate
		);
		Ok(session)
	}

	// Runs `f` on a session that is not being confirmed.
	fn with_ready_session<F>(&self, handle: BoostSessionHandle, f: F) -> Result<BoostSession, Error>
	where
		F: FnOnce(&mut SessionSlot, &Config) -> Result<(), Error>,
	{
		let mut sessions = self.sessions.lock().unwrap();
		let slot = sessions.get_mut(&handle).ok_or_else(|| {
			log_error!(self.logger, "Unknown boost session: {}", handle);
			Error::UnknownBoostSession
		})?;
		if slot.confirming {
			log_warn!(self.logger, "Boost session {} is being confirmed", handle);
			return Err(Error::BoostAlreadyInProgress);
		}
		f(slot, self.config.as_ref())?;
		Ok(slot.to_session(handle))
	}

	/// Moves the fee rate by `delta` sats/vbyte, clamped to the session's bounds.
	pub(crate) fn adjust_fee(
		&self, handle: BoostSessionHandle, delta: i64,
	) -> Result<BoostSession, Error> {
		let session = self.with_ready_session(handle, |slot, config| {
			let current = slot.plan.draft.sats_per_vbyte;
			let requested =
				apply_delta(current, delta).unwrap_or(if delta < 0 { 0 } else { u64::MAX });
			let rate = slot.plan.bounds.clamp(requested);
			if rate != current {
				apply_fee_rate(&mut slot.plan.draft, rate, config)?;
				slot.plan.draft.selected_fee_tier = FeeTier::Custom;
			}
			Ok(())
		})?;
		log_debug!(
			self.logger,
			"Boost session {} fee rate now {} sat/vB ({} sats)",
			handle,
			session.current_fee_rate,
			session.fee_sats
		);
		Ok(session)
	}

	/// Sets a custom fee rate, failing with [`Error::FeeOutOfBounds`] if it lies outside of the
	/// session's bounds.
	pub(crate) fn set_fee_rate(
		&self, handle: BoostSessionHandle, rate_sat_per_vb: u64,
	) -> Result<BoostSession, Error> {
		if rate_sat_per_vb == 0 {
			return Err(Error::InvalidInput);
		}
		let logger = &self.logger;
		self.with_ready_session(handle, |slot, config| {
			let bounds = slot.plan.bounds;
			if !bounds.contains(rate_sat_per_vb) {
				log_error!(
					logger,
					"Fee rate {} sat/vB outside of {}..={} for boost session {}",
					rate_sat_per_vb,
					bounds.min_sat_per_vb,
					bounds.max_sat_per_vb,
					handle
				);
				return Err(Error::FeeOutOfBounds);
			}
			apply_fee_rate(&mut slot.plan.draft, rate_sat_per_vb, config)?;
			slot.plan.draft.selected_fee_tier = FeeTier::Custom;
			Ok(())
		})
	}

	/// Selects the rate of the given estimate tier, clamped to the session's bounds.
	pub(crate) fn select_fee_tier(
		&self, handle: BoostSessionHandle, tier: FeeTier,
	) -> Result<BoostSession, Error> {
		self.with_ready_session(handle, |slot, config| {
			let rate = slot.fees.rate_for(tier).ok_or(Error::InvalidInput)?;
			apply_fee_rate(&mut slot.plan.draft, slot.plan.bounds.clamp(rate), config)?;
			slot.plan.draft.selected_fee_tier = tier;
			Ok(())
		})
	}

	/// Returns the current state of a session.
	pub(crate) fn session(&self, handle: BoostSessionHandle) -> Result<BoostSession, Error> {
		let sessions = self.sessions.lock().unwrap();
		sessions.get(&handle).map(|s| s.to_session(handle)).ok_or(Error::UnknownBoostSession)
	}

	/// Discards a session. A confirmation already in flight is allowed to finish.
	pub(crate) fn abandon(&self, handle: BoostSessionHandle) -> Result<(), Error> {
		let mut sessions = self.sessions.lock().unwrap();
		let slot = sessions.get_mut(&handle).ok_or(Error::UnknownBoostSession)?;
		if slot.confirming {
			log_info!(self.logger, "Boost session {} abandoned while confirming", handle);
			slot.abandoned = true;
		} else {
			sessions.remove(&handle);
			log_info!(self.logger, "Boost session {} abandoned", handle);
		}
		Ok(())
	}

	/// Abandons all sessions and forgets all recorded boosts.
	///
	/// Confirmations in flight are allowed to finish, but their results are not recorded.
	pub(crate) fn reset(&self) {
		let mut sessions = self.sessions.lock().unwrap();
		self.wallet_generation.fetch_add(1, Ordering::AcqRel);
		sessions.retain(|_, slot| {
			slot.abandoned = true;
			slot.confirming
		});
		self.registry.clear();
	}

	/// Revalidates, builds and broadcasts the session's candidate transaction.
	pub(crate) async fn confirm(&self, handle: BoostSessionHandle) -> Result<BoostOutcome, Error> {
		let (draft, bounds, wallet_generation) = {
			let mut sessions = self.sessions.lock().unwrap();
			let slot = sessions.get_mut(&handle).ok_or_else(|| {
				log_error!(self.logger, "Unknown boost session: {}", handle);
				Error::UnknownBoostSession
			})?;
			if slot.confirming {
				log_warn!(self.logger, "Boost session {} is already being confirmed", handle);
				return Err(Error::BoostAlreadyInProgress);
			}
			slot.confirming = true;
			(slot.plan.draft.clone(), slot.plan.bounds, slot.wallet_generation)
		};

		let res = self.build_and_broadcast(&draft, &bounds).await;

		let mut sessions = self.sessions.lock().unwrap();
		match res {
			Ok(outcome) => {
				let abandoned = sessions.remove(&handle).map_or(true, |s| s.abandoned);
				if wallet_generation != self.wallet_generation.load(Ordering::Acquire) {
					log_warn!(
						self.logger,
						"Wallet switched while confirming boost session {}, not recording broadcast {}",
						handle,
						outcome.txid
					);
					return Ok(outcome);
				}
				if abandoned {
					log_info!(
						self.logger,
						"Boost session {} was abandoned, discarding result of broadcast {}",
						handle,
						outcome.txid
					);
				}

				// Recorded under the sessions lock, a concurrent reset must not interleave.
				let record = self.registry.insert(
					outcome.boosted_txid,
					outcome.txid,
					outcome.boost_type,
					outcome.fee_sats,
				);
				self.ledger.transaction_boosted(&record);
				Ok(outcome)
			},
			Err(e) => {
				if let Some(slot) = sessions.get_mut(&handle) {
					if slot.abandoned {
						sessions.remove(&handle);
					} else {
						slot.confirming = false;
					}
				}
				Err(e)
			},
		}
	}

	async fn build_and_broadcast(
		&self, draft: &TransactionDraft, bounds: &FeeBounds,
	) -> Result<BoostOutcome, Error> {
		validate_draft(draft, bounds, &self.config).map_err(|e| {
			log_error!(self.logger, "Boost of {} failed validation: {}", draft.boosted_txid, e);
			e
		})?;

		match draft.boost_type {
			BoostType::Rbf => {
				let original = self.fetch_transaction(&draft.boosted_txid).await?;
				if original.is_confirmed() {
					log_error!(
						self.logger,
						"Cannot replace transaction {}: confirmed in the meantime",
						draft.boosted_txid
					);
					return Err(Error::NotBoostable);
				}
			},
			BoostType::Cpfp => {
				let utxos = self.fetch_utxos().await?;
				let all_available = draft
					.inputs
					.iter()
					.all(|i| utxos.iter().any(|u| u.outpoint == i.outpoint));
				if !all_available {
					log_error!(
						self.logger,
						"Cannot accelerate transaction {}: its outputs were spent in the meantime",
						draft.boosted_txid
					);
					return Err(Error::InputsUnavailable);
				}
			},
		}

		let tx = self.chain_source.build_transaction(draft).await.map_err(|e| {
			log_error!(self.logger, "Failed to create boost transaction: {}", e);
			Error::OnchainTxCreationFailed
		})?;
		self.check_built_transaction(draft, &tx)?;

		let txid = tx.compute_txid();
		self.chain_source.broadcast_transaction(&tx).await.map_err(|rejection| {
			let err = classify_broadcast_rejection(&rejection);
			log_error!(self.logger, "Failed to broadcast boost transaction {}: {}", txid, rejection);
			err
		})?;

		log_info!(
			self.logger,
			"Boosted {} via {:?}: broadcast {} paying {} sats ({} sat/vB)",
			draft.boosted_txid,
			draft.boost_type,
			txid,
			draft.fee_sats,
			draft.sats_per_vbyte
		);

		Ok(BoostOutcome {
			txid,
			tx_hex: serialize_hex(&tx),
			boost_type: draft.boost_type,
			fee_sats: draft.fee_sats,
			fee_rate: draft.sats_per_vbyte,
			boosted_txid: draft.boosted_txid,
		})
	}

	// The collaborator must build exactly what was confirmed by the user.
	fn check_built_transaction(&self, draft: &TransactionDraft, tx: &Transaction) -> Result<(), Error> {
		let mut built: Vec<OutPoint> = tx.input.iter().map(|i| i.previous_output).collect();
		let mut expected: Vec<OutPoint> = draft.inputs.iter().map(|i| i.outpoint).collect();
		built.sort();
		expected.sort();

		let built_output_total =
			tx.output.iter().fold(0u64, |acc, o| acc.saturating_add(o.value.to_sat()));

		if built != expected || built_output_total != draft.output_total_sats() {
			log_error!(
				self.logger,
				"Built boost transaction {} does not match the confirmed draft",
				tx.compute_txid()
			);
			return Err(Error::OnchainTxCreationFailed);
		}
		Ok(())
	}
}
