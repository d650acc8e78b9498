// This file is Copyright its original authors, visible in version control history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. You may not use this file except in
// accordance with one or both of these licenses.

//! Retrying cooperative channel closes until they settle or a deadline passes.

use crate::chain::LightningNode;
use crate::config::SettlementConfig;
use crate::logger::{log_debug, log_error, log_info, log_warn, LdkLogger, Logger};
use crate::types::{ChannelId, WalletContext};
use crate::Error;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Marks when the current cooperative close attempts started.
///
/// Callers persist this value so that attempts can be resumed after a restart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSettlementTimer {
	/// Milliseconds since the UNIX epoch, or `None` if no settlement is active.
	pub start_timestamp: Option<u64>,
}

impl TransferSettlementTimer {
	pub(crate) fn started_now() -> Self {
		Self { start_timestamp: Some(now_millis()) }
	}

	/// Returns `true` while a settlement is being attempted.
	pub fn is_active(&self) -> bool {
		self.start_timestamp.is_some()
	}

	/// The time passed between the start and `now_millis`, if active.
	pub fn elapsed_at(&self, now_millis: u64) -> Option<Duration> {
		self.start_timestamp.map(|start| Duration::from_millis(now_millis.saturating_sub(start)))
	}
}

fn now_millis() -> u64 {
	Utc::now().timestamp_millis().max(0) as u64
}

/// The state of the cooperative close attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementState {
	/// No settlement is being attempted.
	Idle,
	/// Cooperative closes are being attempted periodically.
	Retrying,
	/// All channels were closed cooperatively.
	Settled,
	/// The deadline passed. The user should be offered to force-close the remaining channels.
	GivenUp,
}

/// The terminal outcome of a settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementOutcome {
	/// All channels were closed cooperatively.
	Settled,
	/// Cooperative closes did not succeed in time.
	GivenUp,
}

/// Receives the outcome of a settlement.
pub trait SettlementEventHandler: Send + Sync {
	/// Called exactly once per settlement that reaches a terminal state.
	///
	/// A persisted timer that already expired is reported from within `resume_settlement_retry`,
	/// so implementations must not switch wallets from within this call.
	fn on_settlement_outcome(&self, context: &WalletContext, outcome: SettlementOutcome);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickAction {
	AttemptClose,
	GiveUp,
}

/// Decides what to do on a tick, given the time passed since the settlement started.
pub(crate) fn tick_action(elapsed: Duration, config: &SettlementConfig) -> TickAction {
	if elapsed > config.give_up_after {
		TickAction::GiveUp
	} else {
		TickAction::AttemptClose
	}
}

struct ActiveSettlement {
	context: WalletContext,
	timer: TransferSettlementTimer,
	generation: u64,
	stop_sender: watch::Sender<()>,
	handle: JoinHandle<()>,
}

// Everything the spawned retry loop needs.
#[derive(Clone)]
struct LoopShared {
	lightning_node: Arc<dyn LightningNode>,
	config: SettlementConfig,
	event_handler: Option<Arc<dyn SettlementEventHandler>>,
	active: Arc<Mutex<Option<ActiveSettlement>>>,
	state: Arc<watch::Sender<SettlementState>>,
	logger: Arc<Logger>,
}

impl LoopShared {
	// Concludes the settlement of the given generation, unless it was superseded meanwhile.
	fn finish(&self, context: &WalletContext, generation: u64, outcome: SettlementOutcome) {
		{
			let mut active = self.active.lock().unwrap();
			match active.as_ref() {
				Some(a) if a.generation == generation => {
					active.take();
				},
				_ => return,
			}
			let state = match outcome {
				SettlementOutcome::Settled => SettlementState::Settled,
				SettlementOutcome::GivenUp => SettlementState::GivenUp,
			};
			self.state.send_replace(state);
		}

		log_info!(self.logger, "Settlement for {} finished: {:?}", context, outcome);
		if let Some(handler) = &self.event_handler {
			handler.on_settlement_outcome(context, outcome);
		}
	}
}

/// Drives cooperative channel closes for the selected wallet.
///
/// At most one retry loop runs at a time. It is bound to the [`WalletContext`] it was started
/// for and must be cancelled when switching wallets.
pub(crate) struct TransferSettlementMonitor {
	shared: LoopShared,
	runtime: tokio::runtime::Handle,
	next_generation: Mutex<u64>,
}

impl TransferSettlementMonitor {
	pub(crate) fn new(
		lightning_node: Arc<dyn LightningNode>, config: SettlementConfig,
		event_handler: Option<Arc<dyn SettlementEventHandler>>, runtime: tokio::runtime::Handle,
		logger: Arc<Logger>,
	) -> Self {
		let (state_sender, _) = watch::channel(SettlementState::Idle);
		let shared = LoopShared {
			lightning_node,
			config,
			event_handler,
			active: Arc::new(Mutex::new(None)),
			state: Arc::new(state_sender),
			logger,
		};
		Self { shared, runtime, next_generation: Mutex::new(0) }
	}

	pub(crate) fn state(&self) -> SettlementState {
		*self.shared.state.borrow()
	}

	pub(crate) fn subscribe(&self) -> watch::Receiver<SettlementState> {
		self.shared.state.subscribe()
	}

	/// The timer of the active settlement, or an inactive timer.
	pub(crate) fn timer(&self) -> TransferSettlementTimer {
		let active = self.shared.active.lock().unwrap();
		active.as_ref().map(|a| a.timer).unwrap_or_default()
	}

	/// Starts attempting cooperative closes for `context`.
	///
	/// Does nothing if a settlement for the same context is already running. A settlement for a
	/// different context is cancelled first.
	pub(crate) fn start(&self, context: WalletContext) -> TransferSettlementTimer {
		let mut active = self.shared.active.lock().unwrap();
		if let Some(current) = active.as_ref() {
			if current.context == context {
				log_debug!(self.shared.logger, "Settlement for {} already running", context);
				return current.timer;
			}
		}
		if let Some(stale) = active.take() {
			log_warn!(
				self.shared.logger,
				"Cancelling settlement for {} to start one for {}",
				stale.context,
				context
			);
			stop(stale);
		}

		let timer = TransferSettlementTimer::started_now();
		*active = Some(self.spawn_loop(context, timer, Duration::ZERO));
		timer
	}

	/// Continues a settlement started earlier, e.g., before a restart.
	///
	/// Time passed since `timer` was started counts towards the deadline. If it already passed,
	/// the settlement is given up right away.
	pub(crate) fn resume(
		&self, context: WalletContext, timer: TransferSettlementTimer,
	) -> Result<(), Error> {
		let already_elapsed = timer.elapsed_at(now_millis()).ok_or(Error::InvalidInput)?;

		let mut active = self.shared.active.lock().unwrap();
		if let Some(current) = active.as_ref() {
			if current.context == context {
				log_debug!(self.shared.logger, "Settlement for {} already running", context);
				return Ok(());
			}
		}
		if let Some(stale) = active.take() {
			stop(stale);
		}

		if tick_action(already_elapsed, &self.shared.config) == TickAction::GiveUp {
			self.shared.state.send_replace(SettlementState::GivenUp);
			drop(active);
			log_info!(
				self.shared.logger,
				"Settlement for {} expired {}s after start, giving up",
				context,
				already_elapsed.as_secs()
			);
			if let Some(handler) = &self.shared.event_handler {
				handler.on_settlement_outcome(&context, SettlementOutcome::GivenUp);
			}
			return Ok(());
		}

		log_info!(
			self.shared.logger,
			"Resuming settlement for {}, {}s after start",
			context,
			already_elapsed.as_secs()
		);
		*active = Some(self.spawn_loop(context, timer, already_elapsed));
		Ok(())
	}

	/// Stops the active settlement, if any, and returns to [`SettlementState::Idle`].
	pub(crate) fn cancel(&self) -> bool {
		let mut active = self.shared.active.lock().unwrap();
		let cancelled = active.take().map(|stale| {
			log_info!(self.shared.logger, "Cancelled settlement for {}", stale.context);
			stop(stale);
		});
		self.shared.state.send_replace(SettlementState::Idle);
		cancelled.is_some()
	}

	/// Cancels any cooperative attempts and force-closes all channels.
	///
	/// Returns the channels that could not be closed.
	pub(crate) async fn force_close_all(&self) -> Result<Vec<ChannelId>, Error> {
		self.cancel();
		let remaining = self.shared.lightning_node.close_channels(true).await.map_err(|e| {
			log_error!(self.shared.logger, "Failed to force-close channels: {}", e);
			Error::ChannelClosingFailed
		})?;
		if remaining.is_empty() {
			log_info!(self.shared.logger, "Force-closed all channels");
		} else {
			log_warn!(self.shared.logger, "{} channel(s) could not be force-closed", remaining.len());
		}
		Ok(remaining)
	}

	fn spawn_loop(
		&self, context: WalletContext, timer: TransferSettlementTimer, already_elapsed: Duration,
	) -> ActiveSettlement {
		let generation = {
			let mut next = self.next_generation.lock().unwrap();
			*next += 1;
			*next
		};
		let (stop_sender, stop_receiver) = watch::channel(());

		self.shared.state.send_replace(SettlementState::Retrying);
		log_info!(
			self.shared.logger,
			"Attempting cooperative close for {} every {}s, giving up after {}s ({} attempts at most)",
			context,
			self.shared.config.retry_interval.as_secs(),
			self.shared.config.give_up_after.as_secs(),
			self.shared.config.max_attempts()
		);

		let shared = self.shared.clone();
		let loop_context = context.clone();
		let handle = self.runtime.spawn(async move {
			retry_loop(shared, loop_context, generation, already_elapsed, stop_receiver).await
		});

		ActiveSettlement { context, timer, generation, stop_sender, handle }
	}
}

fn stop(settlement: ActiveSettlement) {
	let _ = settlement.stop_sender.send(());
	settlement.handle.abort();
}

async fn retry_loop(
	shared: LoopShared, context: WalletContext, generation: u64, already_elapsed: Duration,
	mut stop_receiver: watch::Receiver<()>,
) {
	let retry_interval = shared.config.retry_interval;
	let start = Instant::now();
	let mut interval = tokio::time::interval_at(start + retry_interval, retry_interval);
	interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
	let mut attempts = 0u64;

	loop {
		tokio::select! {
			_ = stop_receiver.changed() => {
				return;
			}
			_ = interval.tick() => {
				let elapsed = already_elapsed + start.elapsed();
				if tick_action(elapsed, &shared.config) == TickAction::GiveUp {
					log_warn!(
						shared.logger,
						"Giving up cooperative close for {} after {} attempt(s)",
						context,
						attempts
					);
					shared.finish(&context, generation, SettlementOutcome::GivenUp);
					return;
				}

				attempts += 1;
				log_debug!(shared.logger, "Cooperative close attempt {} for {}", attempts, context);
				let res = tokio::select! {
					_ = stop_receiver.changed() => {
						return;
					}
					res = shared.lightning_node.close_channels(false) => res,
				};

				match res {
					Ok(remaining) if remaining.is_empty() => {
						shared.finish(&context, generation, SettlementOutcome::Settled);
						return;
					},
					Ok(remaining) => {
						log_info!(
							shared.logger,
							"{} channel(s) of {} still open, retrying in {}s",
							remaining.len(),
							context,
							retry_interval.as_secs()
						);
					},
					Err(e) => {
						log_warn!(
							shared.logger,
							"Cooperative close attempt {} for {} failed: {}",
							attempts,
							context,
							e
						);
					},
				}
			}
		}
	}
}
