// This file is Copyright its original authors, visible in version control history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. You may not use this file except in
// accordance with one or both of these licenses.

use crate::chain::{ActivityLedger, ChainSource, LightningNode};
use crate::config::{Config, DEFAULT_LOG_FILE_PATH, DEFAULT_LOG_LEVEL};
use crate::logger::{log_error, log_info, LdkLogger, LogLevel, LogWriter, Logger};
use crate::settlement::{SettlementEventHandler, TransferSettlementMonitor};
use crate::types::WalletContext;
use crate::wallet::boost::BoostEngine;
use crate::WalletCore;

use bitcoin::Network;

use std::fmt;
use std::sync::{Arc, RwLock};

const DEFAULT_WALLET_NAME: &str = "wallet0";

#[derive(Clone)]
enum LogWriterConfig {
	File { log_file_path: Option<String>, max_log_level: Option<LogLevel> },
	Log,
	Custom(Arc<dyn LogWriter>),
}

impl fmt::Debug for LogWriterConfig {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			LogWriterConfig::File { max_log_level, log_file_path } => f
				.debug_struct("LogWriterConfig")
				.field("max_log_level", max_log_level)
				.field("log_file_path", log_file_path)
				.finish(),
			LogWriterConfig::Log => write!(f, "LogWriterConfig::Log"),
			LogWriterConfig::Custom(_) => {
				f.debug_tuple("Custom").field(&"<config internal to custom log writer>").finish()
			},
		}
	}
}

/// An error encountered during building a [`WalletCore`].
#[derive(Debug, Clone, PartialEq)]
pub enum BuildError {
	/// The configured settlement retry interval or deadline is invalid.
	InvalidSettlementConfig,
	/// The configured fee parameters are invalid.
	InvalidFeeConfig,
	/// We failed to setup the logger.
	LoggerSetupFailed,
	/// We failed to find a runtime to spawn background tasks on.
	RuntimeSetupFailed,
}

impl fmt::Display for BuildError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			Self::InvalidSettlementConfig => write!(f, "Given settlement config is invalid."),
			Self::InvalidFeeConfig => write!(f, "Given fee config is invalid."),
			Self::LoggerSetupFailed => write!(f, "Failed to setup the logger."),
			Self::RuntimeSetupFailed => write!(f, "Failed to setup a runtime."),
		}
	}
}

impl std::error::Error for BuildError {}

/// A builder for a [`WalletCore`] instance, allowing to set some configuration and module choices
/// from the getgo.
///
/// ### Defaults
/// - Wallet context: `wallet0` on [`Network::Bitcoin`]
/// - Logging: filesystem logger writing to `/tmp/bitkit_core/logs/bitkit_core.log` at
///   [`LogLevel::Debug`]
/// - Runtime: the `tokio` runtime `build` is called from
#[derive(Default)]
pub struct Builder {
	config: Config,
	log_writer_config: Option<LogWriterConfig>,
	wallet_context: Option<WalletContext>,
	event_handler: Option<Arc<dyn SettlementEventHandler>>,
	runtime: Option<tokio::runtime::Handle>,
}

impl Builder {
	/// Creates a new builder instance with the default configuration.
	pub fn new() -> Self {
		Self::default()
	}

	/// Creates a new builder instance from a [`Config`].
	pub fn from_config(config: Config) -> Self {
		Self { config, ..Self::default() }
	}

	/// Configures the [`WalletCore`] instance to write logs to the filesystem.
	///
	/// The `log_file_path` defaults to `/tmp/bitkit_core/logs/bitkit_core.log` and
	/// `max_log_level` to [`LogLevel::Debug`] if `None` is given.
	pub fn set_filesystem_logger(
		&mut self, log_file_path: Option<String>, max_log_level: Option<LogLevel>,
	) -> &mut Self {
		self.log_writer_config = Some(LogWriterConfig::File { log_file_path, max_log_level });
		self
	}

	/// Configures the [`WalletCore`] instance to write logs to the [`log`] facade.
	pub fn set_log_facade_logger(&mut self) -> &mut Self {
		self.log_writer_config = Some(LogWriterConfig::Log);
		self
	}

	/// Configures the [`WalletCore`] instance to write logs to the provided custom [`LogWriter`].
	pub fn set_custom_logger(&mut self, log_writer: Arc<dyn LogWriter>) -> &mut Self {
		self.log_writer_config = Some(LogWriterConfig::Custom(log_writer));
		self
	}

	/// Sets the wallet and network the [`WalletCore`] starts out with.
	pub fn set_wallet_context(&mut self, wallet_name: String, network: Network) -> &mut Self {
		self.wallet_context = Some(WalletContext::new(wallet_name, network));
		self
	}

	/// Sets the handler notified about terminal settlement outcomes.
	pub fn set_settlement_event_handler(
		&mut self, handler: Arc<dyn SettlementEventHandler>,
	) -> &mut Self {
		self.event_handler = Some(handler);
		self
	}

	/// Sets the runtime background tasks are spawned on.
	pub fn set_runtime(&mut self, runtime: tokio::runtime::Handle) -> &mut Self {
		self.runtime = Some(runtime);
		self
	}

	/// Builds a [`WalletCore`] instance operating on the given collaborators.
	pub fn build(
		&self, chain_source: Arc<dyn ChainSource>, lightning_node: Arc<dyn LightningNode>,
		ledger: Arc<dyn ActivityLedger>,
	) -> Result<WalletCore, BuildError> {
		let logger = setup_logger(&self.log_writer_config)?;

		let settlement = &self.config.settlement;
		if settlement.retry_interval.is_zero() || settlement.give_up_after < settlement.retry_interval
		{
			log_error!(
				logger,
				"Invalid settlement config: retry every {:?}, give up after {:?}",
				settlement.retry_interval,
				settlement.give_up_after
			);
			return Err(BuildError::InvalidSettlementConfig);
		}

		if !(1..=100).contains(&self.config.max_fee_share_percent)
			|| self.config.min_relay_fee_rate_sat_per_vb == 0
		{
			log_error!(
				logger,
				"Invalid fee config: max fee share {}%, min relay fee rate {} sat/vB",
				self.config.max_fee_share_percent,
				self.config.min_relay_fee_rate_sat_per_vb
			);
			return Err(BuildError::InvalidFeeConfig);
		}

		let runtime = match &self.runtime {
			Some(runtime) => runtime.clone(),
			None => tokio::runtime::Handle::try_current().map_err(|e| {
				log_error!(logger, "Failed to find a runtime: {}", e);
				BuildError::RuntimeSetupFailed
			})?,
		};

		let config = Arc::new(self.config.clone());
		let wallet_context = self
			.wallet_context
			.clone()
			.unwrap_or_else(|| WalletContext::new(DEFAULT_WALLET_NAME, Network::Bitcoin));

		let boost_engine = BoostEngine::new(
			Arc::clone(&chain_source),
			Arc::clone(&ledger),
			Arc::clone(&config),
			Arc::clone(&logger),
		);
		let settlement_monitor = TransferSettlementMonitor::new(
			Arc::clone(&lightning_node),
			config.settlement,
			self.event_handler.clone(),
			runtime,
			Arc::clone(&logger),
		);

		log_info!(logger, "Wallet core initialized for {}", wallet_context);

		Ok(WalletCore {
			config,
			wallet_context: RwLock::new(wallet_context),
			chain_source,
			lightning_node,
			ledger,
			boost_engine,
			settlement_monitor,
			logger,
		})
	}
}

/// Sets up a logger according to the given configuration.
fn setup_logger(config: &Option<LogWriterConfig>) -> Result<Arc<Logger>, BuildError> {
	let logger = match config {
		Some(LogWriterConfig::File { log_file_path, max_log_level }) => {
			let log_file_path = log_file_path.clone().unwrap_or(DEFAULT_LOG_FILE_PATH.to_string());
			let max_log_level = max_log_level.unwrap_or(DEFAULT_LOG_LEVEL);
			Logger::new_fs_writer(log_file_path, max_log_level)
				.map_err(|_| BuildError::LoggerSetupFailed)?
		},
		Some(LogWriterConfig::Log) => Logger::new_log_facade(),
		Some(LogWriterConfig::Custom(custom_log_writer)) => {
			Logger::new_custom_writer(Arc::clone(custom_log_writer))
		},
		None => Logger::new_fs_writer(DEFAULT_LOG_FILE_PATH.to_string(), DEFAULT_LOG_LEVEL)
			.map_err(|_| BuildError::LoggerSetupFailed)?,
	};

	Ok(Arc::new(logger))
}
