// This file is Copyright its original authors, visible in version control history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. You may not use this file except in
// accordance with one or both of these licenses.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
/// An error that possibly needs to be handled by the user.
pub enum Error {
	/// A malformed amount, fee rate or identifier was passed in.
	InvalidInput,
	/// The requested transaction is not known to the wallet.
	TransactionNotFound,
	/// The transaction is already confirmed or cannot be bumped by either RBF or CPFP.
	NotBoostable,
	/// The requested fee rate lies outside of the session's allowed bounds.
	FeeOutOfBounds,
	/// The wallet lacks the funds to pay the requested fee.
	InsufficientFunds,
	/// The transaction would create an output below the dust limit.
	DustOutput,
	/// The fee would exceed the allowed share of the spent amount.
	FeeExceedsAmount,
	/// An input of the candidate transaction is no longer spendable.
	InputsUnavailable,
	/// A fee or amount calculation overflowed.
	FeeCalculationOverflow,
	/// A boost of this session is already being confirmed.
	BoostAlreadyInProgress,
	/// The given boost session handle is unknown or was already consumed.
	UnknownBoostSession,
	/// The chain collaborator failed to build or sign the transaction.
	OnchainTxCreationFailed,
	/// The transaction was rejected as it does not meet the minimum relay fee.
	MinRelayFeeNotMet,
	/// The transaction could not be handed to the network.
	ConnectivityFailure,
	/// Closing a channel failed.
	ChannelClosingFailed,
	/// Retrieving fee estimates failed.
	FeeEstimationFailed,
	/// A wallet query failed.
	WalletOperationFailed,
}

impl Error {
	/// Returns `true` if this error was raised while handing a transaction to the network.
	pub fn is_broadcast_failure(&self) -> bool {
		matches!(self, Self::MinRelayFeeNotMet | Self::ConnectivityFailure)
	}

	/// Returns `true` if the caller may retry the operation, possibly with different parameters.
	pub fn is_recoverable(&self) -> bool {
		match self {
			Self::FeeOutOfBounds
			| Self::MinRelayFeeNotMet
			| Self::ConnectivityFailure
			| Self::ChannelClosingFailed
			| Self::FeeEstimationFailed
			| Self::WalletOperationFailed
			| Self::BoostAlreadyInProgress => true,
			Self::InvalidInput
			| Self::TransactionNotFound
			| Self::NotBoostable
			| Self::InsufficientFunds
			| Self::DustOutput
			| Self::FeeExceedsAmount
			| Self::InputsUnavailable
			| Self::FeeCalculationOverflow
			| Self::UnknownBoostSession
			| Self::OnchainTxCreationFailed => false,
		}
	}

	/// Returns a title and description suitable to present this error in a toast or dialog.
	pub fn user_message(&self) -> UserMessage {
		let (title, description) = match self {
			Self::InvalidInput => ("Invalid input", "The entered amount or fee is not valid."),
			Self::TransactionNotFound => {
				("Transaction not found", "The transaction could not be found in this wallet.")
			},
			Self::NotBoostable => ("Boost failed", "Unable to boost this transaction."),
			Self::FeeOutOfBounds => {
				("Fee error", "The fee is outside of the allowed range. Please confirm the limit.")
			},
			Self::InsufficientFunds => {
				("Insufficient funds", "Your balance does not cover the increased fee.")
			},
			Self::DustOutput => {
				("Transaction invalid", "The transaction would create an output below the dust limit.")
			},
			Self::FeeExceedsAmount => {
				("Transaction invalid", "The fee would be higher than the amount being sent.")
			},
			Self::InputsUnavailable => {
				("Transaction invalid", "The funds of this transaction are no longer available.")
			},
			Self::FeeCalculationOverflow => ("Fee error", "The fee could not be calculated."),
			Self::BoostAlreadyInProgress => ("Boost in progress", "Please wait for the boost to finish."),
			Self::UnknownBoostSession => ("Boost failed", "The boost was cancelled. Please try again."),
			Self::OnchainTxCreationFailed => {
				("Boost failed", "Unable to create the boost transaction.")
			},
			Self::MinRelayFeeNotMet => {
				("Fee too low", "The minimum relay fee was not met. Please increase the fee and try again.")
			},
			Self::ConnectivityFailure => {
				("Broadcast failed", "Unable to reach the network. Please try again later.")
			},
			Self::ChannelClosingFailed => ("Transfer failed", "Unable to close the channel."),
			Self::FeeEstimationFailed => ("Fee error", "Unable to retrieve current network fees."),
			Self::WalletOperationFailed => ("Wallet error", "The wallet could not be queried."),
		};
		UserMessage { title: title.to_string(), description: description.to_string() }
	}
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			Self::InvalidInput => write!(f, "The given input is invalid."),
			Self::TransactionNotFound => write!(f, "The transaction could not be found."),
			Self::NotBoostable => write!(f, "The transaction cannot be boosted."),
			Self::FeeOutOfBounds => write!(f, "The requested fee rate is out of bounds."),
			Self::InsufficientFunds => write!(f, "There are insufficient funds to cover the fee."),
			Self::DustOutput => write!(f, "The transaction would create a dust output."),
			Self::FeeExceedsAmount => write!(f, "The fee exceeds the allowed share of the amount."),
			Self::InputsUnavailable => write!(f, "The transaction inputs are no longer available."),
			Self::FeeCalculationOverflow => write!(f, "Fee calculation overflowed."),
			Self::BoostAlreadyInProgress => write!(f, "A boost is already in progress."),
			Self::UnknownBoostSession => write!(f, "The boost session is unknown."),
			Self::OnchainTxCreationFailed => write!(f, "Failed to create on-chain transaction."),
			Self::MinRelayFeeNotMet => write!(f, "The minimum relay fee was not met."),
			Self::ConnectivityFailure => write!(f, "Failed to broadcast the transaction."),
			Self::ChannelClosingFailed => write!(f, "Failed to close channel."),
			Self::FeeEstimationFailed => write!(f, "Failed to retrieve fee estimates."),
			Self::WalletOperationFailed => write!(f, "Failed to conduct wallet operation."),
		}
	}
}

impl std::error::Error for Error {}

/// A (title, description) pair describing a failure to the user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMessage {
	/// A short headline.
	pub title: String,
	/// A sentence explaining what went wrong and what to do next.
	pub description: String,
}
