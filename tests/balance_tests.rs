// This file is Copyright its original authors, visible in version control history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. You may not use this file except in
// accordance with one or both of these licenses.

mod common;

use common::logging::MockLogWriter;
use common::{channel_id, ready_channel, setup_core, TestChainSource, TestLedger, TestLightningNode};

use bitkit_core::balance::compute_snapshot;
use bitkit_core::config::{Config, SettlementConfig};
use bitkit_core::lightning::ln::channelmanager::PaymentId;
use bitkit_core::types::{
	ChannelDetails, ClaimableBalance, OnchainBalance, PendingPayment, PendingTransfer, TransferKind,
};
use bitkit_core::{BuildError, Builder, LspChannelOptions};

use proptest::prelude::*;

use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn snapshot_combines_onchain_and_channels() {
	let harness = setup_core(Config::default());
	*harness.chain_source.onchain.lock().unwrap() =
		OnchainBalance { confirmed_sats: 100_000, unconfirmed_sats: 0 };
	*harness.lightning_node.channels.lock().unwrap() = vec![ready_channel(1, 100_000, 50_000, 45_000)];

	let snapshot = harness.core.balance_snapshot();
	assert_eq!(snapshot.onchain_balance_sats, 100_000);
	assert_eq!(snapshot.spending_balance_sats, 45_000);
	assert_eq!(snapshot.reserve_balance_sats, 5_000);
	assert_eq!(snapshot.lightning_balance_sats, 50_000);
	assert_eq!(snapshot.spendable_balance_sats, 145_000);
	assert_eq!(snapshot.total_balance_sats, 150_000);

	let channel = harness.core.channel_balance(&channel_id(1)).unwrap();
	assert_eq!(channel.spending_total_sats, 50_000);
	assert_eq!(channel.spending_available_sats, 45_000);
	assert_eq!(channel.receiving_total_sats, 50_000);
	assert_eq!(channel.capacity_sats, 100_000);
	assert!(harness.core.channel_balance(&channel_id(2)).is_none());

	assert_eq!(harness.core.local_remote_balance(false), (45_000, 50_000));
	assert_eq!(harness.core.local_remote_balance(true), (50_000, 50_000));
	assert_eq!(harness.core.max_inbound_capacity(), 50_000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn closing_channel_funds_are_claimable() {
	let harness = setup_core(Config::default());
	let mut closing = ready_channel(2, 80_000, 30_000, 28_000);
	closing.is_channel_ready = false;
	*harness.lightning_node.channels.lock().unwrap() = vec![closing];
	*harness.chain_source.claimable.lock().unwrap() =
		vec![ClaimableBalance { channel_id: channel_id(2), amount_sats: 29_500 }];

	let details = harness.core.balance_details();
	assert_eq!(details.snapshot.spending_balance_sats, 0);
	assert_eq!(details.snapshot.reserve_balance_sats, 0);
	assert_eq!(details.snapshot.claimable_balance_sats, 29_500);
	assert_eq!(details.snapshot.total_balance_sats, 29_500);
	assert_eq!(details.in_transfer_to_savings_sats, 29_500);
	assert_eq!(details.total_including_transfers_sats(), 29_500);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn details_include_pending_activity() {
	let harness = setup_core(Config::default());
	*harness.chain_source.onchain.lock().unwrap() =
		OnchainBalance { confirmed_sats: 10_000, unconfirmed_sats: 5_000 };
	*harness.ledger.transfers.lock().unwrap() = vec![
		PendingTransfer {
			kind: TransferKind::Open,
			amount_sats: 40_000,
			channel_id: Some(channel_id(3)),
			txid: None,
		},
		PendingTransfer {
			kind: TransferKind::CoopClose,
			amount_sats: 12_000,
			channel_id: Some(channel_id(4)),
			txid: None,
		},
	];
	*harness.ledger.payments.lock().unwrap() =
		vec![PendingPayment { payment_id: PaymentId([7; 32]), amount_sats: 2_100 }];

	let details = harness.core.balance_details();
	assert_eq!(details.snapshot.total_balance_sats, 15_000);
	assert_eq!(details.in_transfer_to_spending_sats, 40_000);
	assert_eq!(details.pending_payments_sats, 2_100);
	assert_eq!(details.total_including_transfers_sats(), 55_000);

	// Once the channel is ready its funds show up as spending instead.
	*harness.lightning_node.channels.lock().unwrap() = vec![ready_channel(3, 80_000, 40_000, 39_000)];
	let details = harness.core.balance_details();
	assert_eq!(details.in_transfer_to_spending_sats, 0);
	assert_eq!(details.snapshot.lightning_balance_sats, 40_000);
	assert_eq!(details.total_including_transfers_sats(), 55_000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn inconsistent_channel_is_clamped_and_logged() {
	let harness = setup_core(Config::default());
	let mut broken = ready_channel(5, 100_000, 50_000, 45_000);
	broken.outbound_capacity_sats = 55_000;
	*harness.lightning_node.channels.lock().unwrap() = vec![broken];

	let snapshot = harness.core.balance_snapshot();
	assert_eq!(snapshot.spending_balance_sats, 55_000);
	assert_eq!(snapshot.reserve_balance_sats, 0);
	assert!(harness.log_writer.contains("Inconsistent channel funds reported: OutboundExceedsBalance"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn transfer_limits_account_for_existing_channels() {
	let harness = setup_core(Config::default());
	*harness.chain_source.onchain.lock().unwrap() =
		OnchainBalance { confirmed_sats: 400_000, unconfirmed_sats: 100_000 };
	*harness.lightning_node.channels.lock().unwrap() = vec![ready_channel(1, 200_000, 0, 0)];

	let lsp = LspChannelOptions { min_channel_size_sats: 100_000, max_channel_size_sats: 1_000_000 };
	let limits = harness.core.transfer_limits(&lsp);
	assert_eq!(limits.min_channel_size_sats, 105_000);
	assert_eq!(limits.max_channel_size_sats, 750_000);
	assert_eq!(limits.max_client_balance_sats, 375_000);

	*harness.chain_source.onchain.lock().unwrap() =
		OnchainBalance { confirmed_sats: 50_000, unconfirmed_sats: 0 };
	assert_eq!(harness.core.transfer_limits(&lsp).max_client_balance_sats, 40_000);
}

fn builder_with_mock_logger(config: Config) -> Builder {
	let mut builder = Builder::from_config(config);
	builder.set_custom_logger(MockLogWriter::new());
	builder
}

fn collaborators() -> (Arc<TestChainSource>, Arc<TestLightningNode>, Arc<TestLedger>) {
	(Arc::new(TestChainSource::new()), Arc::new(TestLightningNode::new()), Arc::new(TestLedger::default()))
}

#[test]
fn build_requires_runtime() {
	let (chain_source, lightning_node, ledger) = collaborators();
	let res = builder_with_mock_logger(Config::default()).build(chain_source, lightning_node, ledger);
	assert_eq!(res.err(), Some(BuildError::RuntimeSetupFailed));
}

#[test]
fn build_rejects_invalid_config() {
	let (chain_source, lightning_node, ledger) = collaborators();

	let settlement = SettlementConfig {
		retry_interval: Duration::from_secs(600),
		give_up_after: Duration::from_secs(300),
	};
	let config = Config { settlement, ..Config::default() };
	let res = builder_with_mock_logger(config).build(
		chain_source.clone(),
		lightning_node.clone(),
		ledger.clone(),
	);
	assert_eq!(res.err(), Some(BuildError::InvalidSettlementConfig));

	let config = Config { max_fee_share_percent: 0, ..Config::default() };
	let res = builder_with_mock_logger(config).build(chain_source, lightning_node, ledger);
	assert_eq!(res.err(), Some(BuildError::InvalidFeeConfig));
}

fn arb_channel() -> impl Strategy<Value = ChannelDetails> {
	(1u8..=255, 0u64..10_000_000, any::<bool>())
		.prop_flat_map(|(id, value, ready)| {
			(Just(id), Just(value), 0..=value, Just(ready))
		})
		.prop_flat_map(|(id, value, balance, ready)| {
			(Just(id), Just(value), Just(balance), 0..=balance, Just(ready))
		})
		.prop_map(|(id, value, balance, outbound, ready)| {
			let mut channel = common::ready_channel(id, value, balance, outbound);
			channel.is_channel_ready = ready;
			channel
		})
}

proptest! {
	#[test]
	fn snapshot_identities_hold(
		confirmed in 0u64..2_100_000_000_000_000,
		unconfirmed in 0u64..1_000_000_000,
		channels in prop::collection::vec(arb_channel(), 0..8),
		claimable in prop::collection::vec(0u64..10_000_000, 0..4),
	) {
		let onchain = OnchainBalance { confirmed_sats: confirmed, unconfirmed_sats: unconfirmed };
		let claimable: Vec<_> = claimable
			.into_iter()
			.enumerate()
			.map(|(i, amount_sats)| ClaimableBalance { channel_id: channel_id(i as u8), amount_sats })
			.collect();

		let s = compute_snapshot(&onchain, &channels, &claimable);
		prop_assert_eq!(
			s.lightning_balance_sats,
			s.spending_balance_sats + s.reserve_balance_sats + s.claimable_balance_sats
		);
		prop_assert_eq!(s.spendable_balance_sats, s.onchain_balance_sats + s.spending_balance_sats);
		prop_assert_eq!(s.total_balance_sats, s.onchain_balance_sats + s.lightning_balance_sats);
		prop_assert!(s.spendable_balance_sats <= s.total_balance_sats);

		let ready_funds: u64 =
			channels.iter().filter(|c| c.is_channel_ready).map(|c| c.balance_sats).sum();
		prop_assert_eq!(s.spending_balance_sats + s.reserve_balance_sats, ready_funds);
	}
}
