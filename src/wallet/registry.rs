// This file is Copyright its original authors, visible in version control history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. You may not use this file except in
// accordance with one or both of these licenses.

use crate::fee_estimator::BoostType;

use bitcoin::Txid;
use serde::{Deserialize, Serialize};

use std::collections::HashMap;
use std::sync::RwLock;

/// A boost that was broadcast successfully.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoostedTransaction {
	/// The transaction that was replaced or accelerated.
	pub parent_txid: Txid,
	/// The replacement (RBF) or child (CPFP) transaction.
	pub child_txid: Txid,
	/// How the parent was boosted.
	pub boost_type: BoostType,
	/// The fee paid by the child transaction.
	pub fee_sats: u64,
	/// All earlier transactions in the boost chain, oldest first, ending with `parent_txid`.
	pub parent_transactions: Vec<Txid>,
}

/// Keeps track of performed boosts, keyed by the boosting transaction.
///
/// A transaction may be boosted repeatedly, e.g., when a replacement gets stuck again. The
/// registry links each boost to the whole chain of transactions it supersedes.
pub(crate) struct BoostedTransactions {
	entries: RwLock<HashMap<Txid, BoostedTransaction>>,
}

impl BoostedTransactions {
	pub(crate) fn new() -> Self {
		Self { entries: RwLock::new(HashMap::new()) }
	}

	/// Records a boost of `parent_txid` by `child_txid` and returns the stored entry.
	pub(crate) fn insert(
		&self, parent_txid: Txid, child_txid: Txid, boost_type: BoostType, fee_sats: u64,
	) -> BoostedTransaction {
		let mut entries = self.entries.write().unwrap();
		let mut parent_transactions = entries
			.get(&parent_txid)
			.map(|e| e.parent_transactions.clone())
			.unwrap_or_default();
		parent_transactions.push(parent_txid);

		let entry = BoostedTransaction {
			parent_txid,
			child_txid,
			boost_type,
			fee_sats,
			parent_transactions,
		};
		entries.insert(child_txid, entry.clone());
		entry
	}

	pub(crate) fn get(&self, child_txid: &Txid) -> Option<BoostedTransaction> {
		self.entries.read().unwrap().get(child_txid).cloned()
	}

	/// Returns all transactions superseded by `txid`, oldest first.
	pub(crate) fn boosted_parents(&self, txid: &Txid) -> Vec<Txid> {
		self.entries
			.read()
			.unwrap()
			.get(txid)
			.map(|e| e.parent_transactions.clone())
			.unwrap_or_default()
	}

	/// Returns the first transaction of the boost chain `txid` belongs to, or `txid` itself if it
	/// never boosted anything.
	pub(crate) fn root_parent(&self, txid: &Txid) -> Txid {
		self.boosted_parents(txid).first().copied().unwrap_or(*txid)
	}

	/// Returns `true` if `txid` was replaced or accelerated by a later transaction.
	pub(crate) fn is_boosted(&self, txid: &Txid) -> bool {
		self.entries.read().unwrap().values().any(|e| e.parent_transactions.contains(txid))
	}

	pub(crate) fn clear(&self) {
		self.entries.write().unwrap().clear();
	}
}
