// Copyright 2024 The Kestrel Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! In-memory holding pens for out-of-order arrivals: blocks whose parent
//! is not yet known, and transactions referencing outputs that cannot be
//! resolved yet. Both are bounded; an evicted item will simply be fetched
//! again from the network if it still matters.

use std::collections::{HashMap, HashSet, VecDeque};

use kestrel_core::core::hash::Hash;
use kestrel_core::core::transaction::OutPoint;
use kestrel_core::core::{Block, Transaction};
use kestrel_util::RwLock;

use crate::types::Options;

/// How many orphan blocks we keep around at most.
const MAX_ORPHAN_BLOCKS: usize = 100;
/// How many orphan transactions we keep around at most.
const MAX_ORPHAN_TRANSACTIONS: usize = 1_000;

/// A block waiting on its parent, with the options it was submitted with
/// so they carry over to the deferred processing.
#[derive(Debug, Clone)]
pub struct Orphan {
	/// The orphan block itself
	pub block: Block,
	/// Processing options of the original submission
	pub opts: Options,
}

struct BlockPoolInner {
	// blocks indexed by their hash
	orphans: HashMap<Hash, Orphan>,
	// additional index of previous -> hashes so the children of a newly
	// accepted block are found without scanning
	prev_idx: HashMap<Hash, HashSet<Hash>>,
	// insertion order, oldest first, for eviction
	order: VecDeque<Hash>,
}

/// Pool of blocks whose parent is unknown to storage.
pub struct OrphanBlockPool {
	inner: RwLock<BlockPoolInner>,
}

impl OrphanBlockPool {
	/// An empty orphan pool.
	pub fn new() -> OrphanBlockPool {
		OrphanBlockPool {
			inner: RwLock::new(BlockPoolInner {
				orphans: HashMap::new(),
				prev_idx: HashMap::new(),
				order: VecDeque::new(),
			}),
		}
	}

	/// Number of orphans currently held.
	pub fn len(&self) -> usize {
		self.inner.read().orphans.len()
	}

	/// Adds an orphan block, evicting the oldest resident when full.
	/// Returns false on a duplicate.
	pub fn add(&self, hash: Hash, block: Block, opts: Options) -> bool {
		let mut inner = self.inner.write();
		if inner.orphans.contains_key(&hash) {
			return false;
		}
		let previous = block.header.previous;
		inner.orphans.insert(hash, Orphan { block, opts });
		inner.prev_idx.entry(previous).or_default().insert(hash);
		inner.order.push_back(hash);

		while inner.orphans.len() > MAX_ORPHAN_BLOCKS {
			match inner.order.pop_front() {
				Some(oldest) => {
					remove_block_locked(&mut inner, &oldest);
				}
				None => break,
			}
		}
		true
	}

	/// Removes and returns an orphan.
	pub fn remove(&self, hash: &Hash) -> Option<Orphan> {
		let mut inner = self.inner.write();
		let orphan = remove_block_locked(&mut inner, hash);
		if orphan.is_some() {
			inner.order.retain(|h| h != hash);
		}
		orphan
	}

	/// Whether the pool holds the given block.
	pub fn contains(&self, hash: &Hash) -> bool {
		self.inner.read().orphans.contains_key(hash)
	}

	/// Hashes of the orphans waiting on the given parent.
	pub fn children_of(&self, parent: &Hash) -> Vec<Hash> {
		self.inner
			.read()
			.prev_idx
			.get(parent)
			.map(|s| s.iter().cloned().collect())
			.unwrap_or_default()
	}

	/// Walks the parent links within the pool to the earliest ancestor of
	/// the given orphan that is itself still an orphan. That root is the
	/// block worth requesting from peers.
	pub fn root_of(&self, hash: &Hash) -> Option<Hash> {
		let inner = self.inner.read();
		if !inner.orphans.contains_key(hash) {
			return None;
		}
		let mut cur = *hash;
		while let Some(orphan) = inner.orphans.get(&cur) {
			let parent = orphan.block.header.previous;
			if inner.orphans.contains_key(&parent) {
				cur = parent;
			} else {
				break;
			}
		}
		Some(cur)
	}
}

fn remove_block_locked(inner: &mut BlockPoolInner, hash: &Hash) -> Option<Orphan> {
	let orphan = inner.orphans.remove(hash)?;
	let previous = orphan.block.header.previous;
	let emptied = match inner.prev_idx.get_mut(&previous) {
		Some(set) => {
			set.remove(hash);
			set.is_empty()
		}
		None => false,
	};
	if emptied {
		inner.prev_idx.remove(&previous);
	}
	Some(orphan)
}

struct TxOrphanageInner {
	// transactions with the outpoints they are stuck on
	txs: HashMap<Hash, (Transaction, Vec<OutPoint>)>,
	// missing outpoint -> hashes of the transactions waiting on it
	missing_idx: HashMap<OutPoint, HashSet<Hash>>,
}

/// Holding pen for transactions whose inputs reference outputs we know
/// nothing about yet. Keyed by the missing outpoints so dependents are
/// found the moment the producing transaction shows up.
pub struct TransactionOrphanage {
	inner: RwLock<TxOrphanageInner>,
}

impl TransactionOrphanage {
	/// An empty orphanage.
	pub fn new() -> TransactionOrphanage {
		TransactionOrphanage {
			inner: RwLock::new(TxOrphanageInner {
				txs: HashMap::new(),
				missing_idx: HashMap::new(),
			}),
		}
	}

	/// Number of orphan transactions currently held.
	pub fn len(&self) -> usize {
		self.inner.read().txs.len()
	}

	/// Records a transaction against each outpoint it is missing. Returns
	/// false on a duplicate or when the orphanage is full.
	pub fn add(&self, hash: Hash, tx: Transaction, missing: Vec<OutPoint>) -> bool {
		let mut inner = self.inner.write();
		if inner.txs.contains_key(&hash) || inner.txs.len() >= MAX_ORPHAN_TRANSACTIONS {
			return false;
		}
		for op in &missing {
			inner.missing_idx.entry(*op).or_default().insert(hash);
		}
		inner.txs.insert(hash, (tx, missing));
		true
	}

	/// Whether the orphanage holds the given transaction.
	pub fn contains(&self, hash: &Hash) -> bool {
		self.inner.read().txs.contains_key(hash)
	}

	/// Removes and returns every transaction waiting on the given
	/// outpoint, dropping their other registrations as well. Callers
	/// re-submit the returned transactions; whatever is still missing gets
	/// re-added.
	pub fn take_dependents(&self, op: &OutPoint) -> Vec<Transaction> {
		let mut inner = self.inner.write();
		let hashes: Vec<Hash> = match inner.missing_idx.remove(op) {
			Some(set) => set.into_iter().collect(),
			None => return vec![],
		};
		let mut taken = vec![];
		for hash in hashes {
			if let Some((tx, missing)) = inner.txs.remove(&hash) {
				for m in &missing {
					let emptied = match inner.missing_idx.get_mut(m) {
						Some(set) => {
							set.remove(&hash);
							set.is_empty()
						}
						None => false,
					};
					if emptied {
						inner.missing_idx.remove(m);
					}
				}
				taken.push(tx);
			}
		}
		taken
	}
}
