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

//! Facade and handler for the rest of the blockchain implementation and
//! mostly the chain pipeline. Serializes all mutations behind a single
//! writer lock, owns the published best-block pointer and the orphan
//! pools, and notifies the registered adapter of committed changes.

use std::sync::Arc;

use log::{debug, info};
use lru_cache::LruCache;

use kestrel_core::core::hash::{Hash, Hashed};
use kestrel_core::core::transaction::OutPoint;
use kestrel_core::core::{Block, BlockHeader, Difficulty, Transaction, TxOutput};
use kestrel_util::{Mutex, RwLock};

use crate::error::{Error, ErrorKind};
use crate::orphan::{OrphanBlockPool, TransactionOrphanage};
use crate::pipe::{self, BlockContext};
use crate::pool;
use crate::store::{ChainBlockIter, ChainStore};
use crate::types::{BlockInfo, ChainAdapter, ChainEvent, Options, Tip};

// hashes of recently processed blocks, deflecting duplicate gossip before
// it reaches storage
const PROCESSED_CACHE_SIZE: usize = 512;

/// Facade to the blockchain block and transaction processing pipeline and
/// storage. Maintains locking so that only one mutation runs at a time,
/// while reads observe the last committed state.
pub struct Chain {
	store: Arc<ChainStore>,
	adapter: Arc<dyn ChainAdapter + Send + Sync>,
	head: RwLock<Tip>,
	orphans: OrphanBlockPool,
	tx_orphans: TransactionOrphanage,
	processed_hashes: Mutex<LruCache<Hash, bool>>,
	writer_lock: Mutex<()>,
}

impl Chain {
	/// Initializes the blockchain and returns a new Chain instance. Opens
	/// or creates the store under `db_root`; an empty store is
	/// bootstrapped with the provided genesis block, which must carry the
	/// zero hash as its parent.
	pub fn init(
		db_root: String,
		genesis: Block,
		adapter: Arc<dyn ChainAdapter + Send + Sync>,
	) -> Result<Chain, Error> {
		let store = Arc::new(ChainStore::new(&db_root)?);

		let head = match store.head()? {
			Some(head) => head,
			None => {
				// the genesis block is trusted, its proof of work is not
				// re-checked here
				let mut ctx = BlockContext {
					opts: Options::SKIP_POW,
					batch: store.batch()?,
					events: Vec::new(),
				};
				let tip = pipe::process_block(&genesis, &mut ctx)?.ok_or_else(|| {
					Error::from(ErrorKind::Unfit("genesis not accepted".to_string()))
				})?;
				let BlockContext { batch, events, .. } = ctx;
				batch.commit()?;
				info!(
					"chain: bootstrapped with genesis block {} in {}",
					genesis.hash(),
					db_root
				);
				for event in &events {
					deliver(&*adapter, event);
				}
				tip
			}
		};
		info!(
			"chain: init at {} (height {})",
			head.last_block_h, head.height
		);

		Ok(Chain {
			store,
			adapter,
			head: RwLock::new(head),
			orphans: OrphanBlockPool::new(),
			tx_orphans: TransactionOrphanage::new(),
			processed_hashes: Mutex::new(LruCache::new(PROCESSED_CACHE_SIZE)),
			writer_lock: Mutex::new(()),
		})
	}

	/// Attempt to add a new block to the chain. Returns the new chain tip
	/// if it became the head of the best chain, None if the block was a
	/// duplicate, went to the orphan pool, or rests on a fork with
	/// insufficient work.
	///
	/// A block whose parent is unknown is routed to the orphan pool; an
	/// accepted block promotes any orphans (blocks and transactions) that
	/// were waiting on it.
	pub fn process_block(&self, b: Block, opts: Options) -> Result<Option<Tip>, Error> {
		let hash = b.hash();
		match self.process_block_single(&b, opts) {
			Ok((tip, confirmed)) => {
				self.promote_orphan_transactions(confirmed);
				self.check_orphans(hash);
				Ok(tip)
			}
			Err(ref e) if e.kind() == ErrorKind::Orphan => {
				if self.orphans.add(hash, b, opts) {
					debug!(
						"chain: block {} is an orphan, {} orphan(s) now",
						hash,
						self.orphans.len()
					);
				}
				Ok(None)
			}
			Err(e) => Err(e),
		}
	}

	// One serialized pass of the block pipeline: batch open, pipeline run,
	// commit, head publication and event delivery. Returns the tip change
	// and the (tx hash, output count) pairs newly confirmed, for orphan
	// transaction promotion by the caller.
	fn process_block_single(
		&self,
		b: &Block,
		opts: Options,
	) -> Result<(Option<Tip>, Vec<(Hash, u32)>), Error> {
		let hash = b.hash();
		let _lock = self.writer_lock.lock();

		if self.processed_hashes.lock().contains_key(&hash) {
			return Ok((None, vec![]));
		}

		let mut ctx = BlockContext {
			opts,
			batch: self.store.batch()?,
			events: Vec::new(),
		};
		let res = pipe::process_block(b, &mut ctx);
		let BlockContext { batch, events, .. } = ctx;

		match res {
			Ok(tip) => {
				batch.commit()?;
				if let Some(ref tip) = tip {
					*self.head.write() = tip.clone();
				}
				self.processed_hashes.lock().insert(hash, true);

				let mut confirmed = vec![];
				for event in &events {
					deliver(&*self.adapter, event);
					if let ChainEvent::BlockAttached(cb) = event {
						for tx in &cb.block.transactions {
							confirmed.push((tx.hash(), tx.outputs.len() as u32));
						}
					}
				}
				Ok((tip, confirmed))
			}
			Err(e) => {
				if e.kind() == ErrorKind::ReorgFailed {
					// the failed branch switch was rolled back but the
					// triggering block stays persisted on its fork
					batch.commit()?;
					self.processed_hashes.lock().insert(hash, true);
				}
				Err(e)
			}
		}
	}

	// An accepted block may be the missing parent of pooled orphans;
	// process them (and their descendants) now. Iterative so a long
	// buffered chain doesn't blow the stack.
	fn check_orphans(&self, accepted: Hash) {
		let mut queue = vec![accepted];
		while let Some(parent) = queue.pop() {
			for orphan_hash in self.orphans.children_of(&parent) {
				if let Some(orphan) = self.orphans.remove(&orphan_hash) {
					debug!("chain: processing former orphan {}", orphan_hash);
					match self.process_block_single(&orphan.block, orphan.opts) {
						Ok((_, confirmed)) => {
							self.promote_orphan_transactions(confirmed);
							queue.push(orphan_hash);
						}
						Err(e) => {
							debug!("chain: orphan {} rejected: {}", orphan_hash, e);
						}
					}
				}
			}
		}
	}

	/// Attempt to add a transaction to the unconfirmed pool. On success
	/// the adapter is notified and any orphan transaction waiting on one
	/// of the new outputs is re-evaluated.
	///
	/// A transaction with unresolvable inputs is parked in the transaction
	/// orphanage and the `MissingInputs` error is surfaced to the caller.
	/// Submissions already known (confirmed or pooled) are swallowed.
	pub fn process_transaction(&self, tx: Transaction) -> Result<(), Error> {
		tx.validate()
			.map_err(|e| Error::from(ErrorKind::InvalidTransaction(e)))?;
		let tx_hash = tx.hash();
		match self.process_transaction_single(&tx) {
			Ok(()) => {
				self.promote_orphan_transactions(vec![(tx_hash, tx.outputs.len() as u32)]);
				Ok(())
			}
			Err(e) => {
				if let ErrorKind::MissingInputs(missing) = e.kind() {
					debug!(
						"chain: transaction {} waits on {} missing output(s)",
						tx_hash,
						missing.len()
					);
					self.tx_orphans.add(tx_hash, tx, missing);
				}
				Err(e)
			}
		}
	}

	// One serialized pass of pool admission.
	fn process_transaction_single(&self, tx: &Transaction) -> Result<(), Error> {
		let tx_hash = tx.hash();
		let _lock = self.writer_lock.lock();

		let batch = self.store.batch()?;
		if batch.get_tx_descriptor(&tx_hash)?.is_some() {
			// already on the best chain or in the pool
			debug!("chain: duplicate transaction {}", tx_hash);
			return Ok(());
		}
		pool::add_transaction(&batch, tx_hash, tx)?;
		batch.commit()?;
		info!("chain: transaction {} admitted to the pool", tx_hash);
		self.adapter.transaction_accepted(tx);
		Ok(())
	}

	// Newly resolvable outputs may free orphan transactions; resubmit the
	// dependents of every (tx, output count) pair, iteratively following
	// the acceptances.
	fn promote_orphan_transactions(&self, roots: Vec<(Hash, u32)>) {
		let mut queue = roots;
		while let Some((parent, n_outputs)) = queue.pop() {
			let mut dependents = vec![];
			for index in 0..n_outputs {
				dependents.extend(self.tx_orphans.take_dependents(&OutPoint::new(parent, index)));
			}
			for tx in dependents {
				let tx_hash = tx.hash();
				match self.process_transaction_single(&tx) {
					Ok(()) => {
						info!("chain: orphan transaction {} accepted", tx_hash);
						let n = tx.outputs.len() as u32;
						queue.push((tx_hash, n));
					}
					Err(e) => {
						if let ErrorKind::MissingInputs(missing) = e.kind() {
							self.tx_orphans.add(tx_hash, tx, missing);
						} else {
							debug!("chain: orphan transaction {} rejected: {}", tx_hash, e);
						}
					}
				}
			}
		}
	}

	/// Files an orphan block directly, bypassing classification; for
	/// out-of-order gossip paths that already know the parent is missing.
	pub fn add_orphan_block(&self, b: Block, opts: Options) {
		let hash = b.hash();
		self.orphans.add(hash, b, opts);
	}

	/// Files an orphan transaction directly against the outpoints it is
	/// missing.
	pub fn add_orphan_transaction(&self, tx: Transaction, missing: Vec<OutPoint>) {
		let hash = tx.hash();
		self.tx_orphans.add(hash, tx, missing);
	}

	/// The tip that's also the head of the current best chain.
	pub fn head(&self) -> Tip {
		self.head.read().clone()
	}

	/// Block header of the chain head.
	pub fn head_header(&self) -> Result<BlockHeader, Error> {
		let head = self.head();
		self.store
			.get_block_header(&head.last_block_h)?
			.ok_or_else(|| ErrorKind::Other("head block info missing".to_string()).into())
	}

	/// Total work accumulated on the best chain.
	pub fn total_work(&self) -> Difficulty {
		self.head().total_work
	}

	/// Gets a block by its hash, from the best chain or any fork.
	pub fn get_block(&self, h: &Hash) -> Result<Option<Block>, Error> {
		self.store.get_block(h)
	}

	/// Gets the stored metadata of a block by its hash.
	pub fn get_block_info(&self, h: &Hash) -> Result<Option<BlockInfo>, Error> {
		self.store.get_block_info(h)
	}

	/// Gets a block header by the block hash.
	pub fn get_block_header(&self, h: &Hash) -> Result<Option<BlockHeader>, Error> {
		self.store.get_block_header(h)
	}

	/// Whether the block is persisted, on the best chain or a fork.
	pub fn block_exists(&self, h: &Hash) -> Result<bool, Error> {
		self.store.block_exists(h)
	}

	/// Hash of the best-chain block at the provided height. Heights above
	/// the current best are invalid.
	pub fn get_block_hash(&self, height: u64) -> Result<Hash, Error> {
		let head = self.head();
		if height > head.height {
			return Err(ErrorKind::InvalidBlockHeight(height).into());
		}
		self.store
			.get_hash_by_height(height)?
			.ok_or_else(|| ErrorKind::InvalidBlockHeight(height).into())
	}

	/// Gets a transaction by hash, whether confirmed on the best chain or
	/// sitting in the pool.
	pub fn get_transaction(&self, h: &Hash) -> Result<Option<Transaction>, Error> {
		self.store.get_transaction(h)
	}

	/// Whether the transaction is confirmed on the best chain. False for
	/// pool residents and for transactions only reachable through forks.
	pub fn has_transaction(&self, h: &Hash) -> Result<bool, Error> {
		Ok(self
			.store
			.get_tx_descriptor(h)?
			.map(|d| d.is_on_chain())
			.unwrap_or(false))
	}

	/// Whether the transaction is known at all, confirmed or pooled.
	pub fn transaction_known(&self, h: &Hash) -> Result<bool, Error> {
		Ok(self.store.get_tx_descriptor(h)?.is_some())
	}

	/// Whether the transaction currently sits in the unconfirmed pool.
	pub fn transaction_in_pool(&self, h: &Hash) -> Result<bool, Error> {
		pool::contains(&self.store, h)
	}

	/// Resolves an outpoint to the output it designates, confirmed or
	/// pooled. Fails with `InvalidOutPoint` when the transaction is
	/// unknown or the index is out of range.
	pub fn get_transaction_output(&self, op: &OutPoint) -> Result<TxOutput, Error> {
		let tx = self
			.get_transaction(&op.tx_hash)?
			.ok_or_else(|| Error::from(ErrorKind::InvalidOutPoint(*op)))?;
		tx.outputs
			.get(op.index as usize)
			.cloned()
			.ok_or_else(|| ErrorKind::InvalidOutPoint(*op).into())
	}

	/// The input currently claiming the given output, if any. None for
	/// unspent outputs and unknown outpoints alike.
	pub fn output_spender(&self, op: &OutPoint) -> Result<Option<OutPoint>, Error> {
		Ok(self
			.store
			.get_tx_descriptor(&op.tx_hash)?
			.and_then(|d| d.spent_by.get(op.index as usize).cloned())
			.and_then(|claim| claim))
	}

	/// The `count` oldest transactions of the unconfirmed pool, by
	/// insertion order.
	pub fn oldest_pool_transactions(
		&self,
		count: usize,
	) -> Result<Vec<(Hash, Transaction)>, Error> {
		pool::oldest_transactions(&self.store, count)
	}

	/// Check if hash is for a known orphan block.
	pub fn is_orphan(&self, hash: &Hash) -> bool {
		self.orphans.contains(hash)
	}

	/// The earliest ancestor of the given orphan that is itself still an
	/// orphan; the block worth requesting from peers.
	pub fn orphan_root(&self, hash: &Hash) -> Option<Hash> {
		self.orphans.root_of(hash)
	}

	/// Check if hash is for a known orphan transaction.
	pub fn is_orphan_transaction(&self, hash: &Hash) -> bool {
		self.tx_orphans.contains(hash)
	}

	/// Forward iterator over best-chain blocks starting at the provided
	/// height, ending at the chain head.
	pub fn chain_block_iter(&self, from_height: u64) -> ChainBlockIter<'_> {
		ChainBlockIter::new(&self.store, from_height)
	}
}

fn deliver(adapter: &dyn ChainAdapter, event: &ChainEvent) {
	match event {
		ChainEvent::BlockAttached(cb) => adapter.block_attached(cb),
		ChainEvent::BlockDetached(cb) => adapter.block_detached(cb),
		ChainEvent::TransactionEvicted(h) => adapter.transaction_evicted(h),
	}
}
