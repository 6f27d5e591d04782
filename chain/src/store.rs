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

//! Implements storage primitives required by the chain: blocks and their
//! metadata, the best-block pointer, the height index, per-transaction
//! descriptors and the unconfirmed pool namespace. All mutations go through
//! a `Batch` committing as one storage transaction.

use std::sync::Arc;

use log::warn;

use kestrel_core::core::hash::Hash;
use kestrel_core::core::{Block, BlockHeader, Transaction};
use kestrel_store as store;

use crate::error::Error;
use crate::types::{BlockInfo, ChainBlock, PoolEntry, Tip, TransactionDescriptor, TxLocation};

const DB_NAME: &str = "chain";

const BLOCK_PREFIX: u8 = b'b';
const BLOCK_INFO_PREFIX: u8 = b'i';
const HEIGHT_PREFIX: u8 = b'h';
const TX_DESC_PREFIX: u8 = b't';
const POOL_PREFIX: u8 = b'p';
const HEAD_KEY: [u8; 1] = [b'H'];
const POOL_SEQ_KEY: [u8; 1] = [b's'];

fn to_key(prefix: u8, k: &[u8]) -> Vec<u8> {
	let mut res = Vec::with_capacity(k.len() + 1);
	res.push(prefix);
	res.extend_from_slice(k);
	res
}

// big-endian suffix so lexicographic key order matches numeric order
fn u64_to_key(prefix: u8, n: u64) -> Vec<u8> {
	let mut res = Vec::with_capacity(9);
	res.push(prefix);
	res.extend_from_slice(&n.to_be_bytes());
	res
}

/// All the on-disk state the chain operates on: blocks and block metadata,
/// the best-block pointer, the height-to-hash index, transaction
/// descriptors and pool entries, backed by a single key-value database.
pub struct ChainStore {
	db: store::Store,
}

impl ChainStore {
	/// Opens (or creates) the chain database under the provided directory.
	pub fn new(db_root: &str) -> Result<ChainStore, Error> {
		let env = store::new_env(db_root.to_string())?;
		let db = store::Store::open(Arc::new(env), DB_NAME)?;
		Ok(ChainStore { db })
	}

	/// The tip of the best chain, if any chain was bootstrapped yet.
	pub fn head(&self) -> Result<Option<Tip>, Error> {
		self.db.get_ser(&HEAD_KEY).map_err(From::from)
	}

	/// Gets a full block by its hash.
	pub fn get_block(&self, h: &Hash) -> Result<Option<Block>, Error> {
		self.db.get_ser(&to_key(BLOCK_PREFIX, h.as_bytes())).map_err(From::from)
	}

	/// Whether the full block is stored, on any chain.
	pub fn block_exists(&self, h: &Hash) -> Result<bool, Error> {
		self.db
			.exists(&to_key(BLOCK_PREFIX, h.as_bytes()))
			.map_err(From::from)
	}

	/// Gets the metadata of a block by its hash.
	pub fn get_block_info(&self, h: &Hash) -> Result<Option<BlockInfo>, Error> {
		self.db
			.get_ser(&to_key(BLOCK_INFO_PREFIX, h.as_bytes()))
			.map_err(From::from)
	}

	/// Gets a block header by the block hash.
	pub fn get_block_header(&self, h: &Hash) -> Result<Option<BlockHeader>, Error> {
		Ok(self.get_block_info(h)?.map(|info| info.header))
	}

	/// Gets the hash of the best-chain block at the given height.
	pub fn get_hash_by_height(&self, height: u64) -> Result<Option<Hash>, Error> {
		self.db
			.get_ser(&u64_to_key(HEIGHT_PREFIX, height))
			.map_err(From::from)
	}

	/// Gets the descriptor recording the location and spent state of a
	/// transaction, confirmed or pooled.
	pub fn get_tx_descriptor(&self, h: &Hash) -> Result<Option<TransactionDescriptor>, Error> {
		self.db
			.get_ser(&to_key(TX_DESC_PREFIX, h.as_bytes()))
			.map_err(From::from)
	}

	/// Gets a pool entry by its insertion sequence.
	pub fn get_pool_entry(&self, seq: u64) -> Result<Option<PoolEntry>, Error> {
		self.db
			.get_ser(&u64_to_key(POOL_PREFIX, seq))
			.map_err(From::from)
	}

	/// Iterator over all pool entries, oldest first.
	pub fn pool_iter(&self) -> Result<store::SerIterator<PoolEntry>, Error> {
		self.db.iter(&[POOL_PREFIX]).map_err(From::from)
	}

	/// Gets a transaction wherever it lives, in a best-chain block or in
	/// the pool.
	pub fn get_transaction(&self, h: &Hash) -> Result<Option<Transaction>, Error> {
		let desc = match self.get_tx_descriptor(h)? {
			Some(desc) => desc,
			None => return Ok(None),
		};
		match desc.location {
			TxLocation::Chain {
				block_hash,
				tx_index,
			} => {
				let block = self
					.get_block(&block_hash)?
					.ok_or_else(|| corrupted(format!("descriptor of {} points at missing block", h)))?;
				let tx = block
					.transactions
					.get(tx_index as usize)
					.cloned()
					.ok_or_else(|| corrupted(format!("descriptor of {} out of block bounds", h)))?;
				Ok(Some(tx))
			}
			TxLocation::Pool { seq } => {
				let entry = self
					.get_pool_entry(seq)?
					.ok_or_else(|| corrupted(format!("pool entry {} missing for {}", seq, h)))?;
				Ok(Some(entry.tx))
			}
		}
	}

	/// Builds a new batch to atomically mutate the chain state.
	pub fn batch(&self) -> Result<Batch<'_>, Error> {
		Ok(Batch {
			db: self.db.batch()?,
		})
	}
}

fn corrupted(msg: String) -> Error {
	crate::error::ErrorKind::Other(msg).into()
}

/// An atomic batch over the chain store. Writes are invisible to readers
/// until commit; reads through the batch observe its pending writes.
pub struct Batch<'a> {
	db: store::Batch<'a>,
}

impl<'a> Batch<'a> {
	/// The tip of the best chain, as seen by this batch.
	pub fn head(&self) -> Result<Option<Tip>, Error> {
		self.db.get_ser(&HEAD_KEY).map_err(From::from)
	}

	/// Saves the provided tip as the best chain head.
	pub fn save_head(&self, t: &Tip) -> Result<(), Error> {
		self.db.put_ser(&HEAD_KEY, t).map_err(From::from)
	}

	/// Whether the full block is stored, on any chain.
	pub fn block_exists(&self, h: &Hash) -> Result<bool, Error> {
		self.db
			.exists(&to_key(BLOCK_PREFIX, h.as_bytes()))
			.map_err(From::from)
	}

	/// Saves the block body under its hash. Blocks are never deleted.
	pub fn save_block(&self, h: &Hash, b: &Block) -> Result<(), Error> {
		self.db
			.put_ser(&to_key(BLOCK_PREFIX, h.as_bytes()), b)
			.map_err(From::from)
	}

	/// Gets a full block by its hash.
	pub fn get_block(&self, h: &Hash) -> Result<Option<Block>, Error> {
		self.db.get_ser(&to_key(BLOCK_PREFIX, h.as_bytes())).map_err(From::from)
	}

	/// Saves the metadata of a block under its hash.
	pub fn save_block_info(&self, h: &Hash, info: &BlockInfo) -> Result<(), Error> {
		self.db
			.put_ser(&to_key(BLOCK_INFO_PREFIX, h.as_bytes()), info)
			.map_err(From::from)
	}

	/// Gets the metadata of a block by its hash.
	pub fn get_block_info(&self, h: &Hash) -> Result<Option<BlockInfo>, Error> {
		self.db
			.get_ser(&to_key(BLOCK_INFO_PREFIX, h.as_bytes()))
			.map_err(From::from)
	}

	/// Registers the best-chain block hash at the given height.
	pub fn save_height_index(&self, height: u64, h: &Hash) -> Result<(), Error> {
		self.db
			.put_ser(&u64_to_key(HEIGHT_PREFIX, height), h)
			.map_err(From::from)
	}

	/// Removes the height registration, for heights the best chain no
	/// longer reaches after a branch switch.
	pub fn delete_height_index(&self, height: u64) -> Result<(), Error> {
		self.db
			.delete(&u64_to_key(HEIGHT_PREFIX, height))
			.map_err(From::from)
	}

	/// Gets the hash of the best-chain block at the given height.
	pub fn get_hash_by_height(&self, height: u64) -> Result<Option<Hash>, Error> {
		self.db
			.get_ser(&u64_to_key(HEIGHT_PREFIX, height))
			.map_err(From::from)
	}

	/// Saves the descriptor of a transaction under the transaction hash.
	pub fn save_tx_descriptor(
		&self,
		h: &Hash,
		desc: &TransactionDescriptor,
	) -> Result<(), Error> {
		self.db
			.put_ser(&to_key(TX_DESC_PREFIX, h.as_bytes()), desc)
			.map_err(From::from)
	}

	/// Gets the descriptor of a transaction by its hash.
	pub fn get_tx_descriptor(&self, h: &Hash) -> Result<Option<TransactionDescriptor>, Error> {
		self.db
			.get_ser(&to_key(TX_DESC_PREFIX, h.as_bytes()))
			.map_err(From::from)
	}

	/// Deletes the descriptor of a transaction.
	pub fn delete_tx_descriptor(&self, h: &Hash) -> Result<(), Error> {
		self.db
			.delete(&to_key(TX_DESC_PREFIX, h.as_bytes()))
			.map_err(From::from)
	}

	/// Persists a pool entry under its sequence number.
	pub fn save_pool_entry(&self, entry: &PoolEntry) -> Result<(), Error> {
		self.db
			.put_ser(&u64_to_key(POOL_PREFIX, entry.seq), entry)
			.map_err(From::from)
	}

	/// Gets a pool entry by its insertion sequence.
	pub fn get_pool_entry(&self, seq: u64) -> Result<Option<PoolEntry>, Error> {
		self.db
			.get_ser(&u64_to_key(POOL_PREFIX, seq))
			.map_err(From::from)
	}

	/// Deletes a pool entry.
	pub fn delete_pool_entry(&self, seq: u64) -> Result<(), Error> {
		self.db
			.delete(&u64_to_key(POOL_PREFIX, seq))
			.map_err(From::from)
	}

	/// Claims the next pool insertion sequence number.
	pub fn next_pool_seq(&self) -> Result<u64, Error> {
		let next = match self.db.get(&POOL_SEQ_KEY)? {
			Some(bytes) => {
				if bytes.len() != 8 {
					return Err(corrupted("pool sequence counter malformed".to_string()));
				}
				let mut arr = [0u8; 8];
				arr.copy_from_slice(&bytes);
				u64::from_be_bytes(arr)
			}
			None => 0,
		};
		self.db.put(&POOL_SEQ_KEY, &(next + 1).to_be_bytes())?;
		Ok(next)
	}

	/// Creates a child batch, merged into this batch when committed and
	/// abandoned wholesale otherwise.
	pub fn child(&mut self) -> Result<Batch<'_>, Error> {
		Ok(Batch {
			db: self.db.child()?,
		})
	}

	/// Commits the batch, making all its writes visible at once.
	pub fn commit(self) -> Result<(), Error> {
		self.db.commit().map_err(From::from)
	}
}

/// Forward iterator over the blocks of the best chain, from a starting
/// height up to the current chain head. Blocks appearing mid-iteration are
/// not picked up; the end is fixed when the iterator is built.
pub struct ChainBlockIter<'a> {
	store: &'a ChainStore,
	next_height: u64,
	max_height: u64,
}

impl<'a> ChainBlockIter<'a> {
	/// Builds a new iterator starting at the given height, bounded by the
	/// chain head at construction time.
	pub fn new(store: &'a ChainStore, from_height: u64) -> ChainBlockIter<'a> {
		let max_height = match store.head() {
			Ok(Some(head)) => head.height,
			_ => 0,
		};
		ChainBlockIter {
			store,
			next_height: from_height,
			max_height,
		}
	}
}

impl<'a> Iterator for ChainBlockIter<'a> {
	type Item = ChainBlock;

	fn next(&mut self) -> Option<ChainBlock> {
		if self.next_height > self.max_height {
			return None;
		}
		let height = self.next_height;
		let block = self
			.store
			.get_hash_by_height(height)
			.ok()
			.and_then(|h| h)
			.and_then(|h| match self.store.get_block(&h) {
				Ok(b) => b,
				Err(e) => {
					warn!("chain block iterator broke at {}: {}", height, e);
					None
				}
			});
		match block {
			Some(block) => {
				self.next_height += 1;
				Some(ChainBlock { height, block })
			}
			None => None,
		}
	}
}
