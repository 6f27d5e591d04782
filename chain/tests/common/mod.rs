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

//! Shared fixtures for the chain integration tests: scratch chains on
//! disposable store directories, deterministic block and transaction
//! builders, and an adapter recording every notification.

#![allow(dead_code)]

use std::fs;
use std::mem;
use std::sync::Arc;

use chrono::prelude::{TimeZone, Utc};

use kestrel_chain::{Chain, ChainAdapter, ChainBlock, NoopAdapter};
use kestrel_core::consensus;
use kestrel_core::core::hash::{Hash, Hashed};
use kestrel_core::core::transaction::{OutPoint, TxInput, TxOutput};
use kestrel_core::core::{Block, Transaction};
use kestrel_core::genesis;
use kestrel_util::Mutex;

/// Compact bits of the test chains; every block built with these carries
/// the same, small amount of work.
pub const EASY_BITS: u32 = 0x2000_ffff;
/// Compact bits outweighing any short chain of `EASY_BITS` blocks.
pub const HEAVY_BITS: u32 = 0x1f00_ffff;

pub fn clean_output_dir(dir_name: &str) {
	let _ = fs::remove_dir_all(dir_name);
}

pub fn init_chain(dir_name: &str) -> Chain {
	clean_output_dir(dir_name);
	Chain::init(
		dir_name.to_string(),
		genesis::genesis(),
		Arc::new(NoopAdapter {}),
	)
	.unwrap()
}

pub fn init_chain_with_adapter(
	dir_name: &str,
	adapter: Arc<dyn ChainAdapter + Send + Sync>,
) -> Chain {
	clean_output_dir(dir_name);
	Chain::init(dir_name.to_string(), genesis::genesis(), adapter).unwrap()
}

/// The outpoint of the single genesis coinbase output.
pub fn genesis_reward() -> OutPoint {
	OutPoint::new(genesis::genesis().transactions[0].hash(), 0)
}

/// A coinbase unique per (height, tag) so sibling blocks get distinct
/// hashes.
pub fn coinbase(height: u64, tag: u8) -> Transaction {
	Transaction::new(
		vec![TxInput::new(
			OutPoint::null(),
			vec![0x03, height as u8, (height >> 8) as u8, tag],
		)],
		vec![TxOutput {
			value: consensus::reward(height),
			lock_script: vec![0x51, tag],
		}],
	)
}

/// Builds a block of the given transactions (a fitting coinbase is
/// prepended) on top of the parent hash. `tag` differentiates siblings.
pub fn build_block(prev: Hash, height: u64, bits: u32, tag: u8, txs: Vec<Transaction>) -> Block {
	let mut transactions = vec![coinbase(height, tag)];
	transactions.extend(txs);
	Block::new(
		prev,
		Utc.timestamp(1_707_480_000 + height as i64 * 600, 0),
		bits,
		transactions,
	)
}

/// A plain transaction spending the given outpoints into outputs of the
/// given values.
pub fn build_tx(spends: Vec<OutPoint>, values: Vec<u64>) -> Transaction {
	Transaction::new(
		spends
			.into_iter()
			.map(|op| TxInput::new(op, vec![0xab]))
			.collect(),
		values
			.into_iter()
			.map(|v| TxOutput {
				value: v,
				lock_script: vec![0x52],
			})
			.collect(),
	)
}

/// Everything the chain reported through its adapter, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
	Attached(u64, Hash),
	Detached(u64, Hash),
	TxAccepted(Hash),
	TxEvicted(Hash),
}

/// Adapter recording every notification for later assertions.
pub struct RecordingAdapter {
	events: Mutex<Vec<Recorded>>,
}

impl RecordingAdapter {
	pub fn new() -> Arc<RecordingAdapter> {
		Arc::new(RecordingAdapter {
			events: Mutex::new(vec![]),
		})
	}

	/// Drains and returns everything recorded so far.
	pub fn take(&self) -> Vec<Recorded> {
		mem::replace(&mut *self.events.lock(), vec![])
	}
}

impl ChainAdapter for RecordingAdapter {
	fn block_attached(&self, block: &ChainBlock) {
		self.events
			.lock()
			.push(Recorded::Attached(block.height, block.block.hash()));
	}

	fn block_detached(&self, block: &ChainBlock) {
		self.events
			.lock()
			.push(Recorded::Detached(block.height, block.block.hash()));
	}

	fn transaction_accepted(&self, tx: &Transaction) {
		self.events.lock().push(Recorded::TxAccepted(tx.hash()));
	}

	fn transaction_evicted(&self, tx_hash: &Hash) {
		self.events.lock().push(Recorded::TxEvicted(*tx_hash));
	}
}
