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

//! Attaches and detaches blocks and transactions onto the spent/unspent
//! output state. Attaching a transaction claims the outputs its inputs
//! reference and indexes its own outputs as unspent; detaching releases
//! the claims. Blocks attach their transactions in order and detach them
//! in reverse order, so intra-block spends resolve.

use log::debug;

use kestrel_core::core::hash::{Hash, Hashed};
use kestrel_core::core::transaction::OutPoint;
use kestrel_core::core::{Block, Transaction};

use crate::error::{Error, ErrorKind};
use crate::pool;
use crate::store::Batch;
use crate::types::{ChainBlock, ChainEvent, TransactionDescriptor, TxLocation};

/// Applies a transaction at the given position of a best-chain block:
/// checks that every input resolves to an output not already spent by a
/// best-chain input, claims those outputs, and records the transaction
/// descriptor pointing at the block. Claims held by pooled transactions
/// lose to the chain; the losing transaction is evicted along with its
/// pool dependents.
///
/// With `check_only` the spend checks run without mutating anything.
/// Already-attached transactions are left untouched.
pub fn attach_transaction(
	batch: &Batch<'_>,
	tx_hash: Hash,
	tx: &Transaction,
	block_hash: Hash,
	tx_index: u32,
	check_only: bool,
	events: &mut Vec<ChainEvent>,
) -> Result<(), Error> {
	if let Some(desc) = batch.get_tx_descriptor(&tx_hash)? {
		let here = TxLocation::Chain {
			block_hash,
			tx_index,
		};
		if desc.location == here {
			return Ok(());
		}
	}

	if !tx.is_coinbase() {
		for (i, input) in tx.inputs.iter().enumerate() {
			let op = input.prev_output;
			let desc = batch
				.get_tx_descriptor(&op.tx_hash)?
				.ok_or_else(|| Error::from(ErrorKind::InputMissing(op)))?;
			if (op.index as usize) >= desc.spent_by.len() {
				return Err(ErrorKind::InputMissing(op).into());
			}
			if let Some(claim) = desc.spent_by[op.index as usize] {
				if claim.tx_hash != tx_hash {
					let claimant_on_chain = batch
						.get_tx_descriptor(&claim.tx_hash)?
						.map(|d| d.is_on_chain())
						.unwrap_or(false);
					if claimant_on_chain {
						return Err(ErrorKind::InputAlreadySpent(op).into());
					}
					if !check_only {
						debug!(
							"magnet: pooled transaction {} loses {} to the chain",
							claim.tx_hash, op
						);
						pool::evict_transaction(batch, &claim.tx_hash, events)?;
					}
				}
			}
			if !check_only {
				// the eviction above may have rewritten the descriptor
				let mut desc = batch
					.get_tx_descriptor(&op.tx_hash)?
					.ok_or_else(|| Error::from(ErrorKind::InputMissing(op)))?;
				desc.spent_by[op.index as usize] = Some(OutPoint::new(tx_hash, i as u32));
				batch.save_tx_descriptor(&op.tx_hash, &desc)?;
			}
		}
	}

	if !check_only {
		// adopt claims already held against a pooled copy of this
		// transaction and clear its pool entry; outputs of a transaction
		// never seen before are indexed unspent
		let spent_by = match batch.get_tx_descriptor(&tx_hash)? {
			Some(prev) => {
				if let TxLocation::Pool { seq } = prev.location {
					batch.delete_pool_entry(seq)?;
				}
				prev.spent_by
			}
			None => vec![None; tx.outputs.len()],
		};
		batch.save_tx_descriptor(
			&tx_hash,
			&TransactionDescriptor {
				location: TxLocation::Chain {
					block_hash,
					tx_index,
				},
				spent_by,
			},
		)?;
	}
	Ok(())
}

/// Reverts a transaction's spends: every output claimed by one of its
/// inputs is released. The descriptor of the transaction itself is dealt
/// with by the block-level detach, which decides between pool migration
/// and discarding.
pub fn detach_transaction(batch: &Batch<'_>, tx_hash: Hash, tx: &Transaction) -> Result<(), Error> {
	for (i, input) in tx.inputs.iter().enumerate() {
		let op = input.prev_output;
		if op.is_null() {
			continue;
		}
		if let Some(mut desc) = batch.get_tx_descriptor(&op.tx_hash)? {
			if (op.index as usize) < desc.spent_by.len()
				&& desc.spent_by[op.index as usize] == Some(OutPoint::new(tx_hash, i as u32))
			{
				desc.spent_by[op.index as usize] = None;
				batch.save_tx_descriptor(&op.tx_hash, &desc)?;
			}
		}
	}
	Ok(())
}

/// Connects a whole block at the given height: applies each transaction in
/// block order (clearing pooled copies as they confirm) and queues the
/// attach notification.
pub fn attach_block(
	batch: &Batch<'_>,
	block: &Block,
	height: u64,
	events: &mut Vec<ChainEvent>,
) -> Result<(), Error> {
	let block_hash = block.hash();
	for (i, tx) in block.transactions.iter().enumerate() {
		attach_transaction(batch, tx.hash(), tx, block_hash, i as u32, false, events)?;
	}
	events.push(ChainEvent::BlockAttached(ChainBlock {
		height,
		block: block.clone(),
	}));
	Ok(())
}

/// Disconnects a whole block: reverts each transaction's spends in reverse
/// block order, discards the coinbase (its coins die with the block, and
/// so does any pooled transaction spending them), then migrates the
/// surviving transactions into the pool in block order so intra-block
/// chains resolve. Queues the detach notification.
pub fn detach_block(
	batch: &Batch<'_>,
	block: &Block,
	height: u64,
	events: &mut Vec<ChainEvent>,
) -> Result<(), Error> {
	for tx in block.transactions.iter().rev() {
		let tx_hash = tx.hash();
		if tx.is_coinbase() {
			if let Some(desc) = batch.get_tx_descriptor(&tx_hash)? {
				for claim in desc.spent_by.iter().flatten() {
					pool::evict_transaction(batch, &claim.tx_hash, events)?;
				}
			}
			batch.delete_tx_descriptor(&tx_hash)?;
		} else {
			detach_transaction(batch, tx_hash, tx)?;
		}
	}
	for tx in block.transactions.iter().skip(1) {
		pool::readmit_transaction(batch, tx.hash(), tx, events)?;
	}
	events.push(ChainEvent::BlockDetached(ChainBlock {
		height,
		block: block.clone(),
	}));
	Ok(())
}
