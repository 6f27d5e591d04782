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

//! The pool of accepted but unconfirmed transactions, persisted in the
//! chain store's pool namespace. Admission validates that every input
//! resolves to an output that is unspent on the best chain or created
//! earlier in the pool, and tentatively claims those outputs so a double
//! spend is caught at the door.

use log::debug;

use kestrel_core::core::hash::Hash;
use kestrel_core::core::transaction::OutPoint;
use kestrel_core::core::Transaction;

use crate::error::{Error, ErrorKind};
use crate::store::{Batch, ChainStore};
use crate::types::{ChainEvent, PoolEntry, TransactionDescriptor, TxLocation};

/// Admits a transaction into the pool: resolves every input against the
/// descriptor state, claims the referenced outputs and persists the entry,
/// all within the provided batch. Returns the insertion sequence.
///
/// Inputs referencing nothing we know of surface as `MissingInputs` with
/// the full set of unresolvable outpoints, so the caller can park the
/// transaction in the orphanage keyed by each of them.
pub fn add_transaction(batch: &Batch<'_>, tx_hash: Hash, tx: &Transaction) -> Result<u64, Error> {
	if tx.is_coinbase() {
		return Err(ErrorKind::Other("coinbase cannot enter the transaction pool".to_string()).into());
	}

	let mut missing = vec![];
	for input in &tx.inputs {
		let op = input.prev_output;
		match batch.get_tx_descriptor(&op.tx_hash)? {
			None => missing.push(op),
			Some(desc) => {
				if (op.index as usize) >= desc.spent_by.len() {
					missing.push(op);
				} else if let Some(claim) = desc.spent_by[op.index as usize] {
					if claim.tx_hash != tx_hash {
						return Err(ErrorKind::InputAlreadySpent(op).into());
					}
				}
			}
		}
	}
	if !missing.is_empty() {
		return Err(ErrorKind::MissingInputs(missing).into());
	}

	let seq = batch.next_pool_seq()?;
	for (i, input) in tx.inputs.iter().enumerate() {
		let op = input.prev_output;
		let mut desc = batch
			.get_tx_descriptor(&op.tx_hash)?
			.ok_or_else(|| Error::from(ErrorKind::InputMissing(op)))?;
		desc.spent_by[op.index as usize] = Some(OutPoint::new(tx_hash, i as u32));
		batch.save_tx_descriptor(&op.tx_hash, &desc)?;
	}
	batch.save_tx_descriptor(
		&tx_hash,
		&TransactionDescriptor {
			location: TxLocation::Pool { seq },
			spent_by: vec![None; tx.outputs.len()],
		},
	)?;
	batch.save_pool_entry(&PoolEntry {
		seq,
		tx_hash,
		tx: tx.clone(),
	})?;
	Ok(seq)
}

/// Moves a transaction detached from the best chain back into the pool,
/// preserving whatever claims other transactions already hold against its
/// outputs, and re-claiming the outputs its own inputs consume.
///
/// A detached transaction whose inputs no longer resolve (it spent a
/// discarded coinbase, or an output of a transaction purged just before
/// it) cannot outlive its block: it is dropped instead, together with any
/// pooled transaction depending on it. Returns whether the transaction
/// made it into the pool.
pub fn readmit_transaction(
	batch: &Batch<'_>,
	tx_hash: Hash,
	tx: &Transaction,
	events: &mut Vec<ChainEvent>,
) -> Result<bool, Error> {
	for input in &tx.inputs {
		let op = input.prev_output;
		let resolvable = match batch.get_tx_descriptor(&op.tx_hash)? {
			Some(desc) => (op.index as usize) < desc.spent_by.len(),
			None => false,
		};
		if !resolvable {
			debug!(
				"pool: detached transaction {} lost input {}, dropping",
				tx_hash, op
			);
			if let Some(desc) = batch.get_tx_descriptor(&tx_hash)? {
				for claim in desc.spent_by.iter().flatten() {
					evict_transaction(batch, &claim.tx_hash, events)?;
				}
			}
			batch.delete_tx_descriptor(&tx_hash)?;
			events.push(ChainEvent::TransactionEvicted(tx_hash));
			return Ok(false);
		}
	}

	let seq = batch.next_pool_seq()?;
	let spent_by = match batch.get_tx_descriptor(&tx_hash)? {
		Some(desc) => desc.spent_by,
		None => vec![None; tx.outputs.len()],
	};
	batch.save_tx_descriptor(
		&tx_hash,
		&TransactionDescriptor {
			location: TxLocation::Pool { seq },
			spent_by,
		},
	)?;
	batch.save_pool_entry(&PoolEntry {
		seq,
		tx_hash,
		tx: tx.clone(),
	})?;
	for (i, input) in tx.inputs.iter().enumerate() {
		let op = input.prev_output;
		let mut desc = batch
			.get_tx_descriptor(&op.tx_hash)?
			.ok_or_else(|| Error::from(ErrorKind::InputMissing(op)))?;
		desc.spent_by[op.index as usize] = Some(OutPoint::new(tx_hash, i as u32));
		batch.save_tx_descriptor(&op.tx_hash, &desc)?;
	}
	Ok(true)
}

/// Drops a pooled transaction, releasing the claims it held on its inputs'
/// outputs and cascading to any pooled transaction spending one of its own
/// outputs. Transactions confirmed on the chain are left alone.
pub fn evict_transaction(
	batch: &Batch<'_>,
	tx_hash: &Hash,
	events: &mut Vec<ChainEvent>,
) -> Result<(), Error> {
	let mut stack = vec![*tx_hash];
	while let Some(h) = stack.pop() {
		let desc = match batch.get_tx_descriptor(&h)? {
			Some(desc) => desc,
			None => continue,
		};
		let seq = match desc.location {
			TxLocation::Pool { seq } => seq,
			TxLocation::Chain { .. } => continue,
		};
		let entry = batch.get_pool_entry(seq)?.ok_or_else(|| {
			Error::from(ErrorKind::Other(format!(
				"pool entry {} missing for transaction {}",
				seq, h
			)))
		})?;

		// dependents first so their claims die with them
		for claim in desc.spent_by.iter().flatten() {
			stack.push(claim.tx_hash);
		}
		for (i, input) in entry.tx.inputs.iter().enumerate() {
			let op = input.prev_output;
			if let Some(mut d) = batch.get_tx_descriptor(&op.tx_hash)? {
				if (op.index as usize) < d.spent_by.len()
					&& d.spent_by[op.index as usize] == Some(OutPoint::new(h, i as u32))
				{
					d.spent_by[op.index as usize] = None;
					batch.save_tx_descriptor(&op.tx_hash, &d)?;
				}
			}
		}
		batch.delete_pool_entry(seq)?;
		batch.delete_tx_descriptor(&h)?;
		events.push(ChainEvent::TransactionEvicted(h));
		debug!("pool: evicted transaction {}", h);
	}
	Ok(())
}

/// The `count` oldest pool transactions by insertion sequence, the set a
/// block template would draw from first.
pub fn oldest_transactions(
	store: &ChainStore,
	count: usize,
) -> Result<Vec<(Hash, Transaction)>, Error> {
	Ok(store
		.pool_iter()?
		.take(count)
		.map(|entry| (entry.tx_hash, entry.tx))
		.collect())
}

/// Whether the pool currently holds the given transaction.
pub fn contains(store: &ChainStore, tx_hash: &Hash) -> Result<bool, Error> {
	Ok(store
		.get_tx_descriptor(tx_hash)?
		.map(|desc| !desc.is_on_chain())
		.unwrap_or(false))
}
