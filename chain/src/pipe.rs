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

//! Implementation of the chain block acceptance (or refusal) pipeline:
//! classify an incoming block as duplicate, genesis, extension of the best
//! chain, fork resident or reorganization trigger, and apply it. The whole
//! of one block's processing writes into a single batch, committed (or
//! abandoned) by the caller.

use chrono::prelude::Utc;
use chrono::Duration;
use log::{debug, info, warn};

use kestrel_core::consensus;
use kestrel_core::core::hash::{Hash, ZERO_HASH};
use kestrel_core::core::{Block, BlockHeader};

use crate::error::{Error, ErrorKind};
use crate::magnet;
use crate::store::Batch;
use crate::types::{BlockInfo, ChainEvent, Options, Tip};

/// Contextual information required to process a new block and either
/// reject or accept it.
pub struct BlockContext<'a> {
	/// Options for the processing of the block
	pub opts: Options,
	/// The open storage batch all writes go into
	pub batch: Batch<'a>,
	/// Notifications queued while processing, for delivery after commit in
	/// the exact order they were produced
	pub events: Vec<ChainEvent>,
}

// block processing pipeline
// 1. is the header valid (time, PoW)
// 2. is the block itself consistent (coinbase shape, merkle root)
// 3. is it the next head, the genesis, a new fork, or extension of a fork
// 4. add it to the head or the fork
// 5. did a fork accumulate more work than the head?
// 6. ok fine, swap them up

/// Runs the block through the acceptance pipeline. Returns the new chain
/// tip when the block extended or replaced the best chain, None when it
/// was a duplicate or rests on a fork.
pub fn process_block(b: &Block, ctx: &mut BlockContext<'_>) -> Result<Option<Tip>, Error> {
	let hash = b.hash();
	debug!(
		"pipe: process_block {} with {} transactions",
		hash,
		b.transactions.len()
	);

	if ctx.batch.block_exists(&hash)? {
		// the network layer re-announces freely, swallow duplicates
		return Ok(None);
	}

	validate_header(&b.header, &hash, ctx.opts)?;
	b.validate().map_err(|e| Error::from(ErrorKind::InvalidBlock(e)))?;

	let head = ctx.batch.head()?;

	if b.header.previous == ZERO_HASH {
		return process_genesis(b, hash, head, ctx).map(Some);
	}
	let head = head.ok_or_else(|| Error::from(ErrorKind::GenesisBlockRequired))?;

	// an unknown parent makes the block an orphan; the facade routes those
	// to the orphan pool rather than storage
	let parent = ctx
		.batch
		.get_block_info(&b.header.previous)?
		.ok_or_else(|| Error::from(ErrorKind::Orphan))?;

	let height = parent.height + 1;
	let total_work = parent.total_work.clone() + b.header.work();

	// the block is persisted whether it lands on the best chain or a fork
	ctx.batch.save_block(&hash, b)?;
	ctx.batch.save_block_info(
		&hash,
		&BlockInfo {
			height,
			header: b.header.clone(),
			total_work: total_work.clone(),
			next_block_hash: None,
			transaction_count: b.transactions.len() as u32,
			block_size: b.total_size() as u32,
		},
	)?;

	if b.header.previous == head.last_block_h {
		// simple extension of the best chain
		magnet::attach_block(&ctx.batch, b, height, &mut ctx.events)?;

		let mut parent = parent;
		parent.next_block_hash = Some(hash);
		ctx.batch.save_block_info(&b.header.previous, &parent)?;
		ctx.batch.save_height_index(height, &hash)?;

		let tip = Tip {
			height,
			last_block_h: hash,
			prev_block_h: b.header.previous,
			total_work,
		};
		ctx.batch.save_head(&tip)?;
		info!("pipe: chain head {} at {}", hash, height);
		Ok(Some(tip))
	} else if total_work > head.total_work {
		info!(
			"pipe: fork block {} at {} outworks the head, reorganizing",
			hash, height
		);
		let tip = reorganize(&head, &hash, ctx)?;
		Ok(Some(tip))
	} else {
		debug!("pipe: block {} at {} rests on a fork", hash, height);
		Ok(None)
	}
}

/// First level of validation, only needs the header to keep the DoS
/// surface as cheap as possible.
fn validate_header(header: &BlockHeader, hash: &Hash, opts: Options) -> Result<(), Error> {
	if header.timestamp > Utc::now() + Duration::seconds(consensus::MAX_FUTURE_TIME_DRIFT) {
		return Err(ErrorKind::InvalidBlockTime.into());
	}
	if !opts.contains(Options::SKIP_POW) && !header.verify_pow(hash) {
		return Err(ErrorKind::InvalidPow.into());
	}
	Ok(())
}

/// The bootstrap path: a block with the zero hash for a parent may only
/// ever be accepted on an empty chain, and becomes its first best block.
fn process_genesis(
	b: &Block,
	hash: Hash,
	head: Option<Tip>,
	ctx: &mut BlockContext<'_>,
) -> Result<Tip, Error> {
	if head.is_some() {
		return Err(ErrorKind::Unfit("genesis block already known".to_string()).into());
	}
	let total_work = b.header.work();
	ctx.batch.save_block(&hash, b)?;
	ctx.batch.save_block_info(
		&hash,
		&BlockInfo {
			height: 0,
			header: b.header.clone(),
			total_work: total_work.clone(),
			next_block_hash: None,
			transaction_count: b.transactions.len() as u32,
			block_size: b.total_size() as u32,
		},
	)?;
	magnet::attach_block(&ctx.batch, b, 0, &mut ctx.events)?;
	ctx.batch.save_height_index(0, &hash)?;
	let tip = Tip {
		height: 0,
		last_block_h: hash,
		prev_block_h: ZERO_HASH,
		total_work,
	};
	ctx.batch.save_head(&tip)?;
	info!("pipe: genesis block {} saved", hash);
	Ok(tip)
}

/// Swaps the best chain over to the branch ending at `new_tip_hash`, which
/// accumulated more work than the current head.
///
/// Walks both tips back to their common ancestor, detaches the old branch
/// newest first, attaches the new branch oldest first and rewrites the
/// height index and next-block links. The branch switch runs in a child
/// batch: if attaching any new-branch block fails, the child is abandoned
/// and the pre-reorganization state stands untouched, while the triggering
/// block remains persisted on its fork.
fn reorganize(head: &Tip, new_tip_hash: &Hash, ctx: &mut BlockContext<'_>) -> Result<Tip, Error> {
	let mut old_cursor = load_cursor(&ctx.batch, &head.last_block_h)?;
	let mut new_cursor = load_cursor(&ctx.batch, new_tip_hash)?;

	// two-cursor walk back to the fork point, stepping whichever side is
	// higher, both when level
	let mut old_branch: Vec<(Hash, BlockInfo)> = vec![];
	let mut new_branch: Vec<(Hash, BlockInfo)> = vec![];
	while old_cursor.0 != new_cursor.0 {
		if old_cursor.1.height > new_cursor.1.height {
			old_cursor = step_back(&ctx.batch, old_cursor, &mut old_branch)?;
		} else if new_cursor.1.height > old_cursor.1.height {
			new_cursor = step_back(&ctx.batch, new_cursor, &mut new_branch)?;
		} else {
			old_cursor = step_back(&ctx.batch, old_cursor, &mut old_branch)?;
			new_cursor = step_back(&ctx.batch, new_cursor, &mut new_branch)?;
		}
	}
	let fork_hash = old_cursor.0;
	debug!(
		"pipe: reorg fork point {} at {}, detaching {}, attaching {}",
		fork_hash,
		old_cursor.1.height,
		old_branch.len(),
		new_branch.len()
	);

	let mut reorg_events: Vec<ChainEvent> = vec![];
	let batch = &mut ctx.batch;
	let result = (|| -> Result<Tip, Error> {
		let child = batch.child()?;

		for (h, info) in &old_branch {
			let block = child
				.get_block(h)?
				.ok_or_else(|| missing_block(h, info.height))?;
			magnet::detach_block(&child, &block, info.height, &mut reorg_events)?;
			let mut cleared = info.clone();
			cleared.next_block_hash = None;
			child.save_block_info(h, &cleared)?;
			child.delete_height_index(info.height)?;
		}

		let mut prev_hash = fork_hash;
		let mut tip = None;
		for (h, info) in new_branch.iter().rev() {
			let block = child
				.get_block(h)?
				.ok_or_else(|| missing_block(h, info.height))?;
			magnet::attach_block(&child, &block, info.height, &mut reorg_events)?;
			child.save_height_index(info.height, h)?;

			let mut parent_info = child
				.get_block_info(&prev_hash)?
				.ok_or_else(|| missing_block(&prev_hash, 0))?;
			parent_info.next_block_hash = Some(*h);
			child.save_block_info(&prev_hash, &parent_info)?;

			prev_hash = *h;
			tip = Some(Tip::from_info(*h, info));
		}

		let tip =
			tip.ok_or_else(|| Error::from(ErrorKind::Other("empty reorg branch".to_string())))?;
		child.save_head(&tip)?;
		child.commit()?;
		Ok(tip)
	})();

	match result {
		Ok(tip) => {
			ctx.events.append(&mut reorg_events);
			info!(
				"pipe: reorg complete, new head {} at {}",
				tip.last_block_h, tip.height
			);
			Ok(tip)
		}
		Err(e) => {
			warn!(
				"pipe: reorg to {} failed ({}), original chain kept",
				new_tip_hash, e
			);
			Err(ErrorKind::ReorgFailed.into())
		}
	}
}

fn load_cursor(batch: &Batch<'_>, h: &Hash) -> Result<(Hash, BlockInfo), Error> {
	let info = batch
		.get_block_info(h)?
		.ok_or_else(|| missing_block(h, 0))?;
	Ok((*h, info))
}

// pushes the cursor block onto its branch and moves the cursor to its parent
fn step_back(
	batch: &Batch<'_>,
	cursor: (Hash, BlockInfo),
	branch: &mut Vec<(Hash, BlockInfo)>,
) -> Result<(Hash, BlockInfo), Error> {
	let parent_hash = cursor.1.header.previous;
	let parent = load_cursor(batch, &parent_hash)?;
	branch.push(cursor);
	Ok(parent)
}

fn missing_block(h: &Hash, height: u64) -> Error {
	ErrorKind::Other(format!("block {} at {} missing from store", h, height)).into()
}
