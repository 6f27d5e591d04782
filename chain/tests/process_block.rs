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

mod common;

use common::*;

use kestrel_chain::{ErrorKind, Options};
use kestrel_core::core::hash::Hashed;
use kestrel_core::core::transaction::OutPoint;
use kestrel_core::core::Difficulty;
use kestrel_core::genesis;

#[test]
fn accept_chain_of_blocks() {
	let _ = env_logger::try_init();
	let dir = ".kestrel_accept";
	let chain = init_chain(dir);

	let g = genesis::genesis();
	let mut prev = g.hash();
	let mut hashes = vec![g.hash()];
	for n in 1..=3u64 {
		let b = build_block(prev, n, EASY_BITS, 0, vec![]);
		let tip = chain.process_block(b.clone(), Options::SKIP_POW).unwrap().unwrap();
		assert_eq!(tip.height, n);
		assert_eq!(tip.last_block_h, b.hash());
		assert_eq!(tip.prev_block_h, prev);
		assert_eq!(chain.head(), tip);
		prev = b.hash();
		hashes.push(b.hash());
	}

	// the height index registers exactly the accepted hashes
	for (height, hash) in hashes.iter().enumerate() {
		assert_eq!(chain.get_block_hash(height as u64).unwrap(), *hash);
		assert!(chain.block_exists(hash).unwrap());
	}

	// total work is the sum of per-header works along the best chain
	let expected: Difficulty = (0..4).map(|_| Difficulty::from_bits(EASY_BITS)).sum();
	assert_eq!(chain.total_work(), expected);

	// next-block links walk the whole best chain from genesis
	for height in 0..3u64 {
		let info = chain
			.get_block_info(&hashes[height as usize])
			.unwrap()
			.unwrap();
		assert_eq!(info.next_block_hash, Some(hashes[height as usize + 1]));
	}
	let tip_info = chain.get_block_info(&hashes[3]).unwrap().unwrap();
	assert_eq!(tip_info.next_block_hash, None);

	clean_output_dir(dir);
}

#[test]
fn duplicate_block_is_silent() {
	let _ = env_logger::try_init();
	let dir = ".kestrel_dup";
	let adapter = RecordingAdapter::new();
	let chain = init_chain_with_adapter(dir, adapter.clone());

	let b1 = build_block(genesis::genesis().hash(), 1, EASY_BITS, 0, vec![]);
	chain
		.process_block(b1.clone(), Options::SKIP_POW)
		.unwrap()
		.unwrap();
	adapter.take();

	// same block again: no tip change, no events
	assert_eq!(chain.process_block(b1, Options::SKIP_POW).unwrap(), None);
	assert_eq!(adapter.take(), vec![]);
	assert_eq!(chain.head().height, 1);

	clean_output_dir(dir);
}

#[test]
fn second_genesis_rejected() {
	let _ = env_logger::try_init();
	let dir = ".kestrel_gen2";
	let chain = init_chain(dir);

	// a different block claiming the zero parent cannot ever become best
	let mut impostor = build_block(genesis::genesis().hash(), 1, EASY_BITS, 7, vec![]);
	impostor.header.previous = kestrel_core::core::hash::ZERO_HASH;
	let err = chain
		.process_block(impostor, Options::SKIP_POW)
		.unwrap_err();
	match err.kind() {
		ErrorKind::Unfit(_) => {}
		k => panic!("unexpected error kind: {:?}", k),
	}
	assert_eq!(chain.head().height, 0);

	clean_output_dir(dir);
}

#[test]
fn equal_work_fork_does_not_displace() {
	let _ = env_logger::try_init();
	let dir = ".kestrel_tie";
	let chain = init_chain(dir);

	let g = genesis::genesis().hash();
	let a1 = build_block(g, 1, EASY_BITS, 0, vec![]);
	chain
		.process_block(a1.clone(), Options::SKIP_POW)
		.unwrap()
		.unwrap();

	// a sibling with exactly the same work rests on its fork
	let b1 = build_block(g, 1, EASY_BITS, 1, vec![]);
	assert_eq!(
		chain.process_block(b1.clone(), Options::SKIP_POW).unwrap(),
		None
	);
	assert_eq!(chain.head().last_block_h, a1.hash());

	// the fork block is persisted but casts no shadow on the best chain
	assert!(chain.block_exists(&b1.hash()).unwrap());
	assert_eq!(chain.get_block_hash(1).unwrap(), a1.hash());

	// a coinbase is a transaction of the best chain only once its block is
	assert!(chain
		.has_transaction(&a1.transactions[0].hash())
		.unwrap());
	assert!(!chain
		.has_transaction(&b1.transactions[0].hash())
		.unwrap());

	clean_output_dir(dir);
}

#[test]
fn sibling_reorg_moves_txs_to_pool() {
	let _ = env_logger::try_init();
	let dir = ".kestrel_sib";
	let chain = init_chain(dir);

	let g = genesis::genesis().hash();
	let b1 = build_block(g, 1, EASY_BITS, 0, vec![]);
	let b2 = build_block(b1.hash(), 2, EASY_BITS, 0, vec![]);
	chain.process_block(b1.clone(), Options::SKIP_POW).unwrap();
	chain.process_block(b2.clone(), Options::SKIP_POW).unwrap();

	// 3a confirms a spend of b1's coinbase
	let t = build_tx(
		vec![OutPoint::new(b1.transactions[0].hash(), 0)],
		vec![10_000],
	);
	let b3a = build_block(b2.hash(), 3, EASY_BITS, 0, vec![t.clone()]);
	chain
		.process_block(b3a.clone(), Options::SKIP_POW)
		.unwrap()
		.unwrap();
	assert!(chain.has_transaction(&t.hash()).unwrap());

	// a heavier sibling displaces 3a
	let b3b = build_block(b2.hash(), 3, HEAVY_BITS, 1, vec![]);
	let tip = chain
		.process_block(b3b.clone(), Options::SKIP_POW)
		.unwrap()
		.unwrap();
	assert_eq!(tip.height, 3);
	assert_eq!(tip.last_block_h, b3b.hash());
	assert_eq!(chain.get_block_hash(3).unwrap(), b3b.hash());

	// the displaced block is still known, its spend went back to the pool
	assert!(chain.block_exists(&b3a.hash()).unwrap());
	assert!(!chain.has_transaction(&t.hash()).unwrap());
	assert!(chain.transaction_in_pool(&t.hash()).unwrap());
	// the pooled spend still claims the output it consumes
	assert_eq!(
		chain
			.output_spender(&OutPoint::new(b1.transactions[0].hash(), 0))
			.unwrap(),
		Some(OutPoint::new(t.hash(), 0))
	);
	// the displaced coinbase died with its block
	assert!(!chain
		.transaction_known(&b3a.transactions[0].hash())
		.unwrap());

	clean_output_dir(dir);
}

#[test]
fn deeper_reorg_replays_and_pools_transactions() {
	let _ = env_logger::try_init();
	let dir = ".kestrel_deep";
	let adapter = RecordingAdapter::new();
	let chain = init_chain_with_adapter(dir, adapter.clone());

	let g = genesis::genesis().hash();

	// a spend of the genesis reward, later confirmed on both branches, and
	// a chained spend only the losing branch confirms
	let t_shared = build_tx(vec![genesis_reward()], vec![40_000, 2_000]);
	let t_chained = build_tx(vec![OutPoint::new(t_shared.hash(), 0)], vec![39_000]);

	let a1 = build_block(g, 1, EASY_BITS, 0, vec![]);
	let a2 = build_block(
		a1.hash(),
		2,
		EASY_BITS,
		0,
		vec![t_shared.clone(), t_chained.clone()],
	);
	chain.process_block(a1.clone(), Options::SKIP_POW).unwrap();
	chain.process_block(a2.clone(), Options::SKIP_POW).unwrap();
	assert_eq!(chain.head().height, 2);

	// a competing branch: b1 alone cannot displace two blocks...
	let b1 = build_block(g, 1, EASY_BITS, 9, vec![]);
	assert_eq!(
		chain.process_block(b1.clone(), Options::SKIP_POW).unwrap(),
		None
	);
	adapter.take();

	// ...but its heavy child can, re-confirming the shared spend
	let b2 = build_block(b1.hash(), 2, HEAVY_BITS, 9, vec![t_shared.clone()]);
	let tip = chain
		.process_block(b2.clone(), Options::SKIP_POW)
		.unwrap()
		.unwrap();
	assert_eq!(tip.height, 2);
	assert_eq!(tip.last_block_h, b2.hash());

	// all detaches of the losing branch before any attach, in chain order
	assert_eq!(
		adapter.take(),
		vec![
			Recorded::Detached(2, a2.hash()),
			Recorded::Detached(1, a1.hash()),
			Recorded::Attached(1, b1.hash()),
			Recorded::Attached(2, b2.hash()),
		]
	);

	// the height index follows the new branch
	assert_eq!(chain.get_block_hash(1).unwrap(), b1.hash());
	assert_eq!(chain.get_block_hash(2).unwrap(), b2.hash());

	// the shared spend is confirmed, not pooled; the chained spend went
	// back to the pool, still claiming the shared spend's output
	assert!(chain.has_transaction(&t_shared.hash()).unwrap());
	assert!(!chain.transaction_in_pool(&t_shared.hash()).unwrap());
	assert!(chain.transaction_in_pool(&t_chained.hash()).unwrap());
	assert_eq!(
		chain
			.output_spender(&OutPoint::new(t_shared.hash(), 0))
			.unwrap(),
		Some(OutPoint::new(t_chained.hash(), 0))
	);

	// the losing coinbases are gone entirely
	assert!(!chain
		.transaction_known(&a1.transactions[0].hash())
		.unwrap());
	assert!(!chain
		.transaction_known(&a2.transactions[0].hash())
		.unwrap());

	clean_output_dir(dir);
}

#[test]
fn reorg_to_shorter_heavier_fork_clears_stale_heights() {
	let _ = env_logger::try_init();
	let dir = ".kestrel_stale";
	let chain = init_chain(dir);

	let g = genesis::genesis().hash();
	let a1 = build_block(g, 1, EASY_BITS, 0, vec![]);
	let a2 = build_block(a1.hash(), 2, EASY_BITS, 0, vec![]);
	let a3 = build_block(a2.hash(), 3, EASY_BITS, 0, vec![]);
	for b in &[&a1, &a2, &a3] {
		chain.process_block((*b).clone(), Options::SKIP_POW).unwrap();
	}
	assert_eq!(chain.head().height, 3);

	let b1 = build_block(g, 1, EASY_BITS, 9, vec![]);
	let b2 = build_block(b1.hash(), 2, HEAVY_BITS, 9, vec![]);
	chain.process_block(b1.clone(), Options::SKIP_POW).unwrap();
	chain
		.process_block(b2.clone(), Options::SKIP_POW)
		.unwrap()
		.unwrap();

	// the best chain got shorter; height 3 is gone
	assert_eq!(chain.head().height, 2);
	assert_eq!(chain.get_block_hash(2).unwrap(), b2.hash());
	match chain.get_block_hash(3).unwrap_err().kind() {
		ErrorKind::InvalidBlockHeight(3) => {}
		k => panic!("unexpected error kind: {:?}", k),
	}

	// losing blocks dropped off the best chain but remain stored
	for b in &[&a1, &a2, &a3] {
		let info = chain.get_block_info(&b.hash()).unwrap().unwrap();
		assert_eq!(info.next_block_hash, None);
		assert!(chain.block_exists(&b.hash()).unwrap());
	}
	// the fork point now points into the new branch
	let g_info = chain.get_block_info(&g).unwrap().unwrap();
	assert_eq!(g_info.next_block_hash, Some(b1.hash()));

	clean_output_dir(dir);
}

#[test]
fn reorg_back_restores_spent_state() {
	let _ = env_logger::try_init();
	let dir = ".kestrel_back";
	let chain = init_chain(dir);

	let g = genesis::genesis().hash();
	let t1 = build_tx(vec![genesis_reward()], vec![30_000, 10_000]);
	let t2 = build_tx(vec![OutPoint::new(t1.hash(), 0)], vec![29_000]);
	let a1 = build_block(g, 1, EASY_BITS, 0, vec![t1.clone(), t2.clone()]);
	chain.process_block(a1.clone(), Options::SKIP_POW).unwrap();

	let spender_of_genesis = chain.output_spender(&genesis_reward()).unwrap();
	let spender_of_t1 = chain
		.output_spender(&OutPoint::new(t1.hash(), 0))
		.unwrap();
	assert_eq!(spender_of_t1, Some(OutPoint::new(t2.hash(), 0)));

	// swing away to a heavier empty branch...
	let b1 = build_block(g, 1, HEAVY_BITS, 9, vec![]);
	chain
		.process_block(b1.clone(), Options::SKIP_POW)
		.unwrap()
		.unwrap();
	assert!(!chain.has_transaction(&t1.hash()).unwrap());
	assert!(chain.transaction_in_pool(&t1.hash()).unwrap());
	assert!(chain.transaction_in_pool(&t2.hash()).unwrap());

	// ...and back by out-working it on the original branch
	let a2 = build_block(a1.hash(), 2, HEAVY_BITS, 0, vec![]);
	chain
		.process_block(a2.clone(), Options::SKIP_POW)
		.unwrap()
		.unwrap();
	assert_eq!(chain.head().last_block_h, a2.hash());

	// the descriptor state of the replayed branch is as before the swings
	assert!(chain.has_transaction(&t1.hash()).unwrap());
	assert!(chain.has_transaction(&t2.hash()).unwrap());
	assert!(!chain.transaction_in_pool(&t1.hash()).unwrap());
	assert!(!chain.transaction_in_pool(&t2.hash()).unwrap());
	assert_eq!(
		chain.output_spender(&genesis_reward()).unwrap(),
		spender_of_genesis
	);
	assert_eq!(
		chain
			.output_spender(&OutPoint::new(t1.hash(), 0))
			.unwrap(),
		spender_of_t1
	);
	assert_eq!(
		chain
			.output_spender(&OutPoint::new(t2.hash(), 0))
			.unwrap(),
		None
	);

	clean_output_dir(dir);
}
