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

use kestrel_chain::Options;
use kestrel_core::core::hash::Hashed;
use kestrel_core::genesis;

#[test]
fn block_info_records_the_block_shape() {
	let _ = env_logger::try_init();
	let dir = ".kestrel_idx1";
	let chain = init_chain(dir);

	let t = build_tx(vec![genesis_reward()], vec![2_000]);
	let b1 = build_block(genesis::genesis().hash(), 1, EASY_BITS, 0, vec![t]);
	chain.process_block(b1.clone(), Options::SKIP_POW).unwrap();

	let info = chain.get_block_info(&b1.hash()).unwrap().unwrap();
	assert_eq!(info.height, 1);
	assert_eq!(info.header, b1.header);
	assert_eq!(info.transaction_count, 2);
	assert_eq!(info.block_size as usize, b1.total_size());

	// cumulative work strictly grows along the chain
	let g_info = chain
		.get_block_info(&genesis::genesis().hash())
		.unwrap()
		.unwrap();
	assert!(info.total_work > g_info.total_work);

	clean_output_dir(dir);
}

#[test]
fn header_lookup_goes_through_block_info() {
	let _ = env_logger::try_init();
	let dir = ".kestrel_idx2";
	let chain = init_chain(dir);

	let b1 = build_block(genesis::genesis().hash(), 1, EASY_BITS, 0, vec![]);
	chain.process_block(b1.clone(), Options::SKIP_POW).unwrap();

	assert_eq!(
		chain.get_block_header(&b1.hash()).unwrap(),
		Some(b1.header.clone())
	);
	assert_eq!(chain.head_header().unwrap(), b1.header);

	clean_output_dir(dir);
}

#[test]
fn forward_iterator_walks_to_the_head() {
	let _ = env_logger::try_init();
	let dir = ".kestrel_idx3";
	let chain = init_chain(dir);

	let g = genesis::genesis().hash();
	let mut prev = g;
	let mut blocks = vec![];
	for n in 1..=4u64 {
		let b = build_block(prev, n, EASY_BITS, 0, vec![]);
		chain.process_block(b.clone(), Options::SKIP_POW).unwrap();
		prev = b.hash();
		blocks.push(b);
	}

	let walked: Vec<_> = chain.chain_block_iter(2).collect();
	assert_eq!(walked.len(), 3);
	for (i, cb) in walked.iter().enumerate() {
		let height = 2 + i as u64;
		assert_eq!(cb.height, height);
		assert_eq!(cb.block, blocks[height as usize - 1]);
	}

	// from the genesis the iterator covers the whole chain
	assert_eq!(chain.chain_block_iter(0).count(), 5);
	// beyond the head there is nothing to walk
	assert_eq!(chain.chain_block_iter(5).count(), 0);

	clean_output_dir(dir);
}

#[test]
fn outputs_resolve_across_chain_and_pool() {
	let _ = env_logger::try_init();
	let dir = ".kestrel_idx4";
	let chain = init_chain(dir);

	let t = build_tx(vec![genesis_reward()], vec![2_500, 1_500]);
	chain.process_transaction(t.clone()).unwrap();

	// pooled outputs resolve
	let out = chain
		.get_transaction_output(&kestrel_core::core::OutPoint::new(t.hash(), 1))
		.unwrap();
	assert_eq!(out.value, 1_500);
	// confirmed outputs resolve
	let reward = chain.get_transaction_output(&genesis_reward()).unwrap();
	assert_eq!(
		reward.value,
		kestrel_core::consensus::reward(0)
	);
	// out-of-range and unknown outpoints don't
	assert!(chain
		.get_transaction_output(&kestrel_core::core::OutPoint::new(t.hash(), 2))
		.is_err());
	assert!(chain
		.get_transaction_output(&kestrel_core::core::OutPoint::new(
			kestrel_core::core::hash::Hash::from_vec(&[9; 32]),
			0
		))
		.is_err());

	clean_output_dir(dir);
}
