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

use std::sync::Arc;

use kestrel_chain::{BlockProcessor, Options};
use kestrel_core::genesis;

#[test]
fn orphan_promoted_when_parent_arrives() {
	let _ = env_logger::try_init();
	let dir = ".kestrel_orph1";
	let chain = Arc::new(init_chain(dir));

	let g = genesis::genesis().hash();
	let b1 = build_block(g, 1, EASY_BITS, 0, vec![]);
	let b2 = build_block(b1.hash(), 2, EASY_BITS, 0, vec![]);

	// the child arrives first: parked, not stored, best chain untouched
	assert_eq!(
		chain.process_block(b2.clone(), Options::SKIP_POW).unwrap(),
		None
	);
	assert!(chain.is_orphan(&b2.hash()));
	assert!(!chain.block_exists(&b2.hash()).unwrap());
	assert_eq!(chain.head().height, 0);

	// the parent pulls the orphan in behind it
	chain.process_block(b1.clone(), Options::SKIP_POW).unwrap();
	assert_eq!(chain.head().height, 2);
	assert_eq!(chain.head().last_block_h, b2.hash());
	assert!(!chain.is_orphan(&b2.hash()));
	assert!(chain.block_exists(&b2.hash()).unwrap());

	clean_output_dir(dir);
}

#[test]
fn buffered_orphan_chain_promotes_recursively() {
	let _ = env_logger::try_init();
	let dir = ".kestrel_orph2";
	let chain = Arc::new(init_chain(dir));

	let g = genesis::genesis().hash();
	let b1 = build_block(g, 1, EASY_BITS, 0, vec![]);
	let b2 = build_block(b1.hash(), 2, EASY_BITS, 0, vec![]);
	let b3 = build_block(b2.hash(), 3, EASY_BITS, 0, vec![]);

	chain.process_block(b3.clone(), Options::SKIP_POW).unwrap();
	chain.process_block(b2.clone(), Options::SKIP_POW).unwrap();
	assert!(chain.is_orphan(&b2.hash()));
	assert!(chain.is_orphan(&b3.hash()));

	// the earliest buffered ancestor is the one to ask peers for
	assert_eq!(chain.orphan_root(&b3.hash()), Some(b2.hash()));

	chain.process_block(b1.clone(), Options::SKIP_POW).unwrap();
	assert_eq!(chain.head().height, 3);
	assert_eq!(chain.head().last_block_h, b3.hash());
	assert!(!chain.is_orphan(&b2.hash()));
	assert!(!chain.is_orphan(&b3.hash()));

	clean_output_dir(dir);
}

#[test]
fn direct_orphan_filing_leaves_best_chain_alone() {
	let _ = env_logger::try_init();
	let dir = ".kestrel_orph3";
	let chain = Arc::new(init_chain(dir));
	let processor = BlockProcessor::new(chain.clone());

	let g = genesis::genesis().hash();
	let b1 = build_block(g, 1, EASY_BITS, 0, vec![]);
	let b2 = build_block(b1.hash(), 2, EASY_BITS, 0, vec![]);
	processor
		.accept_block(b1.clone(), Options::SKIP_POW)
		.unwrap();
	assert_eq!(chain.head().height, 1);

	// filed straight into the orphanage despite the known parent
	let b3 = build_block(b2.hash(), 3, EASY_BITS, 0, vec![]);
	processor.put_orphan(b3.clone(), Options::SKIP_POW);
	assert!(chain.is_orphan(&b3.hash()));
	assert_eq!(chain.head().height, 1);

	// accepting the gap block promotes the filed orphan as well
	processor
		.accept_block(b2.clone(), Options::SKIP_POW)
		.unwrap();
	assert_eq!(chain.head().height, 3);
	assert!(!chain.is_orphan(&b3.hash()));

	clean_output_dir(dir);
}

#[test]
fn orphan_of_fork_parent_does_not_advance_head() {
	let _ = env_logger::try_init();
	let dir = ".kestrel_orph4";
	let chain = Arc::new(init_chain(dir));

	let g = genesis::genesis().hash();
	let a1 = build_block(g, 1, EASY_BITS, 0, vec![]);
	let a2 = build_block(a1.hash(), 2, EASY_BITS, 0, vec![]);
	chain.process_block(a1.clone(), Options::SKIP_POW).unwrap();
	chain.process_block(a2.clone(), Options::SKIP_POW).unwrap();

	// an orphan whose promotion lands on a light fork stays off the best
	// chain once its parent shows up
	let f1 = build_block(g, 1, EASY_BITS, 5, vec![]);
	let f2 = build_block(f1.hash(), 2, EASY_BITS, 5, vec![]);
	chain.process_block(f2.clone(), Options::SKIP_POW).unwrap();
	assert!(chain.is_orphan(&f2.hash()));

	chain.process_block(f1.clone(), Options::SKIP_POW).unwrap();
	assert!(chain.block_exists(&f1.hash()).unwrap());
	assert!(chain.block_exists(&f2.hash()).unwrap());
	assert_eq!(chain.head().last_block_h, a2.hash());

	clean_output_dir(dir);
}
