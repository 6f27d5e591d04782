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

//! Ingest entry points for the networking layer: thin classifiers handing
//! blocks and transactions to the chain, with the orphan paths a gossiping
//! peer expects.

use std::sync::Arc;

use kestrel_core::core::transaction::OutPoint;
use kestrel_core::core::{Block, Transaction};

use crate::chain::Chain;
use crate::error::{Error, ErrorKind};
use crate::types::{Options, Tip};

/// Accepts blocks from peers: known-parent blocks flow into the chain,
/// parentless ones into the orphan pool, and newly accepted blocks promote
/// whatever orphans were waiting on them.
pub struct BlockProcessor {
	chain: Arc<Chain>,
}

impl BlockProcessor {
	/// A processor feeding the given chain.
	pub fn new(chain: Arc<Chain>) -> BlockProcessor {
		BlockProcessor { chain }
	}

	/// Processes a block received from the network. Returns the new chain
	/// tip when the block advanced the best chain.
	pub fn accept_block(&self, b: Block, opts: Options) -> Result<Option<Tip>, Error> {
		self.chain.process_block(b, opts)
	}

	/// Files a block straight into the orphan pool; for gossip paths that
	/// already know the parent is missing.
	pub fn put_orphan(&self, b: Block, opts: Options) {
		self.chain.add_orphan_block(b, opts);
	}
}

/// Accepts loose transactions from peers, routing the ones with
/// unresolvable inputs into the transaction orphanage instead of failing
/// the submission.
pub struct TransactionProcessor {
	chain: Arc<Chain>,
}

impl TransactionProcessor {
	/// A processor feeding the given chain.
	pub fn new(chain: Arc<Chain>) -> TransactionProcessor {
		TransactionProcessor { chain }
	}

	/// Processes a transaction received from the network. A transaction
	/// parked as an orphan counts as accepted; the peer did nothing wrong.
	pub fn accept_transaction(&self, tx: Transaction) -> Result<(), Error> {
		match self.chain.process_transaction(tx) {
			Err(ref e) if missing_inputs(e) => Ok(()),
			other => other,
		}
	}

	/// Files a transaction straight into the orphanage against the
	/// outpoints it cannot resolve.
	pub fn put_orphan(&self, tx: Transaction, missing: Vec<OutPoint>) {
		self.chain.add_orphan_transaction(tx, missing);
	}
}

fn missing_inputs(e: &Error) -> bool {
	match e.kind() {
		ErrorKind::MissingInputs(_) => true,
		_ => false,
	}
}
