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

//! Answers "do we already have this?" for inventory announcements, so the
//! peer layer only fetches objects the node knows nothing about. The check
//! must be cheap, it runs once per announced item.

use std::sync::Arc;

use kestrel_core::core::{InvType, InvVector};

use crate::chain::Chain;
use crate::error::Error;

/// Resolves inventory vectors against everything the node holds: the
/// chain (best and forks), the unconfirmed pool and both orphan sets.
/// Never reports false for an item that is already persisted.
pub struct InventoryProcessor {
	chain: Arc<Chain>,
}

impl InventoryProcessor {
	/// A processor answering over the given chain.
	pub fn new(chain: Arc<Chain>) -> InventoryProcessor {
		InventoryProcessor { chain }
	}

	/// Whether the referenced item is known to the node in any form.
	/// Inventory types other than blocks and transactions are never "had".
	pub fn already_has(&self, inv: &InvVector) -> Result<bool, Error> {
		match inv.inv_type {
			InvType::Block => {
				Ok(self.chain.block_exists(&inv.hash)? || self.chain.is_orphan(&inv.hash))
			}
			InvType::Transaction => Ok(self.chain.transaction_known(&inv.hash)?
				|| self.chain.is_orphan_transaction(&inv.hash)),
			_ => Ok(false),
		}
	}
}
