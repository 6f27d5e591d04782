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

//! Definition of the genesis block.

use chrono::prelude::{TimeZone, Utc};

use crate::consensus;
use crate::core;
use crate::core::hash::ZERO_HASH;
use crate::core::transaction::{OutPoint, TxInput, TxOutput};

/// Genesis block definition. A single coinbase creating the first reward,
/// with the zero hash for a parent and a height of zero.
pub fn genesis() -> core::Block {
	let coinbase = core::Transaction::new(
		vec![TxInput::new(
			OutPoint::null(),
			b"kestrel 09/Feb/2024 small birds carry whole ledgers".to_vec(),
		)],
		vec![TxOutput {
			value: consensus::reward(0),
			lock_script: vec![0x51],
		}],
	);
	core::Block::new(
		ZERO_HASH,
		Utc.timestamp(1_707_480_000, 0),
		0x2000_ffff,
		vec![coinbase],
	)
}
