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

//! All the rules required for a cryptocurrency to have reach consensus across
//! the whole network are complex and hard to completely isolate. Some can be
//! simple parameters (like block reward), others complex algorithms (like
//! Merkle sum trees or reorg rules). However, as long as they're simple
//! enough, consensus-relevant constants and short functions should be kept
//! here.

/// A base unit is divisible up to 10^8; aka one hundred million base units
/// to a whole coin.
pub const COIN: u64 = 100_000_000;

/// Total money supply cap; no output or output total may exceed it.
pub const MAX_MONEY: u64 = 21_000_000 * COIN;

/// Maximum serialized size of a whole block in bytes.
pub const MAX_BLOCK_SIZE: usize = 1_000_000;

/// The unlocking script of a coinbase carries arbitrary data within these
/// size bounds.
pub const COINBASE_SCRIPT_MIN_SIZE: usize = 2;
/// Upper bound of the coinbase unlocking script size.
pub const COINBASE_SCRIPT_MAX_SIZE: usize = 100;

/// How far in the future a block timestamp may lie before the block is
/// refused, in seconds.
pub const MAX_FUTURE_TIME_DRIFT: i64 = 2 * 60 * 60;

/// Interval in blocks at which the coinbase reward halves.
pub const REWARD_HALVING_INTERVAL: u64 = 210_000;

/// The coinbase reward a block at the given height may create.
pub fn reward(height: u64) -> u64 {
	let halvings = height / REWARD_HALVING_INTERVAL;
	if halvings >= 64 {
		0
	} else {
		(50 * COIN) >> halvings
	}
}
