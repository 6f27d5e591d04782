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

//! Core wire types: blocks and block headers, transactions and the pieces
//! they are made of, inventory vectors and difficulty targets.

pub mod block;
pub mod hash;
pub mod inv;
pub mod target;
pub mod transaction;

pub use self::block::{Block, BlockHeader};
pub use self::inv::{InvType, InvVector};
pub use self::target::Difficulty;
pub use self::transaction::{OutPoint, Transaction, TxInput, TxOutput};
