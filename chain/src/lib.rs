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

//! The block chain itself: validates and accepts new blocks and loose
//! transactions, decides which branch of history is the best chain,
//! handles reorgs, and maintains the unconfirmed pool, the orphan sets
//! and the inventory surface the peer layer queries.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

mod chain;
pub mod error;
pub mod inventory;
pub mod magnet;
pub mod orphan;
pub mod pipe;
pub mod pool;
pub mod processor;
pub mod store;
pub mod types;

// Re-export the base interface
pub use crate::chain::Chain;
pub use crate::error::{Error, ErrorKind};
pub use crate::inventory::InventoryProcessor;
pub use crate::processor::{BlockProcessor, TransactionProcessor};
pub use crate::types::{ChainAdapter, ChainBlock, NoopAdapter, Options, Tip};
