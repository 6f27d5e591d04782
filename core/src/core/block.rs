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

//! Blocks and block headers

use chrono::prelude::{DateTime, TimeZone, Utc};
use failure::Fail;
use num_bigint::BigUint;

use crate::consensus;
use crate::core::hash::{Hash, HashWriter, Hashed, ZERO_HASH};
use crate::core::target::{compact_to_target, Difficulty};
use crate::core::transaction::{self, Transaction};
use crate::ser::{self, Readable, Reader, Writeable, Writer};

/// Errors thrown by block validation
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum Error {
	/// A block must carry at least a coinbase transaction
	#[fail(display = "block has no transactions")]
	NoTransactions,
	/// The first transaction of a block must be its coinbase
	#[fail(display = "first transaction is not a coinbase")]
	MissingCoinbase,
	/// Only the first transaction of a block may be a coinbase
	#[fail(display = "coinbase past the first transaction")]
	ExtraCoinbase,
	/// The header merkle root does not commit to the block transactions
	#[fail(display = "merkle root mismatch")]
	MerkleRootMismatch,
	/// Block is over the maximum serialized size
	#[fail(display = "block exceeds maximum size")]
	TooLargeBlock,
	/// Error from underlying transaction validation
	#[fail(display = "invalid transaction: {}", _0)]
	Transaction(transaction::Error),
}

impl From<transaction::Error> for Error {
	fn from(e: transaction::Error) -> Error {
		Error::Transaction(e)
	}
}

/// Block header, fairly standard compared to other blockchains. Serializes
/// to exactly 80 bytes; the block hash is the double SHA-256 of those bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
	/// Version of the block
	pub version: i32,
	/// Hash of the block previous to this in the chain, zero for genesis
	pub previous: Hash,
	/// Merkle root of the block transactions
	pub merkle_root: Hash,
	/// Timestamp at which the block was built
	pub timestamp: DateTime<Utc>,
	/// Compact representation of the target this header's hash must satisfy
	pub bits: u32,
	/// Nonce iterated over during mining
	pub nonce: u32,
}

impl Default for BlockHeader {
	fn default() -> BlockHeader {
		BlockHeader {
			version: 1,
			previous: ZERO_HASH,
			merkle_root: ZERO_HASH,
			timestamp: Utc.timestamp(0, 0),
			bits: 0,
			nonce: 0,
		}
	}
}

impl Writeable for BlockHeader {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_i32(self.version)?;
		self.previous.write(writer)?;
		self.merkle_root.write(writer)?;
		writer.write_u32(self.timestamp.timestamp() as u32)?;
		writer.write_u32(self.bits)?;
		writer.write_u32(self.nonce)
	}
}

impl Readable for BlockHeader {
	fn read(reader: &mut dyn Reader) -> Result<BlockHeader, ser::Error> {
		let version = reader.read_i32()?;
		let previous = Hash::read(reader)?;
		let merkle_root = Hash::read(reader)?;
		let timestamp = reader.read_u32()?;
		let bits = reader.read_u32()?;
		let nonce = reader.read_u32()?;
		Ok(BlockHeader {
			version,
			previous,
			merkle_root,
			timestamp: Utc.timestamp(i64::from(timestamp), 0),
			bits,
			nonce,
		})
	}
}

impl BlockHeader {
	/// The work this header contributes to its chain, derived from its
	/// declared compact target.
	pub fn work(&self) -> Difficulty {
		Difficulty::from_bits(self.bits)
	}

	/// Whether the header hash satisfies the header's own declared target.
	/// The hash bytes are interpreted as a little-endian 256-bit number, the
	/// same convention the compact target encodes.
	pub fn verify_pow(&self, hash: &Hash) -> bool {
		match compact_to_target(self.bits) {
			Some(target) => BigUint::from_bytes_le(hash.as_bytes()) <= target,
			None => false,
		}
	}
}

/// A block as expressed in the wire protocol: a header followed by the
/// ordered list of transactions, the first of which is the coinbase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
	/// The block header
	pub header: BlockHeader,
	/// The block transactions, coinbase first
	pub transactions: Vec<Transaction>,
}

impl Writeable for Block {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.header.write(writer)?;
		writer.write_varint(self.transactions.len() as u64)?;
		for tx in &self.transactions {
			tx.write(writer)?;
		}
		Ok(())
	}
}

impl Readable for Block {
	fn read(reader: &mut dyn Reader) -> Result<Block, ser::Error> {
		let header = BlockHeader::read(reader)?;
		let tx_len = reader.read_varint()?;
		if tx_len > transaction::MAX_IN_OUT_LEN {
			return Err(ser::Error::TooLargeReadErr(
				"too many transactions".to_string(),
			));
		}
		let transactions = (0..tx_len)
			.map(|_| Transaction::read(reader))
			.collect::<Result<Vec<_>, _>>()?;
		Ok(Block {
			header,
			transactions,
		})
	}
}

impl Block {
	/// Builds a new block on the provided previous hash from a list of
	/// transactions, committing to them through the merkle root. The nonce
	/// is left at zero, to be iterated by whoever mines the block.
	pub fn new(
		previous: Hash,
		timestamp: DateTime<Utc>,
		bits: u32,
		transactions: Vec<Transaction>,
	) -> Block {
		let merkle_root = merkle_root(&tx_hashes(&transactions));
		Block {
			header: BlockHeader {
				version: 1,
				previous,
				merkle_root,
				timestamp,
				bits,
				nonce: 0,
			},
			transactions,
		}
	}

	/// The hash of a block is the hash of its header alone; the header
	/// commits to the transactions through the merkle root.
	pub fn hash(&self) -> Hash {
		self.header.hash()
	}

	/// Serialized size of the full block in bytes.
	pub fn total_size(&self) -> usize {
		ser::ser_vec(self).map(|v| v.len()).unwrap_or(0)
	}

	/// Statically validates the block shape: coinbase placement, merkle
	/// commitment, size cap and per-transaction sanity. Contextual checks
	/// (parent, target, spendability) belong to the chain pipeline.
	pub fn validate(&self) -> Result<(), Error> {
		if self.transactions.is_empty() {
			return Err(Error::NoTransactions);
		}
		if !self.transactions[0].is_coinbase() {
			return Err(Error::MissingCoinbase);
		}
		for tx in &self.transactions[1..] {
			if tx.is_coinbase() {
				return Err(Error::ExtraCoinbase);
			}
		}
		for tx in &self.transactions {
			tx.validate()?;
		}
		if merkle_root(&tx_hashes(&self.transactions)) != self.header.merkle_root {
			return Err(Error::MerkleRootMismatch);
		}
		if self.total_size() > consensus::MAX_BLOCK_SIZE {
			return Err(Error::TooLargeBlock);
		}
		Ok(())
	}
}

fn tx_hashes(transactions: &[Transaction]) -> Vec<Hash> {
	transactions.iter().map(|tx| tx.hash()).collect()
}

/// Merkle root over the given transaction hashes: pairs hashed together by
/// double SHA-256 level by level, the last entry of an odd level paired
/// with itself, until a single root remains.
pub fn merkle_root(hashes: &[Hash]) -> Hash {
	if hashes.is_empty() {
		return ZERO_HASH;
	}
	let mut layer = hashes.to_vec();
	while layer.len() > 1 {
		let mut next = Vec::with_capacity((layer.len() + 1) / 2);
		for pair in layer.chunks(2) {
			let left = &pair[0];
			let right = if pair.len() == 2 { &pair[1] } else { &pair[0] };
			let mut hasher = HashWriter::default();
			hasher.append(left.as_bytes());
			hasher.append(right.as_bytes());
			next.push(hasher.finalize());
		}
		layer = next;
	}
	layer[0]
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::core::hash::Hashed;
	use crate::core::transaction::{OutPoint, TxInput, TxOutput};
	use crate::ser::{deserialize, ser_vec};

	fn coinbase(extra: u8) -> Transaction {
		Transaction::new(
			vec![TxInput::new(OutPoint::null(), vec![0x04, extra])],
			vec![TxOutput {
				value: 50 * consensus::COIN,
				lock_script: vec![0x51],
			}],
		)
	}

	fn sample_block() -> Block {
		Block::new(ZERO_HASH, Utc.timestamp(1_500_000_000, 0), 0x2000_ffff, vec![coinbase(7)])
	}

	#[test]
	fn header_is_80_bytes() {
		let b = sample_block();
		assert_eq!(ser_vec(&b.header).unwrap().len(), 80);
	}

	#[test]
	fn header_hash_commits_to_nonce() {
		let b = sample_block();
		let mut b2 = b.clone();
		b2.header.nonce = 1;
		assert_ne!(b.header.hash(), b2.header.hash());
	}

	#[test]
	fn block_ser_deser() {
		let b = sample_block();
		let vec = ser_vec(&b).unwrap();
		let back: Block = deserialize(&mut &vec[..]).unwrap();
		assert_eq!(back, b);
		assert_eq!(back.header.hash(), b.header.hash());
	}

	#[test]
	fn merkle_single_tx_is_its_hash() {
		let cb = coinbase(1);
		assert_eq!(merkle_root(&[cb.hash()]), cb.hash());
	}

	#[test]
	fn merkle_odd_level_duplicates_last() {
		let hashes: Vec<Hash> = (0u8..3).map(|i| Hash::from_vec(&[i; 32])).collect();
		let padded = vec![hashes[0], hashes[1], hashes[2], hashes[2]];
		assert_eq!(merkle_root(&hashes), merkle_root(&padded));
	}

	#[test]
	fn merkle_order_matters() {
		let a = Hash::from_vec(&[1; 32]);
		let b = Hash::from_vec(&[2; 32]);
		assert_ne!(merkle_root(&[a, b]), merkle_root(&[b, a]));
	}

	#[test]
	fn validate_block_shape() {
		sample_block().validate().unwrap();

		let mut no_cb = sample_block();
		no_cb.transactions.clear();
		assert_eq!(no_cb.validate(), Err(Error::NoTransactions));

		let spend = Transaction::new(
			vec![TxInput::new(OutPoint::new(coinbase(7).hash(), 0), vec![1])],
			vec![TxOutput {
				value: 1,
				lock_script: vec![],
			}],
		);
		let mut cb_second = Block::new(
			ZERO_HASH,
			Utc.timestamp(1_500_000_000, 0),
			0x2000_ffff,
			vec![coinbase(1), coinbase(2)],
		);
		assert_eq!(cb_second.validate(), Err(Error::ExtraCoinbase));
		cb_second.transactions = vec![spend.clone(), coinbase(1)];
		assert_eq!(cb_second.validate(), Err(Error::MissingCoinbase));

		let mut bad_root = sample_block();
		bad_root.header.merkle_root = ZERO_HASH;
		assert_eq!(bad_root.validate(), Err(Error::MerkleRootMismatch));
	}

	#[test]
	fn pow_respects_target() {
		let mut header = sample_block().header;
		// all-ones target region at exponent 0x20 accepts roughly 1/256 of
		// hashes, an all-zero hash among them
		header.bits = 0x2000_ffff;
		assert!(header.verify_pow(&ZERO_HASH));
		assert!(!header.verify_pow(&Hash::from_vec(&[0xff; 32])));
		// unparseable bits can never be satisfied
		header.bits = 0x2080_ffff;
		assert!(!header.verify_pow(&ZERO_HASH));
	}
}
