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

//! Transactions

use std::collections::HashSet;
use std::fmt;

use failure::Fail;

use crate::consensus;
use crate::core::hash::{Hash, ZERO_HASH};
use crate::ser::{self, Readable, Reader, Writeable, Writer};

/// The maximum number of inputs or outputs a transaction may have
/// and be deserializable. Only for DoS protection.
pub const MAX_IN_OUT_LEN: u64 = 50_000;

/// The sequence number carried by inputs that opt out of any relative
/// timelock semantics.
pub const FINAL_SEQUENCE: u32 = 0xffff_ffff;

/// Errors thrown by transaction validation.
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum Error {
	/// Transaction has no inputs
	#[fail(display = "transaction has no inputs")]
	NoInputs,
	/// Transaction has no outputs
	#[fail(display = "transaction has no outputs")]
	NoOutputs,
	/// Two inputs spend the same output
	#[fail(display = "duplicate inputs")]
	DuplicateInputs,
	/// A single output value is above the money cap
	#[fail(display = "output value out of range")]
	OutputValueOutOfRange,
	/// The sum of output values overflows or is above the money cap
	#[fail(display = "total output value out of range")]
	TotalValueOutOfRange,
	/// A non-coinbase input references the null outpoint
	#[fail(display = "null input reference outside a coinbase")]
	NullInput,
	/// Coinbase unlocking script is under or over the allowed size
	#[fail(display = "coinbase unlocking script size out of bounds")]
	CoinbaseScriptSize,
}

/// Reference to a single output of an earlier transaction, the way inputs
/// designate the coins they spend.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutPoint {
	/// Hash of the transaction holding the referenced output
	pub tx_hash: Hash,
	/// Index of the output within that transaction
	pub index: u32,
}

impl OutPoint {
	/// Builds an outpoint from its parts.
	pub fn new(tx_hash: Hash, index: u32) -> OutPoint {
		OutPoint { tx_hash, index }
	}

	/// The reference carried by coinbase inputs, pointing nowhere.
	pub fn null() -> OutPoint {
		OutPoint {
			tx_hash: ZERO_HASH,
			index: 0xffff_ffff,
		}
	}

	/// Whether this is the coinbase null reference.
	pub fn is_null(&self) -> bool {
		self.tx_hash == ZERO_HASH && self.index == 0xffff_ffff
	}
}

impl fmt::Display for OutPoint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:?}:{}", self.tx_hash, self.index)
	}
}

impl Writeable for OutPoint {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.tx_hash.write(writer)?;
		writer.write_u32(self.index)
	}
}

impl Readable for OutPoint {
	fn read(reader: &mut dyn Reader) -> Result<OutPoint, ser::Error> {
		let tx_hash = Hash::read(reader)?;
		let index = reader.read_u32()?;
		Ok(OutPoint { tx_hash, index })
	}
}

/// A transaction input, spending a single output of an earlier transaction
/// designated by its outpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
	/// The output being spent
	pub prev_output: OutPoint,
	/// Opaque unlocking script satisfying the referenced locking script
	pub unlock_script: Vec<u8>,
	/// Sequence number
	pub sequence: u32,
}

impl TxInput {
	/// A plain input with a final sequence number.
	pub fn new(prev_output: OutPoint, unlock_script: Vec<u8>) -> TxInput {
		TxInput {
			prev_output,
			unlock_script,
			sequence: FINAL_SEQUENCE,
		}
	}
}

impl Writeable for TxInput {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.prev_output.write(writer)?;
		writer.write_bytes(&self.unlock_script)?;
		writer.write_u32(self.sequence)
	}
}

impl Readable for TxInput {
	fn read(reader: &mut dyn Reader) -> Result<TxInput, ser::Error> {
		let prev_output = OutPoint::read(reader)?;
		let unlock_script = reader.read_bytes()?;
		let sequence = reader.read_u32()?;
		Ok(TxInput {
			prev_output,
			unlock_script,
			sequence,
		})
	}
}

/// A transaction output, carrying a value locked by a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
	/// Value of the output in base units
	pub value: u64,
	/// Opaque locking script
	pub lock_script: Vec<u8>,
}

impl Writeable for TxOutput {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u64(self.value)?;
		writer.write_bytes(&self.lock_script)
	}
}

impl Readable for TxOutput {
	fn read(reader: &mut dyn Reader) -> Result<TxOutput, ser::Error> {
		let value = reader.read_u64()?;
		let lock_script = reader.read_bytes()?;
		Ok(TxOutput { value, lock_script })
	}
}

/// A transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
	/// Version number for future upgrades
	pub version: i32,
	/// Inputs spending earlier outputs, in order
	pub inputs: Vec<TxInput>,
	/// Newly created outputs, in order
	pub outputs: Vec<TxOutput>,
	/// Earliest time or height at which the transaction may be mined
	pub lock_time: u32,
}

impl Transaction {
	/// Creates a new transaction with the provided inputs and outputs.
	pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Transaction {
		Transaction {
			version: 1,
			inputs,
			outputs,
			lock_time: 0,
		}
	}

	/// A coinbase creates coins out of a single null input; its unlocking
	/// script is free-form within size bounds.
	pub fn is_coinbase(&self) -> bool {
		self.inputs.len() == 1 && self.inputs[0].prev_output.is_null()
	}

	/// Sum of all output values. Only meaningful on a validated transaction,
	/// where the sum is known not to overflow.
	pub fn total_output_value(&self) -> u64 {
		self.outputs.iter().map(|o| o.value).sum()
	}

	/// Stateless sanity checks on the transaction shape and values. Script
	/// execution and spendability of the inputs are checked elsewhere.
	pub fn validate(&self) -> Result<(), Error> {
		if self.inputs.is_empty() {
			return Err(Error::NoInputs);
		}
		if self.outputs.is_empty() {
			return Err(Error::NoOutputs);
		}

		let mut total: u64 = 0;
		for out in &self.outputs {
			if out.value > consensus::MAX_MONEY {
				return Err(Error::OutputValueOutOfRange);
			}
			total = total
				.checked_add(out.value)
				.ok_or(Error::TotalValueOutOfRange)?;
		}
		if total > consensus::MAX_MONEY {
			return Err(Error::TotalValueOutOfRange);
		}

		if self.is_coinbase() {
			let script_len = self.inputs[0].unlock_script.len();
			if script_len < consensus::COINBASE_SCRIPT_MIN_SIZE
				|| script_len > consensus::COINBASE_SCRIPT_MAX_SIZE
			{
				return Err(Error::CoinbaseScriptSize);
			}
		} else {
			let mut seen = HashSet::with_capacity(self.inputs.len());
			for input in &self.inputs {
				if input.prev_output.is_null() {
					return Err(Error::NullInput);
				}
				if !seen.insert(input.prev_output) {
					return Err(Error::DuplicateInputs);
				}
			}
		}
		Ok(())
	}
}

/// Implementation of Writeable for a transaction, defines how to write the
/// transaction as binary.
impl Writeable for Transaction {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_i32(self.version)?;
		writer.write_varint(self.inputs.len() as u64)?;
		for input in &self.inputs {
			input.write(writer)?;
		}
		writer.write_varint(self.outputs.len() as u64)?;
		for output in &self.outputs {
			output.write(writer)?;
		}
		writer.write_u32(self.lock_time)
	}
}

/// Implementation of Readable for a transaction, defines how to read a full
/// transaction from a binary stream.
impl Readable for Transaction {
	fn read(reader: &mut dyn Reader) -> Result<Transaction, ser::Error> {
		let version = reader.read_i32()?;

		let input_len = reader.read_varint()?;
		if input_len > MAX_IN_OUT_LEN {
			return Err(ser::Error::TooLargeReadErr("too many inputs".to_string()));
		}
		let inputs = (0..input_len)
			.map(|_| TxInput::read(reader))
			.collect::<Result<Vec<_>, _>>()?;

		let output_len = reader.read_varint()?;
		if output_len > MAX_IN_OUT_LEN {
			return Err(ser::Error::TooLargeReadErr("too many outputs".to_string()));
		}
		let outputs = (0..output_len)
			.map(|_| TxOutput::read(reader))
			.collect::<Result<Vec<_>, _>>()?;

		let lock_time = reader.read_u32()?;
		Ok(Transaction {
			version,
			inputs,
			outputs,
			lock_time,
		})
	}
}
