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

//! Storage of core types using LMDB. All writes go through a `Batch`, a
//! write transaction committing atomically; reads through an open batch see
//! the writes already queued in it.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

use std::fs;
use std::marker;
use std::sync::Arc;

use failure::Fail;
use lmdb_zero as lmdb;
use lmdb_zero::traits::CreateCursor;
use lmdb_zero::LmdbResultExt;

use kestrel_core::ser;

/// Main error type for this storage crate.
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum Error {
	/// Couldn't find what we were looking for
	#[fail(display = "DB not found error: {}", _0)]
	NotFoundErr(String),
	/// Wraps an error originating from LMDB
	#[fail(display = "LMDB error: {}", _0)]
	LmdbErr(lmdb::error::Error),
	/// Wraps a serialization error for Writeable or Readable
	#[fail(display = "serialization error: {}", _0)]
	SerErr(String),
	/// File system error when preparing the environment
	#[fail(display = "file error: {}", _0)]
	FileErr(String),
}

impl From<lmdb::error::Error> for Error {
	fn from(e: lmdb::error::Error) -> Error {
		Error::LmdbErr(e)
	}
}

/// unwraps the inner option by converting the none case to a not found error
pub fn option_to_not_found<T>(res: Result<Option<T>, Error>, field_name: &str) -> Result<T, Error> {
	match res {
		Ok(None) => Err(Error::NotFoundErr(field_name.to_owned())),
		Ok(Some(o)) => Ok(o),
		Err(e) => Err(e),
	}
}

const ENV_MAP_SIZE: usize = 64 * 1024 * 1024 * 1024;
const ENV_MAX_DBS: u32 = 8;

/// Create a new LMDB env under the provided directory to spawn various
/// databases from.
pub fn new_env(path: String) -> Result<lmdb::Environment, Error> {
	let full_path = path + "/lmdb";
	fs::create_dir_all(&full_path).map_err(|e| Error::FileErr(format!("{}", e)))?;
	let env = unsafe {
		let mut env_builder = lmdb::EnvBuilder::new()?;
		env_builder.set_maxdbs(ENV_MAX_DBS)?;
		// the map size only reserves address space, not actual disk
		env_builder.set_mapsize(ENV_MAP_SIZE)?;
		env_builder.open(&full_path, lmdb::open::Flags::empty(), 0o600)?
	};
	Ok(env)
}

/// LMDB-backed store facilitating data access and serialization. All writes
/// are done through a Batch abstraction providing atomicity.
pub struct Store {
	env: Arc<lmdb::Environment>,
	db: Arc<lmdb::Database<'static>>,
}

impl Store {
	/// Creates a new store with the provided name under the specified
	/// environment
	pub fn open(env: Arc<lmdb::Environment>, name: &str) -> Result<Store, Error> {
		let db = Arc::new(lmdb::Database::open(
			env.clone(),
			Some(name),
			&lmdb::DatabaseOptions::new(lmdb::db::CREATE),
		)?);
		Ok(Store { env, db })
	}

	/// Gets a value from the db, provided its key
	pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
		let txn = lmdb::ReadTransaction::new(self.env.clone())?;
		let access = txn.access();
		let res = access.get(&self.db, key);
		res.map(|res: &[u8]| res.to_vec())
			.to_opt()
			.map_err(From::from)
	}

	/// Gets a `Readable` value from the db, provided its key. Encapsulates
	/// serialization.
	pub fn get_ser<T: ser::Readable>(&self, key: &[u8]) -> Result<Option<T>, Error> {
		let txn = lmdb::ReadTransaction::new(self.env.clone())?;
		let access = txn.access();
		get_ser_access(&self.db, key, &access)
	}

	/// Whether the provided key exists
	pub fn exists(&self, key: &[u8]) -> Result<bool, Error> {
		let txn = lmdb::ReadTransaction::new(self.env.clone())?;
		let access = txn.access();
		let res: lmdb::error::Result<&lmdb::Ignore> = access.get(&self.db, key);
		res.to_opt().map(|r| r.is_some()).map_err(From::from)
	}

	/// Produces an iterator of `Readable` types moving forward from the
	/// provided key prefix.
	pub fn iter<T: ser::Readable>(&self, prefix: &[u8]) -> Result<SerIterator<T>, Error> {
		let txn = Arc::new(lmdb::ReadTransaction::new(self.env.clone())?);
		let cursor = Arc::new(txn.cursor(self.db.clone())?);
		Ok(SerIterator {
			tx: txn,
			cursor,
			seek: false,
			prefix: prefix.to_vec(),
			_marker: marker::PhantomData,
		})
	}

	/// Builds a new batch to be used with this store.
	pub fn batch(&self) -> Result<Batch<'_>, Error> {
		let txn = lmdb::WriteTransaction::new(self.env.clone())?;
		Ok(Batch {
			store: self,
			tx: txn,
		})
	}
}

fn get_ser_access<T: ser::Readable>(
	db: &lmdb::Database<'static>,
	key: &[u8],
	access: &lmdb::ConstAccessor<'_>,
) -> Result<Option<T>, Error> {
	let res: lmdb::error::Result<&[u8]> = access.get(db, key);
	match res.to_opt() {
		Ok(Some(mut res)) => match ser::deserialize(&mut res) {
			Ok(res) => Ok(Some(res)),
			Err(e) => Err(Error::SerErr(format!("{}", e))),
		},
		Ok(None) => Ok(None),
		Err(e) => Err(From::from(e)),
	}
}

/// Batch to write multiple Writeables to the db in an atomic manner. Reads
/// through the batch observe its own pending writes.
pub struct Batch<'a> {
	store: &'a Store,
	tx: lmdb::WriteTransaction<'a>,
}

impl<'a> Batch<'a> {
	/// Writes a single key/value pair to the db
	pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), Error> {
		self.tx
			.access()
			.put(&self.store.db, key, value, lmdb::put::Flags::empty())?;
		Ok(())
	}

	/// Writes a single key and its `Writeable` value to the db. Encapsulates
	/// serialization.
	pub fn put_ser<W: ser::Writeable>(&self, key: &[u8], value: &W) -> Result<(), Error> {
		match ser::ser_vec(value) {
			Ok(data) => self.put(key, &data),
			Err(err) => Err(Error::SerErr(format!("{}", err))),
		}
	}

	/// Gets a value from the db through the open transaction, provided its
	/// key.
	pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
		let access = self.tx.access();
		let res: lmdb::error::Result<&[u8]> = access.get(&self.store.db, key);
		res.map(|r| r.to_vec()).to_opt().map_err(From::from)
	}

	/// Whether the provided key exists, taking the content of the current
	/// batch into account.
	pub fn exists(&self, key: &[u8]) -> Result<bool, Error> {
		let access = self.tx.access();
		let res: lmdb::error::Result<&lmdb::Ignore> = access.get(&self.store.db, key);
		res.to_opt().map(|r| r.is_some()).map_err(From::from)
	}

	/// Gets a `Readable` value from the db, provided its key, taking the
	/// content of the current batch into account.
	pub fn get_ser<T: ser::Readable>(&self, key: &[u8]) -> Result<Option<T>, Error> {
		let access = self.tx.access();
		get_ser_access(&self.store.db, key, &access)
	}

	/// Deletes a key/value pair from the db. Deleting an absent key is not
	/// an error.
	pub fn delete(&self, key: &[u8]) -> Result<(), Error> {
		self.tx
			.access()
			.del_key(&self.store.db, key)
			.to_opt()
			.map(|_| ())
			.map_err(From::from)
	}

	/// Creates a child of this batch. It will be merged with its parent on
	/// commit, abandoned otherwise.
	pub fn child(&mut self) -> Result<Batch<'_>, Error> {
		Ok(Batch {
			store: self.store,
			tx: self.tx.child_tx()?,
		})
	}

	/// Writes the batch to db
	pub fn commit(self) -> Result<(), Error> {
		self.tx.commit()?;
		Ok(())
	}
}

/// An iterator that produces Readable instances back. Wraps the lower level
/// cursor and deserializes the returned values, stopping once keys no
/// longer match the requested prefix.
pub struct SerIterator<T>
where
	T: ser::Readable,
{
	tx: Arc<lmdb::ReadTransaction<'static>>,
	cursor: Arc<lmdb::Cursor<'static, 'static>>,
	seek: bool,
	prefix: Vec<u8>,
	_marker: marker::PhantomData<T>,
}

impl<T> Iterator for SerIterator<T>
where
	T: ser::Readable,
{
	type Item = T;

	fn next(&mut self) -> Option<T> {
		let access = self.tx.access();
		let kv = if self.seek {
			Arc::get_mut(&mut self.cursor)?.next(&access)
		} else {
			self.seek = true;
			Arc::get_mut(&mut self.cursor)?.seek_range_k(&access, &self.prefix[..])
		};
		self.deser_if_prefix_match(kv)
	}
}

impl<T> SerIterator<T>
where
	T: ser::Readable,
{
	fn deser_if_prefix_match(&self, kv: Result<(&[u8], &[u8]), lmdb::Error>) -> Option<T> {
		match kv {
			Ok((k, v)) => {
				let plen = self.prefix.len();
				if plen == 0 || (k.len() >= plen && k[0..plen] == self.prefix[..]) {
					ser::deserialize(&mut &v[..]).ok()
				} else {
					None
				}
			}
			Err(_) => None,
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use kestrel_core::ser::{Readable, Reader, Writeable, Writer};

	#[derive(Debug, PartialEq)]
	struct Rec(u64);

	impl Writeable for Rec {
		fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
			writer.write_u64(self.0)
		}
	}

	impl Readable for Rec {
		fn read(reader: &mut dyn Reader) -> Result<Rec, ser::Error> {
			reader.read_u64().map(Rec)
		}
	}

	fn open_test_store(dir: &tempfile::TempDir) -> Store {
		let env = new_env(dir.path().to_str().unwrap().to_string()).unwrap();
		Store::open(Arc::new(env), "test").unwrap()
	}

	#[test]
	fn batch_commit_and_abandon() {
		let dir = tempfile::tempdir().unwrap();
		let store = open_test_store(&dir);

		{
			let batch = store.batch().unwrap();
			batch.put_ser(b"a", &Rec(1)).unwrap();
			// dropped without commit
		}
		assert_eq!(store.get_ser::<Rec>(b"a").unwrap(), None);

		let batch = store.batch().unwrap();
		batch.put_ser(b"a", &Rec(1)).unwrap();
		// the open batch sees its own writes, the store does not yet
		assert_eq!(batch.get_ser::<Rec>(b"a").unwrap(), Some(Rec(1)));
		assert!(batch.exists(b"a").unwrap());
		batch.commit().unwrap();
		assert_eq!(store.get_ser::<Rec>(b"a").unwrap(), Some(Rec(1)));
	}

	#[test]
	fn child_batch_isolation() {
		let dir = tempfile::tempdir().unwrap();
		let store = open_test_store(&dir);

		let mut batch = store.batch().unwrap();
		batch.put_ser(b"keep", &Rec(1)).unwrap();
		{
			let child = batch.child().unwrap();
			child.put_ser(b"gone", &Rec(2)).unwrap();
			// child dropped without commit
		}
		{
			let child = batch.child().unwrap();
			child.put_ser(b"kept-too", &Rec(3)).unwrap();
			child.commit().unwrap();
		}
		batch.commit().unwrap();

		assert_eq!(store.get_ser::<Rec>(b"keep").unwrap(), Some(Rec(1)));
		assert_eq!(store.get_ser::<Rec>(b"gone").unwrap(), None);
		assert_eq!(store.get_ser::<Rec>(b"kept-too").unwrap(), Some(Rec(3)));
	}

	#[test]
	fn delete_missing_is_ok() {
		let dir = tempfile::tempdir().unwrap();
		let store = open_test_store(&dir);
		let batch = store.batch().unwrap();
		batch.delete(b"never-there").unwrap();
		batch.commit().unwrap();
	}

	#[test]
	fn prefix_iterator_in_key_order() {
		let dir = tempfile::tempdir().unwrap();
		let store = open_test_store(&dir);

		let batch = store.batch().unwrap();
		batch.put_ser(b"p\x00\x02", &Rec(2)).unwrap();
		batch.put_ser(b"p\x00\x01", &Rec(1)).unwrap();
		batch.put_ser(b"q\x00\x01", &Rec(9)).unwrap();
		batch.commit().unwrap();

		let found: Vec<Rec> = store.iter(b"p").unwrap().collect();
		assert_eq!(found, vec![Rec(1), Rec(2)]);
	}
}
