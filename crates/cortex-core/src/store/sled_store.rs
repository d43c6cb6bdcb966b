use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use sled::Transactional;
use std::path::Path;

use super::StoreAdapter;
use crate::error::{CortexError, CortexResult};

const COUNTER_TREE: &str = "__cortex_counters";

/// `sled`-backed implementation of the Store Adapter.
#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> CortexResult<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// An ephemeral store for tests: `sled::Config::new().temporary(true)`.
    pub fn temporary() -> CortexResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    pub fn tree(&self, name: &str) -> CortexResult<sled::Tree> {
        Ok(self.db.open_tree(name)?)
    }

    /// Allocates the next value of a named monotonic counter (for integer-id
    /// tables: rules, policies, rituals, snapshots, metrics).
    pub fn next_id(&self, counter: &str) -> CortexResult<i64> {
        let tree = self.tree(COUNTER_TREE)?;
        let next = tree.update_and_fetch(counter.as_bytes(), |old| {
            let current = old
                .and_then(|b| b.try_into().ok())
                .map(i64::from_be_bytes)
                .unwrap_or(0);
            Some((current + 1).to_be_bytes().to_vec())
        })?;
        let bytes = next.ok_or_else(|| CortexError::Inconsistent("counter update produced no value".into()))?;
        let arr: [u8; 8] = bytes
            .as_ref()
            .try_into()
            .map_err(|_| CortexError::Inconsistent("corrupt counter bytes".into()))?;
        Ok(i64::from_be_bytes(arr))
    }

    pub fn get<T: DeserializeOwned>(&self, table: &str, id: &str) -> CortexResult<Option<T>> {
        let tree = self.tree(table)?;
        match tree.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put<T: Serialize>(&self, table: &str, id: &str, value: &T) -> CortexResult<()> {
        let tree = self.tree(table)?;
        let bytes = serde_json::to_vec(value)?;
        tree.insert(id.as_bytes(), bytes)?;
        Ok(())
    }

    pub fn delete(&self, table: &str, id: &str) -> CortexResult<bool> {
        let tree = self.tree(table)?;
        Ok(tree.remove(id.as_bytes())?.is_some())
    }

    /// Deserializes every row in `table`. Embedded stores have no secondary
    /// indexes; callers filter/sort in memory, paging where backpressure
    /// requires it.
    pub fn scan<T: DeserializeOwned>(&self, table: &str) -> CortexResult<Vec<(String, T)>> {
        let tree = self.tree(table)?;
        let mut out = Vec::new();
        for item in tree.iter() {
            let (key, bytes) = item?;
            let id = String::from_utf8_lossy(&key).to_string();
            out.push((id, serde_json::from_slice(&bytes)?));
        }
        Ok(out)
    }

    /// Row-lock-by-compare-and-swap: reads the current value, lets `f`
    /// compute the next value (or delete it, by returning `None`, or abort
    /// the write, by returning an error), and retries automatically on a
    /// concurrent writer winning the race — approximates a row lock via
    /// optimistic CAS retry.
    pub fn update<T, F>(&self, table: &str, id: &str, mut f: F) -> CortexResult<Option<T>>
    where
        T: Serialize + DeserializeOwned + Clone,
        F: FnMut(Option<T>) -> CortexResult<Option<T>>,
    {
        let tree = self.tree(table)?;
        loop {
            let current_bytes = tree.get(id.as_bytes())?;
            let current: Option<T> = match &current_bytes {
                Some(b) => Some(serde_json::from_slice(b)?),
                None => None,
            };
            let next = f(current)?;
            let next_bytes = match &next {
                Some(v) => Some(serde_json::to_vec(v)?),
                None => None,
            };
            let swapped = tree.compare_and_swap(id.as_bytes(), current_bytes, next_bytes.clone());
            match swapped {
                Ok(Ok(())) => return Ok(next),
                Ok(Err(_)) => continue, // lost the race; retry with fresh value
                Err(e) => return Err(CortexError::Store(e)),
            }
        }
    }

    /// Runs `f` across multiple tables in one atomic transaction: no partial
    /// progress is observable. `f` receives the transactional view of each
    /// named tree, in the order requested.
    pub fn transact<R>(
        &self,
        tables: &[&str],
        f: impl Fn(&[TransactionalTree]) -> Result<R, ConflictableTransactionError<CortexError>>,
    ) -> CortexResult<R> {
        let trees: Vec<sled::Tree> = tables.iter().map(|t| self.tree(t)).collect::<CortexResult<_>>()?;
        let tree_refs: Vec<&sled::Tree> = trees.iter().collect();
        tree_refs
            .as_slice()
            .transaction(|views: &[TransactionalTree]| f(views))
            .map_err(|e| match e {
                TransactionError::Abort(err) => err,
                TransactionError::Storage(se) => CortexError::Store(se),
            })
    }
}

impl StoreAdapter for SledStore {
    fn supports_row_locks(&self) -> bool {
        false
    }

    fn introspect(&self) -> CortexResult<Vec<String>> {
        Ok(self
            .db
            .tree_names()
            .into_iter()
            .map(|n| String::from_utf8_lossy(&n).to_string())
            .collect())
    }

    fn run_maintenance(&self) -> CortexResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Row {
        value: i32,
    }

    #[test]
    fn put_then_get_round_trips() {
        let store = SledStore::temporary().unwrap();
        store.put("t", "a", &Row { value: 1 }).unwrap();
        let got: Option<Row> = store.get("t", "a").unwrap();
        assert_eq!(got, Some(Row { value: 1 }));
    }

    #[test]
    fn update_applies_row_lock_semantics() {
        let store = SledStore::temporary().unwrap();
        store.put("t", "a", &Row { value: 1 }).unwrap();
        let result: Option<Row> = store
            .update("t", "a", |current: Option<Row>| {
                let mut r = current.unwrap();
                r.value += 1;
                Ok(Some(r))
            })
            .unwrap();
        assert_eq!(result, Some(Row { value: 2 }));
    }

    #[test]
    fn next_id_is_monotonic() {
        let store = SledStore::temporary().unwrap();
        assert_eq!(store.next_id("rules").unwrap(), 1);
        assert_eq!(store.next_id("rules").unwrap(), 2);
        assert_eq!(store.next_id("policies").unwrap(), 1);
    }

    #[test]
    fn scan_returns_every_row() {
        let store = SledStore::temporary().unwrap();
        store.put("t", "a", &Row { value: 1 }).unwrap();
        store.put("t", "b", &Row { value: 2 }).unwrap();
        let rows: Vec<(String, Row)> = store.scan("t").unwrap();
        assert_eq!(rows.len(), 2);
    }
}
