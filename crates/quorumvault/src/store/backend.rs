//! storage backends for the encrypted store
//!
//! a backend only ever sees ciphertext records, compiled policy documents and
//! the root key verifier. every write is a single key insert, so readers see
//! either the old or the new value and never a torn one.
//!
//! implementations:
//! - memory: btree maps behind a lock, for tests and ephemeral stores
//! - sled: embedded database on local disk

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::Result;

/// logical keyspaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tree {
    Secrets,
    Policies,
    Meta,
}

impl Tree {
    pub fn name(&self) -> &'static str {
        match self {
            Tree::Secrets => "secrets",
            Tree::Policies => "policies",
            Tree::Meta => "meta",
        }
    }
}

pub trait Backend: Send + Sync {
    fn get(&self, tree: Tree, key: &str) -> Result<Option<Vec<u8>>>;

    fn put(&self, tree: Tree, key: &str, value: &[u8]) -> Result<()>;

    /// returns whether the key existed
    fn delete(&self, tree: Tree, key: &str) -> Result<bool>;

    /// keys starting with `prefix`, in lexicographic order
    fn keys_with_prefix(&self, tree: Tree, prefix: &str) -> Result<Vec<String>>;

    /// every value in the tree
    fn values(&self, tree: Tree) -> Result<Vec<Vec<u8>>>;
}

/// in-memory backend
#[derive(Default)]
pub struct MemoryBackend {
    trees: RwLock<BTreeMap<Tree, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for MemoryBackend {
    fn get(&self, tree: Tree, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .trees
            .read()
            .get(&tree)
            .and_then(|t| t.get(key))
            .cloned())
    }

    fn put(&self, tree: Tree, key: &str, value: &[u8]) -> Result<()> {
        self.trees
            .write()
            .entry(tree)
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, tree: Tree, key: &str) -> Result<bool> {
        Ok(self
            .trees
            .write()
            .get_mut(&tree)
            .map(|t| t.remove(key).is_some())
            .unwrap_or(false))
    }

    fn keys_with_prefix(&self, tree: Tree, prefix: &str) -> Result<Vec<String>> {
        let trees = self.trees.read();
        Ok(trees
            .get(&tree)
            .map(|t| {
                t.range(prefix.to_string()..)
                    .take_while(|(k, _)| k.starts_with(prefix))
                    .map(|(k, _)| k.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn values(&self, tree: Tree) -> Result<Vec<Vec<u8>>> {
        let trees = self.trees.read();
        Ok(trees
            .get(&tree)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(feature = "sled")]
pub use self::sled_backend::SledBackend;

#[cfg(feature = "sled")]
mod sled_backend {
    use std::path::Path;

    use super::{Backend, Tree};
    use crate::{Error, Result};

    fn storage_err(e: sled::Error) -> Error {
        Error::Storage(e.to_string())
    }

    /// sled backed store, one sled tree per keyspace
    pub struct SledBackend {
        db: sled::Db,
    }

    impl SledBackend {
        pub fn open(path: impl AsRef<Path>) -> Result<Self> {
            let db = sled::open(path).map_err(storage_err)?;
            Ok(Self { db })
        }

        fn tree(&self, tree: Tree) -> Result<sled::Tree> {
            self.db.open_tree(tree.name()).map_err(storage_err)
        }
    }

    impl Backend for SledBackend {
        fn get(&self, tree: Tree, key: &str) -> Result<Option<Vec<u8>>> {
            Ok(self
                .tree(tree)?
                .get(key)
                .map_err(storage_err)?
                .map(|v| v.to_vec()))
        }

        fn put(&self, tree: Tree, key: &str, value: &[u8]) -> Result<()> {
            let t = self.tree(tree)?;
            t.insert(key, value).map_err(storage_err)?;
            t.flush().map_err(storage_err)?;
            Ok(())
        }

        fn delete(&self, tree: Tree, key: &str) -> Result<bool> {
            let t = self.tree(tree)?;
            let existed = t.remove(key).map_err(storage_err)?.is_some();
            t.flush().map_err(storage_err)?;
            Ok(existed)
        }

        fn keys_with_prefix(&self, tree: Tree, prefix: &str) -> Result<Vec<String>> {
            self.tree(tree)?
                .scan_prefix(prefix)
                .keys()
                .map(|k| {
                    let k = k.map_err(storage_err)?;
                    String::from_utf8(k.to_vec())
                        .map_err(|e| Error::Storage(format!("non-utf8 key: {}", e)))
                })
                .collect()
        }

        fn values(&self, tree: Tree) -> Result<Vec<Vec<u8>>> {
            self.tree(tree)?
                .iter()
                .values()
                .map(|v| v.map(|v| v.to_vec()).map_err(storage_err))
                .collect()
        }
    }
}
