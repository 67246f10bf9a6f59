//! Embedded document engine: named collections of JSON documents with
//! unique indexes, serialized as a whole.
//!
//! Blob layout (JSON):
//! ```text
//! { "version": 1,
//!   "collections": { "<name>": { "unique_indexes": [..], "documents": [..] } } }
//! ```
//!
//! Everything lives in memory between `open` and `serialize`; there is no
//! incremental persistence.

use std::collections::{BTreeMap, BTreeSet};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, VaultError};

/// Store format version. Bumping it changes the KEK derivation contract too.
pub const STORE_FORMAT_VERSION: u32 = 1;

type Document = Map<String, Value>;

#[derive(Debug, Serialize, Deserialize)]
pub struct Database {
    version: u32,
    #[serde(default)]
    collections: BTreeMap<String, Collection>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Collection {
    #[serde(default)]
    unique_indexes: BTreeSet<String>,
    #[serde(default)]
    documents: Vec<Document>,
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Database {
    pub fn new() -> Self {
        Self {
            version: STORE_FORMAT_VERSION,
            collections: BTreeMap::new(),
        }
    }

    /// Rehydrate a database from a serialized blob.
    pub fn open(bytes: &[u8]) -> Result<Self> {
        let db: Database = serde_json::from_slice(bytes)
            .map_err(|e| VaultError::Corrupt(format!("store payload: {}", e)))?;
        if db.version != STORE_FORMAT_VERSION {
            return Err(VaultError::Corrupt(format!(
                "unsupported store format version {}",
                db.version
            )));
        }
        for (name, collection) in &db.collections {
            collection.check_unique().map_err(|e| {
                VaultError::Corrupt(format!("collection {}: {}", name, e))
            })?;
        }
        Ok(db)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| VaultError::Corrupt(format!("serialize store: {}", e)))
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn collection(&self, name: &str) -> Option<&Collection> {
        self.collections.get(name)
    }

    /// Get or create a collection.
    pub fn collection_mut(&mut self, name: &str) -> &mut Collection {
        self.collections.entry(name.to_string()).or_default()
    }
}

/// Index key for a field value: strings as-is, everything else as JSON text.
fn index_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl Collection {
    /// Declare `field` unique. Fails with `Duplicate` if existing documents
    /// already collide.
    pub fn ensure_unique_index(&mut self, field: &str) -> Result<()> {
        if self.unique_indexes.contains(field) {
            return Ok(());
        }
        self.unique_indexes.insert(field.to_string());
        if let Err(e) = self.check_unique() {
            self.unique_indexes.remove(field);
            return Err(e);
        }
        Ok(())
    }

    fn check_unique(&self) -> Result<()> {
        for field in &self.unique_indexes {
            let mut seen = BTreeSet::new();
            for value in self.documents.iter().filter_map(|d| d.get(field)) {
                let key = index_key(value);
                if !seen.insert(key.clone()) {
                    return Err(VaultError::Duplicate(key));
                }
            }
        }
        Ok(())
    }

    /// Insert a record. It must serialize to a JSON object.
    pub fn insert<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let doc = match serde_json::to_value(record) {
            Ok(Value::Object(doc)) => doc,
            Ok(_) => return Err(VaultError::InvalidState("document must be an object")),
            Err(_) => return Err(VaultError::InvalidState("document is not serializable")),
        };

        for field in &self.unique_indexes {
            let Some(value) = doc.get(field) else { continue };
            // Must agree with `check_unique`.
            let key = index_key(value);
            if self
                .documents
                .iter()
                .filter_map(|d| d.get(field))
                .any(|existing| index_key(existing) == key)
            {
                return Err(VaultError::Duplicate(key));
            }
        }

        self.documents.push(doc);
        Ok(())
    }

    /// First document whose `field` equals the string `value`.
    pub fn find_one<T: DeserializeOwned>(&self, field: &str, value: &str) -> Result<Option<T>> {
        let found = self
            .documents
            .iter()
            .find(|d| matches!(d.get(field), Some(Value::String(s)) if s == value));

        found
            .map(|doc| {
                serde_json::from_value(Value::Object(doc.clone()))
                    .map_err(|e| VaultError::Corrupt(format!("document: {}", e)))
            })
            .transpose()
    }

    /// String values of `field` across all documents.
    pub fn values<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.documents
            .iter()
            .filter_map(move |d| d.get(field).and_then(Value::as_str))
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Item {
        name: String,
        size: u32,
    }

    fn item(name: &str, size: u32) -> Item {
        Item { name: name.into(), size }
    }

    #[test]
    fn unique_index_rejects_collision() {
        let mut db = Database::new();
        let items = db.collection_mut("items");
        items.ensure_unique_index("name").unwrap();
        items.insert(&item("a", 1)).unwrap();
        items.insert(&item("b", 1)).unwrap();
        let err = items.insert(&item("a", 2)).unwrap_err();
        assert!(matches!(err, VaultError::Duplicate(ref v) if v == "a"));
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn non_unique_fields_may_repeat() {
        let mut db = Database::new();
        let items = db.collection_mut("items");
        items.insert(&item("a", 1)).unwrap();
        items.insert(&item("a", 1)).unwrap();
        assert_eq!(items.len(), 2);
        // Declaring the index afterwards fails and leaves it undeclared.
        assert!(items.ensure_unique_index("name").is_err());
        items.insert(&item("a", 3)).unwrap();
    }

    #[test]
    fn find_one_by_field() {
        let mut db = Database::new();
        let items = db.collection_mut("items");
        items.insert(&item("a", 1)).unwrap();
        items.insert(&item("b", 2)).unwrap();
        assert_eq!(items.find_one::<Item>("name", "b").unwrap(), Some(item("b", 2)));
        assert_eq!(items.find_one::<Item>("name", "zz").unwrap(), None);
    }

    #[test]
    fn serialize_and_reopen() {
        let mut db = Database::new();
        {
            let items = db.collection_mut("items");
            items.ensure_unique_index("name").unwrap();
            items.insert(&item("a", 1)).unwrap();
        }
        let blob = db.serialize().unwrap();

        let mut reopened = Database::open(&blob).unwrap();
        assert_eq!(reopened.version(), STORE_FORMAT_VERSION);
        let items = reopened.collection_mut("items");
        assert_eq!(items.find_one::<Item>("name", "a").unwrap(), Some(item("a", 1)));
        // Index survives the round trip.
        assert!(items.insert(&item("a", 9)).is_err());
    }

    #[derive(Serialize)]
    struct Numbered {
        name: u32,
    }

    #[test]
    fn mixed_type_values_share_one_index() {
        let mut db = Database::new();
        {
            let items = db.collection_mut("items");
            items.ensure_unique_index("name").unwrap();
            items.insert(&item("1", 1)).unwrap();
            let err = items.insert(&Numbered { name: 1 }).unwrap_err();
            assert!(matches!(err, VaultError::Duplicate(ref v) if v == "1"));
            items.insert(&Numbered { name: 2 }).unwrap();
        }

        let reopened = Database::open(&db.serialize().unwrap()).unwrap();
        assert_eq!(reopened.collection("items").unwrap().len(), 2);
    }

    #[test]
    fn rejects_unknown_version_and_garbage() {
        let blob = br#"{"version":2,"collections":{}}"#;
        assert!(matches!(Database::open(blob), Err(VaultError::Corrupt(_))));
        assert!(matches!(Database::open(b"\x00\x01"), Err(VaultError::Corrupt(_))));
        assert!(matches!(Database::open(b""), Err(VaultError::Corrupt(_))));
    }

    #[test]
    fn rejects_stored_index_violation() {
        let blob = br#"{"version":1,"collections":{"items":{"unique_indexes":["name"],
            "documents":[{"name":"a","size":1},{"name":"a","size":2}]}}}"#;
        assert!(matches!(Database::open(blob), Err(VaultError::Corrupt(_))));
    }

    #[test]
    fn non_object_documents_refused() {
        let mut db = Database::new();
        assert!(db.collection_mut("items").insert(&42u32).is_err());
    }
}
