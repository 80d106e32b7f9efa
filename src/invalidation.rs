use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Opaque (source, name) key identifying a server-side object that consumers
/// want change notifications for.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId {
    source: i32,
    name: String,
}

impl ObjectId {
    pub fn new(source: i32, name: impl Into<String>) -> Self {
        Self {
            source,
            name: name.into(),
        }
    }

    pub fn source(&self) -> i32 {
        self.source
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.source, self.name)
    }
}

pub type ObjectIdSet = BTreeSet<ObjectId>;

/// A single change notification for one object. `version == None` is the
/// "unknown version" form used when the server signals invalidate-all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invalidation {
    pub object_id: ObjectId,
    pub version: Option<i64>,
    pub payload: Option<String>,
}

impl Invalidation {
    pub fn new(object_id: ObjectId, version: i64, payload: impl Into<String>) -> Self {
        Self {
            object_id,
            version: Some(version),
            payload: Some(payload.into()),
        }
    }

    pub fn unknown_version(object_id: ObjectId) -> Self {
        Self {
            object_id,
            version: None,
            payload: None,
        }
    }

    pub fn is_unknown_version(&self) -> bool {
        self.version.is_none()
    }
}

/// Invalidations grouped by object id, in id order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationMap {
    entries: BTreeMap<ObjectId, Vec<Invalidation>>,
}

impl InvalidationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// One unknown-version invalidation per id; the expansion of the empty
    /// "invalidate everything" signal.
    pub fn invalidate_all(ids: &ObjectIdSet) -> Self {
        let mut map = Self::new();
        for id in ids {
            map.insert(Invalidation::unknown_version(id.clone()));
        }
        map
    }

    pub fn insert(&mut self, invalidation: Invalidation) {
        self.entries
            .entry(invalidation.object_id.clone())
            .or_default()
            .push(invalidation);
    }

    /// The entries whose ids fall within `ids`.
    pub fn subset(&self, ids: &ObjectIdSet) -> Self {
        let entries = self
            .entries
            .iter()
            .filter(|(id, _)| ids.contains(id))
            .map(|(id, invs)| (id.clone(), invs.clone()))
            .collect();
        Self { entries }
    }

    pub fn ids(&self) -> ObjectIdSet {
        self.entries.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total invalidation count across all ids.
    pub fn total(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ObjectId, &[Invalidation])> {
        self.entries.iter().map(|(id, invs)| (id, invs.as_slice()))
    }
}
