//! Prefixed, time-ordered identifiers, typed by family.
//!
//! All three id families share one representation (`<prefix>_<uuidv7>`)
//! but are distinct types, so a task id can never stand in for a
//! correlation id. The uuid-v7 payload keeps ids sortable by creation
//! time, which the task queue and correlation logs rely on.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Marker giving an id family its wire prefix.
pub trait IdKind {
    const PREFIX: &'static str;
}

/// Uninhabited markers for the id families.
pub mod kind {
    pub enum Task {}
    pub enum Message {}
    pub enum Request {}

    impl super::IdKind for Task {
        const PREFIX: &'static str = "task";
    }
    impl super::IdKind for Message {
        const PREFIX: &'static str = "msg";
    }
    impl super::IdKind for Request {
        const PREFIX: &'static str = "req";
    }
}

/// Queue task ids (`task_…`).
pub type TaskId = Id<kind::Task>;
/// Direct message ids (`msg_…`).
pub type MessageId = Id<kind::Message>;
/// Correlation ids for forwarded requests (`req_…`).
pub type RequestId = Id<kind::Request>;

/// A family-typed identifier. On the wire it is a bare string.
#[derive(Serialize, Deserialize)]
#[serde(transparent, bound = "")]
pub struct Id<K: IdKind> {
    value: String,
    #[serde(skip)]
    _kind: PhantomData<K>,
}

impl<K: IdKind> Id<K> {
    /// Mint a fresh id: the family prefix plus a uuid-v7.
    pub fn new() -> Self {
        Self::from(format!("{}_{}", K::PREFIX, Uuid::now_v7()))
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

// The marker parameter would poison derived impls with `K: Trait` bounds
// no uninhabited enum can meet, so these are written out.

impl<K: IdKind> Clone for Id<K> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K: IdKind> PartialEq for Id<K> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<K: IdKind> Eq for Id<K> {}

impl<K: IdKind> Hash for Id<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl<K: IdKind> fmt::Debug for Id<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl<K: IdKind> fmt::Display for Id<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// Peers echo ids back as plain strings; adopt them without reformatting.
impl<K: IdKind> From<String> for Id<K> {
    fn from(value: String) -> Self {
        Self {
            value,
            _kind: PhantomData,
        }
    }
}

impl<K: IdKind> From<&str> for Id<K> {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}
