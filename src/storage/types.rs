use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::primitives::clock::{CausalStamp, ClockSnapshot};
use crate::types::GraphElementHandle;

/// Returns `true` when an element created at `created` and deleted at `deleted` exists in
/// `snapshot`: created at or before it and not deleted at or before it.
pub fn visible_at(
    created: CausalStamp,
    deleted: Option<CausalStamp>,
    snapshot: &ClockSnapshot,
) -> bool {
    created.within(snapshot) && !deleted.is_some_and(|stamp| stamp.within(snapshot))
}

/// Key/value pair attached to an edge.
///
/// Two properties are equal when key and value match; the stamps are ignored.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Property {
    /// Property key.
    pub key: String,
    /// Property value.
    pub value: String,
    /// Stamp of the mutation that added the property.
    pub creation_time: CausalStamp,
    /// Stamp of the mutation that removed it, if any.
    pub deletion_time: Option<CausalStamp>,
}

impl Property {
    /// New live property.
    pub fn new(key: impl Into<String>, value: impl Into<String>, creation_time: CausalStamp) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            creation_time,
            deletion_time: None,
        }
    }

    /// Whether the property exists in `snapshot`.
    pub fn visible_at(&self, snapshot: &ClockSnapshot) -> bool {
        visible_at(self.creation_time, self.deletion_time, snapshot)
    }

    /// Whether key and value both match.
    pub fn matches(&self, key: &str, value: &str) -> bool {
        self.key == key && self.value == value
    }
}

impl PartialEq for Property {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.value == other.value
    }
}

impl Eq for Property {}

impl Hash for Property {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
        self.value.hash(state);
    }
}

/// Set of key/value pairs every traversed edge must carry.
///
/// Stored sorted and deduplicated so equal predicates compare and hash equal regardless of
/// the order the pairs were supplied in.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyPredicate {
    required: Vec<(String, String)>,
}

impl PropertyPredicate {
    /// Predicate accepting every edge.
    pub fn any() -> Self {
        Self::default()
    }

    /// Predicate requiring every given pair.
    pub fn new<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut required: Vec<(String, String)> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        required.sort();
        required.dedup();
        Self { required }
    }

    /// Returns `true` when no pair is required.
    pub fn is_empty(&self) -> bool {
        self.required.is_empty()
    }

    /// Required pairs in canonical order.
    pub fn pairs(&self) -> &[(String, String)] {
        &self.required
    }

    /// Whether `properties` carries every required pair visibly in `snapshot`.
    pub fn accepts(&self, properties: &[Property], snapshot: &ClockSnapshot) -> bool {
        self.witnesses(properties, snapshot).is_some()
    }

    /// Creation stamps of the properties that satisfy each required pair in `snapshot`,
    /// or `None` when some pair has no visible match.
    pub fn witnesses(
        &self,
        properties: &[Property],
        snapshot: &ClockSnapshot,
    ) -> Option<Vec<CausalStamp>> {
        self.required
            .iter()
            .map(|(key, value)| {
                properties
                    .iter()
                    .find(|p| p.matches(key, value) && p.visible_at(snapshot))
                    .map(|p| p.creation_time)
            })
            .collect()
    }
}

/// One step of a discovered path: a node and the edge leaving it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathHop {
    /// Node the step starts from.
    pub node: GraphElementHandle,
    /// Creation stamp of `node`.
    pub node_created: CausalStamp,
    /// Edge followed out of `node`.
    pub edge: GraphElementHandle,
    /// Creation stamp of `edge`.
    pub edge_created: CausalStamp,
    /// Creation stamps of the edge properties the query predicate matched.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub predicate_created: Vec<CausalStamp>,
}

impl PathHop {
    /// Every creation stamp the step depends on: node, edge and matched properties.
    pub fn stamps(&self) -> impl Iterator<Item = CausalStamp> + '_ {
        [self.node_created, self.edge_created]
            .into_iter()
            .chain(self.predicate_created.iter().copied())
    }
}
