//! Resources kept by the store: nodes of the coding tree, scales and metrics,
//! together with the closed [`Resource`] union the controllers speak and the
//! filters their queries accept.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::datatype::{Id, OptionalId, Relation};
use crate::error::{CodingError, Result};

/// Decoded query string: every key may repeat (`?label=a&label=b`).
pub type QueryParams = BTreeMap<String, Vec<String>>;

// ------------- Node -------------
/// An entry in the label hierarchy. `children` is derived from the parent
/// column of other nodes and ignored on writes.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "NodeDocument", from = "NodeDocument")]
pub struct Node {
    pub id: Id,
    pub label: String,
    pub parent: OptionalId,
    pub children: Vec<Id>,
    pub references: Vec<Id>,
    pub metrics: Vec<Id>,
}

impl Node {
    pub fn new(label: impl Into<String>, parent: OptionalId) -> Self {
        Self {
            label: label.into(),
            parent,
            ..Self::default()
        }
    }
}

const CHILDREN_LINK: &str = "children";
const REFERENCES_LINK: &str = "references";
const METRICS_LINK: &str = "metrics";
const SCALES_LINK: &str = "scales";

#[derive(Serialize, Deserialize)]
struct NodeDocument {
    #[serde(default)]
    id: Id,
    #[serde(default)]
    label: String,
    #[serde(default)]
    parent: OptionalId,
    #[serde(default)]
    links: BTreeMap<String, Relation>,
}

impl From<Node> for NodeDocument {
    fn from(node: Node) -> Self {
        let mut links = BTreeMap::new();
        links.insert(CHILDREN_LINK.to_string(), Relation::ToMany(node.children));
        links.insert(REFERENCES_LINK.to_string(), Relation::ToMany(node.references));
        links.insert(METRICS_LINK.to_string(), Relation::ToMany(node.metrics));
        Self {
            id: node.id,
            label: node.label,
            parent: node.parent,
            links,
        }
    }
}
impl From<NodeDocument> for Node {
    fn from(document: NodeDocument) -> Self {
        let link = |name: &str| document.links.get(name).map(Relation::ids).unwrap_or_default();
        Self {
            id: document.id,
            label: document.label.clone(),
            parent: document.parent,
            children: link(CHILDREN_LINK),
            references: link(REFERENCES_LINK),
            metrics: link(METRICS_LINK),
        }
    }
}

/// Selects nodes by parent and label. See [`crate::node::NodeStore::stream_query`]
/// for how empty criteria are interpreted.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NodeFilter {
    pub parents: Vec<Id>,
    pub labels: Vec<String>,
}

impl NodeFilter {
    pub fn from_params(params: &QueryParams) -> Result<Self> {
        let parents = params
            .get("parent")
            .map(|values| values.iter().map(|v| Id::parse(v)).collect::<Result<Vec<_>>>())
            .transpose()?
            .unwrap_or_default();
        Ok(Self {
            parents,
            labels: params.get("label").cloned().unwrap_or_default(),
        })
    }
}

/// Label-only filter used by scale and metric queries. Empty matches everything.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LabelFilter {
    pub labels: Vec<String>,
}

impl LabelFilter {
    pub fn from_params(params: &QueryParams) -> Self {
        Self {
            labels: params.get("label").cloned().unwrap_or_default(),
        }
    }
}

// ------------- Scale -------------
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleType {
    Interval,
    Ordinal,
    #[default]
    Nominal,
}

impl ScaleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScaleType::Interval => "interval",
            ScaleType::Ordinal => "ordinal",
            ScaleType::Nominal => "nominal",
        }
    }
    /// Ordinal and nominal scales enumerate values, interval scales carry a unit.
    pub fn has_values(&self) -> bool {
        !matches!(self, ScaleType::Interval)
    }
}
impl FromStr for ScaleType {
    type Err = CodingError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "interval" => Ok(ScaleType::Interval),
            "ordinal" => Ok(ScaleType::Ordinal),
            "nominal" => Ok(ScaleType::Nominal),
            other => Err(CodingError::Validation(format!("invalid scale type '{other}'"))),
        }
    }
}
impl fmt::Display for ScaleType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One value of an ordinal or nominal scale. Id 0 marks a value not yet stored.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleValue {
    #[serde(default)]
    pub id: Id,
    pub label: String,
}

impl ScaleValue {
    pub fn new(label: impl Into<String>) -> Self {
        Self { id: Id::SENTINEL, label: label.into() }
    }
}

/// Unit of an interval scale; both bounds are independently optional.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitDescriptor {
    pub unit: String,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scale {
    #[serde(default)]
    pub id: Id,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type")]
    pub scale_type: ScaleType,
    #[serde(flatten)]
    pub unit: Option<UnitDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<ScaleValue>>,
}

impl Scale {
    pub fn interval(label: impl Into<String>, unit: UnitDescriptor) -> Self {
        Self {
            label: label.into(),
            scale_type: ScaleType::Interval,
            unit: Some(unit),
            ..Self::default()
        }
    }
    pub fn with_values(label: impl Into<String>, scale_type: ScaleType, values: &[&str]) -> Self {
        Self {
            label: label.into(),
            scale_type,
            values: Some(values.iter().map(|v| ScaleValue::new(*v)).collect()),
            ..Self::default()
        }
    }
    /// Clears whichever of `values`/`unit` does not belong to the type and fills
    /// in an empty form of the one that does, so exactly one is present.
    pub fn normalize(&mut self) {
        if self.scale_type.has_values() {
            self.unit = None;
            self.values.get_or_insert_with(Vec::new);
        } else {
            self.values = None;
            self.unit.get_or_insert_with(UnitDescriptor::default);
        }
    }
}

// ------------- Metric -------------
/// A named bundle of scales measuring the same thing.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "MetricDocument", from = "MetricDocument")]
pub struct Metric {
    pub id: Id,
    pub label: String,
    pub scales: Vec<Id>,
}

impl Metric {
    pub fn new(label: impl Into<String>, scales: Vec<Id>) -> Self {
        Self { id: Id::SENTINEL, label: label.into(), scales }
    }
}

#[derive(Serialize, Deserialize)]
struct MetricDocument {
    #[serde(default)]
    id: Id,
    #[serde(default)]
    label: String,
    #[serde(default)]
    links: BTreeMap<String, Relation>,
}

impl From<Metric> for MetricDocument {
    fn from(metric: Metric) -> Self {
        let mut links = BTreeMap::new();
        links.insert(SCALES_LINK.to_string(), Relation::ToMany(metric.scales));
        Self { id: metric.id, label: metric.label, links }
    }
}
impl From<MetricDocument> for Metric {
    fn from(document: MetricDocument) -> Self {
        Self {
            id: document.id,
            label: document.label,
            scales: document.links.get(SCALES_LINK).map(Relation::ids).unwrap_or_default(),
        }
    }
}

// ------------- Resource -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Node,
    Scale,
    Metric,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [ResourceKind::Node, ResourceKind::Scale, ResourceKind::Metric];

    /// The collection name used in request paths.
    pub fn endpoint(&self) -> &'static str {
        match self {
            ResourceKind::Node => "nodes",
            ResourceKind::Scale => "scales",
            ResourceKind::Metric => "metrics",
        }
    }
}
impl FromStr for ResourceKind {
    type Err = CodingError;
    fn from_str(s: &str) -> Result<Self> {
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.endpoint() == s || kind.to_string() == s)
            .ok_or_else(|| CodingError::Validation(format!("unknown resource kind '{s}'")))
    }
}
impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            ResourceKind::Node => "node",
            ResourceKind::Scale => "scale",
            ResourceKind::Metric => "metric",
        })
    }
}

/// Any resource a controller can handle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Resource {
    Node(Node),
    Scale(Scale),
    Metric(Metric),
}

impl Resource {
    /// An unsaved resource of the given kind, ready to be decoded into.
    pub fn blank(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Node => Resource::Node(Node::default()),
            ResourceKind::Scale => Resource::Scale(Scale::default()),
            ResourceKind::Metric => Resource::Metric(Metric::default()),
        }
    }
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Node(_) => ResourceKind::Node,
            Resource::Scale(_) => ResourceKind::Scale,
            Resource::Metric(_) => ResourceKind::Metric,
        }
    }
    pub fn id(&self) -> Id {
        match self {
            Resource::Node(n) => n.id,
            Resource::Scale(s) => s.id,
            Resource::Metric(m) => m.id,
        }
    }
    pub fn set_id(&mut self, id: Id) {
        match self {
            Resource::Node(n) => n.id = id,
            Resource::Scale(s) => s.id = id,
            Resource::Metric(m) => m.id = id,
        }
    }
    /// Replaces the content with the JSON document, keeping the kind.
    pub fn decode_json(&mut self, json: &[u8]) -> Result<()> {
        match self {
            Resource::Node(n) => *n = serde_json::from_slice(json)?,
            Resource::Scale(s) => {
                let document: serde_json::Value = serde_json::from_slice(json)?;
                // an unknown type is a validation failure, not a malformed document
                if let Some(scale_type) = document.get("type").and_then(serde_json::Value::as_str) {
                    scale_type.parse::<ScaleType>()?;
                }
                *s = serde_json::from_value(document)?;
            }
            Resource::Metric(m) => *m = serde_json::from_slice(json)?,
        }
        Ok(())
    }
    fn mismatch(&self, expected: ResourceKind) -> CodingError {
        CodingError::Unsupported { expected, found: self.kind() }
    }
    pub fn as_node_mut(&mut self) -> Result<&mut Node> {
        match self {
            Resource::Node(n) => Ok(n),
            other => Err(other.mismatch(ResourceKind::Node)),
        }
    }
    pub fn as_scale_mut(&mut self) -> Result<&mut Scale> {
        match self {
            Resource::Scale(s) => Ok(s),
            other => Err(other.mismatch(ResourceKind::Scale)),
        }
    }
    pub fn as_metric_mut(&mut self) -> Result<&mut Metric> {
        match self {
            Resource::Metric(m) => Ok(m),
            other => Err(other.mismatch(ResourceKind::Metric)),
        }
    }
}

impl From<Node> for Resource {
    fn from(node: Node) -> Self {
        Resource::Node(node)
    }
}
impl From<Scale> for Resource {
    fn from(scale: Scale) -> Self {
        Resource::Scale(scale)
    }
}
impl From<Metric> for Resource {
    fn from(metric: Metric) -> Self {
        Resource::Metric(metric)
    }
}
