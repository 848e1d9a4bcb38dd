//! Decoded per-document representation of an LSIF dump.
//!
//! Every cross reference inside a [`DocumentBlob`] is an [`Id`] into one of the
//! blob's own maps. References that do not resolve are treated as absent.

use crate::position;
use lsif_core::{Hover, Location, MonikerKind, Position, Range};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Vertex identifier. Dumps may use numbers or strings; both normalize to a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Id(String);

impl Id {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Id {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<u64> for Id {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Number(u64),
            Text(String),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Number(n) => Id(n.to_string()),
            RawId::Text(s) => Id(s),
        })
    }
}

/// A node in a result chain. Ranges carry the same fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSetData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition_result: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_result: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hover_result: Option<Id>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub monikers: Vec<Id>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeData {
    pub start: Position,
    pub end: Position,
    #[serde(flatten)]
    pub chain: ResultSetData,
}

impl RangeData {
    pub fn range(&self) -> Range {
        Range {
            start: self.start,
            end: self.end,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonikerData {
    pub scheme: String,
    pub identifier: String,
    #[serde(default)]
    pub kind: MonikerKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_information: Option<Id>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInformationData {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefinitionResultData {
    pub values: Vec<Id>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceResultData {
    #[serde(default)]
    pub definitions: Vec<Id>,
    #[serde(default)]
    pub references: Vec<Id>,
}

/// Everything needed to answer queries about one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentBlob {
    /// Range id to index into `ordered_ranges`.
    pub ranges: BTreeMap<Id, usize>,
    /// Non-overlapping ranges sorted by start position.
    pub ordered_ranges: Vec<RangeData>,
    #[serde(default)]
    pub result_sets: BTreeMap<Id, ResultSetData>,
    #[serde(default)]
    pub monikers: BTreeMap<Id, MonikerData>,
    #[serde(default)]
    pub package_information: BTreeMap<Id, PackageInformationData>,
    #[serde(default)]
    pub definition_results: BTreeMap<Id, DefinitionResultData>,
    #[serde(default)]
    pub reference_results: BTreeMap<Id, ReferenceResultData>,
    #[serde(default)]
    pub hovers: BTreeMap<Id, Hover>,
}

impl DocumentBlob {
    pub fn find_range(&self, position: Position) -> Option<&RangeData> {
        position::find_range(&self.ordered_ranges, position)
    }

    pub fn range_by_id(&self, id: &Id) -> Option<&RangeData> {
        self.ranges
            .get(id)
            .and_then(|&index| self.ordered_ranges.get(index))
    }

    /// Map range ids to locations in `uri`, skipping ids this blob does not hold.
    pub fn locations<'a>(&self, uri: &str, ids: impl IntoIterator<Item = &'a Id>) -> Vec<Location> {
        ids.into_iter()
            .filter_map(|id| self.range_by_id(id))
            .map(|range| Location::new(uri, range.range()))
            .collect()
    }

    pub fn package_for(&self, moniker: &MonikerData) -> Option<&PackageInformationData> {
        moniker
            .package_information
            .as_ref()
            .and_then(|id| self.package_information.get(id))
    }

    /// Approximate heap footprint, used as a cache weight.
    pub fn approximate_size(&self) -> usize {
        let ranges = self.ordered_ranges.len() * std::mem::size_of::<RangeData>();
        let sets = self.result_sets.len() * std::mem::size_of::<ResultSetData>();
        let monikers: usize = self
            .monikers
            .values()
            .map(|m| std::mem::size_of::<MonikerData>() + m.scheme.len() + m.identifier.len())
            .sum();
        let hovers: usize = self
            .hovers
            .values()
            .map(|h| h.contents.to_string().len())
            .sum();
        let results: usize = self
            .definition_results
            .values()
            .map(|d| d.values.len())
            .chain(
                self.reference_results
                    .values()
                    .map(|r| r.definitions.len() + r.references.len()),
            )
            .sum::<usize>()
            * std::mem::size_of::<Id>();
        std::mem::size_of::<Self>() + ranges + sets + monikers + hovers + results
    }
}
