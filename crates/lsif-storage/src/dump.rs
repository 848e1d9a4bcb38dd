//! Correlation of a raw LSIF dump (newline-delimited vertices and edges) into
//! per-document blobs and moniker lookup rows.

use crate::chain::ResultProperty;
use crate::codec::maybe_gunzip_limited;
use crate::model::{
    DefinitionResultData, DocumentBlob, Id, MonikerData, PackageInformationData, RangeData,
    ReferenceResultData, ResultSetData,
};
use lsif_core::{Hover, LsifError, MonikerKind, Position, Range, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::debug;

/// One line of a dump. Vertices keep their raw JSON so they can be re-stored verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Vertex { id: Id, label: String, value: Value },
    Edge(Edge),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub label: String,
    pub out_v: Id,
    #[serde(default)]
    pub in_v: Option<Id>,
    #[serde(default)]
    pub in_vs: Vec<Id>,
    #[serde(default)]
    pub document: Option<Id>,
    #[serde(default)]
    pub property: Option<String>,
}

impl Edge {
    pub fn targets(&self) -> impl Iterator<Item = &Id> {
        self.in_v.iter().chain(self.in_vs.iter())
    }
}

impl Element {
    /// `Ok(None)` for JSON objects that are neither vertex nor edge.
    pub fn from_value(value: Value) -> Result<Option<Self>> {
        let kind = value.get("type").and_then(Value::as_str).map(str::to_string);
        match kind.as_deref() {
            Some("vertex") => {
                let id = value
                    .get("id")
                    .ok_or_else(|| LsifError::Decode("vertex without an id".into()))
                    .and_then(|raw| Id::deserialize(raw).map_err(decode_error))?;
                let label = value
                    .get("label")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Ok(Some(Element::Vertex { id, label, value }))
            }
            Some("edge") => Ok(Some(Element::Edge(
                Edge::deserialize(&value).map_err(decode_error)?,
            ))),
            _ => Ok(None),
        }
    }
}

fn decode_error(e: serde_json::Error) -> LsifError {
    LsifError::Decode(e.to_string())
}

/// Parse a dump, gzip-compressed or not. A JSON array of elements is accepted
/// alongside the usual one-element-per-line layout.
pub fn parse_elements(bytes: &[u8]) -> Result<Vec<Element>> {
    parse_elements_limited(bytes, u64::MAX)
}

/// [`parse_elements`] for untrusted input: a gzip stream may inflate to at most `limit` bytes.
pub fn parse_elements_limited(bytes: &[u8], limit: u64) -> Result<Vec<Element>> {
    let raw = maybe_gunzip_limited(bytes, limit)?;
    let text = std::str::from_utf8(&raw)
        .map_err(|e| LsifError::Decode(format!("dump is not valid UTF-8: {}", e)))?;

    let mut elements = Vec::new();
    if text.trim_start().starts_with('[') {
        let values: Vec<Value> = serde_json::from_str(text).map_err(decode_error)?;
        for value in values {
            elements.extend(Element::from_value(value)?);
        }
    } else {
        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(line)
                .map_err(|e| LsifError::Decode(format!("line {}: {}", number + 1, e)))?;
            elements.extend(Element::from_value(value)?);
        }
    }

    if elements.is_empty() {
        return Err(LsifError::Decode("dump contains no LSIF elements".into()));
    }
    Ok(elements)
}

/// A definition or reference keyed by moniker, ready for a `defs`/`refs` table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MonikerRow {
    pub scheme: String,
    pub identifier: String,
    pub document_uri: String,
    pub range: Range,
}

#[derive(Debug, Default)]
struct Items {
    values: Vec<Id>,
    definitions: Vec<Id>,
    references: Vec<Id>,
}

#[derive(Deserialize)]
struct RangeVertex {
    start: Position,
    end: Position,
}

#[derive(Deserialize)]
struct MonikerVertex {
    scheme: String,
    identifier: String,
    #[serde(default)]
    kind: Option<String>,
}

#[derive(Deserialize)]
struct HoverVertex {
    result: Hover,
}

/// The correlated graph of one dump.
#[derive(Debug, Default)]
pub struct LsifDump {
    project_root: Option<String>,
    documents: BTreeMap<Id, String>,
    ranges: HashMap<Id, Range>,
    result_sets: HashSet<Id>,
    definition_results: HashSet<Id>,
    reference_results: HashSet<Id>,
    hovers: HashMap<Id, Hover>,
    monikers: HashMap<Id, (String, String, MonikerKind)>,
    packages: HashMap<Id, PackageInformationData>,
    contains: HashMap<Id, Vec<Id>>,
    range_documents: HashMap<Id, Id>,
    /// Chain fields of ranges and result sets, filled from edges.
    links: HashMap<Id, ResultSetData>,
    moniker_packages: HashMap<Id, Id>,
    items: HashMap<Id, Items>,
}

impl LsifDump {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let elements = parse_elements(bytes)?;
        Self::from_elements(&elements)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// Load an uploaded dump whose decompressed form must stay within `limit` bytes.
    pub fn from_path_limited(path: &Path, limit: u64) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let elements = parse_elements_limited(&bytes, limit)?;
        Self::from_elements(&elements)
    }

    pub fn from_elements<'a>(elements: impl IntoIterator<Item = &'a Element>) -> Result<Self> {
        let mut dump = Self::default();
        for element in elements {
            match element {
                Element::Vertex { id, label, value } => dump.add_vertex(id, label, value)?,
                Element::Edge(edge) => dump.add_edge(edge),
            }
        }
        debug!(
            documents = dump.documents.len(),
            ranges = dump.ranges.len(),
            monikers = dump.monikers.len(),
            "Correlated LSIF dump"
        );
        Ok(dump)
    }

    fn add_vertex(&mut self, id: &Id, label: &str, value: &Value) -> Result<()> {
        match label {
            "metaData" => {
                self.project_root = value
                    .get("projectRoot")
                    .and_then(Value::as_str)
                    .map(str::to_string);
            }
            "document" => {
                let uri = value
                    .get("uri")
                    .and_then(Value::as_str)
                    .ok_or_else(|| LsifError::Decode(format!("document {} has no uri", id)))?;
                self.documents.insert(id.clone(), uri.to_string());
            }
            "range" => {
                let range = RangeVertex::deserialize(value).map_err(decode_error)?;
                self.ranges.insert(
                    id.clone(),
                    Range {
                        start: range.start,
                        end: range.end,
                    },
                );
            }
            "resultSet" => {
                self.result_sets.insert(id.clone());
            }
            "definitionResult" => {
                self.definition_results.insert(id.clone());
            }
            "referenceResult" => {
                self.reference_results.insert(id.clone());
            }
            "hoverResult" => {
                let hover = HoverVertex::deserialize(value).map_err(decode_error)?;
                self.hovers.insert(id.clone(), hover.result);
            }
            "moniker" => {
                let moniker = MonikerVertex::deserialize(value).map_err(decode_error)?;
                // kindless monikers are neither imported nor exported
                let kind = match moniker.kind.as_deref() {
                    Some("import") => MonikerKind::Import,
                    Some("export") => MonikerKind::Export,
                    _ => MonikerKind::Local,
                };
                self.monikers
                    .insert(id.clone(), (moniker.scheme, moniker.identifier, kind));
            }
            "packageInformation" => {
                let package = PackageInformationData::deserialize(value).map_err(decode_error)?;
                self.packages.insert(id.clone(), package);
            }
            _ => {}
        }
        Ok(())
    }

    fn add_edge(&mut self, edge: &Edge) {
        let first = edge.targets().next().cloned();
        match edge.label.as_str() {
            "contains" => {
                for target in edge.targets() {
                    self.contains
                        .entry(edge.out_v.clone())
                        .or_default()
                        .push(target.clone());
                    self.range_documents
                        .insert(target.clone(), edge.out_v.clone());
                }
            }
            "next" => self.links.entry(edge.out_v.clone()).or_default().next = first,
            "textDocument/definition" => {
                self.links
                    .entry(edge.out_v.clone())
                    .or_default()
                    .definition_result = first
            }
            "textDocument/references" => {
                self.links
                    .entry(edge.out_v.clone())
                    .or_default()
                    .reference_result = first
            }
            "textDocument/hover" => {
                self.links.entry(edge.out_v.clone()).or_default().hover_result = first
            }
            "moniker" => self
                .links
                .entry(edge.out_v.clone())
                .or_default()
                .monikers
                .extend(edge.targets().cloned()),
            "packageInformation" => {
                if let Some(target) = first {
                    self.moniker_packages.insert(edge.out_v.clone(), target);
                }
            }
            "item" => {
                let items = self.items.entry(edge.out_v.clone()).or_default();
                let bucket = match edge.property.as_deref() {
                    Some("definitions") => &mut items.definitions,
                    Some("references") => &mut items.references,
                    // nested reference results are not followed
                    Some("referenceResults") => return,
                    _ => &mut items.values,
                };
                bucket.extend(edge.targets().cloned());
                if let Some(document) = &edge.document {
                    for target in edge.targets() {
                        self.range_documents
                            .entry(target.clone())
                            .or_insert_with(|| document.clone());
                    }
                }
            }
            _ => {}
        }
    }

    pub fn project_root(&self) -> Option<&str> {
        self.project_root.as_deref()
    }

    pub fn documents(&self) -> impl Iterator<Item = (&Id, &str)> {
        self.documents.iter().map(|(id, uri)| (id, uri.as_str()))
    }

    pub fn document_id(&self, uri: &str) -> Option<&Id> {
        self.documents
            .iter()
            .find(|(_, candidate)| candidate.as_str() == uri)
            .map(|(id, _)| id)
    }

    fn moniker(&self, id: &Id) -> Option<MonikerData> {
        self.monikers
            .get(id)
            .map(|(scheme, identifier, kind)| MonikerData {
                scheme: scheme.clone(),
                identifier: identifier.clone(),
                kind: *kind,
                package_information: self.moniker_packages.get(id).cloned(),
            })
    }

    /// Every moniker in the dump together with its resolved package, if any.
    pub fn monikers_with_packages(&self) -> Vec<(MonikerData, Option<&PackageInformationData>)> {
        let mut ids: Vec<&Id> = self.monikers.keys().collect();
        ids.sort();
        ids.into_iter()
            .filter_map(|id| self.moniker(id))
            .map(|moniker| {
                let package = moniker
                    .package_information
                    .as_ref()
                    .and_then(|p| self.packages.get(p));
                (moniker, package)
            })
            .collect()
    }

    /// Build the blob for one document: its ranges sorted by start, plus every
    /// chain node, result, moniker and package reachable from them.
    ///
    /// Result sets are restricted to ranges of this document; a definition or
    /// reference result with nothing left is dropped so lookups fall back to
    /// monikers.
    pub fn document_blob(&self, document: &Id) -> Option<DocumentBlob> {
        if !self.documents.contains_key(document) {
            return None;
        }
        let contained = self.contains.get(document).map(Vec::as_slice).unwrap_or(&[]);
        let mut ranges: Vec<(&Id, &Range)> = contained
            .iter()
            .filter_map(|id| self.ranges.get(id).map(|range| (id, range)))
            .collect();
        ranges.sort_by_key(|(_, range)| (range.start, range.end));
        let local: HashSet<&Id> = ranges.iter().map(|(id, _)| *id).collect();

        let mut blob = DocumentBlob::default();
        let mut pending = Vec::new();
        for (index, (id, range)) in ranges.iter().enumerate() {
            let chain = self.links.get(*id).cloned().unwrap_or_default();
            self.collect(&chain, &local, &mut blob, &mut pending);
            blob.ranges.insert((*id).clone(), index);
            blob.ordered_ranges.push(RangeData {
                start: range.start,
                end: range.end,
                chain,
            });
        }

        while let Some(id) = pending.pop() {
            if blob.result_sets.contains_key(&id) || !self.result_sets.contains(&id) {
                continue;
            }
            let chain = self.links.get(&id).cloned().unwrap_or_default();
            self.collect(&chain, &local, &mut blob, &mut pending);
            blob.result_sets.insert(id, chain);
        }

        Some(blob)
    }

    fn collect(
        &self,
        node: &ResultSetData,
        local: &HashSet<&Id>,
        blob: &mut DocumentBlob,
        pending: &mut Vec<Id>,
    ) {
        let in_document = |ids: &[Id]| -> Vec<Id> {
            ids.iter().filter(|id| local.contains(id)).cloned().collect()
        };

        if let Some(next) = &node.next {
            pending.push(next.clone());
        }

        if let Some(id) = &node.definition_result {
            if self.definition_results.contains(id) && !blob.definition_results.contains_key(id) {
                let values = self
                    .items
                    .get(id)
                    .map(|items| in_document(&items.values))
                    .unwrap_or_default();
                if !values.is_empty() {
                    blob.definition_results
                        .insert(id.clone(), DefinitionResultData { values });
                }
            }
        }

        if let Some(id) = &node.reference_result {
            if self.reference_results.contains(id) && !blob.reference_results.contains_key(id) {
                let result = self
                    .items
                    .get(id)
                    .map(|items| {
                        let mut references = in_document(&items.references);
                        references.extend(in_document(&items.values));
                        ReferenceResultData {
                            definitions: in_document(&items.definitions),
                            references,
                        }
                    })
                    .unwrap_or_default();
                if !result.definitions.is_empty() || !result.references.is_empty() {
                    blob.reference_results.insert(id.clone(), result);
                }
            }
        }

        if let Some(id) = &node.hover_result {
            if let Some(hover) = self.hovers.get(id) {
                blob.hovers.insert(id.clone(), hover.clone());
            }
        }

        for id in &node.monikers {
            if let Some(moniker) = self.moniker(id) {
                if let Some(package_id) = &moniker.package_information {
                    if let Some(package) = self.packages.get(package_id) {
                        blob.package_information
                            .insert(package_id.clone(), package.clone());
                    }
                }
                blob.monikers.insert(id.clone(), moniker);
            }
        }
    }

    /// Follow `next` links from `node` to the first result of the given kind.
    fn chain_result(&self, node: &Id, property: ResultProperty) -> Option<&Items> {
        let mut current = Some(node);
        for _ in 0..=self.links.len() {
            let links = self.links.get(current?)?;
            let result = match property {
                ResultProperty::Definition => links.definition_result.as_ref(),
                ResultProperty::Reference => links.reference_result.as_ref(),
                ResultProperty::Hover => None,
            };
            if let Some(items) = result.and_then(|id| self.items.get(id)) {
                return Some(items);
            }
            current = links.next.as_ref();
        }
        None
    }

    /// Rows for the `defs` table: each moniker-bearing node paired with the
    /// ranges of the definition result its chain reaches.
    pub fn definition_rows(&self) -> Vec<MonikerRow> {
        self.moniker_rows(ResultProperty::Definition)
    }

    /// Rows for the `refs` table, covering both definitions and references.
    pub fn reference_rows(&self) -> Vec<MonikerRow> {
        self.moniker_rows(ResultProperty::Reference)
    }

    fn moniker_rows(&self, property: ResultProperty) -> Vec<MonikerRow> {
        let mut nodes: Vec<(&Id, &ResultSetData)> = self
            .links
            .iter()
            .filter(|(_, links)| !links.monikers.is_empty())
            .collect();
        nodes.sort_by(|a, b| a.0.cmp(b.0));

        let mut seen = HashSet::new();
        let mut rows = Vec::new();
        for (node, links) in nodes {
            let Some(items) = self.chain_result(node, property) else {
                continue;
            };
            let range_ids: Vec<&Id> = match property {
                ResultProperty::Definition => items.values.iter().collect(),
                _ => items
                    .definitions
                    .iter()
                    .chain(&items.references)
                    .chain(&items.values)
                    .collect(),
            };

            for moniker_id in &links.monikers {
                let Some((scheme, identifier, _)) = self.monikers.get(moniker_id) else {
                    continue;
                };
                for range_id in &range_ids {
                    let Some(range) = self.ranges.get(*range_id) else {
                        continue;
                    };
                    let Some(uri) = self
                        .range_documents
                        .get(*range_id)
                        .and_then(|doc| self.documents.get(doc))
                    else {
                        continue;
                    };
                    let row = MonikerRow {
                        scheme: scheme.clone(),
                        identifier: identifier.clone(),
                        document_uri: uri.clone(),
                        range: *range,
                    };
                    if seen.insert(row.clone()) {
                        rows.push(row);
                    }
                }
            }
        }
        rows
    }
}
