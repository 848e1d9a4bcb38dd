//! Walking `next` links from a range through shared result sets.

use crate::model::{DocumentBlob, Id, MonikerData, ResultSetData};
use std::collections::BTreeMap;

const SCHEME_PREFERENCES: [&str; 2] = ["npm", "tsc"];

/// Which result a chain node may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultProperty {
    Definition,
    Reference,
    Hover,
}

impl ResultProperty {
    fn of(self, node: &ResultSetData) -> Option<&Id> {
        match self {
            ResultProperty::Definition => node.definition_result.as_ref(),
            ResultProperty::Reference => node.reference_result.as_ref(),
            ResultProperty::Hover => node.hover_result.as_ref(),
        }
    }
}

/// Visit `start` and each node reachable through `next` until `visit` yields a value.
///
/// Dangling links end the walk. The walk is capped at one hop per result set
/// so that a malformed cycle still terminates.
pub fn walk_chain<'a, T>(
    result_sets: &'a BTreeMap<Id, ResultSetData>,
    start: &'a ResultSetData,
    mut visit: impl FnMut(&'a ResultSetData) -> Option<T>,
) -> Option<T> {
    let mut current = Some(start);
    let mut hops = 0usize;
    while let Some(node) = current {
        if let Some(value) = visit(node) {
            return Some(value);
        }
        if hops >= result_sets.len() {
            break;
        }
        hops += 1;
        current = node.next.as_ref().and_then(|next| result_sets.get(next));
    }
    None
}

/// First `property` along the chain that resolves in `table`.
pub fn find_result<'a, T>(
    result_sets: &'a BTreeMap<Id, ResultSetData>,
    table: &'a BTreeMap<Id, T>,
    start: &'a ResultSetData,
    property: ResultProperty,
) -> Option<&'a T> {
    walk_chain(result_sets, start, |node| {
        property.of(node).and_then(|id| table.get(id))
    })
}

/// Every moniker attached anywhere along the chain, most actionable first.
pub fn find_monikers<'a>(
    result_sets: &'a BTreeMap<Id, ResultSetData>,
    monikers: &'a BTreeMap<Id, MonikerData>,
    start: &'a ResultSetData,
) -> Vec<&'a MonikerData> {
    let mut found = Vec::new();
    walk_chain(result_sets, start, |node| {
        found.extend(node.monikers.iter().filter_map(|id| monikers.get(id)));
        None::<()>
    });
    sort_monikers(&mut found);
    found
}

/// Stable sort by kind (import, local, export), then scheme (anything unlisted, npm, tsc).
pub fn sort_monikers(monikers: &mut [&MonikerData]) {
    monikers.sort_by_key(|m| (m.kind.preference(), scheme_preference(&m.scheme)));
}

fn scheme_preference(scheme: &str) -> usize {
    SCHEME_PREFERENCES
        .iter()
        .position(|s| *s == scheme)
        .map_or(0, |i| i + 1)
}

impl DocumentBlob {
    pub fn find_result<'a, T>(
        &'a self,
        table: &'a BTreeMap<Id, T>,
        start: &'a ResultSetData,
        property: ResultProperty,
    ) -> Option<&'a T> {
        find_result(&self.result_sets, table, start, property)
    }

    pub fn find_monikers<'a>(&'a self, start: &'a ResultSetData) -> Vec<&'a MonikerData> {
        find_monikers(&self.result_sets, &self.monikers, start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsif_core::MonikerKind;

    fn moniker(kind: MonikerKind, scheme: &str, identifier: &str) -> MonikerData {
        MonikerData {
            scheme: scheme.into(),
            identifier: identifier.into(),
            kind,
            package_information: None,
        }
    }

    fn node(next: Option<u64>, hover: Option<u64>, monikers: &[u64]) -> ResultSetData {
        ResultSetData {
            next: next.map(Id::from),
            hover_result: hover.map(Id::from),
            monikers: monikers.iter().copied().map(Id::from).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn result_is_inherited_through_next_links() {
        let mut sets = BTreeMap::new();
        sets.insert(Id::from(2), node(Some(3), None, &[]));
        sets.insert(Id::from(3), node(None, Some(10), &[]));
        let mut hovers = BTreeMap::new();
        hovers.insert(Id::from(10), "hello");

        let start = node(Some(2), None, &[]);
        assert_eq!(
            find_result(&sets, &hovers, &start, ResultProperty::Hover),
            Some(&"hello")
        );
        assert_eq!(
            find_result(&sets, &hovers, &start, ResultProperty::Definition),
            None
        );
    }

    #[test]
    fn unresolved_ids_are_treated_as_absent() {
        let sets = BTreeMap::new();
        let hovers: BTreeMap<Id, &str> = BTreeMap::new();
        let start = node(Some(404), Some(405), &[406]);
        assert_eq!(find_result(&sets, &hovers, &start, ResultProperty::Hover), None);
        assert!(find_monikers(&sets, &BTreeMap::new(), &start).is_empty());
    }

    #[test]
    fn cycles_terminate() {
        let mut sets = BTreeMap::new();
        sets.insert(Id::from(1), node(Some(2), None, &[]));
        sets.insert(Id::from(2), node(Some(1), None, &[]));
        let hovers: BTreeMap<Id, &str> = BTreeMap::new();
        let start = node(Some(1), None, &[]);
        assert_eq!(find_result(&sets, &hovers, &start, ResultProperty::Hover), None);
    }

    #[test]
    fn monikers_accumulate_along_the_whole_chain() {
        let mut sets = BTreeMap::new();
        sets.insert(Id::from(2), node(Some(3), None, &[21]));
        sets.insert(Id::from(3), node(None, None, &[31]));
        let mut monikers = BTreeMap::new();
        monikers.insert(Id::from(11), moniker(MonikerKind::Export, "tsc", "a"));
        monikers.insert(Id::from(21), moniker(MonikerKind::Local, "tsc", "b"));
        monikers.insert(Id::from(31), moniker(MonikerKind::Import, "npm", "c"));

        let start = node(Some(2), None, &[11]);
        let found: Vec<&str> = find_monikers(&sets, &monikers, &start)
            .iter()
            .map(|m| m.identifier.as_str())
            .collect();
        assert_eq!(found, vec!["c", "b", "a"]);
    }

    #[test]
    fn sort_prefers_kind_then_scheme() {
        let export_tsc = moniker(MonikerKind::Export, "tsc", "1");
        let import_tsc = moniker(MonikerKind::Import, "tsc", "2");
        let local_npm = moniker(MonikerKind::Local, "npm", "3");
        let import_npm = moniker(MonikerKind::Import, "npm", "4");
        let export_npm = moniker(MonikerKind::Export, "npm", "5");
        let export_other = moniker(MonikerKind::Export, "maven", "6");

        let mut monikers = vec![
            &export_tsc,
            &export_other,
            &import_tsc,
            &local_npm,
            &import_npm,
            &export_npm,
        ];
        sort_monikers(&mut monikers);
        let order: Vec<&str> = monikers.iter().map(|m| m.identifier.as_str()).collect();
        assert_eq!(order, vec!["4", "2", "3", "6", "5", "1"]);
    }

    #[test]
    fn unlisted_schemes_sort_ahead_of_npm_and_tsc() {
        let tsc = moniker(MonikerKind::Import, "tsc", "tsc");
        let npm = moniker(MonikerKind::Import, "npm", "npm");
        let gomod = moniker(MonikerKind::Import, "gomod", "gomod");
        let local_gomod = moniker(MonikerKind::Local, "gomod", "local");

        let mut monikers = vec![&local_gomod, &tsc, &npm, &gomod];
        sort_monikers(&mut monikers);
        let order: Vec<&str> = monikers.iter().map(|m| m.identifier.as_str()).collect();
        assert_eq!(order, vec!["gomod", "npm", "tsc", "local"]);
    }
}
