//! Diagnostics aggregator — merges per-source diagnostics and computes what
//! to publish.
//!
//! Each [`DiagnosticSource`] owns an independent `uri -> diagnostics` table
//! that is replaced wholesale on every new result from that source. At
//! publish time the tables are merged and every URI that had diagnostics
//! before, has diagnostics now, or is open in the editor gets an explicit
//! publish, so stale markers are always cleared with an empty list.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use url::Url;

use ember_types::{Diagnostic, DiagnosticSource};

use crate::documents::DocumentStore;
use crate::protocol::{self, LspDiagnostic, PublishDiagnosticsParams};

/// Merged diagnostics for every affected URI, sorted for publishing.
pub(crate) type DiagnosticSet = BTreeMap<Url, Vec<Diagnostic>>;

#[derive(Debug, Default)]
pub(crate) struct DiagnosticsAggregator {
    sources: HashMap<DiagnosticSource, HashMap<Url, Vec<Diagnostic>>>,
    /// What the client was last told.
    published: DiagnosticSet,
}

impl DiagnosticsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace one document's diagnostics from `source`. An empty list removes
    /// the entry.
    pub fn replace_document(&mut self, source: DiagnosticSource, uri: &Url, items: Vec<Diagnostic>) {
        let table = self.sources.entry(source).or_default();
        if items.is_empty() {
            table.remove(uri);
        } else {
            table.insert(uri.clone(), items);
        }
    }

    /// Replace everything `source` reported, grouping `items` by file.
    ///
    /// Diagnostics whose path cannot become a file URI are logged and dropped.
    pub fn replace_source(&mut self, source: DiagnosticSource, items: Vec<Diagnostic>) {
        let mut table: HashMap<Url, Vec<Diagnostic>> = HashMap::new();
        for diag in items {
            match protocol::path_to_file_uri(diag.file()) {
                Ok(uri) => table.entry(uri).or_default().push(diag),
                Err(e) => {
                    tracing::warn!(source = source.label(), "dropping diagnostic: {e}");
                }
            }
        }
        self.sources.insert(source, table);
    }

    /// Diagnostics currently attributed to `uri` by `source`.
    pub fn get(&self, source: DiagnosticSource, uri: &Url) -> &[Diagnostic] {
        self.sources
            .get(&source)
            .and_then(|table| table.get(uri))
            .map_or(&[], Vec::as_slice)
    }

    /// Union of all sources, each URI's list sorted by start position.
    pub fn merged(&self) -> DiagnosticSet {
        let mut all = DiagnosticSet::new();
        for source in DiagnosticSource::ALL {
            let Some(table) = self.sources.get(&source) else {
                continue;
            };
            for (uri, items) in table {
                all.entry(uri.clone())
                    .or_default()
                    .extend(items.iter().cloned());
            }
        }
        for items in all.values_mut() {
            items.sort_by(Diagnostic::publish_order);
        }
        all
    }

    /// Compute the publish events for the current state and remember it as
    /// the last published state.
    pub fn republish(&mut self, documents: &DocumentStore) -> Vec<PublishDiagnosticsParams> {
        let new_all = self.merged();
        let events = publish_set(&new_all, &self.published, documents);
        self.published = new_all;
        events
    }
}

/// One publish per URI in `old_all ∪ new_all ∪ open documents`, carrying
/// exactly the diagnostics `new_all` attributes to it.
pub(crate) fn publish_set(
    new_all: &DiagnosticSet,
    old_all: &DiagnosticSet,
    documents: &DocumentStore,
) -> Vec<PublishDiagnosticsParams> {
    let uris: BTreeSet<&Url> = old_all
        .keys()
        .chain(new_all.keys())
        .chain(documents.uris())
        .collect();

    uris.into_iter()
        .map(|uri| {
            let mut items: Vec<&Diagnostic> =
                new_all.get(uri).map(|v| v.iter().collect()).unwrap_or_default();
            items.sort_by(|a, b| a.publish_order(b));
            PublishDiagnosticsParams {
                uri: uri.clone(),
                version: documents.version(uri),
                diagnostics: items.into_iter().map(LspDiagnostic::from).collect(),
            }
        })
        .collect()
}
