//! Per-record fetch results keyed by catalog coordinates

use crate::catalog::Target;
use crate::models::Series;
use std::collections::BTreeMap;
use tracing::warn;

type QueryMap = BTreeMap<String, Vec<Series>>;

/// target -> data source -> query name -> series
///
/// Owned by a single fetch batch and discarded once written out.
#[derive(Debug, Default, Clone)]
pub struct FetchResult {
    targets: BTreeMap<Target, BTreeMap<String, QueryMap>>,
}

impl FetchResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the series of one triple; the first insertion wins
    pub fn insert(
        &mut self,
        target: Target,
        data_source: &str,
        query_name: &str,
        series: Vec<Series>,
    ) -> bool {
        let queries = self
            .targets
            .entry(target)
            .or_default()
            .entry(data_source.to_string())
            .or_default();

        if queries.contains_key(query_name) {
            warn!(
                monitoring_target = %target,
                source = %data_source,
                query = %query_name,
                "Query result already present, keeping the first"
            );
            return false;
        }

        queries.insert(query_name.to_string(), series);
        true
    }

    pub fn get(&self, target: Target, data_source: &str, query_name: &str) -> Option<&[Series]> {
        self.targets
            .get(&target)?
            .get(data_source)?
            .get(query_name)
            .map(Vec::as_slice)
    }

    pub fn contains_target(&self, target: Target) -> bool {
        self.targets.contains_key(&target)
    }

    /// Iterate over every (target, data source, query name, series) triple
    pub fn iter(&self) -> impl Iterator<Item = (Target, &str, &str, &[Series])> {
        self.targets.iter().flat_map(|(target, sources)| {
            sources.iter().flat_map(move |(source, queries)| {
                queries
                    .iter()
                    .map(move |(name, series)| (*target, source.as_str(), name.as_str(), series.as_slice()))
            })
        })
    }

    /// Number of triples present
    pub fn len(&self) -> usize {
        self.targets
            .values()
            .flat_map(|sources| sources.values())
            .map(|queries| queries.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
