use camino::Utf8Path;
use chrono::Datelike;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogClient, RemoteDatasetHandle};
use crate::dataset::Dataset;
use crate::error::EsgfError;
use crate::query::Query;

/// Scenarios whose runs may be extended to 2300.
pub const EXTENSION_SCENARIOS: &[&str] = &["ssp126", "ssp585", "ssp534-over"];
pub const EXTENSION_END_YEAR: i32 = 2299;

/// The preferred hosting node is dropped at most once per query.
const MAX_NODE_FALLBACKS: usize = 1;

#[derive(Debug)]
pub enum Resolution {
    Found(Dataset),
    NotFound,
    /// Matches existed but none runs to the end of the extension window.
    NoExtension,
}

pub struct Resolver<'a, C: CatalogClient> {
    catalog: &'a C,
    data_home: &'a Utf8Path,
    extensions_2300: bool,
}

impl<'a, C: CatalogClient> Resolver<'a, C> {
    pub fn new(catalog: &'a C, data_home: &'a Utf8Path, extensions_2300: bool) -> Self {
        Self {
            catalog,
            data_home,
            extensions_2300,
        }
    }

    pub fn resolve(&self, query: &Query) -> Result<Resolution, EsgfError> {
        let hits = self.search_with_fallback(query)?;
        if hits.is_empty() {
            return Ok(Resolution::NotFound);
        }

        let mut candidates = Vec::with_capacity(hits.len());
        for handle in hits {
            match Dataset::new(handle, self.data_home) {
                Ok(dataset) => candidates.push(dataset),
                Err(err) => warn!(%err, "skipping unusable search result"),
            }
        }
        if candidates.is_empty() {
            return Ok(Resolution::NotFound);
        }

        if self.should_filter_extensions(query.scenario()) {
            candidates = filter_extensions(candidates)?;
            if candidates.is_empty() {
                return Ok(Resolution::NoExtension);
            }
        }

        Ok(select_latest(candidates)
            .map(Resolution::Found)
            .unwrap_or(Resolution::NotFound))
    }

    pub fn should_filter_extensions(&self, scenario: &str) -> bool {
        self.extensions_2300 && EXTENSION_SCENARIOS.contains(&scenario)
    }

    fn search_with_fallback(
        &self,
        query: &Query,
    ) -> Result<Vec<Box<dyn RemoteDatasetHandle>>, EsgfError> {
        let mut query = query.clone();
        let mut fallbacks = 0usize;
        loop {
            let hits = self.catalog.search(&query)?;
            debug!(query = %query.label(), node = ?query.data_node, hits = hits.len(), "search");
            if !hits.is_empty() {
                return Ok(hits);
            }
            if query.data_node.is_none() || fallbacks >= MAX_NODE_FALLBACKS {
                return Ok(hits);
            }
            info!(
                query = %query.label(),
                node = ?query.data_node,
                "no matches on preferred data node, searching all nodes"
            );
            query = query.without_data_node();
            fallbacks += 1;
        }
    }
}

/// Keeps datasets whose coverage reaches [`EXTENSION_END_YEAR`].
pub fn filter_extensions(datasets: Vec<Dataset>) -> Result<Vec<Dataset>, EsgfError> {
    let mut kept = Vec::with_capacity(datasets.len());
    for dataset in datasets {
        let end_year = dataset.coverage_end()?.map(|end| end.year());
        if end_year.is_some_and(|year| year >= EXTENSION_END_YEAR) {
            kept.push(dataset);
        } else {
            debug!(dataset = dataset.dataset_id(), ?end_year, "not an extension run");
        }
    }
    Ok(kept)
}

/// Highest version wins; ties keep catalog order.
pub fn select_latest(mut datasets: Vec<Dataset>) -> Option<Dataset> {
    datasets.sort_by(|a, b| b.version().cmp(&a.version()));
    datasets.into_iter().next()
}
