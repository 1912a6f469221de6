use serde::Serialize;

use crate::config::ResolvedConfig;
use crate::error::EsgfError;

/// Facet query for one (scenario, model, variable) triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Query {
    pub project: String,
    pub source_id: String,
    pub variant_label: String,
    pub experiment_id: String,
    pub variable: String,
    pub table_id: String,
    pub frequency: String,
    pub data_node: Option<String>,
    pub grid_label: String,
    pub latest: bool,
}

impl Query {
    pub fn build(
        config: &ResolvedConfig,
        scenario: &str,
        model: &str,
        variable: &str,
    ) -> Result<Self, EsgfError> {
        Ok(Self {
            project: config.project.clone(),
            source_id: model.to_string(),
            variant_label: config.variant_label(model)?.to_string(),
            experiment_id: scenario.to_string(),
            variable: variable.to_string(),
            table_id: config.table_id(variable)?.to_string(),
            frequency: config.frequency.clone(),
            data_node: config.data_node_preference.clone(),
            grid_label: config.grid_label(model, variable)?.to_string(),
            latest: true,
        })
    }

    pub fn scenario(&self) -> &str {
        &self.experiment_id
    }

    /// Same query without the preferred hosting node.
    pub fn without_data_node(&self) -> Self {
        Self {
            data_node: None,
            ..self.clone()
        }
    }

    /// Facet pairs in the order they are sent to the search service.
    pub fn facets(&self) -> Vec<(&'static str, String)> {
        let mut facets = vec![
            ("project", self.project.clone()),
            ("source_id", self.source_id.clone()),
            ("variant_label", self.variant_label.clone()),
            ("experiment_id", self.experiment_id.clone()),
            ("variable", self.variable.clone()),
            ("table_id", self.table_id.clone()),
            ("frequency", self.frequency.clone()),
        ];
        if let Some(node) = &self.data_node {
            facets.push(("data_node", node.clone()));
        }
        facets.push(("grid_label", self.grid_label.clone()));
        facets.push(("latest", self.latest.to_string()));
        facets
    }

    pub fn label(&self) -> String {
        format!("{}, {}, {}", self.experiment_id, self.source_id, self.variable)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use camino::Utf8PathBuf;

    use super::*;
    use crate::config::GridLabel;

    fn config() -> ResolvedConfig {
        ResolvedConfig {
            search_node: "https://node/esg-search".to_string(),
            myproxy_host: "node".to_string(),
            data_node_preference: Some("esgf.ceda.ac.uk".to_string()),
            project: "CMIP6".to_string(),
            frequency: "mon".to_string(),
            scenarios: vec!["ssp126".to_string()],
            models: vec!["CanESM5".to_string()],
            variables: vec!["mrro".to_string()],
            table_ids: BTreeMap::from([("mrro".to_string(), "Lmon".to_string())]),
            variant_labels: BTreeMap::from([("CanESM5".to_string(), "r1i1p1f1".to_string())]),
            grid_labels: GridLabel::Shorthand("gn".to_string()),
            extensions_2300: false,
            max_workers: 3,
            data_home: Utf8PathBuf::from("/tmp"),
        }
    }

    #[test]
    fn builds_full_facet_set() {
        let query = Query::build(&config(), "ssp126", "CanESM5", "mrro").unwrap();
        let keys: Vec<_> = query.facets().into_iter().map(|(key, _)| key).collect();
        assert_eq!(
            keys,
            vec![
                "project",
                "source_id",
                "variant_label",
                "experiment_id",
                "variable",
                "table_id",
                "frequency",
                "data_node",
                "grid_label",
                "latest"
            ]
        );
        assert_eq!(query.table_id, "Lmon");
        assert!(query.latest);
    }

    #[test]
    fn fallback_drops_only_the_node() {
        let query = Query::build(&config(), "ssp126", "CanESM5", "mrro").unwrap();
        let fallback = query.without_data_node();
        assert_eq!(fallback.data_node, None);
        assert_eq!(fallback.facets().len(), query.facets().len() - 1);
        assert_eq!(fallback.source_id, query.source_id);
    }

    #[test]
    fn unknown_model_is_rejected() {
        assert!(Query::build(&config(), "ssp126", "MIROC-ES2L", "mrro").is_err());
    }
}
