use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::EsgfError;

pub const DEFAULT_CONFIG_FILE: &str = "esgf-dl.json";
pub const DEFAULT_MAX_WORKERS: usize = 3;

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    pub esgf: EsgfSection,
    pub data: DataSection,
    pub table_mapping: BTreeMap<String, String>,
    pub variant_labels: VariantLabels,
    #[serde(default)]
    pub extensions_2300: bool,
    #[serde(default)]
    pub max_workers: Option<usize>,
    #[serde(default)]
    pub data_home: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct EsgfSection {
    pub search_node: String,
    pub myproxy_host: String,
    #[serde(default)]
    pub data_node_preference: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DataSection {
    pub project: String,
    pub frequency: String,
    pub grid_label: GridLabel,
    pub scenarios: Vec<String>,
    pub models: Vec<String>,
    pub variables: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum GridLabel {
    Shorthand(String),
    Mapping(BTreeMap<String, String>),
}

impl GridLabel {
    /// Variable overrides win over model overrides, then `default`.
    pub fn lookup(&self, model: &str, variable: &str) -> Option<&str> {
        match self {
            GridLabel::Shorthand(value) => Some(value.as_str()),
            GridLabel::Mapping(map) => map
                .get(variable)
                .or_else(|| map.get(model))
                .or_else(|| map.get("default"))
                .map(String::as_str),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct VariantLabels {
    #[serde(default)]
    pub default: Option<String>,
    #[serde(flatten)]
    pub models: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub search_node: String,
    pub myproxy_host: String,
    pub data_node_preference: Option<String>,
    pub project: String,
    pub frequency: String,
    pub scenarios: Vec<String>,
    pub models: Vec<String>,
    pub variables: Vec<String>,
    pub table_ids: BTreeMap<String, String>,
    pub variant_labels: BTreeMap<String, String>,
    pub grid_labels: GridLabel,
    pub extensions_2300: bool,
    pub max_workers: usize,
    pub data_home: Utf8PathBuf,
}

impl ResolvedConfig {
    pub fn variant_label(&self, model: &str) -> Result<&str, EsgfError> {
        self.variant_labels
            .get(model)
            .map(String::as_str)
            .ok_or_else(|| EsgfError::InvalidConfig(format!("no variant label for model {model}")))
    }

    pub fn table_id(&self, variable: &str) -> Result<&str, EsgfError> {
        self.table_ids
            .get(variable)
            .map(String::as_str)
            .ok_or_else(|| EsgfError::MissingTableId(variable.to_string()))
    }

    pub fn grid_label(&self, model: &str, variable: &str) -> Result<&str, EsgfError> {
        self.grid_labels.lookup(model, variable).ok_or_else(|| {
            EsgfError::InvalidConfig(format!("no grid label for {model}/{variable}"))
        })
    }

    /// Every (scenario, model, variable) triple, scenarios outermost.
    pub fn triples(&self) -> Vec<(String, String, String)> {
        let mut triples = Vec::new();
        for scenario in &self.scenarios {
            for model in &self.models {
                for variable in &self.variables {
                    triples.push((scenario.clone(), model.clone(), variable.clone()));
                }
            }
        }
        triples
    }

    pub fn apply(&mut self, overrides: &ConfigOverrides) -> Result<(), EsgfError> {
        if let Some(max_workers) = overrides.max_workers {
            if max_workers == 0 {
                return Err(EsgfError::InvalidConfig(
                    "max_workers must be at least 1".to_string(),
                ));
            }
            self.max_workers = max_workers;
        }
        if overrides.extensions_2300 {
            self.extensions_2300 = true;
        }
        if let Some(data_home) = &overrides.data_home {
            self.data_home = data_home.clone();
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub max_workers: Option<usize>,
    pub extensions_2300: bool,
    pub data_home: Option<Utf8PathBuf>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, EsgfError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(EsgfError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| EsgfError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| EsgfError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, EsgfError> {
        let data = config.data;
        for (name, list) in [
            ("scenarios", &data.scenarios),
            ("models", &data.models),
            ("variables", &data.variables),
        ] {
            if list.is_empty() {
                return Err(EsgfError::InvalidConfig(format!("data.{name} is empty")));
            }
        }

        let max_workers = config.max_workers.unwrap_or(DEFAULT_MAX_WORKERS);
        if max_workers == 0 {
            return Err(EsgfError::InvalidConfig(
                "max_workers must be at least 1".to_string(),
            ));
        }

        let variant_labels = data
            .models
            .iter()
            .map(|model| {
                config
                    .variant_labels
                    .models
                    .get(model)
                    .or(config.variant_labels.default.as_ref())
                    .map(|label| (model.clone(), label.clone()))
                    .ok_or_else(|| {
                        EsgfError::InvalidConfig(format!("no variant label for model {model}"))
                    })
            })
            .collect::<Result<BTreeMap<_, _>, EsgfError>>()?;

        for variable in &data.variables {
            if !config.table_mapping.contains_key(variable) {
                return Err(EsgfError::MissingTableId(variable.clone()));
            }
            for model in &data.models {
                if data.grid_label.lookup(model, variable).is_none() {
                    return Err(EsgfError::InvalidConfig(format!(
                        "no grid label for {model}/{variable}"
                    )));
                }
            }
        }

        let data_home = match config.data_home {
            Some(path) => Utf8PathBuf::from(path),
            None => default_data_home()?,
        };

        Ok(ResolvedConfig {
            search_node: config.esgf.search_node.trim_end_matches('/').to_string(),
            myproxy_host: config.esgf.myproxy_host,
            data_node_preference: config
                .esgf
                .data_node_preference
                .filter(|node| !node.trim().is_empty()),
            project: data.project,
            frequency: data.frequency,
            scenarios: data.scenarios,
            models: data.models,
            variables: data.variables,
            table_ids: config.table_mapping,
            variant_labels,
            grid_labels: data.grid_label,
            extensions_2300: config.extensions_2300,
            max_workers,
            data_home,
        })
    }
}

fn default_data_home() -> Result<Utf8PathBuf, EsgfError> {
    if let Ok(home) = std::env::var("DATA_HOME") {
        if !home.trim().is_empty() {
            return Ok(Utf8PathBuf::from(home.trim()));
        }
    }
    let cwd = std::env::current_dir().map_err(|err| EsgfError::Filesystem(err.to_string()))?;
    Utf8PathBuf::from_path_buf(cwd)
        .map_err(|_| EsgfError::Filesystem("non-utf8 working directory".to_string()))
}
