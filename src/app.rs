use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use crate::cancel::CancellationToken;
use crate::catalog::CatalogClient;
use crate::config::ResolvedConfig;
use crate::dataset::Dataset;
use crate::download::{DownloadEngine, DownloadReport, FileTransport};
use crate::error::EsgfError;
use crate::layout;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::query::Query;
use crate::resolver::{Resolution, Resolver};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    NotFound,
    NoExtension,
    Empty,
    Exists,
    Planned,
    Downloaded,
    Interrupted,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunItem {
    pub scenario: String,
    pub model: String,
    pub variable: String,
    pub action: Action,
    pub dataset_id: Option<String>,
    pub local_path: Option<String>,
    pub files: Option<usize>,
    pub report: Option<DownloadReport>,
    pub error: Option<String>,
}

impl RunItem {
    fn new(scenario: &str, model: &str, variable: &str, action: Action) -> Self {
        Self {
            scenario: scenario.to_string(),
            model: model.to_string(),
            variable: variable.to_string(),
            action,
            dataset_id: None,
            local_path: None,
            files: None,
            report: None,
            error: None,
        }
    }

    fn with_dataset(mut self, dataset: &Dataset) -> Self {
        self.dataset_id = Some(dataset.dataset_id().to_string());
        self.local_path = Some(dataset.local_path().to_string());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub interrupted: bool,
    pub items: Vec<RunItem>,
}

pub struct App<C: CatalogClient, T: FileTransport> {
    catalog: C,
    transport: T,
    token: CancellationToken,
}

impl<C: CatalogClient, T: FileTransport> App<C, T> {
    pub fn new(catalog: C, transport: T, token: CancellationToken) -> Self {
        Self {
            catalog,
            transport,
            token,
        }
    }

    /// Processes every (scenario, model, variable) triple in order, one
    /// dataset at a time, stopping after the first interrupted download.
    pub fn run(
        &self,
        config: &ResolvedConfig,
        options: RunOptions,
        sink: &dyn ProgressSink,
    ) -> Result<RunResult, EsgfError> {
        if !options.dry_run {
            layout::ensure_dir(&config.data_home)?;
        }
        info!(data_home = %config.data_home, "downloading data");

        let mut items = Vec::new();
        let mut interrupted = false;
        for (scenario, model, variable) in config.triples() {
            if self.token.is_cancelled() {
                interrupted = true;
                break;
            }
            let item = match self.process(config, &scenario, &model, &variable, &options, sink) {
                Ok(item) => item,
                Err(err) => {
                    warn!(%scenario, %model, %variable, %err, "skipping");
                    sink.event(ProgressEvent::message(format!(
                        "error {scenario}, {model}, {variable}: {err}"
                    )));
                    let mut item = RunItem::new(&scenario, &model, &variable, Action::Error);
                    item.error = Some(err.to_string());
                    item
                }
            };
            let stop = item.action == Action::Interrupted;
            items.push(item);
            if stop {
                interrupted = true;
                break;
            }
        }

        Ok(RunResult { interrupted, items })
    }

    /// Resolves one triple to a concrete dataset version.
    pub fn fetch_dataset(
        &self,
        config: &ResolvedConfig,
        scenario: &str,
        model: &str,
        variable: &str,
    ) -> Result<Resolution, EsgfError> {
        let query = Query::build(config, scenario, model, variable)?;
        Resolver::new(&self.catalog, &config.data_home, config.extensions_2300).resolve(&query)
    }

    fn process(
        &self,
        config: &ResolvedConfig,
        scenario: &str,
        model: &str,
        variable: &str,
        options: &RunOptions,
        sink: &dyn ProgressSink,
    ) -> Result<RunItem, EsgfError> {
        let label = format!("{scenario}, {model}, {variable}");
        sink.event(ProgressEvent::phase("Resolve", &label));

        let dataset = match self.fetch_dataset(config, scenario, model, variable)? {
            Resolution::Found(dataset) => dataset,
            Resolution::NotFound => {
                sink.event(ProgressEvent::message(format!("no datasets found for {label}")));
                return Ok(RunItem::new(scenario, model, variable, Action::NotFound));
            }
            Resolution::NoExtension => {
                sink.event(ProgressEvent::message(format!(
                    "no 2300 extensions found for {label}"
                )));
                return Ok(RunItem::new(scenario, model, variable, Action::NoExtension));
            }
        };

        if dataset.is_empty()? {
            sink.event(ProgressEvent::message(format!(
                "no files found for {}",
                dataset.dataset_id()
            )));
            return Ok(RunItem::new(scenario, model, variable, Action::Empty).with_dataset(&dataset));
        }

        let file_count = dataset.files()?.len();
        if dataset.exists()? {
            sink.event(ProgressEvent::message(format!(
                "{} (already exists)",
                dataset.instance_id()
            )));
            let mut item =
                RunItem::new(scenario, model, variable, Action::Exists).with_dataset(&dataset);
            item.files = Some(file_count);
            return Ok(item);
        }

        if options.dry_run {
            sink.event(ProgressEvent::message(format!(
                "would download {}",
                dataset.dataset_id()
            )));
            let mut item =
                RunItem::new(scenario, model, variable, Action::Planned).with_dataset(&dataset);
            item.files = Some(file_count);
            return Ok(item);
        }

        sink.event(ProgressEvent::message(dataset.dataset_id().to_string()));
        let engine = DownloadEngine::new(&self.transport, self.token.clone(), config.max_workers);
        let started = Instant::now();
        let report = engine.download(&dataset, sink)?;
        sink.event(ProgressEvent {
            message: format!("finished {}", dataset.instance_id()),
            elapsed: Some(started.elapsed()),
        });
        let action = if report.interrupted {
            Action::Interrupted
        } else {
            Action::Downloaded
        };
        let mut item = RunItem::new(scenario, model, variable, action).with_dataset(&dataset);
        item.files = Some(file_count);
        item.report = Some(report);
        Ok(item)
    }
}
