use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use chrono::{NaiveDate, NaiveDateTime};

use esgf_downloader::catalog::{CatalogClient, FileRecord, RemoteDatasetHandle};
use esgf_downloader::error::EsgfError;
use esgf_downloader::query::Query;
use esgf_downloader::resolver::{Resolution, Resolver};
use esgf_downloader::version::VersionToken;

#[derive(Clone)]
struct MockHandle {
    id: String,
    version: String,
    end: Option<NaiveDateTime>,
    files: Vec<FileRecord>,
}

impl MockHandle {
    fn new(version: &str, filenames: &[&str]) -> Self {
        Self {
            id: format!(
                "CMIP6.ScenarioMIP.NCAR.CESM2-WACCM.ssp585.r1i1p1f1.Amon.tas.gn.{version}|esgf.ceda.ac.uk"
            ),
            version: version.to_string(),
            end: None,
            files: filenames
                .iter()
                .map(|name| FileRecord {
                    filename: name.to_string(),
                    url: Some(format!("https://esgf.ceda.ac.uk/{name}")),
                    size: Some(10),
                })
                .collect(),
        }
    }

    fn declared_end(mut self, year: i32) -> Self {
        self.end = NaiveDate::from_ymd_opt(year, 12, 31).and_then(|d| d.and_hms_opt(0, 0, 0));
        self
    }
}

impl RemoteDatasetHandle for MockHandle {
    fn dataset_id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> VersionToken {
        VersionToken::new(self.version.clone())
    }

    fn declared_end_date(&self) -> Option<NaiveDateTime> {
        self.end
    }

    fn list_files(&self) -> Result<Vec<FileRecord>, EsgfError> {
        Ok(self.files.clone())
    }
}

#[derive(Default)]
struct MockCatalog {
    preferred: Vec<MockHandle>,
    any_node: Vec<MockHandle>,
    searched: Mutex<Vec<Option<String>>>,
}

impl CatalogClient for MockCatalog {
    fn search(&self, query: &Query) -> Result<Vec<Box<dyn RemoteDatasetHandle>>, EsgfError> {
        self.searched.lock().unwrap().push(query.data_node.clone());
        let hits = if query.data_node.is_some() {
            &self.preferred
        } else {
            &self.any_node
        };
        Ok(hits
            .iter()
            .cloned()
            .map(|handle| Box::new(handle) as Box<dyn RemoteDatasetHandle>)
            .collect())
    }
}

struct FailingCatalog;

impl CatalogClient for FailingCatalog {
    fn search(&self, _query: &Query) -> Result<Vec<Box<dyn RemoteDatasetHandle>>, EsgfError> {
        Err(EsgfError::SearchStatus {
            status: 503,
            message: "unavailable".to_string(),
        })
    }
}

fn query(scenario: &str, data_node: Option<&str>) -> Query {
    Query {
        project: "CMIP6".to_string(),
        source_id: "CESM2-WACCM".to_string(),
        variant_label: "r1i1p1f1".to_string(),
        experiment_id: scenario.to_string(),
        variable: "tas".to_string(),
        table_id: "Amon".to_string(),
        frequency: "mon".to_string(),
        data_node: data_node.map(str::to_string),
        grid_label: "gn".to_string(),
        latest: true,
    }
}

fn root() -> Utf8PathBuf {
    Utf8PathBuf::from("/data/cmip6")
}

const TO_2100: &str = "tas_Amon_CESM2-WACCM_ssp585_r1i1p1f1_gn_201501-210012.nc";
const TO_2150: &str = "tas_Amon_CESM2-WACCM_ssp585_r1i1p1f1_gn_210101-215012.nc";
const TO_2299: &str = "tas_Amon_CESM2-WACCM_ssp585_r1i1p1f1_gn_215101-229912.nc";

#[test]
fn falls_back_to_any_node_exactly_once() {
    let catalog = MockCatalog {
        any_node: vec![MockHandle::new("v20190815", &[TO_2100])],
        ..MockCatalog::default()
    };
    let root = root();
    let resolver = Resolver::new(&catalog, &root, false);

    let resolution = resolver
        .resolve(&query("ssp585", Some("esgf.ceda.ac.uk")))
        .unwrap();

    assert_matches!(resolution, Resolution::Found(_));
    assert_eq!(
        *catalog.searched.lock().unwrap(),
        vec![Some("esgf.ceda.ac.uk".to_string()), None]
    );
}

#[test]
fn empty_after_fallback_is_not_found() {
    let catalog = MockCatalog::default();
    let root = root();
    let resolver = Resolver::new(&catalog, &root, false);

    let resolution = resolver
        .resolve(&query("ssp585", Some("esgf.ceda.ac.uk")))
        .unwrap();

    assert_matches!(resolution, Resolution::NotFound);
    assert_eq!(catalog.searched.lock().unwrap().len(), 2);
}

#[test]
fn no_preferred_node_means_single_search() {
    let catalog = MockCatalog::default();
    let root = root();
    let resolver = Resolver::new(&catalog, &root, false);

    assert_matches!(
        resolver.resolve(&query("ssp585", None)).unwrap(),
        Resolution::NotFound
    );
    assert_eq!(*catalog.searched.lock().unwrap(), vec![None]);
}

#[test]
fn preferred_node_hits_skip_the_fallback() {
    let catalog = MockCatalog {
        preferred: vec![MockHandle::new("v20190815", &[TO_2100])],
        ..MockCatalog::default()
    };
    let root = root();
    let resolver = Resolver::new(&catalog, &root, false);

    assert_matches!(
        resolver.resolve(&query("ssp585", Some("esgf.ceda.ac.uk"))).unwrap(),
        Resolution::Found(_)
    );
    assert_eq!(catalog.searched.lock().unwrap().len(), 1);
}

#[test]
fn selects_highest_version() {
    let catalog = MockCatalog {
        any_node: vec![
            MockHandle::new("v1", &[TO_2100]),
            MockHandle::new("v20240101", &[TO_2100]),
            MockHandle::new("v20230101", &[TO_2100]),
        ],
        ..MockCatalog::default()
    };
    let root = root();
    let resolver = Resolver::new(&catalog, &root, false);

    let resolution = resolver.resolve(&query("ssp585", None)).unwrap();
    let dataset = assert_matches!(resolution, Resolution::Found(dataset) => dataset);
    assert_eq!(dataset.version().as_str(), "v20240101");
    assert_eq!(
        dataset.local_path().as_str(),
        "/data/cmip6/CMIP6/ScenarioMIP/NCAR/CESM2-WACCM/ssp585/r1i1p1f1/Amon/tas/gn/v20240101"
    );
}

#[test]
fn extension_filter_prefers_runs_reaching_2299() {
    let catalog = MockCatalog {
        any_node: vec![
            MockHandle::new("v20240101", &[TO_2100, TO_2150]),
            MockHandle::new("v20190815", &[TO_2100, TO_2150, TO_2299]),
        ],
        ..MockCatalog::default()
    };
    let root = root();
    let resolver = Resolver::new(&catalog, &root, true);

    let resolution = resolver.resolve(&query("ssp126", None)).unwrap();
    let dataset = assert_matches!(resolution, Resolution::Found(dataset) => dataset);
    assert_eq!(dataset.version().as_str(), "v20190815");
}

#[test]
fn declared_end_date_counts_as_coverage() {
    let catalog = MockCatalog {
        any_node: vec![
            MockHandle::new("v20240101", &[TO_2100]),
            MockHandle::new("v20190815", &[TO_2100]).declared_end(2300),
        ],
        ..MockCatalog::default()
    };
    let root = root();
    let resolver = Resolver::new(&catalog, &root, true);

    let resolution = resolver.resolve(&query("ssp585", None)).unwrap();
    let dataset = assert_matches!(resolution, Resolution::Found(dataset) => dataset);
    assert_eq!(dataset.version().as_str(), "v20190815");
}

#[test]
fn no_extension_when_every_run_stops_early() {
    let catalog = MockCatalog {
        any_node: vec![MockHandle::new("v20240101", &[TO_2100, TO_2150])],
        ..MockCatalog::default()
    };
    let root = root();
    let resolver = Resolver::new(&catalog, &root, true);

    assert_matches!(
        resolver.resolve(&query("ssp534-over", None)).unwrap(),
        Resolution::NoExtension
    );
}

#[test]
fn extension_filter_only_applies_to_extension_scenarios() {
    let catalog = MockCatalog {
        any_node: vec![MockHandle::new("v20240101", &[TO_2100])],
        ..MockCatalog::default()
    };
    let root = root();
    let resolver = Resolver::new(&catalog, &root, true);

    assert!(!resolver.should_filter_extensions("ssp245"));
    assert_matches!(
        resolver.resolve(&query("ssp245", None)).unwrap(),
        Resolution::Found(_)
    );

    let disabled = Resolver::new(&catalog, &root, false);
    assert!(!disabled.should_filter_extensions("ssp585"));
}

#[test]
fn search_errors_propagate() {
    let root = root();
    let resolver = Resolver::new(&FailingCatalog, &root, false);
    assert_matches!(
        resolver.resolve(&query("ssp585", None)),
        Err(EsgfError::SearchStatus { status: 503, .. })
    );
}
