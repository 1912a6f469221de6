use std::thread;
use std::time::Duration;

use chrono::NaiveDateTime;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::dates::parse_declared_date;
use crate::error::EsgfError;
use crate::query::Query;
use crate::version::VersionToken;

const PAGE_SIZE: usize = 500;

/// One constituent file of a catalog dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub filename: String,
    pub url: Option<String>,
    pub size: Option<u64>,
}

/// Narrow view of a dataset match returned by the search service.
pub trait RemoteDatasetHandle: Send + Sync {
    fn dataset_id(&self) -> &str;
    fn version(&self) -> VersionToken;
    fn declared_end_date(&self) -> Option<NaiveDateTime>;
    fn list_files(&self) -> Result<Vec<FileRecord>, EsgfError>;
}

pub trait CatalogClient: Send + Sync {
    fn search(&self, query: &Query) -> Result<Vec<Box<dyn RemoteDatasetHandle>>, EsgfError>;
}

#[derive(Clone)]
pub struct EsgfSearchClient {
    client: Client,
    base_url: String,
}

impl EsgfSearchClient {
    pub fn new(search_node: &str) -> Result<Self, EsgfError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("esgf-dl/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| EsgfError::SearchHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| EsgfError::SearchHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: search_node.trim_end_matches('/').to_string(),
        })
    }

    fn search_url(&self) -> String {
        format!("{}/search", self.base_url)
    }

    fn fetch_docs(&self, params: &[(&str, String)]) -> Result<Vec<Value>, EsgfError> {
        let url = self.search_url();
        let mut docs = Vec::new();
        loop {
            let offset = docs.len();
            let response = self.send_with_retries(|| {
                self.client
                    .get(&url)
                    .query(params)
                    .query(&[
                        ("format", "application/solr+json".to_string()),
                        ("distrib", "true".to_string()),
                        ("limit", PAGE_SIZE.to_string()),
                        ("offset", offset.to_string()),
                    ])
            })?;
            let response = Self::handle_status(response)?;
            let page: SolrEnvelope = response
                .json()
                .map_err(|err| EsgfError::SearchResponse(err.to_string()))?;
            let received = page.response.docs.len();
            docs.extend(page.response.docs);
            if received == 0 || docs.len() >= page.response.num_found {
                break;
            }
        }
        Ok(docs)
    }

    fn list_dataset_files(&self, dataset_id: &str) -> Result<Vec<FileRecord>, EsgfError> {
        let params = [
            ("type", "File".to_string()),
            ("dataset_id", dataset_id.to_string()),
        ];
        let docs = self.fetch_docs(&params)?;
        debug!(dataset_id, files = docs.len(), "listed dataset files");
        docs.iter().map(file_record_from_doc).collect()
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, EsgfError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "ESGF search failed".to_string());
        Err(EsgfError::SearchStatus { status, message })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, EsgfError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 500;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        debug!(status, attempt, "retrying ESGF search");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        debug!(%err, attempt, "retrying ESGF search");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(EsgfError::SearchHttp(err.to_string()));
                }
            }
        }
    }
}

impl CatalogClient for EsgfSearchClient {
    fn search(&self, query: &Query) -> Result<Vec<Box<dyn RemoteDatasetHandle>>, EsgfError> {
        let mut params = vec![("type", "Dataset".to_string())];
        params.extend(query.facets());
        let docs = self.fetch_docs(&params)?;
        debug!(query = %query.label(), hits = docs.len(), "dataset search");
        docs.iter()
            .map(|doc| {
                let record = dataset_record_from_doc(doc)?;
                Ok(Box::new(EsgfDatasetHandle {
                    record,
                    client: self.clone(),
                }) as Box<dyn RemoteDatasetHandle>)
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRecord {
    pub id: String,
    pub version: String,
    pub datetime_stop: Option<String>,
}

struct EsgfDatasetHandle {
    record: DatasetRecord,
    client: EsgfSearchClient,
}

impl RemoteDatasetHandle for EsgfDatasetHandle {
    fn dataset_id(&self) -> &str {
        &self.record.id
    }

    fn version(&self) -> VersionToken {
        VersionToken::new(self.record.version.clone())
    }

    fn declared_end_date(&self) -> Option<NaiveDateTime> {
        self.record
            .datetime_stop
            .as_deref()
            .and_then(parse_declared_date)
    }

    fn list_files(&self) -> Result<Vec<FileRecord>, EsgfError> {
        self.client.list_dataset_files(&self.record.id)
    }
}

#[derive(Debug, Deserialize)]
struct SolrEnvelope {
    response: SolrResponse,
}

#[derive(Debug, Deserialize)]
struct SolrResponse {
    #[serde(rename = "numFound")]
    num_found: usize,
    #[serde(default)]
    docs: Vec<Value>,
}

pub fn dataset_record_from_doc(doc: &Value) -> Result<DatasetRecord, EsgfError> {
    let id = doc
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| EsgfError::SearchResponse("dataset without id".to_string()))?
        .to_string();
    let version = match doc.get("version") {
        Some(Value::String(value)) => value.clone(),
        Some(Value::Number(value)) => value.to_string(),
        _ => version_from_id(&id),
    };
    let datetime_stop = first_string(doc.get("datetime_stop"));
    Ok(DatasetRecord {
        id,
        version,
        datetime_stop,
    })
}

pub fn file_record_from_doc(doc: &Value) -> Result<FileRecord, EsgfError> {
    let filename = first_string(doc.get("title"))
        .ok_or_else(|| EsgfError::SearchResponse("file without title".to_string()))?;
    let url = doc
        .get("url")
        .and_then(Value::as_array)
        .and_then(|urls| {
            urls.iter()
                .filter_map(Value::as_str)
                .find_map(http_server_url)
        });
    let size = match doc.get("size") {
        Some(Value::Number(value)) => value.as_u64(),
        Some(Value::String(value)) => value.parse().ok(),
        _ => None,
    };
    Ok(FileRecord {
        filename,
        url,
        size,
    })
}

// url entries look like `https://host/file.nc|application/netcdf|HTTPServer`
fn http_server_url(entry: &str) -> Option<String> {
    let mut parts = entry.split('|');
    let url = parts.next()?;
    let _mime = parts.next();
    let service = parts.next()?;
    (service == "HTTPServer" && !url.is_empty()).then(|| url.to_string())
}

fn first_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(value) => Some(value.clone()),
        Value::Array(items) => items.first().and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn version_from_id(id: &str) -> String {
    let path = id.rsplit_once('|').map(|(path, _)| path).unwrap_or(id);
    path.rsplit('.').next().unwrap_or_default().to_string()
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
