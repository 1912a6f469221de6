use std::collections::HashSet;
use std::fmt;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDateTime;
use once_cell::sync::OnceCell;
use tracing::debug;

use crate::catalog::{FileRecord, RemoteDatasetHandle};
use crate::dates::DateRange;
use crate::error::EsgfError;
use crate::layout;
use crate::version::VersionToken;

/// A resolved catalog dataset bound to a local root directory.
pub struct Dataset {
    handle: Box<dyn RemoteDatasetHandle>,
    local_path: Utf8PathBuf,
    files: OnceCell<Vec<File>>,
}

impl Dataset {
    pub fn new(handle: Box<dyn RemoteDatasetHandle>, root: &Utf8Path) -> Result<Self, EsgfError> {
        let local_path = layout::dataset_dir(root, handle.dataset_id())?;
        Ok(Self {
            handle,
            local_path,
            files: OnceCell::new(),
        })
    }

    pub fn dataset_id(&self) -> &str {
        self.handle.dataset_id()
    }

    /// Identifier without the hosting node suffix.
    pub fn instance_id(&self) -> &str {
        let id = self.dataset_id();
        id.rsplit_once('|').map(|(path, _)| path).unwrap_or(id)
    }

    pub fn version(&self) -> VersionToken {
        self.handle.version()
    }

    pub fn local_path(&self) -> &Utf8Path {
        &self.local_path
    }

    /// Files sorted by start date. The catalog is queried on first access only.
    pub fn files(&self) -> Result<&[File], EsgfError> {
        self.files
            .get_or_try_init(|| {
                let records = self.handle.list_files()?;
                debug!(dataset = self.dataset_id(), files = records.len(), "resolved files");
                let mut seen = HashSet::new();
                let mut files = records
                    .into_iter()
                    .filter(|record| seen.insert(record.filename.clone()))
                    .map(|record| File::new(record, self))
                    .collect::<Result<Vec<_>, EsgfError>>()?;
                files.sort_by_key(|file| file.dates.start);
                Ok(files)
            })
            .map(Vec::as_slice)
    }

    /// End date declared in catalog metadata, if any.
    pub fn end_date(&self) -> Option<NaiveDateTime> {
        self.handle.declared_end_date()
    }

    /// Declared end date, else the end of the chronologically last file.
    pub fn coverage_end(&self) -> Result<Option<NaiveDateTime>, EsgfError> {
        if let Some(end) = self.end_date() {
            return Ok(Some(end));
        }
        Ok(self.files()?.last().map(File::end_date))
    }

    pub fn is_empty(&self) -> Result<bool, EsgfError> {
        Ok(self.files()?.is_empty())
    }

    pub fn exists(&self) -> Result<bool, EsgfError> {
        Ok(self.files()?.iter().all(File::exists))
    }
}

impl fmt::Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("dataset_id", &self.dataset_id())
            .field("local_path", &self.local_path)
            .field("files_resolved", &self.files.get().is_some())
            .finish()
    }
}

/// One remote data file of a [`Dataset`].
#[derive(Debug, Clone)]
pub struct File {
    filename: String,
    url: Option<String>,
    size: Option<u64>,
    dataset_id: String,
    local_path: Utf8PathBuf,
    dates: DateRange,
}

impl File {
    fn new(record: FileRecord, dataset: &Dataset) -> Result<Self, EsgfError> {
        let local_path = layout::file_path(dataset.local_path(), &record.filename)?;
        let dates = DateRange::from_filename(&record.filename)?;
        Ok(Self {
            filename: record.filename,
            url: record.url,
            size: record.size.filter(|size| *size > 0),
            dataset_id: dataset.dataset_id().to_string(),
            local_path,
            dates,
        })
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn download_url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn dataset_id(&self) -> &str {
        &self.dataset_id
    }

    pub fn local_path(&self) -> &Utf8Path {
        &self.local_path
    }

    pub fn start_date(&self) -> NaiveDateTime {
        self.dates.start
    }

    pub fn end_date(&self) -> NaiveDateTime {
        self.dates.end
    }

    /// Checked against the filesystem on every call.
    pub fn exists(&self) -> bool {
        self.local_path.as_std_path().is_file()
    }

    pub fn remove(&self) -> Result<(), EsgfError> {
        if self.exists() {
            fs::remove_file(self.local_path.as_std_path()).map_err(|err| {
                EsgfError::Filesystem(format!("remove {}: {err}", self.local_path))
            })?;
        }
        Ok(())
    }
}
