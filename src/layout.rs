use std::fs;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

use crate::error::EsgfError;

/// A dataset identifier split into its facet path and hosting node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetId<'a> {
    pub facets: Vec<&'a str>,
    pub node: &'a str,
}

impl<'a> DatasetId<'a> {
    /// Splits `<facet1>.<facet2>...<facetN>|<node>` on the last `|`.
    pub fn parse(id: &'a str) -> Result<Self, EsgfError> {
        let (path, node) = id
            .rsplit_once('|')
            .ok_or_else(|| EsgfError::InvalidDatasetId(id.to_string()))?;
        let facets: Vec<&str> = path.split('.').collect();
        let bad_facet = facets
            .iter()
            .any(|facet| facet.is_empty() || facet.contains(['/', '\\']));
        if node.is_empty() || bad_facet {
            return Err(EsgfError::InvalidDatasetId(id.to_string()));
        }
        Ok(Self { facets, node })
    }

    pub fn instance_id(&self) -> String {
        self.facets.join(".")
    }
}

/// `<root>/<facet1>/.../<facetN>`
pub fn dataset_dir(root: &Utf8Path, dataset_id: &str) -> Result<Utf8PathBuf, EsgfError> {
    let id = DatasetId::parse(dataset_id)?;
    let mut path = root.to_path_buf();
    for facet in id.facets {
        path.push(facet);
    }
    Ok(path)
}

/// `<dataset_dir>/<filename>`. The name must be a single plain component so
/// the file lands directly inside the dataset directory.
pub fn file_path(dataset_dir: &Utf8Path, filename: &str) -> Result<Utf8PathBuf, EsgfError> {
    let mut components = Utf8Path::new(filename).components();
    let plain = matches!(
        (components.next(), components.next()),
        (Some(Utf8Component::Normal(_)), None)
    );
    if !plain || filename.contains(['/', '\\']) {
        return Err(EsgfError::InvalidFilename(filename.to_string()));
    }
    Ok(dataset_dir.join(filename))
}

pub fn ensure_dir(path: &Utf8Path) -> Result<(), EsgfError> {
    fs::create_dir_all(path.as_std_path())
        .map_err(|err| EsgfError::Filesystem(format!("create {path}: {err}")))
}
