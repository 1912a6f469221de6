use esgf_downloader::catalog::{CatalogClient, EsgfSearchClient};
use esgf_downloader::query::Query;

#[test]
#[ignore]
fn search_real_index_node() {
    let client = EsgfSearchClient::new("https://esgf-node.llnl.gov/esg-search").unwrap();
    let query = Query {
        project: "CMIP6".to_string(),
        source_id: "CESM2-WACCM".to_string(),
        variant_label: "r1i1p1f1".to_string(),
        experiment_id: "ssp585".to_string(),
        variable: "tas".to_string(),
        table_id: "Amon".to_string(),
        frequency: "mon".to_string(),
        data_node: None,
        grid_label: "gn".to_string(),
        latest: true,
    };

    let hits = client.search(&query).unwrap();
    assert!(!hits.is_empty());

    let files = hits[0].list_files().unwrap();
    assert!(files.iter().all(|file| file.filename.ends_with(".nc")));
    assert!(files.iter().any(|file| file.url.is_some()));
}
