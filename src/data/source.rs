//! Loading observation tables from local files, URLs and built-in datasets.
//!
//! Built-in datasets are downloaded once into a cache directory
//! (`<user cache>/tidy-lmm/datasets` by default) and read from there on
//! later runs. Plain URLs are fetched on every load.

use crate::data::Table;
use crate::error::{Result, TidyError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const PENGUINS_URL: &str =
    "https://raw.githubusercontent.com/allisonhorst/palmerpenguins/main/inst/extdata/penguins.csv";

/// Available built-in datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dataset {
    /// Palmer penguins: size measurements of three species on three islands.
    Penguins,
}

impl Dataset {
    /// Get the dataset name for display.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Penguins => "penguins",
        }
    }

    /// Get a short description.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Penguins => "Palmer penguins, 344 birds: species, island, bill, flipper, mass, sex, year",
        }
    }

    /// Public URL of the CSV file.
    pub fn url(&self) -> &'static str {
        match self {
            Self::Penguins => PENGUINS_URL,
        }
    }

    /// Get all available datasets.
    pub fn all() -> Vec<Self> {
        vec![Self::Penguins]
    }

    fn file_name(&self) -> String {
        format!("{}.csv", self.name())
    }
}

impl FromStr for Dataset {
    type Err = TidyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "penguins" | "palmerpenguins" | "palmer_penguins" => Ok(Self::Penguins),
            other => Err(TidyError::InvalidParameter(format!(
                "Unknown dataset '{}'",
                other
            ))),
        }
    }
}

/// Where an observation table comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataSource {
    /// A local CSV file.
    Path { path: PathBuf },
    /// A CSV file fetched with an HTTP GET.
    Url { url: String },
    /// A built-in dataset, cached on disk.
    Dataset { name: Dataset },
}

impl DataSource {
    /// Interpret a command-line style source string.
    ///
    /// `http://` and `https://` prefixes select a URL, a built-in dataset
    /// name selects that dataset unless a file of that name exists, and
    /// anything else is a path.
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        if spec.starts_with("http://") || spec.starts_with("https://") {
            return Self::Url {
                url: spec.to_string(),
            };
        }
        if !Path::new(spec).exists() {
            if let Ok(name) = Dataset::from_str(spec) {
                return Self::Dataset { name };
            }
        }
        Self::Path {
            path: PathBuf::from(spec),
        }
    }

    /// Load the table, using `cache_dir` for built-in datasets.
    pub fn load(&self, cache_dir: Option<&Path>) -> Result<Table> {
        match self {
            Self::Path { path } => {
                tracing::info!(path = %path.display(), "loading CSV");
                Table::from_csv(path)
            }
            Self::Url { url } => fetch_csv(url),
            Self::Dataset { name } => Ok(fetch_dataset(*name, cache_dir)?.table),
        }
    }
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Path { path } => write!(f, "{}", path.display()),
            Self::Url { url } => write!(f, "{}", url),
            Self::Dataset { name } => write!(f, "dataset:{}", name.name()),
        }
    }
}

/// Fetch a CSV over HTTP and parse it, without caching.
pub fn fetch_csv(url: &str) -> Result<Table> {
    tracing::info!(url, "fetching CSV");
    let bytes = http_get(url)?;
    Table::from_csv_reader(bytes.as_slice())
}

/// Fetched dataset.
pub struct FetchedDataset {
    pub dataset: Dataset,
    pub table: Table,
    pub cache_dir: PathBuf,
}

/// Fetch a built-in dataset, using the cache if available.
pub fn fetch_dataset(dataset: Dataset, cache_dir: Option<&Path>) -> Result<FetchedDataset> {
    let cache = cache_dir.map(PathBuf::from).unwrap_or_else(default_cache_dir);
    fs::create_dir_all(&cache)?;

    let file = cache.join(dataset.file_name());
    if !file.exists() {
        tracing::info!(dataset = dataset.name(), "downloading dataset");
        download_file(dataset.url(), &file)?;
    } else {
        tracing::debug!(path = %file.display(), "using cached dataset");
    }

    let table = Table::from_csv(&file)?;
    Ok(FetchedDataset {
        dataset,
        table,
        cache_dir: cache,
    })
}

/// Dataset info for listing.
pub struct DatasetInfo {
    pub dataset: Dataset,
    pub cached: bool,
}

/// List available datasets with their cache status.
pub fn list_datasets(cache_dir: Option<&Path>) -> Vec<DatasetInfo> {
    let cache = cache_dir.map(PathBuf::from).unwrap_or_else(default_cache_dir);
    Dataset::all()
        .into_iter()
        .map(|dataset| DatasetInfo {
            dataset,
            cached: cache.join(dataset.file_name()).exists(),
        })
        .collect()
}

/// Clear the dataset cache.
pub fn clear_cache(cache_dir: Option<&Path>) -> Result<()> {
    let cache = cache_dir.map(PathBuf::from).unwrap_or_else(default_cache_dir);
    if cache.exists() {
        fs::remove_dir_all(&cache)?;
    }
    Ok(())
}

/// Default on-disk cache for downloaded datasets.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tidy-lmm")
        .join("datasets")
}

fn http_get(url: &str) -> Result<Vec<u8>> {
    let response = reqwest::blocking::get(url).map_err(|source| TidyError::Fetch {
        url: url.to_string(),
        source,
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(TidyError::FetchStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let bytes = response.bytes().map_err(|source| TidyError::Fetch {
        url: url.to_string(),
        source,
    })?;
    if bytes.is_empty() {
        return Err(TidyError::EmptyData(format!("'{}' returned no data", url)));
    }
    Ok(bytes.to_vec())
}

fn download_file(url: &str, dest: &Path) -> Result<()> {
    let bytes = http_get(url)?;
    // Parse before caching so a malformed download is never cached.
    Table::from_csv_reader(bytes.as_slice())?;
    fs::write(dest, &bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_dataset_parsing() {
        assert_eq!(Dataset::from_str("penguins").unwrap(), Dataset::Penguins);
        assert_eq!(Dataset::from_str("Palmer_Penguins").unwrap(), Dataset::Penguins);
        assert!(Dataset::from_str("iris").is_err());
        assert_eq!(Dataset::all().len(), 1);
    }

    #[test]
    fn test_source_parse() {
        assert_eq!(
            DataSource::parse("https://example.org/data.csv"),
            DataSource::Url {
                url: "https://example.org/data.csv".to_string()
            }
        );
        assert_eq!(
            DataSource::parse("penguins"),
            DataSource::Dataset {
                name: Dataset::Penguins
            }
        );
        assert_eq!(
            DataSource::parse("data/trials.csv"),
            DataSource::Path {
                path: PathBuf::from("data/trials.csv")
            }
        );
    }

    #[test]
    fn test_load_from_path() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "subject,rt").unwrap();
        writeln!(file, "s1,512.5").unwrap();
        file.flush().unwrap();

        let source = DataSource::Path {
            path: file.path().to_path_buf(),
        };
        let table = source.load(None).unwrap();
        assert_eq!(table.n_rows(), 1);
    }

    #[test]
    fn test_cached_dataset_is_read_without_network() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("penguins.csv"),
            "species,island,body_mass_g\nAdelie,Torgersen,3750\n",
        )
        .unwrap();

        let listing = list_datasets(Some(dir.path()));
        assert!(listing[0].cached);

        let fetched = fetch_dataset(Dataset::Penguins, Some(dir.path())).unwrap();
        assert_eq!(fetched.table.n_rows(), 1);

        clear_cache(Some(dir.path())).unwrap();
        assert!(!dir.path().exists());
    }

    #[test]
    fn test_unreachable_url_fails_fast() {
        let result = fetch_csv("http://127.0.0.1:9/missing.csv");
        assert!(matches!(result, Err(TidyError::Fetch { .. })));
    }

    #[test]
    fn test_source_yaml_shape() {
        let source = DataSource::Dataset {
            name: Dataset::Penguins,
        };
        let yaml = serde_yaml::to_string(&source).unwrap();
        assert!(yaml.contains("kind: dataset"));
        assert!(yaml.contains("name: penguins"));
    }
}
