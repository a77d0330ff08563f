// src/config.rs

use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use crate::error::{Result, StoreError};
use crate::table::{Column, ColumnType, Schema};

pub const ENV_DATA_DIR: &str = "SISMANAGER_DATA_DIR";
pub const ENV_BACKUP_DIR: &str = "SISMANAGER_BACKUP_DIR";
pub const ENV_STORE_PATH: &str = "SISMANAGER_CENTRAL_DB_PATH";
pub const ENV_LOG_LEVEL: &str = "SISMANAGER_LOG_LEVEL";

const STORE_FILE_NAME: &str = "central_db.csv";
const BACKUP_DIR_NAME: &str = "backups";

/// A column of the accepted set as it appears in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
    /// Imports fail with `MissingColumns` when a required column is absent.
    /// Ignored on primary-key columns, which are derived when missing.
    #[serde(default)]
    pub required: bool,
}

impl ColumnSpec {
    pub fn new(name: &str, ty: ColumnType, required: bool) -> Self {
        Self {
            name: name.to_string(),
            ty,
            required,
        }
    }
}

/// Composite primary key: an order grouping column plus a position within
/// that group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryKey {
    pub group_column: String,
    pub position_column: String,
}

impl Default for PrimaryKey {
    fn default() -> Self {
        Self {
            group_column: "orderCode".into(),
            position_column: "idOrderPos".into(),
        }
    }
}

impl PrimaryKey {
    pub fn columns(&self) -> [&str; 2] {
        [&self.group_column, &self.position_column]
    }

    pub fn contains(&self, name: &str) -> bool {
        self.group_column == name || self.position_column == name
    }
}

/// Which columns two rows must agree on to count as duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateKey {
    /// Every column except the two primary-key columns.
    #[default]
    AllExceptPrimaryKey,
    /// Every column, primary key included.
    FullRow,
    /// An explicit column subset.
    Columns(Vec<String>),
}

impl DuplicateKey {
    /// Column indices in `schema` that make up the key.
    pub fn resolve(&self, schema: &Schema, pk: &PrimaryKey) -> Result<Vec<usize>> {
        match self {
            DuplicateKey::AllExceptPrimaryKey => Ok(schema
                .columns()
                .iter()
                .enumerate()
                .filter(|(_, c)| !pk.contains(&c.name))
                .map(|(i, _)| i)
                .collect()),
            DuplicateKey::FullRow => Ok((0..schema.len()).collect()),
            DuplicateKey::Columns(names) => schema.indices_of(names),
        }
    }
}

/// Paths, accepted columns, primary key and duplicate key. Passed explicitly
/// into the repository, backup manager and import pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    /// Defaults to `<data_dir>/central_db.csv`.
    pub store_path: Option<PathBuf>,
    /// Defaults to `<data_dir>/backups`.
    pub backup_dir: Option<PathBuf>,
    pub columns: Vec<ColumnSpec>,
    pub primary_key: PrimaryKey,
    /// `all_except_primary_key`, `full_row`, or `columns: [..]`.
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub duplicate_key: DuplicateKey,
    /// Lowercase, without the leading dot.
    pub accepted_extensions: Vec<String>,
    pub backup_retention_days: u32,
    pub delimiter: char,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            store_path: None,
            backup_dir: None,
            columns: vec![
                ColumnSpec::new("orderCode", ColumnType::Text, false),
                ColumnSpec::new("idOrderPos", ColumnType::Integer, false),
                ColumnSpec::new("descrizioneMateriale", ColumnType::Text, false),
                ColumnSpec::new("codiceMateriale", ColumnType::Text, false),
                ColumnSpec::new("quantity", ColumnType::Integer, false),
            ],
            primary_key: PrimaryKey::default(),
            duplicate_key: DuplicateKey::default(),
            accepted_extensions: ["xlsx", "xls", "xlsm", "ods"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            backup_retention_days: 30,
            delimiter: ',',
        }
    }
}

impl StoreConfig {
    /// Default config rooted at `data_dir`.
    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Read a YAML config file and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("reading {}: {}", path.display(), e)))?;
        let cfg: StoreConfig = serde_yaml::from_str(&text)
            .map_err(|e| StoreError::Config(format!("parsing {}: {}", path.display(), e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults with the `SISMANAGER_*` path overrides from the process
    /// environment applied.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env(|k| std::env::var(k).ok());
        cfg
    }

    /// Apply path overrides from `lookup` (normally `std::env::var`).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(ENV_BACKUP_DIR) {
            self.backup_dir = Some(PathBuf::from(dir));
        }
        if let Some(path) = lookup(ENV_STORE_PATH) {
            self.store_path = Some(PathBuf::from(path));
        }
    }

    pub fn store_path(&self) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join(STORE_FILE_NAME))
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join(BACKUP_DIR_NAME))
    }

    pub fn schema(&self) -> Schema {
        Schema::new(
            self.columns
                .iter()
                .map(|c| Column::new(c.name.clone(), c.ty))
                .collect(),
        )
    }

    pub fn delimiter_byte(&self) -> Result<u8> {
        u8::try_from(self.delimiter)
            .ok()
            .filter(|b| b.is_ascii() && *b != b'"' && *b != b'\n' && *b != b'\r')
            .ok_or_else(|| {
                StoreError::Config(format!("unusable delimiter {:?}", self.delimiter))
            })
    }

    /// `true` if `ext` (with or without leading dot, any case) is accepted.
    pub fn accepts_extension(&self, ext: &str) -> bool {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        self.accepted_extensions
            .iter()
            .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(&ext))
    }

    pub fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(StoreError::Config("no columns configured".into()));
        }

        let mut seen = HashSet::new();
        for c in &self.columns {
            if c.name.trim().is_empty() {
                return Err(StoreError::Config("empty column name".into()));
            }
            if !seen.insert(c.name.as_str()) {
                return Err(StoreError::Config(format!("duplicate column `{}`", c.name)));
            }
        }

        let schema = self.schema();
        for (name, want) in [
            (&self.primary_key.group_column, ColumnType::Text),
            (&self.primary_key.position_column, ColumnType::Integer),
        ] {
            match schema.column(name) {
                None => {
                    return Err(StoreError::Config(format!(
                        "primary key column `{}` is not configured",
                        name
                    )))
                }
                Some(col) if col.ty != want => {
                    return Err(StoreError::Config(format!(
                        "primary key column `{}` must be {}, found {}",
                        name, want, col.ty
                    )))
                }
                Some(_) => {}
            }
        }
        if self.primary_key.group_column == self.primary_key.position_column {
            return Err(StoreError::Config(
                "primary key group and position must be different columns".into(),
            ));
        }

        let key = self
            .duplicate_key
            .resolve(&schema, &self.primary_key)
            .map_err(|e| StoreError::Config(format!("duplicate key: {}", e)))?;
        if key.is_empty() {
            return Err(StoreError::Config("duplicate key selects no columns".into()));
        }

        if self.accepted_extensions.is_empty() {
            return Err(StoreError::Config("no accepted file extensions".into()));
        }
        self.delimiter_byte()?;
        Ok(())
    }
}
