// src/import/mod.rs

pub mod batch;
pub mod identify;
pub mod normalize;
pub mod parse;

pub use batch::{Cell, ImportBatch, SourceRow};
pub use identify::{assign_identifiers, default_order_code, RecordId};
pub use normalize::{coerce, normalize, Normalized};
pub use parse::{ensure_supported, read_workbook};

use serde::Serialize;
use std::{fmt, path::Path};
use tracing::{error, info, instrument};

use crate::backup::SnapshotId;
use crate::config::StoreConfig;
use crate::error::Result;
use crate::repository::{CentralRepository, DedupeMode, DedupeOutcome};

/// Where an import call currently is. `Failed` is reachable from every stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStage {
    Parsing,
    Normalizing,
    Identifying,
    Merging,
    Done,
    Failed,
}

impl fmt::Display for ImportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ImportStage::Parsing => "parsing",
            ImportStage::Normalizing => "normalizing",
            ImportStage::Identifying => "identifying",
            ImportStage::Merging => "merging",
            ImportStage::Done => "done",
            ImportStage::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportOptions {
    /// Non-key columns to keep; all configured columns when `None`.
    pub accepted_columns: Option<Vec<String>>,
    /// Name the file was uploaded as, when `path` is a generated name.
    pub original_name: Option<String>,
    /// Deduplicate right after the merge.
    pub dedupe: Option<DedupeMode>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportResult {
    pub source: String,
    pub rows_added: usize,
    pub identifiers: Vec<RecordId>,
    /// Pre-merge snapshot of the store, if the merge wrote anything.
    pub snapshot: Option<SnapshotId>,
    pub dedupe: Option<DedupeOutcome>,
}

type StageObserver<'a> = Box<dyn Fn(ImportStage) + 'a>;

/// Parse → normalize → identify → merge, for one spreadsheet at a time.
///
/// Nothing reaches the store before `Merging`, and the merge is a single
/// atomic append, so a failed import leaves the store as it was.
pub struct ImportPipeline<'a> {
    repository: &'a CentralRepository,
    config: &'a StoreConfig,
    observer: Option<StageObserver<'a>>,
}

impl<'a> ImportPipeline<'a> {
    pub fn new(repository: &'a CentralRepository, config: &'a StoreConfig) -> Self {
        Self {
            repository,
            config,
            observer: None,
        }
    }

    /// Call `observer` on every stage transition.
    pub fn with_observer(mut self, observer: impl Fn(ImportStage) + 'a) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    #[instrument(level = "info", skip(self, path, options), fields(source = %path.as_ref().display()))]
    pub fn run(&self, path: impl AsRef<Path>, options: &ImportOptions) -> Result<ImportResult> {
        let path = path.as_ref();
        let mut stage = ImportStage::Parsing;
        match self.run_stages(path, options, &mut stage) {
            Ok(result) => {
                self.enter(ImportStage::Done);
                info!(
                    rows_added = result.rows_added,
                    snapshot = ?result.snapshot.as_ref().map(|s| s.as_str()),
                    "import finished"
                );
                Ok(result)
            }
            Err(e) => {
                error!(stage = %stage, error = %e, "import failed");
                self.enter(ImportStage::Failed);
                Err(e)
            }
        }
    }

    fn run_stages(
        &self,
        path: &Path,
        options: &ImportOptions,
        stage: &mut ImportStage,
    ) -> Result<ImportResult> {
        let source_name = options
            .original_name
            .clone()
            .unwrap_or_else(|| {
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });

        // 1) parsing
        self.advance(stage, ImportStage::Parsing);
        parse::ensure_supported(path, self.config)?;
        let batch = parse::read_workbook(path, &source_name)?;
        info!(rows = batch.rows.len(), columns = batch.header.len(), "parsed source");

        // 2) normalizing
        self.advance(stage, ImportStage::Normalizing);
        let normalized = normalize::normalize(
            &batch,
            self.config,
            options.accepted_columns.as_deref(),
        )?;

        // 3) identifying
        self.advance(stage, ImportStage::Identifying);
        let default_group = identify::default_order_code(path, options.original_name.as_deref());
        let (table, identifiers) =
            identify::assign_identifiers(normalized, &self.config.primary_key, &default_group)?;

        // 4) merging; append snapshots the store itself
        self.advance(stage, ImportStage::Merging);
        let receipt = self.repository.append(&table)?;
        let dedupe = match options.dedupe {
            Some(mode) => Some(self.repository.deduplicate(mode)?),
            None => None,
        };

        Ok(ImportResult {
            source: source_name,
            rows_added: table.len(),
            identifiers,
            snapshot: receipt.and_then(|r| r.snapshot),
            dedupe,
        })
    }

    fn advance(&self, stage: &mut ImportStage, next: ImportStage) {
        *stage = next;
        self.enter(next);
    }

    fn enter(&self, stage: ImportStage) {
        if let Some(observer) = &self.observer {
            observer(stage);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::table::Value;
    use rust_xlsxwriter::Workbook;
    use std::{cell::RefCell, fs, path::PathBuf};
    use tempfile::tempdir;

    fn write_orders(path: &Path, rows: &[(&str, &str, f64)]) {
        let mut wb = Workbook::new();
        let ws = wb.add_worksheet();
        for (c, h) in ["descrizioneMateriale", "codiceMateriale", "quantity"]
            .iter()
            .enumerate()
        {
            ws.write_string(0, c as u16, *h).unwrap();
        }
        for (r, (descr, code, qty)) in rows.iter().enumerate() {
            let r = r as u32 + 1;
            ws.write_string(r, 0, *descr).unwrap();
            ws.write_string(r, 1, *code).unwrap();
            ws.write_number(r, 2, *qty).unwrap();
        }
        wb.save(path).unwrap();
    }

    fn setup() -> (tempfile::TempDir, StoreConfig, CentralRepository, PathBuf) {
        let tmp = tempdir().unwrap();
        let cfg = StoreConfig::in_dir(tmp.path().join("data"));
        let repo = CentralRepository::new(&cfg).unwrap();
        let src = tmp.path().join("ORDER001.xlsx");
        write_orders(
            &src,
            &[("Material A", "MAT001", 10.0), ("Material B", "MAT002", 5.0)],
        );
        (tmp, cfg, repo, src)
    }

    #[test]
    fn stages_run_in_order() {
        let (_tmp, cfg, repo, src) = setup();
        let seen = RefCell::new(Vec::new());
        let result = ImportPipeline::new(&repo, &cfg)
            .with_observer(|s| seen.borrow_mut().push(s))
            .run(&src, &ImportOptions::default())
            .unwrap();

        assert_eq!(
            seen.into_inner(),
            vec![
                ImportStage::Parsing,
                ImportStage::Normalizing,
                ImportStage::Identifying,
                ImportStage::Merging,
                ImportStage::Done
            ]
        );
        assert_eq!(result.rows_added, 2);
        assert_eq!(result.source, "ORDER001.xlsx");
        let ids: Vec<String> = result.identifiers.iter().map(|i| i.to_string()).collect();
        assert_eq!(ids, vec!["ORDER001-1", "ORDER001-2"]);
        assert!(result.snapshot.is_some());

        let stored = repo.read().unwrap();
        assert_eq!(stored.get(1, "orderCode"), Some(&Value::Text("ORDER001".into())));
        assert_eq!(stored.get(1, "quantity"), Some(&Value::Integer(5)));
    }

    #[test]
    fn failure_before_merge_leaves_store_alone() {
        let (tmp, cfg, repo, src) = setup();
        ImportPipeline::new(&repo, &cfg)
            .run(&src, &ImportOptions::default())
            .unwrap();
        let before = fs::read(repo.path()).unwrap();
        let snaps = repo.backups().list().unwrap().len();

        let bad = tmp.path().join("ORDER002.xlsx");
        fs::write(&bad, b"PK\x03\x04 truncated").unwrap();
        let seen = RefCell::new(Vec::new());
        let err = ImportPipeline::new(&repo, &cfg)
            .with_observer(|s| seen.borrow_mut().push(s))
            .run(&bad, &ImportOptions::default())
            .unwrap_err();

        assert!(matches!(err, StoreError::UnreadableSource { .. }));
        assert_eq!(
            seen.into_inner(),
            vec![ImportStage::Parsing, ImportStage::Failed]
        );
        assert_eq!(fs::read(repo.path()).unwrap(), before);
        assert_eq!(repo.backups().list().unwrap().len(), snaps);
    }

    #[test]
    fn original_name_sets_order_code() {
        let (tmp, cfg, repo, _src) = setup();
        let upload = tmp.path().join("a1b2c3.xlsx");
        write_orders(&upload, &[("Material C", "MAT003", 15.0)]);

        let options = ImportOptions {
            original_name: Some("ORDER777.xlsx".into()),
            ..Default::default()
        };
        let result = ImportPipeline::new(&repo, &cfg).run(&upload, &options).unwrap();
        assert_eq!(result.source, "ORDER777.xlsx");
        assert_eq!(result.identifiers[0].to_string(), "ORDER777-1");
    }

    #[test]
    fn post_merge_dedupe_reports_outcome() {
        let (_tmp, cfg, repo, src) = setup();
        let pipeline = ImportPipeline::new(&repo, &cfg);
        pipeline.run(&src, &ImportOptions::default()).unwrap();

        let options = ImportOptions {
            dedupe: Some(DedupeMode::Forceful),
            ..Default::default()
        };
        let second = pipeline.run(&src, &options).unwrap();
        assert_eq!(second.rows_added, 2);
        assert_eq!(second.dedupe, Some(DedupeOutcome::Removed { removed: 2 }));
        assert_eq!(repo.row_count().unwrap(), 2);
    }

    #[test]
    fn unsupported_extension_fails_in_parsing() {
        let (tmp, cfg, repo, _src) = setup();
        let csv = tmp.path().join("orders.csv");
        fs::write(&csv, "codiceMateriale\nMAT001\n").unwrap();
        let err = ImportPipeline::new(&repo, &cfg)
            .run(&csv, &ImportOptions::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedFileType { .. }));
        assert!(!repo.exists());
    }
}
