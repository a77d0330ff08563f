// src/lib.rs

pub mod backup;
pub mod config;
pub mod error;
pub mod fsutil;
pub mod import;
pub mod repository;
pub mod service;
pub mod table;

pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use import::{ImportOptions, ImportResult, ImportStage, RecordId};
pub use repository::{CentralRepository, DedupeMode, DedupeOutcome, DedupeProposal};
pub use service::SisManager;
