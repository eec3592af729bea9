pub mod backfill;
pub mod classifier;
pub mod coordinator;
pub mod error;
pub mod field_mapper;
pub mod model;
pub mod normalize;
pub mod rates;
pub mod record_parser;
pub mod rules;
pub mod snapshot_parser;
pub mod sqlite_store;
pub mod store;
pub mod workbook;

use tracing_subscriber::{fmt, EnvFilter};

pub use backfill::{reconcile_partition, run_cascade, BackfillSummary, SnapshotIndex};
pub use classifier::classify_sheet;
pub use coordinator::{
    preview_workbook, spawn_file_import, spawn_workbook_import, ImportCoordinator, ImportHandle,
    ImportOptions, ProgressEvent, ProgressKind, ProgressSink, SheetPreview,
};
pub use error::ImportError;
pub use field_mapper::{CanonicalField, ColumnMapping, FieldMapper, FieldMapping};
pub use model::{
    AccommodationCateringRecord, AccommodationCateringSnapshot, ImportReport, Metric, ParseResult,
    Period, SheetKind, SheetRecognition, SheetStatus, TimeDimension, WholesaleRetailRecord,
    WholesaleRetailSnapshot,
};
pub use normalize::{extract_year_month, infer_time_dimension, normalize_column_name};
pub use rates::{apply_derived_rates, apply_manual_edit, growth_rate, reset_partition_to_original};
pub use sqlite_store::SqliteStore;
pub use store::{MemoryStore, PeriodStat, SurveyStore};
pub use workbook::{open_workbook, CalamineWorkbook, CsvWorkbook, InMemoryWorkbook, WorkbookSource};

/// 日志写到 stderr，级别取自 RUST_LOG，默认 info。重复调用无副作用。
pub fn init_tracing() {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_writer(std::io::stderr)
        .try_init();
}
