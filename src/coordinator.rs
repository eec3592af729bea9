//! Drives a single workbook import: recognise each sheet, parse it, persist
//! the rows, then reconcile the reference partition. Progress is reported
//! through a bounded channel that never blocks the import.

use crate::backfill::reconcile_partition;
use crate::classifier::classify_sheet;
use crate::error::{ImportError, Result as ImportResult};
use crate::field_mapper::ColumnMapping;
use crate::model::{ImportReport, ParseResult, Period, SheetKind, SheetRecognition, SheetStatus};
use crate::record_parser::{ParsedSheet, SheetPayload};
use crate::rules::RULES_VERSION;
use crate::snapshot_parser::ParsedSnapshots;
use crate::store::{ImportLogEntry, SheetMeta, SurveyStore};
use crate::workbook::{open_workbook, RawSheet, WorkbookSource};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const DEFAULT_PROGRESS_CAPACITY: usize = 100;
pub const PREVIEW_ROW_LIMIT: usize = 10;
const PREVIEW_ERROR_LIMIT: usize = 20;

fn default_true() -> bool {
    true
}

fn default_progress_capacity() -> usize {
    DEFAULT_PROGRESS_CAPACITY
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOptions {
    /// 导入前清空同年月的主表数据，每个年月只清一次。
    #[serde(default = "default_true")]
    pub clear_existing: bool,
    #[serde(default = "default_true")]
    pub update_current_period: bool,
    #[serde(default = "default_true")]
    pub calculate_fields: bool,
    #[serde(default = "default_progress_capacity")]
    pub progress_capacity: usize,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            clear_existing: true,
            update_current_period: true,
            calculate_fields: true,
            progress_capacity: DEFAULT_PROGRESS_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    Start,
    SheetStart,
    SheetDone,
    Info,
    Warning,
    Error,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: ProgressKind,
    pub message: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ImportReport>,
    pub timestamp: String,
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// 进度事件出口。通道满时丢弃事件，不阻塞导入。
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::Sender<ProgressEvent>>,
    dropped: Arc<AtomicUsize>,
}

impl ProgressSink {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self {
            tx: Some(tx),
            dropped: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 不接收任何事件。
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    fn send(&self, event: ProgressEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(kind = ?event.kind, "进度通道已满，丢弃事件");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    pub fn emit(&self, kind: ProgressKind, message: impl Into<String>, data: Value) {
        self.send(ProgressEvent {
            kind,
            message: message.into(),
            data,
            report: None,
            timestamp: now_rfc3339(),
        });
    }

    pub fn emit_done(&self, report: &ImportReport) {
        self.send(ProgressEvent {
            kind: ProgressKind::Done,
            message: format!(
                "导入完成: {} 个 Sheet, 成功 {} 行, 失败 {} 行",
                report.total_sheets, report.imported_rows, report.error_rows
            ),
            data: Value::Null,
            report: Some(report.clone()),
            timestamp: now_rfc3339(),
        });
    }
}

/// 单个 Sheet 的预览：识别结果、列映射与前几行解析样例。不写库。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetPreview {
    pub sheet_name: String,
    pub recognition: Option<SheetRecognition>,
    pub columns: Vec<String>,
    pub column_mapping: Option<ColumnMapping>,
    pub period: Option<Period>,
    pub parsed_rows: usize,
    pub error_rows: usize,
    pub errors: Vec<String>,
    pub sample_rows: Vec<Vec<String>>,
    pub sample_records: Vec<Value>,
    pub message: String,
}

struct ImportRun {
    import_id: String,
    file_name: String,
    report: ImportReport,
    cleared: HashSet<Period>,
}

fn import_status(report: &ImportReport) -> &'static str {
    if report.error_sheets == 0 {
        "success"
    } else if report.imported_sheets > 0 {
        "partial"
    } else {
        "failed"
    }
}

fn failed_result(sheet_name: &str, kind: SheetKind, err: &ImportError) -> ParseResult {
    let mut result = ParseResult::new(sheet_name, kind, SheetStatus::Error);
    result.message = err.to_string();
    result.errors.push(err.to_string());
    result
}

fn sample_values<T: Serialize>(items: &[T], limit: usize) -> Vec<Value> {
    items
        .iter()
        .take(limit)
        .filter_map(|item| serde_json::to_value(item).ok())
        .collect()
}

pub struct ImportCoordinator<S> {
    store: S,
}

impl<S: SurveyStore> ImportCoordinator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// 打开并导入工作簿文件。文件打不开时发出 error 事件，不发 done。
    pub fn import_file(
        &mut self,
        path: &Path,
        options: &ImportOptions,
        sink: &ProgressSink,
    ) -> ImportResult<ImportReport> {
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        sink.emit(
            ProgressKind::Start,
            format!("开始导入: {display_name}"),
            json!({ "filename": display_name, "rulesVersion": RULES_VERSION }),
        );
        let mut workbook = match open_workbook(path) {
            Ok(workbook) => workbook,
            Err(message) => {
                let err = ImportError::FileOpen {
                    path: path.to_string_lossy().to_string(),
                    message,
                };
                error!(path = %path.display(), error = %err, "打开工作簿失败");
                sink.emit(
                    ProgressKind::Error,
                    err.to_string(),
                    json!({ "category": err.category() }),
                );
                return Err(err);
            }
        };
        Ok(self.run_import(workbook.as_mut(), options, sink))
    }

    /// 导入已打开的工作簿。单个 Sheet 失败不影响其他 Sheet。
    pub fn import_workbook(
        &mut self,
        workbook: &mut dyn WorkbookSource,
        options: &ImportOptions,
        sink: &ProgressSink,
    ) -> ImportReport {
        sink.emit(
            ProgressKind::Start,
            format!("开始导入: {}", workbook.file_name()),
            json!({ "filename": workbook.file_name(), "rulesVersion": RULES_VERSION }),
        );
        self.run_import(workbook, options, sink)
    }

    fn run_import(
        &mut self,
        workbook: &mut dyn WorkbookSource,
        options: &ImportOptions,
        sink: &ProgressSink,
    ) -> ImportReport {
        let started = Instant::now();
        let mut run = ImportRun {
            import_id: Uuid::new_v4().to_string(),
            file_name: workbook.file_name().to_string(),
            report: ImportReport::default(),
            cleared: HashSet::new(),
        };
        run.report.import_id = run.import_id.clone();
        run.report.filename = run.file_name.clone();

        let mut log = ImportLogEntry {
            import_id: run.import_id.clone(),
            filename: run.file_name.clone(),
            file_size: workbook.file_size(),
            file_hash: workbook.fingerprint(),
            status: "running".to_string(),
            started_at: now_rfc3339(),
            finished_at: None,
            total_sheets: 0,
            imported_sheets: 0,
            total_rows: 0,
            imported_rows: 0,
            error_rows: 0,
            error_message: None,
        };
        let log_id = match self.store.create_import_log(&log) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "写入导入日志失败");
                None
            }
        };

        let sheet_names = workbook.sheet_names();
        info!(
            import_id = %run.import_id,
            file = %run.file_name,
            sheets = sheet_names.len(),
            "开始导入工作簿"
        );
        for sheet_name in &sheet_names {
            let result = self.process_sheet(workbook, sheet_name, options, sink, &mut run);
            run.report.record_sheet(result);
        }

        if let Some(period) = run.report.reference_period {
            self.finalize_period(period, options, sink);
        } else {
            sink.emit(
                ProgressKind::Warning,
                "未识别到主表数据年月，跳过派生字段计算",
                Value::Null,
            );
        }

        run.report.duration_ms = started.elapsed().as_millis() as u64;
        let status = import_status(&run.report);
        if let Some(log_id) = log_id {
            log.finish(&run.report, status, &now_rfc3339());
            if status == "failed" {
                log.error_message = run
                    .report
                    .sheets
                    .iter()
                    .find(|s| s.status == SheetStatus::Error)
                    .map(|s| s.message.clone());
            }
            if let Err(e) = self.store.finish_import_log(log_id, &log) {
                warn!(error = %e, "更新导入日志失败");
            }
        }

        info!(
            import_id = %run.import_id,
            status,
            imported_rows = run.report.imported_rows,
            error_rows = run.report.error_rows,
            duration_ms = run.report.duration_ms,
            "导入结束"
        );
        sink.emit_done(&run.report);
        run.report
    }

    fn finalize_period(&mut self, period: Period, options: &ImportOptions, sink: &ProgressSink) {
        if options.calculate_fields {
            sink.emit(
                ProgressKind::Info,
                format!("开始计算 {period} 派生字段"),
                json!({ "year": period.year, "month": period.month }),
            );
            match reconcile_partition(&mut self.store, period) {
                Ok(summary) => sink.emit(
                    ProgressKind::Info,
                    format!("派生字段计算完成，回填 {} 项", summary.total_fills()),
                    serde_json::to_value(&summary).unwrap_or(Value::Null),
                ),
                Err(e) => {
                    warn!(%period, error = %e, "派生字段计算失败");
                    sink.emit(
                        ProgressKind::Warning,
                        format!("派生字段计算失败: {e}"),
                        Value::Null,
                    );
                }
            }
        }
        if options.update_current_period {
            if let Err(e) = self.store.set_current_period(period) {
                warn!(%period, error = %e, "更新当前年月失败");
                sink.emit(
                    ProgressKind::Warning,
                    format!("更新当前年月失败: {e}"),
                    Value::Null,
                );
            }
        }
    }

    fn process_sheet(
        &mut self,
        workbook: &mut dyn WorkbookSource,
        sheet_name: &str,
        options: &ImportOptions,
        sink: &ProgressSink,
        run: &mut ImportRun,
    ) -> ParseResult {
        let started = Instant::now();
        sink.emit(
            ProgressKind::SheetStart,
            format!("开始处理 Sheet: {sheet_name}"),
            json!({ "sheetName": sheet_name }),
        );

        let mut result = match workbook.read_sheet(sheet_name) {
            Err(message) => {
                let err = ImportError::SheetRead {
                    sheet: sheet_name.to_string(),
                    message,
                };
                warn!(sheet = sheet_name, error = %err, "读取 Sheet 失败");
                sink.emit(ProgressKind::Warning, err.to_string(), Value::Null);
                failed_result(sheet_name, SheetKind::Unknown, &err)
            }
            Ok(grid) => match RawSheet::from_grid(sheet_name, grid) {
                None => {
                    let mut skipped =
                        ParseResult::new(sheet_name, SheetKind::Unknown, SheetStatus::Skipped);
                    skipped.message = "空 Sheet".to_string();
                    skipped
                }
                Some(sheet) => self.load_sheet(&sheet, options, sink, run),
            },
        };
        result.duration_ms = started.elapsed().as_millis() as u64;

        sink.emit(
            ProgressKind::SheetDone,
            format!("Sheet {sheet_name}: {}", result.status.as_str()),
            json!({
                "sheetName": sheet_name,
                "sheetType": result.sheet_kind.as_str(),
                "status": result.status.as_str(),
                "importedRows": result.imported_rows,
                "errorRows": result.error_rows,
            }),
        );
        result
    }

    fn load_sheet(
        &mut self,
        sheet: &RawSheet,
        options: &ImportOptions,
        sink: &ProgressSink,
        run: &mut ImportRun,
    ) -> ParseResult {
        let recognition = classify_sheet(&sheet.name, &sheet.header);
        let kind = recognition.kind;
        sink.emit(
            ProgressKind::Info,
            format!("识别 Sheet「{}」为 {}", sheet.name, kind.as_str()),
            json!({
                "sheetName": sheet.name,
                "sheetType": kind.as_str(),
                "confidence": recognition.confidence,
            }),
        );

        let payload = match kind.parse(sheet, &run.file_name) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(sheet = %sheet.name, error = %err, "解析 Sheet 失败");
                sink.emit(ProgressKind::Warning, err.to_string(), Value::Null);
                let result = failed_result(&sheet.name, kind, &err);
                self.write_sheet_meta(run, sheet, &recognition, &result, None);
                return result;
            }
        };

        match payload {
            SheetPayload::WholesaleRetail(parsed) => self.load_main(
                sheet,
                &recognition,
                parsed,
                S::insert_wholesale_retail,
                options,
                sink,
                run,
            ),
            SheetPayload::AccommodationCatering(parsed) => self.load_main(
                sheet,
                &recognition,
                parsed,
                S::insert_accommodation_catering,
                options,
                sink,
                run,
            ),
            SheetPayload::WholesaleRetailSnapshots(parsed) => self.load_snapshots(
                sheet,
                &recognition,
                parsed,
                S::insert_wholesale_retail_snapshots,
                sink,
                run,
            ),
            SheetPayload::AccommodationCateringSnapshots(parsed) => self.load_snapshots(
                sheet,
                &recognition,
                parsed,
                S::insert_accommodation_catering_snapshots,
                sink,
                run,
            ),
            SheetPayload::Skipped { reason } => {
                info!(sheet = %sheet.name, kind = kind.as_str(), %reason, "跳过 Sheet");
                sink.emit(
                    ProgressKind::Info,
                    format!("跳过 Sheet「{}」: {reason}", sheet.name),
                    Value::Null,
                );
                let mut result = ParseResult::new(&sheet.name, kind, SheetStatus::Skipped);
                result.period = recognition.period;
                result.message = reason;
                self.write_sheet_meta(run, sheet, &recognition, &result, None);
                result
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn load_main<R>(
        &mut self,
        sheet: &RawSheet,
        recognition: &SheetRecognition,
        parsed: ParsedSheet<R>,
        insert: fn(&mut S, &[R]) -> Result<usize, String>,
        options: &ImportOptions,
        sink: &ProgressSink,
        run: &mut ImportRun,
    ) -> ParseResult {
        let kind = recognition.kind;
        let period = parsed.period;
        if run.report.reference_period.is_none() {
            run.report.reference_period = Some(period);
            sink.emit(
                ProgressKind::Info,
                format!("数据年月: {period}"),
                json!({ "year": period.year, "month": period.month }),
            );
        }

        if options.clear_existing && run.cleared.insert(period) {
            match self.store.delete_partition(period) {
                Ok(deleted) => info!(%period, deleted, "已清空同年月旧数据"),
                Err(e) => {
                    warn!(%period, error = %e, "清空旧数据失败");
                    sink.emit(
                        ProgressKind::Warning,
                        format!("清空 {period} 旧数据失败: {e}"),
                        Value::Null,
                    );
                }
            }
        }

        let mut result = ParseResult::new(&sheet.name, kind, SheetStatus::Imported);
        result.period = Some(period);
        result.error_rows = parsed.row_errors.len();
        result.errors = parsed.row_errors;

        match insert(&mut self.store, &parsed.records) {
            Ok(inserted) => {
                result.imported_rows = inserted;
                result.message = format!("导入 {inserted} 行，跳过 {} 行", parsed.skipped_rows);
            }
            Err(e) => {
                warn!(sheet = %sheet.name, error = %e, "写入主表失败");
                sink.emit(
                    ProgressKind::Warning,
                    format!("Sheet「{}」写入失败: {e}", sheet.name),
                    Value::Null,
                );
                result.status = SheetStatus::Error;
                result.error_rows += parsed.records.len();
                result.errors.push(format!("写入失败: {e}"));
                result.message = e;
            }
        }

        self.write_sheet_meta(run, sheet, recognition, &result, Some(parsed.mapping));
        result
    }

    fn load_snapshots<T>(
        &mut self,
        sheet: &RawSheet,
        recognition: &SheetRecognition,
        parsed: ParsedSnapshots<T>,
        insert: fn(&mut S, &[T]) -> Result<usize, String>,
        sink: &ProgressSink,
        run: &mut ImportRun,
    ) -> ParseResult {
        let mut result = ParseResult::new(&sheet.name, recognition.kind, SheetStatus::Imported);
        result.period = Some(parsed.period);
        result.error_rows = parsed.row_errors.len();
        result.errors = parsed.row_errors;

        match insert(&mut self.store, &parsed.snapshots) {
            Ok(inserted) => {
                result.imported_rows = inserted;
                result.message = format!("导入快照 {inserted} 行");
            }
            Err(e) => {
                warn!(sheet = %sheet.name, error = %e, "写入快照失败");
                sink.emit(
                    ProgressKind::Warning,
                    format!("Sheet「{}」写入失败: {e}", sheet.name),
                    Value::Null,
                );
                result.status = SheetStatus::Error;
                result.error_rows += parsed.snapshots.len();
                result.errors.push(format!("写入失败: {e}"));
                result.message = e;
            }
        }

        self.write_sheet_meta(run, sheet, recognition, &result, None);
        result
    }

    fn write_sheet_meta(
        &mut self,
        run: &ImportRun,
        sheet: &RawSheet,
        recognition: &SheetRecognition,
        result: &ParseResult,
        column_mapping: Option<ColumnMapping>,
    ) {
        let meta = SheetMeta {
            import_id: run.import_id.clone(),
            sheet_name: sheet.name.clone(),
            sheet_kind: recognition.kind,
            confidence: recognition.confidence,
            period: result.period,
            status: result.status,
            row_count: sheet.rows.len(),
            imported_rows: result.imported_rows,
            columns: sheet.header.clone(),
            column_mapping,
            error_message: (result.status == SheetStatus::Error).then(|| result.message.clone()),
        };
        if let Err(e) = self.store.insert_sheet_meta(&meta) {
            warn!(sheet = %sheet.name, error = %e, "写入 Sheet 元信息失败");
        }
    }
}

/// 识别并试解析每个 Sheet，不写库。
pub fn preview_workbook(workbook: &mut dyn WorkbookSource) -> Vec<SheetPreview> {
    let names = workbook.sheet_names();
    let mut previews = Vec::with_capacity(names.len());
    for name in &names {
        previews.push(preview_sheet(workbook, name));
    }
    previews
}

fn preview_sheet(workbook: &mut dyn WorkbookSource, sheet_name: &str) -> SheetPreview {
    let mut preview = SheetPreview {
        sheet_name: sheet_name.to_string(),
        recognition: None,
        columns: Vec::new(),
        column_mapping: None,
        period: None,
        parsed_rows: 0,
        error_rows: 0,
        errors: Vec::new(),
        sample_rows: Vec::new(),
        sample_records: Vec::new(),
        message: String::new(),
    };
    let grid = match workbook.read_sheet(sheet_name) {
        Ok(grid) => grid,
        Err(message) => {
            preview.message = ImportError::SheetRead {
                sheet: sheet_name.to_string(),
                message,
            }
            .to_string();
            return preview;
        }
    };
    let Some(sheet) = RawSheet::from_grid(sheet_name, grid) else {
        preview.message = "空 Sheet".to_string();
        return preview;
    };

    let recognition = classify_sheet(&sheet.name, &sheet.header);
    preview.columns = sheet.header.clone();
    preview.sample_rows = sheet.preview_rows(PREVIEW_ROW_LIMIT).to_vec();
    preview.period = recognition.period;
    let payload = recognition.kind.parse(&sheet, workbook.file_name());
    preview.recognition = Some(recognition);

    match payload {
        Err(err) => preview.message = err.to_string(),
        Ok(SheetPayload::WholesaleRetail(parsed)) => {
            fill_main_preview(&mut preview, parsed);
        }
        Ok(SheetPayload::AccommodationCatering(parsed)) => {
            fill_main_preview(&mut preview, parsed);
        }
        Ok(SheetPayload::WholesaleRetailSnapshots(parsed)) => {
            fill_snapshot_preview(&mut preview, parsed);
        }
        Ok(SheetPayload::AccommodationCateringSnapshots(parsed)) => {
            fill_snapshot_preview(&mut preview, parsed);
        }
        Ok(SheetPayload::Skipped { reason }) => preview.message = reason,
    }
    preview
}

fn fill_main_preview<R: Serialize>(preview: &mut SheetPreview, parsed: ParsedSheet<R>) {
    preview.period = Some(parsed.period);
    preview.parsed_rows = parsed.records.len();
    preview.error_rows = parsed.row_errors.len();
    preview.sample_records = sample_values(&parsed.records, PREVIEW_ROW_LIMIT);
    preview.errors = parsed
        .row_errors
        .into_iter()
        .take(PREVIEW_ERROR_LIMIT)
        .collect();
    preview.column_mapping = Some(parsed.mapping);
}

fn fill_snapshot_preview<T: Serialize>(preview: &mut SheetPreview, parsed: ParsedSnapshots<T>) {
    preview.period = Some(parsed.period);
    preview.parsed_rows = parsed.snapshots.len();
    preview.error_rows = parsed.row_errors.len();
    preview.sample_records = sample_values(&parsed.snapshots, PREVIEW_ROW_LIMIT);
    preview.errors = parsed
        .row_errors
        .into_iter()
        .take(PREVIEW_ERROR_LIMIT)
        .collect();
}

/// 后台导入句柄：进度事件接收端，以及归还存储和导入结果的任务。
pub struct ImportHandle<S> {
    pub events: mpsc::Receiver<ProgressEvent>,
    pub join: JoinHandle<(S, ImportResult<ImportReport>)>,
}

/// 在阻塞线程池上导入文件。须在 tokio 运行时内调用。
pub fn spawn_file_import<S>(store: S, path: PathBuf, options: ImportOptions) -> ImportHandle<S>
where
    S: SurveyStore + Send + 'static,
{
    let (tx, events) = mpsc::channel(options.progress_capacity.max(1));
    let join = tokio::task::spawn_blocking(move || {
        let sink = ProgressSink::new(tx);
        let mut coordinator = ImportCoordinator::new(store);
        let result = coordinator.import_file(&path, &options, &sink);
        if sink.dropped() > 0 {
            debug!(dropped = sink.dropped(), "部分进度事件被丢弃");
        }
        (coordinator.into_store(), result)
    });
    ImportHandle { events, join }
}

pub fn spawn_workbook_import<S, W>(store: S, workbook: W, options: ImportOptions) -> ImportHandle<S>
where
    S: SurveyStore + Send + 'static,
    W: WorkbookSource + 'static,
{
    let (tx, events) = mpsc::channel(options.progress_capacity.max(1));
    let join = tokio::task::spawn_blocking(move || {
        let mut workbook = workbook;
        let sink = ProgressSink::new(tx);
        let mut coordinator = ImportCoordinator::new(store);
        let report = coordinator.import_workbook(&mut workbook, &options, &sink);
        (coordinator.into_store(), Ok(report))
    });
    ImportHandle { events, join }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::workbook::InMemoryWorkbook;

    fn dec_2025() -> Period {
        Period::new(2025, 12).expect("valid period")
    }

    fn wholesale_workbook() -> InMemoryWorkbook {
        InMemoryWorkbook::new("survey.xlsx").with_sheet(
            "批发",
            &[
                &[
                    "统一社会信用代码",
                    "单位详细名称",
                    "2025年12月销售额",
                    "2024年;12月;商品销售额;千元",
                    "12月销售额增速",
                    "2025年1-12月销售额",
                    "2024年;1-12月;商品销售额;千元",
                    "1-12月增速",
                ],
                &["91A", "甲公司", "", "100", "10", "", "1000", "20"],
            ],
        )
    }

    fn collect(rx: &mut mpsc::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn reconstructs_blank_current_values_from_rates() {
        let mut coordinator = ImportCoordinator::new(MemoryStore::new());
        let mut workbook = wholesale_workbook();
        let report =
            coordinator.import_workbook(&mut workbook, &ImportOptions::default(), &ProgressSink::disabled());

        assert_eq!(report.reference_period, Some(dec_2025()));
        assert_eq!(report.total_sheets, 1);
        assert_eq!(report.imported_sheets, 1);
        assert_eq!(report.imported_rows, 1);

        let records = coordinator
            .store()
            .load_wholesale_retail(dec_2025())
            .expect("load");
        assert_eq!(records.len(), 1);
        assert!((records[0].sales.current_month - 110.0).abs() < 1e-9);
        assert!((records[0].sales.current_cumulative - 1200.0).abs() < 1e-9);
        assert!((records[0].sales.month_rate.expect("month rate") - 10.0).abs() < 1e-9);
        assert_eq!(
            coordinator.store().current_period().expect("current"),
            Some(dec_2025())
        );
    }

    #[test]
    fn emits_ordered_events_ending_in_done() {
        let (tx, mut rx) = mpsc::channel(DEFAULT_PROGRESS_CAPACITY);
        let sink = ProgressSink::new(tx);
        let mut coordinator = ImportCoordinator::new(MemoryStore::new());
        let mut workbook = wholesale_workbook();
        coordinator.import_workbook(&mut workbook, &ImportOptions::default(), &sink);

        let events = collect(&mut rx);
        assert_eq!(events.first().map(|e| e.kind), Some(ProgressKind::Start));
        let last = events.last().expect("events");
        assert_eq!(last.kind, ProgressKind::Done);
        assert_eq!(last.report.as_ref().map(|r| r.imported_rows), Some(1));
        let start = events
            .iter()
            .position(|e| e.kind == ProgressKind::SheetStart)
            .expect("sheet start");
        let done = events
            .iter()
            .position(|e| e.kind == ProgressKind::SheetDone)
            .expect("sheet done");
        assert!(start < done);
        assert_eq!(events[0].data["rulesVersion"], RULES_VERSION);

        let json = serde_json::to_value(last).expect("serialize");
        assert_eq!(json["type"], "done");
        assert!(json["timestamp"].as_str().is_some());
    }

    #[test]
    fn full_channel_drops_events_without_blocking() {
        let (tx, mut rx) = mpsc::channel(1);
        let sink = ProgressSink::new(tx);
        let mut coordinator = ImportCoordinator::new(MemoryStore::new());
        let mut workbook = wholesale_workbook();
        let report = coordinator.import_workbook(&mut workbook, &ImportOptions::default(), &sink);

        assert_eq!(report.imported_rows, 1);
        assert!(sink.dropped() > 0);
        assert_eq!(collect(&mut rx).len(), 1);
    }

    #[test]
    fn unreadable_sheet_does_not_stop_other_sheets() {
        let mut workbook = InMemoryWorkbook::new("survey.xlsx")
            .with_unreadable_sheet("损坏", "格式错误")
            .with_sheet(
                "批发",
                &[
                    &["统一社会信用代码", "单位详细名称", "2025年12月销售额"],
                    &["91A", "甲公司", "50"],
                ],
            )
            .with_sheet("说明", &[&["填报说明"], &["请按要求填写"]]);
        let mut coordinator = ImportCoordinator::new(MemoryStore::new());
        let report =
            coordinator.import_workbook(&mut workbook, &ImportOptions::default(), &ProgressSink::disabled());

        assert_eq!(report.total_sheets, 3);
        assert_eq!(report.error_sheets, 1);
        assert_eq!(report.imported_sheets, 1);
        assert_eq!(report.skipped_sheets, 1);
        assert_eq!(report.sheets[0].status, SheetStatus::Error);
        assert!(report.sheets[0].message.contains("格式错误"));

        let logs = coordinator.store().import_logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, "partial");
        assert_eq!(logs[0].total_sheets, 3);
        let metas = coordinator.store().sheet_metas();
        assert_eq!(metas.len(), 2);
        assert_eq!(metas[0].status, SheetStatus::Imported);
        assert_eq!(metas[1].status, SheetStatus::Skipped);
    }

    #[test]
    fn snapshot_sheet_feeds_backfill_of_main_sheet() {
        let mut workbook = InMemoryWorkbook::new("survey.xlsx")
            .with_sheet(
                "2025年11月批零",
                &[
                    &[
                        "统一社会信用代码",
                        "单位详细名称",
                        "商品销售额-本年-本月",
                        "商品销售额-本年-1—本月",
                    ],
                    &["91A", "甲公司", "80", "1100"],
                ],
            )
            .with_sheet(
                "批发",
                &[
                    &["统一社会信用代码", "单位详细名称", "2025年1-12月销售额"],
                    &["91A", "甲公司", "1250"],
                ],
            );
        let mut coordinator = ImportCoordinator::new(MemoryStore::new());
        let report =
            coordinator.import_workbook(&mut workbook, &ImportOptions::default(), &ProgressSink::disabled());
        assert_eq!(report.imported_sheets, 2);
        assert_eq!(report.reference_period, Some(dec_2025()));

        let record = &coordinator
            .store()
            .load_wholesale_retail(dec_2025())
            .expect("load")[0];
        assert_eq!(record.sales.prev_month, 80.0);
        assert_eq!(record.sales.prev_cumulative, 1100.0);
        assert_eq!(record.sales.current_month, 150.0);
    }

    #[test]
    fn reimport_replaces_partition_once_per_period() {
        let mut coordinator = ImportCoordinator::new(MemoryStore::new());
        let options = ImportOptions::default();
        let sink = ProgressSink::disabled();
        coordinator.import_workbook(&mut wholesale_workbook(), &options, &sink);
        coordinator.import_workbook(&mut wholesale_workbook(), &options, &sink);
        assert_eq!(
            coordinator
                .store()
                .load_wholesale_retail(dec_2025())
                .expect("load")
                .len(),
            1
        );

        let mut two_sheets = InMemoryWorkbook::new("b.xlsx")
            .with_sheet(
                "批发",
                &[
                    &["统一社会信用代码", "单位详细名称", "2025年12月销售额"],
                    &["91A", "甲公司", "50"],
                ],
            )
            .with_sheet(
                "零售",
                &[
                    &["统一社会信用代码", "单位详细名称", "2025年12月零售额"],
                    &["91B", "乙公司", "30"],
                ],
            );
        coordinator.import_workbook(&mut two_sheets, &options, &sink);
        assert_eq!(
            coordinator
                .store()
                .load_wholesale_retail(dec_2025())
                .expect("load")
                .len(),
            2
        );
    }

    #[test]
    fn missing_file_emits_error_without_done() {
        let (tx, mut rx) = mpsc::channel(DEFAULT_PROGRESS_CAPACITY);
        let sink = ProgressSink::new(tx);
        let mut coordinator = ImportCoordinator::new(MemoryStore::new());
        let path = std::env::temp_dir().join(format!("missing_{}.xlsx", Uuid::new_v4()));
        let err = coordinator
            .import_file(&path, &ImportOptions::default(), &sink)
            .expect_err("missing file");
        assert_eq!(err.category(), "FILE_OPEN_ERROR");

        let kinds = collect(&mut rx).into_iter().map(|e| e.kind).collect::<Vec<_>>();
        assert_eq!(kinds, vec![ProgressKind::Start, ProgressKind::Error]);
    }

    #[test]
    fn preview_does_not_touch_store() {
        let mut workbook = wholesale_workbook();
        let previews = preview_workbook(&mut workbook);
        assert_eq!(previews.len(), 1);
        let preview = &previews[0];
        assert_eq!(
            preview.recognition.as_ref().map(|r| r.kind),
            Some(SheetKind::WholesaleRetail)
        );
        assert_eq!(preview.period, Some(dec_2025()));
        assert_eq!(preview.parsed_rows, 1);
        assert_eq!(preview.sample_rows.len(), 1);
        assert!(preview
            .column_mapping
            .as_ref()
            .is_some_and(|m| m.values().any(|f| f.canonical_name == "sales_last_year_month")));
    }

    #[test]
    fn options_default_when_fields_are_missing() {
        let options: ImportOptions =
            serde_json::from_value(json!({ "clearExisting": false })).expect("options");
        assert!(!options.clear_existing);
        assert!(options.calculate_fields);
        assert_eq!(options.progress_capacity, DEFAULT_PROGRESS_CAPACITY);
    }

    #[tokio::test]
    async fn background_import_streams_events_until_done() {
        let handle = spawn_workbook_import(
            MemoryStore::new(),
            wholesale_workbook(),
            ImportOptions::default(),
        );
        let mut events = handle.events;
        let mut kinds = Vec::new();
        while let Some(event) = events.recv().await {
            kinds.push(event.kind);
        }
        let (store, result) = handle.join.await.expect("join");
        let report = result.expect("report");

        assert_eq!(kinds.last(), Some(&ProgressKind::Done));
        assert_eq!(report.imported_rows, 1);
        assert_eq!(store.load_wholesale_retail(dec_2025()).expect("load").len(), 1);
    }
}
