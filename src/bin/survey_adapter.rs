use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::env;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use survey_ingest::model::RecordFamily;
use survey_ingest::{
    apply_manual_edit, init_tracing, open_workbook, preview_workbook, reconcile_partition,
    reset_partition_to_original, spawn_file_import, ImportError, ImportOptions, Metric, Period,
    SqliteStore, SurveyStore,
};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Deserialize)]
struct AdapterRequest {
    schema_version: u64,
    case: Option<AdapterCaseMeta>,
    endpoint: AdapterEndpoint,
    #[serde(default)]
    query: Value,
    dataset: AdapterDataset,
}

#[derive(Debug, Deserialize)]
struct AdapterCaseMeta {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AdapterEndpoint {
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AdapterDataset {
    db_path: Option<String>,
}

#[derive(Debug, Serialize)]
struct AdapterErrorBody {
    category: String,
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status")]
enum AdapterResponse {
    #[serde(rename = "success")]
    Success { payload: Value },
    #[serde(rename = "error")]
    Error { error: AdapterErrorBody },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportQuery {
    file_path: String,
    #[serde(default)]
    options: Option<ImportOptions>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreviewQuery {
    file_path: String,
}

#[derive(Debug, Default, Deserialize)]
struct PeriodQuery {
    year: Option<i32>,
    month: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct EditQuery {
    year: Option<i32>,
    month: Option<u32>,
    family: RecordFamily,
    id: i64,
    metric: Metric,
    value: f64,
}

#[derive(Error, Debug)]
enum AdapterError {
    #[error("{0}")]
    Protocol(String),

    #[error("unsupported endpoint path: {0}")]
    UnsupportedEndpoint(String),

    #[error("{0}")]
    Runtime(String),

    #[error(transparent)]
    Import(#[from] ImportError),
}

impl AdapterError {
    fn category(&self) -> &'static str {
        match self {
            AdapterError::Protocol(_) => "ADAPTER_PROTOCOL_ERROR",
            AdapterError::UnsupportedEndpoint(_) => "UNSUPPORTED_ENDPOINT",
            AdapterError::Runtime(_) => "ADAPTER_RUNTIME_ERROR",
            AdapterError::Import(err) => err.category(),
        }
    }
}

type AdapterResult<T> = Result<T, AdapterError>;

fn error_response(
    category: impl Into<String>,
    message: impl Into<String>,
    error_type: impl Into<String>,
) -> AdapterResponse {
    AdapterResponse::Error {
        error: AdapterErrorBody {
            category: category.into(),
            message: message.into(),
            error_type: error_type.into(),
        },
    }
}

fn parse_bool_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|arg| arg == flag)
}

fn read_stdin_json() -> AdapterResult<Value> {
    let mut raw = String::new();
    io::stdin()
        .read_to_string(&mut raw)
        .map_err(|e| AdapterError::Protocol(format!("读取 stdin 失败: {e}")))?;
    if raw.trim().is_empty() {
        return Err(AdapterError::Protocol("empty stdin request".to_string()));
    }
    serde_json::from_str::<Value>(&raw)
        .map_err(|e| AdapterError::Protocol(format!("invalid JSON request: {e}")))
}

fn query_as<T: for<'de> Deserialize<'de>>(query: Value, endpoint: &str) -> AdapterResult<T> {
    let query = if query.is_null() { json!({}) } else { query };
    serde_json::from_value(query).map_err(|e| {
        let msg = e.to_string();
        if msg.contains("missing field") {
            AdapterError::Import(ImportError::Validation(format!(
                "缺少字段 ({endpoint}): {msg}"
            )))
        } else {
            AdapterError::Protocol(format!("request.query invalid for {endpoint}: {msg}"))
        }
    })
}

fn open_store(db_path: &Path) -> AdapterResult<SqliteStore> {
    Ok(SqliteStore::open(db_path).map_err(ImportError::Store)?)
}

/// 请求未给年月时使用库里记录的当前年月。
fn resolve_period(
    store: &SqliteStore,
    year: Option<i32>,
    month: Option<u32>,
) -> AdapterResult<Period> {
    let period = match (year, month) {
        (Some(year), Some(month)) => Period::new(year, month)
            .ok_or_else(|| ImportError::Validation(format!("年月不合法: {year}-{month}")))?,
        (None, None) => store
            .current_period()
            .map_err(ImportError::Store)?
            .ok_or_else(|| ImportError::NoData("未设置当前年月".to_string()))?,
        _ => return Err(ImportError::Validation("year 与 month 必填".to_string()).into()),
    };
    Ok(period)
}

fn to_payload<T: Serialize>(value: &T) -> AdapterResult<Value> {
    serde_json::to_value(value).map_err(|e| AdapterError::Runtime(format!("序列化结果失败: {e}")))
}

fn run_import(db_path: &Path, query: ImportQuery) -> AdapterResult<Value> {
    let store = open_store(db_path)?;
    let options = query.options.unwrap_or_default();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| AdapterError::Runtime(format!("创建运行时失败: {e}")))?;
    let (events, joined) = runtime.block_on(async move {
        let mut handle = spawn_file_import(store, PathBuf::from(query.file_path), options);
        let mut events = Vec::new();
        while let Some(event) = handle.events.recv().await {
            events.push(event);
        }
        (events, handle.join.await)
    });
    let (_store, report) =
        joined.map_err(|e| AdapterError::Runtime(format!("导入任务异常退出: {e}")))?;
    let report = report?;
    Ok(json!({
        "report": to_payload(&report)?,
        "events": to_payload(&events)?,
    }))
}

fn missing_record(id: i64) -> AdapterError {
    ImportError::NoData(format!("记录不存在: {id}")).into()
}

fn run_edit(store: &mut SqliteStore, query: EditQuery) -> AdapterResult<Value> {
    let period = resolve_period(store, query.year, query.month)?;
    match query.family {
        RecordFamily::WholesaleRetail => {
            let mut records = store
                .load_wholesale_retail(period)
                .map_err(ImportError::Store)?;
            let record = records
                .iter_mut()
                .find(|r| r.id == Some(query.id))
                .ok_or_else(|| missing_record(query.id))?;
            apply_manual_edit(record, query.metric, query.value)?;
            let updated = record.clone();
            store
                .update_wholesale_retail(std::slice::from_ref(&updated))
                .map_err(ImportError::Store)?;
            to_payload(&updated)
        }
        RecordFamily::AccommodationCatering => {
            let mut records = store
                .load_accommodation_catering(period)
                .map_err(ImportError::Store)?;
            let record = records
                .iter_mut()
                .find(|r| r.id == Some(query.id))
                .ok_or_else(|| missing_record(query.id))?;
            apply_manual_edit(record, query.metric, query.value)?;
            let updated = record.clone();
            store
                .update_accommodation_catering(std::slice::from_ref(&updated))
                .map_err(ImportError::Store)?;
            to_payload(&updated)
        }
    }
}

fn dispatch(req: AdapterRequest) -> AdapterResult<Value> {
    if req.schema_version != 1 {
        return Err(AdapterError::Protocol(format!(
            "unsupported schema_version: {}",
            req.schema_version
        )));
    }

    let path = req
        .endpoint
        .path
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AdapterError::Protocol("request.endpoint.path missing".to_string()))?;
    let db_path = req
        .dataset
        .db_path
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AdapterError::Protocol("request.dataset.db_path missing".to_string()))?;
    let db_path = Path::new(db_path);

    match path {
        "/import" => run_import(db_path, query_as(req.query, "import")?),
        "/preview" => {
            let query: PreviewQuery = query_as(req.query, "preview")?;
            let mut workbook =
                open_workbook(Path::new(&query.file_path)).map_err(|message| {
                    ImportError::FileOpen {
                        path: query.file_path.clone(),
                        message,
                    }
                })?;
            to_payload(&preview_workbook(workbook.as_mut()))
        }
        "/backfill" => {
            let query: PeriodQuery = query_as(req.query, "backfill")?;
            let mut store = open_store(db_path)?;
            let period = resolve_period(&store, query.year, query.month)?;
            let summary = reconcile_partition(&mut store, period).map_err(ImportError::Store)?;
            to_payload(&summary)
        }
        "/periods" => {
            let store = open_store(db_path)?;
            let current = store.current_period().map_err(ImportError::Store)?;
            let periods = store.list_periods().map_err(ImportError::Store)?;
            Ok(json!({
                "current": to_payload(&current)?,
                "periods": to_payload(&periods)?,
            }))
        }
        "/reset" => {
            let query: PeriodQuery = query_as(req.query, "reset")?;
            let mut store = open_store(db_path)?;
            let period = resolve_period(&store, query.year, query.month)?;
            let updated =
                reset_partition_to_original(&mut store, period).map_err(ImportError::Store)?;
            Ok(json!({ "period": to_payload(&period)?, "updated": updated }))
        }
        "/edit" => {
            let query: EditQuery = query_as(req.query, "edit")?;
            let mut store = open_store(db_path)?;
            run_edit(&mut store, query)
        }
        _ => Err(AdapterError::UnsupportedEndpoint(path.to_string())),
    }
}

fn main() {
    let args = env::args().skip(1).collect::<Vec<_>>();
    let pretty = parse_bool_flag(&args, "--pretty");
    let verbose = parse_bool_flag(&args, "--verbose");
    if verbose {
        init_tracing();
    }

    let resp = match read_stdin_json()
        .and_then(|v| {
            serde_json::from_value::<AdapterRequest>(v)
                .map_err(|e| AdapterError::Protocol(format!("request root invalid: {e}")))
        })
        .and_then(|req| {
            if verbose {
                let case_id = req.case.as_ref().and_then(|c| c.id.as_deref()).unwrap_or("-");
                info!(
                    case = case_id,
                    endpoint = req.endpoint.path.as_deref().unwrap_or("-"),
                    db = req.dataset.db_path.as_deref().unwrap_or("-"),
                    "survey_adapter request"
                );
            }
            dispatch(req)
        }) {
        Ok(payload) => AdapterResponse::Success { payload },
        Err(err) => error_response(err.category(), err.to_string(), "AdapterError"),
    };

    let out = if pretty {
        serde_json::to_string_pretty(&resp)
    } else {
        serde_json::to_string(&resp)
    }
    .unwrap_or_else(|e| {
        json!({
            "status": "error",
            "error": {
                "category": "ADAPTER_PROTOCOL_ERROR",
                "message": format!("serialize response failed: {e}"),
                "type": "SerializeError",
            }
        })
        .to_string()
    });

    print!("{out}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_db() -> PathBuf {
        std::env::temp_dir().join(format!(
            "survey_adapter_test_{}_{}.db",
            std::process::id(),
            Uuid::new_v4()
        ))
    }

    fn request(path: &str, db_path: &Path, query: Value) -> AdapterRequest {
        serde_json::from_value(json!({
            "schema_version": 1,
            "case": { "id": "t" },
            "endpoint": { "path": path },
            "query": query,
            "dataset": { "db_path": db_path.to_string_lossy() },
        }))
        .expect("request")
    }

    fn category_of(req: AdapterRequest) -> &'static str {
        dispatch(req).expect_err("request should fail").category()
    }

    #[test]
    fn protocol_errors_are_classified_without_touching_the_store() {
        let db = temp_db();
        assert_eq!(
            category_of(request("/nope", &db, Value::Null)),
            "UNSUPPORTED_ENDPOINT"
        );
        let mut req = request("/periods", &db, Value::Null);
        req.schema_version = 2;
        assert_eq!(category_of(req), "ADAPTER_PROTOCOL_ERROR");
        assert_eq!(
            category_of(request("/reset", &db, json!({ "year": "x" }))),
            "ADAPTER_PROTOCOL_ERROR"
        );
        assert!(!db.exists());
    }

    #[test]
    fn request_errors_carry_import_categories() {
        let db = temp_db();
        assert_eq!(
            category_of(request("/reset", &db, Value::Null)),
            "NO_DATA_ERROR"
        );
        assert_eq!(
            category_of(request("/backfill", &db, json!({ "year": 2025 }))),
            "VALIDATION_ERROR"
        );
        assert_eq!(
            category_of(request("/backfill", &db, json!({ "year": 2025, "month": 13 }))),
            "VALIDATION_ERROR"
        );
        assert_eq!(
            category_of(request("/edit", &db, json!({ "id": 1 }))),
            "VALIDATION_ERROR"
        );
        assert_eq!(
            category_of(request(
                "/edit",
                &db,
                json!({
                    "year": 2025,
                    "month": 12,
                    "family": "wholesale_retail",
                    "id": 99,
                    "metric": "sales",
                    "value": 1.0,
                }),
            )),
            "NO_DATA_ERROR"
        );
        let missing = std::env::temp_dir().join(format!("missing_{}.xlsx", Uuid::new_v4()));
        assert_eq!(
            category_of(request(
                "/preview",
                &db,
                json!({ "filePath": missing.to_string_lossy() }),
            )),
            "FILE_OPEN_ERROR"
        );
        let _ = std::fs::remove_file(&db);
    }

    #[test]
    fn current_period_backs_requests_without_year_and_month() {
        let db = temp_db();
        {
            let mut store = SqliteStore::open(&db).expect("open store");
            store
                .set_current_period(Period::new(2025, 12).expect("period"))
                .expect("set period");
        }
        let payload = dispatch(request("/reset", &db, Value::Null)).expect("reset");
        assert_eq!(payload["updated"], 0);
        let payload = dispatch(request("/periods", &db, Value::Null)).expect("periods");
        assert!(payload["current"].is_object());
        let _ = std::fs::remove_file(&db);
    }
}
