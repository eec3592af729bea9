use crate::model::{
    AccommodationCateringRecord, AccommodationCateringSnapshot, CanonicalRecord, CategoryField,
    Period, RecordFamily, SnapshotRecord, TimeDimension, WholesaleRetailRecord,
    WholesaleRetailSnapshot,
};
use crate::store::{
    empty_stat, ImportLogEntry, PeriodStat, SheetMeta, SurveyStore, CONFIG_CURRENT_MONTH,
    CONFIG_CURRENT_YEAR,
};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// 内嵌的建表脚本，按版本号升序执行。
struct Migration {
    version: &'static str,
    sql: &'static str,
}

const SCHEMA: &[Migration] = &[Migration {
    version: "0001_init",
    sql: include_str!("../db/migrations/0001_init.sql"),
}];

/// 一次打开数据库时完成的迁移。
#[derive(Debug, Clone, Default)]
pub struct SchemaUpgrade {
    pub applied: Vec<&'static str>,
    pub already_current: usize,
}

fn sql_checksum(sql: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(sql.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn ensure_migration_table(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version TEXT PRIMARY KEY,
            checksum TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("初始化 schema_migrations 失败: {e}"))
}

/// 已记录的版本及其脚本摘要。
fn recorded_checksums(conn: &Connection) -> Result<HashMap<String, String>, String> {
    let mut stmt = conn
        .prepare("SELECT version, checksum FROM schema_migrations")
        .map_err(|e| format!("读取已应用迁移失败: {e}"))?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .map_err(|e| format!("读取已应用迁移失败: {e}"))?;
    rows.collect::<rusqlite::Result<HashMap<_, _>>>()
        .map_err(|e| format!("读取已应用迁移失败: {e}"))
}

/// 找出尚未执行的迁移。已执行的脚本内容若被改动则报错。
fn pending_migrations(conn: &Connection) -> Result<Vec<&'static Migration>, String> {
    let recorded = recorded_checksums(conn)?;
    let mut pending = Vec::new();
    for migration in SCHEMA {
        match recorded.get(migration.version) {
            Some(checksum) if *checksum != sql_checksum(migration.sql) => {
                return Err(format!(
                    "迁移 {} 已应用但脚本内容已变更",
                    migration.version
                ));
            }
            Some(_) => {}
            None => pending.push(migration),
        }
    }
    Ok(pending)
}

fn apply_migration(conn: &mut Connection, migration: &Migration) -> Result<(), String> {
    let version = migration.version;
    let tx = conn
        .transaction()
        .map_err(|e| format!("开始迁移事务失败 ({version}): {e}"))?;
    tx.execute_batch(migration.sql)
        .map_err(|e| format!("执行迁移失败 ({version}): {e}"))?;
    tx.execute(
        "INSERT INTO schema_migrations(version, checksum) VALUES (?1, ?2)",
        params![version, sql_checksum(migration.sql)],
    )
    .map_err(|e| format!("写入 schema_migrations 失败 ({version}): {e}"))?;
    tx.commit()
        .map_err(|e| format!("提交迁移事务失败 ({version}): {e}"))
}

fn upgrade_schema(conn: &mut Connection) -> Result<SchemaUpgrade, String> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|e| format!("设置 foreign_keys 失败: {e}"))?;
    ensure_migration_table(conn)?;
    let pending = pending_migrations(conn)?;
    let mut upgrade = SchemaUpgrade {
        applied: Vec::with_capacity(pending.len()),
        already_current: SCHEMA.len() - pending.len(),
    };
    for migration in pending {
        apply_migration(conn, migration)?;
        upgrade.applied.push(migration.version);
    }
    Ok(upgrade)
}

fn record_table(family: RecordFamily) -> &'static str {
    match family {
        RecordFamily::WholesaleRetail => "wholesale_retail",
        RecordFamily::AccommodationCatering => "accommodation_catering",
    }
}

fn snapshot_table(family: RecordFamily) -> &'static str {
    match family {
        RecordFamily::WholesaleRetail => "wholesale_retail_snapshots",
        RecordFamily::AccommodationCatering => "accommodation_catering_snapshots",
    }
}

fn real(v: f64) -> Value {
    Value::Real(v)
}

fn opt_real(v: Option<f64>) -> Value {
    v.map(Value::Real).unwrap_or(Value::Null)
}

fn record_columns<R: CanonicalRecord>() -> Vec<String> {
    let mut cols = [
        "data_year",
        "data_month",
        "credit_code",
        "name",
        "industry_code",
        "industry_type",
        "company_scale",
        "row_no",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect::<Vec<_>>();
    for metric in R::FAMILY.metrics() {
        let m = metric.as_str();
        for dim in TimeDimension::ALL {
            cols.push(format!("{m}_{}", dim.as_str()));
        }
        cols.push(format!("{m}_month_rate"));
        cols.push(format!("{m}_cumulative_rate"));
        cols.push(format!("original_{m}_current_month"));
    }
    if R::FAMILY == RecordFamily::WholesaleRetail {
        cols.push("retail_ratio".to_string());
    }
    for cat in CategoryField::ALL {
        cols.push(cat.as_str().to_string());
    }
    for c in [
        "is_small_micro",
        "is_eat_wear_use",
        "first_report_ip",
        "fill_ip",
        "network_sales",
        "opening_year",
        "opening_month",
        "source_sheet",
        "source_file",
    ] {
        cols.push(c.to_string());
    }
    cols
}

fn record_values<R: CanonicalRecord>(record: &R) -> Vec<Value> {
    let identity = record.identity();
    let period = record.period();
    let mut values = vec![
        Value::Integer(i64::from(period.year)),
        Value::Integer(i64::from(period.month)),
        Value::Text(identity.credit_code.clone()),
        Value::Text(identity.name.clone()),
        Value::Text(identity.industry_code.clone()),
        Value::Text(identity.industry_type.clone()),
        Value::Integer(identity.company_scale),
        Value::Integer(identity.row_no as i64),
    ];
    for metric in R::FAMILY.metrics() {
        let series = record.series(*metric).cloned().unwrap_or_default();
        for dim in TimeDimension::ALL {
            values.push(real(series.get(dim)));
        }
        values.push(opt_real(series.month_rate));
        values.push(opt_real(series.cumulative_rate));
        values.push(opt_real(series.original_current_month));
    }
    if R::FAMILY == RecordFamily::WholesaleRetail {
        values.push(opt_real(record.retail_ratio()));
    }
    for cat in CategoryField::ALL {
        values.push(real(record.categories().get(cat)));
    }
    let flags = record.flags();
    let extra = record.extra();
    values.push(Value::Integer(i64::from(flags.is_small_micro)));
    values.push(Value::Integer(i64::from(flags.is_eat_wear_use)));
    values.push(Value::Text(extra.first_report_ip.clone()));
    values.push(Value::Text(extra.fill_ip.clone()));
    values.push(real(extra.network_sales));
    values.push(extra.opening_year.map(Value::Integer).unwrap_or(Value::Null));
    values.push(extra.opening_month.map(Value::Integer).unwrap_or(Value::Null));
    values.push(Value::Text(record.source_sheet().to_string()));
    values.push(Value::Text(record.source_file().to_string()));
    values
}

fn period_from_row(row: &Row<'_>, year_col: &str, month_col: &str) -> rusqlite::Result<Period> {
    let year = row.get::<_, i64>(year_col)?;
    let month = row.get::<_, i64>(month_col)?;
    i32::try_from(year)
        .ok()
        .zip(u32::try_from(month).ok())
        .and_then(|(y, m)| Period::new(y, m))
        .ok_or_else(|| rusqlite::Error::InvalidColumnType(0, month_col.to_string(), Type::Integer))
}

fn record_from_row<R: CanonicalRecord>(row: &Row<'_>) -> rusqlite::Result<R> {
    let period = period_from_row(row, "data_year", "data_month")?;
    let source_sheet = row.get::<_, String>("source_sheet")?;
    let source_file = row.get::<_, String>("source_file")?;
    let mut record = R::blank(period, &source_sheet, &source_file);
    record.set_id(row.get::<_, i64>("id")?);

    {
        let identity = record.identity_mut();
        identity.credit_code = row.get("credit_code")?;
        identity.name = row.get("name")?;
        identity.industry_code = row.get("industry_code")?;
        identity.industry_type = row.get("industry_type")?;
        identity.company_scale = row.get("company_scale")?;
        identity.row_no = row.get::<_, i64>("row_no")?.max(0) as usize;
    }

    for metric in R::FAMILY.metrics() {
        let m = metric.as_str();
        let Some(series) = record.series_mut(*metric) else {
            continue;
        };
        for dim in TimeDimension::ALL {
            *series.slot_mut(dim) = row.get(format!("{m}_{}", dim.as_str()).as_str())?;
        }
        series.month_rate = row.get(format!("{m}_month_rate").as_str())?;
        series.cumulative_rate = row.get(format!("{m}_cumulative_rate").as_str())?;
        series.original_current_month =
            row.get(format!("original_{m}_current_month").as_str())?;
    }
    if R::FAMILY == RecordFamily::WholesaleRetail {
        record.set_retail_ratio(row.get("retail_ratio")?);
    }
    for cat in CategoryField::ALL {
        *record.categories_mut().slot_mut(cat) = row.get(cat.as_str())?;
    }
    {
        let flags = record.flags_mut();
        flags.is_small_micro = row.get::<_, i64>("is_small_micro")? != 0;
        flags.is_eat_wear_use = row.get::<_, i64>("is_eat_wear_use")? != 0;
    }
    let extra = record.extra_mut();
    extra.first_report_ip = row.get("first_report_ip")?;
    extra.fill_ip = row.get("fill_ip")?;
    extra.network_sales = row.get("network_sales")?;
    extra.opening_year = row.get("opening_year")?;
    extra.opening_month = row.get("opening_month")?;
    Ok(record)
}

fn snapshot_columns<S: SnapshotRecord>() -> Vec<String> {
    let mut cols = [
        "snapshot_year",
        "snapshot_month",
        "snapshot_name",
        "credit_code",
        "name",
        "industry_code",
        "company_scale",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect::<Vec<_>>();
    for metric in S::METRICS {
        let m = metric.as_str();
        cols.push(format!("{m}_current_month"));
        cols.push(format!("{m}_current_cumulative"));
        cols.push(format!("{m}_last_year_month"));
        cols.push(format!("{m}_last_year_cumulative"));
    }
    if S::FAMILY == RecordFamily::WholesaleRetail {
        for cat in CategoryField::ALL {
            cols.push(cat.as_str().to_string());
        }
    }
    cols.push("source_sheet".to_string());
    cols
}

fn snapshot_values<S: SnapshotRecord>(snapshot: &S) -> Vec<Value> {
    let identity = snapshot.identity();
    let period = snapshot.period();
    let mut values = vec![
        Value::Integer(i64::from(period.year)),
        Value::Integer(i64::from(period.month)),
        Value::Text(snapshot.snapshot_name().to_string()),
        Value::Text(identity.credit_code.clone()),
        Value::Text(identity.name.clone()),
        Value::Text(identity.industry_code.clone()),
        Value::Integer(identity.company_scale),
    ];
    for metric in S::METRICS {
        let figures = snapshot.figures(*metric).cloned().unwrap_or_default();
        values.push(real(figures.current_month));
        values.push(real(figures.current_cumulative));
        values.push(opt_real(figures.last_year_month));
        values.push(opt_real(figures.last_year_cumulative));
    }
    if S::FAMILY == RecordFamily::WholesaleRetail {
        let categories = snapshot.categories().cloned().unwrap_or_default();
        for cat in CategoryField::ALL {
            values.push(real(categories.get(cat)));
        }
    }
    values.push(Value::Text(snapshot.source_sheet().to_string()));
    values
}

fn snapshot_from_row<S: SnapshotRecord>(row: &Row<'_>) -> rusqlite::Result<S> {
    let period = period_from_row(row, "snapshot_year", "snapshot_month")?;
    let source_sheet = row.get::<_, String>("source_sheet")?;
    let mut snapshot = S::blank(period, &source_sheet);
    snapshot.set_id(row.get::<_, i64>("id")?);
    {
        let identity = snapshot.identity_mut();
        identity.credit_code = row.get("credit_code")?;
        identity.name = row.get("name")?;
        identity.industry_code = row.get("industry_code")?;
        identity.company_scale = row.get("company_scale")?;
    }
    for metric in S::METRICS {
        let m = metric.as_str();
        let Some(figures) = snapshot.figures_mut(*metric) else {
            continue;
        };
        figures.current_month = row.get(format!("{m}_current_month").as_str())?;
        figures.current_cumulative = row.get(format!("{m}_current_cumulative").as_str())?;
        figures.last_year_month = row.get(format!("{m}_last_year_month").as_str())?;
        figures.last_year_cumulative = row.get(format!("{m}_last_year_cumulative").as_str())?;
    }
    if let Some(categories) = snapshot.categories_mut() {
        for cat in CategoryField::ALL {
            *categories.slot_mut(cat) = row.get(cat.as_str())?;
        }
    }
    Ok(snapshot)
}

fn placeholders(count: usize) -> String {
    (1..=count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

pub struct SqliteStore {
    conn: Connection,
    db_path: Option<PathBuf>,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self, String> {
        let created = !db_path.exists();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| format!("创建数据库目录失败: {e}"))?;
            }
        }
        let mut conn = Connection::open(db_path).map_err(|e| format!("打开数据库失败: {e}"))?;
        let upgrade = upgrade_schema(&mut conn)?;
        info!(
            db = %db_path.display(),
            created,
            applied = ?upgrade.applied,
            current = upgrade.already_current,
            "数据库结构已就绪"
        );
        Ok(Self {
            conn,
            db_path: Some(db_path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self, String> {
        let mut conn =
            Connection::open_in_memory().map_err(|e| format!("打开内存数据库失败: {e}"))?;
        upgrade_schema(&mut conn)?;
        Ok(Self {
            conn,
            db_path: None,
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn insert_records<R: CanonicalRecord>(&mut self, records: &[R]) -> Result<usize, String> {
        let table = record_table(R::FAMILY);
        let cols = record_columns::<R>();
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            cols.join(", "),
            placeholders(cols.len())
        );
        let tx = self
            .conn
            .transaction()
            .map_err(|e| format!("开始写入事务失败: {e}"))?;
        {
            let mut stmt = tx
                .prepare(&sql)
                .map_err(|e| format!("准备写入 {table} 失败: {e}"))?;
            for record in records {
                stmt.execute(params_from_iter(record_values(record)))
                    .map_err(|e| format!("写入 {table} 失败: {e}"))?;
            }
        }
        tx.commit().map_err(|e| format!("提交写入事务失败: {e}"))?;
        Ok(records.len())
    }

    fn load_records<R: CanonicalRecord>(&self, period: Period) -> Result<Vec<R>, String> {
        let table = record_table(R::FAMILY);
        let sql = format!(
            "SELECT * FROM {table} WHERE data_year = ?1 AND data_month = ?2 ORDER BY id ASC"
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| format!("查询 {table} 失败: {e}"))?;
        let rows = stmt
            .query_map(params![period.year, period.month], |row| record_from_row::<R>(row))
            .map_err(|e| format!("查询 {table} 失败: {e}"))?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(|e| format!("读取 {table} 行失败: {e}"))?);
        }
        Ok(records)
    }

    fn update_records<R: CanonicalRecord>(&mut self, records: &[R]) -> Result<usize, String> {
        let table = record_table(R::FAMILY);
        let cols = record_columns::<R>();
        let assignments = cols
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{c} = ?{}", i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {table} SET {assignments}, updated_at = datetime('now') WHERE id = ?{}",
            cols.len() + 1
        );
        let tx = self
            .conn
            .transaction()
            .map_err(|e| format!("开始更新事务失败: {e}"))?;
        let mut updated = 0usize;
        {
            let mut stmt = tx
                .prepare(&sql)
                .map_err(|e| format!("准备更新 {table} 失败: {e}"))?;
            for record in records {
                let id = record.id().ok_or_else(|| "更新记录缺少 id".to_string())?;
                let mut values = record_values(record);
                values.push(Value::Integer(id));
                updated += stmt
                    .execute(params_from_iter(values))
                    .map_err(|e| format!("更新 {table} 失败: {e}"))?;
            }
        }
        tx.commit().map_err(|e| format!("提交更新事务失败: {e}"))?;
        Ok(updated)
    }

    fn insert_snapshots<S: SnapshotRecord>(&mut self, snapshots: &[S]) -> Result<usize, String> {
        let table = snapshot_table(S::FAMILY);
        let cols = snapshot_columns::<S>();
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            cols.join(", "),
            placeholders(cols.len())
        );
        let tx = self
            .conn
            .transaction()
            .map_err(|e| format!("开始写入事务失败: {e}"))?;
        {
            let mut stmt = tx
                .prepare(&sql)
                .map_err(|e| format!("准备写入 {table} 失败: {e}"))?;
            for snapshot in snapshots {
                stmt.execute(params_from_iter(snapshot_values(snapshot)))
                    .map_err(|e| format!("写入 {table} 失败: {e}"))?;
            }
        }
        tx.commit().map_err(|e| format!("提交写入事务失败: {e}"))?;
        Ok(snapshots.len())
    }

    fn load_snapshots<S: SnapshotRecord>(&self, period: Period) -> Result<Vec<S>, String> {
        let table = snapshot_table(S::FAMILY);
        let sql = format!(
            "SELECT * FROM {table} WHERE snapshot_year = ?1 AND snapshot_month = ?2 ORDER BY id ASC"
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| format!("查询 {table} 失败: {e}"))?;
        let rows = stmt
            .query_map(params![period.year, period.month], |row| snapshot_from_row::<S>(row))
            .map_err(|e| format!("查询 {table} 失败: {e}"))?;
        let mut snapshots = Vec::new();
        for row in rows {
            snapshots.push(row.map_err(|e| format!("读取 {table} 行失败: {e}"))?);
        }
        Ok(snapshots)
    }

    fn get_config(&self, key: &str) -> Result<Option<String>, String> {
        self.conn
            .query_row("SELECT value FROM config WHERE key = ?1", [key], |row| {
                row.get::<_, String>(0)
            })
            .optional()
            .map_err(|e| format!("读取配置失败 ({key}): {e}"))
    }

    fn set_config(&self, key: &str, value: &str) -> Result<(), String> {
        self.conn
            .execute(
                r#"
                INSERT INTO config(key, value, updated_at) VALUES (?1, ?2, datetime('now'))
                ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
                "#,
                params![key, value],
            )
            .map_err(|e| format!("写入配置失败 ({key}): {e}"))?;
        Ok(())
    }
}

impl SurveyStore for SqliteStore {
    fn insert_wholesale_retail(&mut self, records: &[WholesaleRetailRecord]) -> Result<usize, String> {
        self.insert_records(records)
    }

    fn insert_accommodation_catering(
        &mut self,
        records: &[AccommodationCateringRecord],
    ) -> Result<usize, String> {
        self.insert_records(records)
    }

    fn load_wholesale_retail(&self, period: Period) -> Result<Vec<WholesaleRetailRecord>, String> {
        self.load_records(period)
    }

    fn load_accommodation_catering(
        &self,
        period: Period,
    ) -> Result<Vec<AccommodationCateringRecord>, String> {
        self.load_records(period)
    }

    fn update_wholesale_retail(&mut self, records: &[WholesaleRetailRecord]) -> Result<usize, String> {
        self.update_records(records)
    }

    fn update_accommodation_catering(
        &mut self,
        records: &[AccommodationCateringRecord],
    ) -> Result<usize, String> {
        self.update_records(records)
    }

    fn delete_partition(&mut self, period: Period) -> Result<usize, String> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| format!("开始删除事务失败: {e}"))?;
        let mut deleted = 0usize;
        for family in [
            RecordFamily::WholesaleRetail,
            RecordFamily::AccommodationCatering,
        ] {
            let table = record_table(family);
            deleted += tx
                .execute(
                    &format!("DELETE FROM {table} WHERE data_year = ?1 AND data_month = ?2"),
                    params![period.year, period.month],
                )
                .map_err(|e| format!("清空 {table} 失败: {e}"))?;
        }
        tx.commit().map_err(|e| format!("提交删除事务失败: {e}"))?;
        Ok(deleted)
    }

    fn insert_wholesale_retail_snapshots(
        &mut self,
        snapshots: &[WholesaleRetailSnapshot],
    ) -> Result<usize, String> {
        self.insert_snapshots(snapshots)
    }

    fn insert_accommodation_catering_snapshots(
        &mut self,
        snapshots: &[AccommodationCateringSnapshot],
    ) -> Result<usize, String> {
        self.insert_snapshots(snapshots)
    }

    fn load_wholesale_retail_snapshots(
        &self,
        period: Period,
    ) -> Result<Vec<WholesaleRetailSnapshot>, String> {
        self.load_snapshots(period)
    }

    fn load_accommodation_catering_snapshots(
        &self,
        period: Period,
    ) -> Result<Vec<AccommodationCateringSnapshot>, String> {
        self.load_snapshots(period)
    }

    fn current_period(&self) -> Result<Option<Period>, String> {
        let year = self
            .get_config(CONFIG_CURRENT_YEAR)?
            .and_then(|v| v.parse::<i32>().ok());
        let month = self
            .get_config(CONFIG_CURRENT_MONTH)?
            .and_then(|v| v.parse::<u32>().ok());
        Ok(year.zip(month).and_then(|(y, m)| Period::new(y, m)))
    }

    fn set_current_period(&mut self, period: Period) -> Result<(), String> {
        self.set_config(CONFIG_CURRENT_YEAR, &period.year.to_string())?;
        self.set_config(CONFIG_CURRENT_MONTH, &period.month.to_string())
    }

    fn list_periods(&self) -> Result<Vec<PeriodStat>, String> {
        let mut stmt = self
            .conn
            .prepare(
                r#"
                SELECT data_year, data_month, SUM(wr) AS wr_count, SUM(ac) AS ac_count
                FROM (
                    SELECT data_year, data_month, 1 AS wr, 0 AS ac FROM wholesale_retail
                    UNION ALL
                    SELECT data_year, data_month, 0 AS wr, 1 AS ac FROM accommodation_catering
                )
                GROUP BY data_year, data_month
                ORDER BY data_year DESC, data_month DESC
                "#,
            )
            .map_err(|e| format!("查询可用年月失败: {e}"))?;
        let rows = stmt
            .query_map([], |row| {
                let period = period_from_row(row, "data_year", "data_month")?;
                let mut stat = empty_stat(period);
                stat.wholesale_retail_count = row.get::<_, i64>("wr_count")?.max(0) as usize;
                stat.accommodation_catering_count = row.get::<_, i64>("ac_count")?.max(0) as usize;
                Ok(stat)
            })
            .map_err(|e| format!("查询可用年月失败: {e}"))?;
        let mut stats = Vec::new();
        for row in rows {
            stats.push(row.map_err(|e| format!("读取可用年月失败: {e}"))?);
        }
        Ok(stats)
    }

    fn create_import_log(&mut self, entry: &ImportLogEntry) -> Result<i64, String> {
        self.conn
            .execute(
                r#"
                INSERT INTO import_logs(
                    import_id, filename, file_size, file_hash, status, started_at,
                    total_sheets, imported_sheets, total_rows, imported_rows, error_rows
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
                params![
                    entry.import_id,
                    entry.filename,
                    entry.file_size.map(|s| s as i64),
                    entry.file_hash,
                    entry.status,
                    entry.started_at,
                    entry.total_sheets as i64,
                    entry.imported_sheets as i64,
                    entry.total_rows as i64,
                    entry.imported_rows as i64,
                    entry.error_rows as i64,
                ],
            )
            .map_err(|e| format!("写入导入日志失败: {e}"))?;
        Ok(self.conn.last_insert_rowid())
    }

    fn finish_import_log(&mut self, log_id: i64, entry: &ImportLogEntry) -> Result<(), String> {
        self.conn
            .execute(
                r#"
                UPDATE import_logs
                SET status = ?1, finished_at = ?2, total_sheets = ?3, imported_sheets = ?4,
                    total_rows = ?5, imported_rows = ?6, error_rows = ?7, error_message = ?8
                WHERE id = ?9
                "#,
                params![
                    entry.status,
                    entry.finished_at,
                    entry.total_sheets as i64,
                    entry.imported_sheets as i64,
                    entry.total_rows as i64,
                    entry.imported_rows as i64,
                    entry.error_rows as i64,
                    entry.error_message,
                    log_id,
                ],
            )
            .map_err(|e| format!("更新导入日志失败: {e}"))?;
        Ok(())
    }

    fn insert_sheet_meta(&mut self, meta: &SheetMeta) -> Result<(), String> {
        let columns_json = serde_json::to_string(&meta.columns)
            .map_err(|e| format!("序列化列名失败: {e}"))?;
        let mapping_json = meta
            .column_mapping
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| format!("序列化列映射失败: {e}"))?;
        self.conn
            .execute(
                r#"
                INSERT INTO sheets_meta(
                    import_id, sheet_name, sheet_kind, confidence, data_year, data_month,
                    status, row_count, imported_rows, columns_json, column_mapping_json,
                    error_message
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                "#,
                params![
                    meta.import_id,
                    meta.sheet_name,
                    meta.sheet_kind.as_str(),
                    meta.confidence,
                    meta.period.map(|p| p.year),
                    meta.period.map(|p| p.month),
                    meta.status.as_str(),
                    meta.row_count as i64,
                    meta.imported_rows as i64,
                    columns_json,
                    mapping_json,
                    meta.error_message,
                ],
            )
            .map_err(|e| format!("写入 sheets_meta 失败: {e}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SheetKind, SheetStatus, SnapshotRecord};
    use uuid::Uuid;

    fn p(year: i32, month: u32) -> Period {
        Period::new(year, month).expect("valid period")
    }

    fn sample_wholesale() -> WholesaleRetailRecord {
        let mut record = WholesaleRetailRecord::blank(p(2025, 12), "批发", "survey.xlsx");
        record.identity.credit_code = "91A".to_string();
        record.identity.name = "甲公司".to_string();
        record.identity.industry_code = "5123".to_string();
        record.identity.industry_type = "wholesale".to_string();
        record.identity.row_no = 2;
        record.sales.current_month = 100.0;
        record.sales.month_rate = Some(10.0);
        record.sales.original_current_month = Some(100.0);
        record.retail_ratio = Some(40.0);
        record.categories.beverage = 3.5;
        record.flags.is_small_micro = true;
        record.extra.opening_year = Some(2019);
        record
    }

    #[test]
    fn migrations_are_idempotent_on_disk() {
        let db_path = std::env::temp_dir().join(format!(
            "survey_ingest_sqlite_test_{}_{}.db",
            std::process::id(),
            Uuid::new_v4()
        ));
        {
            let store = SqliteStore::open(&db_path).expect("first open");
            assert_eq!(store.db_path(), Some(db_path.as_path()));
        }
        let mut conn = Connection::open(&db_path).expect("reopen");
        let upgrade = upgrade_schema(&mut conn).expect("second upgrade");
        assert!(upgrade.applied.is_empty());
        assert_eq!(upgrade.already_current, SCHEMA.len());
        drop(conn);
        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn fresh_connection_applies_every_migration_once() {
        let mut conn = Connection::open_in_memory().expect("open");
        let upgrade = upgrade_schema(&mut conn).expect("upgrade");
        assert_eq!(upgrade.applied, vec!["0001_init"]);
        assert_eq!(upgrade.already_current, 0);
        let recorded = recorded_checksums(&conn).expect("recorded");
        assert_eq!(
            recorded.get("0001_init"),
            Some(&sql_checksum(SCHEMA[0].sql))
        );
    }

    #[test]
    fn edited_migration_script_is_rejected() {
        let mut conn = Connection::open_in_memory().expect("open");
        ensure_migration_table(&conn).expect("table");
        conn.execute(
            "INSERT INTO schema_migrations(version, checksum) VALUES ('0001_init', 'stale')",
            [],
        )
        .expect("seed");
        let err = upgrade_schema(&mut conn).expect_err("checksum mismatch");
        assert!(err.contains("0001_init"), "{err}");
    }

    #[test]
    fn wholesale_record_survives_storage() {
        let mut store = SqliteStore::open_in_memory().expect("open store");
        let original = sample_wholesale();
        assert_eq!(
            store
                .insert_wholesale_retail(std::slice::from_ref(&original))
                .expect("insert"),
            1
        );
        let loaded = store.load_wholesale_retail(p(2025, 12)).expect("load");
        assert_eq!(loaded.len(), 1);
        let mut expected = original;
        expected.id = loaded[0].id;
        assert_eq!(loaded[0], expected);
    }

    #[test]
    fn update_and_delete_partition() {
        let mut store = SqliteStore::open_in_memory().expect("open store");
        store
            .insert_wholesale_retail(&[sample_wholesale()])
            .expect("insert");
        let mut ac = AccommodationCateringRecord::blank(p(2025, 12), "住宿", "survey.xlsx");
        ac.identity.name = "乙酒店".to_string();
        ac.room.current_month = 9.0;
        store.insert_accommodation_catering(&[ac]).expect("insert");

        let mut loaded = store.load_wholesale_retail(p(2025, 12)).expect("load");
        loaded[0].sales.prev_month = 90.0;
        assert_eq!(store.update_wholesale_retail(&loaded).expect("update"), 1);
        let reloaded = store.load_wholesale_retail(p(2025, 12)).expect("load");
        assert_eq!(reloaded[0].sales.prev_month, 90.0);

        let periods = store.list_periods().expect("periods");
        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0].wholesale_retail_count, 1);
        assert_eq!(periods[0].accommodation_catering_count, 1);

        assert_eq!(store.delete_partition(p(2025, 12)).expect("delete"), 2);
        assert!(store.list_periods().expect("periods").is_empty());
    }

    #[test]
    fn snapshots_load_in_insertion_order() {
        let mut store = SqliteStore::open_in_memory().expect("open store");
        let mut first = AccommodationCateringSnapshot::blank(p(2025, 11), "2025年11月住餐");
        first.identity.credit_code = "91B".to_string();
        first.revenue.current_month = 1.0;
        first.food.last_year_month = Some(4.0);
        let mut second = first.clone();
        second.revenue.current_month = 2.0;
        store
            .insert_accommodation_catering_snapshots(&[first, second])
            .expect("insert snapshots");
        let loaded = store
            .load_accommodation_catering_snapshots(p(2025, 11))
            .expect("load");
        assert_eq!(loaded.len(), 2);
        let latest = &loaded[1];
        assert_eq!(latest.revenue.current_month, 2.0);
        assert_eq!(latest.food.last_year_month, Some(4.0));
        assert_eq!(latest.room.last_year_month, None);
    }

    #[test]
    fn config_import_log_and_sheet_meta() {
        let mut store = SqliteStore::open_in_memory().expect("open store");
        store.set_current_period(p(2025, 12)).expect("set period");
        store.set_current_period(p(2026, 1)).expect("overwrite period");
        assert_eq!(store.current_period().expect("read"), Some(p(2026, 1)));

        let mut entry = ImportLogEntry {
            import_id: Uuid::new_v4().to_string(),
            filename: "survey.xlsx".to_string(),
            file_size: Some(10),
            file_hash: None,
            status: "running".to_string(),
            started_at: "2026-01-05T00:00:00Z".to_string(),
            finished_at: None,
            total_sheets: 0,
            imported_sheets: 0,
            total_rows: 0,
            imported_rows: 0,
            error_rows: 0,
            error_message: None,
        };
        let log_id = store.create_import_log(&entry).expect("create log");
        entry.status = "success".to_string();
        entry.finished_at = Some("2026-01-05T00:00:01Z".to_string());
        store.finish_import_log(log_id, &entry).expect("finish log");

        store
            .insert_sheet_meta(&SheetMeta {
                import_id: entry.import_id.clone(),
                sheet_name: "批发".to_string(),
                sheet_kind: SheetKind::WholesaleRetail,
                confidence: 0.8,
                period: Some(p(2026, 1)),
                status: SheetStatus::Imported,
                row_count: 3,
                imported_rows: 3,
                columns: vec!["单位详细名称".to_string()],
                column_mapping: None,
                error_message: None,
            })
            .expect("sheet meta");
        let status: String = store
            .conn
            .query_row("SELECT status FROM import_logs WHERE id = ?1", [log_id], |row| {
                row.get(0)
            })
            .expect("query log");
        assert_eq!(status, "success");
    }
}
