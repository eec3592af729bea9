use crate::field_mapper::ColumnMapping;
use crate::model::{
    AccommodationCateringRecord, AccommodationCateringSnapshot, CanonicalRecord, ImportReport,
    Period, SheetKind, SheetStatus, SnapshotRecord, WholesaleRetailRecord,
    WholesaleRetailSnapshot,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

pub const CONFIG_CURRENT_YEAR: &str = "current_year";
pub const CONFIG_CURRENT_MONTH: &str = "current_month";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportLogEntry {
    pub import_id: String,
    pub filename: String,
    pub file_size: Option<u64>,
    pub file_hash: Option<String>,
    pub status: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub total_sheets: usize,
    pub imported_sheets: usize,
    pub total_rows: usize,
    pub imported_rows: usize,
    pub error_rows: usize,
    pub error_message: Option<String>,
}

impl ImportLogEntry {
    pub fn finish(&mut self, report: &ImportReport, status: &str, finished_at: &str) {
        self.status = status.to_string();
        self.finished_at = Some(finished_at.to_string());
        self.total_sheets = report.total_sheets;
        self.imported_sheets = report.imported_sheets;
        self.total_rows = report.total_rows;
        self.imported_rows = report.imported_rows;
        self.error_rows = report.error_rows;
    }
}

/// Sheet 级别的元信息：原始列名与列映射。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetMeta {
    pub import_id: String,
    pub sheet_name: String,
    pub sheet_kind: SheetKind,
    pub confidence: f64,
    pub period: Option<Period>,
    pub status: SheetStatus,
    pub row_count: usize,
    pub imported_rows: usize,
    pub columns: Vec<String>,
    pub column_mapping: Option<ColumnMapping>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodStat {
    pub period: Period,
    pub wholesale_retail_count: usize,
    pub accommodation_catering_count: usize,
}

/// 存储契约。实现可以是 SQLite，也可以是测试用的内存存储。
pub trait SurveyStore {
    fn insert_wholesale_retail(&mut self, records: &[WholesaleRetailRecord]) -> Result<usize, String>;
    fn insert_accommodation_catering(
        &mut self,
        records: &[AccommodationCateringRecord],
    ) -> Result<usize, String>;
    fn load_wholesale_retail(&self, period: Period) -> Result<Vec<WholesaleRetailRecord>, String>;
    fn load_accommodation_catering(
        &self,
        period: Period,
    ) -> Result<Vec<AccommodationCateringRecord>, String>;
    fn update_wholesale_retail(&mut self, records: &[WholesaleRetailRecord]) -> Result<usize, String>;
    fn update_accommodation_catering(
        &mut self,
        records: &[AccommodationCateringRecord],
    ) -> Result<usize, String>;
    /// 删除该年月两个行业族的全部记录，返回删除行数。
    fn delete_partition(&mut self, period: Period) -> Result<usize, String>;

    fn insert_wholesale_retail_snapshots(
        &mut self,
        snapshots: &[WholesaleRetailSnapshot],
    ) -> Result<usize, String>;
    fn insert_accommodation_catering_snapshots(
        &mut self,
        snapshots: &[AccommodationCateringSnapshot],
    ) -> Result<usize, String>;
    /// 按写入顺序返回该年月的快照。
    fn load_wholesale_retail_snapshots(
        &self,
        period: Period,
    ) -> Result<Vec<WholesaleRetailSnapshot>, String>;
    fn load_accommodation_catering_snapshots(
        &self,
        period: Period,
    ) -> Result<Vec<AccommodationCateringSnapshot>, String>;

    fn current_period(&self) -> Result<Option<Period>, String>;
    fn set_current_period(&mut self, period: Period) -> Result<(), String>;
    fn list_periods(&self) -> Result<Vec<PeriodStat>, String>;

    fn create_import_log(&mut self, entry: &ImportLogEntry) -> Result<i64, String>;
    fn finish_import_log(&mut self, log_id: i64, entry: &ImportLogEntry) -> Result<(), String>;
    fn insert_sheet_meta(&mut self, meta: &SheetMeta) -> Result<(), String>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    next_id: i64,
    wholesale_retail: Vec<WholesaleRetailRecord>,
    accommodation_catering: Vec<AccommodationCateringRecord>,
    wholesale_retail_snapshots: Vec<WholesaleRetailSnapshot>,
    accommodation_catering_snapshots: Vec<AccommodationCateringSnapshot>,
    config: HashMap<String, String>,
    import_logs: BTreeMap<i64, ImportLogEntry>,
    sheet_metas: Vec<SheetMeta>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn import_logs(&self) -> Vec<&ImportLogEntry> {
        self.import_logs.values().collect()
    }

    pub fn sheet_metas(&self) -> &[SheetMeta] {
        &self.sheet_metas
    }
}

fn insert_with_ids<R: CanonicalRecord>(
    next_id: &mut i64,
    target: &mut Vec<R>,
    records: &[R],
) -> usize {
    for record in records {
        *next_id += 1;
        let mut stored = record.clone();
        stored.set_id(*next_id);
        target.push(stored);
    }
    records.len()
}

fn insert_snapshots_with_ids<S: SnapshotRecord>(
    next_id: &mut i64,
    target: &mut Vec<S>,
    snapshots: &[S],
) -> usize {
    for snapshot in snapshots {
        *next_id += 1;
        let mut stored = snapshot.clone();
        stored.set_id(*next_id);
        target.push(stored);
    }
    snapshots.len()
}

fn update_by_id<R: CanonicalRecord>(target: &mut [R], records: &[R]) -> Result<usize, String> {
    let mut updated = 0usize;
    for record in records {
        let id = record
            .id()
            .ok_or_else(|| "更新记录缺少 id".to_string())?;
        if let Some(slot) = target.iter_mut().find(|r| r.id() == Some(id)) {
            *slot = record.clone();
            updated += 1;
        }
    }
    Ok(updated)
}

impl SurveyStore for MemoryStore {
    fn insert_wholesale_retail(&mut self, records: &[WholesaleRetailRecord]) -> Result<usize, String> {
        Ok(insert_with_ids(&mut self.next_id, &mut self.wholesale_retail, records))
    }

    fn insert_accommodation_catering(
        &mut self,
        records: &[AccommodationCateringRecord],
    ) -> Result<usize, String> {
        Ok(insert_with_ids(
            &mut self.next_id,
            &mut self.accommodation_catering,
            records,
        ))
    }

    fn load_wholesale_retail(&self, period: Period) -> Result<Vec<WholesaleRetailRecord>, String> {
        Ok(self
            .wholesale_retail
            .iter()
            .filter(|r| r.period == period)
            .cloned()
            .collect())
    }

    fn load_accommodation_catering(
        &self,
        period: Period,
    ) -> Result<Vec<AccommodationCateringRecord>, String> {
        Ok(self
            .accommodation_catering
            .iter()
            .filter(|r| r.period == period)
            .cloned()
            .collect())
    }

    fn update_wholesale_retail(&mut self, records: &[WholesaleRetailRecord]) -> Result<usize, String> {
        update_by_id(&mut self.wholesale_retail, records)
    }

    fn update_accommodation_catering(
        &mut self,
        records: &[AccommodationCateringRecord],
    ) -> Result<usize, String> {
        update_by_id(&mut self.accommodation_catering, records)
    }

    fn delete_partition(&mut self, period: Period) -> Result<usize, String> {
        let before = self.wholesale_retail.len() + self.accommodation_catering.len();
        self.wholesale_retail.retain(|r| r.period != period);
        self.accommodation_catering.retain(|r| r.period != period);
        Ok(before - self.wholesale_retail.len() - self.accommodation_catering.len())
    }

    fn insert_wholesale_retail_snapshots(
        &mut self,
        snapshots: &[WholesaleRetailSnapshot],
    ) -> Result<usize, String> {
        Ok(insert_snapshots_with_ids(
            &mut self.next_id,
            &mut self.wholesale_retail_snapshots,
            snapshots,
        ))
    }

    fn insert_accommodation_catering_snapshots(
        &mut self,
        snapshots: &[AccommodationCateringSnapshot],
    ) -> Result<usize, String> {
        Ok(insert_snapshots_with_ids(
            &mut self.next_id,
            &mut self.accommodation_catering_snapshots,
            snapshots,
        ))
    }

    fn load_wholesale_retail_snapshots(
        &self,
        period: Period,
    ) -> Result<Vec<WholesaleRetailSnapshot>, String> {
        Ok(self
            .wholesale_retail_snapshots
            .iter()
            .filter(|s| s.period == period)
            .cloned()
            .collect())
    }

    fn load_accommodation_catering_snapshots(
        &self,
        period: Period,
    ) -> Result<Vec<AccommodationCateringSnapshot>, String> {
        Ok(self
            .accommodation_catering_snapshots
            .iter()
            .filter(|s| s.period == period)
            .cloned()
            .collect())
    }

    fn current_period(&self) -> Result<Option<Period>, String> {
        let year = self
            .config
            .get(CONFIG_CURRENT_YEAR)
            .and_then(|v| v.parse::<i32>().ok());
        let month = self
            .config
            .get(CONFIG_CURRENT_MONTH)
            .and_then(|v| v.parse::<u32>().ok());
        Ok(year.zip(month).and_then(|(y, m)| Period::new(y, m)))
    }

    fn set_current_period(&mut self, period: Period) -> Result<(), String> {
        self.config
            .insert(CONFIG_CURRENT_YEAR.to_string(), period.year.to_string());
        self.config
            .insert(CONFIG_CURRENT_MONTH.to_string(), period.month.to_string());
        Ok(())
    }

    fn list_periods(&self) -> Result<Vec<PeriodStat>, String> {
        let mut stats: BTreeMap<Period, PeriodStat> = BTreeMap::new();
        for record in &self.wholesale_retail {
            stats
                .entry(record.period)
                .or_insert_with(|| empty_stat(record.period))
                .wholesale_retail_count += 1;
        }
        for record in &self.accommodation_catering {
            stats
                .entry(record.period)
                .or_insert_with(|| empty_stat(record.period))
                .accommodation_catering_count += 1;
        }
        Ok(stats.into_values().rev().collect())
    }

    fn create_import_log(&mut self, entry: &ImportLogEntry) -> Result<i64, String> {
        let id = self.allocate_id();
        self.import_logs.insert(id, entry.clone());
        Ok(id)
    }

    fn finish_import_log(&mut self, log_id: i64, entry: &ImportLogEntry) -> Result<(), String> {
        let slot = self
            .import_logs
            .get_mut(&log_id)
            .ok_or_else(|| format!("导入日志不存在: {log_id}"))?;
        *slot = entry.clone();
        Ok(())
    }

    fn insert_sheet_meta(&mut self, meta: &SheetMeta) -> Result<(), String> {
        self.sheet_metas.push(meta.clone());
        Ok(())
    }
}

pub(crate) fn empty_stat(period: Period) -> PeriodStat {
    PeriodStat {
        period,
        wholesale_retail_count: 0,
        accommodation_catering_count: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SnapshotRecord;

    fn p(year: i32, month: u32) -> Period {
        Period::new(year, month).expect("valid period")
    }

    fn wr(name: &str, period: Period) -> WholesaleRetailRecord {
        let mut record = WholesaleRetailRecord::blank(period, "批发", "a.xlsx");
        record.identity.name = name.to_string();
        record
    }

    #[test]
    fn delete_partition_only_touches_that_period() {
        let mut store = MemoryStore::new();
        store
            .insert_wholesale_retail(&[wr("甲", p(2025, 12)), wr("乙", p(2025, 11))])
            .expect("insert");
        let mut ac = AccommodationCateringRecord::blank(p(2025, 12), "住宿", "a.xlsx");
        ac.identity.name = "丙".to_string();
        store.insert_accommodation_catering(&[ac]).expect("insert");

        assert_eq!(store.delete_partition(p(2025, 12)).expect("delete"), 2);
        assert!(store.load_wholesale_retail(p(2025, 12)).expect("load").is_empty());
        assert_eq!(store.load_wholesale_retail(p(2025, 11)).expect("load").len(), 1);
    }

    #[test]
    fn update_replaces_record_by_id() {
        let mut store = MemoryStore::new();
        store.insert_wholesale_retail(&[wr("甲", p(2025, 12))]).expect("insert");
        let mut loaded = store.load_wholesale_retail(p(2025, 12)).expect("load");
        loaded[0].sales.current_month = 42.0;
        assert_eq!(store.update_wholesale_retail(&loaded).expect("update"), 1);
        let reloaded = store.load_wholesale_retail(p(2025, 12)).expect("load");
        assert_eq!(reloaded[0].sales.current_month, 42.0);

        let unsaved = wr("乙", p(2025, 12));
        assert!(store.update_wholesale_retail(&[unsaved]).is_err());
    }

    #[test]
    fn snapshots_keep_insertion_order_per_period() {
        let mut store = MemoryStore::new();
        let mut first = WholesaleRetailSnapshot::blank(p(2025, 11), "2025年11月批零");
        first.identity.credit_code = "91A".to_string();
        first.sales.current_month = 1.0;
        let mut second = first.clone();
        second.sales.current_month = 2.0;
        store
            .insert_wholesale_retail_snapshots(&[first, second])
            .expect("insert snapshots");
        let loaded = store
            .load_wholesale_retail_snapshots(p(2025, 11))
            .expect("load");
        let values = loaded
            .iter()
            .map(|s| s.sales.current_month)
            .collect::<Vec<_>>();
        assert_eq!(values, vec![1.0, 2.0]);
        assert!(store
            .load_wholesale_retail_snapshots(p(2025, 10))
            .expect("load")
            .is_empty());
    }

    #[test]
    fn current_period_round_trips_through_config() {
        let mut store = MemoryStore::new();
        assert_eq!(store.current_period().expect("read"), None);
        store.set_current_period(p(2026, 1)).expect("write");
        assert_eq!(store.current_period().expect("read"), Some(p(2026, 1)));
    }

    #[test]
    fn list_periods_is_newest_first() {
        let mut store = MemoryStore::new();
        store
            .insert_wholesale_retail(&[wr("甲", p(2025, 11)), wr("乙", p(2025, 12)), wr("丙", p(2025, 12))])
            .expect("insert");
        let periods = store.list_periods().expect("list");
        assert_eq!(periods[0].period, p(2025, 12));
        assert_eq!(periods[0].wholesale_retail_count, 2);
        assert_eq!(periods[1].period, p(2025, 11));
    }
}
