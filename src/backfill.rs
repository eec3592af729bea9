//! Four ordered, idempotent stages that fill zero-valued amount fields of a
//! (year, month) partition. A stage never overwrites a nonzero field.

use crate::model::{
    AccommodationCateringRecord, AccommodationCateringSnapshot, CanonicalRecord, Period,
    SnapshotRecord, TimeDimension, WholesaleRetailRecord, WholesaleRetailSnapshot,
};
use crate::rates::apply_derived_rates;
use crate::store::SurveyStore;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillSummary {
    pub period: Option<Period>,
    pub wholesale_retail_records: usize,
    pub accommodation_catering_records: usize,
    pub snapshot_fills: usize,
    pub cumulative_fills: usize,
    pub rate_fills: usize,
    pub component_fills: usize,
}

impl BackfillSummary {
    pub fn total_fills(&self) -> usize {
        self.snapshot_fills + self.cumulative_fills + self.rate_fills + self.component_fills
    }
}

/// 按 (年月, 信用代码) 索引的快照，同一键保留最后写入的一条。
pub struct SnapshotIndex<S> {
    by_key: HashMap<(Period, String), S>,
}

impl<S: SnapshotRecord> SnapshotIndex<S> {
    pub fn new() -> Self {
        Self {
            by_key: HashMap::new(),
        }
    }

    /// 快照须按写入顺序给出。
    pub fn extend(&mut self, snapshots: Vec<S>) {
        for snapshot in snapshots {
            let code = snapshot.identity().credit_code.trim().to_string();
            if code.is_empty() {
                continue;
            }
            self.by_key.insert((snapshot.period(), code), snapshot);
        }
    }

    pub fn get(&self, period: Period, credit_code: &str) -> Option<&S> {
        self.by_key.get(&(period, credit_code.trim().to_string()))
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

impl<S: SnapshotRecord> Default for SnapshotIndex<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// 回填需要的快照年月：上月、上年同月、上年上月。
pub fn snapshot_periods(period: Period) -> Vec<Period> {
    let mut periods = vec![period.previous_month(), period.same_month_last_year()];
    if period.has_previous_cumulative() {
        periods.push(period.same_month_last_year().previous_month());
    }
    periods
}

fn carry_forward_record<R, S>(record: &mut R, snapshots: &SnapshotIndex<S>, period: Period) -> usize
where
    R: CanonicalRecord,
    S: SnapshotRecord,
{
    let code = record.identity().credit_code.clone();
    if code.trim().is_empty() {
        return 0;
    }
    let prev = snapshots.get(period.previous_month(), &code);
    let last_year = snapshots.get(period.same_month_last_year(), &code);
    let last_year_prev = if period.has_previous_cumulative() {
        snapshots.get(period.same_month_last_year().previous_month(), &code)
    } else {
        None
    };

    let mut filled = 0usize;
    for metric in R::FAMILY.metrics() {
        let Some(series) = record.series_mut(*metric) else {
            continue;
        };
        if let Some(fig) = prev.and_then(|s| s.figures(*metric)) {
            filled += usize::from(series.fill_if_missing(TimeDimension::PrevMonth, fig.current_month));
            if period.has_previous_cumulative() {
                filled += usize::from(
                    series.fill_if_missing(TimeDimension::PrevCumulative, fig.current_cumulative),
                );
            }
        }
        if let Some(fig) = last_year.and_then(|s| s.figures(*metric)) {
            filled +=
                usize::from(series.fill_if_missing(TimeDimension::LastYearMonth, fig.current_month));
            filled += usize::from(
                series.fill_if_missing(TimeDimension::LastYearCumulative, fig.current_cumulative),
            );
        }
        if let Some(fig) = last_year_prev.and_then(|s| s.figures(*metric)) {
            filled += usize::from(series.fill_if_missing(
                TimeDimension::LastYearPrevCumulative,
                fig.current_cumulative,
            ));
        }
    }
    filled
}

/// 第一步：从上月、上年快照补齐历史字段。
pub fn carry_forward_from_snapshots<R, S>(
    records: &mut [R],
    snapshots: &SnapshotIndex<S>,
    period: Period,
) -> usize
where
    R: CanonicalRecord,
    S: SnapshotRecord,
{
    if snapshots.is_empty() {
        return 0;
    }
    records
        .par_iter_mut()
        .map(|record| carry_forward_record(record, snapshots, period))
        .sum()
}

fn cumulative_difference(cumulative: f64, previous: f64, period: Period) -> Option<f64> {
    if cumulative == 0.0 {
        return None;
    }
    if !period.has_previous_cumulative() {
        return Some(cumulative);
    }
    if previous == 0.0 {
        return None;
    }
    Some((cumulative - previous).max(0.0))
}

fn derive_difference_record<R: CanonicalRecord>(record: &mut R, period: Period) -> usize {
    let mut filled = 0usize;
    for metric in R::FAMILY.metrics() {
        let Some(series) = record.series_mut(*metric) else {
            continue;
        };
        if series.current_month == 0.0 {
            if let Some(v) =
                cumulative_difference(series.current_cumulative, series.prev_cumulative, period)
            {
                // 截断为 0 时仍视为缺失
                filled += usize::from(series.fill_if_missing(TimeDimension::CurrentMonth, v));
            }
        }
        if series.last_year_month == 0.0 {
            if let Some(v) = cumulative_difference(
                series.last_year_cumulative,
                series.last_year_prev_cumulative,
                period,
            ) {
                filled += usize::from(series.fill_if_missing(TimeDimension::LastYearMonth, v));
            }
        }
    }
    filled
}

/// 第二步：本月 = 累计 − 上月累计，负数按 0 处理。一月的本月即累计。
pub fn derive_from_cumulative_difference<R: CanonicalRecord>(
    records: &mut [R],
    period: Period,
) -> usize {
    records
        .par_iter_mut()
        .map(|record| derive_difference_record(record, period))
        .sum()
}

fn reconstruct(base: f64, rate: Option<f64>) -> Option<f64> {
    let rate = rate?;
    if base == 0.0 || !rate.is_finite() {
        return None;
    }
    Some(base * (1.0 + rate / 100.0))
}

fn reconstruct_record<R: CanonicalRecord>(record: &mut R) -> usize {
    let mut filled = 0usize;
    for metric in R::FAMILY.metrics() {
        let Some(series) = record.series_mut(*metric) else {
            continue;
        };
        if let Some(v) = reconstruct(series.last_year_month, series.month_rate) {
            filled += usize::from(series.fill_if_missing(TimeDimension::CurrentMonth, v));
        }
        if let Some(v) = reconstruct(series.last_year_cumulative, series.cumulative_rate) {
            filled += usize::from(series.fill_if_missing(TimeDimension::CurrentCumulative, v));
        }
    }
    filled
}

/// 第三步：本期 = 上年同期 × (1 + 增速/100)。
pub fn reconstruct_from_rates<R: CanonicalRecord>(records: &mut [R]) -> usize {
    records.par_iter_mut().map(reconstruct_record).sum()
}

fn component_record(record: &mut AccommodationCateringRecord) -> usize {
    let current = (record.food.current_month + record.goods.current_month).max(0.0);
    let last_year = (record.food.last_year_month + record.goods.last_year_month).max(0.0);
    usize::from(record.retail.fill_if_missing(TimeDimension::CurrentMonth, current))
        + usize::from(
            record
                .retail
                .fill_if_missing(TimeDimension::LastYearMonth, last_year),
        )
}

/// 第四步（住餐）：零售额 = 餐费收入 + 商品销售额。
pub fn derive_retail_from_components(records: &mut [AccommodationCateringRecord]) -> usize {
    records.par_iter_mut().map(component_record).sum()
}

/// 依次执行四步回填，不读写存储。
pub fn run_cascade(
    period: Period,
    wholesale: &mut [WholesaleRetailRecord],
    catering: &mut [AccommodationCateringRecord],
    wholesale_snapshots: &SnapshotIndex<WholesaleRetailSnapshot>,
    catering_snapshots: &SnapshotIndex<AccommodationCateringSnapshot>,
) -> BackfillSummary {
    let mut summary = BackfillSummary {
        period: Some(period),
        wholesale_retail_records: wholesale.len(),
        accommodation_catering_records: catering.len(),
        ..BackfillSummary::default()
    };

    summary.snapshot_fills = carry_forward_from_snapshots(wholesale, wholesale_snapshots, period)
        + carry_forward_from_snapshots(catering, catering_snapshots, period);
    summary.cumulative_fills = derive_from_cumulative_difference(wholesale, period)
        + derive_from_cumulative_difference(catering, period);
    summary.rate_fills = reconstruct_from_rates(wholesale) + reconstruct_from_rates(catering);
    summary.component_fills = derive_retail_from_components(catering);

    debug!(
        %period,
        snapshot = summary.snapshot_fills,
        cumulative = summary.cumulative_fills,
        rate = summary.rate_fills,
        component = summary.component_fills,
        "回填完成"
    );
    summary
}

/// 读取某年月的记录与快照，回填、重算增速并写回。
pub fn reconcile_partition<S: SurveyStore + ?Sized>(
    store: &mut S,
    period: Period,
) -> Result<BackfillSummary, String> {
    let mut wholesale = store.load_wholesale_retail(period)?;
    let mut catering = store.load_accommodation_catering(period)?;

    let mut wholesale_snapshots = SnapshotIndex::new();
    let mut catering_snapshots = SnapshotIndex::new();
    for snapshot_period in snapshot_periods(period) {
        wholesale_snapshots.extend(store.load_wholesale_retail_snapshots(snapshot_period)?);
        catering_snapshots.extend(store.load_accommodation_catering_snapshots(snapshot_period)?);
    }

    let summary = run_cascade(
        period,
        &mut wholesale,
        &mut catering,
        &wholesale_snapshots,
        &catering_snapshots,
    );

    wholesale.par_iter_mut().for_each(apply_derived_rates);
    catering.par_iter_mut().for_each(apply_derived_rates);

    store.update_wholesale_retail(&wholesale)?;
    store.update_accommodation_catering(&catering)?;

    info!(
        %period,
        wholesale = wholesale.len(),
        catering = catering.len(),
        fills = summary.total_fills(),
        "分区计算完成"
    );
    Ok(summary)
}
