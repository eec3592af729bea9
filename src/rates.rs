use crate::error::{ImportError, Result as ImportResult};
use crate::model::{CanonicalRecord, Metric, MetricSeries, Period};
use crate::store::SurveyStore;
use tracing::info;

/// (current − base) / base × 100；基数为 0 时为 None。
pub fn growth_rate(current: f64, base: f64) -> Option<f64> {
    if base == 0.0 || !base.is_finite() || !current.is_finite() {
        return None;
    }
    Some((current - base) / base * 100.0)
}

pub fn apply_series_rates(series: &mut MetricSeries) {
    series.month_rate = growth_rate(series.current_month, series.last_year_month);
    series.cumulative_rate = growth_rate(series.current_cumulative, series.last_year_cumulative);
}

/// 重算一条记录的全部增速；批零另算零售额占比。
pub fn apply_derived_rates<R: CanonicalRecord>(record: &mut R) {
    for metric in R::FAMILY.metrics() {
        if let Some(series) = record.series_mut(*metric) {
            apply_series_rates(series);
        }
    }
    let sales = record.series(Metric::Sales).map(|s| s.current_month);
    let retail = record.series(Metric::Retail).map(|s| s.current_month);
    if let (Some(sales), Some(retail)) = (sales, retail) {
        let ratio = if sales != 0.0 {
            Some(retail / sales * 100.0)
        } else {
            None
        };
        record.set_retail_ratio(ratio);
    }
}

/// 人工修改本月值并重算增速。只允许修改可编辑指标。
pub fn apply_manual_edit<R: CanonicalRecord>(
    record: &mut R,
    metric: Metric,
    value: f64,
) -> ImportResult<()> {
    if !value.is_finite() {
        return Err(ImportError::Validation(format!("数值不合法: {value}")));
    }
    if !R::FAMILY.editable_metrics().contains(&metric) {
        return Err(ImportError::Validation(format!(
            "字段不允许修改: {}_current_month",
            metric.as_str()
        )));
    }
    let series = record
        .series_mut(metric)
        .ok_or_else(|| ImportError::Validation(format!("字段不存在: {}", metric.as_str())))?;
    series.current_month = value;
    apply_derived_rates(record);
    Ok(())
}

/// 恢复导入时的本月原值并重算增速。
pub fn reset_to_original<R: CanonicalRecord>(record: &mut R) {
    for metric in R::FAMILY.editable_metrics() {
        if let Some(series) = record.series_mut(*metric) {
            series.current_month = series.original_current_month.unwrap_or(0.0);
        }
    }
    apply_derived_rates(record);
}

/// 对某年月的全部记录恢复原值，返回更新条数。
pub fn reset_partition_to_original<S: SurveyStore + ?Sized>(
    store: &mut S,
    period: Period,
) -> Result<usize, String> {
    let mut wholesale = store.load_wholesale_retail(period)?;
    let mut catering = store.load_accommodation_catering(period)?;
    wholesale.iter_mut().for_each(reset_to_original);
    catering.iter_mut().for_each(reset_to_original);
    let updated = store.update_wholesale_retail(&wholesale)?
        + store.update_accommodation_catering(&catering)?;
    info!(%period, updated, "已恢复导入原值");
    Ok(updated)
}
