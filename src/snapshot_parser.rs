use crate::error::ImportError;
use crate::field_mapper::{map_identity_column, CanonicalField};
use crate::model::{CategoryField, Metric, Period, RecordFamily, SnapshotRecord};
use crate::normalize::{
    extract_year_month, find_reference_period, is_blank_cell, normalize_headers, trim_cell,
};
use crate::record_parser::{parse_int, parse_number};
use crate::rules::{
    contains_any, SNAPSHOT_CURRENT_CUMULATIVE_MARKERS, SNAPSHOT_CURRENT_MONTH_MARKERS,
    SNAPSHOT_LAST_YEAR_CUMULATIVE_MARKERS, SNAPSHOT_LAST_YEAR_MONTH_MARKERS,
};
use crate::workbook::RawSheet;
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct ParsedSnapshots<S> {
    pub period: Period,
    pub snapshots: Vec<S>,
    pub row_errors: Vec<String>,
    pub skipped_rows: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SnapshotSlot {
    CurrentMonth,
    CurrentCumulative,
    LastYearMonth,
    LastYearCumulative,
}

fn slot_for(column: &str) -> Option<SnapshotSlot> {
    if contains_any(column, SNAPSHOT_CURRENT_CUMULATIVE_MARKERS) {
        Some(SnapshotSlot::CurrentCumulative)
    } else if contains_any(column, SNAPSHOT_LAST_YEAR_CUMULATIVE_MARKERS) {
        Some(SnapshotSlot::LastYearCumulative)
    } else if contains_any(column, SNAPSHOT_CURRENT_MONTH_MARKERS) {
        Some(SnapshotSlot::CurrentMonth)
    } else if contains_any(column, SNAPSHOT_LAST_YEAR_MONTH_MARKERS) {
        Some(SnapshotSlot::LastYearMonth)
    } else {
        None
    }
}

fn snapshot_metric(family: RecordFamily, column: &str) -> Option<Metric> {
    match family {
        RecordFamily::WholesaleRetail => {
            if column.contains("商品销售额") {
                Some(Metric::Sales)
            } else if column.contains("零售额") {
                Some(Metric::Retail)
            } else {
                None
            }
        }
        RecordFamily::AccommodationCatering => {
            if column.contains("营业额") {
                Some(Metric::Revenue)
            } else if column.contains("客房") {
                Some(Metric::Room)
            } else if column.contains("餐费") {
                Some(Metric::Food)
            } else if column.contains("商品销售额") {
                Some(Metric::Goods)
            } else {
                None
            }
        }
    }
}

#[derive(Debug, Default)]
struct SnapshotColumns {
    identity: Vec<(usize, CanonicalField)>,
    figures: Vec<(usize, Metric, SnapshotSlot)>,
    categories: Vec<(usize, CategoryField)>,
}

fn resolve_columns(family: RecordFamily, headers: &[String]) -> SnapshotColumns {
    let mut columns = SnapshotColumns::default();
    let mut seen_identity = HashSet::new();
    let mut seen_figures = HashSet::new();
    let mut seen_categories = HashSet::new();

    for (idx, column) in headers.iter().enumerate() {
        let slot = slot_for(column);
        let identity = map_identity_column(column);

        if let (Some(CanonicalField::Category(cat)), Some(SnapshotSlot::CurrentMonth)) =
            (identity, slot)
        {
            if family == RecordFamily::WholesaleRetail && seen_categories.insert(cat) {
                columns.categories.push((idx, cat));
            }
            continue;
        }

        if let Some(slot) = slot {
            if let Some(metric) = snapshot_metric(family, column) {
                if seen_figures.insert((metric, slot)) {
                    columns.figures.push((idx, metric, slot));
                }
            }
            continue;
        }

        if let Some(
            field @ (CanonicalField::CreditCode
            | CanonicalField::Name
            | CanonicalField::IndustryCode
            | CanonicalField::CompanyScale),
        ) = identity
        {
            if seen_identity.insert(field) {
                columns.identity.push((idx, field));
            }
        }
    }
    columns
}

fn cell<'a>(row: &'a [String], idx: usize) -> &'a str {
    row.get(idx).map(String::as_str).unwrap_or("")
}

fn parse_snapshot_row<S: SnapshotRecord>(
    row: &[String],
    columns: &SnapshotColumns,
    period: Period,
    source_sheet: &str,
) -> Result<Option<S>, String> {
    let mut snapshot = S::blank(period, source_sheet);

    for (idx, field) in &columns.identity {
        let value = trim_cell(cell(row, *idx));
        if is_blank_cell(&value) {
            continue;
        }
        let identity = snapshot.identity_mut();
        match field {
            CanonicalField::CreditCode => identity.credit_code = value,
            CanonicalField::Name => identity.name = value,
            CanonicalField::IndustryCode => identity.industry_code = value,
            CanonicalField::CompanyScale => {
                identity.company_scale = parse_int(&value).map_err(|e| format!("单位规模: {e}"))?
            }
            _ => {}
        }
    }
    if snapshot.identity().name.is_empty() && snapshot.identity().credit_code.is_empty() {
        return Ok(None);
    }

    for (idx, metric, slot) in &columns.figures {
        let raw = trim_cell(cell(row, *idx));
        let blank = is_blank_cell(&raw);
        let value = parse_number(&raw)?;
        let Some(figures) = snapshot.figures_mut(*metric) else {
            continue;
        };
        match slot {
            SnapshotSlot::CurrentMonth => figures.current_month = value,
            SnapshotSlot::CurrentCumulative => figures.current_cumulative = value,
            SnapshotSlot::LastYearMonth => figures.last_year_month = (!blank).then_some(value),
            SnapshotSlot::LastYearCumulative => {
                figures.last_year_cumulative = (!blank).then_some(value)
            }
        }
    }

    for (idx, category) in &columns.categories {
        let value = parse_number(cell(row, *idx))?;
        if let Some(categories) = snapshot.categories_mut() {
            *categories.slot_mut(*category) = value;
        }
    }

    Ok(Some(snapshot))
}

/// 解析快照表。年月优先取 Sheet 名，其次取列名。
pub fn parse_snapshot_sheet<S: SnapshotRecord>(
    sheet: &RawSheet,
) -> Result<ParsedSnapshots<S>, ImportError> {
    let headers = normalize_headers(&sheet.header);
    let period = extract_year_month(&sheet.name)
        .or_else(|| find_reference_period(&headers))
        .ok_or_else(|| ImportError::UnresolvedPeriod {
            sheet: sheet.name.clone(),
        })?;
    let columns = resolve_columns(S::FAMILY, &headers);

    let mut snapshots = Vec::new();
    let mut row_errors = Vec::new();
    let mut skipped_rows = 0usize;
    for (offset, row) in sheet.rows.iter().enumerate() {
        let line_no = offset + 2;
        match parse_snapshot_row::<S>(row, &columns, period, &sheet.name) {
            Ok(Some(snapshot)) => snapshots.push(snapshot),
            Ok(None) => skipped_rows += 1,
            Err(err) => row_errors.push(format!("第{line_no}行: {err}")),
        }
    }

    Ok(ParsedSnapshots {
        period,
        snapshots,
        row_errors,
        skipped_rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AccommodationCateringSnapshot, WholesaleRetailSnapshot};

    fn sheet(name: &str, header: &[&str], rows: &[&[&str]]) -> RawSheet {
        RawSheet {
            name: name.to_string(),
            header: header.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        }
    }

    #[test]
    fn parses_wholesale_snapshot_with_categories() {
        let raw = sheet(
            "2025年11月批零",
            &[
                "统一社会信用代码",
                "单位详细名称",
                "商品销售额-本年-本月",
                "商品销售额-本年-1—本月",
                "商品销售额-上年-本月",
                "零售额-本年-本月",
                "零售额-本年-1—本月",
                "粮油食品类商品销售额-本年-本月",
            ],
            &[
                &["91A", "甲公司", "123", "456", "", "7", "89", "5"],
                &["", "", "", "", "", "", "", ""],
            ],
        );
        let parsed = parse_snapshot_sheet::<WholesaleRetailSnapshot>(&raw).expect("parse snapshot");
        assert_eq!(parsed.period, Period::new(2025, 11).expect("valid period"));
        assert_eq!(parsed.snapshots.len(), 1);
        assert_eq!(parsed.skipped_rows, 1);
        let snap = &parsed.snapshots[0];
        assert_eq!(snap.identity.credit_code, "91A");
        assert_eq!(snap.sales.current_month, 123.0);
        assert_eq!(snap.sales.current_cumulative, 456.0);
        assert_eq!(snap.sales.last_year_month, None);
        assert_eq!(snap.retail.current_month, 7.0);
        assert_eq!(snap.retail.current_cumulative, 89.0);
        assert_eq!(snap.categories.grain_oil_food, 5.0);
    }

    #[test]
    fn parses_catering_snapshot_and_falls_back_to_header_period() {
        let raw = sheet(
            "住餐快照",
            &[
                "统一社会信用代码",
                "单位详细名称",
                "2024年3月营业额-本年-本月",
                "客房收入-本年-本月",
                "餐费收入-上年-1—本月",
            ],
            &[&["91B", "乙酒店", "30", "10", "200"]],
        );
        let parsed =
            parse_snapshot_sheet::<AccommodationCateringSnapshot>(&raw).expect("parse snapshot");
        assert_eq!(parsed.period, Period::new(2024, 3).expect("valid period"));
        let snap = &parsed.snapshots[0];
        assert_eq!(snap.revenue.current_month, 30.0);
        assert_eq!(snap.room.current_month, 10.0);
        assert_eq!(snap.food.last_year_cumulative, Some(200.0));
    }

    #[test]
    fn snapshot_without_any_period_fails() {
        let raw = sheet("快照", &["单位详细名称", "零售额-本年-本月"], &[]);
        let err = parse_snapshot_sheet::<WholesaleRetailSnapshot>(&raw).expect_err("no period");
        assert!(matches!(err, ImportError::UnresolvedPeriod { .. }));
    }
}
