use crate::error::ImportError;
use crate::field_mapper::{CanonicalField, ColumnMapping, FieldMapper};
use crate::model::{
    AccommodationCateringRecord, AccommodationCateringSnapshot, CanonicalRecord, Period,
    SheetKind, WholesaleRetailRecord, WholesaleRetailSnapshot,
};
use crate::normalize::{find_reference_period, is_blank_cell, normalize_headers, trim_cell};
use crate::rules::INDUSTRY_PREFIXES;
use crate::snapshot_parser::{parse_snapshot_sheet, ParsedSnapshots};
use crate::workbook::RawSheet;
use tracing::debug;

/// 主表解析结果：有效记录与行级错误。
#[derive(Debug, Clone)]
pub struct ParsedSheet<R> {
    pub period: Period,
    pub mapping: ColumnMapping,
    pub records: Vec<R>,
    pub row_errors: Vec<String>,
    pub skipped_rows: usize,
}

pub enum SheetPayload {
    WholesaleRetail(ParsedSheet<WholesaleRetailRecord>),
    AccommodationCatering(ParsedSheet<AccommodationCateringRecord>),
    WholesaleRetailSnapshots(ParsedSnapshots<WholesaleRetailSnapshot>),
    AccommodationCateringSnapshots(ParsedSnapshots<AccommodationCateringSnapshot>),
    Skipped { reason: String },
}

impl SheetKind {
    /// 按 Sheet 类型解析；汇总表和未知表不解析。
    pub fn parse(self, sheet: &RawSheet, source_file: &str) -> Result<SheetPayload, ImportError> {
        match self {
            SheetKind::WholesaleRetail => {
                parse_main_sheet::<WholesaleRetailRecord>(sheet, source_file)
                    .map(SheetPayload::WholesaleRetail)
            }
            SheetKind::AccommodationCatering => {
                parse_main_sheet::<AccommodationCateringRecord>(sheet, source_file)
                    .map(SheetPayload::AccommodationCatering)
            }
            SheetKind::WholesaleRetailSnapshot => {
                parse_snapshot_sheet::<WholesaleRetailSnapshot>(sheet)
                    .map(SheetPayload::WholesaleRetailSnapshots)
            }
            SheetKind::AccommodationCateringSnapshot => {
                parse_snapshot_sheet::<AccommodationCateringSnapshot>(sheet)
                    .map(SheetPayload::AccommodationCateringSnapshots)
            }
            SheetKind::Summary => Ok(SheetPayload::Skipped {
                reason: "汇总表不导入".to_string(),
            }),
            SheetKind::Unknown => Ok(SheetPayload::Skipped {
                reason: "无法识别的 Sheet 类型".to_string(),
            }),
        }
    }
}

pub fn industry_type_from_code(code: &str) -> &'static str {
    let prefix = code.trim().chars().take(2).collect::<String>();
    INDUSTRY_PREFIXES
        .iter()
        .find(|(p, _)| *p == prefix)
        .map(|(_, t)| *t)
        .unwrap_or("unknown")
}

/// 解析数值单元格；空值和占位符为 0。
pub fn parse_number(raw: &str) -> Result<f64, String> {
    let text = trim_cell(raw);
    if is_blank_cell(&text) {
        return Ok(0.0);
    }
    let cleaned = text
        .replace([',', '，', '%', '％', ' '], "")
        .replace('\u{a0}', "");
    if cleaned.is_empty() {
        return Ok(0.0);
    }
    let value = cleaned
        .parse::<f64>()
        .map_err(|_| format!("数值格式不合法: {raw}"))?;
    if !value.is_finite() {
        return Err(format!("数值格式不合法: {raw}"));
    }
    Ok(value)
}

/// 整数单元格，允许 “1.0” 这类无小数部分的写法。
pub fn parse_int(raw: &str) -> Result<i64, String> {
    let value = parse_number(raw)?;
    if value.fract() != 0.0 || value.abs() > i64::MAX as f64 {
        return Err(format!("整数格式不合法: {raw}"));
    }
    Ok(value as i64)
}

pub fn parse_flag(raw: &str) -> Result<bool, String> {
    let text = trim_cell(raw);
    match text.as_str() {
        "是" | "Y" | "y" | "true" | "TRUE" => return Ok(true),
        "否" | "N" | "n" | "false" | "FALSE" => return Ok(false),
        _ => {}
    }
    parse_number(&text)
        .map(|v| v != 0.0)
        .map_err(|_| format!("标记格式不合法: {raw}"))
}

fn assign_field<R: CanonicalRecord>(
    record: &mut R,
    field: CanonicalField,
    value: &str,
) -> Result<(), String> {
    match field {
        CanonicalField::CreditCode => record.identity_mut().credit_code = value.to_string(),
        CanonicalField::Name => record.identity_mut().name = value.to_string(),
        CanonicalField::IndustryCode => record.identity_mut().industry_code = value.to_string(),
        CanonicalField::CompanyScale => record.identity_mut().company_scale = parse_int(value)?,
        CanonicalField::RetailRatio => record.set_retail_ratio(Some(parse_number(value)?)),
        CanonicalField::Category(c) => *record.categories_mut().slot_mut(c) = parse_number(value)?,
        CanonicalField::SmallMicro => record.flags_mut().is_small_micro = parse_flag(value)?,
        CanonicalField::EatWearUse => record.flags_mut().is_eat_wear_use = parse_flag(value)?,
        CanonicalField::FirstReportIp => record.extra_mut().first_report_ip = value.to_string(),
        CanonicalField::FillIp => record.extra_mut().fill_ip = value.to_string(),
        CanonicalField::NetworkSales => record.extra_mut().network_sales = parse_number(value)?,
        CanonicalField::OpeningYear => record.extra_mut().opening_year = Some(parse_int(value)?),
        CanonicalField::OpeningMonth => {
            record.extra_mut().opening_month = Some(parse_int(value)?)
        }
        CanonicalField::Amount(metric, dim) => {
            let amount = parse_number(value)?;
            if let Some(series) = record.series_mut(metric) {
                *series.slot_mut(dim) = amount;
            }
        }
        CanonicalField::Rate(metric, kind) => {
            let rate = parse_number(value)?;
            if let Some(series) = record.series_mut(metric) {
                series.set_rate(kind, Some(rate));
            }
        }
    }
    Ok(())
}

/// 解析一行。名称为空的行返回 `Ok(None)`，不计入错误。
pub fn parse_row<R: CanonicalRecord>(
    row: &[String],
    mapping: &ColumnMapping,
    period: Period,
    row_no: usize,
    source_sheet: &str,
    source_file: &str,
) -> Result<Option<R>, String> {
    let mut record = R::blank(period, source_sheet, source_file);
    record.identity_mut().row_no = row_no;
    let mut first_error: Option<String> = None;

    for (col_idx, m) in mapping {
        let Some(raw) = row.get(*col_idx) else {
            continue;
        };
        let value = trim_cell(raw);
        if is_blank_cell(&value) {
            continue;
        }
        if let Err(err) = assign_field(&mut record, m.field, &value) {
            if first_error.is_none() {
                first_error = Some(format!("{}: {err}", m.column_name));
            }
        }
    }

    if record.identity().name.trim().is_empty() {
        return Ok(None);
    }
    if let Some(err) = first_error {
        return Err(err);
    }

    let industry_type = industry_type_from_code(&record.identity().industry_code);
    record.identity_mut().industry_type = industry_type.to_string();
    record.capture_originals();
    Ok(Some(record))
}

/// 解析主表。数据年月只从列名推断，推断不出时整张表失败。
pub fn parse_main_sheet<R: CanonicalRecord>(
    sheet: &RawSheet,
    source_file: &str,
) -> Result<ParsedSheet<R>, ImportError> {
    let headers = normalize_headers(&sheet.header);
    let period = find_reference_period(&headers).ok_or_else(|| ImportError::UnresolvedPeriod {
        sheet: sheet.name.clone(),
    })?;
    let mapping = FieldMapper::new(R::FAMILY, period).map_columns(&sheet.header);
    debug!(
        sheet = sheet.name.as_str(),
        %period,
        mapped_columns = mapping.len(),
        "列映射完成"
    );

    let mut records = Vec::new();
    let mut row_errors = Vec::new();
    let mut skipped_rows = 0usize;
    for (offset, row) in sheet.rows.iter().enumerate() {
        let line_no = offset + 2;
        if row.iter().all(|cell| is_blank_cell(cell)) {
            skipped_rows += 1;
            continue;
        }
        match parse_row::<R>(row, &mapping, period, line_no, &sheet.name, source_file) {
            Ok(Some(record)) => records.push(record),
            Ok(None) => skipped_rows += 1,
            Err(err) => row_errors.push(format!("第{line_no}行: {err}")),
        }
    }

    Ok(ParsedSheet {
        period,
        mapping,
        records,
        row_errors,
        skipped_rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Metric;

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
    fn parses_numbers_with_separators_and_placeholders() {
        assert_eq!(parse_number("1,234.5").expect("number"), 1234.5);
        assert_eq!(parse_number("12.5%").expect("number"), 12.5);
        assert_eq!(parse_number("-").expect("placeholder"), 0.0);
        assert_eq!(parse_number("").expect("blank"), 0.0);
        assert!(parse_number("abc").is_err());
        assert_eq!(parse_int("1.0").expect("int"), 1);
        assert!(parse_int("1.5").is_err());
        assert!(parse_flag("是").expect("flag"));
        assert!(!parse_flag("0").expect("flag"));
    }

    #[test]
    fn derives_industry_type_from_code_prefix() {
        assert_eq!(industry_type_from_code("5211"), "retail");
        assert_eq!(industry_type_from_code("5123"), "wholesale");
        assert_eq!(industry_type_from_code("6110"), "accommodation");
        assert_eq!(industry_type_from_code("6210"), "catering");
        assert_eq!(industry_type_from_code("7010"), "unknown");
        assert_eq!(industry_type_from_code(""), "unknown");
    }

    #[test]
    fn parses_wholesale_sheet_and_collects_row_errors() {
        let raw = sheet(
            "批发",
            &[
                "统一社会信用代码",
                "单位详细名称",
                "行业代码",
                "2025年12月销售额",
                "2024年12月销售额",
                "2025年12月零售额",
            ],
            &[
                &["91A", "甲公司", "5123", "100", "90", "40"],
                &["91B", "乙公司", "5211", "abc", "90", "40"],
                &["91C", "", "5211", "1", "1", "1"],
                &["", "", "", "", "", ""],
                &["91D", "丁公司", "5211", "-", "80", "/"],
            ],
        );
        let parsed =
            parse_main_sheet::<WholesaleRetailRecord>(&raw, "survey.xlsx").expect("parse sheet");
        assert_eq!(parsed.period, Period::new(2025, 12).expect("valid period"));
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.row_errors.len(), 1);
        assert!(parsed.row_errors[0].starts_with("第3行: "));
        assert_eq!(parsed.skipped_rows, 2);

        let first = &parsed.records[0];
        assert_eq!(first.identity.industry_type, "wholesale");
        assert_eq!(first.identity.row_no, 2);
        assert_eq!(first.sales.current_month, 100.0);
        assert_eq!(first.sales.last_year_month, 90.0);
        assert_eq!(first.sales.original_current_month, Some(100.0));
        assert_eq!(first.source_file, "survey.xlsx");

        let blank_current = &parsed.records[1];
        assert_eq!(blank_current.sales.current_month, 0.0);
        assert_eq!(blank_current.sales.original_current_month, None);
        assert_eq!(blank_current.retail.current_month, 0.0);
    }

    #[test]
    fn main_sheet_without_dated_headers_fails() {
        let raw = sheet("批发", &["单位详细名称", "本月销售额"], &[&["甲", "1"]]);
        let err = parse_main_sheet::<WholesaleRetailRecord>(&raw, "a.xlsx")
            .expect_err("period must be resolved");
        assert!(matches!(err, ImportError::UnresolvedPeriod { .. }));
    }

    #[test]
    fn summary_and_unknown_sheets_are_skipped() {
        let raw = sheet("汇总", &["地区"], &[]);
        for kind in [SheetKind::Summary, SheetKind::Unknown] {
            let payload = kind.parse(&raw, "a.xlsx").expect("skip payload");
            assert!(matches!(payload, SheetPayload::Skipped { .. }));
        }
    }

    #[test]
    fn catering_rows_fill_component_series() {
        let raw = sheet(
            "餐饮",
            &["单位详细名称", "行业代码", "2025年12月营业额", "2025年12月餐费收入"],
            &[&["丙饭店", "6210", "300", "200"]],
        );
        let parsed = parse_main_sheet::<AccommodationCateringRecord>(&raw, "a.xlsx")
            .expect("parse sheet");
        let record = &parsed.records[0];
        assert_eq!(record.identity.industry_type, "catering");
        assert_eq!(record.series(Metric::Revenue).map(|s| s.current_month), Some(300.0));
        assert_eq!(record.food.current_month, 200.0);
    }
}
