use crate::model::{Period, TimeDimension};
use crate::rules::{
    contains_any, CUMULATIVE_KEYWORDS, LAST_YEAR_KEYWORDS, PLACEHOLDER_CELLS, PREV_MONTH_KEYWORDS,
};
use regex::Regex;
use std::sync::OnceLock;

fn point_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{4})年[^0-9]{0,3}0?(\d{1,2})月").expect("point regex"))
}

fn range_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d{4})年[^0-9]{0,3}0?(\d{1,2})[-—–]0?(\d{1,2})月").expect("range regex")
    })
}

fn month_range_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|[^0-9年])0?(\d{1,2})[-—–]0?(\d{1,2})月").expect("month range regex")
    })
}

fn month_only_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|[^0-9])0?(\d{1,2})月").expect("month regex"))
}

fn year_only_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{4})年").expect("year regex"))
}

fn ws_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("ws regex"))
}

pub fn trim_cell(text: &str) -> String {
    text.trim()
        .trim_start_matches('\u{feff}')
        .trim()
        .to_string()
}

/// 空白或占位符单元格。
pub fn is_blank_cell(text: &str) -> bool {
    let text = text.trim();
    text.is_empty() || PLACEHOLDER_CELLS.contains(&text)
}

/// 去掉换行与制表符，折叠连续空白，首尾修剪。幂等。
pub fn normalize_column_name(raw: &str) -> String {
    let stripped = trim_cell(raw).replace(['\n', '\r', '\t'], "");
    ws_re().replace_all(stripped.trim(), " ").into_owned()
}

pub fn normalize_headers(headers: &[String]) -> Vec<String> {
    headers.iter().map(|h| normalize_column_name(h)).collect()
}

fn capture_number<T: std::str::FromStr>(caps: &regex::Captures<'_>, idx: usize) -> Option<T> {
    caps.get(idx)?.as_str().parse::<T>().ok()
}

/// “YYYY年…M月”形式的年月点。范围形式取不到点，除非同时含点。
pub fn extract_year_month(text: &str) -> Option<Period> {
    let caps = point_re().captures(text)?;
    Period::new(capture_number(&caps, 1)?, capture_number(&caps, 2)?)
}

/// “YYYY年M-N月”，返回 (年, 起始月, 结束月)。
pub fn extract_year_month_range(text: &str) -> Option<(i32, u32, u32)> {
    let caps = range_re().captures(text)?;
    let year = capture_number::<i32>(&caps, 1)?;
    let start = capture_number::<u32>(&caps, 2)?;
    let end = capture_number::<u32>(&caps, 3)?;
    Period::new(year, end)?;
    if !(1..=12).contains(&start) {
        return None;
    }
    Some((year, start, end))
}

/// 不带年份的“M-N月”，返回 (起始月, 结束月)。
pub fn extract_month_range(text: &str) -> Option<(u32, u32)> {
    let caps = month_range_re().captures(text)?;
    let start = capture_number::<u32>(&caps, 1)?;
    let end = capture_number::<u32>(&caps, 2)?;
    ((1..=12).contains(&start) && (1..=12).contains(&end)).then_some((start, end))
}

pub fn extract_month_only(text: &str) -> Option<u32> {
    let caps = month_only_re().captures(text)?;
    capture_number::<u32>(&caps, 1).filter(|m| (1..=12).contains(m))
}

pub fn extract_year_only(text: &str) -> Option<i32> {
    let caps = year_only_re().captures(text)?;
    capture_number(&caps, 1)
}

/// 所有列名中出现的最大年月（年月点与范围终点均计入）。
pub fn find_reference_period(headers: &[String]) -> Option<Period> {
    let mut latest: Option<Period> = None;
    for header in headers {
        let column = normalize_column_name(header);
        let candidates = [
            extract_year_month(&column),
            extract_year_month_range(&column).and_then(|(year, _, end)| Period::new(year, end)),
        ];
        for candidate in candidates.into_iter().flatten() {
            if latest.map(|p| candidate > p).unwrap_or(true) {
                latest = Some(candidate);
            }
        }
    }
    latest
}

pub fn is_cumulative_column(column: &str) -> bool {
    contains_any(column, CUMULATIVE_KEYWORDS)
        || extract_year_month_range(column).is_some()
        || extract_month_range(column).is_some()
}

/// 推断列名对应的时间维度。
///
/// 明确年月落在参考期的时间窗口内时按年月判断，否则退回关键词判断，默认本月。
pub fn infer_time_dimension(column: &str, reference: Period) -> TimeDimension {
    let column = normalize_column_name(column);
    let last_year = contains_any(&column, LAST_YEAR_KEYWORDS);
    if is_cumulative_column(&column) {
        infer_cumulative(&column, reference, last_year).unwrap_or(if last_year {
            TimeDimension::LastYearCumulative
        } else {
            TimeDimension::CurrentCumulative
        })
    } else {
        infer_single_month(&column, reference, last_year).unwrap_or(if last_year {
            TimeDimension::LastYearMonth
        } else if contains_any(&column, PREV_MONTH_KEYWORDS) {
            TimeDimension::PrevMonth
        } else {
            TimeDimension::CurrentMonth
        })
    }
}

fn match_cumulative_end(year: i32, end: u32, reference: Period) -> Option<TimeDimension> {
    let prev_end = reference.month.checked_sub(1).filter(|m| *m > 0);
    if year == reference.year && end == reference.month {
        return Some(TimeDimension::CurrentCumulative);
    }
    if year == reference.year && Some(end) == prev_end {
        return Some(TimeDimension::PrevCumulative);
    }
    if year == reference.year - 1 && end == reference.month {
        return Some(TimeDimension::LastYearCumulative);
    }
    if year == reference.year - 1 && Some(end) == prev_end {
        return Some(TimeDimension::LastYearPrevCumulative);
    }
    None
}

// 只按列名中的年月判断，窗口外返回 None 交给关键词兜底
fn infer_cumulative(column: &str, reference: Period, last_year: bool) -> Option<TimeDimension> {
    let dated_end = extract_year_month_range(column)
        .map(|(year, _, end)| (year, end))
        .or_else(|| extract_year_month(column).map(|p| (p.year, p.month)));
    if let Some((year, end)) = dated_end {
        if let Some(dim) = match_cumulative_end(year, end, reference) {
            return Some(dim);
        }
    }

    if let Some((_, end)) = extract_month_range(column) {
        let year = if last_year {
            reference.year - 1
        } else {
            reference.year
        };
        if let Some(dim) = match_cumulative_end(year, end, reference) {
            return Some(dim);
        }
    }

    match extract_year_only(column) {
        Some(year) if year == reference.year => Some(TimeDimension::CurrentCumulative),
        Some(year) if year == reference.year - 1 => Some(TimeDimension::LastYearCumulative),
        _ => None,
    }
}

fn infer_single_month(column: &str, reference: Period, last_year: bool) -> Option<TimeDimension> {
    if let Some(point) = extract_year_month(column) {
        if point == reference {
            return Some(TimeDimension::CurrentMonth);
        }
        if point == reference.previous_month() {
            return Some(TimeDimension::PrevMonth);
        }
        if point.year == reference.year - 1 {
            return Some(TimeDimension::LastYearMonth);
        }
        return None;
    }

    let month = extract_month_only(column)?;
    if last_year && month == reference.month {
        Some(TimeDimension::LastYearMonth)
    } else if !last_year && month == reference.month {
        Some(TimeDimension::CurrentMonth)
    } else if !last_year && month == reference.previous_month().month {
        Some(TimeDimension::PrevMonth)
    } else {
        None
    }
}
