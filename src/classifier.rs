use crate::model::{SheetKind, SheetRecognition};
use crate::normalize::{extract_year_month, find_reference_period, normalize_headers};
use crate::rules::{
    contains_any, ClassifierRule, CLASSIFIER_RULES, NAME_KEYWORD_BONUS, SNAPSHOT_AC_KEYWORDS,
    SNAPSHOT_CONFIDENCE, SNAPSHOT_CURRENT_CUMULATIVE_MARKERS, SNAPSHOT_CURRENT_MONTH_MARKERS,
    SNAPSHOT_LAST_YEAR_CUMULATIVE_MARKERS, SNAPSHOT_LAST_YEAR_MONTH_MARKERS,
    SNAPSHOT_NAME_BONUS, SNAPSHOT_NAME_KEYWORDS,
};
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

struct CompiledRule {
    rule: &'static ClassifierRule,
    key_fields: Vec<Regex>,
}

fn compiled_rules() -> &'static [CompiledRule] {
    static RULES: OnceLock<Vec<CompiledRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        CLASSIFIER_RULES
            .iter()
            .map(|rule| CompiledRule {
                rule,
                key_fields: rule
                    .key_fields
                    .iter()
                    .map(|p| Regex::new(p).expect("classifier key field regex"))
                    .collect(),
            })
            .collect()
    })
}

fn has_snapshot_markers(headers: &[String]) -> bool {
    let markers = SNAPSHOT_CURRENT_MONTH_MARKERS
        .iter()
        .chain(SNAPSHOT_CURRENT_CUMULATIVE_MARKERS)
        .chain(SNAPSHOT_LAST_YEAR_MONTH_MARKERS)
        .chain(SNAPSHOT_LAST_YEAR_CUMULATIVE_MARKERS)
        .copied()
        .collect::<Vec<_>>();
    headers.iter().any(|h| contains_any(h, &markers))
}

fn score_rule(compiled: &CompiledRule, sheet_name: &str, headers: &[String]) -> f64 {
    let total = compiled.key_fields.len();
    if total == 0 {
        return 0.0;
    }
    let matched = compiled
        .key_fields
        .iter()
        .filter(|re| headers.iter().any(|h| re.is_match(h)))
        .count();
    let mut score = matched as f64 / total as f64;
    if contains_any(sheet_name, compiled.rule.name_keywords) {
        score += NAME_KEYWORD_BONUS;
    }
    score.clamp(0.0, 1.0)
}

fn recognition_period(
    kind: SheetKind,
    sheet_name: &str,
    headers: &[String],
) -> Option<crate::model::Period> {
    if kind.is_snapshot() {
        extract_year_month(sheet_name).or_else(|| find_reference_period(headers))
    } else {
        find_reference_period(headers).or_else(|| extract_year_month(sheet_name))
    }
}

/// 根据表名与列名判断 Sheet 类型。结果只依赖输入，不读取任何外部状态。
pub fn classify_sheet(sheet_name: &str, headers: &[String]) -> SheetRecognition {
    let headers = normalize_headers(headers);

    if has_snapshot_markers(&headers) {
        let kind = if headers.iter().any(|h| contains_any(h, SNAPSHOT_AC_KEYWORDS)) {
            SheetKind::AccommodationCateringSnapshot
        } else {
            SheetKind::WholesaleRetailSnapshot
        };
        let mut confidence = SNAPSHOT_CONFIDENCE;
        if contains_any(sheet_name, SNAPSHOT_NAME_KEYWORDS) {
            confidence += SNAPSHOT_NAME_BONUS;
        }
        debug!(sheet = sheet_name, kind = kind.as_str(), "识别为快照表");
        return SheetRecognition {
            sheet_name: sheet_name.to_string(),
            kind,
            confidence: confidence.clamp(0.0, 1.0),
            period: recognition_period(kind, sheet_name, &headers),
        };
    }

    // 同分时按规则顺序取先者；最高分未过该规则的阈值即为 Unknown
    let mut best: Option<(&CompiledRule, f64)> = None;
    for compiled in compiled_rules() {
        let score = score_rule(compiled, sheet_name, &headers);
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((compiled, score));
        }
    }

    let (kind, confidence) = match best {
        Some((compiled, score)) if score >= compiled.rule.threshold => (compiled.rule.kind, score),
        Some((_, score)) => (SheetKind::Unknown, score),
        None => (SheetKind::Unknown, 0.0),
    };
    debug!(
        sheet = sheet_name,
        kind = kind.as_str(),
        confidence,
        "Sheet 识别完成"
    );
    SheetRecognition {
        sheet_name: sheet_name.to_string(),
        kind,
        confidence,
        period: recognition_period(kind, sheet_name, &headers),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Period;

    fn headers(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|c| c.to_string()).collect()
    }

    fn wholesale_headers() -> Vec<String> {
        headers(&[
            "统一社会信用代码",
            "单位详细名称",
            "行业代码",
            "单位规模",
            "2025年12月销售额",
            "2025年12月零售额",
            "粮油食品类",
        ])
    }

    fn catering_headers() -> Vec<String> {
        headers(&[
            "统一社会信用代码",
            "单位详细名称",
            "行业代码",
            "2025年12月营业额",
            "2025年12月客房收入",
            "2025年12月餐费收入",
            "2025年12月商品销售额",
        ])
    }

    #[test]
    fn recognizes_main_tables_by_key_fields() {
        for name in ["批发", "零售"] {
            let rec = classify_sheet(name, &wholesale_headers());
            assert_eq!(rec.kind, SheetKind::WholesaleRetail, "sheet {name}");
            assert_eq!(rec.period, Period::new(2025, 12));
            assert!(rec.confidence <= 1.0);
        }
        for name in ["住宿", "餐饮"] {
            let rec = classify_sheet(name, &catering_headers());
            assert_eq!(rec.kind, SheetKind::AccommodationCatering, "sheet {name}");
        }
    }

    #[test]
    fn recognizes_summary_sheets() {
        let cols = headers(&["地区", "限上零售额", "增速"]);
        for name in ["限上零售额", "小微", "吃穿用"] {
            let rec = classify_sheet(name, &cols);
            assert_eq!(rec.kind, SheetKind::Summary, "sheet {name}");
        }
    }

    #[test]
    fn recognizes_snapshots_and_reads_period_from_name() {
        let cols = headers(&[
            "统一社会信用代码",
            "单位详细名称",
            "营业额-本年-本月",
            "营业额-本年-1—本月",
        ]);
        let rec = classify_sheet("2024年3月住", &cols);
        assert_eq!(rec.kind, SheetKind::AccommodationCateringSnapshot);
        assert_eq!(rec.period, Period::new(2024, 3));
        assert!((rec.confidence - 0.9).abs() < 1e-9);

        let cols = headers(&["统一社会信用代码", "商品销售额-本年-本月", "零售额-上年-本月"]);
        let rec = classify_sheet("2025年11月批零", &cols);
        assert_eq!(rec.kind, SheetKind::WholesaleRetailSnapshot);
        assert!((rec.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn unmatched_sheet_is_unknown() {
        let rec = classify_sheet("说明", &headers(&["备注", "填表人"]));
        assert_eq!(rec.kind, SheetKind::Unknown);
        assert_eq!(rec.confidence, 0.0);
    }

    #[test]
    fn best_rule_below_its_threshold_is_unknown_even_if_a_lower_rule_passes() {
        // 批零 0.49 未过 0.5；汇总 0.45 虽过 0.3 但不是最高分
        let cols = headers(&["统一社会信用代码", "单位详细名称", "增速"]);
        let rec = classify_sheet("批发增速", &cols);
        assert_eq!(rec.kind, SheetKind::Unknown);
        assert!((rec.confidence - (2.0 / 7.0 + 0.2)).abs() < 1e-9);
    }

    #[test]
    fn equal_scores_resolve_to_rule_order() {
        let mut cols = wholesale_headers();
        cols.extend(headers(&["2025年12月营业额", "2025年12月客房收入", "2025年12月餐费收入"]));
        let rec = classify_sheet("明细", &cols);
        assert_eq!(rec.kind, SheetKind::WholesaleRetail);
        assert_eq!(rec.confidence, 1.0);
    }

    #[test]
    fn classification_is_deterministic() {
        let first = classify_sheet("批发", &wholesale_headers());
        for _ in 0..5 {
            assert_eq!(classify_sheet("批发", &wholesale_headers()), first);
        }
    }
}
