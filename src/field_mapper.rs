use crate::model::{CategoryField, Metric, Period, RateKind, RecordFamily, TimeDimension};
use crate::normalize::{infer_time_dimension, is_cumulative_column, normalize_headers};
use crate::rules::{
    contains_any, MetricRule, ACCOMMODATION_CATERING_METRIC_RULES, IDENTITY_FIELD_RULES,
    RATE_KEYWORDS, RATE_LOOKBACK_COLUMNS, WHOLESALE_RETAIL_METRIC_RULES,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// 记录中的规范字段。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    CreditCode,
    Name,
    IndustryCode,
    CompanyScale,
    RetailRatio,
    Category(CategoryField),
    SmallMicro,
    EatWearUse,
    FirstReportIp,
    FillIp,
    NetworkSales,
    OpeningYear,
    OpeningMonth,
    Amount(Metric, TimeDimension),
    Rate(Metric, RateKind),
}

impl CanonicalField {
    pub fn canonical_name(&self) -> String {
        match self {
            CanonicalField::CreditCode => "credit_code".to_string(),
            CanonicalField::Name => "name".to_string(),
            CanonicalField::IndustryCode => "industry_code".to_string(),
            CanonicalField::CompanyScale => "company_scale".to_string(),
            CanonicalField::RetailRatio => "retail_ratio".to_string(),
            CanonicalField::Category(c) => c.as_str().to_string(),
            CanonicalField::SmallMicro => "is_small_micro".to_string(),
            CanonicalField::EatWearUse => "is_eat_wear_use".to_string(),
            CanonicalField::FirstReportIp => "first_report_ip".to_string(),
            CanonicalField::FillIp => "fill_ip".to_string(),
            CanonicalField::NetworkSales => "network_sales".to_string(),
            CanonicalField::OpeningYear => "opening_year".to_string(),
            CanonicalField::OpeningMonth => "opening_month".to_string(),
            CanonicalField::Amount(m, d) => format!("{}_{}", m.as_str(), d.as_str()),
            CanonicalField::Rate(m, k) => format!("{}_{}", m.as_str(), k.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMapping {
    pub column_index: usize,
    pub column_name: String,
    pub field: CanonicalField,
    pub canonical_name: String,
    pub time_dimension: Option<TimeDimension>,
}

/// 列序号到字段映射。未映射的列不出现。
pub type ColumnMapping = BTreeMap<usize, FieldMapping>;

fn identity_matchers() -> &'static [Regex] {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        IDENTITY_FIELD_RULES
            .iter()
            .map(|rule| Regex::new(rule.pattern).expect("identity field regex"))
            .collect()
    })
}

fn metric_matchers(family: RecordFamily) -> &'static [(Regex, &'static MetricRule)] {
    static WR: OnceLock<Vec<(Regex, &'static MetricRule)>> = OnceLock::new();
    static AC: OnceLock<Vec<(Regex, &'static MetricRule)>> = OnceLock::new();
    let (cell, rules) = match family {
        RecordFamily::WholesaleRetail => (&WR, WHOLESALE_RETAIL_METRIC_RULES),
        RecordFamily::AccommodationCatering => (&AC, ACCOMMODATION_CATERING_METRIC_RULES),
    };
    cell.get_or_init(|| {
        rules
            .iter()
            .map(|rule| (Regex::new(rule.pattern).expect("metric regex"), rule))
            .collect()
    })
}

pub struct FieldMapper {
    family: RecordFamily,
    reference: Period,
}

impl FieldMapper {
    pub fn new(family: RecordFamily, reference: Period) -> Self {
        Self { family, reference }
    }

    /// 该行业族中列名对应的指标。
    pub fn metric_for(&self, column: &str) -> Option<Metric> {
        metric_matchers(self.family)
            .iter()
            .find(|(re, rule)| re.is_match(column) && !contains_any(column, rule.exclude))
            .map(|(_, rule)| rule.metric)
    }

    /// 映射整行表头；列名先规范化。同一字段被多列命中时保留最先出现的一列。
    pub fn map_columns(&self, headers: &[String]) -> ColumnMapping {
        let normalized = normalize_headers(headers);
        let mut mapping = ColumnMapping::new();
        let mut seen = std::collections::HashSet::new();
        for idx in 0..normalized.len() {
            if normalized[idx].is_empty() {
                continue;
            }
            let Some((field, dim)) = self.map_column(&normalized, idx) else {
                continue;
            };
            if !seen.insert(field) {
                continue;
            }
            mapping.insert(
                idx,
                FieldMapping {
                    column_index: idx,
                    column_name: normalized[idx].clone(),
                    field,
                    canonical_name: field.canonical_name(),
                    time_dimension: dim,
                },
            );
        }
        mapping
    }

    fn map_column(
        &self,
        normalized: &[String],
        idx: usize,
    ) -> Option<(CanonicalField, Option<TimeDimension>)> {
        let column = normalized[idx].as_str();
        if contains_any(column, RATE_KEYWORDS) {
            return self.map_rate_column(normalized, idx);
        }
        if let Some(field) = map_identity_column(column) {
            return Some((field, None));
        }
        let metric = self.metric_for(column)?;
        let dim = infer_time_dimension(column, self.reference);
        Some((CanonicalField::Amount(metric, dim), Some(dim)))
    }

    fn map_rate_column(
        &self,
        normalized: &[String],
        idx: usize,
    ) -> Option<(CanonicalField, Option<TimeDimension>)> {
        let column = normalized[idx].as_str();
        let kind = if is_cumulative_column(column) {
            RateKind::Cumulative
        } else {
            RateKind::Month
        };
        let metric = self.metric_for(column).or_else(|| {
            let start = idx.saturating_sub(RATE_LOOKBACK_COLUMNS);
            normalized[start..idx]
                .iter()
                .rev()
                .find_map(|prev| self.metric_for(prev))
        })?;
        Some((CanonicalField::Rate(metric, kind), None))
    }
}

pub fn map_identity_column(column: &str) -> Option<CanonicalField> {
    IDENTITY_FIELD_RULES
        .iter()
        .zip(identity_matchers())
        .find(|(rule, re)| re.is_match(column) && !contains_any(column, rule.exclude))
        .map(|(rule, _)| rule.target)
}
