//! Versioned keyword tables consulted by the classifier and the field mapper.
//!
//! Every entry is a regex alternation matched against a normalized column
//! name. Order is significant: the first matching entry wins.

use crate::field_mapper::CanonicalField;
use crate::model::{CategoryField, Metric, SheetKind};

/// 规则表版本，随导入开始事件一起上报。
pub const RULES_VERSION: &str = "2025.12-1";

/// 表名命中关键词时的加分。
pub const NAME_KEYWORD_BONUS: f64 = 0.2;

/// 增速列向前回看的列数。
pub const RATE_LOOKBACK_COLUMNS: usize = 4;

pub const SNAPSHOT_CONFIDENCE: f64 = 0.9;
pub const SNAPSHOT_NAME_BONUS: f64 = 0.1;

pub struct ClassifierRule {
    pub kind: SheetKind,
    pub key_fields: &'static [&'static str],
    pub name_keywords: &'static [&'static str],
    pub threshold: f64,
}

pub const CLASSIFIER_RULES: &[ClassifierRule] = &[
    ClassifierRule {
        kind: SheetKind::WholesaleRetail,
        key_fields: &[
            "统一社会信用代码",
            "单位详细名称|单位名称|企业名称",
            "行业代码",
            "销售额",
            "零售额",
            "单位规模",
            "粮油食品类",
        ],
        name_keywords: &["批发", "零售", "批零"],
        threshold: 0.5,
    },
    ClassifierRule {
        kind: SheetKind::AccommodationCatering,
        key_fields: &[
            "统一社会信用代码",
            "单位详细名称|单位名称|企业名称",
            "行业代码",
            "营业额",
            "客房收入",
            "餐费收入",
        ],
        name_keywords: &["住宿", "餐饮", "住餐"],
        threshold: 0.5,
    },
    ClassifierRule {
        kind: SheetKind::Summary,
        key_fields: &[
            "限上零售额|社零|社会消费品零售总额",
            "增速|增长率",
            "小微|吃穿用|限下",
            "汇总|合计|全市|全省|地区",
        ],
        name_keywords: &["限上零售额", "限下", "小微", "吃穿用", "汇总", "社零", "增速"],
        threshold: 0.3,
    },
];

/// 快照表列名中的口径标记。
pub const SNAPSHOT_CURRENT_CUMULATIVE_MARKERS: &[&str] = &["本年-1—本月", "本年-1-本月", "本年-1–本月"];
pub const SNAPSHOT_LAST_YEAR_CUMULATIVE_MARKERS: &[&str] = &["上年-1—本月", "上年-1-本月", "上年-1–本月"];
pub const SNAPSHOT_CURRENT_MONTH_MARKERS: &[&str] = &["本年-本月"];
pub const SNAPSHOT_LAST_YEAR_MONTH_MARKERS: &[&str] = &["上年-本月"];

/// 出现任一关键词的快照表按住餐处理。
pub const SNAPSHOT_AC_KEYWORDS: &[&str] = &["营业额", "客房", "餐费"];
pub const SNAPSHOT_NAME_KEYWORDS: &[&str] = &["批零", "批发", "零售", "住餐", "住宿", "餐饮"];

pub const RATE_KEYWORDS: &[&str] = &["增速", "增长率", "同比"];
pub const CUMULATIVE_KEYWORDS: &[&str] = &["累计", "1-", "1—", "1–"];
pub const LAST_YEAR_KEYWORDS: &[&str] = &["上年", "去年"];
pub const PREV_MONTH_KEYWORDS: &[&str] = &["上月"];

/// 视为空值的占位符。
pub const PLACEHOLDER_CELLS: &[&str] = &["-", "—", "－", "/", "--", "——"];

pub struct FieldRule {
    pub pattern: &'static str,
    pub exclude: &'static [&'static str],
    pub target: CanonicalField,
}

pub const IDENTITY_FIELD_RULES: &[FieldRule] = &[
    FieldRule {
        pattern: "统一社会信用代码",
        exclude: &[],
        target: CanonicalField::CreditCode,
    },
    FieldRule {
        pattern: "单位详细名称|单位名称|企业名称",
        exclude: &[],
        target: CanonicalField::Name,
    },
    FieldRule {
        pattern: "行业代码",
        exclude: &["说明"],
        target: CanonicalField::IndustryCode,
    },
    FieldRule {
        pattern: "单位规模",
        exclude: &[],
        target: CanonicalField::CompanyScale,
    },
    FieldRule {
        pattern: "零售额占比|零销比",
        exclude: &[],
        target: CanonicalField::RetailRatio,
    },
    FieldRule {
        pattern: "粮油食品类",
        exclude: &[],
        target: CanonicalField::Category(CategoryField::GrainOilFood),
    },
    FieldRule {
        pattern: "饮料类",
        exclude: &[],
        target: CanonicalField::Category(CategoryField::Beverage),
    },
    FieldRule {
        pattern: "烟酒类",
        exclude: &[],
        target: CanonicalField::Category(CategoryField::TobaccoLiquor),
    },
    FieldRule {
        pattern: "服装鞋帽针纺织品类|服装",
        exclude: &[],
        target: CanonicalField::Category(CategoryField::Clothing),
    },
    FieldRule {
        pattern: "日用品类",
        exclude: &[],
        target: CanonicalField::Category(CategoryField::DailyUse),
    },
    FieldRule {
        pattern: "汽车类",
        exclude: &[],
        target: CanonicalField::Category(CategoryField::Automobile),
    },
    FieldRule {
        pattern: "小微企业",
        exclude: &[],
        target: CanonicalField::SmallMicro,
    },
    FieldRule {
        pattern: "吃穿用",
        exclude: &[],
        target: CanonicalField::EatWearUse,
    },
    FieldRule {
        pattern: "第一次上报的?IP|首次上报IP",
        exclude: &[],
        target: CanonicalField::FirstReportIp,
    },
    FieldRule {
        pattern: "填报IP",
        exclude: &[],
        target: CanonicalField::FillIp,
    },
    FieldRule {
        pattern: "网络销售额",
        exclude: &[],
        target: CanonicalField::NetworkSales,
    },
    FieldRule {
        pattern: "开业年份",
        exclude: &[],
        target: CanonicalField::OpeningYear,
    },
    FieldRule {
        pattern: "开业月份",
        exclude: &[],
        target: CanonicalField::OpeningMonth,
    },
];

pub struct MetricRule {
    pub pattern: &'static str,
    pub exclude: &'static [&'static str],
    pub metric: Metric,
}

pub const WHOLESALE_RETAIL_METRIC_RULES: &[MetricRule] = &[
    MetricRule {
        pattern: "销售额",
        exclude: &["网络"],
        metric: Metric::Sales,
    },
    MetricRule {
        pattern: "零售额",
        exclude: &[],
        metric: Metric::Retail,
    },
];

pub const ACCOMMODATION_CATERING_METRIC_RULES: &[MetricRule] = &[
    MetricRule {
        pattern: "营业额",
        exclude: &[],
        metric: Metric::Revenue,
    },
    MetricRule {
        pattern: "客房",
        exclude: &[],
        metric: Metric::Room,
    },
    MetricRule {
        pattern: "餐费",
        exclude: &[],
        metric: Metric::Food,
    },
    MetricRule {
        pattern: "商品销售额|销售额",
        exclude: &["网络"],
        metric: Metric::Goods,
    },
    MetricRule {
        pattern: "零售额",
        exclude: &[],
        metric: Metric::Retail,
    },
];

/// 行业代码前两位到行业类型。
pub const INDUSTRY_PREFIXES: &[(&str, &str)] = &[
    ("51", "wholesale"),
    ("52", "retail"),
    ("61", "accommodation"),
    ("62", "catering"),
];

pub fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| text.contains(k))
}
