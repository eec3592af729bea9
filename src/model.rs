use serde::{Deserialize, Serialize};
use std::fmt;

/// 数据所属的统计年月。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) && (1900..=2999).contains(&year) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    /// 上一个月，一月回退到上一年十二月。
    pub fn previous_month(self) -> Self {
        if self.month <= 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    pub fn same_month_last_year(self) -> Self {
        Self {
            year: self.year - 1,
            month: self.month,
        }
    }

    /// 一月没有“1—上月”累计。
    pub fn has_previous_cumulative(self) -> bool {
        self.month > 1
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}年{}月", self.year, self.month)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeDimension {
    CurrentMonth,
    PrevMonth,
    LastYearMonth,
    CurrentCumulative,
    PrevCumulative,
    LastYearCumulative,
    LastYearPrevCumulative,
}

impl TimeDimension {
    pub const ALL: [TimeDimension; 7] = [
        TimeDimension::CurrentMonth,
        TimeDimension::PrevMonth,
        TimeDimension::LastYearMonth,
        TimeDimension::CurrentCumulative,
        TimeDimension::PrevCumulative,
        TimeDimension::LastYearCumulative,
        TimeDimension::LastYearPrevCumulative,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TimeDimension::CurrentMonth => "current_month",
            TimeDimension::PrevMonth => "prev_month",
            TimeDimension::LastYearMonth => "last_year_month",
            TimeDimension::CurrentCumulative => "current_cumulative",
            TimeDimension::PrevCumulative => "prev_cumulative",
            TimeDimension::LastYearCumulative => "last_year_cumulative",
            TimeDimension::LastYearPrevCumulative => "last_year_prev_cumulative",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Sales,
    Retail,
    Revenue,
    Room,
    Food,
    Goods,
}

impl Metric {
    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Sales => "sales",
            Metric::Retail => "retail",
            Metric::Revenue => "revenue",
            Metric::Room => "room",
            Metric::Food => "food",
            Metric::Goods => "goods",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "sales" => Some(Metric::Sales),
            "retail" => Some(Metric::Retail),
            "revenue" => Some(Metric::Revenue),
            "room" => Some(Metric::Room),
            "food" => Some(Metric::Food),
            "goods" => Some(Metric::Goods),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateKind {
    Month,
    Cumulative,
}

impl RateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RateKind::Month => "month_rate",
            RateKind::Cumulative => "cumulative_rate",
        }
    }
}

/// 单个指标的七个时间维度金额与两个增速。
///
/// 金额 0 视为“缺失”，回填只会覆盖 0 值。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSeries {
    pub current_month: f64,
    pub prev_month: f64,
    pub last_year_month: f64,
    pub current_cumulative: f64,
    pub prev_cumulative: f64,
    pub last_year_cumulative: f64,
    pub last_year_prev_cumulative: f64,
    pub month_rate: Option<f64>,
    pub cumulative_rate: Option<f64>,
    pub original_current_month: Option<f64>,
}

impl MetricSeries {
    pub fn get(&self, dim: TimeDimension) -> f64 {
        match dim {
            TimeDimension::CurrentMonth => self.current_month,
            TimeDimension::PrevMonth => self.prev_month,
            TimeDimension::LastYearMonth => self.last_year_month,
            TimeDimension::CurrentCumulative => self.current_cumulative,
            TimeDimension::PrevCumulative => self.prev_cumulative,
            TimeDimension::LastYearCumulative => self.last_year_cumulative,
            TimeDimension::LastYearPrevCumulative => self.last_year_prev_cumulative,
        }
    }

    pub fn slot_mut(&mut self, dim: TimeDimension) -> &mut f64 {
        match dim {
            TimeDimension::CurrentMonth => &mut self.current_month,
            TimeDimension::PrevMonth => &mut self.prev_month,
            TimeDimension::LastYearMonth => &mut self.last_year_month,
            TimeDimension::CurrentCumulative => &mut self.current_cumulative,
            TimeDimension::PrevCumulative => &mut self.prev_cumulative,
            TimeDimension::LastYearCumulative => &mut self.last_year_cumulative,
            TimeDimension::LastYearPrevCumulative => &mut self.last_year_prev_cumulative,
        }
    }

    pub fn rate(&self, kind: RateKind) -> Option<f64> {
        match kind {
            RateKind::Month => self.month_rate,
            RateKind::Cumulative => self.cumulative_rate,
        }
    }

    pub fn set_rate(&mut self, kind: RateKind, value: Option<f64>) {
        match kind {
            RateKind::Month => self.month_rate = value,
            RateKind::Cumulative => self.cumulative_rate = value,
        }
    }

    /// 仅当目标为 0 且来源为非 0 有限值时写入，返回是否写入。
    pub fn fill_if_missing(&mut self, dim: TimeDimension, value: f64) -> bool {
        let slot = self.slot_mut(dim);
        if *slot == 0.0 && value != 0.0 && value.is_finite() {
            *slot = value;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyIdentity {
    pub credit_code: String,
    pub name: String,
    pub industry_code: String,
    pub industry_type: String,
    pub company_scale: i64,
    pub row_no: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryField {
    GrainOilFood,
    Beverage,
    TobaccoLiquor,
    Clothing,
    DailyUse,
    Automobile,
}

impl CategoryField {
    pub const ALL: [CategoryField; 6] = [
        CategoryField::GrainOilFood,
        CategoryField::Beverage,
        CategoryField::TobaccoLiquor,
        CategoryField::Clothing,
        CategoryField::DailyUse,
        CategoryField::Automobile,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CategoryField::GrainOilFood => "cat_grain_oil_food",
            CategoryField::Beverage => "cat_beverage",
            CategoryField::TobaccoLiquor => "cat_tobacco_liquor",
            CategoryField::Clothing => "cat_clothing",
            CategoryField::DailyUse => "cat_daily_use",
            CategoryField::Automobile => "cat_automobile",
        }
    }
}

/// 商品分类小计（本月）。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryFigures {
    pub grain_oil_food: f64,
    pub beverage: f64,
    pub tobacco_liquor: f64,
    pub clothing: f64,
    pub daily_use: f64,
    pub automobile: f64,
}

impl CategoryFigures {
    pub fn get(&self, field: CategoryField) -> f64 {
        match field {
            CategoryField::GrainOilFood => self.grain_oil_food,
            CategoryField::Beverage => self.beverage,
            CategoryField::TobaccoLiquor => self.tobacco_liquor,
            CategoryField::Clothing => self.clothing,
            CategoryField::DailyUse => self.daily_use,
            CategoryField::Automobile => self.automobile,
        }
    }

    pub fn slot_mut(&mut self, field: CategoryField) -> &mut f64 {
        match field {
            CategoryField::GrainOilFood => &mut self.grain_oil_food,
            CategoryField::Beverage => &mut self.beverage,
            CategoryField::TobaccoLiquor => &mut self.tobacco_liquor,
            CategoryField::Clothing => &mut self.clothing,
            CategoryField::DailyUse => &mut self.daily_use,
            CategoryField::Automobile => &mut self.automobile,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyFlags {
    pub is_small_micro: bool,
    pub is_eat_wear_use: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupplementaryInfo {
    pub first_report_ip: String,
    pub fill_ip: String,
    pub network_sales: f64,
    pub opening_year: Option<i64>,
    pub opening_month: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordFamily {
    WholesaleRetail,
    AccommodationCatering,
}

impl RecordFamily {
    pub fn metrics(self) -> &'static [Metric] {
        match self {
            RecordFamily::WholesaleRetail => &[Metric::Sales, Metric::Retail],
            RecordFamily::AccommodationCatering => &[
                Metric::Revenue,
                Metric::Room,
                Metric::Food,
                Metric::Goods,
                Metric::Retail,
            ],
        }
    }

    /// 允许人工修正本月值的指标。
    pub fn editable_metrics(self) -> &'static [Metric] {
        match self {
            RecordFamily::WholesaleRetail => &[Metric::Sales, Metric::Retail],
            RecordFamily::AccommodationCatering => &[Metric::Revenue, Metric::Room, Metric::Food],
        }
    }
}

/// 批发零售企业月度记录。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WholesaleRetailRecord {
    pub id: Option<i64>,
    #[serde(flatten)]
    pub identity: CompanyIdentity,
    pub period: Period,
    pub sales: MetricSeries,
    pub retail: MetricSeries,
    pub retail_ratio: Option<f64>,
    pub categories: CategoryFigures,
    pub flags: CompanyFlags,
    pub extra: SupplementaryInfo,
    pub source_sheet: String,
    pub source_file: String,
}

/// 住宿餐饮企业月度记录。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccommodationCateringRecord {
    pub id: Option<i64>,
    #[serde(flatten)]
    pub identity: CompanyIdentity,
    pub period: Period,
    pub revenue: MetricSeries,
    pub room: MetricSeries,
    pub food: MetricSeries,
    pub goods: MetricSeries,
    pub retail: MetricSeries,
    pub categories: CategoryFigures,
    pub flags: CompanyFlags,
    pub extra: SupplementaryInfo,
    pub source_sheet: String,
    pub source_file: String,
}

/// Shared surface of the two canonical record families, used by the parser,
/// the backfill stages, the rate calculator and the stores.
pub trait CanonicalRecord: Clone + Send + Sync {
    const FAMILY: RecordFamily;

    fn blank(period: Period, source_sheet: &str, source_file: &str) -> Self;
    fn id(&self) -> Option<i64>;
    fn set_id(&mut self, id: i64);
    fn identity(&self) -> &CompanyIdentity;
    fn identity_mut(&mut self) -> &mut CompanyIdentity;
    fn period(&self) -> Period;
    fn series(&self, metric: Metric) -> Option<&MetricSeries>;
    fn series_mut(&mut self, metric: Metric) -> Option<&mut MetricSeries>;
    fn categories(&self) -> &CategoryFigures;
    fn categories_mut(&mut self) -> &mut CategoryFigures;
    fn flags(&self) -> &CompanyFlags;
    fn flags_mut(&mut self) -> &mut CompanyFlags;
    fn extra(&self) -> &SupplementaryInfo;
    fn extra_mut(&mut self) -> &mut SupplementaryInfo;
    fn source_sheet(&self) -> &str;
    fn source_file(&self) -> &str;

    fn retail_ratio(&self) -> Option<f64> {
        None
    }

    fn set_retail_ratio(&mut self, _value: Option<f64>) {}

    /// 记录导入时的本月原值，供人工修改后恢复。
    fn capture_originals(&mut self) {
        for metric in Self::FAMILY.editable_metrics() {
            if let Some(series) = self.series_mut(*metric) {
                if series.current_month != 0.0 {
                    series.original_current_month = Some(series.current_month);
                }
            }
        }
    }
}

impl CanonicalRecord for WholesaleRetailRecord {
    const FAMILY: RecordFamily = RecordFamily::WholesaleRetail;

    fn blank(period: Period, source_sheet: &str, source_file: &str) -> Self {
        Self {
            id: None,
            identity: CompanyIdentity::default(),
            period,
            sales: MetricSeries::default(),
            retail: MetricSeries::default(),
            retail_ratio: None,
            categories: CategoryFigures::default(),
            flags: CompanyFlags::default(),
            extra: SupplementaryInfo::default(),
            source_sheet: source_sheet.to_string(),
            source_file: source_file.to_string(),
        }
    }

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn identity(&self) -> &CompanyIdentity {
        &self.identity
    }

    fn identity_mut(&mut self) -> &mut CompanyIdentity {
        &mut self.identity
    }

    fn period(&self) -> Period {
        self.period
    }

    fn series(&self, metric: Metric) -> Option<&MetricSeries> {
        match metric {
            Metric::Sales => Some(&self.sales),
            Metric::Retail => Some(&self.retail),
            _ => None,
        }
    }

    fn series_mut(&mut self, metric: Metric) -> Option<&mut MetricSeries> {
        match metric {
            Metric::Sales => Some(&mut self.sales),
            Metric::Retail => Some(&mut self.retail),
            _ => None,
        }
    }

    fn categories(&self) -> &CategoryFigures {
        &self.categories
    }

    fn categories_mut(&mut self) -> &mut CategoryFigures {
        &mut self.categories
    }

    fn flags(&self) -> &CompanyFlags {
        &self.flags
    }

    fn flags_mut(&mut self) -> &mut CompanyFlags {
        &mut self.flags
    }

    fn extra(&self) -> &SupplementaryInfo {
        &self.extra
    }

    fn extra_mut(&mut self) -> &mut SupplementaryInfo {
        &mut self.extra
    }

    fn source_sheet(&self) -> &str {
        &self.source_sheet
    }

    fn source_file(&self) -> &str {
        &self.source_file
    }

    fn retail_ratio(&self) -> Option<f64> {
        self.retail_ratio
    }

    fn set_retail_ratio(&mut self, value: Option<f64>) {
        self.retail_ratio = value;
    }
}

impl CanonicalRecord for AccommodationCateringRecord {
    const FAMILY: RecordFamily = RecordFamily::AccommodationCatering;

    fn blank(period: Period, source_sheet: &str, source_file: &str) -> Self {
        Self {
            id: None,
            identity: CompanyIdentity::default(),
            period,
            revenue: MetricSeries::default(),
            room: MetricSeries::default(),
            food: MetricSeries::default(),
            goods: MetricSeries::default(),
            retail: MetricSeries::default(),
            categories: CategoryFigures::default(),
            flags: CompanyFlags::default(),
            extra: SupplementaryInfo::default(),
            source_sheet: source_sheet.to_string(),
            source_file: source_file.to_string(),
        }
    }

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn identity(&self) -> &CompanyIdentity {
        &self.identity
    }

    fn identity_mut(&mut self) -> &mut CompanyIdentity {
        &mut self.identity
    }

    fn period(&self) -> Period {
        self.period
    }

    fn series(&self, metric: Metric) -> Option<&MetricSeries> {
        match metric {
            Metric::Revenue => Some(&self.revenue),
            Metric::Room => Some(&self.room),
            Metric::Food => Some(&self.food),
            Metric::Goods => Some(&self.goods),
            Metric::Retail => Some(&self.retail),
            Metric::Sales => None,
        }
    }

    fn series_mut(&mut self, metric: Metric) -> Option<&mut MetricSeries> {
        match metric {
            Metric::Revenue => Some(&mut self.revenue),
            Metric::Room => Some(&mut self.room),
            Metric::Food => Some(&mut self.food),
            Metric::Goods => Some(&mut self.goods),
            Metric::Retail => Some(&mut self.retail),
            Metric::Sales => None,
        }
    }

    fn categories(&self) -> &CategoryFigures {
        &self.categories
    }

    fn categories_mut(&mut self) -> &mut CategoryFigures {
        &mut self.categories
    }

    fn flags(&self) -> &CompanyFlags {
        &self.flags
    }

    fn flags_mut(&mut self) -> &mut CompanyFlags {
        &mut self.flags
    }

    fn extra(&self) -> &SupplementaryInfo {
        &self.extra
    }

    fn extra_mut(&mut self) -> &mut SupplementaryInfo {
        &mut self.extra
    }

    fn source_sheet(&self) -> &str {
        &self.source_sheet
    }

    fn source_file(&self) -> &str {
        &self.source_file
    }
}

/// 快照中单个指标的四个口径。上年值缺失时为 None。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotFigures {
    pub current_month: f64,
    pub current_cumulative: f64,
    pub last_year_month: Option<f64>,
    pub last_year_cumulative: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotIdentity {
    pub credit_code: String,
    pub name: String,
    pub industry_code: String,
    pub company_scale: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WholesaleRetailSnapshot {
    pub id: Option<i64>,
    pub period: Period,
    pub snapshot_name: String,
    #[serde(flatten)]
    pub identity: SnapshotIdentity,
    pub sales: SnapshotFigures,
    pub retail: SnapshotFigures,
    pub categories: CategoryFigures,
    pub source_sheet: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccommodationCateringSnapshot {
    pub id: Option<i64>,
    pub period: Period,
    pub snapshot_name: String,
    #[serde(flatten)]
    pub identity: SnapshotIdentity,
    pub revenue: SnapshotFigures,
    pub room: SnapshotFigures,
    pub food: SnapshotFigures,
    pub goods: SnapshotFigures,
    pub source_sheet: String,
}

pub trait SnapshotRecord: Clone + Send + Sync {
    const FAMILY: RecordFamily;
    const METRICS: &'static [Metric];

    fn blank(period: Period, source_sheet: &str) -> Self;
    fn id(&self) -> Option<i64>;
    fn set_id(&mut self, id: i64);
    fn period(&self) -> Period;
    fn snapshot_name(&self) -> &str;
    fn identity(&self) -> &SnapshotIdentity;
    fn identity_mut(&mut self) -> &mut SnapshotIdentity;
    fn figures(&self, metric: Metric) -> Option<&SnapshotFigures>;
    fn figures_mut(&mut self, metric: Metric) -> Option<&mut SnapshotFigures>;
    fn source_sheet(&self) -> &str;

    fn categories(&self) -> Option<&CategoryFigures> {
        None
    }

    fn categories_mut(&mut self) -> Option<&mut CategoryFigures> {
        None
    }
}

impl SnapshotRecord for WholesaleRetailSnapshot {
    const FAMILY: RecordFamily = RecordFamily::WholesaleRetail;
    const METRICS: &'static [Metric] = &[Metric::Sales, Metric::Retail];

    fn blank(period: Period, source_sheet: &str) -> Self {
        Self {
            id: None,
            period,
            snapshot_name: source_sheet.to_string(),
            identity: SnapshotIdentity::default(),
            sales: SnapshotFigures::default(),
            retail: SnapshotFigures::default(),
            categories: CategoryFigures::default(),
            source_sheet: source_sheet.to_string(),
        }
    }

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn period(&self) -> Period {
        self.period
    }

    fn snapshot_name(&self) -> &str {
        &self.snapshot_name
    }

    fn identity(&self) -> &SnapshotIdentity {
        &self.identity
    }

    fn identity_mut(&mut self) -> &mut SnapshotIdentity {
        &mut self.identity
    }

    fn figures(&self, metric: Metric) -> Option<&SnapshotFigures> {
        match metric {
            Metric::Sales => Some(&self.sales),
            Metric::Retail => Some(&self.retail),
            _ => None,
        }
    }

    fn figures_mut(&mut self, metric: Metric) -> Option<&mut SnapshotFigures> {
        match metric {
            Metric::Sales => Some(&mut self.sales),
            Metric::Retail => Some(&mut self.retail),
            _ => None,
        }
    }

    fn source_sheet(&self) -> &str {
        &self.source_sheet
    }

    fn categories(&self) -> Option<&CategoryFigures> {
        Some(&self.categories)
    }

    fn categories_mut(&mut self) -> Option<&mut CategoryFigures> {
        Some(&mut self.categories)
    }
}

impl SnapshotRecord for AccommodationCateringSnapshot {
    const FAMILY: RecordFamily = RecordFamily::AccommodationCatering;
    const METRICS: &'static [Metric] = &[Metric::Revenue, Metric::Room, Metric::Food, Metric::Goods];

    fn blank(period: Period, source_sheet: &str) -> Self {
        Self {
            id: None,
            period,
            snapshot_name: source_sheet.to_string(),
            identity: SnapshotIdentity::default(),
            revenue: SnapshotFigures::default(),
            room: SnapshotFigures::default(),
            food: SnapshotFigures::default(),
            goods: SnapshotFigures::default(),
            source_sheet: source_sheet.to_string(),
        }
    }

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn period(&self) -> Period {
        self.period
    }

    fn snapshot_name(&self) -> &str {
        &self.snapshot_name
    }

    fn identity(&self) -> &SnapshotIdentity {
        &self.identity
    }

    fn identity_mut(&mut self) -> &mut SnapshotIdentity {
        &mut self.identity
    }

    fn figures(&self, metric: Metric) -> Option<&SnapshotFigures> {
        match metric {
            Metric::Revenue => Some(&self.revenue),
            Metric::Room => Some(&self.room),
            Metric::Food => Some(&self.food),
            Metric::Goods => Some(&self.goods),
            _ => None,
        }
    }

    fn figures_mut(&mut self, metric: Metric) -> Option<&mut SnapshotFigures> {
        match metric {
            Metric::Revenue => Some(&mut self.revenue),
            Metric::Room => Some(&mut self.room),
            Metric::Food => Some(&mut self.food),
            Metric::Goods => Some(&mut self.goods),
            _ => None,
        }
    }

    fn source_sheet(&self) -> &str {
        &self.source_sheet
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetKind {
    WholesaleRetail,
    AccommodationCatering,
    WholesaleRetailSnapshot,
    AccommodationCateringSnapshot,
    Summary,
    Unknown,
}

impl SheetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SheetKind::WholesaleRetail => "wholesale_retail",
            SheetKind::AccommodationCatering => "accommodation_catering",
            SheetKind::WholesaleRetailSnapshot => "wholesale_retail_snapshot",
            SheetKind::AccommodationCateringSnapshot => "accommodation_catering_snapshot",
            SheetKind::Summary => "summary",
            SheetKind::Unknown => "unknown",
        }
    }

    pub fn is_main_table(self) -> bool {
        matches!(
            self,
            SheetKind::WholesaleRetail | SheetKind::AccommodationCatering
        )
    }

    pub fn is_snapshot(self) -> bool {
        matches!(
            self,
            SheetKind::WholesaleRetailSnapshot | SheetKind::AccommodationCateringSnapshot
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetRecognition {
    pub sheet_name: String,
    pub kind: SheetKind,
    pub confidence: f64,
    pub period: Option<Period>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetStatus {
    Imported,
    Skipped,
    Error,
}

impl SheetStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SheetStatus::Imported => "imported",
            SheetStatus::Skipped => "skipped",
            SheetStatus::Error => "error",
        }
    }
}

/// 单个 Sheet 的导入结果。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseResult {
    pub sheet_name: String,
    pub sheet_kind: SheetKind,
    pub status: SheetStatus,
    pub period: Option<Period>,
    pub imported_rows: usize,
    pub error_rows: usize,
    pub errors: Vec<String>,
    pub message: String,
    pub duration_ms: u64,
}

impl ParseResult {
    pub fn new(sheet_name: &str, sheet_kind: SheetKind, status: SheetStatus) -> Self {
        Self {
            sheet_name: sheet_name.to_string(),
            sheet_kind,
            status,
            period: None,
            imported_rows: 0,
            error_rows: 0,
            errors: Vec::new(),
            message: String::new(),
            duration_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub import_id: String,
    pub filename: String,
    pub reference_period: Option<Period>,
    pub total_sheets: usize,
    pub imported_sheets: usize,
    pub skipped_sheets: usize,
    pub error_sheets: usize,
    pub total_rows: usize,
    pub imported_rows: usize,
    pub error_rows: usize,
    pub duration_ms: u64,
    pub sheets: Vec<ParseResult>,
}

impl ImportReport {
    pub fn record_sheet(&mut self, result: ParseResult) {
        self.total_sheets += 1;
        match result.status {
            SheetStatus::Imported => {
                self.imported_sheets += 1;
                self.imported_rows += result.imported_rows;
            }
            SheetStatus::Skipped => self.skipped_sheets += 1,
            SheetStatus::Error => self.error_sheets += 1,
        }
        self.error_rows += result.error_rows;
        self.total_rows += result.imported_rows + result.error_rows;
        self.sheets.push(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn previous_month_wraps_year_in_january() {
        let jan = Period::new(2026, 1).expect("valid period");
        assert_eq!(jan.previous_month(), Period { year: 2025, month: 12 });
        assert!(!jan.has_previous_cumulative());
        let dec = Period::new(2025, 12).expect("valid period");
        assert_eq!(dec.previous_month(), Period { year: 2025, month: 11 });
        assert_eq!(dec.same_month_last_year(), Period { year: 2024, month: 12 });
    }

    #[test]
    fn period_rejects_out_of_range_month() {
        assert!(Period::new(2025, 0).is_none());
        assert!(Period::new(2025, 13).is_none());
    }

    #[test]
    fn fill_if_missing_only_overwrites_zero() {
        let mut series = MetricSeries {
            current_month: 5.0,
            ..MetricSeries::default()
        };
        assert!(!series.fill_if_missing(TimeDimension::CurrentMonth, 9.0));
        assert_eq!(series.current_month, 5.0);
        assert!(series.fill_if_missing(TimeDimension::PrevMonth, 9.0));
        assert_eq!(series.prev_month, 9.0);
        assert!(!series.fill_if_missing(TimeDimension::LastYearMonth, 0.0));
        assert!(!series.fill_if_missing(TimeDimension::LastYearMonth, f64::NAN));
    }

    #[test]
    fn report_counts_sheets_by_status() {
        let mut report = ImportReport::default();
        let mut ok = ParseResult::new("批发", SheetKind::WholesaleRetail, SheetStatus::Imported);
        ok.imported_rows = 3;
        ok.error_rows = 1;
        report.record_sheet(ok);
        report.record_sheet(ParseResult::new("汇总", SheetKind::Summary, SheetStatus::Skipped));
        report.record_sheet(ParseResult::new("损坏", SheetKind::Unknown, SheetStatus::Error));
        assert_eq!(report.total_sheets, 3);
        assert_eq!(report.imported_sheets, 1);
        assert_eq!(report.error_sheets, 1);
        assert_eq!(report.skipped_sheets, 1);
        assert_eq!(report.total_rows, 4);
        assert_eq!(report.error_rows, 1);
    }

    #[test]
    fn capture_originals_records_nonzero_current_month() {
        let period = Period::new(2025, 12).expect("valid period");
        let mut record = AccommodationCateringRecord::blank(period, "住宿", "a.xlsx");
        record.revenue.current_month = 80.0;
        record.capture_originals();
        assert_eq!(record.revenue.original_current_month, Some(80.0));
        assert_eq!(record.room.original_current_month, None);
        assert_eq!(record.goods.original_current_month, None);
    }
}
