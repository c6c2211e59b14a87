pub mod tushare;

pub use tushare::TushareProvider;

use async_trait::async_trait;

use crate::pipeline::ReportRequest;

// One reporting period for one symbol, the three statements merged. Every
// metric is optional: upstream coverage is spotty and a period with no data
// at all still occupies a row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPeriod {
    pub year: i32,
    pub quarter: u8,
    pub revenue: Option<f64>,
    pub total_revenue: Option<f64>,
    pub oper_cost: Option<f64>,
    pub n_income_attr_p: Option<f64>,
    pub netprofit: Option<f64>,
    pub total_assets: Option<f64>,
    pub total_liab: Option<f64>,
    pub total_cur_assets: Option<f64>,
    pub total_cur_liab: Option<f64>,
    pub inventories: Option<f64>,
    pub roe: Option<f64>,
    pub roa: Option<f64>,
}

impl RawPeriod {
    pub fn has_payload(&self) -> bool {
        self.revenue.is_some()
            || self.total_revenue.is_some()
            || self.oper_cost.is_some()
            || self.n_income_attr_p.is_some()
            || self.netprofit.is_some()
            || self.total_assets.is_some()
            || self.total_liab.is_some()
            || self.total_cur_assets.is_some()
            || self.total_cur_liab.is_some()
            || self.inventories.is_some()
            || self.roe.is_some()
            || self.roa.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SymbolFrame {
    pub symbol: String,
    // ascending period order
    pub rows: Vec<RawPeriod>,
}

/// A source of periodic financial statements.
///
/// The caller's API token travels as an argument on every call; nothing about
/// the caller is retained between requests. Implementations tolerate gaps in
/// individual statements and return an error only when the provider cannot be
/// used at all.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn fetch_financials(
        &self,
        request: &ReportRequest,
        token: &str,
    ) -> anyhow::Result<Vec<SymbolFrame>>;

    fn name(&self) -> &str;
}
