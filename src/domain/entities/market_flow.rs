use crate::domain::entities::chip_snapshot::ChipSnapshot;
use crate::domain::values::investor_category::InvestorCategory;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Institutional flow of every listed stock on one trading day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketFlow {
    pub date: NaiveDate,
    pub stocks: Vec<ChipSnapshot>,
}

impl MarketFlow {
    pub fn net_for(&self, category: InvestorCategory) -> f64 {
        self.stocks.iter().map(|s| s.net_for(category)).sum()
    }

    pub fn net_total(&self) -> f64 {
        self.stocks.iter().map(ChipSnapshot::net_total).sum()
    }

    /// Up to `n` net buyers, largest first.
    pub fn top_buyers(&self, n: usize) -> Vec<&ChipSnapshot> {
        self.ranked(n, |s| s.net_total() > 0.0, |a, b| b.total_cmp(a))
    }

    /// Up to `n` net sellers, largest sale first.
    pub fn top_sellers(&self, n: usize) -> Vec<&ChipSnapshot> {
        self.ranked(n, |s| s.net_total() < 0.0, |a, b| a.total_cmp(b))
    }

    fn ranked<F, C>(&self, n: usize, keep: F, cmp: C) -> Vec<&ChipSnapshot>
    where
        F: Fn(&ChipSnapshot) -> bool,
        C: Fn(&f64, &f64) -> Ordering,
    {
        let mut picked: Vec<&ChipSnapshot> = self.stocks.iter().filter(|s| keep(s)).collect();
        picked.sort_by(|a, b| cmp(&a.net_total(), &b.net_total()).then_with(|| a.stock_id.cmp(&b.stock_id)));
        picked.truncate(n);
        picked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::chip_snapshot::ParticipantFlow;

    fn stock(id: &str, net: f64) -> ChipSnapshot {
        ChipSnapshot {
            stock_id: id.into(),
            stock_name: None,
            date: NaiveDate::from_ymd_opt(2024, 5, 3).unwrap(),
            participants: vec![ParticipantFlow::new("foreign_ex_dealer", InvestorCategory::Foreign, 1_000.0 + net, 1_000.0)],
        }
    }

    #[test]
    fn test_rankings_split_by_sign() {
        let flow = MarketFlow {
            date: NaiveDate::from_ymd_opt(2024, 5, 3).unwrap(),
            stocks: vec![stock("A", 10.0), stock("B", -30.0), stock("C", 50.0), stock("D", 0.0), stock("E", -5.0)],
        };
        let buyers: Vec<&str> = flow.top_buyers(10).iter().map(|s| s.stock_id.as_str()).collect();
        let sellers: Vec<&str> = flow.top_sellers(1).iter().map(|s| s.stock_id.as_str()).collect();
        assert_eq!(buyers, vec!["C", "A"]);
        assert_eq!(sellers, vec!["B"]);
        assert_eq!(flow.net_total(), 25.0);
        assert_eq!(flow.net_for(InvestorCategory::Trust), 0.0);
    }
}
