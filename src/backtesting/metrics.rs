//! Backtest Metrics
//!
//! Hit rate, ROI, profit factor and drawdown over a fund simulation.

use super::simulator::{BetRecord, DayRecord};
use crate::core::bankroll::BankrollMode;
use crate::models::{venue_name, BetType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Backtest evaluation metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestMetrics {
    // Basic metrics
    pub total_bets: usize,
    /// Bets on races that never got a payout record
    pub unsettled_bets: usize,
    pub winning_bets: usize,
    pub hit_rate: f64,
    pub roi: f64,

    // Win/Loss
    pub total_stake: i64,
    pub total_returned: i64,
    pub gross_profit: i64,
    pub gross_loss: i64,
    pub net_profit: i64,
    pub profit_factor: f64,

    // Bankroll
    pub days: usize,
    pub days_throttled: usize,
    /// Largest fall of cumulative day P&L from its running peak
    pub max_drawdown: i64,
    pub max_drawdown_pct: f64,
    pub final_balance: i64,
    pub final_cap: i64,
}

impl Default for BacktestMetrics {
    fn default() -> Self {
        Self {
            total_bets: 0,
            unsettled_bets: 0,
            winning_bets: 0,
            hit_rate: 0.0,
            roi: 0.0,
            total_stake: 0,
            total_returned: 0,
            gross_profit: 0,
            gross_loss: 0,
            net_profit: 0,
            profit_factor: 0.0,
            days: 0,
            days_throttled: 0,
            max_drawdown: 0,
            max_drawdown_pct: 0.0,
            final_balance: 0,
            final_cap: 0,
        }
    }
}

/// Calculate metrics from bet and day records
///
/// Hit rate, ROI and profit factor count settled bets only; drawdown
/// follows the day P&L, where unsettled stakes were refunded.
pub fn calculate_metrics(bets: &[BetRecord], days: &[DayRecord], initial_balance: i64) -> BacktestMetrics {
    let settled: Vec<&BetRecord> = bets.iter().filter(|b| b.settled).collect();

    let total_bets = bets.len();
    let unsettled_bets = total_bets - settled.len();
    let winning_bets = settled.iter().filter(|b| b.won).count();
    let hit_rate = if settled.is_empty() {
        0.0
    } else {
        winning_bets as f64 / settled.len() as f64
    };

    // Profit/Loss calculation
    let total_stake: i64 = settled.iter().map(|b| b.stake).sum();
    let total_returned: i64 = settled.iter().map(|b| b.returned).sum();
    let profits: Vec<i64> = settled.iter().map(|b| b.profit).collect();
    let gross_profit: i64 = profits.iter().filter(|&&p| p > 0).sum();
    let gross_loss: i64 = profits.iter().filter(|&&p| p < 0).map(|p| p.abs()).sum();
    let net_profit: i64 = profits.iter().sum();

    let profit_factor = if gross_loss > 0 {
        gross_profit as f64 / gross_loss as f64
    } else if gross_profit > 0 {
        f64::INFINITY
    } else {
        0.0
    };

    let roi = if total_stake > 0 {
        net_profit as f64 / total_stake as f64
    } else {
        0.0
    };

    // Drawdown on cumulative day P&L, starting from zero
    let mut cumulative = 0i64;
    let mut peak = 0i64;
    let mut max_drawdown = 0i64;
    for day in days {
        cumulative += day.pnl;
        peak = peak.max(cumulative);
        max_drawdown = max_drawdown.max(peak - cumulative);
    }

    let max_drawdown_pct = if initial_balance > 0 {
        max_drawdown as f64 / initial_balance as f64
    } else {
        0.0
    };

    let days_throttled = days
        .iter()
        .filter(|d| d.mode_before == BankrollMode::Throttled)
        .count();

    let (final_balance, final_cap) = days
        .last()
        .map(|d| (d.balance, d.next_cap))
        .unwrap_or((initial_balance, 0));

    BacktestMetrics {
        total_bets,
        unsettled_bets,
        winning_bets,
        hit_rate,
        roi,
        total_stake,
        total_returned,
        gross_profit,
        gross_loss,
        net_profit,
        profit_factor,
        days: days.len(),
        days_throttled,
        max_drawdown,
        max_drawdown_pct,
        final_balance,
        final_cap,
    }
}

/// Analysis results by dimension
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionAnalysis {
    pub key: String,
    pub bets: usize,
    pub wins: usize,
    pub hit_rate: f64,
    pub stake: i64,
    pub profit: i64,
    pub roi: f64,
}

fn analyze_by<K, F>(bets: &[BetRecord], key_of: F) -> Vec<DimensionAnalysis>
where
    K: ToString + Eq + std::hash::Hash,
    F: Fn(&BetRecord) -> K,
{
    let mut grouped: HashMap<K, Vec<&BetRecord>> = HashMap::new();
    for bet in bets.iter().filter(|b| b.settled) {
        grouped.entry(key_of(bet)).or_default().push(bet);
    }

    let mut results: Vec<DimensionAnalysis> = grouped
        .iter()
        .map(|(key, group)| {
            let total = group.len();
            let wins = group.iter().filter(|b| b.won).count();
            let stake: i64 = group.iter().map(|b| b.stake).sum();
            let profit: i64 = group.iter().map(|b| b.profit).sum();

            DimensionAnalysis {
                key: key.to_string(),
                bets: total,
                wins,
                hit_rate: if total > 0 {
                    wins as f64 / total as f64
                } else {
                    0.0
                },
                stake,
                profit,
                roi: if stake > 0 {
                    profit as f64 / stake as f64
                } else {
                    0.0
                },
            }
        })
        .collect();

    results.sort_by(|a, b| a.key.cmp(&b.key));
    results
}

/// Analyze bet results by racecourse
pub fn analyze_by_venue(bets: &[BetRecord]) -> Vec<DimensionAnalysis> {
    analyze_by(bets, |b| venue_name(b.race_id.venue_code))
}

/// Analyze bet results by ticket type (Spear WIN vs Shield WIDE)
pub fn analyze_by_bet_type(bets: &[BetRecord]) -> Vec<DimensionAnalysis> {
    analyze_by(bets, |b| match b.bet_type {
        BetType::Win => "WIN",
        BetType::Wide => "WIDE",
    })
}
