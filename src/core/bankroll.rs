//! Bankroll Controller
//!
//! Daily spend cap with drawdown throttling across race days.
//!
//! State machine, evaluated once per settled day:
//!
//! - `Normal` (multiplier 1.0): a day whose loss exceeds
//!   `loss_trigger_fraction` of that day's stake moves to `Throttled`.
//! - `Throttled` (multiplier `throttle_multiplier`): the first winning day
//!   moves straight back to `Normal`.
//!
//! A day is opened as a [`DayBook`], bets are approved against it, and the
//! book is committed with [`BankrollController::close_day`]. A book that is
//! dropped instead of closed changes nothing.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

use crate::error::BankrollError;
use crate::models::Bet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BankrollConfig {
    pub base_daily_cap: i64,
    /// Smallest tradable stake; stakes are multiples of it
    pub min_unit: i64,
    pub throttle_multiplier: f64,
    /// Loss as a fraction of the day's stake that triggers throttling
    pub loss_trigger_fraction: f64,
    pub initial_balance: i64,
    /// `false` keeps the cap fixed at `base_daily_cap`
    pub throttle_enabled: bool,
}

impl Default for BankrollConfig {
    fn default() -> Self {
        Self {
            base_daily_cap: 10_000,
            min_unit: 100,
            throttle_multiplier: 0.5,
            loss_trigger_fraction: 0.0,
            initial_balance: 100_000,
            throttle_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BankrollMode {
    Normal,
    Throttled,
}

impl fmt::Display for BankrollMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BankrollMode::Normal => write!(f, "NORMAL"),
            BankrollMode::Throttled => write!(f, "THROTTLED"),
        }
    }
}

/// Persistent bankroll state, committed once per closed day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankrollState {
    pub balance: i64,
    /// Balance before the last closed day
    pub period_start_balance: i64,
    /// Stake of the last closed day
    pub spent_today: i64,
    /// Cap the next opened day gets
    pub daily_cap: i64,
    pub throttle_multiplier: f64,
    /// Consecutive losing days; reported only, never a control input
    pub loss_streak: u32,
    pub mode: BankrollMode,
    pub last_settled: Option<NaiveDate>,
}

impl BankrollState {
    pub fn initial(config: &BankrollConfig) -> Self {
        Self {
            balance: config.initial_balance,
            period_start_balance: config.initial_balance,
            spent_today: 0,
            daily_cap: config.base_daily_cap,
            throttle_multiplier: 1.0,
            loss_streak: 0,
            mode: BankrollMode::Normal,
            last_settled: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RejectReason {
    /// Less than one unit left under today's cap
    CapExhausted,
    /// Requested stake itself is under one unit
    BelowMinUnit,
}

/// Result of checking one bet against the day's remaining cap
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum StakeDecision {
    Approved(Bet),
    Resized { bet: Bet, requested: i64 },
    Rejected { bet: Bet, reason: RejectReason },
}

impl StakeDecision {
    /// The bet to hand to the executor, if any
    pub fn approved_bet(&self) -> Option<&Bet> {
        match self {
            StakeDecision::Approved(bet) | StakeDecision::Resized { bet, .. } => Some(bet),
            StakeDecision::Rejected { .. } => None,
        }
    }
}

/// One race day's spending ledger
#[derive(Debug, Clone, Serialize)]
pub struct DayBook {
    pub date: NaiveDate,
    pub daily_cap: i64,
    min_unit: i64,
    spent: i64,
    approved: Vec<Bet>,
}

impl DayBook {
    pub fn spent(&self) -> i64 {
        self.spent
    }

    pub fn remaining(&self) -> i64 {
        self.daily_cap - self.spent
    }

    pub fn approved(&self) -> &[Bet] {
        &self.approved
    }

    /// Withdraw approved bets matching `void`, refunding their stakes
    pub fn void_where<F: FnMut(&Bet) -> bool>(&mut self, mut void: F) -> Vec<Bet> {
        let (voided, kept): (Vec<Bet>, Vec<Bet>) =
            std::mem::take(&mut self.approved).into_iter().partition(|bet| void(bet));
        self.approved = kept;
        self.spent -= voided.iter().map(|bet| bet.stake_amount).sum::<i64>();
        voided
    }

    /// Approve `min(requested, remaining)` floored to whole units, or reject
    pub fn approve(&mut self, bet: &Bet) -> StakeDecision {
        let requested = bet.stake_amount;
        let allowed = requested.min(self.remaining());
        let allowed = (allowed / self.min_unit) * self.min_unit;

        if allowed < self.min_unit {
            let reason = if requested < self.min_unit {
                RejectReason::BelowMinUnit
            } else {
                RejectReason::CapExhausted
            };
            warn!(
                race_id = %bet.race_id,
                selection = %bet.selection,
                requested,
                remaining = self.remaining(),
                "bet rejected: {:?}",
                reason
            );
            return StakeDecision::Rejected {
                bet: bet.clone(),
                reason,
            };
        }

        self.spent += allowed;
        if allowed == requested {
            self.approved.push(bet.clone());
            StakeDecision::Approved(bet.clone())
        } else {
            info!(
                race_id = %bet.race_id,
                selection = %bet.selection,
                requested,
                allowed,
                "stake resized to fit daily cap"
            );
            let resized = bet.with_stake(allowed);
            self.approved.push(resized.clone());
            StakeDecision::Resized {
                bet: resized,
                requested,
            }
        }
    }
}

/// What a closed day did to the bankroll
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DaySummary {
    pub date: NaiveDate,
    pub staked: i64,
    pub returned: i64,
    pub pnl: i64,
    pub balance: i64,
    pub mode_before: BankrollMode,
    pub mode_after: BankrollMode,
    pub next_cap: i64,
}

/// Owns the bankroll state and its day lifecycle
#[derive(Debug, Clone)]
pub struct BankrollController {
    config: BankrollConfig,
    state: BankrollState,
}

impl BankrollController {
    pub fn new(config: BankrollConfig) -> Self {
        let state = BankrollState::initial(&config);
        Self { config, state }
    }

    /// Resume from persisted state
    pub fn from_state(config: BankrollConfig, state: BankrollState) -> Self {
        Self { config, state }
    }

    pub fn config(&self) -> &BankrollConfig {
        &self.config
    }

    pub fn state(&self) -> &BankrollState {
        &self.state
    }

    /// Cap for the next opened day
    pub fn current_cap(&self) -> i64 {
        if !self.config.throttle_enabled {
            return self.config.base_daily_cap;
        }
        let unit = self.config.min_unit;
        let scaled = (self.config.base_daily_cap as f64 * self.state.throttle_multiplier) as i64;
        ((scaled / unit) * unit).max(unit)
    }

    fn check_date(&self, date: NaiveDate) -> Result<(), BankrollError> {
        match self.state.last_settled {
            Some(last_settled) if date <= last_settled => {
                Err(BankrollError::DayAlreadySettled { date, last_settled })
            }
            _ => Ok(()),
        }
    }

    /// Start a day with nothing spent
    pub fn open_day(&self, date: NaiveDate) -> Result<DayBook, BankrollError> {
        self.check_date(date)?;
        Ok(DayBook {
            date,
            daily_cap: self.current_cap(),
            min_unit: self.config.min_unit,
            spent: 0,
            approved: Vec::new(),
        })
    }

    /// Commit a finished day: P&L, balance, loss streak and mode transition
    pub fn close_day(&mut self, book: DayBook, returned: i64) -> Result<DaySummary, BankrollError> {
        self.check_date(book.date)?;

        let pnl = returned - book.spent;
        let mode_before = self.state.mode;
        let state = &mut self.state;

        state.period_start_balance = state.balance;
        state.balance += pnl;
        state.spent_today = book.spent;
        state.last_settled = Some(book.date);

        if pnl < 0 {
            state.loss_streak += 1;
        } else if pnl > 0 {
            state.loss_streak = 0;
        }

        if self.config.throttle_enabled {
            match state.mode {
                BankrollMode::Normal => {
                    let trigger = self.config.loss_trigger_fraction * book.spent as f64;
                    if pnl < 0 && (-pnl) as f64 > trigger {
                        state.mode = BankrollMode::Throttled;
                        state.throttle_multiplier = self.config.throttle_multiplier;
                    }
                }
                BankrollMode::Throttled => {
                    if pnl > 0 {
                        state.mode = BankrollMode::Normal;
                        state.throttle_multiplier = 1.0;
                    }
                }
            }
        }

        let next_cap = self.current_cap();
        self.state.daily_cap = next_cap;

        if mode_before != self.state.mode {
            info!(
                "{}: {} -> {} (pnl {:+}, next cap {})",
                book.date, mode_before, self.state.mode, pnl, next_cap
            );
        }

        Ok(DaySummary {
            date: book.date,
            staked: book.spent,
            returned,
            pnl,
            balance: self.state.balance,
            mode_before,
            mode_after: self.state.mode,
            next_cap,
        })
    }
}

impl Default for BankrollController {
    fn default() -> Self {
        Self::new(BankrollConfig::default())
    }
}
