//! Domain types shared by the decoder, assembler and decision engine

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Length of the race key substring carried by every record
pub const RACE_KEY_LEN: usize = 16;

/// Composite race identity: date, venue, meeting, day and race number.
///
/// Ordering is chronological (date first), then venue and race number,
/// which is the order histories and day plans are walked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct RaceId {
    pub date: NaiveDate,
    pub venue_code: u8,
    pub meeting_no: u8,
    pub day_no: u8,
    pub race_no: u8,
}

impl RaceId {
    /// Parse a 16-digit key `YYYYMMDDVVKKNNRR`
    pub fn parse(key: &str) -> Option<Self> {
        if key.len() != RACE_KEY_LEN || !key.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let year: i32 = key[0..4].parse().ok()?;
        let month: u32 = key[4..6].parse().ok()?;
        let day: u32 = key[6..8].parse().ok()?;

        Some(Self {
            date: NaiveDate::from_ymd_opt(year, month, day)?,
            venue_code: key[8..10].parse().ok()?,
            meeting_no: key[10..12].parse().ok()?,
            day_no: key[12..14].parse().ok()?,
            race_no: key[14..16].parse().ok()?,
        })
    }

    pub fn key(&self) -> String {
        format!(
            "{:04}{:02}{:02}{:02}{:02}{:02}{:02}",
            self.date.year(),
            self.date.month(),
            self.date.day(),
            self.venue_code,
            self.meeting_no,
            self.day_no,
            self.race_no
        )
    }
}

impl fmt::Display for RaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl From<RaceId> for String {
    fn from(id: RaceId) -> Self {
        id.key()
    }
}

impl TryFrom<String> for RaceId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RaceId::parse(&value).ok_or_else(|| format!("invalid race key: {}", value))
    }
}

/// JRA venue code to name mapping
pub fn venue_name(code: u8) -> &'static str {
    match code {
        1 => "札幌",
        2 => "函館",
        3 => "福島",
        4 => "新潟",
        5 => "東京",
        6 => "中山",
        7 => "中京",
        8 => "京都",
        9 => "阪神",
        10 => "小倉",
        _ => "不明",
    }
}

/// A physical race
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Race {
    pub id: RaceId,
    pub venue: String,
    /// Meeting/day label, e.g. "1回5日"
    pub round: String,
}

impl Race {
    pub fn from_id(id: RaceId) -> Self {
        Self {
            id,
            venue: venue_name(id.venue_code).to_string(),
            round: format!("{}回{}日", id.meeting_no, id.day_no),
        }
    }
}

/// Horse sex as carried by the card record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Sex {
    Colt,
    Filly,
    Gelding,
    #[default]
    Unknown,
}

impl Sex {
    pub fn from_code(code: &str) -> Self {
        match code {
            "1" => Sex::Colt,
            "2" => Sex::Filly,
            "3" => Sex::Gelding,
            _ => Sex::Unknown,
        }
    }
}

/// One measured past performance of a horse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorResult {
    pub race_id: RaceId,
    pub rank: Option<u8>,
    pub pace_index: Option<f64>,
    /// Final 3-furlong time in seconds
    pub late_speed: Option<f64>,
}

/// Lag features: the previous race's own measured values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LagFeatures {
    pub prev_rank: Option<u8>,
    pub prev_pace_index: Option<f64>,
    pub prev_late_speed: Option<f64>,
}

impl LagFeatures {
    pub fn is_complete(&self) -> bool {
        self.prev_rank.is_some() && self.prev_pace_index.is_some() && self.prev_late_speed.is_some()
    }
}

/// Entrant in a race, as seen at snapshot time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entrant {
    pub race_id: RaceId,
    pub horse_number: u8,
    /// Pedigree registration number, stable across races
    pub horse_id: String,
    pub horse_name: String,
    pub bracket: Option<u8>,
    pub jockey: String,
    pub trainer: String,
    pub weight_kg: Option<f64>,
    pub sex: Sex,
    pub coat_code: String,
    pub age: Option<u8>,
    /// Races strictly before this one, oldest first
    pub prior_results: Vec<PriorResult>,
    /// `None` when the horse has no prior race
    pub lag: Option<LagFeatures>,
}

/// Latest win-market quote for an entrant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsQuote {
    pub race_id: RaceId,
    pub horse_number: u8,
    pub win_odds: f64,
    pub popularity_rank: u8,
    /// MMDDhhmm announcement stamp from the feed
    pub announced_at: String,
}

impl OddsQuote {
    /// Odds per popularity rank; above ~1.2 the crowd is under-betting the horse
    pub fn odds_per_popularity(&self) -> f64 {
        self.win_odds / self.popularity_rank.max(1) as f64
    }
}

/// Exacta (first-second) quote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExactaQuote {
    pub race_id: RaceId,
    pub first: u8,
    pub second: u8,
    pub odds: f64,
    pub popularity_rank: Option<u16>,
}

/// Where a win probability came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbabilitySource {
    Model,
    Fallback,
}

/// Win probability and EV for one entrant; recomputed every cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub race_id: RaceId,
    pub horse_number: u8,
    pub win_probability: f64,
    pub ev: f64,
    pub win_odds: f64,
    pub popularity_rank: u8,
    pub source: ProbabilitySource,
}

impl Prediction {
    pub fn odds_per_popularity(&self) -> f64 {
        self.win_odds / self.popularity_rank.max(1) as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BetType {
    Win,
    Wide,
}

impl fmt::Display for BetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BetType::Win => write!(f, "WIN"),
            BetType::Wide => write!(f, "WIDE"),
        }
    }
}

/// Horses a bet is placed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Selection {
    Single(u8),
    /// Ordered (anchor, partner)
    Pair(u8, u8),
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::Single(h) => write!(f, "{}", h),
            Selection::Pair(a, b) => write!(f, "{}-{}", a, b),
        }
    }
}

/// Betting instruction. Never mutated after emission; resizing yields a new Bet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bet {
    pub race_id: RaceId,
    pub selection: Selection,
    pub bet_type: BetType,
    pub stake_amount: i64,
    pub rationale_tag: String,
}

impl Bet {
    pub fn with_stake(&self, stake_amount: i64) -> Bet {
        Bet {
            stake_amount,
            ..self.clone()
        }
    }
}

/// Settled result of a race: finishing ranks and payouts per 100 yen
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RaceOutcome {
    pub ranks: BTreeMap<u8, u8>,
    pub win: BTreeMap<u8, i64>,
    pub place: BTreeMap<u8, i64>,
    /// Keyed by (lower, higher) horse number
    pub wide: BTreeMap<(u8, u8), i64>,
}

impl RaceOutcome {
    pub fn has_payouts(&self) -> bool {
        !self.win.is_empty() || !self.place.is_empty() || !self.wide.is_empty()
    }

    pub fn wide_payout(&self, a: u8, b: u8) -> Option<i64> {
        let key = if a < b { (a, b) } else { (b, a) };
        self.wide.get(&key).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_race_id_parse_and_key() {
        let id = RaceId::parse("2026020705010301").unwrap();
        assert_eq!(id.date, NaiveDate::from_ymd_opt(2026, 2, 7).unwrap());
        assert_eq!(id.venue_code, 5);
        assert_eq!(id.meeting_no, 1);
        assert_eq!(id.day_no, 3);
        assert_eq!(id.race_no, 1);
        assert_eq!(id.key(), "2026020705010301");
    }

    #[test]
    fn test_race_id_rejects_bad_keys() {
        assert!(RaceId::parse("20260207050103").is_none());
        assert!(RaceId::parse("2026020705010A01").is_none());
        assert!(RaceId::parse("2026023105010301").is_none()); // Feb 31
    }

    #[test]
    fn test_race_id_orders_by_date_first() {
        let early = RaceId::parse("2026020110010112").unwrap();
        let late = RaceId::parse("2026020705010301").unwrap();
        assert!(early < late);
    }

    #[test]
    fn test_race_id_serializes_as_key() {
        let id = RaceId::parse("2026020705010301").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"2026020705010301\"");
        let back: RaceId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_race_from_id() {
        let race = Race::from_id(RaceId::parse("2026020705010301").unwrap());
        assert_eq!(race.venue, "東京");
        assert_eq!(race.round, "1回3日");
    }

    #[test]
    fn test_venue_name() {
        assert_eq!(venue_name(1), "札幌");
        assert_eq!(venue_name(10), "小倉");
        assert_eq!(venue_name(99), "不明");
    }

    #[test]
    fn test_sex_from_code() {
        assert_eq!(Sex::from_code("1"), Sex::Colt);
        assert_eq!(Sex::from_code("2"), Sex::Filly);
        assert_eq!(Sex::from_code("3"), Sex::Gelding);
        assert_eq!(Sex::from_code(""), Sex::Unknown);
    }

    #[test]
    fn test_bet_with_stake_leaves_original() {
        let bet = Bet {
            race_id: RaceId::parse("2026020705010301").unwrap(),
            selection: Selection::Single(7),
            bet_type: BetType::Win,
            stake_amount: 1000,
            rationale_tag: "SPEAR".to_string(),
        };
        let resized = bet.with_stake(300);
        assert_eq!(bet.stake_amount, 1000);
        assert_eq!(resized.stake_amount, 300);
        assert_eq!(resized.selection, Selection::Single(7));
    }

    #[test]
    fn test_wide_payout_is_unordered() {
        let mut outcome = RaceOutcome::default();
        outcome.wide.insert((3, 11), 540);
        assert_eq!(outcome.wide_payout(11, 3), Some(540));
        assert_eq!(outcome.wide_payout(3, 11), Some(540));
        assert!(outcome.has_payouts());
    }
}
