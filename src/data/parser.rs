//! Fixed-width record decoder
//!
//! Turns one raw Shift-JIS feed record plus its data-spec classification into
//! a typed record, driven entirely by the layout tables in [`super::spec`].
//!
//! # Example
//!
//! ```no_run
//! use keiba::data::parser::{RecordDecoder, TypedRecord};
//!
//! let decoder = RecordDecoder::new();
//! let raw = std::fs::read("0B15_20260207.txt").unwrap();
//! for line in raw.split(|b| *b == b'\n') {
//!     if let Ok(TypedRecord::Card(card)) = decoder.decode(line, "0B15") {
//!         println!("{} {} {}", card.race_id, card.horse_number, card.horse_name);
//!     }
//! }
//! ```

use crate::error::{validate_horse_number, validate_odds};
use crate::models::{ExactaQuote, OddsQuote, RaceId, Sex};
use encoding_rs::SHIFT_JIS;
use serde::Serialize;
use std::str::FromStr;
use thiserror::Error;

use super::spec::{
    default_layouts, DataSpec, FieldSpec, FieldValues, RecordFields, RecordKind, RecordSpec,
    RACE_KEY_RANGE,
};

/// Card data for one entrant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardRecord {
    pub race_id: RaceId,
    pub horse_number: u8,
    pub horse_id: String,
    pub horse_name: String,
    pub bracket: Option<u8>,
    pub sex: Sex,
    pub coat_code: String,
    pub age: Option<u8>,
    pub weight_kg: Option<f64>,
    pub jockey: String,
    pub trainer: String,
}

/// Card data plus the measured finish of that race
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntrantResultRecord {
    pub card: CardRecord,
    /// `None` for non-finishers
    pub finish_rank: Option<u8>,
    pub pace_index: Option<f64>,
    pub late_speed: Option<f64>,
}

/// Payouts per 100 yen
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayoutRecord {
    pub race_id: RaceId,
    pub win: Vec<(u8, i64)>,
    pub place: Vec<(u8, i64)>,
    /// Pairs stored low-high
    pub wide: Vec<((u8, u8), i64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WinOddsRecord {
    pub race_id: RaceId,
    pub announced_at: String,
    pub registered_count: usize,
    pub quotes: Vec<OddsQuote>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExactaOddsRecord {
    pub race_id: RaceId,
    pub announced_at: String,
    pub quotes: Vec<ExactaQuote>,
}

/// A decoded record ready for the assembler
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypedRecord {
    Card(CardRecord),
    EntrantResult(EntrantResultRecord),
    Payout(PayoutRecord),
    WinOdds(WinOddsRecord),
    ExactaOdds(ExactaOddsRecord),
}

impl TypedRecord {
    pub fn race_id(&self) -> RaceId {
        match self {
            TypedRecord::Card(r) => r.race_id,
            TypedRecord::EntrantResult(r) => r.card.race_id,
            TypedRecord::Payout(r) => r.race_id,
            TypedRecord::WinOdds(r) => r.race_id,
            TypedRecord::ExactaOdds(r) => r.race_id,
        }
    }
}

/// Why a record never reached the assembler
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("unknown data spec {0:?}")]
    UnknownDataSpec(String),

    #[error("record tag {tag:?} not accepted for {data_spec}")]
    TagNotAllowed { data_spec: DataSpec, tag: String },

    #[error("record too short ({0} bytes)")]
    TooShort(usize),

    #[error("unusable {0}")]
    MalformedKey(&'static str),
}

impl Rejection {
    /// Short label used when counting rejections
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::UnknownDataSpec(_) => "unknown_data_spec",
            Rejection::TagNotAllowed { .. } => "tag_not_allowed",
            Rejection::TooShort(_) => "too_short",
            Rejection::MalformedKey(_) => "malformed_key",
        }
    }
}

pub type Decoded = Result<TypedRecord, Rejection>;

/// Convert fullwidth digits to halfwidth
pub fn normalize_fullwidth_numbers(text: &str) -> String {
    let fullwidth = "０１２３４５６７８９";
    let halfwidth = "0123456789";

    text.chars()
        .map(|c| {
            if let Some(idx) = fullwidth.find(c) {
                halfwidth.chars().nth(idx / 3).unwrap_or(c)
            } else {
                c
            }
        })
        .collect()
}

/// Slice, decode and trim one field. Never fails: unusable bytes give "".
pub fn decode_field(raw: &[u8], base: usize, field: &FieldSpec) -> String {
    let start = base + field.offset;
    if start >= raw.len() {
        return String::new();
    }
    let end = (start + field.length).min(raw.len());

    SHIFT_JIS
        .decode_without_bom_handling_and_without_replacement(&raw[start..end])
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn extract_fields<'a>(
    raw: &[u8],
    base: usize,
    fields: impl IntoIterator<Item = &'a FieldSpec>,
) -> FieldValues {
    fields
        .into_iter()
        .map(|f| (f.name, decode_field(raw, base, f)))
        .collect()
}

/// Extract every field, group slot and loop item a layout describes
pub fn extract(raw: &[u8], layout: &RecordSpec) -> RecordFields {
    let mut record = RecordFields {
        fields: extract_fields(raw, 0, layout.fields()),
        ..Default::default()
    };

    for group in layout.groups {
        let slots = (0..group.count)
            .map(|i| group.start + i * group.item_length)
            .take_while(|base| base + group.item_length <= raw.len())
            .map(|base| extract_fields(raw, base, group.fields))
            .collect();
        record.groups.insert(group.name, slots);
    }

    if let Some(items) = layout.items {
        let declared = decode_field(raw, 0, &items.count_field);
        let count: usize = parse_number(&declared).unwrap_or(0);
        record.fields.insert(items.count_field.name, declared);

        for i in 0..count {
            let base = items.header_length + i * items.item_length;
            // truncated feed record: keep what we have
            if base + items.item_length > raw.len() {
                break;
            }
            record.items.push(extract_fields(raw, base, items.fields));
        }
    }

    record
}

/// Decodes raw records against a registry of layouts.
///
/// The registry doubles as the tag allow-list: a tag is accepted for a data
/// spec exactly when a layout is registered for that pair.
pub struct RecordDecoder {
    layouts: Vec<(DataSpec, &'static RecordSpec)>,
}

impl Default for RecordDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordDecoder {
    pub fn new() -> Self {
        Self {
            layouts: default_layouts(),
        }
    }

    /// Register an additional layout, replacing any existing one for the same tag
    pub fn with_layout(mut self, data_spec: DataSpec, layout: &'static RecordSpec) -> Self {
        self.layouts
            .retain(|(spec, l)| !(*spec == data_spec && l.tag == layout.tag));
        self.layouts.push((data_spec, layout));
        self
    }

    pub fn allowed_tags(&self, data_spec: DataSpec) -> Vec<&'static str> {
        self.layouts
            .iter()
            .filter(|(spec, _)| *spec == data_spec)
            .map(|(_, l)| l.tag)
            .collect()
    }

    pub fn layout(&self, data_spec: DataSpec, tag: &str) -> Option<&'static RecordSpec> {
        self.layouts
            .iter()
            .find(|(spec, l)| *spec == data_spec && l.tag == tag)
            .map(|(_, l)| *l)
    }

    /// Decode a record classified by a feed data-spec id or name
    pub fn decode(&self, raw: &[u8], data_spec: &str) -> Decoded {
        let spec = DataSpec::from_code(data_spec)
            .ok_or_else(|| Rejection::UnknownDataSpec(data_spec.to_string()))?;
        self.decode_as(raw, spec)
    }

    pub fn decode_as(&self, raw: &[u8], data_spec: DataSpec) -> Decoded {
        if raw.len() < 2 {
            return Err(Rejection::TooShort(raw.len()));
        }

        let tag = String::from_utf8_lossy(&raw[..2]).into_owned();
        let layout = self
            .layout(data_spec, &tag)
            .ok_or(Rejection::TagNotAllowed { data_spec, tag })?;

        if raw.len() < RACE_KEY_RANGE.end {
            return Err(Rejection::TooShort(raw.len()));
        }
        let race_id = race_key(raw).ok_or(Rejection::MalformedKey("race_id"))?;

        let fields = extract(raw, layout);
        build(layout.kind, race_id, &fields)
    }
}

/// Race identity from the fixed key range shared by every record kind
pub fn race_key(raw: &[u8]) -> Option<RaceId> {
    let bytes = raw.get(RACE_KEY_RANGE)?;
    RaceId::parse(std::str::from_utf8(bytes).ok()?)
}

fn parse_number<T: FromStr>(text: &str) -> Option<T> {
    normalize_fullwidth_numbers(text).trim().parse().ok()
}

/// Wire value with an implied decimal place; zero and non-numeric mean absent
fn parse_tenths(text: &str) -> Option<f64> {
    let value: u32 = parse_number(text)?;
    (value > 0).then(|| value as f64 / 10.0)
}

fn parse_horse_number(text: &str) -> Option<u8> {
    parse_number::<u8>(text).filter(|n| validate_horse_number(*n).is_ok())
}

fn parse_positive<T: FromStr + Default + PartialOrd>(text: &str) -> Option<T> {
    parse_number::<T>(text).filter(|v| *v > T::default())
}

fn build(kind: RecordKind, race_id: RaceId, fields: &RecordFields) -> Decoded {
    let record = match kind {
        RecordKind::Card => TypedRecord::Card(build_card(race_id, fields)?),
        RecordKind::EntrantResult => TypedRecord::EntrantResult(EntrantResultRecord {
            card: build_card(race_id, fields)?,
            finish_rank: parse_positive(fields.get("finish_rank")),
            pace_index: parse_tenths(fields.get("pace_index")),
            late_speed: parse_tenths(fields.get("late_speed")),
        }),
        RecordKind::Payout => TypedRecord::Payout(build_payout(race_id, fields)),
        RecordKind::WinOdds => TypedRecord::WinOdds(build_win_odds(race_id, fields)),
        RecordKind::ExactaOdds => TypedRecord::ExactaOdds(build_exacta_odds(race_id, fields)),
    };
    Ok(record)
}

fn build_card(race_id: RaceId, fields: &RecordFields) -> Result<CardRecord, Rejection> {
    let horse_number = parse_horse_number(fields.get("horse_number"))
        .ok_or(Rejection::MalformedKey("horse_number"))?;

    let horse_id = fields.get("horse_id");
    if horse_id.is_empty() {
        return Err(Rejection::MalformedKey("horse_id"));
    }

    Ok(CardRecord {
        race_id,
        horse_number,
        horse_id: horse_id.to_string(),
        horse_name: fields.get("horse_name").to_string(),
        bracket: parse_positive(fields.get("bracket")),
        sex: Sex::from_code(fields.get("sex_code")),
        coat_code: fields.get("coat_code").to_string(),
        age: parse_positive(fields.get("age")),
        weight_kg: parse_tenths(fields.get("weight")),
        jockey: fields.get("jockey").to_string(),
        trainer: fields.get("trainer").to_string(),
    })
}

fn slot_payouts(fields: &RecordFields, group: &str) -> Vec<(u8, i64)> {
    fields
        .groups
        .get(group)
        .map(|slots| {
            slots
                .iter()
                .filter_map(|slot| {
                    let horse = parse_horse_number(slot.get("horse")?)?;
                    let payout = parse_positive::<i64>(slot.get("payout")?)?;
                    Some((horse, payout))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn build_payout(race_id: RaceId, fields: &RecordFields) -> PayoutRecord {
    let wide = fields
        .groups
        .get("wide")
        .map(|slots| {
            slots
                .iter()
                .filter_map(|slot| {
                    let pair = slot.get("pair")?;
                    let a = parse_horse_number(pair.get(0..2)?)?;
                    let b = parse_horse_number(pair.get(2..4)?)?;
                    let payout = parse_positive::<i64>(slot.get("payout")?)?;
                    Some(((a.min(b), a.max(b)), payout))
                })
                .collect()
        })
        .unwrap_or_default();

    PayoutRecord {
        race_id,
        win: slot_payouts(fields, "win"),
        place: slot_payouts(fields, "place"),
        wide,
    }
}

fn build_win_odds(race_id: RaceId, fields: &RecordFields) -> WinOddsRecord {
    let announced_at = fields.get("announced_at").to_string();

    let quotes = fields
        .items
        .iter()
        .filter_map(|item| {
            Some(OddsQuote {
                race_id,
                horse_number: parse_horse_number(item.get("horse_number")?)?,
                win_odds: parse_tenths(item.get("win_odds")?)
                    .filter(|o| validate_odds(*o).is_ok())?,
                popularity_rank: parse_positive(item.get("popularity")?)?,
                announced_at: announced_at.clone(),
            })
        })
        .collect();

    WinOddsRecord {
        race_id,
        registered_count: parse_number(fields.get("registered_count")).unwrap_or(0),
        announced_at,
        quotes,
    }
}

fn build_exacta_odds(race_id: RaceId, fields: &RecordFields) -> ExactaOddsRecord {
    let quotes = fields
        .items
        .iter()
        .filter_map(|item| {
            Some(ExactaQuote {
                race_id,
                first: parse_horse_number(item.get("first")?)?,
                second: parse_horse_number(item.get("second")?)?,
                odds: parse_tenths(item.get("odds")?)?,
                popularity_rank: item.get("popularity").and_then(|p| parse_positive(p)),
            })
        })
        .collect();

    ExactaOddsRecord {
        race_id,
        announced_at: fields.get("announced_at").to_string(),
        quotes,
    }
}
