//! Byte layouts of the feed records the decision engine consumes
//!
//! Every layout is data: a list of `(name, offset, length)` fields, optional
//! fixed repeated groups (payout slots) and an optional counted loop (odds
//! lists). Adding a record layout means adding a table here and registering
//! it with the decoder, not writing slicing code.
//!
//! Offsets are 0-based byte positions in the Shift-JIS record.

use encoding_rs::SHIFT_JIS;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

/// Byte range of the 16-character race key shared by all record kinds
pub const RACE_KEY_RANGE: Range<usize> = 11..27;

/// One field inside a fixed-width record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub offset: usize,
    pub length: usize,
}

impl FieldSpec {
    pub const fn new(name: &'static str, offset: usize, length: usize) -> Self {
        Self {
            name,
            offset,
            length,
        }
    }

    pub fn end(&self) -> usize {
        self.offset + self.length
    }
}

/// A fixed number of identically shaped slots (e.g. payout tables)
#[derive(Debug, Clone, Copy)]
pub struct GroupSpec {
    pub name: &'static str,
    pub start: usize,
    pub item_length: usize,
    pub count: usize,
    /// Offsets relative to the slot start
    pub fields: &'static [FieldSpec],
}

/// Items repeated `N` times where `N` is read from the header
#[derive(Debug, Clone, Copy)]
pub struct LoopSpec {
    pub count_field: FieldSpec,
    pub header_length: usize,
    pub item_length: usize,
    /// Offsets relative to the item start
    pub fields: &'static [FieldSpec],
}

/// Which typed record a layout produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Card,
    EntrantResult,
    Payout,
    WinOdds,
    ExactaOdds,
}

/// Full layout of one record tag within a data spec
#[derive(Debug, Clone, Copy)]
pub struct RecordSpec {
    pub tag: &'static str,
    pub kind: RecordKind,
    /// Nominal length of the fixed part, used when encoding
    pub record_length: usize,
    pub sections: &'static [&'static [FieldSpec]],
    pub groups: &'static [GroupSpec],
    pub items: Option<LoopSpec>,
}

impl RecordSpec {
    pub fn fields(&self) -> impl Iterator<Item = &'static FieldSpec> {
        self.sections.iter().flat_map(|s| s.iter())
    }

    /// Write field values back at their offsets, space padded.
    ///
    /// Values longer than their field are truncated at the byte boundary.
    pub fn encode(&self, record: &RecordFields) -> Vec<u8> {
        let loop_len = self
            .items
            .map(|l| l.header_length + record.items.len() * l.item_length)
            .unwrap_or(0);
        let mut buf = vec![b' '; self.record_length.max(loop_len)];

        for field in self.fields() {
            if let Some(value) = record.fields.get(field.name) {
                write_field(&mut buf, 0, field, value);
            }
        }

        for group in self.groups {
            if let Some(slots) = record.groups.get(group.name) {
                for (i, slot) in slots.iter().take(group.count).enumerate() {
                    let base = group.start + i * group.item_length;
                    for field in group.fields {
                        if let Some(value) = slot.get(field.name) {
                            write_field(&mut buf, base, field, value);
                        }
                    }
                }
            }
        }

        if let Some(spec) = self.items {
            if let Some(value) = record.fields.get(spec.count_field.name) {
                write_field(&mut buf, 0, &spec.count_field, value);
            }
            for (i, item) in record.items.iter().enumerate() {
                let base = spec.header_length + i * spec.item_length;
                for field in spec.fields {
                    if let Some(value) = item.get(field.name) {
                        write_field(&mut buf, base, field, value);
                    }
                }
            }
        }

        buf
    }
}

fn write_field(buf: &mut [u8], base: usize, field: &FieldSpec, value: &str) {
    let start = base + field.offset;
    let end = (start + field.length).min(buf.len());
    if start >= end {
        return;
    }
    let (encoded, _, _) = SHIFT_JIS.encode(value);
    let n = encoded.len().min(end - start);
    buf[start..start + n].copy_from_slice(&encoded[..n]);
}

/// Named string values extracted from one record (or one slot/item)
pub type FieldValues = BTreeMap<&'static str, String>;

/// Everything extracted from a record before typing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFields {
    pub fields: FieldValues,
    pub groups: BTreeMap<&'static str, Vec<FieldValues>>,
    pub items: Vec<FieldValues>,
}

impl RecordFields {
    pub fn get(&self, name: &str) -> &str {
        self.fields.get(name).map(String::as_str).unwrap_or("")
    }
}

/// Feed data classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataSpec {
    Card,
    Result,
    OddsWin,
    OddsExacta,
}

impl DataSpec {
    pub const ALL: [DataSpec; 4] = [
        DataSpec::Card,
        DataSpec::Result,
        DataSpec::OddsWin,
        DataSpec::OddsExacta,
    ];

    /// Parse a feed data-spec id (`0B15`) or a symbolic name (`CARD`)
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "0B15" | "CARD" => Some(DataSpec::Card),
            "0B12" | "RESULT" => Some(DataSpec::Result),
            "0B30" | "0B31" | "ODDS_WIN" => Some(DataSpec::OddsWin),
            "0B32" | "ODDS_EXACTA" => Some(DataSpec::OddsExacta),
            _ => None,
        }
    }

    /// Feed ids published under this spec, as used in feed file names.
    /// Win odds arrive under both the provisional and the final id.
    pub fn feed_ids(&self) -> &'static [&'static str] {
        match self {
            DataSpec::Card => &["0B15"],
            DataSpec::Result => &["0B12"],
            DataSpec::OddsWin => &["0B30", "0B31"],
            DataSpec::OddsExacta => &["0B32"],
        }
    }
}

impl fmt::Display for DataSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataSpec::Card => "CARD",
            DataSpec::Result => "RESULT",
            DataSpec::OddsWin => "ODDS_WIN",
            DataSpec::OddsExacta => "ODDS_EXACTA",
        };
        f.write_str(name)
    }
}

impl FromStr for DataSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataSpec::from_code(s).ok_or_else(|| format!("Unknown data spec: {}", s))
    }
}

/// Common record header; the race key lives at 11..27
pub const HEADER: &[FieldSpec] = &[
    FieldSpec::new("record_tag", 0, 2),
    FieldSpec::new("data_kubun", 2, 1),
    FieldSpec::new("created_on", 3, 8),
    FieldSpec::new("year", 11, 4),
    FieldSpec::new("month", 15, 2),
    FieldSpec::new("day", 17, 2),
    FieldSpec::new("venue_code", 19, 2),
    FieldSpec::new("meeting_no", 21, 2),
    FieldSpec::new("day_no", 23, 2),
    FieldSpec::new("race_no", 25, 2),
];

/// Entrant block of the `SE` record (race card)
pub const ENTRANT: &[FieldSpec] = &[
    FieldSpec::new("bracket", 27, 1),
    FieldSpec::new("horse_number", 28, 2),
    FieldSpec::new("horse_id", 30, 10),
    FieldSpec::new("sex_code", 46, 1),
    FieldSpec::new("coat_code", 47, 2),
    FieldSpec::new("age", 50, 2),
    FieldSpec::new("horse_name", 68, 36),
    // kg x 10
    FieldSpec::new("weight", 122, 3),
    FieldSpec::new("jockey", 134, 12),
    FieldSpec::new("trainer", 178, 12),
];

/// Finishing block appended to `SE` once the race is run
pub const FINISH: &[FieldSpec] = &[
    FieldSpec::new("finish_rank", 334, 2),
    // final 3 furlongs, seconds x 10
    FieldSpec::new("late_speed", 390, 3),
    // x 10
    FieldSpec::new("pace_index", 393, 4),
];

const PAYOUT_SLOT: &[FieldSpec] = &[
    FieldSpec::new("horse", 0, 2),
    FieldSpec::new("payout", 2, 9),
    FieldSpec::new("popularity", 11, 2),
];

const WIDE_SLOT: &[FieldSpec] = &[
    FieldSpec::new("pair", 0, 4),
    FieldSpec::new("payout", 4, 9),
    FieldSpec::new("popularity", 13, 3),
];

const ODDS_HEADER: &[FieldSpec] = &[FieldSpec::new("announced_at", 27, 8)];

const WIN_ODDS_ITEM: &[FieldSpec] = &[
    FieldSpec::new("horse_number", 0, 2),
    // x 10
    FieldSpec::new("win_odds", 2, 4),
    FieldSpec::new("popularity", 6, 2),
];

const EXACTA_ODDS_ITEM: &[FieldSpec] = &[
    FieldSpec::new("first", 0, 2),
    FieldSpec::new("second", 2, 2),
    // x 10
    FieldSpec::new("odds", 4, 6),
    FieldSpec::new("popularity", 10, 3),
];

pub static CARD_SE: RecordSpec = RecordSpec {
    tag: "SE",
    kind: RecordKind::Card,
    record_length: 200,
    sections: &[HEADER, ENTRANT],
    groups: &[],
    items: None,
};

pub static RESULT_SE: RecordSpec = RecordSpec {
    tag: "SE",
    kind: RecordKind::EntrantResult,
    record_length: 400,
    sections: &[HEADER, ENTRANT, FINISH],
    groups: &[],
    items: None,
};

pub static RESULT_HR: RecordSpec = RecordSpec {
    tag: "HR",
    kind: RecordKind::Payout,
    record_length: 320,
    sections: &[HEADER],
    groups: &[
        GroupSpec {
            name: "win",
            start: 102,
            item_length: 13,
            count: 3,
            fields: PAYOUT_SLOT,
        },
        GroupSpec {
            name: "place",
            start: 141,
            item_length: 13,
            count: 5,
            fields: PAYOUT_SLOT,
        },
        GroupSpec {
            name: "wide",
            start: 206,
            item_length: 16,
            count: 7,
            fields: WIDE_SLOT,
        },
    ],
    items: None,
};

pub static ODDS_O1: RecordSpec = RecordSpec {
    tag: "O1",
    kind: RecordKind::WinOdds,
    record_length: 66,
    sections: &[HEADER, ODDS_HEADER],
    groups: &[],
    items: Some(LoopSpec {
        count_field: FieldSpec::new("registered_count", 55, 2),
        header_length: 66,
        item_length: 15,
        fields: WIN_ODDS_ITEM,
    }),
};

pub static ODDS_O4: RecordSpec = RecordSpec {
    tag: "O4",
    kind: RecordKind::ExactaOdds,
    record_length: 66,
    sections: &[HEADER, ODDS_HEADER],
    groups: &[],
    items: Some(LoopSpec {
        count_field: FieldSpec::new("combination_count", 55, 3),
        header_length: 66,
        item_length: 13,
        fields: EXACTA_ODDS_ITEM,
    }),
};

/// Built-in layout registry: data spec x record tag
pub fn default_layouts() -> Vec<(DataSpec, &'static RecordSpec)> {
    vec![
        (DataSpec::Card, &CARD_SE),
        (DataSpec::Result, &RESULT_SE),
        (DataSpec::Result, &RESULT_HR),
        (DataSpec::OddsWin, &ODDS_O1),
        (DataSpec::OddsExacta, &ODDS_O4),
    ]
}
