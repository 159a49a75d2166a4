//! Record fixtures built from the same layout tables the decoder reads

use super::spec::{FieldValues, RecordFields, CARD_SE, ODDS_O1, ODDS_O4, RESULT_HR, RESULT_SE};

fn header(tag: &str, race_key: &str) -> RecordFields {
    let mut record = RecordFields::default();
    let f = &mut record.fields;
    f.insert("record_tag", tag.to_string());
    f.insert("data_kubun", "7".to_string());
    f.insert("created_on", race_key[0..8].to_string());
    f.insert("year", race_key[0..4].to_string());
    f.insert("month", race_key[4..6].to_string());
    f.insert("day", race_key[6..8].to_string());
    f.insert("venue_code", race_key[8..10].to_string());
    f.insert("meeting_no", race_key[10..12].to_string());
    f.insert("day_no", race_key[12..14].to_string());
    f.insert("race_no", race_key[14..16].to_string());
    record
}

fn entrant_fields(record: &mut RecordFields, horse_number: u8, horse_id: &str, name: &str) {
    let f = &mut record.fields;
    f.insert("bracket", ((horse_number + 1) / 2).min(8).to_string());
    f.insert("horse_number", format!("{:02}", horse_number));
    f.insert("horse_id", horse_id.to_string());
    f.insert("sex_code", "1".to_string());
    f.insert("coat_code", "03".to_string());
    f.insert("age", "04".to_string());
    f.insert("horse_name", name.to_string());
    f.insert("weight", "570".to_string());
    f.insert("jockey", "テスト騎手".to_string());
    f.insert("trainer", "テスト調教師".to_string());
}

/// `SE` card record
pub fn card_record(race_key: &str, horse_number: u8, horse_id: &str, name: &str) -> Vec<u8> {
    let mut record = header("SE", race_key);
    entrant_fields(&mut record, horse_number, horse_id, name);
    CARD_SE.encode(&record)
}

/// `SE` result record; tenths values of 0 encode as missing
pub fn result_record(
    race_key: &str,
    horse_number: u8,
    horse_id: &str,
    rank: Option<u8>,
    late_speed_tenths: u32,
    pace_index_tenths: u32,
) -> Vec<u8> {
    let mut record = header("SE", race_key);
    entrant_fields(&mut record, horse_number, horse_id, "結果");
    let f = &mut record.fields;
    f.insert("finish_rank", format!("{:02}", rank.unwrap_or(0)));
    f.insert("late_speed", format!("{:03}", late_speed_tenths));
    f.insert("pace_index", format!("{:04}", pace_index_tenths));
    RESULT_SE.encode(&record)
}

fn slot(horse: String, payout: i64, popularity: usize) -> FieldValues {
    let mut s = FieldValues::new();
    s.insert("horse", horse.clone());
    s.insert("pair", horse);
    s.insert("payout", format!("{:09}", payout));
    s.insert("popularity", format!("{:02}", popularity));
    s
}

/// `HR` payout record
pub fn payout_record(
    race_key: &str,
    win: &[(u8, i64)],
    place: &[(u8, i64)],
    wide: &[((u8, u8), i64)],
) -> Vec<u8> {
    let mut record = header("HR", race_key);
    let singles = |table: &[(u8, i64)]| -> Vec<FieldValues> {
        table
            .iter()
            .enumerate()
            .map(|(i, (h, pay))| slot(format!("{:02}", h), *pay, i + 1))
            .collect()
    };
    record.groups.insert("win", singles(win));
    record.groups.insert("place", singles(place));
    record.groups.insert(
        "wide",
        wide.iter()
            .enumerate()
            .map(|(i, ((a, b), pay))| slot(format!("{:02}{:02}", a, b), *pay, i + 1))
            .collect(),
    );
    RESULT_HR.encode(&record)
}

/// `O1` win-odds record; `(horse_number, odds, popularity)`, odds 0 = no quote
pub fn win_odds_record(race_key: &str, quotes: &[(u8, f64, u8)]) -> Vec<u8> {
    let mut record = header("O1", race_key);
    record
        .fields
        .insert("announced_at", format!("{}1130", &race_key[4..8]));
    record
        .fields
        .insert("registered_count", format!("{:02}", quotes.len()));
    for (horse, odds, pop) in quotes {
        let mut item = FieldValues::new();
        item.insert("horse_number", format!("{:02}", horse));
        item.insert("win_odds", format!("{:04}", (odds * 10.0).round() as u32));
        item.insert("popularity", format!("{:02}", pop));
        record.items.push(item);
    }
    ODDS_O1.encode(&record)
}

/// `O4` exacta-odds record
pub fn exacta_odds_record(race_key: &str, quotes: &[(u8, u8, f64)]) -> Vec<u8> {
    let mut record = header("O4", race_key);
    record
        .fields
        .insert("announced_at", format!("{}1130", &race_key[4..8]));
    record
        .fields
        .insert("combination_count", format!("{:03}", quotes.len()));
    for (i, (first, second, odds)) in quotes.iter().enumerate() {
        let mut item = FieldValues::new();
        item.insert("first", format!("{:02}", first));
        item.insert("second", format!("{:02}", second));
        item.insert("odds", format!("{:06}", (odds * 10.0).round() as u32));
        item.insert("popularity", format!("{:03}", i + 1));
        record.items.push(item);
    }
    ODDS_O4.encode(&record)
}
