//! CSV import/export for player history tables.
//!
//! Tables are stored one file per player as
//! `<data_dir>/processed/sequence_target_map_<player>.csv` with the header
//! `game_id,input_sequence,target_move` (column order is free). Raw game
//! exports (`game_id,white_player,black_player,move_list`) can be exploded
//! into a table with `explode_games`.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::errors::HistoryError;
use crate::history::move_record::{HistoryTable, MoveRecord};

const TABLE_FILE_PREFIX: &str = "sequence_target_map_";
const TABLE_FILE_SUFFIX: &str = ".csv";

/// One game of a raw history export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameSummary {
    pub game_id: String,
    pub white_player: String,
    pub black_player: String,
    /// Space-joined SAN moves of the whole game.
    pub move_list: String,
}

/// Path of the processed table for `player`.
pub fn history_path_for(data_dir: &Path, player: &str) -> PathBuf {
    data_dir
        .join("processed")
        .join(format!("{TABLE_FILE_PREFIX}{player}{TABLE_FILE_SUFFIX}"))
}

/// Players that have a processed table under `data_dir`, sorted.
pub fn cached_players(data_dir: &Path) -> Result<Vec<String>, HistoryError> {
    let mut players = Vec::new();
    for entry in fs::read_dir(data_dir.join("processed"))? {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        if let Some(player) = name
            .strip_prefix(TABLE_FILE_PREFIX)
            .and_then(|rest| rest.strip_suffix(TABLE_FILE_SUFFIX))
        {
            players.push(player.to_owned());
        }
    }
    players.sort();
    Ok(players)
}

pub fn load_history_table(path: &Path) -> Result<HistoryTable, HistoryError> {
    let data = fs::read_to_string(path)?;
    let table = history_table_from_csv_str(&data)?;
    info!(
        "loaded {} history records from {}",
        table.len(),
        path.display()
    );
    Ok(table)
}

pub fn history_table_from_csv_str(csv: &str) -> Result<HistoryTable, HistoryError> {
    let mut rows = CsvRows::new(csv);
    let header = rows.header()?;
    let game_idx = column_index(&header, "game_id")?;
    let sequence_idx = column_index(&header, "input_sequence")?;
    let target_idx = column_index(&header, "target_move")?;

    let mut table = HistoryTable::new();
    while let Some((line, fields)) = rows.next_row()? {
        let target = field(&fields, target_idx);
        if target.is_empty() {
            return Err(HistoryError::MalformedRow {
                line,
                reason: "empty target_move".to_owned(),
            });
        }
        table.insert(MoveRecord::new(
            field(&fields, game_idx),
            field(&fields, sequence_idx),
            target,
        ));
    }
    Ok(table)
}

pub fn write_history_table(table: &HistoryTable, path: &Path) -> Result<(), HistoryError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, history_table_to_csv_string(table))?;
    Ok(())
}

pub fn history_table_to_csv_string(table: &HistoryTable) -> String {
    let mut out = String::from("game_id,input_sequence,target_move\n");
    for record in table.records() {
        out.push_str(&escape_field(&record.game_id));
        out.push(',');
        out.push_str(&escape_field(&record.input_sequence));
        out.push(',');
        out.push_str(&escape_field(&record.target_move));
        out.push('\n');
    }
    out
}

pub fn games_from_csv_str(csv: &str) -> Result<Vec<GameSummary>, HistoryError> {
    let mut rows = CsvRows::new(csv);
    let header = rows.header()?;
    let game_idx = column_index(&header, "game_id")?;
    let white_idx = column_index(&header, "white_player")?;
    let black_idx = column_index(&header, "black_player")?;
    let moves_idx = column_index(&header, "move_list")?;

    let mut games = Vec::new();
    while let Some((_, fields)) = rows.next_row()? {
        games.push(GameSummary {
            game_id: field(&fields, game_idx).to_owned(),
            white_player: field(&fields, white_idx).to_owned(),
            black_player: field(&fields, black_idx).to_owned(),
            move_list: field(&fields, moves_idx).to_owned(),
        });
    }
    Ok(games)
}

/// Turn whole games into one record per move made by `player`.
///
/// The player's moves are the even plies when they had White and the odd
/// plies otherwise; games the player did not take part in contribute
/// nothing.
pub fn explode_games(games: &[GameSummary], player: &str) -> HistoryTable {
    let mut table = HistoryTable::new();
    for game in games {
        let start = if game.white_player == player {
            0
        } else if game.black_player == player {
            1
        } else {
            debug!("skipping game {} without player {player}", game.game_id);
            continue;
        };

        let moves: Vec<&str> = game.move_list.split_whitespace().collect();
        for ply in (start..moves.len()).step_by(2) {
            table.insert(MoveRecord::new(
                &game.game_id,
                &moves[..ply].join(" "),
                moves[ply],
            ));
        }
    }
    table
}

fn column_index(header: &[String], name: &'static str) -> Result<usize, HistoryError> {
    header
        .iter()
        .position(|column| column.trim().eq_ignore_ascii_case(name))
        .ok_or(HistoryError::MissingColumn(name))
}

fn field<'a>(fields: &'a [String], idx: usize) -> &'a str {
    fields.get(idx).map(|f| f.trim()).unwrap_or_default()
}

fn escape_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_owned()
    }
}

/// CSV reader supporting double-quoted fields, including quoted line breaks.
struct CsvRows<'a> {
    lines: std::iter::Enumerate<std::str::Lines<'a>>,
}

impl<'a> CsvRows<'a> {
    fn new(csv: &'a str) -> Self {
        Self {
            lines: csv.lines().enumerate(),
        }
    }

    fn header(&mut self) -> Result<Vec<String>, HistoryError> {
        match self.next_row()? {
            Some((_, header)) => Ok(header),
            None => Err(HistoryError::MalformedRow {
                line: 1,
                reason: "history CSV is empty".to_owned(),
            }),
        }
    }

    /// Next non-blank record with the line number it starts on.
    fn next_row(&mut self) -> Result<Option<(usize, Vec<String>)>, HistoryError> {
        while let Some((idx, line)) = self.lines.next() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let mut record = line.to_owned();
            loop {
                if let Some(fields) = split_csv_record(&record) {
                    return Ok(Some((idx + 1, fields)));
                }
                // An open quote carries the field onto the next line.
                let Some((_, more)) = self.lines.next() else {
                    return Err(HistoryError::MalformedRow {
                        line: idx + 1,
                        reason: "unterminated quoted field".to_owned(),
                    });
                };
                record.push('\n');
                record.push_str(more.trim_end_matches('\r'));
            }
        }
        Ok(None)
    }
}

/// Fields of one record, or `None` while a quoted field is still open.
fn split_csv_record(record: &str) -> Option<Vec<String>> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = record.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }

    if in_quotes {
        return None;
    }
    fields.push(current);
    Some(fields)
}
