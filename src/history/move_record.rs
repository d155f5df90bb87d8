//! Player history table with an exact-sequence frequency index.
//!
//! Rows map the SAN moves played before a move (`input_sequence`) to the move
//! the player actually chose (`target_move`). The table indexes rows by the
//! exact `input_sequence` string and counts how often each target was chosen,
//! so a lookup is one hash lookup plus a scan over that sequence's targets.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// One flattened move of a player's game history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRecord {
    pub game_id: String,
    /// Space-joined SAN moves preceding the target; empty for a game's
    /// first move.
    pub input_sequence: String,
    pub target_move: String,
}

impl MoveRecord {
    pub fn new(game_id: &str, input_sequence: &str, target_move: &str) -> Self {
        Self {
            game_id: game_id.to_owned(),
            input_sequence: input_sequence.trim().to_owned(),
            target_move: target_move.trim().to_owned(),
        }
    }
}

/// Target move with the number of times it followed a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetCount<'a> {
    pub target_move: &'a str,
    pub count: u32,
}

#[derive(Debug, Clone, Default)]
pub struct HistoryTable {
    records: Vec<MoveRecord>,
    by_sequence: HashMap<String, BTreeMap<String, u32>>,
}

impl HistoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records<I: IntoIterator<Item = MoveRecord>>(records: I) -> Self {
        let mut table = Self::new();
        for record in records {
            table.insert(record);
        }
        table
    }

    /// Add a row and update the frequency index.
    pub fn insert(&mut self, record: MoveRecord) {
        let targets = self
            .by_sequence
            .entry(record.input_sequence.clone())
            .or_default();
        let count = targets.entry(record.target_move.clone()).or_insert(0);
        *count = count.saturating_add(1);
        self.records.push(record);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[inline]
    pub fn records(&self) -> &[MoveRecord] {
        &self.records
    }

    /// Targets recorded after exactly `input_sequence`, in SAN byte order.
    pub fn targets_for(&self, input_sequence: &str) -> Option<Vec<TargetCount<'_>>> {
        let targets = self.by_sequence.get(input_sequence)?;
        Some(
            targets
                .iter()
                .map(|(target_move, count)| TargetCount {
                    target_move,
                    count: *count,
                })
                .collect(),
        )
    }

    /// Most frequent target after exactly `input_sequence`.
    ///
    /// Ties go to the lexicographically smallest SAN: targets are visited in
    /// byte order and only a strictly higher count replaces the leader.
    pub fn most_frequent_target(&self, input_sequence: &str) -> Option<&str> {
        let targets = self.by_sequence.get(input_sequence)?;
        let mut best: Option<(&str, u32)> = None;
        for (target, count) in targets {
            match best {
                Some((_, best_count)) if *count <= best_count => {}
                _ => best = Some((target.as_str(), *count)),
            }
        }
        best.map(|(target, _)| target)
    }

    /// Distinct game ids whose recorded sequences start with `prefix`, in
    /// first-seen order, each paired with its longest recorded sequence.
    ///
    /// Used as prompt context for the model stage.
    pub fn games_with_prefix(&self, prefix: &str, limit: usize) -> Vec<(String, String)> {
        let mut order = Vec::<String>::new();
        let mut longest = HashMap::<&str, (&str, &str)>::new();
        for record in &self.records {
            if !extends_sequence(&record.input_sequence, prefix) {
                continue;
            }
            let entry = longest
                .entry(record.game_id.as_str())
                .or_insert_with(|| {
                    order.push(record.game_id.clone());
                    (record.input_sequence.as_str(), record.target_move.as_str())
                });
            if record.input_sequence.len() > entry.0.len() {
                *entry = (record.input_sequence.as_str(), record.target_move.as_str());
            }
        }

        order
            .into_iter()
            .take(limit)
            .filter_map(|game_id| {
                let (sequence, target) = longest.get(game_id.as_str()).copied()?;
                let line = if sequence.is_empty() {
                    target.to_owned()
                } else {
                    format!("{sequence} {target}")
                };
                Some((game_id, line))
            })
            .collect()
    }
}

/// Whether `sequence` starts with the whole moves of `prefix`, so `O-O` does
/// not match a line continuing with `O-O-O`.
fn extends_sequence(sequence: &str, prefix: &str) -> bool {
    match sequence.strip_prefix(prefix) {
        Some(rest) => prefix.is_empty() || rest.is_empty() || rest.starts_with(' '),
        None => false,
    }
}
