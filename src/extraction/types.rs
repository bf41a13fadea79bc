//! Core data types for the label extraction pipeline
//! Pure data structures with no remote calls

use crate::extraction::utils::{deserialize_timestamp, serialize_timestamp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Attempts per (candidate, label type) before falling through to the next candidate
pub const RETRY_ATTEMPTS: u32 = 3;

/// Hazard label types published by the Lizard label service
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelType {
    Flooding,
    Heatstress,
    Drought,
    Pluvial,
}

impl LabelType {
    /// Output column order
    pub const ALL: [LabelType; 4] = [
        LabelType::Flooding,
        LabelType::Heatstress,
        LabelType::Drought,
        LabelType::Pluvial,
    ];

    /// Remote label-type identifier
    pub fn uuid(&self) -> Uuid {
        match self {
            LabelType::Flooding => Uuid::from_u128(0xa84890f3_37de_4073_ad96_19c243f87b93),
            LabelType::Heatstress => Uuid::from_u128(0x57dd670c_b23a_437e_a336_5e295da59cba),
            LabelType::Drought => Uuid::from_u128(0x8e979623_4022_4dbc_96f7_9492d2c84b8b),
            LabelType::Pluvial => Uuid::from_u128(0x11117a90_b1ef_48cf_8a4f_aa086d1457f4),
        }
    }

    pub fn column_name(&self) -> &'static str {
        match self {
            LabelType::Flooding => "flooding",
            LabelType::Heatstress => "heatstress",
            LabelType::Drought => "drought",
            LabelType::Pluvial => "pluvial",
        }
    }
}

impl std::fmt::Display for LabelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.column_name())
    }
}

/// Normalized house number (huisnummer + optional huisletter)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HouseNumber {
    pub number: String,
    pub letter: Option<char>, // always uppercase ASCII
}

impl std::fmt::Display for HouseNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.letter {
            Some(letter) => write!(f, "{}{}", self.number, letter),
            None => write!(f, "{}", self.number),
        }
    }
}

pub type BuildingId = i64;

/// One building matched for an address, ranked by recency (0 = most recently updated)
#[derive(Debug, Clone, PartialEq)]
pub struct BuildingCandidate {
    pub id: BuildingId,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub rank: usize,
}

impl BuildingCandidate {
    /// A building with an end of validity has been superseded by a newer record
    pub fn is_deprecated(&self) -> bool {
        self.valid_until.is_some()
    }
}

/// Query parameters for the building search endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildingQuery {
    #[serde(rename = "addresses__postalcode")]
    pub postcode: String,

    #[serde(rename = "addresses__house_number")]
    pub house_number: String,

    #[serde(rename = "addresses__house_letter", skip_serializing_if = "Option::is_none")]
    pub house_letter: Option<String>,

    // Suffix matching is not supported; always left unset
    #[serde(
        rename = "addresses__house_number_suffix",
        skip_serializing_if = "Option::is_none"
    )]
    pub house_number_suffix: Option<String>,

    // None = "valid at the time of the query"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_at: Option<String>,

    pub format: &'static str,
}

impl BuildingQuery {
    pub fn new(postcode: &str, house_number: &HouseNumber) -> Self {
        BuildingQuery {
            postcode: postcode.to_string(),
            house_number: house_number.number.clone(),
            house_letter: house_number.letter.map(|c| c.to_string()),
            house_number_suffix: None,
            valid_at: None,
            format: "json",
        }
    }
}

/// Query parameters for the label endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelQuery {
    #[serde(skip)]
    pub label_type: LabelType,

    #[serde(rename = "object_id")]
    pub building_id: BuildingId,

    #[serde(rename = "label_type__uuid")]
    pub label_uuid: Uuid,

    #[serde(rename = "valid_at", serialize_with = "serialize_timestamp")]
    pub as_of: DateTime<Utc>,
}

impl LabelQuery {
    pub fn new(label_type: LabelType, building_id: BuildingId, as_of: DateTime<Utc>) -> Self {
        LabelQuery {
            label_type,
            building_id,
            label_uuid: label_type.uuid(),
            as_of,
        }
    }
}

/// Paginated list envelope returned by the Lizard v3 API
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    pub results: Vec<T>,
}

/// Building record as returned by the building search endpoint
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BuildingRecord {
    pub id: BuildingId,

    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub start: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub end: Option<DateTime<Utc>>,
}

/// Label record as returned by the label endpoint
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LabelRecord {
    #[serde(default)]
    pub label_value: Option<serde_json::Value>,
}

impl LabelRecord {
    /// Label value rendered as text; JSON null counts as no value
    pub fn value(&self) -> Option<String> {
        match self.label_value.as_ref()? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// Input table with lowercased headers; empty cells are None
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddressTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl AddressTable {
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }
}

/// One input row with its address fields picked out
#[derive(Debug, Clone, PartialEq)]
pub struct AddressRow {
    pub index: usize,
    pub postcode: Option<String>,
    pub house_number: Option<String>,
    pub cells: Vec<Option<String>>, // passed through unchanged
}

/// Where a resolved label value came from
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLabel {
    pub value: String,
    pub building_id: BuildingId,
    pub rank: usize,
    pub deprecated: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LabelState {
    Unresolved,
    Resolved(ResolvedLabel),
}

/// Per-row label state; a resolved entry is terminal
#[derive(Debug, Clone, PartialEq)]
pub struct LabelSet {
    states: BTreeMap<LabelType, LabelState>,
}

impl LabelSet {
    pub fn new(label_types: &[LabelType]) -> Self {
        LabelSet {
            states: label_types
                .iter()
                .map(|lt| (*lt, LabelState::Unresolved))
                .collect(),
        }
    }

    /// Label types still waiting for a value, in column order
    pub fn unresolved(&self) -> Vec<LabelType> {
        self.states
            .iter()
            .filter(|(_, state)| matches!(state, LabelState::Unresolved))
            .map(|(lt, _)| *lt)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.states
            .values()
            .all(|state| matches!(state, LabelState::Resolved(_)))
    }

    /// Record a value; returns false (and keeps the old value) if already resolved
    pub fn resolve(&mut self, label_type: LabelType, label: ResolvedLabel) -> bool {
        match self.states.get_mut(&label_type) {
            Some(state) if matches!(state, LabelState::Unresolved) => {
                *state = LabelState::Resolved(label);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, label_type: LabelType) -> Option<&ResolvedLabel> {
        match self.states.get(&label_type) {
            Some(LabelState::Resolved(label)) => Some(label),
            _ => None,
        }
    }

    pub fn value(&self, label_type: LabelType) -> Option<&str> {
        self.get(label_type).map(|label| label.value.as_str())
    }

    pub fn resolved(&self) -> impl Iterator<Item = (LabelType, &ResolvedLabel)> {
        self.states.iter().filter_map(|(lt, state)| match state {
            LabelState::Resolved(label) => Some((*lt, label)),
            LabelState::Unresolved => None,
        })
    }
}

/// How a row ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStatus {
    Resolved,
    MissingFields,
    InvalidHouseNumber,
    BuildingSearchFailed,
}

/// Input row plus its label columns
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRow {
    pub index: usize,
    pub cells: Vec<Option<String>>,
    pub labels: LabelSet,
    pub status: RowStatus,
}

/// Extraction run statistics
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunStats {
    pub rows: usize,
    pub skipped: usize,
    pub invalid: usize,
    pub failed: usize,
    pub labels_resolved: usize,
    pub from_deprecated: usize,
}

impl RunStats {
    pub fn record(&mut self, row: &ResolvedRow) {
        self.rows += 1;
        match row.status {
            RowStatus::Resolved => {}
            RowStatus::MissingFields => self.skipped += 1,
            RowStatus::InvalidHouseNumber => self.invalid += 1,
            RowStatus::BuildingSearchFailed => self.failed += 1,
        }
        for (_, label) in row.labels.resolved() {
            self.labels_resolved += 1;
            if label.deprecated {
                self.from_deprecated += 1;
            }
        }
    }
}

impl std::fmt::Display for RunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "rows: {}, skipped: {}, invalid: {}, failed: {}, labels: {} ({} from deprecated buildings)",
            self.rows,
            self.skipped,
            self.invalid,
            self.failed,
            self.labels_resolved,
            self.from_deprecated
        )
    }
}
