//! Resolve functions - address → buildings → hazard labels
//!
//! Every row is resolved on its own: the house number is parsed, the matching
//! buildings are fetched newest first, and each label type takes the value of
//! the first building that has one. Nothing here aborts the run; row and
//! candidate failures end up as empty label columns.

use crate::extraction::fetch::{LabelService, LizardError};
use crate::extraction::parse::{normalize_postcode, parse_house_number};
use crate::extraction::types::{
    AddressRow, BuildingCandidate, BuildingQuery, HouseNumber, LabelQuery, LabelSet, LabelType,
    ResolvedLabel, ResolvedRow, RowStatus, RunStats, RETRY_ATTEMPTS,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

/// Settings shared by every row of a run
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    pub label_types: Vec<LabelType>,
    pub valid_at: DateTime<Utc>, // fixed for the whole run
    pub attempts: u32,
}

impl ResolveOptions {
    pub fn new(valid_at: DateTime<Utc>) -> Self {
        ResolveOptions {
            label_types: LabelType::ALL.to_vec(),
            valid_at,
            attempts: RETRY_ATTEMPTS,
        }
    }
}

/// Buildings for an address, most recently updated first.
///
/// The building search is queried exactly once; errors are left to the caller.
pub async fn find_buildings(
    service: &dyn LabelService,
    postcode: &str,
    house_number: &HouseNumber,
) -> Result<Vec<BuildingCandidate>, LizardError> {
    let query = BuildingQuery::new(postcode, house_number);
    let records = service.search_buildings(&query).await?;

    // The service lists buildings oldest first
    let candidates: Vec<BuildingCandidate> = records
        .into_iter()
        .rev()
        .enumerate()
        .map(|(rank, record)| BuildingCandidate {
            id: record.id,
            valid_from: record.start,
            valid_until: record.end,
            rank,
        })
        .collect();

    for candidate in &candidates {
        debug!(
            "Building {} for {}, {} (rank {}, valid {:?} - {:?})",
            candidate.id,
            house_number,
            postcode,
            candidate.rank,
            candidate.valid_from,
            candidate.valid_until
        );
    }
    debug!(
        "Found {} buildings for {}, {}",
        candidates.len(),
        house_number,
        postcode
    );

    Ok(candidates)
}

/// Most recent value of one label type for one building.
///
/// Failed requests and empty result lists each use up one of `attempts`;
/// there is no delay between attempts. The first record of a non-empty list
/// decides the outcome.
pub async fn resolve_label(
    service: &dyn LabelService,
    candidate: &BuildingCandidate,
    label_type: LabelType,
    valid_at: DateTime<Utc>,
    attempts: u32,
) -> Option<ResolvedLabel> {
    let query = LabelQuery::new(label_type, candidate.id, valid_at);

    for attempt in 1..=attempts {
        match service.fetch_labels(&query).await {
            Ok(records) => match records.first() {
                Some(record) => {
                    return record.value().map(|value| ResolvedLabel {
                        value,
                        building_id: candidate.id,
                        rank: candidate.rank,
                        deprecated: candidate.is_deprecated(),
                    });
                }
                // TODO: stop retrying once the label endpoint can tell "not indexed yet" from "no label"
                None => debug!(
                    "No {} label for building {} (attempt {}/{})",
                    label_type, candidate.id, attempt, attempts
                ),
            },
            Err(e) => warn!(
                "Label request {} for building {} failed (attempt {}/{}): {}",
                label_type, candidate.id, attempt, attempts, e
            ),
        }
    }

    None
}

/// Resolve all requested label types for one input row
pub async fn resolve_row(
    service: &dyn LabelService,
    row: &AddressRow,
    options: &ResolveOptions,
) -> ResolvedRow {
    let mut labels = LabelSet::new(&options.label_types);

    let (postcode, raw_house_number) = match (&row.postcode, &row.house_number) {
        (Some(postcode), Some(house_number)) => (postcode, house_number),
        _ => {
            warn!(
                "Missing huisnummer or postcode for entry with index {}",
                row.index
            );
            return finish_row(row, labels, RowStatus::MissingFields);
        }
    };

    let postcode = normalize_postcode(postcode);
    let house_number = match parse_house_number(raw_house_number) {
        Ok(house_number) => house_number,
        Err(e) => {
            warn!("Skipping entry with index {}: {}", row.index, e);
            return finish_row(row, labels, RowStatus::InvalidHouseNumber);
        }
    };

    let candidates = match find_buildings(service, &postcode, &house_number).await {
        Ok(candidates) => candidates,
        Err(e) => {
            warn!(
                "Building search failed for {}, {} (index {}): {}",
                house_number, postcode, row.index, e
            );
            return finish_row(row, labels, RowStatus::BuildingSearchFailed);
        }
    };

    if candidates.is_empty() {
        info!("No buildings found for {}, {}", house_number, postcode);
    }

    for candidate in &candidates {
        if labels.is_complete() {
            break;
        }

        for label_type in labels.unresolved() {
            let Some(label) = resolve_label(
                service,
                candidate,
                label_type,
                options.valid_at,
                options.attempts,
            )
            .await
            else {
                continue;
            };

            info!(
                "Label {} extracted for {}, {} using building {}",
                label_type, house_number, postcode, candidate.id
            );
            if label.deprecated {
                warn!(
                    "Label was extracted with deprecated building (building_id={})",
                    candidate.id
                );
            }
            labels.resolve(label_type, label);
        }
    }

    finish_row(row, labels, RowStatus::Resolved)
}

fn finish_row(row: &AddressRow, labels: LabelSet, status: RowStatus) -> ResolvedRow {
    ResolvedRow {
        index: row.index,
        cells: row.cells.clone(),
        labels,
        status,
    }
}

/// Resolve every row in input order; `progress` is called before each row
pub async fn resolve_all<F>(
    service: &dyn LabelService,
    rows: &[AddressRow],
    options: &ResolveOptions,
    mut progress: F,
) -> (Vec<ResolvedRow>, RunStats)
where
    F: FnMut(&AddressRow),
{
    info!(
        "Resolving {:?} for {} rows (valid_at: {})",
        options.label_types,
        rows.len(),
        options.valid_at
    );

    let mut resolved = Vec::with_capacity(rows.len());
    let mut stats = RunStats::default();

    for row in rows {
        progress(row);
        let result = resolve_row(service, row, options).await;
        stats.record(&result);
        resolved.push(result);
    }

    info!("Resolution complete: {}", stats);

    (resolved, stats)
}
