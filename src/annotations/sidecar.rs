// Sidecar limits file
//
//   [[competition]]
//   target = "benches::sorting"
//
//   [[competition.candidate]]
//   target = "quick_sort"
//   min_ratio = 0.95
//   max_ratio = 1.2
//
// Each metric with annotation keys stores its bounds under those keys. An
// empty bound has no key, an ignored bound is stored as -1.0. Keys this
// module does not know about are left alone, and so are comments, key order
// and the decor around rewritten values.

use crate::competition::MethodId;
use crate::metrics::{MetricInfo, MetricRange, IGNORED_VALUE};
use std::sync::Arc;
use toml_edit::{value, ArrayOfTables, Item, Table, Value};

const COMPETITION_KEY: &str = "competition";
const CANDIDATE_KEY: &str = "candidate";
const TARGET_KEY: &str = "target";

/// Stored limits of one candidate
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateLimits {
    pub method: MethodId,
    /// (metric id, range) for every known metric with at least one key present
    pub ranges: Vec<(String, MetricRange)>,
}

impl CandidateLimits {
    pub fn new(method: MethodId) -> Self {
        Self {
            method,
            ranges: Vec::new(),
        }
    }

    pub fn range(&self, metric_id: &str) -> Option<MetricRange> {
        self.ranges
            .iter()
            .find(|(id, _)| id == metric_id)
            .map(|(_, range)| *range)
    }
}

/// All candidates of a sidecar document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SidecarLimits {
    candidates: Vec<CandidateLimits>,
}

impl SidecarLimits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read every candidate's limits for the given metrics
    pub fn parse(table: &Table, metrics: &[Arc<MetricInfo>]) -> Result<Self, String> {
        let mut limits = Self::new();

        let Some(competitions) = table.get(COMPETITION_KEY) else {
            return Ok(limits);
        };
        let competitions = competitions
            .as_array_of_tables()
            .ok_or_else(|| format!("'{COMPETITION_KEY}' must be an array of tables"))?;

        for competition in competitions.iter() {
            let group = target_name(competition)?;
            let Some(candidates) = competition.get(CANDIDATE_KEY) else {
                continue;
            };
            let candidates = candidates.as_array_of_tables().ok_or_else(|| {
                format!("'{COMPETITION_KEY}.{CANDIDATE_KEY}' must be an array of tables")
            })?;

            for candidate in candidates.iter() {
                let name = target_name(candidate)?;
                let method = if group.is_empty() {
                    MethodId::new(name)
                } else {
                    MethodId::new(format!("{group}::{name}"))
                };
                limits.candidates.push(read_candidate(method, candidate, metrics)?);
            }
        }

        Ok(limits)
    }

    /// Append another document's candidates; [`Self::find`] returns the
    /// first match
    pub fn extend(&mut self, other: SidecarLimits) {
        self.candidates.extend(other.candidates);
    }

    pub fn candidates(&self) -> &[CandidateLimits] {
        &self.candidates
    }

    pub fn find(&self, method: &MethodId) -> Option<&CandidateLimits> {
        self.candidates.iter().find(|c| &c.method == method)
    }

    /// Store one metric range for a candidate, creating its entries as
    /// needed. Only the metric's bound keys are touched. Returns whether the
    /// table changed.
    pub fn patch(
        table: &mut Table,
        method: &MethodId,
        metric: &MetricInfo,
        range: &MetricRange,
    ) -> Result<bool, String> {
        let Some(keys) = &metric.annotation_keys else {
            return Ok(false);
        };

        let competitions = array_entry(table, COMPETITION_KEY)?;
        let competition = find_or_push(competitions, method.group())?;
        let candidates = array_entry(competition, CANDIDATE_KEY)?;
        let candidate = find_or_push(candidates, method.name())?;

        let mut changed = set_bound(candidate, &keys.min_key, range.min());
        changed |= set_bound(candidate, &keys.max_key, range.max());
        Ok(changed)
    }
}

fn target_name(entry: &Table) -> Result<&str, String> {
    entry
        .get(TARGET_KEY)
        .and_then(Item::as_str)
        .ok_or_else(|| format!("entry without a string '{TARGET_KEY}' key"))
}

fn read_candidate(
    method: MethodId,
    candidate: &Table,
    metrics: &[Arc<MetricInfo>],
) -> Result<CandidateLimits, String> {
    let mut limits = CandidateLimits::new(method);

    for metric in metrics {
        let Some(keys) = &metric.annotation_keys else {
            continue;
        };
        let min = read_bound(candidate, &keys.min_key)?;
        let max = read_bound(candidate, &keys.max_key)?;
        if min.is_none() && max.is_none() {
            continue;
        }

        let range = MetricRange::new(min.unwrap_or(f64::NAN), max.unwrap_or(f64::NAN))
            .map_err(|e| format!("{}: {}", limits.method, e))?;
        limits.ranges.push((metric.id.clone(), range));
    }

    Ok(limits)
}

fn read_bound(candidate: &Table, key: &str) -> Result<Option<f64>, String> {
    let Some(item) = candidate.get(key) else {
        return Ok(None);
    };
    let value = match (item.as_float(), item.as_integer()) {
        (Some(value), _) => value,
        (None, Some(value)) => value as f64,
        _ => return Err(format!("'{key}' must be a number, got {}", item.type_name())),
    };
    if value.is_finite() && value < 0.0 {
        Ok(Some(IGNORED_VALUE))
    } else {
        Ok(Some(value))
    }
}

fn set_bound(candidate: &mut Table, key: &str, bound: f64) -> bool {
    if bound.is_nan() {
        return candidate.remove(key).is_some();
    }

    let stored = if bound.is_finite() && bound < 0.0 {
        IGNORED_VALUE
    } else {
        bound
    };

    match candidate.get_mut(key).and_then(Item::as_value_mut) {
        Some(existing) if existing.as_float() == Some(stored) => false,
        Some(existing) => {
            // Keep the inline comment and spacing of the old value
            let decor = existing.decor().clone();
            *existing = Value::from(stored);
            *existing.decor_mut() = decor;
            true
        }
        None => {
            candidate.insert(key, value(stored));
            true
        }
    }
}

fn array_entry<'t>(table: &'t mut Table, key: &str) -> Result<&'t mut ArrayOfTables, String> {
    table
        .entry(key)
        .or_insert(Item::ArrayOfTables(ArrayOfTables::new()))
        .as_array_of_tables_mut()
        .ok_or_else(|| format!("'{key}' must be an array of tables"))
}

fn find_or_push<'a>(entries: &'a mut ArrayOfTables, target: &str) -> Result<&'a mut Table, String> {
    let position = entries
        .iter()
        .position(|entry| entry.get(TARGET_KEY).and_then(Item::as_str) == Some(target));

    let index = match position {
        Some(index) => index,
        None => {
            let mut entry = Table::new();
            entry.insert(TARGET_KEY, value(target));
            entries.push(entry);
            entries.len() - 1
        }
    };

    entries
        .get_mut(index)
        .ok_or_else(|| format!("entry for '{target}' is not a table"))
}
