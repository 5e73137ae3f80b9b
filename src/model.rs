//! Core data model: case keys, scopes, dimensions, and the assembled record.
//!
//! Everything here is plain data. Validation happens at the boundaries
//! (facade and GraphClient ingress); internal types carry no hidden
//! invariants beyond what their constructors establish.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EngineError;

/// Context score at or above this is a complete context; the same threshold
/// gates a single dimension's `sufficient` flag.
pub const COMPLETENESS_THRESHOLD: f64 = 0.85;

/// The isolation unit: every upstream query and cache entry is tagged with
/// a `(client_id, case_id)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CaseKey {
    pub client_id: String,
    pub case_id: String,
}

impl CaseKey {
    pub fn new(client_id: impl Into<String>, case_id: impl Into<String>) -> Self {
        Self { client_id: client_id.into(), case_id: case_id.into() }
    }

    /// Both halves must be non-empty for case-scoped work.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.client_id.trim().is_empty() {
            return Err(EngineError::Validation("client_id must not be empty".into()));
        }
        if self.case_id.trim().is_empty() {
            return Err(EngineError::MissingCaseId);
        }
        Ok(())
    }

    /// Cross-case research only needs the tenant half.
    pub fn validate_client(&self) -> Result<(), EngineError> {
        if self.client_id.trim().is_empty() {
            return Err(EngineError::Validation("client_id must not be empty".into()));
        }
        Ok(())
    }
}

impl fmt::Display for CaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.client_id, self.case_id)
    }
}

/// Named bundle of dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Minimal,
    Standard,
    Comprehensive,
}

impl Scope {
    /// The scope → dimension table. Order matches the canonical dimension
    /// order, so fingerprints fall out sorted.
    pub fn dimensions(self) -> &'static [DimensionName] {
        use DimensionName::*;
        match self {
            Scope::Minimal => &[Who, Where],
            Scope::Standard => &[Who, What, Where, When],
            Scope::Comprehensive => &[Who, What, Where, When, Why],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Minimal => "minimal",
            Scope::Standard => "standard",
            Scope::Comprehensive => "comprehensive",
        }
    }
}

impl FromStr for Scope {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minimal" => Ok(Scope::Minimal),
            "standard" => Ok(Scope::Standard),
            "comprehensive" => Ok(Scope::Comprehensive),
            other => Err(EngineError::Validation(format!("unknown scope: {other:?}"))),
        }
    }
}

/// The five context dimensions. Declaration order is the canonical order;
/// `Ord` (and therefore `BTreeMap` iteration) follows it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum DimensionName {
    Who,
    What,
    Where,
    When,
    Why,
}

impl DimensionName {
    pub const ALL: [DimensionName; 5] = [
        DimensionName::Who,
        DimensionName::What,
        DimensionName::Where,
        DimensionName::When,
        DimensionName::Why,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DimensionName::Who => "WHO",
            DimensionName::What => "WHAT",
            DimensionName::Where => "WHERE",
            DimensionName::When => "WHEN",
            DimensionName::Why => "WHY",
        }
    }

    /// Case-insensitive parse; canonical upper-case on entry.
    pub fn parse(s: &str) -> Result<Self, EngineError> {
        match s.trim().to_ascii_uppercase().as_str() {
            "WHO" => Ok(DimensionName::Who),
            "WHAT" => Ok(DimensionName::What),
            "WHERE" => Ok(DimensionName::Where),
            "WHEN" => Ok(DimensionName::When),
            "WHY" => Ok(DimensionName::Why),
            other => Err(EngineError::Validation(format!("unknown dimension: {other:?}"))),
        }
    }
}

impl fmt::Display for DimensionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A non-empty, canonically-ordered, deduplicated set of dimensions.
///
/// `{WHO, WHERE}` and `{WHERE, WHO}` construct the same value and share a
/// fingerprint, which is what keeps equivalent requests on one cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DimSet(Vec<DimensionName>);

impl DimSet {
    pub fn from_scope(scope: Scope) -> Self {
        Self(scope.dimensions().to_vec())
    }

    pub fn from_dims(dims: &[DimensionName]) -> Result<Self, EngineError> {
        if dims.is_empty() {
            return Err(EngineError::Validation("dimension set must not be empty".into()));
        }
        let mut v = dims.to_vec();
        v.sort_unstable();
        v.dedup();
        Ok(Self(v))
    }

    pub fn from_names<I, S>(names: I) -> Result<Self, EngineError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let dims = names
            .into_iter()
            .map(|n| DimensionName::parse(n.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_dims(&dims)
    }

    /// Stable, order-independent identifier for cache keying.
    pub fn fingerprint(&self) -> String {
        let names: Vec<&str> = self.0.iter().map(|d| d.as_str()).collect();
        names.join("+")
    }

    pub fn contains(&self, dim: DimensionName) -> bool {
        self.0.contains(&dim)
    }

    pub fn iter(&self) -> impl Iterator<Item = DimensionName> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Case lifecycle status as known to the case store, frozen into cache
/// entries at build time for TTL selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Active,
    Closed,
    #[default]
    Unknown,
}

/// Metadata snapshot from the case store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseMetadata {
    pub status: CaseStatus,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub filing_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub jurisdiction: Option<String>,
    #[serde(default)]
    pub court: Option<String>,
    #[serde(default)]
    pub venue: Option<String>,
}

/// Knowledge-graph entity classes this service interprets. Anything else
/// deserializes as `Unknown` and is carried opaquely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    Party,
    Judge,
    Attorney,
    Witness,
    StatuteCitation,
    CaseCitation,
    LegalIssue,
    CauseOfAction,
    LegalDoctrine,
    LegalTheory,
    #[serde(other)]
    Unknown,
}

/// A graph entity. `case_id` is optional on the wire; the GraphClient tags
/// and filters according to the isolation rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    #[serde(default)]
    pub case_id: Option<String>,
    pub kind: EntityKind,
    pub name: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub attrs: Map<String, Value>,
}

/// A graph relationship between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub kind: String,
    pub source_id: String,
    pub target_id: String,
    #[serde(default)]
    pub case_id: Option<String>,
    #[serde(default)]
    pub confidence: f64,
}

/// Timeline event classes from the case store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Filing,
    Hearing,
    Deadline,
    Order,
    Generic,
}

/// A dated case event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseEvent {
    pub id: String,
    pub title: String,
    pub at: DateTime<Utc>,
    pub kind: EventKind,
}

/// One dimension's assembled payload plus its scalar quality fields. The
/// `data` document is opaque to the scorer; only the scalars are read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionData {
    pub data: Map<String, Value>,
    pub completeness: f64,
    pub confidence: f64,
    pub data_points: u32,
    pub sufficient: bool,
}

impl DimensionData {
    pub fn new(data: Map<String, Value>, completeness: f64, confidence: f64, data_points: u32) -> Self {
        let completeness = completeness.clamp(0.0, 1.0);
        Self {
            data,
            completeness,
            confidence: confidence.clamp(0.0, 1.0),
            data_points,
            sufficient: completeness >= COMPLETENESS_THRESHOLD,
        }
    }
}

/// Why a dimension produced no payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DimensionFailure {
    /// The analyzer did not finish inside the shared deadline.
    DeadlineExceeded,
    /// An upstream the dimension depends on failed.
    Upstream { message: String },
}

impl fmt::Display for DimensionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimensionFailure::DeadlineExceeded => f.write_str("deadline exceeded"),
            DimensionFailure::Upstream { message } => write!(f, "upstream failure: {message}"),
        }
    }
}

/// Outcome for one requested dimension. Dimensions outside the effective
/// set never appear in the record at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DimensionOutcome {
    Present(DimensionData),
    Failed(DimensionFailure),
}

impl DimensionOutcome {
    pub fn completeness(&self) -> f64 {
        match self {
            DimensionOutcome::Present(d) => d.completeness,
            DimensionOutcome::Failed(_) => 0.0,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, DimensionOutcome::Present(_))
    }
}

/// The composite output of a build: per-dimension outcomes plus the quality
/// score. Iteration over `dimensions` follows the canonical order because
/// `DimensionName: Ord` does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextRecord {
    pub case_key: CaseKey,
    pub scope_requested: Option<Scope>,
    pub case_name: Option<String>,
    pub case_status: CaseStatus,
    pub dimensions: BTreeMap<DimensionName, DimensionOutcome>,
    pub context_score: f64,
    pub is_complete: bool,
    pub built_at: DateTime<Utc>,
    pub cached: bool,
    pub build_ms: u64,
}

impl ContextRecord {
    /// Failed dimensions keyed by name, for the envelope's `errors` map.
    pub fn failures(&self) -> BTreeMap<DimensionName, String> {
        self.dimensions
            .iter()
            .filter_map(|(name, outcome)| match outcome {
                DimensionOutcome::Failed(reason) => Some((*name, reason.to_string())),
                DimensionOutcome::Present(_) => None,
            })
            .collect()
    }
}
