use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Closed set of lowercase string values persisted as TEXT columns.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = AppError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(AppError::new(
                        "VALIDATION_UNKNOWN_VALUE",
                        concat!("Unknown ", stringify!($name), " value"),
                    )
                    .with_details(format!("value={other}"))),
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let s = value.as_str()?;
                s.parse().map_err(|e: AppError| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

text_enum!(
    /// Incident severity levels.
    Severity {
        Critical => "critical",
        Major => "major",
        Minor => "minor",
        Info => "info",
    }
);

text_enum!(
    /// Incident lifecycle; `Resolved` is terminal for operator edits.
    IncidentStatus {
        Investigating => "investigating",
        Identified => "identified",
        Monitoring => "monitoring",
        Resolved => "resolved",
    }
);

text_enum!(
    MaintenanceStatus {
        Scheduled => "scheduled",
        InProgress => "in_progress",
        Completed => "completed",
        Canceled => "canceled",
    }
);

text_enum!(
    /// Impact declared by an incident (or expected by a maintenance window) on one component.
    Impact {
        Degraded => "degraded",
        Outage => "outage",
    }
);

text_enum!(
    /// Derived health of a component or of the whole system. Never stored.
    ComponentStatus {
        Operational => "operational",
        Maintenance => "maintenance",
        Degraded => "degraded",
        PartialOutage => "partial_outage",
        MajorOutage => "major_outage",
    }
);

text_enum!(
    /// Sync bookkeeping state of a datasource.
    SyncStatus {
        Idle => "idle",
        Syncing => "syncing",
        Success => "success",
        Error => "error",
    }
);

text_enum!(
    /// Supported external incident providers.
    ProviderKind {
        PagerDuty => "pagerduty",
        Mock => "mock",
    }
);

impl IncidentStatus {
    pub fn is_resolved(self) -> bool {
        self == IncidentStatus::Resolved
    }
}

impl ComponentStatus {
    /// Position in the "worst status" ordering:
    /// major_outage > partial_outage > degraded > maintenance > operational.
    pub fn rank(self) -> u8 {
        match self {
            ComponentStatus::Operational => 0,
            ComponentStatus::Maintenance => 1,
            ComponentStatus::Degraded => 2,
            ComponentStatus::PartialOutage => 3,
            ComponentStatus::MajorOutage => 4,
        }
    }

    pub fn worst(self, other: ComponentStatus) -> ComponentStatus {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }
}

/// Criticality rank, 0 (most critical) to 3.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "i64", into = "i64")]
pub struct Tier(u8);

impl Tier {
    pub const MAX: u8 = 3;

    pub fn new(value: i64) -> Result<Self, AppError> {
        if (0..=i64::from(Self::MAX)).contains(&value) {
            Ok(Tier(value as u8))
        } else {
            Err(
                AppError::new("VALIDATION_TIER_OUT_OF_RANGE", "Component tier must be 0..=3")
                    .with_details(format!("tier={value}")),
            )
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Tier 0 and 1 components drive the global status at full weight.
    pub fn is_critical(self) -> bool {
        self.0 <= 1
    }
}

impl Default for Tier {
    fn default() -> Self {
        Tier(2)
    }
}

impl TryFrom<i64> for Tier {
    type Error = AppError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Tier::new(value)
    }
}

impl From<Tier> for i64 {
    fn from(tier: Tier) -> Self {
        i64::from(tier.0)
    }
}

impl ToSql for Tier {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(i64::from(self.0)))
    }
}

impl FromSql for Tier {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_i64()?;
        Tier::new(raw).map_err(|_| FromSqlError::OutOfRange(raw))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComponentGroup {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub display_order: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Component {
    pub id: i64,
    pub group_id: Option<i64>,
    pub name: String,
    pub description: Option<String>,
    pub tier: Tier,
    pub display_order: i64,
    pub is_active: bool,
}

/// Incident record.
///
/// Notes:
/// - `resolved_at` is non-null iff `status == resolved` (enforced by a table CHECK as well).
/// - `status` always mirrors the latest appended update's `status_snapshot`.
/// - `version` is bumped on every status write and used for optimistic concurrency.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Incident {
    pub id: i64,
    pub title: String,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub started_at: String,
    pub resolved_at: Option<String>,
    pub source: String,
    pub created_by: String,
    pub version: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IncidentUpdate {
    pub id: i64,
    pub incident_id: i64,
    pub message: String,
    pub status_snapshot: IncidentStatus,
    pub created_by: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComponentImpact {
    pub component_id: i64,
    pub impact: Impact,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MaintenanceWindow {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: MaintenanceStatus,
    pub start_at: String,
    pub end_at: String,
    pub created_by: String,
}

/// External incident provider integration. The sealed api key never leaves the storage layer
/// in serialized form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Datasource {
    pub id: i64,
    pub name: String,
    pub provider_type: ProviderKind,
    #[serde(skip_serializing, default)]
    pub api_key_sealed: String,
    pub base_url: Option<String>,
    pub service_ids: Vec<String>,
    pub enabled: bool,
    pub sync_interval_seconds: i64,
    pub last_sync_at: Option<String>,
    pub sync_status: SyncStatus,
    pub sync_error: Option<String>,
}

impl Datasource {
    pub fn has_api_key(&self) -> bool {
        !self.api_key_sealed.is_empty()
    }
}

/// Durable (datasource_id, external_id) linkage for incidents created by a sync.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExternalIncidentLink {
    pub id: i64,
    pub datasource_id: i64,
    pub external_id: String,
    pub incident_id: i64,
    pub external_url: Option<String>,
    /// Provider status from the last sync, already mapped. `None` on links that predate it.
    pub upstream_status: Option<IncidentStatus>,
    pub synced_at: String,
}

/// One impact row of an unresolved incident, as fetched for aggregation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct IncidentImpactRow {
    pub incident_id: i64,
    pub component_id: i64,
    pub impact: Impact,
}

/// One expected-impact row of an in-progress maintenance window, as fetched for aggregation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MaintenanceImpactRow {
    pub maintenance_id: i64,
    pub component_id: i64,
    pub impact: Impact,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationWarning {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
}

impl ValidationWarning {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_enums_round_trip_their_wire_values() {
        for status in IncidentStatus::ALL {
            assert_eq!(status.as_str().parse::<IncidentStatus>().unwrap(), *status);
        }
        assert_eq!(
            "in_progress".parse::<MaintenanceStatus>().unwrap(),
            MaintenanceStatus::InProgress
        );
        let err = "exploded".parse::<Impact>().unwrap_err();
        assert_eq!(err.code, "VALIDATION_UNKNOWN_VALUE");
    }

    #[test]
    fn status_ranking_matches_worst_ordering() {
        use ComponentStatus::*;
        assert!(MajorOutage.rank() > PartialOutage.rank());
        assert!(PartialOutage.rank() > Degraded.rank());
        assert!(Degraded.rank() > Maintenance.rank());
        assert!(Maintenance.rank() > Operational.rank());
        assert_eq!(Degraded.worst(Maintenance), Degraded);
        assert_eq!(Operational.worst(MajorOutage), MajorOutage);
    }

    #[test]
    fn tier_rejects_out_of_range_values() {
        assert!(Tier::new(0).unwrap().is_critical());
        assert!(Tier::new(1).unwrap().is_critical());
        assert!(!Tier::new(3).unwrap().is_critical());
        assert_eq!(Tier::new(4).unwrap_err().code, "VALIDATION_TIER_OUT_OF_RANGE");
        assert!(Tier::new(-1).is_err());
    }
}
