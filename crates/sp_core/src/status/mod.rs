//! Status aggregation: derive component and global health from active impacts.
//!
//! Everything here is pure. Callers pre-fetch the two read paths (unresolved incident impacts,
//! in-progress maintenance impacts) and the active components, then reduce them in one pass.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::{
    Component, ComponentStatus, Impact, IncidentImpactRow, MaintenanceImpactRow, Tier,
};

/// Strongest signal seen for one component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Signals {
    incident_outage: bool,
    incident_degraded: bool,
    maintenance: bool,
}

impl Signals {
    fn status(self) -> ComponentStatus {
        if self.incident_outage {
            ComponentStatus::MajorOutage
        } else if self.incident_degraded {
            ComponentStatus::Degraded
        } else if self.maintenance {
            ComponentStatus::Maintenance
        } else {
            ComponentStatus::Operational
        }
    }
}

/// Active impacts indexed by component id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveImpacts {
    by_component: HashMap<i64, Signals>,
}

impl ActiveImpacts {
    pub fn from_rows(
        incidents: &[IncidentImpactRow],
        maintenance: &[MaintenanceImpactRow],
    ) -> Self {
        let mut by_component: HashMap<i64, Signals> = HashMap::new();
        for row in incidents {
            let signals = by_component.entry(row.component_id).or_default();
            match row.impact {
                Impact::Outage => signals.incident_outage = true,
                Impact::Degraded => signals.incident_degraded = true,
            }
        }
        // Either expected impact counts as maintenance; incidents outrank it regardless.
        for row in maintenance {
            by_component.entry(row.component_id).or_default().maintenance = true;
        }
        Self { by_component }
    }

    pub fn component_status(&self, component_id: i64) -> ComponentStatus {
        self.by_component
            .get(&component_id)
            .copied()
            .unwrap_or_default()
            .status()
    }
}

/// Status of a single component given the impacts that reference it.
pub fn compute_component_status(
    component_id: i64,
    incidents: &[IncidentImpactRow],
    maintenance: &[MaintenanceImpactRow],
) -> ComponentStatus {
    let incidents: Vec<_> = incidents
        .iter()
        .filter(|r| r.component_id == component_id)
        .copied()
        .collect();
    let maintenance: Vec<_> = maintenance
        .iter()
        .filter(|r| r.component_id == component_id)
        .copied()
        .collect();
    ActiveImpacts::from_rows(&incidents, &maintenance).component_status(component_id)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComponentStatusInfo {
    pub id: i64,
    pub name: String,
    pub group_id: Option<i64>,
    pub tier: Tier,
    pub status: ComponentStatus,
}

/// Status of every given component. Impact rows for components not in `components`
/// (deleted or deactivated) are ignored.
pub fn compute_component_statuses(
    components: &[Component],
    impacts: &ActiveImpacts,
) -> Vec<ComponentStatusInfo> {
    components
        .iter()
        .filter(|c| c.is_active)
        .map(|c| ComponentStatusInfo {
            id: c.id,
            name: c.name.clone(),
            group_id: c.group_id,
            tier: c.tier,
            status: impacts.component_status(c.id),
        })
        .collect()
}

/// How a tier-2/3 component's status surfaces globally: any degradation reads as `degraded`,
/// maintenance on a non-critical component does not surface at all.
pub fn downgrade_minor_tier(status: ComponentStatus) -> ComponentStatus {
    match status {
        ComponentStatus::MajorOutage
        | ComponentStatus::PartialOutage
        | ComponentStatus::Degraded => ComponentStatus::Degraded,
        ComponentStatus::Maintenance | ComponentStatus::Operational => ComponentStatus::Operational,
    }
}

/// Worst tier-0/1 status, combined with the downgraded worst tier-2/3 status.
pub fn compute_global_status(components: &[ComponentStatusInfo]) -> ComponentStatus {
    components
        .iter()
        .map(|c| {
            if c.tier.is_critical() {
                c.status
            } else {
                downgrade_minor_tier(c.status)
            }
        })
        .fold(ComponentStatus::Operational, ComponentStatus::worst)
}
