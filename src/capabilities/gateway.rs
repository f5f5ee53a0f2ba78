//! Persistence gateway capability.
//!
//! The core consumes the gateway, it never implements it: every
//! operation is handed to the shell, which owns the actual storage
//! backend. Mutating operations carry an `OpId` so a retried request
//! is idempotent on the other side.

use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::event::{EntryId, IncidentId, PerpetratorDetails, TheftDetails};
use crate::model::{EntryDraft, Incident, PerpetratorInformation, TimelineEntry};
use crate::session::PathPoint;

/// Idempotency key for a mutating gateway operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpId(Uuid);

impl OpId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAssignment {
    pub entry_id: EntryId,
    pub entry_order: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatewayOperation {
    CreateIncident {
        op_id: OpId,
        details: TheftDetails,
    },
    AppendTimelineEntry {
        op_id: OpId,
        incident_id: IncidentId,
        draft: EntryDraft,
        entry_order: u32,
    },
    /// Bulk append for a committed path.
    AppendTimelineEntries {
        op_id: OpId,
        incident_id: IncidentId,
        points: Vec<PathPoint>,
    },
    DeleteTimelineEntry {
        op_id: OpId,
        entry_id: EntryId,
    },
    /// Rewrites the orders of the reindexed survivor set after a
    /// delete.
    UpdateEntryOrders {
        op_id: OpId,
        incident_id: IncidentId,
        assignments: Vec<OrderAssignment>,
    },
    DeleteIncidentCascade {
        op_id: OpId,
        incident_id: IncidentId,
    },
    LoadTimeline {
        incident_id: IncidentId,
    },
    LoadMaxEntryOrder {
        incident_id: IncidentId,
    },
    SavePerpetratorInformation {
        op_id: OpId,
        incident_id: IncidentId,
        details: PerpetratorDetails,
    },
    LoadPerpetratorInformation {
        incident_id: IncidentId,
    },
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum GatewayError {
    #[error("network error: {message}")]
    Network { message: String },

    #[error("request timed out")]
    Timeout,

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("conflicting write: {message}")]
    Conflict { message: String },

    #[error("storage error: {message}")]
    Storage { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum GatewayOutput {
    IncidentCreated(Incident),
    EntryAppended(TimelineEntry),
    EntriesAppended,
    EntryDeleted,
    OrdersUpdated,
    IncidentDeleted,
    TimelineLoaded(Vec<TimelineEntry>),
    MaxEntryOrder(u32),
    PerpetratorSaved,
    PerpetratorLoaded(Option<PerpetratorInformation>),
}

pub type GatewayResult = Result<GatewayOutput, GatewayError>;

impl Operation for GatewayOperation {
    type Output = GatewayResult;
}

#[derive(Clone)]
pub struct Gateway<Ev> {
    context: CapabilityContext<GatewayOperation, Ev>,
}

impl<Ev> std::fmt::Debug for Gateway<Ev> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway").finish_non_exhaustive()
    }
}

impl<Ev> Capability<Ev> for Gateway<Ev> {
    type Operation = GatewayOperation;
    type MappedSelf<MappedEv> = Gateway<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static,
    {
        Gateway::new(self.context.map_event(f))
    }
}

impl<Ev> Gateway<Ev> {
    pub fn new(context: CapabilityContext<GatewayOperation, Ev>) -> Self {
        Self { context }
    }
}

impl<Ev> Gateway<Ev>
where
    Ev: Send + 'static,
{
    fn request<F>(&self, operation: GatewayOperation, make_event: F)
    where
        F: FnOnce(GatewayResult) -> Ev + Send + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let result = context.request_from_shell(operation).await;
            context.update_app(make_event(result));
        });
    }

    pub fn create_incident<F>(&self, details: TheftDetails, make_event: F)
    where
        F: FnOnce(GatewayResult) -> Ev + Send + 'static,
    {
        self.request(
            GatewayOperation::CreateIncident {
                op_id: OpId::generate(),
                details,
            },
            make_event,
        );
    }

    pub fn append_timeline_entry<F>(
        &self,
        incident_id: IncidentId,
        draft: EntryDraft,
        entry_order: u32,
        make_event: F,
    ) where
        F: FnOnce(GatewayResult) -> Ev + Send + 'static,
    {
        self.request(
            GatewayOperation::AppendTimelineEntry {
                op_id: OpId::generate(),
                incident_id,
                draft,
                entry_order,
            },
            make_event,
        );
    }

    pub fn append_path_points<F>(
        &self,
        incident_id: IncidentId,
        points: Vec<PathPoint>,
        make_event: F,
    ) where
        F: FnOnce(GatewayResult) -> Ev + Send + 'static,
    {
        self.request(
            GatewayOperation::AppendTimelineEntries {
                op_id: OpId::generate(),
                incident_id,
                points,
            },
            make_event,
        );
    }

    pub fn delete_timeline_entry<F>(&self, entry_id: EntryId, make_event: F)
    where
        F: FnOnce(GatewayResult) -> Ev + Send + 'static,
    {
        self.request(
            GatewayOperation::DeleteTimelineEntry {
                op_id: OpId::generate(),
                entry_id,
            },
            make_event,
        );
    }

    pub fn update_entry_orders<F>(
        &self,
        incident_id: IncidentId,
        assignments: Vec<OrderAssignment>,
        make_event: F,
    ) where
        F: FnOnce(GatewayResult) -> Ev + Send + 'static,
    {
        self.request(
            GatewayOperation::UpdateEntryOrders {
                op_id: OpId::generate(),
                incident_id,
                assignments,
            },
            make_event,
        );
    }

    pub fn delete_incident_cascade<F>(&self, incident_id: IncidentId, make_event: F)
    where
        F: FnOnce(GatewayResult) -> Ev + Send + 'static,
    {
        self.request(
            GatewayOperation::DeleteIncidentCascade {
                op_id: OpId::generate(),
                incident_id,
            },
            make_event,
        );
    }

    pub fn load_timeline<F>(&self, incident_id: IncidentId, make_event: F)
    where
        F: FnOnce(GatewayResult) -> Ev + Send + 'static,
    {
        self.request(GatewayOperation::LoadTimeline { incident_id }, make_event);
    }

    pub fn load_max_entry_order<F>(&self, incident_id: IncidentId, make_event: F)
    where
        F: FnOnce(GatewayResult) -> Ev + Send + 'static,
    {
        self.request(
            GatewayOperation::LoadMaxEntryOrder { incident_id },
            make_event,
        );
    }

    pub fn save_perpetrator_information<F>(
        &self,
        incident_id: IncidentId,
        details: PerpetratorDetails,
        make_event: F,
    ) where
        F: FnOnce(GatewayResult) -> Ev + Send + 'static,
    {
        self.request(
            GatewayOperation::SavePerpetratorInformation {
                op_id: OpId::generate(),
                incident_id,
                details,
            },
            make_event,
        );
    }

    pub fn load_perpetrator_information<F>(&self, incident_id: IncidentId, make_event: F)
    where
        F: FnOnce(GatewayResult) -> Ev + Send + 'static,
    {
        self.request(
            GatewayOperation::LoadPerpetratorInformation { incident_id },
            make_event,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_ids_are_unique() {
        assert_ne!(OpId::generate(), OpId::generate());
    }

    #[test]
    fn gateway_errors_survive_the_wire() {
        let error = GatewayError::NotFound {
            what: "timeline entry".into(),
        };
        let encoded = serde_json::to_string(&error).unwrap();
        let decoded: GatewayError = serde_json::from_str(&encoded).unwrap();
        assert_eq!(error, decoded);
    }
}
