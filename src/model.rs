use serde::{Deserialize, Serialize};

use crate::event::{
    Coordinate, Description, DurationMinutes, EntryId, IncidentId, PerpetratorDetails, UnixTimeMs,
};
use crate::session::PathCaptureSession;
use crate::timeline::TimelineStore;
use crate::AppError;

/// Waypoint discriminant. Deletion rules and order semantics dispatch
/// on this exhaustively; adding a kind is a compile-checked exercise.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryKind {
    Theft,
    Movement,
    Holding,
    Final,
    Path,
}

impl EntryKind {
    pub const fn is_theft(self) -> bool {
        matches!(self, Self::Theft)
    }

    pub const fn is_final(self) -> bool {
        matches!(self, Self::Final)
    }

    /// Only holding locations record how long the phone stayed put.
    pub const fn carries_duration(self) -> bool {
        matches!(self, Self::Holding | Self::Movement)
    }

    /// Human wording used by delete confirmations and telemetry.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Theft => "theft location",
            Self::Movement => "movement location",
            Self::Holding => "stop location",
            Self::Final => "final location",
            Self::Path => "path point",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub id: EntryId,
    pub incident_id: IncidentId,
    pub coordinate: Coordinate,
    pub timestamp: UnixTimeMs,
    pub duration_at_location: Option<DurationMinutes>,
    pub kind: EntryKind,
    pub entry_order: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub title: Description,
    pub created_at: UnixTimeMs,
}

/// Free-text description of the attackers, 1:1 with an incident. Not
/// part of the timeline sequence; its presence gates a toolbar
/// affordance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PerpetratorInformation {
    pub vehicles: Option<Description>,
    pub clothing: Option<Description>,
    pub group_details: Option<Description>,
    pub other: Option<Description>,
}

impl From<PerpetratorDetails> for PerpetratorInformation {
    fn from(d: PerpetratorDetails) -> Self {
        Self {
            vehicles: d.vehicles,
            clothing: d.clothing,
            group_details: d.group_details,
            other: d.other,
        }
    }
}

/// A not-yet-persisted entry: everything the gateway append needs
/// except the entry order, which is computed from a fresh
/// authoritative read.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryDraft {
    pub kind: EntryKind,
    pub coordinate: Coordinate,
    pub timestamp: UnixTimeMs,
    pub duration_at_location: Option<DurationMinutes>,
}

/// The map-interaction tools. At most one is hot at a time; `None` on
/// the model is the idle state.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tool {
    AddTheftLocation,
    AddStopLocation,
    AddFinalLocation,
    DrawPath,
    AddPerpetratorInfo,
    StartNewIncident,
}

impl Tool {
    pub const ALL: [Tool; 6] = [
        Tool::AddTheftLocation,
        Tool::AddStopLocation,
        Tool::AddFinalLocation,
        Tool::DrawPath,
        Tool::AddPerpetratorInfo,
        Tool::StartNewIncident,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Tool::AddTheftLocation => "add_theft_location",
            Tool::AddStopLocation => "add_stop_location",
            Tool::AddFinalLocation => "add_final_location",
            Tool::DrawPath => "draw_path",
            Tool::AddPerpetratorInfo => "add_perpetrator_info",
            Tool::StartNewIncident => "start_new_incident",
        }
    }
}

/// Which collaborator dialog the shell should be showing, if any.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PendingDialog {
    TheftDetails { coordinate: Coordinate },
    StopDetails { coordinate: Coordinate },
    FinalDetails { coordinate: Coordinate },
    PerpetratorInfo { existing: Option<PerpetratorInformation> },
    ConfirmDelete { entry_id: EntryId, kind: EntryKind },
    ConfirmNewIncident,
}

#[derive(Debug, Default)]
pub struct Model {
    pub current_incident: Option<Incident>,
    pub timeline: TimelineStore,
    pub perpetrator_info: Option<PerpetratorInformation>,

    pub active_tool: Option<Tool>,
    pub path_session: Option<PathCaptureSession>,
    pub pending_dialog: Option<PendingDialog>,

    /// Gateway requests currently awaiting a result. Event routing is
    /// never blocked on this; the view just reports it as syncing.
    pub ops_in_flight: u32,
    pub active_error: Option<AppError>,
}

impl Model {
    /// An incident is active once its THEFT entry exists; every other
    /// timeline mutation hangs off that anchor.
    pub fn has_active_incident(&self) -> bool {
        self.current_incident.is_some() && self.timeline.has_theft()
    }

    /// Guard conditions for entering a tool, evaluated against the
    /// authoritative timeline.
    pub fn tool_available(&self, tool: Tool) -> bool {
        match tool {
            Tool::AddTheftLocation => !self.timeline.has_theft(),
            Tool::AddStopLocation | Tool::AddFinalLocation | Tool::DrawPath => {
                self.has_active_incident() && !self.timeline.has_final()
            }
            Tool::AddPerpetratorInfo => self.has_active_incident(),
            Tool::StartNewIncident => true,
        }
    }

    pub fn op_started(&mut self) {
        self.ops_in_flight = self.ops_in_flight.saturating_add(1);
    }

    pub fn op_finished(&mut self) {
        self.ops_in_flight = self.ops_in_flight.saturating_sub(1);
    }

    pub fn is_syncing(&self) -> bool {
        self.ops_in_flight > 0
    }

    pub fn set_error(&mut self, error: AppError) {
        self.active_error = Some(error);
    }

    pub fn clear_error(&mut self) {
        self.active_error = None;
    }

    /// Drops every transient tool artifact: active tool, path session,
    /// open dialog. Timeline and incident survive.
    pub fn reset_tool_state(&mut self) {
        self.active_tool = None;
        self.path_session = None;
        self.pending_dialog = None;
    }

    /// Full reset after a cascade delete or when starting a different
    /// incident timeline.
    pub fn clear_incident_state(&mut self) {
        self.current_incident = None;
        self.timeline.clear();
        self.perpetrator_info = None;
        self.reset_tool_state();
        self.active_error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Coordinate;

    fn entry(kind: EntryKind, order: u32) -> TimelineEntry {
        TimelineEntry {
            id: EntryId::new(format!("e{order}")),
            incident_id: IncidentId::new("inc-1"),
            coordinate: Coordinate::new(51.5, -0.12).unwrap(),
            timestamp: UnixTimeMs(1_700_000_000_000),
            duration_at_location: None,
            kind,
            entry_order: order,
        }
    }

    fn model_with(entries: Vec<TimelineEntry>) -> Model {
        let mut model = Model::default();
        if !entries.is_empty() {
            model.current_incident = Some(Incident {
                id: IncidentId::new("inc-1"),
                title: Description::new("stolen phone").unwrap(),
                created_at: UnixTimeMs(1_700_000_000_000),
            });
        }
        model.timeline.replace(entries).unwrap();
        model
    }

    #[test]
    fn theft_tool_gated_on_absence_of_theft_entry() {
        let empty = model_with(vec![]);
        assert!(empty.tool_available(Tool::AddTheftLocation));

        let started = model_with(vec![entry(EntryKind::Theft, 1)]);
        assert!(!started.tool_available(Tool::AddTheftLocation));
    }

    #[test]
    fn route_tools_require_active_incident() {
        let empty = model_with(vec![]);
        assert!(!empty.tool_available(Tool::AddStopLocation));
        assert!(!empty.tool_available(Tool::AddFinalLocation));
        assert!(!empty.tool_available(Tool::DrawPath));
        assert!(!empty.tool_available(Tool::AddPerpetratorInfo));
    }

    #[test]
    fn final_entry_seals_the_route() {
        let sealed = model_with(vec![
            entry(EntryKind::Theft, 1),
            entry(EntryKind::Final, 2),
        ]);
        assert!(!sealed.tool_available(Tool::AddStopLocation));
        assert!(!sealed.tool_available(Tool::AddFinalLocation));
        assert!(!sealed.tool_available(Tool::DrawPath));
        // Perpetrator info does not care whether the route is sealed.
        assert!(sealed.tool_available(Tool::AddPerpetratorInfo));
    }

    #[test]
    fn new_incident_always_reachable() {
        assert!(model_with(vec![]).tool_available(Tool::StartNewIncident));
        let sealed = model_with(vec![
            entry(EntryKind::Theft, 1),
            entry(EntryKind::Final, 2),
        ]);
        assert!(sealed.tool_available(Tool::StartNewIncident));
    }

    #[test]
    fn ops_in_flight_never_underflows() {
        let mut model = Model::default();
        model.op_finished();
        assert_eq!(model.ops_in_flight, 0);
        model.op_started();
        assert!(model.is_syncing());
        model.op_finished();
        assert!(!model.is_syncing());
    }

    #[test]
    fn clear_incident_state_drops_everything() {
        let mut model = model_with(vec![entry(EntryKind::Theft, 1)]);
        model.active_tool = Some(Tool::DrawPath);
        model.path_session = Some(PathCaptureSession::new());
        model.perpetrator_info = Some(PerpetratorInformation::default());
        model.clear_incident_state();
        assert!(model.current_incident.is_none());
        assert!(model.timeline.is_empty());
        assert!(model.active_tool.is_none());
        assert!(model.path_session.is_none());
        assert!(model.perpetrator_info.is_none());
    }
}
