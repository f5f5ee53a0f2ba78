#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod capabilities;
pub mod event;
pub mod model;
pub mod ordering;
pub mod session;
pub mod timeline;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use app::App;
pub use capabilities::{Capabilities, Effect};
pub use event::Event;
pub use model::Model;

/// The theft entry is the sequence origin of every incident timeline.
pub const THEFT_ENTRY_ORDER: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Transient,
    Permanent,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Validation,
    /// A local rule was violated; the request never reached the
    /// persistence gateway.
    Invariant,
    /// The gateway failed; re-running the same operation is safe
    /// because order recomputation is idempotent.
    Persistence,
    /// A loaded or computed sequence was not contiguous 1..N.
    OrderingDrift,
    NotFound,
    InvalidState,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::Invariant => "INVARIANT_VIOLATION",
            Self::Persistence => "PERSISTENCE_FAILURE",
            Self::OrderingDrift => "ORDERING_DRIFT",
            Self::NotFound => "NOT_FOUND",
            Self::InvalidState => "INVALID_STATE",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    #[must_use]
    pub const fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::Persistence | Self::InvalidState => ErrorSeverity::Transient,
            Self::Validation | Self::Invariant | Self::NotFound => ErrorSeverity::Permanent,
            Self::OrderingDrift | Self::Internal => ErrorSeverity::Fatal,
        }
    }

    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Persistence | Self::InvalidState)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    pub internal_message: Option<String>,
    pub context: HashMap<String, String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            internal_message: None,
            context: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable() && !matches!(self.severity, ErrorSeverity::Fatal)
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::Validation | ErrorKind::Invariant => self.message.clone(),
            ErrorKind::Persistence => {
                "Couldn't reach storage. Your timeline is unchanged; please try again.".into()
            }
            ErrorKind::OrderingDrift => {
                "The timeline ordering looked wrong and is being reloaded from storage.".into()
            }
            ErrorKind::NotFound => {
                "That item is no longer there. The timeline may have changed.".into()
            }
            ErrorKind::InvalidState => {
                "The timeline is still refreshing. Try again in a moment.".into()
            }
            ErrorKind::Internal => "An unexpected error occurred. Please try again.".into(),
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

impl From<event::ValidationError> for AppError {
    fn from(e: event::ValidationError) -> Self {
        Self::new(ErrorKind::Validation, e.to_string())
    }
}

impl From<ordering::OrderingError> for AppError {
    fn from(e: ordering::OrderingError) -> Self {
        let kind = match e {
            ordering::OrderingError::TheftEntryProtected => ErrorKind::Invariant,
            ordering::OrderingError::EntryNotFound(_) => ErrorKind::NotFound,
            ordering::OrderingError::Drift { .. } => ErrorKind::OrderingDrift,
        };
        Self::new(kind, e.to_string())
    }
}

impl From<session::SessionError> for AppError {
    fn from(e: session::SessionError) -> Self {
        let kind = match e {
            session::SessionError::EmptyCommit => ErrorKind::Invariant,
            session::SessionError::NoAnchorSelected
            | session::SessionError::AnchorAlreadySelected => ErrorKind::InvalidState,
        };
        Self::new(kind, e.to_string())
    }
}

impl From<capabilities::GatewayError> for AppError {
    fn from(e: capabilities::GatewayError) -> Self {
        let kind = match e {
            capabilities::GatewayError::NotFound { .. } => ErrorKind::NotFound,
            _ => ErrorKind::Persistence,
        };
        Self::new(kind, "The storage backend reported an error").with_internal(e.to_string())
    }
}

// --- View model ---

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MarkerPin {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    pub kind: model::EntryKind,
    pub entry_order: u32,
    pub timestamp_ms: u64,
    pub duration_minutes: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MapPointView {
    pub lat: f64,
    pub lng: f64,
}

/// The in-progress drawn route, for the shell to render as a dashed
/// line while the session accumulates points.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PathPreview {
    pub selecting_anchor: bool,
    pub anchor: Option<MapPointView>,
    pub points: Vec<MapPointView>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolButton {
    pub tool: model::Tool,
    pub active: bool,
    pub enabled: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DialogView {
    TheftDetails {
        lat: f64,
        lng: f64,
    },
    StopDetails {
        lat: f64,
        lng: f64,
    },
    FinalDetails {
        lat: f64,
        lng: f64,
    },
    PerpetratorInfo {
        existing: Option<model::PerpetratorInformation>,
    },
    ConfirmDelete {
        entry_id: String,
        kind: model::EntryKind,
        label: String,
    },
    ConfirmNewIncident,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UserFacingError {
    pub message: String,
    pub is_transient: bool,
    pub is_retryable: bool,
    pub error_code: String,
}

impl From<&AppError> for UserFacingError {
    fn from(e: &AppError) -> Self {
        Self {
            message: e.user_facing_message(),
            is_transient: e.severity == ErrorSeverity::Transient,
            is_retryable: e.is_retryable(),
            error_code: e.code().to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ViewModel {
    pub incident_id: Option<String>,
    pub incident_title: Option<String>,
    pub markers: Vec<MarkerPin>,
    pub route_sealed: bool,
    pub toolbar: Vec<ToolButton>,
    pub path: Option<PathPreview>,
    pub dialog: Option<DialogView>,
    pub has_perpetrator_info: bool,
    pub is_syncing: bool,
    pub error: Option<UserFacingError>,
}

pub mod app {
    use super::*;
    use crate::capabilities::{
        Capabilities, GatewayError, GatewayOutput, OrderAssignment,
    };
    use crate::event::{Coordinate, KeyInput};
    use crate::model::{EntryDraft, EntryKind, PendingDialog, Tool};
    use crate::ordering::{self, OrderingError};
    use crate::session::PathCaptureSession;
    use crate::{AppError, ErrorKind, Event, Model, ViewModel};

    #[derive(Default)]
    pub struct App;

    impl App {
        fn validate_coordinates(lat: f64, lng: f64) -> Result<Coordinate, AppError> {
            Coordinate::new(lat, lng).map_err(|e| {
                AppError::new(ErrorKind::Validation, e.to_string())
                    .with_context("lat", lat.to_string())
                    .with_context("lng", lng.to_string())
            })
        }

        /// Deactivates whatever tool is hot, running its cancellation
        /// side effect. A live path session dies with its tool.
        fn deactivate_tool(model: &mut Model, caps: &Capabilities) {
            let Some(tool) = model.active_tool.take() else {
                return;
            };
            if tool == Tool::DrawPath {
                if let Some(session) = model.path_session.take() {
                    let discarded = session.cancel();
                    caps.telemetry.event(
                        "path_session_cancelled",
                        &[("discarded_points", &discarded.to_string())],
                    );
                }
            }
            caps.telemetry.event("tool_deactivated", &[("tool", tool.name())]);
        }

        /// Schedules the authoritative re-read every mutation ends
        /// with.
        fn request_timeline_refresh(model: &mut Model, caps: &Capabilities) {
            let Some(incident_id) = model.current_incident.as_ref().map(|i| i.id.clone()) else {
                return;
            };
            model.op_started();
            caps.gateway.load_timeline(incident_id, |result| Event::TimelineLoaded {
                result: Box::new(result),
            });
        }

        /// Starts the append chain for a one-shot capture: fresh
        /// max-order read first, never a stale in-memory count.
        fn request_ordered_append(model: &mut Model, caps: &Capabilities, draft: EntryDraft) {
            if model.timeline.is_stale() {
                model.set_error(AppError::new(
                    ErrorKind::InvalidState,
                    "The timeline is being repaired; try again in a moment",
                ));
                return;
            }
            if model.timeline.has_final() {
                model.set_error(AppError::new(
                    ErrorKind::Invariant,
                    "The route is already sealed with a final location",
                ));
                return;
            }
            let Some(incident_id) = model.current_incident.as_ref().map(|i| i.id.clone()) else {
                model.set_error(AppError::new(ErrorKind::InvalidState, "No active incident"));
                return;
            };
            caps.telemetry
                .event("append_requested", &[("kind", draft.kind.label())]);
            model.op_started();
            caps.gateway
                .load_max_entry_order(incident_id, move |result| Event::NextOrderLoaded {
                    draft: Box::new(draft),
                    result: Box::new(result),
                });
        }

        /// Finishes an interrupted reindex: the loaded sequence has a
        /// gap, and reindexing is idempotent, so compute the repair
        /// and write it back.
        fn repair_ordering(
            model: &mut Model,
            caps: &Capabilities,
            loaded: Vec<crate::model::TimelineEntry>,
        ) {
            let Some(incident_id) = model.current_incident.as_ref().map(|i| i.id.clone()) else {
                return;
            };
            let reindexed = ordering::reindex(loaded.clone());
            let assignments: Vec<OrderAssignment> = ordering::order_assignments(&loaded, &reindexed)
                .into_iter()
                .map(|(entry_id, entry_order)| OrderAssignment {
                    entry_id,
                    entry_order,
                })
                .collect();
            if assignments.is_empty() {
                return;
            }
            model.op_started();
            caps.gateway
                .update_entry_orders(incident_id, assignments, |result| Event::OrdersRewritten {
                    result: Box::new(result),
                });
        }

        fn surface_gateway_failure(
            model: &mut Model,
            caps: &Capabilities,
            operation: &str,
            error: GatewayError,
        ) {
            caps.telemetry.error(operation, &error.to_string());
            model.set_error(AppError::from(error));
        }

        fn surface_unexpected_output(model: &mut Model, caps: &Capabilities, operation: &str) {
            caps.telemetry.error(operation, "unexpected gateway output");
            model.set_error(
                AppError::new(ErrorKind::Internal, "An unexpected error occurred")
                    .with_internal(format!("unexpected gateway output for {operation}")),
            );
        }

        fn build_markers(model: &Model) -> Vec<MarkerPin> {
            model
                .timeline
                .entries()
                .iter()
                .map(|e| MarkerPin {
                    id: e.id.as_str().to_string(),
                    lat: e.coordinate.lat(),
                    lng: e.coordinate.lng(),
                    kind: e.kind,
                    entry_order: e.entry_order,
                    timestamp_ms: e.timestamp.0,
                    duration_minutes: e.duration_at_location.map(|d| d.minutes()),
                })
                .collect()
        }

        fn build_toolbar(model: &Model) -> Vec<ToolButton> {
            Tool::ALL
                .iter()
                .map(|tool| ToolButton {
                    tool: *tool,
                    // The perpetrator button also lights up once info
                    // exists, as an "already recorded" hint.
                    active: model.active_tool == Some(*tool)
                        || (*tool == Tool::AddPerpetratorInfo && model.perpetrator_info.is_some()),
                    enabled: model.tool_available(*tool),
                })
                .collect()
        }

        fn build_dialog(model: &Model) -> Option<DialogView> {
            model.pending_dialog.as_ref().map(|dialog| match dialog {
                PendingDialog::TheftDetails { coordinate } => DialogView::TheftDetails {
                    lat: coordinate.lat(),
                    lng: coordinate.lng(),
                },
                PendingDialog::StopDetails { coordinate } => DialogView::StopDetails {
                    lat: coordinate.lat(),
                    lng: coordinate.lng(),
                },
                PendingDialog::FinalDetails { coordinate } => DialogView::FinalDetails {
                    lat: coordinate.lat(),
                    lng: coordinate.lng(),
                },
                PendingDialog::PerpetratorInfo { existing } => DialogView::PerpetratorInfo {
                    existing: existing.clone(),
                },
                PendingDialog::ConfirmDelete { entry_id, kind } => DialogView::ConfirmDelete {
                    entry_id: entry_id.as_str().to_string(),
                    kind: *kind,
                    label: kind.label().to_string(),
                },
                PendingDialog::ConfirmNewIncident => DialogView::ConfirmNewIncident,
            })
        }
    }

    impl crux_core::App for App {
        type Event = Event;
        type Model = Model;
        type ViewModel = ViewModel;
        type Capabilities = Capabilities;

        fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
            let event_name = event.name();
            caps.telemetry.counter(event_name, 1);
            if event.is_user_initiated() {
                caps.telemetry.event("user_action", &[("event", event_name)]);
            }

            match event {
                Event::IncidentSelected(incident) => {
                    model.clear_incident_state();
                    let incident_id = incident.id.clone();
                    model.current_incident = Some(*incident);

                    model.op_started();
                    caps.gateway
                        .load_timeline(incident_id.clone(), |result| Event::TimelineLoaded {
                            result: Box::new(result),
                        });
                    model.op_started();
                    caps.gateway
                        .load_perpetrator_information(incident_id, |result| {
                            Event::PerpetratorLoaded {
                                result: Box::new(result),
                            }
                        });
                    caps.render.render();
                }

                Event::NewIncidentConfirmed => {
                    if !matches!(model.pending_dialog, Some(PendingDialog::ConfirmNewIncident)) {
                        caps.telemetry
                            .error("orphan_confirmation", "new incident confirmed with no dialog");
                        return;
                    }
                    // The incident record itself is created when the
                    // theft location is captured; here we only clear
                    // the slate.
                    model.clear_incident_state();
                    caps.telemetry.event("new_incident_started", &[]);
                    caps.render.render();
                }

                Event::ToolSelected { tool } => {
                    if model.active_tool == Some(tool) {
                        // Re-selecting the hot tool toggles it off, no
                        // map click required.
                        Self::deactivate_tool(model, caps);
                        model.pending_dialog = None;
                        caps.render.render();
                        return;
                    }

                    if !model.tool_available(tool) {
                        // Guard rejection: no state change. The shell
                        // disables these buttons, so landing here means
                        // its view of the guards is out of date.
                        caps.telemetry
                            .event("tool_rejected", &[("tool", tool.name())]);
                        return;
                    }

                    Self::deactivate_tool(model, caps);
                    model.pending_dialog = None;

                    match tool {
                        Tool::DrawPath => {
                            // One session per incident: reuse and reset
                            // rather than stacking a second one.
                            match model.path_session.as_mut() {
                                Some(session) => session.reset(),
                                None => model.path_session = Some(PathCaptureSession::new()),
                            }
                        }
                        Tool::AddPerpetratorInfo => {
                            model.pending_dialog = Some(PendingDialog::PerpetratorInfo {
                                existing: model.perpetrator_info.clone(),
                            });
                        }
                        Tool::StartNewIncident => {
                            model.pending_dialog = Some(PendingDialog::ConfirmNewIncident);
                        }
                        Tool::AddTheftLocation
                        | Tool::AddStopLocation
                        | Tool::AddFinalLocation => {}
                    }

                    model.active_tool = Some(tool);
                    caps.telemetry
                        .event("tool_activated", &[("tool", tool.name())]);
                    caps.render.render();
                }

                Event::MapClicked { lat, lng } => {
                    let coordinate = match Self::validate_coordinates(lat, lng) {
                        Ok(c) => c,
                        Err(e) => {
                            caps.telemetry.error("map_click_invalid", &e.to_string());
                            model.set_error(e);
                            caps.render.render();
                            return;
                        }
                    };

                    match model.active_tool {
                        // One-shot captures: consume exactly one
                        // coordinate, open the detail form, drop back
                        // to idle.
                        Some(Tool::AddTheftLocation) => {
                            model.active_tool = None;
                            model.pending_dialog = Some(PendingDialog::TheftDetails { coordinate });
                            caps.telemetry.event("theft_location_picked", &[]);
                            caps.render.render();
                        }
                        Some(Tool::AddStopLocation) => {
                            model.active_tool = None;
                            model.pending_dialog = Some(PendingDialog::StopDetails { coordinate });
                            caps.telemetry.event("stop_location_picked", &[]);
                            caps.render.render();
                        }
                        Some(Tool::AddFinalLocation) => {
                            model.active_tool = None;
                            model.pending_dialog = Some(PendingDialog::FinalDetails { coordinate });
                            caps.telemetry.event("final_location_picked", &[]);
                            caps.render.render();
                        }
                        Some(Tool::DrawPath) => {
                            let Some(session) = model.path_session.as_mut() else {
                                return;
                            };
                            if session.is_selecting_anchor() {
                                // Waiting for a marker click; plain map
                                // clicks don't start a path.
                                caps.telemetry.counter("path_click_before_anchor", 1);
                            } else if let Ok(order) = session.add_point(coordinate) {
                                caps.telemetry
                                    .event("path_point_added", &[("order", &order.to_string())]);
                                caps.render.render();
                            }
                        }
                        Some(Tool::AddPerpetratorInfo | Tool::StartNewIncident) | None => {}
                    }
                }

                Event::MarkerClicked { entry_id } => {
                    match model.active_tool {
                        Some(Tool::DrawPath) => {
                            let Some(session) = model.path_session.as_mut() else {
                                return;
                            };
                            if !session.is_selecting_anchor() {
                                // Points come from plain map clicks
                                // once anchored.
                                return;
                            }
                            match model.timeline.get(&entry_id) {
                                Some(entry) => {
                                    if session.select_anchor(entry).is_ok() {
                                        caps.telemetry.event(
                                            "path_anchor_selected",
                                            &[("order", &entry.entry_order.to_string())],
                                        );
                                        caps.render.render();
                                    }
                                }
                                None => {
                                    caps.telemetry
                                        .error("anchor_not_in_timeline", entry_id.as_str());
                                }
                            }
                        }
                        None => {
                            if model.pending_dialog.is_some() {
                                return;
                            }
                            let Some(entry) = model.timeline.get(&entry_id) else {
                                caps.telemetry
                                    .error("marker_not_in_timeline", entry_id.as_str());
                                return;
                            };
                            model.pending_dialog = Some(PendingDialog::ConfirmDelete {
                                entry_id: entry.id.clone(),
                                kind: entry.kind,
                            });
                            caps.render.render();
                        }
                        // One-shot capture tools only consume plain
                        // map clicks.
                        Some(_) => {}
                    }
                }

                Event::KeyPressed { key } => {
                    if model.path_session.is_none() {
                        return;
                    }
                    match key {
                        KeyInput::Enter => {
                            let Some(session) = model.path_session.as_mut() else {
                                return;
                            };
                            match session.commit() {
                                Ok(points) => {
                                    let Some(incident_id) =
                                        model.current_incident.as_ref().map(|i| i.id.clone())
                                    else {
                                        model.path_session = None;
                                        model.active_tool = None;
                                        return;
                                    };
                                    let point_count = points.len();
                                    model.path_session = None;
                                    model.active_tool = None;
                                    model.op_started();
                                    caps.gateway.append_path_points(
                                        incident_id,
                                        points,
                                        move |result| Event::PathCommitted {
                                            point_count,
                                            result: Box::new(result),
                                        },
                                    );
                                    caps.telemetry.event(
                                        "path_commit_requested",
                                        &[("points", &point_count.to_string())],
                                    );
                                    caps.render.render();
                                }
                                Err(crate::session::SessionError::NoAnchorSelected) => {
                                    // Enter before anchoring does nothing.
                                }
                                Err(e) => {
                                    caps.telemetry.warn("path_commit_rejected", &e.to_string());
                                    model.set_error(AppError::from(e));
                                    caps.render.render();
                                }
                            }
                        }
                        KeyInput::Escape => {
                            let discarded = model
                                .path_session
                                .take()
                                .map_or(0, PathCaptureSession::cancel);
                            model.active_tool = None;
                            caps.telemetry.event(
                                "path_session_cancelled",
                                &[("discarded_points", &discarded.to_string())],
                            );
                            caps.render.render();
                        }
                    }
                }

                Event::TheftDetailsSubmitted(details) => {
                    let coordinate = match model.pending_dialog {
                        Some(PendingDialog::TheftDetails { coordinate }) => coordinate,
                        _ => {
                            caps.telemetry
                                .error("orphan_form_submission", "theft details with no dialog");
                            return;
                        }
                    };
                    model.pending_dialog = None;
                    let time_of_theft = details.time_of_theft;
                    model.op_started();
                    caps.gateway
                        .create_incident((*details).clone(), move |result| Event::IncidentCreated {
                            coordinate,
                            time_of_theft,
                            result: Box::new(result),
                        });
                    caps.render.render();
                }

                Event::IncidentCreated {
                    coordinate,
                    time_of_theft,
                    result,
                } => {
                    model.op_finished();
                    match *result {
                        Ok(GatewayOutput::IncidentCreated(incident)) => {
                            model.timeline.clear();
                            model.perpetrator_info = None;
                            let incident_id = incident.id.clone();
                            model.current_incident = Some(incident);

                            let draft = EntryDraft {
                                kind: EntryKind::Theft,
                                coordinate,
                                timestamp: time_of_theft,
                                duration_at_location: None,
                            };
                            model.op_started();
                            caps.gateway.append_timeline_entry(
                                incident_id,
                                draft,
                                crate::THEFT_ENTRY_ORDER,
                                |result| Event::TheftEntryAppended {
                                    result: Box::new(result),
                                },
                            );
                            caps.telemetry.event("incident_created", &[]);
                        }
                        Ok(_) => Self::surface_unexpected_output(model, caps, "create_incident"),
                        Err(e) => Self::surface_gateway_failure(model, caps, "create_incident", e),
                    }
                    caps.render.render();
                }

                Event::TheftEntryAppended { result } => {
                    model.op_finished();
                    match *result {
                        Ok(GatewayOutput::EntryAppended(_)) => {
                            caps.telemetry.event("theft_entry_appended", &[]);
                            Self::request_timeline_refresh(model, caps);
                        }
                        Ok(_) => {
                            Self::surface_unexpected_output(model, caps, "append_theft_entry");
                        }
                        Err(e) => {
                            // The incident row exists without its
                            // anchor entry; show the error and re-read
                            // whatever storage durably holds.
                            Self::surface_gateway_failure(model, caps, "append_theft_entry", e);
                            Self::request_timeline_refresh(model, caps);
                        }
                    }
                    caps.render.render();
                }

                Event::StopDetailsSubmitted(details) => {
                    let coordinate = match model.pending_dialog {
                        Some(PendingDialog::StopDetails { coordinate }) => coordinate,
                        _ => {
                            caps.telemetry
                                .error("orphan_form_submission", "stop details with no dialog");
                            return;
                        }
                    };
                    model.pending_dialog = None;
                    Self::request_ordered_append(
                        model,
                        caps,
                        EntryDraft {
                            kind: EntryKind::Holding,
                            coordinate,
                            timestamp: details.arrived_at,
                            duration_at_location: Some(details.stayed_for),
                        },
                    );
                    caps.render.render();
                }

                Event::FinalDetailsSubmitted(details) => {
                    let coordinate = match model.pending_dialog {
                        Some(PendingDialog::FinalDetails { coordinate }) => coordinate,
                        _ => {
                            caps.telemetry
                                .error("orphan_form_submission", "final details with no dialog");
                            return;
                        }
                    };
                    model.pending_dialog = None;
                    Self::request_ordered_append(
                        model,
                        caps,
                        EntryDraft {
                            kind: EntryKind::Final,
                            coordinate,
                            timestamp: details.last_seen_at,
                            duration_at_location: None,
                        },
                    );
                    caps.render.render();
                }

                Event::NextOrderLoaded { draft, result } => {
                    model.op_finished();
                    match *result {
                        Ok(GatewayOutput::MaxEntryOrder(max)) => {
                            let Some(incident_id) =
                                model.current_incident.as_ref().map(|i| i.id.clone())
                            else {
                                return;
                            };
                            let entry_order = ordering::next_entry_order(max);
                            let kind = draft.kind;
                            model.op_started();
                            caps.gateway.append_timeline_entry(
                                incident_id,
                                *draft,
                                entry_order,
                                move |result| Event::EntryAppended {
                                    kind,
                                    result: Box::new(result),
                                },
                            );
                        }
                        Ok(_) => Self::surface_unexpected_output(model, caps, "load_max_order"),
                        Err(e) => Self::surface_gateway_failure(model, caps, "load_max_order", e),
                    }
                    caps.render.render();
                }

                Event::EntryAppended { kind, result } => {
                    model.op_finished();
                    match *result {
                        Ok(GatewayOutput::EntryAppended(_)) => {
                            caps.telemetry
                                .event("entry_appended", &[("kind", kind.label())]);
                            Self::request_timeline_refresh(model, caps);
                        }
                        Ok(_) => Self::surface_unexpected_output(model, caps, "append_entry"),
                        Err(e) => Self::surface_gateway_failure(model, caps, "append_entry", e),
                    }
                    caps.render.render();
                }

                Event::PathCommitted { point_count, result } => {
                    model.op_finished();
                    match *result {
                        Ok(GatewayOutput::EntriesAppended) => {
                            caps.telemetry.event(
                                "path_committed",
                                &[("points", &point_count.to_string())],
                            );
                            Self::request_timeline_refresh(model, caps);
                        }
                        Ok(_) => Self::surface_unexpected_output(model, caps, "append_path"),
                        Err(e) => Self::surface_gateway_failure(model, caps, "append_path", e),
                    }
                    caps.render.render();
                }

                Event::DeleteConfirmed => {
                    let (entry_id, kind) = match &model.pending_dialog {
                        Some(PendingDialog::ConfirmDelete { entry_id, kind }) => {
                            (entry_id.clone(), *kind)
                        }
                        _ => {
                            caps.telemetry
                                .error("orphan_confirmation", "delete confirmed with no dialog");
                            return;
                        }
                    };
                    model.pending_dialog = None;

                    if model.timeline.is_stale() {
                        model.set_error(AppError::new(
                            ErrorKind::InvalidState,
                            "The timeline is being repaired; try again in a moment",
                        ));
                        caps.render.render();
                        return;
                    }
                    let Some(incident_id) = model.current_incident.as_ref().map(|i| i.id.clone())
                    else {
                        return;
                    };

                    match kind {
                        // Deleting the theft anchor deletes the whole
                        // incident: every entry, the perpetrator info,
                        // and the record itself.
                        EntryKind::Theft => {
                            model.op_started();
                            caps.telemetry.event("cascade_delete_requested", &[]);
                            caps.gateway.delete_incident_cascade(incident_id, |result| {
                                Event::IncidentDeleted {
                                    result: Box::new(result),
                                }
                            });
                        }
                        EntryKind::Movement
                        | EntryKind::Holding
                        | EntryKind::Final
                        | EntryKind::Path => {
                            // Re-fetch the authoritative sequence
                            // first; the reindex is computed from what
                            // storage actually holds, not from the
                            // view.
                            model.op_started();
                            caps.gateway.load_timeline(incident_id, move |result| {
                                Event::DeleteSnapshotLoaded {
                                    entry_id,
                                    result: Box::new(result),
                                }
                            });
                        }
                    }
                    caps.render.render();
                }

                Event::DeleteSnapshotLoaded { entry_id, result } => {
                    model.op_finished();
                    match *result {
                        Ok(GatewayOutput::TimelineLoaded(snapshot)) => {
                            match ordering::delete_and_reindex(snapshot.clone(), &entry_id) {
                                Ok(survivors) => {
                                    let assignments: Vec<OrderAssignment> =
                                        ordering::order_assignments(&snapshot, &survivors)
                                            .into_iter()
                                            .map(|(entry_id, entry_order)| OrderAssignment {
                                                entry_id,
                                                entry_order,
                                            })
                                            .collect();
                                    model.op_started();
                                    caps.gateway.delete_timeline_entry(
                                        entry_id,
                                        move |result| Event::EntryDeleted {
                                            assignments,
                                            result: Box::new(result),
                                        },
                                    );
                                }
                                Err(OrderingError::EntryNotFound(_)) => {
                                    // Already gone on the other side;
                                    // just re-sync the view.
                                    caps.telemetry
                                        .warn("delete_target_missing", entry_id.as_str());
                                    Self::request_timeline_refresh(model, caps);
                                }
                                Err(e) => {
                                    caps.telemetry.error("delete_rejected", &e.to_string());
                                    model.set_error(AppError::from(e));
                                }
                            }
                        }
                        Ok(_) => Self::surface_unexpected_output(model, caps, "delete_snapshot"),
                        Err(e) => Self::surface_gateway_failure(model, caps, "delete_snapshot", e),
                    }
                    caps.render.render();
                }

                Event::EntryDeleted {
                    assignments,
                    result,
                } => {
                    model.op_finished();
                    match *result {
                        Ok(GatewayOutput::EntryDeleted) => {
                            caps.telemetry.event(
                                "entry_deleted",
                                &[("resequenced", &assignments.len().to_string())],
                            );
                            if assignments.is_empty() {
                                Self::request_timeline_refresh(model, caps);
                            } else {
                                let Some(incident_id) =
                                    model.current_incident.as_ref().map(|i| i.id.clone())
                                else {
                                    return;
                                };
                                model.op_started();
                                caps.gateway.update_entry_orders(
                                    incident_id,
                                    assignments,
                                    |result| Event::OrdersRewritten {
                                        result: Box::new(result),
                                    },
                                );
                            }
                        }
                        Ok(_) => Self::surface_unexpected_output(model, caps, "delete_entry"),
                        Err(e) => {
                            // The delete-then-reindex pair is not
                            // atomic; never trust the local half after
                            // a failure.
                            Self::surface_gateway_failure(model, caps, "delete_entry", e);
                            Self::request_timeline_refresh(model, caps);
                        }
                    }
                    caps.render.render();
                }

                Event::OrdersRewritten { result } => {
                    model.op_finished();
                    match *result {
                        Ok(GatewayOutput::OrdersUpdated) => {
                            caps.telemetry.event("orders_rewritten", &[]);
                            Self::request_timeline_refresh(model, caps);
                        }
                        Ok(_) => Self::surface_unexpected_output(model, caps, "update_orders"),
                        Err(e) => {
                            Self::surface_gateway_failure(model, caps, "update_orders", e);
                            Self::request_timeline_refresh(model, caps);
                        }
                    }
                    caps.render.render();
                }

                Event::TimelineLoaded { result } => {
                    model.op_finished();
                    match *result {
                        Ok(GatewayOutput::TimelineLoaded(entries)) => {
                            match model.timeline.replace(entries.clone()) {
                                Ok(()) => {
                                    caps.telemetry.event(
                                        "timeline_loaded",
                                        &[("entries", &model.timeline.len().to_string())],
                                    );
                                }
                                Err(drift) => {
                                    // A previous partial failure left a
                                    // gap. Reindexing is idempotent, so
                                    // finish the interrupted job rather
                                    // than display a gapped route.
                                    caps.telemetry.error("ordering_drift", &drift.to_string());
                                    model.set_error(AppError::from(drift));
                                    Self::repair_ordering(model, caps, entries);
                                }
                            }
                        }
                        Ok(_) => Self::surface_unexpected_output(model, caps, "load_timeline"),
                        Err(e) => Self::surface_gateway_failure(model, caps, "load_timeline", e),
                    }
                    caps.render.render();
                }

                Event::IncidentDeleted { result } => {
                    model.op_finished();
                    match *result {
                        Ok(GatewayOutput::IncidentDeleted) => {
                            model.clear_incident_state();
                            caps.telemetry.event("incident_deleted", &[]);
                        }
                        Ok(_) => Self::surface_unexpected_output(model, caps, "cascade_delete"),
                        Err(e) => Self::surface_gateway_failure(model, caps, "cascade_delete", e),
                    }
                    caps.render.render();
                }

                Event::PerpetratorDetailsSubmitted(details) => {
                    if !matches!(
                        model.pending_dialog,
                        Some(PendingDialog::PerpetratorInfo { .. })
                    ) {
                        caps.telemetry
                            .error("orphan_form_submission", "perpetrator details with no dialog");
                        return;
                    }
                    model.pending_dialog = None;
                    model.active_tool = None;
                    let Some(incident_id) = model.current_incident.as_ref().map(|i| i.id.clone())
                    else {
                        model.set_error(AppError::new(ErrorKind::InvalidState, "No active incident"));
                        caps.render.render();
                        return;
                    };
                    model.op_started();
                    caps.gateway.save_perpetrator_information(
                        incident_id,
                        (*details).clone(),
                        move |result| Event::PerpetratorSaved {
                            details,
                            result: Box::new(result),
                        },
                    );
                    caps.render.render();
                }

                Event::PerpetratorSaved { details, result } => {
                    model.op_finished();
                    match *result {
                        Ok(GatewayOutput::PerpetratorSaved) => {
                            model.perpetrator_info = Some((*details).into());
                            caps.telemetry.event("perpetrator_info_saved", &[]);
                        }
                        Ok(_) => Self::surface_unexpected_output(model, caps, "save_perpetrator"),
                        Err(e) => Self::surface_gateway_failure(model, caps, "save_perpetrator", e),
                    }
                    caps.render.render();
                }

                Event::PerpetratorLoaded { result } => {
                    model.op_finished();
                    match *result {
                        Ok(GatewayOutput::PerpetratorLoaded(info)) => {
                            model.perpetrator_info = info;
                        }
                        Ok(_) => Self::surface_unexpected_output(model, caps, "load_perpetrator"),
                        Err(e) => {
                            // Not worth blocking the timeline over.
                            caps.telemetry.warn("load_perpetrator_failed", &e.to_string());
                        }
                    }
                    caps.render.render();
                }

                Event::DialogDismissed => {
                    if model.pending_dialog.take().is_some() {
                        // A form tied to an active tool closes the
                        // tool with it.
                        if matches!(
                            model.active_tool,
                            Some(Tool::AddPerpetratorInfo | Tool::StartNewIncident)
                        ) {
                            model.active_tool = None;
                        }
                        caps.telemetry.event("dialog_dismissed", &[]);
                        caps.render.render();
                    }
                }

                Event::ErrorDismissed => {
                    model.clear_error();
                    caps.render.render();
                }
            }
        }

        fn view(&self, model: &Model) -> ViewModel {
            ViewModel {
                incident_id: model
                    .current_incident
                    .as_ref()
                    .map(|i| i.id.as_str().to_string()),
                incident_title: model
                    .current_incident
                    .as_ref()
                    .map(|i| i.title.as_str().to_string()),
                markers: Self::build_markers(model),
                route_sealed: model.timeline.has_final(),
                toolbar: Self::build_toolbar(model),
                path: model.path_session.as_ref().map(|s| PathPreview {
                    selecting_anchor: s.is_selecting_anchor(),
                    anchor: s.anchor().map(|a| MapPointView {
                        lat: a.coordinate.lat(),
                        lng: a.coordinate.lng(),
                    }),
                    points: s
                        .points()
                        .iter()
                        .map(|p| MapPointView {
                            lat: p.coordinate.lat(),
                            lng: p.coordinate.lng(),
                        })
                        .collect(),
                }),
                dialog: Self::build_dialog(model),
                has_perpetrator_info: model.perpetrator_info.is_some(),
                is_syncing: model.is_syncing(),
                error: model.active_error.as_ref().map(UserFacingError::from),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::GatewayError;
    use crate::event::{Coordinate, Description, EntryId, IncidentId, UnixTimeMs};
    use crate::model::{EntryKind, Incident, PendingDialog, TimelineEntry, Tool};
    use crate::ordering::OrderingError;
    use crate::session::SessionError;
    use crux_core::App as _;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(ErrorKind::Invariant.code(), "INVARIANT_VIOLATION");
        assert_eq!(ErrorKind::Persistence.code(), "PERSISTENCE_FAILURE");
        assert_eq!(ErrorKind::OrderingDrift.code(), "ORDERING_DRIFT");
    }

    #[test]
    fn persistence_failures_are_retryable() {
        let error = AppError::from(GatewayError::Timeout);
        assert_eq!(error.kind, ErrorKind::Persistence);
        assert_eq!(error.severity, ErrorSeverity::Transient);
        assert!(error.is_retryable());
    }

    #[test]
    fn invariant_violations_are_not_retryable() {
        let error = AppError::from(OrderingError::TheftEntryProtected);
        assert_eq!(error.kind, ErrorKind::Invariant);
        assert!(!error.is_retryable());
    }

    #[test]
    fn drift_is_fatal() {
        let error = AppError::from(OrderingError::Drift {
            expected: 2,
            found: 4,
            position: 1,
        });
        assert_eq!(error.kind, ErrorKind::OrderingDrift);
        assert_eq!(error.severity, ErrorSeverity::Fatal);
        assert!(!error.is_retryable());
    }

    #[test]
    fn empty_commit_maps_to_invariant() {
        let error = AppError::from(SessionError::EmptyCommit);
        assert_eq!(error.kind, ErrorKind::Invariant);
    }

    #[test]
    fn gateway_detail_stays_internal() {
        let error = AppError::from(GatewayError::Storage {
            message: "disk on fire at /var/db".into(),
        });
        assert!(!error.user_facing_message().contains("/var/db"));
        assert!(error.internal_message.unwrap().contains("/var/db"));
    }

    fn entry(id: &str, kind: EntryKind, order: u32) -> TimelineEntry {
        TimelineEntry {
            id: EntryId::new(id),
            incident_id: IncidentId::new("inc-1"),
            coordinate: Coordinate::new(51.5072, -0.1276).unwrap(),
            timestamp: UnixTimeMs(1_700_000_000_000),
            duration_at_location: None,
            kind,
            entry_order: order,
        }
    }

    fn ready_model() -> Model {
        let mut model = Model::default();
        model.current_incident = Some(Incident {
            id: IncidentId::new("inc-1"),
            title: Description::new("stolen phone").unwrap(),
            created_at: UnixTimeMs(1_700_000_000_000),
        });
        model
            .timeline
            .replace(vec![
                entry("a", EntryKind::Theft, 1),
                entry("b", EntryKind::Holding, 2),
            ])
            .unwrap();
        model
    }

    #[test]
    fn view_reflects_timeline_and_guards() {
        let model = ready_model();
        let view = App.view(&model);

        assert_eq!(view.markers.len(), 2);
        assert_eq!(view.markers[0].entry_order, 1);
        assert!(!view.route_sealed);
        assert_eq!(view.incident_id.as_deref(), Some("inc-1"));

        let theft_button = view
            .toolbar
            .iter()
            .find(|b| b.tool == Tool::AddTheftLocation)
            .unwrap();
        assert!(!theft_button.enabled);

        let path_button = view.toolbar.iter().find(|b| b.tool == Tool::DrawPath).unwrap();
        assert!(path_button.enabled);
    }

    #[test]
    fn view_surfaces_pending_dialog() {
        let mut model = ready_model();
        model.pending_dialog = Some(PendingDialog::ConfirmDelete {
            entry_id: EntryId::new("b"),
            kind: EntryKind::Holding,
        });
        let view = App.view(&model);
        match view.dialog {
            Some(DialogView::ConfirmDelete { entry_id, label, .. }) => {
                assert_eq!(entry_id, "b");
                assert_eq!(label, "stop location");
            }
            other => panic!("expected delete confirmation, got {other:?}"),
        }
    }

    #[test]
    fn view_model_serializes_for_the_shell() {
        let view = App.view(&ready_model());
        let encoded = serde_json::to_string(&view).unwrap();
        let decoded: ViewModel = serde_json::from_str(&encoded).unwrap();
        assert_eq!(view, decoded);
    }
}
