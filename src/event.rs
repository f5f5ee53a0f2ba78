use serde::{Deserialize, Serialize};
use std::fmt;

use crate::capabilities::{GatewayResult, OrderAssignment};
use crate::model::{EntryDraft, EntryKind, Incident, Tool};

// --- Typed IDs ---

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

typed_id!(IncidentId);
typed_id!(EntryId);

// --- Coordinate: validated, NaN-safe ---

#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct Coordinate {
    lat: f64,
    lng: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid coordinate: lat={0}, lng={1}")]
    InvalidCoordinate(f64, f64),
    #[error("invalid duration: {0} minutes")]
    InvalidDuration(u32),
    #[error("value too long ({len} > {max})")]
    TooLong { len: usize, max: usize },
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Result<Self, ValidationError> {
        if lat.is_nan()
            || lng.is_nan()
            || lat.is_infinite()
            || lng.is_infinite()
            || !(-90.0..=90.0).contains(&lat)
            || !(-180.0..=180.0).contains(&lng)
        {
            return Err(ValidationError::InvalidCoordinate(lat, lng));
        }
        Ok(Self { lat, lng })
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }
    pub fn lng(&self) -> f64 {
        self.lng
    }
}

// Bitwise equality so coordinates can ride inside capability
// operations, which must be Eq.
impl PartialEq for Coordinate {
    fn eq(&self, other: &Self) -> bool {
        self.lat.to_bits() == other.lat.to_bits() && self.lng.to_bits() == other.lng.to_bits()
    }
}

impl Eq for Coordinate {}

impl std::hash::Hash for Coordinate {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.lat.to_bits().hash(state);
        self.lng.to_bits().hash(state);
    }
}

// --- Explicit timestamp / duration units ---

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnixTimeMs(pub u64);

/// How long the phone sat at a holding location.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DurationMinutes(u32);

pub const MAX_DURATION_MINUTES: u32 = 60 * 24 * 365;

impl DurationMinutes {
    pub fn new(minutes: u32) -> Result<Self, ValidationError> {
        if minutes == 0 || minutes > MAX_DURATION_MINUTES {
            return Err(ValidationError::InvalidDuration(minutes));
        }
        Ok(Self(minutes))
    }

    pub fn minutes(&self) -> u32 {
        self.0
    }
}

// --- Bounded free text ---

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BoundedText<const MAX: usize>(String);

impl<const MAX: usize> BoundedText<MAX> {
    pub fn new(s: impl Into<String>) -> Result<Self, ValidationError> {
        let s = s.into();
        if s.len() > MAX {
            return Err(ValidationError::TooLong {
                len: s.len(),
                max: MAX,
            });
        }
        Ok(Self(s))
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

pub type Description = BoundedText<4096>;

// --- Keyboard surface ---

/// Only Enter and Escape participate in core logic; the shell filters
/// everything else out before it reaches us.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyInput {
    Enter,
    Escape,
}

// --- Detail-capture form payloads ---

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TheftDetails {
    pub time_of_theft: UnixTimeMs,
    pub phone_description: Description,
    pub victim_details: Description,
    pub reported_to_police: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StopDetails {
    pub arrived_at: UnixTimeMs,
    pub stayed_for: DurationMinutes,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FinalDetails {
    pub last_seen_at: UnixTimeMs,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct PerpetratorDetails {
    pub vehicles: Option<Description>,
    pub clothing: Option<Description>,
    pub group_details: Option<Description>,
    pub other: Option<Description>,
}

// --- Event enum: large variants boxed to keep the enum small ---

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum Event {
    // Incident lifecycle
    IncidentSelected(Box<Incident>),
    NewIncidentConfirmed,

    // Toolbar
    ToolSelected {
        tool: Tool,
    },

    // Map input surface
    MapClicked {
        lat: f64,
        lng: f64,
    },
    MarkerClicked {
        entry_id: EntryId,
    },

    // Keyboard surface
    KeyPressed {
        key: KeyInput,
    },

    // Dialog outcomes
    TheftDetailsSubmitted(Box<TheftDetails>),
    StopDetailsSubmitted(Box<StopDetails>),
    FinalDetailsSubmitted(Box<FinalDetails>),
    PerpetratorDetailsSubmitted(Box<PerpetratorDetails>),
    DeleteConfirmed,
    DialogDismissed,
    ErrorDismissed,

    // Gateway results (boxed; whatever context the follow-up step
    // needs rides in the event, never in a global)
    IncidentCreated {
        coordinate: Coordinate,
        time_of_theft: UnixTimeMs,
        result: Box<GatewayResult>,
    },
    TheftEntryAppended {
        result: Box<GatewayResult>,
    },
    NextOrderLoaded {
        draft: Box<EntryDraft>,
        result: Box<GatewayResult>,
    },
    EntryAppended {
        kind: EntryKind,
        result: Box<GatewayResult>,
    },
    PathCommitted {
        point_count: usize,
        result: Box<GatewayResult>,
    },
    DeleteSnapshotLoaded {
        entry_id: EntryId,
        result: Box<GatewayResult>,
    },
    EntryDeleted {
        assignments: Vec<OrderAssignment>,
        result: Box<GatewayResult>,
    },
    OrdersRewritten {
        result: Box<GatewayResult>,
    },
    TimelineLoaded {
        result: Box<GatewayResult>,
    },
    IncidentDeleted {
        result: Box<GatewayResult>,
    },
    PerpetratorSaved {
        details: Box<PerpetratorDetails>,
        result: Box<GatewayResult>,
    },
    PerpetratorLoaded {
        result: Box<GatewayResult>,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::IncidentSelected(_) => "incident_selected",
            Event::NewIncidentConfirmed => "new_incident_confirmed",
            Event::ToolSelected { .. } => "tool_selected",
            Event::MapClicked { .. } => "map_clicked",
            Event::MarkerClicked { .. } => "marker_clicked",
            Event::KeyPressed { .. } => "key_pressed",
            Event::TheftDetailsSubmitted(_) => "theft_details_submitted",
            Event::StopDetailsSubmitted(_) => "stop_details_submitted",
            Event::FinalDetailsSubmitted(_) => "final_details_submitted",
            Event::PerpetratorDetailsSubmitted(_) => "perpetrator_details_submitted",
            Event::DeleteConfirmed => "delete_confirmed",
            Event::DialogDismissed => "dialog_dismissed",
            Event::ErrorDismissed => "error_dismissed",
            Event::IncidentCreated { .. } => "incident_created",
            Event::TheftEntryAppended { .. } => "theft_entry_appended",
            Event::NextOrderLoaded { .. } => "next_order_loaded",
            Event::EntryAppended { .. } => "entry_appended",
            Event::PathCommitted { .. } => "path_committed",
            Event::DeleteSnapshotLoaded { .. } => "delete_snapshot_loaded",
            Event::EntryDeleted { .. } => "entry_deleted",
            Event::OrdersRewritten { .. } => "orders_rewritten",
            Event::TimelineLoaded { .. } => "timeline_loaded",
            Event::IncidentDeleted { .. } => "incident_deleted",
            Event::PerpetratorSaved { .. } => "perpetrator_saved",
            Event::PerpetratorLoaded { .. } => "perpetrator_loaded",
        }
    }

    /// True for events originating from a direct user gesture, as
    /// opposed to gateway results arriving asynchronously.
    pub fn is_user_initiated(&self) -> bool {
        matches!(
            self,
            Event::IncidentSelected(_)
                | Event::NewIncidentConfirmed
                | Event::ToolSelected { .. }
                | Event::MapClicked { .. }
                | Event::MarkerClicked { .. }
                | Event::KeyPressed { .. }
                | Event::TheftDetailsSubmitted(_)
                | Event::StopDetailsSubmitted(_)
                | Event::FinalDetailsSubmitted(_)
                | Event::PerpetratorDetailsSubmitted(_)
                | Event::DeleteConfirmed
                | Event::DialogDismissed
                | Event::ErrorDismissed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinate_rejects_nan() {
        assert!(Coordinate::new(f64::NAN, 0.0).is_err());
        assert!(Coordinate::new(0.0, f64::NAN).is_err());
    }

    #[test]
    fn coordinate_rejects_out_of_range() {
        assert!(Coordinate::new(91.0, 0.0).is_err());
        assert!(Coordinate::new(0.0, 181.0).is_err());
        assert!(Coordinate::new(-91.0, 0.0).is_err());
        assert!(Coordinate::new(0.0, -181.0).is_err());
    }

    #[test]
    fn coordinate_accepts_valid() {
        assert!(Coordinate::new(51.5072, -0.1276).is_ok());
        assert!(Coordinate::new(90.0, 180.0).is_ok());
        assert!(Coordinate::new(-90.0, -180.0).is_ok());
    }

    #[test]
    fn coordinate_rejects_infinity() {
        assert!(Coordinate::new(f64::INFINITY, 0.0).is_err());
        assert!(Coordinate::new(0.0, f64::NEG_INFINITY).is_err());
    }

    #[test]
    fn duration_rejects_zero_and_absurd() {
        assert!(DurationMinutes::new(0).is_err());
        assert!(DurationMinutes::new(30).is_ok());
        assert!(DurationMinutes::new(MAX_DURATION_MINUTES + 1).is_err());
    }

    #[test]
    fn bounded_text_enforces_limit() {
        assert!(BoundedText::<5>::new("hello").is_ok());
        assert!(BoundedText::<5>::new("toolong").is_err());
    }

    #[test]
    fn typed_ids_are_not_interchangeable() {
        let incident = IncidentId::new("abc");
        let entry = EntryId::new("abc");
        // Different types — mixing them is a compile error. This test
        // exists as documentation; the compiler enforces it.
        assert_eq!(incident.as_str(), entry.as_str());
    }

    #[test]
    fn event_size_is_reasonable() {
        // Ensure boxing keeps the enum small.
        let size = std::mem::size_of::<Event>();
        assert!(
            size <= 128,
            "Event enum is {} bytes — too large, box more variants",
            size
        );
    }

    #[test]
    fn events_round_trip_through_json() {
        // Events cross the FFI boundary serialized; the shell contract
        // is JSON-shaped.
        let event = Event::MapClicked {
            lat: 51.5072,
            lng: -0.1276,
        };
        let encoded = serde_json::to_string(&event).unwrap();
        let decoded: Event = serde_json::from_str(&encoded).unwrap();
        assert_eq!(event, decoded);
    }
}
