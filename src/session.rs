//! Path capture session.
//!
//! A short-lived state machine that accumulates the points of a drawn
//! route between a user-selected anchor marker and a commit or cancel
//! signal. The session is owned by the model and handed to the event
//! router by reference; there is no global slot, so "a session exists"
//! and "path drawing is active" cannot drift apart.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::{Coordinate, EntryId};
use crate::model::TimelineEntry;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("no anchor marker selected yet")]
    NoAnchorSelected,

    #[error("an anchor is already selected for this path")]
    AnchorAlreadySelected,

    #[error("a path needs at least one point before it can be committed")]
    EmptyCommit,
}

/// A provisional waypoint, not yet a timeline entry. Exists only
/// inside an active session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathPoint {
    pub coordinate: Coordinate,
    pub entry_order: u32,
}

/// The existing timeline entry a drawn path starts from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    pub entry_id: EntryId,
    pub coordinate: Coordinate,
    pub entry_order: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
enum SessionState {
    SelectingAnchor,
    Accumulating {
        anchor: Anchor,
        points: Vec<PathPoint>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathCaptureSession {
    state: SessionState,
}

impl Default for PathCaptureSession {
    fn default() -> Self {
        Self::new()
    }
}

impl PathCaptureSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::SelectingAnchor,
        }
    }

    /// Back to a fresh `SelectingAnchor` state, discarding anything
    /// accumulated. Used when the path tool is re-entered while a
    /// session already exists.
    pub fn reset(&mut self) {
        self.state = SessionState::SelectingAnchor;
    }

    pub fn is_selecting_anchor(&self) -> bool {
        matches!(self.state, SessionState::SelectingAnchor)
    }

    pub fn anchor(&self) -> Option<&Anchor> {
        match &self.state {
            SessionState::SelectingAnchor => None,
            SessionState::Accumulating { anchor, .. } => Some(anchor),
        }
    }

    pub fn points(&self) -> &[PathPoint] {
        match &self.state {
            SessionState::SelectingAnchor => &[],
            SessionState::Accumulating { points, .. } => points,
        }
    }

    pub fn point_count(&self) -> usize {
        self.points().len()
    }

    /// Anchors the path at `entry`. The first accumulated point will
    /// take the anchor's order + 1; the anchor's order comes from the
    /// authoritative store, never from a guess.
    pub fn select_anchor(&mut self, entry: &TimelineEntry) -> Result<(), SessionError> {
        match self.state {
            SessionState::SelectingAnchor => {
                self.state = SessionState::Accumulating {
                    anchor: Anchor {
                        entry_id: entry.id.clone(),
                        coordinate: entry.coordinate,
                        entry_order: entry.entry_order,
                    },
                    points: Vec::new(),
                };
                Ok(())
            }
            SessionState::Accumulating { .. } => Err(SessionError::AnchorAlreadySelected),
        }
    }

    /// Appends one point with order = previous + 1. Returns the order
    /// it was given.
    pub fn add_point(&mut self, coordinate: Coordinate) -> Result<u32, SessionError> {
        match &mut self.state {
            SessionState::SelectingAnchor => Err(SessionError::NoAnchorSelected),
            SessionState::Accumulating { anchor, points } => {
                let entry_order = points
                    .last()
                    .map_or(anchor.entry_order + 1, |p| p.entry_order + 1);
                points.push(PathPoint {
                    coordinate,
                    entry_order,
                });
                Ok(entry_order)
            }
        }
    }

    /// Drains the accumulated points for persistence. Valid only with
    /// at least one point; on failure the session is left untouched so
    /// the user can keep drawing.
    pub fn commit(&mut self) -> Result<Vec<PathPoint>, SessionError> {
        match &mut self.state {
            SessionState::SelectingAnchor => Err(SessionError::NoAnchorSelected),
            SessionState::Accumulating { points, .. } => {
                if points.is_empty() {
                    return Err(SessionError::EmptyCommit);
                }
                tracing::debug!(count = points.len(), "committing drawn path");
                Ok(std::mem::take(points))
            }
        }
    }

    /// Ends the session discarding everything. Returns how many points
    /// were thrown away, for telemetry.
    pub fn cancel(self) -> usize {
        match self.state {
            SessionState::SelectingAnchor => 0,
            SessionState::Accumulating { points, .. } => points.len(),
        }
    }
}
