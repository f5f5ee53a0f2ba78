mod gateway;
mod telemetry;

pub use self::gateway::{
    Gateway, GatewayError, GatewayOperation, GatewayOutput, GatewayResult, OpId, OrderAssignment,
};
pub use self::telemetry::{Telemetry, TelemetryOperation};

pub use crux_core::render::Render;

use crate::app::App;
use crate::event::Event;

#[derive(crux_core::macros::Effect)]
#[effect(app = "App")]
pub struct Capabilities {
    pub render: Render<Event>,
    pub gateway: Gateway<Event>,
    pub telemetry: Telemetry<Event>,
}
