//! Fire-and-forget telemetry capability. The shell decides where the
//! signals go; the core never waits on them.

use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TelemetryOperation {
    Counter {
        name: String,
        value: u64,
    },
    Event {
        name: String,
        fields: Vec<(String, String)>,
    },
    Warn {
        name: String,
        detail: String,
    },
    Error {
        name: String,
        detail: String,
    },
}

impl Operation for TelemetryOperation {
    type Output = ();
}

#[derive(Clone)]
pub struct Telemetry<Ev> {
    context: CapabilityContext<TelemetryOperation, Ev>,
}

impl<Ev> std::fmt::Debug for Telemetry<Ev> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry").finish_non_exhaustive()
    }
}

impl<Ev> Capability<Ev> for Telemetry<Ev> {
    type Operation = TelemetryOperation;
    type MappedSelf<MappedEv> = Telemetry<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static,
    {
        Telemetry::new(self.context.map_event(f))
    }
}

impl<Ev> Telemetry<Ev> {
    pub fn new(context: CapabilityContext<TelemetryOperation, Ev>) -> Self {
        Self { context }
    }
}

impl<Ev> Telemetry<Ev>
where
    Ev: Send + 'static,
{
    fn notify(&self, operation: TelemetryOperation) {
        let context = self.context.clone();
        self.context.spawn(async move {
            context.notify_shell(operation).await;
        });
    }

    pub fn counter(&self, name: &str, value: u64) {
        self.notify(TelemetryOperation::Counter {
            name: name.to_string(),
            value,
        });
    }

    pub fn event(&self, name: &str, fields: &[(&str, &str)]) {
        self.notify(TelemetryOperation::Event {
            name: name.to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });
    }

    pub fn warn(&self, name: &str, detail: &str) {
        self.notify(TelemetryOperation::Warn {
            name: name.to_string(),
            detail: detail.to_string(),
        });
    }

    pub fn error(&self, name: &str, detail: &str) {
        self.notify(TelemetryOperation::Error {
            name: name.to_string(),
            detail: detail.to_string(),
        });
    }
}
