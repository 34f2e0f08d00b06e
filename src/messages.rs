use serde_derive::Serialize;

/// Notifications delivered to the host gateway over the injected channel.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    DeviceAdded {
        id: String,
        name: String,
        mac: String,
    },
    DeviceRemoved {
        id: String,
    },
    PropertyChanged {
        id: String,
        on: bool,
    },
}
