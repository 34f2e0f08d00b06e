use std::collections::HashMap;
use std::net::IpAddr;

use log::debug;
use mac_address::MacAddress;
use tokio::sync::mpsc::UnboundedSender;

use crate::messages::HostEvent;

/// Stable identifier for a tracked machine. Derived from the MAC alone so
/// the same machine keeps the same id across restarts and re-scans.
pub fn device_id(mac: &MacAddress) -> String {
    format!("wake-on-lan-{}", mac.to_string().to_lowercase())
}

#[derive(Debug, Clone)]
pub struct TrackedDevice {
    pub id: String,
    pub mac: MacAddress,
    pub name: String,
    /// Best-effort reachability belief, set only by the reconciliation
    /// loop or an immediate post-add probe.
    pub on: bool,
    pub last_ip: Option<IpAddr>,
}

/// In-memory map of tracked machines, keyed by [`device_id`]. Emits
/// [`HostEvent`]s on the injected channel as its state changes.
pub struct DeviceRegistry {
    devices: HashMap<String, TrackedDevice>,
    events: UnboundedSender<HostEvent>,
}

impl DeviceRegistry {
    pub fn new(events: UnboundedSender<HostEvent>) -> Self {
        DeviceRegistry {
            devices: HashMap::new(),
            events,
        }
    }

    /// Idempotent: a MAC that is already tracked is left untouched and
    /// `None` is returned.
    pub fn add(
        &mut self,
        mac: MacAddress,
        name: Option<String>,
        ip: Option<IpAddr>,
    ) -> Option<TrackedDevice> {
        let id = device_id(&mac);
        if self.devices.contains_key(&id) {
            debug!("{} is already tracked", id);
            return None;
        }
        let device = TrackedDevice {
            id: id.clone(),
            mac,
            name: name.unwrap_or_else(|| format!("WoL ({})", mac)),
            on: false,
            last_ip: ip,
        };
        self.send(HostEvent::DeviceAdded {
            id: id.clone(),
            name: device.name.clone(),
            mac: mac.to_string(),
        });
        self.devices.insert(id, device.clone());
        Some(device)
    }

    pub fn remove(&mut self, id: &str) -> bool {
        if self.devices.remove(id).is_none() {
            return false;
        }
        self.send(HostEvent::DeviceRemoved { id: id.to_string() });
        true
    }

    /// Edge-triggered belief update: a change notification fires only when
    /// the value actually flips. Silently drops updates for ids that are no
    /// longer tracked, since a probe can outlive its device's removal.
    pub fn update_belief(&mut self, id: &str, on: bool, ip: Option<IpAddr>) {
        let Some(device) = self.devices.get_mut(id) else {
            debug!("belief update for untracked {} dropped", id);
            return;
        };
        if let Some(ip) = ip {
            device.last_ip = Some(ip);
        }
        if device.on != on {
            device.on = on;
            self.send(HostEvent::PropertyChanged {
                id: id.to_string(),
                on,
            });
        }
    }

    pub fn get(&self, id: &str) -> Option<&TrackedDevice> {
        self.devices.get(id)
    }

    pub fn devices(&self) -> Vec<TrackedDevice> {
        self.devices.values().cloned().collect()
    }

    /// `(id, mac)` pairs for one reconciliation pass to work through.
    pub fn tracked(&self) -> Vec<(String, MacAddress)> {
        self.devices
            .values()
            .map(|d| (d.id.clone(), d.mac))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    fn send(&self, event: HostEvent) {
        // The host side hanging up is not the registry's problem.
        if self.events.send(event).is_err() {
            debug!("host event channel closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn mac(s: &str) -> MacAddress {
        s.parse().unwrap()
    }

    fn registry() -> (DeviceRegistry, UnboundedReceiver<HostEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (DeviceRegistry::new(tx), rx)
    }

    fn drain(rx: &mut UnboundedReceiver<HostEvent>) -> Vec<HostEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_device_id_is_lowercase_and_prefixed() {
        assert_eq!(
            device_id(&mac("AA:BB:CC:DD:EE:01")),
            "wake-on-lan-aa:bb:cc:dd:ee:01"
        );
    }

    #[test]
    fn test_add_is_idempotent_across_case() {
        let (mut registry, mut rx) = registry();
        assert!(registry.add(mac("AA:BB:CC:DD:EE:01"), None, None).is_some());
        assert!(registry.add(mac("aa:bb:cc:dd:ee:01"), None, None).is_none());
        assert_eq!(registry.len(), 1);
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn test_add_falls_back_to_mac_label() {
        let (mut registry, _rx) = registry();
        let device = registry.add(mac("AA:BB:CC:DD:EE:01"), None, None).unwrap();
        assert_eq!(device.name, "WoL (AA:BB:CC:DD:EE:01)");
        assert!(!device.on);

        let named = registry
            .add(mac("AA:BB:CC:DD:EE:02"), Some("nas".into()), None)
            .unwrap();
        assert_eq!(named.name, "nas");
    }

    #[test]
    fn test_update_belief_is_edge_triggered() {
        let (mut registry, mut rx) = registry();
        let device = registry.add(mac("AA:BB:CC:DD:EE:01"), None, None).unwrap();
        drain(&mut rx);

        let ip: IpAddr = "192.168.1.5".parse().unwrap();
        registry.update_belief(&device.id, true, Some(ip));
        registry.update_belief(&device.id, true, Some(ip));
        assert_eq!(
            drain(&mut rx),
            vec![HostEvent::PropertyChanged {
                id: device.id.clone(),
                on: true
            }]
        );
        assert_eq!(registry.get(&device.id).unwrap().last_ip, Some(ip));

        registry.update_belief(&device.id, false, None);
        assert_eq!(
            drain(&mut rx),
            vec![HostEvent::PropertyChanged {
                id: device.id.clone(),
                on: false
            }]
        );
        // Last known address survives an offline verdict.
        assert_eq!(registry.get(&device.id).unwrap().last_ip, Some(ip));
    }

    #[test]
    fn test_update_belief_ignores_removed_devices() {
        let (mut registry, mut rx) = registry();
        let device = registry.add(mac("AA:BB:CC:DD:EE:01"), None, None).unwrap();
        assert!(registry.remove(&device.id));
        drain(&mut rx);

        registry.update_belief(&device.id, true, None);
        assert!(drain(&mut rx).is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_unknown_is_false() {
        let (mut registry, mut rx) = registry();
        assert!(!registry.remove("wake-on-lan-aa:bb:cc:dd:ee:99"));
        assert!(drain(&mut rx).is_empty());
    }
}
