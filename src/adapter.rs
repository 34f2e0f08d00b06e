use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, info};
use mac_address::MacAddress;
use tokio::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::AppConfig;
use crate::error::AdapterError;
use crate::messages::HostEvent;
use crate::net::{ArpEntry, NetProbe};
use crate::registry::{DeviceRegistry, TrackedDevice};

/// Wake-on-LAN adapter: tracks machines by MAC, polls the neighbor table
/// to maintain an on/off belief per machine, and wakes them on demand.
///
/// The poller is Stopped until reachability checking is enabled and at
/// least one device is tracked, and returns to Stopped when the last
/// device goes away.
pub struct WolAdapter {
    probe: Arc<dyn NetProbe>,
    registry: Arc<Mutex<DeviceRegistry>>,
    check_ping: bool,
    poll_interval: Duration,
    poller: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl WolAdapter {
    pub fn new(
        config: &AppConfig,
        probe: Arc<dyn NetProbe>,
        events: UnboundedSender<HostEvent>,
    ) -> Arc<Self> {
        Arc::new(WolAdapter {
            probe,
            registry: Arc::new(Mutex::new(DeviceRegistry::new(events))),
            check_ping: config.check_ping,
            poll_interval: Duration::from_secs(config.poll_interval_seconds),
            poller: std::sync::Mutex::new(None),
        })
    }

    /// Registers every configured MAC. With reachability checking on, one
    /// live scan is taken first so devices pick up a friendly name and
    /// address when the LAN already knows them.
    pub async fn seed(self: &Arc<Self>, devices: &[MacAddress]) {
        let snapshot = if self.check_ping && !devices.is_empty() {
            self.probe.scan_arp_table().await
        } else {
            Vec::new()
        };
        for &mac in devices {
            let (name, ip) = match lookup(&snapshot, mac) {
                Some(entry) => (entry.name.clone(), Some(entry.ip)),
                None => (None, None),
            };
            self.add_device(mac, name, ip).await;
        }
    }

    /// Idempotent. With reachability checking on, a known address gets an
    /// immediate one-shot probe so the fresh device is not presumed off
    /// until the next tick, and the poller is started if it wasn't.
    pub async fn add_device(self: &Arc<Self>, mac: MacAddress, name: Option<String>, ip: Option<IpAddr>) {
        let added = self.registry.lock().await.add(mac, name, ip);
        let Some(device) = added else {
            return;
        };
        info!("tracking {} as {}", device.name, device.id);
        if !self.check_ping {
            return;
        }
        if let Some(ip) = device.last_ip {
            let adapter = Arc::clone(self);
            tokio::spawn(async move {
                let alive = adapter.probe.probe_reachable(ip).await;
                adapter
                    .registry
                    .lock()
                    .await
                    .update_belief(&device.id, alive, Some(ip));
            });
        }
        self.ensure_polling();
    }

    /// Removes a tracked device; the poller stops when nothing is left to
    /// poll.
    pub async fn remove_device(&self, id: &str) {
        let empty = {
            let mut registry = self.registry.lock().await;
            registry.remove(id);
            registry.is_empty()
        };
        if empty {
            self.stop_polling();
        }
    }

    pub async fn device(&self, id: &str) -> Option<TrackedDevice> {
        self.registry.lock().await.get(id).cloned()
    }

    pub async fn devices(&self) -> Vec<TrackedDevice> {
        self.registry.lock().await.devices()
    }

    fn ensure_polling(self: &Arc<Self>) {
        let mut poller = self.poller.lock().unwrap();
        if poller.is_some() {
            return;
        }
        info!("starting reachability poller, interval {:?}", self.poll_interval);
        let adapter = Arc::clone(self);
        *poller = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(adapter.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The immediate first tick is skipped; seeding already probed.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                // A slow pass must not hold up the interval; a late pass
                // may interleave with the next one.
                let adapter = Arc::clone(&adapter);
                tokio::spawn(async move { adapter.reconcile().await });
            }
        }));
    }

    fn stop_polling(&self) {
        if let Some(handle) = self.poller.lock().unwrap().take() {
            info!("stopping reachability poller");
            handle.abort();
        }
    }

    pub fn is_polling(&self) -> bool {
        self.poller.lock().unwrap().is_some()
    }

    /// Suspends polling; in-flight probes finish and their results land
    /// harmlessly via the registry's removal-tolerant belief update.
    pub fn unload(&self) {
        self.stop_polling();
    }

    /// One reconciliation pass: snapshot the neighbor table, then for every
    /// tracked device either probe the address the table reports or, when
    /// the table has no row for it, mark it off outright. Absence from the
    /// table outranks ping, which a firewall may be eating anyway.
    pub async fn reconcile(self: &Arc<Self>) {
        let snapshot = self.probe.scan_arp_table().await;
        let tracked = self.registry.lock().await.tracked();
        debug!(
            "reconciling {} device(s) against {} neighbor(s)",
            tracked.len(),
            snapshot.len()
        );
        let mut probes = Vec::new();
        for (id, mac) in tracked {
            match lookup(&snapshot, mac) {
                Some(entry) => {
                    let ip = entry.ip;
                    let adapter = Arc::clone(self);
                    probes.push(async move {
                        let alive = adapter.probe.probe_reachable(ip).await;
                        adapter
                            .registry
                            .lock()
                            .await
                            .update_belief(&id, alive, Some(ip));
                    });
                }
                None => {
                    self.registry.lock().await.update_belief(&id, false, None);
                }
            }
        }
        join_all(probes).await;
    }

    /// Entry point for host-initiated actions. Only "wake" exists.
    pub async fn perform_action(&self, id: &str, action: &str) -> Result<(), AdapterError> {
        if action != "wake" {
            return Err(AdapterError::UnknownAction(action.to_string()));
        }
        self.wake(id).await
    }

    /// Broadcasts a magic packet for the device. Belief is left alone; the
    /// next reconciliation pass is authoritative about whether it worked.
    pub async fn wake(&self, id: &str) -> Result<(), AdapterError> {
        let mac = self
            .registry
            .lock()
            .await
            .get(id)
            .map(|device| device.mac)
            .ok_or_else(|| AdapterError::UnknownDevice(id.to_string()))?;
        info!("waking {} ({})", id, mac);
        self.probe.send_wake(&mac).await?;
        Ok(())
    }
}

fn lookup(snapshot: &[ArpEntry], mac: MacAddress) -> Option<&ArpEntry> {
    // MacAddress compares by bytes, so matching is case-insensitive no
    // matter how the neighbor table spells it.
    snapshot.iter().find(|entry| entry.mac == mac)
}
