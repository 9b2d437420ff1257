//! Live device and service bookkeeping.
//!
//! Devices appear on their first `Services` announce, refresh on every
//! subsequent one, and are evicted after announce silence. The registry is
//! owned exclusively by the bus daemon; other threads see it through
//! snapshots.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info};

use jacbus_spec::RESTART_COUNTER_MASK;

/// A service slot announced by a remote device.
#[derive(Debug, Clone)]
pub struct ServiceInstance {
    /// 32-bit service class from the catalogue.
    pub class: u32,
    /// Position in the device's announce list; 0 is control.
    pub index: u8,
    registers: HashMap<u16, Bytes>,
}

impl ServiceInstance {
    fn new(class: u32, index: u8) -> Self {
        Self {
            class,
            index,
            registers: HashMap::new(),
        }
    }

    /// Last-known value of a register, from observed reports.
    pub fn register(&self, code: u16) -> Option<&Bytes> {
        self.registers.get(&code)
    }

    /// Number of cached register values.
    pub fn cached_registers(&self) -> usize {
        self.registers.len()
    }

    fn cache(&mut self, code: u16, value: Bytes) {
        self.registers.insert(code, value);
    }

    fn clear(&mut self) {
        self.registers.clear();
    }
}

/// A remote device, keyed by its 8-byte identifier.
#[derive(Debug, Clone)]
pub struct Device {
    pub device_id: u64,
    /// Low nibble of the announce flags; a decrease means the device restarted.
    pub restart_counter: u8,
    /// Raw announce flags word.
    pub announce_flags: u16,
    services: Vec<ServiceInstance>,
    /// When the last announce was seen.
    pub last_seen: Instant,
    /// Announces observed this session.
    pub announce_count: u64,
}

impl Device {
    /// The service at an announce index; 0 is control.
    pub fn service(&self, index: u8) -> Option<&ServiceInstance> {
        self.services.get(index as usize)
    }

    /// All services in announce order (control first).
    pub fn services(&self) -> &[ServiceInstance] {
        &self.services
    }

    /// Service classes in announce order, control excluded.
    pub fn service_classes(&self) -> Vec<u32> {
        self.services.iter().skip(1).map(|s| s.class).collect()
    }
}

/// What an announce did to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceOutcome {
    /// First announce from this identifier.
    New,
    /// Routine refresh.
    Updated,
    /// Restart counter decreased (or the service list changed): caches were
    /// dropped, and the caller must tear down pipes and pending retries for
    /// this device.
    Restarted,
}

/// The device table.
#[derive(Debug, Default)]
pub struct Registry {
    devices: HashMap<u64, Device>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a `Services` announce.
    ///
    /// `classes` lists the announced service classes excluding control, which
    /// is implicit at index 0.
    pub fn on_announce(
        &mut self,
        device_id: u64,
        flags_word: u16,
        classes: &[u32],
        now: Instant,
    ) -> AnnounceOutcome {
        let restart_counter = (flags_word & RESTART_COUNTER_MASK) as u8;

        let Some(device) = self.devices.get_mut(&device_id) else {
            debug!(device = %format_args!("{device_id:#018x}"), services = classes.len(), "new device");
            let mut services = vec![ServiceInstance::new(jacbus_spec::SRV_CONTROL, 0)];
            services.extend(
                classes
                    .iter()
                    .enumerate()
                    .map(|(i, &class)| ServiceInstance::new(class, (i + 1) as u8)),
            );
            self.devices.insert(
                device_id,
                Device {
                    device_id,
                    restart_counter,
                    announce_flags: flags_word,
                    services,
                    last_seen: now,
                    announce_count: 1,
                },
            );
            return AnnounceOutcome::New;
        };

        device.last_seen = now;
        device.announce_count += 1;
        device.announce_flags = flags_word;

        let restarted = restart_counter < device.restart_counter;
        let list_changed = device.service_classes() != classes;
        device.restart_counter = restart_counter;

        if restarted || list_changed {
            info!(
                device = %format_args!("{device_id:#018x}"),
                restarted, list_changed, "device reset, dropping cached state"
            );
            let mut services = vec![ServiceInstance::new(jacbus_spec::SRV_CONTROL, 0)];
            services.extend(
                classes
                    .iter()
                    .enumerate()
                    .map(|(i, &class)| ServiceInstance::new(class, (i + 1) as u8)),
            );
            device.services = services;
            return AnnounceOutcome::Restarted;
        }

        AnnounceOutcome::Updated
    }

    /// Resolve a packet's service index to its announced class.
    ///
    /// `None` means the device is unknown or the index is out of range; the
    /// policy for such packets is drop-and-count.
    pub fn route(&self, device_id: u64, service_index: u8) -> Option<u32> {
        self.devices
            .get(&device_id)
            .and_then(|device| device.service(service_index))
            .map(|service| service.class)
    }

    /// Record a register value observed in a report.
    pub fn cache_report(&mut self, device_id: u64, service_index: u8, code: u16, value: Bytes) {
        if let Some(device) = self.devices.get_mut(&device_id) {
            if let Some(service) = device.services.get_mut(service_index as usize) {
                service.cache(code, value);
            }
        }
    }

    /// Drop every cached register value for a device.
    pub fn clear_caches(&mut self, device_id: u64) {
        if let Some(device) = self.devices.get_mut(&device_id) {
            for service in &mut device.services {
                service.clear();
            }
        }
    }

    /// Evict devices silent for longer than `max_age`; returns their ids.
    pub fn evict_silent(&mut self, now: Instant, max_age: Duration) -> Vec<u64> {
        let lost: Vec<u64> = self
            .devices
            .values()
            .filter(|device| now.duration_since(device.last_seen) > max_age)
            .map(|device| device.device_id)
            .collect();
        for id in &lost {
            info!(device = %format_args!("{id:#018x}"), "device lost, evicting");
            self.devices.remove(id);
        }
        lost
    }

    /// Explicitly forget a device.
    pub fn evict(&mut self, device_id: u64) -> bool {
        self.devices.remove(&device_id).is_some()
    }

    pub fn device(&self, device_id: u64) -> Option<&Device> {
        self.devices.get(&device_id)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEV: u64 = 0x0123_4567_89ab_cdef;
    const CLASSES: &[u32] = &[0x1473_a263, 0x1421_bac7];

    fn announce(registry: &mut Registry, restart: u16, classes: &[u32]) -> AnnounceOutcome {
        registry.on_announce(DEV, 0x0500 | restart, classes, Instant::now())
    }

    #[test]
    fn first_announce_creates_device_with_control_slot() {
        let mut registry = Registry::new();
        assert_eq!(announce(&mut registry, 1, CLASSES), AnnounceOutcome::New);

        let device = registry.device(DEV).unwrap();
        assert_eq!(device.services().len(), 3);
        assert_eq!(device.service(0).unwrap().class, 0);
        assert_eq!(device.service(1).unwrap().class, CLASSES[0]);
        assert_eq!(device.service_classes(), CLASSES);
    }

    #[test]
    fn routing_resolves_against_latest_announce() {
        let mut registry = Registry::new();
        announce(&mut registry, 1, CLASSES);

        assert_eq!(registry.route(DEV, 1), Some(CLASSES[0]));
        assert_eq!(registry.route(DEV, 2), Some(CLASSES[1]));
        assert_eq!(registry.route(DEV, 3), None);
        assert_eq!(registry.route(0x9999, 1), None);
    }

    #[test]
    fn restart_counter_decrease_clears_cached_registers() {
        let mut registry = Registry::new();
        announce(&mut registry, 3, CLASSES);
        registry.cache_report(DEV, 1, 0x101, Bytes::from_static(b"\x01"));
        assert_eq!(
            registry.device(DEV).unwrap().service(1).unwrap().cached_registers(),
            1
        );

        let outcome = announce(&mut registry, 1, CLASSES);
        assert_eq!(outcome, AnnounceOutcome::Restarted);
        assert_eq!(
            registry.device(DEV).unwrap().service(1).unwrap().cached_registers(),
            0
        );
    }

    #[test]
    fn same_counter_is_a_routine_update() {
        let mut registry = Registry::new();
        announce(&mut registry, 2, CLASSES);
        registry.cache_report(DEV, 1, 0x101, Bytes::from_static(b"\x02"));

        assert_eq!(announce(&mut registry, 2, CLASSES), AnnounceOutcome::Updated);
        assert_eq!(
            registry.device(DEV).unwrap().service(1).unwrap().cached_registers(),
            1
        );
    }

    #[test]
    fn service_list_change_rebuilds_slots() {
        let mut registry = Registry::new();
        announce(&mut registry, 1, CLASSES);

        let outcome = announce(&mut registry, 1, &[0x1609_d4f0]);
        assert_eq!(outcome, AnnounceOutcome::Restarted);
        assert_eq!(registry.route(DEV, 1), Some(0x1609_d4f0));
        assert_eq!(registry.route(DEV, 2), None);
    }

    #[test]
    fn silent_devices_are_evicted() {
        let mut registry = Registry::new();
        let past = Instant::now() - Duration::from_secs(10);
        registry.on_announce(DEV, 1, CLASSES, past);
        registry.on_announce(0x42, 1, CLASSES, Instant::now());

        let lost = registry.evict_silent(Instant::now(), Duration::from_secs(2));
        assert_eq!(lost, vec![DEV]);
        assert!(registry.device(DEV).is_none());
        assert!(registry.device(0x42).is_some());
    }
}
