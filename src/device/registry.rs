use std::collections::HashMap;
use std::sync::RwLock;

use super::{EphemeralId, StableId};

/// Maps ephemeral (bus/address) ids to stable ids and back. Stable ids that
/// have no persisted serial are host-assigned and kept for the process
/// lifetime.
#[derive(Default)]
pub struct DeviceRegistry {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    ephemeral_to_stable: HashMap<EphemeralId, StableId>,
    stable_to_ephemeral: HashMap<StableId, EphemeralId>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records or refreshes the mapping for a freshly (re)connected device.
    pub fn bind(&self, ephemeral: EphemeralId, stable: StableId) {
        let mut inner = self.inner.write().expect("device registry lock poisoned");
        if let Some(old_ephemeral) = inner.stable_to_ephemeral.insert(stable.clone(), ephemeral.clone()) {
            inner.ephemeral_to_stable.remove(&old_ephemeral);
        }
        inner.ephemeral_to_stable.insert(ephemeral, stable);
    }

    pub fn stable_id_for(&self, ephemeral: &EphemeralId) -> Option<StableId> {
        self.inner
            .read()
            .expect("device registry lock poisoned")
            .ephemeral_to_stable
            .get(ephemeral)
            .cloned()
    }

    pub fn ephemeral_id_for(&self, stable: &StableId) -> Option<EphemeralId> {
        self.inner
            .read()
            .expect("device registry lock poisoned")
            .stable_to_ephemeral
            .get(stable)
            .cloned()
    }

    pub fn unbind_ephemeral(&self, ephemeral: &EphemeralId) {
        let mut inner = self.inner.write().expect("device registry lock poisoned");
        if let Some(stable) = inner.ephemeral_to_stable.remove(ephemeral) {
            inner.stable_to_ephemeral.remove(&stable);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_then_lookup_both_directions() {
        let registry = DeviceRegistry::new();
        let ephemeral = EphemeralId::from_bus_address(1, 5);
        let stable = StableId::from_vid_pid_serial(0x04e8, 0x6860, "SN1");
        registry.bind(ephemeral.clone(), stable.clone());

        assert_eq!(registry.stable_id_for(&ephemeral), Some(stable.clone()));
        assert_eq!(registry.ephemeral_id_for(&stable), Some(ephemeral));
    }

    #[test]
    fn rebinding_a_stable_id_to_a_new_ephemeral_id_drops_the_old_mapping() {
        let registry = DeviceRegistry::new();
        let stable = StableId::from_vid_pid_serial(0x04e8, 0x6860, "SN1");
        let first = EphemeralId::from_bus_address(1, 5);
        let second = EphemeralId::from_bus_address(1, 7);

        registry.bind(first.clone(), stable.clone());
        registry.bind(second.clone(), stable.clone());

        assert_eq!(registry.stable_id_for(&first), None);
        assert_eq!(registry.stable_id_for(&second), Some(stable));
    }

    #[test]
    fn unbind_removes_both_directions() {
        let registry = DeviceRegistry::new();
        let ephemeral = EphemeralId::from_bus_address(2, 1);
        let stable = StableId::from_vid_pid_serial(0x0781, 0x7414, "SN2");
        registry.bind(ephemeral.clone(), stable.clone());

        registry.unbind_ephemeral(&ephemeral);

        assert_eq!(registry.stable_id_for(&ephemeral), None);
        assert_eq!(registry.ephemeral_id_for(&stable), None);
    }
}
