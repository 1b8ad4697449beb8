//! Address and endpoint bookkeeping.
//!
//! Two levels of lazily-created entries: address name to [`Address`], and
//! within each address, endpoint name to [`Endpoint`]. Entries are never
//! removed.

use crate::broker::BrokerError;
use crate::endpoint::Endpoint;
use crate::listener::ListenerTask;
use dashmap::DashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// One externally reachable binding point.
pub(crate) struct Address {
    name: String,
    endpoints: DashMap<String, Arc<Endpoint>>,
    listener: Mutex<Option<ListenerTask>>,
}

impl Address {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoints: DashMap::new(),
            listener: Mutex::new(None),
        }
    }

    /// The address name.
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Get or create an endpoint.
    pub(crate) fn endpoint_or_insert(&self, name: &str, capacity: usize) -> Arc<Endpoint> {
        if let Some(endpoint) = self.endpoints.get(name) {
            return Arc::clone(&endpoint);
        }
        let entry = self.endpoints.entry(name.to_string()).or_insert_with(|| {
            debug!(address = %self.name, endpoint = %name, "Creating endpoint");
            Arc::new(Endpoint::new(self.name.clone(), name, capacity))
        });
        Arc::clone(&entry)
    }

    /// Look up an existing endpoint.
    pub(crate) fn endpoint(&self, name: &str) -> Option<Arc<Endpoint>> {
        self.endpoints.get(name).map(|e| Arc::clone(&e))
    }

    /// All endpoints of this address.
    pub(crate) fn endpoints(&self) -> Vec<Arc<Endpoint>> {
        self.endpoints.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Endpoint names, in no particular order.
    pub(crate) fn endpoint_names(&self) -> Vec<String> {
        self.endpoints.iter().map(|e| e.key().clone()).collect()
    }

    fn listener_slot(&self) -> MutexGuard<'_, Option<ListenerTask>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install a listener task unless one is already running.
    pub(crate) fn ensure_listener(&self, spawn: impl FnOnce(&str) -> ListenerTask) {
        let mut slot = self.listener_slot();
        if slot.is_none() {
            *slot = Some(spawn(&self.name));
        }
    }

    /// Take the listener task for teardown.
    pub(crate) fn take_listener(&self) -> Option<ListenerTask> {
        self.listener_slot().take()
    }
}

/// The broker's address table.
#[derive(Default)]
pub(crate) struct Registry {
    addresses: DashMap<String, Arc<Address>>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Get or create an address.
    pub(crate) fn address_or_insert(&self, name: &str) -> Arc<Address> {
        if let Some(address) = self.addresses.get(name) {
            return Arc::clone(&address);
        }
        let entry = self.addresses.entry(name.to_string()).or_insert_with(|| {
            debug!(address = %name, "Creating address");
            Arc::new(Address::new(name))
        });
        Arc::clone(&entry)
    }

    /// Get or create an address and one of its endpoints.
    pub(crate) fn endpoint_or_insert(
        &self,
        address: &str,
        endpoint: &str,
        capacity: usize,
    ) -> (Arc<Address>, Arc<Endpoint>) {
        let address = self.address_or_insert(address);
        let endpoint = address.endpoint_or_insert(endpoint, capacity);
        (address, endpoint)
    }

    /// Look up an existing endpoint without creating anything.
    ///
    /// # Errors
    ///
    /// Returns a not-found error naming whichever level is missing.
    pub(crate) fn lookup(&self, address: &str, endpoint: &str) -> Result<Arc<Endpoint>, BrokerError> {
        let entry = self
            .addresses
            .get(address)
            .map(|a| Arc::clone(&a))
            .ok_or_else(|| BrokerError::AddressNotFound(address.to_string()))?;

        entry
            .endpoint(endpoint)
            .ok_or_else(|| BrokerError::EndpointNotFound {
                address: address.to_string(),
                endpoint: endpoint.to_string(),
            })
    }

    /// Look up an existing address.
    pub(crate) fn address(&self, name: &str) -> Option<Arc<Address>> {
        self.addresses.get(name).map(|a| Arc::clone(&a))
    }

    /// All addresses.
    pub(crate) fn addresses(&self) -> Vec<Arc<Address>> {
        self.addresses.iter().map(|a| Arc::clone(a.value())).collect()
    }

    /// Address names, in no particular order.
    pub(crate) fn address_names(&self) -> Vec<String> {
        self.addresses.iter().map(|a| a.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lazy_creation() {
        let registry = Registry::new();
        assert!(registry.address_names().is_empty());

        let (address, first) = registry.endpoint_or_insert("addr", "ep", 1);
        let (_, again) = registry.endpoint_or_insert("addr", "ep", 1);
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(address.name(), "addr");
        assert_eq!(registry.address_names(), vec!["addr".to_string()]);
    }

    #[test]
    fn test_many_endpoints_one_address() {
        let registry = Registry::new();
        for i in 0..5 {
            registry.endpoint_or_insert("addr", &format!("ep-{i}"), 1);
        }

        let address = registry.address("addr").unwrap();
        let mut names = address.endpoint_names();
        names.sort();
        assert_eq!(names, vec!["ep-0", "ep-1", "ep-2", "ep-3", "ep-4"]);
        assert_eq!(address.endpoints().len(), 5);
        assert_eq!(registry.addresses().len(), 1);
    }

    #[test]
    fn test_lookup_errors() {
        let registry = Registry::new();
        registry.endpoint_or_insert("addr", "ep", 1);

        assert!(registry.lookup("addr", "ep").is_ok());
        assert!(matches!(
            registry.lookup("nope", "ep"),
            Err(BrokerError::AddressNotFound(_))
        ));
        assert!(matches!(
            registry.lookup("addr", "nope"),
            Err(BrokerError::EndpointNotFound { .. })
        ));
        // Lookups never create entries.
        assert!(registry.address("nope").is_none());
    }

    #[test]
    fn test_concurrent_registration() {
        let registry = Arc::new(Registry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for j in 0..50 {
                        registry.endpoint_or_insert("addr", &format!("ep-{}", (i + j) % 10), 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.address_names().len(), 1);
        assert_eq!(registry.address("addr").unwrap().endpoint_names().len(), 10);
    }
}
