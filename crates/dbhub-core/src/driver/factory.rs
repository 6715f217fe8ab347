//! Family-to-constructor mapping.

use super::{
    BackendDriver, BackendFamily, ConnectionConfig, FlatFileDriver, SledDriver, UnavailableDriver,
};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

/// Builds a driver from its connection configuration.
pub type DriverConstructor = Arc<dyn Fn(ConnectionConfig) -> Arc<dyn BackendDriver> + Send + Sync>;

/// Resolves a backend family to a driver instance.
///
/// Every family resolves to something: a family whose client library is
/// compiled out yields an [`UnavailableDriver`].
pub struct DriverFactory {
    constructors: DashMap<BackendFamily, DriverConstructor>,
}

impl DriverFactory {
    /// Factory with the built-in drivers.
    pub fn new(request_timeout: Duration) -> Self {
        let factory = Self {
            constructors: DashMap::new(),
        };

        factory.register(BackendFamily::FlatFile, |config| {
            Arc::new(FlatFileDriver::new(config))
        });
        factory.register(BackendFamily::Nosql, |config| Arc::new(SledDriver::new(config)));

        #[cfg(feature = "document")]
        factory.register(BackendFamily::DocumentStore, |config| {
            Arc::new(super::DocumentDriver::new(config))
        });
        #[cfg(not(feature = "document"))]
        factory.register(BackendFamily::DocumentStore, |_| {
            Arc::new(UnavailableDriver::new(
                BackendFamily::DocumentStore,
                "built without the `document` feature",
            ))
        });

        #[cfg(feature = "rest")]
        factory.register(BackendFamily::RelationalHttp, move |config| {
            Arc::new(super::RestDriver::new(config, request_timeout))
        });
        #[cfg(not(feature = "rest"))]
        {
            let _ = request_timeout;
            factory.register(BackendFamily::RelationalHttp, |_| {
                Arc::new(UnavailableDriver::new(
                    BackendFamily::RelationalHttp,
                    "built without the `rest` feature",
                ))
            });
        }

        factory
    }

    /// Replace the constructor of a family.
    pub fn register<F>(&self, family: BackendFamily, constructor: F)
    where
        F: Fn(ConnectionConfig) -> Arc<dyn BackendDriver> + Send + Sync + 'static,
    {
        self.constructors.insert(family, Arc::new(constructor));
    }

    /// Instantiate a driver. The result is not connected.
    pub fn create(&self, family: BackendFamily, config: ConnectionConfig) -> Arc<dyn BackendDriver> {
        let constructor = self.constructors.get(&family).map(|c| Arc::clone(c.value()));
        match constructor {
            Some(constructor) => constructor(config),
            None => Arc::new(UnavailableDriver::new(family, "no driver registered")),
        }
    }
}

impl Default for DriverFactory {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_REQUEST_TIMEOUT)
    }
}
