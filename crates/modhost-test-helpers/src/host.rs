//! Host construction helpers

use modhost_core::{
    Deployment, HostConfig, MemoryLookup, ResourceLookup, ScriptHost, TranspilerGateway,
};
use std::sync::Arc;

use crate::fixtures;
use crate::mocks::CountingLookup;

/// Host over in-memory scripts, no dialect
pub fn create_test_host(files: MemoryLookup) -> ScriptHost {
    ScriptHost::with_dependencies(HostConfig::default(), Arc::new(files), None).unwrap()
}

/// Host whose lookups can be counted
pub fn create_counting_host(
    files: MemoryLookup,
) -> (ScriptHost, Arc<CountingLookup<MemoryLookup>>) {
    let lookup = Arc::new(CountingLookup::new(files));
    let host = ScriptHost::with_dependencies(HostConfig::default(), lookup.clone(), None).unwrap();
    (host, lookup)
}

/// Gateway for the toy dialect, reading its bootstrap from `resources`
pub fn create_dialect_gateway(resources: Arc<dyn ResourceLookup>) -> Arc<TranspilerGateway> {
    Arc::new(TranspilerGateway::new(fixtures::dialect_settings(), resources))
}

/// Host with the toy dialect enabled
pub fn create_dialect_host(files: MemoryLookup, gateway: Arc<TranspilerGateway>) -> ScriptHost {
    ScriptHost::with_dependencies(HostConfig::default(), Arc::new(files), Some(gateway)).unwrap()
}

/// Deploy and start `main`, panicking with the error on failure
pub fn start(host: &ScriptHost, main: &str) -> Deployment {
    let mut deployment = host.deploy(main);
    if let Err(err) = deployment.start() {
        panic!("failed to start {}: {}", main, err);
    }
    deployment
}
