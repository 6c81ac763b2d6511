//! Infrastructure layer: identity storage, JIT provisioning, startup seeding.

pub mod bootstrap;
pub mod provisioning;
pub mod store;

#[cfg(test)]
mod integration_tests;

pub use bootstrap::{BootstrapReport, BootstrapSettings, bootstrap};
pub use provisioning::{IdentityResolver, ResolveError};
pub use store::{IdentityStore, IdentityTransaction, InMemoryIdentityStore, PostgresIdentityStore, StoreError};
