//! `lms-core`: identity domain primitives for the authentication gateway.
//!
//! Pure types only: identifiers, roles, the account/guardian/dependent
//! records and the domain error model. No I/O lives here.

pub mod error;
pub mod id;
pub mod identity;
pub mod role;

pub use error::{DomainError, DomainResult};
pub use id::{AccountId, DependentId, GuardianId};
pub use identity::{Account, Dependent, Guardian, ProfileLink, RoleRecord};
pub use role::{GuardianType, Role};
