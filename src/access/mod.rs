//! Role grants, authorization descriptors and property masks.

pub mod authorization;
pub mod control;
pub mod properties;

pub use authorization::{Access, Authorization, AuthorizationEngine};
pub use control::{AccessControl, Grant, GrantLevel, Permission, Role, RoleGrant};
pub use properties::{PropertyRule, PropertySpec};
