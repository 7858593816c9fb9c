//! Privilege checks and file permission handling

mod permissions;
mod privileges;

pub use permissions::{set_secure_permissions, validate_file_permissions, SecureFileMode};
pub use privileges::{require_elevated, PrivilegeLevel};
