pub mod registry;
pub mod settings;

pub use registry::{FlagType, PermissionType, PermissionsRegistry};
pub use settings::{Flag, FlagValue, LandSettings, Permission};
