pub mod config;
pub mod cryptoblob;
pub mod login;
pub mod permissions;

pub use login::{ArcLoginProvider, Credentials, LoginProvider, UserState};
pub use permissions::{Grants, PermissionsChecker, Right};
