pub mod authentication;
pub mod identity;
pub mod login;
pub mod permissions;
pub mod user;

pub use authentication::*;
pub use identity::*;
pub use login::*;
pub use permissions::*;
pub use user::*;
