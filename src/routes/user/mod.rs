mod handler;
pub mod model;

pub use handler::{activate, follow_user, get_profile, login, register, unfollow_user};
