pub mod fixtures;
pub mod model;

pub use fixtures::{count_users_by_email, create_user, find_user_by_email, find_user_by_id, insert_user};
pub use model::TestUser;
