mod handler;
pub mod model;

pub use handler::{
    create_comment, create_post, delete_post, get_comments, get_feed, get_post, update_post,
};
