pub mod auth;
pub mod share_id;
