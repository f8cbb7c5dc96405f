pub mod client_secret;
pub mod rotate;
