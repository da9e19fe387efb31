pub mod bridge;
pub mod registry;
pub mod stream;
pub mod transport;
pub mod types;

pub use reqwest::Url;
