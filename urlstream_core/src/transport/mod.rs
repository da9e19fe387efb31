pub mod config;
pub mod reqwest_session;
pub mod transport;

pub use config::{SessionConfig, SessionConfigBuilder};
pub use reqwest_session::ReqwestSession;
pub use transport::{Transport, TransportDelegate};
