pub mod download_bridge;
pub mod fetch_bridge;
pub mod operation;

pub use download_bridge::DownloadBridge;
pub use fetch_bridge::FetchBridge;
pub use operation::Operation;
