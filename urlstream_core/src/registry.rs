use std::sync::Arc;

use reqwest::Url;

use crate::bridge::{DownloadBridge, FetchBridge};
use crate::transport::{ReqwestSession, SessionConfig, Transport};
use crate::types::types::TransportError;

/// Creates transport sessions for a registry.
pub trait SessionFactory: Send + Sync {
    fn create_session(&self, config: &SessionConfig) -> Result<Arc<dyn Transport>, TransportError>;
}

/// Builds `ReqwestSession`s on the current tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReqwestSessionFactory;

impl SessionFactory for ReqwestSessionFactory {
    fn create_session(&self, config: &SessionConfig) -> Result<Arc<dyn Transport>, TransportError> {
        Ok(Arc::new(ReqwestSession::new(config)?))
    }
}

/// Owns the shared default session and hands out bridges bound to it.
///
/// Construct once at startup and pass it to whoever needs to start transfers.
/// Bridges belong to the caller; the registry only keeps sessions.
pub struct SessionRegistry {
    factory: Arc<dyn SessionFactory>,
    default_session: Arc<dyn Transport>,
}

impl SessionRegistry {
    /// A registry of `ReqwestSession`s with the default configuration.
    /// Must be called from within a tokio runtime.
    pub fn new() -> Result<Self, TransportError> {
        Self::with_factory(Arc::new(ReqwestSessionFactory), &SessionConfig::default())
    }

    pub fn with_factory(
        factory: Arc<dyn SessionFactory>,
        default_config: &SessionConfig,
    ) -> Result<Self, TransportError> {
        let default_session = factory.create_session(default_config)?;
        log::debug!(
            "[SessionRegistry] default session={}",
            default_session.session_id()
        );
        Ok(Self {
            factory,
            default_session,
        })
    }

    pub fn default_session(&self) -> &Arc<dyn Transport> {
        &self.default_session
    }

    /// A fetch bridge on the shared session, or on a dedicated session built
    /// from `config` when one is given.
    pub fn data_fetch_bridge(
        &self,
        url: Url,
        config: Option<&SessionConfig>,
    ) -> Result<FetchBridge, TransportError> {
        let transport = match config {
            Some(config) => self.factory.create_session(config)?,
            None => Arc::clone(&self.default_session),
        };
        Ok(FetchBridge::new(transport, url))
    }

    /// A download bridge on the shared session.
    pub fn download_bridge(&self, url: Url) -> DownloadBridge {
        DownloadBridge::new(Arc::clone(&self.default_session), url)
    }

    /// Cancels everything running on the shared session.
    pub fn shutdown(&self) {
        self.default_session.invalidate_and_cancel();
    }
}
