//! Builds the two peer transports a [`super::TransportManager`] owns.
//!
//! The concrete `RTCPeerConnection` construction is out of scope
//! (SPEC_FULL §1); an embedder supplies a factory so the engine can
//! create a fresh publisher/subscriber pair on join and on full
//! reconnect, generalizing the role `_pcf`
//! (`PeerConnectionFactoryInterface`) plays in
//! `RTCEngineImpl::createTransportManager`.

use std::sync::Arc;

use super::Transport;

/// Creates one side of the publisher/subscriber pair.
pub trait TransportFactory: Send + Sync {
    fn create_publisher(&self) -> Arc<dyn Transport>;
    fn create_subscriber(&self) -> Arc<dyn Transport>;
}

#[cfg(any(test, feature = "mockable"))]
pub struct MockTransportFactory;

#[cfg(any(test, feature = "mockable"))]
impl TransportFactory for MockTransportFactory {
    fn create_publisher(&self) -> Arc<dyn Transport> {
        Arc::new(super::peer::mock::ScriptedTransport::new())
    }

    fn create_subscriber(&self) -> Arc<dyn Transport> {
        Arc::new(super::peer::mock::ScriptedTransport::new())
    }
}
