use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use log::warn;
use tokio::sync::broadcast::{self, error::RecvError};

use super::{Envelope, EnvelopeStream, FabricError, Relay};

/// A relay that never leaves this process.
///
/// Enough for a single server process. Cloning it shares the channel, which
/// lets several fabrics in one process behave like separate processes.
#[derive(Clone)]
pub struct LocalRelay {
    sender: broadcast::Sender<Envelope>,
}

impl LocalRelay {
    const CAPACITY: usize = 1024;

    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(Self::CAPACITY);
        Self { sender }
    }
}

impl Default for LocalRelay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Relay for LocalRelay {
    async fn publish(&self, envelope: &Envelope) -> Result<(), FabricError> {
        // An error here only means nobody is subscribed
        let _ = self.sender.send(envelope.clone());
        Ok(())
    }

    async fn subscribe(&self) -> Result<EnvelopeStream, FabricError> {
        let receiver = self.sender.subscribe();

        let envelopes = stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(envelope) => return Some((envelope, receiver)),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Local relay lagged behind, {} broadcasts lost", skipped)
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });

        Ok(envelopes.boxed())
    }
}
