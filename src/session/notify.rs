use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use log::{debug, warn};
use tokio::runtime::Handle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use uuid::Uuid;

use crate::api::characteristic::Characteristic;
use crate::error::Result;
use crate::session::response::{Response, ResponseKind};
use crate::session::Peripheral;

impl Peripheral {
    /// Start receiving value changes for one characteristic. Enabling goes
    /// through the single-flight coordinator (notification toggle plus the
    /// descriptor write), so a subscribe never interleaves with another
    /// outstanding request.
    ///
    /// Dropping the returned [`Subscription`] writes the disable value back
    /// unless `hold_open` is set, in which case multiple logical listeners
    /// can share the underlying subscription and the caller disables
    /// manually. Subscribing again after a drop restarts the sequence.
    pub async fn subscribe(
        &self,
        characteristic: &Characteristic,
        hold_open: bool,
    ) -> Result<Subscription> {
        // Attach to the bus before enabling so the first value cannot slip
        // past between the descriptor write and the first poll.
        let stream = BroadcastStream::new(self.observe_responses());
        self.set_notification(characteristic, true).await?;
        Ok(Subscription {
            session: self.clone(),
            target: characteristic.clone(),
            stream,
            hold_open,
        })
    }
}

/// A live notification stream for one characteristic: the response bus
/// filtered by target identity, yielding payloads in arrival order.
///
/// The bus is bounded; a consumer that falls too far behind skips the
/// overrun and resumes from the oldest retained event.
pub struct Subscription {
    session: Peripheral,
    target: Characteristic,
    stream: BroadcastStream<Response>,
    hold_open: bool,
}

impl Subscription {
    pub fn characteristic(&self) -> Uuid {
        self.target.uuid
    }

    /// Suppress the disable write on drop.
    pub fn hold_open(&mut self) {
        self.hold_open = true;
    }

    /// Next payload, or `None` once the session is gone.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        futures::StreamExt::next(self).await
    }
}

impl Stream for Subscription {
    type Item = Vec<u8>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match Pin::new(&mut this.stream).poll_next(cx) {
                Poll::Ready(Some(Ok(response))) => {
                    if let ResponseKind::CharacteristicChanged {
                        characteristic,
                        value,
                    } = response.kind
                    {
                        if characteristic == this.target.uuid {
                            return Poll::Ready(Some(value));
                        }
                    }
                }
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(missed)))) => {
                    warn!(
                        "notification subscriber for {} lagged, skipped {missed} events",
                        this.target.uuid
                    );
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.hold_open {
            return;
        }
        let session = self.session.clone();
        let target = self.target.clone();
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = session.set_notification(&target, false).await {
                        debug!("disable after unsubscribe failed for {}: {e}", target.uuid);
                    }
                });
            }
            Err(_) => debug!(
                "no runtime at drop; notifications stay enabled for {}",
                self.target.uuid
            ),
        }
    }
}
