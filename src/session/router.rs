use std::sync::Arc;
use std::sync::atomic::Ordering;

use log::{debug, trace};
use tokio::sync::mpsc::Receiver;
use tokio::sync::oneshot;

use crate::api::transport::{GATT_SUCCESS, LinkState, STATUS_CACHE_STALE, TransportEvent};
use crate::session::Shared;
use crate::session::response::{ReplyMatcher, Response, ResponseKind};
use crate::session::state::ConnectionState;

/// The single awaiting operation: what it expects and where to resolve it.
#[derive(Debug)]
pub(crate) struct Expectation {
    pub(crate) matcher: ReplyMatcher,
    pub(crate) tx: oneshot::Sender<Response>,
}

/// Drains the raw transport event feed for one live session. Every event
/// becomes exactly one [`Response`]: spontaneous kinds go to the broadcast
/// bus only, everything else additionally resolves the reply slot when the
/// registered expectation matches by kind and target identity.
pub(crate) struct EventRouter {
    shared: Arc<Shared>,
}

impl EventRouter {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        EventRouter { shared }
    }

    pub(crate) async fn run(self, mut events: Receiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            trace!("transport event: {event:?}");
            let response = self.classify(event).await;
            self.route(response);
        }
        trace!("transport event feed closed");
    }

    /// Turn one raw event into a typed response, applying state-machine side
    /// effects (connection watch, MTU watch, services snapshot) on the way.
    async fn classify(&self, event: TransportEvent) -> Response {
        match event {
            TransportEvent::ConnectionStateChanged { state, status } => {
                let next = self.classify_link_state(state, status).await;
                self.shared.connection.send_replace(next);
                Response::new(ResponseKind::ConnectionStateChanged { state: next }, GATT_SUCCESS)
            }
            TransportEvent::ServicesDiscovered { services, status } => {
                if status == GATT_SUCCESS {
                    *self.shared.services.lock().unwrap() = services.clone();
                }
                Response::new(ResponseKind::ServicesDiscovered { services }, status)
            }
            TransportEvent::CharacteristicRead {
                characteristic,
                value,
                status,
            } => Response::new(
                ResponseKind::CharacteristicRead {
                    characteristic,
                    value,
                },
                status,
            ),
            TransportEvent::CharacteristicWritten {
                characteristic,
                status,
            } => Response::new(ResponseKind::CharacteristicWritten { characteristic }, status),
            TransportEvent::CharacteristicChanged {
                characteristic,
                value,
            } => Response::new(
                ResponseKind::CharacteristicChanged {
                    characteristic,
                    value,
                },
                GATT_SUCCESS,
            ),
            TransportEvent::DescriptorRead {
                characteristic,
                descriptor,
                value,
                status,
            } => Response::new(
                ResponseKind::DescriptorRead {
                    characteristic,
                    descriptor,
                    value,
                },
                status,
            ),
            TransportEvent::DescriptorWritten {
                characteristic,
                descriptor,
                status,
            } => Response::new(
                ResponseKind::DescriptorWritten {
                    characteristic,
                    descriptor,
                },
                status,
            ),
            TransportEvent::MtuChanged { mtu, status } => {
                if status == GATT_SUCCESS {
                    self.shared.mtu.send_replace(mtu);
                }
                Response::new(ResponseKind::MtuChanged { mtu }, status)
            }
        }
    }

    /// The disconnect branch of the state machine: a drop that arrives before
    /// the link ever reached `Connected` is a failed attempt; otherwise the
    /// active-close flag decides between `Disconnected` and `Lost`. The flag
    /// is consumed either way.
    async fn classify_link_state(&self, state: LinkState, status: u8) -> ConnectionState {
        match state {
            LinkState::Connecting => ConnectionState::Connecting,
            LinkState::Connected => ConnectionState::Connected,
            LinkState::Disconnecting => ConnectionState::Disconnecting,
            LinkState::Disconnected => {
                let prior = *self.shared.connection.borrow();
                if matches!(prior, ConnectionState::Idle | ConnectionState::Connecting) {
                    ConnectionState::Failed
                } else {
                    if status == STATUS_CACHE_STALE && !self.shared.transport.refresh_cache().await
                    {
                        debug!("device cache refresh unavailable or failed");
                    }
                    if self.shared.active_close.swap(false, Ordering::SeqCst) {
                        ConnectionState::Disconnected
                    } else {
                        ConnectionState::Lost
                    }
                }
            }
        }
    }

    fn route(&self, response: Response) {
        if !response.is_spontaneous() {
            let mut slot = self.shared.expectation.lock().unwrap();
            let matched = slot
                .as_ref()
                .is_some_and(|expectation| expectation.matcher.matches(&response.kind));
            if matched {
                if let Some(expectation) = slot.take() {
                    let _ = expectation.tx.send(response.clone());
                }
            }
            // An unmatched reply means nobody is waiting any more (timeout
            // already fired) or a stray callback from an abandoned operation;
            // the broadcast below is its only delivery.
        }
        if self.shared.responses.send(response).is_err() {
            trace!("no response observers; dropping publication");
        }
    }
}
