//! The coordination core: one session object per peripheral that turns the
//! callback-driven, single-outstanding-operation transport into an awaitable,
//! serialized request API with connection-lifecycle tracking and
//! notification demultiplexing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use log::{trace, warn};
use tokio::sync::{Mutex, broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

mod batch;
mod notify;
mod request;
mod response;
mod router;
mod state;

pub use notify::Subscription;
pub use request::{Request, RequestKind};
pub use response::{Response, ResponseKind};
pub use state::ConnectionState;

use response::ReplyMatcher;

use crate::api::characteristic::{Characteristic, CharacteristicProperty, WriteMode};
use crate::api::descriptor::{
    CLIENT_CHARACTERISTIC_CONFIG, DISABLE_NOTIFICATION_VALUE, Descriptor,
    ENABLE_INDICATION_VALUE, ENABLE_NOTIFICATION_VALUE,
};
use crate::api::service::Service;
use crate::api::transport::{
    ConnectionPriority, DeviceKind, GattTransport, TransportEvent,
};
use crate::error::{Error, Result};
use router::{EventRouter, Expectation};

/// How long a coordinator-issued request waits for its reply.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_millis(5000);

pub const MTU_MIN: u16 = 23;
pub const MTU_MAX: u16 = 517;

const EVENT_FEED_CAPACITY: usize = 64;
const OBSERVER_CAPACITY: usize = 64;

/// Per-session mutable state, shared between the public handle, the router
/// task and live subscriptions. The transport handle lives here and nothing
/// outside the session ever holds it past one call.
pub(crate) struct Shared {
    pub(crate) transport: Arc<dyn GattTransport>,
    pub(crate) connection: watch::Sender<ConnectionState>,
    pub(crate) mtu: watch::Sender<u16>,
    pub(crate) requests: broadcast::Sender<Request>,
    pub(crate) responses: broadcast::Sender<Response>,
    /// Serializes every transport-mutating operation; held for the full
    /// request→reply round trip.
    op_lock: Mutex<()>,
    /// The outstanding-operation slot. Non-empty only between request issue
    /// and reply receipt (or timeout/teardown).
    pub(crate) expectation: StdMutex<Option<Expectation>>,
    pub(crate) services: StdMutex<Vec<Service>>,
    /// Set right before a local disconnect is issued, consumed by the
    /// lifecycle callback to tell `Disconnected` from `Lost`.
    pub(crate) active_close: AtomicBool,
    closed: AtomicBool,
    router: StdMutex<Option<JoinHandle<()>>>,
    reply_timeout: Duration,
}

/// Session handle for one BLE peripheral. Cheap to clone; all clones drive
/// the same session.
#[derive(Clone)]
pub struct Peripheral {
    shared: Arc<Shared>,
}

impl Peripheral {
    pub fn new(transport: Arc<dyn GattTransport>) -> Result<Peripheral> {
        Peripheral::with_timeout(transport, DEFAULT_REPLY_TIMEOUT)
    }

    /// Like [`new`](Peripheral::new) with a custom reply bound.
    pub fn with_timeout(
        transport: Arc<dyn GattTransport>,
        reply_timeout: Duration,
    ) -> Result<Peripheral> {
        if transport.device_kind() == DeviceKind::Classic {
            return Err(Error::InvalidDevice);
        }
        let (requests, _) = broadcast::channel(OBSERVER_CAPACITY);
        let (responses, _) = broadcast::channel(OBSERVER_CAPACITY);
        Ok(Peripheral {
            shared: Arc::new(Shared {
                transport,
                connection: watch::Sender::new(ConnectionState::Idle),
                mtu: watch::Sender::new(MTU_MIN),
                requests,
                responses,
                op_lock: Mutex::new(()),
                expectation: StdMutex::new(None),
                services: StdMutex::new(Vec::new()),
                active_close: AtomicBool::new(false),
                closed: AtomicBool::new(true),
                router: StdMutex::new(None),
                reply_timeout,
            }),
        })
    }

    ///////////////////////////////////////////////////////////////////////////
    // Lifecycle
    ///////////////////////////////////////////////////////////////////////////

    /// Open the link and wait for the attempt to settle. Resolves `true`
    /// once connected and services are discovered, `false` when the stack
    /// refused outright or the attempt ended in a terminal state.
    ///
    /// Calling this after [`release`](Peripheral::release) revives the
    /// session with a fresh event feed.
    pub async fn connect(&self) -> Result<bool> {
        let (events_tx, events_rx) = mpsc::channel::<TransportEvent>(EVENT_FEED_CAPACITY);
        if let Some(previous) = self.shared.router.lock().unwrap().take() {
            previous.abort();
        }
        self.shared.active_close.store(false, Ordering::SeqCst);

        let mut request = Request::new(RequestKind::Connect);
        request.accepted = self.shared.transport.connect(events_tx).await;
        let accepted = request.accepted;
        self.publish_request(request);
        if !accepted {
            // A synchronous refusal never existed as an attempt; the state
            // watch stays where it was.
            return Ok(false);
        }

        self.shared.connection.send_replace(ConnectionState::Connecting);
        self.shared.closed.store(false, Ordering::SeqCst);
        let router = EventRouter::new(self.shared.clone());
        *self.shared.router.lock().unwrap() = Some(tokio::spawn(router.run(events_rx)));

        let mut states = self.shared.connection.subscribe();
        let settled = loop {
            let current = *states.borrow_and_update();
            if current.is_connected() || current.is_terminal() {
                break current;
            }
            if states.changed().await.is_err() {
                return Err(Error::SessionClosed);
            }
        };
        if !settled.is_connected() {
            return Ok(false);
        }

        // Discovery runs automatically once connected; a failure leaves the
        // link up with an empty snapshot rather than reverting the state.
        if let Err(e) = self.discover_services().await {
            warn!("service discovery after connect failed: {e}");
        }
        Ok(true)
    }

    /// Ask the peer to close the link. Does not take the operation lock: an
    /// in-flight request keeps running and completes or times out as usual.
    /// The final state arrives through the lifecycle callback.
    pub async fn disconnect(&self) {
        let mut request = Request::new(RequestKind::Disconnect);
        let state = *self.shared.connection.borrow();
        if !self.shared.closed.load(Ordering::SeqCst) && !state.is_terminal() {
            self.shared.active_close.store(true, Ordering::SeqCst);
            request.accepted = self.shared.transport.disconnect().await;
        }
        self.publish_request(request);
    }

    /// Tear the session down. Idempotent; always succeeds. Any in-flight
    /// await fails with [`Error::SessionClosed`].
    pub async fn release(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        // Dropping the slot resolves the awaiting side with an error.
        drop(self.shared.expectation.lock().unwrap().take());
        if let Some(router) = self.shared.router.lock().unwrap().take() {
            router.abort();
        }
        let state = *self.shared.connection.borrow();
        if !state.is_terminal() && state != ConnectionState::Idle {
            let _ = self.shared.transport.disconnect().await;
            self.shared
                .connection
                .send_replace(ConnectionState::Disconnected);
        }
    }

    ///////////////////////////////////////////////////////////////////////////
    // Requests
    ///////////////////////////////////////////////////////////////////////////

    pub async fn discover_services(&self) -> Result<Vec<Service>> {
        let response = self
            .execute(RequestKind::DiscoverServices, ReplyMatcher::ServicesDiscovered)
            .await?;
        if !response.is_success() {
            return Err(Error::StatusFailure(response.status));
        }
        match response.kind {
            ResponseKind::ServicesDiscovered { services } => Ok(services),
            _ => Err(Error::RequestRejected("reply kind mismatch")),
        }
    }

    pub async fn read(&self, characteristic: &Characteristic) -> Result<Vec<u8>> {
        let target = characteristic.uuid;
        let response = self
            .execute(
                RequestKind::Read {
                    characteristic: target,
                },
                ReplyMatcher::CharacteristicRead(target),
            )
            .await?;
        if !response.is_success() {
            return Err(Error::StatusFailure(response.status));
        }
        match response.kind {
            ResponseKind::CharacteristicRead { value, .. } => Ok(value),
            _ => Err(Error::RequestRejected("reply kind mismatch")),
        }
    }

    pub async fn write(&self, characteristic: &Characteristic, value: &[u8]) -> Result<()> {
        self.write_with_mode(characteristic, value, WriteMode::WithResponse)
            .await
    }

    pub async fn write_with_mode(
        &self,
        characteristic: &Characteristic,
        value: &[u8],
        mode: WriteMode,
    ) -> Result<()> {
        let required = mode.required_property();
        if !characteristic.has_property(required) {
            return Err(Error::UnsupportedCapability(required));
        }
        let target = characteristic.uuid;
        let response = self
            .execute(
                RequestKind::Write {
                    characteristic: target,
                    mode,
                    value: value.to_vec(),
                },
                ReplyMatcher::CharacteristicWritten(target),
            )
            .await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(Error::StatusFailure(response.status))
        }
    }

    pub async fn read_descriptor(
        &self,
        characteristic: &Characteristic,
        descriptor: &Descriptor,
    ) -> Result<Vec<u8>> {
        let response = self
            .execute(
                RequestKind::ReadDescriptor {
                    characteristic: characteristic.uuid,
                    descriptor: descriptor.uuid,
                },
                ReplyMatcher::DescriptorRead {
                    characteristic: characteristic.uuid,
                    descriptor: descriptor.uuid,
                },
            )
            .await?;
        if !response.is_success() {
            return Err(Error::StatusFailure(response.status));
        }
        match response.kind {
            ResponseKind::DescriptorRead { value, .. } => Ok(value),
            _ => Err(Error::RequestRejected("reply kind mismatch")),
        }
    }

    pub async fn write_descriptor(
        &self,
        characteristic: &Characteristic,
        descriptor: &Descriptor,
        value: &[u8],
    ) -> Result<()> {
        let response = self
            .execute(
                RequestKind::WriteDescriptor {
                    characteristic: characteristic.uuid,
                    descriptor: descriptor.uuid,
                    value: value.to_vec(),
                },
                ReplyMatcher::DescriptorWritten {
                    characteristic: characteristic.uuid,
                    descriptor: descriptor.uuid,
                },
            )
            .await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(Error::StatusFailure(response.status))
        }
    }

    /// Toggle notifications on the stack, then flip the peer-side switch by
    /// writing the client characteristic configuration descriptor. Indicate
    /// encoding is used only when the characteristic offers Indicate but not
    /// Notify.
    pub async fn set_notification(
        &self,
        characteristic: &Characteristic,
        enable: bool,
    ) -> Result<()> {
        let value: &[u8] = if enable {
            if characteristic.has_property(CharacteristicProperty::Notify) {
                &ENABLE_NOTIFICATION_VALUE
            } else if characteristic.has_property(CharacteristicProperty::Indicate) {
                &ENABLE_INDICATION_VALUE
            } else {
                return Err(Error::UnsupportedCapability(CharacteristicProperty::Notify));
            }
        } else {
            &DISABLE_NOTIFICATION_VALUE
        };

        self.execute_accepted(RequestKind::SetNotification {
            characteristic: characteristic.uuid,
            enable,
        })
        .await?;

        let Some(config) = characteristic
            .find_descriptor(CLIENT_CHARACTERISTIC_CONFIG)
            .cloned()
        else {
            self.publish_request(Request::new(RequestKind::Error {
                message: format!(
                    "no client characteristic config descriptor on {}",
                    characteristic.uuid
                ),
            }));
            return Err(Error::RequestRejected(
                "missing client characteristic config descriptor",
            ));
        };
        self.write_descriptor(characteristic, &config, value).await
    }

    /// Negotiate the ATT payload size. Returns the value the peer settled
    /// on, which may be smaller than requested.
    pub async fn request_mtu(&self, size: u16) -> Result<u16> {
        if !(MTU_MIN..=MTU_MAX).contains(&size) {
            return Err(Error::RequestRejected("mtu outside [23, 517]"));
        }
        self.check_open()?;
        let _guard = self.shared.op_lock.lock().await;
        self.check_open()?;

        // MTU changes can also be peer-initiated, so the reply slot is not
        // safe here; correlate through the broadcast bus instead.
        let mut responses = self.shared.responses.subscribe();

        let mut request = Request::new(RequestKind::SetMtu { size });
        request.accepted = self.shared.transport.request_mtu(size).await;
        let accepted = request.accepted;
        self.publish_request(request);
        if !accepted {
            return Err(Error::RequestRejected("transport refused the operation"));
        }

        let bound = self.shared.reply_timeout;
        let wait = async {
            loop {
                match responses.recv().await {
                    Ok(response) => {
                        if let ResponseKind::MtuChanged { mtu } = response.kind {
                            return if response.is_success() {
                                Ok(mtu)
                            } else {
                                Err(Error::StatusFailure(response.status))
                            };
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return Err(Error::SessionClosed),
                }
            }
        };
        match timeout(bound, wait).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(bound)),
        }
    }

    /// No completion callback exists for priority changes; synchronous
    /// acceptance is the whole story.
    pub async fn request_connection_priority(&self, priority: ConnectionPriority) -> Result<()> {
        self.execute_accepted(RequestKind::SetConnectionPriority { priority })
            .await
    }

    ///////////////////////////////////////////////////////////////////////////
    // Observability
    ///////////////////////////////////////////////////////////////////////////

    /// Current value plus every future transition; late subscribers see the
    /// latest state immediately.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.connection.subscribe()
    }

    /// Negotiated ATT payload size, starting at the protocol minimum.
    pub fn mtu(&self) -> watch::Receiver<u16> {
        self.shared.mtu.subscribe()
    }

    /// Snapshot of the last successful service discovery.
    pub fn services(&self) -> Vec<Service> {
        self.shared.services.lock().unwrap().clone()
    }

    pub fn find_service(&self, uuid: Uuid) -> Option<Service> {
        self.shared
            .services
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.uuid == uuid)
            .cloned()
    }

    /// Every request issued against the transport, as it is issued.
    pub fn observe_requests(&self) -> broadcast::Receiver<Request> {
        self.shared.requests.subscribe()
    }

    /// Every classified transport completion, including spontaneous events.
    pub fn observe_responses(&self) -> broadcast::Receiver<Response> {
        self.shared.responses.subscribe()
    }

    pub fn reply_timeout(&self) -> Duration {
        self.shared.reply_timeout
    }

    ///////////////////////////////////////////////////////////////////////////
    // Coordinator core
    ///////////////////////////////////////////////////////////////////////////

    /// Single-flight execution: take the operation lock, register the reply
    /// expectation, issue the primitive, publish the request, await the
    /// matched reply under the timeout. The lock drops on every exit path.
    async fn execute(&self, kind: RequestKind, matcher: ReplyMatcher) -> Result<Response> {
        self.check_open()?;
        let _guard = self.shared.op_lock.lock().await;
        // The session may have been torn down while this caller was queued.
        self.check_open()?;

        // Register before issuing: the completion may land before we await.
        let (tx, rx) = oneshot::channel();
        *self.shared.expectation.lock().unwrap() = Some(Expectation { matcher, tx });
        // Empties the slot on every exit, including a dropped future, so a
        // late reply is dropped rather than delivered to whoever runs next.
        // Declared after the lock guard, so it runs before the lock releases.
        let _slot = SlotClear(&self.shared);

        let mut request = Request::new(kind);
        request.accepted = self.issue(&request.kind).await;
        let accepted = request.accepted;
        self.publish_request(request);
        if !accepted {
            return Err(Error::RequestRejected("transport refused the operation"));
        }

        match timeout(self.shared.reply_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(Error::SessionClosed),
            Err(_) => Err(Error::Timeout(self.shared.reply_timeout)),
        }
    }

    /// Serialized like [`execute`](Peripheral::execute) but with no
    /// asynchronous reply to wait for.
    async fn execute_accepted(&self, kind: RequestKind) -> Result<()> {
        self.check_open()?;
        let _guard = self.shared.op_lock.lock().await;
        self.check_open()?;

        let mut request = Request::new(kind);
        request.accepted = self.issue(&request.kind).await;
        let accepted = request.accepted;
        self.publish_request(request);
        if accepted {
            Ok(())
        } else {
            Err(Error::RequestRejected("transport refused the operation"))
        }
    }

    async fn issue(&self, kind: &RequestKind) -> bool {
        let transport = &self.shared.transport;
        match kind {
            RequestKind::DiscoverServices => transport.discover_services().await,
            RequestKind::Read { characteristic } => {
                transport.read_characteristic(*characteristic).await
            }
            RequestKind::Write {
                characteristic,
                mode,
                value,
            } => {
                transport
                    .write_characteristic(*characteristic, value, *mode)
                    .await
            }
            RequestKind::ReadDescriptor {
                characteristic,
                descriptor,
            } => transport.read_descriptor(*characteristic, *descriptor).await,
            RequestKind::WriteDescriptor {
                characteristic,
                descriptor,
                value,
            } => {
                transport
                    .write_descriptor(*characteristic, *descriptor, value)
                    .await
            }
            RequestKind::SetNotification {
                characteristic,
                enable,
            } => transport.set_notification(*characteristic, *enable).await,
            RequestKind::SetMtu { size } => transport.request_mtu(*size).await,
            RequestKind::SetConnectionPriority { priority } => {
                transport.request_connection_priority(*priority).await
            }
            // Connect, disconnect and error reports never pass through here.
            RequestKind::Connect | RequestKind::Disconnect | RequestKind::Error { .. } => false,
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            Err(Error::SessionClosed)
        } else {
            Ok(())
        }
    }

    fn publish_request(&self, request: Request) {
        if self.shared.requests.send(request).is_err() {
            trace!("no request observers; dropping publication");
        }
    }

    #[cfg(test)]
    pub(crate) fn shared_for_tests(&self) -> Arc<Shared> {
        self.shared.clone()
    }
}

/// Empties the reply slot when the owning operation unwinds. The slot is
/// non-empty only while an operation is actually awaiting; this holds even
/// when the caller drops the future mid-flight.
struct SlotClear<'a>(&'a Shared);

impl Drop for SlotClear<'_> {
    fn drop(&mut self) {
        self.0.expectation.lock().unwrap().take();
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::sync::mpsc::Sender;

    use super::*;
    use crate::api::transport::LinkState;

    /// Accepts every primitive, reports the link up once, and never
    /// completes anything after that.
    struct SilentTransport;

    #[async_trait]
    impl GattTransport for SilentTransport {
        async fn connect(&self, events: Sender<TransportEvent>) -> bool {
            let _ = events
                .send(TransportEvent::ConnectionStateChanged {
                    state: LinkState::Connected,
                    status: 0,
                })
                .await;
            true
        }
        async fn disconnect(&self) -> bool {
            true
        }
        async fn discover_services(&self) -> bool {
            true
        }
        async fn read_characteristic(&self, _characteristic: Uuid) -> bool {
            true
        }
        async fn write_characteristic(
            &self,
            _characteristic: Uuid,
            _value: &[u8],
            _mode: WriteMode,
        ) -> bool {
            true
        }
        async fn read_descriptor(&self, _characteristic: Uuid, _descriptor: Uuid) -> bool {
            true
        }
        async fn write_descriptor(
            &self,
            _characteristic: Uuid,
            _descriptor: Uuid,
            _value: &[u8],
        ) -> bool {
            true
        }
        async fn set_notification(&self, _characteristic: Uuid, _enable: bool) -> bool {
            true
        }
        async fn request_mtu(&self, _size: u16) -> bool {
            true
        }
        async fn request_connection_priority(&self, _priority: ConnectionPriority) -> bool {
            true
        }
        fn device_kind(&self) -> DeviceKind {
            DeviceKind::LowEnergy
        }
    }

    #[tokio::test]
    async fn dropped_await_leaves_no_stale_expectation() {
        let session =
            Peripheral::with_timeout(Arc::new(SilentTransport), Duration::from_millis(50))
                .unwrap();
        assert!(session.connect().await.unwrap());

        let characteristic = Characteristic {
            uuid: Uuid::from_u128(1),
            ..Characteristic::default()
        };
        // The caller gives up before the reply bound; the future is dropped
        // while the operation is still outstanding.
        let abandoned = timeout(Duration::from_millis(10), session.read(&characteristic)).await;
        assert!(abandoned.is_err());

        let shared = session.shared_for_tests();
        assert!(shared.expectation.lock().unwrap().is_none());
    }
}
