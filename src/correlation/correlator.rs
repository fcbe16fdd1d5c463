//! Request/response correlation.
//!
//! The [`Correlator`] assigns ids to outgoing requests, keeps the pending
//! table, and routes every inbound envelope: answers settle their request,
//! unsolicited updates go to notification subscribers.
//!
//! # Routing
//!
//! | Inbound | Effect |
//! |---------|--------|
//! | not `RESP`/`UPDATE` | ignored |
//! | `id == 0` | notification, characteristic-change, device-discovered events |
//! | unknown id | dropped |
//! | pending id | settle if `resolve_if` accepts; always published as an update |

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::events::{Listeners, Subscription};
use crate::protocol::{
    CharacteristicChange, DiscoveredDevice, Message, ParsedUpdate, Request, RequestEnvelope,
    Update,
};
use crate::transport::WireSender;

use super::options::RequestOptions;
use super::pending::{PendingGuard, PendingTable};

// ============================================================================
// Constants
// ============================================================================

/// Default deadline for a request (30s).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum pending requests before rejecting new ones.
pub const DEFAULT_MAX_PENDING_REQUESTS: usize = 256;

// ============================================================================
// Types
// ============================================================================

/// Event registries.
#[derive(Default)]
struct CorrelatorEvents {
    update: Listeners<Message>,
    notification: Listeners<Update>,
    characteristic_changed: Listeners<CharacteristicChange>,
    device_discovered: Listeners<DiscoveredDevice>,
}

/// Shared inner state of a correlator.
struct CorrelatorInner {
    sender: Arc<dyn WireSender>,
    table: Arc<Mutex<PendingTable>>,
    default_timeout: Option<Duration>,
    max_pending: usize,
    events: CorrelatorEvents,
}

// ============================================================================
// Correlator
// ============================================================================

/// Multiplexes concurrent requests over one [`WireSender`].
///
/// Cloning is cheap; clones share the pending table.
///
/// # Example
///
/// ```ignore
/// let correlator = Correlator::new(Arc::new(transport.clone()));
/// let options = RequestOptions::new().with_timeout(Duration::from_secs(5));
/// let reply = correlator.issue_request(Request::new("scan.stop"), options).await?;
/// ```
#[derive(Clone)]
pub struct Correlator {
    inner: Arc<CorrelatorInner>,
}

/// Non-owning handle to a [`Correlator`].
#[derive(Clone)]
pub(crate) struct WeakCorrelator {
    inner: Weak<CorrelatorInner>,
}

impl WeakCorrelator {
    /// Returns the correlator if it is still alive.
    pub(crate) fn upgrade(&self) -> Option<Correlator> {
        self.inner.upgrade().map(|inner| Correlator { inner })
    }
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("pending", &self.pending_count())
            .field("default_timeout", &self.inner.default_timeout)
            .field("max_pending", &self.inner.max_pending)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Correlator - Constructor
// ============================================================================

impl Correlator {
    /// Creates a correlator with the default timeout and capacity.
    #[must_use]
    pub fn new(sender: Arc<dyn WireSender>) -> Self {
        Self::with_options(
            sender,
            Some(DEFAULT_REQUEST_TIMEOUT),
            DEFAULT_MAX_PENDING_REQUESTS,
        )
    }

    /// Creates a correlator.
    ///
    /// `default_timeout` applies to requests that set none; `None` lets them
    /// wait indefinitely.
    #[must_use]
    pub fn with_options(
        sender: Arc<dyn WireSender>,
        default_timeout: Option<Duration>,
        max_pending: usize,
    ) -> Self {
        Self {
            inner: Arc::new(CorrelatorInner {
                sender,
                table: Arc::new(Mutex::new(PendingTable::default())),
                default_timeout,
                max_pending,
                events: CorrelatorEvents::default(),
            }),
        }
    }

    /// Returns a non-owning handle.
    pub(crate) fn downgrade(&self) -> WeakCorrelator {
        WeakCorrelator {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

// ============================================================================
// Correlator - Requests
// ============================================================================

impl Correlator {
    /// Sends a request and waits for the message that settles it.
    ///
    /// Returns `Ok(None)` only when `options.quiet` swallowed a failure.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the request could not be sent
    /// - [`Error::RequestTimeout`] if nothing settled it in time
    /// - [`Error::Aborted`] if the transport was torn down
    /// - [`Error::ConnectionClosed`] if the connection dropped
    /// - [`Error::Protocol`] if too many requests are pending
    pub async fn issue_request(
        &self,
        request: Request,
        options: RequestOptions,
    ) -> Result<Option<Message>> {
        let quiet = options.quiet;
        let command = request.command.clone();

        match self.exchange(request, options).await {
            Ok(message) => Ok(Some(message)),
            Err(e) if quiet => {
                debug!(command, error = %e, "Quiet request failed");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Sends a request and always propagates failure.
    pub(crate) async fn exchange(
        &self,
        request: Request,
        options: RequestOptions,
    ) -> Result<Message> {
        let RequestOptions {
            timeout: deadline,
            resolve_if,
            ..
        } = options;
        let deadline = deadline.or(self.inner.default_timeout);

        let (id, ticket, mut rx) = {
            let mut table = self.inner.table.lock();
            if table.len() >= self.inner.max_pending {
                warn!(
                    pending = table.len(),
                    max = self.inner.max_pending,
                    "Too many pending requests"
                );
                return Err(Error::protocol(format!(
                    "Too many pending requests: {}/{}",
                    table.len(),
                    self.inner.max_pending
                )));
            }
            table.register(request.command.clone(), resolve_if)
        };
        let guard = PendingGuard::new(Arc::clone(&self.inner.table), id, ticket);

        let payload = RequestEnvelope::new(id, request).to_value()?;
        if let Err(e) = self.inner.sender.send(&payload) {
            debug!(request_id = %id, error = %e, "Request not sent");
            return Err(e);
        }
        trace!(request_id = %id, "Request sent");

        let outcome = match deadline {
            None => (&mut rx).await,
            Some(limit) => match timeout(limit, &mut rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    if guard.take().is_some() {
                        debug!(request_id = %id, timeout_ms = limit.as_millis() as u64, "Request timed out");
                        return Err(Error::request_timeout(id, limit.as_millis() as u64));
                    }
                    // Settled while the deadline fired; that result stands
                    rx.await
                }
            },
        };

        drop(guard);
        outcome.unwrap_or(Err(Error::Aborted))
    }

    /// Returns the number of pending requests.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.table.lock().len()
    }
}

// ============================================================================
// Correlator - Routing
// ============================================================================

impl Correlator {
    /// Routes one inbound JSON object.
    pub fn route_incoming(&self, value: &Value) {
        let Some(message) = Message::from_value(value) else {
            trace!("Ignoring message that is not a response or update");
            return;
        };

        let id = message.id();
        if id.is_unsolicited() {
            self.dispatch_notification(&message);
            return;
        }

        let Some((ticket, resolve_if)) = self.inner.table.lock().matcher(id) else {
            debug!(request_id = %id, "Message for unknown request");
            return;
        };

        // Predicate runs without the table lock held
        let matched = resolve_if.as_ref().is_none_or(|predicate| predicate(&message));

        if matched {
            let entry = self.inner.table.lock().take(id, ticket);
            if let Some(entry) = entry {
                trace!(
                    request_id = %id,
                    command = %entry.command,
                    elapsed_ms = entry.created_at.elapsed().as_millis() as u64,
                    "Request settled"
                );
                entry.settle(Ok(message.clone()));
            }
        } else {
            trace!(request_id = %id, "Message did not satisfy resolve_if");
        }

        self.inner.events.update.emit(&message);
        if let Some(device) = message.discovered_device() {
            self.inner.events.device_discovered.emit(&device);
        }
    }

    /// Publishes an unsolicited message.
    fn dispatch_notification(&self, message: &Message) {
        let Message::Update(update) = message else {
            debug!("Ignoring unsolicited response");
            return;
        };

        trace!(update = %update.update, "Notification received");
        self.inner.events.notification.emit(update);

        match update.parse() {
            ParsedUpdate::CharacteristicChanged(change) => {
                self.inner.events.characteristic_changed.emit(&change);
            }
            ParsedUpdate::ScanResult(device) => {
                self.inner.events.device_discovered.emit(&device);
            }
            ParsedUpdate::Other { .. } => {}
        }
    }
}

// ============================================================================
// Correlator - Lifecycle
// ============================================================================

impl Correlator {
    /// Rejects every pending request with [`Error::Aborted`] and restarts ids.
    ///
    /// Called on transport teardown.
    pub fn abort_all(&self) {
        let entries = {
            let mut table = self.inner.table.lock();
            table.reset_counter();
            table.drain()
        };

        if !entries.is_empty() {
            debug!(count = entries.len(), "Aborting pending requests");
        }
        for entry in entries {
            entry.settle(Err(Error::Aborted));
        }
    }

    /// Rejects every pending request with [`Error::ConnectionClosed`].
    ///
    /// Called when the connection drops.
    pub fn fail_all_closed(&self) {
        let entries = self.inner.table.lock().drain();

        if !entries.is_empty() {
            debug!(count = entries.len(), "Failing pending requests on disconnect");
        }
        for entry in entries {
            entry.settle(Err(Error::ConnectionClosed));
        }
    }
}

// ============================================================================
// Correlator - Subscriptions
// ============================================================================

impl Correlator {
    /// Called with every message routed to a pending request, matched or not.
    pub fn on_update<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.inner.events.update.subscribe(callback)
    }

    /// Called with every unsolicited update.
    pub fn on_notification<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Update) + Send + Sync + 'static,
    {
        self.inner.events.notification.subscribe(callback)
    }

    /// Called with every unsolicited characteristic change.
    pub fn on_characteristic_changed<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&CharacteristicChange) + Send + Sync + 'static,
    {
        self.inner.events.characteristic_changed.subscribe(callback)
    }

    /// Called with every device named by a scan result.
    pub fn on_device_discovered<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&DiscoveredDevice) + Send + Sync + 'static,
    {
        self.inner.events.device_discovered.subscribe(callback)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, Ordering};

    use serde_json::json;
    use tokio::task::{JoinHandle, yield_now};

    use crate::identifiers::RequestId;

    /// Sender that records payloads instead of writing them.
    struct RecordingSender {
        connected: AtomicBool,
        sent: Mutex<Vec<Value>>,
    }

    impl RecordingSender {
        fn new(connected: bool) -> Arc<Self> {
            Arc::new(Self {
                connected: AtomicBool::new(connected),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent_ids(&self) -> Vec<u64> {
            self.sent
                .lock()
                .iter()
                .filter_map(|v| v.get("id").and_then(Value::as_u64))
                .collect()
        }
    }

    impl WireSender for RecordingSender {
        fn send(&self, payload: &Value) -> Result<()> {
            if !self.connected.load(Ordering::SeqCst) {
                return Err(Error::NotConnected);
            }
            self.sent.lock().push(payload.clone());
            Ok(())
        }
    }

    fn setup() -> (Correlator, Arc<RecordingSender>) {
        let sender = RecordingSender::new(true);
        let correlator = Correlator::new(Arc::clone(&sender) as Arc<dyn WireSender>);
        (correlator, sender)
    }

    fn spawn_request(
        correlator: &Correlator,
        request: Request,
        options: RequestOptions,
    ) -> JoinHandle<Result<Option<Message>>> {
        let correlator = correlator.clone();
        tokio::spawn(async move { correlator.issue_request(request, options).await })
    }

    async fn wait_sent(sender: &RecordingSender, count: usize) {
        while sender.sent.lock().len() < count {
            yield_now().await;
        }
    }

    fn response(id: u64, results: Value) -> Value {
        json!({ "id": id, "type": "RESP", "error": null, "results": results })
    }

    #[tokio::test]
    async fn test_request_settles_on_response() {
        let (correlator, sender) = setup();

        let task = spawn_request(&correlator, Request::new("gatt.read"), RequestOptions::new());
        wait_sent(&sender, 1).await;

        let sent = sender.sent.lock()[0].clone();
        assert_eq!(sent["type"], "REQ");
        assert_eq!(sent["command"], "gatt.read");
        assert_eq!(correlator.pending_count(), 1);

        correlator.route_incoming(&response(1, json!({ "value": "5a" })));

        let message = task.await.expect("join").expect("ok").expect("some");
        assert_eq!(message.get_str("value"), Some("5a"));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_out_of_order_responses() {
        let (correlator, sender) = setup();

        let a = spawn_request(&correlator, Request::new("a"), RequestOptions::new());
        wait_sent(&sender, 1).await;
        let b = spawn_request(&correlator, Request::new("b"), RequestOptions::new());
        wait_sent(&sender, 2).await;
        assert_eq!(sender.sent_ids(), vec![1, 2]);

        correlator.route_incoming(&response(2, json!({ "who": "b" })));
        let b_result = b.await.expect("join").expect("ok").expect("some");
        assert_eq!(b_result.get_str("who"), Some("b"));
        assert!(!a.is_finished());
        assert_eq!(correlator.pending_count(), 1);

        correlator.route_incoming(&response(1, json!({ "who": "a" })));
        let a_result = a.await.expect("join").expect("ok").expect("some");
        assert_eq!(a_result.get_str("who"), Some("a"));
    }

    #[tokio::test]
    async fn test_resolve_if_waits_for_matching_message() {
        let (correlator, sender) = setup();

        let observed = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&observed);
        let _sub = correlator.on_update(move |m: &Message| {
            log.lock().push(m.get_str("name").map(str::to_string));
        });

        let options =
            RequestOptions::new().with_resolve_if(|m| m.get_str("name") == Some("thermo"));
        let task = spawn_request(&correlator, Request::new("scan.find"), options);
        wait_sent(&sender, 1).await;

        correlator.route_incoming(&json!({
            "id": 1, "type": "UPDATE", "update": "scanResult",
            "results": { "address": "11:11", "name": "lamp" }
        }));
        yield_now().await;
        assert!(!task.is_finished());
        assert_eq!(correlator.pending_count(), 1);

        correlator.route_incoming(&json!({
            "id": 1, "type": "UPDATE", "update": "scanResult",
            "results": { "address": "22:22", "name": "thermo" }
        }));

        let message = task.await.expect("join").expect("ok").expect("some");
        assert_eq!(message.get_str("address"), Some("22:22"));
        assert_eq!(correlator.pending_count(), 0);

        // Non-matching message was still fanned out
        assert_eq!(
            *observed.lock(),
            vec![Some("lamp".to_string()), Some("thermo".to_string())]
        );
    }

    #[tokio::test]
    async fn test_scan_result_emits_device_discovered() {
        let (correlator, sender) = setup();

        let devices = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&devices);
        let _sub = correlator.on_device_discovered(move |d: &DiscoveredDevice| {
            log.lock().push(d.address.clone());
        });

        let options = RequestOptions::new().with_resolve_if(|m| m.as_response().is_some());
        let task = spawn_request(&correlator, Request::new("scan.start"), options);
        wait_sent(&sender, 1).await;

        correlator.route_incoming(&json!({
            "id": 1, "type": "UPDATE", "update": "scanResult",
            "results": { "address": "aa:bb", "rssi": -40 }
        }));
        correlator.route_incoming(&response(1, json!({})));

        task.await.expect("join").expect("ok");
        assert_eq!(*devices.lock(), vec!["aa:bb".to_string()]);
    }

    #[tokio::test]
    async fn test_response_with_address_is_not_a_discovery() {
        let (correlator, sender) = setup();

        let found = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&found);
        let _sub = correlator.on_device_discovered(move |d: &DiscoveredDevice| {
            log.lock().push(d.address.clone());
        });

        let request = Request::new("gatt.read").param("address", "aa:bb");
        let task = spawn_request(&correlator, request, RequestOptions::new());
        wait_sent(&sender, 1).await;

        correlator.route_incoming(&response(
            1,
            json!({ "address": "aa:bb", "characteristic": "2a19", "value": "5a" }),
        ));

        let message = task.await.expect("join").expect("ok").expect("some");
        assert_eq!(message.get_str("value"), Some("5a"));
        assert!(found.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_settles_and_removes_entry() {
        let (correlator, _sender) = setup();

        let start = tokio::time::Instant::now();
        let err = correlator
            .issue_request(
                Request::new("gatt.read"),
                RequestOptions::new().with_timeout(Duration::from_millis(100)),
            )
            .await
            .expect_err("must time out");

        assert!(matches!(err, Error::RequestTimeout { timeout_ms: 100, .. }));
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_response_after_timeout_is_dropped() {
        let (correlator, _sender) = setup();

        let updates = Arc::new(Mutex::new(0usize));
        let count = Arc::clone(&updates);
        let _sub = correlator.on_update(move |_| *count.lock() += 1);

        let _ = correlator
            .issue_request(
                Request::new("slow"),
                RequestOptions::new().with_timeout(Duration::from_millis(100)),
            )
            .await;

        correlator.route_incoming(&response(1, json!({})));
        assert_eq!(*updates.lock(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_swallows_failure() {
        let (correlator, _sender) = setup();

        let result = correlator
            .issue_request(
                Request::new("led.off"),
                RequestOptions::new()
                    .with_timeout(Duration::from_millis(50))
                    .with_quiet(),
            )
            .await;

        assert!(matches!(result, Ok(None)));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_not_connected_fails_immediately() {
        let sender = RecordingSender::new(false);
        let correlator = Correlator::new(sender as Arc<dyn WireSender>);

        let err = correlator
            .issue_request(Request::new("gatt.read"), RequestOptions::new())
            .await
            .expect_err("not connected");

        assert!(matches!(err, Error::NotConnected));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_abort_all_rejects_and_resets_ids() {
        let (correlator, sender) = setup();

        let a = spawn_request(&correlator, Request::new("a"), RequestOptions::new());
        let b = spawn_request(&correlator, Request::new("b"), RequestOptions::new());
        wait_sent(&sender, 2).await;

        correlator.abort_all();
        correlator.abort_all();

        assert!(matches!(a.await.expect("join"), Err(Error::Aborted)));
        assert!(matches!(b.await.expect("join"), Err(Error::Aborted)));
        assert_eq!(correlator.pending_count(), 0);

        let _c = spawn_request(&correlator, Request::new("c"), RequestOptions::new());
        wait_sent(&sender, 3).await;
        assert_eq!(sender.sent_ids()[2], 1);
    }

    #[tokio::test]
    async fn test_fail_all_closed() {
        let (correlator, sender) = setup();

        let task = spawn_request(&correlator, Request::new("a"), RequestOptions::new());
        wait_sent(&sender, 1).await;

        correlator.fail_all_closed();
        assert!(matches!(
            task.await.expect("join"),
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_settled_request_ignores_later_abort() {
        let (correlator, sender) = setup();

        let task = spawn_request(&correlator, Request::new("a"), RequestOptions::new());
        wait_sent(&sender, 1).await;

        correlator.route_incoming(&response(1, json!({ "ok": true })));
        correlator.abort_all();

        let message = task.await.expect("join").expect("ok").expect("some");
        assert!(message.get_bool("ok"));
    }

    #[tokio::test]
    async fn test_unsolicited_update_never_settles() {
        let (correlator, sender) = setup();

        let notifications = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&notifications);
        let _n = correlator.on_notification(move |u: &Update| log.lock().push(u.update.clone()));

        let changes = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&changes);
        let _c = correlator
            .on_characteristic_changed(move |c: &CharacteristicChange| log.lock().push(c.value.clone()));

        let task = spawn_request(&correlator, Request::new("gatt.subscribe"), RequestOptions::new());
        wait_sent(&sender, 1).await;

        correlator.route_incoming(&json!({
            "id": 0, "type": "UPDATE", "update": "characteristicChanged",
            "results": { "address": "aa", "service": "180f", "characteristic": "2a19", "value": "64" }
        }));
        yield_now().await;

        assert!(!task.is_finished());
        assert_eq!(correlator.pending_count(), 1);
        assert!(!correlator.inner.table.lock().contains(RequestId::UNSOLICITED));
        assert_eq!(*notifications.lock(), vec!["characteristicChanged".to_string()]);
        assert_eq!(*changes.lock(), vec!["64".to_string()]);

        correlator.abort_all();
        let _ = task.await;
    }

    #[tokio::test]
    async fn test_unknown_and_foreign_messages_are_dropped() {
        let (correlator, _sender) = setup();

        let updates = Arc::new(Mutex::new(0usize));
        let count = Arc::clone(&updates);
        let _sub = correlator.on_update(move |_| *count.lock() += 1);

        correlator.route_incoming(&response(77, json!({})));
        correlator.route_incoming(&json!({ "id": 1, "type": "REQ", "command": "x" }));
        correlator.route_incoming(&json!({ "hello": "world" }));

        assert_eq!(*updates.lock(), 0);
    }

    #[tokio::test]
    async fn test_dropped_caller_removes_entry() {
        let (correlator, sender) = setup();

        let task = spawn_request(&correlator, Request::new("a"), RequestOptions::new());
        wait_sent(&sender, 1).await;
        assert_eq!(correlator.pending_count(), 1);

        task.abort();
        let _ = task.await;
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let sender = RecordingSender::new(true);
        let correlator =
            Correlator::with_options(Arc::clone(&sender) as Arc<dyn WireSender>, None, 1);

        let _first = spawn_request(&correlator, Request::new("a"), RequestOptions::new());
        wait_sent(&sender, 1).await;

        let err = correlator
            .issue_request(Request::new("b"), RequestOptions::new())
            .await
            .expect_err("over capacity");
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_gateway_error_settles_as_message() {
        let (correlator, sender) = setup();

        let task = spawn_request(&correlator, Request::new("gatt.write"), RequestOptions::new());
        wait_sent(&sender, 1).await;

        correlator.route_incoming(&json!({
            "id": 1, "type": "RESP",
            "error": { "eid": 3, "errmsg": "write not permitted" },
            "results": {}
        }));

        let message = task.await.expect("join").expect("ok").expect("some");
        let err = message.into_result().expect_err("gateway error");
        assert!(matches!(err, Error::Remote { eid: 3, .. }));
    }
}
