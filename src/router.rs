//! Inbound message routing.
//!
//! Classifies decoded payloads and dispatches them: events and peer
//! requests go to subscriber slots, responses to the correlator.

use crate::correlator::RequestCorrelator;
use crate::error::TransportError;
use crate::protocol::{Event, ProtocolMessage, Request};

/// Handler for events arriving from the peer.
pub type EventHandler = Box<dyn Fn(Event) + Send + Sync>;
/// Handler for requests initiated by the peer.
pub type RequestHandler = Box<dyn Fn(Request) + Send + Sync>;
/// Handler for recoverable transport errors.
pub type ErrorHandler = Box<dyn Fn(TransportError) + Send + Sync>;

/// Routes decoded messages to the right consumer.
///
/// Each message class has a single subscriber slot; registering a new
/// handler silently replaces the previous one. There is no handler
/// chaining. A message with no subscriber is dropped quietly.
#[derive(Default)]
pub struct MessageRouter {
    on_event: Option<EventHandler>,
    on_request: Option<RequestHandler>,
    on_error: Option<ErrorHandler>,
}

impl MessageRouter {
    /// Create a router with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the event subscriber.
    pub fn set_event_handler(&mut self, handler: EventHandler) {
        self.on_event = Some(handler);
    }

    /// Replace the peer-request subscriber.
    pub fn set_request_handler(&mut self, handler: RequestHandler) {
        self.on_request = Some(handler);
    }

    /// Replace the error subscriber.
    pub fn set_error_handler(&mut self, handler: ErrorHandler) {
        self.on_error = Some(handler);
    }

    /// Route one decoded message.
    ///
    /// Responses go to the correlator; an unmatched response is surfaced
    /// through the error subscriber and the connection stays usable. Events
    /// and responses may interleave in any pattern.
    pub fn dispatch(&self, msg: ProtocolMessage, correlator: &mut RequestCorrelator) {
        match msg {
            ProtocolMessage::Event(event) => {
                tracing::debug!(event = %event.event, seq = event.seq, "event received");
                if let Some(handler) = &self.on_event {
                    handler(event);
                }
            }
            ProtocolMessage::Request(request) => {
                tracing::debug!(command = %request.command, seq = request.seq, "peer request received");
                if let Some(handler) = &self.on_request {
                    handler(request);
                }
            }
            ProtocolMessage::Response(response) => {
                tracing::debug!(
                    request_seq = response.request_seq,
                    success = response.success,
                    "response received"
                );
                if let Err(err) = correlator.resolve(response) {
                    tracing::warn!(%err, "dropping response");
                    self.report(err);
                }
            }
        }
    }

    /// Surface a recoverable error through the error subscriber, if any.
    pub fn report(&self, err: TransportError) {
        if let Some(handler) = &self.on_error {
            handler(err);
        }
    }
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRouter")
            .field("on_event", &self.on_event.is_some())
            .field("on_request", &self.on_request.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Response;
    use std::sync::{Arc, Mutex};

    fn event(name: &str) -> ProtocolMessage {
        ProtocolMessage::Event(Event {
            seq: 1,
            event: name.into(),
            body: None,
        })
    }

    #[test]
    fn router_event_to_subscriber() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let mut router = MessageRouter::new();
        router.set_event_handler(Box::new(move |evt| {
            seen_clone.lock().unwrap().push(evt.event);
        }));

        let mut correlator = RequestCorrelator::new();
        router.dispatch(event("stopped"), &mut correlator);

        assert_eq!(*seen.lock().unwrap(), vec!["stopped".to_string()]);
    }

    #[test]
    fn router_latest_handler_wins() {
        let first = Arc::new(Mutex::new(0u32));
        let second = Arc::new(Mutex::new(0u32));

        let mut router = MessageRouter::new();
        let first_clone = first.clone();
        router.set_event_handler(Box::new(move |_| {
            *first_clone.lock().unwrap() += 1;
        }));
        let second_clone = second.clone();
        router.set_event_handler(Box::new(move |_| {
            *second_clone.lock().unwrap() += 1;
        }));

        let mut correlator = RequestCorrelator::new();
        router.dispatch(event("output"), &mut correlator);

        // Registration replaced the earlier handler entirely.
        assert_eq!(*first.lock().unwrap(), 0);
        assert_eq!(*second.lock().unwrap(), 1);
    }

    #[test]
    fn router_peer_request_to_subscriber() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let mut router = MessageRouter::new();
        router.set_request_handler(Box::new(move |req| {
            seen_clone.lock().unwrap().push((req.seq, req.command));
        }));

        let mut correlator = RequestCorrelator::new();
        router.dispatch(
            ProtocolMessage::Request(Request {
                seq: 42,
                command: "runInTerminal".into(),
                arguments: None,
            }),
            &mut correlator,
        );

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(42, "runInTerminal".to_string())]
        );
    }

    #[tokio::test]
    async fn router_response_resolves_pending_request() {
        let router = MessageRouter::new();
        let mut correlator = RequestCorrelator::new();
        let rx = correlator.register(1, "evaluate");

        router.dispatch(
            ProtocolMessage::Response(Response {
                seq: 2,
                request_seq: 1,
                success: true,
                command: "evaluate".into(),
                message: None,
                body: Some(serde_json::json!({"result": "2"})),
            }),
            &mut correlator,
        );

        let resp = rx.await.unwrap().unwrap();
        assert_eq!(resp.body.unwrap()["result"], "2");
    }

    #[test]
    fn router_unmatched_response_reported() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let mut router = MessageRouter::new();
        router.set_error_handler(Box::new(move |err| {
            seen_clone.lock().unwrap().push(err.to_string());
        }));

        let mut correlator = RequestCorrelator::new();
        router.dispatch(
            ProtocolMessage::Response(Response {
                seq: 2,
                request_seq: 999,
                success: true,
                command: "evaluate".into(),
                message: None,
                body: None,
            }),
            &mut correlator,
        );

        let errors = seen.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("request_seq 999"));
    }

    #[test]
    fn router_no_subscribers_is_quiet() {
        let router = MessageRouter::new();
        let mut correlator = RequestCorrelator::new();
        router.dispatch(event("output"), &mut correlator);
        router.report(TransportError::Decode("junk".into()));
    }
}
