//! One poll attempt against one battery.

use crate::error::TransportError;
use crate::protocol::{CHARACTERISTIC_UUID16, SERVICE_UUID16};
use crate::transport::{Characteristic, NotifyHandle, Service, Transport};

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A frame was received; the battery waits for the next queue cycle.
    Success,
    /// Setup failed or the frame was lost; the battery goes back to the queue tail.
    Requeue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    DiscoveringService,
    DiscoveringCharacteristic,
    Subscribing,
    AwaitingFrame,
    Closing(Outcome),
}

/// Connection to the battery at registry position `index`.
///
/// [`ConnectionSession::begin`] runs connect, discovery and subscription to
/// completion. The session then either waits for a frame or is already
/// closing with [`Outcome::Requeue`].
#[derive(Debug)]
pub struct ConnectionSession {
    index: usize,
    state: SessionState,
    handle: Option<NotifyHandle>,
}

impl ConnectionSession {
    pub fn begin<T: Transport>(transport: &mut T, index: usize, identity: &str) -> Self {
        let mut session = Self {
            index,
            state: SessionState::Idle,
            handle: None,
        };
        session.transition(SessionState::Connecting);

        match session.open(transport, identity) {
            Ok(handle) => {
                session.handle = Some(handle);
                session.transition(SessionState::AwaitingFrame);
            }
            Err(err) => {
                log::warn!("FAILURE polling {identity}: {err}, requeuing");
                session.close(transport, Outcome::Requeue);
            }
        }
        session
    }

    fn open<T: Transport>(
        &mut self,
        transport: &mut T,
        identity: &str,
    ) -> Result<NotifyHandle, TransportError> {
        transport.connect(identity)?;

        self.transition(SessionState::DiscoveringService);
        let service = transport
            .service(SERVICE_UUID16)
            .ok_or(TransportError::ServiceNotFound(SERVICE_UUID16))?;

        self.transition(SessionState::DiscoveringCharacteristic);
        let mut characteristic = service
            .characteristic(CHARACTERISTIC_UUID16)
            .ok_or(TransportError::CharacteristicNotFound(CHARACTERISTIC_UUID16))?;
        if !characteristic.can_notify() {
            return Err(TransportError::CannotNotify(CHARACTERISTIC_UUID16));
        }

        self.transition(SessionState::Subscribing);
        characteristic.subscribe()
    }

    fn transition(&mut self, next: SessionState) {
        log::debug!(
            "Session #{}: {:?} -> {:?}",
            self.index,
            self.state,
            next
        );
        self.state = next;
    }

    /// Enter `Closing`, dropping the link if it is still up.
    pub fn close<T: Transport>(&mut self, transport: &mut T, outcome: Outcome) {
        if matches!(self.state, SessionState::Closing(_)) {
            return;
        }
        self.transition(SessionState::Closing(outcome));
        if transport.is_connected() {
            transport.disconnect();
        }
    }

    /// Finish `Closing -> Idle`, handing back the outcome.
    pub fn finish(mut self) -> Outcome {
        let outcome = match self.state {
            SessionState::Closing(outcome) => outcome,
            _ => Outcome::Requeue,
        };
        self.handle = None;
        self.transition(SessionState::Idle);
        outcome
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn handle(&self) -> Option<NotifyHandle> {
        self.handle
    }

    pub fn is_awaiting_frame(&self) -> bool {
        self.state == SessionState::AwaitingFrame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBehavior, MockTransport};

    fn failing(identity: &str, behavior: MockBehavior) -> (MockTransport, ConnectionSession) {
        let mut transport = MockTransport::new();
        transport.set_behavior(identity, behavior);
        let session = ConnectionSession::begin(&mut transport, 0, identity);
        (transport, session)
    }

    #[test]
    fn happy_path_awaits_frame() {
        let mut transport = MockTransport::new();
        let session = ConnectionSession::begin(&mut transport, 3, "pack");
        assert_eq!(session.state(), SessionState::AwaitingFrame);
        assert_eq!(session.index(), 3);
        assert_eq!(session.handle(), transport.subscription());
        assert_eq!(transport.connected().as_deref(), Some("pack"));
    }

    #[test]
    fn connect_failure_requeues_without_disconnect() {
        let (transport, session) = failing(
            "pack",
            MockBehavior {
                connects: false,
                ..Default::default()
            },
        );
        assert_eq!(session.state(), SessionState::Closing(Outcome::Requeue));
        assert_eq!(transport.disconnects(), 0);
        assert_eq!(session.finish(), Outcome::Requeue);
    }

    #[test]
    fn discovery_failure_tears_down_open_link() {
        let (transport, session) = failing(
            "pack",
            MockBehavior {
                discovers: false,
                ..Default::default()
            },
        );
        assert_eq!(session.state(), SessionState::Closing(Outcome::Requeue));
        assert_eq!(transport.disconnects(), 1);
        assert!(transport.connected().is_none());
    }

    #[test]
    fn missing_service_requeues_and_disconnects() {
        let (transport, session) = failing(
            "pack",
            MockBehavior {
                has_service: false,
                ..Default::default()
            },
        );
        assert_eq!(session.state(), SessionState::Closing(Outcome::Requeue));
        assert_eq!(transport.disconnects(), 1);
        assert!(transport.connected().is_none());
    }

    #[test]
    fn characteristic_failures_requeue() {
        for behavior in [
            MockBehavior {
                has_characteristic: false,
                ..Default::default()
            },
            MockBehavior {
                can_notify: false,
                ..Default::default()
            },
            MockBehavior {
                subscribes: false,
                ..Default::default()
            },
        ] {
            let (transport, session) = failing("pack", behavior);
            assert_eq!(session.state(), SessionState::Closing(Outcome::Requeue));
            assert!(session.handle().is_none());
            assert_eq!(transport.disconnects(), 1);
        }
    }

    #[test]
    fn close_success_then_finish() {
        let mut transport = MockTransport::new();
        let mut session = ConnectionSession::begin(&mut transport, 0, "pack");
        session.close(&mut transport, Outcome::Success);
        // a second close does not change the outcome
        session.close(&mut transport, Outcome::Requeue);
        assert_eq!(session.state(), SessionState::Closing(Outcome::Success));
        assert_eq!(transport.disconnects(), 1);
        assert_eq!(session.finish(), Outcome::Success);
    }
}
