//! Scripted transport for exercising the poller without hardware.
//!
//! Every peripheral identity gets a [`MockBehavior`] describing which step of
//! the GATT setup fails, if any. Clones of a [`MockTransport`] share state, so
//! a test can keep one copy for inspection after moving another into a
//! [`BatteryCoordinator`](crate::coordinator::BatteryCoordinator).

use crate::error::TransportError;
use crate::transport::{Characteristic, NotifyHandle, Service, Transport};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// How a mocked battery reacts to the setup sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockBehavior {
    pub connects: bool,
    /// Radio link comes up but GATT discovery fails, leaving it connected.
    pub discovers: bool,
    pub has_service: bool,
    pub has_characteristic: bool,
    pub can_notify: bool,
    pub subscribes: bool,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            connects: true,
            discovers: true,
            has_service: true,
            has_characteristic: true,
            can_notify: true,
            subscribes: true,
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    behaviors: HashMap<String, MockBehavior>,
    connected: Option<String>,
    next_handle: u16,
    subscription: Option<NotifyHandle>,
    connect_log: Vec<String>,
    disconnects: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

fn lock(state: &Arc<Mutex<MockState>>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the behavior of one identity. Unknown identities behave like
    /// [`MockBehavior::default`].
    pub fn set_behavior(&self, identity: &str, behavior: MockBehavior) {
        lock(&self.state)
            .behaviors
            .insert(identity.to_string(), behavior);
    }

    /// Identity of the currently connected peripheral.
    pub fn connected(&self) -> Option<String> {
        lock(&self.state).connected.clone()
    }

    /// Handle of the last successful subscription, cleared on disconnect.
    pub fn subscription(&self) -> Option<NotifyHandle> {
        lock(&self.state).subscription
    }

    /// Every identity a connection was attempted to, in order.
    pub fn connect_log(&self) -> Vec<String> {
        lock(&self.state).connect_log.clone()
    }

    pub fn disconnects(&self) -> usize {
        lock(&self.state).disconnects
    }

    /// Simulate the peripheral going away without a disconnect request.
    pub fn drop_link(&self) {
        let mut state = lock(&self.state);
        state.connected = None;
        state.subscription = None;
    }

    fn behavior(&self) -> MockBehavior {
        let state = lock(&self.state);
        state
            .connected
            .as_ref()
            .and_then(|identity| state.behaviors.get(identity).copied())
            .unwrap_or_default()
    }
}

pub struct MockService {
    state: Arc<Mutex<MockState>>,
    behavior: MockBehavior,
}

pub struct MockCharacteristic {
    state: Arc<Mutex<MockState>>,
    behavior: MockBehavior,
}

impl Transport for MockTransport {
    type Service = MockService;

    fn connect(&mut self, identity: &str) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        state.connect_log.push(identity.to_string());
        let behavior = state.behaviors.get(identity).copied().unwrap_or_default();
        if !behavior.connects {
            return Err(TransportError::Connect {
                identity: identity.to_string(),
                reason: "peripheral did not answer".to_string(),
            });
        }
        state.connected = Some(identity.to_string());
        if !behavior.discovers {
            return Err(TransportError::Connect {
                identity: identity.to_string(),
                reason: "service discovery failed".to_string(),
            });
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        let mut state = lock(&self.state);
        state.disconnects += 1;
        state.connected = None;
        state.subscription = None;
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).connected.is_some()
    }

    fn service(&mut self, _uuid16: u16) -> Option<MockService> {
        let behavior = self.behavior();
        behavior.has_service.then(|| MockService {
            state: self.state.clone(),
            behavior,
        })
    }
}

impl Service for MockService {
    type Characteristic = MockCharacteristic;

    fn characteristic(&self, _uuid16: u16) -> Option<MockCharacteristic> {
        self.behavior
            .has_characteristic
            .then(|| MockCharacteristic {
                state: self.state.clone(),
                behavior: self.behavior,
            })
    }
}

impl Characteristic for MockCharacteristic {
    fn can_notify(&self) -> bool {
        self.behavior.can_notify
    }

    fn subscribe(&mut self) -> Result<NotifyHandle, TransportError> {
        if !self.behavior.subscribes {
            return Err(TransportError::Subscribe("CCCD write rejected".to_string()));
        }
        let mut state = lock(&self.state);
        state.next_handle = state.next_handle.wrapping_add(1);
        let handle = NotifyHandle(state.next_handle);
        state.subscription = Some(handle);
        Ok(handle)
    }
}
