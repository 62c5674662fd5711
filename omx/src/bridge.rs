// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Translation of codec core callbacks into queued messages.
//!
//! Callbacks arrive on threads owned by the codec core. They only construct a
//! [`Message`], append it to the queue and wake every waiter. Interpreting the
//! messages is left to the component, which drains the queue under its own
//! lock before it looks at any shared state.

use std::{collections::VecDeque, time::Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error};

use crate::{ErrorCode, Hacks, State};

/// Token stored in `pAppPrivate` of every buffer header.
pub(crate) type BufferKey = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Message {
    StateReached(State),
    PortFlushed(u32),
    ErrorRaised(ErrorCode),
    PortEnabledChanged { port: u32, enabled: bool },
    PortSettingsChanged(u32),
    BufferReturned { key: BufferKey, emptied: bool },
}

/// Queue between codec core callbacks and the component that owns them.
///
/// One bridge exists per component. Its address is what the codec core gets as
/// application data, so it must stay alive until the component handle is freed.
pub struct EventBridge {
    queue: Mutex<VecDeque<Message>>,
    cond: Condvar,
    hacks: Hacks,
}

impl EventBridge {
    pub fn new(hacks: Hacks) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
            hacks,
        }
    }

    pub fn hacks(&self) -> Hacks {
        self.hacks
    }

    /// Handles an event notification of the codec core.
    ///
    /// Command completions, errors and settings changes are queued; every
    /// other event is ignored.
    pub fn on_event(&self, event: omx_sys::EventType, data1: u32, data2: u32) {
        match event {
            omx_sys::OMX_EventCmdComplete => match data1 {
                omx_sys::OMX_CommandStateSet => {
                    debug!("State change to {:?} finished", State::from_raw(data2));
                    self.send(Message::StateReached(State::from_raw(data2)));
                }
                omx_sys::OMX_CommandFlush => {
                    debug!("Port {} flushed", data2);
                    self.send(Message::PortFlushed(data2));
                }
                omx_sys::OMX_CommandPortEnable | omx_sys::OMX_CommandPortDisable => {
                    let enabled = data1 == omx_sys::OMX_CommandPortEnable;
                    debug!(
                        "Port {} {}",
                        data2,
                        if enabled { "enabled" } else { "disabled" }
                    );
                    self.send(Message::PortEnabledChanged {
                        port: data2,
                        enabled,
                    });
                }
                command => debug!("Command {} complete", command),
            },
            omx_sys::OMX_EventError => {
                let code = ErrorCode(data1);
                // Some cores report successful completion through the error event.
                if code.is_none() {
                    return;
                }
                error!("Got error: {}", code);
                self.send(Message::ErrorRaised(code));
            }
            omx_sys::OMX_EventPortSettingsChanged => {
                let mut port = if self
                    .hacks
                    .contains(Hacks::EVENT_PORT_SETTINGS_CHANGED_NDATA_PARAMETER_SWAP)
                {
                    data2
                } else {
                    data1
                };
                if port == 0
                    && self
                        .hacks
                        .contains(Hacks::EVENT_PORT_SETTINGS_CHANGED_PORT_0_TO_1)
                {
                    port = 1;
                }
                debug!("Settings changed (port index: {})", port);
                self.send(Message::PortSettingsChanged(port));
            }
            _ => {}
        }
    }

    /// Handles an input buffer returned by the codec core.
    ///
    /// `app_private` is the `pAppPrivate` field of the returned header.
    pub fn on_empty_buffer_done(&self, app_private: omx_sys::Ptr) {
        self.buffer_done(app_private, true);
    }

    /// Handles an output buffer returned by the codec core.
    pub fn on_fill_buffer_done(&self, app_private: omx_sys::Ptr) {
        self.buffer_done(app_private, false);
    }

    fn buffer_done(&self, app_private: omx_sys::Ptr, emptied: bool) {
        let key = app_private as BufferKey;
        if key == 0 {
            error!("Have unknown or deallocated buffer");
            return;
        }
        self.send(Message::BufferReturned { key, emptied });
    }

    fn send(&self, message: Message) {
        let mut queue = self.queue.lock();
        queue.push_back(message);
        self.cond.notify_all();
    }

    /// Wakes every thread blocked on the bridge without queueing anything.
    pub(crate) fn broadcast(&self) {
        let _queue = self.queue.lock();
        self.cond.notify_all();
    }

    pub(crate) fn take_all(&self) -> VecDeque<Message> {
        std::mem::take(&mut *self.queue.lock())
    }

    /// Discards every queued message.
    pub(crate) fn clear(&self) {
        self.queue.lock().clear();
    }

    pub(crate) fn lock_queue(&self) -> MutexGuard<'_, VecDeque<Message>> {
        self.queue.lock()
    }

    /// Blocks until something is queued or broadcast, or until `deadline`.
    ///
    /// Takes the queue guard so that callers can acquire it before releasing
    /// their own lock. Returns `false` only when the deadline passed.
    pub(crate) fn wait(
        &self,
        mut queue: MutexGuard<'_, VecDeque<Message>>,
        deadline: Option<Instant>,
    ) -> bool {
        if !queue.is_empty() {
            return true;
        }
        match deadline {
            Some(deadline) => !self.cond.wait_until(&mut queue, deadline).timed_out(),
            None => {
                self.cond.wait(&mut queue);
                true
            }
        }
    }
}
