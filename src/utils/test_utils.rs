use std::{
    cell::RefCell,
    collections::VecDeque,
    future::Future,
    rc::{Rc, Weak},
    time::Duration,
};

use bytes::Bytes;
use tokio::{sync::Notify, task::LocalSet};

use crate::{
    error::DisconnectReason,
    request::ConnectRequest,
    response::ConnectResponse,
    socket::{LegRole, SocketDelegate, Tag},
};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);
const QUIET_PERIOD: Duration = Duration::from_millis(50);

/// Runs `future` to completion on a fresh current-thread runtime inside a [`LocalSet`].
pub fn run_local<F: Future>(future: F) -> F::Output {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to start Tokio runtime");

    LocalSet::new().block_on(&runtime, future)
}

/// A leg event as seen by a [`RecordingDelegate`]. Disconnect reasons are kept as their display
/// string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Request(LegRole, ConnectRequest),
    Connected(LegRole),
    Response(LegRole, ConnectResponse),
    Ready(LegRole),
    Read(LegRole, Vec<u8>, Tag),
    Wrote(LegRole, Tag),
    Disconnected(LegRole, String),
}

/// A [`SocketDelegate`] that queues up every event it receives.
#[derive(Default)]
pub struct RecordingDelegate {
    events: RefCell<VecDeque<Event>>,
    notify: Notify,
}

impl RecordingDelegate {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn as_weak(self: &Rc<Self>) -> Weak<dyn SocketDelegate> {
        let weak: Weak<Self> = Rc::downgrade(self);
        weak
    }

    fn push(&self, event: Event) {
        self.events.borrow_mut().push_back(event);
        self.notify.notify_one();
    }
}

impl SocketDelegate for RecordingDelegate {
    fn did_receive_request(&self, role: LegRole, request: ConnectRequest) {
        self.push(Event::Request(role, request));
    }

    fn did_connect(&self, role: LegRole) {
        self.push(Event::Connected(role));
    }

    fn did_receive_response(&self, role: LegRole, response: ConnectResponse) {
        self.push(Event::Response(role, response));
    }

    fn ready_to_forward(&self, role: LegRole) {
        self.push(Event::Ready(role));
    }

    fn did_read_data(&self, role: LegRole, data: Bytes, tag: Tag) {
        self.push(Event::Read(role, data.to_vec(), tag));
    }

    fn did_write_data(&self, role: LegRole, tag: Tag) {
        self.push(Event::Wrote(role, tag));
    }

    fn did_disconnect(&self, role: LegRole, reason: DisconnectReason) {
        self.push(Event::Disconnected(role, reason.to_string()));
    }
}

/// Waits for the next event, panicking if none arrives in time.
pub async fn next_event(delegate: &RecordingDelegate) -> Event {
    let wait = async {
        loop {
            if let Some(event) = delegate.events.borrow_mut().pop_front() {
                return event;
            }

            delegate.notify.notified().await;
        }
    };

    tokio::time::timeout(EVENT_TIMEOUT, wait)
        .await
        .expect("Timed out waiting for a leg event")
}

/// Lets pending tasks run for a while, then checks no event was delivered.
pub async fn assert_no_event(delegate: &RecordingDelegate) {
    tokio::time::sleep(QUIET_PERIOD).await;
    let events = delegate.events.borrow();
    assert!(events.is_empty(), "Expected no events, got {events:?}");
}
