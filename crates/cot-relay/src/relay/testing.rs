//! In-memory broker channel and broadcast fakes for tests.

use crate::broker::supervisor::{BrokerConnector, DeliveryStream};
use cot_core::{Broadcast, BoxFuture, BrokerChannel, Delivery, RelayError, RelayResult};
use futures_util::stream;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct BrokerState {
    bindings: Vec<(String, String)>,
    /// (channel id, consumer tag) pairs currently registered.
    consumers: HashSet<(u64, String)>,
}

/// Broker that tracks bindings and active consumers across channels.
pub(crate) struct FakeBroker {
    state: Mutex<BrokerState>,
    next_channel: AtomicU64,
    fail_binds: AtomicBool,
}

impl FakeBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BrokerState::default()),
            next_channel: AtomicU64::new(1),
            fail_binds: AtomicBool::new(false),
        })
    }

    pub fn open_channel(self: &Arc<Self>) -> Arc<FakeChannel> {
        Arc::new(FakeChannel {
            id: self.next_channel.fetch_add(1, Ordering::SeqCst),
            open: AtomicBool::new(true),
            broker: Arc::clone(self),
        })
    }

    pub fn fail_binds(&self, fail: bool) {
        self.fail_binds.store(fail, Ordering::SeqCst);
    }

    pub fn bindings(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().bindings.clone()
    }

    pub fn active_consumers(&self) -> usize {
        self.state.lock().unwrap().consumers.len()
    }
}

/// Channel on a [`FakeBroker`]. Closing it drops its consumers, as a real
/// broker does when a channel goes away.
pub(crate) struct FakeChannel {
    id: u64,
    open: AtomicBool,
    broker: Arc<FakeBroker>,
}

impl FakeChannel {
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        let mut state = self.broker.state.lock().unwrap();
        state.consumers.retain(|(channel, _)| *channel != self.id);
    }

    fn ensure_open(&self) -> RelayResult<()> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RelayError::Broker("channel closed".into()))
        }
    }
}

impl BrokerChannel for FakeChannel {
    fn queue_bind<'a>(&'a self, queue: &'a str, exchange: &'a str) -> BoxFuture<'a, RelayResult<()>> {
        Box::pin(async move {
            self.ensure_open()?;
            if self.broker.fail_binds.load(Ordering::SeqCst) {
                return Err(RelayError::Bind(format!("no exchange '{exchange}'")));
            }
            let mut state = self.broker.state.lock().unwrap();
            state.bindings.push((queue.to_string(), exchange.to_string()));
            Ok(())
        })
    }

    fn basic_consume<'a>(
        &'a self,
        _queue: &'a str,
        consumer_tag: &'a str,
        _auto_ack: bool,
    ) -> BoxFuture<'a, RelayResult<String>> {
        Box::pin(async move {
            self.ensure_open()?;
            let mut state = self.broker.state.lock().unwrap();
            if !state.consumers.insert((self.id, consumer_tag.to_string())) {
                return Err(RelayError::Consume(format!(
                    "attempt to reuse consumer tag '{consumer_tag}'"
                )));
            }
            Ok(consumer_tag.to_string())
        })
    }

    fn basic_cancel<'a>(&'a self, consumer_tag: &'a str) -> BoxFuture<'a, RelayResult<()>> {
        Box::pin(async move {
            self.ensure_open()?;
            let mut state = self.broker.state.lock().unwrap();
            state.consumers.remove(&(self.id, consumer_tag.to_string()));
            Ok(())
        })
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Records every emission as `(event, payload, room)`.
#[derive(Default)]
pub(crate) struct RecordingBroadcast {
    emitted: Mutex<Vec<(String, String, String)>>,
    fail: AtomicBool,
}

impl RecordingBroadcast {
    pub fn emitted(&self) -> Vec<(String, String, String)> {
        self.emitted.lock().unwrap().clone()
    }

    pub fn fail_emits(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl Broadcast for RecordingBroadcast {
    fn emit(&self, event: &str, payload: &str, room: &str) -> RelayResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RelayError::Broadcast("transport down".into()));
        }
        self.emitted
            .lock()
            .unwrap()
            .push((event.to_string(), payload.to_string(), room.to_string()));
        Ok(())
    }
}

/// What the next connect attempt of a [`FakeConnector`] does.
pub(crate) enum Script {
    /// Connection refused.
    Refuse,
    /// Connect, deliver these payloads, then close the consumer stream.
    Deliver(Vec<Vec<u8>>),
}

/// Connector that plays back a script of sessions against a [`FakeBroker`].
/// Once the script runs out every attempt is refused.
pub(crate) struct FakeConnector {
    broker: Arc<FakeBroker>,
    scripts: VecDeque<Script>,
    current: Option<Arc<FakeChannel>>,
    payloads: Vec<Vec<u8>>,
    opened: Arc<AtomicUsize>,
}

impl FakeConnector {
    pub fn new(broker: Arc<FakeBroker>, scripts: Vec<Script>) -> Self {
        Self {
            broker,
            scripts: scripts.into(),
            current: None,
            payloads: Vec::new(),
            opened: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Counter of successful connects.
    pub fn opened(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.opened)
    }
}

impl BrokerConnector for FakeConnector {
    type Channel = FakeChannel;

    fn describe(&self) -> String {
        "fake-broker:5672".to_string()
    }

    fn connect<'a>(&'a mut self) -> BoxFuture<'a, RelayResult<Arc<FakeChannel>>> {
        Box::pin(async move {
            // The previous connection is gone by the time we reconnect.
            if let Some(previous) = self.current.take() {
                previous.close();
            }
            match self.scripts.pop_front() {
                Some(Script::Deliver(payloads)) => {
                    let channel = self.broker.open_channel();
                    self.current = Some(Arc::clone(&channel));
                    self.payloads = payloads;
                    self.opened.fetch_add(1, Ordering::SeqCst);
                    Ok(channel)
                }
                Some(Script::Refuse) | None => {
                    Err(RelayError::Broker("connection refused".into()))
                }
            }
        })
    }

    fn deliveries(&mut self, _channel: &FakeChannel) -> RelayResult<DeliveryStream> {
        let deliveries: Vec<RelayResult<Delivery>> = std::mem::take(&mut self.payloads)
            .into_iter()
            .enumerate()
            .map(|(i, payload)| Ok(Delivery::new(i as u64 + 1, payload)))
            .collect();
        Ok(Box::pin(stream::iter(deliveries)))
    }

    fn close<'a>(&'a mut self, channel: &'a FakeChannel) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            channel.close();
            self.current = None;
        })
    }
}
