use bytes::Bytes;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::topic::topic_matches;
use crate::transport::{Message, MessageHandler, QoS, Token, TokenCompleter, Transport};

enum Delivery {
    Publish { topic: String, payload: Bytes },
    Retained {
        topic: String,
        payload: Bytes,
        handler: MessageHandler,
    },
}

/// How many publishes and unsubscribes the broker remembers for inspection.
pub const RECORD_LIMIT: usize = 4096;

/// An in-process broker that implements [`Transport`].
///
/// Handlers run one at a time on a dedicated dispatch task, in publish order.
/// Clones share the same broker. Must be created inside a Tokio runtime.
///
/// The broker records the last [`RECORD_LIMIT`] publishes and unsubscribes;
/// older entries are discarded.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

struct Inner {
    connected: AtomicBool,
    refuse_connect: AtomicBool,
    stalled: AtomicBool,
    held: Mutex<Vec<TokenCompleter>>,
    subscriptions: DashMap<String, MessageHandler, ahash::RandomState>,
    retained: DashMap<String, Bytes, ahash::RandomState>,
    history: Mutex<VecDeque<(String, Bytes)>>,
    unsubscribed: Mutex<VecDeque<String>>,
    unacked: Arc<AtomicUsize>,
    queue: mpsc::UnboundedSender<Delivery>,
}

impl MemoryBroker {
    /// A broker that starts out connected.
    pub fn new() -> Self {
        let broker = Self::disconnected();
        broker.inner.connected.store(true, Ordering::SeqCst);
        broker
    }

    /// A broker whose clients must call [`Transport::connect`] first.
    pub fn disconnected() -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            connected: AtomicBool::new(false),
            refuse_connect: AtomicBool::new(false),
            stalled: AtomicBool::new(false),
            held: Mutex::new(Vec::new()),
            subscriptions: DashMap::default(),
            retained: DashMap::default(),
            history: Mutex::new(VecDeque::new()),
            unsubscribed: Mutex::new(VecDeque::new()),
            unacked: Arc::new(AtomicUsize::new(0)),
            queue,
        });

        tokio::spawn(dispatch_loop(Arc::downgrade(&inner), rx));

        Self { inner }
    }

    /// Make every subsequent connect attempt fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.refuse_connect.store(refuse, Ordering::SeqCst);
    }

    /// Drop the connection. Subscriptions are kept, as with a persistent session.
    pub fn disconnect(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
    }

    /// While stalled, operations are not applied and their tokens never complete.
    /// Un-stalling closes the held tokens.
    pub fn stall(&self, stalled: bool) {
        self.inner.stalled.store(stalled, Ordering::SeqCst);
        if stalled {
            return;
        }
        if let Ok(mut held) = self.inner.held.lock() {
            held.clear();
        }
    }

    /// Every payload published to exactly `topic`, in order.
    pub fn published_to(&self, topic: &str) -> Vec<Bytes> {
        self.inner
            .history
            .lock()
            .map(|history| {
                history
                    .iter()
                    .filter(|(t, _)| t == topic)
                    .map(|(_, payload)| payload.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every filter passed to [`Transport::unsubscribe`], in call order.
    pub fn unsubscribed(&self) -> Vec<String> {
        self.inner
            .unsubscribed
            .lock()
            .map(|unsubscribed| unsubscribed.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.len()
    }

    pub fn is_subscribed(&self, filter: &str) -> bool {
        self.inner.subscriptions.contains_key(filter)
    }

    /// Messages handed to handlers that have not been acknowledged yet.
    pub fn unacked(&self) -> usize {
        self.inner.unacked.load(Ordering::SeqCst)
    }

    fn hold(&self) -> Option<Token> {
        if !self.inner.stalled.load(Ordering::SeqCst) {
            return None;
        }
        let (completer, token) = Token::pending();
        if let Ok(mut held) = self.inner.held.lock() {
            held.push(completer);
        }
        Some(token)
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MemoryBroker {
    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    fn connect(&self) -> Token {
        if let Some(token) = self.hold() {
            return token;
        }
        if self.inner.refuse_connect.load(Ordering::SeqCst) {
            return Token::ready(Err(TransportError::ConnectionRefused(
                "memory broker refused the connection".to_string(),
            )));
        }
        self.inner.connected.store(true, Ordering::SeqCst);
        Token::ready(Ok(()))
    }

    fn subscribe(&self, filter: &str, _qos: QoS, handler: MessageHandler) -> Token {
        if let Some(token) = self.hold() {
            return token;
        }
        if !self.is_connected() {
            return Token::ready(Err(TransportError::NotConnected));
        }

        self.inner
            .subscriptions
            .insert(filter.to_owned(), Arc::clone(&handler));

        let retained: Vec<(String, Bytes)> = self
            .inner
            .retained
            .iter()
            .filter(|entry| topic_matches(filter, entry.key()))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        for (topic, payload) in retained {
            let _ = self.inner.queue.send(Delivery::Retained {
                topic,
                payload,
                handler: Arc::clone(&handler),
            });
        }

        Token::ready(Ok(()))
    }

    fn unsubscribe(&self, filter: &str) -> Token {
        if let Ok(mut unsubscribed) = self.inner.unsubscribed.lock() {
            record(&mut unsubscribed, filter.to_owned());
        }
        if let Some(token) = self.hold() {
            return token;
        }
        self.inner.subscriptions.remove(filter);
        Token::ready(Ok(()))
    }

    fn publish(&self, topic: &str, _qos: QoS, retained: bool, payload: Bytes) -> Token {
        if let Some(token) = self.hold() {
            return token;
        }
        if !self.is_connected() {
            return Token::ready(Err(TransportError::NotConnected));
        }
        if topic.contains(['+', '#']) {
            return Token::ready(Err(TransportError::PublishRejected(topic.to_owned())));
        }

        if retained {
            if payload.is_empty() {
                self.inner.retained.remove(topic);
            } else {
                self.inner.retained.insert(topic.to_owned(), payload.clone());
            }
        }
        if let Ok(mut history) = self.inner.history.lock() {
            record(&mut history, (topic.to_owned(), payload.clone()));
        }

        let delivery = Delivery::Publish {
            topic: topic.to_owned(),
            payload,
        };
        match self.inner.queue.send(delivery) {
            Ok(()) => Token::ready(Ok(())),
            Err(_) => Token::ready(Err(TransportError::Closed)),
        }
    }
}

async fn dispatch_loop(inner: std::sync::Weak<Inner>, mut rx: mpsc::UnboundedReceiver<Delivery>) {
    while let Some(delivery) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };

        match delivery {
            Delivery::Publish { topic, payload } => {
                // Collect first so handlers may (un)subscribe without deadlocking the map.
                let handlers: Vec<MessageHandler> = inner
                    .subscriptions
                    .iter()
                    .filter(|entry| topic_matches(entry.key(), &topic))
                    .map(|entry| Arc::clone(entry.value()))
                    .collect();
                for handler in handlers {
                    handler(tracked(&inner, &topic, &payload));
                }
            }
            Delivery::Retained {
                topic,
                payload,
                handler,
            } => handler(tracked(&inner, &topic, &payload)),
        }
    }
    tracing::debug!("Memory broker dispatch loop stopped");
}

fn tracked(inner: &Inner, topic: &str, payload: &Bytes) -> Message {
    let unacked = Arc::clone(&inner.unacked);
    unacked.fetch_add(1, Ordering::SeqCst);
    Message::new(topic, payload.clone()).with_ack(move || {
        unacked.fetch_sub(1, Ordering::SeqCst);
    })
}

fn record<E>(entries: &mut VecDeque<E>, entry: E) {
    if entries.len() == RECORD_LIMIT {
        entries.pop_front();
    }
    entries.push_back(entry);
}
