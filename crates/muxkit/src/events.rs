//! Minimal observer primitive shared by processes and command sets.
//!
//! Handlers are called synchronously, in registration order, by whoever fires
//! the event. There is no history: a handler registered after an occurrence
//! never sees it. Events that can only happen once (a process exiting) are
//! fired with [`EventNotifier::fire_final`], after which registration for that
//! kind is refused so callers can tell "will be notified" from "missed it".

use std::sync::{Arc, Mutex};

use crate::lock;

type Handler = Box<dyn FnMut() + Send>;

struct Registration<K> {
	kind: K,
	once: bool,
	handler: Arc<Mutex<Handler>>,
}

struct Inner<K> {
	handlers: Vec<Registration<K>>,
	closed: Vec<K>,
}

pub struct EventNotifier<K> {
	inner: Mutex<Inner<K>>,
}

impl<K: Copy + Eq> Default for EventNotifier<K> {
	fn default() -> Self {
		Self::new()
	}
}

impl<K: Copy + Eq> EventNotifier<K> {
	pub fn new() -> Self {
		Self {
			inner: Mutex::new(Inner {
				handlers: Vec::new(),
				closed: Vec::new(),
			}),
		}
	}

	/// Register `handler` for every future occurrence of `kind`.
	///
	/// Returns `false` (and drops the handler) if `kind` was already fired
	/// with [`fire_final`](Self::fire_final).
	pub fn on<F>(&self, kind: K, handler: F) -> bool
	where
		F: FnMut() + Send + 'static,
	{
		self.register(kind, false, Box::new(handler))
	}

	/// Register `handler` for the next occurrence of `kind` only.
	pub fn once<F>(&self, kind: K, handler: F) -> bool
	where
		F: FnOnce() + Send + 'static,
	{
		let mut slot = Some(handler);
		self.register(
			kind,
			true,
			Box::new(move || {
				if let Some(f) = slot.take() {
					f();
				}
			}),
		)
	}

	fn register(&self, kind: K, once: bool, handler: Handler) -> bool {
		let mut inner = lock(&self.inner);
		if inner.closed.contains(&kind) {
			return false;
		}
		inner.handlers.push(Registration {
			kind,
			once,
			handler: Arc::new(Mutex::new(handler)),
		});
		true
	}

	pub fn fire(&self, kind: K) {
		let snapshot = self.take_snapshot(kind, false);
		invoke(snapshot);
	}

	/// Fire `kind` one last time; later registrations for it are refused.
	pub fn fire_final(&self, kind: K) {
		let snapshot = self.take_snapshot(kind, true);
		invoke(snapshot);
	}

	pub fn is_closed(&self, kind: K) -> bool {
		lock(&self.inner).closed.contains(&kind)
	}

	pub fn handler_count(&self, kind: K) -> usize {
		lock(&self.inner)
			.handlers
			.iter()
			.filter(|r| r.kind == kind)
			.count()
	}

	fn take_snapshot(&self, kind: K, close: bool) -> Vec<Arc<Mutex<Handler>>> {
		let mut inner = lock(&self.inner);
		if inner.closed.contains(&kind) {
			return Vec::new();
		}
		let snapshot = inner
			.handlers
			.iter()
			.filter(|r| r.kind == kind)
			.map(|r| Arc::clone(&r.handler))
			.collect();
		if close {
			inner.closed.push(kind);
			inner.handlers.retain(|r| r.kind != kind);
		} else {
			inner.handlers.retain(|r| !(r.kind == kind && r.once));
		}
		snapshot
	}
}

fn invoke(handlers: Vec<Arc<Mutex<Handler>>>) {
	for handler in handlers {
		let mut f = lock(&handler);
		(*f)();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};

	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	enum Kind {
		Ping,
		Done,
	}

	#[test]
	fn handlers_run_in_registration_order() {
		let events = EventNotifier::new();
		let seen = Arc::new(Mutex::new(Vec::new()));
		for i in 0..3 {
			let seen = Arc::clone(&seen);
			events.on(Kind::Ping, move || seen.lock().unwrap().push(i));
		}
		events.fire(Kind::Ping);
		assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
	}

	#[test]
	fn late_handlers_see_no_replay() {
		let events = EventNotifier::new();
		let count = Arc::new(AtomicUsize::new(0));
		events.fire(Kind::Ping);

		let c = Arc::clone(&count);
		events.on(Kind::Ping, move || {
			c.fetch_add(1, Ordering::SeqCst);
		});
		assert_eq!(count.load(Ordering::SeqCst), 0);

		events.fire(Kind::Ping);
		assert_eq!(count.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn kinds_are_independent() {
		let events = EventNotifier::new();
		let count = Arc::new(AtomicUsize::new(0));
		let c = Arc::clone(&count);
		events.on(Kind::Done, move || {
			c.fetch_add(1, Ordering::SeqCst);
		});
		events.fire(Kind::Ping);
		assert_eq!(count.load(Ordering::SeqCst), 0);
	}

	#[test]
	fn once_handlers_fire_a_single_time() {
		let events = EventNotifier::new();
		let count = Arc::new(AtomicUsize::new(0));
		let c = Arc::clone(&count);
		events.once(Kind::Ping, move || {
			c.fetch_add(1, Ordering::SeqCst);
		});
		events.fire(Kind::Ping);
		events.fire(Kind::Ping);
		assert_eq!(count.load(Ordering::SeqCst), 1);
		assert_eq!(events.handler_count(Kind::Ping), 0);
	}

	#[test]
	fn final_fire_refuses_later_registration() {
		let events = EventNotifier::new();
		let count = Arc::new(AtomicUsize::new(0));
		let c = Arc::clone(&count);
		assert!(events.on(Kind::Done, move || {
			c.fetch_add(1, Ordering::SeqCst);
		}));
		events.fire_final(Kind::Done);
		events.fire_final(Kind::Done);
		assert_eq!(count.load(Ordering::SeqCst), 1);
		assert!(events.is_closed(Kind::Done));
		assert!(!events.on(Kind::Done, || {}));
		assert!(events.on(Kind::Ping, || {}));
	}

	#[test]
	fn handler_may_register_during_fire() {
		let events = Arc::new(EventNotifier::new());
		let count = Arc::new(AtomicUsize::new(0));
		let (e, c) = (Arc::clone(&events), Arc::clone(&count));
		events.once(Kind::Ping, move || {
			let c = Arc::clone(&c);
			e.on(Kind::Ping, move || {
				c.fetch_add(1, Ordering::SeqCst);
			});
		});
		events.fire(Kind::Ping);
		assert_eq!(count.load(Ordering::SeqCst), 0);
		events.fire(Kind::Ping);
		assert_eq!(count.load(Ordering::SeqCst), 1);
	}
}
