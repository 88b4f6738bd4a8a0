//! Priority-ordered signal bus.
//!
//! Handlers attach for a set of [`SignalKind`]s at a numeric priority. Each
//! kind keeps its own route list sorted by `(priority, registration order)`,
//! so delivery order is fixed at attach time. Emission is synchronous and
//! stops at the first handler that reports the signal as handled.
//!
//! The bus is generic over a context `C` that is lent to every handler for
//! the duration of one emission. The owner of the mutable state (the
//! controller) keeps it next to the bus and passes it in, which keeps the
//! bus free of shared ownership and interior mutability.
//!
//! The bus is single-threaded. Other threads reach it through the reactor's
//! hand-off queue and `notify()`.

use std::collections::HashMap;

use super::types::{Signal, SignalKind};

/// Lower fires first.
pub type Priority = u8;

pub const PRIORITY_CONTROLLER: Priority = 1;
pub const PRIORITY_SURFACE: Priority = 4;
pub const PRIORITY_TRAY: Priority = 6;

/// Returns true when the signal was handled and must not travel further.
pub type Handler<C> = Box<dyn FnMut(&mut C, &Signal) -> bool>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

#[derive(Debug, Clone, Copy)]
struct Route {
    priority: Priority,
    seq: u64,
    subscriber: SubscriberId,
}

pub struct SignalBus<C> {
    handlers: HashMap<SubscriberId, Handler<C>>,
    routes: HashMap<SignalKind, Vec<Route>>,
    next_seq: u64,
}

impl<C> Default for SignalBus<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> SignalBus<C> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            routes: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Register `handler` for every kind in `kinds`.
    ///
    /// Handlers with equal priority fire in registration order.
    pub fn attach(
        &mut self,
        priority: Priority,
        kinds: &[SignalKind],
        handler: Handler<C>,
    ) -> SubscriberId {
        let seq = self.next_seq;
        self.next_seq += 1;
        let subscriber = SubscriberId(seq);

        for kind in kinds {
            let routes = self.routes.entry(*kind).or_default();
            if routes.iter().any(|r| r.subscriber == subscriber) {
                continue;
            }
            let at = routes.partition_point(|r| (r.priority, r.seq) <= (priority, seq));
            routes.insert(
                at,
                Route {
                    priority,
                    seq,
                    subscriber,
                },
            );
        }
        self.handlers.insert(subscriber, handler);

        log::debug!(
            "SignalBus: attached subscriber {} at priority {} for {} kind(s)",
            seq,
            priority,
            kinds.len()
        );
        subscriber
    }

    /// Deliver `signal` in priority order until a handler accepts it.
    ///
    /// Returns whether any handler accepted it.
    pub fn emit(&mut self, ctx: &mut C, signal: &Signal) -> bool {
        let Some(routes) = self.routes.get(&signal.kind()) else {
            return false;
        };

        for route in routes {
            if let Some(handler) = self.handlers.get_mut(&route.subscriber) {
                if handler(ctx, signal) {
                    return true;
                }
            }
        }
        false
    }

    /// Remove every registration of `subscriber`. Returns false if it was unknown.
    pub fn detach(&mut self, subscriber: SubscriberId) -> bool {
        let known = self.handlers.remove(&subscriber).is_some();
        for routes in self.routes.values_mut() {
            routes.retain(|r| r.subscriber != subscriber);
        }
        self.routes.retain(|_, routes| !routes.is_empty());
        known
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(tag: &'static str, handled: bool) -> Handler<Vec<&'static str>> {
        Box::new(move |log: &mut Vec<&'static str>, _signal: &Signal| {
            log.push(tag);
            handled
        })
    }

    #[test]
    fn test_emit_follows_priority_not_registration_order() {
        let mut bus = SignalBus::new();
        bus.attach(6, &[SignalKind::UiReady], recorder("tray", false));
        bus.attach(1, &[SignalKind::UiReady], recorder("controller", false));
        bus.attach(4, &[SignalKind::UiReady], recorder("surface", false));

        let mut log = Vec::new();
        let accepted = bus.emit(&mut log, &Signal::UiReady);

        assert!(!accepted);
        assert_eq!(log, vec!["controller", "surface", "tray"]);
    }

    #[test]
    fn test_equal_priority_ties_break_by_registration() {
        let mut bus = SignalBus::new();
        bus.attach(2, &[SignalKind::CheckState], recorder("first", false));
        bus.attach(2, &[SignalKind::CheckState], recorder("second", false));
        bus.attach(1, &[SignalKind::CheckState], recorder("zeroth", false));

        let mut log = Vec::new();
        bus.emit(&mut log, &Signal::CheckState);

        assert_eq!(log, vec!["zeroth", "first", "second"]);
    }

    #[test]
    fn test_handled_stops_lower_priorities() {
        let mut bus = SignalBus::new();
        bus.attach(1, &[SignalKind::ExitReload], recorder("controller", true));
        bus.attach(6, &[SignalKind::ExitReload], recorder("tray", false));

        let mut log = Vec::new();
        assert!(bus.emit(&mut log, &Signal::ExitReload));
        assert_eq!(log, vec!["controller"]);
    }

    #[test]
    fn test_emit_only_reaches_subscribed_kinds() {
        let mut bus = SignalBus::new();
        bus.attach(1, &[SignalKind::NotifyChange], recorder("change", true));
        bus.attach(
            2,
            &[SignalKind::UiButtonPress, SignalKind::IpcAction],
            recorder("input", true),
        );

        let mut log = Vec::new();
        assert!(bus.emit(&mut log, &Signal::IpcAction("x".into())));
        assert!(!bus.emit(&mut log, &Signal::UiReady));
        assert_eq!(log, vec!["input"]);
    }

    #[test]
    fn test_detach_removes_all_registrations() {
        let mut bus = SignalBus::new();
        let id = bus.attach(
            1,
            &[SignalKind::NotifyChange, SignalKind::NotifyForceChange],
            recorder("gone", true),
        );
        bus.attach(3, &[SignalKind::NotifyChange], recorder("stays", false));

        assert!(bus.detach(id));
        assert!(!bus.detach(id));
        assert_eq!(bus.subscriber_count(), 1);

        let mut log = Vec::new();
        assert!(!bus.emit(&mut log, &Signal::NotifyForceChange));
        assert!(!bus.emit(&mut log, &Signal::NotifyChange));
        assert_eq!(log, vec!["stays"]);
    }

    #[test]
    fn test_handler_sees_payload_and_mutates_context() {
        let mut bus: SignalBus<Vec<String>> = SignalBus::new();
        bus.attach(
            1,
            &[SignalKind::IpcAction],
            Box::new(|seen: &mut Vec<String>, signal: &Signal| {
                if let Signal::IpcAction(data) = signal {
                    seen.push(data.clone());
                    return true;
                }
                false
            }),
        );

        let mut seen = Vec::new();
        bus.emit(&mut seen, &Signal::IpcAction("#clock.toggle".into()));
        assert_eq!(seen, vec!["#clock.toggle".to_string()]);
    }
}
