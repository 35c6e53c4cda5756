//! Table-driven state machine executor.
//!
//! A [`TransitionTable`] is built once from `(from, event kind) -> (to, handler)`
//! arcs and never changes afterwards. It holds no per-subject state: the
//! subject owns its current state and its locking, and hands both to
//! [`TransitionTable::fire`] together with the event. Firing an event with no
//! registered arc fails before any handler runs, so the subject is untouched.
//!
//! ```text
//! fire(current, subject, event)
//!   -> arcs[(current, event.kind())]
//!        None      => Err(InvalidTransition)
//!        Some(arc) => handler(subject, event); Ok((arc.to, output))
//! ```

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

/// An event routed through a [`TransitionTable`].
pub trait FsmEvent {
    type Kind: Copy + Eq + Hash + fmt::Debug;

    fn kind(&self) -> Self::Kind;
}

/// Side-effecting arc handler. The returned value is handed back to the
/// caller of `fire` (the host lifecycle uses it to carry pending effects).
pub type Handler<Subj, E, O> = fn(&mut Subj, &E) -> O;

/// No arc is registered for `(state, event_kind)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition<S, K> {
    pub state: S,
    pub event_kind: K,
}

impl<S: fmt::Debug, K: fmt::Debug> fmt::Display for InvalidTransition<S, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no transition for event {:?} at state {:?}",
            self.event_kind, self.state
        )
    }
}

impl<S: fmt::Debug, K: fmt::Debug> std::error::Error for InvalidTransition<S, K> {}

struct Transition<S, Subj, E, O> {
    to: S,
    handler: Option<Handler<Subj, E, O>>,
}

pub struct TransitionTable<S, K, Subj, E, O> {
    arcs: HashMap<(S, K), Transition<S, Subj, E, O>>,
}

pub struct TransitionTableBuilder<S, K, Subj, E, O> {
    arcs: HashMap<(S, K), Transition<S, Subj, E, O>>,
}

impl<S, K, Subj, E, O> TransitionTableBuilder<S, K, Subj, E, O>
where
    S: Copy + Eq + Hash + fmt::Debug,
    K: Copy + Eq + Hash + fmt::Debug,
{
    /// Registers an arc whose handler runs before the target state is returned.
    ///
    /// Panics when the `(from, kind)` pair is already registered: the table is
    /// static data and a duplicate is a programming error.
    pub fn register(mut self, from: S, kind: K, to: S, handler: Handler<Subj, E, O>) -> Self {
        self.insert(from, kind, to, Some(handler));
        self
    }

    /// Registers an arc with no side effect.
    pub fn register_noop(mut self, from: S, kind: K, to: S) -> Self {
        self.insert(from, kind, to, None);
        self
    }

    fn insert(&mut self, from: S, kind: K, to: S, handler: Option<Handler<Subj, E, O>>) {
        let previous = self.arcs.insert((from, kind), Transition { to, handler });
        assert!(
            previous.is_none(),
            "duplicate transition registered for {:?} on {:?}",
            from,
            kind
        );
    }

    pub fn build(self) -> TransitionTable<S, K, Subj, E, O> {
        TransitionTable { arcs: self.arcs }
    }
}

impl<S, K, Subj, E, O> TransitionTable<S, K, Subj, E, O>
where
    S: Copy + Eq + Hash + fmt::Debug,
    K: Copy + Eq + Hash + fmt::Debug,
{
    pub fn builder() -> TransitionTableBuilder<S, K, Subj, E, O> {
        TransitionTableBuilder {
            arcs: HashMap::new(),
        }
    }

    /// Target state of the arc registered for `(state, kind)`, if any.
    pub fn target(&self, state: S, kind: K) -> Option<S> {
        self.arcs.get(&(state, kind)).map(|arc| arc.to)
    }

    pub fn can_fire(&self, state: S, kind: K) -> bool {
        self.arcs.contains_key(&(state, kind))
    }

    /// All registered arcs as `(from, kind, to)` triples, in no particular order.
    pub fn arcs(&self) -> impl Iterator<Item = (S, K, S)> + '_ {
        self.arcs.iter().map(|(&(from, kind), arc)| (from, kind, arc.to))
    }

    pub fn len(&self) -> usize {
        self.arcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arcs.is_empty()
    }
}

impl<S, K, Subj, E, O> TransitionTable<S, K, Subj, E, O>
where
    S: Copy + Eq + Hash + fmt::Debug,
    K: Copy + Eq + Hash + fmt::Debug,
    E: FsmEvent<Kind = K>,
    O: Default,
{
    /// Looks up the arc for `(current, event.kind())`, runs its handler against
    /// `subject` and returns the target state with the handler output. The
    /// caller commits the returned state.
    pub fn fire(
        &self,
        current: S,
        subject: &mut Subj,
        event: &E,
    ) -> Result<(S, O), InvalidTransition<S, K>> {
        let kind = event.kind();
        let arc = self.arcs.get(&(current, kind)).ok_or(InvalidTransition {
            state: current,
            event_kind: kind,
        })?;
        let output = match arc.handler {
            Some(handler) => handler(subject, event),
            None => O::default(),
        };
        Ok((arc.to, output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Light {
        Off,
        On,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Press {
        Toggle,
        Reset,
    }

    struct Switch {
        presses: u32,
    }

    struct Ev(Press);

    impl FsmEvent for Ev {
        type Kind = Press;
        fn kind(&self) -> Press {
            self.0
        }
    }

    fn count(switch: &mut Switch, _ev: &Ev) -> u32 {
        switch.presses += 1;
        switch.presses
    }

    fn table() -> TransitionTable<Light, Press, Switch, Ev, u32> {
        TransitionTable::builder()
            .register(Light::Off, Press::Toggle, Light::On, count)
            .register(Light::On, Press::Toggle, Light::Off, count)
            .register_noop(Light::On, Press::Reset, Light::Off)
            .build()
    }

    #[test]
    fn test_fire_runs_handler_and_returns_target() {
        let table = table();
        let mut switch = Switch { presses: 0 };
        let (to, out) = table.fire(Light::Off, &mut switch, &Ev(Press::Toggle)).unwrap();
        assert_eq!(to, Light::On);
        assert_eq!(out, 1);
        assert_eq!(switch.presses, 1);
    }

    #[test]
    fn test_noop_arc_returns_default_output() {
        let table = table();
        let mut switch = Switch { presses: 7 };
        let (to, out) = table.fire(Light::On, &mut switch, &Ev(Press::Reset)).unwrap();
        assert_eq!(to, Light::Off);
        assert_eq!(out, 0);
        assert_eq!(switch.presses, 7);
    }

    #[test]
    fn test_missing_arc_leaves_subject_untouched() {
        let table = table();
        let mut switch = Switch { presses: 3 };
        let err = table.fire(Light::Off, &mut switch, &Ev(Press::Reset)).unwrap_err();
        assert_eq!(
            err,
            InvalidTransition {
                state: Light::Off,
                event_kind: Press::Reset
            }
        );
        assert_eq!(switch.presses, 3);
    }

    #[test]
    fn test_introspection() {
        let table = table();
        assert_eq!(table.len(), 3);
        assert_eq!(table.target(Light::On, Press::Reset), Some(Light::Off));
        assert!(!table.can_fire(Light::Off, Press::Reset));
        assert_eq!(table.arcs().count(), 3);
    }

    #[test]
    #[should_panic(expected = "duplicate transition")]
    fn test_duplicate_arc_panics() {
        let _ = TransitionTable::<Light, Press, Switch, Ev, u32>::builder()
            .register_noop(Light::Off, Press::Toggle, Light::On)
            .register_noop(Light::Off, Press::Toggle, Light::Off);
    }
}
