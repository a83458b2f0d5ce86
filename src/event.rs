//! Discrete events: the domain-behavior extension point and same-instant
//! priority resolution.

use std::fmt;

use dyn_clone::DynClone;

use crate::model::AtomicModelI;
use crate::time::Time;

/// A typed, timestamped occurrence exchanged between simulation models.
///
/// Implementors are plain data types carrying the time of occurrence and any
/// payload needed by [`EventI::execute_on`], which is the single extension
/// point for domain behavior: it downcasts the target model, checks the state
/// precondition, and mutates model state. A failed precondition is a fatal
/// programming error (inconsistent simulation architecture) and panics with
/// full context; it is never recovered.
///
/// Events are boxed and cloneable so that one emission can be broadcast to
/// several sink models.
pub trait EventI: DynClone + fmt::Debug + Send {
    /// Routing key of this event, matched against descriptor relations.
    fn kind(&self) -> &str;

    /// Simulated instant at which this event occurs.
    fn time_of_occurrence(&self) -> Time;

    /// Returns `true` when this event must be executed before `other` if both
    /// occur at the same instant on the same model.
    ///
    /// Together with the mirror call on `other`, this must induce a strict
    /// partial order among same-instant events. The default claims no
    /// priority.
    fn has_priority_over(&self, _other: &dyn EventI) -> bool {
        false
    }

    /// Applies this event to `model`, mutating its state.
    ///
    /// # Panics
    ///
    /// Panics when `model` is not of the expected type or not in the state
    /// this event requires.
    fn execute_on(&self, model: &mut dyn AtomicModelI);
}

dyn_clone::clone_trait_object!(EventI);

/// Orders same-instant events by repeatedly selecting an event over which no
/// remaining rival claims priority (a topological sort by pairwise
/// [`EventI::has_priority_over`]).
///
/// The selection is stable: among events with no remaining higher-priority
/// rival, arrival order is preserved, so the result is reproducible across
/// runs.
///
/// # Panics
///
/// Panics if the priority relation is cyclic among the given events, which
/// indicates an inconsistent priority function.
pub fn sort_by_priority(mut events: Vec<Box<dyn EventI>>) -> Vec<Box<dyn EventI>> {
    let mut ordered = Vec::with_capacity(events.len());
    while !events.is_empty() {
        let next = events.iter().position(|candidate| {
            events
                .iter()
                .all(|rival| !rival.has_priority_over(candidate.as_ref()))
        });
        match next {
            Some(i) => ordered.push(events.remove(i)),
            None => panic!(
                "cyclic event priority relation among {} same-instant events: {:?}",
                events.len(),
                events
            ),
        }
    }
    ordered
}

/// Wrapper relabeling an event's kind at a coupled-model boundary.
///
/// Used by coordinator engines when a submodel export is reexported to the
/// parent under a different kind; everything except the routing key is
/// delegated to the inner event.
#[derive(Debug, Clone)]
pub struct RelabeledEvent {
    kind: String,
    inner: Box<dyn EventI>,
}

impl RelabeledEvent {
    /// Wraps `inner` under the parent-facing kind `kind`.
    pub fn new(kind: impl Into<String>, inner: Box<dyn EventI>) -> Self {
        Self {
            kind: kind.into(),
            inner,
        }
    }
}

impl EventI for RelabeledEvent {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn time_of_occurrence(&self) -> Time {
        self.inner.time_of_occurrence()
    }

    fn has_priority_over(&self, other: &dyn EventI) -> bool {
        self.inner.has_priority_over(other)
    }

    fn execute_on(&self, model: &mut dyn AtomicModelI) {
        self.inner.execute_on(model);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::TimeUnit;

    #[derive(Debug, Clone)]
    struct Tagged {
        tag: &'static str,
        /// Tags this event outranks at the same instant.
        beats: &'static [&'static str],
    }

    impl EventI for Tagged {
        fn kind(&self) -> &str {
            self.tag
        }

        fn time_of_occurrence(&self) -> Time {
            Time::zero(TimeUnit::Seconds)
        }

        fn has_priority_over(&self, other: &dyn EventI) -> bool {
            self.beats.contains(&other.kind())
        }

        fn execute_on(&self, _model: &mut dyn AtomicModelI) {}
    }

    fn tags(events: &[Box<dyn EventI>]) -> Vec<String> {
        events.iter().map(|e| e.kind().to_string()).collect()
    }

    #[test]
    fn priority_orders_before_unrelated() {
        let events: Vec<Box<dyn EventI>> = vec![
            Box::new(Tagged { tag: "a", beats: &[] }),
            Box::new(Tagged { tag: "b", beats: &["a"] }),
        ];
        let ordered = sort_by_priority(events);
        assert_eq!(tags(&ordered), ["b", "a"]);
    }

    #[test]
    fn unrelated_events_keep_arrival_order() {
        let events: Vec<Box<dyn EventI>> = vec![
            Box::new(Tagged { tag: "x", beats: &[] }),
            Box::new(Tagged { tag: "y", beats: &[] }),
            Box::new(Tagged { tag: "z", beats: &[] }),
        ];
        let ordered = sort_by_priority(events);
        assert_eq!(tags(&ordered), ["x", "y", "z"]);
    }

    #[test]
    fn chained_priorities_yield_unique_order() {
        // c beats b beats a; submit in the worst order and expect the chain.
        let events: Vec<Box<dyn EventI>> = vec![
            Box::new(Tagged { tag: "a", beats: &[] }),
            Box::new(Tagged { tag: "b", beats: &["a"] }),
            Box::new(Tagged { tag: "c", beats: &["b", "a"] }),
        ];
        let ordered = sort_by_priority(events);
        assert_eq!(tags(&ordered), ["c", "b", "a"]);
    }

    #[test]
    fn ordering_is_reproducible() {
        let build = || -> Vec<Box<dyn EventI>> {
            vec![
                Box::new(Tagged { tag: "m", beats: &[] }),
                Box::new(Tagged { tag: "n", beats: &["m"] }),
                Box::new(Tagged { tag: "o", beats: &[] }),
            ]
        };
        let first = tags(&sort_by_priority(build()));
        for _ in 0..10 {
            assert_eq!(tags(&sort_by_priority(build())), first);
        }
    }

    #[test]
    #[should_panic]
    fn cyclic_priority_panics() {
        let events: Vec<Box<dyn EventI>> = vec![
            Box::new(Tagged { tag: "p", beats: &["q"] }),
            Box::new(Tagged { tag: "q", beats: &["p"] }),
        ];
        sort_by_priority(events);
    }

    #[test]
    fn relabeled_event_changes_kind_only() {
        let inner: Box<dyn EventI> = Box::new(Tagged { tag: "a", beats: &["z"] });
        let relabeled = RelabeledEvent::new("outer.a", inner);
        assert_eq!(relabeled.kind(), "outer.a");
        assert_eq!(
            relabeled.time_of_occurrence(),
            Time::zero(TimeUnit::Seconds)
        );
        let z = Tagged { tag: "z", beats: &[] };
        assert!(relabeled.has_priority_over(&z));
    }
}
