//! Property-based invariant tests for lifetimes and conduits.
//!
//! 1. Every owned resource is disposed exactly once, however the ownership
//!    graph is shaped and whichever lifetimes are killed.
//! 2. A conduit activates once per 0→1 transition and deactivates once per
//!    1→0 transition, for any subscribe/unsubscribe sequence.
//! 3. LocalSet membership matches a model set for any add/delete sequence,
//!    and exactly the live members are reported to a subscriber.
//! 4. Sets made from inside subscribers reach every subscriber in the same
//!    order, and every subscriber's last view is the property's value.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use proptest::prelude::*;
use starscape_core::{
    ActivationHooks, ConduitCore, ConduitExt, Disposable, Lifetime, LocalProperty, LocalSet,
    Result, SetMember,
};

// ── Helpers ──────────────────────────────────────────────────────────

struct Counted(Cell<u32>);

impl Disposable for Counted {
    fn dispose(&self) {
        self.0.set(self.0.get() + 1);
    }
}

#[derive(Debug, Clone)]
enum GraphOp {
    NewRoot,
    NewDependent(usize),
    Link { parent: usize, child: usize },
    Own(usize),
    Kill(usize),
}

fn arb_graph_op() -> impl Strategy<Value = GraphOp> {
    prop_oneof![
        Just(GraphOp::NewRoot),
        any::<usize>().prop_map(GraphOp::NewDependent),
        (any::<usize>(), any::<usize>()).prop_map(|(parent, child)| GraphOp::Link { parent, child }),
        any::<usize>().prop_map(GraphOp::Own),
        any::<usize>().prop_map(GraphOp::Kill),
    ]
}

// ═════════════════════════════════════════════════════════════════════════
// 1. Exactly-once disposal
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn resources_disposed_exactly_once(ops in proptest::collection::vec(arb_graph_op(), 1..60)) {
        let mut lifetimes = vec![Lifetime::new()];
        let mut resources: Vec<(usize, Rc<Counted>)> = Vec::new();

        for op in ops {
            let n = lifetimes.len();
            match op {
                GraphOp::NewRoot => lifetimes.push(Lifetime::new()),
                GraphOp::NewDependent(i) => {
                    if let Ok(child) = lifetimes[i % n].new_dependent() {
                        lifetimes.push(child);
                    }
                }
                GraphOp::Link { parent, child } => {
                    let _ = lifetimes[parent % n].add_dependent(&lifetimes[child % n]);
                }
                GraphOp::Own(i) => {
                    let resource = Rc::new(Counted(Cell::new(0)));
                    if lifetimes[i % n].add(resource.clone()).is_ok() {
                        resources.push((i % n, resource));
                    }
                }
                GraphOp::Kill(i) => lifetimes[i % n].kill(),
            }
        }

        for (owner, resource) in &resources {
            let expected = u32::from(!lifetimes[*owner].is_alive());
            prop_assert_eq!(resource.0.get(), expected);
        }

        for lifetime in &lifetimes {
            lifetime.kill();
        }
        for (_, resource) in &resources {
            prop_assert_eq!(resource.0.get(), 1);
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 2. Activation transitions
// ═════════════════════════════════════════════════════════════════════════

struct Transitions {
    up: Rc<Cell<u32>>,
    down: Rc<Cell<u32>>,
}

impl ActivationHooks<u8> for Transitions {
    fn activate(&self, activation: &Lifetime) -> Result<()> {
        self.up.set(self.up.get() + 1);
        let down = Rc::clone(&self.down);
        activation.add_callback(move || down.set(down.get() + 1))?;
        Ok(())
    }
}

proptest! {
    #[test]
    fn activation_tracks_subscriber_count(ops in proptest::collection::vec(any::<bool>(), 1..80)) {
        let core = ConduitCore::<u8>::new("prop");
        let hooks = Transitions { up: Rc::default(), down: Rc::default() };
        let mut live: Vec<Lifetime> = Vec::new();
        let mut expected_up = 0;
        let mut expected_down = 0;

        for subscribe in ops {
            if subscribe {
                if live.is_empty() {
                    expected_up += 1;
                }
                let lifetime = Lifetime::new();
                core.subscribe(&lifetime, Box::new(|_| {}), &hooks).unwrap();
                live.push(lifetime);
            } else if let Some(lifetime) = live.pop() {
                lifetime.kill();
                if live.is_empty() {
                    expected_down += 1;
                }
            }
            prop_assert_eq!(core.subscriber_count(), live.len());
            prop_assert_eq!(core.is_active(), !live.is_empty());
            prop_assert_eq!(hooks.up.get(), expected_up);
            prop_assert_eq!(hooks.down.get(), expected_down);
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. Set membership
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn local_set_matches_model(ops in proptest::collection::vec((any::<bool>(), 0u8..8), 1..80)) {
        let set = LocalSet::new();
        let lifetime = Lifetime::new();
        let members: Rc<RefCell<Vec<SetMember<u8>>>> = Rc::default();
        let m = Rc::clone(&members);
        set.subscribe(&lifetime, move |member: &SetMember<u8>| m.borrow_mut().push(member.clone()))
            .unwrap();
        let mut model: Vec<u8> = Vec::new();

        for (add, value) in ops {
            if add {
                let fresh = !model.contains(&value);
                prop_assert_eq!(set.add(value), fresh);
                if fresh {
                    model.push(value);
                }
            } else {
                let present = model.contains(&value);
                prop_assert_eq!(set.delete(&value), present);
                model.retain(|v| *v != value);
            }

            prop_assert_eq!(set.values(), model.clone());
            let live: Vec<u8> = members
                .borrow()
                .iter()
                .filter(|member| member.lifetime.is_alive())
                .map(|member| member.value)
                .collect();
            prop_assert_eq!(live, model.clone());
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. Nested sets
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn clamping_subscribers_agree_with_property(
        limits in proptest::collection::vec(0u8..50, 1..4),
        values in proptest::collection::vec(0u8..60, 1..20),
    ) {
        let prop = LocalProperty::new(0u8);
        let lifetime = Lifetime::new();
        let mut logs: Vec<Rc<RefCell<Vec<u8>>>> = Vec::new();
        for &limit in &limits {
            let log: Rc<RefCell<Vec<u8>>> = Rc::default();
            let l = Rc::clone(&log);
            let p = prop.clone();
            prop.subscribe(&lifetime, move |&v: &u8| {
                l.borrow_mut().push(v);
                if v > limit {
                    p.set(limit);
                }
            })
            .unwrap();
            logs.push(log);
        }
        let lowest = limits.iter().copied().min().unwrap_or(u8::MAX);

        for value in values {
            prop.set(value);
            prop_assert_eq!(prop.get(), value.min(lowest));
            let first = logs[0].borrow().clone();
            for log in &logs {
                prop_assert_eq!(log.borrow().last().copied(), Some(prop.get()));
            }
            for log in &logs[1..] {
                prop_assert_eq!(&*log.borrow(), &first);
            }
        }
    }
}
