use portal_relay_sm::{CloseAction, Completion, Direction, IoRejection, Lifecycle, SocketState};
use proptest::prelude::*;

#[derive(Debug, Clone, Copy)]
enum Op {
    Begin(Direction),
    Complete(Direction),
    Disconnect,
    ForceDisconnect,
    TransportClosed,
    Invalidate,
}

fn direction() -> impl Strategy<Value = Direction> {
    prop_oneof![Just(Direction::Read), Just(Direction::Write)]
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        direction().prop_map(Op::Begin),
        direction().prop_map(Op::Complete),
        Just(Op::Disconnect),
        Just(Op::ForceDisconnect),
        Just(Op::TransportClosed),
        Just(Op::Invalidate),
    ]
}

proptest! {
    #[test]
    fn state_only_moves_forward(ops in prop::collection::vec(op(), 0..64)) {
        let mut lifecycle = Lifecycle::new();
        let mut previous = lifecycle.state();
        prop_assert_eq!(previous, SocketState::Established);

        for op in ops {
            match op {
                Op::Begin(direction) => { let _ = lifecycle.begin(direction); }
                Op::Complete(direction) => { lifecycle.complete(direction); }
                Op::Disconnect => { lifecycle.disconnect(); }
                Op::ForceDisconnect => { lifecycle.force_disconnect(); }
                Op::TransportClosed => { lifecycle.transport_closed(); }
                Op::Invalidate => { lifecycle.invalidate(); }
            }

            let current = lifecycle.state();
            prop_assert!(current == previous || previous.can_transition_to(current), "{previous} -> {current}");
            previous = current;
        }
    }

    #[test]
    fn at_most_one_disconnect_notification(ops in prop::collection::vec(op(), 0..64)) {
        let mut lifecycle = Lifecycle::new();
        let mut notifications = 0;

        for op in ops {
            let notified = match op {
                Op::TransportClosed => lifecycle.transport_closed(),
                Op::Invalidate => lifecycle.invalidate(),
                Op::Begin(direction) => { let _ = lifecycle.begin(direction); false }
                Op::Complete(direction) => { lifecycle.complete(direction); false }
                Op::Disconnect => { lifecycle.disconnect(); false }
                Op::ForceDisconnect => { lifecycle.force_disconnect(); false }
            };

            if notified {
                notifications += 1;
                prop_assert!(lifecycle.is_disconnected());
            }
        }

        prop_assert!(notifications <= 1);
        prop_assert_eq!(notifications == 1, lifecycle.is_disconnected());
    }

    #[test]
    fn second_begin_is_always_rejected(direction in direction(), prefix in prop::collection::vec(op(), 0..16)) {
        let mut lifecycle = Lifecycle::new();
        for op in prefix {
            match op {
                Op::Begin(d) => { let _ = lifecycle.begin(d); }
                Op::Complete(d) => { lifecycle.complete(d); }
                _ => {}
            }
        }

        if lifecycle.begin(direction).is_ok() || lifecycle.is_busy(direction) {
            prop_assert_eq!(lifecycle.begin(direction), Err(IoRejection::Busy(direction)));
        }
    }

    #[test]
    fn completions_after_force_close_never_deliver(direction in direction(), graceful_first in any::<bool>()) {
        let mut lifecycle = Lifecycle::new();
        lifecycle.begin(direction).unwrap();
        if graceful_first {
            prop_assert_eq!(lifecycle.disconnect(), CloseAction::Graceful);
        }

        prop_assert_eq!(lifecycle.force_disconnect(), CloseAction::Force);
        prop_assert_eq!(lifecycle.complete(direction), Completion::Suppress);
    }
}
