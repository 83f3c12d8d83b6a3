//! Property tests for field notifications

use proptest::prelude::*;

use renderable::channel::NotificationChannel;
use renderable::{FragmentId, ObservableField, StateField};

proptest! {
    /// Every differing `set` pushes each registered id once, in
    /// registration order; equal values push nothing.
    #[test]
    fn prop_set_pushes_registered_ids(
        subscribers in 0usize..6,
        values in proptest::collection::vec(0i64..4, 0..20),
    ) {
        let channel = NotificationChannel::new();
        let field = StateField::new("value", 0i64);
        field.bind(channel.notifier());

        let ids: Vec<FragmentId> = (0..subscribers)
            .map(|n| FragmentId::new(format!("frag-{}", subscribers - n)))
            .collect();
        for id in &ids {
            field.register(id.clone());
        }

        let mut expected = Vec::new();
        let mut current = 0i64;
        for value in values {
            let pushed = field.set(value);
            if value == current {
                prop_assert_eq!(pushed, 0);
            } else {
                prop_assert_eq!(pushed, ids.len());
                expected.extend(ids.iter().cloned());
                current = value;
            }
        }

        prop_assert_eq!(channel.drain().unwrap(), expected);
        prop_assert_eq!(field.get(), current);
    }

    /// Registering the same id repeatedly never duplicates pushes
    #[test]
    fn prop_register_is_idempotent(repeats in 1usize..5) {
        let channel = NotificationChannel::new();
        let field = StateField::new("flag", false);
        field.bind(channel.notifier());

        for _ in 0..repeats {
            field.register(FragmentId::new("only"));
        }
        field.set(true);

        prop_assert_eq!(channel.drain().unwrap(), vec![FragmentId::new("only")]);
    }
}
