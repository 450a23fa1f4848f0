use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};

use crate::events::*;

#[test]
fn publish_reaches_only_handlers_of_the_event_kind() -> Result<()> {
    let bus = EventBus::new();
    let (added, removed) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
    let added_count = added.clone();
    bus.subscribe(EventKind::NodeAdded, move |_| {
        added_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let removed_count = removed.clone();
    bus.subscribe(EventKind::NodeRemoved, move |event| {
        assert_eq!(event.node(), "node-b");
        removed_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let delivered = bus.publish(&Event::NodeRemoved("node-b".into()));

    assert_eq!(delivered, 1, "expected exactly one handler to receive the event");
    assert_eq!(added.load(Ordering::SeqCst), 0, "expected NodeAdded handler to be skipped");
    assert_eq!(removed.load(Ordering::SeqCst), 1, "expected NodeRemoved handler to be called once");
    Ok(())
}

#[test]
fn failing_handlers_do_not_break_publication() -> Result<()> {
    let bus = EventBus::new();
    let calls = Arc::new(AtomicUsize::new(0));
    bus.subscribe(EventKind::NodeRemoved, |_| bail!("handler failure"));
    bus.subscribe(EventKind::NodeRemoved, |_| panic!("handler panic"));
    let calls_inner = calls.clone();
    bus.subscribe(EventKind::NodeRemoved, move |_| {
        calls_inner.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let delivered = bus.publish(&Event::NodeRemoved("node-a".into()));

    assert_eq!(delivered, 1, "expected only the healthy handler to count as delivered");
    assert_eq!(calls.load(Ordering::SeqCst), 1, "expected the healthy handler to still be called");
    Ok(())
}

#[test]
fn unsubscribe_and_clear() -> Result<()> {
    let bus = EventBus::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_inner = calls.clone();
    let id = bus.subscribe(EventKind::NodeAdded, move |_| {
        calls_inner.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    assert!(!bus.unsubscribe(EventKind::NodeRemoved, id), "expected unsubscribe of an unused kind to be a no-op");
    assert!(bus.unsubscribe(EventKind::NodeAdded, id), "expected handler to be found & removed");
    assert!(!bus.unsubscribe(EventKind::NodeAdded, id), "expected second unsubscribe to be a no-op");
    assert_eq!(bus.publish(&Event::NodeAdded("node-a".into())), 0, "expected no handlers after unsubscribe");

    bus.subscribe(EventKind::NodeAdded, |_| Ok(()));
    bus.subscribe(EventKind::NodeRemoved, |_| Ok(()));
    bus.clear();

    assert_eq!(bus.publish(&Event::NodeAdded("node-a".into())), 0, "expected no NodeAdded handlers after clear");
    assert_eq!(bus.publish(&Event::NodeRemoved("node-a".into())), 0, "expected no NodeRemoved handlers after clear");
    assert_eq!(calls.load(Ordering::SeqCst), 0, "expected the removed handler to never be called");
    Ok(())
}
