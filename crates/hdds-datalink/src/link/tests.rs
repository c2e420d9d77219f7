// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Link lifecycle and reservation tests.

use super::*;
use crate::ack::decode_acks;
use crate::listener::{EndpointListener, SubscriptionListener};
use crate::timer::ManualTimer;
use std::sync::atomic::AtomicUsize;

fn id(participant: u64, entity: u32) -> EndpointId {
    EndpointId::from_keys(participant, entity)
}

#[derive(Default)]
struct RecordingOwner {
    stopped: Mutex<Vec<LinkId>>,
    released: Mutex<Vec<LinkId>>,
}

impl LinkOwner for RecordingOwner {
    fn link_stopped(&self, link: LinkId) {
        self.stopped.lock().push(link);
    }

    fn release_link_resources(&self, link: Arc<Link>) {
        self.released.lock().push(link.id());
    }
}

#[derive(Default)]
struct CountingSend {
    clears: AtomicUsize,
    stops: AtomicUsize,
    acks: Mutex<Vec<(Vec<u8>, ByteOrder)>>,
}

impl SendStrategy for CountingSend {
    fn clear(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn send_acks(&self, payload: &[u8], order: ByteOrder) -> Result<()> {
        self.acks.lock().push((payload.to_vec(), order));
        Ok(())
    }
}

#[derive(Default)]
struct CountingReceiver {
    samples: AtomicUsize,
}

impl ReceiveListener for CountingReceiver {
    fn data_received(&self, _sample: &ReceivedSample) {
        self.samples.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct RecordingReader {
    lost: Mutex<Vec<EndpointId>>,
    removed: Mutex<Vec<EndpointId>>,
}

impl EndpointListener for RecordingReader {
    fn notify_lost(&self, peers: &[EndpointId]) {
        self.lost.lock().extend_from_slice(peers);
    }

    fn remove_associations(&self, peers: &[EndpointId], _notify_lost: bool) {
        self.removed.lock().extend_from_slice(peers);
    }
}

impl SubscriptionListener for RecordingReader {}

struct Fixture {
    registry: Arc<AssociationRegistry>,
    timer: Arc<ManualTimer>,
    owner: Arc<RecordingOwner>,
    send: Arc<CountingSend>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            registry: Arc::new(AssociationRegistry::new()),
            timer: Arc::new(ManualTimer::new()),
            owner: Arc::new(RecordingOwner::default()),
            send: Arc::new(CountingSend::default()),
        }
    }

    fn link(&self, release_delay: Duration, keep_idle: bool) -> Arc<Link> {
        let owner: Arc<dyn LinkOwner> = self.owner.clone();
        let context = LinkContext {
            registry: Arc::clone(&self.registry),
            timer: self.timer.clone(),
            owner: Some(Arc::downgrade(&owner)),
        };
        let strategies = LinkStrategies {
            send: Some(self.send.clone()),
            receive: None,
        };
        Link::new(
            LinkSettings {
                release_delay,
                keep_idle,
            },
            context,
            strategies,
        )
    }
}

#[test]
fn test_link_ids_are_unique() {
    let fixture = Fixture::new();
    let a = fixture.link(Duration::ZERO, false);
    let b = fixture.link(Duration::ZERO, false);
    assert_ne!(a.id(), b.id());
    assert_eq!(LinkId::from_raw(9).to_string(), "9");
}

#[test]
fn test_reservations_fill_both_maps() {
    let fixture = Fixture::new();
    let link = fixture.link(Duration::ZERO, false);
    let local_pub = id(1, 1);
    let remote_sub = id(2, 1);
    let remote_pub = id(2, 2);
    let local_sub = id(1, 2);

    link.make_reservation_as_publisher(remote_sub, local_pub)
        .expect("publisher reservation");
    link.make_reservation_as_subscriber(remote_pub, local_sub, Arc::new(CountingReceiver::default()))
        .expect("subscriber reservation");

    assert_eq!(link.association_count(), 4);
    assert!(link.has_association(&remote_sub, &local_pub));
    assert!(link.has_association(&remote_pub, &local_sub));
    assert!(link.is_target(&remote_sub));
    assert_eq!(link.peer_ids(&local_pub), vec![remote_sub]);
    assert_eq!(link.peer_ids(&local_sub), vec![remote_pub]);
    assert!(link.check_invariants().is_ok());
}

#[test]
fn test_unknown_ids_are_rejected() {
    let fixture = Fixture::new();
    let link = fixture.link(Duration::ZERO, false);
    let err = link
        .make_reservation_as_publisher(EndpointId::UNKNOWN, id(1, 1))
        .unwrap_err();
    assert_eq!(err, Error::InvalidEndpoint);
    assert!(link.is_empty());
}

#[test]
fn test_release_to_zero_stops_immediately() {
    let fixture = Fixture::new();
    let link = fixture.link(Duration::ZERO, false);
    let local_pub = id(1, 1);
    let remote_sub = id(2, 1);
    link.make_reservation_as_publisher(remote_sub, local_pub)
        .expect("reserve");

    let mut released = ReleasedLocals::new();
    let outcome = link.release_reservations(remote_sub, local_pub, &mut released);

    assert_eq!(outcome, ReleaseOutcome::Released);
    assert_eq!(released.links_for(&local_pub), &[link.id()]);
    assert_eq!(link.state(), LinkState::Stopped);
    assert_eq!(*fixture.owner.stopped.lock(), vec![link.id()]);
    assert_eq!(fixture.send.stops.load(Ordering::SeqCst), 1);

    let err = link
        .make_reservation_as_publisher(remote_sub, local_pub)
        .unwrap_err();
    assert_eq!(err, Error::LinkStopped(link.id()));
}

#[test]
fn test_delayed_release_stops_after_deadline() {
    let fixture = Fixture::new();
    let delay = Duration::from_millis(500);
    let link = fixture.link(delay, false);
    let local_sub = id(1, 2);
    let remote_pub = id(2, 2);
    link.make_reservation_as_subscriber(remote_pub, local_sub, Arc::new(CountingReceiver::default()))
        .expect("reserve");

    let mut released = ReleasedLocals::new();
    link.release_reservations(remote_pub, local_sub, &mut released);
    assert!(released.contains(&local_sub));
    assert!(matches!(link.state(), LinkState::Stopping { .. }));
    assert_eq!(fixture.send.clears.load(Ordering::SeqCst), 1);

    fixture.timer.advance(Duration::from_millis(499));
    assert!(matches!(link.state(), LinkState::Stopping { .. }));

    fixture.timer.advance(Duration::from_millis(1));
    assert_eq!(link.state(), LinkState::Stopped);
    assert_eq!(*fixture.owner.stopped.lock(), vec![link.id()]);
}

#[test]
fn test_reservation_during_stopping_cancels_release() {
    let fixture = Fixture::new();
    let link = fixture.link(Duration::from_secs(1), false);
    let local_pub = id(1, 1);
    let remote_sub = id(2, 1);
    link.make_reservation_as_publisher(remote_sub, local_pub)
        .expect("reserve");
    link.release_reservations(remote_sub, local_pub, &mut ReleasedLocals::new());
    assert_eq!(fixture.timer.pending_count(), 1);

    link.make_reservation_as_publisher(id(3, 1), local_pub)
        .expect("reuse");
    assert_eq!(link.state(), LinkState::Active);
    assert_eq!(fixture.timer.pending_count(), 0);

    fixture.timer.advance(Duration::from_secs(5));
    assert_eq!(link.state(), LinkState::Active);
    assert!(fixture.owner.stopped.lock().is_empty());
}

#[test]
fn test_release_after_stop_does_not_stop_twice() {
    let fixture = Fixture::new();
    let link = fixture.link(Duration::ZERO, false);
    let local_pub = id(1, 1);
    let remote_sub = id(2, 1);
    link.make_reservation_as_publisher(remote_sub, local_pub)
        .expect("reserve");

    link.stop();
    assert_eq!(fixture.send.stops.load(Ordering::SeqCst), 1);

    let mut released = ReleasedLocals::new();
    assert_eq!(
        link.release_reservations(remote_sub, local_pub, &mut released),
        ReleaseOutcome::Released
    );
    assert!(released.contains(&local_pub));
    assert!(link.is_empty());
    assert_eq!(link.state(), LinkState::Stopped);
    assert_eq!(fixture.send.stops.load(Ordering::SeqCst), 1);
    assert_eq!(fixture.send.clears.load(Ordering::SeqCst), 0);
    assert_eq!(*fixture.owner.stopped.lock(), vec![link.id()]);
}

#[test]
fn test_cancel_release_keeps_emptied_link_usable() {
    let fixture = Fixture::new();
    let link = fixture.link(Duration::from_millis(300), false);
    let local_pub = id(1, 1);
    link.make_reservation_as_publisher(id(2, 1), local_pub)
        .expect("reserve");
    link.release_reservations(id(2, 1), local_pub, &mut ReleasedLocals::new());
    assert!(matches!(link.state(), LinkState::Stopping { .. }));

    fixture.timer.advance(Duration::from_millis(100));
    assert!(link.cancel_release());
    assert_eq!(link.state(), LinkState::Active);
    assert_eq!(fixture.timer.pending_count(), 0);

    // Well past the original deadline.
    fixture.timer.advance(Duration::from_secs(1));
    assert_eq!(link.state(), LinkState::Active);
    assert!(fixture.owner.stopped.lock().is_empty());
    assert_eq!(fixture.send.stops.load(Ordering::SeqCst), 0);

    link.make_reservation_as_publisher(id(3, 1), local_pub)
        .expect("reserve after cancel");
    assert!(link.has_association(&id(3, 1), &local_pub));
    assert_eq!(link.association_count(), 2);
}

#[test]
fn test_stale_timeout_is_ignored() {
    let fixture = Fixture::new();
    let link = fixture.link(Duration::from_secs(1), false);
    assert!(link.schedule_delayed_release());
    assert!(!link.schedule_delayed_release());
    assert!(link.cancel_release());
    assert!(!link.cancel_release());

    // Generation 1 was cancelled; a late delivery must not stop the link.
    link.handle_release_timeout(1);
    assert_eq!(link.state(), LinkState::Active);
}

#[test]
fn test_timeout_with_associations_reactivates() {
    let fixture = Fixture::new();
    let link = fixture.link(Duration::from_millis(10), false);
    assert!(link.schedule_delayed_release());
    link.make_reservation_as_publisher(id(2, 1), id(1, 1))
        .expect("reserve");
    // The reservation already cancelled the timer; firing the old
    // generation by hand is a no-op.
    link.handle_release_timeout(1);
    assert_eq!(link.state(), LinkState::Active);
    assert_eq!(link.association_count(), 2);
}

#[test]
fn test_keep_idle_parks_instead_of_stopping() {
    let fixture = Fixture::new();
    let link = fixture.link(Duration::ZERO, true);
    link.make_reservation_as_publisher(id(2, 1), id(1, 1))
        .expect("reserve");
    link.release_reservations(id(2, 1), id(1, 1), &mut ReleasedLocals::new());

    assert_eq!(link.state(), LinkState::Active);
    assert!(link.is_empty());
    assert_eq!(fixture.send.clears.load(Ordering::SeqCst), 1);
    assert_eq!(fixture.send.stops.load(Ordering::SeqCst), 0);
}

#[test]
fn test_release_of_unknown_or_unpaired_remote() {
    let fixture = Fixture::new();
    let link = fixture.link(Duration::ZERO, false);
    let local_pub = id(1, 1);
    link.make_reservation_as_publisher(id(2, 1), local_pub)
        .expect("reserve");

    let mut released = ReleasedLocals::new();
    assert_eq!(
        link.release_reservations(id(9, 9), local_pub, &mut released),
        ReleaseOutcome::UnknownRemote
    );
    assert_eq!(
        link.release_reservations(id(2, 1), id(1, 7), &mut released),
        ReleaseOutcome::NotAssociated
    );
    assert!(released.is_empty());
    assert_eq!(link.state(), LinkState::Active);
    assert_eq!(link.association_count(), 2);
}

#[test]
fn test_local_recorded_only_when_last_peer_goes() {
    let fixture = Fixture::new();
    let link = fixture.link(Duration::ZERO, false);
    let local_pub = id(1, 1);
    link.make_reservation_as_publisher(id(2, 1), local_pub)
        .expect("reserve");
    link.make_reservation_as_publisher(id(3, 1), local_pub)
        .expect("reserve");

    let mut released = ReleasedLocals::new();
    link.release_reservations(id(2, 1), local_pub, &mut released);
    assert!(released.is_empty());
    link.release_reservations(id(3, 1), local_pub, &mut released);
    assert_eq!(released.len(), 1);
    assert_eq!(
        released.into_entries(),
        vec![(local_pub, vec![link.id()])]
    );
}

#[test]
fn test_data_received_fans_out() {
    let fixture = Fixture::new();
    let link = fixture.link(Duration::ZERO, false);
    let remote_pub = id(2, 2);
    let first = Arc::new(CountingReceiver::default());
    let second = Arc::new(CountingReceiver::default());
    link.make_reservation_as_subscriber(remote_pub, id(1, 2), first.clone())
        .expect("reserve");
    link.make_reservation_as_subscriber(remote_pub, id(1, 3), second.clone())
        .expect("reserve");

    let sample = ReceivedSample {
        publisher_id: remote_pub,
        sequence: 1,
        payload: vec![1, 2, 3],
    };
    assert_eq!(link.data_received(&sample), 2);
    assert!(link.data_received_for(&sample, &id(1, 3)));
    assert_eq!(first.samples.load(Ordering::SeqCst), 1);
    assert_eq!(second.samples.load(Ordering::SeqCst), 2);

    let stray = ReceivedSample {
        publisher_id: id(7, 7),
        ..sample
    };
    assert_eq!(link.data_received(&stray), 0);
}

#[test]
fn test_notify_reaches_registered_locals_only() {
    let fixture = Fixture::new();
    let link = fixture.link(Duration::ZERO, false);
    let reader = Arc::new(RecordingReader::default());
    let local_sub = id(1, 2);
    fixture
        .registry
        .register_subscription(local_sub, reader.clone())
        .expect("register");

    let remote_pub = id(2, 2);
    link.make_reservation_as_subscriber(remote_pub, local_sub, Arc::new(CountingReceiver::default()))
        .expect("reserve");

    // pub_map key is remote, sub_map key is the registered reader.
    assert_eq!(link.notify(ConnectionNotice::Lost), 1);
    assert_eq!(*reader.lost.lock(), vec![remote_pub]);
}

#[test]
fn test_marshal_acks_round_trips_sub_map() {
    let fixture = Fixture::new();
    let link = fixture.link(Duration::ZERO, false);
    let remote_pub = id(2, 2);
    link.make_reservation_as_subscriber(remote_pub, id(1, 2), Arc::new(CountingReceiver::default()))
        .expect("reserve");

    let payload = link.marshal_acks(ByteOrder::Big).expect("encode");
    let decoded = decode_acks(&payload, ByteOrder::Big).expect("decode");
    assert!(decoded.find(&remote_pub).is_some_and(|subs| subs.contains(&id(1, 2))));

    link.fully_associated().expect("send acks");
    let sent = fixture.send.acks.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, ByteOrder::native());
}

#[test]
fn test_release_resources_hands_link_to_owner() {
    let fixture = Fixture::new();
    let link = fixture.link(Duration::from_secs(10), false);
    link.make_reservation_as_publisher(id(2, 1), id(1, 1))
        .expect("reserve");

    assert!(link.release_resources());
    assert!(link.is_empty());
    assert_eq!(link.state(), LinkState::Stopped);
    assert_eq!(*fixture.owner.stopped.lock(), vec![link.id()]);
    assert_eq!(*fixture.owner.released.lock(), vec![link.id()]);
}

#[test]
fn test_clear_associations_detaches_registered_locals() {
    let fixture = Fixture::new();
    let link = fixture.link(Duration::ZERO, false);
    let reader = Arc::new(RecordingReader::default());
    let local_sub = id(1, 2);
    fixture
        .registry
        .register_subscription(local_sub, reader.clone())
        .expect("register");
    link.make_reservation_as_subscriber(id(2, 2), local_sub, Arc::new(CountingReceiver::default()))
        .expect("reserve");

    link.prepare_release();
    assert!(link.is_empty());
    assert_eq!(link.clear_associations(), 1);
    assert_eq!(*reader.removed.lock(), vec![id(2, 2)]);
    // Already drained.
    assert_eq!(link.clear_associations(), 0);
}

#[test]
fn test_transport_shutdown_skips_owner() {
    let fixture = Fixture::new();
    let link = fixture.link(Duration::from_secs(1), false);
    link.make_reservation_as_publisher(id(2, 1), id(1, 1))
        .expect("reserve");

    link.transport_shutdown();
    assert_eq!(link.state(), LinkState::Stopped);
    assert!(link.is_empty());
    assert!(fixture.owner.stopped.lock().is_empty());
    assert_eq!(fixture.send.stops.load(Ordering::SeqCst), 1);
}
