//! End-to-end transport scenarios over a real socket pair.
//!
//! Each test stands up a publisher and a consumer on the two ends of one
//! channel pair and drives a realistic exchange: publish, consume, finish,
//! and observe the acknowledgements on the producer side.

use std::sync::Arc;

use evlink_core::event::{InputEvent, KeyAction, KeyEvent, Nanos};
use evlink_core::motion::{
    MotionAction, MotionEvent, PointerCoords, PointerProperties, ToolType,
};
use evlink_core::{DefaultEventFactory, Source};
use evlink_transport::{
    Body, Channel, Consumer, ConsumerResponse, Message, MessageType, Publisher, TransportError,
};

const MS: Nanos = 1_000_000;

/// Route transport logs through the test harness; `RUST_LOG=trace` shows
/// the full per-message trace on failures.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Harness {
    publisher: Publisher,
    consumer: Consumer,
    factory: DefaultEventFactory,
}

impl Harness {
    fn new(resample: bool) -> Self {
        init_tracing();
        let (server, client) = Channel::pair("e2e channel").expect("channel pair");
        Self {
            publisher: Publisher::new(Arc::new(server)),
            consumer: Consumer::with_resampling(Arc::new(client), resample),
            factory: DefaultEventFactory,
        }
    }

    fn publish_move(&mut self, seq: u32, event_time: Nanos, x: f32) {
        self.publish_motion(seq, MotionAction::Move.to_raw(), event_time, x);
    }

    fn publish_motion(&mut self, seq: u32, action: u32, event_time: Nanos, x: f32) {
        let event = motion_event(action, event_time, x);
        self.publisher
            .publish_motion_event(seq, &event)
            .expect("publish motion");
    }

    fn consume(
        &mut self,
        consume_batches: bool,
        frame_time: Option<Nanos>,
    ) -> Result<(u32, InputEvent), TransportError> {
        self.consumer
            .consume(&mut self.factory, consume_batches, frame_time)
    }

    fn drain_finished(&mut self) -> Vec<(u32, bool)> {
        let mut acks = Vec::new();
        loop {
            match self.publisher.receive_consumer_response() {
                Ok(ConsumerResponse::Finished { seq, handled, .. }) => acks.push((seq, handled)),
                Ok(other) => panic!("unexpected response: {other:?}"),
                Err(TransportError::WouldBlock) => break,
                Err(err) => panic!("unexpected receive error: {err}"),
            }
        }
        acks
    }
}

fn motion_event(action: u32, event_time: Nanos, x: f32) -> MotionEvent {
    let mut event = MotionEvent::new(
        vec![PointerProperties {
            id: 0,
            tool_type: ToolType::Finger,
        }],
        event_time,
        &[PointerCoords::from_xy(x, 0.0)],
    );
    event.device_id = 1;
    event.source = Source::TOUCHSCREEN;
    event.action = action;
    event
}

fn expect_motion(event: InputEvent) -> MotionEvent {
    match event {
        InputEvent::Motion(motion) => motion,
        other => panic!("expected motion event, got {other:?}"),
    }
}

#[test]
fn key_round_trip() {
    let mut h = Harness::new(false);
    let key = KeyEvent::new(KeyAction::Down, 29)
        .with_event_time(1_000)
        .with_device_id(2);
    h.publisher.publish_key_event(1, &key).expect("publish");

    let (seq, event) = h.consume(false, None).expect("consume");
    assert_eq!(seq, 1);
    let InputEvent::Key(received) = event else {
        panic!("expected key event");
    };
    assert_eq!(received, key);

    h.consumer.send_finished_signal(1, true).expect("finish");
    match h.publisher.receive_consumer_response().expect("response") {
        ConsumerResponse::Finished {
            seq,
            handled,
            consume_time,
        } => {
            assert_eq!(seq, 1);
            assert!(handled);
            assert!(consume_time > 0, "consume time is stamped at receive");
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

#[test]
fn batched_moves_fold_into_one_event_with_resampled_tail() {
    let mut h = Harness::new(true);

    // The gesture starts with a down, delivered immediately.
    h.publish_motion(9, MotionAction::Down.to_raw(), 0, 0.0);
    let (seq, _down) = h.consume(false, None).expect("down");
    assert_eq!(seq, 9);

    h.publish_move(10, 0, 0.0);
    h.publish_move(11, 5 * MS, 5.0);
    h.publish_move(12, 10 * MS, 10.0);

    // Frame at 12ms: samples up to 7ms (latency-adjusted) are folded; the
    // 10ms sample stays queued and drives interpolation of the tail.
    let (out_seq, event) = h.consume(true, Some(12 * MS)).expect("batched event");
    assert_eq!(out_seq, 11);
    let motion = expect_motion(event);
    assert_eq!(motion.history_size(), 2);
    assert_eq!(motion.sample_event_time(0), 0);
    assert_eq!(motion.sample_event_time(1), 5 * MS);
    assert_eq!(motion.event_time(), 7 * MS);

    let tail = motion.coords(0);
    assert!(tail.is_resampled);
    assert!(
        tail.x() > 5.0 && tail.x() < 10.0,
        "interpolated x = {}",
        tail.x()
    );
    assert!((tail.x() - 7.0).abs() < 1e-3);

    // One finish call acknowledges every folded sample.
    h.consumer.send_finished_signal(11, true).expect("finish");
    assert_eq!(h.drain_finished(), vec![(10, true), (11, true)]);

    // The remaining sample arrives with the next frame.
    let (out_seq, event) = h.consume(true, Some(20 * MS)).expect("next frame");
    assert_eq!(out_seq, 12);
    let motion = expect_motion(event);
    assert_eq!(motion.sample_event_time(0), 10 * MS);
}

#[test]
fn incompatible_action_flushes_batch_and_defers() {
    let mut h = Harness::new(true);
    h.publish_motion(9, MotionAction::Down.to_raw(), 0, 0.0);
    let _ = h.consume(false, None).expect("down");

    h.publish_move(10, 1 * MS, 1.0);
    h.publish_move(11, 2 * MS, 2.0);

    // A second finger goes down: the action word changes, so the batch can
    // no longer absorb samples.
    let mut pointer_down = MotionEvent::new(
        vec![
            PointerProperties {
                id: 0,
                tool_type: ToolType::Finger,
            },
            PointerProperties {
                id: 1,
                tool_type: ToolType::Finger,
            },
        ],
        3 * MS,
        &[
            PointerCoords::from_xy(2.0, 0.0),
            PointerCoords::from_xy(9.0, 9.0),
        ],
    );
    pointer_down.device_id = 1;
    pointer_down.source = Source::TOUCHSCREEN;
    pointer_down.action = MotionAction::PointerDown.with_pointer_index(1);
    h.publisher
        .publish_motion_event(12, &pointer_down)
        .expect("publish");

    // First consume flushes the accumulated batch...
    let (seq, event) = h.consume(false, None).expect("flushed batch");
    assert_eq!(seq, 11);
    let motion = expect_motion(event);
    assert_eq!(motion.sample_count(), 2);
    assert_eq!(motion.pointer_count(), 1);

    // ...and the deferred pointer-down arrives on the next call.
    let (seq, event) = h.consume(false, None).expect("deferred event");
    assert_eq!(seq, 12);
    let motion = expect_motion(event);
    assert_eq!(motion.pointer_count(), 2);
    assert_eq!(motion.masked_action(), MotionAction::PointerDown);
}

#[test]
fn cancel_swallows_the_batch() {
    let mut h = Harness::new(true);
    h.publish_motion(19, MotionAction::Down.to_raw(), 0, 0.0);
    let _ = h.consume(false, None).expect("down");
    h.consumer.send_finished_signal(19, true).expect("finish");
    let _ = h.drain_finished();

    h.publish_move(20, 1 * MS, 1.0);
    h.publish_move(21, 2 * MS, 2.0);
    h.publish_move(22, 3 * MS, 3.0);
    h.publish_motion(23, MotionAction::Cancel.to_raw(), 4 * MS, 3.0);

    // The cancel erases the batch without delivering anything; the socket
    // then runs dry.
    assert_eq!(h.consume(false, None), Err(TransportError::WouldBlock));
    assert!(!h.consumer.has_pending_batch());

    // Every swallowed sample was acked as unhandled; the cancel itself was
    // not delivered and not acked.
    assert_eq!(
        h.drain_finished(),
        vec![(20, false), (21, false), (22, false)]
    );
}

#[test]
fn peer_death_mid_ack_restores_the_chain() {
    init_tracing();
    let (server, client) = Channel::pair("dying channel").expect("channel pair");
    let server = Arc::new(server);
    let mut publisher = Publisher::new(server.clone());
    let mut consumer = Consumer::with_resampling(Arc::new(client), true);
    let mut factory = DefaultEventFactory;

    for (seq, t) in [(30u32, 1 * MS), (31, 2 * MS), (32, 3 * MS)] {
        let mut event = motion_event(MotionAction::Move.to_raw(), t, t as f32);
        event.source = Source::TOUCHSCREEN;
        publisher.publish_motion_event(seq, &event).expect("publish");
    }
    let (seq, _event) = consumer.consume(&mut factory, true, None).expect("event");
    assert_eq!(seq, 32);

    // Kill the producer side before any ack goes out.
    drop(publisher);
    drop(server);

    assert_eq!(
        consumer.send_finished_signal(32, true),
        Err(TransportError::DeadObject)
    );
    // The chain edges were restored, so a retry walks the same chain
    // instead of panicking over missing state.
    let dump = consumer.dump();
    assert!(dump.contains("seq=31 chain=30"), "dump: {dump}");
    assert!(dump.contains("seq=32 chain=31"), "dump: {dump}");
    assert_eq!(
        consumer.send_finished_signal(32, true),
        Err(TransportError::DeadObject)
    );
}

#[test]
fn extrapolation_is_clamped_to_the_prediction_bound() {
    let mut h = Harness::new(true);
    h.publish_motion(1, MotionAction::Down.to_raw(), 0, 0.0);
    let _ = h.consume(false, None).expect("down");
    h.publish_move(2, 5 * MS, 5.0);

    // Frame far in the future: sample time 20ms, but prediction may only
    // reach 5ms + min(5ms / 2, 8ms) = 7.5ms.
    let (seq, event) = h.consume(true, Some(25 * MS)).expect("event");
    assert_eq!(seq, 2);
    let motion = expect_motion(event);
    assert_eq!(motion.history_size(), 1);
    assert_eq!(motion.event_time(), 7 * MS + MS / 2);
    let tail = motion.coords(0);
    assert!(tail.is_resampled);
    assert!((tail.x() - 7.5).abs() < 1e-3, "extrapolated x = {}", tail.x());
}

#[test]
fn non_movement_events_bypass_an_accumulating_batch() {
    let mut h = Harness::new(true);
    h.publish_move(40, 1 * MS, 1.0);
    h.publish_move(41, 2 * MS, 2.0);
    h.publisher
        .publish_focus_event(
            42,
            &evlink_core::event::FocusEvent {
                event_id: 7,
                has_focus: true,
            },
        )
        .expect("publish focus");

    // The focus event is delivered while the moves keep batching.
    let (seq, event) = h.consume(false, None).expect("focus");
    assert_eq!(seq, 42);
    assert!(matches!(event, InputEvent::Focus(_)));
    assert!(h.consumer.has_pending_batch());
}

#[test]
fn timeline_reports_reach_the_publisher() {
    let mut h = Harness::new(false);
    h.consumer
        .send_timeline(
            55,
            evlink_transport::GraphicsTimeline {
                gpu_completed_time: 100 * MS,
                present_time: 116 * MS,
            },
        )
        .expect("send timeline");

    match h.publisher.receive_consumer_response().expect("response") {
        ConsumerResponse::Timeline {
            input_event_id,
            timeline,
        } => {
            assert_eq!(input_event_id, 55);
            assert_eq!(timeline.gpu_completed_time, 100 * MS);
            assert_eq!(timeline.present_time, 116 * MS);
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

#[test]
fn wrong_direction_message_is_rejected_by_the_publisher() {
    let (server, client) = Channel::pair("backwards").expect("channel pair");
    let mut publisher = Publisher::new(Arc::new(server));
    // A raw key message sent consumer-to-producer is a protocol violation.
    client
        .send(&Message {
            seq: 1,
            body: Body::Key(KeyEvent::new(KeyAction::Down, 30)),
        })
        .expect("send");
    assert_eq!(
        publisher.receive_consumer_response(),
        Err(TransportError::UnexpectedMessage)
    );
    drop(client);
}

#[test]
fn every_event_kind_round_trips() {
    let mut h = Harness::new(false);
    h.publisher
        .publish_capture_event(
            1,
            &evlink_core::event::CaptureEvent {
                event_id: 10,
                pointer_capture_enabled: true,
            },
        )
        .expect("capture");
    h.publisher
        .publish_drag_event(
            2,
            &evlink_core::event::DragEvent {
                event_id: 11,
                x: 3.5,
                y: -1.0,
                is_exiting: false,
            },
        )
        .expect("drag");
    h.publisher
        .publish_touch_mode_event(
            3,
            &evlink_core::event::TouchModeEvent {
                event_id: 12,
                is_in_touch_mode: true,
            },
        )
        .expect("touch mode");

    let (seq, event) = h.consume(false, None).expect("capture");
    assert_eq!(seq, 1);
    assert!(matches!(event, InputEvent::Capture(_)));
    let (seq, event) = h.consume(false, None).expect("drag");
    assert_eq!(seq, 2);
    let InputEvent::Drag(drag) = event else {
        panic!("expected drag");
    };
    assert_eq!(drag.x, 3.5);
    let (seq, event) = h.consume(false, None).expect("touch mode");
    assert_eq!(seq, 3);
    assert!(matches!(event, InputEvent::TouchMode(_)));

    // Acks may be sent in any order the application likes.
    h.consumer.send_finished_signal(2, true).expect("finish 2");
    h.consumer.send_finished_signal(1, false).expect("finish 1");
    h.consumer.send_finished_signal(3, true).expect("finish 3");
    assert_eq!(
        h.drain_finished(),
        vec![(2, true), (1, false), (3, true)]
    );
}

#[test]
fn ordering_is_preserved_within_a_batch() {
    let mut h = Harness::new(false);
    let times: Vec<Nanos> = (0..8).map(|i| i * MS).collect();
    for (i, t) in times.iter().enumerate() {
        h.publish_move(100 + i as u32, *t, *t as f32);
    }
    let (seq, event) = h.consume(true, None).expect("event");
    assert_eq!(seq, 107);
    let motion = expect_motion(event);
    assert_eq!(motion.sample_count(), times.len());
    for (i, t) in times.iter().enumerate() {
        assert_eq!(motion.sample_event_time(i), *t);
    }
}

#[test]
fn finished_messages_match_the_wire_format() {
    // Peek at the raw datagram the consumer produces for an ack.
    let (server, client) = Channel::pair("raw finished").expect("channel pair");
    let server = Arc::new(server);
    let mut publisher = Publisher::new(server.clone());
    let mut consumer = Consumer::with_resampling(Arc::new(client), false);
    let mut factory = DefaultEventFactory;

    publisher
        .publish_key_event(8, &KeyEvent::new(KeyAction::Down, 30))
        .expect("publish");
    let (seq, _event) = consumer.consume(&mut factory, false, None).expect("consume");
    consumer.send_finished_signal(seq, false).expect("finish");

    let msg = server.receive().expect("raw receive");
    assert_eq!(msg.message_type(), MessageType::Finished);
    assert_eq!(msg.seq, 8);
    let Body::Finished(finished) = msg.body else {
        panic!("expected finished body");
    };
    assert!(!finished.handled);
    assert!(finished.consume_time > 0);
}
