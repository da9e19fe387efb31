use std::sync::{Arc, Mutex};

use futures::StreamExt;

use urlstream_core::stream::{Completion, EventStream, StreamEvent, StreamObserver};

mod common;
use common::drain;

type TestStream = EventStream<u32, String>;

// ---------------------------------------------------------------
// push / close ordering
// ---------------------------------------------------------------

#[test]
fn test_subscriber_sees_values_then_terminal_in_order() {
    let stream = TestStream::new();
    let mut sub = stream.subscribe();

    assert!(stream.push(1));
    assert!(stream.push(2));
    assert!(stream.close(Completion::Finished));

    assert_eq!(
        drain(&mut sub),
        vec![StreamEvent::Value(1), StreamEvent::Value(2), StreamEvent::Finished]
    );
}

#[test]
fn test_push_after_close_is_a_no_op() {
    let stream = TestStream::new();
    let mut sub = stream.subscribe();

    stream.push(7);
    stream.close(Completion::Failed("boom".to_string()));

    assert!(!stream.push(8), "push after terminal must be rejected");
    assert!(!stream.close(Completion::Finished), "second close must be rejected");
    assert!(!stream.complete_with(9));

    assert_eq!(
        drain(&mut sub),
        vec![StreamEvent::Value(7), StreamEvent::Failed("boom".to_string())]
    );
    assert_eq!(stream.completion(), Some(Completion::Failed("boom".to_string())));
    assert_eq!(stream.latest(), Some(7));
}

#[test]
fn test_complete_with_pushes_value_and_finishes() {
    let stream = TestStream::new();
    let mut sub = stream.subscribe();

    assert!(stream.complete_with(42));
    assert!(stream.is_terminated());
    assert_eq!(
        drain(&mut sub),
        vec![StreamEvent::Value(42), StreamEvent::Finished]
    );
}

#[test]
fn test_all_subscribers_receive_the_same_sequence() {
    let stream = TestStream::new();
    let mut first = stream.subscribe();
    let mut second = stream.subscribe();
    assert_eq!(stream.subscriber_count(), 2);

    for v in 0..5 {
        stream.push(v);
    }
    stream.close(Completion::Finished);

    let a = drain(&mut first);
    let b = drain(&mut second);
    assert_eq!(a.len(), 6);
    assert_eq!(a, b);
    assert_eq!(stream.subscriber_count(), 0, "observers are released after termination");
}

// ---------------------------------------------------------------
// late subscribers
// ---------------------------------------------------------------

#[test]
fn test_new_subscriber_is_seeded_with_latest_value() {
    let stream = TestStream::new();
    stream.push(1);
    stream.push(2);

    let mut sub = stream.subscribe();
    stream.push(3);

    assert_eq!(drain(&mut sub), vec![StreamEvent::Value(2), StreamEvent::Value(3)]);
}

#[tokio::test]
async fn test_subscriber_after_termination_gets_terminal_then_end() {
    let stream = TestStream::new();
    stream.complete_with(5);

    let mut sub = stream.subscribe();
    assert_eq!(sub.next_event().await, Some(StreamEvent::Value(5)));
    assert_eq!(sub.next_event().await, Some(StreamEvent::Finished));
    assert_eq!(sub.next_event().await, None);
    assert_eq!(stream.subscriber_count(), 0);
}

// ---------------------------------------------------------------
// Subscription as a futures::Stream
// ---------------------------------------------------------------

#[tokio::test]
async fn test_subscription_is_a_futures_stream_that_ends_after_terminal() {
    let stream = TestStream::new();
    let sub = stream.subscribe();

    let producer = stream.clone();
    let handle = tokio::spawn(async move {
        for v in 10..13 {
            producer.push(v);
            tokio::task::yield_now().await;
        }
        producer.close(Completion::Finished);
    });

    let events: Vec<_> = sub.collect().await;
    handle.await.unwrap();

    assert_eq!(
        events,
        vec![
            StreamEvent::Value(10),
            StreamEvent::Value(11),
            StreamEvent::Value(12),
            StreamEvent::Finished,
        ]
    );
}

#[test]
fn test_dropped_subscription_is_pruned() {
    let stream = TestStream::new();
    let sub = stream.subscribe();
    assert_eq!(stream.subscriber_count(), 1);

    drop(sub);
    assert!(stream.push(1));
    assert_eq!(stream.subscriber_count(), 0);
}

// ---------------------------------------------------------------
// callback observers
// ---------------------------------------------------------------

#[test]
fn test_sink_receives_values_and_single_terminal() {
    let stream = TestStream::new();
    let values = Arc::new(Mutex::new(Vec::new()));
    let terminals = Arc::new(Mutex::new(Vec::new()));

    let v = Arc::clone(&values);
    let t = Arc::clone(&terminals);
    let _handle = stream.sink(
        move |value: &u32| v.lock().unwrap().push(*value),
        move |completion: &Completion<String>| t.lock().unwrap().push(completion.clone()),
    );

    stream.push(1);
    stream.close(Completion::Finished);
    stream.close(Completion::Failed("late".to_string()));
    stream.push(2);

    assert_eq!(*values.lock().unwrap(), vec![1]);
    assert_eq!(*terminals.lock().unwrap(), vec![Completion::Finished]);
}

#[test]
fn test_dropping_sink_handle_detaches_observer() {
    let stream = TestStream::new();
    let values = Arc::new(Mutex::new(Vec::new()));

    let v = Arc::clone(&values);
    let handle = stream.sink(move |value: &u32| v.lock().unwrap().push(*value), |_| {});
    stream.push(1);
    handle.cancel();
    stream.push(2);

    assert_eq!(*values.lock().unwrap(), vec![1]);
    assert_eq!(stream.subscriber_count(), 0);
}

struct CountingObserver {
    values: Arc<Mutex<u32>>,
    terminals: Arc<Mutex<u32>>,
}

impl StreamObserver<u32, String> for CountingObserver {
    fn on_value(&mut self, _value: &u32) {
        *self.values.lock().unwrap() += 1;
    }

    fn on_terminal(&mut self, _completion: &Completion<String>) {
        *self.terminals.lock().unwrap() += 1;
    }
}

#[test]
fn test_custom_observer_sees_exactly_one_terminal_under_concurrent_closers() {
    let stream = TestStream::new();
    let values = Arc::new(Mutex::new(0));
    let terminals = Arc::new(Mutex::new(0));

    let _handle = stream.add_observer(Box::new(CountingObserver {
        values: Arc::clone(&values),
        terminals: Arc::clone(&terminals),
    }));

    let threads: Vec<_> = (0..8)
        .map(|i| {
            let stream = stream.clone();
            std::thread::spawn(move || {
                stream.push(i);
                stream.close(if i % 2 == 0 {
                    Completion::Finished
                } else {
                    Completion::Failed(format!("closer {i}"))
                })
            })
        })
        .collect();

    let winners = threads
        .into_iter()
        .map(|t| t.join().unwrap())
        .filter(|closed| *closed)
        .count();

    assert_eq!(winners, 1, "exactly one close wins");
    assert_eq!(*terminals.lock().unwrap(), 1);
    assert!(*values.lock().unwrap() >= 1);
}
