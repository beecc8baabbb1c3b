use std::{
    cell::RefCell,
    rc::Rc,
    sync::{Arc, Barrier},
    thread,
    time::Duration,
};

use barstate_shared_util::ModuleKey;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::{Consumer, StateStore};

type Seen = Rc<RefCell<Vec<(ModuleKey, Value)>>>;

fn recording_consumer(store: &Arc<StateStore>, key: &ModuleKey) -> (Consumer, Seen) {
    let mut consumer = Consumer::new(store.clone());
    let seen: Seen = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = seen.clone();
    consumer.subscribe(key, move |key, value| {
        seen_clone.borrow_mut().push((key.clone(), value.clone()));
        Ok(())
    });
    (consumer, seen)
}

#[test]
fn test_read_your_write() {
    let store = StateStore::new();
    let key = ModuleKey::from("cpu");
    assert_eq!(store.get(&key), None);

    store.update(&key, json!({"text": "3%"}));
    assert_eq!(*store.get(&key).unwrap(), json!({"text": "3%"}));

    store.update(&key, json!({"text": "5%"}));
    assert_eq!(*store.get(&key).unwrap(), json!({"text": "5%"}));
}

#[test]
fn test_null_is_distinct_from_absent() {
    let store = StateStore::new();
    let key = ModuleKey::from("weather");
    store.update(&key, Value::Null);
    assert_eq!(store.get(&key).as_deref(), Some(&Value::Null));
    assert_eq!(store.get(&ModuleKey::from("other")), None);
    assert_eq!(store.keys(), vec![key]);
    assert_eq!(store.len(), 1);
}

#[test]
fn test_subscribing_does_not_create_entries() {
    let store = Arc::new(StateStore::new());
    let (_consumer, seen) = recording_consumer(&store, &ModuleKey::from("later"));
    assert!(store.is_empty());
    assert_eq!(store.subscriber_count(&ModuleKey::from("later")), 1);
    assert!(seen.borrow().is_empty());
}

#[test]
fn test_notifications_arrive_in_order() {
    let store = Arc::new(StateStore::new());
    let key = ModuleKey::from("clock");
    let (mut consumer, seen) = recording_consumer(&store, &key);

    for i in 0..10 {
        store.update(&key, json!({ "n": i }));
    }
    assert_eq!(consumer.dispatch_pending(), 10);

    let values: Vec<_> = seen.borrow().iter().map(|(_, v)| v["n"].as_i64().unwrap()).collect();
    assert_eq!(values, (0..10).collect::<Vec<_>>());
}

#[test]
fn test_every_subscriber_of_a_key_is_notified() {
    let store = Arc::new(StateStore::new());
    let key = ModuleKey::from("battery");
    let (mut first, first_seen) = recording_consumer(&store, &key);
    let (mut second, second_seen) = recording_consumer(&store, &key);
    let (mut unrelated, unrelated_seen) = recording_consumer(&store, &ModuleKey::from("network"));
    assert_eq!(store.subscriber_count(&key), 2);

    store.update(&key, json!({"text": "80%"}));
    first.dispatch_pending();
    second.dispatch_pending();
    unrelated.dispatch_pending();

    assert_eq!(first_seen.borrow().len(), 1);
    assert_eq!(second_seen.borrow().len(), 1);
    assert!(unrelated_seen.borrow().is_empty());
}

#[test]
fn test_subscribe_delivers_snapshot() {
    let store = Arc::new(StateStore::new());
    let key = ModuleKey::from("weather");
    store.update(&key, json!({"text": "rain"}));

    let (mut consumer, seen) = recording_consumer(&store, &key);
    consumer.dispatch_pending();
    assert_eq!(*seen.borrow(), vec![(key, json!({"text": "rain"}))]);
}

#[test]
fn test_subscribe_then_unsubscribe_never_calls_back() {
    let store = Arc::new(StateStore::new());
    let key = ModuleKey::from("weather");
    store.update(&key, json!({"text": "sun"}));

    let mut consumer = Consumer::new(store.clone());
    let calls = Rc::new(RefCell::new(0));
    let calls_clone = calls.clone();
    let id = consumer.subscribe(&key, move |_, _| {
        *calls_clone.borrow_mut() += 1;
        Ok(())
    });
    consumer.unsubscribe(id);

    assert_eq!(consumer.dispatch_pending(), 0);
    assert_eq!(*calls.borrow(), 0);
}

#[test]
fn test_no_callback_after_unsubscribe() {
    let store = Arc::new(StateStore::new());
    let key = ModuleKey::from("cpu");
    let mut consumer = Consumer::new(store.clone());
    let calls = Rc::new(RefCell::new(0));
    let calls_clone = calls.clone();
    let id = consumer.subscribe(&key, move |_, _| {
        *calls_clone.borrow_mut() += 1;
        Ok(())
    });

    store.update(&key, json!(1));
    assert_eq!(consumer.dispatch_pending(), 1);

    // queued but not yet dispatched when the subscription goes away
    store.update(&key, json!(2));
    store.unsubscribe(id);
    for i in 0..100 {
        store.update(&key, json!(i));
    }
    assert_eq!(consumer.dispatch_pending(), 0);
    assert_eq!(*calls.borrow(), 1);
    assert_eq!(store.subscriber_count(&key), 0);
}

#[test]
fn test_unsubscribe_is_idempotent() {
    let store = Arc::new(StateStore::new());
    let mut consumer = Consumer::new(store.clone());
    let id = consumer.subscribe(&ModuleKey::from("cpu"), |_, _| Ok(()));
    consumer.unsubscribe(id);
    consumer.unsubscribe(id);
    store.unsubscribe(id);
    assert_eq!(consumer.subscription_count(), 0);
}

#[test]
fn test_failing_callbacks_dont_affect_others() {
    let store = Arc::new(StateStore::new());
    let key = ModuleKey::from("media");
    let mut consumer = Consumer::new(store.clone());
    let reached = Rc::new(RefCell::new(Vec::new()));

    consumer.subscribe(&key, |_, _| Err(anyhow::anyhow!("widget is gone")));
    consumer.subscribe(&key, |_, _| panic!("callback blew up"));
    let reached_clone = reached.clone();
    consumer.subscribe(&key, move |_, value| {
        reached_clone.borrow_mut().push(value.clone());
        Ok(())
    });

    store.update(&key, json!({"text": "playing"}));
    store.update(&key, json!({"text": "paused"}));
    assert_eq!(consumer.dispatch_pending(), 6);
    assert_eq!(*reached.borrow(), vec![json!({"text": "playing"}), json!({"text": "paused"})]);
}

#[test]
fn test_callbacks_run_on_consumer_thread() {
    let store = Arc::new(StateStore::new());
    let key = ModuleKey::from("net");
    let consumer_thread = thread::current().id();
    let mut consumer = Consumer::new(store.clone());
    let ran_on = Rc::new(RefCell::new(Vec::new()));
    let ran_on_clone = ran_on.clone();
    consumer.subscribe(&key, move |_, _| {
        ran_on_clone.borrow_mut().push(thread::current().id());
        Ok(())
    });

    let producer_store = store.clone();
    let producer_key = key.clone();
    thread::spawn(move || producer_store.update(&producer_key, json!({"text": "up"}))).join().unwrap();

    assert_eq!(consumer.dispatch_pending(), 1);
    assert_eq!(*ran_on.borrow(), vec![consumer_thread]);
}

#[tokio::test]
async fn test_run_delivers_updates_from_another_thread_until_cancelled() {
    const UPDATES: i64 = 500;

    let store = Arc::new(StateStore::new());
    let key = ModuleKey::from("volume");
    let mut consumer = Consumer::new(store.clone());
    let cancel = CancellationToken::new();
    let consumer_thread = thread::current().id();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = seen.clone();
    let cancel_clone = cancel.clone();
    consumer.subscribe(&key, move |_, value| {
        assert_eq!(thread::current().id(), consumer_thread);
        seen_clone.borrow_mut().push(value.as_i64().unwrap());
        if value == &json!(UPDATES - 1) {
            cancel_clone.cancel();
        }
        Ok(())
    });

    let producer = {
        let store = store.clone();
        let key = key.clone();
        thread::spawn(move || {
            for n in 0..UPDATES {
                store.update(&key, json!(n));
            }
        })
    };

    let finished = tokio::time::timeout(Duration::from_secs(10), consumer.run(cancel.clone())).await;
    assert!(finished.is_ok(), "consumer loop did not stop after cancellation");
    assert!(cancel.is_cancelled());
    producer.join().unwrap();

    assert_eq!(*seen.borrow(), (0..UPDATES).collect::<Vec<_>>());
}

#[test]
fn test_dropped_consumer_is_cleaned_up() {
    let store = Arc::new(StateStore::new());
    let key = ModuleKey::from("disk");
    let (consumer, _) = recording_consumer(&store, &key);
    assert_eq!(store.subscriber_count(&key), 1);
    drop(consumer);
    assert_eq!(store.subscriber_count(&key), 0);
    store.update(&key, json!({"text": "40%"}));
}

#[test]
fn test_concurrent_producers_and_consumer() {
    const PRODUCERS: usize = 8;
    const UPDATES: i64 = 2000;

    let store = Arc::new(StateStore::new());
    let keys: Vec<ModuleKey> = (0..PRODUCERS).map(|i| ModuleKey(format!("module-{}", i))).collect();
    let barrier = Arc::new(Barrier::new(PRODUCERS + 1));

    let producers: Vec<_> = keys
        .iter()
        .cloned()
        .map(|key| {
            let store = store.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for n in 0..UPDATES {
                    store.update(&key, json!({ "key": key.as_str(), "n": n }));
                }
            })
        })
        .collect();

    let mut consumer = Consumer::new(store.clone());
    let seen: Seen = Rc::new(RefCell::new(Vec::new()));
    barrier.wait();

    let mut ids = Vec::new();
    for round in 0..200 {
        let key = &keys[round % PRODUCERS];
        let seen_clone = seen.clone();
        ids.push(consumer.subscribe(key, move |key, value| {
            seen_clone.borrow_mut().push((key.clone(), value.clone()));
            Ok(())
        }));
        if let Some(value) = store.get(key) {
            assert_eq!(value["key"], json!(key.as_str()));
        }
        consumer.dispatch_pending();
        if round % 3 == 0 {
            consumer.unsubscribe(ids.remove(0));
        }
    }

    for producer in producers {
        producer.join().unwrap();
    }
    consumer.dispatch_pending();

    for key in &keys {
        assert_eq!(*store.get(key).unwrap(), json!({ "key": key.as_str(), "n": UPDATES - 1 }));
    }
    for (key, value) in seen.borrow().iter() {
        assert_eq!(value["key"], json!(key.as_str()));
    }
}

#[test]
fn test_single_producer_order_is_kept_under_contention() {
    let store = Arc::new(StateStore::new());
    let key = ModuleKey::from("ordered");
    let (mut consumer, seen) = recording_consumer(&store, &key);

    let noise: Vec<_> = (0..4)
        .map(|i| {
            let store = store.clone();
            thread::spawn(move || {
                let key = ModuleKey(format!("noise-{}", i));
                for n in 0..1000 {
                    store.update(&key, json!(n));
                }
            })
        })
        .collect();

    let producer_store = store.clone();
    let producer_key = key.clone();
    let producer = thread::spawn(move || {
        for n in 0..1000 {
            producer_store.update(&producer_key, json!(n));
        }
    });

    let mut dispatched = 0;
    while dispatched < 1000 {
        dispatched += consumer.dispatch_pending();
        thread::yield_now();
    }
    producer.join().unwrap();
    noise.into_iter().for_each(|t| t.join().unwrap());

    let values: Vec<_> = seen.borrow().iter().map(|(_, v)| v.as_i64().unwrap()).collect();
    assert_eq!(values, (0..1000).collect::<Vec<_>>());
}
