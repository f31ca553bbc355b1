use pipe_adapter::{
    Adapter, AdapterBuilder, AdapterConfig, ChannelReceiver, Forward, MapStage, MessageSender,
    PipelineBuilder, Receiver, RunState, ThreadCountControllable,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn upper_adapter(receiver: Arc<ChannelReceiver>, seen: Arc<AtomicUsize>) -> Arc<Adapter> {
    let pipeline = PipelineBuilder::new()
        .add_stage(
            MapStage::new("upper", move |msg, _| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(msg.to_string().to_uppercase().into())
            })
            .with_forward(Forward::new("success", "done")),
        )
        .exit("done", "success")
        .first_stage("upper")
        .build()
        .expect("Pipeline build failed");
    let adapter = AdapterBuilder::new(AdapterConfig::new("upper"))
        .pipeline(pipeline)
        .receiver(receiver)
        .build()
        .expect("Adapter build failed");
    adapter.configure().expect("Adapter configure failed");
    adapter
}

fn start(adapter: &Arc<Adapter>, receiver: &ChannelReceiver) -> thread::JoinHandle<Result<(), pipe_adapter::StartError>> {
    let handle = adapter.spawn().expect("Spawn failed");
    adapter.wait_for_state(RunState::Started).expect("Interrupted");
    assert!(wait_until(Duration::from_secs(2), || receiver.run_state() == RunState::Started));
    handle
}

#[test]
fn test_request_reply_round_trip() {
    let (receiver, sender) = ChannelReceiver::new("inbox", 2, 16);
    let seen = Arc::new(AtomicUsize::new(0));
    let adapter = upper_adapter(Arc::clone(&receiver), Arc::clone(&seen));
    let handle = start(&adapter, &receiver);

    let reply = sender.request(Some("r1"), "hello").expect("Request failed");
    let result = reply.recv_timeout(Duration::from_secs(2)).expect("No reply");
    assert_eq!(result.result, "HELLO");
    assert_eq!(result.state, "success");

    adapter.stop();
    handle.join().unwrap().expect("Lifecycle failed");
    assert_eq!(receiver.run_state(), RunState::Stopped);
    assert_eq!(receiver.messages_received(), 1);
}

#[test]
fn test_fire_and_forget_messages_are_processed() {
    let (receiver, sender) = ChannelReceiver::new("inbox", 3, 8);
    let seen = Arc::new(AtomicUsize::new(0));
    let adapter = upper_adapter(Arc::clone(&receiver), Arc::clone(&seen));
    let handle = start(&adapter, &receiver);

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let sender: MessageSender = sender.clone();
            thread::spawn(move || {
                for i in 0..25 {
                    sender.send(Some(&format!("p{p}-{i}")), "x").expect("Send failed");
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    assert!(wait_until(Duration::from_secs(5), || adapter.processed_count() == 100));
    assert_eq!(seen.load(Ordering::SeqCst), 100);
    assert_eq!(adapter.error_count(), 0);

    adapter.stop();
    handle.join().unwrap().expect("Lifecycle failed");
    assert_eq!(adapter.run_state(), RunState::Stopped);
}

#[test]
fn test_thread_count_can_change_while_running() {
    let (receiver, _sender) = ChannelReceiver::new("inbox", 2, 8);
    let adapter = upper_adapter(Arc::clone(&receiver), Arc::new(AtomicUsize::new(0)));
    let handle = start(&adapter, &receiver);

    let control = receiver
        .as_thread_count_controllable()
        .expect("not thread count controllable");
    assert!(wait_until(Duration::from_secs(2), || control.current_thread_count() == 2));

    control.increase_thread_count();
    assert!(wait_until(Duration::from_secs(2), || control.current_thread_count() == 3));

    control.decrease_thread_count();
    control.decrease_thread_count();
    control.decrease_thread_count();
    assert_eq!(control.max_thread_count(), 1);
    assert!(wait_until(Duration::from_secs(2), || control.current_thread_count() == 1));

    adapter.stop();
    handle.join().unwrap().expect("Lifecycle failed");
    assert_eq!(control.current_thread_count(), 0);
}

#[test]
fn test_messages_sent_before_start_are_processed_after() {
    let (receiver, sender) = ChannelReceiver::new("inbox", 1, 4);
    let adapter = upper_adapter(Arc::clone(&receiver), Arc::new(AtomicUsize::new(0)));
    let reply = sender.request(Some("early"), "queued").unwrap();
    assert_eq!(receiver.pending(), 1);

    let handle = start(&adapter, &receiver);
    assert_eq!(reply.recv_timeout(Duration::from_secs(2)).unwrap().result, "QUEUED");

    adapter.stop();
    handle.join().unwrap().expect("Lifecycle failed");
}
