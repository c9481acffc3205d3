//! S5: the unload guard is strictly edge-triggered.
//!
//! Kept in its own integration binary because the guard and the live-session
//! registry are process-wide.

use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use trellis_commons::{ParamMap, ParamSchema, ParamType, Query};
use trellis_link::{
    set_navigation_guard, Clock, Frame, NavigationGuard, ReadyState, Session, Settings, Transport,
    TransportConnector, WaitPolicy,
};

struct CountingGuard {
    installs: AtomicUsize,
    removes: AtomicUsize,
}

impl NavigationGuard for CountingGuard {
    fn install(&self) {
        self.installs.fetch_add(1, Ordering::SeqCst);
    }
    fn remove(&self) {
        self.removes.fetch_add(1, Ordering::SeqCst);
    }
}

struct MockTransport {
    sent: Mutex<Vec<String>>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Frame>>>,
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    fn ready_state(&self) -> ReadyState {
        ReadyState::Open
    }
    fn buffered_bytes(&self) -> usize {
        0
    }
    async fn send_text(&self, frame: String) -> trellis_link::Result<()> {
        self.sent.lock().push(frame);
        Ok(())
    }
    fn close(&self) {}
    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<Frame>> {
        self.inbound_rx.lock().take()
    }
}

#[derive(Clone)]
struct Connector {
    transport: Arc<MockTransport>,
    tx: mpsc::UnboundedSender<Frame>,
}

#[async_trait::async_trait]
impl TransportConnector for Connector {
    async fn connect(&self, _url: &str) -> trellis_link::Result<Arc<dyn Transport>> {
        Ok(self.transport.clone())
    }
}

struct FixedClock;

impl Clock for FixedClock {
    fn now_millis(&self) -> u64 {
        1_000
    }
}

async fn wait_for_frames(transport: &MockTransport, n: usize) -> String {
    for _ in 0..2000 {
        let frames: Vec<String> = transport
            .sent
            .lock()
            .iter()
            .filter(|f| !f.starts_with('H'))
            .cloned()
            .collect();
        if frames.len() >= n {
            return frames[n - 1].clone();
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("frame {} never sent", n);
}

fn frame_id(frame: &str) -> u64 {
    frame[1..frame.find(';').unwrap()].parse().unwrap()
}

#[tokio::test]
async fn test_unload_guard_edge_trigger() {
    let guard = Arc::new(CountingGuard {
        installs: AtomicUsize::new(0),
        removes: AtomicUsize::new(0),
    });
    set_navigation_guard(Some(guard.clone()));

    let (tx, rx) = mpsc::unbounded_channel();
    let transport = Arc::new(MockTransport {
        sent: Mutex::new(Vec::new()),
        inbound_rx: Mutex::new(Some(rx)),
    });
    let connector = Connector {
        transport: transport.clone(),
        tx: tx.clone(),
    };

    let session = Session::with_parts(
        Settings {
            servers: Some(vec!["db-1.test".to_string()]),
            prevent_unload: WaitPolicy::WaitForAck,
            ..Settings::default()
        },
        Arc::new(connector),
        Arc::new(FixedClock),
    )
    .unwrap();

    // No handler registered before any send.
    assert_eq!(guard.installs.load(Ordering::SeqCst), 0);

    let mut params = ParamSchema::new();
    params.insert("id", ParamType::Int).unwrap();
    let query = Query::new("SELECT * FROM u WHERE id = $1", params);

    let mut args = ParamMap::new();
    args.insert("id".to_string(), json!(1));
    let session2 = session.clone();
    let query2 = query.clone();
    let args2 = args.clone();
    let task = tokio::spawn(async move { session2.query(&query2, args2).await });

    // After one unacked send: installed exactly once.
    let frame = wait_for_frames(&transport, 1).await;
    for _ in 0..2000 {
        if guard.installs.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(guard.installs.load(Ordering::SeqCst), 1);
    assert_eq!(guard.removes.load(Ordering::SeqCst), 0);

    // After the ack arrives: removed on the observed frame.
    tx.send(Frame::Text(
        json!({ "id": frame_id(&frame), "session": "s", "result": null }).to_string(),
    ))
    .unwrap();
    task.await.unwrap().unwrap();
    for _ in 0..2000 {
        if guard.removes.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(guard.installs.load(Ordering::SeqCst), 1);
    assert_eq!(guard.removes.load(Ordering::SeqCst), 1);

    // A second send re-registers.
    let session3 = session.clone();
    let task = tokio::spawn(async move { session3.query(&query, args).await });
    let frame = wait_for_frames(&transport, 2).await;
    for _ in 0..2000 {
        if guard.installs.load(Ordering::SeqCst) == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(guard.installs.load(Ordering::SeqCst), 2);

    tx.send(Frame::Text(
        json!({ "id": frame_id(&frame), "session": "s", "result": null }).to_string(),
    ))
    .unwrap();
    task.await.unwrap().unwrap();

    session.close();
    set_navigation_guard(None);
}
