//! Shared harness: a dispatcher wired to an in-memory peer and recording
//! sinks.

#![allow(dead_code)]

use jobwire::{
    Connection, DispatchContext, Dispatcher, FailureDetailsSink, InMemoryTaskBoard, JobFailure,
    JobId, MemoryPeer, MemoryTransport, NoopConnectionObserver, Notice, NoticeKind,
    NotificationSink, TaskRecord, TaskRecordSink,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn texts(&self) -> Vec<String> {
        self.notices.lock().iter().map(|n| n.text.clone()).collect()
    }

    pub fn count(&self, kind: NoticeKind) -> usize {
        self.notices.lock().iter().filter(|n| n.kind == kind).count()
    }
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().push(notice);
    }
}

#[derive(Default)]
pub struct RecordingDetails {
    pub shown: Mutex<Vec<(String, JobFailure)>>,
}

impl FailureDetailsSink for RecordingDetails {
    fn show_failure_details(&self, title: &str, failure: &JobFailure) {
        self.shown.lock().push((title.to_string(), failure.clone()));
    }
}

/// Task board that also streams every update to the test.
pub struct StreamingBoard {
    board: InMemoryTaskBoard,
    updates: mpsc::UnboundedSender<TaskRecord>,
}

impl TaskRecordSink for StreamingBoard {
    fn set_task_record(&self, job_id: JobId, record: TaskRecord) {
        let _ = self.updates.send(record.clone());
        self.board.set_task_record(job_id, record);
    }

    fn clear_task_record(&self, job_id: JobId) {
        self.board.clear_task_record(job_id);
    }
}

pub struct Harness {
    pub connection: Connection,
    pub dispatcher: Dispatcher,
    pub peer: MemoryPeer,
    pub board: InMemoryTaskBoard,
    pub updates: mpsc::UnboundedReceiver<TaskRecord>,
    pub notices: Arc<RecordingNotifier>,
    pub details: Arc<RecordingDetails>,
}

impl Harness {
    pub fn new() -> Self {
        let (transport, peer) = MemoryTransport::pair();
        let connection = Connection::with_transport(transport, Arc::new(NoopConnectionObserver));
        let board = InMemoryTaskBoard::new();
        let (tx, updates) = mpsc::unbounded_channel();
        let notices = Arc::new(RecordingNotifier::default());
        let details = Arc::new(RecordingDetails::default());

        let context = DispatchContext::new(connection.clone())
            .with_task_sink(Arc::new(StreamingBoard {
                board: board.clone(),
                updates: tx,
            }))
            .with_notifier(notices.clone())
            .with_failure_details(details.clone());

        Self {
            connection,
            dispatcher: Dispatcher::new(context),
            peer,
            board,
            updates,
            notices,
            details,
        }
    }

    /// Wait for the next request frame and return its id and frame.
    pub async fn next_request(&mut self) -> (u64, Value) {
        let frame = self.peer.next_frame().await.expect("client went away");
        let id = frame["id"].as_u64().expect("frame without id");
        (id, frame)
    }

    /// Wait for the next task record update.
    pub async fn next_update(&mut self) -> TaskRecord {
        self.updates.recv().await.expect("dispatcher dropped")
    }
}
