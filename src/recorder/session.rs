use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use uuid::Uuid;

use crate::dom::{Document, MutationBatch, NodeKey};
use crate::model::Record;
use crate::transport::{RecordSink, TransportError};

use super::{RecordError, Recorder, RecorderOptions};

/// Input forwarded to a running recording.
#[derive(Debug, Clone, PartialEq)]
pub enum RecorderCommand {
    Scroll(NodeKey),
    PointerMove { left: f64, top: f64 },
    Click { left: f64, top: f64 },
    Highlight { semantic_tag: String, description: String },
    Stop,
}

/// Handle to a recording running on a background task.
pub struct RecorderHandle {
    session_id: String,
    cmd_tx: mpsc::UnboundedSender<RecorderCommand>,
    task: JoinHandle<Result<(), RecordError>>,
}

impl RecorderHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn send(&self, command: RecorderCommand) {
        if self.cmd_tx.send(command).is_err() {
            tracing::debug!(session_id = %self.session_id, "recording already finished");
        }
    }

    pub fn scroll(&self, target: NodeKey) {
        self.send(RecorderCommand::Scroll(target));
    }

    pub fn pointer_move(&self, left: f64, top: f64) {
        self.send(RecorderCommand::PointerMove { left, top });
    }

    pub fn click(&self, left: f64, top: f64) {
        self.send(RecorderCommand::Click { left, top });
    }

    pub fn highlight(&self, semantic_tag: impl Into<String>, description: impl Into<String>) {
        self.send(RecorderCommand::Highlight {
            semantic_tag: semantic_tag.into(),
            description: description.into(),
        });
    }

    /// Whether the background task has ended (stopped or halted).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop recording and wait until every record reached the sink.
    pub async fn stop(self) -> Result<(), RecordError> {
        self.send(RecorderCommand::Stop);
        self.task.await.map_err(|_| RecordError::TaskGone)?
    }
}

/// Background driver tying a [`Recorder`] to a shared document and a sink.
pub struct RecordingSession {
    recorder: Recorder,
    session_id: String,
    doc: Arc<Mutex<Document>>,
    sink: Arc<dyn RecordSink>,
    mutations: mpsc::UnboundedReceiver<MutationBatch>,
    cmd_rx: mpsc::UnboundedReceiver<RecorderCommand>,
    root_ack: Option<JoinHandle<Result<(), TransportError>>>,
    started: Instant,
}

impl RecordingSession {
    /// Capture the document, submit its root and start observing it.
    ///
    /// Records produced before the sink acknowledges the root stay buffered.
    pub fn start(
        doc: Arc<Mutex<Document>>,
        sink: Arc<dyn RecordSink>,
        options: RecorderOptions,
    ) -> Result<RecorderHandle, RecordError> {
        let session_id = Uuid::new_v4().to_string();
        let base_timestamp = chrono::Utc::now().timestamp_millis();
        let mut recorder = Recorder::new(options);

        let (mutations, envelope) = {
            let mut guard = doc.lock();
            let mutations = guard.observe();
            match recorder.start(&mut guard, session_id.clone(), base_timestamp) {
                Ok(envelope) => (mutations, envelope),
                Err(e) => {
                    guard.disconnect();
                    return Err(e);
                }
            }
        };

        let root_sink = Arc::clone(&sink);
        let root_ack = tokio::spawn(async move { root_sink.submit_root(&envelope).await });

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let session = Self {
            recorder,
            session_id: session_id.clone(),
            doc,
            sink,
            mutations,
            cmd_rx,
            root_ack: Some(root_ack),
            started: Instant::now(),
        };
        let task = tokio::spawn(session.run());

        Ok(RecorderHandle {
            session_id,
            cmd_tx,
            task,
        })
    }

    fn elapsed(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    async fn run(mut self) -> Result<(), RecordError> {
        loop {
            let deadline = self
                .recorder
                .next_capture_deadline()
                .map(|ms| self.started + Duration::from_millis(ms));
            let wake = deadline.unwrap_or_else(Instant::now);

            tokio::select! {
                biased;

                ack = wait_ack(&mut self.root_ack), if self.root_ack.is_some() => {
                    self.root_ack = None;
                    self.on_root_ack(ack).await?;
                }
                Some(batch) = self.mutations.recv() => {
                    let at = self.elapsed();
                    let chunks = {
                        let mut doc = self.doc.lock();
                        self.recorder.observe(&mut doc, &batch, at)
                    };
                    self.forward(chunks).await?;
                }
                command = self.cmd_rx.recv() => {
                    let at = self.elapsed();
                    let chunks = match command {
                        Some(RecorderCommand::Scroll(target)) => {
                            let doc = self.doc.lock();
                            self.recorder.scroll(&doc, target, at)
                        }
                        Some(RecorderCommand::PointerMove { left, top }) => {
                            self.recorder.pointer_move(left, top, at)
                        }
                        Some(RecorderCommand::Click { left, top }) => self.recorder.click(left, top, at),
                        Some(RecorderCommand::Highlight { semantic_tag, description }) => {
                            self.recorder.highlight(semantic_tag, description, at);
                            Vec::new()
                        }
                        Some(RecorderCommand::Stop) | None => return self.finish().await,
                    };
                    self.forward(chunks).await?;
                }
                _ = tokio::time::sleep_until(wake), if deadline.is_some() => {
                    let at = self.elapsed();
                    let chunks = self.recorder.poll_capture(at);
                    self.forward(chunks).await?;
                }
            }
        }
    }

    async fn on_root_ack(&mut self, ack: Result<(), TransportError>) -> Result<(), RecordError> {
        match ack {
            Ok(()) => {
                tracing::debug!(session_id = %self.session_id, "root acknowledged");
                let chunks = self.recorder.root_acknowledged();
                self.forward(chunks).await
            }
            Err(e) => {
                tracing::error!(session_id = %self.session_id, error = %e, "root submission failed, recording halted");
                self.recorder.halt();
                self.doc.lock().disconnect();
                Err(RecordError::RootRejected(e))
            }
        }
    }

    async fn finish(mut self) -> Result<(), RecordError> {
        // The end marker must not drain before the root is known to be stored.
        if self.root_ack.is_some() {
            let ack = wait_ack(&mut self.root_ack).await;
            self.root_ack = None;
            self.on_root_ack(ack).await?;
        }
        while let Ok(batch) = self.mutations.try_recv() {
            let at = self.elapsed();
            let chunks = {
                let mut doc = self.doc.lock();
                self.recorder.observe(&mut doc, &batch, at)
            };
            self.forward(chunks).await?;
        }
        let at = self.elapsed();
        let chunks = {
            let mut doc = self.doc.lock();
            self.recorder.stop(&mut doc, at)
        };
        self.forward(chunks).await?;
        self.sink.notify_stopped(&self.session_id);
        Ok(())
    }

    async fn forward(&mut self, chunks: Vec<Vec<Record>>) -> Result<(), RecordError> {
        for chunk in chunks {
            let first = chunk.first().map(|r| r.record_id);
            tracing::debug!(session_id = %self.session_id, first_record = ?first, records = chunk.len(), "submitting records");
            if let Err(e) = self.sink.submit_records(&self.session_id, chunk).await {
                tracing::error!(session_id = %self.session_id, error = %e, "record submission failed, recording halted");
                self.recorder.halt();
                self.doc.lock().disconnect();
                return Err(RecordError::Transport(e));
            }
        }
        Ok(())
    }
}

async fn wait_ack(
    pending: &mut Option<JoinHandle<Result<(), TransportError>>>,
) -> Result<(), TransportError> {
    match pending {
        Some(handle) => match handle.await {
            Ok(result) => result,
            Err(e) => Err(TransportError::Rejected(format!("root submission task failed: {e}"))),
        },
        None => std::future::pending().await,
    }
}
