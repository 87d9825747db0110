// src/worker/handle.rs
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::utils::error::{NodeError, Result};
use super::diagnostics::DiagnosticFilter;
use super::protocol::{encode, salvage_id, InferenceRequest, InferenceResponse, WorkerEnvelope, WorkerMessage};
use super::transport::{ExitReport, WorkerChannels, WorkerEvent};

type Reply = oneshot::Sender<Result<InferenceResponse>>;

struct Calls {
    alive: bool,
    exit: Option<ExitReport>,
    outstanding: HashMap<String, Reply>,
}

/// A running worker. Every submission gets its own correlation id, so
/// replies are routed to the right caller even if calls overlap.
pub struct WorkerHandle {
    name: String,
    outbound: mpsc::Sender<String>,
    calls: Arc<Mutex<Calls>>,
    kill: Mutex<Option<oneshot::Sender<()>>>,
}

impl WorkerHandle {
    pub fn attach(
        name: impl Into<String>,
        channels: WorkerChannels,
        filter: DiagnosticFilter,
    ) -> Arc<Self> {
        let name = name.into();
        let calls = Arc::new(Mutex::new(Calls {
            alive: true,
            exit: None,
            outstanding: HashMap::new(),
        }));

        tokio::spawn(pump(name.clone(), channels.events, calls.clone(), filter));

        Arc::new(Self {
            name,
            outbound: channels.outbound,
            calls,
            kill: Mutex::new(Some(channels.kill)),
        })
    }

    pub fn is_alive(&self) -> bool {
        self.calls.lock().alive
    }

    pub async fn submit(&self, request: InferenceRequest) -> Result<InferenceResponse> {
        let id = Uuid::new_v4().to_string();
        let line = encode(&WorkerEnvelope {
            id: id.clone(),
            request,
        })?;

        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut calls = self.calls.lock();
            if !calls.alive {
                return Err(self.crashed(calls.exit.as_ref()));
            }
            calls.outstanding.insert(id.clone(), reply_tx);
        }
        let _slot = Outstanding {
            calls: &self.calls,
            id: &id,
        };

        if self.outbound.send(line).await.is_err() {
            return Err(self.crashed(None));
        }

        match reply_rx.await {
            Ok(result) => result,
            Err(_) => {
                let exit = self.calls.lock().exit.clone();
                Err(self.crashed(exit.as_ref()))
            }
        }
    }

    /// Terminates the worker. Outstanding calls fail once the exit is seen.
    pub fn shutdown(&self) {
        if let Some(kill) = self.kill.lock().take() {
            debug!(worker = %self.name, "Stopping worker");
            let _ = kill.send(());
        }
    }

    fn crashed(&self, exit: Option<&ExitReport>) -> NodeError {
        match exit {
            Some(report) => NodeError::WorkerCrashed(format!("{} {}", self.name, report)),
            None => NodeError::WorkerCrashed(format!("{} is not accepting requests", self.name)),
        }
    }
}

/// Forgets a call whose caller went away (for example on timeout).
struct Outstanding<'a> {
    calls: &'a Mutex<Calls>,
    id: &'a str,
}

impl Drop for Outstanding<'_> {
    fn drop(&mut self) {
        self.calls.lock().outstanding.remove(self.id);
    }
}

async fn pump(
    name: String,
    mut events: mpsc::Receiver<WorkerEvent>,
    calls: Arc<Mutex<Calls>>,
    filter: DiagnosticFilter,
) {
    let report = loop {
        match events.recv().await {
            Some(WorkerEvent::Message(line)) => route(&name, &line, &calls),
            Some(WorkerEvent::Diagnostic(line)) => filter.emit(&name, &line),
            Some(WorkerEvent::Exited(report)) => break report,
            None => break ExitReport::failed("event stream closed"),
        }
    };

    let orphaned = {
        let mut calls = calls.lock();
        calls.alive = false;
        calls.exit = Some(report.clone());
        std::mem::take(&mut calls.outstanding)
    };

    if orphaned.is_empty() {
        info!(worker = %name, "Worker {}", report);
    } else {
        error!(worker = %name, "Worker {} with {} call(s) in flight", report, orphaned.len());
    }
    for (_, reply) in orphaned {
        let _ = reply.send(Err(NodeError::WorkerCrashed(format!("{} {}", name, report))));
    }
}

fn route(name: &str, line: &str, calls: &Mutex<Calls>) {
    match serde_json::from_str::<WorkerMessage>(line) {
        Ok(WorkerMessage::Response { id, response }) => resolve(name, calls, &id, Ok(response)),
        Ok(WorkerMessage::Error {
            error,
            id: Some(id),
            code,
        }) => resolve(name, calls, &id, Err(NodeError::from_worker(code, error))),
        Ok(WorkerMessage::Error { error, id: None, .. }) => error!(worker = %name, "{}", error),
        Ok(WorkerMessage::Warn { warn }) => warn!(worker = %name, "{}", warn),
        Ok(WorkerMessage::Info { info }) => info!(worker = %name, "{}", info),
        Err(e) => match salvage_id(line) {
            Some(id) => resolve(
                name,
                calls,
                &id,
                Err(NodeError::Engine(format!("malformed worker reply: {}", e))),
            ),
            None => warn!(worker = %name, "Ignoring unparseable worker output: {}", line),
        },
    }
}

fn resolve(name: &str, calls: &Mutex<Calls>, id: &str, result: Result<InferenceResponse>) {
    match calls.lock().outstanding.remove(id) {
        Some(reply) => {
            let _ = reply.send(result);
        }
        None => debug!(worker = %name, "Dropping reply for unknown call {}", id),
    }
}
