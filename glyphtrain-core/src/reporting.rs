//! Reporting context: a single task that owns the [`Supervisor`].
//!
//! Front ends send commands through a [`SupervisorHandle`]; worker reports
//! arrive on a second channel. Both are handled on this one task, and the
//! resulting [`ReportingView`] is published through a `watch` channel.

use crate::config::TrainerConfig;
use crate::error::TrainerError;
use crate::model::{LabeledSample, ModelStore, Network, NetworkFactory};
use crate::request::{CharacterSet, TrainingRequest};
use crate::supervisor::{EvaluationStart, ReportingView, Supervisor, ToggleAction, WorkerReport};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

type Reply<T> = oneshot::Sender<Result<T, TrainerError>>;

/// Requests accepted by the reporting context.
enum Command {
    Start {
        request: TrainingRequest,
        reply: Reply<Uuid>,
    },
    Toggle {
        fonts: Vec<String>,
        characters: CharacterSet,
        reply: Reply<ToggleAction>,
    },
    Cancel {
        reply: oneshot::Sender<bool>,
    },
    Evaluate {
        held_out: Arc<Vec<LabeledSample>>,
        reply: Reply<EvaluationStart>,
    },
    Save {
        reply: Reply<()>,
    },
    Shutdown,
}

/// Builder for the reporting context.
pub struct ReportingContext {
    config: TrainerConfig,
    factory: Arc<dyn NetworkFactory>,
    store: Option<Arc<dyn ModelStore>>,
    model: Option<(Box<dyn Network>, CharacterSet)>,
}

impl ReportingContext {
    pub fn new(config: TrainerConfig, factory: Arc<dyn NetworkFactory>) -> Self {
        Self {
            config,
            factory,
            store: None,
            model: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ModelStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Start from a network already built for `characters`.
    pub fn with_model(mut self, model: Box<dyn Network>, characters: CharacterSet) -> Self {
        self.model = Some((model, characters));
        self
    }

    /// Spawn the reporting task. Must be called inside a tokio runtime.
    pub fn spawn(self) -> (SupervisorHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(self.config.reporting.command_buffer.max(1));
        let (report_tx, report_rx) = mpsc::unbounded_channel();

        let mut supervisor = Supervisor::new(self.config, self.factory, report_tx);
        if let Some(store) = self.store {
            supervisor = supervisor.with_store(store);
        }
        if let Some((model, characters)) = self.model {
            supervisor = supervisor.with_model(model, characters);
        }

        let (view_tx, view_rx) = watch::channel(supervisor.view().clone());
        let task = tokio::spawn(run(supervisor, command_rx, report_rx, view_tx));

        info!("Reporting context started");
        (
            SupervisorHandle {
                commands: command_tx,
                view: view_rx,
            },
            task,
        )
    }
}

async fn run(
    mut supervisor: Supervisor,
    mut commands: mpsc::Receiver<Command>,
    mut reports: mpsc::UnboundedReceiver<WorkerReport>,
    view: watch::Sender<ReportingView>,
) {
    let mut shutting_down = false;

    loop {
        if shutting_down && supervisor.worker().is_none() {
            break;
        }

        tokio::select! {
            Some(report) = reports.recv() => {
                supervisor.apply(report);
                publish(&view, &supervisor);
            }
            command = commands.recv(), if !shutting_down => {
                match command {
                    Some(Command::Shutdown) | None => {
                        debug!("Reporting context shutting down");
                        supervisor.cancel();
                        shutting_down = true;
                        publish(&view, &supervisor);
                    }
                    Some(command) => handle(&mut supervisor, command, &view),
                }
            }
            else => break,
        }
    }

    info!("Reporting context stopped");
}

fn publish(view: &watch::Sender<ReportingView>, supervisor: &Supervisor) {
    view.send_replace(supervisor.view().clone());
}

/// Apply a command, publish the resulting view, then answer the caller, so a
/// caller never observes a view older than its own command.
fn handle(supervisor: &mut Supervisor, command: Command, view: &watch::Sender<ReportingView>) {
    match command {
        Command::Start { request, reply } => {
            let result = supervisor.start(request);
            publish(view, supervisor);
            let _ = reply.send(result);
        }
        Command::Toggle {
            fonts,
            characters,
            reply,
        } => {
            let result = supervisor.toggle(|s| s.request(fonts, characters));
            publish(view, supervisor);
            let _ = reply.send(result);
        }
        Command::Cancel { reply } => {
            let cancelled = supervisor.cancel();
            publish(view, supervisor);
            let _ = reply.send(cancelled);
        }
        Command::Evaluate { held_out, reply } => {
            let result = supervisor.evaluate(held_out);
            publish(view, supervisor);
            let _ = reply.send(result);
        }
        Command::Save { reply } => {
            let result = supervisor.save();
            publish(view, supervisor);
            let _ = reply.send(result);
        }
        Command::Shutdown => {}
    }
}

/// Cloneable front-end handle to the reporting context.
#[derive(Clone)]
pub struct SupervisorHandle {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<ReportingView>,
}

impl SupervisorHandle {
    pub async fn start(&self, request: TrainingRequest) -> Result<Uuid, TrainerError> {
        self.call(|reply| Command::Start { request, reply }).await?
    }

    /// Start/stop button. The request is captured from `fonts` and `characters`
    /// only if training actually starts.
    pub async fn toggle(
        &self,
        fonts: Vec<String>,
        characters: CharacterSet,
    ) -> Result<ToggleAction, TrainerError> {
        self.call(|reply| Command::Toggle {
            fonts,
            characters,
            reply,
        })
        .await?
    }

    /// Returns whether a running job was asked to stop.
    pub async fn cancel(&self) -> Result<bool, TrainerError> {
        self.call(|reply| Command::Cancel { reply }).await
    }

    pub async fn evaluate(
        &self,
        held_out: Vec<LabeledSample>,
    ) -> Result<EvaluationStart, TrainerError> {
        let held_out = Arc::new(held_out);
        self.call(|reply| Command::Evaluate { held_out, reply }).await?
    }

    pub async fn save(&self) -> Result<(), TrainerError> {
        self.call(|reply| Command::Save { reply }).await?
    }

    /// Cancel any active job and stop the reporting task once the worker is idle.
    pub async fn shutdown(&self) -> Result<(), TrainerError> {
        self.commands
            .send(Command::Shutdown)
            .await
            .map_err(|_| TrainerError::ReportingClosed)
    }

    /// Latest published view.
    pub fn view(&self) -> ReportingView {
        self.view.borrow().clone()
    }

    /// A receiver that is notified on every view change.
    pub fn subscribe(&self) -> watch::Receiver<ReportingView> {
        self.view.clone()
    }

    /// Wait until nothing is running on the worker context.
    pub async fn wait_until_settled(&self) -> Result<ReportingView, TrainerError> {
        let mut view = self.view.clone();
        let settled = view
            .wait_for(ReportingView::is_settled)
            .await
            .map_err(|_| TrainerError::ReportingClosed)?;
        Ok(settled.clone())
    }

    async fn call<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, TrainerError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| TrainerError::ReportingClosed)?;
        response.await.map_err(|_| TrainerError::ReportingClosed)
    }
}
