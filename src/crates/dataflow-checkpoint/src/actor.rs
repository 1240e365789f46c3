//! Instance actor owning a [`CheckpointService`]
//!
//! All per-instance checkpoint state lives on one tokio task. Data and control layers
//! talk to it through a cloneable [`CheckpointHandle`]; every call is a command on a
//! bounded channel with a oneshot reply, so operations on one instance are strictly
//! serialized without any shared locks.
//!
//! The task itself never waits on the processing gate. Checkpoint and restore pause the
//! gate on the calling side and ship the token along with the command, so a unit of work
//! holding the gate can keep talking to its own actor. The newest checkpoint ids are
//! published on a `watch` channel and read without a round trip.

use crate::checkpoint::CheckpointId;
use crate::error::{CheckpointError, Result};
use crate::gate::{GateToken, ProcessingGate};
use crate::messages::{
    CheckpointDependencyPayload, CheckpointRestoreCompletionPayload,
    CheckpointRestoreRequestPayload, CheckpointTakenPayload, SequenceNumbers,
};
use crate::recovery::RecoveryLine;
use crate::registry::SharedObject;
use crate::service::CheckpointService;
use crate::topology::InstanceGraph;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    RegisterObject {
        key: String,
        object: SharedObject,
        tx: Reply<()>,
    },
    UpdateDependency {
        origin: String,
        checkpoint_id: CheckpointId,
    },
    ReceiveDependencyTag {
        origin: String,
        tag: CheckpointDependencyPayload,
    },
    TakeCheckpoint {
        paused: GateToken,
        tx: Reply<CheckpointId>,
    },
    RestoreCheckpoint {
        checkpoint_id: CheckpointId,
        paused: GateToken,
        tx: Reply<()>,
    },
    HandleRestoreRequest {
        request: CheckpointRestoreRequestPayload,
        paused: GateToken,
        tx: Reply<CheckpointRestoreCompletionPayload>,
    },
    CheckpointTakenNotice {
        checkpoint_id: CheckpointId,
        sequence_numbers: SequenceNumbers,
        tx: Reply<CheckpointTakenPayload>,
    },
    CalculateRecoveryLine {
        failed: Vec<String>,
        graph: InstanceGraph,
        tx: Reply<RecoveryLine>,
    },
    CollectGarbage {
        line: RecoveryLine,
        tx: Reply<usize>,
    },
    ClearStorage {
        tx: Reply<()>,
    },
}

/// Newest and second-newest own checkpoint, nil when absent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ChainIds {
    last: CheckpointId,
    second_last: CheckpointId,
}

impl ChainIds {
    fn of(service: &CheckpointService) -> Self {
        Self {
            last: service.last_checkpoint_id(),
            second_last: service.second_last_checkpoint_id(),
        }
    }
}

/// Cloneable handle to a running instance actor
#[derive(Debug, Clone)]
pub struct CheckpointHandle {
    instance_name: String,
    gate: ProcessingGate,
    tx: mpsc::Sender<Command>,
    chain: watch::Receiver<ChainIds>,
}

/// Move `service` onto its own task
///
/// The task exits once every handle has been dropped.
pub fn spawn_instance(
    service: CheckpointService,
    command_buffer: usize,
) -> (CheckpointHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(command_buffer.max(1));
    let (chain_tx, chain) = watch::channel(ChainIds::of(&service));
    let handle = CheckpointHandle {
        instance_name: service.instance_name().to_string(),
        gate: service.gate().clone(),
        tx,
        chain,
    };
    let task = tokio::spawn(run(service, rx, chain_tx));
    (handle, task)
}

async fn run(
    mut service: CheckpointService,
    mut rx: mpsc::Receiver<Command>,
    chain: watch::Sender<ChainIds>,
) {
    info!("Checkpoint actor for {} started", service.instance_name());

    while let Some(command) = rx.recv().await {
        // A dropped reply receiver only means the caller stopped waiting
        match command {
            Command::RegisterObject { key, object, tx } => {
                let _ = tx.send(service.register_object(key, object));
            }
            Command::UpdateDependency {
                origin,
                checkpoint_id,
            } => service.update_dependency(origin, checkpoint_id),
            Command::ReceiveDependencyTag { origin, tag } => {
                service.receive_dependency_tag(&origin, &tag)
            }
            Command::TakeCheckpoint { paused, tx } => {
                let result = service.take_checkpoint_paused(&paused).await;
                publish(&chain, &service);
                drop(paused);
                let _ = tx.send(result);
            }
            Command::RestoreCheckpoint {
                checkpoint_id,
                paused,
                tx,
            } => {
                let result = service
                    .restore_checkpoint_paused(checkpoint_id, &paused)
                    .await;
                publish(&chain, &service);
                drop(paused);
                let _ = tx.send(result);
            }
            Command::HandleRestoreRequest {
                request,
                paused,
                tx,
            } => {
                let result = service
                    .handle_restore_request_paused(request, &paused)
                    .await;
                publish(&chain, &service);
                drop(paused);
                let _ = tx.send(result);
            }
            Command::CheckpointTakenNotice {
                checkpoint_id,
                sequence_numbers,
                tx,
            } => {
                let _ = tx.send(
                    service
                        .checkpoint_taken_notice(checkpoint_id, sequence_numbers)
                        .await,
                );
            }
            Command::CalculateRecoveryLine { failed, graph, tx } => {
                let _ = tx.send(service.calculate_recovery_line(failed, &graph).await);
            }
            Command::CollectGarbage { line, tx } => {
                let result = service.collect_garbage_after_recovery_line(&line).await;
                publish(&chain, &service);
                let _ = tx.send(result);
            }
            Command::ClearStorage { tx } => {
                let result = service.clear_checkpoint_storage().await;
                publish(&chain, &service);
                let _ = tx.send(result);
            }
        }
    }

    debug!("Checkpoint actor for {} stopped", service.instance_name());
}

fn publish(chain: &watch::Sender<ChainIds>, service: &CheckpointService) {
    let ids = ChainIds::of(service);
    chain.send_if_modified(|current| {
        let changed = *current != ids;
        *current = ids;
        changed
    });
}

impl CheckpointHandle {
    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    /// The gate the instance's data loop must hold per unit of work
    pub fn gate(&self) -> &ProcessingGate {
        &self.gate
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| CheckpointError::ActorClosed(self.instance_name.clone()))
    }

    async fn request<T>(&self, command: Command, rx: oneshot::Receiver<T>) -> Result<T> {
        self.send(command).await?;
        rx.await
            .map_err(|_| CheckpointError::ActorClosed(self.instance_name.clone()))
    }

    pub async fn register_object(&self, key: impl Into<String>, object: SharedObject) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let key = key.into();
        self.request(Command::RegisterObject { key, object, tx }, rx)
            .await?
    }

    /// Record an upstream checkpoint id; safe to call while holding the gate
    pub async fn update_dependency(
        &self,
        origin: impl Into<String>,
        checkpoint_id: CheckpointId,
    ) -> Result<()> {
        self.send(Command::UpdateDependency {
            origin: origin.into(),
            checkpoint_id,
        })
        .await
    }

    /// Feed a tag from an incoming data message; safe to call while holding the gate
    pub async fn receive_dependency_tag(
        &self,
        origin: impl Into<String>,
        tag: CheckpointDependencyPayload,
    ) -> Result<()> {
        self.send(Command::ReceiveDependencyTag {
            origin: origin.into(),
            tag,
        })
        .await
    }

    /// Tag to attach to outgoing data messages, once a checkpoint exists
    ///
    /// Answered from the published chain, so it is safe to call while holding the gate.
    pub fn dependency_tag(&self) -> Option<CheckpointDependencyPayload> {
        let last = self.last_checkpoint_id();
        (!last.is_nil()).then_some(CheckpointDependencyPayload {
            checkpoint_id: last,
        })
    }

    pub fn last_checkpoint_id(&self) -> CheckpointId {
        self.chain.borrow().last
    }

    pub fn second_last_checkpoint_id(&self) -> CheckpointId {
        self.chain.borrow().second_last
    }

    /// Pause the gate, then checkpoint on the actor
    ///
    /// Must not be called while the caller itself holds the gate.
    pub async fn take_checkpoint(&self) -> Result<CheckpointId> {
        let paused = self.gate.pause().await;
        let (tx, rx) = oneshot::channel();
        self.request(Command::TakeCheckpoint { paused, tx }, rx)
            .await?
    }

    pub async fn restore_checkpoint(&self, checkpoint_id: CheckpointId) -> Result<()> {
        let paused = self.gate.pause().await;
        let (tx, rx) = oneshot::channel();
        self.request(
            Command::RestoreCheckpoint {
                checkpoint_id,
                paused,
                tx,
            },
            rx,
        )
        .await?
    }

    pub async fn handle_restore_request(
        &self,
        request: CheckpointRestoreRequestPayload,
    ) -> Result<CheckpointRestoreCompletionPayload> {
        let paused = self.gate.pause().await;
        let (tx, rx) = oneshot::channel();
        self.request(
            Command::HandleRestoreRequest {
                request,
                paused,
                tx,
            },
            rx,
        )
        .await?
    }

    pub async fn checkpoint_taken_notice(
        &self,
        checkpoint_id: CheckpointId,
        sequence_numbers: SequenceNumbers,
    ) -> Result<CheckpointTakenPayload> {
        let (tx, rx) = oneshot::channel();
        self.request(
            Command::CheckpointTakenNotice {
                checkpoint_id,
                sequence_numbers,
                tx,
            },
            rx,
        )
        .await?
    }

    pub async fn calculate_recovery_line<I, S>(
        &self,
        failed: I,
        graph: InstanceGraph,
    ) -> Result<RecoveryLine>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let failed = failed.into_iter().map(Into::into).collect();
        let (tx, rx) = oneshot::channel();
        self.request(Command::CalculateRecoveryLine { failed, graph, tx }, rx)
            .await?
    }

    pub async fn collect_garbage_after_recovery_line(&self, line: RecoveryLine) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.request(Command::CollectGarbage { line, tx }, rx).await?
    }

    pub async fn clear_checkpoint_storage(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.request(Command::ClearStorage { tx }, rx).await?
    }
}
