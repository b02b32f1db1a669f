//! Actor that owns the graph
//!
//! All mutations are serialized through one task. Readers take the latest
//! published [`GraphSnapshot`] without waiting on the actor.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::{GraphError, Result};
use crate::graph::{ActionRecord, GraphSnapshot, WorldGraph};
use crate::lifecycle::TurnReport;
use crate::storage::LoadOutcome;
use crate::types::{Action, AttributeMap, Entity, EntitySource, EntityType, UserIntent};

const COMMAND_BUFFER: usize = 64;

type Reply<T> = oneshot::Sender<T>;

/// Commands handled by the graph actor
#[derive(Debug)]
enum GraphCommand {
    GetOrCreate {
        entity_type: EntityType,
        name: String,
        source: EntitySource,
        attributes: AttributeMap,
        reply: Reply<Entity>,
    },
    Update {
        id: String,
        changes: AttributeMap,
        source: EntitySource,
        reply: Reply<Result<Entity>>,
    },
    AddNegativeClaim {
        id: String,
        claim: String,
        source: EntitySource,
        reply: Reply<bool>,
    },
    Record {
        record: ActionRecord,
        reply: Reply<Action>,
    },
    SetSatisfaction {
        action_id: String,
        satisfaction: f32,
        reply: Reply<Result<()>>,
    },
    ObserveInput {
        text: String,
        reply: Reply<UserIntent>,
    },
    AdvanceTurn {
        reply: Reply<TurnReport>,
    },
    StartSession {
        reply: Reply<String>,
    },
    Save {
        reply: Reply<Result<()>>,
    },
    Load {
        reply: Reply<LoadOutcome>,
    },
    Reset {
        reply: Reply<Result<()>>,
    },
    Shutdown {
        reply: Reply<WorldGraph>,
    },
}

/// Runs a [`WorldGraph`] on its own task
pub struct GraphService {
    graph: WorldGraph,
    receiver: mpsc::Receiver<GraphCommand>,
    published: watch::Sender<Arc<GraphSnapshot>>,
}

impl GraphService {
    /// Move `graph` onto a new task and return a handle to it
    pub fn spawn(graph: WorldGraph) -> GraphHandle {
        let (sender, receiver) = mpsc::channel(COMMAND_BUFFER);
        let (published, snapshots) = watch::channel(Arc::new(graph.snapshot()));

        let service = Self {
            graph,
            receiver,
            published,
        };
        let task = tokio::spawn(service.run());

        GraphHandle {
            sender,
            snapshots,
            task: Arc::new(parking_lot::Mutex::new(Some(task))),
        }
    }

    async fn run(mut self) {
        tracing::info!(session_id = %self.graph.session_id(), "Graph service started");

        while let Some(command) = self.receiver.recv().await {
            if let GraphCommand::Shutdown { reply } = command {
                tracing::info!("Graph service stopped");
                let _ = reply.send(self.graph);
                return;
            }
            self.handle(command).await;
        }

        tracing::info!("Graph service stopped (all handles dropped)");
    }

    /// Apply one command. The snapshot is republished before replying so a
    /// caller always sees its own write.
    async fn handle(&mut self, command: GraphCommand) {
        match command {
            GraphCommand::GetOrCreate {
                entity_type,
                name,
                source,
                attributes,
                reply,
            } => {
                let entity = self
                    .graph
                    .get_or_create_entity(entity_type, &name, source, attributes);
                self.publish();
                let _ = reply.send(entity);
            }
            GraphCommand::Update {
                id,
                changes,
                source,
                reply,
            } => {
                let result = self.graph.try_update_entity(&id, changes, source);
                match &result {
                    Ok(_) => self.publish(),
                    Err(e) => tracing::warn!(entity_id = %id, "Update rejected: {}", e),
                }
                let _ = reply.send(result);
            }
            GraphCommand::AddNegativeClaim {
                id,
                claim,
                source,
                reply,
            } => {
                let added = self.graph.add_negative_claim(&id, &claim, source);
                if added {
                    self.publish();
                }
                let _ = reply.send(added);
            }
            GraphCommand::Record { record, reply } => {
                let action = self.graph.record_with(record);
                self.publish();
                let _ = reply.send(action);
            }
            GraphCommand::SetSatisfaction {
                action_id,
                satisfaction,
                reply,
            } => {
                let result = self.graph.set_satisfaction(&action_id, satisfaction);
                if result.is_ok() {
                    self.publish();
                }
                let _ = reply.send(result);
            }
            GraphCommand::ObserveInput { text, reply } => {
                let intent = self.graph.observe_user_input(&text);
                self.publish();
                let _ = reply.send(intent);
            }
            GraphCommand::AdvanceTurn { reply } => {
                let report = self.graph.advance_turn();
                self.publish();
                let _ = reply.send(report);
            }
            GraphCommand::StartSession { reply } => {
                self.graph.start_new_session();
                self.publish();
                let _ = reply.send(self.graph.session_id().to_string());
            }
            GraphCommand::Save { reply } => {
                let _ = reply.send(self.save().await);
            }
            GraphCommand::Load { reply } => {
                let persistence = self.graph.persistence().clone();
                let read = match tokio::task::spawn_blocking(move || persistence.read()).await {
                    Ok(read) => read,
                    Err(e) => Err(GraphError::Internal(format!("load task failed: {}", e))),
                };
                let outcome = self.graph.restore(read);
                self.publish();
                let _ = reply.send(outcome);
            }
            GraphCommand::Reset { reply } => {
                let result = self.graph.reset();
                self.publish();
                let _ = reply.send(result);
            }
            GraphCommand::Shutdown { .. } => {}
        }
    }

    /// Capture under the actor, write on a blocking thread
    async fn save(&self) -> Result<()> {
        let envelope = self.graph.capture_envelope();
        let persistence = self.graph.persistence().clone();
        let result = match tokio::task::spawn_blocking(move || persistence.write(&envelope)).await {
            Ok(result) => result,
            Err(e) => Err(GraphError::Internal(format!("save task failed: {}", e))),
        };
        if let Err(e) = &result {
            tracing::warn!("Failed to save world graph: {}", e);
        }
        result
    }

    fn publish(&self) {
        self.published.send_replace(Arc::new(self.graph.snapshot()));
    }
}

/// Cloneable handle to a running [`GraphService`]
#[derive(Clone)]
pub struct GraphHandle {
    sender: mpsc::Sender<GraphCommand>,
    snapshots: watch::Receiver<Arc<GraphSnapshot>>,
    task: Arc<parking_lot::Mutex<Option<JoinHandle<()>>>>,
}

impl GraphHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> GraphCommand) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(make(reply))
            .await
            .map_err(|_| GraphError::ServiceStopped)?;
        response.await.map_err(|_| GraphError::ServiceStopped)
    }

    /// Latest published snapshot; never waits on the actor
    pub fn snapshot(&self) -> Arc<GraphSnapshot> {
        Arc::clone(&self.snapshots.borrow())
    }

    /// Receiver notified after every mutation
    pub fn subscribe(&self) -> watch::Receiver<Arc<GraphSnapshot>> {
        self.snapshots.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }

    pub async fn get_or_create_entity(
        &self,
        entity_type: EntityType,
        name: impl Into<String>,
        source: EntitySource,
        attributes: AttributeMap,
    ) -> Result<Entity> {
        let name = name.into();
        self.request(|reply| GraphCommand::GetOrCreate {
            entity_type,
            name,
            source,
            attributes,
            reply,
        })
        .await
    }

    /// Update an entity; rejected mutations come back as
    /// [`GraphError::MutationRejected`]
    pub async fn update_entity(
        &self,
        id: impl Into<String>,
        changes: AttributeMap,
        source: EntitySource,
    ) -> Result<Entity> {
        let id = id.into();
        self.request(|reply| GraphCommand::Update {
            id,
            changes,
            source,
            reply,
        })
        .await?
    }

    pub async fn add_negative_claim(
        &self,
        id: impl Into<String>,
        claim: impl Into<String>,
        source: EntitySource,
    ) -> Result<bool> {
        let (id, claim) = (id.into(), claim.into());
        self.request(|reply| GraphCommand::AddNegativeClaim {
            id,
            claim,
            source,
            reply,
        })
        .await
    }

    pub async fn record(&self, record: ActionRecord) -> Result<Action> {
        self.request(|reply| GraphCommand::Record { record, reply })
            .await
    }

    pub async fn set_satisfaction(
        &self,
        action_id: impl Into<String>,
        satisfaction: f32,
    ) -> Result<()> {
        let action_id = action_id.into();
        self.request(|reply| GraphCommand::SetSatisfaction {
            action_id,
            satisfaction,
            reply,
        })
        .await?
    }

    pub async fn observe_user_input(&self, text: impl Into<String>) -> Result<UserIntent> {
        let text = text.into();
        self.request(|reply| GraphCommand::ObserveInput { text, reply })
            .await
    }

    pub async fn advance_turn(&self) -> Result<TurnReport> {
        self.request(|reply| GraphCommand::AdvanceTurn { reply }).await
    }

    /// Returns the new session id
    pub async fn start_new_session(&self) -> Result<String> {
        self.request(|reply| GraphCommand::StartSession { reply })
            .await
    }

    pub async fn save(&self) -> Result<()> {
        self.request(|reply| GraphCommand::Save { reply }).await?
    }

    pub async fn load(&self) -> Result<LoadOutcome> {
        self.request(|reply| GraphCommand::Load { reply }).await
    }

    pub async fn reset(&self) -> Result<()> {
        self.request(|reply| GraphCommand::Reset { reply }).await?
    }

    /// Stop the actor and take the graph back
    pub async fn shutdown(&self) -> Result<WorldGraph> {
        let graph = self
            .request(|reply| GraphCommand::Shutdown { reply })
            .await?;
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.await
                .map_err(|e| GraphError::Internal(format!("graph service panicked: {}", e)))?;
        }
        Ok(graph)
    }
}

impl std::fmt::Debug for GraphHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphHandle")
            .field("running", &self.is_running())
            .field("turn", &self.snapshots.borrow().turn)
            .finish()
    }
}
