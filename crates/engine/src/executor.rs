//! Workflow execution engine.
//!
//! `ExecutionEngine` is the runtime driver:
//! 1. Validates the definition and registers an `ExecutionState` for the run.
//! 2. Spawns one coordinator task per run and returns immediately.
//! 3. The coordinator dispatches every node as a task on a `JoinSet`,
//!    follows eligible edges as outcomes come back and joins branches at
//!    merge nodes.
//! 4. Failures follow `"error"` edges when present and fail the run
//!    otherwise; cancellation and the run deadline stop dispatching and
//!    detach whatever is still in flight.

use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::watch;
use tokio::task::{self, JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use nodes::{ExecutionContext, HandlerRegistry, NodeError, OperationHandler};

use crate::condition::{is_truthy, EdgeCondition};
use crate::error::EngineError;
use crate::graph::Graph;
use crate::models::{Edge, MergeConfig, MergeStrategy, Node, NodeType, WorkflowDefinition};
use crate::state::{ErrorKind, ExecutionState, ExecutionStatus};
use crate::validator::validate_workflow;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Time limit for a single handler invocation.
    pub node_timeout: Duration,
    /// Time limit for a whole run.
    pub run_timeout: Duration,
    /// Refuse to start runs whose definition fails validation.
    pub validate_before_run: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            node_timeout: Duration::from_secs(300),
            run_timeout: Duration::from_secs(1800),
            validate_before_run: true,
        }
    }
}

/// Per-call overrides of [`EngineConfig`].
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub node_timeout: Option<Duration>,
    pub run_timeout: Option<Duration>,
    pub skip_validation: bool,
}

/// Returned by [`ExecutionEngine::execute_workflow`] as soon as the run is
/// registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub success: bool,
    pub execution_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Execution registry
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ExecutionSlot {
    state: ExecutionState,
    cancel: CancellationToken,
    status: watch::Sender<ExecutionStatus>,
}

impl ExecutionSlot {
    fn new(state: ExecutionState) -> Self {
        let (status, _) = watch::channel(state.status);
        Self {
            state,
            cancel: CancellationToken::new(),
            status,
        }
    }

    /// Finish the run unless it already ended, and broadcast the new status.
    fn finish(&mut self, status: ExecutionStatus) -> bool {
        let changed = self.state.finish(status);
        if changed {
            self.status.send_replace(status);
        }
        changed
    }
}

type Executions = Arc<DashMap<Uuid, ExecutionSlot>>;

// ---------------------------------------------------------------------------
// ExecutionEngine
// ---------------------------------------------------------------------------

/// Runs workflow definitions and keeps the state of every run until the
/// caller discards it. Cheap to clone; clones share the same registry.
#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    registry: Arc<HandlerRegistry>,
    config: EngineConfig,
    executions: Executions,
}

impl ExecutionEngine {
    pub fn new(registry: HandlerRegistry, config: EngineConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            config,
            executions: Arc::new(DashMap::new()),
        }
    }

    /// Start a run of `definition` and return without waiting for it.
    ///
    /// The run works on its own copy of the definition, so later edits by
    /// the caller do not affect it. Must be called from within a Tokio
    /// runtime.
    #[instrument(skip(self, definition, input, options), fields(workflow_id = %definition.id))]
    pub fn execute_workflow(
        &self,
        definition: &WorkflowDefinition,
        input: Value,
        options: ExecuteOptions,
    ) -> ExecuteResponse {
        let execution_id = Uuid::new_v4();
        let mut state = ExecutionState::new(execution_id, definition.id.clone(), input.clone());

        if self.config.validate_before_run && !options.skip_validation {
            let report = validate_workflow(definition);
            if !report.is_valid {
                for finding in report.fatal() {
                    state.record_error(finding.node_id.as_deref(), ErrorKind::Validation, &finding.message);
                }
                let message = format!("workflow failed validation: {}", report.summary());
                warn!(%execution_id, "{message}");
                return self.reject(state, message);
            }
        }

        let graph = Graph::new(definition);
        let Some(start) = graph.start_node().map(|n| n.id.clone()) else {
            let message = "workflow has no unique start node".to_owned();
            state.record_error(None, ErrorKind::Validation, &message);
            warn!(%execution_id, "{message}");
            return self.reject(state, message);
        };

        let slot = ExecutionSlot::new(state);
        let cancel = slot.cancel.clone();
        self.executions.insert(execution_id, slot);

        let run = Run {
            execution_id,
            workflow_id: definition.id.clone(),
            graph,
            registry: Arc::clone(&self.registry),
            executions: Arc::clone(&self.executions),
            cancel,
            node_timeout: options.node_timeout.unwrap_or(self.config.node_timeout),
            run_timeout: options.run_timeout.unwrap_or(self.config.run_timeout),
            tasks: JoinSet::new(),
            in_flight: HashMap::new(),
            dispatched: HashSet::new(),
            barriers: HashMap::new(),
        };
        tokio::spawn(run.drive(start, input));

        info!(%execution_id, "execution started");
        ExecuteResponse {
            success: true,
            execution_id,
            error: None,
        }
    }

    /// Register a run that never started.
    fn reject(&self, state: ExecutionState, message: String) -> ExecuteResponse {
        let execution_id = state.execution_id;
        let mut slot = ExecutionSlot::new(state);
        slot.finish(ExecutionStatus::Failed);
        self.executions.insert(execution_id, slot);
        ExecuteResponse {
            success: false,
            execution_id,
            error: Some(message),
        }
    }

    /// Point-in-time copy of a run's state. Never blocks on the run.
    pub fn get_execution_state(&self, execution_id: Uuid) -> Option<ExecutionState> {
        self.executions.get(&execution_id).map(|slot| slot.state.clone())
    }

    /// Cancel a run. The state turns `cancelled` immediately; handlers
    /// already running are left to finish and their results are discarded.
    /// Cancelling a run that already ended is a no-op.
    pub fn cancel_execution(&self, execution_id: Uuid) -> Result<(), EngineError> {
        let mut slot = self
            .executions
            .get_mut(&execution_id)
            .ok_or(EngineError::ExecutionNotFound(execution_id))?;

        if slot.finish(ExecutionStatus::Cancelled) {
            slot.cancel.cancel();
            info!(%execution_id, "execution cancelled");
        }
        Ok(())
    }

    /// Wait until the run reaches a terminal status and return its state.
    pub async fn wait_for_completion(&self, execution_id: Uuid) -> Result<ExecutionState, EngineError> {
        let mut status = self
            .executions
            .get(&execution_id)
            .map(|slot| slot.status.subscribe())
            .ok_or(EngineError::ExecutionNotFound(execution_id))?;

        status
            .wait_for(|s| s.is_terminal())
            .await
            .map_err(|_| EngineError::ExecutionNotFound(execution_id))?;

        self.get_execution_state(execution_id)
            .ok_or(EngineError::ExecutionNotFound(execution_id))
    }

    /// Drop a run from the registry, cancelling it if still active.
    pub fn discard_execution(&self, execution_id: Uuid) -> Option<ExecutionState> {
        let (_, slot) = self.executions.remove(&execution_id)?;
        slot.cancel.cancel();
        Some(slot.state)
    }

    pub fn execution_ids(&self) -> Vec<Uuid> {
        self.executions.iter().map(|entry| *entry.key()).collect()
    }
}

// ---------------------------------------------------------------------------
// Run coordinator
// ---------------------------------------------------------------------------

/// What a node task hands back to the coordinator.
struct NodeOutcome {
    node_id: String,
    input: Value,
    output_key: String,
    result: Result<Value, NodeError>,
}

/// Arrivals collected at a merge node.
struct Barrier {
    config: MergeConfig,
    expected: Vec<String>,
    arrivals: Vec<(String, Value)>,
    fired: bool,
}

impl Barrier {
    fn is_complete(&self) -> bool {
        self.expected
            .iter()
            .all(|up| self.arrivals.iter().any(|(from, _)| from == up))
    }

    fn combined_input(&self) -> Value {
        match self.config.strategy {
            MergeStrategy::Combine => Value::Object(self.arrivals.iter().cloned().collect()),
            MergeStrategy::First => self
                .arrivals
                .first()
                .map(|(_, value)| value.clone())
                .unwrap_or(Value::Null),
            MergeStrategy::Collect => {
                Value::Array(self.arrivals.iter().map(|(_, value)| value.clone()).collect())
            }
        }
    }
}

/// Owns the traversal of one run. All state writes happen here, never in
/// node tasks.
struct Run {
    execution_id: Uuid,
    workflow_id: String,
    graph: Graph,
    registry: Arc<HandlerRegistry>,
    executions: Executions,
    cancel: CancellationToken,
    node_timeout: Duration,
    run_timeout: Duration,
    tasks: JoinSet<NodeOutcome>,
    /// Node id and input of every task still in the `JoinSet`.
    in_flight: HashMap<task::Id, (String, Value)>,
    /// Nodes that have been handed to a task. Each runs at most once.
    dispatched: HashSet<String>,
    barriers: HashMap<String, Barrier>,
}

impl Run {
    #[instrument(
        skip(self, start, input),
        fields(workflow_id = %self.workflow_id, execution_id = %self.execution_id)
    )]
    async fn drive(mut self, start: String, input: Value) {
        let started = self
            .with_slot(|slot| {
                let started = slot.state.start();
                if started {
                    slot.status.send_replace(ExecutionStatus::Running);
                }
                started
            })
            .unwrap_or(false);
        if !started {
            debug!("execution ended before it started");
            return;
        }

        let deadline = Instant::now() + self.run_timeout;
        self.arrive(&start, None, input);

        loop {
            if self.tasks.is_empty() {
                if self.release_partial_merges() {
                    continue;
                }
                break;
            }

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    self.tasks.detach_all();
                    self.finish(ExecutionStatus::Cancelled);
                    info!("execution stopped after cancellation");
                    return;
                }

                _ = tokio::time::sleep_until(deadline) => {
                    let message = format!("execution exceeded run timeout of {:?}", self.run_timeout);
                    error!("{message}");
                    self.with_slot(|slot| slot.state.record_error(None, ErrorKind::Timeout, message));
                    self.tasks.detach_all();
                    self.finish(ExecutionStatus::Failed);
                    return;
                }

                Some(joined) = self.tasks.join_next_with_id() => {
                    let flow = match joined {
                        Ok((id, outcome)) => {
                            self.in_flight.remove(&id);
                            self.handle(outcome)
                        }
                        Err(e) => self.handle_join_error(e),
                    };
                    if flow.is_break() {
                        self.tasks.detach_all();
                        self.finish(ExecutionStatus::Failed);
                        return;
                    }
                }
            }
        }

        let reached_end = self
            .graph
            .nodes_of_type(NodeType::End)
            .any(|n| self.dispatched.contains(&n.id));
        if !reached_end {
            warn!("execution finished without reaching an end node");
        }
        if self.finish(ExecutionStatus::Completed) {
            info!("execution completed");
        }
    }

    /// Deliver `value` to `node_id`, coming from `from` (`None` for the
    /// start node).
    fn arrive(&mut self, node_id: &str, from: Option<&str>, value: Value) {
        if self.cancel.is_cancelled() {
            return;
        }
        let Some(node) = self.graph.node(node_id).cloned() else {
            return;
        };

        if !node.is_merge() {
            if !self.dispatched.insert(node.id.clone()) {
                debug!(node_id, "node already executed; ignoring arrival");
                return;
            }
            self.dispatch(&node, value);
            return;
        }

        let from = from.unwrap_or(node_id).to_owned();
        let barrier = self.barrier(&node);
        if barrier.fired {
            warn!(node_id, from = %from, "late arrival at merge discarded");
            return;
        }
        if barrier.arrivals.iter().any(|(seen, _)| *seen == from) {
            debug!(node_id, from = %from, "duplicate arrival at merge ignored");
            return;
        }
        barrier.arrivals.push((from, value));

        if !barrier.config.wait_for_all || barrier.is_complete() {
            self.fire_merge(&node);
        }
    }

    fn barrier(&mut self, node: &Node) -> &mut Barrier {
        let graph = &self.graph;
        self.barriers.entry(node.id.clone()).or_insert_with(|| {
            let config = MergeConfig::from_node(node).unwrap_or_else(|e| {
                warn!(node_id = %node.id, "invalid merge config, using defaults: {e}");
                MergeConfig::default()
            });
            Barrier {
                config,
                expected: graph.upstream(&node.id).to_vec(),
                arrivals: Vec::new(),
                fired: false,
            }
        })
    }

    fn fire_merge(&mut self, node: &Node) {
        let Some(barrier) = self.barriers.get_mut(&node.id) else {
            return;
        };
        barrier.fired = true;
        let input = barrier.combined_input();
        debug!(node_id = %node.id, arrivals = barrier.arrivals.len(), "merge released");
        self.dispatched.insert(node.id.clone());
        self.dispatch(node, input);
    }

    /// Release merges still waiting on branches that can no longer arrive.
    /// Returns true if anything was dispatched.
    fn release_partial_merges(&mut self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let waiting: Vec<Node> = self
            .graph
            .nodes()
            .iter()
            .filter(|n| {
                self.barriers
                    .get(&n.id)
                    .is_some_and(|b| !b.fired && !b.arrivals.is_empty())
            })
            .cloned()
            .collect();

        for node in &waiting {
            warn!(node_id = %node.id, "releasing merge with missing branches");
            self.fire_merge(node);
        }
        !waiting.is_empty()
    }

    /// Spawn the node's handler on the task set.
    fn dispatch(&mut self, node: &Node, input: Value) {
        let Some(variables) = self.with_slot(|slot| {
            slot.state.current_node = Some(node.id.clone());
            slot.state.context.clone()
        }) else {
            return;
        };

        let handler: Result<Option<Arc<dyn OperationHandler>>, NodeError> =
            match node.data.operation.as_deref() {
                None => Ok(None),
                Some(_) if matches!(node.node_type, NodeType::Start | NodeType::End) => Ok(None),
                Some(op) => self
                    .registry
                    .get(op)
                    .map(Some)
                    .ok_or_else(|| NodeError::UnknownOperation(op.to_owned())),
            };

        let output_key = node
            .config_value("outputKey")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .or_else(|| {
                handler
                    .as_ref()
                    .ok()
                    .and_then(Option::as_ref)
                    .and_then(|h| h.output_key().map(str::to_owned))
            })
            .unwrap_or_else(|| node.id.clone());

        let timeout = node
            .config_value("timeoutMs")
            .and_then(Value::as_u64)
            .map(Duration::from_millis)
            .unwrap_or(self.node_timeout);

        let config = node.data.config.clone().unwrap_or(Value::Null);
        let ctx = ExecutionContext {
            workflow_id: self.workflow_id.clone(),
            execution_id: self.execution_id,
            node_id: node.id.clone(),
            input,
            variables,
        };

        debug!(node_id = %node.id, "dispatching node");
        let tracked = (ctx.node_id.clone(), ctx.input.clone());
        let abort = self.tasks.spawn(async move {
            let result = match handler {
                Ok(None) => Ok(ctx.input.clone()),
                Ok(Some(handler)) => {
                    match tokio::time::timeout(timeout, handler.execute(&ctx, &config)).await {
                        Ok(result) => result,
                        Err(_) => Err(NodeError::Timeout(timeout)),
                    }
                }
                Err(e) => Err(e),
            };
            NodeOutcome {
                node_id: ctx.node_id,
                input: ctx.input,
                output_key,
                result,
            }
        });
        self.in_flight.insert(abort.id(), tracked);
    }

    /// A node task that panicked fails its node like any handler error.
    fn handle_join_error(&mut self, e: JoinError) -> ControlFlow<()> {
        let Some((node_id, input)) = self.in_flight.remove(&e.id()) else {
            let message = format!("node task aborted: {e}");
            error!("{message}");
            self.with_slot(|slot| slot.state.record_error(None, ErrorKind::Internal, message));
            return ControlFlow::Break(());
        };

        let message = if e.is_panic() {
            let payload = e.into_panic();
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_owned());
            format!("handler panicked: {reason}")
        } else {
            format!("node task aborted: {e}")
        };
        self.handle(NodeOutcome {
            output_key: node_id.clone(),
            node_id,
            input,
            result: Err(NodeError::Failed(message)),
        })
    }

    /// Apply a finished node. `Break` means the run has failed.
    fn handle(&mut self, outcome: NodeOutcome) -> ControlFlow<()> {
        let NodeOutcome {
            node_id,
            input,
            output_key,
            result,
        } = outcome;
        let Some(node) = self.graph.node(&node_id).cloned() else {
            return ControlFlow::Continue(());
        };

        match result {
            Ok(output) => {
                let Some(context) = self
                    .with_slot(|slot| {
                        if slot.state.status.is_terminal() {
                            return None;
                        }
                        slot.state.context.insert(output_key, output.clone());
                        slot.state.executed_nodes.push(node_id.clone());
                        Some(slot.state.context.clone())
                    })
                    .flatten()
                else {
                    debug!(node_id = %node_id, "discarding result of ended run");
                    return ControlFlow::Continue(());
                };
                info!(node_id = %node_id, "node succeeded");

                let decision = node
                    .data
                    .condition
                    .as_ref()
                    .map_or_else(|| is_truthy(&output), |c| c.evaluate(&context));

                let targets: Vec<String> = self
                    .graph
                    .outgoing(&node_id)
                    .iter()
                    .filter(|edge| edge_is_eligible(edge, decision, &context))
                    .map(|edge| edge.target.clone())
                    .collect();
                if targets.is_empty() && node.node_type != NodeType::End {
                    debug!(node_id = %node_id, "no eligible outgoing edge");
                }
                for target in targets {
                    debug!(from = %node_id, to = %target, "following edge");
                    self.arrive(&target, Some(&node_id), output.clone());
                }
                ControlFlow::Continue(())
            }

            Err(e) => {
                let kind = if e.is_timeout() {
                    ErrorKind::Timeout
                } else {
                    ErrorKind::Operation
                };
                let message = e.to_string();
                let recorded = self
                    .with_slot(|slot| {
                        if slot.state.status.is_terminal() {
                            return false;
                        }
                        slot.state.record_error(Some(&node_id), kind, message.clone());
                        true
                    })
                    .unwrap_or(false);
                if !recorded {
                    debug!(node_id = %node_id, "discarding failure of ended run");
                    return ControlFlow::Continue(());
                }

                let recovery: Vec<String> = self
                    .graph
                    .outgoing(&node_id)
                    .iter()
                    .filter(|edge| edge.is_error_edge())
                    .map(|edge| edge.target.clone())
                    .collect();
                if recovery.is_empty() {
                    error!(node_id = %node_id, "node failed: {message}");
                    return ControlFlow::Break(());
                }

                warn!(node_id = %node_id, "node failed, following error edge: {message}");
                let payload = json!({ "nodeId": node_id, "error": message, "input": input });
                for target in recovery {
                    self.arrive(&target, Some(&node_id), payload.clone());
                }
                ControlFlow::Continue(())
            }
        }
    }

    /// Run `f` against this run's registry slot. `None` once the run has been
    /// discarded.
    fn with_slot<R>(&self, f: impl FnOnce(&mut ExecutionSlot) -> R) -> Option<R> {
        self.executions
            .get_mut(&self.execution_id)
            .map(|mut slot| f(&mut slot))
    }

    fn finish(&self, status: ExecutionStatus) -> bool {
        self.with_slot(|slot| slot.finish(status)).unwrap_or(false)
    }
}

/// Whether a successful node's outgoing edge should be followed.
fn edge_is_eligible(edge: &Edge, decision: bool, context: &Map<String, Value>) -> bool {
    match &edge.condition {
        None => true,
        Some(EdgeCondition::OnError) => false,
        Some(EdgeCondition::OnTrue) => decision,
        Some(EdgeCondition::OnFalse) => !decision,
        Some(EdgeCondition::Predicate(condition)) => condition.evaluate(context),
    }
}
