//! Flow executor: walks one flow definition plus one execution context to
//! completion, checkpointing after every node.
//!
//! Per-run state machine: `Pending → Running → {Succeeded, Failed}`. A
//! stalled run is never a state the executor holds; it is diagnosed
//! externally from the log row's `updated_at` age, and recovered by the
//! breakpoint retry scheduler via full replay from the top.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::Value;

use crate::config::EngineConfig;
use crate::context::{ExecutionData, TriggerInput};
use crate::error::{FlowError, FlowResult};
use crate::graph::{build_graph, validate_graph, FlowDefinition, FlowGraph, FlowNode, SourceHandle};
use crate::nodes::{NodeRunnerRegistry, VertexResult};
use crate::runtime::{IdGenerator, TimeProvider};
use crate::store::{
    ExecutionArchiveStore, ExecutionSnapshot, FlowExecuteLog, FlowExecuteLogRepository, RunStatus,
};

/// What one driven run reports back to the triggering surface.
#[derive(Debug)]
pub struct RunOutcome {
    pub execute_id: String,
    pub status: RunStatus,
    /// Output of the last end node reached, `Null` otherwise.
    pub final_output: Value,
    pub vertex_results: Vec<VertexResult>,
}

/// Mutable walk bookkeeping for one run.
struct WalkState {
    completed: HashSet<String>,
    skipped: HashSet<String>,
    /// Node id → the one handle it activated on completion.
    activated: HashMap<String, SourceHandle>,
    results: Vec<VertexResult>,
    final_output: Value,
    steps: i32,
}

impl WalkState {
    fn new() -> Self {
        WalkState {
            completed: HashSet::new(),
            skipped: HashSet::new(),
            activated: HashMap::new(),
            results: Vec::new(),
            final_output: Value::Null,
            steps: 0,
        }
    }
}

/// Where the walk goes after one node.
enum StepControl {
    /// Successors to enqueue.
    Advance(Vec<String>),
    /// Business failure with no declared error handle: the run is over.
    Terminate(String),
}

pub struct FlowExecutor {
    registry: Arc<NodeRunnerRegistry>,
    log_repo: Arc<dyn FlowExecuteLogRepository>,
    archive: Arc<dyn ExecutionArchiveStore>,
    time: Arc<dyn TimeProvider>,
    ids: Arc<dyn IdGenerator>,
    config: EngineConfig,
}

impl FlowExecutor {
    pub fn new(
        registry: Arc<NodeRunnerRegistry>,
        log_repo: Arc<dyn FlowExecuteLogRepository>,
        archive: Arc<dyn ExecutionArchiveStore>,
        time: Arc<dyn TimeProvider>,
        ids: Arc<dyn IdGenerator>,
        config: EngineConfig,
    ) -> Self {
        FlowExecutor {
            registry,
            log_repo,
            archive,
            time,
            ids,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start a fresh run: build the execution context, create the log row,
    /// archive the initial snapshot, walk to completion.
    pub async fn start(
        &self,
        definition: &FlowDefinition,
        input: TriggerInput,
    ) -> FlowResult<RunOutcome> {
        self.registry.ensure_total(definition)?;
        let graph = build_graph(definition)?;
        validate_graph(&graph)?;

        let execute_id = self.ids.next_id();
        let data = ExecutionData::new(execute_id.clone(), input);

        let mut ext_params = HashMap::new();
        ext_params.insert(
            "organization_code".to_string(),
            data.organization_code.clone(),
        );
        self.log_repo
            .create(&FlowExecuteLog {
                execute_id: execute_id.clone(),
                organization_code: data.organization_code.clone(),
                status: RunStatus::Running,
                updated_at: self.now(),
                retry_count: 0,
                ext_params,
            })
            .await?;
        self.write_through(definition, &data).await?;

        self.drive(definition, graph, data).await
    }

    /// Re-run an archived execution after `rewind()`. The log row already
    /// exists; its retry count was bumped durably by the scheduler before
    /// this is called.
    pub async fn replay(
        &self,
        definition: &FlowDefinition,
        data: ExecutionData,
    ) -> FlowResult<RunOutcome> {
        self.registry.ensure_total(definition)?;
        let graph = build_graph(definition)?;
        validate_graph(&graph)?;

        let mut row = self
            .log_repo
            .get_by_execute_id(&data.execute_id)
            .await?
            .ok_or_else(|| {
                FlowError::LogRepositoryError(format!(
                    "No log row for execute id: {}",
                    data.execute_id
                ))
            })?;
        row.status = RunStatus::Running;
        row.updated_at = self.now();
        self.log_repo.update(&row).await?;

        self.drive(definition, graph, data).await
    }

    /// Walk the DAG. Sequential within the run: one node at a time, log
    /// upsert plus archive write-through after every node, *before*
    /// advancing.
    async fn drive(
        &self,
        definition: &FlowDefinition,
        mut graph: FlowGraph,
        mut data: ExecutionData,
    ) -> FlowResult<RunOutcome> {
        let mut state = WalkState::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(graph.trigger_id().to_string());

        let mut defers = 0i32;
        while let Some(node_id) = queue.pop_front() {
            if state.completed.contains(&node_id) || state.skipped.contains(&node_id) {
                continue;
            }
            if !self.is_ready(&graph, &node_id, &state) {
                defers += 1;
                if defers > self.config.max_steps.saturating_mul(4) {
                    return Err(FlowError::InternalError(format!(
                        "Walk stuck waiting on predecessors of {node_id}"
                    )));
                }
                queue.push_back(node_id);
                continue;
            }
            defers = 0;

            state.steps += 1;
            if state.steps > self.config.max_steps {
                tracing::warn!(
                    execute_id = %data.execute_id,
                    "max steps exceeded, failing run"
                );
                return self.finish(&data, state, RunStatus::Failed).await;
            }

            let node = graph
                .node(&node_id)
                .cloned()
                .ok_or_else(|| FlowError::NodeNotFound(node_id.clone()))?;

            let control = if node.node_type == "loop" {
                self.run_loop(definition, &mut graph, &mut data, &node, &mut state)
                    .await?
            } else {
                self.run_single(definition, &mut graph, &mut data, &node, &mut state)
                    .await?
            };

            match control {
                StepControl::Advance(next) => queue.extend(next),
                StepControl::Terminate(error) => {
                    tracing::warn!(
                        execute_id = %data.execute_id,
                        node_id = %node_id,
                        error = %error,
                        "business failure without error handle"
                    );
                    return self.finish(&data, state, RunStatus::Failed).await;
                }
            }
        }

        self.finish(&data, state, RunStatus::Succeeded).await
    }

    /// Execute one non-loop node and decide where the walk goes next.
    async fn run_single(
        &self,
        definition: &FlowDefinition,
        graph: &mut FlowGraph,
        data: &mut ExecutionData,
        node: &FlowNode,
        state: &mut WalkState,
    ) -> FlowResult<StepControl> {
        let runner = self
            .registry
            .get(&node.node_type)
            .ok_or_else(|| FlowError::RunnerNotFound(node.node_type.clone()))?;

        let upstream: Vec<VertexResult> = {
            let preds = graph.predecessors(&node.id);
            state
                .results
                .iter()
                .filter(|r| preds.contains(&r.node_id))
                .cloned()
                .collect()
        };

        let run_result = runner.run(node, data, &upstream).await;
        let vertex = match run_result {
            Ok(vertex) => vertex,
            Err(e) => VertexResult::failure(&node.id, e.to_string()),
        };

        if vertex.success {
            graph.set_debug_result(&node.id, vertex.output.clone());
            if let Value::Object(fields) = &vertex.output {
                data.save_node_context(&node.id, fields.clone());
            }
            if node.node_type == "end" {
                state.final_output = vertex.output.clone();
            }

            let taken = match &vertex.selected_handle {
                Some(branch_id) => SourceHandle::Branch(branch_id.clone()),
                None => SourceHandle::Default,
            };
            let next = graph.next_nodes(&node.id, &taken);
            self.complete_node(graph, data, state, &node.id, taken, vertex);
            self.checkpoint(definition, data).await?;
            Ok(StepControl::Advance(next))
        } else {
            let error = vertex
                .error
                .clone()
                .unwrap_or_else(|| "node failed".to_string());
            graph.set_debug_result(&node.id, serde_json::json!({ "error": error }));
            self.fail_or_route(graph, data, state, &node.id, error, definition)
                .await
        }
    }

    /// Execute a loop node: resolve the iterable, then walk the owned body
    /// once per element, stopping on the loop-end break condition or the
    /// iteration cap. Local iteration state (`item`, `index`) is cleared
    /// from the loop's context slot when the loop concludes.
    async fn run_loop(
        &self,
        definition: &FlowDefinition,
        graph: &mut FlowGraph,
        data: &mut ExecutionData,
        node: &FlowNode,
        state: &mut WalkState,
    ) -> FlowResult<StepControl> {
        let runner = self
            .registry
            .get(&node.node_type)
            .ok_or_else(|| FlowError::RunnerNotFound(node.node_type.clone()))?;

        let head = match runner.run(node, data, &[]).await {
            Ok(vertex) if vertex.success => vertex,
            Ok(vertex) => {
                let error = vertex.error.unwrap_or_else(|| "loop failed".to_string());
                return self.fail_or_route(graph, data, state, &node.id, error, definition).await;
            }
            Err(e) => {
                return self
                    .fail_or_route(graph, data, state, &node.id, e.to_string(), definition)
                    .await;
            }
        };

        let iterable = head.output.as_array().cloned().unwrap_or_default();
        let end_id = graph
            .loop_end_of(&node.id)
            .ok_or_else(|| FlowError::UnterminatedLoop(node.id.clone()))?
            .to_string();
        let members: Vec<String> = graph.loop_members(&node.id).to_vec();
        state.results.push(head);
        state.completed.insert(node.id.clone());
        state
            .activated
            .insert(node.id.clone(), SourceHandle::LoopBody);

        let mut iterations = 0usize;
        'elements: for (index, item) in iterable.iter().enumerate() {
            if index >= self.config.max_loop_iterations {
                return Ok(StepControl::Terminate(
                    FlowError::MaxLoopIterationsExceeded(self.config.max_loop_iterations)
                        .to_string(),
                ));
            }
            iterations += 1;

            let mut fields = serde_json::Map::new();
            fields.insert("item".to_string(), item.clone());
            fields.insert("index".to_string(), serde_json::json!(index));
            data.save_node_context(&node.id, fields);

            // Body nodes re-execute for every element.
            for member in &members {
                state.completed.remove(member);
                state.skipped.remove(member);
                state.activated.remove(member);
            }
            state.completed.remove(&end_id);
            state.activated.remove(&end_id);

            let mut body: VecDeque<String> =
                graph.next_nodes(&node.id, &SourceHandle::LoopBody).into();

            let mut defers = 0i32;
            while let Some(body_id) = body.pop_front() {
                if state.completed.contains(&body_id) || state.skipped.contains(&body_id) {
                    continue;
                }
                if !self.is_ready(graph, &body_id, state) {
                    defers += 1;
                    if defers > self.config.max_steps.saturating_mul(4) {
                        return Err(FlowError::InternalError(format!(
                            "Loop body stuck waiting on predecessors of {body_id}"
                        )));
                    }
                    body.push_back(body_id);
                    continue;
                }
                defers = 0;

                if body_id == end_id {
                    let end_node = graph
                        .node(&end_id)
                        .cloned()
                        .ok_or_else(|| FlowError::NodeNotFound(end_id.clone()))?;
                    let end_runner = self
                        .registry
                        .get(&end_node.node_type)
                        .ok_or_else(|| FlowError::RunnerNotFound(end_node.node_type.clone()))?;
                    let vertex = end_runner
                        .run(&end_node, data, &[])
                        .await
                        .unwrap_or_else(|e| VertexResult::failure(&end_id, e.to_string()));
                    if !vertex.success {
                        let error = vertex
                            .error
                            .clone()
                            .unwrap_or_else(|| "loop-end failed".to_string());
                        return Ok(StepControl::Terminate(error));
                    }
                    let should_break = vertex
                        .output
                        .get("break")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    state.results.push(vertex);
                    self.checkpoint(definition, data).await?;
                    if should_break {
                        break 'elements;
                    }
                    break; // next element
                }

                state.steps += 1;
                if state.steps > self.config.max_steps {
                    return Ok(StepControl::Terminate(
                        FlowError::MaxStepsExceeded(self.config.max_steps).to_string(),
                    ));
                }

                let body_node = graph
                    .node(&body_id)
                    .cloned()
                    .ok_or_else(|| FlowError::NodeNotFound(body_id.clone()))?;
                let control = if body_node.node_type == "loop" {
                    Box::pin(self.run_loop(definition, graph, data, &body_node, state)).await?
                } else {
                    self.run_single(definition, graph, data, &body_node, state)
                        .await?
                };
                match control {
                    StepControl::Advance(next) => body.extend(next),
                    StepControl::Terminate(error) => return Ok(StepControl::Terminate(error)),
                }
            }
        }

        // Iteration state stays loop-local; only the summary survives.
        data.clear_node_context_fields(&node.id, &["item", "index"]);
        let mut summary = serde_json::Map::new();
        summary.insert("iterations".to_string(), serde_json::json!(iterations));
        data.save_node_context(&node.id, summary);

        state.completed.insert(end_id.clone());
        state.activated.insert(end_id.clone(), SourceHandle::Default);
        data.mark_completed(&node.id);
        self.checkpoint(definition, data).await?;

        Ok(StepControl::Advance(
            graph.next_nodes(&end_id, &SourceHandle::Default),
        ))
    }

    /// Business failure on a node that may or may not declare an error
    /// handle.
    async fn fail_or_route(
        &self,
        graph: &mut FlowGraph,
        data: &mut ExecutionData,
        state: &mut WalkState,
        node_id: &str,
        error: String,
        definition: &FlowDefinition,
    ) -> FlowResult<StepControl> {
        state
            .results
            .push(VertexResult::failure(node_id, error.clone()));
        let error_targets = graph.next_nodes(node_id, &SourceHandle::Error);
        if error_targets.is_empty() {
            return Ok(StepControl::Terminate(error));
        }
        let mut fields = serde_json::Map::new();
        fields.insert("error".to_string(), Value::String(error));
        data.save_node_context(node_id, fields);
        state.completed.insert(node_id.to_string());
        state
            .activated
            .insert(node_id.to_string(), SourceHandle::Error);
        data.mark_completed(node_id);
        self.propagate_skip(graph, state, node_id);
        self.checkpoint(definition, data).await?;
        Ok(StepControl::Advance(error_targets))
    }

    /// Record completion bookkeeping for a node and mark the paths it did
    /// not take as skipped.
    fn complete_node(
        &self,
        graph: &FlowGraph,
        data: &mut ExecutionData,
        state: &mut WalkState,
        node_id: &str,
        taken: SourceHandle,
        vertex: VertexResult,
    ) {
        state.results.push(vertex);
        state.completed.insert(node_id.to_string());
        state.activated.insert(node_id.to_string(), taken);
        data.mark_completed(node_id);
        self.propagate_skip(graph, state, node_id);
    }

    /// From a just-completed node, transitively skip successors reachable
    /// only through handles that did not fire.
    fn propagate_skip(&self, graph: &FlowGraph, state: &mut WalkState, from: &str) {
        let mut queue: VecDeque<String> = graph
            .outgoing_edges(from)
            .into_iter()
            .map(|e| e.target)
            .collect();

        while let Some(node_id) = queue.pop_front() {
            if state.skipped.contains(&node_id) || state.completed.contains(&node_id) {
                continue;
            }
            let incoming = graph.incoming_edges(&node_id);
            let all_dead = incoming.iter().all(|edge| {
                if state.skipped.contains(&edge.source) {
                    return true;
                }
                match state.activated.get(&edge.source) {
                    Some(taken) => taken != &edge.source_handle,
                    None => false,
                }
            });
            if all_dead {
                state.skipped.insert(node_id.clone());
                for edge in graph.outgoing_edges(&node_id) {
                    queue.push_back(edge.target);
                }
            }
        }
    }

    /// A node may run once every incoming edge is resolved: its source
    /// either completed or was skipped off an untaken path.
    fn is_ready(&self, graph: &FlowGraph, node_id: &str, state: &WalkState) -> bool {
        graph.incoming_edges(node_id).iter().all(|edge| {
            state.completed.contains(&edge.source) || state.skipped.contains(&edge.source)
        })
    }

    /// Durable upsert + archive write-through. Called after every node,
    /// before the walk advances: this ordering is what makes replay sound.
    async fn checkpoint(
        &self,
        definition: &FlowDefinition,
        data: &mut ExecutionData,
    ) -> FlowResult<()> {
        let mut row = self
            .log_repo
            .get_by_execute_id(&data.execute_id)
            .await?
            .ok_or_else(|| {
                FlowError::LogRepositoryError(format!(
                    "No log row for execute id: {}",
                    data.execute_id
                ))
            })?;
        row.updated_at = self.now();
        self.log_repo.update(&row).await?;

        // The archived object must already reflect every mutation; entries
        // serialized here count as confirmed from now on.
        data.mark_checkpoint();
        self.write_through(definition, data).await
    }

    async fn write_through(
        &self,
        definition: &FlowDefinition,
        data: &ExecutionData,
    ) -> FlowResult<()> {
        self.archive
            .put(
                &data.organization_code,
                &data.execute_id,
                &ExecutionSnapshot {
                    definition: definition.clone(),
                    execution_data: data.clone(),
                },
            )
            .await
    }

    async fn finish(
        &self,
        data: &ExecutionData,
        state: WalkState,
        status: RunStatus,
    ) -> FlowResult<RunOutcome> {
        let mut row = self
            .log_repo
            .get_by_execute_id(&data.execute_id)
            .await?
            .ok_or_else(|| {
                FlowError::LogRepositoryError(format!(
                    "No log row for execute id: {}",
                    data.execute_id
                ))
            })?;
        row.status = status;
        row.updated_at = self.now();
        self.log_repo.update(&row).await?;

        Ok(RunOutcome {
            execute_id: data.execute_id.clone(),
            status,
            final_output: state.final_output,
            vertex_results: state.results,
        })
    }

    fn now(&self) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(self.time.now_timestamp(), 0)
            .single()
            .unwrap_or_else(Utc::now)
    }
}
