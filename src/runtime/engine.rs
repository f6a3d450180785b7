/// Petgraph-based workflow orchestrator
///
/// Walks a compiled [`WorkflowGraph`] from its trigger: conditions pick outgoing edges by their
/// outcome, actions are journaled then dispatched, delays suspend only their own run. A run
/// ends COMMITTED when every path reached a terminal node without failures; otherwise it is
/// finalized according to the workflow's [`RollbackPolicy`].
///
/// Concurrency: every run is independent and holds the records it touches through its own
/// [`RecordLease`] until it is finalized. Inside a run, traversal is sequential except where a
/// node has several followed edges; those branches run concurrently on cloned contexts and the
/// run waits for all of them.

use crate::error::EngineError;
use crate::runtime::dispatch::ActionDispatcher;
use crate::runtime::evaluator::{ConditionEvaluator, Evaluation};
use crate::runtime::metrics::MetricsSink;
use crate::runtime::records::RecordLease;
use crate::runtime::run::{CompensationDescriptor, CompensationState, NodeOutcome, RunRecord, RunStatus};
use crate::workflow::context::RunContext;
use crate::workflow::graph::{CompiledNode, Outgoing, Step, WorkflowGraph};
use crate::workflow::storage::WorkflowRepository;
use crate::workflow::types::{ActionNode, BranchTag, RollbackPolicy, TriggerEvent};
use anyhow::Context;
use futures::future::{join_all, BoxFuture, FutureExt};
use petgraph::graph::NodeIndex;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Workflow orchestrator; cheap to clone, clones share runs and collaborators
#[derive(Clone)]
pub struct ExecutionEngine {
    repository: Arc<dyn WorkflowRepository>,
    dispatcher: Arc<ActionDispatcher>,
    evaluator: Arc<ConditionEvaluator>,
    metrics: Arc<dyn MetricsSink>,
    /// Cancellation handles of runs in flight
    active: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
}

/// A run started in the background
#[derive(Debug)]
pub struct RunHandle {
    pub run_id: Uuid,
    join: JoinHandle<RunRecord>,
}

impl RunHandle {
    /// Wait for the run's terminal record
    pub async fn join(self) -> anyhow::Result<RunRecord> {
        self.join
            .await
            .with_context(|| format!("Run {} task failed", self.run_id))
    }
}

/// Per-run state shared by concurrent branches
struct RunState {
    run_id: Uuid,
    graph: Arc<WorkflowGraph>,
    policy: RollbackPolicy,
    record: Mutex<RunRecord>,
    lease: RecordLease,
}

impl ExecutionEngine {
    pub fn new(
        repository: Arc<dyn WorkflowRepository>,
        dispatcher: ActionDispatcher,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            repository,
            dispatcher: Arc::new(dispatcher),
            evaluator: Arc::new(ConditionEvaluator::new(metrics.clone())),
            metrics,
            active: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn evaluator(&self) -> &ConditionEvaluator {
        &self.evaluator
    }

    pub fn dispatcher(&self) -> &ActionDispatcher {
        &self.dispatcher
    }

    /// Run to completion under the workflow's own rollback policy
    pub async fn execute(&self, graph: Arc<WorkflowGraph>, event: TriggerEvent) -> RunRecord {
        let policy = graph.workflow().rollback_policy;
        self.execute_with_policy(graph, event, policy).await
    }

    /// Run to completion under an explicit rollback policy
    pub async fn execute_with_policy(
        &self,
        graph: Arc<WorkflowGraph>,
        event: TriggerEvent,
        policy: RollbackPolicy,
    ) -> RunRecord {
        let run_id = Uuid::new_v4();
        let cancel = self.register(run_id).await;
        self.run(run_id, graph, event, policy, cancel).await
    }

    /// Load a stored workflow through the repository and run it
    pub async fn execute_stored(&self, workflow_id: &str, event: TriggerEvent) -> anyhow::Result<RunRecord> {
        let graph = self
            .repository
            .load_workflow(workflow_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Workflow not found: {}", workflow_id))?;
        Ok(self.execute(Arc::new(graph), event).await)
    }

    /// Start a run on its own task
    ///
    /// The run is registered before the task starts, so it can be cancelled immediately.
    pub async fn spawn(&self, graph: Arc<WorkflowGraph>, event: TriggerEvent) -> RunHandle {
        let run_id = Uuid::new_v4();
        let cancel = self.register(run_id).await;
        let policy = graph.workflow().rollback_policy;
        let engine = self.clone();

        let join = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(engine.run(run_id, graph, event, policy, cancel))
                .catch_unwind()
                .await;
            match outcome {
                Ok(record) => record,
                Err(panic) => {
                    tracing::error!("💥 Run {} panicked", run_id);
                    engine.active.write().await.remove(&run_id);
                    std::panic::resume_unwind(panic)
                }
            }
        });
        RunHandle { run_id, join }
    }

    /// Request cancellation; takes effect at the next node visit or during a delay
    pub async fn cancel(&self, run_id: Uuid) -> bool {
        match self.active.read().await.get(&run_id) {
            Some(token) => {
                tracing::info!("🛑 Cancellation requested for run {}", run_id);
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn active_runs(&self) -> Vec<Uuid> {
        self.active.read().await.keys().copied().collect()
    }

    async fn register(&self, run_id: Uuid) -> CancellationToken {
        let token = CancellationToken::new();
        self.active.write().await.insert(run_id, token.clone());
        token
    }

    async fn run(
        &self,
        run_id: Uuid,
        graph: Arc<WorkflowGraph>,
        event: TriggerEvent,
        policy: RollbackPolicy,
        cancel: CancellationToken,
    ) -> RunRecord {
        let started = Instant::now();
        let workflow = graph.workflow();
        tracing::info!(
            "🚀 Starting run {} of workflow '{}' v{} ({:?})",
            run_id,
            workflow.id,
            workflow.version,
            policy
        );

        let mut record = RunRecord::new(run_id, &workflow.id, workflow.version, policy);
        self.persist(&record).await;
        if let Err(e) = record.transition(RunStatus::Running) {
            tracing::error!("❌ Run {}: {}", run_id, e);
        }
        self.persist(&record).await;

        let state = RunState {
            run_id,
            graph: graph.clone(),
            policy,
            record: Mutex::new(record),
            lease: self.dispatcher.lease(),
        };
        let context = RunContext::from_event(&event);
        let result = self.walk(&state, graph.trigger(), context, cancel).await;

        let RunState { record, lease, .. } = state;
        let mut record = record.into_inner();
        self.finalize(&mut record, result).await;
        drop(lease);
        self.active.write().await.remove(&run_id);

        let elapsed = started.elapsed();
        self.metrics.record(
            "workflow.run",
            &[
                ("workflow", record.workflow_id.clone()),
                ("status", record.status.to_string()),
            ],
            elapsed.as_secs_f64() * 1000.0,
        );
        tracing::info!(
            "🏁 Run {} of workflow '{}' finished {} in {:?}",
            run_id,
            record.workflow_id,
            record.status,
            elapsed
        );
        record
    }

    /// Follow the graph from `index` until every path from it has ended
    fn walk<'a>(
        &'a self,
        run: &'a RunState,
        mut index: NodeIndex,
        mut context: RunContext,
        abort: CancellationToken,
    ) -> BoxFuture<'a, Result<(), EngineError>> {
        async move {
            loop {
                if abort.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }

                let node = run.graph.node(index);
                tracing::debug!("📍 Run {}: visiting '{}'", run.run_id, node.id);
                let outgoing = run.graph.outgoing(index);

                let next = match &node.step {
                    Step::Trigger(_) => {
                        run.record.lock().await.visit(&node.id, &node.name, NodeOutcome::Triggered);
                        targets(&outgoing, |_| true)
                    }
                    Step::Condition(condition) => {
                        let evaluation = self.evaluator.evaluate_with(
                            &node.id,
                            condition.operator,
                            &condition.spec,
                            &context,
                        );
                        let selection = select_branches(&node.id, &outgoing, &evaluation);

                        let mut record = run.record.lock().await;
                        if let Some(error) = &evaluation.error {
                            record.diagnostics.push(format!("{}: {}", node.id, error));
                        }
                        record.visit(
                            &node.id,
                            &node.name,
                            NodeOutcome::Condition {
                                satisfied: evaluation.satisfied,
                                branch: selection.as_ref().ok().and_then(|(_, label)| label.clone()),
                                error: evaluation.error.as_ref().map(ToString::to_string),
                            },
                        );
                        drop(record);

                        selection?.0
                    }
                    Step::Action(action) => {
                        match self.run_action(run, node, action, &mut context).await {
                            Ok(()) => {}
                            Err(error) if continues_after(run.policy, &error) => {
                                tracing::warn!("⚠️ Run {}: continuing after '{}': {}", run.run_id, node.id, error);
                                run.record.lock().await.errors.push(error.to_string());
                            }
                            Err(error) => return Err(error),
                        }
                        targets(&outgoing, |_| true)
                    }
                    Step::Delay(delay) => {
                        let duration = Duration::from_secs(delay.delay_seconds);
                        tracing::debug!("⏳ Run {}: delaying {:?} at '{}'", run.run_id, duration, node.id);
                        tokio::select! {
                            _ = tokio::time::sleep(duration) => {}
                            _ = abort.cancelled() => {
                                run.record.lock().await.visit(
                                    &node.id,
                                    &node.name,
                                    NodeOutcome::Skipped { reason: "cancelled during delay".into() },
                                );
                                return Err(EngineError::Cancelled);
                            }
                        }
                        run.record.lock().await.visit(
                            &node.id,
                            &node.name,
                            NodeOutcome::Delayed { seconds: delay.delay_seconds },
                        );
                        targets(&outgoing, |_| true)
                    }
                };

                match next.as_slice() {
                    [] => return Ok(()),
                    [single] => index = *single,
                    _ => return self.fan_out(run, next, context, abort).await,
                }
            }
        }
        .boxed()
    }

    /// Run branches concurrently; under AUTO_ROLLBACK the first failure cancels the siblings
    async fn fan_out(
        &self,
        run: &RunState,
        branches: Vec<NodeIndex>,
        context: RunContext,
        abort: CancellationToken,
    ) -> Result<(), EngineError> {
        tracing::debug!("🔀 Run {}: fanning out into {} branches", run.run_id, branches.len());
        let siblings = abort.child_token();

        let results = join_all(branches.into_iter().map(|target| {
            let token = siblings.clone();
            let context = context.clone();
            async move {
                let result = self.walk(run, target, context, token.clone()).await;
                if result.is_err() && run.policy == RollbackPolicy::AutoRollback {
                    token.cancel();
                }
                result
            }
        }))
        .await;

        // The failure that caused the cancellation is more useful than the cancellations
        let mut cancelled = false;
        for result in results {
            match result {
                Ok(()) => {}
                Err(EngineError::Cancelled) => cancelled = true,
                Err(error) => return Err(error),
            }
        }
        if cancelled {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn run_action(
        &self,
        run: &RunState,
        node: &CompiledNode,
        action: &ActionNode,
        context: &mut RunContext,
    ) -> Result<(), EngineError> {
        let result = self.try_action(run, node, action, context).await;
        if let Err(error) = &result {
            tracing::error!("❌ Action '{}' failed: {}", node.id, error);
            run.record.lock().await.visit(
                &node.id,
                &node.name,
                NodeOutcome::ActionFailed {
                    error: error.to_string(),
                },
            );
        }
        result
    }

    /// Prepare, journal the reversal, execute, merge the output
    async fn try_action(
        &self,
        run: &RunState,
        node: &CompiledNode,
        action: &ActionNode,
        context: &mut RunContext,
    ) -> Result<(), EngineError> {
        let prepared = self
            .dispatcher
            .prepare(&node.id, action, context, &run.lease)
            .await
            .map_err(|e| e.into_engine_error(&node.id))?;

        let seq = match &prepared.compensation {
            Some(reversal) => {
                let descriptor = run
                    .record
                    .lock()
                    .await
                    .journal(&node.id, action.action_type, reversal.clone())
                    .clone();
                if let Err(e) = self.repository.append_compensation(run.run_id, &descriptor).await {
                    run.record
                        .lock()
                        .await
                        .set_compensation_state(descriptor.seq, CompensationState::Discarded);
                    return Err(EngineError::ActionPermanent {
                        node_id: node.id.clone(),
                        message: format!("failed to journal compensation: {:#}", e),
                    });
                }
                Some(descriptor.seq)
            }
            None => None,
        };

        tracing::info!("⚙️ Run {}: executing {} '{}'", run.run_id, action.action_type, node.id);
        match self.dispatcher.execute(&prepared).await {
            Ok(outcome) => {
                if let Some(channel) = &action.output {
                    context.merge(channel, outcome.output);
                }

                let snapshot = {
                    let mut record = run.record.lock().await;
                    if let Some(seq) = seq {
                        record.set_compensation_state(seq, CompensationState::Armed);
                    }
                    record.visit(&node.id, &node.name, NodeOutcome::ActionSucceeded);
                    record.clone()
                };
                if let Some(descriptor) = seq.and_then(|seq| snapshot.compensations.get(seq as usize)) {
                    self.journal(run.run_id, descriptor).await;
                }
                self.persist(&snapshot).await;

                tracing::info!("✅ Action '{}' completed after {} attempt(s)", node.id, outcome.attempts);
                Ok(())
            }
            Err(error) => {
                // A timed-out action may have taken effect
                let state = if error.is_timeout() {
                    CompensationState::Armed
                } else {
                    CompensationState::Discarded
                };
                if let Some(seq) = seq {
                    let descriptor = {
                        let mut record = run.record.lock().await;
                        record.set_compensation_state(seq, state);
                        record.compensations.get(seq as usize).cloned()
                    };
                    if let Some(descriptor) = descriptor {
                        self.journal(run.run_id, &descriptor).await;
                    }
                }
                Err(error.into_engine_error(&node.id))
            }
        }
    }

    async fn finalize(&self, record: &mut RunRecord, result: Result<(), EngineError>) {
        let status = match result {
            Ok(()) if record.errors.is_empty() => RunStatus::Committed,
            Ok(()) => {
                record.reason = Some(format!("{} action(s) failed", record.errors.len()));
                RunStatus::Failed
            }
            Err(error) => {
                tracing::warn!("⚠️ Run {} did not commit: {}", record.run_id, error);
                record.reason = Some(error.to_string());

                let rolls_back =
                    record.policy == RollbackPolicy::AutoRollback || error == EngineError::Cancelled;
                if rolls_back {
                    self.rollback(record).await;
                }
                // Residual compensation errors stay on the record
                if rolls_back && !error.is_structural() {
                    RunStatus::RolledBack
                } else {
                    RunStatus::Failed
                }
            }
        };

        if let Err(e) = record.transition(status) {
            tracing::error!("❌ Run {}: {}", record.run_id, e);
        }
        self.persist(record).await;
    }

    /// Apply armed compensations in strict reverse order; failures become residual errors
    async fn rollback(&self, record: &mut RunRecord) {
        let armed: Vec<CompensationDescriptor> = record
            .compensations
            .iter()
            .rev()
            .filter(|descriptor| descriptor.state == CompensationState::Armed)
            .cloned()
            .collect();

        if armed.is_empty() {
            return;
        }
        tracing::info!("⏪ Rolling back {} action(s) of run {}", armed.len(), record.run_id);

        for descriptor in armed {
            match self.dispatcher.compensate(&descriptor.reversal).await {
                Ok(()) => {
                    tracing::debug!("↩️ Compensated '{}'", descriptor.node_id);
                    record.set_compensation_state(descriptor.seq, CompensationState::Applied);
                }
                Err(e) => {
                    let error = EngineError::Compensation {
                        node_id: descriptor.node_id.clone(),
                        message: e.to_string(),
                    };
                    tracing::error!("❌ {}", error);
                    record.set_compensation_state(descriptor.seq, CompensationState::Failed);
                    record.residual_errors.push(error.to_string());
                }
            }
            if let Some(updated) = record.compensations.get(descriptor.seq as usize) {
                self.journal(record.run_id, updated).await;
            }
        }
    }

    async fn journal(&self, run_id: Uuid, descriptor: &CompensationDescriptor) {
        if let Err(e) = self.repository.append_compensation(run_id, descriptor).await {
            tracing::error!("❌ Failed to update compensation journal of run {}: {:#}", run_id, e);
        }
    }

    async fn persist(&self, record: &RunRecord) {
        if let Err(e) = self.repository.save_run_record(record).await {
            tracing::error!("❌ Failed to persist run {}: {:#}", record.run_id, e);
        }
    }
}

/// Under CONTINUE_ON_ERROR an action failure is recorded and traversal goes on
fn continues_after(policy: RollbackPolicy, error: &EngineError) -> bool {
    policy == RollbackPolicy::ContinueOnError
        && !error.is_structural()
        && *error != EngineError::Cancelled
}

fn targets(outgoing: &[Outgoing<'_>], wanted: impl Fn(Option<&BranchTag>) -> bool) -> Vec<NodeIndex> {
    outgoing
        .iter()
        .filter(|edge| wanted(edge.branch))
        .map(|edge| edge.target)
        .collect()
}

/// String form a named branch tag is compared against
fn value_label(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Pick the edges a condition's outcome follows, with the label of the taken branch
///
/// All edges unlabeled: follow all of them. Unlabeled edges next to ABORT only form a gate:
/// a satisfied condition follows the unlabeled edges, anything else aborts. Otherwise, in
/// order: TRUE/FALSE matching the outcome, a named tag equal to the resolved value, DEFAULT
/// (unlabeled edges count as DEFAULT), ABORT. Nothing left is `NoMatchingBranch`.
fn select_branches(
    node_id: &str,
    outgoing: &[Outgoing<'_>],
    evaluation: &Evaluation,
) -> Result<(Vec<NodeIndex>, Option<String>), EngineError> {
    if outgoing.iter().all(|edge| edge.branch.is_none()) {
        return Ok((targets(outgoing, |_| true), None));
    }

    let gate = outgoing
        .iter()
        .all(|edge| matches!(edge.branch, None | Some(BranchTag::Abort)));
    if gate {
        let open = targets(outgoing, |branch| branch.is_none());
        if evaluation.satisfied && !open.is_empty() {
            return Ok((open, None));
        }
        return Err(EngineError::Aborted {
            node_id: node_id.to_string(),
        });
    }

    let outcome = if evaluation.satisfied {
        BranchTag::True
    } else {
        BranchTag::False
    };
    let matched = targets(outgoing, |branch| branch == Some(&outcome));
    if !matched.is_empty() {
        return Ok((matched, Some(outcome.to_string())));
    }

    if let Some(label) = evaluation.resolved_value.as_ref().map(value_label) {
        let named = targets(outgoing, |branch| {
            matches!(branch, Some(BranchTag::Named(name)) if *name == label)
        });
        if !named.is_empty() {
            return Ok((named, Some(label)));
        }
    }

    let fallback = targets(outgoing, |branch| matches!(branch, None | Some(BranchTag::Default)));
    if !fallback.is_empty() {
        return Ok((fallback, Some(BranchTag::Default.to_string())));
    }

    if outgoing.iter().any(|edge| edge.branch == Some(&BranchTag::Abort)) {
        return Err(EngineError::Aborted {
            node_id: node_id.to_string(),
        });
    }

    Err(EngineError::NoMatchingBranch {
        node_id: node_id.to_string(),
        outcome: outcome.to_string(),
    })
}
