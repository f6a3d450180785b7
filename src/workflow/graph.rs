/// Compiled workflow graph
///
/// A [`Workflow`] definition is validated and compiled once, at save or load time, into an
/// immutable petgraph `DiGraph` whose edges carry their optional branch tag. Operators are
/// parsed here, so an unknown operand/operator pair never reaches a run. The compiled graph is
/// shared across concurrent runs behind an `Arc`.

use crate::error::EngineError;
use crate::rules::apply::Predicate;
use crate::rules::operand::Operator;
use crate::workflow::types::{
    ActionNode, ActionType, BranchTag, ConditionNode, DelayNode, NodeKind, TriggerNode,
    TriggerType, Workflow,
};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::HashMap;

/// Execution-ready workflow
#[derive(Debug)]
pub struct WorkflowGraph {
    /// Definition this graph was compiled from
    workflow: Workflow,
    /// Nodes with their compiled step, edges weighted by branch tag
    graph: DiGraph<CompiledNode, Option<BranchTag>>,
    /// Mapping from node ID to graph node index
    node_id_to_index: HashMap<String, NodeIndex>,
    /// The single entry node
    trigger: NodeIndex,
}

#[derive(Debug, Clone)]
pub struct CompiledNode {
    pub id: String,
    pub name: String,
    pub step: Step,
}

#[derive(Debug, Clone)]
pub enum Step {
    Trigger(TriggerNode),
    Condition(CompiledCondition),
    Action(ActionNode),
    Delay(DelayNode),
}

/// Condition with its operator resolved at compile time
#[derive(Debug, Clone)]
pub struct CompiledCondition {
    pub spec: ConditionNode,
    pub operator: Operator,
}

/// One outgoing edge as seen by the orchestrator
#[derive(Debug, Clone, Copy)]
pub struct Outgoing<'a> {
    pub branch: Option<&'a BranchTag>,
    pub target: NodeIndex,
}

impl WorkflowGraph {
    /// Validate a definition and build its DAG
    pub fn compile(workflow: Workflow) -> Result<Self, EngineError> {
        tracing::debug!("🏗️ Building workflow graph for '{}'", workflow.id);

        let mut graph = DiGraph::new();
        let mut node_id_to_index = HashMap::new();
        let mut triggers = Vec::new();

        for node in &workflow.nodes {
            if node.tenant_id != workflow.tenant_id {
                return Err(EngineError::invalid(format!(
                    "node '{}' belongs to tenant '{}', workflow belongs to '{}'",
                    node.id, node.tenant_id, workflow.tenant_id
                )));
            }

            let step = compile_step(&node.id, &node.kind)?;
            let is_trigger = matches!(step, Step::Trigger(_));
            let index = graph.add_node(CompiledNode {
                id: node.id.clone(),
                name: node.name.clone(),
                step,
            });

            if node_id_to_index.insert(node.id.clone(), index).is_some() {
                return Err(EngineError::invalid(format!("duplicate node id '{}'", node.id)));
            }
            if is_trigger {
                triggers.push(index);
            }
        }

        for edge in &workflow.edges {
            if edge.tenant_id != workflow.tenant_id {
                return Err(EngineError::invalid(format!(
                    "edge '{}' -> '{}' belongs to tenant '{}'",
                    edge.from, edge.to, edge.tenant_id
                )));
            }
            let from = *node_id_to_index.get(&edge.from).ok_or_else(|| {
                EngineError::invalid(format!("edge references unknown node '{}'", edge.from))
            })?;
            let to = *node_id_to_index.get(&edge.to).ok_or_else(|| {
                EngineError::invalid(format!("edge references unknown node '{}'", edge.to))
            })?;

            if edge.branch.is_some() && !matches!(graph[from].step, Step::Condition(_)) {
                return Err(EngineError::invalid(format!(
                    "only condition edges may carry a branch tag ('{}' -> '{}')",
                    edge.from, edge.to
                )));
            }
            graph.add_edge(from, to, edge.branch.clone());
        }

        let trigger = match triggers.as_slice() {
            [single] => *single,
            [] => return Err(EngineError::invalid("workflow has no trigger node")),
            _ => return Err(EngineError::invalid("workflow has more than one trigger node")),
        };

        for index in graph.node_indices() {
            let incoming = graph.neighbors_directed(index, Direction::Incoming).count();
            let node = &graph[index];
            if index == trigger && incoming > 0 {
                return Err(EngineError::invalid(format!(
                    "trigger '{}' must not have incoming edges",
                    node.id
                )));
            }
            if index != trigger && incoming == 0 {
                return Err(EngineError::invalid(format!(
                    "node '{}' is not reachable from any edge",
                    node.id
                )));
            }
            if matches!(node.step, Step::Delay(_))
                && graph.neighbors_directed(index, Direction::Outgoing).count() > 1
            {
                return Err(EngineError::invalid(format!(
                    "delay '{}' must have at most one outgoing edge",
                    node.id
                )));
            }
        }

        if toposort(&graph, None).is_err() {
            tracing::error!("❌ Workflow '{}' contains cycles - must be a DAG", workflow.id);
            return Err(EngineError::invalid("workflow contains a cycle"));
        }

        tracing::debug!(
            "✅ Compiled workflow '{}' ({} nodes, {} edges)",
            workflow.id,
            graph.node_count(),
            graph.edge_count()
        );

        Ok(Self {
            workflow,
            graph,
            node_id_to_index,
            trigger,
        })
    }

    pub fn id(&self) -> &str {
        &self.workflow.id
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn trigger(&self) -> NodeIndex {
        self.trigger
    }

    pub fn trigger_node(&self) -> Option<&TriggerNode> {
        match &self.graph[self.trigger].step {
            Step::Trigger(trigger) => Some(trigger),
            _ => None,
        }
    }

    pub fn node(&self, index: NodeIndex) -> &CompiledNode {
        &self.graph[index]
    }

    pub fn index_of(&self, node_id: &str) -> Option<NodeIndex> {
        self.node_id_to_index.get(node_id).copied()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Outgoing edges in declaration order
    pub fn outgoing(&self, index: NodeIndex) -> Vec<Outgoing<'_>> {
        let mut edges: Vec<(EdgeIndex, Outgoing<'_>)> = self
            .graph
            .edges(index)
            .map(|edge| {
                (
                    edge.id(),
                    Outgoing {
                        branch: edge.weight().as_ref(),
                        target: edge.target(),
                    },
                )
            })
            .collect();
        edges.sort_by_key(|(id, _)| id.index());
        edges.into_iter().map(|(_, outgoing)| outgoing).collect()
    }
}

fn compile_step(node_id: &str, kind: &NodeKind) -> Result<Step, EngineError> {
    match kind {
        NodeKind::Trigger(trigger) => {
            validate_trigger(node_id, trigger)?;
            Ok(Step::Trigger(trigger.clone()))
        }
        NodeKind::Condition(condition) => {
            let operator =
                Operator::parse(&condition.operator, condition.operand, condition.value_type)?;
            if !operator.arity().accepts(condition.value.is_some()) {
                return Err(EngineError::invalid(format!(
                    "condition '{}': {} {} a comparison value",
                    node_id,
                    operator,
                    if condition.value.is_some() { "does not take" } else { "requires" }
                )));
            }
            if operator.takes_predicate() {
                if let Some(predicate) = &condition.value {
                    Predicate::parse(predicate)?;
                }
            }
            Ok(Step::Condition(CompiledCondition {
                spec: condition.clone(),
                operator,
            }))
        }
        NodeKind::Action(action) => {
            validate_action(node_id, action)?;
            Ok(Step::Action(action.clone()))
        }
        NodeKind::Delay(delay) => Ok(Step::Delay(delay.clone())),
    }
}

fn validate_trigger(node_id: &str, trigger: &TriggerNode) -> Result<(), EngineError> {
    let missing = |field: &str| {
        EngineError::invalid(format!("trigger '{}' requires '{}'", node_id, field))
    };
    match trigger.trigger_type {
        TriggerType::StreamEvent => {
            trigger.topic.as_ref().ok_or_else(|| missing("topic"))?;
            trigger.event_type.as_ref().ok_or_else(|| missing("eventType"))?;
        }
        TriggerType::Cron => {
            trigger.schedule.as_ref().ok_or_else(|| missing("schedule"))?;
        }
        TriggerType::Manual => {}
    }
    Ok(())
}

fn validate_action(node_id: &str, action: &ActionNode) -> Result<(), EngineError> {
    let missing = |field: &str| {
        EngineError::invalid(format!(
            "{} action '{}' requires '{}'",
            action.action_type, node_id, field
        ))
    };
    if action.action_type.is_remote() {
        action.service_name.as_ref().ok_or_else(|| missing("serviceName"))?;
        action.endpoint.as_ref().ok_or_else(|| missing("endpoint"))?;
    }
    if action.action_type == ActionType::NotificationSend {
        action.template_id.as_ref().ok_or_else(|| missing("templateId"))?;
    }
    Ok(())
}
