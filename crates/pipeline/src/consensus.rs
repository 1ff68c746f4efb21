//! Consensus coordination across planner, critic, and safety candidates.
//!
//! Deterministic: candidates are derived from artifacts the pipeline
//! already produced. A safety veto always wins, whatever the planner's
//! confidence.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use safety::PolicyDecision;
use schemas::{
    AgentOutput, ConsensusDecision, ConsensusRejection, ConsensusState, CriticDecision, FixPlan,
    IssueGraph, ProposedAction, ReasoningEdge,
};

fn actions_from_plan(plan: &FixPlan) -> Vec<ProposedAction> {
    plan.operations
        .iter()
        .map(|op| ProposedAction {
            action_type: op.op_type.name().to_string(),
            file: op.file.clone(),
            rationale: op.rationale.clone(),
            evidence: op.evidence.clone(),
        })
        .collect()
}

/// Deterministic coordinator for planner/critic/safety agreement.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsensusCoordinator;

impl ConsensusCoordinator {
    /// Create a coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Build the three candidates from the pipeline's artifacts.
    #[must_use]
    pub fn build_candidates(
        plan: &FixPlan,
        critic: &CriticDecision,
        plan_decision: &PolicyDecision,
    ) -> Vec<AgentOutput> {
        let planner = AgentOutput {
            agent_name: "planner".to_string(),
            version: "v1".to_string(),
            confidence_score: plan.confidence,
            reasoning_graph: vec![ReasoningEdge {
                source: "root_cause".to_string(),
                target: plan.category.clone(),
                relation: "explains".to_string(),
            }],
            proposed_actions: actions_from_plan(plan),
            metadata: BTreeMap::from([
                (
                    "category".to_string(),
                    serde_json::Value::String(plan.category.clone()),
                ),
                ("files".to_string(), serde_json::json!(plan.files)),
            ]),
        };

        let critic_candidate = AgentOutput {
            agent_name: "critic".to_string(),
            version: "v1".to_string(),
            confidence_score: critic.reasoning_consistency,
            reasoning_graph: vec![ReasoningEdge {
                source: "plan".to_string(),
                target: "critic_review".to_string(),
                relation: "validated_by".to_string(),
            }],
            proposed_actions: actions_from_plan(plan),
            metadata: BTreeMap::from([
                ("allowed".to_string(), serde_json::json!(critic.allowed)),
                (
                    "hallucination_risk".to_string(),
                    serde_json::json!(critic.hallucination_risk),
                ),
                (
                    "issue_count".to_string(),
                    serde_json::json!(critic.issues.len()),
                ),
            ]),
        };

        let safety_confidence =
            (1.0 - (plan_decision.danger_score as f64 / 100.0)).clamp(0.0, 1.0);
        let safety = AgentOutput {
            agent_name: "safety".to_string(),
            version: "v1".to_string(),
            confidence_score: safety_confidence,
            reasoning_graph: vec![ReasoningEdge {
                source: "plan".to_string(),
                target: "policy_check".to_string(),
                relation: "evaluated_by".to_string(),
            }],
            proposed_actions: vec![],
            metadata: BTreeMap::from([
                ("allowed".to_string(), serde_json::json!(plan_decision.allowed)),
                (
                    "danger_score".to_string(),
                    serde_json::json!(plan_decision.danger_score),
                ),
                (
                    "violation_count".to_string(),
                    serde_json::json!(plan_decision.violations.len()),
                ),
            ]),
        };

        vec![planner, critic_candidate, safety]
    }

    /// Resolve to a decision.
    #[must_use]
    pub fn resolve(
        &self,
        issue_graph: &IssueGraph,
        plan: &FixPlan,
        critic: &CriticDecision,
        plan_decision: &PolicyDecision,
        min_agreement: f64,
        min_confidence: f64,
    ) -> ConsensusDecision {
        let candidates = Self::build_candidates(plan, critic, plan_decision);
        let mut rejections: Vec<ConsensusRejection> = Vec::new();
        let mut allowed_agents: BTreeSet<String> = BTreeSet::new();
        let affected: BTreeSet<&str> = issue_graph
            .affected_files
            .iter()
            .map(String::as_str)
            .collect();

        if !plan_decision.allowed {
            rejections.push(ConsensusRejection {
                reason: "safety_veto".to_string(),
                agent_name: "safety".to_string(),
                details: "Plan blocked by policy engine".to_string(),
            });
            return ConsensusDecision {
                state: ConsensusState::RejectedSafetyVeto,
                agreement_rate: 0.0,
                selected_agent: None,
                selected_plan: None,
                metadata: BTreeMap::from([(
                    "candidate_count".to_string(),
                    serde_json::json!(candidates.len()),
                )]),
                candidates,
                rejections,
            };
        }

        for candidate in &candidates {
            if candidate.confidence_score < min_confidence {
                rejections.push(ConsensusRejection {
                    reason: "low_confidence".to_string(),
                    agent_name: candidate.agent_name.clone(),
                    details: format!("confidence={:.3}", candidate.confidence_score),
                });
                continue;
            }

            let unsupported: Vec<&str> = candidate
                .proposed_actions
                .iter()
                .filter(|a| !affected.is_empty() && !affected.contains(a.file.as_str()))
                .map(|a| a.file.as_str())
                .collect();
            if !unsupported.is_empty() {
                rejections.push(ConsensusRejection {
                    reason: "unsupported_files".to_string(),
                    agent_name: candidate.agent_name.clone(),
                    details: unsupported.join(","),
                });
                continue;
            }

            if candidate.agent_name == "critic" && !critic.allowed {
                rejections.push(ConsensusRejection {
                    reason: "critic_rejected".to_string(),
                    agent_name: "critic".to_string(),
                    details: "Critic marked plan as not allowed".to_string(),
                });
                continue;
            }

            allowed_agents.insert(candidate.agent_name.clone());
        }

        let candidate_count = candidates.len();
        let agreement_rate = if candidate_count == 0 {
            0.0
        } else {
            allowed_agents.len() as f64 / candidate_count as f64
        };

        let metadata = BTreeMap::from([
            (
                "candidate_count".to_string(),
                serde_json::json!(candidate_count),
            ),
            (
                "allowed_agents".to_string(),
                serde_json::json!(allowed_agents.iter().collect::<Vec<_>>()),
            ),
        ]);

        if agreement_rate < min_agreement {
            return ConsensusDecision {
                state: ConsensusState::RejectedLowAgreement,
                agreement_rate,
                selected_agent: None,
                selected_plan: None,
                candidates,
                rejections,
                metadata,
            };
        }

        if !allowed_agents.contains("planner") {
            rejections.push(ConsensusRejection {
                reason: "planner_missing".to_string(),
                agent_name: "planner".to_string(),
                details: "Planner candidate not accepted".to_string(),
            });
            return ConsensusDecision {
                state: ConsensusState::RejectedInvalidCandidates,
                agreement_rate,
                selected_agent: None,
                selected_plan: None,
                candidates,
                rejections,
                metadata,
            };
        }

        ConsensusDecision {
            state: ConsensusState::Accepted,
            agreement_rate,
            selected_agent: Some("planner".to_string()),
            selected_plan: Some(plan.clone()),
            candidates,
            rejections,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safety::{PlanIntent, PolicyEngine, SafetyPolicy};
    use schemas::{FixOperation, OperationDetails, OperationType};

    fn plan() -> FixPlan {
        FixPlan {
            root_cause: "missing requests".into(),
            category: "python_missing_dependency".into(),
            confidence: 0.8,
            files: vec!["pyproject.toml".into()],
            operations: vec![FixOperation {
                op_type: OperationType::AddDependency,
                file: "pyproject.toml".into(),
                details: OperationDetails::Dependency {
                    name: "requests".into(),
                    spec: "^1.0.0".into(),
                    group_id: None,
                    artifact_id: None,
                    plugin: false,
                },
                rationale: "missing module".into(),
                evidence: vec![],
            }],
        }
    }

    fn decision_for(files: &[&str]) -> PolicyDecision {
        PolicyEngine::new(SafetyPolicy::standard()).evaluate_plan(&PlanIntent {
            target_files: files.iter().map(|s| (*s).to_string()).collect(),
            category: "python_missing_dependency".into(),
            operation_types: vec!["add_dependency".into()],
        })
    }

    #[test]
    fn test_accepts_clean_plan() {
        let decision = ConsensusCoordinator::new().resolve(
            &IssueGraph {
                affected_files: vec!["pyproject.toml".into()],
            },
            &plan(),
            &CriticDecision::permissive(),
            &decision_for(&["pyproject.toml"]),
            0.66,
            0.5,
        );
        assert_eq!(decision.state, ConsensusState::Accepted);
        assert_eq!(decision.selected_agent.as_deref(), Some("planner"));
        assert!(decision.selected_plan.is_some());
        assert!(decision.agreement_rate >= 0.66);
    }

    #[test]
    fn test_safety_veto_overrides_planner_confidence() {
        let mut confident = plan();
        confident.confidence = 1.0;
        confident.files = vec![".github/workflows/ci.yml".into()];
        let decision = ConsensusCoordinator::new().resolve(
            &IssueGraph::default(),
            &confident,
            &CriticDecision::permissive(),
            &decision_for(&[".github/workflows/ci.yml"]),
            0.66,
            0.5,
        );
        assert_eq!(decision.state, ConsensusState::RejectedSafetyVeto);
        assert!(decision
            .rejections
            .iter()
            .any(|r| r.reason == "safety_veto"));
        assert_eq!(decision.agreement_rate, 0.0);
    }

    #[test]
    fn test_unsupported_files_rejects_planner() {
        let decision = ConsensusCoordinator::new().resolve(
            &IssueGraph {
                affected_files: vec!["src/app.py".into()],
            },
            &plan(),
            &CriticDecision::permissive(),
            &decision_for(&["pyproject.toml"]),
            0.0,
            0.5,
        );
        // Planner and critic propose a file outside the RCA universe
        assert_eq!(decision.state, ConsensusState::RejectedInvalidCandidates);
        assert!(decision
            .rejections
            .iter()
            .any(|r| r.reason == "unsupported_files"));
    }

    #[test]
    fn test_low_agreement_rejected() {
        let critic = CriticDecision {
            allowed: false,
            reasoning_consistency: 0.9,
            hallucination_risk: 0.8,
            issues: vec!["unsupported claim".into()],
        };
        let decision = ConsensusCoordinator::new().resolve(
            &IssueGraph::default(),
            &plan(),
            &critic,
            &decision_for(&["pyproject.toml"]),
            0.9,
            0.5,
        );
        assert_eq!(decision.state, ConsensusState::RejectedLowAgreement);
    }

    #[test]
    fn test_low_confidence_planner_rejected() {
        let mut weak = plan();
        weak.confidence = 0.1;
        let decision = ConsensusCoordinator::new().resolve(
            &IssueGraph::default(),
            &weak,
            &CriticDecision::permissive(),
            &decision_for(&["pyproject.toml"]),
            0.5,
            0.5,
        );
        assert_eq!(decision.state, ConsensusState::RejectedInvalidCandidates);
        assert!(decision
            .rejections
            .iter()
            .any(|r| r.reason == "planner_missing"));
    }
}
