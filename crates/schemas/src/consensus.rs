//! Consensus candidates and decisions.
//!
//! The consensus layer asks three candidates - planner, critic, safety -
//! whether the plan should proceed, and records every rejection with an
//! explicit reason.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::plan::FixPlan;

/// One edge of a candidate's reasoning graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningEdge {
    /// Source node
    pub source: String,
    /// Target node
    pub target: String,
    /// Edge relation (`explains`, `validated_by`, `evaluated_by`, ...)
    pub relation: String,
}

/// One action a candidate proposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedAction {
    /// Operation type name
    #[serde(rename = "type")]
    pub action_type: String,
    /// Target file
    pub file: String,
    /// Why
    pub rationale: String,
    /// Supporting evidence lines
    #[serde(default)]
    pub evidence: Vec<String>,
}

/// Output of one consensus candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutput {
    /// Candidate name (`planner`, `critic`, `safety`)
    pub agent_name: String,
    /// Candidate schema version
    pub version: String,
    /// Confidence in [0, 1]
    pub confidence_score: f64,
    /// Reasoning graph edges
    #[serde(default)]
    pub reasoning_graph: Vec<ReasoningEdge>,
    /// Proposed actions (empty for the safety candidate)
    #[serde(default)]
    pub proposed_actions: Vec<ProposedAction>,
    /// Free-form candidate metadata
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// The affected-file universe candidates must stay within.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueGraph {
    /// Files the RCA considers in scope; empty means unconstrained
    #[serde(default)]
    pub affected_files: Vec<String>,
}

/// An explicit rejection of one candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusRejection {
    /// Rejection reason code (`safety_veto`, `low_confidence`,
    /// `unsupported_files`, `critic_rejected`, `planner_missing`)
    pub reason: String,
    /// Candidate the rejection applies to
    pub agent_name: String,
    /// Detail string
    pub details: String,
}

/// Final consensus state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusState {
    Accepted,
    RejectedSafetyVeto,
    RejectedLowAgreement,
    RejectedInvalidCandidates,
}

/// The joint planner/critic/safety decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusDecision {
    /// Outcome
    pub state: ConsensusState,
    /// Fraction of candidates that accepted
    pub agreement_rate: f64,
    /// Winning candidate, when accepted
    pub selected_agent: Option<String>,
    /// Winning plan, when accepted
    pub selected_plan: Option<FixPlan>,
    /// All candidates considered
    #[serde(default)]
    pub candidates: Vec<AgentOutput>,
    /// All rejections recorded
    #[serde(default)]
    pub rejections: Vec<ConsensusRejection>,
    /// Decision metadata
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ConsensusDecision {
    /// Whether the plan may proceed.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        self.state == ConsensusState::Accepted
    }
}

/// The critic's review of a plan. Produced by an external reviewer; the
/// coordinator only consumes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticDecision {
    /// Whether the critic lets the plan pass
    pub allowed: bool,
    /// Consistency score of the plan's reasoning, in [0, 1]
    pub reasoning_consistency: f64,
    /// Estimated hallucination risk, in [0, 1]
    pub hallucination_risk: f64,
    /// Issues the critic raised
    #[serde(default)]
    pub issues: Vec<String>,
}

impl CriticDecision {
    /// A permissive critic used when no reviewer is attached.
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            allowed: true,
            reasoning_consistency: 1.0,
            hallucination_risk: 0.0,
            issues: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consensus_state_serde() {
        let json = serde_json::to_string(&ConsensusState::RejectedSafetyVeto).unwrap();
        assert_eq!(json, "\"rejected_safety_veto\"");
    }

    #[test]
    fn test_permissive_critic() {
        let critic = CriticDecision::permissive();
        assert!(critic.allowed);
        assert_eq!(critic.reasoning_consistency, 1.0);
    }
}
