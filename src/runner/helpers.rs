//! Small pure helpers for the runner loop.

use crate::events::TaskStatus;
use crate::transcript::{Message, Role};
use crate::types::{AgentGoal, RunnerConfig, TerminationReason};

/// The effective iteration limit: the goal's budget capped by the
/// operator-owned config ceiling.
pub(super) fn effective_max_iterations(goal: &AgentGoal, config: &RunnerConfig) -> u32 {
    goal.max_iterations.min(config.max_iterations).max(1)
}

/// Seed messages for a fresh run: the system prompt plus the goal framed as
/// the user's request.
pub(super) fn seed_transcript(config: &RunnerConfig, goal: &AgentGoal) -> Vec<Message> {
    let mut request = goal.description.clone();
    if !goal.success_criteria.is_empty() {
        request.push_str("\n\nSuccess criteria:\n");
        for (i, criterion) in goal.success_criteria.iter().enumerate() {
            request.push_str(&format!("{}. {criterion}\n", i + 1));
        }
    }
    vec![
        Message::system(config.system_prompt.clone()),
        Message::user(request),
    ]
}

/// Lifecycle status a termination reason maps to.
pub(super) const fn status_for(reason: TerminationReason) -> TaskStatus {
    match reason {
        // Exhausting the iteration limit is a normal stop, not an error.
        TerminationReason::GoalAchieved | TerminationReason::IterationLimitReached => {
            TaskStatus::Completed
        }
        TerminationReason::Cancelled => TaskStatus::Cancelled,
        TerminationReason::Failed => TaskStatus::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_limit_is_the_smaller_bound() {
        let config = RunnerConfig {
            max_iterations: 10,
            ..RunnerConfig::default()
        };
        assert_eq!(effective_max_iterations(&AgentGoal::new("g", 3), &config), 3);
        assert_eq!(effective_max_iterations(&AgentGoal::new("g", 50), &config), 10);
    }

    #[test]
    fn seed_includes_goal_and_criteria() {
        let config = RunnerConfig::default();
        let goal = AgentGoal::new("find the answer", 5)
            .with_criteria(vec!["an answer exists".to_string()]);
        let seed = seed_transcript(&config, &goal);

        assert_eq!(seed.len(), 2);
        assert_eq!(seed[0].role, Role::System);
        assert_eq!(seed[1].role, Role::User);
        assert!(seed[1].content.contains("find the answer"));
        assert!(seed[1].content.contains("1. an answer exists"));
    }

    #[test]
    fn status_mapping() {
        assert_eq!(status_for(TerminationReason::GoalAchieved), TaskStatus::Completed);
        assert_eq!(
            status_for(TerminationReason::IterationLimitReached),
            TaskStatus::Completed
        );
        assert_eq!(status_for(TerminationReason::Cancelled), TaskStatus::Cancelled);
        assert_eq!(status_for(TerminationReason::Failed), TaskStatus::Failed);
    }
}
