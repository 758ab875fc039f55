//! LLM adjudication of survivors that still share a display name.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::entity::Entity;
use crate::llm::{parse_yes_no, LlmClient};

/// Outcome of one adjudication pass.
#[derive(Debug, Clone, Default)]
pub struct Adjudication {
    pub entities: Vec<Entity>,
    /// Pairs sent to the LLM.
    pub llm_calls: usize,
    /// Pairs the LLM confirmed.
    pub llm_merges: usize,
    /// Pairs merged because a context was blank.
    pub context_merges: usize,
}

/// Resolves same-name pairs, asking the LLM when both sides have context.
pub struct LlmAdjudicator {
    llm: Arc<dyn LlmClient>,
}

impl LlmAdjudicator {
    #[must_use]
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Pairwise pass over `entities`; the input is left untouched.
    ///
    /// For `i < j` with identical names and distinct ids, `j` is folded
    /// into `i` when either context is blank or the LLM answers yes. LLM
    /// failures and unreadable answers keep the pair apart.
    pub async fn adjudicate(&self, entities: &[Entity]) -> Adjudication {
        let mut working = entities.to_vec();
        let mut absorbed = vec![false; working.len()];
        let mut outcome = Adjudication::default();

        for i in 0..working.len() {
            if absorbed[i] {
                continue;
            }
            for j in (i + 1)..working.len() {
                if absorbed[j] || !is_candidate_pair(&working[i], &working[j]) {
                    continue;
                }

                let merge = if working[i].has_blank_context() || working[j].has_blank_context() {
                    outcome.context_merges += 1;
                    true
                } else {
                    outcome.llm_calls += 1;
                    let confirmed = self.confirm(&working[i], &working[j]).await;
                    if confirmed {
                        outcome.llm_merges += 1;
                    }
                    confirmed
                };

                if merge {
                    let other = working[j].clone();
                    working[i].merge_with(&other);
                    absorbed[j] = true;
                    debug!(entity = %working[i].name, absorbed = %other.id, "absorbed by adjudication");
                }
            }
        }

        outcome.entities = working
            .into_iter()
            .zip(absorbed)
            .filter_map(|(entity, gone)| (!gone).then_some(entity))
            .collect();
        info!(
            input = entities.len(),
            output = outcome.entities.len(),
            llm_calls = outcome.llm_calls,
            llm_merges = outcome.llm_merges,
            "adjudication finished"
        );
        outcome
    }

    async fn confirm(&self, a: &Entity, b: &Entity) -> bool {
        match self.llm.complete(&adjudication_prompt(a, b)).await {
            Ok(answer) => match parse_yes_no(&answer) {
                Some(decision) => decision,
                None => {
                    warn!(entity = %a.name, answer = %answer.trim(), "unreadable adjudication answer");
                    false
                }
            },
            Err(e) => {
                warn!(entity = %a.name, error = %e, "adjudication request failed");
                false
            }
        }
    }
}

/// Identical names in any class.
fn is_candidate_pair(a: &Entity, b: &Entity) -> bool {
    a.id != b.id && a.name == b.name
}

fn first_reference(entity: &Entity) -> Option<&str> {
    entity
        .external_links
        .values()
        .flat_map(|urls| urls.iter())
        .next()
        .map(String::as_str)
}

fn adjudication_prompt(a: &Entity, b: &Entity) -> String {
    let reference = first_reference(a)
        .or_else(|| first_reference(b))
        .unwrap_or("No official reference available");
    format!(
        "As a Linux kernel expert, decide whether the two mentions below refer to exactly the same \
concept in the Linux kernel.

Term 1: {}
Context 1: {}

Term 2: {}
Context 2: {}

Reference: {reference}

They are the same only if they can be used interchangeably in kernel documentation and their \
contexts are consistent.

Respond in this format:
Decision: [YES/NO]
Reason: [your reasoning]
",
        a.name,
        a.context.trim(),
        b.name,
        b.context.trim(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityType;
    use crate::error::LlmError;
    use crate::llm::ScriptedLlmClient;

    fn process(context: &str) -> Entity {
        Entity::new("process", EntityType::Concept).with_context(context)
    }

    #[tokio::test]
    async fn test_blank_context_merges_without_llm() {
        let llm = Arc::new(ScriptedLlmClient::always("No"));
        let adjudicator = LlmAdjudicator::new(llm.clone());
        let input = vec![process(""), process("None"), process("   ")];

        let outcome = adjudicator.adjudicate(&input).await;
        assert_eq!(outcome.entities.len(), 1);
        assert_eq!(outcome.context_merges, 2);
        assert_eq!(llm.calls(), 0);
        assert_eq!(input.len(), 3);
    }

    #[tokio::test]
    async fn test_llm_no_keeps_both() {
        let llm = Arc::new(ScriptedLlmClient::always("No"));
        let adjudicator = LlmAdjudicator::new(llm.clone());
        let input = vec![process("h1: Scheduler"), process("h1: Memory management")];

        let outcome = adjudicator.adjudicate(&input).await;
        assert_eq!(outcome.entities.len(), 2);
        assert_eq!(outcome.llm_calls, 1);
        assert_eq!(outcome.llm_merges, 0);
        assert!(llm.prompts()[0].contains("h1: Memory management"));
    }

    #[tokio::test]
    async fn test_llm_yes_merges_later_into_earlier() {
        let llm = Arc::new(ScriptedLlmClient::new().then("Decision: YES\nReason: same task abstraction"));
        let adjudicator = LlmAdjudicator::new(llm);
        let mut second = process("h1: Scheduler");
        second.commit_ids.push("abc123".to_string());
        let input = vec![process("h1: Process management"), second];

        let outcome = adjudicator.adjudicate(&input).await;
        assert_eq!(outcome.entities.len(), 1);
        assert_eq!(outcome.entities[0].id, input[0].id);
        assert_eq!(outcome.entities[0].commit_ids, vec!["abc123"]);
        assert_eq!(outcome.llm_merges, 1);
    }

    #[tokio::test]
    async fn test_llm_failure_keeps_pair_apart() {
        let llm = Arc::new(ScriptedLlmClient::new().then_fail(LlmError::Timeout(std::time::Duration::from_secs(1))));
        let adjudicator = LlmAdjudicator::new(llm);
        let outcome = adjudicator.adjudicate(&[process("h1: a"), process("h1: b")]).await;
        assert_eq!(outcome.entities.len(), 2);
        assert_eq!(outcome.llm_calls, 1);
    }

    #[tokio::test]
    async fn test_names_must_match_exactly() {
        let llm = Arc::new(ScriptedLlmClient::always("Yes"));
        let adjudicator = LlmAdjudicator::new(llm.clone());
        let input = vec![
            process("h1: a"),
            Entity::new("Process", EntityType::Concept).with_context("h1: b"),
            Entity::new("processes", EntityType::Concept).with_context("h1: c"),
        ];
        let outcome = adjudicator.adjudicate(&input).await;
        assert_eq!(outcome.entities.len(), 3);
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_pairs_across_classes_are_compared() {
        let llm = Arc::new(ScriptedLlmClient::always("yes"));
        let adjudicator = LlmAdjudicator::new(llm.clone());
        let input = vec![
            process("h1: Process management"),
            Entity::new("process", EntityType::Operation).with_context("h1: Scheduler"),
        ];
        let outcome = adjudicator.adjudicate(&input).await;
        assert_eq!(outcome.entities.len(), 1);
        assert_eq!(outcome.entities[0].entity_type, EntityType::Concept);
        assert_eq!(llm.calls(), 1);
    }
}
