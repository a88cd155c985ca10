//! Prompt construction for the stage services.
//!
//! Every prompt demands strict JSON so the parsing side stays mechanical.

use am_core::types::{Analysis, ChangePlan, Feedback};
use am_intelligence::LlmMessage;

pub fn analyze_intent(feedback: &Feedback) -> Vec<LlmMessage> {
    vec![
        LlmMessage::system(
            "You triage product feedback for an automated code-improvement agent. \
             Respond with a single JSON object, no prose, with fields: \
             intent (one of accuracy|speed|ui|function|language|other), \
             feasibility (high|medium|low), priority (high|medium|low), \
             impact (short string), summary (one sentence).",
        ),
        LlmMessage::user(format!(
            "Feedback (language tag: {}):\n{}",
            feedback.language, feedback.content
        )),
    ]
}

pub fn generate_solution(feedback: &Feedback, analysis: &Analysis, attempt: u32) -> Vec<LlmMessage> {
    let mut prompt = format!(
        "Feedback: {}\nIntent: {:?}\nSummary: {}\n\n\
         Propose a single-file change that addresses the feedback. Respond \
         with one JSON object, no prose, with fields: file (repo-relative \
         path), action (replace|insert|delete), codeBlock (the complete new \
         content for the file or fragment), description (one sentence).",
        feedback.content, analysis.intent, analysis.summary
    );
    if attempt > 0 {
        prompt.push_str(&format!(
            "\n\nPrevious attempt {attempt} failed its test round; propose a \
             different approach."
        ));
    }
    vec![
        LlmMessage::system("You are a careful software engineer. JSON only."),
        LlmMessage::user(prompt),
    ]
}

pub fn generate_tests(plan: &ChangePlan, min_cases: usize) -> Vec<LlmMessage> {
    vec![
        LlmMessage::system(
            "You design browser smoke tests for a just-applied code change. \
             Respond with a JSON array, no prose; each element has fields: \
             name (short identifier), description (what to verify).",
        ),
        LlmMessage::user(format!(
            "Change: {} ({:?} on {}). Produce at least {min_cases} cases \
             covering the changed behaviour and one regression check.",
            plan.description, plan.action, plan.file
        )),
    ]
}

pub fn assess_quality(plan: &ChangePlan, passed: usize, total: usize) -> Vec<LlmMessage> {
    vec![
        LlmMessage::system(
            "You review test outcomes. Respond with a single JSON object: \
             {\"score\": <0.0-1.0>}.",
        ),
        LlmMessage::user(format!(
            "Change: {}. {passed}/{total} browser cases passed. Score the \
             confidence that the change is safe to publish.",
            plan.description
        )),
    ]
}

pub fn generate_changelog(feedback: &Feedback, plan: &ChangePlan) -> Vec<LlmMessage> {
    vec![
        LlmMessage::system(
            "Write a terse changelog entry (2-3 lines, plain text) for the \
             change below. No JSON, no markdown headers.",
        ),
        LlmMessage::user(format!(
            "User feedback: {}\nChange applied: {} ({})",
            feedback.content, plan.description, plan.file
        )),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use am_core::types::{Feasibility, Intent, PlanAction, Priority};

    #[test]
    fn solution_prompt_mentions_retry_on_later_attempts() {
        let feedback = Feedback::new("德语翻译不准确", "u1", "zh");
        let analysis = Analysis {
            intent: Intent::Accuracy,
            feasibility: Feasibility::High,
            priority: Priority::High,
            impact: "translation".into(),
            summary: "German output inaccurate".into(),
        };
        let first = generate_solution(&feedback, &analysis, 0);
        let retry = generate_solution(&feedback, &analysis, 2);
        assert!(!first[1].content.contains("different approach"));
        assert!(retry[1].content.contains("different approach"));
    }

    #[test]
    fn test_prompt_carries_minimum_case_count() {
        let plan = ChangePlan {
            file: "src/translator.js".into(),
            action: PlanAction::Replace,
            code_block: "x".into(),
            description: "fix German dictionary".into(),
        };
        let messages = generate_tests(&plan, 3);
        assert!(messages[1].content.contains("at least 3"));
    }
}
