use serde::{Deserialize, Serialize};

/// Text lookup consulted by the RETRIEVE stage.
///
/// Implementations must be pure: the same query always yields the same answer.
pub trait KnowledgeBase: Send + Sync {
    fn lookup(&self, query: &str) -> Option<String>;
}

impl<F> KnowledgeBase for F
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn lookup(&self, query: &str) -> Option<String> {
        self(query)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeRule {
    pub keyword: String,
    pub answer: String,
}

impl KnowledgeRule {
    pub fn new(keyword: impl Into<String>, answer: impl Into<String>) -> Self {
        Self { keyword: keyword.into(), answer: answer.into() }
    }
}

pub fn default_rules() -> Vec<KnowledgeRule> {
    vec![
        KnowledgeRule::new("refund", "Refunds are processed within 5-7 business days."),
        KnowledgeRule::new(
            "order",
            "Your order is delayed due to shipping issues. Expected delivery in 3 days.",
        ),
        KnowledgeRule::new(
            "password",
            "You can reset your password by clicking 'Forgot Password' on the login page.",
        ),
    ]
}

/// Case-insensitive substring match over an ordered rule list; the first matching rule wins.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeywordKnowledgeBase {
    rules: Vec<KnowledgeRule>,
}

impl KeywordKnowledgeBase {
    pub fn new(rules: Vec<KnowledgeRule>) -> Self {
        let rules = rules
            .into_iter()
            .map(|rule| KnowledgeRule { keyword: rule.keyword.trim().to_lowercase(), ..rule })
            .filter(|rule| !rule.keyword.is_empty())
            .collect();
        Self { rules }
    }

    pub fn rules(&self) -> &[KnowledgeRule] {
        &self.rules
    }
}

impl Default for KeywordKnowledgeBase {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl KnowledgeBase for KeywordKnowledgeBase {
    fn lookup(&self, query: &str) -> Option<String> {
        let query = query.to_lowercase();
        self.rules
            .iter()
            .find(|rule| query.contains(rule.keyword.as_str()))
            .map(|rule| rule.answer.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::{KeywordKnowledgeBase, KnowledgeBase, KnowledgeRule};

    #[test]
    fn first_matching_rule_wins() {
        let kb = KeywordKnowledgeBase::default();

        assert_eq!(
            kb.lookup("I want a refund for my last order.").as_deref(),
            Some("Refunds are processed within 5-7 business days.")
        );
        assert_eq!(
            kb.lookup("Where is my ORDER #42?").as_deref(),
            Some("Your order is delayed due to shipping issues. Expected delivery in 3 days.")
        );
        assert!(kb.lookup("Password reset please").is_some_and(|answer| answer.contains("Forgot")));
    }

    #[test]
    fn unmatched_queries_yield_none() {
        let kb = KeywordKnowledgeBase::default();
        assert_eq!(kb.lookup("my printer is broken"), None);
        assert_eq!(kb.lookup(""), None);
    }

    #[test]
    fn lookup_is_repeatable() {
        let kb = KeywordKnowledgeBase::default();
        let first = kb.lookup("refund status");
        for _ in 0..5 {
            assert_eq!(kb.lookup("refund status"), first);
        }
    }

    #[test]
    fn custom_rules_are_normalized_and_blank_keywords_dropped() {
        let kb = KeywordKnowledgeBase::new(vec![
            KnowledgeRule::new("  Invoice ", "Invoices are emailed monthly."),
            KnowledgeRule::new("   ", "never matches"),
        ]);

        assert_eq!(kb.rules().len(), 1);
        assert_eq!(kb.lookup("where is my INVOICE").as_deref(), Some("Invoices are emailed monthly."));
    }

    #[test]
    fn closures_can_stand_in_for_a_search_backend() {
        let backend = |query: &str| query.contains("vpn").then(|| "Restart the VPN client.".to_string());
        assert_eq!(backend.lookup("vpn down").as_deref(), Some("Restart the VPN client."));
        assert_eq!(backend.lookup("printer"), None);
    }
}
