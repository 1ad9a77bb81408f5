use std::sync::LazyLock;

use regex::Regex;

use super::config::AgentConfig;

static FINAL_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bfinal\s+answer\s*:").unwrap());
static SEARCH_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\baction\s*:\s*search\b").unwrap());
static SEARCH_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\baction\s*:\s*search\s*\(\s*"([^"\n]*)"\s*\)"#).unwrap()
});

/// Parsed intent of an agent reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Search marker present. `None` when the quoted query could not be
    /// extracted.
    Search(Option<String>),
    /// Candidate answer to validate.
    Final(String),
    /// Neither marker. Carries the whole reply.
    Unparseable(String),
    /// A search requested after the step ceiling. Counts as a rejected
    /// answer without consulting the grader.
    Overstep,
}

impl Action {
    /// Parse a reply by its markers alone. Matching is case-insensitive and
    /// a final-answer marker wins over a search marker wherever each appears.
    pub fn parse(reply: &str) -> Self {
        if let Some(m) = FINAL_MARKER.find(reply) {
            let answer = &reply[m.end()..];
            let answer = match SEARCH_MARKER.find(answer) {
                Some(search) => &answer[..search.start()],
                None => answer,
            };
            return Action::Final(answer.trim().to_string());
        }

        if SEARCH_MARKER.is_match(reply) {
            let query = SEARCH_CALL
                .captures(reply)
                .and_then(|c| c.get(1))
                .map(|q| q.as_str().trim().to_string())
                .filter(|q| !q.is_empty());
            return Action::Search(query);
        }

        Action::Unparseable(reply.trim().to_string())
    }

    /// Parse a reply and apply the step limits: past `soft_step_limit` a
    /// marker-less reply is final, past `max_steps` a search is an overstep.
    pub fn classify(reply: &str, step_count: u32, config: &AgentConfig) -> Self {
        match Self::parse(reply) {
            Action::Unparseable(text) if step_count > config.soft_step_limit => Action::Final(text),
            Action::Search(_) if step_count > config.max_steps => Action::Overstep,
            action => action,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::Search(_) => "search",
            Action::Final(_) => "final",
            Action::Unparseable(_) => "unparseable",
            Action::Overstep => "overstep",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search() {
        let reply = "I should look this up.\nAction: search(\"warranty period for model X\")";
        assert_eq!(
            Action::parse(reply),
            Action::Search(Some("warranty period for model X".to_string()))
        );
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(
            Action::parse("ACTION: Search( \"refund policy\" )"),
            Action::Search(Some("refund policy".to_string()))
        );
        assert_eq!(
            Action::parse("final ANSWER:  Thirty days. "),
            Action::Final("Thirty days.".to_string())
        );
    }

    #[test]
    fn test_parse_malformed_search() {
        assert_eq!(
            Action::parse("Action: search(\"refund policy)"),
            Action::Search(None)
        );
        assert_eq!(Action::parse("Action: search(refund)"), Action::Search(None));
        assert_eq!(Action::parse("Action: search(\"  \")"), Action::Search(None));
    }

    #[test]
    fn test_parse_final_multiline() {
        let reply = "Thought: I have enough.\nFinal Answer: Line one.\nLine two.";
        assert_eq!(
            Action::parse(reply),
            Action::Final("Line one.\nLine two.".to_string())
        );
    }

    #[test]
    fn test_final_wins_over_search_in_either_order() {
        let search_first = "Action: search(\"x\")\nFinal Answer: done";
        let final_first = "Final Answer: done\nAction: search(\"x\")";
        assert_eq!(Action::parse(search_first), Action::Final("done".to_string()));
        assert_eq!(Action::parse(final_first), Action::Final("done".to_string()));
        assert_eq!(Action::parse(final_first).kind(), "final");
    }

    #[test]
    fn test_parse_unparseable() {
        assert_eq!(
            Action::parse("  I am thinking about it.  "),
            Action::Unparseable("I am thinking about it.".to_string())
        );
    }

    #[test]
    fn test_soft_limit_forces_final() {
        let config = AgentConfig::default();
        assert_eq!(
            Action::classify("Still thinking", 5, &config),
            Action::Unparseable("Still thinking".to_string())
        );
        assert_eq!(
            Action::classify("Still thinking", 6, &config),
            Action::Final("Still thinking".to_string())
        );
        // Markers are honored regardless of the soft limit.
        assert_eq!(
            Action::classify("Action: search(\"q\")", 6, &config),
            Action::Search(Some("q".to_string()))
        );
    }

    #[test]
    fn test_search_past_ceiling_is_an_overstep() {
        let config = AgentConfig::default();
        let reply = "Action: search(\"q\")";
        assert_eq!(
            Action::classify(reply, 10, &config),
            Action::Search(Some("q".to_string()))
        );
        assert_eq!(Action::classify(reply, 11, &config), Action::Overstep);
        assert_eq!(
            Action::classify("Final Answer: 30 days.", 11, &config),
            Action::Final("30 days.".to_string())
        );
    }
}
