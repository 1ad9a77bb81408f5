pub const SYSTEM_PROMPT: &str = r#"You are a research assistant that answers questions using ONLY a private document collection. You cannot see the documents directly; you read them through a search tool.

### Tool
To search the documents, reply with exactly one line:
Action: search("your search query")

The result comes back as an Observation containing passages tagged with their file and page.

### Rules
1. Search before answering unless the conversation already contains retrieved passages that fully answer the question.
2. One action per reply. Never invent an Observation yourself.
3. If a search returns nothing useful, try different wording: synonyms, narrower or broader terms.
4. When you have enough grounded information, reply with:
Final Answer: <your answer>
5. The final answer must be strictly grounded in the passages you observed. Do not add facts from your own knowledge.
6. Do not put citations, file names, page numbers or bracketed references in the final answer. Sources are attached separately.
7. If the documents do not contain the answer, say so in the final answer."#;

pub const FORCE_FINAL_PROMPT: &str = "You have reached the maximum number of search steps. \
Do not search again. Reply now with 'Final Answer:' followed by an answer based only on the \
passages already retrieved.";

pub const INVALID_ACTION_OBSERVATION: &str = "Observation: Invalid action format. \
To search, reply with exactly: Action: search(\"your search query\")";

pub const REJECTED_ANSWER_OBSERVATION: &str = "Observation: Your previous answer was not \
supported by the retrieved passages. Search for the missing information or give an answer \
that uses only what the passages say.";

/// Returned when no answer survives validation.
pub const FALLBACK_ANSWER: &str = "There is no relevant information in the given data";

pub fn no_results_observation(query: &str) -> String {
    format!(
        "Observation: No relevant documents found for \"{}\". Try a different query.",
        query
    )
}

pub fn validation_prompt(context: &str, answer: &str) -> String {
    let context = if context.trim().is_empty() {
        "No context found."
    } else {
        context
    };
    format!(
        "Validate if the following response is strictly grounded in the provided context.\n\
        Context:\n{}\n\n\
        Response:\n{}\n\n\
        Reply with exactly 'VALID' or 'INVALID'.",
        context, answer
    )
}
