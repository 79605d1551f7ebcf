//! Fixed prompt template. Only `{context}` and `{question}` are substituted.

pub const STUDY_ASSISTANT_PROMPT: &str = "You are an expert study assistant. Use the following context from study documents to answer the question accurately and concisely.

If the context doesn't contain enough information, say so honestly rather than making up information.

**Context from documents:**
{context}

**Question:** {question}

**Instructions:**
- Be precise and educational
- Cite document sources when possible
- Use clear formatting (bullet points, headers) for complex answers
- If the answer requires multiple steps, break them down clearly";

/// Single-pass substitution; placeholder text inside the values is left alone.
pub fn fill(template: &str, context: &str, question: &str) -> String {
    let mut out = String::with_capacity(template.len() + context.len() + question.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        if let Some(after) = tail.strip_prefix("{context}") {
            out.push_str(context);
            rest = after;
        } else if let Some(after) = tail.strip_prefix("{question}") {
            out.push_str(question);
            rest = after;
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}
