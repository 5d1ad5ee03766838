//! decide / finalize / reformulate 三个步骤的 system 指令

use crate::tools::ToolResult;

/// decide 步骤：命名空间直接嵌入，模型无需也不得向用户索要
pub fn decide_instruction(namespace: &str) -> String {
    format!(
        "You are an AI agent with access to the user's workspace documents and the internet.

TOOLS YOU HAVE:
- retrieve_documents: search PDFs, notes and files inside the workspace.
- web_search: search the live internet for external information.

RULES:
- If the question mentions the workspace, a PDF, a document, a file, notes, or anything internal, ALWAYS call retrieve_documents.
- NEVER ask the user for the workspace id. You already have it: {namespace}.
- Use web_search only when the information is not in the workspace or is about live external facts.
- Never answer from memory when tool data is available.
- Call at most one tool in this turn. If no tool is needed, answer directly."
    )
}

/// finalize 步骤：禁止再调用工具；若最近结果为文档命中，列出允许引用的来源名
pub fn finalize_instruction(latest: Option<&ToolResult>) -> String {
    let mut s = String::from(
        "Continue your answer using the tool result above.
Do NOT call another tool now.",
    );
    match latest {
        Some(ToolResult::DocumentHits(hits)) if !hits.hits.is_empty() => {
            let names = hits.source_names();
            s.push_str(&format!(
                "

When you use information from the documents, cite it at the end of the sentence or paragraph as [Source: name] for one document or [Sources: name1; name2] for several.
Allowed source names: {}.
Never cite a name that is not in this list.",
                names.join("; ")
            ));
        }
        Some(ToolResult::DocumentHits(_)) => s.push_str(
            "

The workspace search returned no passages. Say so plainly and do not cite any source.",
        ),
        Some(ToolResult::ToolError(e)) => s.push_str(&format!(
            "

The tool failed ({}). Explain briefly that the lookup was not possible and answer only what you can without it. Do not cite any source.",
            e.error_code.as_str()
        )),
        _ => {}
    }
    s
}

pub const REFORMULATE_INSTRUCTION: &str = "You are a query reformulator for a retrieval system.

The user is asking a follow-up question. The search engine does NOT have access to the conversation history.
Rewrite the user's question as a standalone question that carries all needed context, replacing pronouns such as \"it\", \"that\" or \"the previous one\" with the actual nouns from the history.

Conversation history:
{history}

Rules:
1. If the user says \"Explain it\" and the history was about Node.js, output \"Explain Node.js\".
2. Remove conversational filler.
3. Do NOT answer the question. Output ONLY the rewritten query.";

pub fn reformulate_instruction(history_text: &str) -> String {
    REFORMULATE_INSTRUCTION.replace("{history}", history_text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{DocumentHit, DocumentHits, ToolError};

    #[test]
    fn test_decide_embeds_namespace() {
        let s = decide_instruction("acme-42");
        assert!(s.contains("acme-42"));
        assert!(s.contains("at most one tool"));
    }

    #[test]
    fn test_finalize_lists_allowed_sources() {
        let hits = ToolResult::DocumentHits(DocumentHits {
            query: "q".into(),
            hits: vec![DocumentHit {
                text: "t".into(),
                source_name: "onboarding.pdf".into(),
                source_id: "s".into(),
                chunk_index: 0,
            }],
        });
        let s = finalize_instruction(Some(&hits));
        assert!(s.contains("Do NOT call another tool"));
        assert!(s.contains("Allowed source names: onboarding.pdf."));
    }

    #[test]
    fn test_finalize_after_failure_forbids_citations() {
        let err = ToolResult::ToolError(ToolError::vector_search_failed("down"));
        let s = finalize_instruction(Some(&err));
        assert!(s.contains("vector_search_failed"));
        assert!(!s.contains("Allowed source names"));
    }
}
