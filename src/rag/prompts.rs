//! Prompt text for grounded answers

pub const SYSTEM_PROMPT: &str = "You are a helpful AI assistant. Use the provided context to answer questions accurately.
If the context doesn't contain enough information, say so clearly.
Always cite which source(s) you used in your answer.";

/// Returned instead of generating when retrieval finds nothing
pub const NO_CONTEXT_ANSWER: &str = "I couldn't find any relevant information in the knowledge base to answer your question. Please try rephrasing or ask a different question.";

/// Build the RAG prompt
pub fn build_rag_prompt(question: &str, context: &str) -> String {
    format!(
        "Context:
{context}

Question: {question}

Answer based on the context provided above:"
    )
}
