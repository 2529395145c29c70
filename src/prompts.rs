//! System prompts for the LLM-backed tasks.
//!
//! Each prompt describes the task only; the reply shape is enforced through the JSON schema
//! attached to the request.

/// Prompt for [`crate::nodes::DocumentClassificationNode`].
pub const DOCUMENT_CLASSIFICATION: &str = "You classify business documents. \
Read the document text and its metadata, then predict the single most fitting document type \
label (for example invoice, contract, purchase_order, memo, resume, report). \
Report a confidence between 0 and 1, a short reasoning grounded in the text, and a few \
lowercase tags describing the content. Do not invent facts that are not in the text.";

/// Prompt for [`crate::nodes::InformationExtractionNode`].
pub const INFORMATION_EXTRACTION: &str = "You extract structured fields from business documents. \
For every requested field name, return the value exactly as it appears in the text together \
with a confidence between 0 and 1. Use an empty string and a confidence of 0 when a field is \
absent. Only return the requested fields. Add a brief reasoning when values were ambiguous.";

/// Prompt for [`crate::nodes::DocumentRoutingNode`].
pub const DOCUMENT_ROUTING: &str = "You route documents to the department that should handle them. \
You receive a candidate department suggested by the sender, the reason given for it and any \
known document metadata. Confirm or override the candidate, report a confidence between 0 and \
1, explain the decision briefly, and set escalate to true when the document needs urgent human \
review.";

/// Prompt for [`crate::nodes::DocumentSummaryNode`].
pub const DOCUMENT_SUMMARY: &str = "You summarize documents from an ordered list of text chunks. \
Write a concise prose summary of the whole document, a list of the most important points as \
short bullet strings, and, when the document implies follow-up work, a list of next steps. \
Stay faithful to the chunks and do not speculate.";

/// Prompt for [`crate::nodes::QaQueryNode`].
pub const QA_ANSWERING: &str = "You answer questions using only the numbered context passages \
provided. Each passage header carries a ref value. Answer concisely, explain your reasoning, \
report a confidence between 0 and 1, and list in citations the ref values of every passage \
that supports the answer. If the passages do not contain the answer, say so and leave \
citations empty.";

/// Prompt for [`crate::classifier::LlmLabelClassifier`].
pub const LABEL_CLASSIFICATION: &str = "You assign a document to exactly one label from a fixed \
list of candidate labels. Read the document summary, choose the best matching candidate label \
verbatim, report a confidence between 0 and 1 and give a one sentence reason.";
