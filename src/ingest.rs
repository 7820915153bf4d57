//! JSONL ingestion input for `loupe ingest`.

use std::collections::HashMap;

use loupe_core::LoupeError;
use serde::Deserialize;

/// One line of an ingest file.
#[derive(Debug, Deserialize)]
pub struct IngestRecord {
    #[serde(alias = "documentId")]
    pub document_id: String,
    pub content: String,
    #[serde(default)]
    pub index: Option<usize>,
}

/// A document's chunk contents in index order.
#[derive(Debug, PartialEq, Eq)]
pub struct DocumentInput {
    pub document_id: String,
    pub chunks: Vec<String>,
}

/// Parse JSONL records and group them into documents.
///
/// Documents keep the order in which they first appear. Within a document,
/// records either all carry an `index` (which must cover `0..n` exactly once)
/// or none do, in which case line order decides.
pub fn parse_documents(input: &str) -> Result<Vec<DocumentInput>, LoupeError> {
    let mut order: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, Vec<IngestRecord>> = HashMap::new();

    for (line_no, line) in input.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: IngestRecord = serde_json::from_str(line).map_err(|e| {
            LoupeError::InvalidArgument(format!("line {}: {e}", line_no + 1))
        })?;
        if record.document_id.is_empty() {
            return Err(LoupeError::InvalidArgument(format!(
                "line {}: document_id must not be empty",
                line_no + 1
            )));
        }
        if !grouped.contains_key(&record.document_id) {
            order.push(record.document_id.clone());
        }
        grouped
            .entry(record.document_id.clone())
            .or_default()
            .push(record);
    }

    order
        .into_iter()
        .map(|document_id| {
            let records = grouped.remove(&document_id).unwrap_or_default();
            let chunks = order_chunks(&document_id, records)?;
            Ok(DocumentInput {
                document_id,
                chunks,
            })
        })
        .collect()
}

fn order_chunks(document_id: &str, records: Vec<IngestRecord>) -> Result<Vec<String>, LoupeError> {
    let indexed = records.iter().filter(|r| r.index.is_some()).count();
    if indexed == 0 {
        return Ok(records.into_iter().map(|r| r.content).collect());
    }
    if indexed != records.len() {
        return Err(LoupeError::InvalidArgument(format!(
            "document '{document_id}' mixes records with and without an index"
        )));
    }

    let n = records.len();
    let mut slots: Vec<Option<String>> = vec![None; n];
    for record in records {
        let index = record.index.unwrap_or_default();
        let Some(slot) = slots.get_mut(index) else {
            return Err(LoupeError::InvalidArgument(format!(
                "document '{document_id}' has {n} chunks but uses index {index}; indices must be contiguous from 0"
            )));
        };
        if slot.is_some() {
            return Err(LoupeError::InvalidArgument(format!(
                "document '{document_id}' repeats chunk index {index}"
            )));
        }
        *slot = Some(record.content);
    }

    // n records filled n distinct slots in 0..n, so every slot is set.
    Ok(slots.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_by_document_in_first_seen_order() {
        let input = r#"
{"document_id": "b", "content": "b0"}
{"document_id": "a", "content": "a0"}
{"document_id": "b", "content": "b1"}
"#;
        let docs = parse_documents(input).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].document_id, "b");
        assert_eq!(docs[0].chunks, vec!["b0", "b1"]);
        assert_eq!(docs[1].chunks, vec!["a0"]);
    }

    #[test]
    fn explicit_indices_reorder_chunks() {
        let input = r#"{"documentId": "a", "content": "second", "index": 1}
{"documentId": "a", "content": "first", "index": 0}"#;
        let docs = parse_documents(input).unwrap();
        assert_eq!(docs[0].chunks, vec!["first", "second"]);
    }

    #[test]
    fn gaps_and_repeats_are_rejected() {
        let gap = r#"{"document_id": "a", "content": "x", "index": 0}
{"document_id": "a", "content": "y", "index": 2}"#;
        assert!(matches!(
            parse_documents(gap),
            Err(LoupeError::InvalidArgument(_))
        ));

        let repeat = r#"{"document_id": "a", "content": "x", "index": 0}
{"document_id": "a", "content": "y", "index": 0}"#;
        assert!(parse_documents(repeat).is_err());
    }

    #[test]
    fn mixed_indexing_is_rejected() {
        let input = r#"{"document_id": "a", "content": "x", "index": 0}
{"document_id": "a", "content": "y"}"#;
        let err = parse_documents(input).unwrap_err().to_string();
        assert!(err.contains("mixes"));
    }

    #[test]
    fn malformed_line_reports_line_number() {
        let input = "{\"document_id\": \"a\", \"content\": \"x\"}\nnot json";
        let err = parse_documents(input).unwrap_err().to_string();
        assert!(err.contains("line 2"), "{err}");
    }
}
