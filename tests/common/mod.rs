//! Shared helpers for integration tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use docgraph::completion::{CompletionProvider, CompletionRequest};
use docgraph::extraction::ExtractionOptions;
use docgraph::text::{Chunker, FileTextSource, SourceDocument};
use docgraph::{DocumentPipeline, Error, Result};

/// Replays canned model replies in order.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<String>>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new<I, S>(replies: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::Completion("script exhausted".into()))
    }
}

pub fn pipeline(provider: Arc<ScriptedProvider>) -> DocumentPipeline {
    DocumentPipeline::new(
        Arc::new(FileTextSource::new()),
        provider,
        Chunker::new(1000, 200),
        ExtractionOptions::default(),
    )
}

pub fn document(doc_id: &str, text: &str) -> SourceDocument {
    SourceDocument {
        doc_id: doc_id.to_string(),
        title: format!("{}.txt", doc_id),
        source: format!("docs/{}.txt", doc_id),
        text: text.to_string(),
    }
}

/// Replies for a terms-of-service snippet: four candidates (one a date),
/// three typed entities, three relations of which one points nowhere.
pub fn terms_script() -> Vec<&'static str> {
    vec![
        r#"```json
        {"entities": [
            {"name": "Uber", "description": "Ride-hailing platform"},
            {"name": "Rider", "description": "Person requesting rides"},
            {"name": "Arbitration Agreement"},
            {"name": "January 1, 2020"}
        ]}
        ```"#,
        r#"[{"id": "c1", "type": "ORGANIZATION"},
            {"id": "c2", "type": "ROLE"},
            {"id": "c3", "type": "legal agreement"},
            {"id": "c4", "type": "DATE"}]"#,
        r#"Here are the relations:
        [{"source_entity_id": "Uber", "target_entity_id": "Rider", "relation_type": "DEFINES",
          "start_date": "2020-01-01", "confidence": 1.7},
         {"source": "Rider", "target": "Arbitration Agreement", "relation_type": "subject to"},
         {"source": "Uber", "target": "Lyft", "relation_type": "COMPETES_WITH"}]"#,
    ]
}

pub const TERMS_TEXT: &str = "Uber defines the Rider role. Starting January 1, 2020, every Rider \
is bound by the Arbitration Agreement.";
