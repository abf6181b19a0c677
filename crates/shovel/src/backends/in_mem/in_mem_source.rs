use std::collections::VecDeque;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use crate::backends::Source;
use crate::common::Document;

/// 🔧 Inline documents straight from the config file. Great for demos, terrible for 19k products.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct InMemorySourceConfig {
    #[serde(default)]
    pub documents: Vec<Document>,
}

/// 📦 Hands out the documents it was built with, in order, once each.
#[derive(Debug, Default)]
pub struct InMemorySource {
    documents: VecDeque<Document>,
    total: u64,
}

impl InMemorySource {
    pub fn new(documents: impl IntoIterator<Item = Document>) -> Self {
        let documents: VecDeque<Document> = documents.into_iter().collect();
        let total = documents.len() as u64;
        Self { documents, total }
    }
}

#[async_trait]
impl Source for InMemorySource {
    async fn next_document(&mut self) -> Result<Option<Document>> {
        // -- 🍪 None once the cabinet is empty. Asking again won't refill it.
        Ok(self.documents.pop_front())
    }

    fn size_hint(&self) -> Option<u64> {
        Some(self.total)
    }
}
