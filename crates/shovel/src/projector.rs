//! ✂️ Field projection: keep the fields the index wants, drop the rest.
//!
//! Lifted from the "filtered_doc = {key: doc[key] for key in doc_attributes if key in doc}"
//! school of ETL, except the allowlist comes from config instead of a hardcoded list.

use std::collections::HashSet;

use crate::common::Document;

/// ✂️ Keeps only allowlisted fields. No allowlist means keep everything.
///
/// Missing allowed fields are not an error, and a document with zero matching fields
/// comes out as `{}` and is still indexed. Filtering those out is the upstream's call.
#[derive(Debug, Clone, Default)]
pub struct FieldProjector {
    allowed_fields: Option<HashSet<String>>,
}

impl FieldProjector {
    pub fn new<I, S>(allowed_fields: Option<I>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_fields: allowed_fields.map(|fields| fields.into_iter().map(Into::into).collect()),
        }
    }

    /// 🚶 The identity projector. Documents go through untouched.
    pub fn passthrough() -> Self {
        Self::default()
    }

    pub fn is_passthrough(&self) -> bool {
        self.allowed_fields.is_none()
    }

    pub fn project(&self, mut doc: Document) -> Document {
        if let Some(ref allowed) = self.allowed_fields {
            doc.retain(|key, _| allowed.contains(key));
        }
        doc
    }
}
