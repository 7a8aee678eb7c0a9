//! Delta merging
//!
//! Folds a sequence of [`RunnableResponseDelta`] into the running output:
//! `$text` is the concatenation of every fragment in arrival order, the rest
//! is a shallow merge of the partial objects where later keys win.

use futures::{Stream, StreamExt};
use serde_json::Value;

use crate::error::AigneError;
use crate::runnable::{Output, ResponseStream, RunnableResponseDelta, TEXT_KEY};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeltaMerger {
    text: Option<String>,
    patch: Output,
}

impl DeltaMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one delta and return the merged snapshot
    pub fn push(&mut self, delta: &RunnableResponseDelta) -> Output {
        self.apply(delta);
        self.snapshot()
    }

    /// Fold one delta without building a snapshot
    pub fn apply(&mut self, delta: &RunnableResponseDelta) {
        if let Some(patch) = &delta.delta {
            for (key, value) in patch {
                self.patch.insert(key.clone(), value.clone());
            }
        }
        if let Some(fragment) = &delta.text {
            self.text.get_or_insert_with(String::new).push_str(fragment);
        }
    }

    /// `{ ...patch, $text }`, with `$text` only once a fragment was seen
    pub fn snapshot(&self) -> Output {
        let mut output = self.patch.clone();
        if let Some(text) = &self.text {
            output.insert(TEXT_KEY.to_string(), Value::String(text.clone()));
        }
        output
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn into_output(self) -> Output {
        let mut output = self.patch;
        if let Some(text) = self.text {
            output.insert(TEXT_KEY.to_string(), Value::String(text));
        }
        output
    }
}

/// Stream of merged snapshots, one per delta
pub fn merge_stream(
    stream: ResponseStream,
) -> impl Stream<Item = Result<Output, AigneError>> + Send + 'static {
    let mut merger = DeltaMerger::new();
    stream.map(move |item| item.map(|delta| merger.push(&delta)))
}

/// Drain a response stream into its final output
pub async fn collect(mut stream: ResponseStream) -> Result<Output, AigneError> {
    let mut merger = DeltaMerger::new();
    while let Some(delta) = stream.next().await {
        merger.apply(&delta?);
    }
    Ok(merger.into_output())
}
