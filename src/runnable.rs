//! The contract every agent kind implements
//!
//! | Option           | Result                                   |
//! |------------------|------------------------------------------|
//! | `stream = false` | [`RunOutput::Complete`] with the output  |
//! | `stream = true`  | [`RunOutput::Stream`] of response deltas |
//!
//! A stream is single-pass and finite: it ends normally or with exactly one
//! `Err` item. Folding its deltas with [`crate::delta::DeltaMerger`] yields
//! the same object the non-streaming call returns.

use std::fmt;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::ExecutionContext;
use crate::definition::RunnableDefinition;
use crate::delta;
use crate::error::AigneError;

/// Output object of a run
pub type Output = Map<String, Value>;

/// Reserved output key carrying streamed text
pub const TEXT_KEY: &str = "$text";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    #[serde(default)]
    pub stream: bool,
}

impl RunOptions {
    pub fn complete() -> Self {
        Self { stream: false }
    }

    pub fn streaming() -> Self {
        Self { stream: true }
    }
}

/// One increment of a streamed response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunnableResponseDelta {
    /// Text fragment appended to `$text`
    #[serde(rename = "$text", default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Partial object shallow-merged into the output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<Output>,
}

impl RunnableResponseDelta {
    pub fn text(fragment: impl Into<String>) -> Self {
        Self {
            text: Some(fragment.into()),
            delta: None,
        }
    }

    pub fn patch(patch: Output) -> Self {
        Self {
            text: None,
            delta: Some(patch),
        }
    }

    /// Single delta equivalent to a complete output
    ///
    /// A string `$text` becomes the fragment; everything else the patch.
    pub fn from_output(mut output: Output) -> Self {
        let text = match output.remove(TEXT_KEY) {
            Some(Value::String(text)) => Some(text),
            Some(other) => {
                output.insert(TEXT_KEY.to_string(), other);
                None
            }
            None => None,
        };
        Self {
            text,
            delta: (!output.is_empty()).then_some(output),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.delta.as_ref().map_or(true, Map::is_empty)
    }
}

pub type ResponseStream = BoxStream<'static, Result<RunnableResponseDelta, AigneError>>;

pub enum RunOutput {
    Complete(Output),
    Stream(ResponseStream),
}

impl RunOutput {
    /// Complete or lifted to a one-delta stream, as `options` asks
    pub fn for_options(output: Output, options: RunOptions) -> Self {
        if options.stream {
            RunOutput::Stream(lift(output))
        } else {
            RunOutput::Complete(output)
        }
    }

    /// Collapse to the final output, merging a stream if needed
    pub async fn into_output(self) -> Result<Output, AigneError> {
        match self {
            RunOutput::Complete(output) => Ok(output),
            RunOutput::Stream(stream) => delta::collect(stream).await,
        }
    }

    pub fn into_stream(self) -> ResponseStream {
        match self {
            RunOutput::Complete(output) => lift(output),
            RunOutput::Stream(stream) => stream,
        }
    }
}

impl fmt::Debug for RunOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutput::Complete(output) => f.debug_tuple("Complete").field(output).finish(),
            RunOutput::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

fn lift(output: Output) -> ResponseStream {
    stream::once(async move { Ok(RunnableResponseDelta::from_output(output)) }).boxed()
}

/// An executable agent
#[async_trait]
pub trait Runnable: Send + Sync {
    fn definition(&self) -> &RunnableDefinition;

    async fn run(
        &self,
        input: Output,
        options: RunOptions,
        ctx: &ExecutionContext,
    ) -> Result<RunOutput, AigneError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Output {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn from_output_splits_text() {
        let delta = RunnableResponseDelta::from_output(object(json!({"$text": "hi", "n": 1})));
        assert_eq!(delta.text.as_deref(), Some("hi"));
        assert_eq!(delta.delta, Some(object(json!({"n": 1}))));
    }

    #[test]
    fn from_output_keeps_non_string_text_in_patch() {
        let delta = RunnableResponseDelta::from_output(object(json!({"$text": {"a": 1}})));
        assert!(delta.text.is_none());
        assert_eq!(delta.delta, Some(object(json!({"$text": {"a": 1}}))));
    }

    #[test]
    fn delta_serializes_with_reserved_key() {
        let json = serde_json::to_value(RunnableResponseDelta::text("tok")).unwrap();
        assert_eq!(json, json!({"$text": "tok"}));
        assert!(RunnableResponseDelta::default().is_empty());
    }

    #[tokio::test]
    async fn lifted_stream_collapses_to_same_output() {
        let output = object(json!({"$text": "done", "score": 0.5}));
        let lifted = RunOutput::for_options(output.clone(), RunOptions::streaming());
        assert!(matches!(lifted, RunOutput::Stream(_)));
        assert_eq!(lifted.into_output().await.unwrap(), output);
    }
}
