//! Schema registration.
//!
//! A [`Schema`] is the static table the resolution pass dispatches on:
//! tool name → tool decoder, structured type tag → output decoder, plus the
//! grounding codec. It is built once at startup with [`Schema::builder`].

use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use strand_types::{
    EntryError, GenerationError, Segment, StructuredOutput, Streamed, Tool, ToolCall,
    ToolOutputEntry, ToolRun, Transcript, UnknownToolRun,
};

use crate::correlate::correlate;
use crate::resolve::{DecodedTranscript, resolve};

/// The application types a schema decodes into.
///
/// `ToolRun` and `Output` are usually application enums with one variant per
/// registered tool or structured type plus an unknown variant. The
/// implementing type itself is only a marker.
pub trait SchemaTypes: Clone + fmt::Debug + PartialEq + Send + Sync + 'static {
    type ToolRun: Clone + fmt::Debug + PartialEq + Send + Sync + 'static;
    type Output: Clone + fmt::Debug + PartialEq + Send + Sync + 'static;
    type Grounding: Serialize
        + DeserializeOwned
        + Clone
        + fmt::Debug
        + PartialEq
        + Send
        + Sync
        + 'static;
}

/// Grounding type for schemas that attach no grounding to prompts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoGrounding {}

type ToolDecoder<K> = Box<
    dyn Fn(&ToolCall, Option<&ToolOutputEntry>) -> Result<<K as SchemaTypes>::ToolRun, GenerationError>
        + Send
        + Sync,
>;
type OutputDecoder<K> = Box<dyn Fn(&str, &str, bool) -> <K as SchemaTypes>::Output + Send + Sync>;
type UnknownTool<K> = Box<dyn Fn(UnknownToolRun) -> <K as SchemaTypes>::ToolRun + Send + Sync>;
type UnknownOutput<K> = Box<dyn Fn(Segment) -> <K as SchemaTypes>::Output + Send + Sync>;

pub struct Schema<K: SchemaTypes> {
    tools: HashMap<&'static str, ToolDecoder<K>>,
    tool_order: Vec<&'static str>,
    outputs: HashMap<&'static str, OutputDecoder<K>>,
    output_order: Vec<&'static str>,
    unknown_tool: UnknownTool<K>,
    unknown_output: UnknownOutput<K>,
}

impl<K: SchemaTypes> fmt::Debug for Schema<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("tools", &self.tool_order)
            .field("structured", &self.output_order)
            .finish()
    }
}

impl<K: SchemaTypes> Schema<K> {
    /// Starts a schema. Both fallbacks are required so resolution never
    /// fails on names it does not know.
    pub fn builder(
        unknown_tool: impl Fn(UnknownToolRun) -> K::ToolRun + Send + Sync + 'static,
        unknown_output: impl Fn(Segment) -> K::Output + Send + Sync + 'static,
    ) -> SchemaBuilder<K> {
        SchemaBuilder {
            schema: Schema {
                tools: HashMap::new(),
                tool_order: Vec::new(),
                outputs: HashMap::new(),
                output_order: Vec::new(),
                unknown_tool: Box::new(unknown_tool),
                unknown_output: Box::new(unknown_output),
            },
        }
    }

    pub fn tool_names(&self) -> &[&'static str] {
        &self.tool_order
    }

    pub fn structured_type_names(&self) -> &[&'static str] {
        &self.output_order
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Decodes the transcript into application types. Pure.
    pub fn resolve(&self, transcript: &Transcript) -> Result<DecodedTranscript<K>, GenerationError> {
        resolve(self, transcript)
    }

    /// Serializes groundings into the payload stored on a prompt entry.
    pub fn encode_groundings(&self, groundings: &[K::Grounding]) -> Result<String, GenerationError> {
        serde_json::to_string(groundings).map_err(|e| {
            GenerationError::invalid_config(format!("Failed to encode groundings: {e}"))
        })
    }

    pub fn decode_groundings(&self, raw: &str) -> Result<Vec<K::Grounding>, EntryError> {
        serde_json::from_str(raw)
            .map_err(|e| EntryError::new(format!("Failed to decode groundings: {e}")))
    }

    pub(crate) fn decode_tool(
        &self,
        call: &ToolCall,
        output: Option<&ToolOutputEntry>,
    ) -> Option<Result<K::ToolRun, GenerationError>> {
        self.tools
            .get(call.tool_name.as_str())
            .map(|decode| decode(call, output))
    }

    pub(crate) fn unknown_tool(&self, run: UnknownToolRun) -> K::ToolRun {
        (self.unknown_tool)(run)
    }

    pub(crate) fn decode_output(
        &self,
        type_name: &str,
        id: &str,
        content: &str,
        complete: bool,
    ) -> Option<K::Output> {
        self.outputs
            .get(type_name)
            .map(|decode| decode(id, content, complete))
    }

    pub(crate) fn unknown_output(&self, segment: Segment) -> K::Output {
        (self.unknown_output)(segment)
    }
}

pub struct SchemaBuilder<K: SchemaTypes> {
    schema: Schema<K>,
}

impl<K: SchemaTypes> SchemaBuilder<K> {
    /// Registers tool `T`. `wrap` lifts its run into the application enum.
    ///
    /// Registering the same name twice keeps the later decoder.
    #[must_use]
    pub fn tool<T: Tool>(
        mut self,
        wrap: impl Fn(ToolRun<T>) -> K::ToolRun + Send + Sync + 'static,
    ) -> Self {
        if !self.schema.tools.contains_key(T::NAME) {
            self.schema.tool_order.push(T::NAME);
        }
        self.schema.tools.insert(
            T::NAME,
            Box::new(move |call: &ToolCall, output: Option<&ToolOutputEntry>| {
                correlate::<T>(call, output).map(&wrap)
            }),
        );
        self
    }

    /// Registers structured output `T` under its type tag.
    #[must_use]
    pub fn structured<T: StructuredOutput>(
        mut self,
        wrap: impl Fn(Streamed<T>) -> K::Output + Send + Sync + 'static,
    ) -> Self {
        if !self.schema.outputs.contains_key(T::TYPE_NAME) {
            self.schema.output_order.push(T::TYPE_NAME);
        }
        self.schema.outputs.insert(
            T::TYPE_NAME,
            Box::new(move |id: &str, content: &str, complete: bool| {
                wrap(Streamed::decode(id, content, complete))
            }),
        );
        self
    }

    pub fn build(self) -> Schema<K> {
        self.schema
    }
}
