//! Tool definition, registry, and execution boundary.
//!
//! Tools let the model act on the world. This module provides:
//!
//! - [`Tool`] trait - Define custom tools the model can call
//! - [`ToolName`] trait - Marker trait for strongly-typed tool names
//! - [`DynamicToolName`] - Tool names created at runtime
//! - [`ToolRegistry`] - Collection of available tools, plus the executor
//! - [`ToolContext`] - Context passed to tool execution
//!
//! The executor ([`ToolRegistry::execute`]) is a containment boundary: an
//! unknown tool name, a schema-invalid argument object, or a handler error
//! all come back as a failed [`ToolResult`], never as a raised error.
//!
//! # Implementing a Tool
//!
//! ```ignore
//! struct WeatherTool;
//!
//! // No #[async_trait] needed - Rust 1.75+ supports native async traits
//! impl Tool<MyContext> for WeatherTool {
//!     type Name = MyToolName;
//!
//!     fn name(&self) -> MyToolName { MyToolName::GetWeather }
//!     fn description(&self) -> &'static str { "Look up current weather" }
//!     fn input_schema(&self) -> Value { json!({ "type": "object" }) }
//!
//!     async fn execute(
//!         &self,
//!         ctx: &ToolContext<MyContext>,
//!         arguments: Map<String, Value>,
//!     ) -> Result<Map<String, Value>> {
//!         Ok(Map::new())
//!     }
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use jsonschema::{Draft, JSONSchema};
use log::{debug, warn};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::transcript::ToolCall;
use crate::types::ToolResult;

// ============================================================================
// Tool Name Types
// ============================================================================

/// Marker trait for tool names.
///
/// Tool names must be serializable (for storage/logging) and deserializable
/// (for parsing from model responses). The string representation is derived
/// from serde serialization.
pub trait ToolName: Send + Sync + Serialize + DeserializeOwned + 'static {}

/// Helper to get string representation of a tool name via serde.
///
/// # Panics
///
/// Panics if the tool name cannot be serialized to a string. This should
/// never happen with properly implemented `ToolName` types that use
/// `#[derive(Serialize)]`.
#[must_use]
pub fn tool_name_to_string<N: ToolName>(name: &N) -> String {
    serde_json::to_string(name)
        .expect("ToolName must serialize to string")
        .trim_matches('"')
        .to_string()
}

/// Parse a tool name from string via serde.
///
/// # Errors
/// Returns error if the string doesn't match a valid tool name.
pub fn tool_name_from_str<N: ToolName>(s: &str) -> Result<N, serde_json::Error> {
    serde_json::from_str(&format!("\"{s}\""))
}

/// Dynamic tool name for runtime-created tools.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DynamicToolName(String);

impl DynamicToolName {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ToolName for DynamicToolName {}

// ============================================================================
// Tool Schema (provider-facing declaration)
// ============================================================================

/// Declaration of a tool as advertised to the model provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

// ============================================================================
// Tool Context
// ============================================================================

/// Context passed to tool execution
pub struct ToolContext<Ctx> {
    /// Application-specific context (e.g., `user_id`, db connection)
    pub app: Ctx,
    /// Tool-specific metadata
    pub metadata: HashMap<String, Value>,
    /// Cancellation signal for the run this execution belongs to.
    cancellation: CancellationToken,
}

impl<Ctx> ToolContext<Ctx> {
    #[must_use]
    pub fn new(app: Ctx) -> Self {
        Self {
            app,
            metadata: HashMap::new(),
            cancellation: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Attach the run's cancellation token. Long-running tools should poll
    /// [`ToolContext::cancellation`] and wind down when it fires.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }
}

// ============================================================================
// Tool Trait
// ============================================================================

/// Definition of a tool that can be called by the agent.
///
/// Tools have a strongly-typed `Name` associated type that determines
/// how the tool name is serialized for model communication.
///
/// # Native Async Support
///
/// This trait uses Rust's native async functions in traits (stabilized in
/// Rust 1.75). You do NOT need the `async_trait` crate to implement it.
pub trait Tool<Ctx>: Send + Sync {
    /// The type of name for this tool.
    type Name: ToolName;

    /// Returns the tool's strongly-typed name.
    fn name(&self) -> Self::Name;

    /// Human-readable description of what the tool does.
    fn description(&self) -> &'static str;

    /// JSON schema (Draft 7) for the tool's argument object.
    fn input_schema(&self) -> Value;

    /// Exclusive tools never run concurrently with each other; within a
    /// batch they are serialized while non-exclusive tools run in parallel.
    fn exclusive(&self) -> bool {
        false
    }

    /// Execute the tool with the given arguments.
    ///
    /// # Errors
    /// Returns an error if tool execution fails. The executor converts the
    /// error into a failed [`ToolResult`]; it never propagates.
    fn execute(
        &self,
        ctx: &ToolContext<Ctx>,
        arguments: Map<String, Value>,
    ) -> impl Future<Output = Result<Map<String, Value>>> + Send;
}

// ============================================================================
// Type-Erased Tool (for Registry)
// ============================================================================

/// Type-erased tool trait for registry storage.
///
/// This allows tools with different `Name` associated types to be stored
/// in the same registry by erasing the type information.
#[async_trait]
pub trait ErasedTool<Ctx>: Send + Sync {
    /// Get the tool name as a string.
    fn name_str(&self) -> &str;
    /// Get the tool description.
    fn description(&self) -> &'static str;
    /// Get the JSON schema for tool arguments.
    fn input_schema(&self) -> Value;
    /// Whether the tool requires exclusive execution.
    fn exclusive(&self) -> bool;
    /// Validate an argument object against the tool's declared schema.
    ///
    /// # Errors
    /// Returns the validation failure details as a string.
    fn validate_arguments(&self, arguments: &Map<String, Value>) -> Result<(), String> {
        check_arguments(&compile_schema(&self.input_schema())?, arguments)
    }
    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        ctx: &ToolContext<Ctx>,
        arguments: Map<String, Value>,
    ) -> Result<Map<String, Value>>;
}

/// Wrapper that erases the Name associated type from a Tool.
///
/// The declared schema is compiled once here; per-call validation reuses
/// the compiled form.
struct ToolWrapper<T, Ctx>
where
    T: Tool<Ctx>,
{
    inner: T,
    name_cache: String,
    compiled_schema: Result<JSONSchema, String>,
    _marker: PhantomData<Ctx>,
}

impl<T, Ctx> ToolWrapper<T, Ctx>
where
    T: Tool<Ctx>,
{
    fn new(tool: T) -> Self {
        let name_cache = tool_name_to_string(&tool.name());
        let compiled_schema = compile_schema(&tool.input_schema());
        Self {
            inner: tool,
            name_cache,
            compiled_schema,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T, Ctx> ErasedTool<Ctx> for ToolWrapper<T, Ctx>
where
    T: Tool<Ctx> + 'static,
    Ctx: Send + Sync + 'static,
{
    fn name_str(&self) -> &str {
        &self.name_cache
    }

    fn description(&self) -> &'static str {
        self.inner.description()
    }

    fn input_schema(&self) -> Value {
        self.inner.input_schema()
    }

    fn exclusive(&self) -> bool {
        self.inner.exclusive()
    }

    fn validate_arguments(&self, arguments: &Map<String, Value>) -> Result<(), String> {
        match &self.compiled_schema {
            Ok(compiled) => check_arguments(compiled, arguments),
            Err(error) => Err(error.clone()),
        }
    }

    async fn execute(
        &self,
        ctx: &ToolContext<Ctx>,
        arguments: Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        self.inner.execute(ctx, arguments).await
    }
}

// ============================================================================
// Tool Registry
// ============================================================================

/// Registry of available tools, doubling as the executor.
///
/// Tools are stored with their names erased to allow different `Name` types
/// in the same registry. The registry uses string-based lookup for model
/// compatibility.
pub struct ToolRegistry<Ctx> {
    tools: HashMap<String, Arc<dyn ErasedTool<Ctx>>>,
}

impl<Ctx> Clone for ToolRegistry<Ctx> {
    fn clone(&self) -> Self {
        Self {
            tools: self.tools.clone(),
        }
    }
}

impl<Ctx: Send + Sync + 'static> Default for ToolRegistry<Ctx> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Ctx: Send + Sync + 'static> ToolRegistry<Ctx> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool in the registry.
    ///
    /// The tool's name is converted to a string via serde serialization
    /// and used as the lookup key.
    pub fn register<T>(&mut self, tool: T) -> &mut Self
    where
        T: Tool<Ctx> + 'static,
    {
        let wrapper = ToolWrapper::new(tool);
        let name = wrapper.name_str().to_string();
        self.tools.insert(name, Arc::new(wrapper));
        self
    }

    /// Get a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ErasedTool<Ctx>>> {
        self.tools.get(name)
    }

    /// Whether the named tool exists and requires exclusive execution.
    #[must_use]
    pub fn is_exclusive(&self, name: &str) -> bool {
        self.tools.get(name).is_some_and(|t| t.exclusive())
    }

    /// Get all registered tools.
    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn ErasedTool<Ctx>>> {
        self.tools.values()
    }

    /// Get the number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Declarations for every registered tool, for the provider request.
    #[must_use]
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools
            .values()
            .map(|tool| ToolSchema {
                name: tool.name_str().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.input_schema(),
            })
            .collect()
    }

    /// Execute a single tool call.
    ///
    /// Never raises: unknown tools, invalid arguments, and handler errors
    /// all become failed [`ToolResult`]s carrying the error description.
    pub async fn execute(&self, ctx: &ToolContext<Ctx>, call: &ToolCall) -> ToolResult {
        let Some(tool) = self.get(&call.function_name) else {
            warn!("unknown tool requested name={}", call.function_name);
            return ToolResult::failure(
                &call.id,
                format!("unknown tool: {}", call.function_name),
            );
        };

        if let Err(error) = tool.validate_arguments(&call.arguments) {
            debug!(
                "argument validation failed tool={} error={error}",
                call.function_name
            );
            return ToolResult::failure(
                &call.id,
                format!("invalid arguments for {}: {error}", call.function_name),
            );
        }

        let started = Instant::now();
        let outcome = tool.execute(ctx, call.arguments.clone()).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(payload) => ToolResult::success(&call.id, payload).with_duration(duration_ms),
            Err(error) => {
                warn!("tool failed name={} error={error:#}", call.function_name);
                ToolResult::failure(&call.id, format!("tool {} failed: {error:#}", call.function_name))
                    .with_duration(duration_ms)
            }
        }
    }
}

/// Compile a tool's declared Draft 7 schema.
fn compile_schema(schema: &Value) -> Result<JSONSchema, String> {
    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(schema)
        .map_err(|err| format!("invalid tool schema: {err}"))
}

/// Validate an argument object against a compiled schema.
fn check_arguments(compiled: &JSONSchema, arguments: &Map<String, Value>) -> Result<(), String> {
    let instance = Value::Object(arguments.clone());
    if let Err(errors) = compiled.validate(&instance) {
        let details: Vec<String> = errors.map(|e| e.to_string()).collect();
        return Err(details.join("; "));
    }
    Ok(())
}
