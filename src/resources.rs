//! Resource value model.
//!
//! Loading a file evaluates its top-level code; the exports that come back
//! are live values, not syntax. The original platform identifies them with a
//! hidden brand property set at construction; here the brand is the enum
//! discriminant of [`ResourceValue`], checked structurally on load.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Callable job body. Deps results arrive pre-computed, keyed by job name.
pub type JobBody = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Live job value. `deps` are live references to other job objects, so the
/// graph can share nodes (diamonds are expected). Traversal must always use a
/// visited-by-name set; a cycle would otherwise loop forever.
#[derive(Clone)]
pub struct JobObject {
    pub name: String,
    pub body: JobBody,
    pub deps: Vec<Arc<JobObject>>,
}

impl JobObject {
    pub fn new(name: impl Into<String>, body: JobBody, deps: Vec<Arc<JobObject>>) -> Arc<Self> {
        Arc::new(JobObject {
            name: name.into(),
            body,
            deps,
        })
    }
}

impl fmt::Debug for JobObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobObject")
            .field("name", &self.name)
            .field("deps", &self.deps.iter().map(|d| &d.name).collect::<Vec<_>>())
            .finish()
    }
}

/// A workflow names its main job; everything reachable from it via `deps`
/// must be independently loadable.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub name: String,
    pub main_job: Arc<JobObject>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl InputType {
    /// The `typeof` result the generated validation wrapper checks against.
    pub fn js_typeof(&self) -> &'static str {
        match self {
            InputType::String => "string",
            InputType::Number => "number",
            InputType::Boolean => "boolean",
            InputType::Object | InputType::Array => "object",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputField {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: InputType,
    pub required: bool,
}

/// Declared resolver shape, as surfaced by the loader. The input fields
/// drive the generated validation wrapper; `database` selects the
/// transaction-capable client-acquisition prologue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolverDefinition {
    pub name: String,
    pub input: Vec<InputField>,
    pub database: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorDefinition {
    pub name: String,
    pub trigger: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptKind {
    Hook,
    Validator,
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptKind::Hook => write!(f, "hook"),
            ScriptKind::Validator => write!(f, "validator"),
        }
    }
}

/// A database field hook or validator: one scripted expression attached to
/// `typeName.fieldName`, shipped as bare function text after the purity
/// guard accepts it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldScript {
    pub type_name: String,
    pub field_name: String,
    pub kind: ScriptKind,
    pub source: String,
}

/// Brand-checked export value. Anything the loader cannot classify is kept
/// as `Other` and ignored by the pipeline.
#[derive(Debug, Clone)]
pub enum ResourceValue {
    Job(Arc<JobObject>),
    Workflow(Workflow),
    Resolver(ResolverDefinition),
    Executor(ExecutorDefinition),
    FieldScript(FieldScript),
    Other,
}

/// One dynamically loaded file: its path and its exports in declaration
/// order, each paired with the exported binding name.
#[derive(Debug, Clone)]
pub struct LoadedModule {
    pub path: PathBuf,
    pub exports: Vec<(String, ResourceValue)>,
}
