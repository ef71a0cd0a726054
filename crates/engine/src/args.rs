//! Call-site argument resolution.
//!
//! Every orchestrated operation accepts a loose, order-independent list of arguments. Each
//! argument is classified by its runtime type (and, for text, by its content) into a named
//! slot; the operation's [`OperationProfile`] then decides which slots are allowed, which
//! are required and which conflict. Classification and validation are pure: no file is
//! read and no store is contacted here.
//!
//! ```rust
//! use std::time::Duration;
//! use settle_engine::{OrchestratorConfig, Operation, args, resolve_arguments};
//! use settle_types::{Bindings, ResourceHandle};
//!
//! let mut handle = ResourceHandle::new();
//! let options = resolve_arguments(
//!     Operation::CreateAndWait,
//!     args!["30s", &mut handle, "metadata:\n  name: ${{ name }}", Bindings::new().with("name", "web")],
//!     &OrchestratorConfig::default(),
//! )
//! .unwrap();
//! assert_eq!(options.timeout, Some(Duration::from_secs(30)));
//! assert!(options.object.is_some());
//! ```

use std::{fmt, path::PathBuf, time::Duration};

use serde_json::Value;
use settle_types::{Bindings, ListSelector, ResourceHandle};
use settle_util::{dedent, looks_like_document_path, parse_duration};

use crate::{config::OrchestratorConfig, error::OrchestrationError};

/// One loosely-typed call-site argument.
///
/// Most callers never name these variants: the [`args!`](crate::args) macro converts each
/// expression with `From`. Strings and bare durations are classified by content and
/// position; the tagged variants ([`CallArgument::Timeout`], [`CallArgument::Interval`],
/// [`CallArgument::Template`]) pin an argument to its slot explicitly.
#[derive(Debug)]
pub enum CallArgument<'a> {
    /// A duration literal or template, decided by content.
    Text(String),
    Template(TemplateSource),
    Bindings(Bindings),
    Object(&'a mut ResourceHandle),
    Objects(&'a mut Vec<ResourceHandle>),
    /// Fills the timeout slot, then the interval slot.
    Duration(Duration),
    Timeout(Duration),
    Interval(Duration),
    Selector(ListSelector),
    /// A dynamic value: objects are bindings, strings are text.
    Value(Value),
}

impl CallArgument<'_> {
    pub fn timeout(duration: Duration) -> Self {
        CallArgument::Timeout(duration)
    }

    pub fn interval(duration: Duration) -> Self {
        CallArgument::Interval(duration)
    }

    pub fn template(text: impl Into<String>) -> Self {
        CallArgument::Template(TemplateSource::Inline(text.into()))
    }

    pub fn template_file(path: impl Into<PathBuf>) -> Self {
        CallArgument::Template(TemplateSource::File(path.into()))
    }
}

impl From<&str> for CallArgument<'_> {
    fn from(text: &str) -> Self {
        CallArgument::Text(text.to_string())
    }
}

impl From<String> for CallArgument<'_> {
    fn from(text: String) -> Self {
        CallArgument::Text(text)
    }
}

impl From<&String> for CallArgument<'_> {
    fn from(text: &String) -> Self {
        CallArgument::Text(text.clone())
    }
}

impl From<TemplateSource> for CallArgument<'_> {
    fn from(source: TemplateSource) -> Self {
        CallArgument::Template(source)
    }
}

impl From<Bindings> for CallArgument<'_> {
    fn from(bindings: Bindings) -> Self {
        CallArgument::Bindings(bindings)
    }
}

impl<'a> From<&'a mut ResourceHandle> for CallArgument<'a> {
    fn from(handle: &'a mut ResourceHandle) -> Self {
        CallArgument::Object(handle)
    }
}

impl<'a> From<&'a mut Vec<ResourceHandle>> for CallArgument<'a> {
    fn from(handles: &'a mut Vec<ResourceHandle>) -> Self {
        CallArgument::Objects(handles)
    }
}

impl From<Duration> for CallArgument<'_> {
    fn from(duration: Duration) -> Self {
        CallArgument::Duration(duration)
    }
}

impl From<ListSelector> for CallArgument<'_> {
    fn from(selector: ListSelector) -> Self {
        CallArgument::Selector(selector)
    }
}

impl From<Value> for CallArgument<'_> {
    fn from(value: Value) -> Self {
        CallArgument::Value(value)
    }
}

/// Build a `Vec<CallArgument>` from heterogeneous expressions.
///
/// ```rust
/// use std::time::Duration;
/// use settle_engine::{CallArgument, args};
///
/// let arguments = args!["10s", CallArgument::interval(Duration::from_millis(100))];
/// assert_eq!(arguments.len(), 2);
/// ```
#[macro_export]
macro_rules! args {
    () => {
        ::std::vec::Vec::<$crate::CallArgument<'_>>::new()
    };
    ($($argument:expr),+ $(,)?) => {
        ::std::vec![$($crate::CallArgument::from($argument)),+]
    };
}

/// Where template text comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    Inline(String),
    File(PathBuf),
}

/// Named argument slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Template,
    Bindings,
    Object,
    Objects,
    Timeout,
    Interval,
    Selector,
}

impl Slot {
    pub fn name(&self) -> &'static str {
        match self {
            Slot::Template => "template",
            Slot::Bindings => "bindings",
            Slot::Object => "object",
            Slot::Objects => "objects",
            Slot::Timeout => "timeout",
            Slot::Interval => "interval",
            Slot::Selector => "selector",
        }
    }

    fn title(&self) -> &'static str {
        match self {
            Slot::Template => "Template",
            Slot::Bindings => "Bindings",
            Slot::Object => "Object",
            Slot::Objects => "Objects",
            Slot::Timeout => "Timeout",
            Slot::Interval => "Interval",
            Slot::Selector => "Selector",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Every orchestrated operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    CreateAndWait,
    Update,
    UpdateAndWait,
    Delete,
    DeleteAndWait,
    Get,
    List,
    Render,
}

impl Operation {
    pub const ALL: [Operation; 9] = [
        Operation::Create,
        Operation::CreateAndWait,
        Operation::Update,
        Operation::UpdateAndWait,
        Operation::Delete,
        Operation::DeleteAndWait,
        Operation::Get,
        Operation::List,
        Operation::Render,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::CreateAndWait => "create_and_wait",
            Operation::Update => "update",
            Operation::UpdateAndWait => "update_and_wait",
            Operation::Delete => "delete",
            Operation::DeleteAndWait => "delete_and_wait",
            Operation::Get => "get",
            Operation::List => "list",
            Operation::Render => "render",
        }
    }

    /// Waiting operations confirm their effect with a poll loop.
    pub fn waits(&self) -> bool {
        matches!(self, Operation::CreateAndWait | Operation::UpdateAndWait | Operation::DeleteAndWait)
    }

    pub fn profile(&self) -> OperationProfile {
        const SOURCES: &[Slot] = &[Slot::Template, Slot::Bindings, Slot::Object, Slot::Objects];
        const WAITING_SOURCES: &[Slot] = &[
            Slot::Template,
            Slot::Bindings,
            Slot::Object,
            Slot::Objects,
            Slot::Timeout,
            Slot::Interval,
        ];
        const ANY_SOURCE: &[&[Slot]] = &[&[Slot::Template, Slot::Object, Slot::Objects]];
        const EXCLUSIVE: &[(Slot, Slot)] = &[(Slot::Object, Slot::Objects)];

        match self {
            Operation::Create | Operation::Update | Operation::Delete | Operation::Get => OperationProfile {
                permitted: SOURCES,
                required: ANY_SOURCE,
                exclusive: EXCLUSIVE,
            },
            Operation::CreateAndWait | Operation::UpdateAndWait | Operation::DeleteAndWait => OperationProfile {
                permitted: WAITING_SOURCES,
                required: ANY_SOURCE,
                exclusive: EXCLUSIVE,
            },
            Operation::List => OperationProfile {
                permitted: &[Slot::Objects, Slot::Selector],
                required: &[&[Slot::Objects], &[Slot::Selector]],
                exclusive: EXCLUSIVE,
            },
            Operation::Render => OperationProfile {
                permitted: SOURCES,
                required: &[&[Slot::Template]],
                exclusive: EXCLUSIVE,
            },
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which slots an operation accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationProfile {
    pub permitted: &'static [Slot],
    /// Each group needs at least one of its slots present.
    pub required: &'static [&'static [Slot]],
    /// Pairs that may not both be present.
    pub exclusive: &'static [(Slot, Slot)],
}

/// Resolved, validated arguments of one call.
#[derive(Debug, Default, PartialEq)]
pub struct Options<'a> {
    pub template: Option<TemplateSource>,
    /// Configured default bindings first, then call-site bindings in call order.
    pub bindings: Vec<Bindings>,
    pub object: Option<&'a mut ResourceHandle>,
    pub objects: Option<&'a mut Vec<ResourceHandle>>,
    pub timeout: Option<Duration>,
    pub interval: Option<Duration>,
    pub selector: Option<ListSelector>,
}

impl Options<'_> {
    fn has(&self, slot: Slot, call_bindings: bool) -> bool {
        match slot {
            Slot::Template => self.template.is_some(),
            Slot::Bindings => call_bindings,
            Slot::Object => self.object.is_some(),
            Slot::Objects => self.objects.is_some(),
            Slot::Timeout => self.timeout.is_some(),
            Slot::Interval => self.interval.is_some(),
            Slot::Selector => self.selector.is_some(),
        }
    }
}

/// Classify, place and validate `arguments` for `operation`, then apply `config` defaults.
pub fn resolve_arguments<'a>(
    operation: Operation,
    arguments: Vec<CallArgument<'a>>,
    config: &OrchestratorConfig,
) -> Result<Options<'a>, OrchestrationError> {
    let mut options = Options::default();
    let mut call_bindings = Vec::new();
    let mut untagged_durations = Vec::new();

    for argument in arguments {
        match classify(argument)? {
            CallArgument::Template(source) => place(&mut options.template, source, Slot::Template)?,
            CallArgument::Bindings(bindings) => call_bindings.push(bindings),
            CallArgument::Object(handle) => place(&mut options.object, handle, Slot::Object)?,
            CallArgument::Objects(handles) => place(&mut options.objects, handles, Slot::Objects)?,
            CallArgument::Duration(duration) => untagged_durations.push(duration),
            CallArgument::Timeout(duration) => place(&mut options.timeout, duration, Slot::Timeout)?,
            CallArgument::Interval(duration) => place(&mut options.interval, duration, Slot::Interval)?,
            CallArgument::Selector(selector) => place(&mut options.selector, selector, Slot::Selector)?,
            CallArgument::Text(_) | CallArgument::Value(_) => {
                unreachable!("classify resolves text and dynamic values")
            }
        }
    }

    // Untagged durations fill whichever of timeout/interval the tagged ones left open.
    for duration in untagged_durations {
        if options.timeout.is_none() {
            options.timeout = Some(duration);
        } else {
            place(&mut options.interval, duration, Slot::Interval)?;
        }
    }

    validate(operation, &options, !call_bindings.is_empty())?;

    if !config.bindings.is_empty() {
        options.bindings.push(config.bindings.clone());
    }
    options.bindings.extend(call_bindings);
    if operation.waits() {
        options.timeout.get_or_insert(config.timeout);
        options.interval.get_or_insert(config.interval);
    }
    Ok(options)
}

/// Reduce text and dynamic values to a slot-specific variant.
fn classify(argument: CallArgument<'_>) -> Result<CallArgument<'_>, OrchestrationError> {
    match argument {
        CallArgument::Text(text) => classify_text(text),
        CallArgument::Template(TemplateSource::Inline(text)) => inline_template(&text),
        CallArgument::Value(value) => match value {
            Value::Object(_) => Ok(CallArgument::Bindings(Bindings::from_json(value).unwrap_or_default())),
            Value::String(text) => classify_text(text),
            other => Err(OrchestrationError::invalid(format!(
                "unexpected argument type: {}",
                json_type_name(&other)
            ))),
        },
        other => Ok(other),
    }
}

fn classify_text<'a>(text: String) -> Result<CallArgument<'a>, OrchestrationError> {
    if let Some(duration) = parse_duration(&text) {
        return Ok(CallArgument::Duration(duration));
    }
    if looks_like_document_path(&text) {
        return Ok(CallArgument::Template(TemplateSource::File(PathBuf::from(text.trim()))));
    }
    inline_template(&text)
}

fn inline_template<'a>(text: &str) -> Result<CallArgument<'a>, OrchestrationError> {
    let document = dedent(text);
    if document.is_empty() {
        return Err(OrchestrationError::invalid("empty template argument"));
    }
    Ok(CallArgument::Template(TemplateSource::Inline(document)))
}

fn place<T>(slot: &mut Option<T>, value: T, name: Slot) -> Result<(), OrchestrationError> {
    if slot.is_some() {
        return Err(OrchestrationError::invalid(format!("multiple {name} arguments provided")));
    }
    *slot = Some(value);
    Ok(())
}

fn validate(operation: Operation, options: &Options<'_>, call_bindings: bool) -> Result<(), OrchestrationError> {
    let profile = operation.profile();

    for (first, second) in profile.exclusive {
        if options.has(*first, call_bindings) && options.has(*second, call_bindings) {
            return Err(OrchestrationError::invalid(format!(
                "conflicting arguments: {} and {}",
                first.title(),
                second.title()
            )));
        }
    }

    const ALL_SLOTS: [Slot; 7] = [
        Slot::Template,
        Slot::Bindings,
        Slot::Object,
        Slot::Objects,
        Slot::Timeout,
        Slot::Interval,
        Slot::Selector,
    ];
    if let Some(slot) = ALL_SLOTS
        .iter()
        .find(|slot| options.has(**slot, call_bindings) && !profile.permitted.contains(*slot))
    {
        return Err(OrchestrationError::invalid(format!("{slot} argument is not supported by {operation}")));
    }

    for group in profile.required {
        if !group.iter().any(|slot| options.has(*slot, call_bindings)) {
            return Err(OrchestrationError::invalid(format!(
                "{operation} requires one of: {}",
                describe_group(group)
            )));
        }
    }

    if call_bindings && options.template.is_none() {
        return Err(OrchestrationError::invalid("bindings require a template argument"));
    }
    Ok(())
}

fn describe_group(group: &[Slot]) -> String {
    let titles: Vec<&str> = group.iter().map(Slot::title).collect();
    match titles.as_slice() {
        [] => String::new(),
        [only] => (*only).to_string(),
        [first, second] => format!("{first} or {second}"),
        [rest @ .., last] => format!("{}, or {last}", rest.join(", ")),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
