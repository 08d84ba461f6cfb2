//! Validator adapter: the minimal checker capability the endpoint consumes.
//!
//! The endpoint never interprets interface descriptors itself. It asks an
//! [`InterfaceChecker`] to enumerate method-typed members, and obtains one
//! [`ArgsChecker`] per method (run on the responder before invocation) and
//! one [`ResultChecker`] per method (run on the caller against response
//! data). Those are the only two places validation happens.
//!
//! [`InterfaceSchema`] is the built-in adapter: a descriptor of named
//! methods with positional parameter types and a result type over JSON
//! values. Any other schema library can plug in by implementing the three
//! traits.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

/// Validation failure. The message is reported verbatim in the RPC error
/// `mesg`, so keep it self-contained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckError(pub String);

impl std::fmt::Display for CheckError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for CheckError {}

/// Validates a positional-argument tuple.
pub trait ArgsChecker: Send + Sync {
    fn check_args(&self, args: &[Value]) -> Result<(), CheckError>;
}

/// Validates a single result value.
pub trait ResultChecker: Send + Sync {
    fn check_result(&self, value: &Value) -> Result<(), CheckError>;
}

/// An interface descriptor the endpoint can consume.
pub trait InterfaceChecker: Send + Sync {
    /// Names of the method-typed members, in a stable order.
    fn method_names(&self) -> Vec<String>;

    /// Argument checker for a named method, or `None` if the interface has
    /// no such method.
    fn args_checker(&self, meth: &str) -> Option<Arc<dyn ArgsChecker>>;

    /// Result checker for a named method, or `None` if the interface has
    /// no such method.
    fn result_checker(&self, meth: &str) -> Option<Arc<dyn ResultChecker>>;
}

/// JSON value categories a parameter or result can be constrained to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Any,
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl ValueType {
    fn name(self) -> &'static str {
        match self {
            ValueType::Any => "any",
            ValueType::Null => "null",
            ValueType::Bool => "boolean",
            ValueType::Number => "number",
            ValueType::String => "string",
            ValueType::Array => "array",
            ValueType::Object => "object",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            ValueType::Any => true,
            ValueType::Null => value.is_null(),
            ValueType::Bool => value.is_boolean(),
            ValueType::Number => value.is_number(),
            ValueType::String => value.is_string(),
            ValueType::Array => value.is_array(),
            ValueType::Object => value.is_object(),
        }
    }
}

#[derive(Debug, Clone)]
struct ParamSpec {
    name: String,
    ty: ValueType,
    optional: bool,
}

/// Signature of one method: positional parameters plus a result type.
///
/// Extra trailing arguments beyond the declared parameters are permitted;
/// the responder ignores them.
#[derive(Debug, Clone, Default)]
pub struct MethodSpec {
    params: Vec<ParamSpec>,
    result: Option<ValueType>,
}

impl MethodSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a required positional parameter.
    pub fn param(mut self, name: impl Into<String>, ty: ValueType) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            ty,
            optional: false,
        });
        self
    }

    /// Append an optional positional parameter.
    pub fn optional_param(mut self, name: impl Into<String>, ty: ValueType) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            ty,
            optional: true,
        });
        self
    }

    /// Constrain the result type. Unconstrained results accept anything.
    pub fn returns(mut self, ty: ValueType) -> Self {
        self.result = Some(ty);
        self
    }
}

impl ArgsChecker for MethodSpec {
    fn check_args(&self, args: &[Value]) -> Result<(), CheckError> {
        for (i, param) in self.params.iter().enumerate() {
            match args.get(i) {
                None => {
                    if !param.optional {
                        return Err(CheckError(format!("value.{} is missing", param.name)));
                    }
                }
                Some(value) => {
                    if !param.ty.matches(value) {
                        return Err(CheckError(format!(
                            "value.{}: {} is not a {}",
                            param.name,
                            value,
                            param.ty.name()
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

impl ResultChecker for MethodSpec {
    fn check_result(&self, value: &Value) -> Result<(), CheckError> {
        if let Some(ty) = self.result {
            if !ty.matches(value) {
                return Err(CheckError(format!(
                    "value: {} is not a {}",
                    value,
                    ty.name()
                )));
            }
        }
        Ok(())
    }
}

/// The built-in interface descriptor: an ordered map of method signatures.
///
/// ```
/// use patchbay::{InterfaceSchema, MethodSpec, ValueType};
///
/// let calc = InterfaceSchema::new()
///     .method(
///         "add",
///         MethodSpec::new()
///             .param("x", ValueType::Number)
///             .param("y", ValueType::Number)
///             .returns(ValueType::Number),
///     );
/// ```
#[derive(Debug, Clone, Default)]
pub struct InterfaceSchema {
    methods: BTreeMap<String, Arc<MethodSpec>>,
}

impl InterfaceSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a method signature. A later signature under the same name
    /// replaces the earlier one.
    pub fn method(mut self, name: impl Into<String>, spec: MethodSpec) -> Self {
        self.methods.insert(name.into(), Arc::new(spec));
        self
    }
}

impl InterfaceChecker for InterfaceSchema {
    fn method_names(&self) -> Vec<String> {
        self.methods.keys().cloned().collect()
    }

    fn args_checker(&self, meth: &str) -> Option<Arc<dyn ArgsChecker>> {
        self.methods
            .get(meth)
            .map(|spec| spec.clone() as Arc<dyn ArgsChecker>)
    }

    fn result_checker(&self, meth: &str) -> Option<Arc<dyn ResultChecker>> {
        self.methods
            .get(meth)
            .map(|spec| spec.clone() as Arc<dyn ResultChecker>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn calc() -> InterfaceSchema {
        InterfaceSchema::new().method(
            "add",
            MethodSpec::new()
                .param("x", ValueType::Number)
                .param("y", ValueType::Number)
                .returns(ValueType::Number),
        )
    }

    #[test]
    fn missing_argument_names_the_parameter() {
        let checker = calc().args_checker("add").unwrap();
        let err = checker.check_args(&[]).unwrap_err();
        assert_eq!(err.0, "value.x is missing");

        let err = checker.check_args(&[json!(1)]).unwrap_err();
        assert_eq!(err.0, "value.y is missing");
    }

    #[test]
    fn wrong_type_names_the_expected_type() {
        let checker = calc().args_checker("add").unwrap();
        let err = checker.check_args(&[json!("hello"), json!(5)]).unwrap_err();
        assert!(err.0.contains("not a number"), "got: {}", err.0);
        assert!(err.0.contains("value.x"), "got: {}", err.0);
    }

    #[test]
    fn extra_trailing_arguments_pass() {
        let checker = calc().args_checker("add").unwrap();
        checker
            .check_args(&[json!(10), json!(9), json!(8)])
            .unwrap();
    }

    #[test]
    fn optional_parameter_may_be_absent_but_is_type_checked() {
        let schema = InterfaceSchema::new().method(
            "greet",
            MethodSpec::new()
                .param("name", ValueType::String)
                .optional_param("suffix", ValueType::String),
        );
        let checker = schema.args_checker("greet").unwrap();
        checker.check_args(&[json!("World")]).unwrap();
        checker.check_args(&[json!("World"), json!("!")]).unwrap();
        let err = checker
            .check_args(&[json!("World"), json!(42)])
            .unwrap_err();
        assert!(err.0.contains("not a string"), "got: {}", err.0);
    }

    #[test]
    fn unknown_method_has_no_checker() {
        assert!(calc().args_checker("additionify").is_none());
        assert!(calc().result_checker("additionify").is_none());
    }

    #[test]
    fn result_checker_rejects_mismatched_value() {
        let checker = calc().result_checker("add").unwrap();
        checker.check_result(&json!(9)).unwrap();
        let err = checker.check_result(&json!("nine")).unwrap_err();
        assert!(err.0.contains("not a number"), "got: {}", err.0);
    }

    #[test]
    fn method_names_are_stable_and_sorted() {
        let schema = InterfaceSchema::new()
            .method("sub", MethodSpec::new())
            .method("add", MethodSpec::new());
        assert_eq!(schema.method_names(), vec!["add", "sub"]);
    }
}
