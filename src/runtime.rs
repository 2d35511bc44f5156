use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use crate::ast::Statement;
use crate::interpreter::Unwind;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Unknown variable '{name}'")]
    UndefinedVariable { name: String },
    #[error("Unknown field '{field}' for class {class}")]
    UndefinedField { field: String, class: String },
    #[error("Cannot read field '{field}' of a {type_name} value")]
    FieldAccessOnNonInstance {
        field: String,
        type_name: &'static str,
    },
    #[error("Cannot assign field '{field}' of a {type_name} value")]
    FieldAssignOnNonInstance {
        field: String,
        type_name: &'static str,
    },
    #[error("Method '{method}' with {arity} argument(s) not found for class {class}")]
    UnknownMethod {
        method: String,
        arity: usize,
        class: String,
    },
    #[error("Only class instances have methods, got a {type_name} value")]
    NonInstanceReceiver { type_name: &'static str },
    #[error("Operation '{operation}' is not supported for {lhs} and {rhs} values")]
    UnsupportedOperands {
        operation: &'static str,
        lhs: &'static str,
        rhs: &'static str,
    },
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Cannot compare {lhs} and {rhs} values")]
    Incomparable {
        lhs: &'static str,
        rhs: &'static str,
    },
    #[error("Return outside of a method body")]
    ReturnOutsideMethod,
    #[error("Failed to write to the output sink")]
    OutputFailed,
}

/// A name-to-value mapping: the top-level scope, a method's local scope, or
/// an instance's field scope.
pub type Closure = HashMap<String, Value>;

/// Runtime context handed through evaluation. Owns nothing but a borrow of
/// the caller's output sink; `print` and `__str__` dispatch write here.
pub struct Context<'a> {
    output: &'a mut dyn fmt::Write,
}

impl<'a> Context<'a> {
    pub fn new(output: &'a mut dyn fmt::Write) -> Self {
        Self { output }
    }

    pub(crate) fn write_str(&mut self, text: &str) -> Result<(), RuntimeError> {
        self.output
            .write_str(text)
            .map_err(|_| RuntimeError::OutputFailed)
    }
}

/// A method: name, formal parameter names (not counting the implicit
/// `self`), and the body suite wrapped in a `MethodBody` node.
#[derive(Debug, Clone, PartialEq)]
pub struct Method {
    pub name: String,
    pub formal_params: Vec<String>,
    pub body: Statement,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Class {
    name: String,
    methods: Vec<Method>,
    base: Option<Rc<Class>>,
}

impl Class {
    pub fn new(name: String, methods: Vec<Method>, base: Option<Rc<Class>>) -> Self {
        Self {
            name,
            methods,
            base,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> Option<&Rc<Class>> {
        self.base.as_ref()
    }

    /// Linear search of the class's own method list, first name match wins;
    /// on a miss the base chain is searched transitively. Arity is not part
    /// of lookup — callers check it against the actual argument count.
    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods
            .iter()
            .find(|method| method.name == name)
            .or_else(|| self.base.as_ref().and_then(|base| base.method(name)))
    }

    pub fn has_method(&self, name: &str, arity: usize) -> bool {
        self.method(name)
            .is_some_and(|method| method.formal_params.len() == arity)
    }
}

/// An object: a class reference plus a mutable field scope. Fields appear on
/// first assignment. Shared through `Rc<RefCell<_>>` handles, so mutation is
/// visible through every alias.
#[derive(Debug)]
pub struct ClassInstance {
    class: Rc<Class>,
    fields: Closure,
}

impl ClassInstance {
    pub fn new(class: Rc<Class>) -> Self {
        Self {
            class,
            fields: Closure::new(),
        }
    }

    pub fn class(&self) -> &Rc<Class> {
        &self.class
    }

    pub fn fields(&self) -> &Closure {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut Closure {
        &mut self.fields
    }

    pub fn has_method(&self, name: &str, arity: usize) -> bool {
        self.class.has_method(name, arity)
    }
}

/// A tagged runtime value. Primitives carry their payload; classes and
/// instances are shared handles.
#[derive(Clone)]
pub enum Value {
    Number(i64),
    String(String),
    Bool(bool),
    Class(Rc<Class>),
    Instance(Rc<RefCell<ClassInstance>>),
    None,
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Bool(_) => "bool",
            Value::Class(_) => "class",
            Value::Instance(_) => "instance",
            Value::None => "none",
        }
    }

    /// The boolean projection used by `if`, `and`, `or` and `not`: Bool is
    /// itself, Number is truthy iff nonzero, String iff non-empty,
    /// everything else (None, classes, instances) is falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(value) => *value,
            Value::Number(value) => *value != 0,
            Value::String(value) => !value.is_empty(),
            Value::Class(_) | Value::Instance(_) | Value::None => false,
        }
    }

    pub fn as_instance(&self) -> Option<&Rc<RefCell<ClassInstance>>> {
        match self {
            Value::Instance(instance) => Some(instance),
            _ => None,
        }
    }

    /// Renders the value the way `print` and `str(x)` show it. An instance
    /// with a zero-argument `__str__` delegates to it; otherwise an identity
    /// marker derived from the handle address is used.
    pub fn to_output(&self, context: &mut Context<'_>) -> Result<String, RuntimeError> {
        match self {
            Value::Number(value) => Ok(value.to_string()),
            Value::String(value) => Ok(value.clone()),
            Value::Bool(true) => Ok("True".to_string()),
            Value::Bool(false) => Ok("False".to_string()),
            Value::None => Ok("None".to_string()),
            Value::Class(class) => Ok(format!("Class {}", class.name())),
            Value::Instance(instance) => {
                let class = Rc::clone(instance.borrow().class());
                if class.has_method("__str__", 0) {
                    let rendered = call_method(instance, "__str__", Vec::new(), context)?;
                    rendered.to_output(context)
                } else {
                    Ok(format!(
                        "<{} object at {:p}>",
                        class.name(),
                        Rc::as_ptr(instance)
                    ))
                }
            }
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(value) => write!(f, "Number({value})"),
            Value::String(value) => write!(f, "String({value:?})"),
            Value::Bool(value) => write!(f, "Bool({value})"),
            Value::Class(class) => write!(f, "Class({})", class.name()),
            Value::Instance(instance) => match instance.try_borrow() {
                Ok(instance) => write!(f, "Instance({})", instance.class().name()),
                Err(_) => f.write_str("Instance(<borrowed>)"),
            },
            Value::None => f.write_str("None"),
        }
    }
}

/// Host-level identity equality, used by tests and scope bookkeeping.
/// Primitives compare structurally; classes and instances compare by handle.
/// Language-level `==` lives in [`equal`] instead.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            (Value::None, Value::None) => true,
            _ => false,
        }
    }
}

/// Invokes `method` on `receiver` with the given evaluated arguments.
///
/// The method is resolved by name along the base chain and must match the
/// actual argument count. The body runs in a fresh scope holding `self` and
/// the formal parameters; it has no access to the caller's scope.
pub fn call_method(
    receiver: &Rc<RefCell<ClassInstance>>,
    method: &str,
    args: Vec<Value>,
    context: &mut Context<'_>,
) -> Result<Value, RuntimeError> {
    let class = Rc::clone(receiver.borrow().class());
    let Some(found) = class
        .method(method)
        .filter(|found| found.formal_params.len() == args.len())
    else {
        return Err(RuntimeError::UnknownMethod {
            method: method.to_string(),
            arity: args.len(),
            class: class.name().to_string(),
        });
    };

    let mut method_scope = Closure::new();
    method_scope.insert("self".to_string(), Value::Instance(Rc::clone(receiver)));
    for (param, value) in found.formal_params.iter().zip(args) {
        method_scope.insert(param.clone(), value);
    }

    match found.body.execute(&mut method_scope, context) {
        Ok(value) => Ok(value),
        Err(Unwind::Return(value)) => Ok(value),
        Err(Unwind::Error(error)) => Err(error),
    }
}

/// Language-level `==`. Defined for same-typed primitives, two None values,
/// and instance pairs whose left operand has `__eq__` of arity 1.
pub fn equal(lhs: &Value, rhs: &Value, context: &mut Context<'_>) -> Result<bool, RuntimeError> {
    match (lhs, rhs) {
        (Value::None, Value::None) => Ok(true),
        (Value::Number(a), Value::Number(b)) => Ok(a == b),
        (Value::String(a), Value::String(b)) => Ok(a == b),
        (Value::Bool(a), Value::Bool(b)) => Ok(a == b),
        (Value::Instance(a), Value::Instance(_)) if a.borrow().has_method("__eq__", 1) => {
            let verdict = call_method(a, "__eq__", vec![rhs.clone()], context)?;
            Ok(verdict.is_truthy())
        }
        _ => Err(RuntimeError::Incomparable {
            lhs: lhs.type_name(),
            rhs: rhs.type_name(),
        }),
    }
}

/// Language-level `<`. Same domain as [`equal`], with `__lt__` for instances.
pub fn less(lhs: &Value, rhs: &Value, context: &mut Context<'_>) -> Result<bool, RuntimeError> {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => Ok(a < b),
        (Value::String(a), Value::String(b)) => Ok(a < b),
        (Value::Bool(a), Value::Bool(b)) => Ok(a < b),
        (Value::Instance(a), Value::Instance(_)) if a.borrow().has_method("__lt__", 1) => {
            let verdict = call_method(a, "__lt__", vec![rhs.clone()], context)?;
            Ok(verdict.is_truthy())
        }
        _ => Err(RuntimeError::Incomparable {
            lhs: lhs.type_name(),
            rhs: rhs.type_name(),
        }),
    }
}

pub fn not_equal(lhs: &Value, rhs: &Value, context: &mut Context<'_>) -> Result<bool, RuntimeError> {
    Ok(!equal(lhs, rhs, context)?)
}

pub fn greater(lhs: &Value, rhs: &Value, context: &mut Context<'_>) -> Result<bool, RuntimeError> {
    Ok(!less(lhs, rhs, context)? && !equal(lhs, rhs, context)?)
}

pub fn less_or_equal(
    lhs: &Value,
    rhs: &Value,
    context: &mut Context<'_>,
) -> Result<bool, RuntimeError> {
    Ok(less(lhs, rhs, context)? || equal(lhs, rhs, context)?)
}

pub fn greater_or_equal(
    lhs: &Value,
    rhs: &Value,
    context: &mut Context<'_>,
) -> Result<bool, RuntimeError> {
    Ok(!less(lhs, rhs, context)?)
}
