use std::cell::RefCell;
use std::rc::Rc;

use crate::ast::{BinaryOperator, Comparator, LogicalOperator, Program, Statement};
use crate::runtime::{
    ClassInstance, Closure, Context, RuntimeError, Value, call_method, equal, greater,
    greater_or_equal, less, less_or_equal, not_equal,
};

/// Abrupt-termination channel for the engine.
///
/// `Return` carries a method's result value up to the enclosing
/// `MethodBody`; `Error` carries a runtime fault out to the host. Keeping
/// the two as separate variants is what lets `?` propagate both while the
/// method boundary intercepts only the former.
#[derive(Debug)]
pub enum Unwind {
    Return(Value),
    Error(RuntimeError),
}

impl From<RuntimeError> for Unwind {
    fn from(error: RuntimeError) -> Self {
        Unwind::Error(error)
    }
}

pub type ExecResult = Result<Value, Unwind>;

impl Statement {
    /// Evaluates this node in the given scope. Expression nodes yield their
    /// value; statement nodes yield `None`.
    pub fn execute(&self, closure: &mut Closure, context: &mut Context<'_>) -> ExecResult {
        match self {
            Statement::Integer(value) => Ok(Value::Number(*value)),
            Statement::String(value) => Ok(Value::String(value.clone())),
            Statement::Boolean(value) => Ok(Value::Bool(*value)),
            Statement::None => Ok(Value::None),
            Statement::Variable { names } => Ok(resolve_variable(names, closure)?),
            Statement::Assign { name, value } => {
                let value = value.execute(closure, context)?;
                closure.insert(name.clone(), value.clone());
                Ok(value)
            }
            Statement::FieldAssign {
                object,
                field,
                value,
            } => {
                let target = object.execute(closure, context)?;
                let Some(instance) = target.as_instance().map(Rc::clone) else {
                    return Err(RuntimeError::FieldAssignOnNonInstance {
                        field: field.clone(),
                        type_name: target.type_name(),
                    }
                    .into());
                };
                let value = value.execute(closure, context)?;
                instance
                    .borrow_mut()
                    .fields_mut()
                    .insert(field.clone(), value.clone());
                Ok(value)
            }
            Statement::Print { args } => {
                // Evaluation and emission interleave argument by argument.
                let last = args.len().saturating_sub(1);
                for (index, arg) in args.iter().enumerate() {
                    let value = arg.execute(closure, context)?;
                    let rendered = value.to_output(context)?;
                    context.write_str(&rendered)?;
                    if index != last {
                        context.write_str(" ")?;
                    }
                }
                context.write_str("\n")?;
                Ok(Value::None)
            }
            Statement::BinaryOp { op, left, right } => {
                let lhs = left.execute(closure, context)?;
                let rhs = right.execute(closure, context)?;
                Ok(eval_binary(*op, lhs, rhs, context)?)
            }
            Statement::Comparison { op, left, right } => {
                let lhs = left.execute(closure, context)?;
                let rhs = right.execute(closure, context)?;
                let verdict = match op {
                    Comparator::Equal => equal(&lhs, &rhs, context),
                    Comparator::NotEqual => not_equal(&lhs, &rhs, context),
                    Comparator::LessThan => less(&lhs, &rhs, context),
                    Comparator::LessOrEqual => less_or_equal(&lhs, &rhs, context),
                    Comparator::GreaterThan => greater(&lhs, &rhs, context),
                    Comparator::GreaterOrEqual => greater_or_equal(&lhs, &rhs, context),
                }?;
                Ok(Value::Bool(verdict))
            }
            Statement::Logical { op, left, right } => {
                // Short-circuits, but always yields a Bool.
                let lhs = left.execute(closure, context)?;
                let verdict = match op {
                    LogicalOperator::Or => {
                        lhs.is_truthy() || right.execute(closure, context)?.is_truthy()
                    }
                    LogicalOperator::And => {
                        lhs.is_truthy() && right.execute(closure, context)?.is_truthy()
                    }
                };
                Ok(Value::Bool(verdict))
            }
            Statement::Not(arg) => {
                let value = arg.execute(closure, context)?;
                Ok(Value::Bool(!value.is_truthy()))
            }
            Statement::MethodCall {
                object,
                method,
                args,
            } => {
                let receiver = object.execute(closure, context)?;
                let Some(instance) = receiver.as_instance().map(Rc::clone) else {
                    return Err(RuntimeError::NonInstanceReceiver {
                        type_name: receiver.type_name(),
                    }
                    .into());
                };
                let mut actual = Vec::with_capacity(args.len());
                for arg in args {
                    actual.push(arg.execute(closure, context)?);
                }
                Ok(call_method(&instance, method, actual, context)?)
            }
            Statement::NewInstance { class, args } => {
                let instance = Rc::new(RefCell::new(ClassInstance::new(Rc::clone(class))));
                // Constructor arguments are only evaluated when a matching
                // __init__ exists.
                if class.has_method("__init__", args.len()) {
                    let mut actual = Vec::with_capacity(args.len());
                    for arg in args {
                        actual.push(arg.execute(closure, context)?);
                    }
                    call_method(&instance, "__init__", actual, context)?;
                }
                Ok(Value::Instance(instance))
            }
            Statement::Stringify(arg) => {
                let value = arg.execute(closure, context)?;
                Ok(Value::String(value.to_output(context)?))
            }
            Statement::Compound(statements) => {
                for statement in statements {
                    statement.execute(closure, context)?;
                }
                Ok(Value::None)
            }
            Statement::MethodBody(body) => match body.execute(closure, context) {
                Ok(_) => Ok(Value::None),
                Err(Unwind::Return(value)) => Ok(value),
                Err(error) => Err(error),
            },
            Statement::Return(value) => {
                let value = value.execute(closure, context)?;
                Err(Unwind::Return(value))
            }
            Statement::ClassDef(class) => {
                closure.insert(class.name().to_string(), Value::Class(Rc::clone(class)));
                Ok(Value::None)
            }
            Statement::If {
                condition,
                then_body,
                else_body,
            } => {
                if condition.execute(closure, context)?.is_truthy() {
                    then_body.execute(closure, context)
                } else if let Some(else_body) = else_body {
                    else_body.execute(closure, context)
                } else {
                    Ok(Value::None)
                }
            }
        }
    }
}

impl Program {
    /// Runs the program in the caller's scope. Top-level bindings
    /// (assignments, class names) land in `closure` as a side effect.
    pub fn execute(
        &self,
        closure: &mut Closure,
        context: &mut Context<'_>,
    ) -> Result<Value, RuntimeError> {
        match self.root.execute(closure, context) {
            Ok(value) => Ok(value),
            Err(Unwind::Return(_)) => Err(RuntimeError::ReturnOutsideMethod),
            Err(Unwind::Error(error)) => Err(error),
        }
    }
}

fn resolve_variable(names: &[String], closure: &Closure) -> Result<Value, RuntimeError> {
    let (first, rest) = match names.split_first() {
        Some(parts) => parts,
        None => {
            return Err(RuntimeError::UndefinedVariable {
                name: String::new(),
            });
        }
    };
    let mut value = closure
        .get(first)
        .cloned()
        .ok_or_else(|| RuntimeError::UndefinedVariable {
            name: first.clone(),
        })?;
    for field in rest {
        let instance = match value.as_instance() {
            Some(instance) => Rc::clone(instance),
            None => {
                return Err(RuntimeError::FieldAccessOnNonInstance {
                    field: field.clone(),
                    type_name: value.type_name(),
                });
            }
        };
        let next = instance.borrow().fields().get(field).cloned();
        value = next.ok_or_else(|| RuntimeError::UndefinedField {
            field: field.clone(),
            class: instance.borrow().class().name().to_string(),
        })?;
    }
    Ok(value)
}

fn eval_binary(
    op: BinaryOperator,
    lhs: Value,
    rhs: Value,
    context: &mut Context<'_>,
) -> Result<Value, RuntimeError> {
    match (op, &lhs, &rhs) {
        (BinaryOperator::Add, Value::Number(a), Value::Number(b)) => {
            Ok(Value::Number(a.wrapping_add(*b)))
        }
        (BinaryOperator::Add, Value::String(a), Value::String(b)) => {
            Ok(Value::String(format!("{a}{b}")))
        }
        (BinaryOperator::Add, Value::Instance(a), _) => {
            let instance = Rc::clone(a);
            call_method(&instance, "__add__", vec![rhs.clone()], context)
        }
        (BinaryOperator::Sub, Value::Number(a), Value::Number(b)) => {
            Ok(Value::Number(a.wrapping_sub(*b)))
        }
        (BinaryOperator::Mul, Value::Number(a), Value::Number(b)) => {
            Ok(Value::Number(a.wrapping_mul(*b)))
        }
        (BinaryOperator::Div, Value::Number(_), Value::Number(0)) => {
            Err(RuntimeError::DivisionByZero)
        }
        (BinaryOperator::Div, Value::Number(a), Value::Number(b)) => {
            Ok(Value::Number(a.wrapping_div(*b)))
        }
        _ => Err(RuntimeError::UnsupportedOperands {
            operation: op.symbol(),
            lhs: lhs.type_name(),
            rhs: rhs.type_name(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Class, Method};

    fn int(value: i64) -> Statement {
        Statement::Integer(value)
    }

    fn text(value: &str) -> Statement {
        Statement::String(value.to_string())
    }

    fn variable(names: &[&str]) -> Statement {
        Statement::Variable {
            names: names.iter().map(|name| name.to_string()).collect(),
        }
    }

    fn assign(name: &str, value: Statement) -> Statement {
        Statement::Assign {
            name: name.to_string(),
            value: Box::new(value),
        }
    }

    fn binary(op: BinaryOperator, left: Statement, right: Statement) -> Statement {
        Statement::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn method(name: &str, params: &[&str], body: Vec<Statement>) -> Method {
        Method {
            name: name.to_string(),
            formal_params: params.iter().map(|param| param.to_string()).collect(),
            body: Statement::MethodBody(Box::new(Statement::Compound(body))),
        }
    }

    fn class(name: &str, methods: Vec<Method>) -> Rc<Class> {
        Rc::new(Class::new(name.to_string(), methods, None))
    }

    fn run(statement: &Statement, closure: &mut Closure) -> Result<Value, RuntimeError> {
        let mut sink = String::new();
        let mut context = Context::new(&mut sink);
        match statement.execute(closure, &mut context) {
            Ok(value) => Ok(value),
            Err(Unwind::Return(_)) => Err(RuntimeError::ReturnOutsideMethod),
            Err(Unwind::Error(error)) => Err(error),
        }
    }

    fn run_for_output(statement: &Statement, closure: &mut Closure) -> String {
        let mut sink = String::new();
        let mut context = Context::new(&mut sink);
        statement
            .execute(closure, &mut context)
            .expect("execution should succeed");
        sink
    }

    #[test]
    fn assignment_stores_and_yields_the_value() {
        let mut closure = Closure::new();
        let result = run(&assign("x", int(7)), &mut closure).expect("assignment");
        assert_eq!(result, Value::Number(7));
        assert_eq!(closure.get("x"), Some(&Value::Number(7)));
    }

    #[test]
    fn arithmetic_covers_numbers_and_string_concatenation() {
        let mut closure = Closure::new();
        let sum = binary(BinaryOperator::Add, int(1), binary(BinaryOperator::Mul, int(2), int(3)));
        assert_eq!(run(&sum, &mut closure).expect("sum"), Value::Number(7));

        let concat = binary(BinaryOperator::Add, text("hi"), text(" there"));
        assert_eq!(
            run(&concat, &mut closure).expect("concat"),
            Value::String("hi there".to_string())
        );
    }

    #[test]
    fn mixed_operand_arithmetic_fails() {
        let mut closure = Closure::new();
        let err = run(
            &binary(BinaryOperator::Add, int(1), text("x")),
            &mut closure,
        )
        .expect_err("number + string must fail");
        assert_eq!(
            err,
            RuntimeError::UnsupportedOperands {
                operation: "+",
                lhs: "number",
                rhs: "string"
            }
        );
        let err = run(
            &binary(BinaryOperator::Sub, text("a"), text("b")),
            &mut closure,
        )
        .expect_err("string - string must fail");
        assert_eq!(
            err,
            RuntimeError::UnsupportedOperands {
                operation: "-",
                lhs: "string",
                rhs: "string"
            }
        );
    }

    #[test]
    fn division_by_zero_is_a_runtime_error() {
        let mut closure = Closure::new();
        let err = run(&binary(BinaryOperator::Div, int(4), int(0)), &mut closure)
            .expect_err("division by zero");
        assert_eq!(err, RuntimeError::DivisionByZero);
        assert_eq!(
            run(&binary(BinaryOperator::Div, int(7), int(2)), &mut closure).expect("7 / 2"),
            Value::Number(3)
        );
    }

    #[test]
    fn logical_operators_short_circuit_and_coerce_to_bool() {
        let mut closure = Closure::new();
        // The right operand is an undefined variable; short-circuiting must
        // keep it from being evaluated.
        let or = Statement::Logical {
            op: LogicalOperator::Or,
            left: Box::new(int(5)),
            right: Box::new(variable(&["missing"])),
        };
        assert_eq!(run(&or, &mut closure).expect("or"), Value::Bool(true));

        let and = Statement::Logical {
            op: LogicalOperator::And,
            left: Box::new(int(0)),
            right: Box::new(variable(&["missing"])),
        };
        assert_eq!(run(&and, &mut closure).expect("and"), Value::Bool(false));

        // No short-circuit: the operand value itself is not propagated.
        let and = Statement::Logical {
            op: LogicalOperator::And,
            left: Box::new(int(1)),
            right: Box::new(int(7)),
        };
        assert_eq!(run(&and, &mut closure).expect("and"), Value::Bool(true));

        let not = Statement::Not(Box::new(text("")));
        assert_eq!(run(&not, &mut closure).expect("not"), Value::Bool(true));
    }

    #[test]
    fn undefined_variable_read_fails() {
        let mut closure = Closure::new();
        let err = run(&variable(&["ghost"]), &mut closure).expect_err("undefined variable");
        assert_eq!(
            err,
            RuntimeError::UndefinedVariable {
                name: "ghost".to_string()
            }
        );
    }

    #[test]
    fn dotted_read_through_non_instance_fails() {
        let mut closure = Closure::new();
        closure.insert("n".to_string(), Value::Number(3));
        let err = run(&variable(&["n", "field"]), &mut closure).expect_err("non-instance read");
        assert_eq!(
            err,
            RuntimeError::FieldAccessOnNonInstance {
                field: "field".to_string(),
                type_name: "number"
            }
        );
    }

    #[test]
    fn if_else_follows_truthiness() {
        let mut closure = Closure::new();
        let conditional = Statement::If {
            condition: Box::new(int(0)),
            then_body: Box::new(assign("x", int(1))),
            else_body: Some(Box::new(assign("x", int(2)))),
        };
        run(&conditional, &mut closure).expect("if");
        assert_eq!(closure.get("x"), Some(&Value::Number(2)));

        let no_else = Statement::If {
            condition: Box::new(text("")),
            then_body: Box::new(assign("y", int(1))),
            else_body: None,
        };
        assert_eq!(run(&no_else, &mut closure).expect("if"), Value::None);
        assert!(!closure.contains_key("y"));
    }

    #[test]
    fn print_renders_arguments_space_separated() {
        let mut closure = Closure::new();
        let print = Statement::Print {
            args: vec![int(1), text("hi"), Statement::Boolean(true), Statement::None],
        };
        assert_eq!(run_for_output(&print, &mut closure), "1 hi True None\n");
        let empty = Statement::Print { args: Vec::new() };
        assert_eq!(run_for_output(&empty, &mut closure), "\n");
    }

    #[test]
    fn method_call_binds_self_and_parameters() {
        let squarer = class(
            "Squarer",
            vec![method(
                "square",
                &["x"],
                vec![Statement::Return(Box::new(binary(
                    BinaryOperator::Mul,
                    variable(&["x"]),
                    variable(&["x"]),
                )))],
            )],
        );
        let mut closure = Closure::new();
        let program = Statement::Compound(vec![
            assign(
                "s",
                Statement::NewInstance {
                    class: Rc::clone(&squarer),
                    args: Vec::new(),
                },
            ),
            assign(
                "result",
                Statement::MethodCall {
                    object: Box::new(variable(&["s"])),
                    method: "square".to_string(),
                    args: vec![int(5)],
                },
            ),
        ]);
        run(&program, &mut closure).expect("program");
        assert_eq!(closure.get("result"), Some(&Value::Number(25)));
    }

    #[test]
    fn method_locals_do_not_leak_into_the_caller_scope() {
        let leaky = class(
            "Leaky",
            vec![method("poke", &[], vec![assign("local", int(1))])],
        );
        let mut closure = Closure::new();
        let program = Statement::Compound(vec![
            assign(
                "obj",
                Statement::NewInstance {
                    class: leaky,
                    args: Vec::new(),
                },
            ),
            Statement::MethodCall {
                object: Box::new(variable(&["obj"])),
                method: "poke".to_string(),
                args: Vec::new(),
            },
        ]);
        run(&program, &mut closure).expect("program");
        assert!(!closure.contains_key("local"));
        assert!(!closure.contains_key("self"));
    }

    #[test]
    fn instances_are_shared_through_aliases() {
        let plain = class("Plain", Vec::new());
        let mut closure = Closure::new();
        let program = Statement::Compound(vec![
            assign(
                "a",
                Statement::NewInstance {
                    class: plain,
                    args: Vec::new(),
                },
            ),
            assign("b", variable(&["a"])),
            Statement::FieldAssign {
                object: Box::new(variable(&["b"])),
                field: "tag".to_string(),
                value: Box::new(int(9)),
            },
        ]);
        run(&program, &mut closure).expect("program");
        let through_a = run(&variable(&["a", "tag"]), &mut closure).expect("a.tag");
        assert_eq!(through_a, Value::Number(9));
        assert_eq!(closure.get("a"), closure.get("b"));
    }

    #[test]
    fn new_instance_runs_matching_init_only() {
        let boxed = class(
            "Box",
            vec![method(
                "__init__",
                &["value"],
                vec![Statement::FieldAssign {
                    object: Box::new(variable(&["self"])),
                    field: "value".to_string(),
                    value: Box::new(variable(&["value"])),
                }],
            )],
        );
        let mut closure = Closure::new();
        run(
            &assign(
                "b",
                Statement::NewInstance {
                    class: Rc::clone(&boxed),
                    args: vec![int(7)],
                },
            ),
            &mut closure,
        )
        .expect("construction");
        assert_eq!(
            run(&variable(&["b", "value"]), &mut closure).expect("b.value"),
            Value::Number(7)
        );

        // Arity mismatch: __init__ is skipped and the argument expression is
        // never evaluated, so the undefined variable goes unnoticed.
        let bare = run(
            &Statement::NewInstance {
                class: boxed,
                args: vec![variable(&["missing"]), variable(&["missing"])],
            },
            &mut closure,
        )
        .expect("bare construction");
        assert!(matches!(bare, Value::Instance(_)));
    }

    #[test]
    fn method_call_on_non_instance_fails() {
        let mut closure = Closure::new();
        closure.insert("n".to_string(), Value::Number(1));
        let call = Statement::MethodCall {
            object: Box::new(variable(&["n"])),
            method: "f".to_string(),
            args: Vec::new(),
        };
        let err = run(&call, &mut closure).expect_err("non-instance receiver");
        assert_eq!(
            err,
            RuntimeError::NonInstanceReceiver {
                type_name: "number"
            }
        );
    }

    #[test]
    fn return_outside_a_method_is_an_error() {
        let program = Program {
            root: Statement::Compound(vec![Statement::Return(Box::new(int(1)))]),
            classes: std::collections::HashMap::new(),
        };
        let mut closure = Closure::new();
        let mut sink = String::new();
        let mut context = Context::new(&mut sink);
        let err = program
            .execute(&mut closure, &mut context)
            .expect_err("top-level return");
        assert_eq!(err, RuntimeError::ReturnOutsideMethod);
    }

    #[test]
    fn return_skips_the_rest_of_the_method_body() {
        let early = class(
            "Early",
            vec![method(
                "f",
                &[],
                vec![
                    Statement::Return(Box::new(int(7))),
                    assign("after", int(1)),
                ],
            )],
        );
        let mut closure = Closure::new();
        let program = Statement::Compound(vec![
            assign(
                "obj",
                Statement::NewInstance {
                    class: early,
                    args: Vec::new(),
                },
            ),
            assign(
                "result",
                Statement::MethodCall {
                    object: Box::new(variable(&["obj"])),
                    method: "f".to_string(),
                    args: Vec::new(),
                },
            ),
        ]);
        run(&program, &mut closure).expect("program");
        assert_eq!(closure.get("result"), Some(&Value::Number(7)));
        assert!(!closure.contains_key("after"));
    }

    #[test]
    fn class_definition_binds_the_class_name() {
        let plain = class("Plain", Vec::new());
        let mut closure = Closure::new();
        run(&Statement::ClassDef(Rc::clone(&plain)), &mut closure).expect("class def");
        assert_eq!(closure.get("Plain"), Some(&Value::Class(plain)));
    }

    #[test]
    fn stringify_renders_like_print() {
        let mut closure = Closure::new();
        assert_eq!(
            run(&Statement::Stringify(Box::new(int(42))), &mut closure).expect("str"),
            Value::String("42".to_string())
        );
        assert_eq!(
            run(&Statement::Stringify(Box::new(Statement::None)), &mut closure).expect("str"),
            Value::String("None".to_string())
        );
    }
}
