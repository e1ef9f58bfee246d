//! Identifier resolution and static typing.
//!
//! Checking turns a parsed [`Expr`] into a resolved [`Node`] tree whose column references are
//! schema keys, and infers the simpletype of the derived column. A `None` type marks an
//! expression that is always null (the `null` literal) and unifies with anything.

use tabula_model::{Schema, SimpleType, Value};

use crate::error::{FormulaError, FormulaResult};
use crate::functions::Function;
use crate::parser::{BinaryOp, Expr, UnaryOp};

type Ty = Option<SimpleType>;

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Node {
    Literal(Value),
    Column(String),
    Unary {
        op: UnaryOp,
        expr: Box<Node>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    Scalar {
        func: Function,
        args: Vec<Node>,
    },
    /// `slot` indexes the per-partition aggregate cache.
    Aggregate {
        slot: usize,
        func: Function,
        args: Vec<Node>,
    },
}

pub(crate) struct Checked {
    pub root: Node,
    pub ty: Ty,
    pub references: Vec<String>,
    pub aggregate_slots: usize,
}

pub(crate) fn check(expr: &Expr, schema: &Schema) -> FormulaResult<Checked> {
    let mut checker = Checker {
        schema,
        references: Vec::new(),
        aggregate_slots: 0,
        in_aggregate: false,
    };
    let (root, ty) = checker.check(expr)?;
    Ok(Checked {
        root,
        ty,
        references: checker.references,
        aggregate_slots: checker.aggregate_slots,
    })
}

struct Checker<'a> {
    schema: &'a Schema,
    references: Vec<String>,
    aggregate_slots: usize,
    in_aggregate: bool,
}

impl Checker<'_> {
    fn check(&mut self, expr: &Expr) -> FormulaResult<(Node, Ty)> {
        match expr {
            Expr::Number(n) => Ok((Node::Literal(Value::finite(*n)), Some(SimpleType::Numeric))),
            Expr::Text(s) => Ok((Node::Literal(Value::from(s.as_str())), Some(SimpleType::String))),
            Expr::Boolean(b) => Ok((Node::Literal(Value::from(*b)), Some(SimpleType::Boolean))),
            Expr::Null => Ok((Node::Literal(Value::Null), None)),
            Expr::Column(identifier) => {
                let key = self.schema.resolve(identifier)?;
                let ty = self.schema.get(key).map(|c| c.simpletype);
                if !self.references.iter().any(|r| r == key) {
                    self.references.push(key.to_string());
                }
                Ok((Node::Column(key.to_string()), ty))
            }
            Expr::UnaryOp { op, expr } => {
                let (inner, ty) = self.check(expr)?;
                let result = match op {
                    UnaryOp::Negate => expect(ty, SimpleType::Numeric, "unary -")?,
                    UnaryOp::Not => expect(ty, SimpleType::Boolean, "not")?,
                };
                Ok((
                    Node::Unary {
                        op: *op,
                        expr: Box::new(inner),
                    },
                    Some(result),
                ))
            }
            Expr::BinaryOp { op, left, right } => {
                let (l, lt) = self.check(left)?;
                let (r, rt) = self.check(right)?;
                let ty = binary_type(*op, lt, rt)?;
                Ok((
                    Node::Binary {
                        op: *op,
                        left: Box::new(l),
                        right: Box::new(r),
                    },
                    ty,
                ))
            }
            Expr::Call { name, args } => self.check_call(name, args),
        }
    }

    fn check_call(&mut self, name: &str, args: &[Expr]) -> FormulaResult<(Node, Ty)> {
        let func =
            Function::lookup(name).ok_or_else(|| FormulaError::UnknownFunction(name.to_string()))?;
        func.check_arity(args.len())?;

        if func.is_aggregate() {
            if self.in_aggregate {
                return Err(FormulaError::Type(format!(
                    "aggregate {} cannot be nested inside another aggregate",
                    func.name()
                )));
            }
            self.in_aggregate = true;
            let checked = self.check_args(args);
            self.in_aggregate = false;
            let (nodes, types) = checked?;

            let ty = match func {
                Function::Sum | Function::Mean | Function::Median => {
                    expect(types[0], SimpleType::Numeric, func.name())?;
                    Some(SimpleType::Numeric)
                }
                Function::Ratio => {
                    for ty in &types {
                        expect(*ty, SimpleType::Numeric, func.name())?;
                    }
                    Some(SimpleType::Numeric)
                }
                Function::Min | Function::Max => types[0],
                _ => Some(SimpleType::Numeric),
            };
            let slot = self.aggregate_slots;
            self.aggregate_slots += 1;
            return Ok((
                Node::Aggregate {
                    slot,
                    func,
                    args: nodes,
                },
                ty,
            ));
        }

        let (nodes, types) = self.check_args(args)?;
        let ty = match func {
            Function::If => {
                expect(types[0], SimpleType::Boolean, "if condition")?;
                unify(types[1..].iter().copied(), "if branches")?
            }
            Function::Abs | Function::Round => {
                for ty in &types {
                    expect(*ty, SimpleType::Numeric, func.name())?;
                }
                Some(SimpleType::Numeric)
            }
            Function::IsNull => Some(SimpleType::Boolean),
            Function::Coalesce => unify(types.iter().copied(), "coalesce arguments")?,
            Function::Year | Function::Month | Function::Day => {
                expect(types[0], SimpleType::Datetime, func.name())?;
                Some(SimpleType::Numeric)
            }
            aggregate => {
                return Err(FormulaError::Type(format!(
                    "{} is an aggregate",
                    aggregate.name()
                )))
            }
        };
        Ok((Node::Scalar { func, args: nodes }, ty))
    }

    fn check_args(&mut self, args: &[Expr]) -> FormulaResult<(Vec<Node>, Vec<Ty>)> {
        let mut nodes = Vec::with_capacity(args.len());
        let mut types = Vec::with_capacity(args.len());
        for arg in args {
            let (node, ty) = self.check(arg)?;
            nodes.push(node);
            types.push(ty);
        }
        Ok((nodes, types))
    }
}

/// Require `ty` to be `want` (or always-null), returning `want`.
fn expect(ty: Ty, want: SimpleType, context: &str) -> FormulaResult<SimpleType> {
    match ty {
        None => Ok(want),
        Some(actual) if actual == want => Ok(want),
        Some(actual) => Err(FormulaError::Type(format!(
            "{context} expects {want} operands, found {actual}"
        ))),
    }
}

fn unify(types: impl IntoIterator<Item = Ty>, context: &str) -> FormulaResult<Ty> {
    let mut unified: Ty = None;
    for ty in types.into_iter().flatten() {
        match unified {
            None => unified = Some(ty),
            Some(prev) if prev == ty => {}
            Some(prev) => {
                return Err(FormulaError::Type(format!(
                    "{context} mix {prev} and {ty}"
                )))
            }
        }
    }
    Ok(unified)
}

fn binary_type(op: BinaryOp, left: Ty, right: Ty) -> FormulaResult<Ty> {
    let context = format!("operator {}", op.symbol());
    let ty = match op {
        BinaryOp::Add
        | BinaryOp::Subtract
        | BinaryOp::Multiply
        | BinaryOp::Divide
        | BinaryOp::Modulo
        | BinaryOp::Power => {
            expect(left, SimpleType::Numeric, &context)?;
            expect(right, SimpleType::Numeric, &context)?;
            SimpleType::Numeric
        }
        BinaryOp::Concat => SimpleType::String,
        BinaryOp::Equals
        | BinaryOp::NotEquals
        | BinaryOp::Less
        | BinaryOp::LessEquals
        | BinaryOp::Greater
        | BinaryOp::GreaterEquals => {
            unify([left, right], &format!("{context} cannot compare values that"))?;
            SimpleType::Boolean
        }
        BinaryOp::And | BinaryOp::Or => {
            expect(left, SimpleType::Boolean, &context)?;
            expect(right, SimpleType::Boolean, &context)?;
            SimpleType::Boolean
        }
    };
    Ok(Some(ty))
}
