//! The constant/type evaluator seam.
//!
//! The engine never folds expressions itself; it asks a [`ConstEvaluator`].
//! Front ends plug their own width-inference engine in here. [`BasicEvaluator`]
//! covers plain parameter arithmetic and is what tests and benches use.

use rustc_hash::FxHashSet;

use deparam_core::{BinaryOp, Design, EvalError, Literal, NodeId, NodeKind, Span, UnaryOp};

/// Folds binding expressions to literals and types.
pub trait ConstEvaluator {
    /// Fold a value expression to a literal.
    fn fold_constant(&mut self, design: &Design, expr: NodeId) -> Result<Literal, EvalError>;

    /// Resolve a type expression to a concrete (non-reference) type node.
    fn fold_type(&mut self, design: &Design, expr: NodeId) -> Result<NodeId, EvalError>;
}

/// Reference evaluator for integer, real and string parameter expressions.
///
/// Integer results take the wider operand's width and are signed only when
/// both operands are; comparisons and logical operators yield one unsigned bit.
#[derive(Debug, Default)]
pub struct BasicEvaluator {
    /// Parameters being folded, to catch `A = B; B = A`.
    active: FxHashSet<NodeId>,
}

impl BasicEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    fn fold(&mut self, design: &Design, id: NodeId) -> Result<Literal, EvalError> {
        let node = design.try_node(id).ok_or_else(|| EvalError::NotConstant {
            span: Span::default(),
            detail: format!("dangling reference {id}"),
        })?;
        let span = node.span;
        match &node.kind {
            NodeKind::Const(lit) => Ok(lit.clone()),
            NodeKind::VarRef(target) => self.fold_param(design, *target, span),
            NodeKind::Unary { op, arg } => {
                let value = self.fold(design, *arg)?;
                unary(*op, &value, span)
            }
            NodeKind::Binary { op, lhs, rhs } => {
                let l = self.fold(design, *lhs)?;
                let r = self.fold(design, *rhs)?;
                binary(*op, &l, &r, span)
            }
            NodeKind::Cond { cond, then, els } => {
                if self.fold(design, *cond)?.is_zero() {
                    self.fold(design, *els)
                } else {
                    self.fold(design, *then)
                }
            }
            _ => Err(EvalError::NotConstant {
                span,
                detail: "not a constant expression".to_string(),
            }),
        }
    }

    fn fold_param(
        &mut self,
        design: &Design,
        target: NodeId,
        span: Span,
    ) -> Result<Literal, EvalError> {
        let NodeKind::Param(param) = &design.node(target).kind else {
            return Err(EvalError::NotConstant {
                span,
                detail: format!(
                    "reference to '{}'",
                    design.node(target).name().unwrap_or("?")
                ),
            });
        };
        let Some(value) = param.value else {
            return Err(EvalError::NotConstant {
                span,
                detail: format!("parameter '{}' has no value", param.name),
            });
        };
        if !self.active.insert(target) {
            return Err(EvalError::Circular {
                span,
                name: param.name.clone(),
            });
        }
        let result = self.fold(design, value);
        self.active.remove(&target);
        result
    }
}

impl ConstEvaluator for BasicEvaluator {
    fn fold_constant(&mut self, design: &Design, expr: NodeId) -> Result<Literal, EvalError> {
        self.active.clear();
        self.fold(design, expr)
    }

    fn fold_type(&mut self, design: &Design, expr: NodeId) -> Result<NodeId, EvalError> {
        let mut seen = FxHashSet::default();
        let mut id = expr;
        loop {
            let node = design.node(id);
            if !seen.insert(id) {
                return Err(EvalError::Circular {
                    span: node.span,
                    name: node.name().unwrap_or("type").to_string(),
                });
            }
            match &node.kind {
                NodeKind::TypeRef(target) => id = *target,
                NodeKind::VarRef(target)
                    if matches!(design.node(*target).kind, NodeKind::ParamType(_)) =>
                {
                    id = *target
                }
                NodeKind::ParamType(p) => match p.default {
                    Some(default) => id = default,
                    None => {
                        return Err(EvalError::UnboundType {
                            span: node.span,
                            name: p.name.clone(),
                        });
                    }
                },
                _ if node.is_type() => return Ok(id),
                _ => return Err(EvalError::NotAType { span: node.span }),
            }
        }
    }
}

fn bool_lit(value: bool) -> Literal {
    Literal::int(value as i128, 1, false)
}

fn unary(op: UnaryOp, value: &Literal, span: Span) -> Result<Literal, EvalError> {
    match (op, value) {
        (UnaryOp::LogicalNot, _) => Ok(bool_lit(value.is_zero())),
        (UnaryOp::Negate, Literal::Real(r)) => Ok(Literal::real(-r.0)),
        (UnaryOp::Negate, Literal::Int { width, signed, .. }) => {
            let v = value.as_i128().unwrap_or_default();
            Ok(Literal::int(v.wrapping_neg(), *width, *signed))
        }
        (UnaryOp::Not, Literal::Int { bits, width, signed }) => {
            Ok(Literal::int(!*bits as i128, *width, *signed))
        }
        _ => Err(EvalError::Unsupported {
            span,
            detail: format!("{op:?} on {}", value.ascii()),
        }),
    }
}

fn binary(op: BinaryOp, l: &Literal, r: &Literal, span: Span) -> Result<Literal, EvalError> {
    match op {
        BinaryOp::LogicalAnd => return Ok(bool_lit(!l.is_zero() && !r.is_zero())),
        BinaryOp::LogicalOr => return Ok(bool_lit(!l.is_zero() || !r.is_zero())),
        _ => {}
    }

    if let (Literal::Str(a), Literal::Str(b)) = (l, r) {
        return match op {
            BinaryOp::Eq => Ok(bool_lit(a == b)),
            BinaryOp::Ne => Ok(bool_lit(a != b)),
            _ => Err(EvalError::Unsupported {
                span,
                detail: format!("string operator '{}'", op.as_str()),
            }),
        };
    }

    if l.is_real() || r.is_real() {
        let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) else {
            return Err(EvalError::Unsupported {
                span,
                detail: format!("operator '{}' on a string", op.as_str()),
            });
        };
        return match op {
            BinaryOp::Add => Ok(Literal::real(a + b)),
            BinaryOp::Sub => Ok(Literal::real(a - b)),
            BinaryOp::Mul => Ok(Literal::real(a * b)),
            BinaryOp::Div if b == 0.0 => Err(EvalError::DivisionByZero { span }),
            BinaryOp::Div => Ok(Literal::real(a / b)),
            BinaryOp::Eq => Ok(bool_lit(a == b)),
            BinaryOp::Ne => Ok(bool_lit(a != b)),
            BinaryOp::Lt => Ok(bool_lit(a < b)),
            BinaryOp::Le => Ok(bool_lit(a <= b)),
            BinaryOp::Gt => Ok(bool_lit(a > b)),
            BinaryOp::Ge => Ok(bool_lit(a >= b)),
            _ => Err(EvalError::Unsupported {
                span,
                detail: format!("real operator '{}'", op.as_str()),
            }),
        };
    }

    let width = l.width().max(r.width());
    let signed = l.is_signed() && r.is_signed();
    let cast = |lit: &Literal| {
        lit.cast_int(width, signed)
            .and_then(|c| c.as_i128())
            .ok_or_else(|| EvalError::Unsupported {
                span,
                detail: format!("operator '{}' on a string", op.as_str()),
            })
    };
    let a = cast(l)?;
    let b = cast(r)?;
    let value = match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div | BinaryOp::Mod if b == 0 => return Err(EvalError::DivisionByZero { span }),
        BinaryOp::Div => a.wrapping_div(b),
        BinaryOp::Mod => a.wrapping_rem(b),
        BinaryOp::Shl | BinaryOp::Shr => {
            let amount = r.as_i128().unwrap_or_default().clamp(0, 127) as u32;
            let base = l.as_i128().unwrap_or_default();
            let shifted = if op == BinaryOp::Shl {
                base.wrapping_shl(amount)
            } else {
                base.wrapping_shr(amount)
            };
            return Ok(Literal::int(shifted, l.width(), l.is_signed()));
        }
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
        BinaryOp::Eq => return Ok(bool_lit(a == b)),
        BinaryOp::Ne => return Ok(bool_lit(a != b)),
        BinaryOp::Lt => return Ok(bool_lit(a < b)),
        BinaryOp::Le => return Ok(bool_lit(a <= b)),
        BinaryOp::Gt => return Ok(bool_lit(a > b)),
        BinaryOp::Ge => return Ok(bool_lit(a >= b)),
        BinaryOp::LogicalAnd => return Ok(bool_lit(a != 0 && b != 0)),
        BinaryOp::LogicalOr => return Ok(bool_lit(a != 0 || b != 0)),
    };
    Ok(Literal::int(value, width, signed))
}
