//! Error types for parameter specialization.
//!
//! ## Error Hierarchy
//!
//! ```text
//! EngineError (top-level wrapper)
//! ├── ParamError    - User-facing diagnostics; accumulated, the pass continues
//! ├── EvalError     - Failures reported by the constant/type evaluator
//! └── InternalError - Invariant violations; abort the pass
//! ```
//!
//! `ParamError`s are collected into the pass output so one run surfaces every
//! problem. An `InternalError` means the engine's own bookkeeping is
//! inconsistent and continuing would produce a wrong design.

use thiserror::Error;

use crate::{ModuleId, NodeId, Span};

// ============================================================================
// Evaluation Errors
// ============================================================================

/// Errors from folding an expression to a constant or type.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("at {span}: expression is not constant: {detail}")]
    NotConstant { span: Span, detail: String },

    #[error("at {span}: expected a type")]
    NotAType { span: Span },

    #[error("at {span}: division by zero")]
    DivisionByZero { span: Span },

    #[error("at {span}: type parameter '{name}' has no value")]
    UnboundType { span: Span, name: String },

    #[error("at {span}: circular reference through '{name}'")]
    Circular { span: Span, name: String },

    #[error("at {span}: unsupported operation: {detail}")]
    Unsupported { span: Span, detail: String },
}

impl EvalError {
    pub fn span(&self) -> Span {
        match self {
            EvalError::NotConstant { span, .. }
            | EvalError::NotAType { span }
            | EvalError::DivisionByZero { span }
            | EvalError::UnboundType { span, .. }
            | EvalError::Circular { span, .. }
            | EvalError::Unsupported { span, .. } => *span,
        }
    }
}

// ============================================================================
// Parameter Errors
// ============================================================================

/// Diagnostics reported against an instantiation site or parameter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamError {
    /// A value binding did not fold to a constant.
    #[error("at {span}: can't convert defparam value to constant: param '{name}' of '{site}'")]
    ConstantRequired {
        span: Span,
        name: String,
        site: String,
        #[source]
        cause: EvalError,
    },

    /// A type binding for a type parameter is not a type.
    #[error("at {span}: parameter type pin value isn't a type: param type '{name}' of '{site}'")]
    ParamTypeNotType { span: Span, name: String, site: String },

    /// A type binding names something that is not a type parameter.
    #[error("at {span}: parameter type variable isn't a type: param '{name}'")]
    ParamTypeVarNotType { span: Span, name: String },

    /// A type binding violates the `parameter type <kind>` constraint.
    #[error(
        "at {span}: parameter type '{name}' expected a(n) {expected} but was given '{actual}'"
    )]
    ForwardTypeViolation {
        span: Span,
        name: String,
        expected: &'static str,
        actual: String,
    },

    #[error("at {span}: parameter without default value is never given value: '{name}'")]
    ParamWithoutDefault { span: Span, name: String },

    #[error("at {span}: parameter type without default value is never given value: '{name}'")]
    ParamTypeWithoutDefault { span: Span, name: String },

    #[error("at {span}: class parameter without default value is never given value: '{name}' of class '{class}'")]
    ClassParamWithoutDefault {
        span: Span,
        name: String,
        class: String,
    },

    #[error("at {span}: class parameter type without default value is never given value: '{name}' of class '{class}'")]
    ClassParamTypeWithoutDefault {
        span: Span,
        name: String,
        class: String,
    },

    #[error(
        "at {span}: exceeded maximum recursion depth {max} specializing '{module}'; use a larger recursion limit"
    )]
    RecursionDepthExceeded {
        span: Span,
        module: String,
        max: u32,
    },

    #[error("at {span}: cannot find matching hierarchical block wrapper for '{module}' ({key})")]
    WrapperNotFound {
        span: Span,
        module: String,
        key: String,
    },

    #[error(
        "at {span}: parameter '{name}' of hierarchical block '{module}' must be a constant or a type"
    )]
    UnsupportedHierParam {
        span: Span,
        name: String,
        module: String,
    },

    #[error("at {span}: port '{port}' expects '{expected}' interface but pin connects '{actual}' interface")]
    InterfaceMismatch {
        span: Span,
        port: String,
        expected: String,
        actual: String,
    },

    #[error("at {span}: interface port '{port}' is not an interface")]
    IfacePortNotInterface { span: Span, port: String },

    #[error("at {span}: interface port '{port}' is not connected to interface/modport pin expression")]
    IfacePortUnconnected { span: Span, port: String },

    /// Any other evaluator failure while resolving a site.
    #[error(transparent)]
    Evaluation(#[from] EvalError),
}

impl ParamError {
    /// Get the span where this error occurred.
    pub fn span(&self) -> Span {
        match self {
            ParamError::ConstantRequired { span, .. }
            | ParamError::ParamTypeNotType { span, .. }
            | ParamError::ParamTypeVarNotType { span, .. }
            | ParamError::ForwardTypeViolation { span, .. }
            | ParamError::ParamWithoutDefault { span, .. }
            | ParamError::ParamTypeWithoutDefault { span, .. }
            | ParamError::ClassParamWithoutDefault { span, .. }
            | ParamError::ClassParamTypeWithoutDefault { span, .. }
            | ParamError::RecursionDepthExceeded { span, .. }
            | ParamError::WrapperNotFound { span, .. }
            | ParamError::UnsupportedHierParam { span, .. }
            | ParamError::InterfaceMismatch { span, .. }
            | ParamError::IfacePortNotInterface { span, .. }
            | ParamError::IfacePortUnconnected { span, .. } => *span,
            ParamError::Evaluation(e) => e.span(),
        }
    }
}

// ============================================================================
// Internal Errors
// ============================================================================

/// Internal consistency failures. These abort the pass.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InternalError {
    #[error("internal error: specialization key '{key}' already maps to '{existing}'")]
    CacheKeyConflict { key: String, existing: String },

    #[error("internal error: specialization key '{key}' looked up while reserved")]
    ReservedKeyReentered { key: String },

    #[error("internal error: module '{module}' traversed twice")]
    Revisit { module: String },

    #[error("internal error: formal '{name}' of '{module}' missing from clone map")]
    PinNotInCloneMap { name: String, module: String },

    #[error("internal error: unknown module {0}")]
    UnknownModule(ModuleId),

    #[error("internal error: unknown node {0}")]
    UnknownNode(NodeId),

    #[error("internal error: node {0} is not a parameter")]
    NotAParameter(NodeId),

    #[error("internal error: hierarchical block option '{module}' names parameter '{name}' twice")]
    DuplicateHierParam { module: String, name: String },
}

// ============================================================================
// Unified Error
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Param(#[from] ParamError),

    #[error(transparent)]
    Internal(#[from] InternalError),
}

impl From<EvalError> for EngineError {
    fn from(err: EvalError) -> Self {
        EngineError::Param(ParamError::Evaluation(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_error_display_has_location() {
        let err = ParamError::RecursionDepthExceeded {
            span: Span::new(2, 4, 1),
            module: "Node".into(),
            max: 20,
        };
        let msg = err.to_string();
        assert!(msg.starts_with("at 2:4:"));
        assert!(msg.contains("recursion depth 20"));
        assert_eq!(err.span(), Span::new(2, 4, 1));
    }

    #[test]
    fn evaluation_error_keeps_its_span() {
        let eval = EvalError::DivisionByZero {
            span: Span::new(7, 1, 3),
        };
        let err: ParamError = eval.into();
        assert_eq!(err.span(), Span::new(7, 1, 3));
    }

    #[test]
    fn internal_error_display() {
        let err = InternalError::Revisit {
            module: "Top".into(),
        };
        assert_eq!(err.to_string(), "internal error: module 'Top' traversed twice");
    }

    #[test]
    fn engine_error_wraps_both() {
        let e: EngineError = InternalError::UnknownModule(ModuleId::new(3)).into();
        assert!(matches!(e, EngineError::Internal(_)));
        let e: EngineError = EvalError::NotAType {
            span: Span::default(),
        }
        .into();
        assert!(matches!(e, EngineError::Param(ParamError::Evaluation(_))));
    }
}
