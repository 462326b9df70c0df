//! Diagnostic values and the process-wide reporter.
//!
//! Diagnostics are plain values: a category, a source span, and a
//! pre-rendered detail string. The evaluator signals failure through
//! [`Failed`], a zero-sized marker; the diagnostics themselves accumulate in
//! the [`Reporter`]. Speculative code paths (overload probing,
//! macro-argument discovery) record the diagnostic count before they run and
//! truncate back to it on rollback.

use std::fmt;

use strum::{Display, IntoStaticStr};

use crate::node::Span;

/// Marker for a failed compilation step whose diagnostics have already been
/// reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Failed;

/// Result alias used throughout the compiler core.
pub type CResult<T> = Result<T, Failed>;

/// Diagnostic categories.
///
/// The `Display` form is the stable, user-visible name of the category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    // --- Lexical ---
    InvalidInteger,
    InvalidFloat,
    InvalidChar,
    UnterminatedStringLiteral,

    // --- Parsing ---
    FirstListElementMustBeAtom,
    FirstListElementMustBeSymbol,
    NoEmptyLists,
    UnexpectedElement,
    UnbalancedParenthesis,
    UnableToParseForm,
    IncorrectNumberOfArgs,
    IncorrectMinimumNumberOfArgs,

    // --- Naming ---
    NotInScope,
    VariableNotInScope,
    RedefinitionOfVariable,
    RedeclarationOfFunctionOrMacro,
    RedeclarationOfStruct,
    RedeclarationOfEnum,
    FunctionHasSameParamsAsMacro,
    MacroHasSameParamsAsFunction,

    // --- Typing ---
    IncorrectType,
    IncorrectReturnType,
    TypeNotInScope,
    EnumTypeMustBeInteger,
    BitfieldMustHaveIntegerType,
    ReturnTypesCannotBeArrays,
    CannotTakeAddressOfNonLvalue,
    CannotModifyConstVariable,

    // --- Overloading ---
    FunctionNotInScope,
    OverloadedFunctionOrMacroNotInScope,
    OverloadedFunctionOrMacroNotInScopeWithClosest,

    // --- Initialization ---
    MustHaveInitialiserForType,
    MustHaveInitialiserForConstType,
    MustHaveInitialiserForImpliedType,
    HasBothExternAndInitialiser,

    // --- Structure ---
    FieldDoesNotExistInStruct,
    TypeNotAllowedInStruct,
    StructContainsPadding,
    NonNullPointerInGlobalStructDeclaration,
    ApplyMustTakePointerToStructAsFirstArgument,

    // --- Flow ---
    GotoWillCrossDeclaration,
    LabelNotInScope,
    CannotOnceTheLastOpenFile,

    // --- Linkage / modules ---
    InvalidAttribute,
    InvalidModuleName,
    CannotLinkModules,
    CannotFindModule,
    ModuleDoesNotProvideForms,
    OnlyVarAndStructPermitted,

    // --- Macros ---
    NoCoreFormNameInMacro,
    CoreFormCannotBeOverridden,
    DNodeHasNoString,
    VoidMustBeTheOnlyParameter,
    VarArgsMustBeLastParameter,
    MacroExecutionNotAvailable,
}

/// A single reported diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub span: Span,
    /// Pre-rendered detail text, or empty when the category is
    /// self-explanatory.
    pub detail: String,
}

impl Diagnostic {
    pub fn new(kind: ErrorKind, span: Span) -> Self {
        Self {
            kind,
            span,
            detail: String::new(),
        }
    }

    pub fn with_detail(kind: ErrorKind, span: Span, detail: impl Into<String>) -> Self {
        Self {
            kind,
            span,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: error: {}", self.span.begin_line, self.span.begin_column, self.kind)?;
        if !self.detail.is_empty() {
            write!(f, ": {}", self.detail)?;
        }
        Ok(())
    }
}

/// Ordered collection of diagnostics for a compilation session.
///
/// The count/truncate pair is the rollback mechanism for speculative
/// evaluation: exactly one trailing `OverloadedFunctionOrMacroNotInScope`
/// (or its `WithClosest` variant) means "try another interpretation";
/// anything else is user-visible.
#[derive(Debug, Default)]
pub struct Reporter {
    diagnostics: Vec<Diagnostic>,
    pub filename: String,
}

impl Reporter {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            diagnostics: Vec::new(),
            filename: filename.into(),
        }
    }

    /// Appends a diagnostic and returns `Failed` for `?`-style propagation.
    pub fn report(&mut self, diagnostic: Diagnostic) -> Failed {
        self.diagnostics.push(diagnostic);
        Failed
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics.len()
    }

    /// Drops every diagnostic reported after `count`.
    pub fn truncate(&mut self, count: usize) {
        self.diagnostics.truncate(count);
    }

    /// Removes and returns every diagnostic reported after `count`,
    /// preserving order.
    pub fn take_from(&mut self, count: usize) -> Vec<Diagnostic> {
        self.diagnostics.split_off(count)
    }

    pub fn pop_last(&mut self) -> Option<Diagnostic> {
        self.diagnostics.pop()
    }

    pub fn extend(&mut self, diagnostics: Vec<Diagnostic>) {
        self.diagnostics.extend(diagnostics);
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// True when the only diagnostic past `count` is a retryable overload
    /// failure, meaning the caller may attempt an alternative resolution.
    pub fn only_overload_failure_since(&self, count: usize) -> bool {
        self.diagnostics.len() == count + 1
            && matches!(
                self.diagnostics[count].kind,
                ErrorKind::OverloadedFunctionOrMacroNotInScope
                    | ErrorKind::OverloadedFunctionOrMacroNotInScopeWithClosest
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_drops_later_diagnostics() {
        let mut reporter = Reporter::new("test.ka");
        reporter.report(Diagnostic::new(ErrorKind::NotInScope, Span::default()));
        let mark = reporter.error_count();
        reporter.report(Diagnostic::new(ErrorKind::IncorrectType, Span::default()));
        reporter.truncate(mark);
        assert_eq!(reporter.error_count(), 1);
        assert_eq!(reporter.diagnostics()[0].kind, ErrorKind::NotInScope);
    }

    #[test]
    fn overload_failure_is_retryable() {
        let mut reporter = Reporter::new("test.ka");
        let mark = reporter.error_count();
        reporter.report(Diagnostic::new(
            ErrorKind::OverloadedFunctionOrMacroNotInScope,
            Span::default(),
        ));
        assert!(reporter.only_overload_failure_since(mark));
        reporter.report(Diagnostic::new(ErrorKind::IncorrectType, Span::default()));
        assert!(!reporter.only_overload_failure_since(mark));
    }
}
