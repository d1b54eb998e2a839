use std::fmt;

/// Lifecycle of a cached calculator.
///
/// `Uninitialized → CacheCheck → (Loaded | Computing) → Done`. A failed computation
/// leaves the calculator in `Computing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CalculatorState {
    #[default]
    Uninitialized,
    CacheCheck,
    Loaded,
    Computing,
    Done,
}

impl CalculatorState {
    pub(crate) fn advance(&mut self, next: CalculatorState) {
        tracing::trace!(from = %self, to = %next, "Calculator state transition.");
        *self = next;
    }
}

impl fmt::Display for CalculatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CalculatorState::Uninitialized => "uninitialized",
            CalculatorState::CacheCheck => "cache-check",
            CalculatorState::Loaded => "loaded",
            CalculatorState::Computing => "computing",
            CalculatorState::Done => "done",
        };
        f.write_str(name)
    }
}
