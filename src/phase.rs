//! Request progress markers.

use serde::{Deserialize, Serialize};

/// Progress through the four-call request protocol.
///
/// The phases are totally ordered and a bridge's watermark only ever moves
/// forward through them:
/// 1. None - Nothing has been allowed yet
/// 2. ExecuteAction - The action may run (`begin` may return)
/// 3. BeginResultComprehension - Action processing may complete
/// 4. ExecuteResult - The result may be executed
/// 5. EndRequest - The request may finish
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No progress has been allowed
    #[default]
    None,
    /// The action may execute
    ExecuteAction,
    /// All action processing may complete
    BeginResultComprehension,
    /// The result may execute
    ExecuteResult,
    /// The request may end
    EndRequest,
}

impl Phase {
    /// Every phase, in order.
    pub const ALL: [Phase; 5] = [
        Phase::None,
        Phase::ExecuteAction,
        Phase::BeginResultComprehension,
        Phase::ExecuteResult,
        Phase::EndRequest,
    ];

    /// The following phase; `EndRequest` is its own successor.
    pub fn next(self) -> Phase {
        match self {
            Phase::None => Phase::ExecuteAction,
            Phase::ExecuteAction => Phase::BeginResultComprehension,
            Phase::BeginResultComprehension => Phase::ExecuteResult,
            Phase::ExecuteResult | Phase::EndRequest => Phase::EndRequest,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Phase::EndRequest
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::None => "none",
            Phase::ExecuteAction => "execute_action",
            Phase::BeginResultComprehension => "begin_result_comprehension",
            Phase::ExecuteResult => "execute_result",
            Phase::EndRequest => "end_request",
        };
        f.pad(name)
    }
}
