//! The desired-state decision table.

use meshgate_core::{Action, DesiredState};
use meshgate_objectmatch::MatchVerdict;

/// Map policy state, live existence and the match verdict to one action.
///
/// | state   | live | verdict | action |
/// |---------|------|---------|--------|
/// | Absent  | yes  | any     | Delete |
/// | Absent  | no   | any     | NoOp   |
/// | Present/Exists | no | any | Create |
/// | Exists  | yes  | any     | NoOp   |
/// | Present | yes  | equal   | NoOp   |
/// | Present | yes  | unequal | Update |
/// | Present | yes  | none    | Update |
///
/// Without a verdict equality cannot be shown, so `Present` writes.
pub fn decide(state: DesiredState, live_exists: bool, verdict: Option<&MatchVerdict>) -> Action {
    match (state, live_exists) {
        (DesiredState::Absent, true) => Action::Delete,
        (DesiredState::Absent, false) => Action::NoOp,
        (DesiredState::Present | DesiredState::Exists, false) => Action::Create,
        (DesiredState::Exists, true) => Action::NoOp,
        (DesiredState::Present, true) => match verdict {
            Some(v) if v.is_equal() => Action::NoOp,
            _ => Action::Update,
        },
    }
}
