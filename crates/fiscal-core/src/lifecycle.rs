//! # Invoice Lifecycle
//!
//! The transition table every status change is checked against.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Invoice Lifecycle                                 │
//! │                                                                         │
//! │   ┌─────────┐  sign   ┌─────────┐  ok   ┌────────┐  send  ┌─────────┐  │
//! │   │ Pending │────────►│ Signing │──────►│ Signed │───────►│ Sending │  │
//! │   └────▲────┘         └────┬────┘       └───▲────┘        └────┬────┘  │
//! │        │      revert       │                │     revert       │       │
//! │        └───────────────────┘                └──────────────────┤       │
//! │        ▲                                                       │ ok    │
//! │        │            unconfirmed at restart                     ▼       │
//! │        └──────────────────────────────────────────────── ┌────────┐   │
//! │                                                           │  Sent  │   │
//! │   any non-terminal ──────► ┌──────────┐                  └────────┘   │
//! │                            │ Excluded │   (both terminal)             │
//! │                            └──────────┘                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Day Policy
//! Forward moves (`Pending → Signing`, `Signing → Signed`, `Signed → Sending`,
//! `Sending → Sent`) need an open fiscal day. Reverts and exclusions do not.
//! A `Sending → Sent` reconciliation at restart is exempt because the
//! backend already registered the invoice.

use crate::error::{CoreError, CoreResult};
use crate::types::{DayState, InvoiceStatus};

impl InvoiceStatus {
    /// Statuses reachable from `self` in one step.
    pub fn allowed_targets(&self) -> &'static [InvoiceStatus] {
        use InvoiceStatus::*;
        match self {
            Pending => &[Signing, Excluded],
            Signing => &[Signed, Pending, Excluded],
            Signed => &[Sending, Excluded],
            Sending => &[Sent, Signed, Pending, Excluded],
            Sent | Excluded => &[],
        }
    }

    #[inline]
    pub fn can_transition_to(&self, to: InvoiceStatus) -> bool {
        self.allowed_targets().contains(&to)
    }

    /// `Sent` and `Excluded` absorb every further change.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, InvoiceStatus::Sent | InvoiceStatus::Excluded)
    }

    /// Working states persisted while a backend call is in flight.
    #[inline]
    pub fn is_in_flight(&self) -> bool {
        matches!(self, InvoiceStatus::Signing | InvoiceStatus::Sending)
    }
}

/// Whether `from → to` moves the invoice toward registration.
pub fn is_forward(from: InvoiceStatus, to: InvoiceStatus) -> bool {
    use InvoiceStatus::*;
    matches!(
        (from, to),
        (Pending, Signing) | (Signing, Signed) | (Signed, Sending) | (Sending, Sent)
    )
}

/// Checks a requested transition against the table and the day policy.
///
/// Returns the first violated rule. Nothing is mutated here; the store
/// calls this before writing.
pub fn check_transition(
    invoice_id: &str,
    from: InvoiceStatus,
    to: InvoiceStatus,
    day: DayState,
    reconciled: bool,
) -> CoreResult<()> {
    if !from.can_transition_to(to) {
        return Err(CoreError::InvalidTransition {
            invoice_id: invoice_id.to_string(),
            from,
            to,
        });
    }

    let exempt = reconciled && from == InvoiceStatus::Sending && to == InvoiceStatus::Sent;
    if is_forward(from, to) && day != DayState::Open && !exempt {
        return Err(CoreError::FiscalDayClosed {
            invoice_id: invoice_id.to_string(),
            to,
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_happy_path_is_allowed() {
        let path = [
            InvoiceStatus::Pending,
            InvoiceStatus::Signing,
            InvoiceStatus::Signed,
            InvoiceStatus::Sending,
            InvoiceStatus::Sent,
        ];
        for pair in path.windows(2) {
            assert!(check_transition("a", pair[0], pair[1], DayState::Open, false).is_ok());
        }
    }

    #[test]
    fn test_sent_cannot_revert() {
        let err = check_transition(
            "a",
            InvoiceStatus::Sent,
            InvoiceStatus::Pending,
            DayState::Open,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
    }

    #[test]
    fn test_skipping_a_step_is_rejected() {
        assert!(!InvoiceStatus::Pending.can_transition_to(InvoiceStatus::Sent));
        assert!(!InvoiceStatus::Pending.can_transition_to(InvoiceStatus::Signed));
        assert!(!InvoiceStatus::Signed.can_transition_to(InvoiceStatus::Sent));
    }

    #[test]
    fn test_forward_requires_open_day() {
        let err = check_transition(
            "a",
            InvoiceStatus::Pending,
            InvoiceStatus::Signing,
            DayState::Closed,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::FiscalDayClosed { .. }));

        // Reverts and exclusions are always allowed
        assert!(check_transition(
            "a",
            InvoiceStatus::Signing,
            InvoiceStatus::Pending,
            DayState::Closed,
            false
        )
        .is_ok());
        assert!(check_transition(
            "a",
            InvoiceStatus::Signed,
            InvoiceStatus::Excluded,
            DayState::Closed,
            false
        )
        .is_ok());
    }

    #[test]
    fn test_reconciliation_bypasses_day_check() {
        assert!(check_transition(
            "a",
            InvoiceStatus::Sending,
            InvoiceStatus::Sent,
            DayState::Closed,
            true
        )
        .is_ok());

        // The flag only exempts Sending → Sent
        assert!(check_transition(
            "a",
            InvoiceStatus::Pending,
            InvoiceStatus::Signing,
            DayState::Closed,
            true
        )
        .is_err());
    }

    fn any_status() -> impl Strategy<Value = InvoiceStatus> {
        prop::sample::select(InvoiceStatus::ALL.to_vec())
    }

    fn any_day() -> impl Strategy<Value = DayState> {
        prop_oneof![Just(DayState::Open), Just(DayState::Closed)]
    }

    proptest! {
        /// Drive an invoice with arbitrary requests; only table edges are
        /// ever accepted and terminal states absorb everything.
        #[test]
        fn prop_random_requests_follow_table(
            requests in prop::collection::vec((any_status(), any_day(), any::<bool>()), 0..64)
        ) {
            let mut current = InvoiceStatus::Pending;
            let mut terminal_seen = false;

            for (to, day, reconciled) in requests {
                match check_transition("inv", current, to, day, reconciled) {
                    Ok(()) => {
                        prop_assert!(!terminal_seen);
                        prop_assert!(current.allowed_targets().contains(&to));
                        if to == InvoiceStatus::Sent {
                            prop_assert_eq!(current, InvoiceStatus::Sending);
                        }
                        if is_forward(current, to) && day == DayState::Closed {
                            prop_assert!(reconciled && to == InvoiceStatus::Sent);
                        }
                        current = to;
                        terminal_seen = current.is_terminal();
                    }
                    Err(_) => {}
                }
            }
        }

        #[test]
        fn prop_terminal_states_have_no_exit(from in any_status(), to in any_status()) {
            if from.is_terminal() {
                prop_assert!(!from.can_transition_to(to));
            }
        }
    }
}
