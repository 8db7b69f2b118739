//! Billing policy: the pure per-user decision applied by the daily sweep.
//!
//! The sweep itself (iteration, persistence, notifications) lives in the
//! server crate; this module only decides what should happen to one user in
//! one period, which keeps the trial/suspension rules unit-testable without
//! a database.

use chrono::{DateTime, Utc};

use crate::domain::user::User;

/// What the sweep should do to one user for the elapsed period.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChargeOutcome {
    /// No active bots, nothing to bill.
    NoActiveBots,
    /// Trial waiver: active trial and exactly one active bot.
    TrialExempt,
    /// Debit the total; balance covers it.
    Charge { total_cents: i64 },
    /// Balance does not cover the total: stop every active bot instead of
    /// letting the balance go negative.
    Suspend { total_cents: i64 },
}

/// Applies the billing rules for one user. `active_bots` is the user's
/// current count of bots in `active` status.
pub fn assess_charge(
    user: &User,
    active_bots: usize,
    bot_daily_cost_cents: i64,
    now: DateTime<Utc>,
) -> ChargeOutcome {
    if active_bots == 0 {
        return ChargeOutcome::NoActiveBots;
    }

    // The waiver covers a single bot only; a second active bot makes the
    // whole fleet billable.
    if user.trial_active(now) && active_bots == 1 {
        return ChargeOutcome::TrialExempt;
    }

    let total_cents = bot_daily_cost_cents.saturating_mul(active_bots as i64);
    if user.balance_cents < total_cents {
        ChargeOutcome::Suspend { total_cents }
    } else {
        ChargeOutcome::Charge { total_cents }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use crate::domain::user::{User, UserId};

    use super::{assess_charge, ChargeOutcome};

    const DAILY_COST: i64 = 5_000;

    fn user(balance_cents: i64, trial_days_left: i64) -> User {
        let now = Utc::now();
        User {
            id: UserId(7),
            external_id: "ext-7".to_string(),
            username: "operator".to_string(),
            password_hash: "hash".to_string(),
            registration_date: now - Duration::days(60),
            trial_end_date: now + Duration::days(trial_days_left),
            balance_cents,
        }
    }

    #[test]
    fn no_active_bots_means_no_charge() {
        let outcome = assess_charge(&user(0, 0), 0, DAILY_COST, Utc::now());
        assert_eq!(outcome, ChargeOutcome::NoActiveBots);
    }

    #[test]
    fn trial_waives_exactly_one_active_bot() {
        let now = Utc::now();
        assert_eq!(assess_charge(&user(0, 3), 1, DAILY_COST, now), ChargeOutcome::TrialExempt);

        // Two bots on trial: the full fleet is billed.
        assert_eq!(
            assess_charge(&user(20_000, 3), 2, DAILY_COST, now),
            ChargeOutcome::Charge { total_cents: 10_000 }
        );
    }

    #[test]
    fn expired_trial_charges_a_single_bot() {
        let outcome = assess_charge(&user(5_000, -1), 1, DAILY_COST, Utc::now());
        assert_eq!(outcome, ChargeOutcome::Charge { total_cents: 5_000 });
    }

    #[test]
    fn short_balance_suspends_instead_of_going_negative() {
        let outcome = assess_charge(&user(4_999, -1), 1, DAILY_COST, Utc::now());
        assert_eq!(outcome, ChargeOutcome::Suspend { total_cents: 5_000 });
    }

    #[test]
    fn multiple_bots_multiply_the_cost() {
        let outcome = assess_charge(&user(15_000, -1), 3, DAILY_COST, Utc::now());
        assert_eq!(outcome, ChargeOutcome::Charge { total_cents: 15_000 });
    }
}
