use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use marketbot_core::billing::{assess_charge, ChargeOutcome};
use marketbot_core::domain::bot::BotStatus;
use marketbot_db::repositories::{
    BotRepository, NotificationRepository, RepositoryError, UserRepository,
};

/// The daily fleet sweep. Scheduled exclusively through the periodic job
/// harness at a fixed cadence; nothing in the request path may invoke it,
/// which is what keeps it once-per-period.
pub struct BillingSweep {
    users: Arc<dyn UserRepository>,
    bots: Arc<dyn BotRepository>,
    notifications: Arc<dyn NotificationRepository>,
    bot_daily_cost_cents: i64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub charged_users: u32,
    pub exempted_users: u32,
    pub suspended_bots: u32,
}

impl BillingSweep {
    pub fn new(
        users: Arc<dyn UserRepository>,
        bots: Arc<dyn BotRepository>,
        notifications: Arc<dyn NotificationRepository>,
        bot_daily_cost_cents: i64,
    ) -> Self {
        Self { users, bots, notifications, bot_daily_cost_cents }
    }

    /// One pass over every user with at least one active bot.
    pub async fn run_once(&self) -> Result<SweepSummary, RepositoryError> {
        let mut summary = SweepSummary::default();
        let now = Utc::now();

        for user in self.users.list_with_active_bots().await? {
            let active_bots = self.bots.list_active_for_user(user.id).await?;

            match assess_charge(&user, active_bots.len(), self.bot_daily_cost_cents, now) {
                ChargeOutcome::NoActiveBots => {}
                ChargeOutcome::TrialExempt => {
                    summary.exempted_users += 1;
                }
                ChargeOutcome::Charge { total_cents } => {
                    if self.users.debit(user.id, total_cents).await? {
                        summary.charged_users += 1;
                        info!(
                            event_name = "billing.sweep.charged",
                            user_id = user.id.0,
                            total_cents,
                            active_bots = active_bots.len(),
                            "daily usage charged"
                        );
                    } else {
                        // The balance moved under us since the assessment;
                        // treat it as the suspend case rather than going
                        // negative.
                        summary.suspended_bots +=
                            self.suspend_all(&user.external_id, &active_bots).await?;
                    }
                }
                ChargeOutcome::Suspend { total_cents } => {
                    warn!(
                        event_name = "billing.sweep.insufficient_funds",
                        user_id = user.id.0,
                        total_cents,
                        balance_cents = user.balance_cents,
                        active_bots = active_bots.len(),
                        "balance does not cover usage; suspending bots"
                    );
                    summary.suspended_bots +=
                        self.suspend_all(&user.external_id, &active_bots).await?;
                }
            }
        }

        info!(
            event_name = "billing.sweep.finished",
            charged_users = summary.charged_users,
            exempted_users = summary.exempted_users,
            suspended_bots = summary.suspended_bots,
            "billing sweep finished"
        );
        Ok(summary)
    }

    async fn suspend_all(
        &self,
        owner_external_id: &str,
        active_bots: &[marketbot_core::domain::bot::Bot],
    ) -> Result<u32, RepositoryError> {
        let mut suspended = 0;
        for bot in active_bots {
            self.bots.set_status(bot.id, BotStatus::Stopped).await?;
            self.notifications
                .enqueue(
                    owner_external_id,
                    &format!(
                        "Insufficient balance for bot #{}. The bot has been stopped; top up \
                         your balance to reactivate it.",
                        bot.id.0
                    ),
                )
                .await?;
            suspended += 1;
        }
        Ok(suspended)
    }
}
