use crate::domain::{Conversation, Subscription, SubscriptionStatus};
use crate::infrastructure::{
    ConversationRepository, PaymentEvent, PaymentEventEnvelope, PlanRepository, RepositoryError,
    SubscriptionRepository, SubscriptionSnapshot, WebhookEventRepository,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Invoice reason the processor uses for renewals, as opposed to the first charge.
const RENEWAL_BILLING_REASON: &str = "subscription_cycle";

#[derive(Error, Debug)]
pub enum BillingError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("Subscription {0} is missing user metadata")]
    MissingUser(String),
    #[error("No plan matches price {0:?}")]
    UnknownPlan(Option<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied,
    Duplicate,
    Ignored,
}

pub struct BillingService<S, W, P, C>
where
    S: SubscriptionRepository,
    W: WebhookEventRepository,
    P: PlanRepository,
    C: ConversationRepository,
{
    subscription_repo: Arc<S>,
    event_repo: Arc<W>,
    plan_repo: Arc<P>,
    conversation_repo: Arc<C>,
    default_influencer_id: Uuid,
    starting_tokens: i32,
}

impl<S, W, P, C> BillingService<S, W, P, C>
where
    S: SubscriptionRepository,
    W: WebhookEventRepository,
    P: PlanRepository,
    C: ConversationRepository,
{
    pub fn new(
        subscription_repo: Arc<S>,
        event_repo: Arc<W>,
        plan_repo: Arc<P>,
        conversation_repo: Arc<C>,
        default_influencer_id: Uuid,
        starting_tokens: i32,
    ) -> Self {
        Self {
            subscription_repo,
            event_repo,
            plan_repo,
            conversation_repo,
            default_influencer_id,
            starting_tokens,
        }
    }

    /// Apply a verified webhook event at most once per event id.
    pub async fn handle_event(&self, envelope: &PaymentEventEnvelope) -> Result<WebhookOutcome, BillingError> {
        if envelope.event == PaymentEvent::Ignored {
            info!(event_id = %envelope.id, event_type = %envelope.event_type, "Ignoring webhook event");
            return Ok(WebhookOutcome::Ignored);
        }

        if !self.event_repo.record(&envelope.id, &envelope.event_type).await? {
            info!(event_id = %envelope.id, "Webhook event already processed");
            return Ok(WebhookOutcome::Duplicate);
        }

        match self.apply(&envelope.event).await {
            Ok(()) => {
                info!(event_id = %envelope.id, event_type = %envelope.event_type, "Webhook event applied");
                Ok(WebhookOutcome::Applied)
            }
            Err(e) => {
                // Unrecord so the processor's retry gets another attempt.
                if let Err(forget_err) = self.event_repo.forget(&envelope.id).await {
                    error!(event_id = %envelope.id, error = %forget_err, "Failed to unrecord webhook event");
                }
                Err(e)
            }
        }
    }

    async fn apply(&self, event: &PaymentEvent) -> Result<(), BillingError> {
        match event {
            PaymentEvent::SubscriptionCreated(snapshot) => self.subscription_created(snapshot).await,
            PaymentEvent::SubscriptionUpdated(snapshot) => {
                if self
                    .subscription_repo
                    .find_by_external_id(&snapshot.external_id)
                    .await?
                    .is_none()
                {
                    warn!(external_id = %snapshot.external_id, "Update for unknown subscription");
                    return Ok(());
                }
                self.subscription_repo
                    .update_period(&snapshot.external_id, &snapshot.period)
                    .await?;
                Ok(())
            }
            PaymentEvent::SubscriptionDeleted { external_id } => {
                self.subscription_repo
                    .update_status(external_id, SubscriptionStatus::Canceled)
                    .await?;
                Ok(())
            }
            PaymentEvent::InvoicePaymentSucceeded {
                external_subscription_id,
                billing_reason,
            } => {
                if billing_reason.as_deref() != Some(RENEWAL_BILLING_REASON) {
                    // The first invoice is covered by the creation grant.
                    return Ok(());
                }
                self.renewal(external_subscription_id).await
            }
            PaymentEvent::InvoicePaymentFailed {
                external_subscription_id,
            } => {
                self.subscription_repo
                    .update_status(external_subscription_id, SubscriptionStatus::PastDue)
                    .await?;
                Ok(())
            }
            PaymentEvent::Ignored => Ok(()),
        }
    }

    async fn subscription_created(&self, snapshot: &SubscriptionSnapshot) -> Result<(), BillingError> {
        let user_id = snapshot
            .user_id
            .ok_or_else(|| BillingError::MissingUser(snapshot.external_id.clone()))?;
        let plan = match &snapshot.price_id {
            Some(price_id) => self.plan_repo.find_by_stripe_price_id(price_id).await?,
            None => None,
        }
        .ok_or_else(|| BillingError::UnknownPlan(snapshot.price_id.clone()))?;
        let influencer_id = snapshot.influencer_id.unwrap_or(self.default_influencer_id);

        let mut period = snapshot.period.clone();
        if period.status != SubscriptionStatus::Trialing {
            period.status = SubscriptionStatus::Active;
        }

        let subscription = Subscription::new(
            user_id,
            influencer_id,
            plan.id,
            snapshot.external_id.clone(),
            period,
        );
        // The row survives a failed grant; the event ledger gates the grant itself.
        if !self.subscription_repo.create(&subscription).await? {
            info!(external_id = %snapshot.external_id, "Subscription row already present");
        }

        let conversation = self
            .conversation_repo
            .get_or_create(&Conversation::new(user_id, influencer_id, self.starting_tokens))
            .await?;
        self.conversation_repo
            .set_plan(conversation.id, Some(plan.id))
            .await?;
        // Credit last: everything before it is safe to repeat.
        let balance = self
            .conversation_repo
            .credit(conversation.id, plan.token_grant())
            .await?;

        info!(
            external_id = %snapshot.external_id,
            user_id = %user_id,
            plan = %plan.name,
            balance,
            "Subscription created, tokens granted"
        );
        Ok(())
    }

    async fn renewal(&self, external_id: &str) -> Result<(), BillingError> {
        let Some(subscription) = self.subscription_repo.find_by_external_id(external_id).await? else {
            warn!(external_id = %external_id, "Renewal for unknown subscription");
            return Ok(());
        };
        let plan = self.plan_repo.get_by_id(subscription.plan_id).await?;

        let conversation = self
            .conversation_repo
            .get_or_create(&Conversation::new(
                subscription.user_id,
                subscription.influencer_id,
                self.starting_tokens,
            ))
            .await?;
        self.subscription_repo
            .update_status(external_id, SubscriptionStatus::Active)
            .await?;
        let balance = self
            .conversation_repo
            .credit(conversation.id, plan.token_grant())
            .await?;

        info!(external_id = %external_id, balance, "Subscription renewed, tokens granted");
        Ok(())
    }
}
