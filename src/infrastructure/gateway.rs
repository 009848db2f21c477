use crate::config::GatewayConfig;
use crate::domain::ids::{OrderId, PayoutId};
use crate::domain::payout::{Payout, SettlementOutcome};
use crate::domain::ports::{
    DisbursementStatus, PaymentGateway, PaymentOutcome, PaymentRequest, RawNotification,
    VerifiedEvent,
};
use crate::error::{EscrowError, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub const STATE_COMPLETED: &str = "COMPLETED";
pub const STATE_FAILED: &str = "FAILED";
pub const CODE_PAYMENT_SUCCESS: &str = "PAYMENT_SUCCESS";
pub const CODE_PAYMENT_ERROR: &str = "PAYMENT_ERROR";

/// Value the gateway puts in the `Authorization` header of its callbacks:
/// lowercase hex SHA-256 of `username:password`.
pub fn callback_authorization(username: &str, password: &str) -> String {
    let digest = Sha256::digest(format!("{username}:{password}").as_bytes());
    hex::encode(digest)
}

/// Callback body sent by the gateway when a collection settles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub data: Option<CallbackData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackData {
    pub merchant_transaction_id: Option<String>,
    pub transaction_id: Option<String>,
    pub state: Option<String>,
    pub response_code: Option<String>,
}

impl CallbackPayload {
    pub fn for_order(order_id: OrderId, transaction_id: &str, success: bool) -> Self {
        let (state, code) = if success {
            (STATE_COMPLETED, CODE_PAYMENT_SUCCESS)
        } else {
            (STATE_FAILED, CODE_PAYMENT_ERROR)
        };
        Self {
            data: Some(CallbackData {
                merchant_transaction_id: Some(order_id.to_string()),
                transaction_id: Some(transaction_id.to_string()),
                state: Some(state.to_string()),
                response_code: Some(code.to_string()),
            }),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Scripted behavior for the next disbursement of one payout.
#[derive(Debug, Clone)]
pub enum DisbursementScript {
    Decline(String),
    /// The provider call itself errors out.
    ProviderError(String),
    /// The call never returns in time. When `recorded` is set the provider
    /// did act on it and reports that outcome on a later status query.
    Hang { recorded: Option<SettlementOutcome> },
}

/// A stand-in for the real payment provider.
///
/// Verifies callbacks against the configured webhook credentials and settles
/// payouts locally, optionally declining a configurable share at random.
#[derive(Clone)]
pub struct SimulatedGateway {
    config: GatewayConfig,
    initiate_delay: Arc<RwLock<Option<Duration>>>,
    scripts: Arc<RwLock<HashMap<PayoutId, DisbursementScript>>>,
    outcomes: Arc<RwLock<HashMap<PayoutId, SettlementOutcome>>>,
}

impl SimulatedGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            initiate_delay: Arc::default(),
            scripts: Arc::default(),
            outcomes: Arc::default(),
        }
    }

    /// Builds a callback for an order signed with the configured credentials.
    pub fn signed_callback(
        &self,
        order_id: OrderId,
        transaction_id: &str,
        success: bool,
    ) -> Result<RawNotification> {
        Ok(RawNotification {
            authorization: callback_authorization(
                &self.config.webhook_username,
                &self.config.webhook_password,
            ),
            body: CallbackPayload::for_order(order_id, transaction_id, success).to_json()?,
        })
    }

    pub async fn script(&self, payout_id: PayoutId, script: DisbursementScript) {
        self.scripts.write().await.insert(payout_id, script);
    }

    /// The provider reports an outcome it did not return at the time.
    pub async fn record_outcome(&self, payout_id: PayoutId, outcome: SettlementOutcome) {
        self.outcomes.write().await.insert(payout_id, outcome);
    }

    pub async fn set_initiate_delay(&self, delay: Option<Duration>) {
        *self.initiate_delay.write().await = delay;
    }

    fn roll_decline(&self) -> bool {
        self.config.failure_rate > 0.0 && rand::random::<f64>() < self.config.failure_rate
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn initiate(&self, request: PaymentRequest) -> Result<String> {
        let delay = *self.initiate_delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        debug!(order_id = %request.order_id, amount = request.amount.0, "Initiating collection");
        Ok(format!(
            "{}?merchantOrderId={}&amount={}&redirectUrl={}",
            self.config.checkout_base_url, request.order_id, request.amount.0, request.return_url
        ))
    }

    fn authenticate_notification(&self, notification: &RawNotification) -> Result<VerifiedEvent> {
        let expected = callback_authorization(
            &self.config.webhook_username,
            &self.config.webhook_password,
        );
        if !notification
            .authorization
            .trim()
            .eq_ignore_ascii_case(&expected)
        {
            return Err(EscrowError::Authentication(
                "Invalid webhook credentials or signature".to_string(),
            ));
        }

        let payload: CallbackPayload = serde_json::from_str(&notification.body).map_err(|e| {
            EscrowError::InvalidOperation(format!("Malformed payment callback: {e}"))
        })?;
        let data = payload.data.ok_or_else(|| {
            EscrowError::InvalidOperation("Payment callback has no data".to_string())
        })?;

        let succeeded = data.state.as_deref() == Some(STATE_COMPLETED)
            && data.response_code.as_deref() == Some(CODE_PAYMENT_SUCCESS);
        let outcome = if succeeded {
            PaymentOutcome::Succeeded
        } else {
            PaymentOutcome::Failed {
                code: data
                    .response_code
                    .clone()
                    .unwrap_or_else(|| "UNKNOWN".to_string()),
            }
        };

        Ok(VerifiedEvent {
            merchant_reference: data.merchant_transaction_id,
            transaction_id: data.transaction_id,
            outcome,
        })
    }

    async fn disburse(&self, payout: &Payout) -> Result<SettlementOutcome> {
        let script = self.scripts.write().await.remove(&payout.id);
        let outcome = match script {
            Some(DisbursementScript::ProviderError(message)) => {
                return Err(EscrowError::Gateway(message));
            }
            Some(DisbursementScript::Hang { recorded }) => {
                if let Some(outcome) = recorded {
                    self.outcomes.write().await.insert(payout.id, outcome);
                }
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return Err(EscrowError::Gateway("provider never answered".to_string()));
            }
            Some(DisbursementScript::Decline(reason)) => SettlementOutcome::Failed { reason },
            None if self.roll_decline() => {
                warn!(payout_id = %payout.id, "Simulated disbursement declined");
                SettlementOutcome::Failed {
                    reason: "Payment processing failed".to_string(),
                }
            }
            None => {
                let id = payout.id.to_string();
                SettlementOutcome::Paid {
                    reference: format!("PAY-{}-{}", Utc::now().timestamp_millis(), &id[..8]),
                }
            }
        };
        self.outcomes
            .write()
            .await
            .insert(payout.id, outcome.clone());
        Ok(outcome)
    }

    async fn disbursement_status(&self, payout_id: PayoutId) -> Result<DisbursementStatus> {
        Ok(match self.outcomes.read().await.get(&payout_id) {
            Some(outcome) => DisbursementStatus::Resolved(outcome.clone()),
            None => DisbursementStatus::Unknown,
        })
    }
}
