#![deny(unsafe_code)]

pub mod error;
pub mod identity;

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::NaiveDate;
use plotledger_adapters::{
    InMemoryOwnershipDirectory, MockCheckoutProvider, TracingAuditSink, TracingNotificationSink,
};
use plotledger_core::{
    AudienceResolution, AudienceSpec, BillingEngine, BillingEngineConfig, BillingError, Charge,
    ChargeDraft, ChargeProgress, ChargeType, ChargeView, Collaborators, CreateCharge, Invoice,
    LedgerEntry, LedgerEntryKind, LedgerFilter, OwnershipDirectory, Payment, PlotId,
    ReconcileOutcome, StoreConfig, UserBalance, UserId, WebhookDelivery, WebhookOutcome,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::warn;
use uuid::Uuid;

pub use error::{ApiError, ServiceError};
pub use identity::Identity;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub storage: StoreConfig,
    /// JSON file with users and plot ownerships per tenant.
    pub directory_seed: Option<PathBuf>,
    pub provider_name: String,
    pub checkout_base_url: String,
    /// Webhook bodies are only signature-checked when this is set.
    pub webhook_secret: Option<String>,
    pub max_participants: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            storage: StoreConfig::Memory,
            directory_seed: None,
            provider_name: "mockpay".to_string(),
            checkout_base_url: "http://127.0.0.1:8095".to_string(),
            webhook_secret: None,
            max_participants: BillingEngineConfig::default().max_participants,
        }
    }
}

#[derive(Clone)]
pub struct ServiceState {
    pub engine: Arc<BillingEngine>,
}

impl ServiceState {
    pub async fn bootstrap(config: ServiceConfig) -> Result<Self, ServiceError> {
        let directory = match &config.directory_seed {
            Some(path) => InMemoryOwnershipDirectory::load(path)?,
            None => {
                warn!("no directory seed configured; every tenant starts without members");
                InMemoryOwnershipDirectory::new()
            }
        };
        Self::bootstrap_with_directory(config, Arc::new(directory)).await
    }

    pub async fn bootstrap_with_directory(
        config: ServiceConfig,
        directory: Arc<dyn OwnershipDirectory>,
    ) -> Result<Self, ServiceError> {
        let ServiceConfig {
            storage,
            provider_name,
            checkout_base_url,
            webhook_secret,
            max_participants,
            ..
        } = config;
        let provider = MockCheckoutProvider::new(provider_name, checkout_base_url, webhook_secret);
        let collaborators = Collaborators {
            directory,
            notifier: Arc::new(TracingNotificationSink),
            audit: Arc::new(TracingAuditSink),
            provider: Arc::new(provider),
        };
        let engine = BillingEngine::bootstrap(
            BillingEngineConfig {
                store: storage,
                max_participants,
            },
            collaborators,
        )
        .await?;
        Ok(Self {
            engine: Arc::new(engine),
        })
    }
}

pub fn build_router(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/charges", post(create_charge))
        .route("/v1/charges/:id", get(get_charge))
        .route("/v1/charges/:id/publish", post(publish_charge))
        .route("/v1/charges/:id/close", post(close_charge))
        .route("/v1/charges/:id/participants", put(replace_participants))
        .route("/v1/charges/:id/progress", get(charge_progress))
        .route("/v1/charges/:id/invoices", get(charge_invoices))
        .route("/v1/invoices/:id/cancel", post(cancel_invoice))
        .route("/v1/payments", post(initiate_payment))
        .route("/v1/payments/webhook", post(payment_webhook))
        .route("/v1/users/:id/balance", get(user_balance))
        .route("/v1/users/:id/invoices", get(user_invoices))
        .route("/v1/ledger/entries", get(ledger_entries))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    store_backend: &'static str,
    provider: String,
}

async fn health(State(state): State<ServiceState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "plotledger-service",
        store_backend: state.engine.store_backend(),
        provider: state.engine.provider_name().to_string(),
    })
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum AudienceMode {
    Plots,
    UsersPrimaryPlots,
    AllActiveUsersPrimaryPlots,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateChargeBody {
    title: String,
    #[serde(rename = "type")]
    charge_type: ChargeType,
    unit_amount_cents: i64,
    due_date: NaiveDate,
    audience: AudienceMode,
    plot_ids: Option<Vec<PlotId>>,
    user_ids: Option<Vec<UserId>>,
    #[serde(default)]
    include_chairman: bool,
    #[serde(default)]
    publish_now: bool,
}

impl CreateChargeBody {
    fn into_request(self) -> Result<CreateCharge, BillingError> {
        let audience = match self.audience {
            AudienceMode::Plots => AudienceSpec::Plots {
                plot_ids: self
                    .plot_ids
                    .ok_or_else(|| BillingError::validation("plotIds is required for PLOTS"))?,
            },
            AudienceMode::UsersPrimaryPlots => AudienceSpec::Users {
                user_ids: self.user_ids.ok_or_else(|| {
                    BillingError::validation("userIds is required for USERS_PRIMARY_PLOTS")
                })?,
            },
            AudienceMode::AllActiveUsersPrimaryPlots => AudienceSpec::AllActiveResidents {
                include_chairman: self.include_chairman,
            },
        };
        Ok(CreateCharge {
            draft: ChargeDraft {
                title: self.title,
                charge_type: self.charge_type,
                unit_amount_cents: self.unit_amount_cents,
                due_date: self.due_date,
            },
            audience,
            publish_now: self.publish_now,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChargeCreatedResponse {
    charge: Charge,
    participants: AudienceResolution,
    published: bool,
}

async fn create_charge(
    State(state): State<ServiceState>,
    Identity(actor): Identity,
    body: Result<Json<CreateChargeBody>, JsonRejection>,
) -> Result<(StatusCode, Json<ChargeCreatedResponse>), ApiError> {
    let Json(body) = body?;
    let created = state
        .engine
        .create_charge(&actor, body.into_request()?)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(ChargeCreatedResponse {
            charge: created.charge,
            participants: created.participants,
            published: created.published,
        }),
    ))
}

async fn get_charge(
    State(state): State<ServiceState>,
    Identity(actor): Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<ChargeView>, ApiError> {
    Ok(Json(state.engine.charge(&actor, id).await?))
}

async fn publish_charge(
    State(state): State<ServiceState>,
    Identity(actor): Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let outcome = state.engine.publish_charge(&actor, id).await?;
    Ok(Json(json!({ "ok": true, "issued": outcome.issued })))
}

async fn close_charge(
    State(state): State<ServiceState>,
    Identity(actor): Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let outcome = state.engine.close_charge(&actor, id).await?;
    Ok(Json(
        json!({ "ok": true, "alreadyClosed": outcome.already_closed }),
    ))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParticipantsBody {
    user_ids: Vec<UserId>,
}

async fn replace_participants(
    State(state): State<ServiceState>,
    Identity(actor): Identity,
    Path(id): Path<Uuid>,
    body: Result<Json<ParticipantsBody>, JsonRejection>,
) -> Result<Json<ReconcileOutcome>, ApiError> {
    let Json(body) = body?;
    Ok(Json(
        state
            .engine
            .replace_participants(&actor, id, &body.user_ids)
            .await?,
    ))
}

async fn charge_progress(
    State(state): State<ServiceState>,
    Identity(actor): Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<ChargeProgress>, ApiError> {
    Ok(Json(state.engine.charge_progress(&actor, id).await?))
}

#[derive(Debug, Clone, Serialize)]
struct InvoicesResponse {
    invoices: Vec<Invoice>,
}

async fn charge_invoices(
    State(state): State<ServiceState>,
    Identity(actor): Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<InvoicesResponse>, ApiError> {
    let invoices = state.engine.charge_invoices(&actor, id).await?;
    Ok(Json(InvoicesResponse { invoices }))
}

#[derive(Debug, Clone, Serialize)]
struct CanceledResponse {
    invoice: Invoice,
}

async fn cancel_invoice(
    State(state): State<ServiceState>,
    Identity(actor): Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<CanceledResponse>, ApiError> {
    let invoice = state.engine.cancel_invoice(&actor, id).await?;
    Ok(Json(CanceledResponse { invoice }))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitiatePaymentBody {
    invoice_id: Uuid,
    idempotency_key: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct PaymentResponse {
    payment: Payment,
    checkout_url: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    reused: bool,
}

async fn initiate_payment(
    State(state): State<ServiceState>,
    Identity(actor): Identity,
    body: Result<Json<InitiatePaymentBody>, JsonRejection>,
) -> Result<(StatusCode, Json<PaymentResponse>), ApiError> {
    let Json(body) = body?;
    let initiated = state
        .engine
        .initiate_payment(&actor, body.invoice_id, &body.idempotency_key)
        .await?;
    let status = if initiated.reused {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(PaymentResponse {
            payment: initiated.payment,
            checkout_url: initiated.checkout_url,
            reused: initiated.reused,
        }),
    ))
}

/// Provider callback. The raw body is needed for the signature check, so it
/// is parsed only after verification.
async fn payment_webhook(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    state.engine.verify_webhook(&body, signature)?;
    let delivery: WebhookDelivery = serde_json::from_slice(&body)
        .map_err(|err| ApiError::bad_request(format!("malformed webhook body: {err}")))?;

    match state.engine.apply_webhook(&delivery).await? {
        WebhookOutcome::Duplicate => Ok(Json(json!({ "ok": true, "duplicate": true }))),
        WebhookOutcome::Recorded { payment, .. } => Ok(Json(json!({
            "ok": true,
            "paymentStatus": payment.status.as_str(),
        }))),
    }
}

async fn user_balance(
    State(state): State<ServiceState>,
    Identity(actor): Identity,
    Path(user_id): Path<UserId>,
) -> Result<Json<UserBalance>, ApiError> {
    Ok(Json(state.engine.user_balance(&actor, user_id).await?))
}

async fn user_invoices(
    State(state): State<ServiceState>,
    Identity(actor): Identity,
    Path(user_id): Path<UserId>,
) -> Result<Json<InvoicesResponse>, ApiError> {
    let invoices = state.engine.user_invoices(&actor, user_id).await?;
    Ok(Json(InvoicesResponse { invoices }))
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LedgerEntriesQuery {
    charge_id: Option<Uuid>,
    invoice_id: Option<Uuid>,
    plot_id: Option<PlotId>,
    kind: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct LedgerEntriesResponse {
    total: usize,
    items: Vec<LedgerEntry>,
}

fn parse_kind_filter(kind: Option<&str>) -> Result<Option<LedgerEntryKind>, ApiError> {
    match kind {
        None => Ok(None),
        Some(raw) => LedgerEntryKind::parse(raw).map(Some).ok_or_else(|| {
            ApiError::bad_request(format!(
                "invalid kind '{raw}'; expected one of: ACCRUAL, PAYMENT, ADJUSTMENT"
            ))
        }),
    }
}

async fn ledger_entries(
    State(state): State<ServiceState>,
    Identity(actor): Identity,
    Query(query): Query<LedgerEntriesQuery>,
) -> Result<Json<LedgerEntriesResponse>, ApiError> {
    let filter = LedgerFilter {
        charge_id: query.charge_id,
        invoice_id: query.invoice_id,
        plot_id: query.plot_id,
        kind: parse_kind_filter(query.kind.as_deref())?,
    };
    let items = state.engine.ledger_entries(&actor, &filter).await?;
    Ok(Json(LedgerEntriesResponse {
        total: items.len(),
        items,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use plotledger_core::sign_webhook_body;
    use tower::ServiceExt;

    const SECRET: &str = "whsec-test";

    const SEED: &str = r#"{
        "tenants": {
            "t1": {
                "users": [
                    {"userId": 1, "role": "CHAIRMAN"},
                    {"userId": 2, "role": "RESIDENT"},
                    {"userId": 3, "role": "RESIDENT"},
                    {"userId": 4, "role": "RESIDENT", "active": false}
                ],
                "ownerships": [
                    {"plotId": 10, "userId": 1, "isPrimary": true, "fromDate": "2020-01-01"},
                    {"plotId": 20, "userId": 2, "isPrimary": true, "fromDate": "2020-01-01"},
                    {"plotId": 30, "userId": 3, "isPrimary": true, "fromDate": "2020-01-01"},
                    {"plotId": 40, "userId": 4, "isPrimary": true, "fromDate": "2020-01-01"}
                ]
            }
        }
    }"#;

    const CHAIRMAN: (&str, i64, &str) = ("t1", 1, "CHAIRMAN");
    const RESIDENT: (&str, i64, &str) = ("t1", 2, "RESIDENT");

    async fn app() -> Router {
        let directory = InMemoryOwnershipDirectory::from_json(SEED).unwrap();
        let state = ServiceState::bootstrap_with_directory(
            ServiceConfig {
                webhook_secret: Some(SECRET.to_string()),
                ..ServiceConfig::default()
            },
            Arc::new(directory),
        )
        .await
        .unwrap();
        build_router(state)
    }

    fn request(
        method: &str,
        uri: &str,
        identity: Option<(&str, i64, &str)>,
        body: Option<Value>,
    ) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some((tenant, user, role)) = identity {
            builder = builder
                .header("x-tenant-id", tenant)
                .header("x-user-id", user.to_string())
                .header("x-user-role", role);
        }
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    fn webhook(body: &Value, signed: bool) -> Request<Body> {
        let raw = body.to_string();
        let mut builder = Request::builder()
            .method("POST")
            .uri("/v1/payments/webhook")
            .header("content-type", "application/json");
        if signed {
            builder = builder.header(SIGNATURE_HEADER, sign_webhook_body(SECRET, raw.as_bytes()));
        }
        builder.body(Body::from(raw)).unwrap()
    }

    async fn create_charge_for_plots(app: &Router, plots: &[i64], publish_now: bool) -> String {
        let (status, body) = send(
            app,
            request(
                "POST",
                "/v1/charges",
                Some(CHAIRMAN),
                Some(json!({
                    "title": "Road repair",
                    "type": "ONE_TIME",
                    "unitAmountCents": 10_000,
                    "dueDate": "2026-12-01",
                    "audience": "PLOTS",
                    "plotIds": plots,
                    "publishNow": publish_now,
                })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["charge"]["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_reports_backend_and_provider() {
        let app = app().await;
        let (status, body) = send(&app, request("GET", "/v1/health", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["storeBackend"], "memory");
        assert_eq!(body["provider"], "mockpay");
    }

    #[tokio::test]
    async fn all_active_audience_is_published_and_tracked() {
        let app = app().await;
        let (status, body) = send(
            &app,
            request(
                "POST",
                "/v1/charges",
                Some(CHAIRMAN),
                Some(json!({
                    "title": "Gate maintenance",
                    "type": "MONTHLY",
                    "unitAmountCents": 2_500,
                    "dueDate": "2026-11-30",
                    "audience": "ALL_ACTIVE_USERS_PRIMARY_PLOTS",
                    "publishNow": true,
                })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["published"], true);
        assert_eq!(body["participants"]["includedPlots"], json!([20, 30]));
        assert_eq!(body["charge"]["status"], "PUBLISHED");
        let id = body["charge"]["id"].as_str().unwrap().to_string();

        let (status, progress) = send(
            &app,
            request("GET", &format!("/v1/charges/{id}/progress"), Some(RESIDENT), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(progress["participantsCount"], 2);
        assert_eq!(progress["totalCents"], 5_000);
        assert_eq!(progress["progressPercent"], 0);

        let (status, body) = send(
            &app,
            request("GET", &format!("/v1/charges/{id}/invoices"), Some(RESIDENT), None),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "UNAUTHORIZED");

        let (status, _) = send(
            &app,
            request(
                "GET",
                &format!("/v1/charges/{id}/progress"),
                Some(("t2", 1, "CHAIRMAN")),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn payment_round_trip_through_webhook() {
        let app = app().await;
        let charge_id = create_charge_for_plots(&app, &[20], true).await;

        let (_, body) = send(
            &app,
            request(
                "GET",
                &format!("/v1/charges/{charge_id}/invoices"),
                Some(CHAIRMAN),
                None,
            ),
        )
        .await;
        let invoice_id = body["invoices"][0]["id"].as_str().unwrap().to_string();

        let pay = json!({ "invoiceId": invoice_id, "idempotencyKey": "attempt-1" });
        let (status, first) = send(
            &app,
            request("POST", "/v1/payments", Some(RESIDENT), Some(pay.clone())),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(first["checkoutUrl"].as_str().unwrap().contains("/checkout/"));
        assert!(first.get("reused").is_none());
        let payment_id = first["payment"]["id"].as_str().unwrap().to_string();

        let (status, again) =
            send(&app, request("POST", "/v1/payments", Some(RESIDENT), Some(pay))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(again["reused"], true);
        assert_eq!(again["payment"]["id"], payment_id.as_str());

        let event = json!({
            "eventId": "evt-1",
            "paymentId": payment_id,
            "tenantId": "t1",
            "status": "SUCCEEDED",
        });
        let (status, _) = send(&app, webhook(&event, false)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(&app, webhook(&event, true)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert_eq!(body["paymentStatus"], "SUCCESS");

        let (status, body) = send(&app, webhook(&event, true)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["duplicate"], true);

        let (status, balance) = send(
            &app,
            request("GET", "/v1/users/2/balance", Some(RESIDENT), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(balance["paidCents"], 10_000);
        assert_eq!(balance["outstandingCents"], 0);

        let (status, body) = send(
            &app,
            request(
                "POST",
                &format!("/v1/invoices/{invoice_id}/cancel"),
                Some(CHAIRMAN),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVOICE_HAS_PAYMENTS");

        let (status, body) = send(
            &app,
            request(
                "GET",
                &format!("/v1/ledger/entries?chargeId={charge_id}&kind=PAYMENT"),
                Some(CHAIRMAN),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);
        assert_eq!(body["items"][0]["amountCents"], 10_000);
    }

    #[tokio::test]
    async fn roster_edits_follow_charge_state() {
        let app = app().await;
        let id = create_charge_for_plots(&app, &[20, 30], false).await;

        let publish = format!("/v1/charges/{id}/publish");
        let (status, _) = send(&app, request("POST", &publish, Some(CHAIRMAN), None)).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = send(&app, request("POST", &publish, Some(CHAIRMAN), None)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "CHARGE_ALREADY_PUBLISHED");

        let participants = format!("/v1/charges/{id}/participants");
        let (status, body) = send(
            &app,
            request(
                "PUT",
                &participants,
                Some(CHAIRMAN),
                Some(json!({ "userIds": [2, 4] })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["removed"], json!([30]));
        assert_eq!(body["skippedUsers"][0]["userId"], 4);
        assert_eq!(body["skippedUsers"][0]["reason"], "INACTIVE");

        let close = format!("/v1/charges/{id}/close");
        let (status, _) = send(&app, request("POST", &close, Some(CHAIRMAN), None)).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = send(&app, request("POST", &close, Some(CHAIRMAN), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["alreadyClosed"], true);

        let (status, body) = send(
            &app,
            request(
                "PUT",
                &participants,
                Some(CHAIRMAN),
                Some(json!({ "userIds": [2, 3] })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "CHARGE_CLOSED");
    }

    #[tokio::test]
    async fn malformed_requests_are_rejected() {
        let app = app().await;

        let (status, body) = send(&app, request("GET", "/v1/users/2/balance", None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "UNAUTHENTICATED");

        let (status, body) = send(
            &app,
            request(
                "POST",
                "/v1/charges",
                Some(CHAIRMAN),
                Some(json!({
                    "title": "Road repair",
                    "type": "ONE_TIME",
                    "unitAmountCents": "lots",
                    "dueDate": "2026-12-01",
                    "audience": "PLOTS",
                    "plotIds": [20],
                })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "BAD_REQUEST");

        let (status, body) = send(
            &app,
            request(
                "POST",
                "/v1/charges",
                Some(CHAIRMAN),
                Some(json!({
                    "title": "Road repair",
                    "type": "ONE_TIME",
                    "unitAmountCents": 100,
                    "dueDate": "2026-12-01",
                    "audience": "PLOTS",
                })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION");

        let (status, body) = send(
            &app,
            request(
                "POST",
                "/v1/charges",
                Some(RESIDENT),
                Some(json!({
                    "title": "Road repair",
                    "type": "ONE_TIME",
                    "unitAmountCents": 100,
                    "dueDate": "2026-12-01",
                    "audience": "PLOTS",
                    "plotIds": [20],
                })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "UNAUTHORIZED");

        let (status, _) = send(
            &app,
            request(
                "GET",
                "/v1/ledger/entries?kind=bogus",
                Some(CHAIRMAN),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            Request::builder()
                .method("POST")
                .uri("/v1/payments/webhook")
                .header(
                    SIGNATURE_HEADER,
                    sign_webhook_body(SECRET, b"not json"),
                )
                .body(Body::from("not json"))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
