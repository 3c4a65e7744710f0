#![allow(dead_code)]

mod flaky;

pub use flaky::FlakyStore;

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use foodhub_orderservice::{
    api::payments::{
        ChargeStatus, ChargeVerification, GatewayError, PaymentGateway, RefundReceipt,
        RefundRequest,
    },
    app_state::AppState,
    middleware::Actor,
    models::{
        ActorRole, ApprovalStatus, CreateDriverEntity, CreateRestaurantEntity, DeliveryType,
        DriverEntity, OrderEntity, RestaurantEntity,
    },
    services::orders::{self, PlaceOrder, PlaceOrderItem},
    store::{MemoryStore, Store},
};
use parking_lot::Mutex;

/// Payment gateway whose answers are scripted per charge reference.
#[derive(Default)]
pub struct ScriptedGateway {
    charges: Mutex<HashMap<String, ChargeVerification>>,
    refunds: Mutex<Vec<RefundRequest>>,
    unreachable: AtomicBool,
    fail_refunds: AtomicBool,
}

impl ScriptedGateway {
    pub fn succeed(&self, charge_ref: &str, amount_cents: i64) {
        self.script(charge_ref, ChargeStatus::Succeeded, amount_cents);
    }

    pub fn script(&self, charge_ref: &str, status: ChargeStatus, amount_cents: i64) {
        self.charges.lock().insert(
            charge_ref.to_string(),
            ChargeVerification {
                status,
                amount_cents,
            },
        );
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn set_refunds_failing(&self, failing: bool) {
        self.fail_refunds.store(failing, Ordering::SeqCst);
    }

    pub fn refunds(&self) -> Vec<RefundRequest> {
        self.refunds.lock().clone()
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn verify_charge(&self, charge_ref: &str) -> Result<ChargeVerification, GatewayError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(GatewayError::Unreachable("connection refused".into()));
        }
        self.charges
            .lock()
            .get(charge_ref)
            .cloned()
            .ok_or_else(|| GatewayError::BadResponse(format!("unknown charge {charge_ref}")))
    }

    async fn refund(&self, request: RefundRequest) -> Result<RefundReceipt, GatewayError> {
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(GatewayError::BadResponse("status 500".into()));
        }
        let reference = format!("re_{}_{}", request.order_id, request.restaurant_id);
        self.refunds.lock().push(request);
        Ok(RefundReceipt { reference })
    }
}

pub struct Fixture {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<ScriptedGateway>,
}

impl Fixture {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(ScriptedGateway::default());
        let state = AppState::new(store.clone(), gateway.clone());
        Self {
            state,
            store,
            gateway,
        }
    }

    /// Fixture whose state talks to the returned [`FlakyStore`], which wraps
    /// the same memory store as `store`.
    pub fn flaky() -> (Self, Arc<FlakyStore>) {
        let store = Arc::new(MemoryStore::new());
        let flaky = Arc::new(FlakyStore::new(store.clone()));
        let gateway = Arc::new(ScriptedGateway::default());
        let state = AppState::new(flaky.clone(), gateway.clone());
        (
            Self {
                state,
                store,
                gateway,
            },
            flaky,
        )
    }

    pub async fn restaurant(&self, owner_id: i32, name: &str) -> RestaurantEntity {
        self.store
            .insert_restaurant(CreateRestaurantEntity {
                owner_id,
                name: name.to_string(),
                address: format!("{name} Street 1"),
            })
            .await
            .unwrap()
    }

    pub async fn driver(&self, approval_status: ApprovalStatus, is_available: bool) -> DriverEntity {
        self.store
            .insert_driver(CreateDriverEntity {
                approval_status,
                is_available,
            })
            .await
            .unwrap()
    }

    pub async fn online_driver(&self) -> DriverEntity {
        self.driver(ApprovalStatus::Approved, true).await
    }

    /// Places an order; `lines` are `(restaurant_id, unit_price_cents, quantity)`.
    pub async fn place(
        &self,
        customer_id: i32,
        delivery_type: DeliveryType,
        lines: &[(i32, i64, i32)],
    ) -> OrderEntity {
        let items = lines
            .iter()
            .enumerate()
            .map(|(i, (restaurant_id, unit_price_cents, quantity))| PlaceOrderItem {
                dish_id: i as i32 + 1,
                restaurant_id: *restaurant_id,
                name: format!("Dish {}", i + 1),
                unit_price_cents: *unit_price_cents,
                quantity: *quantity,
            })
            .collect();

        orders::place_order(
            &self.state,
            customer_id,
            PlaceOrder {
                delivery_type,
                delivery_address: Some("42 Elm Road".into()),
                delivery_phone: Some("555-0100".into()),
                special_instructions: None,
                items,
            },
        )
        .await
        .unwrap()
    }

    /// Scripts a successful charge for the order total and confirms it.
    pub async fn pay(&self, order: &OrderEntity) -> OrderEntity {
        let charge_ref = format!("ch_{}", order.id);
        self.gateway.succeed(&charge_ref, order.total_cents);
        orders::confirm_payment(&self.state, order.id, &charge_ref)
            .await
            .unwrap()
            .order
    }

    pub async fn order(&self, id: i32) -> OrderEntity {
        self.store.get_order(id).await.unwrap().unwrap()
    }
}

pub fn customer(id: i32) -> Actor {
    Actor {
        role: ActorRole::Customer,
        id,
    }
}

pub fn owner(id: i32) -> Actor {
    Actor {
        role: ActorRole::Owner,
        id,
    }
}

pub fn driver(id: i32) -> Actor {
    Actor {
        role: ActorRole::Driver,
        id,
    }
}
