use std::io::Write;

use chrono::{DateTime, Utc};
use diesel::{
    AsExpression, FromSqlRow, Selectable,
    deserialize::{self, FromSql},
    pg::{Pg, PgValue},
    prelude::{Identifiable, Insertable, Queryable},
    serialize::{self, IsNull, Output, ToSql},
    sql_types::Text,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

/// Raised when a text column holds a value no enum variant maps to.
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} value `{value}`")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Maps a fieldless enum onto a `Text` column using fixed snake_case strings.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl ToSql<Text, Pg> for $name {
            fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
                out.write_all(self.as_str().as_bytes())?;
                Ok(IsNull::No)
            }
        }

        impl FromSql<Text, Pg> for $name {
            fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
                let raw = <String as FromSql<Text, Pg>>::from_sql(bytes)?;
                Ok(raw.parse()?)
            }
        }
    };
}

// Enums

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow, ToSchema,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Completed,
    Cancelled,
    Delivered,
}

text_enum!(OrderStatus {
    Pending => "pending",
    Paid => "paid",
    Completed => "completed",
    Cancelled => "cancelled",
    Delivered => "delivered",
});

impl OrderStatus {
    /// Pending and paid orders are still in flight and cannot be deleted.
    pub fn is_active(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Paid)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow, ToSchema,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryType {
    Delivery,
    Pickup,
}

text_enum!(DeliveryType {
    Delivery => "delivery",
    Pickup => "pickup",
});

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow, ToSchema,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Unclaimed,
    Claimed,
    PickedUp,
    InTransit,
    Delivered,
    Cancelled,
}

text_enum!(DeliveryStatus {
    Unclaimed => "unclaimed",
    Claimed => "claimed",
    PickedUp => "picked_up",
    InTransit => "in_transit",
    Delivered => "delivered",
    Cancelled => "cancelled",
});

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow, ToSchema,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Pending,
    Paid,
}

text_enum!(PayoutStatus {
    Pending => "pending",
    Paid => "paid",
});

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow, ToSchema,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

text_enum!(ApprovalStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow, ToSchema,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Customer,
    Owner,
    Driver,
    Admin,
}

text_enum!(ActorRole {
    Customer => "customer",
    Owner => "owner",
    Driver => "driver",
    Admin => "admin",
});

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow, ToSchema,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewOrder,
    OrderUpdate,
    OrderCompleted,
    OrderCancelled,
    RefundRequest,
    RefundApprove,
    RefundDeny,
}

text_enum!(NotificationKind {
    NewOrder => "new_order",
    OrderUpdate => "order_update",
    OrderCompleted => "order_completed",
    OrderCancelled => "order_cancelled",
    RefundRequest => "refund_request",
    RefundApprove => "refund_approve",
    RefundDeny => "refund_deny",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    Approved,
    Denied,
}

impl std::fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RefundStatus::Pending => "pending",
            RefundStatus::Approved => "approved",
            RefundStatus::Denied => "denied",
        })
    }
}

/// Addressee of a notification or push event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct Recipient {
    pub role: ActorRole,
    pub id: i32,
}

impl Recipient {
    pub fn customer(id: i32) -> Self {
        Self { role: ActorRole::Customer, id }
    }

    pub fn owner(id: i32) -> Self {
        Self { role: ActorRole::Owner, id }
    }

    pub fn driver(id: i32) -> Self {
        Self { role: ActorRole::Driver, id }
    }
}

impl std::fmt::Display for Recipient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.role, self.id)
    }
}

// Restaurants

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::restaurants)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct RestaurantEntity {
    pub id: i32,
    pub owner_id: i32,
    pub name: String,
    pub address: String,
}

#[derive(Insertable, Deserialize, Debug, Clone)]
#[diesel(table_name = crate::schema::restaurants)]
pub struct CreateRestaurantEntity {
    pub owner_id: i32,
    pub name: String,
    pub address: String,
}

// Drivers

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::drivers)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DriverEntity {
    pub id: i32,
    pub approval_status: ApprovalStatus,
    pub is_available: bool,
    pub total_deliveries: i32,
    pub completed_deliveries: i32,
    pub total_earnings_cents: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DriverEntity {
    /// Approved drivers who switched themselves on receive dispatch events.
    pub fn is_dispatchable(&self) -> bool {
        self.approval_status == ApprovalStatus::Approved && self.is_available
    }
}

#[derive(Insertable, Deserialize, Debug, Clone)]
#[diesel(table_name = crate::schema::drivers)]
pub struct CreateDriverEntity {
    pub approval_status: ApprovalStatus,
    pub is_available: bool,
}

// Orders

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderEntity {
    pub id: i32,
    pub customer_id: i32,
    pub status: OrderStatus,
    pub delivery_type: DeliveryType,
    pub subtotal_cents: i64,
    pub delivery_fee_cents: i64,
    pub platform_fee_cents: i64,
    pub total_cents: i64,
    pub delivery_address: Option<String>,
    pub delivery_phone: Option<String>,
    pub special_instructions: Option<String>,
    pub cancel_reason: Option<String>,
    pub ordered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CreateOrderEntity {
    pub customer_id: i32,
    pub status: OrderStatus,
    pub delivery_type: DeliveryType,
    pub subtotal_cents: i64,
    pub delivery_fee_cents: i64,
    pub platform_fee_cents: i64,
    pub total_cents: i64,
    pub delivery_address: Option<String>,
    pub delivery_phone: Option<String>,
    pub special_instructions: Option<String>,
}

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::order_items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderItemEntity {
    pub id: i32,
    pub order_id: i32,
    pub dish_id: i32,
    pub restaurant_id: i32,
    pub name: String,
    pub unit_price_cents: i64,
    pub quantity: i32,
    pub position: i32,
}

impl OrderItemEntity {
    pub fn line_total_cents(&self) -> i64 {
        self.unit_price_cents * i64::from(self.quantity)
    }
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::order_items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CreateOrderItemEntity {
    pub order_id: i32,
    pub dish_id: i32,
    pub restaurant_id: i32,
    pub name: String,
    pub unit_price_cents: i64,
    pub quantity: i32,
    pub position: i32,
}

#[derive(Queryable, Selectable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::order_portions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderPortionEntity {
    pub order_id: i32,
    pub restaurant_id: i32,
    pub subtotal_cents: i64,
    pub ready_at: Option<DateTime<Utc>>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::order_portions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CreateOrderPortionEntity {
    pub order_id: i32,
    pub restaurant_id: i32,
    pub subtotal_cents: i64,
}

// Deliveries

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::deliveries)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DeliveryEntity {
    pub id: Uuid,
    pub order_id: i32,
    pub driver_id: Option<i32>,
    pub status: DeliveryStatus,
    pub claimed_at: Option<DateTime<Utc>>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub driver_payout_cents: i64,
    pub payout_status: Option<PayoutStatus>,
    pub distance_miles: f64,
    pub pickup_location: String,
    pub delivery_location: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::deliveries)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CreateDeliveryEntity {
    pub id: Uuid,
    pub order_id: i32,
    pub driver_id: Option<i32>,
    pub status: DeliveryStatus,
    pub claimed_at: Option<DateTime<Utc>>,
    pub driver_payout_cents: i64,
    pub distance_miles: f64,
    pub pickup_location: String,
    pub delivery_location: String,
}

#[derive(Queryable, Selectable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::delivery_updates)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DeliveryUpdateEntity {
    pub id: i32,
    pub delivery_id: Uuid,
    pub status: DeliveryStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::delivery_updates)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CreateDeliveryUpdateEntity {
    pub delivery_id: Uuid,
    pub status: DeliveryStatus,
    pub notes: Option<String>,
}

// Notifications

#[derive(Queryable, Selectable, Identifiable, Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[diesel(table_name = crate::schema::notifications)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NotificationEntity {
    pub id: i32,
    pub recipient_role: ActorRole,
    pub recipient_id: i32,
    pub kind: NotificationKind,
    pub order_id: Option<i32>,
    #[schema(value_type = Object)]
    pub payload: Value,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl NotificationEntity {
    pub fn recipient(&self) -> Recipient {
        Recipient {
            role: self.recipient_role,
            id: self.recipient_id,
        }
    }

    /// Typed view of a `refund_request` payload.
    pub fn refund_request(&self) -> Option<RefundRequestPayload> {
        if self.kind != NotificationKind::RefundRequest {
            return None;
        }
        serde_json::from_value(self.payload.clone()).ok()
    }
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::notifications)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CreateNotificationEntity {
    pub recipient_role: ActorRole,
    pub recipient_id: i32,
    pub kind: NotificationKind,
    pub order_id: Option<i32>,
    pub payload: Value,
}

impl CreateNotificationEntity {
    pub fn new(recipient: Recipient, kind: NotificationKind, order_id: i32, payload: Value) -> Self {
        Self {
            recipient_role: recipient.role,
            recipient_id: recipient.id,
            kind,
            order_id: Some(order_id),
            payload,
        }
    }

    pub fn recipient(&self) -> Recipient {
        Recipient {
            role: self.recipient_role,
            id: self.recipient_id,
        }
    }
}

/// Outcome reported by the payment gateway for a refund, kept on the request for audit.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct GatewayOutcome {
    pub succeeded: bool,
    pub reference: Option<String>,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Payload of a `refund_request` notification: one restaurant's portion of an order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct RefundRequestPayload {
    pub order_id: i32,
    pub customer_id: i32,
    pub restaurant_id: i32,
    pub restaurant_name: String,
    pub reason: Option<String>,
    pub amount_cents: i64,
    pub status: RefundStatus,
    pub resolver_notes: Option<String>,
    pub resolved_by: Option<i32>,
    pub processed_at: Option<DateTime<Utc>>,
    pub gateway: Option<GatewayOutcome>,
}

// Outbox

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone)]
#[diesel(table_name = crate::schema::outbox)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OutboxEntity {
    pub id: i32,
    pub event_type: String,
    pub payload: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::outbox)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CreateOutboxEntity {
    pub event_type: String,
    pub payload: String,
    pub status: String,
}
