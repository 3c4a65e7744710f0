pub mod payments;

use std::sync::Arc;

use anyhow::Result;
use futures::future::BoxFuture;
use lapin::message::Delivery;

use crate::app_state::AppState;

/// A queue handler; it acks the delivery itself once the work is durable.
pub type ConsumerFn = fn(Delivery, Arc<AppState>) -> BoxFuture<'static, Result<()>>;
