//! Order creation, query and payment-status endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::{OrderId, OrderSn, UserId};
use domain::OrderDetail;
use messaging::Broker;
use order_store::{Order, OrderQuery, OrderStatus, OrderStore, Page};
use saga::{CreateOrderRequest, CreatedOrder};
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListOrdersParams {
    pub user_id: Option<i32>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

/// POST /orders: turn the user's checked cart entries into an order.
#[tracing::instrument(skip(state, req), fields(user_id = %req.user_id))]
pub async fn create<S, B>(
    State(state): State<Arc<AppState<S, B>>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CreatedOrder>), ApiError>
where
    S: OrderStore + Clone + 'static,
    B: Broker + Clone + 'static,
{
    let created = state.orchestrator.create_order(req).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /orders: list orders, newest first, optionally for one user.
#[tracing::instrument(skip(state))]
pub async fn list<S, B>(
    State(state): State<Arc<AppState<S, B>>>,
    Query(params): Query<ListOrdersParams>,
) -> Result<Json<Page<Order>>, ApiError>
where
    S: OrderStore + Clone + 'static,
    B: Broker + Clone + 'static,
{
    let mut query = match params.user_id {
        Some(user_id) => OrderQuery::for_user(UserId::new(user_id)),
        None => OrderQuery::new(),
    };
    if let Some(page) = params.page {
        query = query.page(page);
    }
    if let Some(per_page) = params.per_page {
        query = query.per_page(per_page);
    }

    let page = state.order_service.list_orders(query).await?;
    Ok(Json(page))
}

/// GET /users/{user_id}/orders/{id}: one of the user's orders with its line items.
#[tracing::instrument(skip(state))]
pub async fn detail<S, B>(
    State(state): State<Arc<AppState<S, B>>>,
    Path((user_id, id)): Path<(i32, i64)>,
) -> Result<Json<OrderDetail>, ApiError>
where
    S: OrderStore + Clone + 'static,
    B: Broker + Clone + 'static,
{
    let detail = state
        .order_service
        .order_detail(UserId::new(user_id), OrderId::new(id))
        .await?;
    Ok(Json(detail))
}

/// PATCH /orders/{order_sn}/status: record a payment outcome.
#[tracing::instrument(skip(state))]
pub async fn update_status<S, B>(
    State(state): State<Arc<AppState<S, B>>>,
    Path(order_sn): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<Order>, ApiError>
where
    S: OrderStore + Clone + 'static,
    B: Broker + Clone + 'static,
{
    if order_sn.is_empty() {
        return Err(ApiError::BadRequest("order_sn must not be empty".to_string()));
    }
    let order = state
        .order_service
        .update_order_status(&OrderSn::new(order_sn), req.status)
        .await?;
    Ok(Json(order))
}
