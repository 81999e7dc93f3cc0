//! Shopping cart endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{GoodsId, UserId};
use domain::CartSummary;
use messaging::Broker;
use order_store::{CartEntry, OrderStore};
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AddToCartRequest {
    pub goods_id: i32,
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCartRequest {
    pub quantity: u32,
    pub checked: bool,
}

/// GET /users/{user_id}/cart
#[tracing::instrument(skip(state))]
pub async fn list<S, B>(
    State(state): State<Arc<AppState<S, B>>>,
    Path(user_id): Path<i32>,
) -> Result<Json<CartSummary>, ApiError>
where
    S: OrderStore + Clone + 'static,
    B: Broker + Clone + 'static,
{
    let cart = state.cart_service.list_cart(UserId::new(user_id)).await?;
    Ok(Json(cart))
}

/// POST /users/{user_id}/cart: add goods, merging with an existing entry.
#[tracing::instrument(skip(state))]
pub async fn add<S, B>(
    State(state): State<Arc<AppState<S, B>>>,
    Path(user_id): Path<i32>,
    Json(req): Json<AddToCartRequest>,
) -> Result<(StatusCode, Json<CartEntry>), ApiError>
where
    S: OrderStore + Clone + 'static,
    B: Broker + Clone + 'static,
{
    let entry = state
        .cart_service
        .add_to_cart(UserId::new(user_id), GoodsId::new(req.goods_id), req.quantity)
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// PATCH /users/{user_id}/cart/{goods_id}
#[tracing::instrument(skip(state))]
pub async fn update<S, B>(
    State(state): State<Arc<AppState<S, B>>>,
    Path((user_id, goods_id)): Path<(i32, i32)>,
    Json(req): Json<UpdateCartRequest>,
) -> Result<StatusCode, ApiError>
where
    S: OrderStore + Clone + 'static,
    B: Broker + Clone + 'static,
{
    state
        .cart_service
        .update_cart_item(
            UserId::new(user_id),
            GoodsId::new(goods_id),
            req.quantity,
            req.checked,
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /users/{user_id}/cart/{goods_id}
#[tracing::instrument(skip(state))]
pub async fn delete<S, B>(
    State(state): State<Arc<AppState<S, B>>>,
    Path((user_id, goods_id)): Path<(i32, i32)>,
) -> Result<StatusCode, ApiError>
where
    S: OrderStore + Clone + 'static,
    B: Broker + Clone + 'static,
{
    state
        .cart_service
        .delete_cart_item(UserId::new(user_id), GoodsId::new(goods_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
