use axum::{extract::State, http::HeaderMap, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::AppState;

use super::{bearer, AppError};

// ─── Domain types ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct MenuItem {
    pub id: u64,
    pub title: &'static str,
    pub description: &'static str,
    pub price: f64,
}

const MENU: [MenuItem; 3] = [
    MenuItem {
        id: 1,
        title: "Veggie",
        description: "A garden of delight",
        price: 0.0038,
    },
    MenuItem {
        id: 2,
        title: "Pepperoni",
        description: "Spicy treat",
        price: 0.0042,
    },
    MenuItem {
        id: 3,
        title: "Margarita",
        description: "Essential classic",
        price: 0.0042,
    },
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub menu_id: u64,
    #[serde(default)]
    pub description: String,
    pub price: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    #[serde(default)]
    pub franchise_id: Option<u64>,
    #[serde(default)]
    pub store_id: Option<u64>,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub diner_email: String,
    pub franchise_id: Option<u64>,
    pub store_id: Option<u64>,
    pub items: Vec<OrderItem>,
}

// ─── GET /api/order/menu ─────────────────────────────────────────

pub async fn get_menu() -> Json<Vec<MenuItem>> {
    Json(MENU.to_vec())
}

// ─── POST /api/order ─────────────────────────────────────────────

pub async fn create_order(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<OrderRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let token = bearer(&headers)?;
    let diner_email = state
        .accounts
        .email_for(token)
        .ok_or(AppError::Unauthorized)?;

    if req.items.is_empty() {
        return Err(AppError::BadRequest("order has no items".into()));
    }

    let order = Order {
        id: format!("ord_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]),
        diner_email,
        franchise_id: req.franchise_id,
        store_id: req.store_id,
        items: req.items,
    };

    Ok(Json(serde_json::json!({ "order": order })))
}
