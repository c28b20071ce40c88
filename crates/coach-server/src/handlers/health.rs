use actix_web::{web, HttpResponse, Responder};

use crate::state::AppState;

pub async fn handler(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "dropped_metrics_events": state.metrics.dropped_count(),
    }))
}
