use actix_web::{web, HttpResponse, Responder};

use crate::state::AppState;

pub async fn summary(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.aggregator.snapshot())
}
