use std::sync::Arc;

use actix_web::{web, HttpResponse, Responder};
use coach_core::model::AnalyzeRequest;

use crate::state::AppState;

pub async fn handler(state: web::Data<AppState>, request: web::Json<AnalyzeRequest>) -> impl Responder {
    let scope = Arc::new(state.new_scope());
    let request = request.into_inner();

    match coach_pipeline::dispatch(scope, &request).await {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(error) => {
            log::warn!("[{}] analyze failed ({}): {}", request.session_id, error.kind(), error);
            status_from(error.status_code()).json(serde_json::json!({
                "success": false,
                "message": error.to_string(),
                "results": [],
                "suggested_replies": null,
                "error_kind": error.kind(),
            }))
        }
    }
}

fn status_from(code: u16) -> HttpResponse {
    match actix_web::http::StatusCode::from_u16(code) {
        Ok(status) => HttpResponse::build(status),
        Err(_) => HttpResponse::InternalServerError(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_from_falls_back_to_500_for_an_unmapped_code() {
        let response = status_from(0);
        assert_eq!(response.status(), actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn status_from_maps_a_known_code() {
        let response = status_from(422);
        assert_eq!(response.status(), actix_web::http::StatusCode::UNPROCESSABLE_ENTITY);
    }
}
