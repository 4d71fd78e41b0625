use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Effective configuration with credentials redacted.
pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.config.redacted();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::REDACTED;
    use crate::state::tests::test_state;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_config_endpoint_redacts_secrets() {
        let (mut state, _) = test_state(false);
        let mut config = (*state.config).clone();
        config.backend.api_key = "dg-secret".to_string();
        state.config = std::sync::Arc::new(config);

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/api/v1/config", web::get().to(get_config)),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/config").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["config"]["backend"]["api_key"], REDACTED);
        assert_eq!(body["config"]["pool"]["capacity"], 15);
        assert!(!body.to_string().contains("dg-secret"));
    }
}
