use crate::{
    error::ApiError,
    handlers::auth::{AdminToken, AuthenticatedUser},
    models::{RecommendationQuery, RecommendationResponse, RetrainResponse},
    services::{RecommendationService, RetrainAck},
};
use actix_web::{web, HttpResponse};
use tracing::info;

pub fn recommendations_config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/recommendations").route(web::get().to(get_recommendations)))
        .service(web::resource("/recommendations/retrain").route(web::post().to(retrain)));
}

/// Ranked cofounder matches for the calling user. Falls back to rule-based
/// scoring when no trained model is live, so the endpoint degrades rather
/// than erroring.
pub async fn get_recommendations(
    user: AuthenticatedUser,
    query: web::Query<RecommendationQuery>,
    service: web::Data<RecommendationService>,
) -> Result<HttpResponse, ApiError> {
    let recommendations = service.get_recommendations(user.user_id, query.top_k)?;
    Ok(HttpResponse::Ok().json(RecommendationResponse { recommendations }))
}

/// Privileged: kick off a background retrain. Always answers 202; a
/// trigger during a running cycle is coalesced into it.
pub async fn retrain(
    _admin: AdminToken,
    service: web::Data<RecommendationService>,
) -> Result<HttpResponse, ApiError> {
    let status = match service.trigger_retrain() {
        RetrainAck::Started => {
            info!("Retrain accepted");
            "started"
        }
        RetrainAck::AlreadyRunning => "already_running",
    };
    Ok(HttpResponse::Accepted().json(RetrainResponse {
        status: status.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        features::FeatureSchema,
        handlers::auth::{ADMIN_TOKEN_HEADER, USER_ID_HEADER},
        ml::TrainerConfig,
        models::Profile,
        services::InMemoryProfileStore,
    };
    use actix_web::{http::StatusCode, test, App};
    use std::sync::Arc;

    fn test_config() -> Config {
        Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            admin_token: "secret".to_string(),
            checkpoint_dir: "unused".to_string(),
            profiles_path: None,
            trainer: TrainerConfig::default(),
        }
    }

    fn seeded_service(checkpoint_dir: &std::path::Path) -> RecommendationService {
        let store = Arc::new(InMemoryProfileStore::new());
        for user_id in 1..=3 {
            let mut p = Profile::new(user_id);
            p.industry = "technology".to_string();
            p.role = "engineer".to_string();
            store.upsert_profile(p);
        }
        RecommendationService::new(
            store,
            FeatureSchema::default(),
            TrainerConfig::default(),
            checkpoint_dir,
        )
    }

    macro_rules! test_app {
        ($service:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($service))
                    .app_data(web::Data::new(test_config()))
                    .configure(recommendations_config),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_recommendations_requires_user_header() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app!(seeded_service(dir.path()));

        let req = test::TestRequest::get().uri("/recommendations").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn test_recommendations_unknown_user_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app!(seeded_service(dir.path()));

        let req = test::TestRequest::get()
            .uri("/recommendations")
            .insert_header((USER_ID_HEADER, "999"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_recommendations_returns_ranked_matches() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app!(seeded_service(dir.path()));

        let req = test::TestRequest::get()
            .uri("/recommendations?top_k=1")
            .insert_header((USER_ID_HEADER, "1"))
            .to_request();
        let body: RecommendationResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body.recommendations.len(), 1);
        assert_ne!(body.recommendations[0].user_id, 1);
    }

    #[actix_web::test]
    async fn test_retrain_requires_admin_token() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app!(seeded_service(dir.path()));

        let req = test::TestRequest::post()
            .uri("/recommendations/retrain")
            .insert_header((ADMIN_TOKEN_HEADER, "wrong"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn test_retrain_is_accepted_with_valid_token() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app!(seeded_service(dir.path()));

        let req = test::TestRequest::post()
            .uri("/recommendations/retrain")
            .insert_header((ADMIN_TOKEN_HEADER, "secret"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
    }
}
