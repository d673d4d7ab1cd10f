mod conversation;
mod listing;
mod media;
mod session;
mod user;

use std::convert::Infallible;

use axum::Router;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::AppState;
use crate::error::AppError;
use crate::live::Subscription;

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .merge(session::routes())
        .merge(user::routes())
        .merge(listing::routes())
        .merge(conversation::routes())
        .merge(media::routes());

    Router::new()
        .nest("/v1", api)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_event(e: &AppError) -> Event {
    Event::default()
        .event("error")
        .data(serde_json::json!({ "error": e.message(), "code": e.code() }).to_string())
}

/// ライブ購読を SSE に変換する。スナップショットごとに `snapshot` イベントを1つ送る。
/// 購読が取得エラーで終わった場合は `error` イベントを送ってから閉じる。
/// クライアントが切断するとストリームと共に購読も破棄される。
pub(crate) fn snapshot_events<T>(
    sub: Subscription<T>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    T: Serialize + Send + 'static,
{
    let stream = sub.into_stream().map(|snapshot| {
        let event = match snapshot {
            Ok(data) => Event::default()
                .event("snapshot")
                .json_data(&data)
                .unwrap_or_else(|e| error_event(&AppError::Internal(e.to_string()))),
            Err(e) => error_event(&e),
        };
        Ok(event)
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(all(test, not(feature = "postgres")))]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::testing::{TestEnv, test_env};

    async fn call(
        env: &TestEnv,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let resp = build_router(env.state.clone()).oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn sign_in(env: &TestEnv, subject: &str, email: &str) -> String {
        let credential = format!("cred-{subject}");
        env.identity.register(&credential, subject, email, Some(subject));
        let (status, body) = call(
            env,
            "POST",
            "/v1/session",
            None,
            Some(json!({ "credential": credential })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn requests_without_a_session_are_unauthorized() {
        let env = test_env().await;
        let (status, body) = call(&env, "GET", "/v1/listing", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "unauthenticated");
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn gmail_sign_in_is_forbidden() {
        let env = test_env().await;
        env.identity.register("g", "g1", "someone@gmail.com", None);
        let (status, body) = call(
            &env,
            "POST",
            "/v1/session",
            None,
            Some(json!({ "credential": "g" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "domain_rejected");
    }

    #[tokio::test]
    async fn listing_lifecycle_over_http() {
        let env = test_env().await;
        let seller = sign_in(&env, "seller", "seller@college.edu").await;
        let buyer = sign_in(&env, "buyer", "buyer@college.edu").await;

        let (status, created) = call(
            &env,
            "POST",
            "/v1/listing",
            Some(&seller),
            Some(json!({
                "title": "Calculus Textbook",
                "category": "Textbooks",
                "price": 500.0,
                "image_url": "https://media.test/calc",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(created["status"], "active");
        assert!(created.get("sold_at").is_none());
        let id = created["id"].as_str().unwrap().to_string();

        let (_, feed) = call(&env, "GET", "/v1/listing?category=Textbooks", Some(&buyer), None).await;
        assert_eq!(feed[0]["id"], id.as_str());

        let (status, _) = call(
            &env,
            "POST",
            &format!("/v1/listing/{id}/sold"),
            Some(&buyer),
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, sold) = call(
            &env,
            "POST",
            &format!("/v1/listing/{id}/sold"),
            Some(&seller),
            Some(json!({ "buyer_email": "buyer@college.edu" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(sold["buyer_id"], "buyer");

        let (status, body) = call(
            &env,
            "POST",
            &format!("/v1/listing/{id}/sold"),
            Some(&seller),
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "conflict");

        let (_, purchased) = call(&env, "GET", "/v1/user/me/purchased", Some(&buyer), None).await;
        assert_eq!(purchased.as_array().unwrap().len(), 1);
        let (_, feed) = call(&env, "GET", "/v1/listing", Some(&buyer), None).await;
        assert!(feed.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn conversation_over_http() {
        let env = test_env().await;
        let seller = sign_in(&env, "seller", "seller@college.edu").await;
        let buyer = sign_in(&env, "buyer", "buyer@college.edu").await;
        let (_, listing) = call(
            &env,
            "POST",
            "/v1/listing",
            Some(&seller),
            Some(json!({
                "title": "Table fan",
                "category": "Electronics",
                "price": 900,
                "image_url": "https://media.test/fan",
            })),
        )
        .await;

        let (status, conv) = call(
            &env,
            "POST",
            "/v1/conversation",
            Some(&buyer),
            Some(json!({ "listing_id": listing["id"] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let conv_id = conv["id"].as_str().unwrap().to_string();

        let (status, _) = call(
            &env,
            "POST",
            &format!("/v1/conversation/{conv_id}/message"),
            Some(&buyer),
            Some(json!({ "text": "does it oscillate?" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, inbox) = call(&env, "GET", "/v1/conversation", Some(&seller), None).await;
        assert_eq!(inbox[0]["unread_count"], 1);
        assert_eq!(inbox[0]["last_message"], "does it oscillate?");

        let (_, read) = call(
            &env,
            "POST",
            &format!("/v1/conversation/{conv_id}/read"),
            Some(&seller),
            None,
        )
        .await;
        assert_eq!(read["updated"], 1);

        let (_, messages) = call(
            &env,
            "GET",
            &format!("/v1/conversation/{conv_id}/message"),
            Some(&seller),
            None,
        )
        .await;
        assert_eq!(messages[0]["is_read"], true);
    }

    #[tokio::test]
    async fn buyer_lookup_by_query_string() {
        let env = test_env().await;
        let token = sign_in(&env, "seller", "seller@college.edu").await;
        sign_in(&env, "buyer", "buyer@college.edu").await;

        let (status, found) = call(
            &env,
            "GET",
            "/v1/user/lookup?email=buyer%40college.edu",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(found["user_id"], "buyer");

        let (status, _) = call(&env, "GET", "/v1/user/lookup", Some(&token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = call(
            &env,
            "GET",
            "/v1/user/lookup?email=buyer%40college.edu&roll_number=21CS001",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, body) = call(
            &env,
            "GET",
            "/v1/user/lookup?email=nobody%40college.edu",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "not_found");
    }

    #[tokio::test]
    async fn sign_out_revokes_the_bearer_token() {
        let env = test_env().await;
        let token = sign_in(&env, "u1", "u1@college.edu").await;
        let (status, me) = call(&env, "GET", "/v1/user/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["profile_complete"], false);

        let (status, _) = call(&env, "DELETE", "/v1/session", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&env, "GET", "/v1/user/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn image_upload_returns_a_url() {
        let env = test_env().await;
        let token = sign_in(&env, "u1", "u1@college.edu").await;
        let boundary = "XBOUNDARYX";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"a.png\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"\x89PNG\r\n\x1a\n");
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        let req = Request::builder()
            .method("POST")
            .uri("/v1/media")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap();
        let resp = build_router(env.state.clone()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["url"], "https://media.test/0");
        assert_eq!(env.media.objects.lock().unwrap()[0].0, "image/png");
    }
}
