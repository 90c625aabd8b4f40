// Read-only side: the control panel page at / and the raw bytes of every
// blob under /uploads/{name}.
use actix_web::http::header::ContentType;
use actix_web::{web, HttpResponse};
use std::path::Path;

use crate::handlers::{ApiError, HandlerStore};

const INDEX_HTML: &str = include_str!("../static/index.html");

pub async fn index() -> HttpResponse {
    HttpResponse::Ok()
        .content_type(ContentType::html())
        .body(INDEX_HTML)
}

/// Content type is guessed from the extension only, unknown ones are served
/// as application/octet-stream.
pub async fn uploaded_file(store: HandlerStore, name: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let name = name.into_inner();
    let mime = actix_files::file_extension_to_mime(
        Path::new(&name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default(),
    );

    let store = store.into_inner();
    let bytes = web::block(move || store.get(&name))
        .await?
        .map_err(ApiError::Read)?;
    Ok(HttpResponse::Ok().content_type(mime).body(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BlobStore, MemoryStore};
    use actix_web::http::{header, StatusCode};
    use actix_web::{test, App};
    use std::sync::Arc;

    #[actix_web::test]
    async fn test_index_is_html() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryStore::new());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::from(store))
                .configure(crate::routes),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/html; charset=utf-8"
        );
        let body = test::read_body(resp).await;
        assert!(std::str::from_utf8(&body).unwrap().contains("/upload"));
    }

    #[actix_web::test]
    async fn test_uploaded_file_content_types() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryStore::new());
        let text = store.put("notes.txt", b"hello").unwrap();
        let bare = store.put("README", b"read me").unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::from(store.clone()))
                .configure(crate::routes),
        )
        .await;

        let req = test::TestRequest::get().uri(&format!("/uploads/{}", text)).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get(header::CONTENT_TYPE).unwrap();
        assert!(content_type.to_str().unwrap().starts_with("text/plain"));
        assert_eq!(test::read_body(resp).await, "hello");

        let req = test::TestRequest::get().uri(&format!("/uploads/{}", bare)).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/octet-stream"
        );
    }

    #[actix_web::test]
    async fn test_missing_upload_is_not_found() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryStore::new());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::from(store))
                .configure(crate::routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/uploads/nothing.txt").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
