// HTTP side of the blob store: upload, list, edit and delete.
// Every handler does exactly one store call on the blocking pool and turns
// the outcome into a status code plus a short message.
use actix_multipart::{Multipart, MultipartError};
use actix_web::error::BlockingError;
use actix_web::http::header::ContentType;
use actix_web::http::StatusCode;
use actix_web::{web, Either, HttpResponse, ResponseError};
use futures_util::TryStreamExt;
use serde::{Deserialize, Serialize};

use crate::store::{BlobStore, StoreError};

pub type HandlerStore = web::Data<dyn BlobStore>;

/// Multipart field the upload has to arrive in.
const UPLOAD_FIELD: &str = "file";

const OCTET_STREAM: &str = "application/octet-stream";

/// Edit and delete deliberately don't tell "no such blob" apart from an I/O
/// failure, both are a 500. The store keeps the distinction and it shows up
/// in the log.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("no file in upload")]
    NoFile,
    #[error("malformed upload: {0}")]
    Multipart(MultipartError),
    #[error("upload failed: {0}")]
    Upload(#[source] StoreError),
    #[error("listing failed: {0}")]
    List(#[source] StoreError),
    #[error("read failed: {0}")]
    Read(#[source] StoreError),
    #[error("edit failed: {0}")]
    Edit(#[source] StoreError),
    #[error("unreadable edit body: {0}")]
    EditBody(actix_web::Error),
    #[error("delete failed: {0}")]
    Delete(#[source] StoreError),
    #[error("blocking pool is gone")]
    Blocking,
}

impl From<BlockingError> for ApiError {
    fn from(_: BlockingError) -> ApiError {
        ApiError::Blocking
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NoFile | ApiError::Multipart(_) => StatusCode::BAD_REQUEST,
            ApiError::Read(_) => StatusCode::NOT_FOUND,
            ApiError::Upload(_)
            | ApiError::List(_)
            | ApiError::Edit(_)
            | ApiError::EditBody(_)
            | ApiError::Delete(_)
            | ApiError::Blocking => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            error!("{}", self);
        } else {
            warn!("{}", self);
        }
        let message = match self {
            ApiError::NoFile | ApiError::Multipart(_) => "No file uploaded",
            ApiError::Upload(_) => "Error uploading file",
            ApiError::List(_) => "Unable to scan files",
            ApiError::Read(_) => "File not found",
            ApiError::Edit(_) | ApiError::EditBody(_) => "Error editing file",
            ApiError::Delete(_) => "Error deleting file",
            ApiError::Blocking => "Internal server error",
        };
        HttpResponse::build(status)
            .content_type(ContentType::plaintext())
            .body(message)
    }
}

fn plain_ok(message: &'static str) -> HttpResponse {
    HttpResponse::Ok()
        .content_type(ContentType::plaintext())
        .body(message)
}

#[derive(Serialize, Debug)]
pub struct UploadedFile {
    fieldname: String,
    originalname: String,
    mimetype: String,
    /// assigned name, the handle for every later call
    name: String,
    /// same as `name`, under the key multer clients read
    filename: String,
    size: usize,
}

#[derive(Serialize, Debug)]
struct UploadResponse {
    message: &'static str,
    file: UploadedFile,
}

struct Upload {
    original_name: String,
    mime_type: String,
    bytes: Vec<u8>,
}

/// Pulls the first `file` part out of the body. Any other parts are skipped.
async fn read_upload(payload: &mut Multipart) -> Result<Option<Upload>, ApiError> {
    while let Some(mut field) = payload.try_next().await.map_err(ApiError::Multipart)? {
        if field.name() != UPLOAD_FIELD {
            continue;
        }
        // a part without a filename is a plain form field, not a file
        let original_name = match field.content_disposition().get_filename() {
            Some(filename) => filename.to_owned(),
            None => continue,
        };
        let mime_type = field
            .content_type()
            .map(|m| m.to_string())
            .unwrap_or_else(|| OCTET_STREAM.to_owned());

        let mut bytes = Vec::new();
        while let Some(chunk) = field.try_next().await.map_err(ApiError::Multipart)? {
            bytes.extend_from_slice(&chunk);
        }
        return Ok(Some(Upload {
            original_name,
            mime_type,
            bytes,
        }));
    }
    Ok(None)
}

pub async fn upload(store: HandlerStore, mut payload: Multipart) -> Result<HttpResponse, ApiError> {
    let upload = read_upload(&mut payload).await?.ok_or(ApiError::NoFile)?;
    let size = upload.bytes.len();

    let store = store.into_inner();
    let original_name = upload.original_name.clone();
    let bytes = upload.bytes;
    let name = web::block(move || store.put(&original_name, &bytes))
        .await?
        .map_err(ApiError::Upload)?;
    info!("uploaded {:?} as {} ({} bytes)", upload.original_name, name, size);

    Ok(HttpResponse::Ok().json(UploadResponse {
        message: "File uploaded successfully",
        file: UploadedFile {
            fieldname: UPLOAD_FIELD.to_owned(),
            originalname: upload.original_name,
            mimetype: upload.mime_type,
            filename: name.clone(),
            name,
            size,
        },
    }))
}

pub async fn list_files(store: HandlerStore) -> Result<HttpResponse, ApiError> {
    let store = store.into_inner();
    let names = web::block(move || store.list())
        .await?
        .map_err(ApiError::List)?;
    Ok(HttpResponse::Ok().json(names))
}

#[derive(Deserialize, Debug)]
pub struct EditRequest {
    content: String,
}

/// Accepts `{"content": ...}` or the urlencoded equivalent. A body that is
/// neither fails like any other edit, with a 500.
pub async fn edit_file(
    store: HandlerStore,
    name: web::Path<String>,
    body: Result<Either<web::Json<EditRequest>, web::Form<EditRequest>>, actix_web::Error>,
) -> Result<HttpResponse, ApiError> {
    let name = name.into_inner();
    let content = match body.map_err(ApiError::EditBody)? {
        Either::Left(json) => json.into_inner().content,
        Either::Right(form) => form.into_inner().content,
    };
    let size = content.len();

    let store = store.into_inner();
    let target = name.clone();
    web::block(move || store.overwrite(&target, content.as_bytes()))
        .await?
        .map_err(ApiError::Edit)?;
    info!("updated {} ({} bytes)", name, size);
    Ok(plain_ok("File updated successfully"))
}

pub async fn delete_file(store: HandlerStore, name: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let name = name.into_inner();
    let store = store.into_inner();
    let target = name.clone();
    web::block(move || store.delete(&target))
        .await?
        .map_err(ApiError::Delete)?;
    info!("deleted {}", name);
    Ok(plain_ok("File deleted successfully"))
}
