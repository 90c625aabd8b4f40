// File management panel: upload files, list them, edit their text and
// delete them. Everything lives in one flat directory, its listing is the
// index and its files are served back under /uploads/.
//
// Known gaps:
// * no locking, two edits of the same file race and the last write wins
// * uploads are buffered in memory before they hit the disk
#[macro_use]
extern crate log;
use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};
use serde::Deserialize;
use std::sync::Arc;

mod assets;
mod handlers;
mod store;

use store::{BlobStore, DiskStore};

/// Largest edit body accepted, json or urlencoded.
const MAX_EDIT_BYTES: usize = 16 * 1024 * 1024;

const USAGE: &str = "
Usage: filepanel [--bind ADDR] [--port PORT] [--upload-dir DIR]

Options:
    --bind ADDR        Address to listen on [default: 0.0.0.0]
    --port PORT        Port to listen on [default: 3000]
    --upload-dir DIR   Directory holding the uploaded files [default: uploads]
";

#[derive(Deserialize, Debug)]
struct Args {
    flag_bind: String,
    flag_port: u16,
    flag_upload_dir: String,
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::PayloadConfig::new(MAX_EDIT_BYTES))
        .app_data(web::JsonConfig::default().limit(MAX_EDIT_BYTES))
        .app_data(web::FormConfig::default().limit(MAX_EDIT_BYTES))
        .route("/", web::get().to(assets::index))
        .route("/uploads/{name}", web::get().to(assets::uploaded_file))
        .route("/upload", web::post().to(handlers::upload))
        .route("/files", web::get().to(handlers::list_files))
        .route("/file/{name}", web::put().to(handlers::edit_file))
        .route("/file/{name}", web::delete().to(handlers::delete_file));
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args: Args = docopt::Docopt::new(USAGE)
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());

    let store: Arc<dyn BlobStore> = Arc::new(
        DiskStore::open(&args.flag_upload_dir)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?,
    );
    let store = web::Data::from(store);

    info!("serving on http://{}:{}", args.flag_bind, args.flag_port);
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(Cors::permissive())
            .app_data(store.clone())
            .configure(routes)
    })
    .bind((args.flag_bind.as_str(), args.flag_port))?
    .run()
    .await
}
