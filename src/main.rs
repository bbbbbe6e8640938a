#[macro_use]
extern crate diesel;
#[macro_use]
extern crate diesel_migrations;
#[macro_use]
extern crate lazy_static;

use std::env;

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};
use dotenv::dotenv;

use diesel::r2d2::{ConnectionManager, Pool};
use diesel::PgConnection;

pub mod schema;
mod api;
mod dark_colors;
mod error;
mod models;
mod roles;

pub type DbConnection = PgConnection;

struct AppState {
    db_pool: Pool<ConnectionManager<DbConnection>>,
}

embed_migrations!();

#[actix_rt::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();
    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let manager = ConnectionManager::<DbConnection>::new(database_url);
    let db_pool = Pool::new(manager).expect("Failed to create pool.");
    {
        let connection = db_pool.get().expect("Failed to get a connection for migrations.");
        embedded_migrations::run(&*connection).expect("Failed to run migrations.");
    }
    let bind_addr = env::var("GBB_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8088".to_owned());
    log::info!("Gateshead By Bike backend listening on {}", bind_addr);
    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin("http://127.0.0.1:8080")
            .allowed_origin("http://localhost:8080")
            .allowed_origin("https://gatesheadbybike.org.uk")
            .allowed_origin("https://www.gatesheadbybike.org.uk")
            .allowed_methods(vec!["GET", "POST"])
            .allowed_header("Content-Type")
            .max_age(3600);
        App::new()
            .app_data(web::Data::new(AppState { db_pool: db_pool.clone() }))
            .wrap(cors)
            .wrap(Logger::default())
            .service(api::user::get_service())
            .service(api::parking::get_service())
            .service(api::forum::get_service())
            .service(api::crime::get_service())
            .service(api::notification::get_service())
    })
        .bind(bind_addr)?
        .run()
        .await
}
