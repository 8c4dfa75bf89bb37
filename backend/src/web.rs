use actix_web::{
    get,
    web::{self, Data},
    App, HttpServer, Responder,
};
use common::req::MeasurementType;
use log::info;

use crate::{api::query_config, error::QueryError, query::QueryService};

#[derive(serde::Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RecentParams {
    measurement_type: String,
}

#[get("/")]
async fn hello(service: Data<QueryService>) -> impl Responder {
    web::Json(service.buffer().stats())
}

#[get("/recent")]
async fn recent(
    query: web::Query<RecentParams>,
    service: Data<QueryService>,
) -> Result<impl Responder, QueryError> {
    let kind = query.measurement_type.parse::<MeasurementType>()?;
    Ok(web::Json(service.recent(kind)))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(query_config()).service(hello).service(recent);
}

/// Low-latency view on the recent buffer only.
pub async fn new_http_server(
    service: Data<QueryService>,
    bind: &str,
    port: u16,
) -> std::io::Result<()> {
    info!("Buffer server listening on {bind}:{port}");
    HttpServer::new(move || App::new().app_data(service.clone()).configure(configure))
        .bind((bind, port))?
        .run()
        .await
}
