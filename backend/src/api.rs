use actix_cors::Cors;
use actix_web::{
    error::QueryPayloadError,
    get,
    http::header,
    web::{self, Data},
    App, HttpRequest, HttpResponse, HttpServer, Responder,
};
use log::info;

use crate::{
    error::QueryError,
    query::{ChartParams, QueryService},
};

#[get("/")]
async fn hello() -> impl Responder {
    HttpResponse::Ok().body("backend")
}

#[get("/measurements.json")]
async fn measurements(
    query: web::Query<ChartParams>,
    service: Data<QueryService>,
) -> Result<impl Responder, QueryError> {
    let q = query.validate()?;
    Ok(web::Json(service.measurements(&q).await?))
}

#[get("/summaries.json")]
async fn summaries(
    query: web::Query<ChartParams>,
    service: Data<QueryService>,
) -> Result<impl Responder, QueryError> {
    let q = query.validate()?;
    Ok(web::Json(service.summaries(&q).await?))
}

#[get("/sensors.json")]
async fn sensors(service: Data<QueryService>) -> impl Responder {
    web::Json(service.registry().sensors().clone())
}

fn query_error(err: QueryPayloadError, _req: &HttpRequest) -> actix_web::Error {
    QueryError::InvalidParameter(err.to_string()).into()
}

/// Maps malformed query strings to the structured error payload.
pub fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(query_error)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(query_config())
        .service(hello)
        .service(measurements)
        .service(summaries)
        .service(sensors);
}

pub async fn new_http_server(
    service: Data<QueryService>,
    bind: &str,
    port: u16,
) -> std::io::Result<()> {
    info!("Query server listening on {bind}:{port}");
    HttpServer::new(move || {
        App::new()
            .app_data(service.clone())
            .configure(configure)
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET"])
                    .allowed_headers(vec![header::ACCEPT])
                    .allowed_header(header::CONTENT_TYPE)
                    .max_age(3600),
            )
    })
    .bind((bind, port))?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::{http::StatusCode, test};
    use common::req::{ErrorBody, SensorMap, SeriesResponse};

    use super::*;
    use crate::query::tests::{registry, service, temp, FakeStore, T};

    fn app_data(known: &[&str]) -> (Data<QueryService>, Arc<crate::buffer::RecentBuffer>) {
        let (service, buffer, _) = service(Arc::new(FakeStore::default()), registry(known));
        (Data::new(service), buffer)
    }

    async fn get_error(uri: &str) -> (StatusCode, ErrorBody) {
        let (data, _) = app_data(&[]);
        let app = test::init_service(App::new().app_data(data).configure(configure)).await;
        let resp = test::call_service(&app, test::TestRequest::get().uri(uri).to_request()).await;
        let status = resp.status();
        (status, test::read_body_json(resp).await)
    }

    #[actix_web::test]
    async fn measurements_json() {
        let (data, buffer) = app_data(&["B"]);
        buffer.append(temp("A", T - 120, 20.5));
        let app = test::init_service(App::new().app_data(data).configure(configure)).await;

        let uri = format!(
            "/measurements.json?start={}&end={}&measurementType=temperature",
            T - 600,
            T
        );
        let resp: SeriesResponse =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri(&uri).to_request())
                .await;

        assert_eq!(resp.sensors, vec!["A", "B"]);
        assert!(!resp.summaries);
        assert_eq!(resp.data.timestamps, vec![T - 120]);
        assert_eq!(resp.data.columns, vec![vec![Some(20.5)], vec![None]]);
    }

    #[actix_web::test]
    async fn summaries_json() {
        let (data, buffer) = app_data(&[]);
        buffer.append(temp("A", T - 120, 1.0));
        let app = test::init_service(App::new().app_data(data).configure(configure)).await;

        let uri = format!(
            "/summaries.json?start={}&end={}&measurementType=temperature",
            T - 600,
            T
        );
        let resp: SeriesResponse =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri(&uri).to_request())
                .await;

        assert!(resp.summaries);
        assert_eq!(resp.window, 60);
        assert_eq!(resp.data.timestamps.len(), 10);
        assert_eq!(resp.data.columns.len(), 3);
    }

    #[actix_web::test]
    async fn sensors_json() {
        let (data, _) = app_data(&["A1", "B2"]);
        let app = test::init_service(App::new().app_data(data).configure(configure)).await;

        let resp: SensorMap = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/sensors.json").to_request(),
        )
        .await;
        assert_eq!(resp["A1"].name, "Sensor A1");
        assert_eq!(resp.len(), 2);
    }

    #[actix_web::test]
    async fn store_timeout_on_straddle_is_still_ok() {
        let store = Arc::new(FakeStore {
            delay: Some(std::time::Duration::from_millis(600)),
            ..Default::default()
        });
        let (service, buffer, _) = service(store, registry(&[]));
        buffer.append(temp("A", T - 60, 7.5));
        let app =
            test::init_service(App::new().app_data(Data::new(service)).configure(configure)).await;

        let uri = format!(
            "/measurements.json?start={}&end={}&measurementType=temperature",
            T - 7200,
            T
        );
        let resp = test::call_service(&app, test::TestRequest::get().uri(&uri).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: SeriesResponse = test::read_body_json(resp).await;
        assert_eq!(body.partial.as_ref().map(|p| p.kind.as_str()), Some("StoreTimeout"));
        assert_eq!(body.column("A"), Some(&[Some(7.5)][..]));
    }

    #[actix_web::test]
    async fn rejects_inverted_range() {
        let (status, body) =
            get_error("/measurements.json?start=100&end=100&measurementType=humidity").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.kind, "InvalidRange");
    }

    #[actix_web::test]
    async fn rejects_unknown_type() {
        let (status, body) =
            get_error("/summaries.json?start=0&end=100&measurementType=co2").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.kind, "UnknownMeasurementType");
    }

    #[actix_web::test]
    async fn rejects_non_integer_bounds() {
        let (status, body) =
            get_error("/measurements.json?start=yesterday&end=100&measurementType=pressure")
                .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.kind, "InvalidParameter");

        let (status, body) = get_error("/measurements.json?end=100&measurementType=pressure").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.kind, "InvalidParameter");
    }
}
