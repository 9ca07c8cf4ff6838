use actix_web::{http::StatusCode, web, HttpRequest, HttpResponse};
use restaurant_api::db::RecordStore;
use restaurant_api::handler::{Request, Response, RestaurantHandler};

pub(super) fn routes<S: RecordStore + 'static>(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/restaurants").to(dispatch::<S>))
        .service(web::resource("/restaurants/{id}").to(dispatch::<S>))
        .default_service(web::to(dispatch::<S>));
}

fn into_request(req: &HttpRequest, body: &web::Bytes) -> Request {
    Request {
        method: req.method().as_str().to_string(),
        path: req.path().to_string(),
        headers: req
            .headers()
            .iter()
            .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_string())))
            .collect(),
        path_parameters: req
            .match_info()
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect(),
        body: (!body.is_empty()).then(|| body.to_vec()),
    }
}

fn into_http_response(response: Response) -> HttpResponse {
    let status =
        StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = HttpResponse::build(status);
    for (name, value) in &response.headers {
        builder.insert_header((name.as_str(), value.as_str()));
    }
    builder.body(response.body)
}

async fn dispatch<S: RecordStore + 'static>(
    handler: web::Data<RestaurantHandler<S>>,
    req: HttpRequest,
    body: web::Bytes,
) -> HttpResponse {
    let request = into_request(&req, &body);
    into_http_response(handler.handle(&request).await)
}
