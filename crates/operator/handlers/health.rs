use actix_web::{get, web::Data, HttpRequest, HttpResponse, Responder};
use harbor_cluster::controllers::cluster_controller::State;

#[get("/health")]
pub async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

/// Last reconcile time and reporter of the HarborCluster controller
#[get("/")]
pub async fn index(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}
