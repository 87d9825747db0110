// src/api/handlers/faceapi.rs
use actix_web::{
    web::{self, Bytes, Data, Json, Path, Query},
    HttpResponse, Scope,
};
use tracing::{info, warn};

use crate::{
    api::types::{ComputeQuery, CreateDescriptorsRequest, EnrollmentResponse},
    core::{
        node::InferenceInput,
        services::{EnrollOutcome, EnrollmentService, NodeRegistry},
    },
    utils::error::NodeError,
};

pub fn scope() -> Scope {
    web::scope("/faceapi")
        .service(web::resource("/{id}/check").route(web::get().to(check_descriptors)))
        .service(web::resource("/{id}/create").route(web::post().to(create_descriptors)))
        .service(
            web::resource("/{id}/delete")
                .route(web::get().to(delete_descriptors))
                .route(web::delete().to(delete_descriptors)),
        )
        .service(web::resource("/{id}/compute").route(web::post().to(compute)))
}

async fn check_descriptors(
    service: Data<EnrollmentService>,
    id: Path<String>,
) -> Result<HttpResponse, NodeError> {
    let count = service.check(&id).await?;
    Ok(HttpResponse::Ok().content_type("text/plain").body(count.to_string()))
}

async fn create_descriptors(
    service: Data<EnrollmentService>,
    id: Path<String>,
    request: Json<CreateDescriptorsRequest>,
) -> Result<HttpResponse, NodeError> {
    let images: Vec<Vec<u8>> = request.into_inner().images.into_iter().map(|image| image.0).collect();
    info!(node = %id, "Enrollment request with {} image(s)", images.len());

    let outcome = service.create(&id, images).await.map_err(|e| {
        warn!(node = %id, "Enrollment failed: {}", e);
        e
    })?;

    let set = outcome.descriptor_set();
    let body = EnrollmentResponse {
        label: set.label.clone(),
        descriptors: set.len(),
    };
    Ok(match outcome {
        EnrollOutcome::Created(_) => HttpResponse::Created().json(body),
        EnrollOutcome::Accepted(_) => HttpResponse::Accepted().json(body),
    })
}

async fn delete_descriptors(
    service: Data<EnrollmentService>,
    id: Path<String>,
) -> Result<HttpResponse, NodeError> {
    if service.delete(&id).await? {
        Ok(HttpResponse::Created().content_type("text/plain").body("Descriptors deleted"))
    } else {
        Ok(HttpResponse::NotFound().content_type("text/plain").body("No descriptors to delete"))
    }
}

async fn compute(
    registry: Data<NodeRegistry>,
    id: Path<String>,
    query: Query<ComputeQuery>,
    body: Bytes,
) -> Result<HttpResponse, NodeError> {
    let input = InferenceInput::image(body.to_vec()).with_overrides(query.into_inner().into());
    let response = registry.compute(&id, input).await?;
    Ok(HttpResponse::Ok().json(response))
}
