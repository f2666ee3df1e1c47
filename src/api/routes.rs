//! Route table for the ICU allocation API.

use actix_web::web;

use super::handlers;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/patients", web::post().to(handlers::register_case))
            .route("/risk/intake", web::post().to(handlers::intake))
            .service(
                web::scope("/icu")
                    .route("/status", web::get().to(handlers::icu_status))
                    .route("/queue", web::get().to(handlers::queue))
                    .route("/logs", web::get().to(handlers::allocation_logs))
                    .route("/enqueue", web::post().to(handlers::enqueue))
                    .route("/auto-allocate", web::post().to(handlers::auto_allocate))
                    .route("/auto-assign", web::post().to(handlers::auto_assign))
                    .route("/assign", web::post().to(handlers::assign_manual))
                    .route("/release/{bed_id}", web::put().to(handlers::release_bed))
                    .route("/discharge/{allocation_id}", web::post().to(handlers::discharge))
                    .route("/forecast", web::get().to(handlers::forecast))
                    .route("/analytics", web::get().to(handlers::analytics))
                    .route("/recommendations", web::get().to(handlers::recommendations)),
            )
            .service(
                web::scope("/admin")
                    .route("/beds", web::post().to(handlers::create_bed))
                    .route("/beds/{bed_id}/status", web::put().to(handlers::update_bed_status)),
            ),
    );
}
