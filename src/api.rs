use rocket::{
    http::Status,
    serde::json::{json, Json, Value},
    Catcher, Request, Route,
};

pub mod cors;
pub mod ledger;
pub mod voting;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(voting::routes());
    routes.extend(ledger::routes());
    routes.extend(cors::routes());
    routes
}

pub fn catchers() -> Vec<Catcher> {
    catchers![default_catcher]
}

/// Anything Rocket itself rejects still gets a JSON body.
#[catch(default)]
fn default_catcher(status: Status, _req: &Request<'_>) -> Json<Value> {
    Json(json!({ "error": status.reason().unwrap_or("Unknown error") }))
}
