use rocket::{
    fairing::{Fairing, Info, Kind},
    http::{Header, Status},
    Request, Response, Route,
};

pub fn routes() -> Vec<Route> {
    routes![preflight]
}

/// Answers every preflight request.
#[options("/<_..>")]
fn preflight() -> Status {
    Status::NoContent
}

/// A fairing that allows cross-origin calls from browser clients on every
/// response.
pub struct Cors;

#[rocket::async_trait]
impl Fairing for Cors {
    fn info(&self) -> Info {
        Info {
            name: "CORS",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, _req: &'r Request<'_>, res: &mut Response<'r>) {
        res.set_header(Header::new("Access-Control-Allow-Origin", "*"));
        res.set_header(Header::new(
            "Access-Control-Allow-Methods",
            "POST, GET, OPTIONS",
        ));
        res.set_header(Header::new(
            "Access-Control-Allow-Headers",
            "authorization, x-client-info, apikey, content-type",
        ));
        res.set_header(Header::new(
            "Access-Control-Expose-Headers",
            "X-RateLimit-Remaining, X-RateLimit-Reset",
        ));
    }
}
