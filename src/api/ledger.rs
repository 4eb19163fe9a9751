use rocket::{serde::json::Json, Route, State};

use crate::{
    config::Config,
    error::{Error, Result},
    model::api::{BlockHeader, LedgerDump},
    store::{within, StoreHandle},
};

pub fn routes() -> Vec<Route> {
    routes![ledger_dump, block]
}

/// The whole public ledger, as consumed by the verification tool.
#[get("/ledger")]
async fn ledger_dump(
    store: &State<StoreHandle>,
    config: &State<Config>,
) -> Result<Json<LedgerDump>> {
    let deadline = config.store_deadline();
    let blocks = within(deadline, store.blocks()).await?;
    let votes = within(deadline, store.encrypted_votes()).await?;
    Ok(Json(LedgerDump::new(blocks, votes)))
}

#[get("/blocks/<number>")]
async fn block(
    number: u64,
    store: &State<StoreHandle>,
    config: &State<Config>,
) -> Result<Json<BlockHeader>> {
    within(config.store_deadline(), store.block_by_number(number))
        .await?
        .map(|block| Json(block.into()))
        .ok_or_else(|| Error::NotFound(format!("block {number}")))
}
