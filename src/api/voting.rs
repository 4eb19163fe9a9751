use rocket::{
    serde::json::{Error as JsonError, Json},
    tokio, Route, State,
};

use crate::{
    audit::AuditLogger,
    error::{Error, Result, Unsuccessful},
    ledger::VoteVerifier,
    model::{
        api::{
            EligibilityRequest, EligibilityResponse, SecureVoteRequest, SecureVoteResponse,
            SubmitVotesRequest, SubmitVotesResponse, VerifyVoteRequest, VerifyVoteResponse,
        },
        common::RequestMeta,
    },
    rate_limit::RateLimiter,
    voting::{endpoint, throttle, EligibilityChecker, SecureVoteService, SubmissionCoordinator},
};

pub fn routes() -> Vec<Route> {
    routes![check_eligibility, submit_votes, secure_vote, verify_vote]
}

type Body<'r, T> = std::result::Result<Json<T>, JsonError<'r>>;

/// Unwrap a JSON body, turning a malformed one into a validation error.
fn parse<T>(body: Body<'_, T>) -> Result<T> {
    body.map(Json::into_inner).map_err(|e| match e {
        JsonError::Io(e) => Error::Validation(format!("unreadable body: {e}")),
        JsonError::Parse(_, e) => Error::Validation(format!("malformed body: {e}")),
    })
}

#[post("/check-eligibility", data = "<body>")]
async fn check_eligibility(
    body: Body<'_, EligibilityRequest>,
    request: RequestMeta,
    checker: &State<EligibilityChecker>,
) -> Result<Json<EligibilityResponse>> {
    let body = parse(body)?;
    let eligibility = checker
        .check(&body.election_id, &body.voter_email, &request)
        .await?;
    Ok(Json(eligibility.into()))
}

#[post("/submit-votes", data = "<body>")]
async fn submit_votes(
    body: Body<'_, SubmitVotesRequest>,
    request: RequestMeta,
    coordinator: &State<SubmissionCoordinator>,
) -> std::result::Result<Json<SubmitVotesResponse>, Unsuccessful> {
    let ballot = parse(body)?;
    let coordinator = coordinator.inner().clone();
    // Detached, so a client going away cannot interrupt the writes half way.
    let outcome = tokio::spawn(async move { coordinator.submit(ballot, request).await })
        .await
        .map_err(|e| Error::Internal(format!("submission task failed: {e}")))??;
    Ok(Json(outcome.into()))
}

#[post("/secure-vote", data = "<body>")]
async fn secure_vote(
    body: Body<'_, SecureVoteRequest>,
    request: RequestMeta,
    service: &State<SecureVoteService>,
) -> Result<Json<SecureVoteResponse>> {
    let vote = parse(body)?;
    let service = service.inner().clone();
    let entry = tokio::spawn(async move { service.cast(vote, request).await })
        .await
        .map_err(|e| Error::Internal(format!("secure vote task failed: {e}")))??;
    Ok(Json(entry.into()))
}

#[post("/verify-vote", data = "<body>")]
async fn verify_vote(
    body: Body<'_, VerifyVoteRequest>,
    request: RequestMeta,
    limiter: &State<RateLimiter>,
    audit: &State<AuditLogger>,
    verifier: &State<VoteVerifier>,
) -> Result<Json<VerifyVoteResponse>> {
    let body = parse(body)?;
    throttle(limiter, audit, &request, endpoint::VERIFY_VOTE).await?;
    let vote_hash = body.vote_hash.trim();
    if vote_hash.is_empty() {
        return Err(Error::Validation("missing vote hash".to_string()));
    }
    let report = verifier.verify(vote_hash, &request).await?;
    Ok(Json(report.into()))
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use rocket::{
        http::{ContentType, Status},
        local::asynchronous::Client,
        serde::json::{json, serde_json, Value},
    };

    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::fixtures::Fixture;
    use crate::model::db::AuditEventType;
    use crate::store::MemoryStore;

    async fn post(client: &Client, path: &str, body: Value) -> (Status, Value) {
        let response = client
            .post(path)
            .header(ContentType::JSON)
            .body(body.to_string())
            .dispatch()
            .await;
        let status = response.status();
        let body = response.into_json::<Value>().await.unwrap_or(Value::Null);
        (status, body)
    }

    async fn verify(client: &Client, vote_hash: &str) -> Value {
        post(client, "/verify-vote", json!({ "voteHash": vote_hash }))
            .await
            .1
    }

    #[backend_test]
    async fn eligible_voter_gets_profile(client: Client, fixture: Fixture) {
        let voter = &fixture.voters[0];
        let (status, body) = post(
            &client,
            "/check-eligibility",
            json!({
                "election_id": fixture.election.id.to_string(),
                "voter_email": voter.secondary_email,
            }),
        )
        .await;

        assert_eq!(status, Status::Ok);
        let response = serde_json::from_value::<EligibilityResponse>(body).unwrap();
        assert_eq!(
            response,
            EligibilityResponse::Eligible {
                eligible: true,
                election_id: fixture.election.id.to_string(),
                election_title: fixture.election.title.clone(),
                eligible_posts: vec!["president".to_string(), "treasurer".to_string()],
                voter_name: voter.name.clone(),
                voter_email: voter.primary_email.clone(),
            }
        );
    }

    #[backend_test(seeded)]
    async fn unknown_voter_gets_reason(client: Client) {
        let (status, body) = post(
            &client,
            "/check-eligibility",
            json!({ "election_id": "not-an-id", "voter_email": "x@example.org" }),
        )
        .await;
        assert_eq!(status, Status::Ok);
        assert_eq!(body, json!({ "eligible": false, "reason": "invalid_input" }));
    }

    #[backend_test]
    async fn malformed_body_is_400(client: Client) {
        let response = client
            .post("/submit-votes")
            .header(ContentType::JSON)
            .body("{ this is not json")
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);
        assert_eq!(
            response.into_json::<Value>().await.unwrap(),
            json!({ "success": false, "error": "Invalid request" })
        );
    }

    #[backend_test]
    async fn submit_then_verify(client: Client, store: MemoryStore, fixture: Fixture) {
        let ballot = fixture.full_ballot(&fixture.voters[1]);
        let (status, body) = post(&client, "/submit-votes", json!(ballot)).await;
        assert_eq!(status, Status::Ok);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["votes_recorded"], json!(2));
        let submission_hash = body["submission_hash"].as_str().unwrap().to_string();

        let (_, again) = post(&client, "/submit-votes", json!(ballot)).await;
        assert_eq!(again, json!({ "success": false, "error": "already_voted" }));

        for vote in store.votes() {
            assert_eq!(vote.submission_hash, submission_hash);
            let (status, body) =
                post(&client, "/verify-vote", json!({ "voteHash": vote.vote_hash })).await;
            assert_eq!(status, Status::Ok);
            assert_eq!(body["verified"], json!(true));
            assert_eq!(body["blockNumber"], json!(1));
            assert_eq!(
                body["verificationDetails"],
                json!({
                    "voteExists": true,
                    "blockIntegrity": true,
                    "signatureValid": true,
                    "merkleVerification": true,
                    "chainIntegrity": true,
                })
            );
        }
    }

    #[backend_test]
    async fn invalid_ballot_is_400(client: Client, store: MemoryStore, fixture: Fixture) {
        let ballot = fixture.ballot(&fixture.voters[0], &[("president", fixture.rejected.id)]);
        let (status, body) = post(&client, "/submit-votes", json!(ballot)).await;
        assert_eq!(status, Status::BadRequest);
        assert_eq!(body, json!({ "success": false, "error": "Invalid request" }));
        assert!(store.submissions().is_empty());
    }

    #[backend_test]
    async fn ineligible_submission_reports_reason(client: Client, fixture: Fixture) {
        let mut ballot = fixture.full_ballot(&fixture.voters[0]);
        ballot.voter_email = "stranger@example.org".to_string();
        let (status, body) = post(&client, "/submit-votes", json!(ballot)).await;
        assert_eq!(status, Status::Ok);
        assert_eq!(
            body,
            json!({ "success": false, "error": "not_eligible", "reason": "not_registered" })
        );
    }

    #[backend_test]
    async fn store_failure_is_sanitized_500(client: Client, store: MemoryStore, fixture: Fixture) {
        store.fail("insert_vote", 1);
        let ballot = fixture.full_ballot(&fixture.voters[0]);
        let (status, body) = post(&client, "/submit-votes", json!(ballot)).await;
        assert_eq!(status, Status::InternalServerError);
        assert_eq!(body, json!({ "success": false, "error": "Internal server error" }));
        assert!(store.submissions().is_empty());
        assert!(store.all_entries().is_empty());

        // Safe to retry.
        let (status, body) = post(&client, "/submit-votes", json!(ballot)).await;
        assert_eq!(status, Status::Ok);
        assert_eq!(body["success"], json!(true));
    }

    #[backend_test]
    async fn secure_vote_receipt(client: Client, store: MemoryStore, fixture: Fixture) {
        let (status, body) = post(
            &client,
            "/secure-vote",
            json!({
                "election_id": fixture.election.id.to_string(),
                "candidate_id": fixture.treasurer.id.to_string(),
                "voter_public_key": "04a1b2c3",
            }),
        )
        .await;
        assert_eq!(status, Status::Ok);

        let entries = store.all_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            body,
            json!({
                "voteHash": entries[0].vote_hash,
                "blockId": entries[0].block_id.to_string(),
                "blockNumber": 1,
                "digitalSignature": entries[0].digital_signature,
            })
        );
    }

    #[backend_test]
    async fn unknown_vote_is_unverified(client: Client) {
        let (status, body) = post(&client, "/verify-vote", json!({ "voteHash": "ab12" })).await;
        assert_eq!(status, Status::Ok);
        assert_eq!(body["verified"], json!(false));
        assert_eq!(body["blockNumber"], Value::Null);
        assert_eq!(body["verificationDetails"]["voteExists"], json!(false));
    }

    #[backend_test]
    async fn rate_limited_with_headers(client: Client, store: MemoryStore, clock: ManualClock) {
        let limited: SocketAddr = "192.0.2.7:4000".parse().unwrap();
        let other: SocketAddr = "192.0.2.8:4000".parse().unwrap();
        let body = json!({ "voteHash": "ab12" }).to_string();

        // The default limit is 10 per window.
        for _ in 0..10 {
            let response = client
                .post("/verify-vote")
                .remote(limited)
                .header(ContentType::JSON)
                .body(&body)
                .dispatch()
                .await;
            assert_eq!(response.status(), Status::Ok);
        }

        let response = client
            .post("/verify-vote")
            .remote(limited)
            .header(ContentType::JSON)
            .body(&body)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::TooManyRequests);
        assert_eq!(response.headers().get_one("X-RateLimit-Remaining"), Some("0"));
        let reset = (clock.now() + chrono::Duration::seconds(60))
            .timestamp()
            .to_string();
        assert_eq!(
            response.headers().get_one("X-RateLimit-Reset"),
            Some(reset.as_str())
        );
        assert_eq!(
            response.into_json::<Value>().await.unwrap(),
            json!({ "error": "Too many requests, please try again later" })
        );

        // Other clients are unaffected.
        let response = client
            .post("/verify-vote")
            .remote(other)
            .header(ContentType::JSON)
            .body(&body)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        // The denial is audited, eventually.
        let mut audited = false;
        for _ in 0..100 {
            if store
                .audit_events()
                .iter()
                .any(|e| e.event_type == AuditEventType::RateLimitExceeded)
            {
                audited = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(audited);

        // A new window opens once this one has passed.
        clock.advance(chrono::Duration::seconds(60));
        let response = client
            .post("/verify-vote")
            .remote(limited)
            .header(ContentType::JSON)
            .body(&body)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
    }

    /// Capacity 2, five votes: blocks of 2, 2 and 1. Corrupting block 2's
    /// merkle root fails exactly its votes.
    #[backend_test]
    async fn tampering_is_detected_end_to_end(store: MemoryStore, clock: ManualClock, fixture: Fixture) {
        let figment = rocket::Config::figment()
            .merge(("block_capacity", 2))
            .merge(("rate_limit_max_requests", 1000));
        let client = Client::tracked(crate::rocket_for_store(
            figment,
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
        ))
        .await
        .unwrap();

        for voter in &fixture.voters[..2] {
            let (status, body) =
                post(&client, "/submit-votes", json!(fixture.full_ballot(voter))).await;
            assert_eq!(status, Status::Ok);
            assert_eq!(body["success"], json!(true));
        }
        let (status, _) = post(
            &client,
            "/secure-vote",
            json!({
                "election_id": fixture.election.id.to_string(),
                "candidate_id": fixture.president.id.to_string(),
                "voter_public_key": "04ffee",
            }),
        )
        .await;
        assert_eq!(status, Status::Ok);

        let blocks = store.all_blocks();
        assert_eq!(
            blocks.iter().map(|b| b.votes_count).collect::<Vec<_>>(),
            vec![2, 2, 1]
        );

        for entry in store.all_entries() {
            assert_eq!(verify(&client, &entry.vote_hash).await["verified"], json!(true));
        }

        store.tamper_block(2, |block| {
            block.merkle_root = crate::ledger::digest::digest(["forged"]);
        });

        for entry in store.all_entries() {
            let body = verify(&client, &entry.vote_hash).await;
            if entry.block_number == 2 {
                assert_eq!(body["verified"], json!(false));
                assert_eq!(
                    body["verificationDetails"],
                    json!({
                        "voteExists": true,
                        "blockIntegrity": true,
                        "signatureValid": true,
                        "merkleVerification": false,
                        "chainIntegrity": true,
                    })
                );
            } else {
                assert_eq!(body["verified"], json!(true), "block {}", entry.block_number);
            }
        }
    }
}
