//! Example records for tests, standing in for what the admin flows would
//! have created.

use std::collections::BTreeSet;

use crate::{
    clock::{Clock, ManualClock},
    model::{
        api::SubmitVotesRequest,
        common::{Candidate, CandidateStatus, Election, EligibleVoter},
        mongodb::Id,
    },
    store::MemoryStore,
};

/// A running election with three registered voters, each eligible for
/// `president` and `treasurer`.
#[derive(Debug, Clone)]
pub struct Fixture {
    pub election: Election,
    pub voters: Vec<EligibleVoter>,
    pub president: Candidate,
    pub treasurer: Candidate,
    /// Stands for `president` but was never approved.
    pub rejected: Candidate,
}

impl Fixture {
    pub fn seed(store: &MemoryStore, clock: &ManualClock) -> Self {
        let election = Election::example_running(clock.now());
        let candidate = |name: &str, position: &str, status| Candidate {
            id: Id::new(),
            election_id: election.id,
            name: name.to_string(),
            position: position.to_string(),
            status,
        };
        let president = candidate("Grace Hopper", "president", CandidateStatus::Approved);
        let treasurer = candidate("Alan Turing", "treasurer", CandidateStatus::Approved);
        let rejected = candidate("Charles Babbage", "president", CandidateStatus::Rejected);

        let voters = ["ada", "edsger", "barbara"]
            .into_iter()
            .map(|name| EligibleVoter {
                id: Id::new(),
                election_id: election.id,
                name: name.to_string(),
                primary_email: format!("{name}@example.org"),
                secondary_email: Some(format!("{name}@student.example.ac.uk")),
                eligible_posts: BTreeSet::from(["president".to_string(), "treasurer".to_string()]),
                has_voted: false,
                voted_at: None,
            })
            .collect::<Vec<_>>();

        store.insert_election(election.clone());
        for candidate in [&president, &treasurer, &rejected] {
            store.insert_candidate(candidate.clone());
        }
        for voter in &voters {
            store.insert_eligible_voter(voter.clone());
        }

        Self {
            election,
            voters,
            president,
            treasurer,
            rejected,
        }
    }

    pub fn ballot(&self, voter: &EligibleVoter, votes: &[(&str, Id)]) -> SubmitVotesRequest {
        SubmitVotesRequest {
            election_id: self.election.id.to_string(),
            votes: votes
                .iter()
                .map(|(position, candidate)| (position.to_string(), candidate.to_string()))
                .collect(),
            voter_email: voter.primary_email.clone(),
        }
    }

    /// A valid vote for every position.
    pub fn full_ballot(&self, voter: &EligibleVoter) -> SubmitVotesRequest {
        self.ballot(
            voter,
            &[
                ("president", self.president.id),
                ("treasurer", self.treasurer.id),
            ],
        )
    }
}
