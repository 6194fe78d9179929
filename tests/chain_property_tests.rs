//! Property-based tests for the approval chain state machine
//!
//! The chain's state is derived from three flags spread over its records, so the transition
//! logic is where corruption would start. These properties drive chains of arbitrary length
//! through arbitrary numbers of approvals and check the record invariants after every step.
//!
//! Persistence and authorization are left to the scenario tests.

use proptest::prelude::*;
use approval_chain::{
    chain::{ApprovalChain, ChainState, Transition},
    error::ChainError,
    record::RecordStatus,
    types::{ChainId, ProjectId, TimeStamp, UserId},
};

/// Strategy for an ordered list of distinct approvers (1 to 10)
fn approvers_strategy() -> impl Strategy<Value = Vec<UserId>> {
    prop::collection::hash_set("user_[a-z]{3,8}", 1..=10)
        .prop_map(|names| names.into_iter().map(UserId::new).collect())
        .prop_shuffle()
}

fn build(approvers: &[UserId]) -> ApprovalChain {
    ApprovalChain::new_with(
        ChainId::from("chain_prop"),
        ProjectId::from("project_prop"),
        UserId::from("owner"),
        approvers,
    )
    .expect("distinct non-empty approvers always build")
}

fn current_count(chain: &ApprovalChain) -> usize {
    chain.records().iter().filter(|r| r.is_current).count()
}

proptest! {
    /// Property: sequences are 1..N in input order and only the first record is current
    #[test]
    fn prop_creation_follows_input_order(approvers in approvers_strategy()) {
        let chain = build(&approvers);

        let sequences: Vec<u32> = chain.records().iter().map(|r| r.sequence).collect();
        let expected: Vec<u32> = (1..=approvers.len() as u32).collect();
        prop_assert_eq!(sequences, expected);

        let assigned: Vec<&UserId> = chain.records().iter().map(|r| &r.user_id).collect();
        let input: Vec<&UserId> = approvers.iter().collect();
        prop_assert_eq!(assigned, input);

        prop_assert_eq!(current_count(&chain), 1);
        prop_assert!(chain.records()[0].is_current);
        prop_assert_eq!(chain.state(), ChainState::Pending { current: 1 });
        prop_assert!(chain.validate().is_ok());
    }

    /// Property: each approval moves the current marker exactly one slot forward
    ///
    /// After k approvals of an N-record chain (k < N), records 1..=k are approved and not
    /// current, record k+1 is current, and the chain is still active.
    #[test]
    fn prop_advancement_is_monotonic(
        (approvers, k) in approvers_strategy()
            .prop_flat_map(|a| { let n = a.len(); (Just(a), 0..n) })
    ) {
        let mut chain = build(&approvers);

        for step in 0..k {
            let before = chain.current_approver().map(|r| r.sequence);
            prop_assert_eq!(before, Some(step as u32 + 1));

            let acting = approvers[step].clone();
            let transition = chain.approve_and_forward(&acting, TimeStamp::new());
            let is_advanced = matches!(transition, Transition::Advanced { .. });
            prop_assert!(is_advanced);
            prop_assert!(chain.validate().is_ok());
        }

        for record in chain.records() {
            let position = record.sequence as usize;
            if position <= k {
                prop_assert_eq!(record.status(), RecordStatus::Approved);
                prop_assert_eq!(record.approved_by.as_ref(), Some(&record.user_id));
            } else if position == k + 1 {
                prop_assert_eq!(record.status(), RecordStatus::Current);
            } else {
                prop_assert_eq!(record.status(), RecordStatus::Pending);
            }
        }
        prop_assert_eq!(current_count(&chain), 1);
        prop_assert!(chain.active);
        prop_assert!(!chain.is_completed());
    }

    /// Property: N approvals complete the chain, after which approvals change nothing
    #[test]
    fn prop_last_approval_completes(
        approvers in approvers_strategy(),
        extra in 1usize..4,
    ) {
        let mut chain = build(&approvers);

        let mut last = Transition::NoOp;
        for acting in &approvers {
            last = chain.approve_and_forward(acting, TimeStamp::new());
        }

        let is_completed = matches!(last, Transition::Completed { .. });
        prop_assert!(is_completed);
        prop_assert!(!chain.active);
        prop_assert!(chain.is_completed());
        prop_assert_eq!(current_count(&chain), 0);
        prop_assert_eq!(chain.state(), ChainState::Completed);
        prop_assert!(chain.validate().is_ok());

        let settled = chain.clone();
        for _ in 0..extra {
            let transition = chain.approve_and_forward(&approvers[0], TimeStamp::new());
            prop_assert_eq!(transition, Transition::NoOp);
        }
        prop_assert_eq!(chain, settled);
    }

    /// Property: any list with a repeated approver is rejected
    #[test]
    fn prop_duplicates_are_rejected(
        approvers in approvers_strategy(),
        pick in any::<prop::sample::Index>(),
        at in any::<prop::sample::Index>(),
    ) {
        let mut with_dup = approvers.clone();
        let dup = with_dup[pick.index(approvers.len())].clone();
        with_dup.insert(at.index(approvers.len() + 1), dup.clone());

        let result = build_result(&with_dup);
        let rejected = matches!(result, Err(ChainError::DuplicateApprover(ref u)) if *u == dup);
        prop_assert!(rejected);
    }

    /// Property: state() is a pure function of the records
    #[test]
    fn prop_state_is_idempotent(
        (approvers, k) in approvers_strategy()
            .prop_flat_map(|a| { let n = a.len(); (Just(a), 0..=n) })
    ) {
        let mut chain = build(&approvers);
        for acting in approvers.iter().take(k) {
            chain.approve_and_forward(acting, TimeStamp::new());
        }

        let state1 = chain.state();
        let state2 = chain.state();
        prop_assert_eq!(&state1, &state2);

        let expected = if k == approvers.len() {
            ChainState::Completed
        } else if k == 0 {
            ChainState::Pending { current: 1 }
        } else {
            ChainState::InProgress { current: k as u32 + 1, approved: k }
        };
        prop_assert_eq!(state1, expected);
    }

    /// Property: CBOR round-trip preserves the derived state
    #[test]
    fn prop_cbor_roundtrip_preserves_state(
        (approvers, k) in approvers_strategy()
            .prop_flat_map(|a| { let n = a.len(); (Just(a), 0..=n) })
    ) {
        let mut chain = build(&approvers);
        for acting in approvers.iter().take(k) {
            chain.approve_and_forward(acting, TimeStamp::new());
        }

        let cbor = minicbor::to_vec(&chain).expect("Serialization should succeed");
        let decoded: ApprovalChain = minicbor::decode(&cbor).expect("Deserialization should succeed");

        prop_assert_eq!(decoded.state(), chain.state());
        prop_assert_eq!(decoded, chain);
    }
}

// Edge cases the constructors can't produce.

proptest! {
    /// Property: a chain without records is completed and ignores approvals
    #[test]
    fn prop_empty_chain_is_inert(approvers in approvers_strategy()) {
        let mut chain = build(&approvers);
        chain.records.clear();
        let before = chain.clone();

        prop_assert!(chain.is_completed());
        prop_assert_eq!(chain.approve_and_forward(&approvers[0], TimeStamp::new()), Transition::NoOp);
        prop_assert_eq!(chain, before);
    }

    /// Property: without a current marker nothing is approved, and next_approver restarts at 1
    #[test]
    fn prop_missing_current_marker_is_a_noop(approvers in approvers_strategy()) {
        let mut chain = build(&approvers);
        chain.records[0].is_current = false;
        let before = chain.clone();

        prop_assert_eq!(chain.state(), ChainState::Stalled);
        prop_assert_eq!(chain.next_approver().map(|r| r.sequence), Some(1));
        prop_assert_eq!(chain.approve_and_forward(&approvers[0], TimeStamp::new()), Transition::NoOp);
        prop_assert_eq!(chain, before);
    }
}

fn build_result(approvers: &[UserId]) -> Result<ApprovalChain, ChainError> {
    ApprovalChain::new_with(
        ChainId::from("chain_prop"),
        ProjectId::from("project_prop"),
        UserId::from("owner"),
        approvers,
    )
}
