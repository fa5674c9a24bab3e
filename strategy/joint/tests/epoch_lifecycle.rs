//! Full epochs driven through the providers, plus the epoch state-machine guards.

use alloy::primitives::U256;
use clients_vault::Vault;
use joint::testkit::{HedgeSetup, SimWorld, DAY};
use joint::{EpochPhase, JointError, StateViolation};

const HOUR: u64 = 3_600;

#[tokio::test]
async fn epoch_opens_with_every_unit_accounted_for() {
    let mut world = SimWorld::builder().build().await.unwrap();
    let deposited_a = world.token_a.units(10_000);
    let deposited_b = world.token_b.units(5_000);

    let id = world.start_epoch().await.unwrap();
    assert_eq!(id, 1);
    assert_eq!(world.joint.phase(), EpochPhase::Open);

    let epoch = world.joint.epoch().unwrap().clone();
    // the joint keeps nothing loose: capital is in the pool, the hedge, or back with its provider
    assert!(world.joint.loose().is_zero());
    assert!(world.joint.pending().is_zero());
    assert_eq!(epoch.provided, epoch.invested.saturating_add(epoch.hedge_cost));
    assert_eq!(
        epoch.provided.a + world.provider_a.want_balance(),
        deposited_a
    );
    assert_eq!(
        epoch.provided.b + world.provider_b.want_balance(),
        deposited_b
    );
    assert!(epoch.hedge.is_some());
    assert!(!epoch.hedge_cost.b.is_zero());

    // the position is worth what went in, give or take pool rounding
    let estimate = world.joint.estimated_total_assets().await.unwrap();
    let ppm = |amount: U256| amount / U256::from(1_000_000u64);
    assert!(estimate.a <= epoch.invested.a && estimate.a + ppm(epoch.invested.a) >= epoch.invested.a);
    assert!(estimate.b <= epoch.invested.b && estimate.b + ppm(epoch.invested.b) >= epoch.invested.b);
}

#[tokio::test]
async fn epoch_settles_with_equal_returns_and_reopens() {
    let mut world = SimWorld::builder().build().await.unwrap();
    world.start_epoch().await.unwrap();

    // an hour before the hedge matures
    world.advance(7 * DAY - HOUR + 1);
    let (a, b) = world.harvest_providers().await.unwrap();

    let settlement = a.settlement.expect("provider A closes the epoch");
    assert!(b.settlement.is_none());
    assert_eq!(settlement.epoch_id, 1);
    let (return_a, return_b) = settlement.returns();
    assert!((return_a - return_b).abs() < 1e-4, "{return_a} vs {return_b}");
    // unmoved price: the premium is the only cost
    assert!(return_a > -0.01 && return_a < 0.0);
    assert_eq!(a.gain, U256::ZERO);
    assert!(!a.loss.is_zero() && !b.loss.is_zero());

    assert_eq!(b.invested, Some(2));
    assert_eq!(world.joint.settled_epochs(), 1);
    assert_eq!(world.joint.phase(), EpochPhase::Open);
    assert_eq!(world.joint.last_settlement().map(|s| s.epoch_id), Some(1));
}

#[tokio::test]
async fn second_invest_is_rejected_while_an_epoch_is_open() {
    let mut world = SimWorld::builder().build().await.unwrap();
    world.start_epoch().await.unwrap();

    let keeper = world.keeper;
    let err = world.joint.invest(keeper).await.unwrap_err();
    assert!(matches!(
        err,
        JointError::StateViolation(StateViolation::EpochActive(1))
    ));

    let provider = world.provider_a.address();
    let err = world.joint.forward(provider, U256::from(1u64)).await.unwrap_err();
    assert!(matches!(
        err,
        JointError::StateViolation(StateViolation::WrongPhase {
            phase: EpochPhase::Open,
            ..
        })
    ));
}

#[tokio::test]
async fn invest_needs_both_sides_and_a_keeper() {
    let mut world = SimWorld::builder().build().await.unwrap();
    let keeper = world.keeper;
    world
        .provider_a
        .harvest(keeper, &mut world.joint)
        .await
        .unwrap();
    assert!(!world.joint.ready_to_invest());

    let err = world.joint.invest(keeper).await.unwrap_err();
    assert!(matches!(
        err,
        JointError::StateViolation(StateViolation::NotFunded(_))
    ));

    let stranger = world.whale;
    let err = world.joint.invest(stranger).await.unwrap_err();
    assert!(matches!(
        err,
        JointError::StateViolation(StateViolation::Unauthorized { .. })
    ));
}

#[tokio::test]
async fn triggers_follow_time_maturity_and_price() {
    let mut world = SimWorld::builder().build().await.unwrap();
    assert!(!world.joint.should_end_epoch().await.unwrap());
    world.start_epoch().await.unwrap();
    assert!(!world.joint.should_end_epoch().await.unwrap());

    // two hours of hedge left is still enough
    world.advance(7 * DAY - 2 * HOUR);
    assert!(!world.joint.should_end_epoch().await.unwrap());
    world.advance(HOUR + 1);
    assert!(world.joint.should_end_epoch().await.unwrap());

    let keeper = world.keeper;
    world.joint.end_epoch(keeper).await.unwrap();
    assert!(!world.joint.should_end_epoch().await.unwrap());
}

#[tokio::test]
async fn period_ends_an_unhedged_epoch() {
    let mut world = SimWorld::builder()
        .hedge(HedgeSetup::None)
        .build()
        .await
        .unwrap();
    world.start_epoch().await.unwrap();
    assert!(world.joint.epoch().unwrap().hedge.is_none());

    world.advance(7 * DAY - 1);
    assert!(!world.joint.should_end_epoch().await.unwrap());
    world.advance(1);
    assert!(world.joint.should_end_epoch().await.unwrap());
}

#[tokio::test]
async fn leaving_the_protection_range_ends_the_epoch() {
    let mut world = SimWorld::builder().build().await.unwrap();
    world.start_epoch().await.unwrap();

    world.move_price_by(-0.05).await.unwrap();
    assert!(!world.joint.should_end_epoch().await.unwrap());
    world.move_price_by(-0.12).await.unwrap();
    assert!(world.joint.should_end_epoch().await.unwrap());

    let keeper = world.keeper;
    assert!(world.joint.end_epoch(keeper).await.unwrap().is_some());
    assert!(!world.joint.should_end_epoch().await.unwrap());
}

#[tokio::test]
async fn range_edge_is_inside_and_any_step_past_it_is_out() {
    let mut world = SimWorld::builder().build().await.unwrap();
    world.start_epoch().await.unwrap();
    let entry = world.joint.epoch().unwrap().entry_price;

    world.oracle.relay(entry * 0.85);
    assert!(!world.joint.should_end_epoch().await.unwrap());
    world.oracle.relay(entry * (1.0 - 0.15004));
    assert!(world.joint.should_end_epoch().await.unwrap());
    world.oracle.relay(entry * 1.15004);
    assert!(world.joint.should_end_epoch().await.unwrap());
}

#[tokio::test]
async fn settlement_returns_every_unit_to_the_vaults() {
    let mut world = SimWorld::builder().build().await.unwrap();
    let deposited = (world.vault_a.total_assets(), world.vault_b.total_assets());
    world.start_epoch().await.unwrap();
    let governance = world.governance;
    for provider in [&mut world.provider_a, &mut world.provider_b] {
        provider.configure(governance, |c| c.invest_want = false).unwrap();
    }

    world.move_price_by(-0.05).await.unwrap();
    let keeper = world.keeper;
    assert!(world.joint.end_epoch(keeper).await.unwrap().is_some());
    let (a, b) = world.harvest_providers().await.unwrap();

    assert!(world.joint.loose().is_zero());
    assert!(world.joint.pending().is_zero());
    assert!(world.joint.estimated_total_assets().await.unwrap().is_zero());
    for (report, vault, provider, deposited) in [
        (&a, &world.vault_a, &world.provider_a, deposited.0),
        (&b, &world.vault_b, &world.provider_b, deposited.1),
    ] {
        let lent = vault.debt(provider.address()).await.unwrap();
        assert_eq!(provider.want_balance(), lent);
        assert_eq!(vault.total_assets(), deposited + report.gain - report.loss);
    }
}

#[tokio::test]
async fn ending_twice_changes_nothing_the_second_time() {
    let mut world = SimWorld::builder().build().await.unwrap();
    world.start_epoch().await.unwrap();
    let keeper = world.keeper;

    let first = world.joint.end_epoch(keeper).await.unwrap();
    assert!(first.is_some());
    assert_eq!(world.joint.phase(), EpochPhase::Idle);
    let balances = (
        world.provider_a.want_balance(),
        world.provider_b.want_balance(),
        world.joint.loose(),
    );
    assert!(balances.2.is_zero());

    let second = world.joint.end_epoch(keeper).await.unwrap();
    assert!(second.is_none());
    assert_eq!(
        (
            world.provider_a.want_balance(),
            world.provider_b.want_balance(),
            world.joint.loose(),
        ),
        balances
    );
    assert_eq!(world.joint.settled_epochs(), 1);
}

#[tokio::test]
async fn snapshot_reports_the_open_position() {
    let mut world = SimWorld::builder().build().await.unwrap();
    world.start_epoch().await.unwrap();

    let snapshot = world.joint.snapshot().await.unwrap();
    assert_eq!(snapshot.phase, EpochPhase::Open);
    assert_eq!(snapshot.epoch_id, Some(1));
    assert!((snapshot.price - 0.5).abs() < 1e-9);
    assert!(snapshot.position_a > 9_900.0 && snapshot.position_a < 10_000.0);
    assert!(snapshot.position_b > 4_950.0 && snapshot.position_b < 5_000.0);
    assert!(snapshot.hedge_cost_value > 0.0 && snapshot.hedge_cost_value < 50.0);
    assert_eq!(snapshot.hedge_payout_value, 0.0);
    assert!(snapshot.in_range);
    assert!(snapshot.estimated_value_b > 9_900.0);

    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["phase"], "open");
}
