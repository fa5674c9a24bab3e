//! Governance commands: manual unwinding and runtime parameter changes.

use alloy::primitives::U256;
use clients_amm::{AmmError, SwapRoute};
use joint::testkit::{SimWorld, DAY};
use joint::{
    AdminCommand, ConfigError, EpochPhase, JointError, ManualCommand, StateViolation,
};
use utils::PairAmounts;

#[tokio::test]
async fn stuck_rebalance_is_finished_by_hand() {
    let mut world = SimWorld::builder()
        .config(|c| c.slippage.max_rebalance_impact_bps = 10)
        .build()
        .await
        .unwrap();
    world.start_epoch().await.unwrap();
    world.move_price_by(-0.10).await.unwrap();
    let (governance, keeper) = (world.governance, world.keeper);

    // the pool fee alone is over the impact limit; nothing is unwound
    let err = world.joint.end_epoch(keeper).await.unwrap_err();
    assert!(matches!(err, JointError::InsufficientLiquidityToRebalance { .. }));
    assert_eq!(world.joint.phase(), EpochPhase::Open);

    let liquidity = world.joint.epoch().unwrap().liquidity;
    let bounds = world.joint.withdraw_bounds(liquidity).await.unwrap();
    let out = world
        .joint
        .execute(governance, ManualCommand::RemoveLiquidity { min_out: bounds })
        .await
        .unwrap();
    assert!(out.a >= bounds.a && out.b >= bounds.b);
    assert_eq!(world.joint.phase(), EpochPhase::Closing);
    assert!(world.joint.should_end_epoch().await.unwrap());

    let payout = world
        .joint
        .execute(governance, ManualCommand::CloseHedge)
        .await
        .unwrap();
    assert!(!payout.b.is_zero());
    assert!(world.joint.epoch().unwrap().is_unwound());

    // settling still needs the rebalance, so the epoch stays closing
    let err = world.joint.end_epoch(keeper).await.unwrap_err();
    assert!(matches!(err, JointError::InsufficientLiquidityToRebalance { .. }));
    assert_eq!(world.joint.phase(), EpochPhase::Closing);

    let loose = world.joint.loose();
    let before = (world.provider_a.want_balance(), world.provider_b.want_balance());
    let returned = world
        .joint
        .execute(governance, ManualCommand::ReturnLooseToProviders)
        .await
        .unwrap();
    assert_eq!(returned, loose);
    assert_eq!(world.provider_a.want_balance(), before.0 + loose.a);
    assert_eq!(world.provider_b.want_balance(), before.1 + loose.b);
    assert_eq!(world.joint.phase(), EpochPhase::Idle);
    assert_eq!(world.joint.settled_epochs(), 1);
    assert!(world.joint.loose().is_zero());
}

#[tokio::test]
async fn manual_commands_are_for_governance_in_an_epoch() {
    let mut world = SimWorld::builder().build().await.unwrap();
    let (governance, keeper) = (world.governance, world.keeper);

    let err = world
        .joint
        .execute(keeper, ManualCommand::CollectFees)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        JointError::StateViolation(StateViolation::Unauthorized { .. })
    ));

    let err = world
        .joint
        .execute(governance, ManualCommand::CollectFees)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        JointError::StateViolation(StateViolation::WrongPhase {
            phase: EpochPhase::Idle,
            ..
        })
    ));
}

#[tokio::test]
async fn liquidity_burns_are_bounded_by_what_is_held() {
    let mut world = SimWorld::builder().build().await.unwrap();
    world.start_epoch().await.unwrap();
    let governance = world.governance;
    let held = world.joint.epoch().unwrap().liquidity;

    let err = world
        .joint
        .execute(
            governance,
            ManualCommand::BurnLiquidity {
                liquidity: Some(held + U256::from(1u64)),
                min_out: PairAmounts::ZERO,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, JointError::Amm(AmmError::InsufficientLiquidity)));

    let half = held / U256::from(2u64);
    let out = world
        .joint
        .execute(
            governance,
            ManualCommand::BurnLiquidity {
                liquidity: Some(half),
                min_out: PairAmounts::ZERO,
            },
        )
        .await
        .unwrap();
    assert!(!out.a.is_zero() && !out.b.is_zero());
    assert_eq!(world.joint.epoch().unwrap().liquidity, held - half);
    assert_eq!(world.joint.loose(), out);
    assert_eq!(world.joint.phase(), EpochPhase::Open);
}

#[tokio::test]
async fn manual_swap_trades_loose_balances() {
    let mut world = SimWorld::builder().build().await.unwrap();
    world.start_epoch().await.unwrap();
    let governance = world.governance;
    world
        .joint
        .execute(
            governance,
            ManualCommand::BurnLiquidity {
                liquidity: None,
                min_out: PairAmounts::ZERO,
            },
        )
        .await
        .unwrap();
    let loose = world.joint.loose();

    let sell = loose.a / U256::from(4u64);
    let out = world
        .joint
        .execute(
            governance,
            ManualCommand::Swap {
                sell: joint::Asset::A,
                amount: sell,
                min_out: U256::ZERO,
            },
        )
        .await
        .unwrap();
    assert!(out.a.is_zero() && !out.b.is_zero());
    assert_eq!(world.joint.loose(), PairAmounts::new(loose.a - sell, loose.b + out.b));
}

#[tokio::test]
async fn parameter_changes_are_validated() {
    let mut world = SimWorld::builder().build().await.unwrap();
    world.start_epoch().await.unwrap();
    let (governance, keeper) = (world.governance, world.keeper);

    let err = world
        .joint
        .administer(keeper, AdminCommand::SetPeriod(DAY))
        .unwrap_err();
    assert!(matches!(
        err,
        JointError::StateViolation(StateViolation::Unauthorized { .. })
    ));

    let err = world
        .joint
        .administer(governance, AdminCommand::SetHedgeBudget(20_000))
        .unwrap_err();
    assert!(matches!(
        err,
        JointError::Config(ConfigError::InvalidValue {
            field: "hedge.budget_bps",
            ..
        })
    ));
    assert_eq!(world.joint.config().hedge.budget_bps, 100);

    world
        .joint
        .administer(governance, AdminCommand::SetPeriod(2 * DAY))
        .unwrap();
    assert_eq!(world.joint.config().period_secs, 2 * DAY);
    assert_eq!(world.joint.epoch().unwrap().period_secs, 2 * DAY);

    // there is no stable pool in this world
    let err = world
        .joint
        .administer(governance, AdminCommand::SetSwapRoute(SwapRoute::Stable))
        .unwrap_err();
    assert!(matches!(err, JointError::Amm(AmmError::NoRoute { .. })));
    assert_eq!(world.joint.config().swap_route, SwapRoute::Primary);

    assert!(!world.joint.should_end_epoch().await.unwrap());
    world
        .joint
        .administer(governance, AdminCommand::SetForceEnd(true))
        .unwrap();
    assert!(world.joint.should_end_epoch().await.unwrap());
}

#[tokio::test]
async fn stable_route_is_selectable_when_the_pool_exists() {
    let mut world = SimWorld::builder()
        .price(1.0)
        .decimals(18, 18)
        .stable_pool()
        .build()
        .await
        .unwrap();
    let governance = world.governance;
    world
        .joint
        .administer(governance, AdminCommand::SetSwapRoute(SwapRoute::Stable))
        .unwrap();
    assert_eq!(world.router.route(), SwapRoute::Stable);
    assert_eq!(world.joint.config().swap_route, SwapRoute::Stable);
}
